//! Storage access for the tree engine
//!
//! Functions take `&mut SqliteConnection` so they compose inside the
//! caller's transaction (`&mut *tx`) as well as on a pooled connection.

pub mod members;
pub mod metrics;
pub mod reference;
pub mod tree_nodes;

use mlm_common::Error as CommonError;
use uuid::Uuid;

use crate::error::Result;

/// Parse a stored member GUID
pub(crate) fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| CommonError::CorruptValue(format!("invalid stored member id {:?}: {}", raw, e)).into())
}

pub(crate) fn parse_opt_id(raw: Option<String>) -> Result<Option<Uuid>> {
    raw.as_deref().map(parse_id).transpose()
}

//! Error types for mlm-tree
//!
//! Every error raised inside a placement or purchase transaction causes the
//! transaction to be dropped (rolled back) and is returned to the caller
//! unchanged. Mapping to user-facing messages belongs to the caller.

use mlm_common::Side;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for the tree engine
#[derive(Error, Debug)]
pub enum TreeError {
    /// The member already has a tree node
    #[error("Member already placed: {0}")]
    DuplicateMember(Uuid),

    /// The requested child slot is occupied
    #[error("Position taken: {side} slot of {parent_id} is occupied")]
    PositionTaken { parent_id: Uuid, side: Side },

    /// The placement parent has no tree node
    #[error("Parent not found: {0}")]
    ParentNotFound(Uuid),

    /// Missing or inactive country, region, package or sponsor
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Position Finder reached its depth bound without an open slot
    #[error("No open {side} slot within {max_depth} levels below {start}")]
    SlotSearchExhausted {
        start: Uuid,
        side: Side,
        max_depth: u32,
    },

    /// No tree row for this member
    #[error("No tree for member: {0}")]
    NotFound(Uuid),

    /// A root already exists; a second one would split the tree
    #[error("Tree already has a root: {0}")]
    RootExists(Uuid),

    /// Rejected argument (negative delta, malformed leg)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored tree disagrees with itself (child not referenced by parent)
    #[error("Inconsistent tree: {0}")]
    Inconsistent(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// mlm-common error
    #[error(transparent)]
    Common(#[from] mlm_common::Error),
}

/// Convenience Result type using TreeError
pub type Result<T> = std::result::Result<T, TreeError>;

impl TreeError {
    /// Errors caused by caller input or a lost race, as opposed to storage faults
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            TreeError::Database(_) | TreeError::Common(_) | TreeError::Inconsistent(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_taken_message_names_slot() {
        let parent_id = Uuid::nil();
        let err = TreeError::PositionTaken {
            parent_id,
            side: Side::Left,
        };
        assert_eq!(
            err.to_string(),
            format!("Position taken: left slot of {} is occupied", parent_id)
        );
        assert!(err.is_rejection());
    }

    #[test]
    fn test_storage_faults_are_not_rejections() {
        let err = TreeError::Database(sqlx::Error::RowNotFound);
        assert!(!err.is_rejection());
    }
}

//! # MLM Common Library
//!
//! Shared code for the membership tree services including:
//! - Database lifecycle (open, schema, migrations, default settings)
//! - Data models for members, tree nodes and metric records
//! - Configuration loading
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use db::models::{
    Country, Member, MemberStatus, MetricRecord, Package, RecordStatus, Region, Side, TreeNode,
};
pub use error::{Error, Result};

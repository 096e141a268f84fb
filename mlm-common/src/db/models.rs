//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// One of the two child slots of a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    /// Column of `tree_nodes` holding this side's child pointer
    pub fn child_column(&self) -> &'static str {
        match self {
            Side::Left => "left_child_id",
            Side::Right => "right_child_id",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Side::Left),
            "right" => Ok(Side::Right),
            other => Err(Error::InvalidInput(format!(
                "leg must be \"left\" or \"right\", got {:?}",
                other
            ))),
        }
    }
}

/// Member lifecycle status, changed only by admin action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Inactive,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "active",
            MemberStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for MemberStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MemberStatus::Active),
            "inactive" => Ok(MemberStatus::Inactive),
            other => Err(Error::InvalidInput(format!("unknown member status {:?}", other))),
        }
    }
}

/// Status of a reference row (country, region, package)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Active,
    Inactive,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Inactive => "inactive",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, RecordStatus::Active)
    }
}

impl FromStr for RecordStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RecordStatus::Active),
            "inactive" => Ok(RecordStatus::Inactive),
            other => Err(Error::InvalidInput(format!("unknown record status {:?}", other))),
        }
    }
}

/// Member identity record
///
/// Password and PIN hashes are stored with the row but never loaded into
/// this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: Uuid,
    pub username: String,
    /// Commission sponsor, independent of the tree parent
    pub sponsor_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub country_id: i64,
    pub region_id: i64,
    pub package_id: i64,
    pub status: MemberStatus,
    pub created_at: DateTime<Utc>,
}

/// Binary tree adjacency for one member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub member_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub left_child_id: Option<Uuid>,
    pub right_child_id: Option<Uuid>,
}

impl TreeNode {
    pub fn child(&self, side: Side) -> Option<Uuid> {
        match side {
            Side::Left => self.left_child_id,
            Side::Right => self.right_child_id,
        }
    }

    /// Which slot of this node `child_id` occupies, if any
    pub fn side_of(&self, child_id: Uuid) -> Option<Side> {
        if self.left_child_id == Some(child_id) {
            Some(Side::Left)
        } else if self.right_child_id == Some(child_id) {
            Some(Side::Right)
        } else {
            None
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Cumulative PV/BV per leg for one member
///
/// `self_pv`/`self_bv` hold the member's own purchases and are not part of
/// the leg accumulators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub self_pv: i64,
    pub self_bv: i64,
    pub left_pv: i64,
    pub right_pv: i64,
    pub total_pv: i64,
    pub left_bv: i64,
    pub right_bv: i64,
    pub total_bv: i64,
}

impl MetricRecord {
    pub fn leg_pv(&self, side: Side) -> i64 {
        match side {
            Side::Left => self.left_pv,
            Side::Right => self.right_pv,
        }
    }

    pub fn leg_bv(&self, side: Side) -> i64 {
        match side {
            Side::Left => self.left_bv,
            Side::Right => self.right_bv,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub id: i64,
    pub name: String,
    pub status: RecordStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: i64,
    pub country_id: i64,
    pub name: String,
    pub status: RecordStatus,
}

/// Purchasable tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub id: i64,
    pub name: String,
    pub pv: i64,
    pub bv: i64,
    pub status: RecordStatus,
}

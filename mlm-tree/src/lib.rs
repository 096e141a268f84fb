//! mlm-tree - binary-tree placement and value-propagation engine
//!
//! Places new members into a strict binary tree, propagates PV/BV up the
//! ancestor chain, and reconstructs downlines for dashboards. Every
//! component receives the `SqlitePool` opened by
//! `mlm_common::db::init_database`; nothing holds global state.

use sqlx::SqlitePool;

pub mod audit;
pub mod db;
pub mod error;
pub mod finder;
pub mod placement;
pub mod propagation;
pub mod reader;
pub mod settings;

pub use audit::{AuditReport, TreeAuditor, Violation};
pub use error::{Result, TreeError};
pub use finder::PositionFinder;
pub use placement::{PlacementEngine, PlacementResult, Registration};
pub use propagation::{PropagationEngine, PropagationReport, PurchaseResult};
pub use reader::{StatsView, TreeReader, TreeView, TreeViewNode};
pub use settings::EngineSettings;

/// All engine components sharing one storage handle
#[derive(Clone)]
pub struct TreeEngine {
    pub db: SqlitePool,
    pub settings: EngineSettings,
    pub placement: PlacementEngine,
    pub propagation: PropagationEngine,
    pub finder: PositionFinder,
    pub reader: TreeReader,
    pub auditor: TreeAuditor,
}

impl TreeEngine {
    pub fn new(db: SqlitePool, settings: EngineSettings) -> Self {
        Self {
            placement: PlacementEngine::new(db.clone(), settings),
            propagation: PropagationEngine::new(db.clone(), &settings),
            finder: PositionFinder::new(db.clone(), &settings),
            reader: TreeReader::new(db.clone(), &settings),
            auditor: TreeAuditor::new(db.clone(), &settings),
            db,
            settings,
        }
    }

    /// Build with settings loaded from the database
    pub async fn load(db: SqlitePool) -> Result<Self> {
        let settings = EngineSettings::load(&db).await?;
        Ok(Self::new(db, settings))
    }
}

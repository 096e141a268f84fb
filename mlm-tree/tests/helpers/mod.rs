//! Shared fixtures for mlm-tree integration tests
//!
//! `TestTree` owns a temporary database seeded with one country/region and
//! three packages, plus an engine built from it.

#![allow(dead_code)]

use mlm_common::db::init::init_database;
use mlm_common::{RecordStatus, Side};
use mlm_tree::db::reference;
use mlm_tree::settings::{store_setting, EngineSettings};
use mlm_tree::{PlacementResult, Registration, TreeEngine};
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

pub struct Packages {
    /// pv = bv = 50
    pub gold: i64,
    /// pv = bv = 30
    pub silver: i64,
    /// pv = bv = 20
    pub bronze: i64,
}

pub struct TestTree {
    // Held so the database file outlives the test
    _dir: TempDir,
    pub pool: SqlitePool,
    pub engine: TreeEngine,
    pub country: i64,
    pub region: i64,
    pub packages: Packages,
}

impl TestTree {
    pub async fn new() -> Self {
        Self::with_settings(&[]).await
    }

    /// Fresh database with `settings` stored before the engine loads them
    pub async fn with_settings(settings: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("mlm.db")).await.unwrap();

        for (key, value) in settings {
            store_setting(&pool, key, value).await.unwrap();
        }

        let mut conn = pool.acquire().await.unwrap();
        let country = reference::insert_country(&mut conn, "Kenya", RecordStatus::Active)
            .await
            .unwrap();
        let region = reference::insert_region(&mut conn, country, "Nairobi", RecordStatus::Active)
            .await
            .unwrap();
        let packages = Packages {
            gold: reference::insert_package(&mut conn, "Gold", 50, 50, RecordStatus::Active)
                .await
                .unwrap(),
            silver: reference::insert_package(&mut conn, "Silver", 30, 30, RecordStatus::Active)
                .await
                .unwrap(),
            bronze: reference::insert_package(&mut conn, "Bronze", 20, 20, RecordStatus::Active)
                .await
                .unwrap(),
        };
        drop(conn);

        let engine = TreeEngine::load(pool.clone()).await.unwrap();

        Self {
            _dir: dir,
            pool,
            engine,
            country,
            region,
            packages,
        }
    }

    pub fn settings(&self) -> EngineSettings {
        self.engine.settings
    }

    /// Registration for a unique username on `package_id`
    pub fn registration(&self, username: &str, package_id: i64) -> Registration {
        RegistrationBuilder::new(username)
            .country(self.country)
            .region(self.region)
            .package(package_id)
            .build()
    }

    pub async fn create_root(&self, username: &str, package_id: i64) -> Uuid {
        let id = Uuid::new_v4();
        self.engine
            .placement
            .create_root(id, &self.registration(username, package_id))
            .await
            .unwrap();
        id
    }

    pub async fn try_place(
        &self,
        username: &str,
        parent: Uuid,
        side: Side,
        package_id: i64,
    ) -> mlm_tree::Result<PlacementResult> {
        self.engine
            .placement
            .place(Uuid::new_v4(), parent, side, &self.registration(username, package_id))
            .await
    }

    pub async fn place(&self, username: &str, parent: Uuid, side: Side, package_id: i64) -> Uuid {
        self.try_place(username, parent, side, package_id)
            .await
            .unwrap()
            .member_id
    }

    /// Plain `side` chain of `length` members under `top`; returns them top-down
    pub async fn chain(&self, prefix: &str, top: Uuid, side: Side, length: usize, package_id: i64) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(length);
        let mut parent = top;
        for i in 0..length {
            parent = self.place(&format!("{}-{}", prefix, i), parent, side, package_id).await;
            ids.push(parent);
        }
        ids
    }

    pub async fn metrics(&self, member_id: Uuid) -> mlm_common::MetricRecord {
        let mut conn = self.pool.acquire().await.unwrap();
        mlm_tree::db::metrics::load_metrics(&mut conn, member_id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn row_counts(&self) -> (i64, i64, i64) {
        let members: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM members")
            .fetch_one(&self.pool)
            .await
            .unwrap();
        let nodes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tree_nodes")
            .fetch_one(&self.pool)
            .await
            .unwrap();
        let metrics: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metrics")
            .fetch_one(&self.pool)
            .await
            .unwrap();
        (members, nodes, metrics)
    }
}

/// Builder for registration payloads
pub struct RegistrationBuilder {
    registration: Registration,
}

impl RegistrationBuilder {
    pub fn new(username: &str) -> Self {
        Self {
            registration: Registration {
                username: username.to_string(),
                sponsor_username: None,
                first_name: "Test".to_string(),
                last_name: username.to_string(),
                email: format!("{}@example.com", username),
                phone: format!("+254-{}", username),
                country_id: 1,
                region_id: 1,
                package_id: 1,
                password_hash: "argon2-hash".to_string(),
                pin_hash: "argon2-pin".to_string(),
            },
        }
    }

    pub fn sponsor(mut self, username: &str) -> Self {
        self.registration.sponsor_username = Some(username.to_string());
        self
    }

    pub fn country(mut self, id: i64) -> Self {
        self.registration.country_id = id;
        self
    }

    pub fn region(mut self, id: i64) -> Self {
        self.registration.region_id = id;
        self
    }

    pub fn package(mut self, id: i64) -> Self {
        self.registration.package_id = id;
        self
    }

    pub fn build(self) -> Registration {
        self.registration
    }
}

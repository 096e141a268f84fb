//! Reference data: countries, regions, packages
//!
//! Placement re-verifies every reference itself even though the
//! registration layer already validated it.

use mlm_common::{Country, Package, RecordStatus, Region};
use sqlx::{Row, SqliteConnection};

use crate::error::{Result, TreeError};

/// Which reference table a status change targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Country,
    Region,
    Package,
}

impl ReferenceKind {
    fn table(&self) -> &'static str {
        match self {
            ReferenceKind::Country => "countries",
            ReferenceKind::Region => "regions",
            ReferenceKind::Package => "packages",
        }
    }
}

pub async fn insert_country(
    conn: &mut SqliteConnection,
    name: &str,
    status: RecordStatus,
) -> Result<i64> {
    let result = sqlx::query("INSERT INTO countries (name, status) VALUES (?, ?)")
        .bind(name)
        .bind(status.as_str())
        .execute(&mut *conn)
        .await?;

    Ok(result.last_insert_rowid())
}

pub async fn insert_region(
    conn: &mut SqliteConnection,
    country_id: i64,
    name: &str,
    status: RecordStatus,
) -> Result<i64> {
    let result = sqlx::query("INSERT INTO regions (country_id, name, status) VALUES (?, ?, ?)")
        .bind(country_id)
        .bind(name)
        .bind(status.as_str())
        .execute(&mut *conn)
        .await?;

    Ok(result.last_insert_rowid())
}

pub async fn insert_package(
    conn: &mut SqliteConnection,
    name: &str,
    pv: i64,
    bv: i64,
    status: RecordStatus,
) -> Result<i64> {
    if pv < 0 || bv < 0 {
        return Err(TreeError::InvalidInput(format!(
            "package {:?} must have non-negative PV/BV (pv={}, bv={})",
            name, pv, bv
        )));
    }

    let result = sqlx::query("INSERT INTO packages (name, pv, bv, status) VALUES (?, ?, ?, ?)")
        .bind(name)
        .bind(pv)
        .bind(bv)
        .bind(status.as_str())
        .execute(&mut *conn)
        .await?;

    Ok(result.last_insert_rowid())
}

/// Set the price of a package in one country
pub async fn set_package_price(
    conn: &mut SqliteConnection,
    package_id: i64,
    country_id: i64,
    price: f64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO package_prices (package_id, country_id, price) VALUES (?, ?, ?)
        ON CONFLICT(package_id, country_id) DO UPDATE SET price = excluded.price
        "#,
    )
    .bind(package_id)
    .bind(country_id)
    .bind(price)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn package_price(
    conn: &mut SqliteConnection,
    package_id: i64,
    country_id: i64,
) -> Result<Option<f64>> {
    let price: Option<f64> = sqlx::query_scalar(
        "SELECT price FROM package_prices WHERE package_id = ? AND country_id = ?",
    )
    .bind(package_id)
    .bind(country_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(price)
}

/// Activate or deactivate a reference row; returns `false` if it does not exist
pub async fn set_reference_status(
    conn: &mut SqliteConnection,
    kind: ReferenceKind,
    id: i64,
    status: RecordStatus,
) -> Result<bool> {
    let sql = format!("UPDATE {} SET status = ? WHERE id = ?", kind.table());
    let result = sqlx::query(&sql)
        .bind(status.as_str())
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn load_country(conn: &mut SqliteConnection, id: i64) -> Result<Option<Country>> {
    let row = sqlx::query("SELECT id, name, status FROM countries WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(Some(Country {
            id: row.get("id"),
            name: row.get("name"),
            status: row.get::<String, _>("status").parse()?,
        })),
        None => Ok(None),
    }
}

pub async fn load_region(conn: &mut SqliteConnection, id: i64) -> Result<Option<Region>> {
    let row = sqlx::query("SELECT id, country_id, name, status FROM regions WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(Some(Region {
            id: row.get("id"),
            country_id: row.get("country_id"),
            name: row.get("name"),
            status: row.get::<String, _>("status").parse()?,
        })),
        None => Ok(None),
    }
}

pub async fn load_package(conn: &mut SqliteConnection, id: i64) -> Result<Option<Package>> {
    let row = sqlx::query("SELECT id, name, pv, bv, status FROM packages WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(Some(Package {
            id: row.get("id"),
            name: row.get("name"),
            pv: row.get("pv"),
            bv: row.get("bv"),
            status: row.get::<String, _>("status").parse()?,
        })),
        None => Ok(None),
    }
}

/// Check country, region and package exist, are active, and that the
/// region belongs to the country. Returns the package for its PV/BV.
pub async fn verify_references(
    conn: &mut SqliteConnection,
    country_id: i64,
    region_id: i64,
    package_id: i64,
) -> Result<Package> {
    let country = load_country(conn, country_id)
        .await?
        .ok_or_else(|| TreeError::InvalidReference(format!("country {} does not exist", country_id)))?;
    if !country.status.is_active() {
        return Err(TreeError::InvalidReference(format!(
            "country {} ({}) is inactive",
            country.id, country.name
        )));
    }

    let region = load_region(conn, region_id)
        .await?
        .ok_or_else(|| TreeError::InvalidReference(format!("region {} does not exist", region_id)))?;
    if !region.status.is_active() {
        return Err(TreeError::InvalidReference(format!(
            "region {} ({}) is inactive",
            region.id, region.name
        )));
    }
    if region.country_id != country.id {
        return Err(TreeError::InvalidReference(format!(
            "region {} does not belong to country {}",
            region.id, country.id
        )));
    }

    let package = load_package(conn, package_id)
        .await?
        .ok_or_else(|| TreeError::InvalidReference(format!("package {} does not exist", package_id)))?;
    if !package.status.is_active() {
        return Err(TreeError::InvalidReference(format!(
            "package {} ({}) is inactive",
            package.id, package.name
        )));
    }

    Ok(package)
}

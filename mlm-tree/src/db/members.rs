//! Member Ledger
//!
//! Identity fields are written once at registration; only `status` is ever
//! updated afterwards.

use chrono::{DateTime, Utc};
use mlm_common::{time, Member, MemberStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::{parse_id, parse_opt_id};
use crate::error::Result;
use crate::placement::Registration;

/// Build a `Member` from a row carrying the members columns
///
/// Shared with the Tree Reader, whose bulk query selects the same names.
pub(crate) fn member_from_row(row: &SqliteRow) -> Result<Member> {
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");

    Ok(Member {
        id: parse_id(&row.get::<String, _>("guid"))?,
        username: row.get("username"),
        sponsor_id: parse_opt_id(row.get("sponsor_id"))?,
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        phone: row.get("phone"),
        country_id: row.get("country_id"),
        region_id: row.get("region_id"),
        package_id: row.get("package_id"),
        status: status.parse()?,
        created_at: time::from_storage(&created_at)?,
    })
}

pub async fn insert_member(
    conn: &mut SqliteConnection,
    member_id: Uuid,
    sponsor_id: Option<Uuid>,
    registration: &Registration,
    created_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO members (
            guid, username, sponsor_id, first_name, last_name, email, phone,
            country_id, region_id, package_id, password_hash, pin_hash,
            status, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?)
        "#,
    )
    .bind(member_id.to_string())
    .bind(&registration.username)
    .bind(sponsor_id.map(|id| id.to_string()))
    .bind(&registration.first_name)
    .bind(&registration.last_name)
    .bind(&registration.email)
    .bind(&registration.phone)
    .bind(registration.country_id)
    .bind(registration.region_id)
    .bind(registration.package_id)
    .bind(&registration.password_hash)
    .bind(&registration.pin_hash)
    .bind(time::to_storage(created_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn load_member(conn: &mut SqliteConnection, member_id: Uuid) -> Result<Option<Member>> {
    let row = sqlx::query(
        r#"
        SELECT guid, username, sponsor_id, first_name, last_name, email, phone,
               country_id, region_id, package_id, status, created_at
        FROM members
        WHERE guid = ?
        "#,
    )
    .bind(member_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(member_from_row).transpose()
}

pub async fn member_exists(conn: &mut SqliteConnection, member_id: Uuid) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM members WHERE guid = ?)")
        .bind(member_id.to_string())
        .fetch_one(&mut *conn)
        .await?;

    Ok(exists)
}

pub async fn find_member_id_by_username(
    conn: &mut SqliteConnection,
    username: &str,
) -> Result<Option<Uuid>> {
    let id: Option<String> = sqlx::query_scalar("SELECT guid FROM members WHERE username = ?")
        .bind(username)
        .fetch_optional(&mut *conn)
        .await?;

    id.as_deref().map(parse_id).transpose()
}

/// Admin status change; returns `false` if the member does not exist
pub async fn set_member_status(
    conn: &mut SqliteConnection,
    member_id: Uuid,
    status: MemberStatus,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE members SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE guid = ?",
    )
    .bind(status.as_str())
    .bind(member_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

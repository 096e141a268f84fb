//! mlm-tree - admin tool for the member tree
//!
//! Opens the shared database, runs one engine operation and prints the
//! result as JSON. The registration and dashboard services call the same
//! library functions in-process.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mlm_common::config::{self, TomlConfig, DATABASE_ENV_VAR};
use mlm_common::db::init::init_database_with;
use mlm_common::{MemberStatus, RecordStatus, Side};
use mlm_tree::db::{members, reference};
use mlm_tree::settings::{self, EngineSettings};
use mlm_tree::{Registration, TreeEngine};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "mlm-tree")]
#[command(about = "Binary-tree placement and value-propagation admin tool")]
#[command(version)]
struct Cli {
    /// TOML bootstrap config (defaults to the platform config dir)
    #[arg(long, env = "MLM_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path (overrides MLM_DATABASE and the config file)
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and optionally write a config file
    Init {
        #[arg(long)]
        write_config: Option<PathBuf>,
    },
    AddCountry {
        name: String,
    },
    AddRegion {
        country_id: i64,
        name: String,
    },
    AddPackage {
        name: String,
        pv: i64,
        /// Defaults to the PV value
        #[arg(long)]
        bv: Option<i64>,
        /// Price in the country given by --price-country
        #[arg(long, requires = "price_country")]
        price: Option<f64>,
        #[arg(long)]
        price_country: Option<i64>,
    },
    /// Deactivate or reactivate a country, region or package
    SetReferenceStatus {
        #[arg(value_parser = ["country", "region", "package"])]
        kind: String,
        id: i64,
        status: RecordStatus,
    },
    /// Bootstrap the tree root
    CreateRoot {
        #[command(flatten)]
        registration: RegistrationArgs,
    },
    /// Place a new member at an exact parent and side
    Place {
        #[arg(long)]
        parent: Uuid,
        #[arg(long)]
        side: Side,
        /// Search down the side's lineage from --parent for the first open slot
        #[arg(long)]
        auto: bool,
        #[command(flatten)]
        registration: RegistrationArgs,
    },
    FindSlot {
        start: Uuid,
        side: Side,
    },
    /// Record a repurchase and propagate it upward
    Purchase {
        member: Uuid,
        pv: i64,
        #[arg(long)]
        bv: Option<i64>,
    },
    Tree {
        member: Uuid,
    },
    Stats {
        member: Uuid,
    },
    Audit,
    /// Change an engine setting (takes effect on the next run)
    SetSetting {
        #[arg(value_parser = ["slot_search_max_depth", "propagation_depth_cap", "recent_join_window_days"])]
        key: String,
        value: u32,
    },
    SetStatus {
        member: Uuid,
        status: MemberStatus,
    },
}

#[derive(Args, Debug)]
struct RegistrationArgs {
    /// Member id (generated when omitted)
    #[arg(long)]
    member_id: Option<Uuid>,
    #[arg(long)]
    username: String,
    #[arg(long)]
    sponsor: Option<String>,
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    phone: String,
    #[arg(long)]
    country: i64,
    #[arg(long)]
    region: i64,
    #[arg(long)]
    package: i64,
    #[arg(long)]
    password_hash: String,
    #[arg(long)]
    pin_hash: String,
}

impl RegistrationArgs {
    fn split(self) -> (Uuid, Registration) {
        let member_id = self.member_id.unwrap_or_else(Uuid::new_v4);
        let registration = Registration {
            username: self.username,
            sponsor_username: self.sponsor,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            phone: self.phone,
            country_id: self.country,
            region_id: self.region,
            package_id: self.package,
            password_hash: self.password_hash,
            pin_hash: self.pin_hash,
        };
        (member_id, registration)
    }
}

fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let toml_config = config::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;
    init_tracing(&toml_config)?;

    info!(
        "Starting mlm-tree v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let db_path = config::resolve_database_path(cli.database.as_deref(), DATABASE_ENV_VAR, &toml_config);
    info!("Database path: {}", db_path.display());

    let pool = init_database_with(&db_path, toml_config.database.to_options())
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let outcome = run(cli.command, &pool, &toml_config, db_path).await;

    pool.close().await;
    outcome
}

async fn run(
    command: Command,
    pool: &sqlx::SqlitePool,
    toml_config: &TomlConfig,
    db_path: PathBuf,
) -> Result<()> {
    let engine = TreeEngine::load(pool.clone())
        .await
        .context("Failed to load engine settings")?;

    match command {
        Command::Init { write_config } => {
            if let Some(path) = write_config {
                let mut written = toml_config.clone();
                written.database_path = Some(db_path);
                config::write_toml_config(&written, &path)?;
                info!("Wrote config to {}", path.display());
            }
            print_json(&engine.settings)?;
        }
        Command::AddCountry { name } => {
            let mut conn = pool.acquire().await?;
            let id = reference::insert_country(&mut conn, &name, RecordStatus::Active).await?;
            print_json(&serde_json::json!({ "country_id": id }))?;
        }
        Command::AddRegion { country_id, name } => {
            let mut conn = pool.acquire().await?;
            let id = reference::insert_region(&mut conn, country_id, &name, RecordStatus::Active).await?;
            print_json(&serde_json::json!({ "region_id": id }))?;
        }
        Command::AddPackage { name, pv, bv, price, price_country } => {
            let mut conn = pool.acquire().await?;
            let id = reference::insert_package(&mut conn, &name, pv, bv.unwrap_or(pv), RecordStatus::Active).await?;
            if let (Some(price), Some(country_id)) = (price, price_country) {
                reference::set_package_price(&mut conn, id, country_id, price).await?;
            }
            print_json(&serde_json::json!({ "package_id": id }))?;
        }
        Command::SetReferenceStatus { kind, id, status } => {
            let kind = match kind.as_str() {
                "country" => reference::ReferenceKind::Country,
                "region" => reference::ReferenceKind::Region,
                _ => reference::ReferenceKind::Package,
            };
            let mut conn = pool.acquire().await?;
            if !reference::set_reference_status(&mut conn, kind, id, status).await? {
                anyhow::bail!("{:?} {} does not exist", kind, id);
            }
            print_json(&serde_json::json!({ "id": id, "status": status }))?;
        }
        Command::CreateRoot { registration } => {
            let (member_id, registration) = registration.split();
            let placed = engine.placement.create_root(member_id, &registration).await?;
            print_json(&placed)?;
        }
        Command::Place { parent, side, auto, registration } => {
            let (member_id, registration) = registration.split();
            let placed = if auto {
                engine.placement.place_auto(member_id, parent, side, &registration).await?
            } else {
                engine.placement.place(member_id, parent, side, &registration).await?
            };
            print_json(&placed)?;
        }
        Command::FindSlot { start, side } => {
            let parent = engine.finder.find_open_slot(start, side).await?;
            print_json(&serde_json::json!({ "parent_id": parent, "side": side }))?;
        }
        Command::Purchase { member, pv, bv } => {
            let purchase = engine.propagation.record_purchase(member, pv, bv.unwrap_or(pv)).await?;
            print_json(&purchase)?;
        }
        Command::Tree { member } => {
            let view = engine.reader.read_subtree(member).await?;
            print_json(&view)?;
        }
        Command::Stats { member } => {
            let stats = engine.reader.read_stats(member).await?;
            print_json(&stats)?;
        }
        Command::Audit => {
            let report = engine.auditor.audit().await?;
            print_json(&report)?;
            if !report.is_clean() {
                anyhow::bail!("tree audit found {} violation(s)", report.violations.len());
            }
        }
        Command::SetSetting { key, value } => {
            settings::store_setting(pool, &key, &value.to_string()).await?;
            let reloaded = EngineSettings::load(pool).await?;
            print_json(&reloaded)?;
        }
        Command::SetStatus { member, status } => {
            let mut conn = pool.acquire().await?;
            if !members::set_member_status(&mut conn, member, status).await? {
                anyhow::bail!("member {} does not exist", member);
            }
            print_json(&serde_json::json!({ "member_id": member, "status": status }))?;
        }
    }

    Ok(())
}

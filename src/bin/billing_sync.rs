//! Billing sync CLI: preview (and optionally apply) a project-list workbook.
//!
//! Build: `cargo build --features cli --bin billing-sync`
//! Usage: `billing-sync <file.xlsx> [--apply] [--user ID] [--db PATH] [--config PATH]`
//!
//! Prints the preview report as JSON; with `--apply`, also prints the apply
//! report. Without `--apply` an existing database is opened read-only.

use std::path::PathBuf;

use billing_sync::config::load_config;
use billing_sync::db::BillingDb;
use billing_sync::{SyncErrorReport, SyncService};

const USAGE: &str =
    "usage: billing-sync <file.xlsx> [--apply] [--user ID] [--db PATH] [--config PATH]";

#[derive(Debug, Default)]
struct Args {
    workbook: PathBuf,
    apply: bool,
    user: Option<String>,
    db: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn parse_args(mut argv: impl Iterator<Item = String>) -> anyhow::Result<Args> {
    let mut args = Args::default();
    let mut workbook = None;
    while let Some(arg) = argv.next() {
        let mut value = |flag: &str| {
            argv.next()
                .ok_or_else(|| anyhow::anyhow!("{flag} needs a value\n{USAGE}"))
        };
        match arg.as_str() {
            "--apply" => args.apply = true,
            "--user" => args.user = Some(value("--user")?),
            "--db" => args.db = Some(PathBuf::from(value("--db")?)),
            "--config" => args.config = Some(PathBuf::from(value("--config")?)),
            "-h" | "--help" => anyhow::bail!(USAGE),
            other if other.starts_with("--") => anyhow::bail!("unknown flag {other}\n{USAGE}"),
            other => workbook = Some(PathBuf::from(other)),
        }
    }
    args.workbook = workbook.ok_or_else(|| anyhow::anyhow!(USAGE))?;
    Ok(args)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = parse_args(std::env::args().skip(1))?;

    let config = load_config(args.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load billing sync config: {e}"))?;
    let db_path = match args.db.clone().or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => BillingDb::db_path().map_err(|e| anyhow::anyhow!("{e}"))?,
    };
    let db = if !args.apply && db_path.exists() {
        BillingDb::open_readonly_at(&db_path)
    } else {
        BillingDb::open_at(db_path.clone())
    }
    .map_err(|e| anyhow::anyhow!("Failed to open database {}: {e}", db_path.display()))?;

    let bytes = std::fs::read(&args.workbook)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", args.workbook.display()))?;

    let service = SyncService::new(&db, &config).with_activity(&db);
    let rows = match service.parse_workbook(&bytes) {
        Ok(rows) => rows,
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&SyncErrorReport::from(&e))?);
            return Err(e.into());
        }
    };

    let preview = service
        .generate_preview(&rows)
        .map_err(|e| anyhow::anyhow!("Preview failed: {e}"))?;
    println!("{}", serde_json::to_string_pretty(&preview)?);

    if args.apply {
        let result = service.apply_changes(&rows, args.user.as_deref());
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    Ok(())
}

//! Query the registry entry of a case.

use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

use crate::db::registry::{CaseLoadRecord, CaseRegistry};
use crate::db::rocks::RocksDb;
use crate::error::StoreError;

/// Command line arguments for `query case` sub command.
#[derive(Parser, Debug)]
#[command(about = "Query a loaded case", long_about = None)]
pub struct Args {
    /// Path to the RocksDB directory.
    #[arg(long)]
    pub path_db: PathBuf,
    /// Identifier of the case.
    #[arg(long)]
    pub case_id: String,
    /// Path to the output JSON file, `-` for stdout.
    #[arg(long, default_value = "-")]
    pub path_output: PathBuf,
}

/// Registry entry of a case together with its trail size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseReport {
    #[serde(flatten)]
    pub case: CaseLoadRecord,
    /// Number of keys recorded for deletion.
    pub nr_touches: usize,
    /// Whether a sample profile is stored for the case id.
    pub has_profile: bool,
}

pub fn query(
    registry: &dyn CaseRegistry,
    case_id: &str,
) -> Result<Option<CaseReport>, StoreError> {
    let Some(case) = registry.get_case(case_id)? else {
        return Ok(None);
    };
    Ok(Some(CaseReport {
        nr_touches: registry.touches(case_id)?.len(),
        has_profile: registry.get_profile(case_id)?.is_some(),
        case,
    }))
}

/// Main entry point for `query case` sub command.
pub fn run(common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!(
        "Querying case\ncommon args: {:#?}\nargs: {:#?}",
        common,
        args
    );
    let db = RocksDb::open_read_only(&args.path_db)?;
    let report = query(&db, &args.case_id)?;
    if report.is_none() {
        tracing::info!("case {} is not registered", &args.case_id);
    }
    super::write_json(&args.path_output, &report)
}

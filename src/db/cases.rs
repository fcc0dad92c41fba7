//! List the registered cases.

use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;
use thousands::Separable;

use crate::db::registry::{CaseRegistry, CaseStatus};
use crate::db::rocks::RocksDb;
use crate::db::ObservationStore;
use crate::error::StoreError;

/// Command line arguments for `db cases` sub command.
#[derive(Parser, Debug)]
#[command(about = "List the loaded cases", long_about = None)]
pub struct Args {
    /// Path to the RocksDB directory.
    #[arg(long)]
    pub path_db: PathBuf,
    /// Path to the output JSON lines file, `-` for stdout.
    #[arg(long, default_value = "-")]
    pub path_output: PathBuf,
}

/// One line of the case listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseLine {
    pub case_id: String,
    pub status: CaseStatus,
    pub attributed: bool,
    pub nr_individuals: usize,
    pub nr_variants: u64,
    pub nr_sv_variants: u64,
}

pub fn list(registry: &dyn CaseRegistry) -> Result<Vec<CaseLine>, StoreError> {
    Ok(registry
        .list_cases()?
        .into_iter()
        .map(|case| CaseLine {
            nr_individuals: case.individuals.len(),
            case_id: case.case_id,
            status: case.status,
            attributed: case.attributed,
            nr_variants: case.nr_variants,
            nr_sv_variants: case.nr_sv_variants,
        })
        .collect())
}

/// Main entry point for `db cases` sub command.
pub fn run(common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!(
        "Listing cases\ncommon args: {:#?}\nargs: {:#?}",
        common,
        args
    );
    let db = RocksDb::open_read_only(&args.path_db)?;
    let cases = list(&db)?;
    let counts = db.counts()?;
    tracing::info!(
        "{} cases, {} short variant and {} structural variant records",
        cases.len().separate_with_commas(),
        counts.seqvars.separate_with_commas(),
        counts.strucvars.separate_with_commas()
    );
    for case in cases.iter().filter(|case| case.status == CaseStatus::Loading) {
        tracing::warn!("case {} was not loaded completely", &case.case_id);
    }
    crate::query::write_json_lines(&args.path_output, &cases)
}

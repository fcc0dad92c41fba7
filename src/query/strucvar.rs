//! Query the observation record matching a structural variant.

use std::path::PathBuf;

use clap::Parser;

use crate::db::rocks::RocksDb;
use crate::db::{ObservationRecord, ObservationStore};
use crate::error::StoreError;
use crate::observe::keys::{StrucvarKey, VariantKey, VariantKeyBuilder, DEFAULT_MAX_WINDOW};
use crate::observe::model::SvType;

/// Command line arguments for `query strucvar` sub command.
#[derive(Parser, Debug)]
#[command(about = "Query observations of a structural variant", long_about = None)]
pub struct Args {
    /// Path to the RocksDB directory.
    #[arg(long)]
    pub path_db: PathBuf,
    /// Chromosome of the first breakpoint.
    #[arg(long)]
    pub chrom: String,
    /// Type of the structural variant.
    #[arg(long, value_parser = parse_sv_type)]
    pub sv_type: SvType,
    /// 1-based first breakpoint.
    #[arg(long)]
    pub start: u32,
    /// 1-based second breakpoint.
    #[arg(long)]
    pub end: u32,
    /// Chromosome of the second breakpoint, defaults to `--chrom`.
    #[arg(long)]
    pub end_chrom: Option<String>,
    /// Maximal breakpoint distance of matching records.
    #[arg(long, default_value_t = DEFAULT_MAX_WINDOW)]
    pub max_window: u32,
    /// Path to the output JSON file, `-` for stdout.
    #[arg(long, default_value = "-")]
    pub path_output: PathBuf,
}

fn parse_sv_type(value: &str) -> Result<SvType, String> {
    SvType::parse_loose(value).ok_or_else(|| format!("unknown SV type {:?}", value))
}

/// Best matching record for `proposal` within `max_window`.
pub fn query(
    store: &dyn ObservationStore,
    proposal: &StrucvarKey,
    max_window: u32,
) -> Result<Option<ObservationRecord>, StoreError> {
    let keys = VariantKeyBuilder::new(max_window);
    let range = proposal.start.saturating_sub(max_window)..=proposal.start.saturating_add(max_window);
    let candidates = store.get_candidates(&proposal.chrom, proposal.sv_type, range)?;
    let best = keys.best_match(
        proposal,
        candidates.iter().filter_map(|record| match &record.key {
            VariantKey::Strucvar(key) => Some(key),
            VariantKey::Seqvar(_) => None,
        }),
    );
    Ok(best.and_then(|best| {
        candidates
            .into_iter()
            .find(|record| record.key == VariantKey::Strucvar(best.clone()))
    }))
}

/// Main entry point for `query strucvar` sub command.
pub fn run(common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!(
        "Querying structural variant\ncommon args: {:#?}\nargs: {:#?}",
        common,
        args
    );
    let proposal = StrucvarKey::new(
        &args.chrom,
        args.sv_type,
        args.start,
        args.end,
        args.end_chrom.as_deref().unwrap_or(&args.chrom),
    );
    let db = RocksDb::open_read_only(&args.path_db)?;
    let record = query(&db, &proposal, args.max_window)?;
    if record.is_none() {
        tracing::info!("no record matches {}", &proposal);
    }
    super::write_json(&args.path_output, &record)
}

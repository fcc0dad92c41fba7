//! Query the observation record of a short variant.

use std::path::PathBuf;

use clap::Parser;

use crate::db::rocks::RocksDb;
use crate::db::{ObservationRecord, ObservationStore};
use crate::error::StoreError;
use crate::observe::keys::{SeqvarKey, VariantKey};

/// Command line arguments for `query seqvar` sub command.
#[derive(Parser, Debug)]
#[command(about = "Query observations of a short variant", long_about = None)]
pub struct Args {
    /// Path to the RocksDB directory.
    #[arg(long)]
    pub path_db: PathBuf,
    /// Variant as `CHROM-POS-REF-ALT` or `CHROM:POS:REF:ALT`.
    #[arg(long)]
    pub variant: SeqvarKey,
    /// Path to the output JSON file, `-` for stdout.
    #[arg(long, default_value = "-")]
    pub path_output: PathBuf,
}

/// Record of `key`, if the variant was observed at all.
pub fn query(
    store: &dyn ObservationStore,
    key: &SeqvarKey,
) -> Result<Option<ObservationRecord>, StoreError> {
    store.get_exact(&VariantKey::Seqvar(key.clone()))
}

/// Main entry point for `query seqvar` sub command.
pub fn run(common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!(
        "Querying short variant\ncommon args: {:#?}\nargs: {:#?}",
        common,
        args
    );
    let db = RocksDb::open_read_only(&args.path_db)?;
    let record = query(&db, &args.variant)?;
    if record.is_none() {
        tracing::info!("{} was not observed", &args.variant);
    }
    super::write_json(&args.path_output, &record)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::memory::MemoryDb;
    use crate::db::Observation;
    use crate::observe::gate::CaseZygosity;

    #[test]
    fn query_normalizes_chromosome() -> Result<(), anyhow::Error> {
        let db = MemoryDb::new();
        let key = SeqvarKey::new("chr1", 100, "a", "g");
        db.upsert(
            &VariantKey::Seqvar(key),
            &Observation::new(Some("trio1"), CaseZygosity::Het),
        )?;

        let record = query(&db, &"1-100-A-G".parse()?)?;
        assert_eq!(record.map(|record| record.observations), Some(1));
        assert_eq!(query(&db, &"1:100:A:T".parse()?)?, None);

        Ok(())
    }
}

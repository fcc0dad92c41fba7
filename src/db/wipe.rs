//! Drop all records, cases and profiles.

use std::path::PathBuf;

use clap::Parser;

use crate::db::rocks::RocksDb;
use crate::db::ObservationStore;

/// Command line arguments for `db wipe` sub command.
#[derive(Parser, Debug)]
#[command(about = "Drop all observations, cases and profiles", long_about = None)]
pub struct Args {
    /// Path to the RocksDB directory.
    #[arg(long)]
    pub path_db: PathBuf,
    /// Confirm dropping all data.
    #[arg(long, default_value_t = false)]
    pub yes_i_am_sure: bool,
}

/// Main entry point for `db wipe` sub command.
pub fn run(common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!(
        "Wiping database\ncommon args: {:#?}\nargs: {:#?}",
        common,
        args
    );
    if !args.yes_i_am_sure {
        anyhow::bail!("refusing to wipe {} without --yes-i-am-sure", args.path_db.display());
    }
    let db = RocksDb::open(&args.path_db)?;
    let counts = db.counts()?;
    db.wipe()?;
    tracing::info!(
        "dropped {} short variant and {} structural variant records",
        counts.seqvars,
        counts.strucvars
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use temp_testdir::TempDir;

    use super::*;
    use crate::db::registry::CaseRegistry;
    use crate::db::{Observation, StoreCounts};
    use crate::observe::gate::CaseZygosity;
    use crate::observe::keys::{SeqvarKey, VariantKey};

    #[test]
    fn run_wipe() -> Result<(), anyhow::Error> {
        let temp = TempDir::default();
        let mut args = Args {
            path_db: temp.join("db"),
            yes_i_am_sure: false,
        };
        {
            let db = RocksDb::open(&args.path_db)?;
            db.upsert(
                &VariantKey::Seqvar(SeqvarKey::new("1", 100, "A", "G")),
                &Observation::new(Some("trio1"), CaseZygosity::Het),
            )?;
        }

        assert!(run(&crate::common::Args::default(), &args).is_err());
        args.yes_i_am_sure = true;
        run(&crate::common::Args::default(), &args)?;

        let db = RocksDb::open_read_only(&args.path_db)?;
        assert_eq!(db.counts()?, StoreCounts::default());
        assert!(db.list_cases()?.is_empty());

        Ok(())
    }
}

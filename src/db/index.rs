//! Check or create the database indexes.

use std::path::PathBuf;

use clap::Parser;

use crate::db::rocks::RocksDb;
use crate::db::{IndexStatus, ObservationStore};

/// Command line arguments for `db index` sub command.
#[derive(Parser, Debug)]
#[command(about = "Check or create the database indexes", long_about = None)]
pub struct Args {
    /// Path to the RocksDB directory.
    #[arg(long)]
    pub path_db: PathBuf,
    /// Create or upgrade the indexes instead of only checking them.
    #[arg(long, default_value_t = false)]
    pub ensure: bool,
}

/// Main entry point for `db index` sub command.
pub fn run(common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!(
        "Database indexes\ncommon args: {:#?}\nargs: {:#?}",
        common,
        args
    );
    let before = std::time::Instant::now();
    let db = RocksDb::open(&args.path_db)?;
    if args.ensure {
        db.ensure_indexes()?;
        tracing::info!("... indexes ensured in {:?}", before.elapsed());
    }
    match db.check_indexes()? {
        IndexStatus::Current => tracing::info!("indexes are current"),
        IndexStatus::Outdated { found } => {
            tracing::warn!("indexes have outdated version {}, run with --ensure", found)
        }
        IndexStatus::Missing => tracing::warn!("indexes are missing, run with --ensure"),
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use temp_testdir::TempDir;

    use super::*;

    #[test]
    fn run_ensure() -> Result<(), anyhow::Error> {
        let temp = TempDir::default();
        let mut args = Args {
            path_db: temp.join("db"),
            ensure: false,
        };
        run(&crate::common::Args::default(), &args)?;
        assert_eq!(
            RocksDb::open_read_only(&args.path_db)?.check_indexes()?,
            IndexStatus::Missing
        );

        args.ensure = true;
        run(&crate::common::Args::default(), &args)?;
        assert_eq!(
            RocksDb::open_read_only(&args.path_db)?.check_indexes()?,
            IndexStatus::Current
        );

        Ok(())
    }
}

//! Main entry point for the loqusdb CLI.

use clap::{command, Args, Parser, Subcommand};

use loqusdb::{common, db, delete, load, query};

#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Local observation counts of short and structural variants"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Load the observations of a case.
    Load(load::Args),
    /// Delete the observations of a case.
    Delete(delete::Args),
    /// Query related commands.
    Query(Query),
    /// Database-related commands.
    Db(Db),
}

/// Parsing of "query *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Query {
    /// The sub command to run
    #[command(subcommand)]
    command: QueryCommands,
}

/// Enum supporting the parsing of "query *" sub commands.
#[derive(Debug, Subcommand)]
enum QueryCommands {
    Seqvar(query::seqvar::Args),
    Strucvar(query::strucvar::Args),
    Case(query::case::Args),
}

/// Parsing of "db *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Db {
    /// The sub command to run
    #[command(subcommand)]
    command: DbCommands,
}

/// Enum supporting the parsing of "db *" sub commands.
#[derive(Debug, Subcommand)]
enum DbCommands {
    Index(db::index::Args),
    Cases(db::cases::Args),
    Wipe(db::wipe::Args),
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    // Install collector and go into sub commands.
    tracing::subscriber::with_default(collector, || {
        tracing::info!(
            "loqusdb {} (built {})",
            common::version(),
            loqusdb::built_info::BUILT_TIME_UTC
        );

        match &cli.command {
            Commands::Load(args) => load::run(&cli.common, args)?,
            Commands::Delete(args) => delete::run(&cli.common, args)?,
            Commands::Query(query) => match &query.command {
                QueryCommands::Seqvar(args) => query::seqvar::run(&cli.common, args)?,
                QueryCommands::Strucvar(args) => query::strucvar::run(&cli.common, args)?,
                QueryCommands::Case(args) => query::case::run(&cli.common, args)?,
            },
            Commands::Db(db) => match &db.command {
                DbCommands::Index(args) => db::index::run(&cli.common, args)?,
                DbCommands::Cases(args) => db::cases::run(&cli.common, args)?,
                DbCommands::Wipe(args) => db::wipe::run(&cli.common, args)?,
            },
        }

        tracing::info!("All done.");

        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

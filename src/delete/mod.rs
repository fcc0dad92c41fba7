//! Remove the observations of a case from the database.

use std::{path::PathBuf, time::Instant};

use clap::Parser;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use thousands::Separable;

use crate::db::registry::{CaseLoadRecord, CaseRegistry, CaseStatus};
use crate::db::rocks::RocksDb;
use crate::db::{ObservationStore, RemoveOutcome};
use crate::error::{CaseError, Error, VcfError};
use crate::load::resolve_case;
use crate::observe::gate::GenotypeGate;
use crate::observe::keys::{StrucvarKey, VariantKey, VariantKeyBuilder};
use crate::observe::model::{SvType, VariantCall};
use crate::ped::{FamilyType, Pedigree, ResolvedCase};
use crate::vcf::VcfCallReader;

/// Statistics of a completed delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
    pub case_id: String,
    /// Number of keys visited.
    pub nr_keys: u64,
    /// Observations removed from records.
    pub nr_removed: u64,
    /// Records dropped because their last observation was removed.
    pub nr_deleted: u64,
    /// Keys without an observation of the case.
    pub nr_absent: u64,
    /// Recorded keys not derived from the input by a re-derived delete.
    pub nr_unaccounted: u64,
}

impl DeleteSummary {
    fn count(&mut self, outcome: RemoveOutcome) {
        self.nr_keys += 1;
        match outcome {
            RemoveOutcome::Removed => self.nr_removed += 1,
            RemoveOutcome::Deleted => {
                self.nr_removed += 1;
                self.nr_deleted += 1;
            }
            RemoveOutcome::Absent => self.nr_absent += 1,
        }
    }
}

/// Drives deletes against an observation store and a case registry.
pub struct DeleteOrchestrator<'a> {
    store: &'a dyn ObservationStore,
    registry: &'a dyn CaseRegistry,
}

impl<'a> DeleteOrchestrator<'a> {
    pub fn new(store: &'a dyn ObservationStore, registry: &'a dyn CaseRegistry) -> Self {
        Self { store, registry }
    }

    /// Delete `case_id` using the keys recorded during its load.
    ///
    /// Also undoes loads that were interrupted.
    pub fn delete(&self, case_id: &str) -> Result<DeleteSummary, Error> {
        let (record, touches) = self.registry.begin_delete(case_id)?;
        warn_if_partial(&record);

        let mut summary = DeleteSummary {
            case_id: case_id.to_string(),
            ..Default::default()
        };
        for touch in &touches {
            summary.count(self.store.remove(&touch.key, case_id)?);
        }
        self.registry.finish_delete(case_id)?;

        log_summary(&summary);
        Ok(summary)
    }

    /// Delete `case` by deriving its keys from the input again.
    ///
    /// Uses the genotype quality threshold and window recorded at load time.
    /// Structural variant calls are matched against the records touched by the
    /// load of the case, so every touched record within the window of a call
    /// loses the case once.  When touched keys remain that no call accounts
    /// for, the registry entry is kept so that a plain `delete` can finish.
    pub fn delete_rederived<I>(&self, case: &ResolvedCase, calls: I) -> Result<DeleteSummary, Error>
    where
        I: IntoIterator<Item = Result<VariantCall, VcfError>>,
    {
        let case_id = case.case_id.as_str();
        let record = self
            .registry
            .get_case(case_id)?
            .ok_or_else(|| CaseError::NotLoaded(case_id.to_string()))?;
        if !record.attributed {
            return Err(CaseError::NotAttributed(case_id.to_string()).into());
        }
        warn_if_partial(&record);

        let mut pending = FxHashSet::<VariantKey>::default();
        let mut touched_svs = FxHashMap::<(String, SvType), Vec<StrucvarKey>>::default();
        for touch in self.registry.touches(case_id)? {
            if let VariantKey::Strucvar(key) = &touch.key {
                touched_svs
                    .entry((key.chrom.clone(), key.sv_type))
                    .or_default()
                    .push(key.clone());
            }
            pending.insert(touch.key);
        }

        let gate = GenotypeGate::new(record.gq_threshold);
        let keys = VariantKeyBuilder::new(record.max_window);
        let mut summary = DeleteSummary {
            case_id: case_id.to_string(),
            ..Default::default()
        };
        for call in calls {
            let call = call?;
            call.validate()?;
            if !gate.observed_in_case(&call, case) {
                continue;
            }

            let derived = if let Some(key) = keys.seqvar(&call) {
                vec![VariantKey::Seqvar(key)]
            } else if let Some(query) = keys.strucvar_query(&call) {
                let matching = touched_svs
                    .get(&(query.chrom.clone(), query.sv_type))
                    .map(|touched| {
                        touched
                            .iter()
                            .filter(|key| keys.matches(&query.proposal, key))
                            .cloned()
                            .map(VariantKey::Strucvar)
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                if matching.is_empty() {
                    tracing::debug!(
                        "no record of case {} matches {}",
                        case_id,
                        &query.proposal
                    );
                }
                matching
            } else {
                continue;
            };

            // Keys outside the trail never carried the case.
            for key in derived {
                if pending.remove(&key) {
                    summary.count(self.store.remove(&key, case_id)?);
                }
            }
        }

        summary.nr_unaccounted = pending.len() as u64;
        if pending.is_empty() {
            self.registry.finish_delete(case_id)?;
        } else {
            tracing::warn!(
                "{} recorded keys of case {} are not derived from the input, keeping the case \
                registry entry; run delete without --rederive to remove them",
                pending.len().separate_with_commas(),
                case_id
            );
        }

        log_summary(&summary);
        Ok(summary)
    }
}

fn warn_if_partial(record: &CaseLoadRecord) {
    if record.status == CaseStatus::Loading {
        tracing::warn!(
            "case {} was not loaded completely, removing what was written",
            &record.case_id
        );
    }
}

fn log_summary(summary: &DeleteSummary) {
    tracing::info!(
        "deleted case {}: {} observations removed, {} records dropped, {} keys without observation",
        &summary.case_id,
        summary.nr_removed.separate_with_commas(),
        summary.nr_deleted.separate_with_commas(),
        summary.nr_absent.separate_with_commas(),
    );
}

/// Command line arguments for `delete` sub command.
#[derive(Parser, Debug)]
#[command(about = "Delete the observations of a case", long_about = None)]
#[command(group(clap::ArgGroup::new("input").multiple(true).args(["path_vcf", "path_sv_vcf"])))]
pub struct Args {
    /// Path to the RocksDB directory.
    #[arg(long)]
    pub path_db: PathBuf,
    /// Identifier of the case to delete.
    #[arg(long)]
    pub case_id: String,
    /// Fail if the case was never loaded.
    #[arg(long, default_value_t = false)]
    pub strict: bool,
    /// Derive the keys from the input files instead of the recorded keys.
    #[arg(long, default_value_t = false, requires = "input")]
    pub rederive: bool,
    /// Path to the VCF file with short variants.
    #[arg(long)]
    pub path_vcf: Option<PathBuf>,
    /// Path to the VCF file with structural variants.
    #[arg(long)]
    pub path_sv_vcf: Option<PathBuf>,
    /// Path to the PED file describing the case.
    #[arg(long)]
    pub path_ped: Option<PathBuf>,
    /// Format of the family file.
    #[arg(long, value_enum, default_value_t = FamilyType::Ped)]
    pub family_type: FamilyType,
}

/// Main entry point for `delete` sub command.
pub fn run(common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!(
        "Deleting case\ncommon args: {:#?}\nargs: {:#?}",
        common,
        args
    );
    let before_delete = Instant::now();

    let db = RocksDb::open(&args.path_db)?;
    let orchestrator = DeleteOrchestrator::new(&db, &db);

    let result = if args.rederive {
        let pedigree = args
            .path_ped
            .as_ref()
            .map(|path| Pedigree::from_path_with_type(path, args.family_type))
            .transpose()?;
        let vcf_reader = args
            .path_vcf
            .as_ref()
            .map(VcfCallReader::from_path)
            .transpose()?;
        let sv_reader = args
            .path_sv_vcf
            .as_ref()
            .map(VcfCallReader::from_path)
            .transpose()?;
        let case = resolve_case(
            pedigree.as_ref(),
            Some(args.case_id.as_str()),
            vcf_reader.as_ref(),
            sv_reader.as_ref(),
        )?;
        let calls = vcf_reader
            .into_iter()
            .flatten()
            .chain(sv_reader.into_iter().flatten());
        orchestrator.delete_rederived(&case, calls)
    } else {
        orchestrator.delete(&args.case_id)
    };

    match result {
        Ok(summary) => tracing::info!("summary: {}", serde_json::to_string(&summary)?),
        Err(Error::Case(CaseError::NotLoaded(case_id))) if !args.strict => {
            tracing::warn!("case {} was never loaded, nothing to delete", case_id)
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!("... done deleting in {:?}", before_delete.elapsed());
    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use temp_testdir::TempDir;

    use super::*;
    use crate::db::memory::MemoryDb;
    use crate::ped::resolve;
    use crate::load::{Config, ConfigBuilder, LoadOrchestrator, Sources};
    use crate::observe::model::Genotype;

    fn load_fixture(db: &MemoryDb, ped: &str, vcf: &str) -> Result<ResolvedCase, anyhow::Error> {
        let pedigree = Pedigree::from_path(ped)?;
        let reader = VcfCallReader::from_path(vcf)?;
        let case = resolve(Some(&pedigree), None, reader.samples())?;
        LoadOrchestrator::new(db, db, Config::default()).load(
            &case,
            &Sources::default(),
            reader,
            None,
        )?;
        Ok(case)
    }

    #[test]
    fn load_then_delete_leaves_empty_store() -> Result<(), anyhow::Error> {
        let db = MemoryDb::new();
        load_fixture(&db, "tests/data/ped/trio1.ped", "tests/data/vcf/trio1.vcf")?;

        let summary = DeleteOrchestrator::new(&db, &db).delete("trio1")?;
        assert_eq!(
            summary,
            DeleteSummary {
                case_id: "trio1".to_string(),
                nr_keys: 5,
                nr_removed: 5,
                nr_deleted: 5,
                nr_absent: 0,
                nr_unaccounted: 0,
            }
        );
        assert!(db.dump()?.is_empty());
        assert!(db.list_cases()?.is_empty());
        assert!(db.touches("trio1")?.is_empty());

        Ok(())
    }

    #[test]
    fn delete_keeps_other_cases() -> Result<(), anyhow::Error> {
        let db = MemoryDb::new();
        load_fixture(&db, "tests/data/ped/trio2.ped", "tests/data/vcf/trio2.vcf")?;
        let before = db.dump()?;
        load_fixture(&db, "tests/data/ped/trio1.ped", "tests/data/vcf/trio1.vcf")?;

        let summary = DeleteOrchestrator::new(&db, &db).delete("trio1")?;
        assert_eq!((summary.nr_removed, summary.nr_deleted), (5, 3));
        assert_eq!(db.dump()?, before);

        Ok(())
    }

    #[test]
    fn reload_after_delete_is_identical() -> Result<(), anyhow::Error> {
        let db = MemoryDb::new();
        load_fixture(&db, "tests/data/ped/trio1.ped", "tests/data/vcf/trio1.vcf")?;
        let first = db.dump()?;

        DeleteOrchestrator::new(&db, &db).delete("trio1")?;
        load_fixture(&db, "tests/data/ped/trio1.ped", "tests/data/vcf/trio1.vcf")?;
        assert_eq!(db.dump()?, first);

        Ok(())
    }

    #[test]
    fn delete_unknown_case() {
        let db = MemoryDb::new();
        let result = DeleteOrchestrator::new(&db, &db).delete("unknown");
        assert!(matches!(
            result,
            Err(Error::Case(CaseError::NotLoaded(case_id))) if case_id == "unknown"
        ));
    }

    #[test]
    fn delete_anonymous_case() -> Result<(), anyhow::Error> {
        let db = MemoryDb::new();
        let config = ConfigBuilder::default().skip_case_id(true).build()?;
        let case = resolve(None, Some("anon"), &["s1".to_string()])?;
        let call = VariantCall::short("1", 100, "A", "G").with_genotype("s1", Genotype::Het, Some(30));
        LoadOrchestrator::new(&db, &db, config).load(&case, &Sources::default(), [Ok(call)], None)?;

        let result = DeleteOrchestrator::new(&db, &db).delete("anon");
        assert!(matches!(
            result,
            Err(Error::Case(CaseError::NotAttributed(_)))
        ));
        assert_eq!(db.counts()?.seqvars, 1);

        Ok(())
    }

    #[test]
    fn delete_rederived_matches_recorded() -> Result<(), anyhow::Error> {
        let db = MemoryDb::new();
        load_fixture(&db, "tests/data/ped/trio2.ped", "tests/data/vcf/trio2.vcf")?;
        let before = db.dump()?;
        let case = load_fixture(&db, "tests/data/ped/trio1.ped", "tests/data/vcf/trio1.vcf")?;

        let calls = VcfCallReader::from_path("tests/data/vcf/trio1.vcf")?;
        let summary = DeleteOrchestrator::new(&db, &db).delete_rederived(&case, calls)?;
        assert_eq!((summary.nr_removed, summary.nr_deleted), (5, 3));
        assert_eq!(db.dump()?, before);
        assert_eq!(db.get_case("trio1")?, None);

        Ok(())
    }

    #[test]
    fn delete_rederived_strucvar_prefers_own_record() -> Result<(), anyhow::Error> {
        let db = MemoryDb::new();
        let config = ConfigBuilder::default().max_window(100).build()?;
        let load = |case_id: &str, start: u32, end: u32| -> Result<ResolvedCase, anyhow::Error> {
            let case = resolve(None, Some(case_id), &["s1".to_string()])?;
            let call = VariantCall::structural("1", start, end, SvType::Del)
                .with_genotype("s1", Genotype::Het, Some(30));
            LoadOrchestrator::new(&db, &db, config.clone()).load(
                &case,
                &Sources::default(),
                [Ok(call)],
                None,
            )?;
            Ok(case)
        };
        load("case1", 1000, 2000)?;
        load("case3", 1080, 2080)?;
        let case2 = load("case2", 1150, 2150)?;

        // case3 joined the record of case1; case2 then created a closer one.
        let call = VariantCall::structural("1", 1080, 2080, SvType::Del)
            .with_genotype("s1", Genotype::Het, Some(30));
        let case3 = resolve(None, Some("case3"), &["s1".to_string()])?;
        let summary = DeleteOrchestrator::new(&db, &db).delete_rederived(&case3, [Ok(call)])?;
        assert_eq!((summary.nr_removed, summary.nr_deleted), (1, 0));

        let records = db.dump()?;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|record| record.observations == 1));
        assert!(records
            .iter()
            .any(|record| record.cases.contains_key(&case2.case_id)));

        Ok(())
    }

    #[test]
    fn delete_rederived_strucvars_of_one_case_in_overlapping_windows() -> Result<(), anyhow::Error> {
        let db = MemoryDb::new();
        let config = ConfigBuilder::default().max_window(100).build()?;
        let orchestrator = LoadOrchestrator::new(&db, &db, config);
        let del = |start: u32, end: u32| -> Result<VariantCall, VcfError> {
            Ok(VariantCall::structural("1", start, end, SvType::Del)
                .with_genotype("s1", Genotype::Het, Some(30)))
        };
        let case_x = resolve(None, Some("X"), &["s1".to_string()])?;
        orchestrator.load(&case_x, &Sources::default(), [del(1000, 2000)], None)?;
        let before = db.dump()?;

        // The first call joins the record of X, the second one creates its own.
        let case_y = resolve(None, Some("Y"), &["s1".to_string()])?;
        orchestrator.load(
            &case_y,
            &Sources::default(),
            [del(1080, 2080), del(1150, 2150)],
            None,
        )?;
        assert_eq!(db.counts()?.strucvars, 2);

        let summary = DeleteOrchestrator::new(&db, &db)
            .delete_rederived(&case_y, [del(1080, 2080), del(1150, 2150)])?;
        assert_eq!(
            (summary.nr_removed, summary.nr_deleted, summary.nr_unaccounted),
            (2, 1, 0)
        );
        assert_eq!(db.dump()?, before);
        assert_eq!(db.get_case("Y")?, None);

        Ok(())
    }

    #[test]
    fn delete_rederived_keeps_case_with_unaccounted_keys() -> Result<(), anyhow::Error> {
        let db = MemoryDb::new();
        let case = resolve(None, Some("case1"), &["s1".to_string()])?;
        let snv = |pos: u32| -> Result<VariantCall, VcfError> {
            Ok(VariantCall::short("1", pos, "A", "G").with_genotype("s1", Genotype::Het, Some(30)))
        };
        LoadOrchestrator::new(&db, &db, Config::default()).load(
            &case,
            &Sources::default(),
            [snv(100), snv(200)],
            None,
        )?;

        let orchestrator = DeleteOrchestrator::new(&db, &db);
        let summary = orchestrator.delete_rederived(&case, [snv(100)])?;
        assert_eq!((summary.nr_removed, summary.nr_unaccounted), (1, 1));
        assert!(db.get_case("case1")?.is_some());
        assert_eq!(db.counts()?.seqvars, 1);

        let summary = orchestrator.delete("case1")?;
        assert_eq!((summary.nr_removed, summary.nr_absent), (1, 1));
        assert!(db.dump()?.is_empty());
        assert_eq!(db.get_case("case1")?, None);

        Ok(())
    }

    #[test]
    fn run_rederive_strucvars_only() -> Result<(), anyhow::Error> {
        let temp = TempDir::default();
        let load_args = crate::load::Args {
            path_db: temp.join("db"),
            path_vcf: None,
            path_sv_vcf: Some("tests/data/vcf/trio1.sv.vcf".into()),
            path_ped: Some("tests/data/ped/trio1.ped".into()),
            family_type: FamilyType::Ped,
            case_id: None,
            skip_case_id: false,
            gq_threshold: crate::observe::gate::DEFAULT_GQ_THRESHOLD,
            max_window: crate::observe::keys::DEFAULT_MAX_WINDOW,
            path_profile_sites: None,
            profile_threshold: crate::observe::profile::DEFAULT_PROFILE_THRESHOLD,
            profile_blocks_load: false,
            ensure_index: true,
        };
        crate::load::run(&crate::common::Args::default(), &load_args)?;

        let args = Args {
            path_db: temp.join("db"),
            case_id: "trio1".to_string(),
            strict: true,
            rederive: true,
            path_vcf: None,
            path_sv_vcf: Some("tests/data/vcf/trio1.sv.vcf".into()),
            path_ped: Some("tests/data/ped/trio1.ped".into()),
            family_type: FamilyType::Ped,
        };
        run(&crate::common::Args::default(), &args)?;

        let db = RocksDb::open_read_only(temp.join("db"))?;
        assert_eq!(db.counts()?.strucvars, 0);
        assert_eq!(db.get_case("trio1")?, None);

        Ok(())
    }

    #[test]
    fn rederive_needs_an_input_file() {
        let result = Args::try_parse_from([
            "delete",
            "--path-db",
            "db",
            "--case-id",
            "c",
            "--rederive",
        ]);
        assert!(result.is_err());
        let result = Args::try_parse_from([
            "delete",
            "--path-db",
            "db",
            "--case-id",
            "c",
            "--rederive",
            "--path-sv-vcf",
            "sv.vcf",
        ]);
        assert!(result.is_ok());
    }

    #[test]
    fn run_lenient_and_strict() -> Result<(), anyhow::Error> {
        let temp = TempDir::default();
        let mut args = Args {
            path_db: temp.join("db"),
            case_id: "unknown".to_string(),
            strict: false,
            rederive: false,
            path_vcf: None,
            path_sv_vcf: None,
            path_ped: None,
            family_type: FamilyType::Ped,
        };
        run(&crate::common::Args::default(), &args)?;

        args.strict = true;
        assert!(run(&crate::common::Args::default(), &args).is_err());

        Ok(())
    }
}

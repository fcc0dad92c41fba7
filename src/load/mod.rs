//! Load the observations of a case into the database.

use std::{path::PathBuf, time::Instant};

use clap::Parser;
use rustc_hash::FxHashSet;
use serde::Serialize;
use thousands::Separable;

use crate::common::trace_rss_now;
use crate::db::registry::{CaseLoadRecord, CaseRegistry, TouchedKey};
use crate::db::rocks::RocksDb;
use crate::db::{IndexStatus, Observation, ObservationStore, UpsertOutcome};
use crate::error::{CaseError, Error, ProfileError, VcfError};
use crate::observe::gate::{CaseZygosity, GenotypeGate, DEFAULT_GQ_THRESHOLD};
use crate::observe::keys::{
    SeqvarKey, StrucvarKey, VariantKey, VariantKeyBuilder, DEFAULT_MAX_WINDOW,
};
use crate::observe::model::VariantCall;
use crate::observe::profile::{
    CaseProfile, ProfileBuilder, ProfileChecker, ProfileOutcome, ProfilePanel,
    DEFAULT_PROFILE_THRESHOLD,
};
use crate::ped::{resolve, validate_case_id, FamilyType, Pedigree, ResolvedCase};
use crate::vcf::{read_sites, VcfCallReader};

/// Default number of short variant observations written per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Configuration of a load.
#[derive(Debug, Clone, PartialEq, derive_builder::Builder)]
#[builder(pattern = "immutable", build_fn(validate = "Self::validate"))]
pub struct Config {
    /// Minimal genotype quality of an observation.
    #[builder(default = "DEFAULT_GQ_THRESHOLD")]
    pub gq_threshold: u32,
    /// Maximal breakpoint distance of matching structural variants.
    #[builder(default = "DEFAULT_MAX_WINDOW")]
    pub max_window: u32,
    /// Minimal profile similarity to the stored profile of the case.
    #[builder(default = "DEFAULT_PROFILE_THRESHOLD")]
    pub profile_threshold: f64,
    /// Fail the load on a profile mismatch instead of warning.
    #[builder(default)]
    pub profile_blocks_load: bool,
    /// Count observations without case attribution.
    #[builder(default)]
    pub skip_case_id: bool,
    #[builder(default = "DEFAULT_BATCH_SIZE")]
    pub batch_size: usize,
}

impl ConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(threshold) = self.profile_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(format!("profile threshold {} is outside of [0, 1]", threshold));
            }
        }
        if self.batch_size == Some(0) {
            return Err("batch size must be positive".to_string());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gq_threshold: DEFAULT_GQ_THRESHOLD,
            max_window: DEFAULT_MAX_WINDOW,
            profile_threshold: DEFAULT_PROFILE_THRESHOLD,
            profile_blocks_load: false,
            skip_case_id: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Input files of a load, recorded in the case registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sources {
    pub vcf: Option<String>,
    pub sv_vcf: Option<String>,
}

/// Profile of the loaded case and its comparison to the stored one.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileCheck {
    pub profile: CaseProfile,
    pub outcome: ProfileOutcome,
}

/// Statistics of a completed load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub case_id: String,
    /// Number of calls read.
    pub nr_calls: u64,
    /// Number of distinct short variants observed in the case.
    pub nr_variants: u64,
    /// Number of distinct structural variant records observed in the case.
    pub nr_sv_variants: u64,
    /// Calls not observed in any individual of the case.
    pub nr_skipped: u64,
    /// Records created by the load.
    pub nr_created: u64,
    /// Observations added to existing records.
    pub nr_added: u64,
}

impl LoadSummary {
    fn count(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.nr_created += 1,
            UpsertOutcome::Added => self.nr_added += 1,
            UpsertOutcome::AlreadyPresent => (),
        }
    }
}

/// Drives a load against an observation store and a case registry.
pub struct LoadOrchestrator<'a> {
    store: &'a dyn ObservationStore,
    registry: &'a dyn CaseRegistry,
    config: Config,
    gate: GenotypeGate,
    keys: VariantKeyBuilder,
}

impl<'a> LoadOrchestrator<'a> {
    pub fn new(
        store: &'a dyn ObservationStore,
        registry: &'a dyn CaseRegistry,
        config: Config,
    ) -> Self {
        Self {
            store,
            registry,
            gate: GenotypeGate::new(config.gq_threshold),
            keys: VariantKeyBuilder::new(config.max_window),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build the sample profile of `case` and compare it to the stored one.
    ///
    /// Fails with `ProfileError::Mismatch` if the profiles disagree and
    /// mismatches block the load.  Nothing is written.
    pub fn check_profile<I>(
        &self,
        case: &ResolvedCase,
        panel: &ProfilePanel,
        calls: I,
    ) -> Result<ProfileCheck, Error>
    where
        I: IntoIterator<Item = Result<VariantCall, VcfError>>,
    {
        let checker = ProfileChecker::new(self.config.profile_threshold)?;
        let mut builder = ProfileBuilder::new(panel, case);
        for call in calls {
            let call = call?;
            if !call.is_structural() {
                builder.observe(&call);
            }
        }
        let profile = builder.finish();

        let stored = self.registry.get_profile(&case.case_id)?;
        let outcome = checker.check(&profile, stored.as_ref())?;
        if let ProfileOutcome::Mismatch { similarity } = outcome {
            if self.config.profile_blocks_load {
                return Err(ProfileError::Mismatch {
                    case_id: case.case_id.clone(),
                    similarity,
                    threshold: checker.threshold(),
                }
                .into());
            }
        }
        Ok(ProfileCheck { profile, outcome })
    }

    /// Load the observations of `case` from `calls`.
    ///
    /// Touched keys are recorded before the corresponding records are
    /// written, so an interrupted load can be undone by deleting the case.
    pub fn load<I>(
        &self,
        case: &ResolvedCase,
        sources: &Sources,
        calls: I,
        profile: Option<&ProfileCheck>,
    ) -> Result<LoadSummary, Error>
    where
        I: IntoIterator<Item = Result<VariantCall, VcfError>>,
    {
        validate_case_id(&case.case_id)?;
        if case.individuals.is_empty() {
            return Err(CaseError::NoSamples(case.case_id.clone()).into());
        }
        let case_id = case.case_id.as_str();
        let attributed = !self.config.skip_case_id;
        self.registry.begin_load(
            CaseLoadRecord::loading(case_id, case.individuals.clone(), attributed)
                .with_paths(sources.vcf.as_deref(), sources.sv_vcf.as_deref())
                .with_thresholds(self.config.gq_threshold, self.config.max_window),
        )?;
        tracing::info!(
            "loading case {} with individuals {:?}",
            case_id,
            case.sample_names()
        );

        let mut summary = LoadSummary {
            case_id: case_id.to_string(),
            ..Default::default()
        };
        // Input is position sorted, so repeated short variants share a position.
        let mut seen_at_pos = FxHashSet::<SeqvarKey>::default();
        let mut seen_svs = FxHashSet::<StrucvarKey>::default();
        let mut batch = Vec::with_capacity(self.config.batch_size);
        for call in calls {
            let call = call?;
            call.validate()?;
            summary.nr_calls += 1;
            if summary.nr_calls % 100_000 == 0 {
                tracing::debug!(
                    "... at {}:{} after {} calls",
                    &call.chrom,
                    call.pos,
                    summary.nr_calls.separate_with_commas()
                );
            }

            let Some(zygosity) = self.gate.case_zygosity(&call, case) else {
                summary.nr_skipped += 1;
                continue;
            };

            if let Some(key) = self.keys.seqvar(&call) {
                if seen_at_pos
                    .iter()
                    .next()
                    .is_some_and(|seen| seen.chrom != key.chrom || seen.pos != key.pos)
                {
                    seen_at_pos.clear();
                }
                if seen_at_pos.insert(key.clone()) {
                    summary.nr_variants += 1;
                    batch.push((VariantKey::Seqvar(key), zygosity));
                    if batch.len() >= self.config.batch_size {
                        self.write(case_id, &batch, &mut summary)?;
                        batch.clear();
                    }
                }
            } else if let Some(query) = self.keys.strucvar_query(&call) {
                let candidates = self
                    .store
                    .get_candidates(&query.chrom, query.sv_type, query.start_range.clone())?
                    .into_iter()
                    .filter_map(|record| match record.key {
                        VariantKey::Strucvar(key) => Some(key),
                        VariantKey::Seqvar(_) => None,
                    })
                    .collect::<Vec<_>>();
                let key = self.keys.resolve(&query.proposal, &candidates);
                if seen_svs.insert(key.clone()) {
                    summary.nr_sv_variants += 1;
                    self.write(case_id, &[(VariantKey::Strucvar(key), zygosity)], &mut summary)?;
                } else {
                    tracing::trace!("{} already counted for case {}", &key, case_id);
                }
            }
        }
        self.write(case_id, &batch, &mut summary)?;

        self.registry
            .commit_load(case_id, summary.nr_variants, summary.nr_sv_variants)?;
        if let Some(ProfileCheck {
            profile,
            outcome: ProfileOutcome::NoStoredProfile,
        }) = profile
        {
            self.registry.put_profile(profile)?;
        }

        tracing::info!(
            "loaded case {}: {} variants and {} structural variants from {} calls ({} new records)",
            case_id,
            summary.nr_variants.separate_with_commas(),
            summary.nr_sv_variants.separate_with_commas(),
            summary.nr_calls.separate_with_commas(),
            summary.nr_created.separate_with_commas(),
        );
        Ok(summary)
    }

    /// Record the touches of `items`, then upsert their observations.
    fn write(
        &self,
        case_id: &str,
        items: &[(VariantKey, CaseZygosity)],
        summary: &mut LoadSummary,
    ) -> Result<(), Error> {
        if items.is_empty() {
            return Ok(());
        }
        let attributed = !self.config.skip_case_id;
        if attributed {
            let touches = items
                .iter()
                .map(|(key, zygosity)| TouchedKey {
                    key: key.clone(),
                    zygosity: *zygosity,
                })
                .collect::<Vec<_>>();
            self.registry.record_touches(case_id, &touches)?;
        }

        let observing_case = attributed.then_some(case_id);
        let upserts = items
            .iter()
            .map(|(key, zygosity)| (key.clone(), Observation::new(observing_case, *zygosity)))
            .collect::<Vec<_>>();
        for outcome in self.store.upsert_batch(&upserts)? {
            summary.count(outcome);
        }
        Ok(())
    }
}

/// Resolve the case from the pedigree and the headers of the input files.
///
/// Samples are taken from the short variant file if given, else from the
/// structural variant file; every given file must carry the case's samples.
pub fn resolve_case(
    pedigree: Option<&Pedigree>,
    case_id: Option<&str>,
    vcf_reader: Option<&VcfCallReader>,
    sv_reader: Option<&VcfCallReader>,
) -> Result<ResolvedCase, Error> {
    let samples = vcf_reader
        .or(sv_reader)
        .map(|reader| reader.samples().to_vec())
        .unwrap_or_default();
    let case = resolve(pedigree, case_id, &samples)?;
    for reader in vcf_reader.into_iter().chain(sv_reader) {
        if case
            .sample_names()
            .iter()
            .any(|name| !reader.samples().iter().any(|sample| sample == name))
        {
            return Err(CaseError::SampleMismatch(case.case_id.clone()).into());
        }
    }
    Ok(case)
}

/// Command line arguments for `load` sub command.
#[derive(Parser, Debug)]
#[command(about = "Load the observations of a case", long_about = None)]
pub struct Args {
    /// Path to the RocksDB directory.
    #[arg(long)]
    pub path_db: PathBuf,
    /// Path to the VCF file with short variants.
    #[arg(long, required_unless_present = "path_sv_vcf")]
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
    /// Case identifier; overrides the family id from the PED file.
    #[arg(long)]
    pub case_id: Option<String>,
    /// Count observations without case attribution; the case cannot be deleted.
    #[arg(long, default_value_t = false)]
    pub skip_case_id: bool,
    /// Minimal genotype quality of an observation.
    #[arg(long, default_value_t = DEFAULT_GQ_THRESHOLD)]
    pub gq_threshold: u32,
    /// Maximal breakpoint distance of matching structural variants.
    #[arg(long, default_value_t = DEFAULT_MAX_WINDOW)]
    pub max_window: u32,
    /// Path to a VCF file with the sites of the profile panel.
    #[arg(long)]
    pub path_profile_sites: Option<PathBuf>,
    /// Minimal profile similarity to the stored profile.
    #[arg(long, default_value_t = DEFAULT_PROFILE_THRESHOLD)]
    pub profile_threshold: f64,
    /// Fail on a profile mismatch instead of warning.
    #[arg(long, default_value_t = false)]
    pub profile_blocks_load: bool,
    /// Create or upgrade the indexes before loading.
    #[arg(long, default_value_t = false)]
    pub ensure_index: bool,
}

/// Main entry point for `load` sub command.
pub fn run(common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!(
        "Loading case\ncommon args: {:#?}\nargs: {:#?}",
        common,
        args
    );
    let before_load = Instant::now();

    let config = ConfigBuilder::default()
        .gq_threshold(args.gq_threshold)
        .max_window(args.max_window)
        .profile_threshold(args.profile_threshold)
        .profile_blocks_load(args.profile_blocks_load)
        .skip_case_id(args.skip_case_id)
        .build()?;

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
        args.case_id.as_deref(),
        vcf_reader.as_ref(),
        sv_reader.as_ref(),
    )?;

    let db = RocksDb::open(&args.path_db)?;
    if args.ensure_index {
        tracing::info!("Ensuring indexes ...");
        db.ensure_indexes()?;
    } else {
        match db.check_indexes()? {
            IndexStatus::Current => (),
            status => tracing::warn!(
                "indexes are {:?}, consider running `db index` or `load --ensure-index`",
                status
            ),
        }
    }

    let orchestrator = LoadOrchestrator::new(&db, &db, config);
    let profile = match (&args.path_profile_sites, &args.path_vcf) {
        (Some(path_sites), Some(path_vcf)) => {
            tracing::info!("Checking sample profile ...");
            let panel = ProfilePanel::new(read_sites(path_sites)?)?;
            let check =
                orchestrator.check_profile(&case, &panel, VcfCallReader::from_path(path_vcf)?)?;
            tracing::info!("... profile check: {:?}", &check.outcome);
            Some(check)
        }
        (Some(_), None) => {
            anyhow::bail!("profile checks need the short variant VCF (--path-vcf)")
        }
        (None, _) => None,
    };

    let sources = Sources {
        vcf: args.path_vcf.as_ref().map(|p| p.display().to_string()),
        sv_vcf: args.path_sv_vcf.as_ref().map(|p| p.display().to_string()),
    };
    let calls = vcf_reader
        .into_iter()
        .flatten()
        .chain(sv_reader.into_iter().flatten());
    let summary = orchestrator.load(&case, &sources, calls, profile.as_ref())?;

    tracing::info!("summary: {}", serde_json::to_string(&summary)?);
    tracing::info!("... done loading in {:?}", before_load.elapsed());
    trace_rss_now();

    Ok(())
}

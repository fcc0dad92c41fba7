//! Observation storage, case registry, and database maintenance tools.

use std::{collections::BTreeMap, ops::RangeInclusive};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::observe::gate::CaseZygosity;
use crate::observe::keys::VariantKey;
use crate::observe::model::SvType;

pub mod cases;
pub mod index;
pub mod memory;
pub mod registry;
pub mod rocks;
pub mod wipe;

/// Version of the on-disk record layout.
pub const SCHEMA_VERSION: u32 = 1;

/// Version of the index layout written by `ensure_indexes`.
pub const INDEX_VERSION: u32 = 1;

/// One observation of a variant, possibly without case attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Observing case; `None` for anonymous observations.
    pub case_id: Option<String>,
    pub zygosity: CaseZygosity,
}

impl Observation {
    pub fn new(case_id: Option<&str>, zygosity: CaseZygosity) -> Self {
        Self {
            case_id: case_id.map(str::to_string),
            zygosity,
        }
    }
}

/// Persisted observation counts of one variant.
///
/// The number of observations always equals the number of attributed cases
/// plus the number of anonymous observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub key: VariantKey,
    pub observations: u32,
    /// Number of observations where the case carries the variant homozygously.
    pub homozygote: u32,
    /// Number of observations where a male carries the variant on a gonosome.
    pub hemizygote: u32,
    /// Attributed observations by case id.
    pub cases: BTreeMap<String, CaseZygosity>,
    /// Observations from loads without case attribution.
    #[serde(default)]
    pub anonymous: u32,
}

impl ObservationRecord {
    pub fn new(key: VariantKey) -> Self {
        Self {
            key,
            observations: 0,
            homozygote: 0,
            hemizygote: 0,
            cases: BTreeMap::new(),
            anonymous: 0,
        }
    }

    fn count_zygosity(&mut self, zygosity: CaseZygosity, increment: bool) {
        let counter = match zygosity {
            CaseZygosity::Het => return,
            CaseZygosity::Hom => &mut self.homozygote,
            CaseZygosity::Hemi => &mut self.hemizygote,
        };
        if increment {
            *counter += 1;
        } else {
            *counter = counter.saturating_sub(1);
        }
    }

    /// Add an observation; returns `false` if the case is already present.
    pub fn add(&mut self, observation: &Observation) -> bool {
        match &observation.case_id {
            Some(case_id) => {
                if self.cases.contains_key(case_id) {
                    return false;
                }
                self.cases.insert(case_id.clone(), observation.zygosity);
            }
            None => self.anonymous += 1,
        }
        self.observations += 1;
        self.count_zygosity(observation.zygosity, true);
        true
    }

    /// Remove the observation of `case_id`; returns `false` if it is not present.
    pub fn remove(&mut self, case_id: &str) -> bool {
        match self.cases.remove(case_id) {
            Some(zygosity) => {
                self.observations -= 1;
                self.count_zygosity(zygosity, false);
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observations == 0
    }

    /// Check the counting invariants.
    pub fn check(&self) -> Result<(), StoreError> {
        let attributed = self.cases.len() as u32;
        if self.observations != attributed + self.anonymous {
            return Err(StoreError::Corrupt(format!(
                "{}: {} observations but {} cases and {} anonymous",
                self.key, self.observations, attributed, self.anonymous
            )));
        }
        let count = |zygosity: CaseZygosity| {
            self.cases.values().filter(|z| **z == zygosity).count() as u32
        };
        if self.homozygote < count(CaseZygosity::Hom)
            || self.hemizygote < count(CaseZygosity::Hemi)
            || self.homozygote + self.hemizygote > self.observations
        {
            return Err(StoreError::Corrupt(format!(
                "{}: inconsistent zygosity counts hom={} hemi={} of {}",
                self.key, self.homozygote, self.hemizygote, self.observations
            )));
        }
        Ok(())
    }
}

/// Outcome of `ObservationStore::upsert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new record was created.
    Created,
    /// The observation was added to an existing record.
    Added,
    /// The case had already been counted, nothing changed.
    AlreadyPresent,
}

impl UpsertOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, UpsertOutcome::AlreadyPresent)
    }
}

/// Outcome of `ObservationStore::remove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The case was removed from the record.
    Removed,
    /// The case was the last observation, the record is gone.
    Deleted,
    /// Record or case not present, nothing changed.
    Absent,
}

impl RemoveOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, RemoveOutcome::Absent)
    }
}

/// State of the index marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Current,
    Outdated { found: u32 },
    Missing,
}

/// Number of stored records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub seqvars: usize,
    pub strucvars: usize,
}

/// Keyed storage of observation records.
///
/// All operations are atomic with respect to a single key.
pub trait ObservationStore: Send + Sync {
    /// Record stored under exactly `key`.
    fn get_exact(&self, key: &VariantKey) -> Result<Option<ObservationRecord>, StoreError>;

    /// Structural variant records on `chrom` of `sv_type` with start in `start_range`.
    fn get_candidates(
        &self,
        chrom: &str,
        sv_type: SvType,
        start_range: RangeInclusive<u32>,
    ) -> Result<Vec<ObservationRecord>, StoreError>;

    /// Add `observation` to the record under `key`, creating it if needed.
    ///
    /// Idempotent per case id.
    fn upsert(&self, key: &VariantKey, observation: &Observation)
        -> Result<UpsertOutcome, StoreError>;

    /// Upsert several observations, in order.
    fn upsert_batch(
        &self,
        items: &[(VariantKey, Observation)],
    ) -> Result<Vec<UpsertOutcome>, StoreError> {
        items
            .iter()
            .map(|(key, observation)| self.upsert(key, observation))
            .collect()
    }

    /// Remove the observation of `case_id` from the record under `key`.
    ///
    /// Records without observations are deleted; absent keys or cases are a no-op.
    fn remove(&self, key: &VariantKey, case_id: &str) -> Result<RemoveOutcome, StoreError>;

    /// Create or upgrade the indexes.
    fn ensure_indexes(&self) -> Result<(), StoreError>;

    /// Report whether the indexes are current.
    fn check_indexes(&self) -> Result<IndexStatus, StoreError>;

    /// Drop all observation records together with registry entries and profiles.
    fn wipe(&self) -> Result<(), StoreError>;

    /// Number of stored records.
    fn counts(&self) -> Result<StoreCounts, StoreError>;
}

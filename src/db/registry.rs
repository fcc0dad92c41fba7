//! Bookkeeping of loaded cases and the keys their loads touched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, StoreError};
use crate::observe::gate::{CaseZygosity, DEFAULT_GQ_THRESHOLD};
use crate::observe::keys::{VariantKey, DEFAULT_MAX_WINDOW};
use crate::observe::profile::CaseProfile;
use crate::ped::Individual;

/// Load state of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CaseStatus {
    /// Load started but did not complete.
    Loading,
    Loaded,
}

/// Registry entry of one case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseLoadRecord {
    pub case_id: String,
    pub status: CaseStatus,
    /// Whether observations carry the case id; anonymous loads cannot be deleted.
    pub attributed: bool,
    pub individuals: Vec<Individual>,
    pub vcf_path: Option<String>,
    pub sv_vcf_path: Option<String>,
    /// Number of observed short variants.
    pub nr_variants: u64,
    /// Number of observed structural variants.
    pub nr_sv_variants: u64,
    /// Genotype quality threshold used for the load.
    pub gq_threshold: u32,
    /// Structural variant window used for the load.
    pub max_window: u32,
    pub created_at: DateTime<Utc>,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl CaseLoadRecord {
    /// New entry in `Loading` state.
    pub fn loading(case_id: &str, individuals: Vec<Individual>, attributed: bool) -> Self {
        Self {
            case_id: case_id.to_string(),
            status: CaseStatus::Loading,
            attributed,
            individuals,
            vcf_path: None,
            sv_vcf_path: None,
            nr_variants: 0,
            nr_sv_variants: 0,
            gq_threshold: DEFAULT_GQ_THRESHOLD,
            max_window: DEFAULT_MAX_WINDOW,
            created_at: Utc::now(),
            loaded_at: None,
        }
    }

    pub fn with_paths(mut self, vcf_path: Option<&str>, sv_vcf_path: Option<&str>) -> Self {
        self.vcf_path = vcf_path.map(str::to_string);
        self.sv_vcf_path = sv_vcf_path.map(str::to_string);
        self
    }

    pub fn with_thresholds(mut self, gq_threshold: u32, max_window: u32) -> Self {
        self.gq_threshold = gq_threshold;
        self.max_window = max_window;
        self
    }
}

/// A key touched by the load of a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchedKey {
    pub key: VariantKey,
    pub zygosity: CaseZygosity,
}

/// Key of a touch entry: case id, separator, and the variant key bytes.
pub fn touch_key(case_id: &str, key: &VariantKey) -> Vec<u8> {
    let mut result = touch_prefix(case_id);
    result.push(if key.is_strucvar() { b'v' } else { b's' });
    result.extend_from_slice(&key.to_bytes());
    result
}

/// Prefix shared by all touch entries of `case_id`.
pub fn touch_prefix(case_id: &str) -> Vec<u8> {
    let mut result = case_id.as_bytes().to_vec();
    result.push(b'\0');
    result
}

/// Tracks loaded cases and their touched keys.
///
/// Touches must be durable when `record_touches` returns since they are the
/// trail for deleting a case whose load was interrupted.
pub trait CaseRegistry: Send + Sync {
    /// Register the start of a load; fails if the case is registered in any state.
    fn begin_load(&self, record: CaseLoadRecord) -> Result<(), Error>;

    /// Durably append touched keys of `case_id`; repeated keys are stored once.
    fn record_touches(&self, case_id: &str, touches: &[TouchedKey]) -> Result<(), StoreError>;

    /// Mark the load of `case_id` as complete.
    fn commit_load(
        &self,
        case_id: &str,
        nr_variants: u64,
        nr_sv_variants: u64,
    ) -> Result<CaseLoadRecord, Error>;

    fn get_case(&self, case_id: &str) -> Result<Option<CaseLoadRecord>, StoreError>;

    /// Touched keys of `case_id`, in key order.
    fn touches(&self, case_id: &str) -> Result<Vec<TouchedKey>, StoreError>;

    /// Fetch the registry entry and trail of a case to delete.
    ///
    /// Also works for cases whose load never completed.
    fn begin_delete(&self, case_id: &str) -> Result<(CaseLoadRecord, Vec<TouchedKey>), Error>;

    /// Drop the case and its trail from the registry.
    fn finish_delete(&self, case_id: &str) -> Result<(), StoreError>;

    /// All registered cases, ordered by case id.
    fn list_cases(&self) -> Result<Vec<CaseLoadRecord>, StoreError>;

    /// Stored sample profile of `case_id`; survives deletion of the case.
    fn get_profile(&self, case_id: &str) -> Result<Option<CaseProfile>, StoreError>;

    fn put_profile(&self, profile: &CaseProfile) -> Result<(), StoreError>;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::observe::keys::{SeqvarKey, StrucvarKey};
    use crate::observe::model::SvType;

    #[test]
    fn touch_keys_grouped_by_case() {
        let seqvar = VariantKey::Seqvar(SeqvarKey::new("1", 100, "A", "G"));
        let strucvar = VariantKey::Strucvar(StrucvarKey::new("1", SvType::Del, 100, 200, "1"));

        let prefix = touch_prefix("case");
        assert!(touch_key("case", &seqvar).starts_with(&prefix));
        assert!(touch_key("case", &strucvar).starts_with(&prefix));
        assert!(!touch_key("case2", &seqvar).starts_with(&prefix));
        assert_ne!(touch_key("case", &seqvar), touch_key("case", &strucvar));
    }

    #[test]
    fn case_status_display() {
        assert_eq!(CaseStatus::Loading.to_string(), "loading");
        assert_eq!(CaseStatus::Loaded.to_string(), "loaded");
    }
}

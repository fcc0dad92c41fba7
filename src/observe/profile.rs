//! Genotype fingerprints over a fixed panel of sites to detect sample swaps.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::ProfileError;
use crate::observe::keys::{SeqvarKey, VariantKeyBuilder};
use crate::observe::model::{Genotype, VariantCall};
use crate::ped::ResolvedCase;

/// Default minimal similarity of two profiles of the same case.
pub const DEFAULT_PROFILE_THRESHOLD: f64 = 0.9;

/// Genotype of one individual at one profiling site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileCall {
    /// Sites absent from the input are taken as reference.
    #[default]
    HomRef,
    Het,
    HomAlt,
    NoCall,
}

impl From<Genotype> for ProfileCall {
    fn from(value: Genotype) -> Self {
        match value {
            Genotype::Missing => ProfileCall::NoCall,
            Genotype::HomRef => ProfileCall::HomRef,
            Genotype::Het => ProfileCall::Het,
            Genotype::HomAlt => ProfileCall::HomAlt,
        }
    }
}

/// The panel of profiling sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePanel {
    sites: Vec<SeqvarKey>,
    index: FxHashMap<SeqvarKey, usize>,
}

impl ProfilePanel {
    /// Construct from the given sites; duplicates are dropped.
    pub fn new<I>(sites: I) -> Result<Self, ProfileError>
    where
        I: IntoIterator<Item = SeqvarKey>,
    {
        let mut result = Self {
            sites: Vec::new(),
            index: FxHashMap::default(),
        };
        for site in sites {
            if !result.index.contains_key(&site) {
                result.index.insert(site.clone(), result.sites.len());
                result.sites.push(site);
            }
        }
        if result.sites.is_empty() {
            return Err(ProfileError::EmptyPanel);
        }
        Ok(result)
    }

    pub fn sites(&self) -> &[SeqvarKey] {
        &self.sites
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Index of `key` in the panel.
    pub fn position(&self, key: &SeqvarKey) -> Option<usize> {
        self.index.get(key).copied()
    }
}

/// Fingerprint of a case: one call vector per individual.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaseProfile {
    pub case_id: String,
    /// Profiling sites, in panel order.
    pub sites: Vec<SeqvarKey>,
    pub individuals: IndexMap<String, Vec<ProfileCall>>,
}

/// Accumulates a `CaseProfile` from a stream of calls.
#[derive(Debug)]
pub struct ProfileBuilder<'a> {
    panel: &'a ProfilePanel,
    keys: VariantKeyBuilder,
    profile: CaseProfile,
}

impl<'a> ProfileBuilder<'a> {
    pub fn new(panel: &'a ProfilePanel, case: &ResolvedCase) -> Self {
        let individuals = case
            .individuals
            .iter()
            .map(|individual| {
                (
                    individual.name.clone(),
                    vec![ProfileCall::default(); panel.len()],
                )
            })
            .collect();
        Self {
            panel,
            keys: VariantKeyBuilder::default(),
            profile: CaseProfile {
                case_id: case.case_id.clone(),
                sites: panel.sites().to_vec(),
                individuals,
            },
        }
    }

    /// Register `call`; calls outside the panel are ignored.
    pub fn observe(&mut self, call: &VariantCall) {
        let Some(idx) = self
            .keys
            .seqvar(call)
            .and_then(|key| self.panel.position(&key))
        else {
            return;
        };
        for (name, calls) in self.profile.individuals.iter_mut() {
            calls[idx] = call
                .genotypes
                .get(name.as_str())
                .map(|gt_call| ProfileCall::from(gt_call.genotype))
                .unwrap_or(ProfileCall::NoCall);
        }
    }

    pub fn finish(self) -> CaseProfile {
        self.profile
    }
}

/// Fraction of identical calls between two profiles.
///
/// Individuals are paired by name and sites by key; pairs with a no-call on
/// either side are skipped.  Returns `None` if nothing can be compared and an
/// error if a call vector does not cover the sites of its profile.
pub fn similarity(lhs: &CaseProfile, rhs: &CaseProfile) -> Result<Option<f64>, ProfileError> {
    let rhs_sites = rhs
        .sites
        .iter()
        .enumerate()
        .map(|(idx, site)| (site, idx))
        .collect::<FxHashMap<_, _>>();

    let mut compared = 0usize;
    let mut identical = 0usize;
    for (name, lhs_calls) in &lhs.individuals {
        let Some(rhs_calls) = rhs.individuals.get(name) else {
            continue;
        };
        for (lhs_idx, site) in lhs.sites.iter().enumerate() {
            let Some(rhs_idx) = rhs_sites.get(site) else {
                continue;
            };
            let a = call_at(lhs, name, lhs_calls, lhs_idx)?;
            let b = call_at(rhs, name, rhs_calls, *rhs_idx)?;
            if a == ProfileCall::NoCall || b == ProfileCall::NoCall {
                continue;
            }
            compared += 1;
            if a == b {
                identical += 1;
            }
        }
    }

    if compared == 0 {
        Ok(None)
    } else {
        Ok(Some(identical as f64 / compared as f64))
    }
}

fn call_at(
    profile: &CaseProfile,
    name: &str,
    calls: &[ProfileCall],
    idx: usize,
) -> Result<ProfileCall, ProfileError> {
    calls
        .get(idx)
        .copied()
        .ok_or_else(|| ProfileError::Malformed {
            case_id: profile.case_id.clone(),
            individual: name.to_string(),
            nr_calls: calls.len(),
            nr_sites: profile.sites.len(),
        })
}

/// Result of comparing a profile against the stored one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProfileOutcome {
    /// No earlier profile of the case exists.
    NoStoredProfile,
    /// The profiles share no comparable calls.
    Incomparable,
    Match { similarity: f64 },
    Mismatch { similarity: f64 },
}

/// Compares case profiles against a similarity threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileChecker {
    threshold: f64,
}

impl ProfileChecker {
    /// Construct with `threshold`, which must lie in `[0, 1]`.
    pub fn new(threshold: f64) -> Result<Self, ProfileError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ProfileError::InvalidThreshold(threshold));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn check(
        &self,
        current: &CaseProfile,
        stored: Option<&CaseProfile>,
    ) -> Result<ProfileOutcome, ProfileError> {
        let Some(stored) = stored else {
            return Ok(ProfileOutcome::NoStoredProfile);
        };
        Ok(match similarity(current, stored)? {
            None => ProfileOutcome::Incomparable,
            Some(similarity) if similarity < self.threshold => {
                tracing::warn!(
                    "profile of case {} has similarity {:.3} to the stored profile (threshold {}), likely sample swap",
                    current.case_id,
                    similarity,
                    self.threshold
                );
                ProfileOutcome::Mismatch { similarity }
            }
            Some(similarity) => ProfileOutcome::Match { similarity },
        })
    }
}

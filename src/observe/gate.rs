//! Decide whether a variant call counts as an observation of a case.

use serde::{Deserialize, Serialize};

use crate::observe::keys::chrom_name_to_key;
use crate::observe::model::{Genotype, VariantCall};
use crate::ped::{ResolvedCase, Sex};

/// Default minimal genotype quality.
pub const DEFAULT_GQ_THRESHOLD: u32 = 20;

/// How a case carries an observed variant.
///
/// `Hom` takes precedence over `Hemi` which takes precedence over `Het` when
/// several individuals of the case carry the variant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CaseZygosity {
    #[default]
    Het,
    Hemi,
    Hom,
}

/// Whether `individual` carries the variant with sufficient genotype quality.
///
/// Missing genotypes and missing genotype qualities never pass.
pub fn observed(call: &VariantCall, individual: &str, gq_threshold: u32) -> bool {
    match call.genotypes.get(individual) {
        Some(gt_call) => {
            gt_call.genotype.is_variant() && gt_call.gq.is_some_and(|gq| gq >= gq_threshold)
        }
        None => false,
    }
}

/// Genotype quality gate with a fixed threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenotypeGate {
    gq_threshold: u32,
}

impl Default for GenotypeGate {
    fn default() -> Self {
        Self::new(DEFAULT_GQ_THRESHOLD)
    }
}

impl GenotypeGate {
    pub fn new(gq_threshold: u32) -> Self {
        Self { gq_threshold }
    }

    pub fn gq_threshold(&self) -> u32 {
        self.gq_threshold
    }

    /// See [`observed`].
    pub fn observed(&self, call: &VariantCall, individual: &str) -> bool {
        observed(call, individual, self.gq_threshold)
    }

    /// Whether any individual of the case passes the gate; stops at the first hit.
    pub fn observed_in_case(&self, call: &VariantCall, case: &ResolvedCase) -> bool {
        case.individuals
            .iter()
            .any(|individual| self.observed(call, &individual.name))
    }

    /// The zygosity with which the case carries the variant, `None` if not observed.
    ///
    /// All individuals are inspected so that homozygous and hemizygous carriers
    /// are found even if a heterozygous carrier comes first.
    pub fn case_zygosity(&self, call: &VariantCall, case: &ResolvedCase) -> Option<CaseZygosity> {
        let chrom = chrom_name_to_key(&call.chrom);
        let gonosomal = chrom == " X" || chrom == " Y";

        case.individuals
            .iter()
            .filter(|individual| self.observed(call, &individual.name))
            .map(|individual| {
                let genotype = call.genotypes[individual.name.as_str()].genotype;
                match (genotype, gonosomal, individual.sex) {
                    (Genotype::HomAlt, true, Sex::Male) => CaseZygosity::Hemi,
                    (Genotype::HomAlt, _, _) => CaseZygosity::Hom,
                    _ => CaseZygosity::Het,
                }
            })
            .max()
    }
}

//! Variant calls as handed to the observation engine.

use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::VcfError;

/// Genotype of one individual, projected onto a single alternate allele.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Genotype {
    /// No call (`./.`, `.`, or a partially missing call).
    #[default]
    Missing,
    /// Only reference alleles (or alleles of another ALT).
    HomRef,
    /// One copy of the alternate allele.
    Het,
    /// Only copies of the alternate allele.
    HomAlt,
}

impl Genotype {
    /// Whether the genotype carries the alternate allele.
    pub fn is_variant(&self) -> bool {
        matches!(self, Genotype::Het | Genotype::HomAlt)
    }

    /// Project the allele indices of a call onto the 1-based ALT index `alt`.
    ///
    /// Any missing allele makes the whole call missing.  Alleles of other ALTs
    /// count as reference for `alt`.
    pub fn from_alleles(alleles: &[Option<usize>], alt: usize) -> Self {
        if alleles.is_empty() || alleles.iter().any(|a| a.is_none()) {
            return Genotype::Missing;
        }
        let carried = alleles.iter().filter(|a| **a == Some(alt)).count();
        if carried == 0 {
            Genotype::HomRef
        } else if carried == alleles.len() {
            Genotype::HomAlt
        } else {
            Genotype::Het
        }
    }
}

/// Genotype and genotype quality of one individual at one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GenotypeCall {
    pub genotype: Genotype,
    /// Genotype quality (`GQ`), if present.
    pub gq: Option<u32>,
}

impl GenotypeCall {
    pub fn new(genotype: Genotype, gq: Option<u32>) -> Self {
        Self { genotype, gq }
    }
}

/// Structural variant types.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::VariantArray,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SvType {
    Del,
    Dup,
    Inv,
    Ins,
    Cnv,
    Bnd,
}

impl SvType {
    /// Parse the value of an `SVTYPE` INFO field or a symbolic allele.
    ///
    /// Sub types such as `DEL:ME:ALU` or `DUP:TANDEM` map to their main type.
    pub fn parse_loose(value: &str) -> Option<Self> {
        let value = value.trim_start_matches('<').trim_end_matches('>');
        let main = value.split(':').next().unwrap_or(value);
        SvType::from_str(&main.to_ascii_uppercase()).ok()
    }

    /// Single byte code used in the storage keys.
    pub fn code(&self) -> u8 {
        match self {
            SvType::Del => 1,
            SvType::Dup => 2,
            SvType::Inv => 3,
            SvType::Ins => 4,
            SvType::Cnv => 5,
            SvType::Bnd => 6,
        }
    }
}

/// Payload of a short variant (SNV or small indel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortVariant {
    pub reference: String,
    pub alternative: String,
}

/// Payload of a structural variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralVariant {
    pub sv_type: SvType,
    /// Chromosome of the second breakpoint; equals the call's chromosome except for BND.
    pub end_chrom: String,
    /// 1-based second breakpoint.
    pub end: u32,
    /// Confidence interval around the start (`CIPOS`).
    pub ci_start: Option<(i32, i32)>,
    /// Confidence interval around the end (`CIEND`).
    pub ci_end: Option<(i32, i32)>,
}

/// Short or structural variant payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariantKind {
    Short(ShortVariant),
    Structural(StructuralVariant),
}

/// One variant record of one case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCall {
    /// Chromosome name as found in the input.
    pub chrom: String,
    /// 1-based position.
    pub pos: u32,
    pub kind: VariantKind,
    /// Genotype calls by sample name.
    pub genotypes: IndexMap<String, GenotypeCall>,
}

impl VariantCall {
    /// Construct a short variant call.
    pub fn short(chrom: &str, pos: u32, reference: &str, alternative: &str) -> Self {
        Self {
            chrom: chrom.to_string(),
            pos,
            kind: VariantKind::Short(ShortVariant {
                reference: reference.to_string(),
                alternative: alternative.to_string(),
            }),
            genotypes: IndexMap::new(),
        }
    }

    /// Construct an intra-chromosomal structural variant call.
    pub fn structural(chrom: &str, pos: u32, end: u32, sv_type: SvType) -> Self {
        Self {
            chrom: chrom.to_string(),
            pos,
            kind: VariantKind::Structural(StructuralVariant {
                sv_type,
                end_chrom: chrom.to_string(),
                end,
                ci_start: None,
                ci_end: None,
            }),
            genotypes: IndexMap::new(),
        }
    }

    /// Add a genotype call, builder style.
    pub fn with_genotype(mut self, sample: &str, genotype: Genotype, gq: Option<u32>) -> Self {
        self.genotypes
            .insert(sample.to_string(), GenotypeCall::new(genotype, gq));
        self
    }

    pub fn is_structural(&self) -> bool {
        matches!(self.kind, VariantKind::Structural(_))
    }

    /// Check that the identity of the call is internally consistent.
    pub fn validate(&self) -> Result<(), VcfError> {
        if self.pos == 0 {
            return Err(VcfError::InvalidPosition {
                chrom: self.chrom.clone(),
                pos: 0,
            });
        }
        match &self.kind {
            VariantKind::Short(short) => {
                let valid = |s: &str| {
                    !s.is_empty()
                        && s.bytes()
                            .all(|b| matches!(b.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T' | b'N'))
                };
                if !valid(&short.reference)
                    || !valid(&short.alternative)
                    || short.reference.eq_ignore_ascii_case(&short.alternative)
                {
                    return Err(VcfError::InvalidAlleles {
                        chrom: self.chrom.clone(),
                        pos: self.pos,
                        reference: short.reference.clone(),
                        alternative: short.alternative.clone(),
                    });
                }
            }
            VariantKind::Structural(sv) => {
                if sv.sv_type != SvType::Bnd && sv.end < self.pos {
                    return Err(VcfError::InvalidSvEnd {
                        chrom: self.chrom.clone(),
                        pos: self.pos,
                        end: sv.end,
                    });
                }
                if sv.sv_type == SvType::Bnd && sv.end == 0 {
                    return Err(VcfError::InvalidSvEnd {
                        chrom: self.chrom.clone(),
                        pos: self.pos,
                        end: sv.end,
                    });
                }
            }
        }
        Ok(())
    }
}

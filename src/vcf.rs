//! Streaming conversion of VCF records into `VariantCall`s.
//!
//! Multi-allelic records are split per ALT allele with the genotypes projected
//! onto each allele.  Structural variants are recognized by an `SVTYPE` INFO
//! field, a symbolic allele, or a breakend allele.

use std::{collections::VecDeque, io::BufRead, path::Path};

use noodles::vcf;
use rustc_hash::FxHashSet;
use noodles::vcf::variant::record::samples::keys::key as vcf_key;
use noodles::vcf::variant::record_buf::info::field::value::Array as InfoArray;
use noodles::vcf::variant::record_buf::info::field::Value as InfoValue;
use noodles::vcf::variant::record_buf::samples::sample::Value as SampleValue;
use noodles::vcf::variant::RecordBuf;

use crate::common::io::std::open_read_maybe_gz;
use crate::error::VcfError;
use crate::observe::keys::SeqvarKey;
use crate::observe::model::{
    Genotype, GenotypeCall, StructuralVariant, SvType, VariantCall, VariantKind,
};

/// Alias for the VCF reader type that we use.
pub type VcfReader = vcf::io::Reader<Box<dyn BufRead>>;

/// Reads `VariantCall`s from a VCF file, one ALT allele at a time.
pub struct VcfCallReader {
    reader: VcfReader,
    header: vcf::Header,
    samples: Vec<String>,
    record: RecordBuf,
    pending: VecDeque<VariantCall>,
    /// Chromosome and position of the previous record.
    last: Option<(String, u32)>,
    /// Chromosomes before the one of the previous record.
    finished: FxHashSet<String>,
    done: bool,
}

impl std::fmt::Debug for VcfCallReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VcfCallReader")
            .field("samples", &self.samples)
            .field("last", &self.last)
            .field("done", &self.done)
            .finish()
    }
}

impl VcfCallReader {
    /// Open the (optionally gzip-compressed) VCF file at `path`.
    pub fn from_path<P>(path: P) -> Result<Self, VcfError>
    where
        P: AsRef<Path>,
    {
        tracing::debug!("Opening VCF file {:?}", path.as_ref());
        Self::new(open_read_maybe_gz(path)?)
    }

    /// Construct from a buffered reader positioned at the start of the header.
    pub fn new(inner: Box<dyn BufRead>) -> Result<Self, VcfError> {
        let mut reader = vcf::io::Reader::new(inner);
        let header = reader.read_header()?;
        let samples = header.sample_names().iter().cloned().collect();
        Ok(Self {
            reader,
            header,
            samples,
            record: RecordBuf::default(),
            pending: VecDeque::new(),
            last: None,
            finished: FxHashSet::default(),
            done: false,
        })
    }

    /// Sample names from the header, in column order.
    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    /// Read the next record and convert it into zero or more calls.
    fn read_next(&mut self) -> Result<bool, VcfError> {
        if self.reader.read_record_buf(&self.header, &mut self.record)? == 0 {
            return Ok(false);
        }
        let calls = convert_record(&self.record, &self.samples, self.last.as_ref())?;
        if let Some(call) = calls.first() {
            if let Some((last_chrom, _)) = &self.last {
                if *last_chrom != call.chrom {
                    if self.finished.contains(&call.chrom) {
                        return Err(VcfError::ChromosomeRevisited {
                            chrom: call.chrom.clone(),
                            pos: call.pos,
                        });
                    }
                    self.finished.insert(last_chrom.clone());
                }
            }
            self.last = Some((call.chrom.clone(), call.pos));
        }
        self.pending.extend(calls);
        Ok(true)
    }
}

impl Iterator for VcfCallReader {
    type Item = Result<VariantCall, VcfError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pending.is_empty() && !self.done {
            match self.read_next() {
                Ok(true) => (),
                Ok(false) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        self.pending.pop_front().map(Ok)
    }
}

/// Read the sites of a profiling panel from the VCF file at `path`.
pub fn read_sites<P>(path: P) -> Result<Vec<SeqvarKey>, VcfError>
where
    P: AsRef<Path>,
{
    let mut result = Vec::new();
    for call in VcfCallReader::from_path(path)? {
        let call = call?;
        if let VariantKind::Short(short) = &call.kind {
            result.push(SeqvarKey::new(
                &call.chrom,
                call.pos,
                &short.reference,
                &short.alternative,
            ));
        }
    }
    Ok(result)
}

fn info_integer(record: &RecordBuf, key: &str) -> Option<i64> {
    match record.info().get(key) {
        Some(Some(InfoValue::Integer(value))) => Some(i64::from(*value)),
        Some(Some(InfoValue::Array(InfoArray::Integer(values)))) => {
            values.first().copied().flatten().map(i64::from)
        }
        _ => None,
    }
}

fn info_interval(record: &RecordBuf, key: &str) -> Option<(i32, i32)> {
    match record.info().get(key) {
        Some(Some(InfoValue::Array(InfoArray::Integer(values)))) if values.len() == 2 => {
            Some((values[0]?, values[1]?))
        }
        _ => None,
    }
}

fn info_string<'r>(record: &'r RecordBuf, key: &str) -> Option<&'r str> {
    match record.info().get(key) {
        Some(Some(InfoValue::String(value))) => Some(value.as_str()),
        _ => None,
    }
}

/// Parse the mate position from a breakend allele such as `G]17:198982]`.
fn parse_breakend(alt: &str) -> Option<(String, u32)> {
    let start = alt.find(['[', ']'])?;
    let rest = &alt[start + 1..];
    let end = rest.find(['[', ']'])?;
    let (chrom, pos) = rest[..end].rsplit_once(':')?;
    Some((chrom.trim_start_matches('<').trim_end_matches('>').to_string(), pos.parse().ok()?))
}

fn is_breakend(alt: &str) -> bool {
    alt.contains('[') || alt.contains(']')
}

fn is_symbolic(alt: &str) -> bool {
    alt.starts_with('<') && alt.ends_with('>')
}

/// Project the genotype calls of all samples onto the 1-based ALT allele `alt`.
fn genotypes(
    record: &RecordBuf,
    samples: &[String],
    chrom: &str,
    pos: u32,
    alt: usize,
) -> Result<indexmap::IndexMap<String, GenotypeCall>, VcfError> {
    let nr_alts = record.alternate_bases().as_ref().len();
    let mut result = indexmap::IndexMap::new();
    for (idx, name) in samples.iter().enumerate() {
        let Some(sample) = record.samples().get_index(idx) else {
            result.insert(name.clone(), GenotypeCall::default());
            continue;
        };
        let genotype = match sample.get(vcf_key::GENOTYPE) {
            Some(Some(SampleValue::Genotype(gt))) => {
                let alleles = gt
                    .as_ref()
                    .iter()
                    .map(|allele| allele.position())
                    .collect::<Vec<_>>();
                if let Some(invalid) = alleles.iter().flatten().find(|a| **a > nr_alts) {
                    return Err(VcfError::InvalidGenotype {
                        chrom: chrom.to_string(),
                        pos,
                        sample: name.clone(),
                        reason: format!("allele index {} but only {} ALT alleles", invalid, nr_alts),
                    });
                }
                Genotype::from_alleles(&alleles, alt)
            }
            Some(Some(value)) => {
                return Err(VcfError::InvalidGenotype {
                    chrom: chrom.to_string(),
                    pos,
                    sample: name.clone(),
                    reason: format!("unexpected GT value {:?}", value),
                })
            }
            _ => Genotype::Missing,
        };
        let gq = match sample.get(vcf_key::CONDITIONAL_GENOTYPE_QUALITY) {
            Some(Some(SampleValue::Integer(gq))) => u32::try_from(*gq).ok(),
            Some(Some(SampleValue::Float(gq))) if *gq >= 0.0 => Some(gq.round() as u32),
            _ => None,
        };
        result.insert(name.clone(), GenotypeCall::new(genotype, gq));
    }
    Ok(result)
}

/// Convert one VCF record into one call per ALT allele.
fn convert_record(
    record: &RecordBuf,
    samples: &[String],
    last: Option<&(String, u32)>,
) -> Result<Vec<VariantCall>, VcfError> {
    let chrom = record.reference_sequence_name().to_string();
    let pos = match record.variant_start() {
        Some(pos) => {
            let pos = usize::from(pos);
            u32::try_from(pos).map_err(|_| VcfError::InvalidPosition {
                chrom: chrom.clone(),
                pos,
            })?
        }
        None => return Err(VcfError::InvalidPosition { chrom, pos: 0 }),
    };
    if let Some((last_chrom, last_pos)) = last {
        if *last_chrom == chrom && pos < *last_pos {
            return Err(VcfError::Unsorted {
                chrom,
                pos,
                prev_pos: *last_pos,
            });
        }
    }

    let reference = record.reference_bases();
    let sv_type = match info_string(record, "SVTYPE") {
        Some(value) => Some(SvType::parse_loose(value).ok_or_else(|| {
            VcfError::InvalidSvType {
                chrom: chrom.clone(),
                pos,
                value: value.to_string(),
            }
        })?),
        None => None,
    };

    let mut result = Vec::new();
    for (idx, alt) in record.alternate_bases().as_ref().iter().enumerate() {
        if alt == "*" || alt == "." || alt == "<*>" || alt == "<NON_REF>" {
            continue;
        }
        let structural = sv_type.is_some() || is_symbolic(alt) || is_breakend(alt);
        let kind = if structural {
            let sv_type = match sv_type {
                Some(sv_type) => sv_type,
                None if is_breakend(alt) => SvType::Bnd,
                None => SvType::parse_loose(alt).ok_or_else(|| VcfError::InvalidSvType {
                    chrom: chrom.clone(),
                    pos,
                    value: alt.clone(),
                })?,
            };
            let (end_chrom, end) = if sv_type == SvType::Bnd {
                parse_breakend(alt).ok_or_else(|| VcfError::InvalidBreakend {
                    chrom: chrom.clone(),
                    pos,
                    value: alt.clone(),
                })?
            } else {
                let end = match (info_integer(record, "END"), info_integer(record, "SVLEN")) {
                    (Some(end), _) => end,
                    (None, Some(_)) if sv_type == SvType::Ins => i64::from(pos),
                    (None, Some(svlen)) => i64::from(pos) + svlen.abs(),
                    (None, None) => i64::from(pos),
                };
                let end = u32::try_from(end).map_err(|_| VcfError::InvalidSvEnd {
                    chrom: chrom.clone(),
                    pos,
                    end: 0,
                })?;
                (chrom.clone(), end)
            };
            VariantKind::Structural(StructuralVariant {
                sv_type,
                end_chrom,
                end,
                ci_start: info_interval(record, "CIPOS"),
                ci_end: info_interval(record, "CIEND"),
            })
        } else {
            VariantKind::Short(crate::observe::model::ShortVariant {
                reference: reference.to_string(),
                alternative: alt.clone(),
            })
        };

        let call = VariantCall {
            chrom: chrom.clone(),
            pos,
            kind,
            genotypes: genotypes(record, samples, &chrom, pos, idx + 1)?,
        };
        result.push(call);
    }

    Ok(result)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[rstest::rstest]
    #[case("G]17:198982]", Some(("17", 198982)))]
    #[case("]13:123456]T", Some(("13", 123456)))]
    #[case("[chr17:198983[A", Some(("chr17", 198983)))]
    #[case("A[<ctg1>:7[", Some(("ctg1", 7)))]
    #[case("A[17[", None)]
    #[case("<DEL>", None)]
    fn breakend(#[case] alt: &str, #[case] expected: Option<(&str, u32)>) {
        assert_eq!(
            parse_breakend(alt),
            expected.map(|(chrom, pos)| (chrom.to_string(), pos))
        );
    }

    #[test]
    fn read_short_variants() -> Result<(), anyhow::Error> {
        let reader = VcfCallReader::from_path("tests/data/vcf/trio1.vcf")?;
        assert_eq!(reader.samples(), ["child", "mother", "father"]);

        let calls = reader.collect::<Result<Vec<_>, _>>()?;
        let summary = calls
            .iter()
            .map(|call| match &call.kind {
                VariantKind::Short(short) => format!(
                    "{}-{}-{}-{} {:?}",
                    call.chrom,
                    call.pos,
                    short.reference,
                    short.alternative,
                    call.genotypes
                        .values()
                        .map(|gt| (gt.genotype, gt.gq))
                        .collect::<Vec<_>>()
                ),
                VariantKind::Structural(_) => String::from("structural"),
            })
            .collect::<Vec<_>>();

        insta::assert_debug_snapshot!(summary, @r#"
        [
            "1-100-A-G [(Het, Some(30)), (HomRef, Some(40)), (HomRef, Some(40))]",
            "1-200-C-T [(Het, Some(10)), (Het, Some(15)), (Missing, None)]",
            "1-300-G-A [(Het, Some(50)), (Het, Some(50)), (HomRef, Some(50))]",
            "1-300-G-C [(Het, Some(50)), (HomRef, Some(50)), (HomRef, Some(50))]",
            "1-400-T-A [(HomAlt, Some(99)), (Het, Some(60)), (Het, Some(60))]",
            "X-500-A-T [(HomAlt, Some(99)), (Het, Some(60)), (HomRef, Some(60))]",
        ]
        "#);

        Ok(())
    }

    #[test]
    fn read_structural_variants() -> Result<(), anyhow::Error> {
        let calls = VcfCallReader::from_path("tests/data/vcf/trio1.sv.vcf")?
            .collect::<Result<Vec<_>, _>>()?;
        let svs = calls
            .iter()
            .map(|call| match &call.kind {
                VariantKind::Structural(sv) => (
                    call.pos,
                    sv.sv_type,
                    sv.end_chrom.clone(),
                    sv.end,
                    sv.ci_start,
                ),
                VariantKind::Short(_) => panic!("unexpected short variant"),
            })
            .collect::<Vec<_>>();

        assert_eq!(
            svs,
            vec![
                (1000, SvType::Del, String::from("1"), 2000, Some((-10, 10))),
                (5000, SvType::Dup, String::from("1"), 5300, None),
                (8000, SvType::Bnd, String::from("2"), 3000, None),
                (9000, SvType::Ins, String::from("1"), 9000, None),
            ]
        );

        Ok(())
    }

    #[test]
    fn unsorted_input() -> Result<(), anyhow::Error> {
        let results = VcfCallReader::from_path("tests/data/vcf/unsorted.vcf")?.collect::<Vec<_>>();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(VcfError::Unsorted {
                pos: 100,
                prev_pos: 200,
                ..
            })
        ));

        Ok(())
    }

    #[test]
    fn chromosome_revisited() -> Result<(), anyhow::Error> {
        let results =
            VcfCallReader::from_path("tests/data/vcf/chrom_revisited.vcf")?.collect::<Vec<_>>();
        assert_eq!(results.len(), 3);
        assert!(results[..2].iter().all(|result| result.is_ok()));
        assert!(matches!(
            &results[2],
            Err(VcfError::ChromosomeRevisited { chrom, pos: 300 }) if chrom == "1"
        ));

        Ok(())
    }

    #[test]
    fn invalid_genotype_index() -> Result<(), anyhow::Error> {
        let results =
            VcfCallReader::from_path("tests/data/vcf/bad_genotype.vcf")?.collect::<Vec<_>>();
        assert!(matches!(
            results.as_slice(),
            [Err(VcfError::InvalidGenotype { .. })]
        ));

        Ok(())
    }

    #[test]
    fn sites() -> Result<(), anyhow::Error> {
        let sites = read_sites("tests/data/vcf/profile_sites.vcf")?;
        assert_eq!(
            sites,
            vec![
                SeqvarKey::new("1", 100, "A", "G"),
                SeqvarKey::new("1", 400, "T", "A"),
                SeqvarKey::new("1", 600, "C", "G"),
            ]
        );

        Ok(())
    }
}

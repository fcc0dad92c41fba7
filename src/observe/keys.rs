//! Canonical identities of variants in the observation store.
//!
//! Short variants are identified exactly by `CHROM-POS-REF-ALT`.  Structural
//! variants are located by a range query on chromosome, type and start
//! followed by the window predicate on start and end.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::observe::model::{SvType, VariantCall, VariantKind};

/// Default tolerance window for structural variant breakpoints.
pub const DEFAULT_MAX_WINDOW: u32 = 2000;

/// Convert chromosome to key in RocksDB.
///
/// The `chr` prefix is stripped, `M` maps to `MT`, and the canonical single
/// character names are padded so that keys sort in karyotypic order.  Other
/// contig names are kept as they are.
pub fn chrom_name_to_key(name: &str) -> String {
    let chrom = name.strip_prefix("chr").unwrap_or(name);
    match chrom {
        "M" | "MT" => String::from("MT"),
        "X" | "Y" => format!(" {chrom}"),
        _ if chrom.len() == 1 => format!("0{chrom}"),
        _ => String::from(chrom),
    }
}

/// Convert from RocksDB chromosome key part to chromosome name.
pub fn chrom_key_to_name(key: &str) -> String {
    if key.len() == 2 && (key.starts_with('0') || key.starts_with(' ')) {
        key[1..].to_string()
    } else {
        key.to_string()
    }
}

/// Identity of a short variant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeqvarKey {
    pub chrom: String,
    pub pos: u32,
    pub reference: String,
    pub alternative: String,
}

impl SeqvarKey {
    pub fn new(chrom: &str, pos: u32, reference: &str, alternative: &str) -> Self {
        Self {
            chrom: chrom_key_to_name(&chrom_name_to_key(chrom)),
            pos,
            reference: reference.to_ascii_uppercase(),
            alternative: alternative.to_ascii_uppercase(),
        }
    }
}

impl std::fmt::Display for SeqvarKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.chrom, self.pos, self.reference, self.alternative
        )
    }
}

impl std::str::FromStr for SeqvarKey {
    type Err = anyhow::Error;

    /// Parse from `CHROM-POS-REF-ALT` or `CHROM:POS:REF:ALT`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = s.split(['-', ':']).collect::<Vec<_>>();
        if tokens.len() != 4 {
            anyhow::bail!("invalid short variant {:?}, expected CHROM-POS-REF-ALT", s);
        }
        let pos = tokens[1]
            .parse::<u32>()
            .map_err(|e| anyhow::anyhow!("invalid position in {:?}: {}", s, e))?;
        Ok(Self::new(tokens[0], pos, tokens[2], tokens[3]))
    }
}

impl From<&SeqvarKey> for Vec<u8> {
    fn from(val: &SeqvarKey) -> Self {
        let mut result = Vec::new();

        result.extend_from_slice(chrom_name_to_key(&val.chrom).as_bytes());
        result.push(b'\0');
        result.extend_from_slice(&val.pos.to_be_bytes());
        result.extend_from_slice(val.reference.as_bytes());
        result.push(b'>');
        result.extend_from_slice(val.alternative.as_bytes());

        result
    }
}

/// Identity of a structural variant record: the canonical breakpoints it was created with.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StrucvarKey {
    pub chrom: String,
    pub sv_type: SvType,
    pub start: u32,
    pub end: u32,
    pub end_chrom: String,
}

impl StrucvarKey {
    pub fn new(chrom: &str, sv_type: SvType, start: u32, end: u32, end_chrom: &str) -> Self {
        Self {
            chrom: chrom_key_to_name(&chrom_name_to_key(chrom)),
            sv_type,
            start,
            end,
            end_chrom: chrom_key_to_name(&chrom_name_to_key(end_chrom)),
        }
    }

    /// Sum of absolute breakpoint deltas to `other`.
    pub fn distance(&self, other: &StrucvarKey) -> u64 {
        u64::from(self.start.abs_diff(other.start)) + u64::from(self.end.abs_diff(other.end))
    }
}

impl std::fmt::Display for StrucvarKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.chrom == self.end_chrom {
            write!(
                f,
                "{}:{}-{}:{}",
                self.chrom, self.start, self.end, self.sv_type
            )
        } else {
            write!(
                f,
                "{}:{}-{}:{}:{}",
                self.chrom, self.start, self.end_chrom, self.end, self.sv_type
            )
        }
    }
}

/// Key prefix shared by all structural variants of one type on one chromosome.
pub fn strucvar_prefix(chrom: &str, sv_type: SvType) -> Vec<u8> {
    let mut result = Vec::new();
    result.extend_from_slice(chrom_name_to_key(chrom).as_bytes());
    result.push(b'\0');
    result.push(sv_type.code());
    result
}

impl From<&StrucvarKey> for Vec<u8> {
    fn from(val: &StrucvarKey) -> Self {
        let mut result = strucvar_prefix(&val.chrom, val.sv_type);

        result.extend_from_slice(&val.start.to_be_bytes());
        result.extend_from_slice(&val.end.to_be_bytes());
        result.extend_from_slice(chrom_name_to_key(&val.end_chrom).as_bytes());

        result
    }
}

/// Decode the start position from the bytes of a structural variant key with `prefix`.
pub fn strucvar_start_from_key(prefix: &[u8], key: &[u8]) -> Option<u32> {
    let bytes = key.strip_prefix(prefix)?.get(0..4)?;
    Some(u32::from_be_bytes(bytes.try_into().ok()?))
}

/// Identity of any record in the observation store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKey {
    Seqvar(SeqvarKey),
    Strucvar(StrucvarKey),
}

impl VariantKey {
    /// Byte representation in the respective column family.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            VariantKey::Seqvar(key) => key.into(),
            VariantKey::Strucvar(key) => key.into(),
        }
    }

    pub fn is_strucvar(&self) -> bool {
        matches!(self, VariantKey::Strucvar(_))
    }
}

impl std::fmt::Display for VariantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VariantKey::Seqvar(key) => key.fmt(f),
            VariantKey::Strucvar(key) => key.fmt(f),
        }
    }
}

/// Range query for structural variant candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrucvarQuery {
    pub chrom: String,
    pub sv_type: SvType,
    pub start_range: RangeInclusive<u32>,
    /// Exact coordinates of the call, used for a new record if nothing matches.
    pub proposal: StrucvarKey,
}

/// Builds keys and structural variant match predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantKeyBuilder {
    max_window: u32,
}

impl Default for VariantKeyBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WINDOW)
    }
}

impl VariantKeyBuilder {
    pub fn new(max_window: u32) -> Self {
        Self { max_window }
    }

    pub fn max_window(&self) -> u32 {
        self.max_window
    }

    /// Exact key of a short variant call, `None` for structural variants.
    pub fn seqvar(&self, call: &VariantCall) -> Option<SeqvarKey> {
        match &call.kind {
            VariantKind::Short(short) => Some(SeqvarKey::new(
                &call.chrom,
                call.pos,
                &short.reference,
                &short.alternative,
            )),
            VariantKind::Structural(_) => None,
        }
    }

    /// Candidate range query of a structural variant call, `None` for short variants.
    pub fn strucvar_query(&self, call: &VariantCall) -> Option<StrucvarQuery> {
        match &call.kind {
            VariantKind::Short(_) => None,
            VariantKind::Structural(sv) => {
                let proposal =
                    StrucvarKey::new(&call.chrom, sv.sv_type, call.pos, sv.end, &sv.end_chrom);
                Some(StrucvarQuery {
                    chrom: proposal.chrom.clone(),
                    sv_type: sv.sv_type,
                    start_range: call.pos.saturating_sub(self.max_window)
                        ..=call.pos.saturating_add(self.max_window),
                    proposal,
                })
            }
        }
    }

    /// Whether the stored `candidate` matches the call described by `proposal`.
    pub fn matches(&self, proposal: &StrucvarKey, candidate: &StrucvarKey) -> bool {
        proposal.chrom == candidate.chrom
            && proposal.sv_type == candidate.sv_type
            && proposal.end_chrom == candidate.end_chrom
            && proposal.start.abs_diff(candidate.start) <= self.max_window
            && proposal.end.abs_diff(candidate.end) <= self.max_window
    }

    /// Pick the best matching candidate for `proposal`.
    ///
    /// Smallest summed breakpoint distance wins; ties go to the lowest key.
    pub fn best_match<'a, I>(&self, proposal: &StrucvarKey, candidates: I) -> Option<StrucvarKey>
    where
        I: IntoIterator<Item = &'a StrucvarKey>,
    {
        candidates
            .into_iter()
            .filter(|candidate| self.matches(proposal, candidate))
            .min_by(|a, b| {
                proposal
                    .distance(a)
                    .cmp(&proposal.distance(b))
                    .then_with(|| Vec::<u8>::from(*a).cmp(&Vec::<u8>::from(*b)))
            })
            .cloned()
    }

    /// Key under which the call is recorded: the best match or the call's own coordinates.
    pub fn resolve<'a, I>(&self, proposal: &StrucvarKey, candidates: I) -> StrucvarKey
    where
        I: IntoIterator<Item = &'a StrucvarKey>,
    {
        self.best_match(proposal, candidates)
            .unwrap_or_else(|| proposal.clone())
    }
}

//! Error types of the observation engine.
//!
//! The engine distinguishes between inconsistencies of the case description
//! (`CaseError`), malformed variant input (`VcfError`), failures of the
//! persistence layer (`StoreError`), and sample identity problems
//! (`ProfileError`).  All of them abort the current load or delete.

/// Inconsistency between pedigree, variant input, and the case registry.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CaseError {
    #[error("neither a family file nor a case id was given")]
    MissingCaseId,
    #[error("case id {0:?} is empty or contains a NUL byte")]
    InvalidCaseId(String),
    #[error("family files of type {0} are not supported, use ped")]
    UnsupportedFamilyType(String),
    #[error("the family file does not declare any individuals")]
    EmptyPedigree,
    #[error("the family file describes more than one family: {0:?}")]
    MultipleFamilies(Vec<String>),
    #[error("individuals {0:?} from the family file are missing in the VCF header")]
    UnknownSamples(Vec<String>),
    #[error("no samples to inspect for case {0}")]
    NoSamples(String),
    #[error("the VCF files disagree on the samples of case {0}")]
    SampleMismatch(String),
    #[error("case {0} is already loaded")]
    AlreadyLoaded(String),
    #[error("case {0} was never loaded")]
    NotLoaded(String),
    #[error("case {0} was loaded without case attribution and cannot be deleted")]
    NotAttributed(String),
}

/// Malformed variant record input.
#[derive(thiserror::Error, Debug)]
pub enum VcfError {
    #[error("problem reading VCF: {0}")]
    Io(#[from] std::io::Error),
    #[error("record at {chrom}:{pos} has an invalid position")]
    InvalidPosition { chrom: String, pos: usize },
    #[error("record at {chrom}:{pos} has invalid alleles {reference:?} > {alternative:?}")]
    InvalidAlleles {
        chrom: String,
        pos: u32,
        reference: String,
        alternative: String,
    },
    #[error("record at {chrom}:{pos} comes after {chrom}:{prev_pos}, input is not sorted")]
    Unsorted {
        chrom: String,
        pos: u32,
        prev_pos: u32,
    },
    #[error("record at {chrom}:{pos} returns to a chromosome that was already finished, input is not sorted")]
    ChromosomeRevisited { chrom: String, pos: u32 },
    #[error("record at {chrom}:{pos} has an invalid genotype for sample {sample}: {reason}")]
    InvalidGenotype {
        chrom: String,
        pos: u32,
        sample: String,
        reason: String,
    },
    #[error("record at {chrom}:{pos} has an unknown SV type {value:?}")]
    InvalidSvType {
        chrom: String,
        pos: u32,
        value: String,
    },
    #[error("record at {chrom}:{pos} has an SV end {end} before its start")]
    InvalidSvEnd { chrom: String, pos: u32, end: u32 },
    #[error("record at {chrom}:{pos} has a malformed breakend {value:?}")]
    InvalidBreakend {
        chrom: String,
        pos: u32,
        value: String,
    },
}

/// Failure surfaced by the persistence layer.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("RocksDB error: {0}")]
    Rocks(#[from] rocksdb::Error),
    #[error("could not (de-)serialize stored value: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing column family {0}")]
    MissingColumnFamily(String),
    #[error("stored record violates invariant: {0}")]
    Corrupt(String),
    #[error("a store lock was poisoned by a panicking writer")]
    Poisoned,
}

/// Problems with sample profiling.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ProfileError {
    #[error("profile threshold {0} is outside of [0, 1]")]
    InvalidThreshold(f64),
    #[error("the profile panel does not contain any sites")]
    EmptyPanel,
    #[error(
        "profile of case {case_id} has {nr_calls} calls for individual {individual} but {nr_sites} sites"
    )]
    Malformed {
        case_id: String,
        individual: String,
        nr_calls: usize,
        nr_sites: usize,
    },
    #[error(
        "profile of case {case_id} has similarity {similarity:.3} to the stored profile, below threshold {threshold}"
    )]
    Mismatch {
        case_id: String,
        similarity: f64,
        threshold: f64,
    },
}

/// Umbrella error of the engine operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Case(#[from] CaseError),
    #[error(transparent)]
    Vcf(#[from] VcfError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::Poisoned
    }
}

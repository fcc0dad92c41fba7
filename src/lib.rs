//! Local observation database for short and structural variants.
//!
//! Cases are loaded from VCF files together with an optional PED file.  Each
//! variant observed in a case with sufficient genotype quality increments the
//! observation counts of its record; structural variants are matched against
//! existing records within a breakpoint window.  Loads record the keys they
//! touch so that a case can be deleted again, also after an interrupted load.

pub mod common;
pub mod db;
pub mod delete;
pub mod error;
pub mod load;
pub mod observe;
pub mod ped;
pub mod query;
pub mod vcf;

pub use error::Error;

/// Information about the build.
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

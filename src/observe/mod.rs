//! The observation matching engine: what counts as an observation and how it is keyed.

pub mod gate;
pub mod keys;
pub mod model;
pub mod profile;

//! An implementation of the HyperLogLog++ algorithm for cardinality
//! estimation.
//!
//! HyperLogLog++ is a probabilistic algorithm for estimating the number
//! of *distinct* elements (*cardinality*) of a multiset with bounded
//! relative error and sub-linear space, described by S. Heule et al. in
//! *HyperLogLog in Practice: Algorithmic Engineering of a State of The
//! Art Cardinality Estimation Algorithm*.
//!
//! Small multisets are kept in a compact sparse representation at an
//! elevated precision; once that stops being smaller than the packed
//! dense register array the sketch migrates, one-way, to dense. The
//! estimate is bias corrected in the regime where the raw formula is
//! known to overestimate.
//!
//! Elements are added as byte strings, hashed by a configurable 64-bit
//! hashing strategy (SHA-1 by default):
//!
//! ```
//! use hllpp::HyperLogLogPlus;
//!
//! let mut sketch = HyperLogLogPlus::new();
//!
//! sketch.add(b"barclay");
//! sketch.add(b"reginald");
//! sketch.add(b"barclay");
//! sketch.add(b"broccoli");
//!
//! assert_eq!(sketch.count(), 3);
//! ```

#![cfg_attr(feature = "bench-units", feature(test))]

use std::fmt;

mod common;
mod constants;
mod encoding;
mod hasher;
mod hyperloglogplus;
mod pipeline;
mod serialize;

pub use crate::hasher::{DefaultHasher, DigestHasher, Hasher64};
pub use crate::hyperloglogplus::{Builder, HyperLogLogPlus};

/// The errors surfaced by sketch construction, merging and
/// deserialization.
#[derive(Debug, PartialEq, Eq)]
pub enum HyperLogLogError {
    /// The precision or sparse precision is out of bounds.
    InvalidPrecision { precision: u8, sparse_precision: u8 },
    /// The hasher's digest is smaller than eight bytes.
    HasherTooShort(usize),
    /// Merging requires equal precisions and hasher configurations.
    IncompatibleSketches,
    /// The serialized data is shorter than the fixed header.
    DataTooShort(usize),
    /// The serialized data carries an unsupported format version.
    UnknownVersion(u16),
    /// The length header does not match the data.
    LengthMismatch { header: u32, actual: usize },
    /// The bits-per-register field is not 5 or 6.
    InvalidRegisterWidth(u8),
    /// The dense payload does not match the register array size.
    PayloadSizeMismatch { expected: usize, actual: usize },
    /// The data was serialized with an explicitly configured hasher.
    CustomHasherRequired,
    /// The data was serialized with the default hasher.
    DefaultHasherRequired,
}

impl fmt::Display for HyperLogLogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HyperLogLogError::InvalidPrecision {
                precision,
                sparse_precision,
            } => {
                write!(
                    f,
                    "invalid precision (p: {}, p': {})",
                    precision, sparse_precision
                )
            },
            HyperLogLogError::HasherTooShort(len) => {
                write!(f, "hasher output too short ({} bytes)", len)
            },
            HyperLogLogError::IncompatibleSketches => {
                "precisions and hashers must be equal.".fmt(f)
            },
            HyperLogLogError::DataTooShort(len) => {
                write!(f, "data too short ({} bytes)", len)
            },
            HyperLogLogError::UnknownVersion(version) => {
                write!(f, "unknown version: {}", version)
            },
            HyperLogLogError::LengthMismatch { header, actual } => {
                write!(f, "length mismatch: header says {}, was {}", header, actual)
            },
            HyperLogLogError::InvalidRegisterWidth(width) => {
                write!(f, "invalid bits per register: {}", width)
            },
            HyperLogLogError::PayloadSizeMismatch { expected, actual } => {
                write!(
                    f,
                    "payload size mismatch: expected {} bytes, was {}",
                    expected, actual
                )
            },
            HyperLogLogError::CustomHasherRequired => {
                "must deserialize using deserialize_with_hasher".fmt(f)
            },
            HyperLogLogError::DefaultHasherRequired => {
                "must deserialize using deserialize".fmt(f)
            },
        }
    }
}

impl std::error::Error for HyperLogLogError {}

//! The sketch's binary wire format.
//!
//! All header fields are big-endian:
//!
//! ```text
//! offset size field
//!   0     2   version            = 1
//!   2     4   total length       = 15 + payload
//!   6     2   flags: bit0 = sparse, bit1 = default hasher
//!   8     1   precision
//!   9     1   sparse precision
//!  10     4   sparse length      (0 if dense)
//!  14     1   bits per register  (0 if sparse)
//!  15     -   payload            (sparse store bytes or packed registers)
//! ```

use crate::common::Registers;
use crate::encoding::SparseVec;
use crate::hasher::{DefaultHasher, Hasher64};
use crate::hyperloglogplus::{validate_config, HyperLogLogPlus, State};
use crate::HyperLogLogError;

const VERSION: u16 = 1;
const HEADER_SIZE: usize = 15;

const FLAG_SPARSE: u16 = 1;
const FLAG_DEFAULT_HASHER: u16 = 2;

impl<H> HyperLogLogPlus<H>
where
    H: Hasher64,
{
    /// Serializes the sketch into a byte vector.
    ///
    /// In sparse representation the temporary buffer is merged first, so
    /// the call mutates internal buffers. Sketches configured with an
    /// explicit hasher must be deserialized via
    /// [`deserialize_with_hasher`].
    ///
    /// [`deserialize_with_hasher`]: HyperLogLogPlus::deserialize_with_hasher
    pub fn serialize(&mut self) -> Vec<u8> {
        if self.is_sparse() {
            self.merge_sparse();
        }

        let (mut flags, sparse_length, bits_per_register, payload): (u16, u32, u8, &[u8]) =
            match &self.state {
                State::Sparse { store, .. } => (FLAG_SPARSE, store.count(), 0, store.bytes()),
                State::Dense { registers } => (0, 0, registers.width(), registers.bytes()),
            };

        if self.default_hasher {
            flags |= FLAG_DEFAULT_HASHER;
        }

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());

        buf.extend_from_slice(&VERSION.to_be_bytes());
        buf.extend_from_slice(&((HEADER_SIZE + payload.len()) as u32).to_be_bytes());
        buf.extend_from_slice(&flags.to_be_bytes());
        buf.push(self.precision);
        buf.push(self.sparse_precision);
        buf.extend_from_slice(&sparse_length.to_be_bytes());
        buf.push(bits_per_register);
        buf.extend_from_slice(payload);

        buf
    }

    /// Deserializes a sketch that was serialized with an explicitly
    /// configured hasher, which must be supplied again.
    pub fn deserialize_with_hasher(data: &[u8], hasher: H) -> Result<Self, HyperLogLogError> {
        let sketch = deserialize_any(data, hasher)?;

        if sketch.default_hasher {
            return Err(HyperLogLogError::DefaultHasherRequired);
        }

        Ok(sketch)
    }
}

impl HyperLogLogPlus<DefaultHasher> {
    /// Deserializes a sketch that was serialized with the default
    /// hasher.
    pub fn deserialize(data: &[u8]) -> Result<Self, HyperLogLogError> {
        let sketch = deserialize_any(data, DefaultHasher::new())?;

        if !sketch.default_hasher {
            return Err(HyperLogLogError::CustomHasherRequired);
        }

        Ok(sketch)
    }
}

fn deserialize_any<H>(data: &[u8], hasher: H) -> Result<HyperLogLogPlus<H>, HyperLogLogError>
where
    H: Hasher64,
{
    if data.len() < HEADER_SIZE {
        return Err(HyperLogLogError::DataTooShort(data.len()));
    }

    let version = u16::from_be_bytes([data[0], data[1]]);

    if version != VERSION {
        return Err(HyperLogLogError::UnknownVersion(version));
    }

    let total = u32::from_be_bytes([data[2], data[3], data[4], data[5]]);

    if total as usize != data.len() {
        return Err(HyperLogLogError::LengthMismatch {
            header: total,
            actual: data.len(),
        });
    }

    let flags = u16::from_be_bytes([data[6], data[7]]);
    let precision = data[8];
    let sparse_precision = data[9];
    let sparse_length = u32::from_be_bytes([data[10], data[11], data[12], data[13]]);
    let bits_per_register = data[14];

    validate_config(precision, sparse_precision, hasher.output_len())?;

    let payload = &data[HEADER_SIZE..];

    let state = if flags & FLAG_SPARSE != 0 {
        State::Sparse {
            store: SparseVec::from_parts(payload.to_vec(), sparse_length),
            tmp:   Vec::new(),
        }
    } else {
        if bits_per_register != 5 && bits_per_register != 6 {
            return Err(HyperLogLogError::InvalidRegisterWidth(bits_per_register));
        }

        let count = 1u32 << precision;
        let expected = Registers::size_in_bytes(count, bits_per_register);

        if payload.len() != expected {
            return Err(HyperLogLogError::PayloadSizeMismatch {
                expected,
                actual: payload.len(),
            });
        }

        State::Dense {
            registers: Registers::from_parts(payload.to_vec(), bits_per_register, count),
        }
    };

    Ok(HyperLogLogPlus::from_parts(
        hasher,
        flags & FLAG_DEFAULT_HASHER != 0,
        precision,
        sparse_precision,
        state,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Builder, DigestHasher};

    struct PassThroughHasher;

    impl Hasher64 for PassThroughHasher {
        fn output_len(&self) -> usize {
            8
        }

        fn sum64(&mut self, data: &[u8]) -> u64 {
            let mut word = [0u8; 8];
            word.copy_from_slice(&data[..8]);
            u64::from_be_bytes(word)
        }
    }

    fn mix(i: u64) -> u64 {
        let mut z = i.wrapping_add(0x9e3779b97f4a7c15);
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    }

    fn roundtrip(sketch: &mut HyperLogLogPlus<DefaultHasher>) {
        let count = sketch.count();
        let data = sketch.serialize();

        let mut deserialized = HyperLogLogPlus::deserialize(&data).unwrap();

        assert_eq!(deserialized.count(), count);
        assert_eq!(deserialized.serialize(), data);
        assert_eq!(deserialized.is_sparse(), sketch.is_sparse());
    }

    #[test]
    fn test_roundtrip_default_hasher() {
        let mut sketch = HyperLogLogPlus::new();

        roundtrip(&mut sketch);

        sketch.add(b"damogran");

        roundtrip(&mut sketch);

        for i in 0..1000u64 {
            sketch.add(&i.to_be_bytes());
        }

        assert!(sketch.is_sparse());

        roundtrip(&mut sketch);

        for i in 0..100_000u64 {
            sketch.add(&i.to_be_bytes());
        }

        assert!(!sketch.is_sparse());

        roundtrip(&mut sketch);
    }

    #[test]
    fn test_roundtrip_resumes_adds() {
        let mut sketch = Builder::new()
            .precision(14)
            .hasher(PassThroughHasher)
            .build()
            .unwrap();

        for n in 0..20_000u64 {
            sketch.add(&mix(n).to_be_bytes());
        }

        let data = sketch.serialize();

        let mut deserialized =
            HyperLogLogPlus::deserialize_with_hasher(&data, PassThroughHasher).unwrap();

        for n in 20_000..40_000u64 {
            sketch.add(&mix(n).to_be_bytes());
            deserialized.add(&mix(n).to_be_bytes());
        }

        assert_eq!(sketch.count(), deserialized.count());
    }

    #[test]
    fn test_header_layout() {
        let mut sketch = HyperLogLogPlus::new();

        sketch.add(b"hobbledehoyhood");

        let data = sketch.serialize();

        // Version 1, total length, sparse and default hasher flags set,
        // p, p', one stored hash, no registers.
        assert_eq!(&data[0..2], &[0, 1]);
        assert_eq!(u32::from_be_bytes([data[2], data[3], data[4], data[5]]) as usize, data.len());
        assert_eq!(&data[6..8], &[0, 3]);
        assert_eq!(data[8], 14);
        assert_eq!(data[9], 25);
        assert_eq!(u32::from_be_bytes([data[10], data[11], data[12], data[13]]), 1);
        assert_eq!(data[14], 0);
    }

    #[test]
    fn test_deserialize_errors() {
        assert_eq!(
            HyperLogLogPlus::deserialize(&[]).err(),
            Some(HyperLogLogError::DataTooShort(0))
        );

        assert_eq!(
            HyperLogLogPlus::deserialize(&[0u8; 10]).err(),
            Some(HyperLogLogError::DataTooShort(10))
        );

        let mut sketch = HyperLogLogPlus::new();

        for i in 0..10_000u64 {
            sketch.add(&i.to_be_bytes());
        }

        let data = sketch.serialize();

        // Truncated payload no longer matches the length header.
        assert_eq!(
            HyperLogLogPlus::deserialize(&data[0..100]).err(),
            Some(HyperLogLogError::LengthMismatch {
                header: data.len() as u32,
                actual: 100,
            })
        );

        let mut bad_version = data.clone();
        bad_version[1] = 9;

        assert_eq!(
            HyperLogLogPlus::deserialize(&bad_version).err(),
            Some(HyperLogLogError::UnknownVersion(9))
        );

        let mut bad_precision = data.clone();
        bad_precision[8] = 30;

        assert_eq!(
            HyperLogLogPlus::deserialize(&bad_precision).err(),
            Some(HyperLogLogError::InvalidPrecision {
                precision:        30,
                sparse_precision: 25,
            })
        );
    }

    #[test]
    fn test_deserialize_dense_payload_checks() {
        let mut sketch = Builder::new()
            .precision(4)
            .hasher(PassThroughHasher)
            .build()
            .unwrap();

        for n in 0..200u64 {
            sketch.add(&mix(n).to_be_bytes());
        }

        assert!(!sketch.is_sparse());

        let data = sketch.serialize();

        let mut bad_width = data.clone();
        bad_width[14] = 7;

        assert_eq!(
            HyperLogLogPlus::<PassThroughHasher>::deserialize_with_hasher(
                &bad_width,
                PassThroughHasher
            )
            .err(),
            Some(HyperLogLogError::InvalidRegisterWidth(7))
        );

        let mut truncated = data.clone();
        truncated.pop();
        let total = (truncated.len() as u32).to_be_bytes();
        truncated[2..6].copy_from_slice(&total);

        let expected = truncated.len() - 15 + 1;

        assert_eq!(
            HyperLogLogPlus::<PassThroughHasher>::deserialize_with_hasher(
                &truncated,
                PassThroughHasher
            )
            .err(),
            Some(HyperLogLogError::PayloadSizeMismatch {
                expected,
                actual: expected - 1,
            })
        );
    }

    #[test]
    fn test_hasher_flag_checks() {
        let mut sketch = HyperLogLogPlus::new();

        // Serialized with the default hasher, refusing an explicit one.
        assert_eq!(
            HyperLogLogPlus::deserialize_with_hasher(
                &sketch.serialize(),
                DefaultHasher::new()
            )
            .err(),
            Some(HyperLogLogError::DefaultHasherRequired)
        );

        let mut sketch = Builder::new()
            .precision(12)
            .sparse_precision(20)
            .hasher(DigestHasher::<md5::Md5>::new())
            .build()
            .unwrap();

        sketch.add(b"gagh");

        // Serialized with an explicit hasher, refusing the default path.
        assert_eq!(
            HyperLogLogPlus::deserialize(&sketch.serialize()).err(),
            Some(HyperLogLogError::CustomHasherRequired)
        );

        let mut deserialized = HyperLogLogPlus::deserialize_with_hasher(
            &sketch.serialize(),
            DigestHasher::<md5::Md5>::new(),
        )
        .unwrap();

        assert_eq!(deserialized.count(), 1);
        assert_eq!(deserialized.serialize(), sketch.serialize());
    }
}

use digest::{Digest, FixedOutputReset};
use sha1::Sha1;

/// A hashing strategy used by the sketch to map added byte strings to
/// 64-bit values.
///
/// Implementations must produce digests of at least 8 bytes; only the
/// first 8 bytes, interpreted big-endian, are consumed. The hasher is
/// owned by a single sketch and may keep internal scratch state between
/// calls.
pub trait Hasher64 {
    /// The digest size in bytes.
    fn output_len(&self) -> usize;

    /// Hashes `data` and returns the first 8 digest bytes as a
    /// big-endian integer.
    fn sum64(&mut self, data: &[u8]) -> u64;
}

/// Adapts any [RustCrypto](https://github.com/RustCrypto/hashes) digest
/// into a [`Hasher64`].
///
/// # Examples
///
/// ```
/// use hllpp::{Builder, DigestHasher};
///
/// let mut sketch = Builder::new()
///     .precision(12)
///     .sparse_precision(20)
///     .hasher(DigestHasher::<sha1::Sha1>::new())
///     .build()
///     .unwrap();
///
/// sketch.add(b"kanar");
///
/// assert_eq!(sketch.count(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct DigestHasher<D> {
    digest: D,
}

impl<D> DigestHasher<D>
where
    D: Digest + FixedOutputReset + Default,
{
    pub fn new() -> Self {
        DigestHasher {
            digest: D::default(),
        }
    }
}

impl<D> Hasher64 for DigestHasher<D>
where
    D: Digest + FixedOutputReset,
{
    #[inline]
    fn output_len(&self) -> usize {
        <D as Digest>::output_size()
    }

    #[inline]
    fn sum64(&mut self, data: &[u8]) -> u64 {
        Digest::update(&mut self.digest, data);

        let digest = self.digest.finalize_reset();

        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);

        u64::from_be_bytes(word)
    }
}

/// The hasher used by sketches that were not configured with an explicit
/// one: SHA-1.
pub type DefaultHasher = DigestHasher<Sha1>;

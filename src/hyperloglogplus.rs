use std::fmt;

use crate::common::{self, BitExtract, Registers};
use crate::constants;
use crate::encoding::{SparseVec, SparseWriter};
use crate::hasher::{DefaultHasher, Hasher64};
use crate::HyperLogLogError;

// Minimum dense precision allowed.
pub(crate) const MIN_PRECISION: u8 = 4;
// Maximum dense precision allowed.
pub(crate) const MAX_PRECISION: u8 = 16;
// Maximum precision in sparse representation. At 25, encoded hashes fit
// in 32 bits.
pub(crate) const MAX_SPARSE_PRECISION: u8 = 25;

// Defaults used by `HyperLogLogPlus::new`.
const DEFAULT_PRECISION: u8 = 14;
const DEFAULT_SPARSE_PRECISION: u8 = 25;

/// Implements the HyperLogLog++ algorithm for cardinality estimation.
///
/// This implementation is based on the paper:
///
/// *HyperLogLog in Practice: Algorithmic Engineering of a State of The Art
/// Cardinality Estimation Algorithm.*
///
/// Small multisets are held in a compact sparse representation at an
/// elevated precision and migrated to the packed dense register array
/// once the sparse form stops paying for itself.
///
/// A sketch is not safe to share between threads without external
/// synchronization; the hasher it owns is mutated on every [`add`].
///
/// [`add`]: HyperLogLogPlus::add
///
/// # Examples
///
/// ```
/// use hllpp::HyperLogLogPlus;
///
/// let mut sketch = HyperLogLogPlus::new();
///
/// sketch.add(b"venus");
/// sketch.add(b"mars");
/// sketch.add(b"venus");
///
/// assert_eq!(sketch.count(), 2);
/// ```
pub struct HyperLogLogPlus<H = DefaultHasher>
where
    H: Hasher64,
{
    pub(crate) hasher:           H,
    pub(crate) default_hasher:   bool,
    pub(crate) precision:        u8,
    pub(crate) sparse_precision: u8,
    pub(crate) state:            State,
}

// The sketch's representation. The transition from sparse to dense is
// one-way.
#[derive(Clone, Debug)]
pub(crate) enum State {
    Sparse { store: SparseVec, tmp: Vec<u32> },
    Dense { registers: Registers },
}

impl State {
    fn sparse() -> State {
        State::Sparse {
            store: SparseVec::new(),
            tmp:   Vec::new(),
        }
    }
}

/// Configures and creates a [`HyperLogLogPlus`] sketch.
///
/// All fields are optional: the defaults are precision 14, sparse
/// precision 25 and the SHA-1 hasher.
///
/// # Examples
///
/// ```
/// use hllpp::{Builder, DigestHasher};
///
/// let mut sketch = Builder::new()
///     .precision(12)
///     .sparse_precision(14)
///     .hasher(DigestHasher::<md5::Md5>::new())
///     .build()
///     .unwrap();
///
/// sketch.add(b"qapla'");
///
/// assert_eq!(sketch.count(), 1);
/// ```
pub struct Builder<H = DefaultHasher> {
    precision:        u8,
    sparse_precision: u8,
    hasher:           H,
    default_hasher:   bool,
}

impl Builder<DefaultHasher> {
    pub fn new() -> Builder<DefaultHasher> {
        Builder {
            precision:        DEFAULT_PRECISION,
            sparse_precision: DEFAULT_SPARSE_PRECISION,
            hasher:           DefaultHasher::new(),
            default_hasher:   true,
        }
    }
}

impl Default for Builder<DefaultHasher> {
    fn default() -> Self {
        Builder::new()
    }
}

impl<H> Builder<H>
where
    H: Hasher64,
{
    /// Sets the dense precision p, in `[4, 16]`.
    pub fn precision(mut self, precision: u8) -> Self {
        self.precision = precision;
        self
    }

    /// Sets the sparse precision p', in `[p, 25]`.
    pub fn sparse_precision(mut self, sparse_precision: u8) -> Self {
        self.sparse_precision = sparse_precision;
        self
    }

    /// Replaces the default SHA-1 hasher.
    pub fn hasher<H2>(self, hasher: H2) -> Builder<H2>
    where
        H2: Hasher64,
    {
        Builder {
            precision: self.precision,
            sparse_precision: self.sparse_precision,
            hasher,
            default_hasher: false,
        }
    }

    /// Validates the configuration and creates the sketch.
    pub fn build(self) -> Result<HyperLogLogPlus<H>, HyperLogLogError> {
        validate_config(
            self.precision,
            self.sparse_precision,
            self.hasher.output_len(),
        )?;

        Ok(HyperLogLogPlus {
            hasher:           self.hasher,
            default_hasher:   self.default_hasher,
            precision:        self.precision,
            sparse_precision: self.sparse_precision,
            state:            State::sparse(),
        })
    }
}

// Checks precision bounds and the hasher's digest size.
pub(crate) fn validate_config(
    precision: u8,
    sparse_precision: u8,
    output_len: usize,
) -> Result<(), HyperLogLogError> {
    if precision < MIN_PRECISION
        || precision > MAX_PRECISION
        || sparse_precision < precision
        || sparse_precision > MAX_SPARSE_PRECISION
    {
        return Err(HyperLogLogError::InvalidPrecision {
            precision,
            sparse_precision,
        });
    }

    if output_len < 8 {
        return Err(HyperLogLogError::HasherTooShort(output_len));
    }

    Ok(())
}

impl HyperLogLogPlus<DefaultHasher> {
    /// Creates a sketch with precision 14, sparse precision 25 and the
    /// default SHA-1 hasher.
    pub fn new() -> HyperLogLogPlus<DefaultHasher> {
        HyperLogLogPlus {
            hasher:           DefaultHasher::new(),
            default_hasher:   true,
            precision:        DEFAULT_PRECISION,
            sparse_precision: DEFAULT_SPARSE_PRECISION,
            state:            State::sparse(),
        }
    }
}

impl Default for HyperLogLogPlus<DefaultHasher> {
    fn default() -> Self {
        HyperLogLogPlus::new()
    }
}

impl<H> HyperLogLogPlus<H>
where
    H: Hasher64,
{
    // Rebuilds a sketch from deserialized parts. The configuration must
    // have been validated.
    pub(crate) fn from_parts(
        hasher: H,
        default_hasher: bool,
        precision: u8,
        sparse_precision: u8,
        state: State,
    ) -> HyperLogLogPlus<H> {
        HyperLogLogPlus {
            hasher,
            default_hasher,
            precision,
            sparse_precision,
            state,
        }
    }

    #[inline] // Returns the number of dense registers.
    pub(crate) fn register_count(&self) -> u32 {
        1 << self.precision
    }

    #[inline] // Returns the number of virtual sparse registers.
    fn sparse_register_count(&self) -> u32 {
        1 << self.sparse_precision
    }

    #[inline] // Returns true while the sketch uses the sparse
              // representation.
    pub(crate) fn is_sparse(&self) -> bool {
        matches!(self.state, State::Sparse { .. })
    }

    #[inline]
    pub(crate) fn codec(&self) -> HashCodec {
        HashCodec {
            precision:        self.precision,
            sparse_precision: self.sparse_precision,
        }
    }

    /// Adds `value` to the multiset.
    pub fn add(&mut self, value: &[u8]) {
        let x = self.hasher.sum64(value);
        self.add_hash(x);
    }

    fn add_hash(&mut self, x: u64) {
        let p = self.precision as u32;
        let m = self.register_count();
        let codec = self.codec();

        let flush = match &mut self.state {
            State::Sparse { tmp, .. } => {
                tmp.push(codec.encode(x));

                // Merge once the buffer reaches a quarter of the dense
                // bit size.
                32 * tmp.len() as u32 >= 6 * m / 4
            },
            State::Dense { registers } => {
                let idx = (x >> (64 - p)) as u32;
                let rho = common::rho((x << p) | 1 << (p - 1));

                Self::set_dense(registers, idx, rho);

                false
            },
        };

        if flush {
            self.merge_sparse();

            // Is the merged sparse data bigger than the dense data
            // would be?
            if let State::Sparse { store, .. } = &self.state {
                if 8 * store.len() as u32 >= 6 * m {
                    self.sparse_to_normal();
                }
            }
        }
    }

    #[inline] // Stores `rho` if it is the new maximum for the register,
              // widening the array first when five bits cannot hold it.
    fn set_dense(registers: &mut Registers, idx: u32, rho: u8) {
        if rho > 31 && registers.width() == 5 {
            registers.widen();
        }

        if rho > registers.get(idx) {
            registers.set(idx, rho);
        }
    }

    /// Returns the current cardinality estimate.
    ///
    /// In sparse representation the temporary buffer is merged first, so
    /// the call mutates internal buffers.
    pub fn count(&mut self) -> u64 {
        if self.is_sparse() {
            self.merge_sparse();
        }

        match &self.state {
            State::Sparse { store, .. } => {
                let mp = self.sparse_register_count();

                common::linear_count(mp, mp - store.count())
            },
            State::Dense { registers } => {
                let m = self.register_count();

                let (raw, zeros) = common::estimate_raw(registers.iter(), m);

                if zeros > 0 {
                    let lc = common::linear_count(m, zeros);

                    // Use linear counting only below the crossover
                    // threshold for this precision.
                    if (lc as f64)
                        < constants::THRESHOLD_DATA[(self.precision - MIN_PRECISION) as usize]
                    {
                        return lc;
                    }
                }

                let mut est = raw;

                if est <= 5.0 * m as f64 {
                    est -= self.estimate_bias(est);
                }

                (est + 0.5) as u64
            },
        }
    }

    /// Merges `other` into `self`.
    ///
    /// Both sketches must have the same precision, sparse precision and
    /// hasher configuration. Merging can trigger the transition to the
    /// dense representation.
    pub fn merge<S>(&mut self, other: &HyperLogLogPlus<S>) -> Result<(), HyperLogLogError>
    where
        S: Hasher64,
    {
        if self.precision != other.precision
            || self.sparse_precision != other.sparse_precision
            || self.default_hasher != other.default_hasher
        {
            return Err(HyperLogLogError::IncompatibleSketches);
        }

        match &other.state {
            State::Sparse { store, tmp } => {
                if self.is_sparse() {
                    // Stage all of other's encoded hashes for a merge
                    // into our own store.
                    if let State::Sparse { tmp: own, .. } = &mut self.state {
                        own.extend_from_slice(tmp);

                        let mut reader = store.reader();
                        while !reader.done() {
                            own.push(reader.next());
                        }
                    }

                    self.merge_sparse();

                    let m = self.register_count();
                    if let State::Sparse { store, .. } = &self.state {
                        if 8 * store.len() as u32 >= 6 * m {
                            self.sparse_to_normal();
                        }
                    }
                } else {
                    // Decode other's entries at dense precision and
                    // fold them into the registers.
                    let codec = self.codec();
                    let precision = self.precision;

                    if let State::Dense { registers } = &mut self.state {
                        for &code in tmp {
                            let (idx, rho) = codec.decode(code, precision);
                            Self::set_dense(registers, idx, rho);
                        }

                        let mut reader = store.reader();
                        while !reader.done() {
                            let (idx, rho) = codec.decode(reader.next(), precision);
                            Self::set_dense(registers, idx, rho);
                        }
                    }
                }
            },
            State::Dense {
                registers: other_registers,
            } => {
                if self.is_sparse() {
                    self.merge_sparse();
                    self.sparse_to_normal();
                }

                if let State::Dense { registers } = &mut self.state {
                    for (idx, rho) in other_registers.iter().enumerate() {
                        Self::set_dense(registers, idx as u32, rho);
                    }
                }
            },
        }

        Ok(())
    }

    // Merges the temporary buffer into the sparse store with a two-way
    // streaming merge, deduplicating by sparse index and keeping the
    // entry with the largest rank.
    pub(crate) fn merge_sparse(&mut self) {
        let codec = self.codec();
        let pp = self.sparse_precision;

        let (store, tmp) = match &mut self.state {
            State::Sparse { store, tmp } => (store, tmp),
            State::Dense { .. } => return,
        };

        if tmp.is_empty() {
            return;
        }

        tmp.sort_unstable();

        let mut writer = SparseWriter::with_capacity(store.len());

        {
            let mut reader = store.reader();
            let mut ti = 0;

            // Deduping by index and choosing the biggest rank is
            // handled in the writer.
            while !reader.done() || ti < tmp.len() {
                if reader.done() {
                    let (idx, rho) = codec.decode(tmp[ti], pp);
                    writer.append(tmp[ti], idx, rho);
                    ti += 1;
                    continue;
                }

                let store_val = reader.peek();
                let (store_idx, store_rho) = codec.decode(store_val, pp);

                if ti == tmp.len() {
                    writer.append(store_val, store_idx, store_rho);
                    reader.advance();
                    continue;
                }

                let tmp_val = tmp[ti];
                let (tmp_idx, tmp_rho) = codec.decode(tmp_val, pp);

                if store_idx < tmp_idx {
                    writer.append(store_val, store_idx, store_rho);
                    reader.advance();
                } else if store_idx > tmp_idx {
                    writer.append(tmp_val, tmp_idx, tmp_rho);
                    ti += 1;
                } else {
                    if store_rho > tmp_rho {
                        writer.append(store_val, store_idx, store_rho);
                    } else {
                        writer.append(tmp_val, tmp_idx, tmp_rho);
                    }
                    reader.advance();
                    ti += 1;
                }
            }
        }

        *store = writer.finish();
        tmp.clear();
    }

    // Converts the sparse representation to the dense register array,
    // decoding every stored hash at the dense precision.
    pub(crate) fn sparse_to_normal(&mut self) {
        let codec = self.codec();
        let precision = self.precision;
        let m = self.register_count();

        let store = match &self.state {
            State::Sparse { store, .. } => store,
            State::Dense { .. } => return,
        };

        let mut width = 5;

        let registers = 'rebuild: loop {
            let mut registers = Registers::with_width(m, width);
            let mut reader = store.reader();

            while !reader.done() {
                let (idx, rho) = codec.decode(reader.next(), precision);

                if rho > 31 && width == 5 {
                    // A rank does not fit in five bits, rebuild wide.
                    width = 6;
                    continue 'rebuild;
                }

                if rho > registers.get(idx) {
                    registers.set(idx, rho);
                }
            }

            break registers;
        };

        self.state = State::Dense { registers };
    }

    // Returns an estimated bias correction based on empirical data.
    fn estimate_bias(&self, raw: f64) -> f64 {
        // Get a reference to raw estimates/biases for this precision.
        let biases = &constants::BIAS_DATA[(self.precision - MIN_PRECISION) as usize];
        let estimates = &constants::RAW_ESTIMATE_DATA[(self.precision - MIN_PRECISION) as usize];

        // Raw estimate is first/last in estimates. Return the first/last
        // bias.
        if raw <= estimates[0] {
            return biases[0];
        } else if estimates[estimates.len() - 1] <= raw {
            return biases[biases.len() - 1];
        }

        // Raw estimate is somewhere in between estimates.
        // Binary search for the calculated raw estimate.
        //
        // Here we unwrap because neither the values in `estimates`
        // nor `raw` are going to be NaN.
        let res = estimates.binary_search_by(|est| est.partial_cmp(&raw).unwrap());

        let (prv, idx) = match res {
            Ok(idx) => (idx - 1, idx),
            Err(idx) => (idx - 1, idx),
        };

        // Return linear interpolation between raw's neighboring points.
        let ratio = (raw - estimates[prv]) / (estimates[idx] - estimates[prv]);

        biases[prv] + ratio * (biases[idx] - biases[prv])
    }
}

impl<H> fmt::Debug for HyperLogLogPlus<H>
where
    H: Hasher64,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperLogLogPlus")
            .field("precision", &self.precision)
            .field("sparse_precision", &self.sparse_precision)
            .field("default_hasher", &self.default_hasher)
            .field("state", &self.state)
            .finish()
    }
}

// Packs a 64-bit hash into the 32-bit sparse word and back.
//
// The low bit of a word flags whether an explicit rank is stored. When
// the bits between the dense index and the sparse index are all zero,
// the dense rank cannot be recovered from the stored index alone and is
// carried in a six bit field.
#[derive(Clone, Copy)]
pub(crate) struct HashCodec {
    precision:        u8,
    sparse_precision: u8,
}

impl HashCodec {
    // Encodes the hash `x` as a 32-bit sparse word.
    pub fn encode(&self, x: u64) -> u32 {
        let (p, pp) = (self.precision, self.sparse_precision);

        let index = u64::extract(x, 64, 64 - pp);

        let dif = if pp == p {
            0
        } else {
            u64::extract(x, 64 - p, 64 - pp)
        };

        if dif == 0 {
            // The rank is computed over the hash bits below the sparse
            // index, with a guard bit keeping the shift meaningful.
            let low = u64::extract(x, 64 - pp, 0);
            let rho = common::rho((low << pp) | 1 << (pp - 1));

            return ((index as u32) << 7) | ((rho as u32) << 1) | 1;
        }

        (index << 1) as u32
    }

    // Returns the index with respect to `precision` and the rank with
    // respect to the dense precision. This way the sparse index can be
    // recovered cheaply when flushing the temporary buffer.
    pub fn decode(&self, code: u32, precision: u8) -> (u32, u8) {
        let (p, pp) = (self.precision, self.sparse_precision);

        let rho = if code & 1 > 0 {
            u32::extract(code, 7, 1) as u8 + (pp - p)
        } else {
            common::rho(((code as u64) | 1) << (64 - (pp as u32 + 1) + p as u32))
        };

        (self.index(code, precision), rho)
    }

    // Returns the index with respect to `precision`.
    fn index(&self, code: u32, precision: u8) -> u32 {
        let pp = self.sparse_precision;

        if code & 1 > 0 {
            u32::extract(code, 7 + pp, 7 + pp - precision)
        } else {
            u32::extract(code, pp + 1, 1 + pp - precision)
        }
    }
}

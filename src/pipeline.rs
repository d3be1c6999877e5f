//! Export into the Pipeline wire format.
//!
//! The preamble is little-endian: an encoding byte and three bytes of
//! padding, the precomputed cardinality as a u64, the precision byte and
//! three more bytes of padding, then the payload length as an i32. A
//! dense sketch ships its packed registers as-is; a sparse sketch is
//! converted to the explicit encoding, one u32 per entry holding
//! `(index << 8) | rank` with no difference encoding.

use crate::encoding::SparseVec;
use crate::hasher::Hasher64;
use crate::hyperloglogplus::{HyperLogLogPlus, State};

const ENCODING_DENSE: u8 = b'D';
const ENCODING_EXPLICIT: u8 = b'E';

const PREAMBLE_SIZE: usize = 20;

impl<H> HyperLogLogPlus<H>
where
    H: Hasher64,
{
    /// Exports the sketch in the Pipeline format.
    ///
    /// The cardinality is computed up front, so the sparse temporary
    /// buffer is merged and the export always uses a clean encoding.
    ///
    /// # Panics
    ///
    /// Panics if a sparse index needs more than 24 bits or a rank more
    /// than 8; both indicate a corrupted sketch.
    pub fn to_pipeline(&mut self) -> Vec<u8> {
        let card = self.count();

        let (encoding, precision, payload): (u8, u8, Vec<u8>) = match &self.state {
            State::Sparse { store, .. } => (
                ENCODING_EXPLICIT,
                self.sparse_precision,
                self.sparse_to_explicit(store),
            ),
            State::Dense { registers } => (ENCODING_DENSE, self.precision, registers.bytes().to_vec()),
        };

        let mut buf = Vec::with_capacity(PREAMBLE_SIZE + payload.len());

        buf.push(encoding);
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&card.to_le_bytes());
        buf.push(precision);
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&(payload.len() as i32).to_le_bytes());
        buf.extend_from_slice(&payload);

        buf
    }

    // Converts the sparse entries into the explicit encoding: 24 bits of
    // index and 8 bits of rank per entry.
    fn sparse_to_explicit(&self, store: &SparseVec) -> Vec<u8> {
        let codec = self.codec();
        let pp = self.sparse_precision;

        let mut out = Vec::with_capacity(4 * store.count() as usize);
        let mut reader = store.reader();

        while !reader.done() {
            let (index, rho) = codec.decode(reader.next(), pp);
            let rho = u32::from(rho);

            if rho > 0xff {
                panic!("register value would be truncated");
            } else if index > 0xffffff {
                panic!("register index would be truncated");
            }

            out.extend_from_slice(&((index << 8) | rho).to_le_bytes());
        }

        out
    }
}

use serde::{Deserialize, Serialize};

// Mask of the seven low bits carried by each varint byte.
const SEVEN_LSB_MASK: u32 = (1 << 7) - 1;

// Continuation marker on a varint byte.
const MSB_MASK: u8 = 1 << 7;

// A sorted sequence of difference encoded unsigned integers stored as
// variable length bytes.
//
// Each entry is the delta from the previously decoded value, LEB128
// encoded; the first entry is the value itself. Deltas use wrapping
// 32-bit arithmetic so decoding always recovers the exact values even
// when a merge emits them out of numeric order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SparseVec {
    // The encoded deltas.
    buf:   Vec<u8>,
    // The count of numbers stored.
    count: u32,
}

impl SparseVec {
    pub fn new() -> Self {
        SparseVec {
            buf:   Vec::new(),
            count: 0,
        }
    }

    // Rebuilds a sparse vector from its serialized parts.
    pub fn from_parts(buf: Vec<u8>, count: u32) -> Self {
        SparseVec { buf, count }
    }

    #[inline] // Returns the count of numbers in the vector.
    pub fn count(&self) -> u32 {
        self.count
    }

    #[inline] // Returns the encoded length in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    #[inline] // Returns a decoding cursor over the stored values.
    pub fn reader(&self) -> SparseReader<'_> {
        SparseReader {
            data:     &self.buf,
            idx:      0,
            last_val: 0,
            last_len: 0,
        }
    }
}

// A stateful decoding cursor over a `SparseVec`.
//
// `peek` decodes the next value without consuming it; `advance` consumes
// the peeked value. The running sum of deltas is kept in `last_val`.
pub struct SparseReader<'a> {
    data:     &'a [u8],
    idx:      usize,
    last_val: u32,
    last_len: usize,
}

impl<'a> SparseReader<'a> {
    #[inline] // Decodes the next value without advancing.
    pub fn peek(&mut self) -> u32 {
        if self.last_len > 0 {
            return self.last_val;
        }

        let (mut i, mut dif) = (0, 0u32);

        while self.data[self.idx + i] & MSB_MASK != 0 {
            dif |= ((self.data[self.idx + i] as u32) & SEVEN_LSB_MASK) << (i * 7);

            i += 1;
        }

        dif |= (self.data[self.idx + i] as u32) << (i * 7);

        self.last_val = self.last_val.wrapping_add(dif);
        self.last_len = i + 1;

        self.last_val
    }

    #[inline] // Consumes the value returned by the last `peek`.
    pub fn advance(&mut self) {
        self.idx += self.last_len;
        self.last_len = 0;
    }

    #[inline] // Decodes the next value and advances past it.
    pub fn next(&mut self) -> u32 {
        let val = self.peek();
        self.advance();
        val
    }

    #[inline] // Returns true once every value has been consumed.
    pub fn done(&self) -> bool {
        self.idx >= self.data.len()
    }
}

// Builds a `SparseVec` from encoded hashes appended together with their
// p'-index and p-rank.
//
// The writer stages one entry at a time so that consecutive appends with
// the same p'-index collapse into a single entry, keeping the one with
// the larger rank. The inputs arrive sorted by index but not by rank.
pub struct SparseWriter {
    data:     Vec<u8>,
    last_val: u32,
    staged:   Option<Staged>,
    length:   u32,
}

struct Staged {
    val: u32,
    idx: u32,
    rho: u8,
}

impl SparseWriter {
    pub fn new() -> Self {
        SparseWriter {
            data:     Vec::new(),
            last_val: 0,
            staged:   None,
            length:   0,
        }
    }

    pub fn with_capacity(cap: usize) -> Self {
        SparseWriter {
            data:     Vec::with_capacity(cap),
            last_val: 0,
            staged:   None,
            length:   0,
        }
    }

    #[inline] // Stages the encoded hash `val`, deduplicating against the
              // previously staged entry by p'-index.
    pub fn append(&mut self, val: u32, idx: u32, rho: u8) {
        if let Some(staged) = &mut self.staged {
            if idx == staged.idx {
                if rho > staged.rho {
                    staged.rho = rho;
                    staged.val = val;
                }
                return;
            }

            self.commit();
        }

        self.staged = Some(Staged { val, idx, rho });
    }

    #[inline] // Difference encodes the staged value into the buffer.
    fn commit(&mut self) {
        let staged = match self.staged.take() {
            Some(staged) => staged,
            None => return,
        };

        let mut dif = staged.val.wrapping_sub(self.last_val);

        while dif & !SEVEN_LSB_MASK != 0 {
            self.data.push((dif & SEVEN_LSB_MASK) as u8 | MSB_MASK);

            dif >>= 7;
        }

        self.data.push((dif & SEVEN_LSB_MASK) as u8);

        self.last_val = staged.val;
        self.length += 1;
    }

    // Flushes the staged entry and returns the finished vector.
    pub fn finish(mut self) -> SparseVec {
        self.commit();

        SparseVec {
            buf:   self.data,
            count: self.length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_empty() {
        let vec = SparseWriter::new().finish();

        assert_eq!(vec.count(), 0);
        assert_eq!(vec.len(), 0);

        assert!(vec.reader().done());
    }

    #[test]
    fn test_writer_dedup() {
        let mut writer = SparseWriter::new();

        writer.append(127, 0, 1);
        // Same index, but bigger rank than previous, keep this one.
        writer.append(126, 0, 2);

        // Nothing is committed until a new index arrives.
        assert_eq!(writer.data.len(), 0);

        // Storing deltas: 128 alone would take two varint bytes, the
        // delta from 126 takes one.
        writer.append(128, 1, 0);

        let vec = writer.finish();

        assert_eq!(vec.count(), 2);
        assert_eq!(vec.len(), 2);
        assert_eq!(vec.bytes(), &[126, 2]);

        let mut reader = vec.reader();

        assert!(!reader.done());
        assert_eq!(reader.peek(), 126);
        assert_eq!(reader.peek(), 126);

        reader.advance();

        assert!(!reader.done());
        assert_eq!(reader.peek(), 128);

        reader.advance();

        assert!(reader.done());
    }

    #[test]
    fn test_writer_dedup_keeps_staged() {
        let mut writer = SparseWriter::new();

        writer.append(126, 0, 2);
        // Smaller rank on the same index is discarded.
        writer.append(127, 0, 1);
        writer.append(300, 1, 4);

        let vec = writer.finish();

        assert_eq!(vec.count(), 2);

        let mut reader = vec.reader();

        assert_eq!(reader.next(), 126);
        assert_eq!(reader.next(), 300);
        assert!(reader.done());
    }

    #[test]
    fn test_varint_lengths() {
        let mut writer = SparseWriter::new();

        writer.append(7, 0, 1);
        writer.append(128, 1, 1);
        writer.append(300, 2, 1);
        writer.append(0xffffffff, 3, 1);

        let vec = writer.finish();

        // Deltas: 7 (1 byte), 121 (1), 172 (2), 0xfffffed3 (5).
        assert_eq!(vec.bytes(), &[7, 121, 172, 1, 211, 253, 255, 255, 15]);

        let decoded: Vec<u32> = {
            let mut reader = vec.reader();
            let mut vals = Vec::new();
            while !reader.done() {
                vals.push(reader.next());
            }
            vals
        };

        assert_eq!(decoded, vec![7, 128, 300, 0xffffffff]);
    }

    #[test]
    fn test_wrapping_delta() {
        // A merge can emit values out of numeric order when rank-flagged
        // and plain words interleave; deltas wrap and must decode back
        // to the exact values.
        let mut writer = SparseWriter::new();

        writer.append(500, 3, 1);
        writer.append(100, 4, 1);

        let vec = writer.finish();

        assert_eq!(vec.count(), 2);

        let mut reader = vec.reader();

        assert_eq!(reader.next(), 500);
        assert_eq!(reader.next(), 100);
        assert!(reader.done());
    }

    #[test]
    fn test_roundtrip() {
        let input: Vec<u32> = (1..256).chain(16400..16500).collect();

        let mut writer = SparseWriter::with_capacity(100);

        for (i, val) in input.iter().enumerate() {
            writer.append(*val, i as u32, 1);
        }

        let vec = writer.finish();

        assert_eq!(vec.count(), input.len() as u32);

        let mut reader = vec.reader();
        let mut output = Vec::new();

        while !reader.done() {
            output.push(reader.next());
        }

        assert_eq!(input, output);
    }

    #[test]
    fn test_serde() {
        let mut writer = SparseWriter::new();

        for i in 0..100u32 {
            writer.append(i * 37, i, 1);
        }

        let vec = writer.finish();

        let serialized = serde_json::to_string(&vec).unwrap();

        let deserialized: SparseVec = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.count(), vec.count());
        assert_eq!(deserialized.bytes(), vec.bytes());
    }
}

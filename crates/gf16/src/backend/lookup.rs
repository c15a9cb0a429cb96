//! Portable split-table kernel.
//!
//! Multiplication by a fixed coefficient uses two 256-entry u16 tables
//! (one indexed by the low byte, one by the high byte), exploiting the
//! distributivity of GF(2^16) multiplication. The pair costs 1 KiB and
//! stays L1-resident, which is why the tables are rebuilt into the
//! per-thread scratch for every coefficient instead of being cached.
//!
//! The packed layout groups each chunk by lane: within chunk `c` of
//! effective length `L`, lane `i` occupies bytes
//! `[c * chunk_len * lanes + i * L, .. + L)`. Output regions in the
//! accumulator use the same shape with `lanes = num_outputs`. Every lane
//! stream ends in one stride-sized block holding the running checksum,
//! folded as `cksum = mul2(cksum) ^ block` per stride block, lane-wise
//! over the block's u16 words.

use crate::tables::{mul2, tables};

use super::{BackendInfo, FieldBackend, Scratch};

/// Packed-layout granularity and checksum block width in bytes.
const STRIDE: usize = 8;
/// u16 lanes in one checksum block.
const CKSUM_WORDS: usize = STRIDE / 2;

const INFO: BackendInfo = BackendInfo {
    name: "lookup",
    alignment: 64,
    stride: STRIDE,
    ideal_chunk_size: 32 * 1024,
    ideal_input_multiple: 1,
    prefetch_downscale: 0,
};

/// Per-thread scratch: the split multiplication table pair.
struct LookupScratch {
    low: [u16; 256],
    high: [u16; 256],
}

impl LookupScratch {
    /// Rebuilds both tables for `coefficient` (must be > 1; 0 and 1 are
    /// short-circuited by the caller).
    fn load(&mut self, coefficient: u16) {
        let t = tables();
        let clog = u32::from(t.log(coefficient));
        self.low[0] = 0;
        self.high[0] = 0;
        for i in 1..256u32 {
            let sum = u32::from(t.log(i as u16)) + clog;
            self.low[i as usize] = t.antilog(sum % 65535);
            let sum = u32::from(t.log((i << 8) as u16)) + clog;
            self.high[i as usize] = t.antilog(sum % 65535);
        }
    }

    #[inline]
    fn mul(&self, word: u16) -> u16 {
        self.low[usize::from(word & 0xFF)] ^ self.high[usize::from(word >> 8)]
    }
}

/// The portable split-table backend.
pub struct LookupBackend;

impl LookupBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for LookupBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Folds one stride block into the running checksum.
#[inline]
fn fold_cksum(cksum: &mut [u16; CKSUM_WORDS], block: &[u8]) {
    for (w, chunk) in cksum.iter_mut().zip(block.chunks_exact(2)) {
        *w = mul2(*w) ^ u16::from_le_bytes([chunk[0], chunk[1]]);
    }
}

/// Walks the lane-grouped packed layout of one lane stream.
///
/// Yields `(stream_pos, lane_region_range)` per chunk, where
/// `stream_pos` is the lane-stream offset of the chunk start and the
/// range addresses the lane's bytes inside the packed buffer.
fn packed_chunks(
    aligned_len: usize,
    lanes: usize,
    index: usize,
    chunk_len: usize,
) -> impl Iterator<Item = (usize, std::ops::Range<usize>)> {
    let mut chunk_start = 0;
    std::iter::from_fn(move || {
        if chunk_start >= aligned_len {
            return None;
        }
        let this_len = chunk_len.min(aligned_len - chunk_start);
        let base = chunk_start * lanes + index * this_len;
        let item = (chunk_start, base..base + this_len);
        chunk_start += this_len;
        Some(item)
    })
}

impl FieldBackend for LookupBackend {
    fn info(&self) -> &BackendInfo {
        &INFO
    }

    fn alloc_scratch(&self) -> Scratch {
        Box::new(LookupScratch {
            low: [0; 256],
            high: [0; 256],
        })
    }

    fn prepare_packed_cksum(
        &self,
        dst: &mut [u8],
        src: &[u8],
        dst_region_len: usize,
        num_inputs: usize,
        index: usize,
        chunk_len: usize,
    ) {
        debug_assert_eq!(dst_region_len % STRIDE, 0);
        debug_assert!(src.len() <= dst_region_len);
        let aligned_len = dst_region_len + STRIDE;

        let mut cksum = [0u16; CKSUM_WORDS];
        for (chunk_start, range) in packed_chunks(aligned_len, num_inputs, index, chunk_len) {
            let lane = &mut dst[range];
            for (i, block) in lane.chunks_exact_mut(STRIDE).enumerate() {
                let stream_pos = chunk_start + i * STRIDE;
                if stream_pos >= dst_region_len {
                    // trailing block: store the accumulated checksum
                    for (out, w) in block.chunks_exact_mut(2).zip(cksum) {
                        out.copy_from_slice(&w.to_le_bytes());
                    }
                } else {
                    let avail = src.len().saturating_sub(stream_pos).min(STRIDE);
                    block[..avail].copy_from_slice(&src[stream_pos..stream_pos + avail]);
                    block[avail..].fill(0);
                    fold_cksum(&mut cksum, block);
                }
            }
        }
    }

    fn finish_packed_cksum(
        &self,
        dst: &mut [u8],
        src: &[u8],
        num_outputs: usize,
        index: usize,
        chunk_len: usize,
    ) -> bool {
        let size = dst.len();
        let data_region_len = self.align_to_stride(size);
        let aligned_len = data_region_len + STRIDE;

        let mut cksum = [0u16; CKSUM_WORDS];
        let mut stored = [0u16; CKSUM_WORDS];
        for (chunk_start, range) in packed_chunks(aligned_len, num_outputs, index, chunk_len) {
            let lane = &src[range];
            for (i, block) in lane.chunks_exact(STRIDE).enumerate() {
                let stream_pos = chunk_start + i * STRIDE;
                if stream_pos >= data_region_len {
                    for (w, chunk) in stored.iter_mut().zip(block.chunks_exact(2)) {
                        *w = u16::from_le_bytes([chunk[0], chunk[1]]);
                    }
                } else {
                    fold_cksum(&mut cksum, block);
                    if stream_pos < size {
                        let n = (size - stream_pos).min(STRIDE);
                        dst[stream_pos..stream_pos + n].copy_from_slice(&block[..n]);
                    }
                }
            }
        }
        cksum == stored
    }

    fn mul_add_multi(
        &self,
        _input_grouping: usize,
        num_inputs: usize,
        dst: &mut [u8],
        src: &[u8],
        len: usize,
        coeffs: &[u16],
        scratch: &mut Scratch,
        _prefetch_in: Option<&[u8]>,
        _prefetch_out: Option<&[u8]>,
    ) {
        debug_assert_eq!(len % STRIDE, 0);
        debug_assert!(dst.len() >= len);
        debug_assert!(src.len() >= num_inputs * len);
        let scratch = scratch
            .downcast_mut::<LookupScratch>()
            .expect("scratch region was not allocated by this backend");

        for (i, &c) in coeffs.iter().enumerate().take(num_inputs) {
            let lane = &src[i * len..(i + 1) * len];
            match c {
                0 => {}
                1 => xor_lane(&mut dst[..len], lane),
                c => {
                    scratch.load(c);
                    for (d, s) in dst[..len].chunks_exact_mut(2).zip(lane.chunks_exact(2)) {
                        let product = scratch.mul(u16::from_le_bytes([s[0], s[1]]));
                        let word = u16::from_le_bytes([d[0], d[1]]) ^ product;
                        d.copy_from_slice(&word.to_le_bytes());
                    }
                }
            }
        }
    }

    fn add_multi(
        &self,
        _input_grouping: usize,
        num_inputs: usize,
        dst: &mut [u8],
        src: &[u8],
        len: usize,
        _prefetch_in: Option<&[u8]>,
        _prefetch_out: Option<&[u8]>,
    ) {
        debug_assert_eq!(len % STRIDE, 0);
        for i in 0..num_inputs {
            xor_lane(&mut dst[..len], &src[i * len..(i + 1) * len]);
        }
    }
}

/// XORs a full lane into the output region.
#[inline]
fn xor_lane(dst: &mut [u8], lane: &[u8]) {
    for (d, s) in dst.iter_mut().zip(lane) {
        *d ^= s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::mul;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn backend() -> LookupBackend {
        LookupBackend::new()
    }

    fn aligned_len(b: &LookupBackend, size: usize) -> usize {
        b.align_to_stride(size) + STRIDE
    }

    #[test]
    fn prepare_then_finish_roundtrips() {
        let b = backend();
        let mut rng = StdRng::seed_from_u64(7);

        // 50 is deliberately not a stride multiple
        for &size in &[50usize, 64, 8, 1, 200] {
            let grouping = 3;
            let chunk_len = 16;
            let aligned = aligned_len(&b, size);
            let mut staging = vec![0u8; grouping * aligned];
            let data: Vec<u8> = (0..size).map(|_| rng.r#gen()).collect();

            b.prepare_packed_cksum(&mut staging, &data, aligned - STRIDE, grouping, 1, chunk_len);

            // input and output packed layouts share a shape, so a finish
            // with num_outputs == grouping reads the lane straight back
            let mut out = vec![0u8; size];
            let ok = b.finish_packed_cksum(&mut out, &staging, grouping, 1, chunk_len);
            assert!(ok, "checksum must verify for size {size}");
            assert_eq!(out, data);
        }
    }

    #[test]
    fn finish_detects_corruption() {
        let b = backend();
        let size = 64;
        let grouping = 2;
        let chunk_len = 24;
        let aligned = aligned_len(&b, size);
        let mut staging = vec![0u8; grouping * aligned];
        let data = vec![0xA5u8; size];

        b.prepare_packed_cksum(&mut staging, &data, aligned - STRIDE, grouping, 0, chunk_len);

        // flip one bit inside lane 0's first chunk region
        staging[4] ^= 0x10;

        let mut out = vec![0u8; size];
        assert!(!b.finish_packed_cksum(&mut out, &staging, grouping, 0, chunk_len));
    }

    #[test]
    fn empty_source_packs_a_zero_lane() {
        let b = backend();
        let size = 32;
        let grouping = 2;
        let aligned = aligned_len(&b, size);
        let mut staging = vec![0xFFu8; grouping * aligned];

        b.prepare_packed_cksum(&mut staging, &[], aligned - STRIDE, grouping, 0, aligned);

        // the whole lane, checksum block included, must be zero
        for (_, range) in packed_chunks(aligned, grouping, 0, aligned) {
            assert!(staging[range].iter().all(|&x| x == 0));
        }
    }

    #[test]
    fn mul_add_matches_wordwise_reference() {
        let b = backend();
        let mut rng = StdRng::seed_from_u64(99);
        let len = 32;
        let num_inputs = 4;
        let coeffs = [0u16, 1, 0x1234, 0xBEEF];
        let src: Vec<u8> = (0..num_inputs * len).map(|_| rng.r#gen()).collect();

        let mut dst = vec![0u8; len];
        let mut scratch = b.alloc_scratch();
        b.mul_add_multi(
            num_inputs, num_inputs, &mut dst, &src, len, &coeffs, &mut scratch, None, None,
        );

        for k in (0..len).step_by(2) {
            let mut expect = 0u16;
            for (i, &c) in coeffs.iter().enumerate() {
                let off = i * len + k;
                expect ^= mul(c, u16::from_le_bytes([src[off], src[off + 1]]));
            }
            let got = u16::from_le_bytes([dst[k], dst[k + 1]]);
            assert_eq!(got, expect, "word {k}");
        }
    }

    #[test]
    fn add_multi_is_mul_add_with_unit_coefficients() {
        let b = backend();
        let mut rng = StdRng::seed_from_u64(3);
        let len = 24;
        let num_inputs = 3;
        let src: Vec<u8> = (0..num_inputs * len).map(|_| rng.r#gen()).collect();

        let mut via_add = vec![0u8; len];
        b.add_multi(num_inputs, num_inputs, &mut via_add, &src, len, None, None);

        let mut via_mul = vec![0u8; len];
        let mut scratch = b.alloc_scratch();
        b.mul_add_multi(
            num_inputs,
            num_inputs,
            &mut via_mul,
            &src,
            len,
            &[1, 1, 1],
            &mut scratch,
            None,
            None,
        );

        assert_eq!(via_add, via_mul);
    }

    #[test]
    fn mul_add_accumulates_into_existing_contents() {
        let b = backend();
        let len = 16;
        let src = vec![0x11u8; len];
        let mut dst = vec![0x22u8; len];
        let mut scratch = b.alloc_scratch();

        b.mul_add_multi(1, 1, &mut dst, &src, len, &[1], &mut scratch, None, None);
        assert!(dst.iter().all(|&x| x == 0x33));
    }
}

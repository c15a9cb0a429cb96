//! Pluggable throughput kernels for packed GF(2^16) processing.
//!
//! The processing pipeline never assumes a particular kernel: it queries
//! a [`FieldBackend`] for its metadata (alignment, stride, ideal chunk
//! size, ideal input multiple, prefetch downscale) and drives the packed
//! prepare / multiply-accumulate / finish operations through the trait.
//! Kernel families differ wildly in their ideal parameters, so the
//! metadata travels with the implementation instead of living in the
//! caller.
//!
//! # Selection
//!
//! [`Method`] names the kernel families; [`create`] resolves one at
//! startup and fails with [`BackendError::Unavailable`] when the
//! requested family is not compiled in or not supported by the running
//! CPU. [`Method::Auto`] picks the best available family.

mod lookup;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub use lookup::LookupBackend;

/// Result type for backend selection.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors surfaced while resolving a kernel family.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The requested kernel family cannot run in this build/CPU.
    #[error("field backend {0} is not available on this platform")]
    Unavailable(Method),
}

/// Kernel family selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// Pick the best family available at runtime.
    #[default]
    Auto,
    /// Portable split-table kernel; always available.
    Lookup,
    /// Byte-shuffle SIMD family (SSSE3/NEON vtbl). Not compiled in.
    Shuffle,
    /// Carryless-multiply SIMD family (PCLMUL/NEON pmull). Not compiled in.
    Clmul,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Lookup => "lookup",
            Self::Shuffle => "shuffle",
            Self::Clmul => "clmul",
        };
        f.write_str(name)
    }
}

/// Static metadata describing a kernel family.
///
/// The pipeline derives its buffer geometry from these values: slices
/// are padded to `stride`, chunks are sized near `ideal_chunk_size`, and
/// the input grouping is rounded to `ideal_input_multiple`.
#[derive(Debug, Clone, Copy)]
pub struct BackendInfo {
    /// Human-readable kernel name, surfaced in diagnostics.
    pub name: &'static str,
    /// Required buffer alignment in bytes.
    pub alignment: usize,
    /// Granularity of the packed layout; also the checksum block width.
    pub stride: usize,
    /// Chunk length that keeps the kernel's working set cache-resident.
    pub ideal_chunk_size: usize,
    /// Input-lane count the kernel processes most efficiently.
    pub ideal_input_multiple: usize,
    /// log2 of the trailing output iterations that prefetch the output
    /// side instead of the next input chunk.
    pub prefetch_downscale: u8,
}

/// Opaque per-thread scratch region.
///
/// Allocated by the backend that will consume it; compute workers hold
/// one each and hand it back to every `mul_add_multi` call.
pub type Scratch = Box<dyn Any + Send>;

/// Capability object for one kernel family.
///
/// All operations are pure with respect to shared state and safe to
/// call from multiple threads, given a per-thread [`Scratch`].
pub trait FieldBackend: Send + Sync {
    /// Kernel metadata; constant for the lifetime of the backend.
    fn info(&self) -> &BackendInfo;

    /// Allocates a scratch region for one worker thread.
    fn alloc_scratch(&self) -> Scratch;

    /// Packs one input lane into a staging region and folds the running
    /// checksum into the lane's trailing stride block.
    ///
    /// `dst` is the whole staging region for the batch; `src` holds the
    /// caller's slice bytes (shorter sources are zero-padded up to
    /// `dst_region_len`). `num_inputs` is the lane count of the packed
    /// layout (the input grouping) and `index` the lane to write.
    fn prepare_packed_cksum(
        &self,
        dst: &mut [u8],
        src: &[u8],
        dst_region_len: usize,
        num_inputs: usize,
        index: usize,
        chunk_len: usize,
    );

    /// Unpacks one output lane and verifies its checksum.
    ///
    /// Copies `dst.len()` bytes of recovered data out of the packed
    /// `src` region and returns whether the re-folded checksum matches
    /// the stored trailing block.
    fn finish_packed_cksum(
        &self,
        dst: &mut [u8],
        src: &[u8],
        num_outputs: usize,
        index: usize,
        chunk_len: usize,
    ) -> bool;

    /// Multiply-accumulate of packed input lanes into one output region:
    /// `dst[k] ^= sum_i coeffs[i] * lane_i[k]` over `len` bytes.
    ///
    /// `prefetch_in`/`prefetch_out` are advisory streaming hints into
    /// upcoming input/output regions; implementations may ignore them.
    #[allow(clippy::too_many_arguments)]
    fn mul_add_multi(
        &self,
        input_grouping: usize,
        num_inputs: usize,
        dst: &mut [u8],
        src: &[u8],
        len: usize,
        coeffs: &[u16],
        scratch: &mut Scratch,
        prefetch_in: Option<&[u8]>,
        prefetch_out: Option<&[u8]>,
    );

    /// [`mul_add_multi`](Self::mul_add_multi) with all coefficients 1:
    /// plain XOR accumulation, used when an output exponent is zero.
    #[allow(clippy::too_many_arguments)]
    fn add_multi(
        &self,
        input_grouping: usize,
        num_inputs: usize,
        dst: &mut [u8],
        src: &[u8],
        len: usize,
        prefetch_in: Option<&[u8]>,
        prefetch_out: Option<&[u8]>,
    );

    /// Rounds `n` up to a multiple of the kernel stride.
    fn align_to_stride(&self, n: usize) -> usize {
        let stride = self.info().stride;
        n.div_ceil(stride) * stride
    }
}

/// Resolves a kernel family to a shareable backend instance.
pub fn create(method: Method) -> BackendResult<Arc<dyn FieldBackend>> {
    match method {
        Method::Auto | Method::Lookup => Ok(Arc::new(LookupBackend::new())),
        Method::Shuffle | Method::Clmul => Err(BackendError::Unavailable(method)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_resolves_to_lookup() {
        let backend = create(Method::Auto).unwrap();
        assert_eq!(backend.info().name, "lookup");
    }

    #[test]
    fn simd_families_report_unavailable() {
        assert!(matches!(
            create(Method::Shuffle),
            Err(BackendError::Unavailable(Method::Shuffle))
        ));
        assert!(matches!(
            create(Method::Clmul),
            Err(BackendError::Unavailable(Method::Clmul))
        ));
    }

    #[test]
    fn stride_alignment_rounds_up() {
        let backend = create(Method::Lookup).unwrap();
        let stride = backend.info().stride;
        assert_eq!(backend.align_to_stride(0), 0);
        assert_eq!(backend.align_to_stride(1), stride);
        assert_eq!(backend.align_to_stride(stride), stride);
        assert_eq!(backend.align_to_stride(stride + 1), 2 * stride);
    }
}

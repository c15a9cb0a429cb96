//! The compute stage: a pool of worker threads running the chunked
//! multiply-accumulate kernel over staging areas into the accumulator.
//!
//! A batch is split into `num_chunks` jobs distributed round-robin over
//! the pool, restarting at worker 0 for every batch. The restart is
//! load-bearing: chunk `c` of every batch lands on worker `c mod T`, so
//! when two batches overlap (one `Processing`, the next dispatched), the
//! jobs touching the same accumulator chunk are serialized on one worker
//! queue, and no `(chunk, output)` region ever has two writers. It also
//! keeps consecutive batches walking the same output regions on the same
//! core.
//!
//! Each batch carries an atomic reference count initialized to its chunk
//! count; the worker that decrements it to zero posts the completion
//! event.

use std::sync::atomic::{self, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use gf16::{FieldBackend, Scratch};

use crate::buffer::SharedBuffer;
use crate::error::EngineError;
use crate::events::Event;

/// Shared per-batch bookkeeping carried by every chunk job.
pub(crate) struct BatchRef {
    pub area_id: usize,
    pub num_inputs: usize,
    pub first_input: u16,
    /// Outstanding chunk count; the last decrement publishes the batch.
    pub refs: Arc<AtomicUsize>,
}

pub(crate) struct ComputeJob {
    pub staging: Arc<SharedBuffer>,
    pub accumulator: Arc<SharedBuffer>,
    /// Row-major `num_outputs x num_inputs` coefficient matrix.
    pub coeffs: Arc<[u16]>,
    pub output_exps: Arc<[u16]>,
    /// Lane-stream offset of this chunk (stride-aligned).
    pub chunk_offset: usize,
    /// Effective chunk length; shorter than the nominal length only for
    /// the final chunk.
    pub chunk_len: usize,
    pub grouping: usize,
    pub num_inputs: usize,
    /// XOR into the accumulator instead of overwriting (false only for
    /// the first batch).
    pub add: bool,
    pub last_chunk: bool,
    pub batch: Arc<BatchRef>,
}

pub(crate) struct ComputeWorker {
    pub tx: Sender<ComputeJob>,
    pub handle: JoinHandle<()>,
}

pub(crate) fn spawn_pool(
    num_threads: usize,
    backend: &Arc<dyn FieldBackend>,
    events: &Sender<Event>,
) -> Result<Vec<ComputeWorker>, EngineError> {
    (0..num_threads)
        .map(|i| {
            let (tx, rx) = crossbeam_channel::unbounded();
            let backend = Arc::clone(backend);
            let events = events.clone();
            let handle = thread::Builder::new()
                .name(format!("rs-compute-{i}"))
                .spawn(move || run(&*backend, &rx, &events))
                .map_err(EngineError::Spawn)?;
            Ok(ComputeWorker { tx, handle })
        })
        .collect()
}

fn run(backend: &dyn FieldBackend, rx: &Receiver<ComputeJob>, events: &Sender<Event>) {
    let mut scratch = backend.alloc_scratch();
    while let Ok(job) = rx.recv() {
        process_chunk(backend, &mut scratch, &job);

        if job.batch.refs.fetch_sub(1, Ordering::Release) == 1 {
            // pairs with the Release decrements of the other chunk
            // workers so the controller observes all accumulator writes
            atomic::fence(Ordering::Acquire);
            let _ = events.send(Event::BatchDone {
                area_id: job.batch.area_id,
                num_inputs: job.batch.num_inputs,
                first_input: job.batch.first_input,
            });
        }
    }
}

/// How many output iterations from the end switch to output-side
/// prefetching, as a power of two.
const MAX_PF_FACTOR: u32 = 3;

fn process_chunk(backend: &dyn FieldBackend, scratch: &mut Scratch, job: &ComputeJob) {
    let info = backend.info();
    let num_outputs = job.output_exps.len();

    // Spread next-chunk input prefetches evenly across the output
    // iterations, reserving the final 2^downscale rounds for the output
    // side. If every round is an output round, inputs never prefetch.
    let pf_factor = u32::from(info.prefetch_downscale);
    let mut inputs_pf_per_invoke = job.num_inputs / info.ideal_input_multiple;
    let mut input_pf_out_offset = num_outputs;
    if inputs_pf_per_invoke > (1usize << pf_factor) {
        inputs_pf_per_invoke -= 1usize << pf_factor;
        inputs_pf_per_invoke <<= MAX_PF_FACTOR - pf_factor;
        let lead = (job.num_inputs << MAX_PF_FACTOR).div_ceil(inputs_pf_per_invoke);
        input_pf_out_offset = num_outputs.saturating_sub(lead);
    }

    let src_base = job.chunk_offset * job.grouping;
    // SAFETY: the staging area is immutable while its batch is
    // Processing; workers take shared views only.
    let src = unsafe { job.staging.slice(src_base, job.chunk_len * job.grouping) };

    for out in 0..num_outputs {
        let dst_off = job.chunk_offset * num_outputs + out * job.chunk_len;
        // SAFETY: exactly one worker owns each (chunk, output) region:
        // chunks are partitioned across jobs, outputs are walked
        // sequentially within a job, and same-chunk jobs of overlapping
        // batches share a worker queue.
        let dst = unsafe { job.accumulator.slice_mut(dst_off, job.chunk_len) };
        if !job.add {
            dst.fill(0);
        }

        let prefetch_in = (!job.last_chunk && out >= input_pf_out_offset).then(|| {
            let skew = (inputs_pf_per_invoke * (out - input_pf_out_offset) * job.chunk_len)
                >> MAX_PF_FACTOR;
            let start = (job.chunk_offset + job.chunk_len) * job.grouping + skew;
            let len = job.chunk_len.min(job.staging.len().saturating_sub(start));
            // SAFETY: shared view into the (immutable) staging area;
            // advisory only.
            unsafe { job.staging.slice(start.min(job.staging.len()), len) }
        });

        // next output region of the same chunk; the cross-chunk region
        // after the last output belongs to another worker, so it gets no
        // hint
        let prefetch_out = (out + 1 < num_outputs).then(|| {
            let off = dst_off + job.chunk_len;
            let len = job.chunk_len.min(job.accumulator.len().saturating_sub(off));
            // SAFETY: shared view of a region only this worker writes,
            // and not before the current call returns; disjoint from
            // `dst`.
            unsafe { job.accumulator.slice(off.min(job.accumulator.len()), len) }
        });

        if job.output_exps[out] == 0 {
            backend.add_multi(
                job.grouping,
                job.num_inputs,
                dst,
                src,
                job.chunk_len,
                prefetch_in,
                prefetch_out,
            );
        } else {
            let coeffs = &job.coeffs[out * job.num_inputs..(out + 1) * job.num_inputs];
            backend.mul_add_multi(
                job.grouping,
                job.num_inputs,
                dst,
                src,
                job.chunk_len,
                coeffs,
                scratch,
                prefetch_in,
                prefetch_out,
            );
        }
    }
}

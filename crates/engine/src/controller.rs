//! The pipeline controller: staging rotation, batch dispatch,
//! back-pressure, flush, end-of-input and teardown.
//!
//! The thread that owns the [`Pipeline`] is the controller thread. It
//! never blocks inside pipeline calls; completion events from the
//! prepare worker, the compute pool and finish jobs accumulate on one
//! unbounded channel and are drained only inside
//! [`Pipeline::process_events`] and [`Pipeline::wait_event`], which is
//! where user callbacks fire, in arrival order.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use gf16::{FieldBackend, Method, coeff_from_log, input_log};
use tracing::{debug, trace};

use crate::buffer::SharedBuffer;
use crate::compute::{self, BatchRef, ComputeJob, ComputeWorker};
use crate::error::{EngineResult, RejectedInput};
use crate::events::Event;
use crate::finish::{self, FinishJob};
use crate::prepare::{self, PrepareJob, PrepareStage};
use crate::staging::{NUM_STAGING_AREAS, StagingArea, StagingState};

/// Fired on the controller thread when a packed input buffer can be
/// recycled: `(buffer, input_index)`.
pub type PreparedCallback = Box<dyn FnOnce(Vec<u8>, u16) + Send + 'static>;
/// Fired on the controller thread with a finished output:
/// `(buffer, output_index, checksum_ok)`.
pub type OutputCallback = Box<dyn FnOnce(Vec<u8>, usize, bool) + Send + 'static>;
/// Fired on the controller thread after each batch completes:
/// `(inputs_in_batch, first_input_index)`.
pub type ProgressCallback = Box<dyn FnMut(usize, u16) + Send + 'static>;
/// Fired on the controller thread once the accumulator is complete.
pub type FinishedCallback = Box<dyn FnOnce() + Send + 'static>;

/// Default number of input lanes packed into one staging batch.
pub const DEFAULT_INPUT_GROUPING: usize = 12;

/// Construction parameters for a [`Pipeline`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    slice_size: usize,
    method: Method,
    num_threads: usize,
    target_input_grouping: usize,
}

impl PipelineConfig {
    /// Creates a configuration for slices of at most `slice_size` bytes.
    #[must_use]
    pub fn new(slice_size: usize) -> Self {
        Self {
            slice_size,
            method: Method::Auto,
            num_threads: 0,
            target_input_grouping: DEFAULT_INPUT_GROUPING,
        }
    }

    /// Selects the field backend; `Method::Auto` picks the best
    /// available kernel family.
    #[must_use]
    pub const fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sets the compute pool size; `0` means one worker per logical
    /// CPU.
    #[must_use]
    pub const fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Hints the input grouping; rounded to the backend's ideal input
    /// multiple, `0` means the default of 12.
    #[must_use]
    pub const fn with_target_input_grouping(mut self, grouping: usize) -> Self {
        self.target_input_grouping = grouping;
        self
    }
}

/// The multi-threaded GF(2^16) recovery pipeline.
///
/// See the crate-level documentation for the stage layout and the
/// controller-thread model.
pub struct Pipeline {
    backend: Arc<dyn FieldBackend>,
    ideal_chunk_size: usize,
    stride: usize,
    alignment: usize,
    grouping: usize,

    /// Declared maximum slice size; staging/accumulator geometry.
    slice_size: usize,
    aligned_slice_size: usize,
    /// Slice size of subsequent batches (`<= slice_size` normally).
    current_slice_size: usize,
    aligned_current_slice_size: usize,
    chunk_len: usize,
    num_chunks: usize,

    staging: [StagingArea; NUM_STAGING_AREAS],
    current_input_buf: usize,
    current_input_pos: usize,
    num_buf_used: usize,

    output_exps: Arc<[u16]>,
    max_outputs: usize,
    accumulator: Option<Arc<SharedBuffer>>,
    processing_add: bool,
    end_signalled: bool,

    progress_cb: Option<ProgressCallback>,
    finish_cb: Option<FinishedCallback>,

    prepare: Option<PrepareStage>,
    workers: Vec<ComputeWorker>,
    next_worker: usize,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
}

impl Pipeline {
    /// Builds the pipeline: resolves the backend, spawns the prepare
    /// worker and the compute pool, and allocates the staging areas.
    pub fn new(config: PipelineConfig) -> EngineResult<Self> {
        let backend = gf16::backend::create(config.method)?;
        let info = *backend.info();

        let num_threads = if config.num_threads == 0 {
            thread::available_parallelism().map_or(1, std::num::NonZero::get)
        } else {
            config.num_threads
        };

        let target = if config.target_input_grouping == 0 {
            DEFAULT_INPUT_GROUPING
        } else {
            config.target_input_grouping
        };
        // round to the nearest ideal input multiple, never below it
        let mut grouping = target + info.ideal_input_multiple / 2;
        grouping -= grouping % info.ideal_input_multiple;
        grouping = grouping.max(info.ideal_input_multiple);

        let aligned_slice_size = backend.align_to_stride(config.slice_size) + info.stride;

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let prepare = prepare::spawn(Arc::clone(&backend), events_tx.clone())?;
        let workers = compute::spawn_pool(num_threads, &backend, &events_tx)?;

        let mut pipeline = Self {
            backend,
            ideal_chunk_size: info.ideal_chunk_size,
            stride: info.stride,
            alignment: info.alignment,
            grouping,
            slice_size: config.slice_size,
            aligned_slice_size,
            current_slice_size: config.slice_size,
            aligned_current_slice_size: aligned_slice_size,
            chunk_len: info.ideal_chunk_size,
            num_chunks: 1,
            staging: std::array::from_fn(|_| StagingArea::new(grouping)),
            current_input_buf: 0,
            current_input_pos: 0,
            num_buf_used: 0,
            output_exps: Vec::new().into(),
            max_outputs: 0,
            accumulator: None,
            processing_add: false,
            end_signalled: false,
            progress_cb: None,
            finish_cb: None,
            prepare: Some(prepare),
            workers,
            next_worker: 0,
            events_tx,
            events_rx,
        };
        pipeline.ensure_staging_allocated();
        pipeline.set_current_slice_size(config.slice_size);

        debug!(
            backend = info.name,
            threads = num_threads,
            grouping,
            aligned_slice_size,
            "pipeline initialized"
        );
        Ok(pipeline)
    }

    /// Installs the per-batch progress callback.
    pub fn set_progress_callback(&mut self, cb: ProgressCallback) {
        self.progress_cb = Some(cb);
    }

    /// Changes the slice size used by subsequent batches.
    ///
    /// Growing past the declared maximum reallocates the staging areas
    /// and the accumulator; any accumulated recovery data is discarded.
    /// Must not be called while batches are filling or in flight.
    pub fn set_current_slice_size(&mut self, size: usize) {
        assert!(
            self.current_input_pos == 0 && self.num_buf_used == 0,
            "slice size changed while batches are pending"
        );

        self.current_slice_size = size;
        self.aligned_current_slice_size = self.backend.align_to_stride(size) + self.stride;

        if size > self.slice_size {
            // supported, but a growth reallocation drops accumulated
            // state; callers are advised not to rely on it
            self.slice_size = size;
            self.aligned_slice_size = self.aligned_current_slice_size;
            for area in &mut self.staging {
                area.buf = None;
            }
            self.ensure_staging_allocated();
            if self.accumulator.is_some() {
                self.accumulator = Some(Arc::new(SharedBuffer::zeroed(
                    self.max_outputs * self.aligned_slice_size,
                    self.alignment,
                )));
                self.processing_add = false;
            }
        }

        // chunk count from the kernel's ideal size, then the length
        // re-aligned to stride, then the count re-derived to absorb the
        // alignment slack
        let rounded = (self.aligned_current_slice_size + self.ideal_chunk_size / 2)
            / self.ideal_chunk_size;
        let num_chunks = rounded.max(1);
        self.chunk_len = self
            .backend
            .align_to_stride(self.aligned_current_slice_size.div_ceil(num_chunks));
        self.num_chunks = self.aligned_current_slice_size.div_ceil(self.chunk_len);
    }

    /// Configures the recovery outputs to compute.
    ///
    /// The first call with a non-empty set allocates the accumulator;
    /// later calls may only shrink the output count. Must not be called
    /// while batches are in flight.
    pub fn set_recovery_slices(&mut self, exponents: &[u16]) {
        assert!(self.num_buf_used == 0, "outputs changed while batches are pending");
        debug_assert!(exponents.iter().all(|&e| e < 65535), "output exponent out of range");

        if self.accumulator.is_some() {
            assert!(
                exponents.len() <= self.max_outputs,
                "cannot grow the recovery-slice count after allocation"
            );
        } else if !exponents.is_empty() {
            self.max_outputs = exponents.len();
            self.accumulator = Some(Arc::new(SharedBuffer::zeroed(
                exponents.len() * self.aligned_slice_size,
                self.alignment,
            )));
        }
        self.output_exps = Arc::from(exponents);
    }

    /// Submits one input slice.
    ///
    /// The buffer must hold at most the current slice size; shorter
    /// slices are zero-padded during packing. With `flush` set (or when
    /// the batch fills), the staging area is sealed and queued for
    /// computation.
    ///
    /// Returns the buffer inside [`RejectedInput`] when both staging
    /// areas are awaiting processing; consume a completion event and
    /// re-submit.
    pub fn add_input(
        &mut self,
        buffer: Vec<u8>,
        input_index: u16,
        flush: bool,
        on_prepared: Option<PreparedCallback>,
    ) -> Result<(), RejectedInput> {
        assert!(!self.end_signalled, "add_input after end_input");
        assert!(
            buffer.len() <= self.current_slice_size,
            "input longer than the current slice size"
        );

        if self.staging[self.current_input_buf].busy() {
            return Err(RejectedInput {
                buffer,
                on_prepared,
            });
        }
        self.ensure_staging_allocated();

        let area_id = self.current_input_buf;
        let area = &mut self.staging[area_id];
        area.input_indices[self.current_input_pos] = input_index;
        area.state = StagingState::Filling;

        let lane = self.current_input_pos;
        self.current_input_pos += 1;
        let submit = flush || self.current_input_pos == self.grouping;
        let submit_batch_size = if submit { self.current_input_pos } else { 0 };

        let job = PrepareJob {
            staging: Arc::clone(area.buf.as_ref().expect("staging allocated")),
            source: Some(buffer),
            input_index,
            on_prepared,
            dst_region_len: self.aligned_current_slice_size - self.stride,
            grouping: self.grouping,
            lane,
            chunk_len: self.chunk_len,
            area_id,
            submit_batch_size,
        };

        if submit {
            // lock the area until its batch completes
            area.state = StagingState::Submitted;
            self.num_buf_used += 1;
            self.current_input_pos = 0;
            self.current_input_buf = (self.current_input_buf + 1) % NUM_STAGING_AREAS;
        }

        self.send_prepare(job);
        Ok(())
    }

    /// Seals and queues the partially filled staging area, if any.
    pub fn flush(&mut self) {
        if self.current_input_pos == 0 {
            return;
        }

        let area_id = self.current_input_buf;
        let job = PrepareJob {
            staging: Arc::clone(
                self.staging[area_id].buf.as_ref().expect("staging allocated"),
            ),
            source: None,
            input_index: 0,
            on_prepared: None,
            dst_region_len: self.aligned_current_slice_size - self.stride,
            grouping: self.grouping,
            lane: 0,
            chunk_len: self.chunk_len,
            area_id,
            submit_batch_size: self.current_input_pos,
        };

        self.staging[area_id].state = StagingState::Submitted;
        self.num_buf_used += 1;
        self.current_input_pos = 0;
        self.current_input_buf = (self.current_input_buf + 1) % NUM_STAGING_AREAS;

        self.send_prepare(job);
    }

    /// Signals end of input: flushes the partial batch and records the
    /// callback fired once the accumulator is complete.
    pub fn end_input(&mut self, on_finished: FinishedCallback) {
        assert!(!self.end_signalled, "end_input called twice");
        self.flush();
        self.finish_cb = Some(on_finished);
        self.end_signalled = true;
        if self.num_buf_used == 0 {
            self.processing_finished();
        }
    }

    /// Fetches one recovery output.
    ///
    /// The buffer is resized to the current slice size, filled on a
    /// finish worker and handed to `cb` on the controller thread along
    /// with the checksum verdict. Before any batch was computed the
    /// output is defined as all zeroes and `cb` fires immediately.
    pub fn get_output(&self, index: usize, mut buffer: Vec<u8>, cb: OutputCallback) {
        assert!(index < self.output_exps.len(), "output index out of range");

        if !self.processing_add {
            buffer.clear();
            buffer.resize(self.current_slice_size, 0);
            cb(buffer, index, true);
            return;
        }

        buffer.resize(self.current_slice_size, 0);
        let accumulator = Arc::clone(
            self.accumulator.as_ref().expect("accumulator allocated"),
        );
        trace!(index, "output finalization queued");
        finish::spawn(
            FinishJob {
                accumulator,
                backend: Arc::clone(&self.backend),
                buffer,
                index,
                num_outputs: self.output_exps.len(),
                chunk_len: self.chunk_len,
                packed_extent: self.aligned_current_slice_size * self.output_exps.len(),
                callback: cb,
            },
            self.events_tx.clone(),
        );
    }

    /// Drains all pending completion events without blocking.
    ///
    /// Returns the number of events processed. User callbacks fire here
    /// in event arrival order.
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Blocks for the next completion event, then drains any others.
    ///
    /// Call only while work is outstanding (a batch in flight, a
    /// prepare pending or an output being finished); otherwise this
    /// blocks indefinitely.
    pub fn wait_event(&mut self) {
        if let Ok(event) = self.events_rx.recv() {
            self.handle_event(event);
            self.process_events();
        }
    }

    /// Tears the pipeline down: drains the stage threads and joins
    /// them. Outstanding work is abandoned; its side effects may or may
    /// not have been observed.
    pub fn close(mut self) {
        self.teardown();
    }

    /// Number of batches currently sealed for processing.
    #[must_use]
    pub fn active_batches(&self) -> usize {
        self.num_buf_used
    }

    /// The declared maximum slice size.
    #[must_use]
    pub fn slice_size(&self) -> usize {
        self.slice_size
    }

    /// The slice size applied to subsequent batches.
    #[must_use]
    pub fn current_slice_size(&self) -> usize {
        self.current_slice_size
    }

    /// Input lanes per staging batch.
    #[must_use]
    pub fn input_grouping(&self) -> usize {
        self.grouping
    }

    /// Compute jobs per batch.
    #[must_use]
    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    /// Configured recovery outputs.
    #[must_use]
    pub fn num_outputs(&self) -> usize {
        self.output_exps.len()
    }

    /// Test-support hook: flips the low bit of one accumulator byte.
    ///
    /// Exercises checksum verification on `get_output`. Only valid with
    /// no batches in flight and no outputs being finished.
    #[doc(hidden)]
    pub fn corrupt_accumulator(&mut self, byte_offset: usize) {
        assert!(self.num_buf_used == 0, "corruption with batches in flight");
        let acc = self.accumulator.as_ref().expect("accumulator allocated");
        // SAFETY: no compute or finish job holds a view (asserted above
        // and required of the caller).
        let region = unsafe { acc.slice_mut(byte_offset, 1) };
        region[0] ^= 1;
    }

    fn send_prepare(&self, job: PrepareJob) {
        self.prepare
            .as_ref()
            .expect("prepare stage running")
            .tx
            .send(job)
            .expect("prepare worker alive");
    }

    fn ensure_staging_allocated(&mut self) {
        for area in &mut self.staging {
            if area.buf.is_none() {
                area.buf = Some(Arc::new(SharedBuffer::zeroed(
                    self.grouping * self.aligned_slice_size,
                    self.alignment,
                )));
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Prepared {
                area_id,
                submit_batch_size,
                buffer,
                input_index,
                on_prepared,
            } => {
                if submit_batch_size > 0 {
                    self.dispatch_batch(area_id, submit_batch_size);
                }
                if let (Some(buffer), Some(cb)) = (buffer, on_prepared) {
                    cb(buffer, input_index);
                }
            }
            Event::BatchDone {
                area_id,
                num_inputs,
                first_input,
            } => {
                debug!(area_id, num_inputs, first_input, "batch complete");
                self.staging[area_id].state = StagingState::Free;
                self.num_buf_used -= 1;
                if let Some(cb) = self.progress_cb.as_mut() {
                    cb(num_inputs, first_input);
                }
                if self.end_signalled && self.num_buf_used == 0 {
                    self.processing_finished();
                }
            }
            Event::OutputDone {
                buffer,
                index,
                checksum_ok,
                callback,
            } => {
                trace!(index, checksum_ok, "output finalized");
                callback(buffer, index, checksum_ok);
            }
        }
    }

    /// Builds the batch coefficient matrix and fans the chunks out over
    /// the compute pool.
    fn dispatch_batch(&mut self, area_id: usize, num_inputs: usize) {
        let area = &mut self.staging[area_id];
        debug_assert_eq!(area.state, StagingState::Submitted);
        area.state = StagingState::Processing;
        let first_input = area.input_indices[0];
        let indices = area.input_indices[..num_inputs].to_vec();
        let staging_buf = Arc::clone(area.buf.as_ref().expect("staging allocated"));

        let num_outputs = self.output_exps.len();
        let Some(accumulator) = self.accumulator.as_ref().map(Arc::clone) else {
            // no outputs configured: the batch completes trivially
            let _ = self.events_tx.send(Event::BatchDone {
                area_id,
                num_inputs,
                first_input,
            });
            return;
        };

        // one field multiplication per matrix cell
        let mut coeffs = vec![0u16; num_inputs * num_outputs];
        for (inp, &index) in indices.iter().enumerate() {
            let log = input_log(index);
            for (out, &exp) in self.output_exps.iter().enumerate() {
                coeffs[out * num_inputs + inp] = coeff_from_log(log, exp);
            }
        }
        let coeffs: Arc<[u16]> = coeffs.into();

        let batch = Arc::new(BatchRef {
            area_id,
            num_inputs,
            first_input,
            refs: Arc::new(AtomicUsize::new(self.num_chunks)),
        });

        debug!(
            area_id,
            num_inputs,
            num_outputs,
            chunks = self.num_chunks,
            add = self.processing_add,
            "batch dispatched"
        );

        // restart at worker 0 so chunk c always lands on worker c mod T
        self.next_worker = 0;
        for chunk in 0..self.num_chunks {
            let chunk_offset = chunk * self.chunk_len;
            let chunk_len = self
                .chunk_len
                .min(self.aligned_current_slice_size - chunk_offset);
            let job = ComputeJob {
                staging: Arc::clone(&staging_buf),
                accumulator: Arc::clone(&accumulator),
                coeffs: Arc::clone(&coeffs),
                output_exps: Arc::clone(&self.output_exps),
                chunk_offset,
                chunk_len,
                grouping: self.grouping,
                num_inputs,
                add: self.processing_add,
                last_chunk: chunk + 1 == self.num_chunks,
                batch: Arc::clone(&batch),
            };
            self.workers[self.next_worker]
                .tx
                .send(job)
                .expect("compute worker alive");
            self.next_worker = (self.next_worker + 1) % self.workers.len();
        }
        self.processing_add = true;
    }

    /// All batches have drained after `end_input`: release the staging
    /// memory for output retrieval and fire the finished callback.
    fn processing_finished(&mut self) {
        self.end_signalled = false;
        for area in &mut self.staging {
            area.buf = None;
        }
        debug!("pipeline drained; staging memory released");
        if let Some(cb) = self.finish_cb.take() {
            cb();
        }
    }

    fn teardown(&mut self) {
        if let Some(stage) = self.prepare.take() {
            drop(stage.tx);
            let _ = stage.handle.join();
        }
        for worker in self.workers.drain(..) {
            drop(worker.tx);
            let _ = worker.handle.join();
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}

//! The finish stage: on-demand jobs that unpack one output slice from
//! the accumulator and verify its running checksum.
//!
//! Finish jobs are one-shot and independent, so they run on the rayon
//! global pool instead of the dedicated compute workers; any number of
//! them may proceed in parallel over shared read-only views of the
//! accumulator. Results return to the controller thread as events.

use std::sync::Arc;

use crossbeam_channel::Sender;
use gf16::FieldBackend;

use crate::buffer::SharedBuffer;
use crate::controller::OutputCallback;
use crate::events::Event;

pub(crate) struct FinishJob {
    pub accumulator: Arc<SharedBuffer>,
    pub backend: Arc<dyn FieldBackend>,
    /// Output buffer, already sized to the current slice size.
    pub buffer: Vec<u8>,
    pub index: usize,
    pub num_outputs: usize,
    pub chunk_len: usize,
    /// Bytes of the accumulator covered by the packed layout.
    pub packed_extent: usize,
    pub callback: OutputCallback,
}

pub(crate) fn spawn(job: FinishJob, events: Sender<Event>) {
    rayon::spawn(move || {
        let FinishJob {
            accumulator,
            backend,
            mut buffer,
            index,
            num_outputs,
            chunk_len,
            packed_extent,
            callback,
        } = job;

        // SAFETY: compute has drained before outputs are fetched;
        // finish jobs take shared read-only views.
        let src = unsafe { accumulator.slice(0, packed_extent) };
        let checksum_ok = backend.finish_packed_cksum(&mut buffer, src, num_outputs, index, chunk_len);

        // the controller may already be gone during teardown
        let _ = events.send(Event::OutputDone {
            buffer,
            index,
            checksum_ok,
            callback,
        });
    });
}

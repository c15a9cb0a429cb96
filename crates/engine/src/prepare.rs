//! The prepare stage: a single background worker that packs raw input
//! slices into the staging layout and folds their running checksums.
//!
//! Jobs arrive on an unbounded FIFO; lane indices ascend within an
//! unsubmitted batch, so the single thread gives strict per-area
//! ordering for free. A job with no source buffer is a flush marker: it
//! packs nothing and only carries the dispatch signal. Whenever a batch
//! is submitted short of the full grouping, the vacant lanes are packed
//! from an empty source, which zero-fills them (checksum block
//! included) before any compute worker can read the area.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use gf16::FieldBackend;

use crate::buffer::SharedBuffer;
use crate::controller::PreparedCallback;
use crate::error::EngineError;
use crate::events::Event;

pub(crate) struct PrepareJob {
    pub staging: Arc<SharedBuffer>,
    /// Raw input bytes; `None` marks a flush.
    pub source: Option<Vec<u8>>,
    pub input_index: u16,
    pub on_prepared: Option<PreparedCallback>,
    /// Packed data-region length (aligned slice size minus the checksum
    /// stride).
    pub dst_region_len: usize,
    pub grouping: usize,
    pub lane: usize,
    pub chunk_len: usize,
    pub area_id: usize,
    /// Non-zero when this job completes a batch.
    pub submit_batch_size: usize,
}

pub(crate) struct PrepareStage {
    pub tx: Sender<PrepareJob>,
    pub handle: JoinHandle<()>,
}

pub(crate) fn spawn(
    backend: Arc<dyn FieldBackend>,
    events: Sender<Event>,
) -> Result<PrepareStage, EngineError> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let handle = thread::Builder::new()
        .name("rs-prepare".into())
        .spawn(move || run(&*backend, &rx, &events))
        .map_err(EngineError::Spawn)?;
    Ok(PrepareStage { tx, handle })
}

fn run(backend: &dyn FieldBackend, rx: &Receiver<PrepareJob>, events: &Sender<Event>) {
    while let Ok(job) = rx.recv() {
        let PrepareJob {
            staging,
            source,
            input_index,
            on_prepared,
            dst_region_len,
            grouping,
            lane,
            chunk_len,
            area_id,
            submit_batch_size,
        } = job;

        {
            // SAFETY: the controller routes every lane of an area
            // through this one thread and no compute worker reads the
            // area before observing the batch-ready event this loop
            // sends afterwards.
            let dst = unsafe { staging.slice_mut(0, staging.len()) };
            if let Some(src) = &source {
                backend.prepare_packed_cksum(dst, src, dst_region_len, grouping, lane, chunk_len);
            }
            if submit_batch_size > 0 {
                // zero-fill lanes left vacant by a partial batch
                for vacant in submit_batch_size..grouping {
                    backend.prepare_packed_cksum(
                        dst,
                        &[],
                        dst_region_len,
                        grouping,
                        vacant,
                        chunk_len,
                    );
                }
            }
        }

        if events
            .send(Event::Prepared {
                area_id,
                submit_batch_size,
                buffer: source,
                input_index,
                on_prepared,
            })
            .is_err()
        {
            // controller gone; nothing left to prepare for
            return;
        }
    }
}

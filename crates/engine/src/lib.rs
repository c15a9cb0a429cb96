#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `engine` computes PAR2-style Reed-Solomon recovery slices over
//! GF(2^16) at high throughput. Input slices stream in tagged with a
//! 16-bit input index; for every configured output exponent the pipeline
//! accumulates the XOR-sum of each input scaled by the coefficient
//! derived from the (input index, output exponent) pair.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                   Three-Stage Recovery Pipeline                  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  add_input ──► Prepare (1 thread)  ──► Compute (T workers)       │
//! │                pack + checksum         chunked mul-add into      │
//! │                into staging area       the accumulator           │
//! │                       │                        │                 │
//! │                       ▼                        ▼                 │
//! │              ┌─ completion events (MPSC channel) ─┐              │
//! │              │  drained on the controller thread  │              │
//! │              └────────────────────────────────────┘              │
//! │                                        │                         │
//! │  get_output ◄── Finish (rayon pool) ◄──┘                         │
//! │                 unpack + verify checksum                         │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two staging areas double-buffer the input side: one fills while the
//! other is processed. When both are awaiting processing, [`Pipeline::add_input`]
//! rejects the slice and hands the buffer back; the caller re-submits
//! after consuming a completion event.
//!
//! # Controller thread
//!
//! The thread that owns the [`Pipeline`] is the controller thread: all
//! state transitions and user callbacks happen there, inside
//! [`Pipeline::process_events`] or [`Pipeline::wait_event`]. Worker
//! threads never run user code; they post completion events to an
//! unbounded channel whose blocking receive doubles as the wake-up
//! signal.
//!
//! # Example
//!
//! ```
//! use engine::{Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::new(64).with_num_threads(1);
//! let mut pipeline = Pipeline::new(config).unwrap();
//! pipeline.set_recovery_slices(&[0, 1]);
//!
//! pipeline.add_input(vec![7u8; 64], 0, false, None).unwrap();
//! pipeline.end_input(Box::new(|| {}));
//! while pipeline.active_batches() > 0 {
//!     pipeline.wait_event();
//! }
//!
//! pipeline.get_output(0, vec![0u8; 64], Box::new(|out, _idx, ok| {
//!     assert!(ok);
//!     assert_eq!(out, vec![7u8; 64]);
//! }));
//! pipeline.wait_event();
//! ```

mod buffer;
mod compute;
mod controller;
mod error;
mod events;
mod finish;
mod prepare;
mod staging;

pub use controller::{
    FinishedCallback, OutputCallback, Pipeline, PipelineConfig, PreparedCallback,
    ProgressCallback, DEFAULT_INPUT_GROUPING,
};
pub use error::{EngineError, EngineResult, RejectedInput};
pub use gf16::Method;
pub use staging::NUM_STAGING_AREAS;

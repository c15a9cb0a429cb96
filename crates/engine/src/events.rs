//! Completion events posted by worker threads to the controller.
//!
//! A single unbounded MPSC channel carries all three event kinds; the
//! controller thread drains it and fires user callbacks in arrival
//! order. The blocking receive on the controller side is the wake-up
//! signal.

use crate::controller::{OutputCallback, PreparedCallback};

pub(crate) enum Event {
    /// The prepare worker packed a lane (or handled a flush marker).
    Prepared {
        area_id: usize,
        /// Non-zero when this job completed a batch: the number of
        /// inputs to dispatch.
        submit_batch_size: usize,
        /// The caller's input buffer, handed back through
        /// `on_prepared`; `None` for flush markers.
        buffer: Option<Vec<u8>>,
        input_index: u16,
        on_prepared: Option<PreparedCallback>,
    },
    /// The last chunk of a batch finished computing.
    BatchDone {
        area_id: usize,
        num_inputs: usize,
        first_input: u16,
    },
    /// A finish job unpacked and verified one output slice.
    OutputDone {
        buffer: Vec<u8>,
        index: usize,
        checksum_ok: bool,
        callback: OutputCallback,
    },
}

//! Shared helpers for pipeline integration tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use engine::Pipeline;

/// Routes pipeline tracing to the test output under `RUST_LOG`.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Reference recovery computation: the XOR-sum of every input scaled by
/// its coefficient, word-wise over little-endian u16s, inputs
/// zero-padded to `slice_size`.
pub fn reference_output(inputs: &[(Vec<u8>, u16)], exp: u16, slice_size: usize) -> Vec<u8> {
    let mut out = vec![0u8; slice_size];
    for (data, index) in inputs {
        let c = gf16::coeff(*index, exp);
        let mut k = 0;
        while k < slice_size {
            let lo = data.get(k).copied().unwrap_or(0);
            let hi = if k + 1 < slice_size {
                data.get(k + 1).copied().unwrap_or(0)
            } else {
                0
            };
            let word = gf16::mul(c, u16::from_le_bytes([lo, hi]));
            let [wlo, whi] = word.to_le_bytes();
            out[k] ^= wlo;
            if k + 1 < slice_size {
                out[k + 1] ^= whi;
            }
            k += 2;
        }
    }
    out
}

/// Submits one input, pumping events through back-pressure.
pub fn feed(pipeline: &mut Pipeline, mut buffer: Vec<u8>, index: u16) {
    loop {
        match pipeline.add_input(buffer, index, false, None) {
            Ok(()) => return,
            Err(rejected) => {
                buffer = rejected.buffer;
                pipeline.wait_event();
            }
        }
    }
}

/// Ends input and pumps events until the pipeline reports completion.
pub fn drain(pipeline: &mut Pipeline) {
    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    pipeline.end_input(Box::new(move || flag.store(true, Ordering::SeqCst)));
    while !done.load(Ordering::SeqCst) {
        pipeline.wait_event();
    }
}

/// Fetches one output, pumping events until the callback delivers it.
pub fn fetch_output(pipeline: &mut Pipeline, index: usize) -> (Vec<u8>, bool) {
    let slot: Arc<Mutex<Option<(Vec<u8>, bool)>>> = Arc::new(Mutex::new(None));
    let result = Arc::clone(&slot);
    pipeline.get_output(
        index,
        Vec::new(),
        Box::new(move |buffer, _index, checksum_ok| {
            *result.lock().unwrap() = Some((buffer, checksum_ok));
        }),
    );
    loop {
        if let Some(result) = slot.lock().unwrap().take() {
            return result;
        }
        pipeline.wait_event();
    }
}

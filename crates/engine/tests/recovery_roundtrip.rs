//! Vandermonde-style erasure recovery: with as many recovery outputs as
//! inputs (distinct non-zero exponents), the input-to-output map is
//! invertible, so the original slices can be reconstructed from the
//! recovery slices alone. The matrix inversion lives here, outside the
//! pipeline.

mod common;

use engine::{Method, Pipeline, PipelineConfig};
use gf16::tables::inv;
use gf16::{coeff, mul};
use rand::{Rng, SeedableRng, rngs::StdRng};

use common::{drain, feed, fetch_output, init_logging, reference_output};

/// Gauss-Jordan inversion over GF(2^16).
fn invert(mut m: Vec<Vec<u16>>) -> Vec<Vec<u16>> {
    let n = m.len();
    let mut id: Vec<Vec<u16>> = (0..n)
        .map(|i| (0..n).map(|j| u16::from(i == j)).collect())
        .collect();

    for col in 0..n {
        let pivot = (col..n)
            .find(|&row| m[row][col] != 0)
            .expect("recovery matrix is singular");
        m.swap(col, pivot);
        id.swap(col, pivot);

        let scale = inv(m[col][col]);
        for k in 0..n {
            m[col][k] = mul(m[col][k], scale);
            id[col][k] = mul(id[col][k], scale);
        }

        for row in 0..n {
            if row == col || m[row][col] == 0 {
                continue;
            }
            let factor = m[row][col];
            for k in 0..n {
                let mk = mul(factor, m[col][k]);
                m[row][k] ^= mk;
                let ik = mul(factor, id[col][k]);
                id[row][k] ^= ik;
            }
        }
    }
    id
}

#[test]
fn erased_inputs_recover_from_recovery_slices() {
    let slice_size = 128usize;
    let n = 6usize;
    let exponents: Vec<u16> = (1..=n as u16).collect();

    let mut rng = StdRng::seed_from_u64(2024);
    let inputs: Vec<(Vec<u8>, u16)> = (0..n)
        .map(|i| {
            let data: Vec<u8> = (0..slice_size).map(|_| rng.r#gen()).collect();
            (data, i as u16)
        })
        .collect();

    init_logging();
    let mut p = Pipeline::new(
        PipelineConfig::new(slice_size)
            .with_method(Method::Lookup)
            .with_num_threads(2)
            .with_target_input_grouping(4),
    )
    .unwrap();
    p.set_recovery_slices(&exponents);

    for (data, index) in &inputs {
        feed(&mut p, data.clone(), *index);
    }
    drain(&mut p);

    let outputs: Vec<Vec<u8>> = (0..n)
        .map(|out| {
            let (buf, ok) = fetch_output(&mut p, out);
            assert!(ok, "checksum failed for output {out}");
            buf
        })
        .collect();

    for (out, &exp) in outputs.iter().zip(&exponents) {
        assert_eq!(out, &reference_output(&inputs, exp, slice_size));
    }

    // pretend every input was erased: solve M x = o
    let matrix: Vec<Vec<u16>> = exponents
        .iter()
        .map(|&e| (0..n as u16).map(|i| coeff(i, e)).collect())
        .collect();
    let minv = invert(matrix);

    for (i, (original, _)) in inputs.iter().enumerate() {
        let mut recovered = vec![0u8; slice_size];
        for (j, output) in outputs.iter().enumerate() {
            let c = minv[i][j];
            for k in (0..slice_size).step_by(2) {
                let word = mul(c, u16::from_le_bytes([output[k], output[k + 1]]));
                let [lo, hi] = word.to_le_bytes();
                recovered[k] ^= lo;
                recovered[k + 1] ^= hi;
            }
        }
        assert_eq!(&recovered, original, "input {i} did not reconstruct");
    }
}

#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `gf16` provides the GF(2^16) arithmetic underlying PAR2-style
//! Reed-Solomon recovery: the process-wide log/antilog tables for the
//! field polynomial 0x1100B, the Vandermonde-style coefficient formula
//! that ties a 16-bit input index and a 16-bit output exponent to a
//! field coefficient, and the [`backend::FieldBackend`] capability trait
//! through which the processing pipeline drives the packed
//! multiply-accumulate kernels.
//!
//! # Design
//!
//! The crate is split into three layers:
//!
//! - [`tables`] builds the log/antilog tables once, behind a first-use
//!   latch, and exposes the scalar primitives (`mul`, `mul2`, `exp`,
//!   `log`) every other layer builds on.
//! - [`coeff`] implements the coefficient algebra: `coeff(i, e)` is the
//!   field element `(i + 1)^e`, computed as one table multiplication per
//!   cell.
//! - [`backend`] abstracts the throughput kernels (packed prepare/finish
//!   with a running checksum, `mul_add_multi`, `add_multi`) behind a
//!   capability object so the pipeline can query alignment, stride and
//!   chunking metadata instead of assuming any particular SIMD family.
//!
//! The one backend shipped here is the portable split-table
//! implementation ([`backend::Method::Lookup`]); accelerated kernels
//! plug in behind the same trait.
//!
//! # Invariants
//!
//! - Tables are immutable after construction; all readers share one
//!   static instance.
//! - `coeff(i, 0) == 1` for every valid input index `i`.
//! - A packed prepare followed by a packed finish of the same lane
//!   reproduces the original bytes and reports a matching checksum.

pub mod backend;
pub mod coeff;
pub mod tables;

pub use backend::{BackendError, BackendInfo, FieldBackend, Method, Scratch};
pub use coeff::{coeff, coeff_from_log, input_log};
pub use tables::{mul, mul2, GF16_POLYNOMIAL};

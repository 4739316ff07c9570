#![warn(
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    rust_2018_idioms
)]

//! The reusable library powering `mongogen`.

#[cfg(feature = "cli")]
pub mod cli;
pub mod emit;
pub mod error;
pub mod format;
pub mod freq;
pub mod gen;
pub mod idcache;
pub mod infer;
pub mod keygen;
pub mod keypattern;
pub mod manifest;
pub mod profile;
pub mod ratelimit;
pub mod sampler;
pub mod synth;
pub mod validate;
pub mod value;
pub mod workload;

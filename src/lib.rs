//! Receive probe for IEC 61850 process-bus traffic.
//!
//! Frames are classified as GOOSE, Sampled Values or other traffic, parsed
//! in place, matched against the configured publishers and checked for
//! sequence gaps. Work is spread over worker threads by APPID.

pub mod config;
pub mod decode_basics;
pub mod decode_goose;
pub mod decode_smv;
pub mod encode_basics;
pub mod encode_goose;
pub mod encode_smv;
pub mod pipeline;
pub mod pool;
pub mod probe;
pub mod registry;
pub mod rx;
pub mod sequence;
pub mod stats;
pub mod types;
pub mod worker;

pub use config::{ConfigError, ProbeConfig};
pub use probe::{Probe, ProbeError, ProbeReport};

//! Codec component simulator
//!
//! Drives a set of codec components over the loopback driver the way a media
//! framework would: each component gets a host thread that admits it against
//! a shared hardware pool, streams a synthetic bitstream through it, and tears
//! it down. Pool sizes and priorities decide who waits and who is preempted.

pub mod config;
pub mod error;
pub mod runner;

pub use config::{Cli, SimComponent, SimConfig, StreamSettings};
pub use error::{Result, SimError};
pub use runner::{ComponentReport, Simulation};

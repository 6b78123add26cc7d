//! hwcodec - Codec Backends
//!
//! Concrete [`hwcodec_core::CodecBackend`] implementations, one per codec
//! family, chosen when a component is built.
//!
//! This crate provides:
//! - [`CodecFormat`]: H.264, MPEG-4, H.263, VC-1 and WMV
//! - [`Framer`]: start-code based frame boundary detection per format
//! - [`CodecDriver`]: the seam over one hardware codec instance
//! - [`LoopbackDriver`]: a software driver echoing units back
//! - [`FormatBackend`]: framer plus driver as a `CodecBackend`
//!
//! # Example
//!
//! ```rust
//! use hwcodec_backends::{synthetic, CodecFormat, Framer};
//!
//! let pictures = synthetic::pictures(CodecFormat::H264, 3, 16);
//! let stream = pictures.concat();
//! let units = Framer::new(CodecFormat::H264).split(&stream);
//! assert_eq!(units.len(), 3);
//! ```

mod backend;
mod driver;
mod error;
mod format;
mod framing;
pub mod synthetic;

pub use backend::FormatBackend;
pub use driver::{CodecDriver, DriverStatus, LoopbackDriver, LoopbackSettings, MAX_LATENCY};
pub use error::{DriverError, Result};
pub use format::CodecFormat;
pub use framing::{find_start_code, Framer};

//! Error returned when the host hands over a buffer that cannot be accepted

use hwcodec_core::{BufferHeader, CodecError};
use thiserror::Error;

/// A buffer hand-off was refused; the host keeps ownership of `buffer`
#[derive(Debug, Error)]
#[error("Buffer rejected: {error}")]
pub struct BufferRejected {
    /// Why the buffer was refused
    pub error: CodecError,

    /// The buffer, returned untouched
    pub buffer: BufferHeader,
}

impl BufferRejected {
    pub(crate) fn new(error: CodecError, buffer: BufferHeader) -> Self {
        Self { error, buffer }
    }

    /// Split into the error and the returned buffer
    pub fn into_parts(self) -> (CodecError, BufferHeader) {
        (self.error, self.buffer)
    }
}

impl From<BufferRejected> for CodecError {
    fn from(rejected: BufferRejected) -> Self {
        rejected.error
    }
}

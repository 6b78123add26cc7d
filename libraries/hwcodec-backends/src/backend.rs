//! [`CodecBackend`] built from a format framer and a driver

use crate::driver::{CodecDriver, DriverStatus, LoopbackDriver, LoopbackSettings};
use crate::format::CodecFormat;
use crate::framing::Framer;
use hwcodec_core::{
    BufferFlags, CodecBackend, CodecClass, CodecError, CodecInput, ConfigValue, FrameBoundary,
    ProcessResult, Result,
};
use tracing::debug;

/// Codec family backend: frames `format` bitstreams and runs them on `D`
#[derive(Debug)]
pub struct FormatBackend<D> {
    framer: Framer,
    driver: D,
}

impl<D: CodecDriver> FormatBackend<D> {
    pub fn new(format: CodecFormat, driver: D) -> Self {
        Self {
            framer: Framer::new(format),
            driver,
        }
    }

    pub fn format(&self) -> CodecFormat {
        self.framer.format()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}

impl FormatBackend<LoopbackDriver> {
    /// Backend over the software loopback driver
    pub fn loopback(format: CodecFormat, settings: LoopbackSettings) -> Self {
        Self::new(format, LoopbackDriver::new(settings))
    }
}

impl<D: CodecDriver> CodecBackend for FormatBackend<D> {
    fn name(&self) -> &str {
        self.format().as_str()
    }

    fn open(&mut self, class: CodecClass) -> Result<()> {
        let format = self.format();
        self.driver
            .open(format, class)
            .map_err(|e| CodecError::CodecOpen(e.to_string()))
    }

    fn close(&mut self) {
        self.driver.close();
    }

    fn set_config(&mut self, key: &str, value: ConfigValue) -> Result<()> {
        Ok(self.driver.set_config(key, value)?)
    }

    fn get_config(&self, key: &str) -> Result<ConfigValue> {
        Ok(self.driver.get_config(key)?)
    }

    fn check_frame(&self, pending: &[u8], incoming: &[u8]) -> FrameBoundary {
        self.framer.check(pending, incoming)
    }

    fn process(&mut self, input: &CodecInput<'_>, output: &mut Vec<u8>) -> Result<ProcessResult> {
        match self.driver.execute(input.data, input.tag, output)? {
            DriverStatus::Emitted { tag } => Ok(ProcessResult::Produced {
                tag: Some(tag),
                flags: BufferFlags::empty(),
            }),
            DriverStatus::Retry => Ok(ProcessResult::NotReady),
            DriverStatus::FormatChanged => {
                debug!(format = %self.format(), "driver reported new output format");
                Ok(ProcessResult::PortSettingsChanged)
            }
        }
    }

    fn drain(&mut self, output: &mut Vec<u8>) -> Result<ProcessResult> {
        Ok(match self.driver.drain(output)? {
            Some(tag) => ProcessResult::Produced {
                tag: Some(tag),
                flags: BufferFlags::empty(),
            },
            None => ProcessResult::NotReady,
        })
    }
}

//! Codec driver seam and the software loopback driver
//!
//! A [`CodecDriver`] is the thin layer over one hardware codec instance:
//! open/close, key-value configuration and a blocking execute call. The
//! [`LoopbackDriver`] stands in for the hardware in the simulator and tests.

use crate::error::{DriverError, Result};
use crate::format::CodecFormat;
use hwcodec_core::{CodecClass, ConfigValue, FrameTag};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Maximum number of units the loopback driver holds back
pub const MAX_LATENCY: usize = 15;

/// Outcome of one execute call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    /// Output was written; it belongs to the unit submitted with `tag`
    Emitted {
        /// Tag of the unit the output was decoded or encoded from
        tag: FrameTag,
    },

    /// Input accepted, no output yet
    Retry,

    /// Picture geometry changed; nothing was emitted
    FormatChanged,
}

/// Driver for one hardware codec instance
///
/// Every call may block.
pub trait CodecDriver: Send {
    fn open(&mut self, format: CodecFormat, class: CodecClass) -> Result<()>;

    /// Release the instance; no-op when not open
    fn close(&mut self);

    fn set_config(&mut self, key: &str, value: ConfigValue) -> Result<()>;

    fn get_config(&self, key: &str) -> Result<ConfigValue>;

    /// Run one unit, appending any output to `output`
    fn execute(&mut self, input: &[u8], tag: FrameTag, output: &mut Vec<u8>)
        -> Result<DriverStatus>;

    /// Flush out one unit the instance still holds, appending it to `output`
    ///
    /// Returns the unit's tag, or `None` once nothing is held.
    fn drain(&mut self, output: &mut Vec<u8>) -> Result<Option<FrameTag>> {
        let _ = output;
        Ok(None)
    }
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_bitrate_kbps() -> u32 {
    4000
}

/// Tunables of the loopback driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopbackSettings {
    /// Picture width reported through `get_config("width")`
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_bitrate_kbps")]
    pub bitrate_kbps: u32,

    /// Units held back before the first output, like a decoder's reorder delay
    #[serde(default)]
    pub latency: usize,

    /// Time each execute call spends "on the hardware"
    #[serde(default)]
    pub execute_delay_ms: u64,
}

impl Default for LoopbackSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            bitrate_kbps: default_bitrate_kbps(),
            latency: 0,
            execute_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Session {
    format: CodecFormat,
    class: CodecClass,
}

/// Software driver echoing every unit back, optionally delayed
///
/// Changing the geometry while open makes the next execute report
/// [`DriverStatus::FormatChanged`]. Setting `fail_next` makes the next
/// execute fail.
#[derive(Debug, Default)]
pub struct LoopbackDriver {
    settings: LoopbackSettings,
    session: Option<Session>,
    held: VecDeque<(FrameTag, Vec<u8>)>,
    geometry_changed: bool,
    fail_next: bool,
    frames: u64,
}

impl LoopbackDriver {
    pub fn new(settings: LoopbackSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn positive(key: &str, value: &ConfigValue) -> Result<u32> {
        value
            .as_int()
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
            .ok_or_else(|| DriverError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected a positive integer, got {value:?}"),
            })
    }
}

impl CodecDriver for LoopbackDriver {
    fn open(&mut self, format: CodecFormat, class: CodecClass) -> Result<()> {
        if !format.supports(class) {
            return Err(DriverError::Unsupported(format!("{format} {class:?}")));
        }
        self.session = Some(Session { format, class });
        self.held.clear();
        self.geometry_changed = false;
        self.frames = 0;
        debug!(%format, ?class, "loopback driver opened");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if !self.held.is_empty() {
                debug!(format = %session.format, held = self.held.len(), "discarding held units");
            }
            self.held.clear();
            debug!(
                format = %session.format,
                class = ?session.class,
                frames = self.frames,
                "loopback driver closed"
            );
        }
    }

    fn set_config(&mut self, key: &str, value: ConfigValue) -> Result<()> {
        match key {
            "width" | "height" => {
                let size = Self::positive(key, &value)?;
                let field = if key == "width" {
                    &mut self.settings.width
                } else {
                    &mut self.settings.height
                };
                if *field != size {
                    *field = size;
                    self.geometry_changed = self.is_open();
                }
            }
            "bitrate_kbps" => self.settings.bitrate_kbps = Self::positive(key, &value)?,
            "latency" => {
                let latency = value
                    .as_int()
                    .and_then(|v| usize::try_from(v).ok())
                    .filter(|v| *v <= MAX_LATENCY)
                    .ok_or_else(|| DriverError::InvalidValue {
                        key: key.to_string(),
                        reason: format!("expected 0..={MAX_LATENCY}, got {value:?}"),
                    })?;
                self.settings.latency = latency;
            }
            "execute_delay_ms" => {
                self.settings.execute_delay_ms = value
                    .as_int()
                    .and_then(|v| u64::try_from(v).ok())
                    .ok_or_else(|| DriverError::InvalidValue {
                        key: key.to_string(),
                        reason: format!("expected milliseconds, got {value:?}"),
                    })?;
            }
            "fail_next" => {
                self.fail_next = value.as_bool().ok_or_else(|| DriverError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("expected a boolean, got {value:?}"),
                })?;
            }
            "frames" => {
                return Err(DriverError::InvalidValue {
                    key: key.to_string(),
                    reason: "read-only".to_string(),
                });
            }
            _ => return Err(DriverError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn get_config(&self, key: &str) -> Result<ConfigValue> {
        let value = match key {
            "width" => ConfigValue::Int(i64::from(self.settings.width)),
            "height" => ConfigValue::Int(i64::from(self.settings.height)),
            "bitrate_kbps" => ConfigValue::Int(i64::from(self.settings.bitrate_kbps)),
            "latency" => ConfigValue::Int(self.settings.latency as i64),
            "execute_delay_ms" => ConfigValue::Int(self.settings.execute_delay_ms as i64),
            "fail_next" => ConfigValue::Bool(self.fail_next),
            "frames" => ConfigValue::Int(self.frames as i64),
            _ => return Err(DriverError::UnknownKey(key.to_string())),
        };
        Ok(value)
    }

    fn execute(
        &mut self,
        input: &[u8],
        tag: FrameTag,
        output: &mut Vec<u8>,
    ) -> Result<DriverStatus> {
        let Some(session) = self.session else {
            return Err(DriverError::NotOpen);
        };
        if std::mem::take(&mut self.fail_next) {
            warn!(format = %session.format, tag = tag.0, "injected execution failure");
            return Err(DriverError::Execution(format!("unit {} rejected", tag.0)));
        }
        if std::mem::take(&mut self.geometry_changed) {
            debug!(
                format = %session.format,
                width = self.settings.width,
                height = self.settings.height,
                "geometry changed"
            );
            return Ok(DriverStatus::FormatChanged);
        }

        if self.settings.execute_delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.settings.execute_delay_ms));
        }
        self.frames += 1;
        self.held.push_back((tag, input.to_vec()));
        if self.held.len() <= self.settings.latency {
            trace!(format = %session.format, held = self.held.len(), "holding unit");
            return Ok(DriverStatus::Retry);
        }
        match self.held.pop_front() {
            Some((tag, data)) => {
                output.extend_from_slice(&data);
                Ok(DriverStatus::Emitted { tag })
            }
            None => Ok(DriverStatus::Retry),
        }
    }

    fn drain(&mut self, output: &mut Vec<u8>) -> Result<Option<FrameTag>> {
        let Some(session) = self.session else {
            return Err(DriverError::NotOpen);
        };
        let Some((tag, data)) = self.held.pop_front() else {
            return Ok(None);
        };
        trace!(format = %session.format, tag = tag.0, left = self.held.len(), "draining unit");
        output.extend_from_slice(&data);
        Ok(Some(tag))
    }
}

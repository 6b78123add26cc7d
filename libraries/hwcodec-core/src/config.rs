//! Component and resource pool configuration
use crate::error::{CodecError, Result};
use crate::types::{CodecClass, PortIndex};
use serde::{Deserialize, Serialize};

/// Per-component settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ComponentConfig {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_class")]
    pub class: CodecClass,

    /// Admission priority; larger values win preemption
    #[serde(default)]
    pub priority: u32,

    #[serde(default = "default_input_port")]
    pub input: PortConfig,

    #[serde(default = "default_output_port")]
    pub output: PortConfig,

    /// Capacity of the frame accumulation buffer
    #[serde(default = "default_work_buffer_size")]
    pub work_buffer_size: usize,

    /// Bound on buffer rendezvous waits during transitions (`None` = wait forever)
    #[serde(default)]
    pub transition_timeout_ms: Option<u64>,
}

/// Buffer requirements of one port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PortConfig {
    /// Number of buffers the host must supply before the port is populated
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,

    /// Smallest `buffer_count` the codec can work with
    #[serde(default = "default_min_buffer_count")]
    pub min_buffer_count: usize,

    /// Minimum size of each buffer in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Size of the hardware pools shared by all components in the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResourceLimits {
    #[serde(default = "default_max_decoders")]
    pub max_decoders: usize,

    #[serde(default = "default_max_encoders")]
    pub max_encoders: usize,
}

impl ComponentConfig {
    /// Create a config with defaults for the given name and class
    pub fn new(name: impl Into<String>, class: CodecClass) -> Self {
        Self {
            name: name.into(),
            class,
            ..Self::default()
        }
    }

    /// Port settings by index
    pub fn port(&self, port: PortIndex) -> &PortConfig {
        match port {
            PortIndex::Input => &self.input,
            PortIndex::Output => &self.output,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CodecError::bad_parameter("component name is required"));
        }
        for port in PortIndex::BOTH {
            self.port(port)
                .validate()
                .map_err(|e| CodecError::bad_parameter(format!("{port:?} port: {e}")))?;
        }
        if self.work_buffer_size == 0 {
            return Err(CodecError::bad_parameter(
                "work_buffer_size must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl PortConfig {
    /// Validate buffer requirements
    pub fn validate(&self) -> Result<()> {
        if self.min_buffer_count == 0 {
            return Err(CodecError::bad_parameter("min_buffer_count must be at least 1"));
        }
        if self.buffer_count < self.min_buffer_count {
            return Err(CodecError::bad_parameter(format!(
                "buffer_count {} is below the minimum {}",
                self.buffer_count, self.min_buffer_count
            )));
        }
        if self.buffer_size == 0 {
            return Err(CodecError::bad_parameter("buffer_size must be greater than zero"));
        }
        Ok(())
    }
}

impl ResourceLimits {
    /// Pool size for a codec class
    pub fn max_for(&self, class: CodecClass) -> usize {
        match class {
            CodecClass::Decode => self.max_decoders,
            CodecClass::Encode => self.max_encoders,
        }
    }

    /// Validate pool sizes
    pub fn validate(&self) -> Result<()> {
        if self.max_decoders == 0 && self.max_encoders == 0 {
            return Err(CodecError::bad_parameter(
                "resource pool needs at least one decoder or encoder slot",
            ));
        }
        Ok(())
    }
}

// Default values
fn default_name() -> String {
    "hwcodec.component".to_string()
}

fn default_class() -> CodecClass {
    CodecClass::Decode
}

fn default_input_port() -> PortConfig {
    PortConfig {
        buffer_count: 2,
        min_buffer_count: 1,
        buffer_size: 256 * 1024,
        enabled: true,
    }
}

fn default_output_port() -> PortConfig {
    PortConfig {
        buffer_count: 3,
        min_buffer_count: 1,
        buffer_size: 1024 * 1024,
        enabled: true,
    }
}

fn default_buffer_count() -> usize {
    2
}

fn default_min_buffer_count() -> usize {
    1
}

fn default_buffer_size() -> usize {
    64 * 1024
}

fn default_enabled() -> bool {
    true
}

fn default_work_buffer_size() -> usize {
    1024 * 1024
}

fn default_max_decoders() -> usize {
    2
}

fn default_max_encoders() -> usize {
    1
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            class: default_class(),
            priority: 0,
            input: default_input_port(),
            output: default_output_port(),
            work_buffer_size: default_work_buffer_size(),
            transition_timeout_ms: None,
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            buffer_count: default_buffer_count(),
            min_buffer_count: default_min_buffer_count(),
            buffer_size: default_buffer_size(),
            enabled: default_enabled(),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_decoders: default_max_decoders(),
            max_encoders: default_max_encoders(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ComponentConfig::default().validate().is_ok());
    }

    #[test]
    fn test_buffer_count_below_minimum_rejected() {
        let mut config = ComponentConfig::default();
        config.output.min_buffer_count = 4;
        config.output.buffer_count = 2;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CodecError::BadParameter(msg) if msg.contains("Output")));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ComponentConfig =
            serde_json::from_str(r#"{"name":"dec0","class":"encode","priority":7}"#).unwrap();
        assert_eq!(config.name, "dec0");
        assert_eq!(config.class, CodecClass::Encode);
        assert_eq!(config.priority, 7);
        assert_eq!(config.input, default_input_port());
        assert_eq!(config.transition_timeout_ms, None);
    }

    #[test]
    fn test_limits_per_class() {
        let limits = ResourceLimits {
            max_decoders: 3,
            max_encoders: 1,
        };
        assert_eq!(limits.max_for(CodecClass::Decode), 3);
        assert_eq!(limits.max_for(CodecClass::Encode), 1);
        assert!(limits.validate().is_ok());
        let empty = ResourceLimits {
            max_decoders: 0,
            max_encoders: 0,
        };
        assert!(empty.validate().is_err());
    }
}

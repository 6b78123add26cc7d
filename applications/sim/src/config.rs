//! Simulator configuration
use crate::error::{Result, SimError};
use clap::Parser;
use hwcodec_backends::{CodecFormat, LoopbackSettings};
use hwcodec_core::{CodecClass, ComponentConfig, PortConfig, ResourceLimits};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Bytes reserved in every buffer for start codes and sequence headers
pub const HEADER_ROOM: usize = 32;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "hwcodec-sim")]
#[command(about = "Run codec components over the loopback driver", long_about = None)]
pub struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, env = "HWCODEC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Pictures streamed through every component
    #[arg(long)]
    pub pictures: Option<u64>,

    /// Decoder slots in the hardware pool
    #[arg(long)]
    pub max_decoders: Option<u64>,

    /// Encoder slots in the hardware pool
    #[arg(long)]
    pub max_encoders: Option<u64>,

    /// Bound on every single wait, in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    pub print_config: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimConfig {
    #[serde(default)]
    pub pool: ResourceLimits,

    #[serde(default = "default_stream")]
    pub stream: StreamSettings,

    /// Bound on any single wait for a component, and on buffer rendezvous
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How long a parked component may wait for a hardware slot
    #[serde(default = "default_admission_timeout_ms")]
    pub admission_timeout_ms: u64,

    #[serde(default = "default_components")]
    pub components: Vec<SimComponent>,
}

/// Shape of the synthetic bitstream
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamSettings {
    #[serde(default = "default_pictures")]
    pub pictures: usize,

    /// Filler bytes per picture after its start codes
    #[serde(default = "default_payload_len")]
    pub payload_len: usize,

    /// Host buffers each picture is cut into
    #[serde(default = "default_pieces")]
    pub pieces: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimComponent {
    pub name: String,

    pub format: CodecFormat,

    #[serde(default = "default_class")]
    pub class: CodecClass,

    #[serde(default)]
    pub priority: u32,

    /// Buffers per port
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Delay before the component is created
    #[serde(default)]
    pub start_delay_ms: u64,

    #[serde(default)]
    pub loopback: LoopbackSettings,
}

impl SimComponent {
    pub fn new(name: &str, format: CodecFormat, class: CodecClass) -> Self {
        Self {
            name: name.to_string(),
            format,
            class,
            priority: 0,
            buffer_count: default_buffer_count(),
            buffer_size: default_buffer_size(),
            start_delay_ms: 0,
            loopback: LoopbackSettings::default(),
        }
    }

    /// Runtime configuration for this component
    pub fn component_config(&self, timeout_ms: u64) -> ComponentConfig {
        let port = PortConfig {
            buffer_count: self.buffer_count,
            min_buffer_count: 1,
            buffer_size: self.buffer_size,
            enabled: true,
        };
        let mut config = ComponentConfig::new(self.name.clone(), self.class);
        config.priority = self.priority;
        config.input = port;
        config.output = port;
        config.work_buffer_size = self.buffer_size * 2;
        config.transition_timeout_ms = Some(timeout_ms);
        config
    }
}

impl SimConfig {
    /// Load configuration from the optional file, the environment and CLI overrides
    ///
    /// Environment variables are prefixed `HWCODEC_` and nest with `__`, e.g.
    /// `HWCODEC_POOL__MAX_DECODERS=1`.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut settings = config::Config::builder();

        if let Some(path) = &cli.config {
            settings = settings.add_source(config::File::from(path.as_path()));
        }

        settings = settings.add_source(
            config::Environment::with_prefix("HWCODEC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        settings = settings
            .set_override_option("stream.pictures", cli.pictures)
            .and_then(|s| s.set_override_option("pool.max_decoders", cli.max_decoders))
            .and_then(|s| s.set_override_option("pool.max_encoders", cli.max_encoders))
            .and_then(|s| s.set_override_option("timeout_ms", cli.timeout_ms))
            .map_err(|e| SimError::Config(e.to_string()))?;

        let config = settings
            .build()
            .map_err(|e| SimError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| SimError::Config(e.to_string()))
    }

    /// Load from a file only, ignoring environment and CLI
    pub fn from_file(path: &Path) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| SimError::Config(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.pool
            .validate()
            .map_err(|e| SimError::Config(e.to_string()))?;

        if self.components.is_empty() {
            return Err(SimError::Config("at least one component is required".to_string()));
        }
        if self.stream.pictures == 0 {
            return Err(SimError::Config("stream.pictures must be at least 1".to_string()));
        }
        if self.stream.pieces == 0 || self.stream.pieces > self.stream.payload_len {
            return Err(SimError::Config(format!(
                "stream.pieces must be between 1 and payload_len ({})",
                self.stream.payload_len
            )));
        }

        let mut names = HashSet::new();
        for component in &self.components {
            if !names.insert(component.name.as_str()) {
                return Err(SimError::Config(format!(
                    "duplicate component name {}",
                    component.name
                )));
            }
            if !component.format.supports(component.class) {
                return Err(SimError::Config(format!(
                    "{}: {} has no {:?} hardware",
                    component.name, component.format, component.class
                )));
            }
            if component.buffer_size < self.stream.payload_len + HEADER_ROOM {
                return Err(SimError::Config(format!(
                    "{}: buffer_size {} cannot hold a {}-byte picture",
                    component.name,
                    component.buffer_size,
                    self.stream.payload_len + HEADER_ROOM
                )));
            }
            component
                .component_config(self.timeout_ms)
                .validate()
                .map_err(|e| SimError::Config(format!("{}: {e}", component.name)))?;
        }

        Ok(())
    }
}

// Default values
fn default_stream() -> StreamSettings {
    StreamSettings {
        pictures: default_pictures(),
        payload_len: default_payload_len(),
        pieces: default_pieces(),
    }
}

fn default_pictures() -> usize {
    60
}

fn default_payload_len() -> usize {
    1024
}

fn default_pieces() -> usize {
    2
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_admission_timeout_ms() -> u64 {
    60_000
}

fn default_class() -> CodecClass {
    CodecClass::Decode
}

fn default_buffer_count() -> usize {
    4
}

fn default_buffer_size() -> usize {
    16 * 1024
}

/// Two decoders contending for one slot plus an encoder with its own pool
fn default_components() -> Vec<SimComponent> {
    vec![
        SimComponent::new("h264-dec", CodecFormat::H264, CodecClass::Decode),
        SimComponent::new("mpeg4-dec", CodecFormat::Mpeg4, CodecClass::Decode),
        SimComponent::new("h263-enc", CodecFormat::H263, CodecClass::Encode),
    ]
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            pool: ResourceLimits {
                max_decoders: 1,
                max_encoders: 1,
            },
            stream: default_stream(),
            timeout_ms: default_timeout_ms(),
            admission_timeout_ms: default_admission_timeout_ms(),
            components: default_components(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool.max_decoders, 1);
        assert_eq!(config.components.len(), 3);
    }

    #[test]
    fn test_file_fills_in_defaults() {
        let file = write_toml(
            r#"
            [pool]
            max_decoders = 3

            [[components]]
            name = "cam"
            format = "vc1"
            priority = 7
            "#,
        );
        let config = SimConfig::from_file(file.path()).unwrap();
        assert_eq!(config.pool.max_decoders, 3);
        assert_eq!(config.pool.max_encoders, 1);
        assert_eq!(config.stream.pictures, 60);
        assert_eq!(config.components.len(), 1);
        let cam = &config.components[0];
        assert_eq!(cam.format, CodecFormat::Vc1);
        assert_eq!(cam.class, CodecClass::Decode);
        assert_eq!(cam.priority, 7);
        assert_eq!(cam.loopback, LoopbackSettings::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = write_toml(
            r#"
            [stream]
            pictures = 10
            "#,
        );
        let cli = Cli::try_parse_from([
            "hwcodec-sim",
            "--config",
            file.path().to_str().unwrap(),
            "--pictures",
            "4",
            "--max-decoders",
            "2",
        ])
        .unwrap();
        let config = SimConfig::load(&cli).unwrap();
        assert_eq!(config.stream.pictures, 4);
        assert_eq!(config.pool.max_decoders, 2);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/hwcodec-sim.toml")),
            ..Cli::default()
        };
        assert!(matches!(SimConfig::load(&cli), Err(SimError::Config(_))));
    }

    #[test]
    fn test_validation_rejects_bad_setups() {
        let mut config = SimConfig::default();
        config.components.clear();
        assert!(config.validate().is_err());

        let mut config = SimConfig::default();
        config.components[1].name = "h264-dec".to_string();
        assert!(config.validate().is_err());

        let mut config = SimConfig::default();
        config.components[0] = SimComponent::new("wmv-enc", CodecFormat::Wmv, CodecClass::Encode);
        assert!(config.validate().is_err());

        let mut config = SimConfig::default();
        config.components[0].buffer_size = 256;
        assert!(config.validate().is_err());

        let mut config = SimConfig::default();
        config.stream.pieces = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_component_config_carries_timeout_and_priority() {
        let mut component = SimComponent::new("dec", CodecFormat::H264, CodecClass::Decode);
        component.priority = 9;
        let config = component.component_config(1500);
        assert_eq!(config.priority, 9);
        assert_eq!(config.transition_timeout_ms, Some(1500));
        assert_eq!(config.input.buffer_count, 4);
        assert!(config.validate().is_ok());
    }
}

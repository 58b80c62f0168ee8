use config::{Config, ConfigError, Environment, File};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Highest pacing rate a session accepts
pub const MAX_FRAME_RATE: u32 = 1000;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DepthcamConfig {
    pub recording: RecordingConfig,
    pub network: NetworkConfig,
    pub aggregate: AggregateConfig,
    pub sensor: SensorConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RecordingConfig {
    /// Target frame rate of the pacing loop and of the encoded files
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,

    /// Root directory under which one directory per session is created
    #[serde(default = "default_output_path")]
    pub output_path: String,

    /// Container backend used by the per-channel file sinks
    #[serde(default = "default_container")]
    pub container: ContainerFormat,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NetworkConfig {
    /// Enable the per-channel UDP sinks
    #[serde(default = "default_network_enabled")]
    pub enabled: bool,

    /// Destination address for datagrams
    #[serde(default = "default_network_ip")]
    pub ip: String,

    /// Destination port for datagrams
    #[serde(default = "default_network_port")]
    pub port: u16,

    /// Upper bound on a single send call
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AggregateConfig {
    /// Enable the all-channel HTTP publisher
    #[serde(default = "default_aggregate_enabled")]
    pub enabled: bool,

    /// Endpoint host
    #[serde(default = "default_aggregate_ip")]
    pub ip: String,

    /// Endpoint port
    #[serde(default = "default_aggregate_port")]
    pub port: u16,

    /// Endpoint path, e.g. "/frames"
    #[serde(default = "default_aggregate_path")]
    pub path: String,

    /// Per-request timeout
    #[serde(default = "default_aggregate_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum number of requests in flight at once
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SensorConfig {
    /// Color channel resolution (width, height)
    #[serde(default = "default_color_resolution")]
    pub color_resolution: (u32, u32),

    /// Depth channel resolution (width, height)
    #[serde(default = "default_depth_resolution")]
    pub depth_resolution: (u32, u32),

    /// Native refresh rate of the device
    #[serde(default = "default_sensor_fps")]
    pub fps: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Interval of the recording status line
    #[serde(default = "default_status_interval")]
    pub status_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// Length-prefixed raw frames, always available
    Raw,
    /// H.264 in MP4 via GStreamer (`video_encoding` feature)
    Mp4,
}

impl NetworkConfig {
    /// Resolve the datagram destination, if the address parses
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.ip
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl AggregateConfig {
    /// Full endpoint URL, e.g. `http://127.0.0.1:8000/frames`
    pub fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("http://{}:{}{}", self.ip, self.port, path)
    }
}

impl RecordingConfig {
    pub fn output_root(&self) -> PathBuf {
        PathBuf::from(&self.output_path)
    }
}

impl DepthcamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Self {
        Self::load_from_file("depthcam.toml")
    }

    /// Load configuration from a specific file path.
    ///
    /// Never fails: an unreadable file yields the defaults, and every entry
    /// that is missing or malformed falls back to its own default.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables, e.g. DEPTHCAM_RECORDING__FRAME_RATE=60
            .add_source(
                Environment::with_prefix("DEPTHCAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build();

        let config = match settings {
            Ok(settings) => Self::from_settings(&settings),
            Err(e) => {
                warn!(
                    "Could not read configuration from {}: {}; using defaults",
                    path_str, e
                );
                Self::default()
            }
        };

        let config = config.sanitize();
        info!("Configuration loaded");
        debug!("Final configuration: {:#?}", config);
        config
    }

    /// Read every recognized entry individually so one bad value cannot
    /// discard the rest of the file.
    pub fn from_settings(settings: &Config) -> Self {
        Self {
            recording: RecordingConfig {
                frame_rate: setting(settings, "recording.frame_rate", default_frame_rate()),
                output_path: setting(settings, "recording.output_path", default_output_path()),
                container: setting(settings, "recording.container", default_container()),
            },
            network: NetworkConfig {
                enabled: setting(settings, "network.enabled", default_network_enabled()),
                ip: setting(settings, "network.ip", default_network_ip()),
                port: setting(settings, "network.port", default_network_port()),
                send_timeout_ms: setting(
                    settings,
                    "network.send_timeout_ms",
                    default_send_timeout_ms(),
                ),
            },
            aggregate: AggregateConfig {
                enabled: setting(settings, "aggregate.enabled", default_aggregate_enabled()),
                ip: setting(settings, "aggregate.ip", default_aggregate_ip()),
                port: setting(settings, "aggregate.port", default_aggregate_port()),
                path: setting(settings, "aggregate.path", default_aggregate_path()),
                timeout_ms: setting(
                    settings,
                    "aggregate.timeout_ms",
                    default_aggregate_timeout_ms(),
                ),
                max_in_flight: setting(
                    settings,
                    "aggregate.max_in_flight",
                    default_max_in_flight(),
                ),
            },
            sensor: SensorConfig {
                color_resolution: setting(
                    settings,
                    "sensor.color_resolution",
                    default_color_resolution(),
                ),
                depth_resolution: setting(
                    settings,
                    "sensor.depth_resolution",
                    default_depth_resolution(),
                ),
                fps: setting(settings, "sensor.fps", default_sensor_fps()),
            },
            system: SystemConfig {
                event_bus_capacity: setting(
                    settings,
                    "system.event_bus_capacity",
                    default_event_bus_capacity(),
                ),
                status_interval_seconds: setting(
                    settings,
                    "system.status_interval_seconds",
                    default_status_interval(),
                ),
            },
        }
    }

    /// Replace out-of-range values with their defaults
    pub fn sanitize(mut self) -> Self {
        if self.recording.frame_rate == 0 || self.recording.frame_rate > MAX_FRAME_RATE {
            warn!(
                "recording.frame_rate {} is outside 1..={}; using {}",
                self.recording.frame_rate,
                MAX_FRAME_RATE,
                default_frame_rate()
            );
            self.recording.frame_rate = default_frame_rate();
        }

        if self.recording.output_path.trim().is_empty() {
            warn!(
                "recording.output_path is empty; using {}",
                default_output_path()
            );
            self.recording.output_path = default_output_path();
        }

        if self.network.socket_addr().is_none() || self.network.port == 0 {
            warn!(
                "network address {}:{} is invalid; using {}:{}",
                self.network.ip,
                self.network.port,
                default_network_ip(),
                default_network_port()
            );
            self.network.ip = default_network_ip();
            self.network.port = default_network_port();
        }

        if self.aggregate.ip.trim().is_empty() || self.aggregate.port == 0 {
            warn!(
                "aggregate endpoint {}:{} is invalid; using {}:{}",
                self.aggregate.ip,
                self.aggregate.port,
                default_aggregate_ip(),
                default_aggregate_port()
            );
            self.aggregate.ip = default_aggregate_ip();
            self.aggregate.port = default_aggregate_port();
        }

        if self.aggregate.max_in_flight == 0 {
            warn!(
                "aggregate.max_in_flight must be greater than 0; using {}",
                default_max_in_flight()
            );
            self.aggregate.max_in_flight = default_max_in_flight();
        }

        let (w, h) = self.sensor.color_resolution;
        if w == 0 || h == 0 {
            self.sensor.color_resolution = default_color_resolution();
        }
        let (w, h) = self.sensor.depth_resolution;
        if w == 0 || h == 0 {
            self.sensor.depth_resolution = default_depth_resolution();
        }
        if self.sensor.fps == 0 {
            self.sensor.fps = default_sensor_fps();
        }

        if self.system.event_bus_capacity == 0 {
            self.system.event_bus_capacity = default_event_bus_capacity();
        }
        if self.system.status_interval_seconds == 0 {
            self.system.status_interval_seconds = default_status_interval();
        }

        self
    }

    /// Validate configuration values without correcting them
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recording.frame_rate == 0 || self.recording.frame_rate > MAX_FRAME_RATE {
            return Err(ConfigError::Message(format!(
                "Recording frame_rate must be between 1 and {}",
                MAX_FRAME_RATE
            )));
        }

        if self.network.socket_addr().is_none() {
            return Err(ConfigError::Message(format!(
                "Network ip '{}' is not a valid IP address",
                self.network.ip
            )));
        }

        if self.aggregate.max_in_flight == 0 {
            return Err(ConfigError::Message(
                "Aggregate max_in_flight must be greater than 0".to_string(),
            ));
        }

        if self.sensor.fps == 0 {
            return Err(ConfigError::Message(
                "Sensor fps must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for DepthcamConfig {
    fn default() -> Self {
        Self {
            recording: RecordingConfig {
                frame_rate: default_frame_rate(),
                output_path: default_output_path(),
                container: default_container(),
            },
            network: NetworkConfig {
                enabled: default_network_enabled(),
                ip: default_network_ip(),
                port: default_network_port(),
                send_timeout_ms: default_send_timeout_ms(),
            },
            aggregate: AggregateConfig {
                enabled: default_aggregate_enabled(),
                ip: default_aggregate_ip(),
                port: default_aggregate_port(),
                path: default_aggregate_path(),
                timeout_ms: default_aggregate_timeout_ms(),
                max_in_flight: default_max_in_flight(),
            },
            sensor: SensorConfig {
                color_resolution: default_color_resolution(),
                depth_resolution: default_depth_resolution(),
                fps: default_sensor_fps(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                status_interval_seconds: default_status_interval(),
            },
        }
    }
}

fn setting<T>(settings: &Config, key: &str, default: T) -> T
where
    T: DeserializeOwned + Debug,
{
    match settings.get::<T>(key) {
        Ok(value) => value,
        Err(ConfigError::NotFound(_)) => default,
        Err(e) => {
            warn!(
                "Ignoring malformed configuration entry '{}' ({}); using default {:?}",
                key, e, default
            );
            default
        }
    }
}

// Default value functions
fn default_frame_rate() -> u32 {
    30
}
fn default_output_path() -> String {
    "./recordings".to_string()
}
fn default_container() -> ContainerFormat {
    ContainerFormat::Raw
}

fn default_network_enabled() -> bool {
    false
}
fn default_network_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_network_port() -> u16 {
    5005
}
fn default_send_timeout_ms() -> u64 {
    50
}

fn default_aggregate_enabled() -> bool {
    false
}
fn default_aggregate_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_aggregate_port() -> u16 {
    8000
}
fn default_aggregate_path() -> String {
    "/frames".to_string()
}
fn default_aggregate_timeout_ms() -> u64 {
    2000
}
fn default_max_in_flight() -> usize {
    4
}

fn default_color_resolution() -> (u32, u32) {
    (1920, 1080)
}
fn default_depth_resolution() -> (u32, u32) {
    (512, 424)
}
fn default_sensor_fps() -> u32 {
    30
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_status_interval() -> u64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = DepthcamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.recording.frame_rate, 30);
        assert!(!config.network.enabled);
        assert!(!config.aggregate.enabled);
        assert_eq!(config.aggregate.url(), "http://127.0.0.1:8000/frames");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = DepthcamConfig::load_from_file("/nonexistent/depthcam-config.toml");
        assert_eq!(config, DepthcamConfig::default());
    }

    #[test]
    fn test_file_values_are_applied() {
        let file = write_config(
            r#"
[recording]
frame_rate = 15
container = "mp4"

[network]
enabled = true
ip = "10.0.0.2"
port = 9000

[aggregate]
enabled = true
path = "upload"
"#,
        );

        let config = DepthcamConfig::load_from_file(file.path());
        assert_eq!(config.recording.frame_rate, 15);
        assert_eq!(config.recording.container, ContainerFormat::Mp4);
        assert!(config.network.enabled);
        assert_eq!(
            config.network.socket_addr(),
            Some("10.0.0.2:9000".parse().unwrap())
        );
        assert!(config.aggregate.enabled);
        assert_eq!(config.aggregate.url(), "http://127.0.0.1:8000/upload");
    }

    #[test]
    fn test_malformed_entries_fall_back_individually() {
        let file = write_config(
            r#"
[recording]
frame_rate = "fast"
output_path = "/tmp/depthcam-out"

[network]
enabled = "sometimes"
port = 70000
"#,
        );

        let config = DepthcamConfig::load_from_file(file.path());
        assert_eq!(config.recording.frame_rate, 30);
        assert_eq!(config.recording.output_path, "/tmp/depthcam-out");
        assert!(!config.network.enabled);
        assert_eq!(config.network.port, 5005);
    }

    #[test]
    fn test_unparseable_file_uses_defaults() {
        let file = write_config("this is [not toml");
        let config = DepthcamConfig::load_from_file(file.path());
        assert_eq!(config, DepthcamConfig::default());
    }

    #[test]
    fn test_sanitize_replaces_out_of_range_values() {
        let mut config = DepthcamConfig::default();
        config.recording.frame_rate = 0;
        config.network.ip = "not-an-ip".to_string();
        config.aggregate.max_in_flight = 0;

        assert!(config.validate().is_err());

        let config = config.sanitize();
        assert_eq!(config.recording.frame_rate, 30);
        assert_eq!(config.network.ip, "127.0.0.1");
        assert_eq!(config.aggregate.max_in_flight, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sanitize_rejects_unpaceable_frame_rate() {
        let mut config = DepthcamConfig::default();
        config.recording.frame_rate = u32::MAX;
        assert!(config.validate().is_err());
        assert_eq!(config.sanitize().recording.frame_rate, 30);

        let mut config = DepthcamConfig::default();
        config.recording.frame_rate = MAX_FRAME_RATE;
        assert_eq!(config.sanitize().recording.frame_rate, MAX_FRAME_RATE);
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = DepthcamConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: DepthcamConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}

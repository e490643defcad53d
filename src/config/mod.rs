use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_yml;
use std::collections::BTreeMap;
use std::fs;
use std::io::{Error, ErrorKind};
use std::path::Path;

fn serial_port_default() -> String { return "/dev/ttyACM0".to_string() }
fn serial_baudrate_default() -> u32 { return 9600 }
fn serial_parity_default() -> String { return "even".to_string() }
fn serial_stopbits_default() -> u8 { return 1 }
fn serial_bytesize_default() -> u8 { return 7 }
fn serial_connect_retry_default() -> u64 { return 5 }

#[derive(Deserialize, Serialize, Clone)]
pub struct SerialConfig {
    #[serde(default="serial_port_default")]
    pub port: String,
    #[serde(default="serial_baudrate_default")]
    pub baudrate: u32,
    #[serde(default="serial_parity_default")]
    pub parity: String,
    #[serde(default="serial_stopbits_default")]
    pub stopbits: u8,
    #[serde(default="serial_bytesize_default")]
    pub bytesize: u8,
    /// Read timeout in seconds, absent means block until a line arrives.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default="serial_connect_retry_default")]
    pub connect_retry: u64,
}

fn mqtt_host_default() -> String { return "127.0.0.1".to_string() }
fn mqtt_port_default() -> u16 { return 1883 }
fn mqtt_client_id_default() -> String { return "s0pcm2mqtt".to_string() }
fn mqtt_base_topic_default() -> String { return "s0pcm-reader".to_string() }
fn mqtt_retain_default() -> bool { return true }
fn mqtt_connect_retry_default() -> u64 { return 5 }
fn mqtt_publish_onchange_default() -> bool { return true }

#[derive(Deserialize, Serialize, Clone)]
pub struct MqttConfig {
    #[serde(default="mqtt_host_default")]
    pub host: String,
    #[serde(default="mqtt_port_default")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default="mqtt_client_id_default")]
    pub client_id: String,
    #[serde(default="mqtt_base_topic_default")]
    pub base_topic: String,
    #[serde(default="mqtt_retain_default")]
    pub retain: bool,
    #[serde(default="mqtt_connect_retry_default")]
    pub connect_retry: u64,
    /// Fixed publish cadence in seconds; absent means publish when the
    /// serial side hands over a fresh snapshot.
    #[serde(default)]
    pub publish_interval: Option<u64>,
    #[serde(default="mqtt_publish_onchange_default")]
    pub publish_onchange: bool,
}

fn channel_enabled_default() -> bool { return true }

#[derive(Deserialize, Serialize, Clone)]
pub struct ChannelConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default="channel_enabled_default")]
    pub enabled: bool,
}

fn serial_default() -> SerialConfig {
    return SerialConfig {
        port: serial_port_default(),
        baudrate: serial_baudrate_default(),
        parity: serial_parity_default(),
        stopbits: serial_stopbits_default(),
        bytesize: serial_bytesize_default(),
        timeout: None,
        connect_retry: serial_connect_retry_default(),
    };
}

fn mqtt_default() -> MqttConfig {
    return MqttConfig {
        host: mqtt_host_default(),
        port: mqtt_port_default(),
        username: None,
        password: None,
        client_id: mqtt_client_id_default(),
        base_topic: mqtt_base_topic_default(),
        retain: mqtt_retain_default(),
        connect_retry: mqtt_connect_retry_default(),
        publish_interval: None,
        publish_onchange: mqtt_publish_onchange_default(),
    };
}

fn channels_default() -> BTreeMap<u8, ChannelConfig> { return BTreeMap::new() }

#[derive(Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default="serial_default")]
    pub serial: SerialConfig,
    #[serde(default="mqtt_default")]
    pub mqtt: MqttConfig,
    #[serde(default="channels_default")]
    pub channels: BTreeMap<u8, ChannelConfig>,
}

impl Default for Config {
    fn default() -> Self {
        return Config {
            serial: serial_default(),
            mqtt: mqtt_default(),
            channels: channels_default(),
        };
    }
}

impl Config {
    /// Read `configuration.yaml` from the configuration directory. A missing
    /// file falls back to the defaults, a malformed one is a start-up error.
    pub fn load(dir: &Path) -> Result<Self, Error> {
        let path = dir.join("configuration.yaml");

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("No '{}' found, using defaults", path.display());
                return Ok(Config::default());
            }
            Err(e) => return Err(e),
        };

        let config: Config = serde_yml::from_str(&contents)
            .map_err(|e| Error::new(ErrorKind::InvalidData, format!("Unable to parse '{}': {}", path.display(), e)))?;

        debug!("Config loaded from '{}'", path.display());
        return Ok(config);
    }

    pub fn channel_enabled(&self, channel: u8) -> bool {
        return match self.channels.get(&channel) {
            Some(overrides) => overrides.enabled,
            None => true,
        };
    }

    /// Topic segment for a channel, the configured name or the numeric id.
    pub fn channel_name(&self, channel: u8) -> String {
        return match self.channels.get(&channel) {
            Some(overrides) => overrides.name.clone().unwrap_or_else(|| channel.to_string()),
            None => channel.to_string(),
        };
    }
}

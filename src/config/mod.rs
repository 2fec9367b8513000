//! Configuration management for sfu-room

use crate::error::RoomError;
use crate::media::RtpEncoding;
use crate::room::RoomIdentity;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Signaling connection
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// Room to join
    #[serde(default)]
    pub room: RoomConfig,

    /// Local publishing
    #[serde(default)]
    pub publish: PublishConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// WebSocket URL of the SFU signaling endpoint
    pub url: String,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Per-request acknowledgment timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Keepalive ping interval in seconds (0 disables)
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3000/mediasoup".to_string(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

impl SignalingConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoomConfig {
    /// Room name; takes precedence over `entry_url`
    pub name: Option<String>,

    /// Page URL the room is derived from (`/<prefix>/<room>`)
    pub entry_url: Option<String>,
}

/// One simulcast layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingConfig {
    pub rid: String,

    /// Maximum bitrate (bps)
    pub max_bitrate: u32,

    #[serde(default = "default_scalability_mode")]
    pub scalability_mode: String,
}

impl EncodingConfig {
    fn new(rid: &str, max_bitrate: u32) -> Self {
        Self {
            rid: rid.to_string(),
            max_bitrate,
            scalability_mode: default_scalability_mode(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Publish the camera
    pub camera: bool,

    /// Publish the microphone
    pub microphone: bool,

    /// Simulcast layers for video producers
    #[serde(default = "default_video_encodings")]
    pub video_encodings: Vec<EncodingConfig>,

    /// Initial video bitrate hint (kbps)
    #[serde(default = "default_video_google_start_bitrate")]
    pub video_google_start_bitrate: u32,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            camera: true,
            microphone: true,
            video_encodings: default_video_encodings(),
            video_google_start_bitrate: default_video_google_start_bitrate(),
        }
    }
}

impl PublishConfig {
    pub fn rtp_encodings(&self) -> Vec<RtpEncoding> {
        self.video_encodings
            .iter()
            .map(|e| RtpEncoding {
                rid: e.rid.clone(),
                max_bitrate: e.max_bitrate,
                scalability_mode: e.scalability_mode.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Room named by `room.name`, or else by `room.entry_url`
    pub fn room_identity(&self) -> Result<RoomIdentity, RoomError> {
        match (&self.room.name, &self.room.entry_url) {
            (Some(name), _) => RoomIdentity::new(name.clone()),
            (None, Some(entry_url)) => RoomIdentity::from_entry_url(entry_url),
            (None, None) => Err(RoomError::Config(
                "set room.name or room.entry_url".to_string(),
            )),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), RoomError> {
        let url = Url::parse(&self.signaling.url)
            .map_err(|e| RoomError::Config(format!("signaling.url: {}", e)))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(RoomError::Config(
                "signaling.url must be a ws:// or wss:// URL".to_string(),
            ));
        }

        if self.signaling.connect_timeout_secs == 0 || self.signaling.request_timeout_secs == 0 {
            return Err(RoomError::Config("Signaling timeouts must be non-zero".to_string()));
        }

        self.room_identity()?;

        if self.publish.video_encodings.is_empty() {
            return Err(RoomError::Config(
                "publish.video_encodings must not be empty".to_string(),
            ));
        }
        let mut rids = HashSet::new();
        for encoding in &self.publish.video_encodings {
            if encoding.rid.is_empty() || !rids.insert(encoding.rid.as_str()) {
                return Err(RoomError::Config(format!(
                    "Simulcast rid {:?} is empty or repeated",
                    encoding.rid
                )));
            }
            if encoding.max_bitrate == 0 {
                return Err(RoomError::Config(format!(
                    "Simulcast layer {} has a zero bitrate",
                    encoding.rid
                )));
            }
        }

        if self.publish.video_google_start_bitrate == 0 {
            return Err(RoomError::Config(
                "publish.video_google_start_bitrate must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        let mut cfg = Config::default();
        cfg.room.name = Some("r1".to_string());
        cfg
    }

    #[test]
    fn defaults_are_simulcast() {
        let encodings = PublishConfig::default().rtp_encodings();
        let rids: Vec<_> = encodings.iter().map(|e| e.rid.as_str()).collect();
        assert_eq!(rids, vec!["r0", "r1", "r2"]);
        assert_eq!(encodings[1].max_bitrate, 300_000);
        assert!(encodings.iter().all(|e| e.scalability_mode == "S1T3"));
    }

    #[test]
    fn validate_requires_room() {
        assert!(Config::default().validate().is_err());
        assert!(valid().validate().is_ok());

        let mut cfg = Config::default();
        cfg.room.entry_url = Some("https://meet.example.com/sfu/r9".to_string());
        assert_eq!(cfg.room_identity().unwrap().name(), "r9");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_http_url() {
        let mut cfg = valid();
        cfg.signaling.url = "http://127.0.0.1:3000".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut cfg = valid();
        cfg.signaling.request_timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_rid() {
        let mut cfg = valid();
        cfg.publish.video_encodings = vec![EncodingConfig::new("r0", 100_000), EncodingConfig::new("r0", 300_000)];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [signaling]
            url = "wss://sfu.example.com/ws"
            ping_interval_secs = 0

            [room]
            name = "standup"

            [publish]
            camera = false
            microphone = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.signaling.request_timeout_secs, 10);
        assert_eq!(cfg.signaling.ping_interval(), Duration::ZERO);
        assert!(!cfg.publish.camera);
        assert_eq!(cfg.publish.video_encodings.len(), 3);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.validate().is_ok());
    }
}

fn default_connect_timeout_secs() -> u64 { 10 }
fn default_request_timeout_secs() -> u64 { 10 }
fn default_ping_interval_secs() -> u64 { 20 }
fn default_video_google_start_bitrate() -> u32 { 1000 }

fn default_scalability_mode() -> String {
    "S1T3".to_string()
}

fn default_video_encodings() -> Vec<EncodingConfig> {
    vec![
        EncodingConfig::new("r0", 100_000),
        EncodingConfig::new("r1", 300_000),
        EncodingConfig::new("r2", 900_000),
    ]
}

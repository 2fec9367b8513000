use clap::Parser;
use std::path::PathBuf;

use sfu_room::config;

#[derive(Parser, Debug)]
#[command(name = "sfu-room")]
#[command(author = "Selkies Team")]
#[command(version = "0.2.0")]
#[command(about = "SFU room signaling probe", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/sfu-room.toml")]
    pub config: PathBuf,

    /// Signaling WebSocket URL (overrides signaling.url)
    #[arg(short, long)]
    pub url: Option<String>,

    /// Room name (overrides room.name)
    #[arg(short, long)]
    pub room: Option<String>,

    /// Entry page URL to derive the room name from
    #[arg(long)]
    pub entry_url: Option<String>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,

    /// Keep running and log producer events until interrupted
    #[arg(short, long, action)]
    pub watch: bool,
}

impl Args {
    /// Load the configuration file and apply command line overrides
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        let mut config = config::Config::load(&self.config)?;
        if let Some(url) = &self.url {
            config.signaling.url = url.clone();
        }
        if let Some(room) = &self.room {
            config.room.name = Some(room.clone());
        }
        if let Some(entry_url) = &self.entry_url {
            config.room.entry_url = Some(entry_url.clone());
            if self.room.is_none() {
                config.room.name = None;
            }
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_over_defaults() {
        let args = Args::parse_from([
            "sfu-room",
            "--config",
            "/nonexistent/sfu-room.toml",
            "--url",
            "wss://sfu.example.com/ws",
            "--entry-url",
            "https://meet.example.com/sfu/r1",
            "-v",
        ]);
        let config = args.load_config().unwrap();
        assert_eq!(config.signaling.url, "wss://sfu.example.com/ws");
        assert_eq!(config.room_identity().unwrap().name(), "r1");
        assert_eq!(config.logging.level, "debug");
        assert!(!args.watch);
    }
}

//! sfu-room - signaling probe
//!
//! Connects to an SFU, joins a room and reports what the router offers and
//! which producers are live. Media needs a `MediaEngine` and is not handled
//! here.

mod args;

use args::Args;
use clap::Parser;
use log::{debug, error, info, warn};
use sfu_room::media::{MediaKind, RtpCapabilities};
use sfu_room::signaling::{ServerEvent, SignalingChannel};
use sfu_room::{transport, Config, RoomError};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    let config = match args.load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load config {:?}: {}, using defaults", args.config, e);
            Config::default()
        }
    };

    // Initialize logging; WebSocket internals stay quiet
    env_logger::Builder::new()
        .parse_filters(&std::env::var("SFU_ROOM_LOG").unwrap_or_else(|_| config.logging.level.clone()))
        .filter_module("tungstenite", log::LevelFilter::Warn)
        .filter_module("tokio_tungstenite", log::LevelFilter::Warn)
        .init();

    info!("sfu-room v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e.into());
    }
    let room = config.room_identity()?;

    let link = transport::connect(
        &config.signaling.url,
        config.signaling.connect_timeout(),
        config.signaling.ping_interval(),
    )
    .await?;
    let (signaling, mut events) =
        SignalingChannel::new(link.outbound, link.inbound, config.signaling.request_timeout());

    let socket_id = loop {
        match events.recv().await {
            Some(ServerEvent::ConnectionSuccess { socket_id }) => break socket_id,
            Some(other) => debug!("Ignoring {:?} before connection-success", other),
            None | Some(ServerEvent::Disconnected) => return Err(RoomError::ChannelClosed.into()),
        }
    };
    info!("Connected as {}", socket_id);

    let joined = signaling.join_room(room.name()).await?;
    let (audio, video) = codec_summary(&joined.rtp_capabilities);
    info!("Joined room {}: router offers audio [{}], video [{}]", room, audio.join(", "), video.join(", "));

    let producers = signaling.get_producers().await?;
    info!("{} producers live in {}", producers.len(), room);
    for id in &producers {
        info!("  producer {}", id);
    }

    if !args.watch {
        return Ok(());
    }

    info!("Watching room {} (Ctrl-C to stop)", room);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ServerEvent::NewProducer { producer_id }) => info!("new-producer {}", producer_id),
                Some(ServerEvent::ProducerClosed { remote_producer_id }) => {
                    info!("producer-closed {}", remote_producer_id)
                }
                Some(ServerEvent::ConnectionSuccess { socket_id }) => debug!("connection-success {}", socket_id),
                Some(ServerEvent::Disconnected) | None => {
                    warn!("Signaling channel closed");
                    return Err(RoomError::ChannelClosed.into());
                }
            },
            _ = signal::ctrl_c() => {
                info!("Interrupted, leaving room {}", room);
                return Ok(());
            }
        }
    }
}

/// Mime types the router offers, per kind
fn codec_summary(caps: &RtpCapabilities) -> (Vec<String>, Vec<String>) {
    let mut audio = Vec::new();
    let mut video = Vec::new();
    let codecs = caps.0.get("codecs").and_then(|c| c.as_array());
    for codec in codecs.into_iter().flatten() {
        let Some(mime) = codec.get("mimeType").and_then(|m| m.as_str()) else {
            continue;
        };
        match serde_json::from_value::<MediaKind>(codec.get("kind").cloned().unwrap_or_default()) {
            Ok(MediaKind::Audio) => audio.push(mime.to_string()),
            Ok(MediaKind::Video) => video.push(mime.to_string()),
            Err(_) => {}
        }
    }
    (audio, video)
}

//! Test doubles: an in-memory SFU speaking the signaling protocol and a
//! media engine whose transports honour the connect/produce callback order.

use crate::error::RoomError;
use crate::media::{
    ConnectHandler, ConsumeOptions, ConsumerHandle, DeviceEvent, DtlsParameters, LocalTrack, MediaEngine,
    MediaKind, ProduceHandler, ProduceOptions, ProduceRequest, ProducerHandle, RecvTransportHandle,
    RtpCapabilities, RtpParameters, SendTransportHandle, TrackHandle, TransportParams,
};
use crate::signaling::requests::{CONSUME, CREATE_WEBRTC_TRANSPORT, GET_PRODUCERS, JOIN_ROOM, TRANSPORT_PRODUCE};
use crate::signaling::{ServerEvent, SignalingChannel, SignalingMessage};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, OnceCell};

pub fn router_capabilities() -> RtpCapabilities {
    RtpCapabilities(json!({
        "codecs": [
            {"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2, "preferredPayloadType": 100},
            {"kind": "video", "mimeType": "video/VP8", "clockRate": 90000, "preferredPayloadType": 101},
            {"kind": "video", "mimeType": "video/rtx", "clockRate": 90000, "preferredPayloadType": 102},
        ],
        "headerExtensions": []
    }))
}

pub fn audio_track(id: &str) -> LocalTrack {
    LocalTrack {
        id: id.to_string(),
        kind: MediaKind::Audio,
        label: "Fake microphone".to_string(),
    }
}

pub fn video_track(id: &str) -> LocalTrack {
    LocalTrack {
        id: id.to_string(),
        kind: MediaKind::Video,
        label: "Fake camera".to_string(),
    }
}

struct RemoteProducer {
    peer: String,
    kind: MediaKind,
    screen: bool,
}

#[derive(Default)]
struct ServerState {
    log: Vec<(String, Value)>,
    producers_exist: bool,
    producers: BTreeMap<String, RemoteProducer>,
    failing: HashSet<String>,
    hold_recv_transports: bool,
    next_id: u64,
}

impl ServerState {
    fn answer(&mut self, method: &str, data: &Value) -> Result<Value, String> {
        if self.failing.contains(method) {
            return Err(format!("{} refused", method));
        }
        self.next_id += 1;
        let n = self.next_id;
        let value = match method {
            JOIN_ROOM => json!({ "rtpCapabilities": router_capabilities() }),
            CREATE_WEBRTC_TRANSPORT => json!({
                "params": {
                    "id": format!("transport-{}", n),
                    "iceParameters": {"usernameFragment": "u", "password": "p"},
                    "iceCandidates": [],
                    "dtlsParameters": {"fingerprints": []},
                }
            }),
            TRANSPORT_PRODUCE => json!({
                "id": format!("producer-{}", n),
                "producersExist": self.producers_exist,
            }),
            CONSUME => {
                let producer_id = data["remoteProducerId"].as_str().unwrap_or_default();
                match self.producers.get(producer_id) {
                    Some(producer) => json!({
                        "params": {
                            "id": format!("consumer-{}", producer_id),
                            "producerId": producer_id,
                            "kind": producer.kind,
                            "rtpParameters": {"codecs": []},
                            "consumer_socketID": producer.peer,
                            "consumer_isShareScreen": producer.screen,
                            "serverConsumerId": format!("server-consumer-{}", producer_id),
                        }
                    }),
                    None => json!({"params": {"error": "cannot consume"}}),
                }
            }
            GET_PRODUCERS => json!(self.producers.keys().collect::<Vec<_>>()),
            _ => json!({}),
        };
        Ok(value)
    }
}

fn response(id: u64, answer: Result<Value, String>) -> String {
    let message = match answer {
        Ok(data) => SignalingMessage::ok(id, data),
        Err(reason) => SignalingMessage::error(id, &reason),
    };
    message.to_json().unwrap()
}

/// In-memory SFU wired to a real [`SignalingChannel`]
pub struct FakeSfu {
    channel: Arc<SignalingChannel>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ServerEvent>>>,
    state: Arc<Mutex<ServerState>>,
    to_client: Mutex<Option<mpsc::UnboundedSender<String>>>,
    shutdown: Arc<Notify>,
    recv_gate: Arc<Notify>,
}

impl FakeSfu {
    pub const LOCAL_SOCKET_ID: &'static str = "local-socket";

    /// Start the server; `connection-success` is queued right away
    pub fn start() -> Self {
        let (client_tx, mut from_client) = mpsc::unbounded_channel::<String>();
        let (to_client, client_rx) = mpsc::unbounded_channel::<String>();
        let (channel, events) = SignalingChannel::new(client_tx, client_rx, Duration::from_secs(2));

        to_client
            .send(
                SignalingMessage::notification(
                    ServerEvent::CONNECTION_SUCCESS,
                    json!({ "socketId": Self::LOCAL_SOCKET_ID }),
                )
                .to_json()
                .unwrap(),
            )
            .unwrap();

        let state = Arc::new(Mutex::new(ServerState::default()));
        let shutdown = Arc::new(Notify::new());
        let recv_gate = Arc::new(Notify::new());

        let server_state = state.clone();
        let server_shutdown = shutdown.clone();
        let server_gate = recv_gate.clone();
        let server_tx = to_client.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    frame = from_client.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                    _ = server_shutdown.notified() => break,
                };
                let Ok(SignalingMessage::Request { id, method, data }) = SignalingMessage::from_json(&frame) else {
                    continue;
                };
                let (answer, held) = {
                    let mut state = server_state.lock();
                    state.log.push((method.clone(), data.clone()));
                    let held = state.hold_recv_transports
                        && method == CREATE_WEBRTC_TRANSPORT
                        && data["consumer"] == json!(true);
                    (state.answer(&method, &data), held)
                };
                if held {
                    let gate = server_gate.clone();
                    let tx = server_tx.clone();
                    tokio::spawn(async move {
                        gate.notified().await;
                        let _ = tx.send(response(id, answer));
                    });
                } else {
                    let _ = server_tx.send(response(id, answer));
                }
            }
        });

        Self {
            channel: Arc::new(channel),
            events: Mutex::new(Some(events)),
            state,
            to_client: Mutex::new(Some(to_client)),
            shutdown,
            recv_gate,
        }
    }

    pub fn channel(&self) -> Arc<SignalingChannel> {
        self.channel.clone()
    }

    /// The client's server event stream; only available once
    pub fn take_events(&self) -> mpsc::UnboundedReceiver<ServerEvent> {
        self.events.lock().take().expect("events already taken")
    }

    pub fn set_producers_exist(&self, exist: bool) {
        self.state.lock().producers_exist = exist;
    }

    pub fn add_remote_producer(&self, producer_id: &str, peer: &str, kind: MediaKind, screen: bool) {
        self.state.lock().producers.insert(
            producer_id.to_string(),
            RemoteProducer {
                peer: peer.to_string(),
                kind,
                screen,
            },
        );
    }

    /// Answer every `method` request with an error
    pub fn fail_method(&self, method: &str) {
        self.state.lock().failing.insert(method.to_string());
    }

    /// Hold receive transport creations; each `notify_one` on the returned
    /// gate releases one
    pub fn hold_recv_transports(&self) -> Arc<Notify> {
        self.state.lock().hold_recv_transports = true;
        self.recv_gate.clone()
    }

    pub fn notify(&self, method: &str, data: Value) {
        let frame = SignalingMessage::notification(method, data).to_json().unwrap();
        if let Some(tx) = self.to_client.lock().as_ref() {
            tx.send(frame).unwrap();
        }
    }

    /// Drop the connection
    pub fn disconnect(&self) {
        self.to_client.lock().take();
        self.shutdown.notify_one();
    }

    /// Request methods in arrival order
    pub fn methods(&self) -> Vec<String> {
        self.state.lock().log.iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn requests_for(&self, method: &str) -> Vec<Value> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// Wait until a `method` request has arrived
    pub async fn wait_for(&self, method: &str) {
        for _ in 0..400 {
            if self.state.lock().log.iter().any(|(m, _)| m == method) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no {} request arrived", method);
    }
}

pub struct FakeProducer {
    id: String,
    kind: MediaKind,
    track_id: String,
    paused: AtomicBool,
    closed: AtomicBool,
    pause_calls: Arc<AtomicUsize>,
}

impl FakeProducer {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ProducerHandle for FakeProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn track_id(&self) -> &str {
        &self.track_id
    }

    fn pause(&self) {
        self.pause_calls.fetch_add(1, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeConsumer {
    id: String,
    producer_id: String,
    kind: MediaKind,
    paused: AtomicBool,
    closed: AtomicBool,
}

impl FakeConsumer {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ConsumerHandle for FakeConsumer {
    fn id(&self) -> &str {
        &self.id
    }

    fn producer_id(&self) -> &str {
        &self.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn track(&self) -> TrackHandle {
        TrackHandle {
            id: format!("remote-{}", self.producer_id),
            kind: self.kind,
        }
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Recorded {
    device_capabilities: Option<RtpCapabilities>,
    load_error: Option<RoomError>,
    user_media_error: Option<RoomError>,
    display_tracks: Vec<LocalTrack>,
    produced: Vec<ProduceOptions>,
    producers: Vec<Arc<FakeProducer>>,
    consumers: Vec<Arc<FakeConsumer>>,
    recv_transports: Vec<Arc<FakeRecvTransport>>,
}

fn local_dtls() -> DtlsParameters {
    DtlsParameters(json!({"role": "auto", "fingerprints": [{"algorithm": "sha-256", "value": "AA"}]}))
}

pub struct FakeSendTransport {
    id: String,
    handler: Arc<dyn ProduceHandler>,
    connected: OnceCell<()>,
    record: Arc<Mutex<Recorded>>,
    pause_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SendTransportHandle for FakeSendTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn produce(&self, options: ProduceOptions) -> Result<Arc<dyn ProducerHandle>, RoomError> {
        self.connected
            .get_or_try_init(|| self.handler.on_connect(local_dtls()))
            .await?;
        let id = self
            .handler
            .on_produce(ProduceRequest {
                kind: options.track.kind,
                rtp_parameters: RtpParameters(json!({"mid": options.track.id})),
                app_data: options.app_data,
            })
            .await?;

        let producer = Arc::new(FakeProducer {
            id,
            kind: options.track.kind,
            track_id: options.track.id.clone(),
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            pause_calls: self.pause_calls.clone(),
        });
        let mut record = self.record.lock();
        record.produced.push(options);
        record.producers.push(producer.clone());
        Ok(producer)
    }

    fn close(&self) {
        for producer in &self.record.lock().producers {
            producer.close();
        }
    }
}

pub struct FakeRecvTransport {
    id: String,
    handler: Arc<dyn ConnectHandler>,
    connected: OnceCell<()>,
    closed: AtomicBool,
    record: Arc<Mutex<Recorded>>,
}

impl FakeRecvTransport {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecvTransportHandle for FakeRecvTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn consume(&self, options: ConsumeOptions) -> Result<Arc<dyn ConsumerHandle>, RoomError> {
        if self.is_closed() {
            return Err(RoomError::resource_state("transport closed"));
        }
        self.connected
            .get_or_try_init(|| self.handler.on_connect(local_dtls()))
            .await?;
        let consumer = Arc::new(FakeConsumer {
            id: options.id,
            producer_id: options.producer_id,
            kind: options.kind,
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.record.lock().consumers.push(consumer.clone());
        Ok(consumer)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Media engine that captures fake tracks and records what it is asked to do
pub struct FakeEngine {
    record: Arc<Mutex<Recorded>>,
    pause_calls: Arc<AtomicUsize>,
    device_tx: mpsc::UnboundedSender<DeviceEvent>,
    device_rx: Mutex<Option<mpsc::UnboundedReceiver<DeviceEvent>>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        let (device_tx, device_rx) = mpsc::unbounded_channel();
        Self {
            record: Arc::new(Mutex::new(Recorded::default())),
            pause_calls: Arc::new(AtomicUsize::new(0)),
            device_tx,
            device_rx: Mutex::new(Some(device_rx)),
        }
    }

    /// What `load` reports; the router's own set when unset
    pub fn set_device_capabilities(&self, caps: RtpCapabilities) {
        self.record.lock().device_capabilities = Some(caps);
    }

    pub fn fail_load(&self, error: RoomError) {
        self.record.lock().load_error = Some(error);
    }

    pub fn fail_user_media(&self, error: RoomError) {
        self.record.lock().user_media_error = Some(error);
    }

    pub fn set_display_tracks(&self, tracks: Vec<LocalTrack>) {
        self.record.lock().display_tracks = tracks;
    }

    /// Report a captured track as ended
    pub fn end_track(&self, track_id: &str) {
        self.device_tx
            .send(DeviceEvent::TrackEnded {
                track_id: track_id.to_string(),
            })
            .unwrap();
    }

    pub fn produced(&self) -> Vec<ProduceOptions> {
        self.record.lock().produced.clone()
    }

    pub fn producers(&self) -> Vec<Arc<FakeProducer>> {
        self.record.lock().producers.clone()
    }

    pub fn consumers(&self) -> Vec<Arc<FakeConsumer>> {
        self.record.lock().consumers.clone()
    }

    pub fn recv_transports(&self) -> Vec<Arc<FakeRecvTransport>> {
        self.record.lock().recv_transports.clone()
    }

    pub fn producer_pause_calls(&self) -> usize {
        self.pause_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn load(&self, router: &RtpCapabilities) -> Result<RtpCapabilities, RoomError> {
        let record = self.record.lock();
        if let Some(error) = &record.load_error {
            return Err(error.clone());
        }
        Ok(record
            .device_capabilities
            .clone()
            .unwrap_or_else(|| router.clone()))
    }

    async fn user_media(&self, audio: bool, video: bool) -> Result<Vec<LocalTrack>, RoomError> {
        if let Some(error) = &self.record.lock().user_media_error {
            return Err(error.clone());
        }
        let mut tracks = Vec::new();
        if audio {
            tracks.push(audio_track("mic-track"));
        }
        if video {
            tracks.push(video_track("camera-track"));
        }
        Ok(tracks)
    }

    async fn display_media(&self) -> Result<Vec<LocalTrack>, RoomError> {
        let tracks = self.record.lock().display_tracks.clone();
        if tracks.is_empty() {
            return Err(RoomError::device("screen capture cancelled"));
        }
        Ok(tracks)
    }

    fn create_send_transport(
        &self,
        params: TransportParams,
        handler: Arc<dyn ProduceHandler>,
    ) -> Result<Arc<dyn SendTransportHandle>, RoomError> {
        Ok(Arc::new(FakeSendTransport {
            id: params.id,
            handler,
            connected: OnceCell::new(),
            record: self.record.clone(),
            pause_calls: self.pause_calls.clone(),
        }))
    }

    fn create_recv_transport(
        &self,
        params: TransportParams,
        handler: Arc<dyn ConnectHandler>,
    ) -> Result<Arc<dyn RecvTransportHandle>, RoomError> {
        let transport = Arc::new(FakeRecvTransport {
            id: params.id,
            handler,
            connected: OnceCell::new(),
            closed: AtomicBool::new(false),
            record: self.record.clone(),
        });
        self.record.lock().recv_transports.push(transport.clone());
        Ok(transport)
    }

    fn take_device_events(&self) -> Option<mpsc::UnboundedReceiver<DeviceEvent>> {
        self.device_rx.lock().take()
    }
}

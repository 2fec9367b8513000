//! Typed SFU requests
//!
//! One method per request of the room protocol. Payload field names follow
//! the server exactly, including its mixed-case consume response fields.

use super::channel::SignalingChannel;
use crate::error::RoomError;
use crate::media::{AppData, DtlsParameters, MediaKind, ProduceRequest, RtpCapabilities, RtpParameters, TransportParams};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const JOIN_ROOM: &str = "joinRoom";
pub const CREATE_WEBRTC_TRANSPORT: &str = "createWebRtcTransport";
pub const TRANSPORT_CONNECT: &str = "transport-connect";
pub const TRANSPORT_RECV_CONNECT: &str = "transport-recv-connect";
pub const TRANSPORT_PRODUCE: &str = "transport-produce";
pub const CONSUME: &str = "consume";
pub const CONSUMER_RESUME: &str = "consumer-resume";
pub const GET_PRODUCERS: &str = "getProducers";
pub const PRODUCER_CLOSE: &str = "producerClose";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomResponse {
    #[serde(alias = "routerCapabilities")]
    pub rtp_capabilities: RtpCapabilities,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceResponse {
    pub id: String,
    #[serde(default)]
    pub producers_exist: bool,
}

/// `consume` acknowledgment params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeParams {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    #[serde(rename = "consumer_socketID")]
    pub consumer_socket_id: String,
    #[serde(rename = "consumer_isShareScreen", default)]
    pub consumer_is_share_screen: bool,
    pub server_consumer_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransportRecvConnect<'a> {
    dtls_parameters: &'a DtlsParameters,
    server_consumer_transport_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Consume<'a> {
    rtp_capabilities: &'a RtpCapabilities,
    remote_producer_id: &'a str,
    server_consumer_transport_id: &'a str,
}

/// Unwrap a `{params: ...}` acknowledgment, where `{params: {error}}` is a
/// server-side refusal
fn unwrap_params<T: DeserializeOwned>(method: &str, response: Value) -> Result<T, RoomError> {
    let params = match response {
        Value::Object(mut map) => map.remove("params").unwrap_or(Value::Null),
        _ => Value::Null,
    };
    if let Some(error) = params.get("error") {
        let reason = error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(RoomError::signaling(method, reason));
    }
    serde_json::from_value(params)
        .map_err(|e| RoomError::protocol(format!("Malformed {} params: {}", method, e)))
}

impl SignalingChannel {
    pub async fn join_room(&self, room_name: &str) -> Result<JoinRoomResponse, RoomError> {
        self.request(JOIN_ROOM, &json!({ "roomName": room_name })).await
    }

    /// Ask the server for a send (`consumer == false`) or receive transport
    pub async fn create_webrtc_transport(&self, consumer: bool) -> Result<TransportParams, RoomError> {
        let response = self
            .request_raw(CREATE_WEBRTC_TRANSPORT, json!({ "consumer": consumer }))
            .await?;
        unwrap_params(CREATE_WEBRTC_TRANSPORT, response)
    }

    pub async fn transport_connect(&self, dtls_parameters: &DtlsParameters) -> Result<(), RoomError> {
        self.request_raw(TRANSPORT_CONNECT, json!({ "dtlsParameters": dtls_parameters }))
            .await
            .map(drop)
    }

    pub async fn transport_recv_connect(
        &self,
        dtls_parameters: &DtlsParameters,
        server_consumer_transport_id: &str,
    ) -> Result<(), RoomError> {
        let payload = TransportRecvConnect {
            dtls_parameters,
            server_consumer_transport_id,
        };
        self.request_raw(TRANSPORT_RECV_CONNECT, serde_json::to_value(&payload)?)
            .await
            .map(drop)
    }

    pub async fn transport_produce(&self, request: &ProduceRequest) -> Result<ProduceResponse, RoomError> {
        self.request(TRANSPORT_PRODUCE, request).await
    }

    pub async fn consume(
        &self,
        rtp_capabilities: &RtpCapabilities,
        remote_producer_id: &str,
        server_consumer_transport_id: &str,
    ) -> Result<ConsumeParams, RoomError> {
        let payload = Consume {
            rtp_capabilities,
            remote_producer_id,
            server_consumer_transport_id,
        };
        let response = self.request_raw(CONSUME, serde_json::to_value(&payload)?).await?;
        unwrap_params(CONSUME, response)
    }

    pub async fn consumer_resume(&self, server_consumer_id: &str) -> Result<(), RoomError> {
        self.request_raw(CONSUMER_RESUME, json!({ "serverConsumerId": server_consumer_id }))
            .await
            .map(drop)
    }

    pub async fn get_producers(&self) -> Result<Vec<String>, RoomError> {
        self.request(GET_PRODUCERS, &Value::Null).await
    }

    pub async fn producer_close(&self, id: &str) -> Result<(), RoomError> {
        self.request_raw(PRODUCER_CLOSE, json!({ "id": id })).await.map(drop)
    }
}

/// `isShareScreen` flag as sent with `transport-produce`
pub fn app_data(is_share_screen: bool) -> AppData {
    AppData { is_share_screen }
}

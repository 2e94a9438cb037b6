//! Agent endpoint
//!
//! The remote side of the bridge: owns one duplex channel to the
//! coordinator hub and one [`MethodRegistry`]. Inbound request envelopes
//! are dispatched sequentially in arrival order; a bad frame is answered
//! with an error envelope, never a crash. Keepalive pings run at 80% of
//! the pong wait, and a missed pong tears the channel down.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::model::{
    RpcRequest, RpcResponse, IDENTIFY_HEADER, MAX_MSG_SIZE, PING_PERIOD, PONG_WAIT, WRITE_WAIT,
};
use crate::rpc::MethodRegistry;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Remote agent endpoint, established at construction and driven by
/// [`Self::serve`].
pub struct AgentEndpoint {
    registry: MethodRegistry,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl AgentEndpoint {
    /// Dial the hub at `addr`/`path`, identifying as `agent_id`.
    pub async fn connect(
        agent_id: &str,
        addr: &str,
        path: &str,
        registry: MethodRegistry,
    ) -> Result<Self, AgentError> {
        let url = format!("ws://{addr}{path}");
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| AgentError::connect_with_source(format!("invalid url {url}"), e))?;
        let header = HeaderValue::from_str(agent_id)
            .map_err(|e| AgentError::connect_with_source("invalid agent id header", e))?;
        request.headers_mut().insert(IDENTIFY_HEADER, header);

        info!(url = %url, agent_id = %agent_id, "connecting to coordinator hub");

        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(MAX_MSG_SIZE);
        config.max_frame_size = Some(MAX_MSG_SIZE);
        let (ws, _response) = connect_async_with_config(request, Some(config), false)
            .await
            .map_err(|e| AgentError::connect_with_source(format!("dial {url}"), e))?;

        Ok(Self { registry, ws })
    }

    /// Serve the channel until it closes, a pong is missed, or `cancel`
    /// fires. Requests are dispatched one at a time in arrival order.
    pub async fn serve(self, cancel: CancellationToken) -> Result<(), AgentError> {
        let Self { registry, ws } = self;
        let (mut sink, mut stream) = ws.split();

        let mut ping = tokio::time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
        let mut deadline = Instant::now() + PONG_WAIT;

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = tokio::time::timeout(WRITE_WAIT, sink.send(Message::Close(None))).await;
                    break Ok(());
                }
                _ = ping.tick() => {
                    if let Err(e) = write_frame(&mut sink, Message::Ping(Vec::new())).await {
                        warn!(error = %e, "ping");
                    }
                }
                frame = tokio::time::timeout_at(deadline, stream.next()) => match frame {
                    Err(_) => break Err(AgentError::channel("pong wait elapsed")),
                    Ok(None) => break Ok(()),
                    Ok(Some(Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed))) => break Ok(()),
                    Ok(Some(Err(e))) => break Err(AgentError::channel(e.to_string())),
                    Ok(Some(Ok(message))) => match message {
                        Message::Close(_) => break Ok(()),
                        Message::Pong(_) => {
                            deadline = Instant::now() + PONG_WAIT;
                        }
                        Message::Ping(payload) => {
                            if let Err(e) = write_frame(&mut sink, Message::Pong(payload)).await {
                                warn!(error = %e, "pong reply");
                            }
                        }
                        Message::Text(text) => {
                            let response = dispatch(&registry, &text).await;
                            let payload = match serde_json::to_string(&response) {
                                Ok(payload) => payload,
                                Err(e) => break Err(AgentError::channel(format!("resp json encode: {e}"))),
                            };
                            if let Err(e) = write_frame(&mut sink, Message::Text(payload)).await {
                                break Err(e);
                            }
                        }
                        _ => {}
                    },
                },
            }
        };

        info!("agent endpoint stopped");
        result
    }
}

async fn write_frame(sink: &mut WsSink, message: Message) -> Result<(), AgentError> {
    match tokio::time::timeout(WRITE_WAIT, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(AgentError::channel(e.to_string())),
        Err(_) => Err(AgentError::channel("write wait elapsed")),
    }
}

/// Parse one inbound text frame and run it through the registry. Every
/// failure mode answers with an envelope carrying `Err`; the loop never
/// dies on a bad frame.
async fn dispatch(registry: &MethodRegistry, raw: &str) -> RpcResponse {
    let cleaned = raw.replace('\n', " ");
    let cleaned = cleaned.trim();

    let request: RpcRequest = match serde_json::from_str(cleaned) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "unparseable rpc envelope");
            return RpcResponse {
                guid: String::new(),
                data: String::new(),
                err: format!("wrong msg format; msg: {cleaned}: {e}"),
            };
        }
    };

    debug!(guid = %request.guid, method = %request.method, "dispatching rpc");

    let Some(handler) = registry.handler(&request.method) else {
        return RpcResponse {
            guid: request.guid,
            data: String::new(),
            err: format!("wrong ldap rpc method : {}", request.method),
        };
    };

    let guid = request.guid;
    match handler(request.params).await {
        Ok(data) => RpcResponse {
            guid,
            data,
            err: String::new(),
        },
        Err(e) => RpcResponse {
            guid,
            data: String::new(),
            err: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn echo_registry() -> MethodRegistry {
        let mut registry = MethodRegistry::new();
        registry.register(
            "echo",
            Arc::new(|params| Box::pin(async move { Ok(params) })),
        );
        registry.register(
            "boom",
            Arc::new(|_params| {
                Box::pin(async move { Err("handler exploded".to_string().into()) })
            }),
        );
        registry
    }

    #[tokio::test]
    async fn test_dispatch_echo() {
        let registry = echo_registry();
        let raw = r#"{"GUID":"g1","Method":"echo","Params":"hello"}"#;
        let resp = dispatch(&registry, raw).await;
        assert_eq!(resp.guid, "g1");
        assert_eq!(resp.data, "hello");
        assert_eq!(resp.err, "");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method() {
        let registry = echo_registry();
        let raw = r#"{"GUID":"g2","Method":"nope","Params":""}"#;
        let resp = dispatch(&registry, raw).await;
        assert_eq!(resp.guid, "g2");
        assert_eq!(resp.data, "");
        assert_eq!(resp.err, "wrong ldap rpc method : nope");
    }

    #[tokio::test]
    async fn test_dispatch_unparseable_envelope() {
        let registry = echo_registry();
        let resp = dispatch(&registry, "{not json").await;
        assert_eq!(resp.guid, "");
        assert!(resp.err.contains("wrong msg format"));
    }

    #[tokio::test]
    async fn test_dispatch_trims_embedded_newlines() {
        let registry = echo_registry();
        let raw = "  {\"GUID\":\"g3\",\n\"Method\":\"echo\",\n\"Params\":\"x\"}\n";
        let resp = dispatch(&registry, raw).await;
        assert_eq!(resp.guid, "g3");
        assert_eq!(resp.data, "x");
    }

    #[tokio::test]
    async fn test_dispatch_handler_error_keeps_guid() {
        let registry = echo_registry();
        let raw = r#"{"GUID":"g4","Method":"boom","Params":""}"#;
        let resp = dispatch(&registry, raw).await;
        assert_eq!(resp.guid, "g4");
        assert_eq!(resp.data, "");
        assert_eq!(resp.err, "handler exploded");
    }
}

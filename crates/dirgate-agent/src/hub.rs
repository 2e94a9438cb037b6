//! Coordinator hub
//!
//! The central dispatcher. Agents connect over a WebSocket upgrade route
//! carrying the identify header; the hub keeps a registry of live
//! connections per logical agent id (several redundant paths per id are
//! allowed) and a pending table correlating request GUIDs with response
//! waiters. Both tables are owned by dedicated actor tasks that drain an
//! intake of closures, so no caller ever touches them directly.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::HubError;
use crate::model::{
    RpcRequest, RpcResponse, IDENTIFY_HEADER, MAX_MSG_SIZE, PING_PERIOD, PONG_WAIT, WRITE_WAIT,
};

type ConnFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
type ConnOp = Box<dyn for<'a> FnOnce(&'a mut ConnTable) -> ConnFuture<'a> + Send>;
type RpcOp = Box<dyn FnOnce(&mut PendingTable) + Send>;

fn conn_op<F>(f: F) -> ConnOp
where
    F: for<'a> FnOnce(&'a mut ConnTable) -> ConnFuture<'a> + Send + 'static,
{
    Box::new(f)
}

/// agent id -> seed -> live connection. Owned by the connection actor.
#[derive(Default)]
struct ConnTable {
    conns: HashMap<String, HashMap<String, AgentConn>>,
}

/// GUID -> response waiter. Owned by the pending-rpc actor.
#[derive(Default)]
struct PendingTable {
    waiters: HashMap<String, oneshot::Sender<RpcResponse>>,
}

/// One frame queued for a connection's writer task, acknowledged once the
/// write finished or failed.
struct Outbound {
    frame: Message,
    ack: oneshot::Sender<Result<(), HubError>>,
}

/// Registry handle to one live agent connection.
#[derive(Clone)]
struct AgentConn {
    outbound: mpsc::Sender<Outbound>,
}

impl AgentConn {
    async fn write(&self, frame: Message) -> Result<(), HubError> {
        write_via(&self.outbound, frame).await
    }
}

async fn write_via(outbound: &mpsc::Sender<Outbound>, frame: Message) -> Result<(), HubError> {
    let (ack, done) = oneshot::channel();
    outbound
        .send(Outbound { frame, ack })
        .await
        .map_err(|_| HubError::write("connection writer gone"))?;
    done.await
        .unwrap_or_else(|_| Err(HubError::write("connection writer dropped")))
}

struct HubShared {
    conn_ops: mpsc::Sender<ConnOp>,
    rpc_ops: mpsc::Sender<RpcOp>,
    timeout: Duration,
    shutdown: CancellationToken,
    seed_counter: AtomicU64,
}

impl HubShared {
    /// Seeds are unique across every agent id for the hub's lifetime.
    fn next_seed(&self) -> String {
        self.seed_counter.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

/// Central dispatcher routing RPCs to connected agents.
///
/// Cheap to clone; all clones share the registry and pending table.
#[derive(Clone)]
pub struct CoordinatorHub {
    shared: Arc<HubShared>,
}

impl CoordinatorHub {
    /// Create the hub and start its registry and pending-table actors.
    /// `timeout` bounds every [`Self::rpc`] call and the shutdown grace.
    pub fn new(timeout: Duration) -> Self {
        let (conn_ops, conn_intake) = mpsc::channel(1);
        let (rpc_ops, rpc_intake) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        tokio::spawn(serve_conn_ops(conn_intake, shutdown.clone()));
        tokio::spawn(serve_rpc_ops(rpc_intake, shutdown.clone()));
        Self {
            shared: Arc::new(HubShared {
                conn_ops,
                rpc_ops,
                timeout,
                shutdown,
                seed_counter: AtomicU64::new(1),
            }),
        }
    }

    /// Fire one request at the agent. A missing GUID is generated. When a
    /// response sink is supplied it is registered under the GUID before the
    /// frame goes out and rolled back if every connection refuses it.
    pub async fn send(
        &self,
        agent_id: &str,
        mut msg: RpcRequest,
        response: Option<oneshot::Sender<RpcResponse>>,
    ) -> Result<(), HubError> {
        if msg.guid.is_empty() {
            msg.guid = Uuid::new_v4().to_string();
        }
        let payload = serde_json::to_string(&msg).map_err(|e| HubError::Encode {
            message: format!("{e}; msg: {msg:?}"),
        })?;

        let (done, outcome) = oneshot::channel();
        let rpc_ops = self.shared.rpc_ops.clone();
        let guid = msg.guid;
        let agent = agent_id.to_string();
        let op = conn_op(move |table: &mut ConnTable| {
            Box::pin(async move {
                let result =
                    send_on_table(table, &agent, &guid, payload, response, &rpc_ops).await;
                let _ = done.send(result);
            })
        });
        self.shared
            .conn_ops
            .send(op)
            .await
            .map_err(|_| HubError::Closed)?;
        outcome.await.map_err(|_| HubError::Closed)?
    }

    /// Synchronous request/response: send, then wait for the correlated
    /// reply or the hub timeout, whichever comes first. On timeout the
    /// pending entry is cleaned up so the GUID can be reused.
    pub async fn rpc(&self, agent_id: &str, mut msg: RpcRequest) -> Result<RpcResponse, HubError> {
        if msg.guid.is_empty() {
            msg.guid = Uuid::new_v4().to_string();
        }
        let guid = msg.guid.clone();
        let (sink, response) = oneshot::channel();
        self.send(agent_id, msg, Some(sink)).await?;

        match tokio::time::timeout(self.shared.timeout, response).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(HubError::Closed),
            Err(_) => {
                remove_waiter(&self.shared.rpc_ops, guid).await;
                Err(HubError::Timeout)
            }
        }
    }

    /// Router carrying the upgrade route, for mounting into a larger app.
    pub fn router(&self, path: &str) -> Router {
        Router::new()
            .route(path, any(upgrade_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.shared.clone())
    }

    /// Bind `addr` and serve the upgrade route at `path` until `cancel`
    /// fires. Shutdown gives in-flight exchanges one timeout of grace,
    /// then closes every registered connection.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        addr: &str,
        path: &str,
    ) -> Result<(), HubError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HubError::server_with_source(format!("bind {addr}"), e))?;
        info!(addr = %addr, path = %path, "ldap hub listening");
        self.serve(cancel, listener, path).await
    }

    /// Like [`Self::run`] on an already-bound listener.
    pub async fn serve(
        &self,
        cancel: CancellationToken,
        listener: TcpListener,
        path: &str,
    ) -> Result<(), HubError> {
        let app = self.router(path);

        let hub = self.clone();
        let grace = cancel.clone();
        let closer = tokio::spawn(async move {
            grace.cancelled().await;
            info!("stopping ldap hub");
            tokio::time::sleep(hub.shared.timeout).await;
            hub.close();
        });

        let shutdown = {
            let cancel = cancel.clone();
            async move { cancel.cancelled().await }
        };
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| HubError::server_with_source("serve", e));

        closer.abort();
        if cancel.is_cancelled() {
            self.close();
        }
        info!("ldap hub stopped");
        result
    }

    /// Stop the actors: registered connections get a close frame, pending
    /// waiters are dropped. Idempotent.
    pub fn close(&self) {
        self.shared.shutdown.cancel();
    }
}

/// Deliver inside the connection actor: look up the agent's connections,
/// register the waiter, then try each path until one accepts the frame.
async fn send_on_table(
    table: &mut ConnTable,
    agent_id: &str,
    guid: &str,
    payload: String,
    response: Option<oneshot::Sender<RpcResponse>>,
    rpc_ops: &mpsc::Sender<RpcOp>,
) -> Result<(), HubError> {
    let Some(conns) = table.conns.get(agent_id) else {
        return Err(HubError::NoAgent {
            agent_id: agent_id.to_string(),
        });
    };

    let registered = response.is_some();
    if let Some(sink) = response {
        register_waiter(rpc_ops, guid.to_string(), sink).await?;
    }

    let mut last_err = HubError::write("no live connection accepted the message");
    for conn in conns.values() {
        match conn.write(Message::Text(payload.clone())).await {
            Ok(()) => return Ok(()),
            Err(e) => last_err = e,
        }
    }

    // Every path failed; the waiter must not be left orphaned.
    if registered {
        remove_waiter(rpc_ops, guid.to_string()).await;
    }
    Err(last_err)
}

async fn register_waiter(
    rpc_ops: &mpsc::Sender<RpcOp>,
    guid: String,
    sink: oneshot::Sender<RpcResponse>,
) -> Result<(), HubError> {
    let (done, outcome) = oneshot::channel();
    let op: RpcOp = Box::new(move |table| {
        let result = if table.waiters.contains_key(&guid) {
            Err(HubError::GuidExists { guid })
        } else {
            table.waiters.insert(guid, sink);
            Ok(())
        };
        let _ = done.send(result);
    });
    rpc_ops.send(op).await.map_err(|_| HubError::Closed)?;
    outcome.await.map_err(|_| HubError::Closed)?
}

async fn remove_waiter(rpc_ops: &mpsc::Sender<RpcOp>, guid: String) {
    let (done, outcome) = oneshot::channel();
    let op: RpcOp = Box::new(move |table| {
        table.waiters.remove(&guid);
        let _ = done.send(());
    });
    if rpc_ops.send(op).await.is_ok() {
        let _ = outcome.await;
    }
}

/// Route one inbound response frame to its registered waiter. An unknown
/// GUID or a gone receiver is logged and swallowed.
async fn deliver_response(rpc_ops: &mpsc::Sender<RpcOp>, raw: &str) {
    let cleaned = raw.replace('\n', " ");
    let cleaned = cleaned.trim();
    let resp: RpcResponse = match serde_json::from_str(cleaned) {
        Ok(resp) => resp,
        Err(e) => {
            warn!(error = %e, msg = %cleaned, "wrong response format");
            return;
        }
    };

    let guid = resp.guid.clone();
    let (done, outcome) = oneshot::channel();
    let op: RpcOp = Box::new(move |table| {
        let result = match table.waiters.remove(&resp.guid) {
            None => Err("wrong guid to respond".to_string()),
            Some(sink) => sink.send(resp).map_err(|_| "response receiver gone".to_string()),
        };
        let _ = done.send(result);
    });
    if rpc_ops.send(op).await.is_err() {
        return;
    }
    if let Ok(Err(reason)) = outcome.await {
        warn!(guid = %guid, reason = %reason, "deliver rpc");
    }
}

/// Connection actor: sole owner of the registry. On shutdown every
/// remaining connection is closed with a close frame.
async fn serve_conn_ops(mut intake: mpsc::Receiver<ConnOp>, shutdown: CancellationToken) {
    let mut table = ConnTable::default();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            op = intake.recv() => match op {
                Some(op) => op(&mut table).await,
                None => break,
            },
        }
    }
    for (agent_id, conns) in table.conns.drain() {
        for (seed, conn) in conns {
            debug!(agent_id = %agent_id, seed = %seed, "closing agent connection");
            let _ = conn.write(Message::Close(None)).await;
        }
    }
    debug!("hub connection registry stopped");
}

/// Pending-table actor. On shutdown the table is drained; dropped senders
/// wake every waiter with a closed-hub failure.
async fn serve_rpc_ops(mut intake: mpsc::Receiver<RpcOp>, shutdown: CancellationToken) {
    let mut table = PendingTable::default();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            op = intake.recv() => match op {
                Some(op) => op(&mut table),
                None => break,
            },
        }
    }
    table.waiters.clear();
    debug!("hub pending rpc table stopped");
}

/// Upgrade handler: the identify header names the logical agent; its
/// absence is a client error.
async fn upgrade_handler(
    State(state): State<Arc<HubShared>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let agent_id = headers
        .get(IDENTIFY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if agent_id.is_empty() {
        return (StatusCode::BAD_REQUEST, "empty identify header").into_response();
    }

    ws.max_message_size(MAX_MSG_SIZE)
        .on_upgrade(move |socket| serve_agent(state, agent_id, socket))
        .into_response()
}

/// Per-connection lifetime: register under a fresh seed, pump frames until
/// the channel dies, then deregister (dropping the agent id key when its
/// last seed goes).
async fn serve_agent(state: Arc<HubShared>, agent_id: String, socket: WebSocket) {
    let seed = state.next_seed();
    let (outbound, outbound_intake) = mpsc::channel::<Outbound>(1);
    let conn = AgentConn {
        outbound: outbound.clone(),
    };
    if !register_conn(&state, &agent_id, &seed, conn).await {
        return;
    }
    info!(agent_id = %agent_id, seed = %seed, "agent connected");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, outbound_intake));

    if let Err(reason) = read_loop(&state, stream, &outbound).await {
        warn!(agent_id = %agent_id, seed = %seed, reason = %reason, "serve conn");
    }

    deregister_conn(&state, &agent_id, &seed).await;
    drop(outbound);
    let _ = writer.await;
    info!(agent_id = %agent_id, seed = %seed, "agent disconnected");
}

async fn register_conn(state: &HubShared, agent_id: &str, seed: &str, conn: AgentConn) -> bool {
    let (done, outcome) = oneshot::channel();
    let agent_id = agent_id.to_string();
    let seed = seed.to_string();
    let op = conn_op(move |table: &mut ConnTable| {
        Box::pin(async move {
            table.conns.entry(agent_id).or_default().insert(seed, conn);
            let _ = done.send(());
        })
    });
    state.conn_ops.send(op).await.is_ok() && outcome.await.is_ok()
}

async fn deregister_conn(state: &HubShared, agent_id: &str, seed: &str) {
    let (done, outcome) = oneshot::channel();
    let agent_id = agent_id.to_string();
    let seed = seed.to_string();
    let op = conn_op(move |table: &mut ConnTable| {
        Box::pin(async move {
            if let Some(conns) = table.conns.get_mut(&agent_id) {
                conns.remove(&seed);
                if conns.is_empty() {
                    table.conns.remove(&agent_id);
                }
            }
            let _ = done.send(());
        })
    });
    if state.conn_ops.send(op).await.is_ok() {
        let _ = outcome.await;
    }
}

/// Inbound pump for one connection: keepalive pings, pong-extended read
/// deadline, and response delivery. Text frames carry response envelopes.
async fn read_loop(
    state: &HubShared,
    mut stream: SplitStream<WebSocket>,
    outbound: &mpsc::Sender<Outbound>,
) -> Result<(), String> {
    let mut ping = tokio::time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
    let mut deadline = Instant::now() + PONG_WAIT;
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => return Ok(()),
            _ = ping.tick() => {
                if let Err(e) = write_via(outbound, Message::Ping(Vec::new())).await {
                    warn!(error = %e, "ping");
                }
            }
            frame = tokio::time::timeout_at(deadline, stream.next()) => match frame {
                Err(_) => return Err("pong wait elapsed".to_string()),
                Ok(None) => return Ok(()),
                Ok(Some(Err(e))) => return Err(e.to_string()),
                Ok(Some(Ok(message))) => match message {
                    Message::Close(_) => return Ok(()),
                    Message::Pong(_) => {
                        deadline = Instant::now() + PONG_WAIT;
                    }
                    Message::Ping(payload) => {
                        if let Err(e) = write_via(outbound, Message::Pong(payload)).await {
                            warn!(error = %e, "pong reply");
                        }
                    }
                    Message::Text(text) => deliver_response(&state.rpc_ops, &text).await,
                    Message::Binary(_) => {}
                },
            },
        }
    }
}

/// Writer task: sole owner of the sink half. Applies the write deadline
/// and acknowledges each frame back to whoever queued it.
async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut intake: mpsc::Receiver<Outbound>) {
    while let Some(out) = intake.recv().await {
        let closing = matches!(out.frame, Message::Close(_));
        let result = match tokio::time::timeout(WRITE_WAIT, sink.send(out.frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(HubError::write(e.to_string())),
            Err(_) => Err(HubError::write("write wait elapsed")),
        };
        let _ = out.ack.send(result);
        if closing {
            break;
        }
    }
}

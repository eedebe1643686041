//! rosbridge-style WebSocket bridge.
//!
//! [`Ros2Bridge`] lets external tools (teleop pages, RViz-over-WebSocket
//! shims, scripts) drive the estimator with the JSON dialect spoken by
//! `rosbridge_server`:
//!
//! * **Inbound publish** –
//!   `{"op":"publish","topic":"/cmd_vel","msg":{"linear":{..},"angular":{..}}}`
//!   becomes an [`EventPayload::CmdVel`] on [`Topic::CmdVel`].
//!
//! * **Inbound service call** –
//!   `{"op":"call_service","service":"/ResetPosition","id":"r1","args":{"target_pose":{..}}}`
//!   is forwarded through the reset [`ServiceClient`] and answered with a
//!   `service_response` frame carrying the same `id`.
//!
//! * **Outbound** – every [`Topic::Tf`] event is pushed to each client as
//!   `{"op":"publish","topic":"/tf","msg":{"transforms":[..]}}`.
//!
//! Inbound frames are rate-limited per connection; anything unparseable or
//! addressed to an unknown topic/service is dropped.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use odomsim_types::{
    Event, EventPayload, OdomError, ResetPositionRequest, ResetPositionResponse,
    TransformStamped, Twist,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, Topic};
use crate::service::ServiceClient;

/// Inbound frames accepted per second per connection.
const DEFAULT_INBOUND_RATE: u32 = 200;

/// Upper bound on how long a bridged reset call may wait for the estimator.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(1);

pub type ResetClient = ServiceClient<ResetPositionRequest, ResetPositionResponse>;

/// The subset of rosbridge v2 operations the bridge understands.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum InboundOp {
    Publish {
        topic: String,
        msg: Value,
    },
    CallService {
        service: String,
        #[serde(default)]
        id: Option<Value>,
        #[serde(default)]
        args: Value,
    },
}

/// Bridge between WebSocket clients and the internal bus / reset service.
#[derive(Clone)]
pub struct Ros2Bridge {
    bus: Arc<EventBus>,
    reset: ResetClient,
    inbound_rate: NonZeroU32,
    call_timeout: Duration,
}

impl Ros2Bridge {
    pub fn new(bus: Arc<EventBus>, reset: ResetClient) -> Self {
        Self {
            bus,
            reset,
            inbound_rate: NonZeroU32::new(DEFAULT_INBOUND_RATE).unwrap_or(NonZeroU32::MIN),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Cap on inbound frames per second per connection.  Zero is bumped to
    /// one.
    pub fn with_inbound_rate(mut self, per_second: u32) -> Self {
        self.inbound_rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    // -----------------------------------------------------------------------
    // WebSocket server
    // -----------------------------------------------------------------------

    /// Accept clients on an already-bound listener until the task is
    /// dropped.
    pub async fn serve(self, listener: TcpListener) {
        match listener.local_addr() {
            Ok(addr) => info!(%addr, "rosbridge endpoint listening"),
            Err(e) => warn!(error = %e, "rosbridge endpoint listening on unknown address"),
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bridge.handle_ws_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "ws client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                }
            }
        }
    }

    async fn handle_ws_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), OdomError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| OdomError::Channel(format!("ws handshake from {peer}: {e}")))?;
        debug!(peer = %peer, "ws client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut tf_rx = self.bus.subscribe_to(Topic::Tf);
        let limiter: DefaultDirectRateLimiter = RateLimiter::direct(Quota::per_second(self.inbound_rate));

        loop {
            tokio::select! {
                // Forward pose broadcasts to the client.
                result = tf_rx.recv() => {
                    match result {
                        Ok(Event { payload: EventPayload::Transform(tf), .. }) => {
                            let frame = tf_frame(&tf)?;
                            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(n)) => {
                            warn!(peer = %peer, lagged_by = n, "ws client lagged on /tf");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                // Handle incoming WebSocket frames.
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        Some(Ok(Message::Text(text))) => {
                            if limiter.check().is_err() {
                                debug!(peer = %peer, "inbound frame rate-limited");
                                continue;
                            }
                            if let Some(reply) = self.handle_incoming(text.as_str()).await
                                && ws_tx.send(Message::Text(reply.into())).await.is_err()
                            {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        debug!(peer = %peer, "ws client disconnected");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Frame translation
    // -----------------------------------------------------------------------

    /// Translate one inbound text frame.
    ///
    /// Returns the JSON reply to send back, if the operation has one (only
    /// service calls do).
    pub async fn handle_incoming(&self, text: &str) -> Option<String> {
        let op = match serde_json::from_str::<InboundOp>(text) {
            Ok(op) => op,
            Err(e) => {
                debug!(error = %e, "ignoring unrecognised ws frame");
                return None;
            }
        };

        match op {
            InboundOp::Publish { topic, msg } => {
                self.forward_publish(&topic, msg);
                None
            }
            InboundOp::CallService { service, id, args } => {
                if !self.is_reset_service(&service) {
                    debug!(service = %service, "ignoring call to unknown service");
                    return None;
                }
                Some(self.forward_reset(&service, id, args).await)
            }
        }
    }

    fn forward_publish(&self, topic: &str, msg: Value) {
        if Topic::from_ros_name(topic) != Some(Topic::CmdVel) {
            debug!(topic = %topic, "ignoring publish to unbridged topic");
            return;
        }
        let twist: Twist = match serde_json::from_value(msg) {
            Ok(t) => t,
            Err(e) => {
                debug!(error = %e, "malformed /cmd_vel payload");
                return;
            }
        };
        let event = Event::new("odomsim-middleware::bridge/cmd_vel", EventPayload::CmdVel(twist));
        if let Err(e) = self.bus.publish_to(Topic::CmdVel, event) {
            debug!(error = %e, "/cmd_vel from bridge had no subscribers");
        }
    }

    async fn forward_reset(&self, service: &str, id: Option<Value>, args: Value) -> String {
        let outcome = match serde_json::from_value::<ResetPositionRequest>(args) {
            Ok(request) => self.reset.call_timeout(request, self.call_timeout).await,
            Err(e) => Err(OdomError::Parsing(format!("reset args: {e}"))),
        };

        let mut reply = match outcome {
            Ok(response) => json!({
                "op": "service_response",
                "service": service,
                "values": response,
                "result": true,
            }),
            Err(e) => {
                warn!(service = %service, error = %e, "bridged reset call failed");
                json!({
                    "op": "service_response",
                    "service": service,
                    "values": e.to_string(),
                    "result": false,
                })
            }
        };
        if let Some(id) = id {
            reply["id"] = id;
        }
        reply.to_string()
    }

    fn is_reset_service(&self, service: &str) -> bool {
        service.trim_start_matches('/') == self.reset.name().trim_start_matches('/')
    }
}

/// Encode a transform as a rosbridge `/tf` publish frame.
pub fn tf_frame(tf: &TransformStamped) -> Result<String, OdomError> {
    let frame = json!({
        "op": "publish",
        "topic": Topic::Tf.ros_name(),
        "msg": { "transforms": [tf] },
    });
    serde_json::to_string(&frame).map_err(|e| OdomError::Serialization(e.to_string()))
}

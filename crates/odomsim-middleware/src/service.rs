//! Request/response service channels.
//!
//! A service is a named pair of endpoints: any number of [`ServiceClient`]
//! clones send requests, and exactly one [`ServiceServer`] receives them.
//! Each request travels with a one-shot reply channel, so a caller waits only
//! for its own answer.
//!
//! ```rust
//! use odomsim_middleware::service::service_channel;
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! rt.block_on(async {
//!     let (client, mut server) = service_channel::<u32, u32>("double", 4);
//!     tokio::spawn(async move {
//!         while let Some(call) = server.next_call().await {
//!             let n = *call.request();
//!             call.respond(n * 2);
//!         }
//!     });
//!     assert_eq!(client.call(21).await.unwrap(), 42);
//! });
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use odomsim_types::OdomError;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Create a service named `name` whose request queue holds `capacity`
/// pending calls.
pub fn service_channel<Req, Res>(
    name: impl Into<String>,
    capacity: usize,
) -> (ServiceClient<Req, Res>, ServiceServer<Req, Res>) {
    let name: Arc<str> = Arc::from(name.into());
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ServiceClient {
            name: Arc::clone(&name),
            tx,
        },
        ServiceServer { name, rx },
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

/// Caller side of a service.  Cheap to clone.
pub struct ServiceClient<Req, Res> {
    name: Arc<str>,
    tx: mpsc::Sender<ServiceCall<Req, Res>>,
}

impl<Req, Res> Clone for ServiceClient<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            tx: self.tx.clone(),
        }
    }
}

impl<Req, Res> fmt::Debug for ServiceClient<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClient").field("name", &self.name).finish()
    }
}

impl<Req, Res> ServiceClient<Req, Res> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` while a server is still attached.
    pub fn is_available(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Send `request` and wait for the server's answer.
    ///
    /// # Errors
    ///
    /// [`OdomError::ServiceUnavailable`] when the server has shut down or
    /// dropped the call without responding.
    pub async fn call(&self, request: Req) -> Result<Res, OdomError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(ServiceCall { request, reply })
            .await
            .map_err(|_| OdomError::ServiceUnavailable(self.name.to_string()))?;
        response
            .await
            .map_err(|_| OdomError::ServiceUnavailable(self.name.to_string()))
    }

    /// [`ServiceClient::call`] bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// [`OdomError::Timeout`] when no answer arrives in time, otherwise as
    /// for [`ServiceClient::call`].
    pub async fn call_timeout(&self, request: Req, timeout: Duration) -> Result<Res, OdomError> {
        match tokio::time::timeout(timeout, self.call(request)).await {
            Ok(result) => result,
            Err(_) => Err(OdomError::Timeout {
                service: self.name.to_string(),
                millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Server
// ────────────────────────────────────────────────────────────────────────────

/// Answering side of a service.  Dropping it makes every pending and future
/// call fail with [`OdomError::ServiceUnavailable`].
pub struct ServiceServer<Req, Res> {
    name: Arc<str>,
    rx: mpsc::Receiver<ServiceCall<Req, Res>>,
}

impl<Req, Res> ServiceServer<Req, Res> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next call.  Returns `None` once every client is gone.
    pub async fn next_call(&mut self) -> Option<ServiceCall<Req, Res>> {
        self.rx.recv().await
    }
}

/// One in-flight request together with the channel its answer goes back on.
pub struct ServiceCall<Req, Res> {
    request: Req,
    reply: oneshot::Sender<Res>,
}

impl<Req, Res> ServiceCall<Req, Res> {
    pub fn request(&self) -> &Req {
        &self.request
    }

    /// Split into the request and a responder, for handlers that need to own
    /// the request.
    pub fn into_parts(self) -> (Req, Responder<Res>) {
        (self.request, Responder { reply: self.reply })
    }

    /// Send the answer.  A caller that already gave up (timeout, dropped
    /// future) is not an error for the server.
    pub fn respond(self, response: Res) {
        Responder { reply: self.reply }.respond(response);
    }
}

/// Reply half of a [`ServiceCall`].
pub struct Responder<Res> {
    reply: oneshot::Sender<Res>,
}

impl<Res> Responder<Res> {
    pub fn respond(self, response: Res) {
        if self.reply.send(response).is_err() {
            debug!("service caller went away before the response was sent");
        }
    }
}

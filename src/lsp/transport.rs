// src/lsp/transport.rs - Wire seam and request/response correlation

use super::LspError;
use lsp_server::{ErrorCode, Message, RequestId, Response};
use lsp_types::notification::Notification as _;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

#[derive(thiserror::Error, Debug)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("wire closed")]
    Closed,
}

/// Outgoing half of a server channel. Message framing and the actual
/// byte transport live behind this seam; the bridge never owns them.
pub trait Wire: Send + Sync {
    fn send(&self, msg: Message) -> Result<(), WireError>;
}

/// Server-initiated traffic surfaced to whoever owns the event channel.
#[derive(Debug)]
pub enum ServerEvent {
    Diagnostics(lsp_types::PublishDiagnosticsParams),
    Notification {
        method: String,
        params: serde_json::Value,
    },
}

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Response>>>>;

/// Correlates outgoing requests with incoming responses over a [`Wire`].
///
/// One transport exists per language server process. A dispatch task
/// routes responses to their pending oneshot, forwards notifications to
/// the event channel, and answers server-to-client requests with
/// `MethodNotFound` (the bridge implements none of them).
pub struct Transport {
    wire: Arc<dyn Wire>,
    pending: PendingMap,
    next_id: AtomicI32,
    request_timeout: Duration,
    closed: AtomicBool,
    dispatch: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Transport {
    pub fn new(
        wire: Arc<dyn Wire>,
        incoming: mpsc::UnboundedReceiver<Message>,
        events: mpsc::UnboundedSender<ServerEvent>,
        request_timeout: Duration,
    ) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let dispatch = tokio::spawn(dispatch_loop(
            incoming,
            pending.clone(),
            wire.clone(),
            events,
        ));
        Self {
            wire,
            pending,
            next_id: AtomicI32::new(0),
            request_timeout,
            closed: AtomicBool::new(false),
            dispatch: Mutex::new(Some(dispatch)),
        }
    }

    /// Send a request and register it in the pending table. The caller
    /// awaits the returned receiver via [`Transport::wait`]; splitting
    /// the two lets connections track their in-flight ids.
    pub fn send_request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<(RequestId, oneshot::Receiver<Response>), LspError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LspError::ConnectionReset);
        }
        let id = RequestId::from(self.next_id.fetch_add(1, Ordering::SeqCst));
        let request = lsp_server::Request::new(id.clone(), method.to_string(), params);
        let (tx, rx) = oneshot::channel();

        self.pending.lock().unwrap().insert(id.clone(), tx);
        if let Err(err) = self.wire.send(Message::Request(request)) {
            self.pending.lock().unwrap().remove(&id);
            return Err(err.into());
        }
        Ok((id, rx))
    }

    /// Await a registered request with the transport's bounded timeout.
    /// A dropped sender means the request was cancelled or the transport
    /// torn down; both surface as `ConnectionReset`.
    pub async fn wait(
        &self,
        method: &str,
        id: RequestId,
        rx: oneshot::Receiver<Response>,
    ) -> Result<serde_json::Value, LspError> {
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.error {
                    return Err(LspError::ServerError {
                        code: error.code,
                        message: error.message,
                    });
                }
                Ok(response.result.unwrap_or(serde_json::Value::Null))
            }
            Ok(Err(_)) => Err(LspError::ConnectionReset),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(LspError::Timeout(method.to_string()))
            }
        }
    }

    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, LspError> {
        let (id, rx) = self.send_request(method, params)?;
        self.wait(method, id, rx).await
    }

    pub fn notify(&self, method: &str, params: serde_json::Value) -> Result<(), LspError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LspError::ConnectionReset);
        }
        let notification = lsp_server::Notification::new(method.to_string(), params);
        self.wire
            .send(Message::Notification(notification))
            .map_err(Into::into)
    }

    /// Drop a pending request; its awaiter observes `ConnectionReset`.
    pub fn cancel(&self, id: &RequestId) {
        self.pending.lock().unwrap().remove(id);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop dispatching and reject everything still pending. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.dispatch.lock().unwrap().take() {
            handle.abort();
        }
        self.pending.lock().unwrap().clear();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn dispatch_loop(
    mut incoming: mpsc::UnboundedReceiver<Message>,
    pending: PendingMap,
    wire: Arc<dyn Wire>,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    while let Some(msg) = incoming.recv().await {
        match msg {
            Message::Response(response) => {
                let sender = pending.lock().unwrap().remove(&response.id);
                match sender {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => log::trace!("response for unknown request {:?}", response.id),
                }
            }
            Message::Notification(notification) => {
                let event = if notification.method
                    == lsp_types::notification::PublishDiagnostics::METHOD
                {
                    match serde_json::from_value(notification.params) {
                        Ok(params) => ServerEvent::Diagnostics(params),
                        Err(err) => {
                            log::warn!("malformed publishDiagnostics: {}", err);
                            continue;
                        }
                    }
                } else {
                    ServerEvent::Notification {
                        method: notification.method,
                        params: notification.params,
                    }
                };
                if events.send(event).is_err() {
                    // Nobody listens anymore; keep draining responses.
                    log::trace!("server event channel closed");
                }
            }
            Message::Request(request) => {
                let response = Response::new_err(
                    request.id,
                    ErrorCode::MethodNotFound as i32,
                    format!("client does not implement {}", request.method),
                );
                let _ = wire.send(Message::Response(response));
            }
        }
    }
    // Wire hung up; reject whatever is still in flight.
    pending.lock().unwrap().clear();
}

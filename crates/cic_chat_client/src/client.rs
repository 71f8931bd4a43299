//! WebSocket connection manager: one socket and one [`StreamSession`] per chat turn.
//!
//! [`open`] spawns a task that connects, sends the single `sendMessage`
//! request and feeds every delivery into the session. The returned
//! [`Connection`] reads the session, receives [`StreamEvent`]s and tears the
//! connection down on [`Connection::close`] or drop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::error::Elapsed;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::messages::ChatRequest;
use crate::reassembler::DEFAULT_MAX_FRAME_BYTES;
use crate::session::{Closure, Snapshot, StreamEvent, StreamSession};

/// Status reported for a close frame that carried no code.
pub const NO_STATUS_CODE: u16 = 1005;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Bounds applied to one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Largest incomplete frame kept in the reassembly buffer.
    pub max_frame_bytes: usize,
    /// How long an incomplete frame may wait for its next piece.
    pub frame_timeout: Duration,
    /// How long the socket may stay silent; `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            frame_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(120)),
        }
    }
}

/// Connection setup error.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid endpoint {endpoint}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: WsError,
    },
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

type SharedSession = Arc<Mutex<StreamSession>>;

fn lock(session: &Mutex<StreamSession>) -> MutexGuard<'_, StreamSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Open a connection to `endpoint` (e.g. `wss://host/stage`) and start streaming.
///
/// Must be called from within a tokio runtime. The request is sent once, as
/// soon as the socket is established; it is never retried.
pub fn open(
    endpoint: &str,
    prompt: &str,
    language: &str,
    options: StreamOptions,
) -> Result<Connection, ClientError> {
    let request = endpoint
        .into_client_request()
        .map_err(|source| ClientError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            source,
        })?;
    let payload = serde_json::to_string(&ChatRequest::new(prompt, language))?;

    let session = Arc::new(Mutex::new(StreamSession::new(options.max_frame_bytes)));
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let driver = Driver {
        session: session.clone(),
        events: tx,
        cancel: cancel.clone(),
        options,
    };
    let task = tokio::spawn(driver.run(request, payload));

    Ok(Connection {
        session,
        events: rx,
        cancel,
        task: Some(task),
    })
}

/// Handle to one streaming chat turn.
pub struct Connection {
    session: SharedSession,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Current answer text, processing flag and lifecycle state.
    pub fn snapshot(&self) -> Snapshot {
        lock(&self.session).snapshot()
    }

    /// Next event in delivery order; `None` once the connection is finished
    /// or closed.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    /// Tear the connection down. Safe to call any number of times.
    ///
    /// Once this returns, no delivery still in flight reaches the session.
    pub fn close(&self) {
        let first = lock(&self.session).cancel();
        self.cancel.cancel();
        if first {
            info!("closing websocket connection");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the connection task to release the socket.
    pub async fn finished(&mut self) -> Snapshot {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "connection task failed");
            }
        }
        self.snapshot()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Task side of a connection. All session mutation goes through [`Driver::apply`].
struct Driver {
    session: SharedSession,
    events: mpsc::UnboundedSender<StreamEvent>,
    cancel: CancellationToken,
    options: StreamOptions,
}

impl Driver {
    /// Run `f` under the session lock and forward its events.
    ///
    /// Returns whether the session still accepts transport events.
    fn apply<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut StreamSession) -> Vec<StreamEvent>,
    {
        let mut session = lock(&self.session);
        for event in f(&mut session) {
            // Receiver gone means nobody renders; the session still records.
            let _ = self.events.send(event);
        }
        !session.is_cancelled() && session.closure().is_none()
    }

    async fn run(self, request: Request, payload: String) {
        let endpoint = request.uri().to_string();
        self.apply(|s| {
            s.begin_connect();
            Vec::new()
        });

        let connected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            result = tokio_tungstenite::connect_async(request) => result,
        };
        let ws = match connected {
            Ok((ws, _)) => ws,
            Err(e) => {
                self.apply(|s| {
                    s.closed(Closure::ConnectFailed {
                        error: e.to_string(),
                    })
                });
                return;
            }
        };
        info!(%endpoint, "websocket connected");

        let (mut write, read) = ws.split();
        if self.apply(StreamSession::opened) {
            match write.send(Message::Text(payload)).await {
                Ok(()) => info!("initial request sent"),
                Err(e) => {
                    self.apply(|s| s.transport_error(&e.to_string()));
                }
            }
            self.drive(read).await;
        }

        // Every exit path ends here: release the socket.
        match tokio::time::timeout(CLOSE_GRACE, write.close()).await {
            Ok(Ok(())) => debug!("websocket close sent"),
            Ok(Err(e)) => debug!(error = %e, "websocket already closed"),
            Err(_) => debug!("websocket close timed out"),
        }
    }

    /// Pump deliveries into the session until it stops accepting them.
    async fn drive<St>(&self, mut read: St)
    where
        St: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        loop {
            let wait = if lock(&self.session).has_pending_frame() {
                Some(self.options.frame_timeout)
            } else {
                self.options.idle_timeout
            };

            let delivery = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                delivery = next_delivery(&mut read, wait) => delivery,
            };

            let live = match delivery {
                Err(_) => self.apply(StreamSession::timed_out),
                Ok(None) => self.apply(|s| s.closed(Closure::Unexpected)),
                Ok(Some(Ok(Message::Text(text)))) => self.apply(|s| s.receive(&text)),
                Ok(Some(Ok(Message::Binary(bytes)))) => match String::from_utf8(bytes) {
                    Ok(text) => self.apply(|s| s.receive(&text)),
                    Err(e) => self.apply(|s| {
                        s.transport_error(&format!("binary message is not UTF-8: {e}"))
                    }),
                },
                Ok(Some(Ok(Message::Close(frame)))) => {
                    let closure = match frame {
                        Some(frame) => Closure::Clean {
                            code: u16::from(frame.code),
                            reason: frame.reason.into_owned(),
                        },
                        None => Closure::Clean {
                            code: NO_STATUS_CODE,
                            reason: String::new(),
                        },
                    };
                    self.apply(|s| s.closed(closure))
                }
                Ok(Some(Ok(_))) => true,
                Ok(Some(Err(e))) => {
                    let gone = matches!(
                        e,
                        WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_)
                    );
                    let live = self.apply(|s| s.transport_error(&e.to_string()));
                    if gone {
                        self.apply(|s| s.closed(Closure::Unexpected))
                    } else {
                        live
                    }
                }
            };

            if !live {
                return;
            }
        }
    }
}

async fn next_delivery<St>(
    read: &mut St,
    wait: Option<Duration>,
) -> Result<Option<Result<Message, WsError>>, Elapsed>
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    match wait {
        Some(wait) => tokio::time::timeout(wait, read.next()).await,
        None => Ok(read.next().await),
    }
}

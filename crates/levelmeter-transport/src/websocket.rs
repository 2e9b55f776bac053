//! WebSocket connection manager.

use std::sync::Arc;

use crossbeam_channel::Sender;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use levelmeter_ipc::ConnectionState;

use crate::connection::{CloseInitiator, ConnectionEvent, ConnectionId, SharedState};
use crate::error::TransportError;
use crate::{TransportResult, SUBSCRIBE_LEVELS_CMD};

/// Builds the directive that subscribes to `device`'s levels.
pub fn subscribe_directive(device: &str) -> String {
    format!("{} {}", SUBSCRIBE_LEVELS_CMD, device)
}

/// Outbound instruction for the connection task.
#[derive(Debug)]
enum Directive {
    Send(String),
    Close,
}

/// Owns the single event-stream connection.
///
/// Every device passed to [`subscribe`](Self::subscribe) is remembered and
/// re-subscribed each time a connection opens, so subscribing before the
/// connection is open defers the directive rather than losing it.
pub struct StreamConnection {
    url: Option<Url>,
    current: Option<ConnectionId>,
    shared: Arc<SharedState>,
    devices: Arc<RwLock<Vec<String>>>,
    runtime: Option<Runtime>,
    directive_tx: Option<mpsc::UnboundedSender<Directive>>,
    event_tx: Sender<ConnectionEvent>,
}

impl StreamConnection {
    /// Create a connection manager that reports to `event_tx`.
    pub fn new(event_tx: Sender<ConnectionEvent>) -> TransportResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("levelmeter-ws")
            .enable_all()
            .build()
            .map_err(|e| TransportError::Runtime(e.to_string()))?;

        Ok(Self {
            url: None,
            current: None,
            shared: Arc::new(SharedState::default()),
            devices: Arc::new(RwLock::new(Vec::new())),
            runtime: Some(runtime),
            directive_tx: None,
            event_tx,
        })
    }

    /// Open a connection to `url`.
    ///
    /// Returns `Ok(false)` without doing anything if a connection is already
    /// connecting or open; callers must `close()` first to retarget.
    #[instrument(name = "stream_open", skip(self))]
    pub fn open(&mut self, url: &str) -> TransportResult<bool> {
        let url = parse_url(url)?;

        let state = self.shared.get();
        if state.is_live() {
            warn!(
                url = %url,
                current = ?self.url.as_ref().map(Url::as_str),
                "Connection is already {}, ignoring open",
                state.name()
            );
            return Ok(false);
        }

        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| TransportError::Runtime("runtime shut down".to_string()))?;

        let id = self.shared.begin();
        info!(%id, url = %url, "Opening connection");

        let (directive_tx, directive_rx) = mpsc::unbounded_channel();
        let task = ConnectionTask {
            id,
            url: url.clone(),
            shared: Arc::clone(&self.shared),
            devices: Arc::clone(&self.devices),
            events: self.event_tx.clone(),
        };
        runtime.spawn(task.run(directive_rx));

        self.url = Some(url);
        self.current = Some(id);
        self.directive_tx = Some(directive_tx);
        Ok(true)
    }

    /// Register `device` and subscribe to its levels.
    ///
    /// The directive is sent now if the connection is open, otherwise when
    /// it next opens. Returns whether it was sent now.
    pub fn subscribe(&mut self, device: &str) -> bool {
        let mut devices = self.devices.write();
        if !devices.iter().any(|d| d == device) {
            debug!(device = %device, "Registering device");
            devices.push(device.to_string());
        }

        // The task snapshots the device list while holding the read lock as
        // it moves to Open, so a device is sent either here or there.
        if !self.shared.get().is_open() {
            debug!(device = %device, "Connection not open, deferring subscribe");
            return false;
        }
        match self.directive_tx.as_ref() {
            Some(tx) => {
                debug!(device = %device, "Subscribing");
                tx.send(Directive::Send(subscribe_directive(device))).is_ok()
            }
            None => false,
        }
    }

    /// Stop re-subscribing `device` on future opens.
    pub fn forget(&mut self, device: &str) -> bool {
        let mut devices = self.devices.write();
        let before = devices.len();
        devices.retain(|d| d != device);
        before != devices.len()
    }

    /// Close the connection.
    ///
    /// Returns whether a connecting or open connection was torn down. Safe to
    /// call repeatedly and with nothing open.
    #[instrument(name = "stream_close", skip(self))]
    pub fn close(&mut self) -> bool {
        let Some(tx) = self.directive_tx.take() else {
            debug!("Ignoring close, no connection");
            return false;
        };
        let Some(id) = self.current else {
            return false;
        };

        let state = self.shared.get();
        if !state.is_live() {
            debug!(%id, "Ignoring close, connection is {}", state.name());
            return false;
        }

        info!(%id, url = ?self.url.as_ref().map(Url::as_str), "Closing connection");
        self.shared.transition(id, ConnectionState::Closing);
        // A task that already exited has dropped its receiver.
        let _ = tx.send(Directive::Close);
        true
    }

    /// Point the connection at `url`, reopening if it changed.
    ///
    /// Returns whether a new connection attempt started.
    pub fn set_url(&mut self, url: &str) -> TransportResult<bool> {
        let parsed = parse_url(url)?;
        if self.url.as_ref() == Some(&parsed) && self.shared.get().is_live() {
            debug!(url = %parsed, "URL unchanged");
            return Ok(false);
        }
        self.close();
        self.open(parsed.as_str())
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.get()
    }

    /// Id of the most recent connection, if any was opened.
    pub fn current_id(&self) -> Option<ConnectionId> {
        self.current
    }

    /// URL of the most recent connection.
    pub fn url(&self) -> Option<&str> {
        self.url.as_ref().map(Url::as_str)
    }

    /// Registered devices in registration order.
    pub fn devices(&self) -> Vec<String> {
        self.devices.read().clone()
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.close();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn parse_url(url: &str) -> TransportResult<Url> {
    let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(TransportError::InvalidUrl(format!(
            "{}: scheme must be ws or wss, not {}",
            url, other
        ))),
    }
}

/// One connection attempt and, if it succeeds, its lifetime.
struct ConnectionTask {
    id: ConnectionId,
    url: Url,
    shared: Arc<SharedState>,
    devices: Arc<RwLock<Vec<String>>>,
    events: Sender<ConnectionEvent>,
}

impl ConnectionTask {
    async fn run(self, mut directives: mpsc::UnboundedReceiver<Directive>) {
        let id = self.id;
        debug!(%id, url = %self.url, "Connecting");

        let stream = tokio::select! {
            result = connect_async(self.url.as_str()) => match result {
                Ok((stream, _response)) => stream,
                Err(e) => {
                    warn!(%id, url = %self.url, error = %e, "Connection failed");
                    self.emit(ConnectionEvent::Error {
                        id,
                        error: TransportError::ConnectionFailed(self.url.to_string()),
                    });
                    self.finish(CloseInitiator::Failure, None);
                    return;
                }
            },
            _ = wait_for_close(&mut directives) => {
                info!(%id, "Connection attempt cancelled");
                self.finish(CloseInitiator::Caller, None);
                return;
            }
        };

        let pending = {
            let devices = self.devices.read();
            self.shared
                .advance(id, ConnectionState::Connecting, ConnectionState::Open)
                .then(|| devices.clone())
        };
        let Some(pending) = pending else {
            // Closed or superseded while the handshake completed.
            let (mut sink, _) = stream.split();
            let _ = sink.close().await;
            self.finish(CloseInitiator::Caller, None);
            return;
        };

        info!(%id, url = %self.url, devices = pending.len(), "Connected");
        self.emit(ConnectionEvent::Opened {
            id,
            url: self.url.to_string(),
        });

        let (mut sink, mut source) = stream.split();

        for device in &pending {
            debug!(%id, device = %device, "Subscribing");
            if let Err(e) = sink.send(Message::text(subscribe_directive(device))).await {
                self.lost(e.to_string());
                return;
            }
        }

        loop {
            tokio::select! {
                directive = directives.recv() => match directive {
                    Some(Directive::Send(text)) => {
                        trace!(%id, directive = %text, "Sending");
                        if let Err(e) = sink.send(Message::text(text)).await {
                            self.lost(e.to_string());
                            return;
                        }
                    }
                    Some(Directive::Close) | None => {
                        let _ = sink.close().await;
                        info!(%id, url = %self.url, "Closed connection");
                        self.finish(CloseInitiator::Caller, None);
                        return;
                    }
                },
                message = source.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        self.emit(ConnectionEvent::Frame { id, text: text.to_string() });
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => self.emit(ConnectionEvent::Frame { id, text }),
                        Err(_) => warn!(%id, len = data.len(), "Ignoring non UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code));
                        info!(%id, url = %self.url, ?code, "Connection closed by peer");
                        self.emit(ConnectionEvent::Error {
                            id,
                            error: TransportError::ConnectionLost {
                                url: self.url.to_string(),
                                reason: match code {
                                    Some(code) => format!("closed by peer (code {})", code),
                                    None => "closed by peer".to_string(),
                                },
                            },
                        });
                        self.finish(CloseInitiator::Peer, code);
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.lost(e.to_string());
                        return;
                    }
                    None => {
                        self.lost("stream ended".to_string());
                        return;
                    }
                },
            }
        }
    }

    fn lost(&self, reason: String) {
        warn!(id = %self.id, url = %self.url, reason = %reason, "Connection lost");
        self.emit(ConnectionEvent::Error {
            id: self.id,
            error: TransportError::ConnectionLost {
                url: self.url.to_string(),
                reason,
            },
        });
        self.finish(CloseInitiator::Failure, None);
    }

    fn finish(&self, initiator: CloseInitiator, code: Option<u16>) {
        self.shared.transition(self.id, ConnectionState::Disconnected);
        self.emit(ConnectionEvent::Closed {
            id: self.id,
            url: self.url.to_string(),
            initiator,
            code,
        });
    }

    /// Blocks when the engine falls behind, which pushes back on the socket.
    fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            debug!(id = %self.id, "Event receiver dropped");
        }
    }
}

/// Resolves once a close is requested or the manager goes away.
async fn wait_for_close(directives: &mut mpsc::UnboundedReceiver<Directive>) {
    loop {
        match directives.recv().await {
            Some(Directive::Close) | None => return,
            // Subscriptions are replayed from the device list on open.
            Some(Directive::Send(_)) => continue,
        }
    }
}

//! Threaded engine runner.

use crossbeam_channel::{select, Receiver, Sender};
use tracing::{debug, info, instrument, warn};

use levelmeter_ipc::{ConnectionState, EngineCommand, EngineEvent, EngineStatus};
use levelmeter_transport::{CloseInitiator, ConnectionEvent, StreamConnection};

use crate::config::EngineConfig;
use crate::error::LevelsError;
use crate::levels::LevelsEngine;
use crate::render::RendererSink;
use crate::sink::{ChannelErrorSink, EventRenderer};
use crate::LevelsResult;

/// Drives a [`LevelsEngine`] from host commands and connection events.
///
/// Both arrive on crossbeam channels and are handled one at a time on the
/// thread that calls [`run`](Self::run), so ingest never races a command.
pub struct Engine {
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    connection_rx: Receiver<ConnectionEvent>,
    connection: StreamConnection,
    levels: LevelsEngine,
    initial_url: Option<String>,
    connection_state: ConnectionState,
}

impl Engine {
    /// Create a new engine.
    pub fn new(
        config: EngineConfig,
        command_rx: Receiver<EngineCommand>,
        event_tx: Sender<EngineEvent>,
    ) -> LevelsResult<Self> {
        let (connection_tx, connection_rx) =
            crossbeam_channel::bounded(levelmeter_transport::EVENT_CHANNEL_CAPACITY);
        let mut connection = StreamConnection::new(connection_tx)?;

        let levels = LevelsEngine::new(
            &config,
            Box::new(ChannelErrorSink::new(event_tx.clone())),
        );
        for device in levels.devices() {
            connection.subscribe(device);
        }

        Ok(Self {
            command_rx,
            event_tx,
            connection_rx,
            connection,
            levels,
            initial_url: config.url,
            connection_state: ConnectionState::Disconnected,
        })
    }

    /// Run the engine (blocking).
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!("Engine starting");
        self.send_event(EngineEvent::Ready);

        if let Some(url) = self.initial_url.take() {
            self.open(&url);
        }

        let command_rx = self.command_rx.clone();
        let connection_rx = self.connection_rx.clone();
        loop {
            select! {
                recv(command_rx) -> command => match command {
                    Ok(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    Err(_) => {
                        info!("Command channel disconnected, shutting down");
                        break;
                    }
                },
                recv(connection_rx) -> event => match event {
                    Ok(event) => self.handle_connection_event(event),
                    Err(_) => {
                        warn!("Connection event channel disconnected, shutting down");
                        break;
                    }
                },
            }
            self.sync_connection_state();
        }

        self.connection.close();
        info!("Engine stopped");
    }

    /// Handle a command. Returns false if engine should stop.
    fn handle_command(&mut self, command: EngineCommand) -> bool {
        debug!(?command, "Handling command");

        match command {
            EngineCommand::Open { url } => self.open(&url),
            EngineCommand::SetUrl { url } => self.set_url(&url),
            EngineCommand::Close => {
                self.connection.close();
            }
            EngineCommand::LoadDevices(devices) => self.load_devices(&devices),
            EngineCommand::Subscribe(device) => self.load_devices(&[device]),
            EngineCommand::RemoveDevice(device) => {
                self.connection.forget(&device);
                if !self.levels.remove_device(&device) {
                    self.levels.report(&LevelsError::UnknownDevice(device));
                }
            }
            EngineCommand::SetActiveDevice(device) => {
                self.levels.set_active_device(&device);
            }
            EngineCommand::SetPaused(paused) => self.levels.set_paused(paused),
            EngineCommand::SetWindowDuration(seconds) => {
                self.levels.set_window_duration(seconds);
            }
            EngineCommand::SetRendererAttached(true) if self.levels.has_renderer() => {
                // The host mirror already holds every series.
                debug!("Renderer already attached");
            }
            EngineCommand::SetRendererAttached(attached) => {
                let renderer: Option<Box<dyn RendererSink>> = if attached {
                    Some(Box::new(EventRenderer::new(self.event_tx.clone())))
                } else {
                    None
                };
                self.levels.set_renderer(renderer);
            }
            EngineCommand::GetState => self.send_state(),
            EngineCommand::Snapshot { device } => match self.levels.snapshot(&device) {
                Ok(snapshot) => self.send_event(EngineEvent::Snapshot(snapshot)),
                Err(e) => self.levels.report(&e),
            },
            EngineCommand::Shutdown => {
                self.connection.close();
                self.send_event(EngineEvent::Shutdown);
                return false;
            }
        }

        true
    }

    #[instrument(name = "engine_open", skip(self))]
    fn open(&mut self, url: &str) {
        if let Err(e) = self.connection.open(url) {
            self.levels.report(&e.into());
        }
        self.sync_connection_state();
    }

    fn set_url(&mut self, url: &str) {
        match self.connection.set_url(url) {
            Ok(true) => info!(url = %url, "Connection retargeted"),
            Ok(false) => {}
            Err(e) => self.levels.report(&e.into()),
        }
        self.sync_connection_state();
    }

    fn load_devices(&mut self, devices: &[String]) {
        for device in self.levels.load_devices(devices) {
            self.connection.subscribe(&device);
        }
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        if self.connection.current_id() != Some(event.id()) {
            debug!(id = %event.id(), "Dropping event from superseded connection");
            return;
        }

        match event {
            ConnectionEvent::Opened { id, url } => {
                info!(%id, url = %url, "Connected");
            }
            ConnectionEvent::Frame { text, .. } => {
                self.levels.ingest(&text);
            }
            ConnectionEvent::Closed {
                id,
                url,
                initiator,
                code,
            } => {
                // Failures were already reported through an Error event.
                if initiator == CloseInitiator::Caller {
                    info!(%id, url = %url, "Closed connection");
                } else {
                    debug!(%id, url = %url, ?initiator, ?code, "Connection ended");
                }
            }
            ConnectionEvent::Error { error, .. } => {
                self.levels.report(&error.into());
            }
        }
    }

    fn sync_connection_state(&mut self) {
        let current = self.connection.state();
        if current == self.connection_state {
            return;
        }
        let previous = std::mem::replace(&mut self.connection_state, current);

        debug!(
            previous = %previous.name(),
            current = %current.name(),
            "Connection state transition"
        );
        self.send_event(EngineEvent::ConnectionChanged { previous, current });
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            connection: self.connection.state(),
            url: self.connection.url().map(str::to_string),
            devices: self.levels.devices().to_vec(),
            active_device: self.levels.active_device().map(str::to_string),
            paused: self.levels.is_paused(),
            window_seconds: self.levels.window_seconds(),
            stats: self.levels.stats(),
        }
    }

    fn send_state(&self) {
        self.send_event(EngineEvent::State(self.status()));
    }

    fn send_event(&self, event: EngineEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.connection.close();
    }
}

//! Threaded engine against a local websocket telemetry source.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use levelmeter_engine::{create_engine, EngineConfig};
use levelmeter_ipc::{command_channel, event_channel, ConnectionState, EngineCommand, EngineEvent};

const TIMEOUT: Duration = Duration::from_secs(5);

fn levels(device: &str, ts: f64, value: f64) -> String {
    format!(
        r#"{{"message":"Levels","data":{{"name":"{}","ts":{},"levels":{{"I1":{},"O1":{}}}}}}}"#,
        device,
        ts,
        value,
        value - 3.0
    )
}

/// Waits for subscriptions to `A` and `B`, sends two frames for each, then
/// either closes the socket itself or waits for the client to close.
fn spawn_source(close_after_send: bool) -> u16 {
    let (port_tx, port_rx) = crossbeam_channel::bounded(1);

    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            port_tx.send(listener.local_addr().unwrap().port()).unwrap();

            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();

            let mut subscribed = Vec::new();
            while subscribed.len() < 2 {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => subscribed.push(text.to_string()),
                    Some(Ok(_)) => {}
                    _ => return,
                }
            }
            subscribed.sort();
            assert_eq!(subscribed, vec!["subscribe levels A", "subscribe levels B"]);

            ws.send(Message::text(r#"{"masterVolume":-20.0}"#)).await.unwrap();
            for (device, ts, value) in [("B", 50.0, -30.0), ("B", 51.0, -31.0), ("A", 10.0, -10.0), ("A", 11.0, -11.0)] {
                ws.send(Message::text(levels(device, ts, value))).await.unwrap();
            }

            if close_after_send {
                let _ = ws.close(None).await;
            } else {
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_close() {
                        break;
                    }
                }
            }
        });
    });

    port_rx.recv_timeout(TIMEOUT).unwrap()
}

struct Harness {
    commands: Sender<EngineCommand>,
    events: Receiver<EngineEvent>,
    handle: Option<JoinHandle<()>>,
}

impl Harness {
    fn start(port: u16) -> Self {
        let (command_tx, command_rx) = command_channel();
        let (event_tx, event_rx) = event_channel();
        let config = EngineConfig {
            url: Some(format!("ws://127.0.0.1:{}/ws", port)),
            devices: vec!["A".to_string(), "B".to_string()],
            active_device: Some("A".to_string()),
            ..Default::default()
        };
        let mut engine = create_engine(config, command_rx, event_tx).unwrap();
        let handle = thread::spawn(move || engine.run());
        command_tx.send(EngineCommand::SetRendererAttached(true)).unwrap();

        Self {
            commands: command_tx,
            events: event_rx,
            handle: Some(handle),
        }
    }

    /// Collects events until `done` matches one, returning all of them.
    fn until(&self, mut done: impl FnMut(&EngineEvent) -> bool) -> Vec<EngineEvent> {
        let deadline = Instant::now() + TIMEOUT;
        let mut seen = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = self
                .events
                .recv_timeout(remaining)
                .unwrap_or_else(|_| panic!("timed out, saw {:?}", seen));
            let finished = done(&event);
            seen.push(event);
            if finished {
                return seen;
            }
        }
    }

    fn snapshot(&self, device: &str) -> levelmeter_ipc::DeviceSnapshot {
        self.commands
            .send(EngineCommand::Snapshot {
                device: device.to_string(),
            })
            .unwrap();
        match self.until(|e| matches!(e, EngineEvent::Snapshot(_))).pop() {
            Some(EngineEvent::Snapshot(snapshot)) => snapshot,
            other => panic!("unexpected event {:?}", other),
        }
    }

    fn shutdown(mut self) {
        self.commands.send(EngineCommand::Shutdown).unwrap();
        self.until(|e| matches!(e, EngineEvent::Shutdown));
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

fn is_error(event: &EngineEvent) -> bool {
    matches!(event, EngineEvent::Error { .. })
}

fn two_rows_of_a(event: &EngineEvent) -> bool {
    matches!(event, EngineEvent::Data { columns } if columns[0].len() == 2)
}

#[test]
fn test_peer_drop_is_reported_and_history_survives() {
    let port = spawn_source(true);
    let harness = Harness::start(port);

    let seen = harness.until(two_rows_of_a);
    assert!(matches!(seen[0], EngineEvent::Ready));
    assert!(seen.iter().any(|e| matches!(
        e,
        EngineEvent::ConnectionChanged { current: ConnectionState::Open, .. }
    )));
    let added: Vec<&str> = seen
        .iter()
        .filter_map(|e| match e {
            EngineEvent::SeriesAdded(s) => Some(s.label.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(added, vec!["I1", "O1"]);
    assert!(!seen.iter().any(is_error));

    match seen.last() {
        Some(EngineEvent::Data { columns }) => {
            assert_eq!(columns[0], vec![0.0, 1.0]);
            assert_eq!(columns[1], vec![-10.0, -11.0]);
            assert_eq!(columns[2], vec![-13.0, -14.0]);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let seen = harness.until(is_error);
    match seen.last() {
        Some(EngineEvent::Error { message }) => {
            assert!(message.contains("lost"), "{}", message);
        }
        other => panic!("unexpected event {:?}", other),
    }
    harness.until(|e| {
        matches!(
            e,
            EngineEvent::ConnectionChanged { current: ConnectionState::Disconnected, .. }
        )
    });

    let a = harness.snapshot("A");
    assert_eq!(a.columns[0], vec![0.0, 1.0]);
    let b = harness.snapshot("B");
    assert_eq!(b.first_timestamp, Some(50.0));
    assert_eq!(b.labels, vec!["Time", "I1", "O1"]);
    assert_eq!(b.columns[1], vec![-30.0, -31.0]);

    harness.shutdown();
}

#[test]
fn test_caller_close_raises_no_error() {
    let port = spawn_source(false);
    let harness = Harness::start(port);

    harness.until(two_rows_of_a);
    harness.commands.send(EngineCommand::Close).unwrap();

    let seen = harness.until(|e| {
        matches!(
            e,
            EngineEvent::ConnectionChanged { current: ConnectionState::Disconnected, .. }
        )
    });
    assert!(!seen.iter().any(is_error), "{:?}", seen);

    harness.commands.send(EngineCommand::GetState).unwrap();
    match harness.until(|e| matches!(e, EngineEvent::State(_))).pop() {
        Some(EngineEvent::State(status)) => {
            assert_eq!(status.connection, ConnectionState::Disconnected);
            assert_eq!(status.devices, vec!["A", "B"]);
            assert_eq!(status.active_device.as_deref(), Some("A"));
            assert_eq!(status.stats.frames_received, 5);
            assert_eq!(status.stats.frames_ingested, 4);
            assert_eq!(status.stats.frames_ignored, 1);
            assert_eq!(status.stats.errors_reported, 0);
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert_eq!(harness.snapshot("B").columns[0], vec![0.0, 1.0]);
    harness.shutdown();
}

#[test]
fn test_unknown_active_device_reports_one_error() {
    let port = spawn_source(false);
    let harness = Harness::start(port);
    harness.until(two_rows_of_a);

    harness
        .commands
        .send(EngineCommand::SetActiveDevice("ghost".to_string()))
        .unwrap();
    harness.commands.send(EngineCommand::GetState).unwrap();

    let seen = harness.until(|e| matches!(e, EngineEvent::State(_)));
    let errors: Vec<&EngineEvent> = seen.iter().filter(|e| is_error(e)).collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        EngineEvent::Error { message } if message == "Unknown device ghost"
    ));
    match seen.last() {
        Some(EngineEvent::State(status)) => {
            assert_eq!(status.active_device.as_deref(), Some("A"))
        }
        other => panic!("unexpected event {:?}", other),
    }

    harness.shutdown();
}

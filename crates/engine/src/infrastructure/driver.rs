//! Connection Driver
//!
//! Async wiring between a [`FeedPublisher`] and a real socket task:
//! pumps transport events into the engine, flushes engine commands
//! out to the socket and forwards drained messages to the consumer.
//! The engine core stays synchronous; this is the only place the
//! lock is taken, and never across an await.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use feedlink_transport::{Socket, TransportCommand, TransportEvent};

use crate::application::error::EngineError;
use crate::domain::messages::FeedMessage;
use crate::presentation::publisher::FeedPublisher;

const CHANNEL_CAPACITY: usize = 1024;

/// Default cadence for deadline evaluation; well under the 1-second
/// counter interval
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct ConnectionDriver {
    pub publisher: Arc<Mutex<FeedPublisher>>,
    pub messages: mpsc::Receiver<FeedMessage>,
    pub task: JoinHandle<Result<(), EngineError>>,
}

impl ConnectionDriver {
    /// Spawn a socket task and the pump loop around `publisher`
    pub fn spawn(publisher: FeedPublisher) -> Self {
        let publisher = Arc::new(Mutex::new(publisher));
        let (command_tx, event_rx) = Socket::spawn(CHANNEL_CAPACITY);
        let (message_tx, message_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let task = tokio::spawn(run(
            Arc::clone(&publisher),
            command_tx,
            event_rx,
            message_tx,
            DEFAULT_POLL_INTERVAL,
        ));

        ConnectionDriver {
            publisher,
            messages: message_rx,
            task,
        }
    }
}

async fn run(
    publisher: Arc<Mutex<FeedPublisher>>,
    command_tx: mpsc::Sender<TransportCommand>,
    mut event_rx: mpsc::Receiver<TransportEvent>,
    message_tx: mpsc::Sender<FeedMessage>,
    poll_interval: Duration,
) -> Result<(), EngineError> {
    let mut ticker = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                let result = publisher
                    .lock()
                    .handle_transport_event(event, Instant::now());
                if let Err(e) = result {
                    if e.is_fatal() {
                        tracing::error!("engine aborted: {}", e);
                        return Err(e);
                    }
                    tracing::warn!("transport event rejected: {}", e);
                }
            }
            _ = ticker.tick() => {}
        }

        let (messages, commands) = {
            let mut publisher = publisher.lock();
            let messages = match publisher.collect_outgoing_messages(Instant::now()) {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::error!("engine aborted: {}", e);
                    return Err(e);
                }
            };
            (messages, publisher.take_transport_commands())
        };

        for message in messages {
            if message_tx.send(message).await.is_err() {
                tracing::debug!("message consumer closed, stopping driver");
                return Ok(());
            }
        }
        for command in commands {
            if command_tx.send(command).await.is_err() {
                tracing::debug!("socket task closed, stopping driver");
                return Ok(());
            }
        }
    }
    Ok(())
}

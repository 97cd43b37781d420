//! Socket Wrapper
//!
//! Command/event wrapper over a WebSocket connection. The engine
//! never touches the stream directly: it sends [`TransportCommand`]s
//! and consumes [`TransportEvent`]s, with open/close completions
//! carrying back the wait id of the attempt that requested them.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Readiness of the physical connection as seen by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadyState {
    #[default]
    Closed,
    Connecting,
    Open,
    Closing,
}

/// Close code, reason and cleanliness reported by the peer or the
/// wrapper itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketClose {
    pub code: u16,
    pub reason: String,
    pub was_clean: bool,
}

impl SocketClose {
    pub fn new(code: u16, reason: impl Into<String>, was_clean: bool) -> Self {
        SocketClose {
            code,
            reason: reason.into(),
            was_clean,
        }
    }
}

/// Commands issued by the engine
#[derive(Debug, Clone)]
pub enum TransportCommand {
    /// Open a connection to `url`; completion reports `wait_id`
    Open { wait_id: u64, url: String },
    /// Close the current connection; completion reports `wait_id`
    Close {
        wait_id: u64,
        code: u16,
        reason: String,
    },
    /// Send an encoded envelope over the open connection
    Send { text: String },
}

/// Events reported back to the engine
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Open for `wait_id` succeeded
    Opened { wait_id: u64 },
    /// Open for `wait_id` failed
    OpenFailed { wait_id: u64, error: String },
    /// Text frame received
    Message { text: String },
    /// Connection closed; `wait_id` is set when the close was
    /// requested by the engine, `None` when the peer closed
    Closed {
        wait_id: Option<u64>,
        close: SocketClose,
    },
    /// Socket-level error outside open/close completion
    Error { error: String },
}

/// WebSocket wrapper task
///
/// [`Socket::spawn`] returns the command sender and event receiver;
/// the task runs until the command channel is dropped.
pub struct Socket;

impl Socket {
    pub fn spawn(capacity: usize) -> (mpsc::Sender<TransportCommand>, mpsc::Receiver<TransportEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel::<TransportCommand>(capacity);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(capacity);

        tokio::spawn(run(cmd_rx, event_tx));

        (cmd_tx, event_rx)
    }
}

async fn run(mut cmd_rx: mpsc::Receiver<TransportCommand>, event_tx: mpsc::Sender<TransportEvent>) {
    let mut writer: Option<WsSink> = None;
    let mut reader_task: Option<JoinHandle<()>> = None;

    while let Some(command) = cmd_rx.recv().await {
        match command {
            TransportCommand::Open { wait_id, url } => {
                drop_connection(&mut writer, &mut reader_task).await;

                match open_connection(&url).await {
                    Ok(stream) => {
                        let (sink, source) = stream.split();
                        writer = Some(sink);
                        reader_task = Some(spawn_reader(source, event_tx.clone()));
                        if event_tx
                            .send(TransportEvent::Opened { wait_id })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        if event_tx
                            .send(TransportEvent::OpenFailed {
                                wait_id,
                                error: e.to_string(),
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
            TransportCommand::Close {
                wait_id,
                code,
                reason,
            } => {
                // The reader is stopped first so the peer's close ack
                // is not reported as a second close.
                if let Some(task) = reader_task.take() {
                    task.abort();
                }

                let close = match writer.take() {
                    Some(mut sink) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.clone().into(),
                        };
                        let clean = sink.send(Message::Close(Some(frame))).await.is_ok();
                        SocketClose::new(code, reason, clean)
                    }
                    None => SocketClose::new(code, reason, true),
                };

                if event_tx
                    .send(TransportEvent::Closed {
                        wait_id: Some(wait_id),
                        close,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            TransportCommand::Send { text } => match writer.as_mut() {
                Some(sink) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        if event_tx
                            .send(TransportEvent::Error {
                                error: e.to_string(),
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
                None => {
                    if event_tx
                        .send(TransportEvent::Error {
                            error: TransportError::NotConnected.to_string(),
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            },
        }
    }

    drop_connection(&mut writer, &mut reader_task).await;
}

async fn open_connection(url: &str) -> Result<WsStream, TransportError> {
    let parsed = url::Url::parse(url)?;
    let (stream, _) = connect_async(parsed.as_str()).await?;
    Ok(stream)
}

async fn drop_connection(writer: &mut Option<WsSink>, reader_task: &mut Option<JoinHandle<()>>) {
    if let Some(task) = reader_task.take() {
        task.abort();
    }
    if let Some(mut sink) = writer.take() {
        let _ = sink.send(Message::Close(None)).await;
    }
}

fn spawn_reader(mut source: WsSource, event_tx: mpsc::Sender<TransportEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = source.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if event_tx
                        .send(TransportEvent::Message {
                            text: text.to_string(),
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    let close = match frame {
                        Some(frame) => SocketClose::new(
                            u16::from(frame.code),
                            frame.reason.to_string(),
                            true,
                        ),
                        None => SocketClose::new(1005, String::new(), false),
                    };
                    let _ = event_tx
                        .send(TransportEvent::Closed {
                            wait_id: None,
                            close,
                        })
                        .await;
                    break;
                }
                Ok(Message::Ping(data)) => {
                    tracing::trace!("received ping: {:?}", data);
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = event_tx
                        .send(TransportEvent::Error {
                            error: e.to_string(),
                        })
                        .await;
                    break;
                }
            }
        }
    })
}

//! Feed Publisher
//!
//! The facade the rest of the system talks to. Wires the connection
//! state machine and the subscription multiplexer together,
//! translates lifecycle events into the ordered outbound message
//! queue, and turns machine actions into transport commands.
//!
//! The caller drains [`FeedMessage`]s with `collect_outgoing_messages`
//! each polling cycle and forwards [`TransportCommand`]s to the
//! socket; transport events are injected back with
//! `handle_transport_event`.

use std::collections::VecDeque;
use std::time::Instant;

use feedlink_transport::{ReadyState, SocketClose, TransportCommand, TransportEvent, WireEnvelope};

use crate::application::error::EngineError;
use crate::application::multiplexer::{Routed, SubscriptionMultiplexer};
use crate::application::state_machine::{
    ConnectionAction, ConnectionStateMachine, LifecycleEvent,
};
use crate::config::EngineConfig;
use crate::domain::messages::{FeedMessage, LogLevel};
use crate::domain::metrics::CountersSnapshot;
use crate::domain::state::{ConnectionState, ReconnectReason, WaitId};
use crate::domain::subscription::{
    DataDefinition, DataItemId, FeedDefinition, SubscriptionHandle,
};
use crate::infrastructure::auth::{
    IdentifyResult, decode_identify_response, encode_identify_request,
};
use crate::{CLOSE_CODE_SESSION_TAKEOVER, CLOSE_REASON_SESSION_EXPIRED};

pub struct FeedPublisher {
    config: EngineConfig,
    machine: ConnectionStateMachine,
    multiplexer: SubscriptionMultiplexer,

    queue: VecDeque<FeedMessage>,
    commands: VecDeque<TransportCommand>,

    connection_item: Option<DataItemId>,
    /// Transaction id and wait id of the in-flight identify, if any
    pending_auth: Option<(u64, WaitId)>,
    ready_state: ReadyState,
    counters_at: Option<Instant>,
}

impl FeedPublisher {
    pub fn new(config: EngineConfig) -> Self {
        let machine = ConnectionStateMachine::new(
            config.endpoints.clone(),
            config.access_token.clone(),
            config.min_token_lifetime(),
            config.min_refresh_interval(),
        );
        let multiplexer = SubscriptionMultiplexer::new(config.response_timeout());
        FeedPublisher {
            config,
            machine,
            multiplexer,
            queue: VecDeque::new(),
            commands: VecDeque::new(),
            connection_item: None,
            pending_auth: None,
            ready_state: ReadyState::Closed,
            counters_at: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    /// Bind the connection data item and start the lifecycle.
    ///
    /// The connection subscription is online from the caller's
    /// perspective immediately; the physical lifecycle is reported
    /// asynchronously through the queue.
    pub fn connect(
        &mut self,
        data_item_id: DataItemId,
        request_nr: u64,
        definition: &FeedDefinition,
        now: Instant,
    ) -> Result<bool, EngineError> {
        if !matches!(definition, FeedDefinition::Connection) {
            return Err(EngineError::InvalidDefinition(
                "connect requires the connection definition",
            ));
        }
        if self.connection_item.is_some() {
            return Err(EngineError::AlreadyConnected);
        }

        self.connection_item = Some(data_item_id);
        self.counters_at = Some(now + self.config.counter_interval());

        self.queue.push_back(FeedMessage::Counters(self.snapshot()));
        self.queue
            .push_back(FeedMessage::Synchronised { request_nr });

        self.machine.start(now)?;
        self.pump(now)?;
        Ok(true)
    }

    /// Tear the lifecycle down with no reconnect. A no-op when the
    /// id is not the bound connection item.
    pub fn disconnect(&mut self, data_item_id: &DataItemId, now: Instant) -> Result<(), EngineError> {
        if self.connection_item.as_ref() != Some(data_item_id) {
            return Ok(());
        }

        let close_socket = matches!(
            self.ready_state,
            ReadyState::Connecting | ReadyState::Open
        );
        self.machine.finalise(close_socket);
        self.pump(now)?;

        self.multiplexer.clear();
        self.queue.clear();
        self.connection_item = None;
        self.pending_auth = None;
        self.counters_at = None;
        Ok(())
    }

    /// Replace the bearer token; a fresh identify follows whenever
    /// one is in flight or the connection is online
    pub fn update_access_token(
        &mut self,
        access_token: impl Into<String>,
        now: Instant,
    ) -> Result<(), EngineError> {
        self.machine.update_access_token(access_token)?;
        self.pump(now)
    }

    /// Register a data subscription; no wire traffic until the
    /// connection is online and the item is activated
    pub fn subscribe_data_item(
        &mut self,
        data_item_id: DataItemId,
        definition: DataDefinition,
    ) -> Result<SubscriptionHandle, EngineError> {
        self.multiplexer.subscribe(data_item_id, definition)
    }

    /// Remove a data subscription, best-effort on the wire
    pub fn unsubscribe_data_item(&mut self, data_item_id: &DataItemId) {
        let envelopes = self.multiplexer.unsubscribe(data_item_id);
        self.send_envelopes(envelopes);
    }

    /// Confirm the caller is ready to consume data for the item
    pub fn activate_data_item(
        &mut self,
        data_item_id: &DataItemId,
        request_nr: u64,
        now: Instant,
    ) -> Result<(), EngineError> {
        let envelopes = self.multiplexer.activate(data_item_id, request_nr, now)?;
        self.send_envelopes(envelopes);
        Ok(())
    }

    /// Inject one transport event into the engine
    pub fn handle_transport_event(
        &mut self,
        event: TransportEvent,
        now: Instant,
    ) -> Result<(), EngineError> {
        match event {
            TransportEvent::Opened { wait_id } => {
                self.ready_state = ReadyState::Open;
                self.machine.handle_socket_opened(WaitId(wait_id))?;
            }
            TransportEvent::OpenFailed { wait_id, error } => {
                self.ready_state = ReadyState::Closed;
                self.machine
                    .handle_socket_open_failed(WaitId(wait_id), &error, now);
            }
            TransportEvent::Message { text } => {
                self.handle_message(&text, now)?;
            }
            TransportEvent::Closed { wait_id, close } => {
                self.ready_state = ReadyState::Closed;
                self.pending_auth = None;
                self.handle_close(wait_id.map(WaitId), close, now)?;
            }
            TransportEvent::Error { error } => {
                self.handle_socket_error(&error, now);
            }
        }
        self.pump(now)
    }

    /// Drain the ordered message queue. Also evaluates the engine's
    /// deadlines (reconnect delay, token refresh, request timeouts,
    /// counter snapshots).
    pub fn collect_outgoing_messages(
        &mut self,
        now: Instant,
    ) -> Result<Vec<FeedMessage>, EngineError> {
        self.machine.poll(now);
        self.pump(now)?;

        let timeouts = self.multiplexer.exercise(now);
        self.queue.extend(timeouts);

        if let Some(at) = self.counters_at
            && now >= at
        {
            self.queue.push_back(FeedMessage::Counters(self.snapshot()));
            self.counters_at = Some(at + self.config.counter_interval());
        }

        Ok(self.queue.drain(..).collect())
    }

    /// Drain the transport commands produced since the last call
    pub fn take_transport_commands(&mut self) -> Vec<TransportCommand> {
        self.commands.drain(..).collect()
    }

    fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            connection: self.machine.metrics(),
            subscriptions: self.multiplexer.counters(),
            active_subscriptions: self.multiplexer.active_count(),
        }
    }

    /// Translate pending machine events and actions into queue
    /// messages and transport commands
    fn pump(&mut self, now: Instant) -> Result<(), EngineError> {
        loop {
            let events = self.machine.take_events();
            let actions = self.machine.take_actions();
            if events.is_empty() && actions.is_empty() {
                break;
            }

            for event in events {
                match event {
                    LifecycleEvent::StateChanged { state, wait_id } => {
                        self.queue
                            .push_back(FeedMessage::StateChanged { state, wait_id });
                    }
                    LifecycleEvent::CameOnline => {
                        self.queue.push_back(FeedMessage::OnlineChanged {
                            online: true,
                            close: None,
                        });
                        let envelopes = self.multiplexer.come_online(now)?;
                        self.send_envelopes(envelopes);
                    }
                    LifecycleEvent::WentOffline { close } => {
                        self.multiplexer.go_offline(&close.reason);
                        self.queue.push_back(FeedMessage::OnlineChanged {
                            online: false,
                            close: Some(close),
                        });
                    }
                    LifecycleEvent::EndpointSelected { url } => {
                        self.queue.push_back(FeedMessage::EndpointSelected { url });
                    }
                    LifecycleEvent::Log { level, text } => {
                        self.queue.push_back(FeedMessage::Log { level, text });
                    }
                }
            }

            for action in actions {
                match action {
                    ConnectionAction::OpenSocket { wait_id, url } => {
                        self.ready_state = ReadyState::Connecting;
                        self.commands.push_back(TransportCommand::Open {
                            wait_id: wait_id.0,
                            url,
                        });
                    }
                    ConnectionAction::SendIdentify {
                        wait_id,
                        access_token,
                    } => {
                        let transaction_id = self.multiplexer.next_transaction_id();
                        self.pending_auth = Some((transaction_id, wait_id));
                        let envelope = encode_identify_request(
                            transaction_id,
                            &self.config.provider,
                            &access_token,
                        );
                        self.send_envelopes(vec![envelope]);
                    }
                    ConnectionAction::CloseSocket {
                        wait_id,
                        code,
                        reason,
                    } => {
                        self.ready_state = ReadyState::Closing;
                        self.commands.push_back(TransportCommand::Close {
                            wait_id: wait_id.0,
                            code,
                            reason,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_message(&mut self, text: &str, now: Instant) -> Result<(), EngineError> {
        let envelope = match WireEnvelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.queue.push_back(FeedMessage::Log {
                    level: LogLevel::Warning,
                    text: format!("undecodable message: {}", e),
                });
                return Ok(());
            }
        };

        match self.multiplexer.route(envelope) {
            Routed::Auth(envelope) => self.handle_auth_envelope(&envelope, now),
            Routed::Handled(messages) => {
                self.queue.extend(messages);
                Ok(())
            }
        }
    }

    fn handle_auth_envelope(
        &mut self,
        envelope: &WireEnvelope,
        now: Instant,
    ) -> Result<(), EngineError> {
        let Some((transaction_id, wait_id)) = self.pending_auth else {
            tracing::debug!("auth envelope with no identify in flight");
            return Ok(());
        };

        match decode_identify_response(envelope) {
            Ok(response) => {
                if envelope.transaction_id != transaction_id {
                    // Superseded by a re-identify under the same
                    // wait id; only the latest transaction counts.
                    tracing::debug!(
                        "discarding identify response for stale transaction {}",
                        envelope.transaction_id
                    );
                    return Ok(());
                }
                self.pending_auth = None;
                match response.result {
                    IdentifyResult::Accepted => {
                        self.machine.handle_identify_accepted(wait_id, &response, now)
                    }
                    IdentifyResult::Rejected => {
                        self.machine.handle_identify_rejected(wait_id, now);
                        Ok(())
                    }
                }
            }
            Err(e) => {
                self.pending_auth = None;
                self.machine.handle_auth_failure(wait_id, &e.to_string(), now);
                Ok(())
            }
        }
    }

    /// Close-code triage.
    ///
    /// The session-takeover code with reason `SessionExpired` means
    /// our token lapsed: reconnect. The same code with any other
    /// reason means another client took the session over: report and
    /// finalise, never reconnect (a reconnect would race the client
    /// that took over).
    fn handle_close(
        &mut self,
        wait_id: Option<WaitId>,
        close: SocketClose,
        now: Instant,
    ) -> Result<(), EngineError> {
        if self.machine.is_finalising() {
            if let Some(wait_id) = wait_id {
                self.machine.handle_close_completed(wait_id);
            }
            return Ok(());
        }

        if let Some(wait_id) = wait_id {
            // Engine-requested close (auth failure path); the machine
            // already scheduled what follows.
            self.machine.handle_close_completed(wait_id);
            return Ok(());
        }

        if close.code == CLOSE_CODE_SESSION_TAKEOVER {
            if close.reason == CLOSE_REASON_SESSION_EXPIRED {
                self.reconnect(ReconnectReason::AuthExpired, close, now);
            } else {
                self.queue.push_back(FeedMessage::SessionKickedOff {
                    reason: close.reason.clone(),
                });
                self.multiplexer.go_offline(&close.reason);
                self.machine.finalise(false);
            }
            return Ok(());
        }

        self.reconnect(ReconnectReason::UnexpectedSocketClose, close, now);
        Ok(())
    }

    fn reconnect(&mut self, reason: ReconnectReason, close: SocketClose, now: Instant) {
        self.queue.push_back(FeedMessage::Reconnecting { reason });
        self.machine.handle_remote_close(close, now);
    }

    /// Socket errors are state-dependent: fatal to an open attempt,
    /// informational otherwise
    fn handle_socket_error(&mut self, error: &str, now: Instant) {
        match self.ready_state {
            ReadyState::Connecting => {
                self.ready_state = ReadyState::Closed;
                self.machine.handle_open_error(error, now);
            }
            ReadyState::Open => {
                self.queue.push_back(FeedMessage::Log {
                    level: LogLevel::Warning,
                    text: format!("socket error: {}", error),
                });
            }
            ReadyState::Closing => {
                self.machine.handle_close_error(error);
            }
            ReadyState::Closed => {
                self.queue.push_back(FeedMessage::Log {
                    level: LogLevel::Info,
                    text: format!("socket error after close: {}", error),
                });
            }
        }
    }

    fn send_envelopes(&mut self, envelopes: Vec<WireEnvelope>) {
        for envelope in envelopes {
            match envelope.encode() {
                Ok(text) => self.commands.push_back(TransportCommand::Send { text }),
                Err(e) => {
                    // Failing to encode our own envelope is an
                    // engine bug; surface it loudly but keep going.
                    tracing::error!("envelope encode failed: {}", e);
                    self.queue.push_back(FeedMessage::Log {
                        level: LogLevel::Error,
                        text: format!("envelope encode failed: {}", e),
                    });
                }
            }
        }
    }
}

//! Connection State Machine
//!
//! Owns the connection lifecycle: which action to take next (open
//! the socket, identify, close, wait out a reconnect delay), the
//! successive-failure counters behind backoff selection, and the
//! access token with its refresh deadline.
//!
//! The machine is terminal-free and cyclic: failures route back
//! through `ReconnectDelay`, and only an explicit `finalise` stops
//! it. Every cancellable attempt is tagged with a wait id; a
//! completion whose wait id is no longer active is discarded.
//!
//! Callers drain typed [`LifecycleEvent`]s and [`ConnectionAction`]s
//! after each call instead of wiring ambient callbacks.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use feedlink_transport::SocketClose;

use crate::domain::backoff::reconnect_delay;
use crate::domain::messages::LogLevel;
use crate::domain::metrics::ConnectionMetrics;
use crate::domain::state::{ConnectionState, WaitId, WaitIdAllocator};
use crate::infrastructure::auth::{IdentifyResponse, parse_expires_in};

use super::error::EngineError;

/// Close code sent when the engine closes the socket itself
const ENGINE_CLOSE_CODE: u16 = 1000;

/// Lifecycle events emitted by the machine, drained by the facade
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    StateChanged {
        state: ConnectionState,
        wait_id: WaitId,
    },
    CameOnline,
    WentOffline {
        close: SocketClose,
    },
    EndpointSelected {
        url: String,
    },
    Log {
        level: LogLevel,
        text: String,
    },
}

/// Actions the facade must carry out against transport and codec
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionAction {
    OpenSocket {
        wait_id: WaitId,
        url: String,
    },
    SendIdentify {
        wait_id: WaitId,
        access_token: String,
    },
    CloseSocket {
        wait_id: WaitId,
        code: u16,
        reason: String,
    },
}

pub struct ConnectionStateMachine {
    state: ConnectionState,
    wait_ids: WaitIdAllocator,
    active_wait_id: Option<WaitId>,

    endpoints: Vec<String>,
    next_endpoint: usize,

    access_token: String,
    auth_in_flight: bool,

    metrics: ConnectionMetrics,

    reconnect_at: Option<(WaitId, Instant)>,
    refresh_at: Option<Instant>,

    min_token_lifetime: Duration,
    min_refresh_interval: Duration,

    events: VecDeque<LifecycleEvent>,
    actions: VecDeque<ConnectionAction>,
}

impl ConnectionStateMachine {
    pub fn new(
        endpoints: Vec<String>,
        access_token: String,
        min_token_lifetime: Duration,
        min_refresh_interval: Duration,
    ) -> Self {
        ConnectionStateMachine {
            state: ConnectionState::Idle,
            wait_ids: WaitIdAllocator::new(),
            active_wait_id: None,
            endpoints,
            next_endpoint: 0,
            access_token,
            auth_in_flight: false,
            metrics: ConnectionMetrics::default(),
            reconnect_at: None,
            refresh_at: None,
            min_token_lifetime,
            min_refresh_interval,
            events: VecDeque::new(),
            actions: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_online(&self) -> bool {
        self.state == ConnectionState::Online
    }

    pub fn is_finalising(&self) -> bool {
        self.state == ConnectionState::Finalising
    }

    pub fn metrics(&self) -> ConnectionMetrics {
        self.metrics
    }

    pub fn active_wait_id(&self) -> Option<WaitId> {
        self.active_wait_id
    }

    /// Deadline of the pending reconnect delay, if one is scheduled
    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at.map(|(_, at)| at)
    }

    /// Deadline of the proactive token refresh, if one is scheduled
    pub fn refresh_at(&self) -> Option<Instant> {
        self.refresh_at
    }

    pub fn take_events(&mut self) -> Vec<LifecycleEvent> {
        self.events.drain(..).collect()
    }

    pub fn take_actions(&mut self) -> Vec<ConnectionAction> {
        self.actions.drain(..).collect()
    }

    /// Begin the lifecycle. Resets all failure counters.
    pub fn start(&mut self, now: Instant) -> Result<(), EngineError> {
        if self.state != ConnectionState::Idle {
            return Err(EngineError::Fatal(format!(
                "start called in state {}",
                self.state
            )));
        }
        if self.endpoints.is_empty() {
            return Err(EngineError::Fatal("no endpoints configured".to_string()));
        }
        let _ = now;
        self.metrics.reset();
        self.begin_open();
        Ok(())
    }

    /// Stop the lifecycle. No reconnect is ever scheduled from
    /// `Finalising`.
    ///
    /// `close_socket` is false when the physical socket is already
    /// closed (a kick-off close, or disconnect while idle).
    pub fn finalise(&mut self, close_socket: bool) {
        if self.state == ConnectionState::Finalising {
            return;
        }
        self.reconnect_at = None;
        self.refresh_at = None;
        self.auth_in_flight = false;

        let wait_id = self.wait_ids.next();
        self.active_wait_id = Some(wait_id);
        if close_socket {
            self.actions.push_back(ConnectionAction::CloseSocket {
                wait_id,
                code: ENGINE_CLOSE_CODE,
                reason: "finalised".to_string(),
            });
        }
        if self.state == ConnectionState::Online {
            self.events.push_back(LifecycleEvent::WentOffline {
                close: SocketClose::new(ENGINE_CLOSE_CODE, "finalised", true),
            });
        }
        self.set_state(ConnectionState::Finalising, wait_id);
    }

    /// Socket open completed for `wait_id`
    pub fn handle_socket_opened(&mut self, wait_id: WaitId) -> Result<(), EngineError> {
        if self.is_stale(wait_id, "socket opened") {
            return Ok(());
        }
        if self.state != ConnectionState::SocketOpening {
            return Err(EngineError::Fatal(format!(
                "socket opened with current wait id in state {}",
                self.state
            )));
        }
        self.metrics.record_socket_open_success();
        self.begin_auth(ConnectionState::AuthFetch);
        Ok(())
    }

    /// Socket open failed for `wait_id`
    pub fn handle_socket_open_failed(&mut self, wait_id: WaitId, error: &str, now: Instant) {
        if self.is_stale(wait_id, "socket open failure") {
            return;
        }
        self.metrics.record_socket_open_failure();
        self.log(
            LogLevel::Warning,
            format!("socket open failed: {}", error),
        );
        self.schedule_reconnect(now);
    }

    /// Socket error reported while the open was still in progress
    pub fn handle_open_error(&mut self, error: &str, now: Instant) {
        if self.state != ConnectionState::SocketOpening {
            self.log(
                LogLevel::Warning,
                format!("socket error outside open: {}", error),
            );
            return;
        }
        let Some(wait_id) = self.active_wait_id else {
            return;
        };
        self.handle_socket_open_failed(wait_id, error, now);
    }

    /// Socket error reported while a close was in progress; logged
    /// only, the close outcome is whatever arrives next
    pub fn handle_close_error(&mut self, error: &str) {
        self.log(
            LogLevel::Warning,
            format!("socket error while closing: {}", error),
        );
    }

    /// Engine-requested close completed for `wait_id`
    pub fn handle_close_completed(&mut self, wait_id: WaitId) {
        if self.is_stale(wait_id, "socket close") {
            return;
        }
        // Finalising keeps its state; nothing further is scheduled.
    }

    /// The peer closed the socket (not caused by finalise). The
    /// facade has already classified the close; this path always
    /// reconnects.
    ///
    /// `AuthUpdate` counts as online here: the session was live when
    /// the close arrived, so the offline transition must be reported.
    pub fn handle_remote_close(&mut self, close: SocketClose, now: Instant) {
        if self.state == ConnectionState::Finalising {
            return;
        }
        self.auth_in_flight = false;
        self.refresh_at = None;

        if matches!(
            self.state,
            ConnectionState::Online | ConnectionState::AuthUpdate
        ) {
            self.events
                .push_back(LifecycleEvent::WentOffline { close });
            let wait_id = self.wait_ids.next();
            self.active_wait_id = Some(wait_id);
            self.set_state(ConnectionState::SocketClosing, wait_id);
        } else {
            self.log(
                LogLevel::Warning,
                format!(
                    "socket closed in state {} (code {}, reason {:?})",
                    self.state, close.code, close.reason
                ),
            );
        }
        self.schedule_reconnect(now);
    }

    /// Identify accepted for the auth exchange tagged `wait_id`
    pub fn handle_identify_accepted(
        &mut self,
        wait_id: WaitId,
        response: &IdentifyResponse,
        now: Instant,
    ) -> Result<(), EngineError> {
        if self.is_stale(wait_id, "identify response") {
            return Ok(());
        }
        if self.state != ConnectionState::AuthFetch && self.state != ConnectionState::AuthUpdate {
            return Err(EngineError::Fatal(format!(
                "identify response with current wait id in state {}",
                self.state
            )));
        }
        self.auth_in_flight = false;

        let remaining = self.adopt_token_lifetime(response);
        self.metrics.record_auth_fetch_success();
        if let Some(token) = &response.access_token {
            self.access_token = token.clone();
        }

        // At least the minimum refresh interval, strictly less than
        // the remaining lifetime.
        let refresh = remaining
            .saturating_sub(self.min_refresh_interval)
            .max(self.min_refresh_interval);
        self.refresh_at = Some(now + refresh);

        let came_online = self.state == ConnectionState::AuthFetch;
        let online_wait_id = self.wait_ids.next();
        self.active_wait_id = Some(online_wait_id);
        if came_online {
            self.events.push_back(LifecycleEvent::CameOnline);
        }
        self.set_state(ConnectionState::Online, online_wait_id);
        Ok(())
    }

    /// Identify rejected for the auth exchange tagged `wait_id`
    pub fn handle_identify_rejected(&mut self, wait_id: WaitId, now: Instant) {
        if self.is_stale(wait_id, "identify rejection") {
            return;
        }
        self.log(LogLevel::Warning, "identify rejected".to_string());
        self.fail_auth_exchange(now);
    }

    /// The auth exchange tagged `wait_id` failed at the protocol
    /// level (error envelope, malformed or missing payload)
    pub fn handle_auth_failure(&mut self, wait_id: WaitId, reason: &str, now: Instant) {
        if self.is_stale(wait_id, "auth failure") {
            return;
        }
        self.log(
            LogLevel::Error,
            format!("auth exchange failed: {}", reason),
        );
        self.fail_auth_exchange(now);
    }

    /// Replace the access token.
    ///
    /// If an identify is in flight, exactly one additional identify
    /// is sent under the same wait id; the response to the earlier
    /// request becomes stale by transaction id. When online with no
    /// exchange in flight, a proactive refresh starts immediately.
    pub fn update_access_token(
        &mut self,
        access_token: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.access_token = access_token.into();

        match self.state {
            ConnectionState::AuthFetch | ConnectionState::AuthUpdate if self.auth_in_flight => {
                let wait_id = self.active_wait_id.ok_or_else(|| {
                    EngineError::Fatal("auth in flight without an active wait id".to_string())
                })?;
                self.actions.push_back(ConnectionAction::SendIdentify {
                    wait_id,
                    access_token: self.access_token.clone(),
                });
            }
            ConnectionState::Online => {
                self.refresh_at = None;
                self.begin_auth(ConnectionState::AuthUpdate);
            }
            _ => {
                // Stored; the next auth exchange picks it up.
            }
        }
        Ok(())
    }

    /// Evaluate deadlines: the one-shot reconnect delay and the
    /// proactive token refresh
    pub fn poll(&mut self, now: Instant) {
        if let Some((wait_id, at)) = self.reconnect_at
            && self.state == ConnectionState::ReconnectDelay
            && self.active_wait_id == Some(wait_id)
            && now >= at
        {
            self.reconnect_at = None;
            self.begin_open();
        }

        if let Some(at) = self.refresh_at
            && self.state == ConnectionState::Online
            && now >= at
        {
            self.refresh_at = None;
            self.begin_auth(ConnectionState::AuthUpdate);
        }
    }

    fn begin_open(&mut self) {
        let wait_id = self.wait_ids.next();
        self.active_wait_id = Some(wait_id);

        let url = self.endpoints[self.next_endpoint % self.endpoints.len()].clone();
        self.next_endpoint += 1;

        self.events
            .push_back(LifecycleEvent::EndpointSelected { url: url.clone() });
        self.set_state(ConnectionState::SocketOpening, wait_id);
        self.actions
            .push_back(ConnectionAction::OpenSocket { wait_id, url });
    }

    fn begin_auth(&mut self, state: ConnectionState) {
        let wait_id = self.wait_ids.next();
        self.active_wait_id = Some(wait_id);
        self.auth_in_flight = true;
        self.set_state(state, wait_id);
        self.actions.push_back(ConnectionAction::SendIdentify {
            wait_id,
            access_token: self.access_token.clone(),
        });
    }

    fn fail_auth_exchange(&mut self, now: Instant) {
        self.auth_in_flight = false;
        self.metrics.record_auth_fetch_failure();

        // The socket is still open; close it before waiting. The
        // close completion arrives under a superseded wait id and is
        // discarded.
        let close_wait_id = self.wait_ids.next();
        self.actions.push_back(ConnectionAction::CloseSocket {
            wait_id: close_wait_id,
            code: ENGINE_CLOSE_CODE,
            reason: "auth failed".to_string(),
        });

        if self.state == ConnectionState::AuthUpdate {
            self.events.push_back(LifecycleEvent::WentOffline {
                close: SocketClose::new(ENGINE_CLOSE_CODE, "auth failed", true),
            });
        }
        self.schedule_reconnect(now);
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        let delay = reconnect_delay(&self.metrics);
        let wait_id = self.wait_ids.next();
        self.active_wait_id = Some(wait_id);
        self.reconnect_at = Some((wait_id, now + delay));
        self.set_state(ConnectionState::ReconnectDelay, wait_id);
    }

    /// Extract and adopt the token lifetime from an accepted
    /// identify response, counting token-fetch failures for
    /// degraded values
    fn adopt_token_lifetime(&mut self, response: &IdentifyResponse) -> Duration {
        let lifetime = match &response.expires_in {
            Some(text) => parse_expires_in(text),
            None => {
                tracing::warn!("identify response without ExpiresIn");
                crate::infrastructure::auth::TokenLifetime {
                    remaining: Duration::ZERO,
                    degraded: true,
                }
            }
        };

        if lifetime.degraded {
            self.metrics.record_token_fetch_failure();
            self.log(
                LogLevel::Warning,
                "token lifetime unavailable, using minimum interval".to_string(),
            );
        } else {
            self.metrics.record_token_fetch_success();
        }

        lifetime.remaining.max(self.min_token_lifetime)
    }

    fn set_state(&mut self, state: ConnectionState, wait_id: WaitId) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.events
            .push_back(LifecycleEvent::StateChanged { state, wait_id });
    }

    fn is_stale(&self, wait_id: WaitId, what: &str) -> bool {
        if self.active_wait_id == Some(wait_id) {
            false
        } else {
            tracing::debug!(
                "discarding stale {} (wait id {}, active {:?})",
                what,
                wait_id,
                self.active_wait_id
            );
            true
        }
    }

    fn log(&mut self, level: LogLevel, text: String) {
        match level {
            LogLevel::Info => tracing::info!("{}", text),
            LogLevel::Warning => tracing::warn!("{}", text),
            LogLevel::Error => tracing::error!("{}", text),
        }
        self.events.push_back(LifecycleEvent::Log { level, text });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::auth::IdentifyResult;

    const MIN_LIFETIME: Duration = Duration::from_secs(180);
    const MIN_REFRESH: Duration = Duration::from_secs(60);

    fn machine() -> ConnectionStateMachine {
        ConnectionStateMachine::new(
            vec![
                "wss://feed-a.example.com".to_string(),
                "wss://feed-b.example.com".to_string(),
            ],
            "token-0".to_string(),
            MIN_LIFETIME,
            MIN_REFRESH,
        )
    }

    fn accepted(expires_in: &str) -> IdentifyResponse {
        IdentifyResponse {
            result: IdentifyResult::Accepted,
            user_id: Some("u1".to_string()),
            display_name: None,
            expires_in: Some(expires_in.to_string()),
            expiry_date: None,
            scope: None,
            access_token: None,
        }
    }

    fn open_wait_id(machine: &mut ConnectionStateMachine) -> WaitId {
        machine
            .take_actions()
            .into_iter()
            .find_map(|action| match action {
                ConnectionAction::OpenSocket { wait_id, .. } => Some(wait_id),
                _ => None,
            })
            .expect("no open action")
    }

    fn identify_wait_id(machine: &mut ConnectionStateMachine) -> WaitId {
        machine
            .take_actions()
            .into_iter()
            .find_map(|action| match action {
                ConnectionAction::SendIdentify { wait_id, .. } => Some(wait_id),
                _ => None,
            })
            .expect("no identify action")
    }

    #[test]
    fn test_start_opens_first_endpoint() {
        let mut m = machine();
        m.start(Instant::now()).unwrap();
        assert_eq!(m.state(), ConnectionState::SocketOpening);

        let actions = m.take_actions();
        assert!(matches!(
            &actions[..],
            [ConnectionAction::OpenSocket { url, .. }] if url == "wss://feed-a.example.com"
        ));
        let events = m.take_events();
        assert!(events.iter().any(|e| matches!(
            e,
            LifecycleEvent::EndpointSelected { url } if url == "wss://feed-a.example.com"
        )));
    }

    #[test]
    fn test_start_twice_is_fatal() {
        let mut m = machine();
        m.start(Instant::now()).unwrap();
        assert!(matches!(
            m.start(Instant::now()),
            Err(EngineError::Fatal(_))
        ));
    }

    #[test]
    fn test_open_failure_schedules_minimal_delay() {
        let now = Instant::now();
        let mut m = machine();
        m.start(now).unwrap();
        let wait_id = open_wait_id(&mut m);

        m.handle_socket_open_failed(wait_id, "refused", now);
        assert_eq!(m.state(), ConnectionState::ReconnectDelay);
        assert_eq!(m.metrics().socket_open_failures, 1);
        // First socket-open failure backs off 50ms
        assert_eq!(m.reconnect_at(), Some(now + Duration::from_millis(50)));
    }

    #[test]
    fn test_reconnect_rotates_endpoint() {
        let now = Instant::now();
        let mut m = machine();
        m.start(now).unwrap();
        let wait_id = open_wait_id(&mut m);
        m.handle_socket_open_failed(wait_id, "refused", now);

        m.poll(now + Duration::from_millis(50));
        assert_eq!(m.state(), ConnectionState::SocketOpening);
        let actions = m.take_actions();
        assert!(matches!(
            &actions[..],
            [ConnectionAction::OpenSocket { url, .. }] if url == "wss://feed-b.example.com"
        ));
    }

    #[test]
    fn test_stale_open_completion_is_discarded() {
        let now = Instant::now();
        let mut m = machine();
        m.start(now).unwrap();
        let first_open = open_wait_id(&mut m);
        m.handle_socket_open_failed(first_open, "refused", now);
        m.take_events();

        // The first attempt's success arrives after it was
        // superseded by the delay
        m.handle_socket_opened(first_open).unwrap();
        assert_eq!(m.state(), ConnectionState::ReconnectDelay);
        assert!(m.take_events().is_empty());
        assert!(m.take_actions().is_empty());
    }

    #[test]
    fn test_delay_not_taken_before_deadline() {
        let now = Instant::now();
        let mut m = machine();
        m.start(now).unwrap();
        let wait_id = open_wait_id(&mut m);
        m.handle_socket_open_failed(wait_id, "refused", now);

        m.poll(now + Duration::from_millis(10));
        assert_eq!(m.state(), ConnectionState::ReconnectDelay);
    }

    #[test]
    fn test_open_success_begins_auth_fetch() {
        let now = Instant::now();
        let mut m = machine();
        m.start(now).unwrap();
        let wait_id = open_wait_id(&mut m);

        m.handle_socket_opened(wait_id).unwrap();
        assert_eq!(m.state(), ConnectionState::AuthFetch);
        let actions = m.take_actions();
        assert!(matches!(
            &actions[..],
            [ConnectionAction::SendIdentify { access_token, .. }] if access_token == "token-0"
        ));
    }

    #[test]
    fn test_accepted_identify_comes_online_in_order() {
        let now = Instant::now();
        let mut m = machine();
        m.start(now).unwrap();
        let wait_id = open_wait_id(&mut m);
        m.handle_socket_opened(wait_id).unwrap();
        let auth_wait = identify_wait_id(&mut m);
        m.take_events();

        m.handle_identify_accepted(auth_wait, &accepted("00:10:00.000"), now)
            .unwrap();
        assert_eq!(m.state(), ConnectionState::Online);
        assert_eq!(m.metrics().auth_fetch_failures, 0);

        let events = m.take_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], LifecycleEvent::CameOnline));
        assert!(matches!(
            events[1],
            LifecycleEvent::StateChanged {
                state: ConnectionState::Online,
                ..
            }
        ));

        // Refresh 1 minute before the 10-minute expiry
        assert_eq!(m.refresh_at(), Some(now + Duration::from_secs(540)));
    }

    #[test]
    fn test_expired_token_clamps_to_minimum_interval() {
        let now = Instant::now();
        let mut m = machine();
        m.start(now).unwrap();
        let wait_id = open_wait_id(&mut m);
        m.handle_socket_opened(wait_id).unwrap();
        let auth_wait = identify_wait_id(&mut m);

        m.handle_identify_accepted(auth_wait, &accepted("-00:05:00.000"), now)
            .unwrap();
        assert_eq!(m.state(), ConnectionState::Online);
        // Zero remaining clamps to the 3-minute floor; refresh one
        // minute before that
        assert_eq!(m.refresh_at(), Some(now + Duration::from_secs(120)));
        assert_eq!(m.metrics().token_fetch_failures, 0);
    }

    #[test]
    fn test_garbage_expiry_counts_token_fetch_failure() {
        let now = Instant::now();
        let mut m = machine();
        m.start(now).unwrap();
        let wait_id = open_wait_id(&mut m);
        m.handle_socket_opened(wait_id).unwrap();
        let auth_wait = identify_wait_id(&mut m);

        m.handle_identify_accepted(auth_wait, &accepted("garbage"), now)
            .unwrap();
        // The exchange still succeeds
        assert_eq!(m.state(), ConnectionState::Online);
        assert_eq!(m.metrics().token_fetch_failures, 1);
        assert_eq!(m.metrics().auth_fetch_failures, 0);
    }

    #[test]
    fn test_rejected_identify_backs_off() {
        let now = Instant::now();
        let mut m = machine();
        m.start(now).unwrap();
        let wait_id = open_wait_id(&mut m);
        m.handle_socket_opened(wait_id).unwrap();
        let auth_wait = identify_wait_id(&mut m);

        m.handle_identify_rejected(auth_wait, now);
        assert_eq!(m.state(), ConnectionState::ReconnectDelay);
        assert_eq!(m.metrics().auth_fetch_failures, 1);
        // First auth-fetch failure backs off 500ms
        assert_eq!(m.reconnect_at(), Some(now + Duration::from_millis(500)));
        // The still-open socket is closed on the way out
        let actions = m.take_actions();
        assert!(actions
            .iter()
            .any(|a| matches!(a, ConnectionAction::CloseSocket { .. })));
    }

    #[test]
    fn test_token_replacement_mid_fetch_reissues_same_wait_id() {
        let now = Instant::now();
        let mut m = machine();
        m.start(now).unwrap();
        let wait_id = open_wait_id(&mut m);
        m.handle_socket_opened(wait_id).unwrap();
        let auth_wait = identify_wait_id(&mut m);

        m.update_access_token("token-1").unwrap();
        let actions = m.take_actions();
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            ConnectionAction::SendIdentify { wait_id, access_token }
                if *wait_id == auth_wait && access_token == "token-1"
        ));
        // Still one exchange: the same wait id, no state change
        assert_eq!(m.state(), ConnectionState::AuthFetch);
    }

    #[test]
    fn test_token_replacement_while_online_triggers_update() {
        let now = Instant::now();
        let mut m = machine();
        m.start(now).unwrap();
        let wait_id = open_wait_id(&mut m);
        m.handle_socket_opened(wait_id).unwrap();
        let auth_wait = identify_wait_id(&mut m);
        m.handle_identify_accepted(auth_wait, &accepted("00:10:00.000"), now)
            .unwrap();

        m.update_access_token("token-1").unwrap();
        assert_eq!(m.state(), ConnectionState::AuthUpdate);
        let actions = m.take_actions();
        assert!(matches!(
            &actions[..],
            [ConnectionAction::SendIdentify { access_token, .. }] if access_token == "token-1"
        ));
    }

    #[test]
    fn test_refresh_deadline_enters_auth_update() {
        let now = Instant::now();
        let mut m = machine();
        m.start(now).unwrap();
        let wait_id = open_wait_id(&mut m);
        m.handle_socket_opened(wait_id).unwrap();
        let auth_wait = identify_wait_id(&mut m);
        m.handle_identify_accepted(auth_wait, &accepted("00:10:00.000"), now)
            .unwrap();
        m.take_events();

        m.poll(now + Duration::from_secs(540));
        assert_eq!(m.state(), ConnectionState::AuthUpdate);
        // Going back online after the update does not re-announce
        // came-online
        let update_wait = identify_wait_id(&mut m);
        m.handle_identify_accepted(update_wait, &accepted("00:10:00.000"), now)
            .unwrap();
        let events = m.take_events();
        assert!(!events.iter().any(|e| matches!(e, LifecycleEvent::CameOnline)));
    }

    #[test]
    fn test_remote_close_while_online_goes_offline_and_reconnects() {
        let now = Instant::now();
        let mut m = machine();
        m.start(now).unwrap();
        let wait_id = open_wait_id(&mut m);
        m.handle_socket_opened(wait_id).unwrap();
        let auth_wait = identify_wait_id(&mut m);
        m.handle_identify_accepted(auth_wait, &accepted("00:10:00.000"), now)
            .unwrap();
        m.take_events();

        m.handle_remote_close(SocketClose::new(1006, "gone", false), now);
        assert_eq!(m.state(), ConnectionState::ReconnectDelay);
        let events = m.take_events();
        assert!(matches!(
            events[0],
            LifecycleEvent::WentOffline { ref close } if close.code == 1006
        ));
    }

    #[test]
    fn test_remote_close_during_auth_update_goes_offline() {
        let now = Instant::now();
        let mut m = machine();
        m.start(now).unwrap();
        let wait_id = open_wait_id(&mut m);
        m.handle_socket_opened(wait_id).unwrap();
        let auth_wait = identify_wait_id(&mut m);
        m.handle_identify_accepted(auth_wait, &accepted("00:10:00.000"), now)
            .unwrap();

        m.update_access_token("token-1").unwrap();
        assert_eq!(m.state(), ConnectionState::AuthUpdate);
        m.take_events();
        m.take_actions();

        m.handle_remote_close(SocketClose::new(1006, "gone", false), now);
        assert_eq!(m.state(), ConnectionState::ReconnectDelay);
        let events = m.take_events();
        assert!(matches!(
            events[0],
            LifecycleEvent::WentOffline { ref close } if close.code == 1006
        ));
    }

    #[test]
    fn test_finalise_cancels_deadlines() {
        let now = Instant::now();
        let mut m = machine();
        m.start(now).unwrap();
        let wait_id = open_wait_id(&mut m);
        m.handle_socket_open_failed(wait_id, "refused", now);

        m.finalise(false);
        assert_eq!(m.state(), ConnectionState::Finalising);
        assert_eq!(m.reconnect_at(), None);

        // The elapsed delay no longer fires
        m.take_events();
        m.take_actions();
        m.poll(now + Duration::from_secs(60));
        assert_eq!(m.state(), ConnectionState::Finalising);
        assert!(m.take_actions().is_empty());
    }
}

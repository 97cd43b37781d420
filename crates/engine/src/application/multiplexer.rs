//! Subscription Multiplexer
//!
//! Owns the mapping from data item id to subscription state, assigns
//! transaction ids, serializes subscribe/unsubscribe requests to wire
//! envelopes and demultiplexes inbound envelopes back to the right
//! subscription. Auth-channel envelopes are diverted to the caller
//! for the state machine.
//!
//! Failures here are diagnostic: they update per-category counters
//! and produce queue messages but never touch the connection state
//! machine.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use feedlink_transport::{WireAction, WireEnvelope};

use crate::domain::messages::{FeedMessage, LogLevel};
use crate::domain::metrics::SubscriptionErrorCounters;
use crate::domain::subscription::{DataDefinition, DataItemId, SubscriptionHandle, SubscriptionStatus};
use crate::infrastructure::auth::{AUTH_CONTROLLER, AUTH_TOPIC};

use super::error::EngineError;

/// Outcome of routing one inbound envelope
#[derive(Debug)]
pub enum Routed {
    /// Envelope belongs to the auth channel
    Auth(WireEnvelope),
    /// Envelope was consumed; resulting queue messages
    Handled(Vec<FeedMessage>),
}

#[derive(Debug)]
struct PendingRequest {
    transaction_id: u64,
    sent_at: Instant,
}

#[derive(Debug)]
struct Subscription {
    request_nr: u64,
    definition: DataDefinition,
    status: SubscriptionStatus,
    activated: bool,
    pending: Option<PendingRequest>,
}

pub struct SubscriptionMultiplexer {
    subscriptions: HashMap<DataItemId, Subscription>,
    by_transaction: HashMap<u64, DataItemId>,
    /// Transaction ids whose item was unsubscribed: the unsubscribe
    /// request itself plus any stream ids it was receiving under.
    /// Late traffic on these is dropped silently, not counted.
    detached: HashSet<u64>,
    counters: SubscriptionErrorCounters,
    online: bool,
    response_timeout: Duration,
    next_transaction: u64,
}

impl SubscriptionMultiplexer {
    pub fn new(response_timeout: Duration) -> Self {
        SubscriptionMultiplexer {
            subscriptions: HashMap::new(),
            by_transaction: HashMap::new(),
            detached: HashSet::new(),
            counters: SubscriptionErrorCounters::default(),
            online: false,
            response_timeout,
            next_transaction: 1,
        }
    }

    pub fn counters(&self) -> SubscriptionErrorCounters {
        self.counters
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn active_count(&self) -> usize {
        self.subscriptions
            .values()
            .filter(|s| s.status == SubscriptionStatus::Active)
            .count()
    }

    pub fn status(&self, data_item_id: &DataItemId) -> Option<SubscriptionStatus> {
        self.subscriptions.get(data_item_id).map(|s| s.status)
    }

    /// Transaction ids are shared with the auth exchange so every
    /// outbound message on the session is uniquely correlated
    pub fn next_transaction_id(&mut self) -> u64 {
        let id = self.next_transaction;
        self.next_transaction += 1;
        id
    }

    /// Register a pending subscription. No wire traffic until the
    /// connection is online and the item is activated.
    pub fn subscribe(
        &mut self,
        data_item_id: DataItemId,
        definition: DataDefinition,
    ) -> Result<SubscriptionHandle, EngineError> {
        if self.subscriptions.contains_key(&data_item_id) {
            return Err(EngineError::DuplicateDataItem(data_item_id));
        }
        self.subscriptions.insert(
            data_item_id.clone(),
            Subscription {
                request_nr: 0,
                definition,
                status: SubscriptionStatus::Pending,
                activated: false,
                pending: None,
            },
        );
        Ok(SubscriptionHandle { data_item_id })
    }

    /// Confirm the caller is ready to consume data for the item.
    ///
    /// Registration and activation are separate so data cannot
    /// arrive before the consumer is wired up.
    pub fn activate(
        &mut self,
        data_item_id: &DataItemId,
        request_nr: u64,
        now: Instant,
    ) -> Result<Vec<WireEnvelope>, EngineError> {
        let online = self.online;
        let transaction_id = self.peek_transaction();
        let subscription = self
            .subscriptions
            .get_mut(data_item_id)
            .ok_or_else(|| EngineError::UnknownDataItem(data_item_id.clone()))?;

        subscription.activated = true;
        subscription.request_nr = request_nr;

        if online
            && subscription.status != SubscriptionStatus::Active
            && subscription.pending.is_none()
        {
            let envelope = Self::subscribe_envelope(&subscription.definition, transaction_id);
            subscription.pending = Some(PendingRequest {
                transaction_id,
                sent_at: now,
            });
            self.commit_transaction(transaction_id, data_item_id.clone());
            return Ok(vec![envelope]);
        }
        Ok(Vec::new())
    }

    /// Remove the subscription; emits a best-effort unsubscribe
    /// request when the item is live on the wire.
    ///
    /// Stream publishes may already be in flight under the item's
    /// transaction ids; those ids are parked so a late arrival is
    /// dropped instead of counted as an error.
    pub fn unsubscribe(&mut self, data_item_id: &DataItemId) -> Vec<WireEnvelope> {
        let Some(subscription) = self.subscriptions.remove(data_item_id) else {
            return Vec::new();
        };

        let detached = &mut self.detached;
        self.by_transaction.retain(|transaction_id, id| {
            if id == data_item_id {
                detached.insert(*transaction_id);
                false
            } else {
                true
            }
        });

        if self.online
            && matches!(
                subscription.status,
                SubscriptionStatus::Active | SubscriptionStatus::Pending
            )
        {
            let transaction_id = self.next_transaction_id();
            // The server's response to the unsubscribe is an ack we
            // have no subscription for; park its id too.
            self.detached.insert(transaction_id);
            return vec![WireEnvelope::new(
                subscription.definition.controller.clone(),
                subscription.definition.topic.clone(),
                WireAction::Unsubscribe,
                transaction_id,
                None,
            )];
        }
        Vec::new()
    }

    /// Connection-level come-online: issue subscribe requests for
    /// every activated item.
    ///
    /// Being told to come online twice is an engine bug, not a
    /// server condition.
    pub fn come_online(&mut self, now: Instant) -> Result<Vec<WireEnvelope>, EngineError> {
        if self.online {
            return Err(EngineError::Fatal(
                "multiplexer told to come online twice".to_string(),
            ));
        }
        self.online = true;

        let mut envelopes = Vec::new();
        let ids: Vec<DataItemId> = self
            .subscriptions
            .iter()
            .filter(|(_, s)| s.activated && s.status != SubscriptionStatus::Active)
            .map(|(id, _)| id.clone())
            .collect();

        for id in ids {
            let transaction_id = self.next_transaction_id();
            let subscription = self.subscriptions.get_mut(&id).expect("id collected above");
            envelopes.push(Self::subscribe_envelope(
                &subscription.definition,
                transaction_id,
            ));
            subscription.pending = Some(PendingRequest {
                transaction_id,
                sent_at: now,
            });
            subscription.status = SubscriptionStatus::Pending;
            self.by_transaction.insert(transaction_id, id);
        }
        Ok(envelopes)
    }

    /// Connection-level go-offline: subscriptions are marked
    /// unusable, not destroyed, and recover on the next come-online
    pub fn go_offline(&mut self, reason: &str) {
        if !self.online {
            return;
        }
        self.online = false;
        tracing::debug!("subscriptions offline: {}", reason);

        for subscription in self.subscriptions.values_mut() {
            if subscription.pending.take().is_some() {
                self.counters.offlined += 1;
            }
            if subscription.status != SubscriptionStatus::Error {
                subscription.status = SubscriptionStatus::Offline;
            }
        }
        self.by_transaction.clear();
        self.detached.clear();
    }

    /// Periodic housekeeping: expire requests past the response
    /// timeout
    pub fn exercise(&mut self, now: Instant) -> Vec<FeedMessage> {
        let mut messages = Vec::new();
        for (id, subscription) in &mut self.subscriptions {
            let timed_out = subscription
                .pending
                .as_ref()
                .is_some_and(|p| now.duration_since(p.sent_at) >= self.response_timeout);
            if timed_out {
                let pending = subscription.pending.take().expect("checked above");
                self.by_transaction.remove(&pending.transaction_id);
                self.counters.request_timeout += 1;
                subscription.status = SubscriptionStatus::Error;
                messages.push(FeedMessage::SubscriptionError {
                    data_item_id: id.clone(),
                    request_nr: subscription.request_nr,
                    text: format!(
                        "request {} timed out after {:?}",
                        pending.transaction_id, self.response_timeout
                    ),
                });
            }
        }
        messages
    }

    /// Demultiplex one inbound envelope
    pub fn route(&mut self, envelope: WireEnvelope) -> Routed {
        if envelope.is_channel(AUTH_CONTROLLER, AUTH_TOPIC) {
            return Routed::Auth(envelope);
        }

        if envelope.transaction_id == 0 {
            // Unsolicited server message; warnings are tracked
            // separately from subscription errors
            return if envelope.action == WireAction::Error {
                self.counters.server_warning += 1;
                Routed::Handled(vec![FeedMessage::Log {
                    level: LogLevel::Warning,
                    text: format!(
                        "server warning on {}/{}: {}",
                        envelope.controller,
                        envelope.topic,
                        envelope.error_text()
                    ),
                }])
            } else {
                self.counters.data_error += 1;
                Routed::Handled(vec![FeedMessage::Log {
                    level: LogLevel::Warning,
                    text: format!(
                        "unsolicited message on {}/{} without transaction id",
                        envelope.controller, envelope.topic
                    ),
                }])
            };
        }

        if self.detached.remove(&envelope.transaction_id) {
            // Unsubscribe ack, or a publish that raced the
            // unsubscribe; routine, not an error
            tracing::debug!(
                "dropping message for detached transaction {}",
                envelope.transaction_id
            );
            return Routed::Handled(Vec::new());
        }

        let Some(data_item_id) = self.by_transaction.get(&envelope.transaction_id).cloned()
        else {
            self.counters.data_error += 1;
            return Routed::Handled(vec![FeedMessage::Log {
                level: LogLevel::Warning,
                text: format!(
                    "no subscription for transaction {}",
                    envelope.transaction_id
                ),
            }]);
        };

        let Some(subscription) = self.subscriptions.get_mut(&data_item_id) else {
            // Mapping without a subscription is an engine bug
            self.counters.internal += 1;
            self.by_transaction.remove(&envelope.transaction_id);
            return Routed::Handled(vec![FeedMessage::Log {
                level: LogLevel::Error,
                text: format!(
                    "transaction {} maps to missing data item {}",
                    envelope.transaction_id, data_item_id
                ),
            }]);
        };

        let request_nr = subscription.request_nr;
        let awaiting_ack = subscription
            .pending
            .as_ref()
            .is_some_and(|p| p.transaction_id == envelope.transaction_id);

        if awaiting_ack {
            subscription.pending = None;
            if envelope.action == WireAction::Error {
                subscription.status = SubscriptionStatus::Error;
                self.by_transaction.remove(&envelope.transaction_id);
                let text = envelope.error_text();
                if Self::is_not_authorised(&text) {
                    self.counters.user_not_authorised += 1;
                } else {
                    self.counters.sub_request_error += 1;
                }
                return Routed::Handled(vec![FeedMessage::SubscriptionError {
                    data_item_id,
                    request_nr,
                    text: format!("subscribe rejected: {}", text),
                }]);
            }
            subscription.status = SubscriptionStatus::Active;
            // The server keeps publishing under this transaction id;
            // leave the mapping in place.
            let mut messages = Vec::new();
            if let Some(payload) = envelope.data {
                messages.push(FeedMessage::Data {
                    data_item_id,
                    request_nr,
                    payload,
                });
            }
            return Routed::Handled(messages);
        }

        // Stream traffic on an established subscription
        match envelope.action {
            WireAction::Publish => match envelope.data {
                Some(payload) => Routed::Handled(vec![FeedMessage::Data {
                    data_item_id,
                    request_nr,
                    payload,
                }]),
                None => {
                    self.counters.data_error += 1;
                    Routed::Handled(vec![FeedMessage::Log {
                        level: LogLevel::Warning,
                        text: format!("publish without payload for {}", data_item_id),
                    }])
                }
            },
            WireAction::Error => {
                subscription.status = SubscriptionStatus::Error;
                self.by_transaction.remove(&envelope.transaction_id);
                let text = envelope.error_text();
                if Self::is_not_authorised(&text) {
                    self.counters.user_not_authorised += 1;
                } else {
                    self.counters.publish_request_error += 1;
                }
                Routed::Handled(vec![FeedMessage::SubscriptionError {
                    data_item_id,
                    request_nr,
                    text,
                }])
            }
            _ => {
                self.counters.data_error += 1;
                Routed::Handled(vec![FeedMessage::Log {
                    level: LogLevel::Warning,
                    text: format!(
                        "unexpected {:?} action for {}",
                        envelope.action, data_item_id
                    ),
                }])
            }
        }
    }

    /// Drop all subscriptions (disconnect teardown)
    pub fn clear(&mut self) {
        self.subscriptions.clear();
        self.by_transaction.clear();
        self.detached.clear();
        self.online = false;
    }

    fn subscribe_envelope(definition: &DataDefinition, transaction_id: u64) -> WireEnvelope {
        WireEnvelope::new(
            definition.controller.clone(),
            definition.topic.clone(),
            WireAction::Subscribe,
            transaction_id,
            definition.parameters.clone(),
        )
    }

    fn is_not_authorised(text: &str) -> bool {
        let lower = text.to_ascii_lowercase();
        lower.contains("not authorised") || lower.contains("not authorized")
    }

    // activate() needs a transaction id while the subscription is
    // mutably borrowed; peek first, commit after the borrow ends.
    fn peek_transaction(&self) -> u64 {
        self.next_transaction
    }

    fn commit_transaction(&mut self, transaction_id: u64, data_item_id: DataItemId) {
        debug_assert_eq!(transaction_id, self.next_transaction);
        self.next_transaction += 1;
        self.by_transaction.insert(transaction_id, data_item_id);
    }
}

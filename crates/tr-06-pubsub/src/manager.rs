//! The pub/sub manager: joins, publications, deliveries.

use crate::config::PubsubConfig;
use crate::coordinator::{CoordinatorState, PersistedTopicState};
use crate::dedup::DeliveryDedup;
use crate::errors::PubsubError;
use crate::types::{topic_state_key, SubscribeOutcome};
use parking_lot::Mutex;
use rand::Rng;
use shared_types::{Frame, MessageEnvelope, NodeId, PeerDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tr_05_dht::{AppFrame, DhtNode};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Delivery channel capacity toward the application.
const DELIVERY_CHANNEL_CAPACITY: usize = 256;

/// Dedup map bound.
const DEDUP_CAPACITY: usize = 4096;

/// A message delivered to a local subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicMessage {
    pub topic: NodeId,
    pub envelope: MessageEnvelope,
}

#[derive(Debug, Clone)]
struct LocalSubscription {
    /// The coordinator we joined through; `None` when we coordinate
    /// the topic ourselves.
    coordinator: Option<NodeId>,
    version: u64,
}

type JoinResult = Result<SubscribeOutcome, PubsubError>;

struct PubsubInner {
    dht: DhtNode,
    config: PubsubConfig,
    coordinator: Mutex<CoordinatorState>,
    subscriptions: Mutex<HashMap<NodeId, LocalSubscription>>,
    joins_in_flight: Mutex<HashMap<NodeId, Vec<oneshot::Sender<JoinResult>>>>,
    dedup: Mutex<DeliveryDedup>,
    deliveries: mpsc::Sender<TopicMessage>,
    /// Non-pub/sub application frames (signalling) forwarded here.
    signal_tx: Option<mpsc::Sender<AppFrame>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Public pub/sub handle.
#[derive(Clone)]
pub struct PubsubManager {
    inner: Arc<PubsubInner>,
}

impl PubsubManager {
    /// Build the manager and start its frame loop and GC task.
    ///
    /// `app_rx` is the DHT's application channel; `signal_tx`, when
    /// set, receives the frames pub/sub does not own (signalling
    /// relay).
    pub fn new(
        dht: DhtNode,
        mut app_rx: mpsc::Receiver<AppFrame>,
        signal_tx: Option<mpsc::Sender<AppFrame>>,
        config: PubsubConfig,
    ) -> (Self, mpsc::Receiver<TopicMessage>) {
        let (deliveries_tx, deliveries_rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
        let dedup_ttl_ms = config.dedup_ttl.as_millis() as u64;

        let inner = Arc::new(PubsubInner {
            dht,
            config,
            coordinator: Mutex::new(CoordinatorState::default()),
            subscriptions: Mutex::new(HashMap::new()),
            joins_in_flight: Mutex::new(HashMap::new()),
            dedup: Mutex::new(DeliveryDedup::new(dedup_ttl_ms, DEDUP_CAPACITY)),
            deliveries: deliveries_tx,
            signal_tx,
            tasks: Mutex::new(Vec::new()),
        });

        let loop_inner = inner.clone();
        let frame_loop = tokio::spawn(async move {
            while let Some(app_frame) = app_rx.recv().await {
                handle_app_frame(&loop_inner, app_frame).await;
            }
        });
        inner.tasks.lock().push(frame_loop);

        let gc_inner = inner.clone();
        let gc_task = tokio::spawn(async move {
            let period = gc_inner.config.dedup_ttl.max(Duration::from_secs(10)) / 2;
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let now_ms = gc_inner.now_ms();
                gc_inner.coordinator.lock().gc(now_ms);
                gc_inner.dedup.lock().gc(now_ms);
            }
        });
        inner.tasks.lock().push(gc_task);

        (Self { inner }, deliveries_rx)
    }

    /// Hash a topic name into its id.
    pub fn topic_id(name: &str) -> NodeId {
        NodeId::hash_of(name)
    }

    /// Subscribe to a named topic.
    pub async fn subscribe(&self, name: &str) -> Result<SubscribeOutcome, PubsubError> {
        self.subscribe_topic(Self::topic_id(name)).await
    }

    /// Subscribe to a topic id.
    ///
    /// Concurrent calls for the same topic coalesce into one join: the
    /// first caller runs the protocol, later callers await its result
    /// (marked `concurrent`).
    pub async fn subscribe_topic(&self, topic: NodeId) -> Result<SubscribeOutcome, PubsubError> {
        self.inner.health_gate()?;

        let follower_rx = {
            let mut joins = self.inner.joins_in_flight.lock();
            match joins.get_mut(&topic) {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                None => {
                    joins.insert(topic, Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = follower_rx {
            trace!(topic = %topic, "Join already in flight; awaiting its result");
            return rx
                .await
                .unwrap_or_else(|_| Err(PubsubError::Internal("join leader vanished".into())));
        }

        let result = self.inner.join_with_retry(topic).await;

        let waiters = self
            .inner
            .joins_in_flight
            .lock()
            .remove(&topic)
            .unwrap_or_default();
        for waiter in waiters {
            let mut shared = result.clone();
            if let Ok(outcome) = &mut shared {
                outcome.concurrent = true;
            }
            let _ = waiter.send(shared);
        }

        result
    }

    /// Publish a payload to a named topic. Returns the message id.
    pub async fn publish(
        &self,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<String, PubsubError> {
        self.publish_topic(Self::topic_id(name), payload).await
    }

    /// Publish to a topic id.
    pub async fn publish_topic(
        &self,
        topic: NodeId,
        payload: serde_json::Value,
    ) -> Result<String, PubsubError> {
        self.inner.health_gate()?;

        let now_ms = self.inner.now_ms();
        let envelope = MessageEnvelope {
            message_id: format!("{}:{}", Uuid::new_v4(), self.inner.dht.local_id().to_hex()),
            topic_id: topic,
            publisher_id: self.inner.dht.local_id(),
            published_at: now_ms,
            payload,
            expires_at: now_ms + self.inner.config.message_ttl.as_millis() as u64,
        };
        let message_id = envelope.message_id.clone();

        let mut attempt = 0;
        loop {
            match self.inner.publish_once(&envelope).await {
                Ok(()) => return Ok(message_id),
                Err(e) if e.is_retryable() && attempt < self.inner.config.max_retries => {
                    attempt += 1;
                    debug!(topic = %topic, attempt, error = %e, "Publish retry");
                    tokio::time::sleep(self.inner.backoff_delay(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop a named topic subscription.
    pub async fn unsubscribe(&self, name: &str) -> Result<(), PubsubError> {
        self.unsubscribe_topic(Self::topic_id(name)).await
    }

    /// Drop a topic subscription.
    pub async fn unsubscribe_topic(&self, topic: NodeId) -> Result<(), PubsubError> {
        let subscription = self.inner.subscriptions.lock().remove(&topic);
        let Some(subscription) = subscription else {
            return Ok(());
        };

        match subscription.coordinator {
            None => {
                let local = self.inner.dht.local_id();
                self.inner.coordinator.lock().unsubscribe(&topic, &local);
                self.inner.persist_topic_state(topic);
            }
            Some(coordinator) => {
                let frame = Frame::PubsubUnsubscribe {
                    request_id: Uuid::new_v4().to_string(),
                    topic_id: topic,
                    subscriber: self.inner.dht.local_id(),
                };
                // Fire and forget; a lost unsubscribe ages out with us.
                self.inner.dht.reply(coordinator, frame);
            }
        }
        Ok(())
    }

    /// Topics this node currently coordinates.
    pub fn coordinated_topics(&self) -> Vec<NodeId> {
        self.inner.coordinator.lock().topic_ids()
    }

    /// Current local subscriptions as `(topic, joined version)`.
    pub fn subscriptions(&self) -> Vec<(NodeId, u64)> {
        self.inner
            .subscriptions
            .lock()
            .iter()
            .map(|(topic, s)| (*topic, s.version))
            .collect()
    }

    /// Persist coordinated state and stop tasks.
    pub async fn shutdown(&self) {
        let topics = self.coordinated_topics();
        for topic in topics {
            let persisted = self.inner.coordinator.lock().persistable(&topic);
            if let Some(persisted) = persisted {
                if let Ok(value) = serde_json::to_value(&persisted) {
                    let _ = self
                        .inner
                        .dht
                        .store(topic_state_key(&topic), value, Duration::from_secs(3600))
                        .await;
                }
            }
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl PubsubInner {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Joins require a running DHT and at least one connected peer.
    fn health_gate(&self) -> Result<(), PubsubError> {
        let state = self.dht.state();
        if !state.is_running() {
            return Err(PubsubError::DhtNotReady {
                state: state.to_string(),
            });
        }
        if self.dht.connected_alive() == 0 {
            return Err(PubsubError::NetworkIsolation);
        }
        Ok(())
    }

    /// Jittered exponential backoff for attempt `n` (1-based).
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base.as_millis() as f64;
        let exp = base * f64::from(1u32 << (attempt - 1).min(8));
        let jitter = {
            let mut rng = rand::thread_rng();
            rng.gen_range(1.0 - self.config.jitter_frac..=1.0 + self.config.jitter_frac)
        };
        Duration::from_millis((exp * jitter) as u64)
    }

    /// The coordinator for a topic, or `None` when we are it.
    async fn locate_coordinator(
        self: &Arc<Self>,
        topic: NodeId,
    ) -> Result<Option<PeerDescriptor>, PubsubError> {
        let closest = self.dht.find_node(topic).await.map_err(PubsubError::from)?;
        let local = self.dht.local_id();
        match closest.first() {
            None => Ok(None),
            Some(best) if local.distance(&topic) <= best.id.distance(&topic) => Ok(None),
            Some(best) => Ok(Some(best.clone())),
        }
    }

    async fn join_with_retry(self: &Arc<Self>, topic: NodeId) -> JoinResult {
        let mut attempt = 0;
        loop {
            match self.join_once(topic).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    debug!(topic = %topic, attempt, error = %e, "Join retry");
                    tokio::time::sleep(self.backoff_delay(attempt)).await;
                }
                Err(PubsubError::Timeout { .. }) => {
                    return Err(PubsubError::Timeout {
                        attempts: attempt + 1,
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One join attempt: locate the coordinator (it may have changed
    /// since the last attempt) and subscribe through it.
    async fn join_once(self: &Arc<Self>, topic: NodeId) -> JoinResult {
        match self.locate_coordinator(topic).await? {
            None => {
                // We are the coordinator; join locally.
                let local = self.dht.local_id();
                self.recover_topic_state(topic).await;
                let now_ms = self.now_ms();
                let (version, subscribers, recent_messages) =
                    self.coordinator.lock().subscribe(topic, local, now_ms);
                self.subscriptions.lock().insert(
                    topic,
                    LocalSubscription {
                        coordinator: None,
                        version,
                    },
                );
                self.persist_topic_state(topic);
                info!(topic = %topic, "Subscribed as topic coordinator");
                Ok(SubscribeOutcome {
                    version,
                    subscribers,
                    recent_messages,
                    concurrent: false,
                })
            }
            Some(descriptor) => {
                self.dht
                    .ensure_connected(&descriptor)
                    .await
                    .map_err(PubsubError::from)?;
                let request_id = Uuid::new_v4().to_string();
                let frame = Frame::PubsubSubscribe {
                    request_id: request_id.clone(),
                    topic_id: topic,
                    subscriber: self.dht.local_id(),
                };
                let reply = self
                    .dht
                    .request(descriptor.id, request_id, frame, self.config.join_timeout)
                    .await
                    .map_err(PubsubError::from)?;
                match reply {
                    Frame::PubsubSubscribed {
                        version,
                        subscribers,
                        recent_messages,
                        ..
                    } => {
                        self.subscriptions.lock().insert(
                            topic,
                            LocalSubscription {
                                coordinator: Some(descriptor.id),
                                version,
                            },
                        );
                        info!(topic = %topic, coordinator = %descriptor.id, "Subscribed");
                        Ok(SubscribeOutcome {
                            version,
                            subscribers,
                            recent_messages,
                            concurrent: false,
                        })
                    }
                    other => Err(PubsubError::Internal(format!(
                        "expected pubsub_subscribed, got {other:?}"
                    ))),
                }
            }
        }
    }

    /// One publish attempt.
    async fn publish_once(self: &Arc<Self>, envelope: &MessageEnvelope) -> Result<(), PubsubError> {
        let topic = envelope.topic_id;
        match self.locate_coordinator(topic).await? {
            None => {
                self.recover_topic_state(topic).await;
                let now_ms = self.now_ms();
                let targets = self.coordinator.lock().publish(envelope.clone(), now_ms);
                if let Some(targets) = targets {
                    self.persist_topic_state(topic);
                    self.push_to_subscribers(topic, envelope.clone(), targets);
                }
                Ok(())
            }
            Some(descriptor) => {
                self.dht
                    .ensure_connected(&descriptor)
                    .await
                    .map_err(PubsubError::from)?;
                let request_id = Uuid::new_v4().to_string();
                let frame = Frame::PubsubPublish {
                    request_id: request_id.clone(),
                    envelope: envelope.clone(),
                };
                let reply = self
                    .dht
                    .request(
                        descriptor.id,
                        request_id,
                        frame,
                        self.config.publish_timeout,
                    )
                    .await
                    .map_err(PubsubError::from)?;
                match reply {
                    Frame::PubsubPublished { .. } => Ok(()),
                    other => Err(PubsubError::Internal(format!(
                        "expected pubsub_published, got {other:?}"
                    ))),
                }
            }
        }
    }

    /// Push an accepted publication to every subscriber except its
    /// publisher. Per-subscriber failure never blocks the publication.
    fn push_to_subscribers(
        self: &Arc<Self>,
        topic: NodeId,
        envelope: MessageEnvelope,
        subscribers: Vec<NodeId>,
    ) {
        let local = self.dht.local_id();
        for subscriber in subscribers {
            if subscriber == envelope.publisher_id {
                continue;
            }
            if subscriber == local {
                self.deliver_local(topic, envelope.clone());
                continue;
            }
            let push = Frame::PubsubPush {
                topic_id: topic,
                envelope: envelope.clone(),
            };
            let payload = match serde_json::to_value(&push) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "Push frame failed to encode");
                    continue;
                }
            };
            if let Err(e) = self.dht.send_routed(subscriber, payload) {
                debug!(subscriber = %subscriber, error = %e, "Push delivery failed");
            }
        }
    }

    /// Deliver a pushed message to the local subscription, once.
    fn deliver_local(&self, topic: NodeId, envelope: MessageEnvelope) {
        let now_ms = self.now_ms();
        let fresh = self.dedup.lock().first_delivery(
            &envelope.message_id,
            envelope.expires_at,
            now_ms,
        );
        if !fresh {
            trace!(message = %envelope.message_id, "Duplicate delivery dropped");
            return;
        }
        if !self.subscriptions.lock().contains_key(&topic) {
            trace!(topic = %topic, "Push for topic we no longer follow");
            return;
        }
        if self
            .deliveries
            .try_send(TopicMessage { topic, envelope })
            .is_err()
        {
            warn!(topic = %topic, "Delivery channel full; message dropped");
        }
    }

    /// Mirror the durable topic slice into the DHT (fire and forget).
    fn persist_topic_state(self: &Arc<Self>, topic: NodeId) {
        let persisted = self.coordinator.lock().persistable(&topic);
        let Some(persisted) = persisted else { return };
        let Ok(value) = serde_json::to_value(&persisted) else {
            return;
        };
        let dht = self.dht.clone();
        tokio::spawn(async move {
            let _ = dht
                .store(topic_state_key(&topic), value, Duration::from_secs(3600))
                .await;
        });
    }

    /// Recover a predecessor's durable slice when coordinating a topic
    /// we have no state for.
    async fn recover_topic_state(self: &Arc<Self>, topic: NodeId) {
        if self.coordinator.lock().persistable(&topic).is_some() {
            return;
        }
        match self.dht.find_value(topic_state_key(&topic)).await {
            Ok(Some(value)) => {
                if let Ok(persisted) = serde_json::from_value::<PersistedTopicState>(value) {
                    self.coordinator.lock().adopt(topic, persisted);
                }
            }
            Ok(None) => {}
            Err(e) => {
                trace!(topic = %topic, error = %e, "No recoverable topic state");
            }
        }
    }
}

/// Frame loop: coordinator duties and local deliveries.
async fn handle_app_frame(inner: &Arc<PubsubInner>, app_frame: AppFrame) {
    let from = app_frame.from;
    match app_frame.frame {
        Frame::PubsubSubscribe {
            request_id,
            topic_id,
            subscriber,
        } => {
            inner.recover_topic_state(topic_id).await;
            let now_ms = inner.now_ms();
            let (version, subscribers, recent_messages) =
                inner.coordinator.lock().subscribe(topic_id, subscriber, now_ms);
            inner.persist_topic_state(topic_id);
            inner.dht.reply(
                from,
                Frame::PubsubSubscribed {
                    request_id,
                    version,
                    subscribers,
                    recent_messages,
                },
            );
        }
        Frame::PubsubUnsubscribe {
            topic_id,
            subscriber,
            ..
        } => {
            if inner.coordinator.lock().unsubscribe(&topic_id, &subscriber) {
                inner.persist_topic_state(topic_id);
            }
        }
        Frame::PubsubPublish {
            request_id,
            envelope,
        } => {
            let now_ms = inner.now_ms();
            let message_id = envelope.message_id.clone();
            let topic = envelope.topic_id;
            let targets = inner.coordinator.lock().publish(envelope.clone(), now_ms);
            let accepted = targets.is_some();
            inner.dht.reply(
                from,
                Frame::PubsubPublished {
                    request_id,
                    message_id,
                    accepted,
                },
            );
            if let Some(targets) = targets {
                inner.persist_topic_state(topic);
                inner.push_to_subscribers(topic, envelope, targets);
            }
        }
        Frame::PubsubTopicInfo {
            request_id,
            topic_id,
        } => {
            let now_ms = inner.now_ms();
            let info = inner.coordinator.lock().info(&topic_id, now_ms);
            let (version, subscribers, messages) = info.unwrap_or((0, Vec::new(), Vec::new()));
            inner.dht.reply(
                from,
                Frame::PubsubTopicInfoResult {
                    request_id,
                    version,
                    subscribers,
                    messages,
                },
            );
        }
        Frame::PubsubPush { topic_id, envelope } => {
            inner.deliver_local(topic_id, envelope);
        }
        other => {
            // Signalling and anything else the layer above owns.
            if let Some(signal_tx) = &inner.signal_tx {
                let _ = signal_tx
                    .send(AppFrame {
                        from,
                        frame: other,
                    })
                    .await;
            }
        }
    }
}

//! The notification hub: sequence assignment, durable append, bounded
//! fan-out, and resume.

use std::collections::{HashMap, HashSet, VecDeque};

use osprey_core::error::CoreError;
use osprey_core::types::Seq;
use osprey_db::repositories::EventRepo;
use osprey_db::DbPool;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::event::ChangeEvent;

/// Default per-subscriber outbound buffer (events).
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Default replay window (events retained per channel).
pub const DEFAULT_REPLAY_WINDOW: i64 = 1024;

#[derive(Debug, Clone)]
pub struct NotifyHubConfig {
    /// Outbound queue capacity per subscriber; overflowing it disconnects
    /// that subscriber.
    pub subscriber_buffer: usize,
    /// Events retained per channel for resume replay.
    pub replay_window: i64,
}

impl Default for NotifyHubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            replay_window: DEFAULT_REPLAY_WINDOW,
        }
    }
}

struct Subscriber {
    client_id: String,
    channels: HashSet<String>,
    tx: mpsc::Sender<ChangeEvent>,
}

/// Sequence counters and the live subscriber set.
///
/// One lock guards both so that a subscribe sees a consistent snapshot:
/// replay covers everything up to the snapshot, live delivery covers
/// everything after, with no gap and no duplicate in between.
#[derive(Default)]
struct Inner {
    seqs: HashMap<String, Seq>,
    subscribers: HashMap<Uuid, Subscriber>,
}

/// Central publish/subscribe hub. Shared via `Arc<NotifyHub>`.
pub struct NotifyHub {
    pool: DbPool,
    config: NotifyHubConfig,
    inner: Mutex<Inner>,
}

impl NotifyHub {
    pub fn new(pool: DbPool, config: NotifyHubConfig) -> Self {
        Self {
            pool,
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn replay_window(&self) -> i64 {
        self.config.replay_window
    }

    /// Assign the next sequence on `channel`, append the event to the
    /// durable log, then fan out to subscribers.
    ///
    /// The append happens before any delivery so a subscriber resuming
    /// right after a publish can always replay it. Fan-out is `try_send`
    /// into bounded queues: a full queue disconnects that subscriber and
    /// never blocks this call.
    pub async fn publish(
        &self,
        channel: &str,
        payload: serde_json::Value,
    ) -> Result<ChangeEvent, sqlx::Error> {
        let mut inner = self.inner.lock().await;

        let seq = match inner.seqs.get(channel) {
            Some(current) => current + 1,
            // First publish on this channel since startup: seed from the log.
            None => EventRepo::max_seq(&self.pool, channel).await?.unwrap_or(0) + 1,
        };

        let row = EventRepo::insert(&self.pool, channel, seq, &payload).await?;
        inner.seqs.insert(channel.to_string(), seq);

        let event = ChangeEvent {
            channel: row.channel,
            seq: row.seq,
            payload: row.payload,
            emitted_at: row.emitted_at,
        };

        let mut dropped: Vec<Uuid> = Vec::new();
        for (id, sub) in &inner.subscribers {
            if !sub.channels.contains(channel) {
                continue;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        client_id = %sub.client_id,
                        channel,
                        seq,
                        "Slow subscriber queue full, disconnecting",
                    );
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    dropped.push(*id);
                }
            }
        }
        for id in dropped {
            inner.subscribers.remove(&id);
        }

        tracing::debug!(channel, seq, "Change event published");
        Ok(event)
    }

    /// Open a live delivery stream over `channels`.
    ///
    /// With `resume_from`, events after that sequence are replayed from
    /// the log before live events; a sequence older than the retained
    /// window fails with [`CoreError::ResumeGap`] and no subscription is
    /// created.
    pub async fn subscribe(
        &self,
        client_id: &str,
        channels: Vec<String>,
        resume_from: Option<Seq>,
    ) -> Result<SubscriptionStream, CoreError> {
        if channels.is_empty() {
            return Err(CoreError::Validation(
                "Subscription needs at least one channel".to_string(),
            ));
        }

        let mut inner = self.inner.lock().await;

        let mut replay: Vec<ChangeEvent> = Vec::new();
        if let Some(after) = resume_from {
            for channel in &channels {
                self.collect_replay(&inner, channel, after, &mut replay)
                    .await?;
            }
            // Per-channel sequences already arrive ordered; interleave
            // channels by emission time for a stable merged stream.
            replay.sort_by(|a, b| (a.emitted_at, a.seq).cmp(&(b.emitted_at, b.seq)));
        }

        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer);
        let id = Uuid::new_v4();
        inner.subscribers.insert(
            id,
            Subscriber {
                client_id: client_id.to_string(),
                channels: channels.into_iter().collect(),
                tx,
            },
        );

        tracing::debug!(client_id, subscription_id = %id, "Subscriber registered");
        Ok(SubscriptionStream {
            id,
            replay: replay.into(),
            rx,
        })
    }

    /// Gather missed events on one channel into `replay`, verifying the
    /// retained log still covers the requested range.
    async fn collect_replay(
        &self,
        inner: &Inner,
        channel: &str,
        after: Seq,
        replay: &mut Vec<ChangeEvent>,
    ) -> Result<(), CoreError> {
        let current = match inner.seqs.get(channel) {
            Some(seq) => *seq,
            None => EventRepo::max_seq(&self.pool, channel)
                .await
                .map_err(|e| CoreError::Internal(e.to_string()))?
                .unwrap_or(0),
        };

        if after > current {
            return Err(CoreError::Validation(format!(
                "resume_from {after} is beyond the current sequence {current} on channel {channel}"
            )));
        }
        if after == current {
            // Nothing was missed.
            return Ok(());
        }

        // Events (after, current] are needed; the log is purged from the
        // bottom, so coverage means the oldest retained row is <= after+1.
        let oldest = EventRepo::min_seq(&self.pool, channel)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        match oldest {
            Some(oldest) if oldest <= after + 1 => {}
            Some(oldest) => {
                return Err(CoreError::ResumeGap {
                    channel: channel.to_string(),
                    requested: after,
                    oldest,
                });
            }
            None => {
                return Err(CoreError::ResumeGap {
                    channel: channel.to_string(),
                    requested: after,
                    oldest: current + 1,
                });
            }
        }

        let rows = EventRepo::replay_after(&self.pool, channel, after)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        replay.extend(rows.into_iter().map(|row| ChangeEvent {
            channel: row.channel,
            seq: row.seq,
            payload: row.payload,
            emitted_at: row.emitted_at,
        }));
        Ok(())
    }

    /// Remove a subscriber (normal disconnect path).
    pub async fn unsubscribe(&self, id: Uuid) {
        self.inner.lock().await.subscribers.remove(&id);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }

    /// Drop every subscriber; their streams end after draining buffered
    /// events. Used during graceful shutdown.
    pub async fn shutdown_all(&self) {
        let mut inner = self.inner.lock().await;
        let count = inner.subscribers.len();
        inner.subscribers.clear();
        tracing::info!(count, "Disconnected all notification subscribers");
    }
}

/// A subscriber's receive side: replayed events first, then live ones.
///
/// Yields `None` once the hub has dropped the subscription (slow-consumer
/// disconnect or shutdown) and the buffer is drained.
#[derive(Debug)]
pub struct SubscriptionStream {
    id: Uuid,
    replay: VecDeque<ChangeEvent>,
    rx: mpsc::Receiver<ChangeEvent>,
}

impl SubscriptionStream {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn next(&mut self) -> Option<ChangeEvent> {
        if let Some(event) = self.replay.pop_front() {
            return Some(event);
        }
        self.rx.recv().await
    }
}

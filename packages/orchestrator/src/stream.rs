//! Progress Stream Hub.
//!
//! One `tokio::sync::broadcast` channel per active job, generalized from
//! the single-subscriber `mpsc::Sender<AgentEvent>` fan-out pattern used
//! for a single chat session, since a job's SSE endpoint may have
//! several concurrent subscribers. A late subscriber always receives the
//! current snapshot first, then live events; if the job has already
//! finished, it receives the snapshot immediately followed by `Done`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use capi_demo_models::JobRecord;
use futures::Stream;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

/// Interval between heartbeat events sent to every open subscription, so
/// intermediary proxies don't time out an idle SSE connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Capacity of each job's broadcast channel. A slow subscriber that
/// falls this far behind starts missing events; it will still receive
/// the next snapshot when it reconnects.
const CHANNEL_CAPACITY: usize = 256;

/// One event sent to SSE subscribers of a job's progress stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A full job snapshot, sent first on every subscription.
    Snapshot {
        /// The job as of subscription time.
        job: Box<JobRecord>,
    },
    /// An incremental update: a new log line, stage transition, or
    /// progress tick, mirrored into the job record by the caller.
    Update {
        /// The job after the update was applied.
        job: Box<JobRecord>,
    },
    /// Keep-alive, sent every [`HEARTBEAT_INTERVAL`] on every open job
    /// channel.
    Heartbeat,
    /// The job reached a terminal state; no further events follow on
    /// this channel.
    Done {
        /// The final job snapshot.
        job: Box<JobRecord>,
    },
}

struct JobChannel {
    tx: broadcast::Sender<StreamEvent>,
    latest: JobRecord,
    finished: bool,
}

/// Registry of per-job broadcast channels.
pub struct StreamHub {
    channels: RwLock<HashMap<String, JobChannel>>,
}

impl StreamHub {
    /// Creates an empty hub and spawns its background heartbeat task.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let hub = Arc::new(Self {
            channels: RwLock::new(HashMap::new()),
        });
        spawn_heartbeat(Arc::clone(&hub));
        hub
    }

    /// Registers a job and publishes its initial snapshot. Must be
    /// called before [`Self::publish_update`]/[`Self::finish`] for a
    /// given job id.
    pub async fn open(&self, job: JobRecord) {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        let mut channels = self.channels.write().await;
        channels.insert(
            job.id.clone(),
            JobChannel {
                tx,
                latest: job,
                finished: false,
            },
        );
    }

    /// Publishes an incremental update, replacing the retained snapshot.
    pub async fn publish_update(&self, job: JobRecord) {
        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get_mut(&job.id) {
            channel.latest = job.clone();
            let _ = channel.tx.send(StreamEvent::Update { job: Box::new(job) });
        }
    }

    /// Publishes the final snapshot and marks the job's channel
    /// finished; late subscribers receive the snapshot followed
    /// immediately by `Done`.
    pub async fn finish(&self, job: JobRecord) {
        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get_mut(&job.id) {
            channel.latest = job.clone();
            channel.finished = true;
            let _ = channel.tx.send(StreamEvent::Done { job: Box::new(job) });
        }
    }

    /// Subscribes to `job_id`'s progress stream, yielding the current
    /// snapshot first, then live events until `Done` or the channel
    /// closes. Returns `None` if no job with this id has been
    /// [`Self::open`]ed.
    pub async fn subscribe(
        self: &Arc<Self>,
        job_id: &str,
    ) -> Option<impl Stream<Item = StreamEvent> + use<>> {
        let channels = self.channels.read().await;
        let channel = channels.get(job_id)?;
        let snapshot = channel.latest.clone();
        let already_finished = channel.finished;
        let mut rx = channel.tx.subscribe();
        drop(channels);

        Some(async_stream::stream! {
            yield StreamEvent::Snapshot { job: Box::new(snapshot) };
            if already_finished {
                return;
            }
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let is_done = matches!(event, StreamEvent::Done { .. });
                        yield event;
                        if is_done {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }

    async fn heartbeat_tick(&self) {
        let channels = self.channels.read().await;
        for channel in channels.values() {
            if !channel.finished {
                let _ = channel.tx.send(StreamEvent::Heartbeat);
            }
        }
    }

    /// Drops the channel for `job_id`, freeing its buffered events.
    /// Safe to call after all subscribers are expected to have
    /// disconnected (e.g. well after `Done`).
    pub async fn evict(&self, job_id: &str) {
        self.channels.write().await.remove(job_id);
    }
}

fn spawn_heartbeat(hub: Arc<StreamHub>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            interval.tick().await;
            hub.heartbeat_tick().await;
        }
    });
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn sample_job(id: &str) -> JobRecord {
        JobRecord::new(id.to_string(), "https://example.com".to_string(), "owner".to_string(), Utc::now())
    }

    #[tokio::test]
    async fn late_subscriber_gets_snapshot_then_done() {
        let hub = StreamHub::new();
        hub.open(sample_job("job-1")).await;
        hub.finish(sample_job("job-1")).await;

        let stream = hub.subscribe("job-1").await.expect("job registered");
        futures::pin_mut!(stream);
        let first = futures::StreamExt::next(&mut stream).await.unwrap();
        assert!(matches!(first, StreamEvent::Snapshot { .. }));
        let second = futures::StreamExt::next(&mut stream).await.unwrap();
        assert!(matches!(second, StreamEvent::Done { .. }));
        assert!(futures::StreamExt::next(&mut stream).await.is_none());
    }

    #[tokio::test]
    async fn subscribe_returns_none_for_unknown_job() {
        let hub = StreamHub::new();
        assert!(hub.subscribe("missing").await.is_none());
    }

    #[tokio::test]
    async fn live_update_is_forwarded_to_subscriber() {
        let hub = StreamHub::new();
        hub.open(sample_job("job-2")).await;

        let stream = hub.subscribe("job-2").await.expect("job registered");
        futures::pin_mut!(stream);
        let snapshot = futures::StreamExt::next(&mut stream).await.unwrap();
        assert!(matches!(snapshot, StreamEvent::Snapshot { .. }));

        hub.publish_update(sample_job("job-2")).await;
        let update = futures::StreamExt::next(&mut stream).await.unwrap();
        assert!(matches!(update, StreamEvent::Update { .. }));
    }
}

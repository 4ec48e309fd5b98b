//! Compression worker pool
//!
//! A single in-process coordinator owning a bounded priority queue of
//! compression jobs and a concurrency gate. High-priority jobs jump the
//! queue but never interrupt an in-flight job. Jobs are best-effort and are
//! lost on process exit; a later turn write re-enqueues if still needed.
//!
//! Queue policy when full:
//! - a new high-priority job evicts the oldest normal-priority job, and is
//!   rejected if the queue holds only high-priority jobs
//! - a new normal-priority job evicts the queue head

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use chat_agent_core::MessageStore;

use crate::kv::{keys, KvStore};
use crate::summary::{SummaryGenerator, SummaryLevel};

/// Job priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPriority {
    Normal,
    High,
}

/// One queued compression job
#[derive(Debug, Clone)]
pub struct CompressionJob {
    pub id: Uuid,
    pub user_id: String,
    pub conversation_id: String,
    pub priority: JobPriority,
    pub created_at: DateTime<Utc>,
}

/// Pool configuration
#[derive(Debug, Clone)]
pub struct CompressionPoolConfig {
    /// In-flight job cap
    pub max_concurrent: usize,
    /// Queue cap
    pub queue_cap: usize,
    /// Most-recent turns kept verbatim after compression
    pub keep_recent_turns: usize,
    /// Minimum turns before a conversation is compressed at all
    pub min_turns: usize,
    pub summary_ttl_seconds: u64,
    pub conversation_ttl_seconds: u64,
}

impl Default for CompressionPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            queue_cap: 100,
            keep_recent_turns: 10,
            min_turns: 6,
            summary_ttl_seconds: 86400 * 30,
            conversation_ttl_seconds: 86400 * 7,
        }
    }
}

struct PoolState {
    queue: VecDeque<CompressionJob>,
    active: usize,
    shutting_down: bool,
}

/// Bounded asynchronous compression pool
///
/// The queue and the active-job counter live under one mutex; the dispatcher
/// is woken through a `Notify` on enqueue and on job completion, so there is
/// no polling loop.
pub struct CompressionPool {
    state: Mutex<PoolState>,
    notify: Notify,
    config: CompressionPoolConfig,
    kv: Arc<dyn KvStore>,
    store: Arc<dyn MessageStore>,
    summaries: Arc<SummaryGenerator>,
}

impl CompressionPool {
    pub fn new(
        config: CompressionPoolConfig,
        kv: Arc<dyn KvStore>,
        store: Arc<dyn MessageStore>,
        summaries: Arc<SummaryGenerator>,
    ) -> Self {
        Self {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                active: 0,
                shutting_down: false,
            }),
            notify: Notify::new(),
            config,
            kv,
            store,
            summaries,
        }
    }

    /// Start the dispatcher task
    pub fn spawn(self: Arc<Self>) {
        tracing::info!(
            max_concurrent = self.config.max_concurrent,
            queue_cap = self.config.queue_cap,
            "compression pool started"
        );
        tokio::spawn(async move {
            self.dispatch_loop().await;
        });
    }

    /// Queue a compression job for one conversation
    pub fn enqueue(&self, user_id: &str, conversation_id: &str, priority: JobPriority) {
        let job = CompressionJob {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            priority,
            created_at: Utc::now(),
        };

        {
            let mut state = self.state.lock();
            if state.shutting_down {
                tracing::warn!(job_id = %job.id, "pool shutting down, job dropped");
                return;
            }

            if state.queue.len() >= self.config.queue_cap {
                match priority {
                    JobPriority::High => {
                        // Evict the oldest normal-priority job
                        let victim = state
                            .queue
                            .iter()
                            .position(|j| j.priority == JobPriority::Normal);
                        match victim {
                            Some(index) => {
                                let evicted = state.queue.remove(index);
                                if let Some(evicted) = evicted {
                                    tracing::warn!(
                                        evicted = %evicted.id,
                                        "queue full, evicted normal-priority job"
                                    );
                                }
                            },
                            None => {
                                tracing::warn!(
                                    job_id = %job.id,
                                    "queue full of high-priority jobs, new job rejected"
                                );
                                return;
                            },
                        }
                    },
                    JobPriority::Normal => {
                        if let Some(evicted) = state.queue.pop_front() {
                            tracing::warn!(evicted = %evicted.id, "queue full, evicted oldest job");
                        }
                    },
                }
            }

            match priority {
                JobPriority::High => state.queue.push_front(job),
                JobPriority::Normal => state.queue.push_back(job),
            }
        }

        self.notify.notify_one();
    }

    /// Current `(queued, active)` depth
    pub fn depth(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.queue.len(), state.active)
    }

    /// Priority of the job at the queue head
    pub fn peek_priority(&self) -> Option<JobPriority> {
        self.state.lock().queue.front().map(|j| j.priority)
    }

    /// Process every queued job inline, sequentially
    ///
    /// Deterministic alternative to the dispatcher, used by tests.
    pub async fn drain_queue(&self) {
        loop {
            let job = self.state.lock().queue.pop_front();
            match job {
                Some(job) => self.process(job).await,
                None => break,
            }
        }
    }

    /// Stop accepting jobs and wait for the pool to empty, bounded by
    /// `deadline`; returns whether it fully drained
    pub async fn shutdown(&self, deadline: Duration) -> bool {
        self.state.lock().shutting_down = true;
        let started = std::time::Instant::now();

        loop {
            let (queued, active) = self.depth();
            if queued == 0 && active == 0 {
                tracing::info!("compression pool drained");
                return true;
            }
            if started.elapsed() >= deadline {
                tracing::warn!(queued, active, "compression pool shutdown deadline reached");
                return false;
            }
            self.notify.notify_one();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            loop {
                let job = {
                    let mut state = self.state.lock();
                    if state.active >= self.config.max_concurrent {
                        None
                    } else if let Some(job) = state.queue.pop_front() {
                        state.active += 1;
                        Some(job)
                    } else {
                        None
                    }
                };

                let Some(job) = job else { break };
                let pool = self.clone();
                tokio::spawn(async move {
                    pool.process(job).await;
                    {
                        let mut state = pool.state.lock();
                        state.active = state.active.saturating_sub(1);
                    }
                    pool.notify.notify_one();
                });
            }

            self.notify.notified().await;
        }
    }

    /// Run one job: layered summaries over the older turns, then trim the
    /// working log to the keep window
    async fn process(&self, job: CompressionJob) {
        let user_id = &job.user_id;
        let conversation_id = &job.conversation_id;
        tracing::info!(job_id = %job.id, user_id, conversation_id, "processing compression job");

        // The persistent store is the authoritative view
        let turns = match self.store.recent_turns(conversation_id, 100).await {
            Ok(turns) => turns,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "failed to load turns, job skipped");
                return;
            },
        };

        if turns.len() < self.config.min_turns {
            tracing::debug!(job_id = %job.id, turns = turns.len(), "too few turns, no-op");
            return;
        }

        let keep = self.config.keep_recent_turns;
        if turns.len() <= keep {
            tracing::debug!(job_id = %job.id, "nothing beyond the keep window, no-op");
            return;
        }
        let to_summarize = &turns[..turns.len() - keep];

        let mut prior = String::new();
        let mut stored_levels = 0usize;
        for level in SummaryLevel::DESCENDING {
            if to_summarize.len() < level.min_turns() {
                continue;
            }

            let summary = self.summaries.generate_layer(level, to_summarize, &prior).await;
            if summary.is_empty() {
                continue;
            }

            let key = keys::summary(user_id, conversation_id, level);
            match self.kv.set_ex(&key, self.config.summary_ttl_seconds, &summary).await {
                Ok(()) => {
                    stored_levels += 1;
                    prior = summary;
                },
                Err(e) => {
                    tracing::warn!(job_id = %job.id, level = level.as_str(), error = %e,
                        "failed to store layer summary");
                },
            }
        }

        // Discard turns the summaries now cover. Best-effort: a failed trim
        // leaves extra turns behind but does not fail the job.
        let conversation_key = keys::conversation(user_id, conversation_id);
        match self.kv.ltrim(&conversation_key, keep).await {
            Ok(()) => {
                let _ = self.kv.expire(&conversation_key, self.config.conversation_ttl_seconds).await;
            },
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "failed to trim turn log");
            },
        }

        tracing::info!(
            job_id = %job.id,
            user_id,
            conversation_id,
            summarized = to_summarize.len(),
            kept = keep.min(turns.len()),
            levels = stored_levels,
            "compression complete"
        );
    }
}

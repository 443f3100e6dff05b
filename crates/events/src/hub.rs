//! Per-job notification fan-out.
//!
//! [`NotificationHub`] keeps the bindings between notification channels and
//! the jobs they watch, and pushes every progress/status notification of a
//! job to each of its watchers.
//!
//! All state lives behind a single `tokio::sync::Mutex`. Channel sends are
//! non-blocking, so they happen while the lock is held; this totally orders
//! `subscribe` against `broadcast` for a given job:
//!
//! - a watcher that subscribes mid-run receives the current state and then
//!   every later notification, with no gap and no duplicate;
//! - a watcher that subscribes after the terminal notification receives that
//!   terminal status exactly once, even if the job record it read was stale.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use lpe_core::job::Job;
use lpe_core::job_events::Notification;
use lpe_core::progress::ProgressSnapshot;
use lpe_core::types::JobId;
use tokio::sync::Mutex;

use crate::channel::{ChannelError, ChannelId, NotificationChannel};

/// Number of terminated jobs whose final status the hub remembers.
pub const DEFAULT_RECENT_TERMINAL_CAPACITY: usize = 1024;

/// What `subscribe` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Current state was sent and the channel now receives updates.
    Watching,
    /// The channel already watched this job; nothing was sent.
    AlreadyWatching,
    /// The job is finished: its final status was sent and no binding made.
    Finished,
}

/// Fan-out hub for job notifications.
pub struct NotificationHub {
    state: Mutex<HubState>,
    recent_capacity: usize,
}

#[derive(Default)]
struct HubState {
    channels: HashMap<ChannelId, Arc<dyn NotificationChannel>>,
    by_job: HashMap<JobId, HashMap<ChannelId, Binding>>,
    by_channel: HashMap<ChannelId, HashSet<JobId>>,
    /// Last broadcast state of jobs that have not terminated yet.
    latest: HashMap<JobId, LatestState>,
    recent_terminal: HashMap<JobId, Notification>,
    recent_order: VecDeque<JobId>,
}

#[derive(Default)]
struct Binding {
    last_progress: Option<ProgressSnapshot>,
}

#[derive(Default)]
struct LatestState {
    status: Option<Notification>,
    progress: Option<ProgressSnapshot>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::with_recent_capacity(DEFAULT_RECENT_TERMINAL_CAPACITY)
    }

    pub fn with_recent_capacity(recent_capacity: usize) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            recent_capacity: recent_capacity.max(1),
        }
    }

    /// Start watching `job` on `channel`.
    ///
    /// Sends the current status, then the current progress if any. Where
    /// the hub has seen a newer state than `job` carries, the newer state
    /// is sent. If the initial send fails the channel is disconnected and
    /// the error returned.
    pub async fn subscribe(
        &self,
        channel: Arc<dyn NotificationChannel>,
        job: &Job,
    ) -> Result<SubscribeOutcome, ChannelError> {
        let mut state = self.state.lock().await;
        let channel_id = channel.id();

        if let Some(terminal) = state.recent_terminal.get(&job.id) {
            let terminal = terminal.clone();
            return Self::send_once(&mut state, channel.as_ref(), &terminal);
        }
        if job.is_terminal() {
            return Self::send_once(&mut state, channel.as_ref(), &Notification::status_of(job));
        }

        if state
            .by_job
            .get(&job.id)
            .is_some_and(|bindings| bindings.contains_key(&channel_id))
        {
            return Ok(SubscribeOutcome::AlreadyWatching);
        }

        let (status, progress) = match state.latest.get(&job.id) {
            Some(latest) => (
                latest
                    .status
                    .clone()
                    .unwrap_or_else(|| Notification::status_of(job)),
                newest_progress(latest.progress.as_ref(), job.progress.as_ref()),
            ),
            None => (Notification::status_of(job), job.progress.clone()),
        };

        let sent = channel.send(&status).and_then(|()| match &progress {
            Some(snapshot) => channel.send(&Notification::progress(job.id, snapshot.clone())),
            None => Ok(()),
        });
        if let Err(e) = sent {
            tracing::debug!(channel_id = %channel_id, job_id = %job.id, error = %e, "Initial send failed");
            Self::disconnect_locked(&mut state, channel_id);
            return Err(e);
        }

        state.channels.insert(channel_id, channel);
        state.by_job.entry(job.id).or_default().insert(
            channel_id,
            Binding {
                last_progress: progress,
            },
        );
        state.by_channel.entry(channel_id).or_default().insert(job.id);

        tracing::debug!(channel_id = %channel_id, job_id = %job.id, "Channel watching job");
        Ok(SubscribeOutcome::Watching)
    }

    /// Stop watching one job. Returns whether a binding existed.
    pub async fn unsubscribe(&self, channel_id: ChannelId, job_id: JobId) -> bool {
        let mut state = self.state.lock().await;
        let removed = Self::unbind(&mut state, channel_id, job_id);
        Self::forget_idle_channel(&mut state, channel_id);
        removed
    }

    /// Drop every binding of a channel. Returns the number removed.
    pub async fn disconnect(&self, channel_id: ChannelId) -> usize {
        let mut state = self.state.lock().await;
        Self::disconnect_locked(&mut state, channel_id)
    }

    /// Deliver `notification` to every watcher of its job.
    ///
    /// Progress equal to the last snapshot a binding received is skipped.
    /// Channels whose send fails are disconnected. A terminal status drops
    /// all bindings of the job after delivery. Returns the number of
    /// channels the notification was delivered to.
    pub async fn broadcast(&self, notification: Notification) -> usize {
        let mut state = self.state.lock().await;
        let job_id = notification.job_id();
        let terminal = notification.is_terminal();

        if !terminal {
            let latest = state.latest.entry(job_id).or_default();
            match &notification {
                Notification::Progress { data, .. } => latest.progress = Some(data.clone()),
                Notification::Status { .. } => latest.status = Some(notification.clone()),
            }
        }

        let mut delivered = 0;
        let mut dead = Vec::new();
        let HubState {
            channels, by_job, ..
        } = &mut *state;

        if let Some(bindings) = by_job.get_mut(&job_id) {
            for (channel_id, binding) in bindings.iter_mut() {
                if let Notification::Progress { data, .. } = &notification {
                    if binding.last_progress.as_ref() == Some(data) {
                        continue;
                    }
                }
                let Some(channel) = channels.get(channel_id) else {
                    dead.push(*channel_id);
                    continue;
                };
                match channel.send(&notification) {
                    Ok(()) => {
                        delivered += 1;
                        if let Notification::Progress { data, .. } = &notification {
                            binding.last_progress = Some(data.clone());
                        }
                    }
                    Err(e) => {
                        tracing::debug!(channel_id = %channel_id, job_id = %job_id, error = %e, "Dropping dead channel");
                        dead.push(*channel_id);
                    }
                }
            }
        }

        for channel_id in dead {
            Self::disconnect_locked(&mut state, channel_id);
        }

        if terminal {
            if let Some(bindings) = state.by_job.remove(&job_id) {
                for channel_id in bindings.into_keys() {
                    if let Some(jobs) = state.by_channel.get_mut(&channel_id) {
                        jobs.remove(&job_id);
                    }
                    Self::forget_idle_channel(&mut state, channel_id);
                }
            }
            state.latest.remove(&job_id);
            self.remember_terminal(&mut state, notification);
        }

        delivered
    }

    /// Number of channels currently watching `job_id`.
    pub async fn subscriber_count(&self, job_id: JobId) -> usize {
        self.state
            .lock()
            .await
            .by_job
            .get(&job_id)
            .map_or(0, HashMap::len)
    }

    /// Number of channels with at least one binding.
    pub async fn channel_count(&self) -> usize {
        self.state.lock().await.channels.len()
    }

    pub async fn is_watching(&self, channel_id: ChannelId, job_id: JobId) -> bool {
        self.state
            .lock()
            .await
            .by_channel
            .get(&channel_id)
            .is_some_and(|jobs| jobs.contains(&job_id))
    }

    // -- internals --------------------------------------------------------------

    fn send_once(
        state: &mut HubState,
        channel: &dyn NotificationChannel,
        notification: &Notification,
    ) -> Result<SubscribeOutcome, ChannelError> {
        if let Err(e) = channel.send(notification) {
            Self::disconnect_locked(state, channel.id());
            return Err(e);
        }
        Ok(SubscribeOutcome::Finished)
    }

    fn unbind(state: &mut HubState, channel_id: ChannelId, job_id: JobId) -> bool {
        let removed = match state.by_job.get_mut(&job_id) {
            Some(bindings) => {
                let removed = bindings.remove(&channel_id).is_some();
                if bindings.is_empty() {
                    state.by_job.remove(&job_id);
                }
                removed
            }
            None => false,
        };
        if let Some(jobs) = state.by_channel.get_mut(&channel_id) {
            jobs.remove(&job_id);
        }
        removed
    }

    fn forget_idle_channel(state: &mut HubState, channel_id: ChannelId) {
        if state
            .by_channel
            .get(&channel_id)
            .map_or(true, HashSet::is_empty)
        {
            state.by_channel.remove(&channel_id);
            state.channels.remove(&channel_id);
        }
    }

    fn disconnect_locked(state: &mut HubState, channel_id: ChannelId) -> usize {
        let jobs = state.by_channel.remove(&channel_id).unwrap_or_default();
        for job_id in &jobs {
            if let Some(bindings) = state.by_job.get_mut(job_id) {
                bindings.remove(&channel_id);
                if bindings.is_empty() {
                    state.by_job.remove(job_id);
                }
            }
        }
        state.channels.remove(&channel_id);
        jobs.len()
    }

    fn remember_terminal(&self, state: &mut HubState, notification: Notification) {
        let job_id = notification.job_id();
        if state.recent_terminal.insert(job_id, notification).is_none() {
            state.recent_order.push_back(job_id);
        }
        while state.recent_order.len() > self.recent_capacity {
            if let Some(evicted) = state.recent_order.pop_front() {
                state.recent_terminal.remove(&evicted);
            }
        }
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

/// The more advanced of two progress snapshots.
fn newest_progress(
    a: Option<&ProgressSnapshot>,
    b: Option<&ProgressSnapshot>,
) -> Option<ProgressSnapshot> {
    match (a, b) {
        (Some(a), Some(b)) => {
            let a_key = (a.completed_steps, a.timestamp);
            let b_key = (b.completed_steps, b.timestamp);
            Some(if a_key >= b_key { a.clone() } else { b.clone() })
        }
        (a, b) => a.or(b).cloned(),
    }
}

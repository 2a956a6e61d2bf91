// src/dispatcher.rs
//
// Fire-and-forget fan-out of an episode to every channel. `fire` only
// spawns; each channel then runs in its own task, so a failure, panic or
// hang in one channel is reported against that channel alone and never
// reaches the frame loop.

use crate::channels::NotificationChannel;
use crate::pipeline::PipelineMetrics;
use crate::types::AlertEpisode;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelOutcome {
    Delivered,
    Failed(String),
    TimedOut,
    Panicked,
}

impl fmt::Display for ChannelOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelOutcome::Delivered => write!(f, "delivered"),
            ChannelOutcome::Failed(reason) => write!(f, "failed: {}", reason),
            ChannelOutcome::TimedOut => write!(f, "timed out"),
            ChannelOutcome::Panicked => write!(f, "panicked"),
        }
    }
}

/// What happened to one episode, channel by channel.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub episode_label: String,
    pub outcomes: Vec<(&'static str, ChannelOutcome)>,
}

impl DispatchReport {
    pub fn outcome(&self, channel: &str) -> Option<&ChannelOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| *name == channel)
            .map(|(_, outcome)| outcome)
    }

    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == ChannelOutcome::Delivered)
            .count()
    }
}

/// Handle to an in-flight dispatch. Dropping it detaches the dispatch.
pub struct DispatchHandle {
    inner: JoinHandle<DispatchReport>,
}

impl DispatchHandle {
    /// Wait for every channel to finish. Only tests and shutdown reporting
    /// care; the frame loop never joins.
    pub async fn join(self) -> DispatchReport {
        match self.inner.await {
            Ok(report) => report,
            Err(e) => {
                error!("Dispatch supervisor failed: {}", e);
                DispatchReport {
                    episode_label: String::new(),
                    outcomes: Vec::new(),
                }
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

#[derive(Clone)]
pub struct AlertDispatcher {
    runtime: Handle,
    channels: Arc<[Arc<dyn NotificationChannel>]>,
    channel_timeout: Option<Duration>,
    metrics: PipelineMetrics,
}

impl AlertDispatcher {
    pub fn new(
        runtime: Handle,
        channels: Vec<Arc<dyn NotificationChannel>>,
        channel_timeout: Option<Duration>,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            runtime,
            channels: channels.into(),
            channel_timeout,
            metrics,
        }
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Start delivering `episode` everywhere and return at once. Safe to call
    /// from a plain thread as well as from inside the runtime.
    pub fn fire(&self, episode: AlertEpisode) -> DispatchHandle {
        let episode = Arc::new(episode);
        self.metrics.inc(&self.metrics.episodes_fired);

        info!(
            "🚨 Dispatching episode {} (p={:.3}, {} evidence frame(s)) to {} channel(s)",
            episode.label(),
            episode.probability,
            episode.evidence.len(),
            self.channels.len()
        );

        // One task per channel, spawned before the supervisor so they start
        // even if the supervisor is never polled.
        let tasks: Vec<(&'static str, JoinHandle<ChannelOutcome>)> = self
            .channels
            .iter()
            .map(|channel| {
                let channel = channel.clone();
                let episode = episode.clone();
                let timeout = self.channel_timeout;
                let name = channel.name();
                let task = self
                    .runtime
                    .spawn(async move { run_channel(channel, episode, timeout).await });
                (name, task)
            })
            .collect();

        let metrics = self.metrics.clone();
        let label = episode.label();
        let inner = self.runtime.spawn(async move {
            let mut outcomes = Vec::with_capacity(tasks.len());
            for (name, task) in tasks {
                let outcome = match task.await {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_panic() => {
                        error!("Channel {} panicked while delivering {}", name, label);
                        ChannelOutcome::Panicked
                    }
                    Err(_) => ChannelOutcome::Failed("task cancelled".to_string()),
                };
                if outcome == ChannelOutcome::Delivered {
                    metrics.inc(&metrics.deliveries_succeeded);
                } else {
                    metrics.inc(&metrics.deliveries_failed);
                }
                outcomes.push((name, outcome));
            }

            let delivered = outcomes
                .iter()
                .filter(|(_, o)| *o == ChannelOutcome::Delivered)
                .count();
            info!(
                "Episode {} finished: {}/{} channel(s) delivered",
                label,
                delivered,
                outcomes.len()
            );

            DispatchReport {
                episode_label: label,
                outcomes,
            }
        });

        DispatchHandle { inner }
    }
}

async fn run_channel(
    channel: Arc<dyn NotificationChannel>,
    episode: Arc<AlertEpisode>,
    timeout: Option<Duration>,
) -> ChannelOutcome {
    let name = channel.name();
    let delivery = channel.deliver(&episode);

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, delivery).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Channel {} gave up on episode {} after {:.1}s",
                    name,
                    episode.label(),
                    limit.as_secs_f64()
                );
                return ChannelOutcome::TimedOut;
            }
        },
        None => delivery.await,
    };

    match result {
        Ok(()) => ChannelOutcome::Delivered,
        Err(e) => {
            error!(
                "Channel {} failed for episode {}: {:#}",
                name,
                episode.label(),
                e
            );
            ChannelOutcome::Failed(format!("{:#}", e))
        }
    }
}

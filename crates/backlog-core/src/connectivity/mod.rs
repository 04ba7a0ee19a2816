//! Connectivity monitor.
//!
//! Link-layer events say whether a network exists at all; the periodic probe
//! says whether the remote authority actually answers. Only the combined
//! `is_online` flag gates sync. Quality is informational.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::clock::Clock;
use crate::config::MonitorConfig;
use crate::error::RemoteError;
use crate::remote::RemoteAuthority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Good,
    Poor,
    Offline,
}

impl ConnectionQuality {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Poor => "poor",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub is_online: bool,
    pub quality: ConnectionQuality,
    /// Last platform link report
    pub link_up: bool,
    pub last_check: Option<i64>,
    pub latency_ms: Option<u64>,
}

impl ConnectivityState {
    const fn initial(online: bool) -> Self {
        Self {
            is_online: online,
            quality: if online {
                ConnectionQuality::Good
            } else {
                ConnectionQuality::Offline
            },
            link_up: online,
            last_check: None,
            latency_ms: None,
        }
    }
}

struct MonitorInner {
    remote: Arc<dyn RemoteAuthority>,
    clock: Arc<dyn Clock>,
    config: MonitorConfig,
    state: watch::Sender<ConnectivityState>,
}

/// Shared connectivity state; clones observe the same monitor
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

impl ConnectivityMonitor {
    pub fn new(
        remote: Arc<dyn RemoteAuthority>,
        clock: Arc<dyn Clock>,
        config: MonitorConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectivityState::initial(config.initially_online));
        Self {
            inner: Arc::new(MonitorInner {
                remote,
                clock,
                config,
                state,
            }),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.inner.state.borrow().clone()
    }

    pub fn is_online(&self) -> bool {
        self.inner.state.borrow().is_online
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.inner.state.subscribe()
    }

    /// Force the online flag, e.g. from a host that knows better
    pub fn set_online(&self, online: bool) {
        let now = self.inner.clock.now_ms();
        self.publish(ConnectivityState {
            is_online: online,
            quality: if online {
                ConnectionQuality::Good
            } else {
                ConnectionQuality::Offline
            },
            link_up: online,
            last_check: Some(now),
            latency_ms: None,
        });
    }

    /// Platform link event; a link coming up is confirmed by a probe
    pub async fn on_link_change(&self, up: bool) -> ConnectivityState {
        if up {
            self.inner.state.send_if_modified(|state| {
                state.link_up = true;
                false
            });
            self.probe_now().await
        } else {
            let state = ConnectivityState {
                is_online: false,
                quality: ConnectionQuality::Offline,
                link_up: false,
                last_check: Some(self.inner.clock.now_ms()),
                latency_ms: None,
            };
            self.publish(state.clone());
            state
        }
    }

    /// Probe the remote once, bounded by the probe timeout
    pub async fn probe_now(&self) -> ConnectivityState {
        let link_up = self.inner.state.borrow().link_up;
        if !link_up {
            return self.state();
        }

        let timeout = Duration::from_millis(self.inner.config.probe_timeout_ms);
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, self.inner.remote.probe()).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(timeout)),
        };
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let state = match result {
            Ok(()) => ConnectivityState {
                is_online: true,
                quality: if latency_ms > self.inner.config.poor_latency_ms {
                    ConnectionQuality::Poor
                } else {
                    ConnectionQuality::Good
                },
                link_up,
                last_check: Some(self.inner.clock.now_ms()),
                latency_ms: Some(latency_ms),
            },
            Err(error) => {
                tracing::debug!(%error, "Connectivity probe failed");
                ConnectivityState {
                    is_online: false,
                    quality: ConnectionQuality::Offline,
                    link_up,
                    last_check: Some(self.inner.clock.now_ms()),
                    latency_ms: None,
                }
            }
        };
        self.publish(state.clone());
        state
    }

    /// Store the latest reading; watchers wake only when `is_online` or
    /// `quality` moved
    fn publish(&self, state: ConnectivityState) {
        self.inner.state.send_if_modified(|current| {
            let changed =
                current.is_online != state.is_online || current.quality != state.quality;
            if current.is_online != state.is_online {
                tracing::info!(
                    online = state.is_online,
                    quality = %state.quality,
                    "Connectivity changed"
                );
            }
            *current = state;
            changed
        });
    }

    /// Probe periodically until the handle is dropped
    pub fn spawn(&self) -> MonitorHandle {
        let token = CancellationToken::new();
        let monitor = self.clone();
        let cancel = token.clone();
        let period = Duration::from_secs(self.inner.config.probe_interval_secs.max(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.probe_now().await;
                    }
                }
            }
            tracing::debug!("Connectivity monitor stopped");
        });

        MonitorHandle {
            _guard: token.drop_guard(),
            task,
        }
    }
}

/// Stops the probe loop when dropped
pub struct MonitorHandle {
    _guard: DropGuard,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop probing and wait for the loop to exit
    pub async fn shutdown(self) {
        let Self {
            _guard: guard,
            task,
        } = self;
        drop(guard);
        let _ = task.await;
    }
}

use crate::config::StreamConfig;
use crate::error::{Result, ThetaError};
use crate::stream::{StopSignal, StreamingStats};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Restart policy for consecutive streaming sessions
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    pub restart_on_exit: bool,
    pub restart_delay: Duration,
    /// Unlimited when `None`
    pub max_restarts: Option<u32>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_on_exit: true,
            restart_delay: Duration::from_secs(5),
            max_restarts: None,
        }
    }
}

impl From<&StreamConfig> for SupervisorConfig {
    fn from(config: &StreamConfig) -> Self {
        Self {
            restart_on_exit: config.restart_on_exit,
            restart_delay: Duration::from_secs(config.restart_delay_seconds),
            max_restarts: config.max_restarts,
        }
    }
}

/// Totals across every session run by a supervisor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SupervisorStats {
    pub sessions: u32,
    pub failures: u32,
    pub restarts: u32,
    pub frames_received: u64,
    pub last_error: Option<String>,
}

/// Runs blocking streaming sessions one after another, restarting them when
/// they end until stopped.
pub struct StreamSupervisor {
    config: SupervisorConfig,
    cancellation_token: CancellationToken,
    current_stop: Mutex<Option<StopSignal>>,
    stats: Mutex<SupervisorStats>,
}

impl StreamSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            cancellation_token: CancellationToken::new(),
            current_stop: Mutex::new(None),
            stats: Mutex::new(SupervisorStats::default()),
        }
    }

    /// Stop the running session and prevent further restarts
    pub fn stop(&self) {
        info!("Stopping stream supervisor");
        self.cancellation_token.cancel();
        if let Some(stop) = self.current_stop.lock().as_ref() {
            stop.stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn stats(&self) -> SupervisorStats {
        self.stats.lock().clone()
    }

    fn record_outcome(&self, outcome: &Result<StreamingStats>) {
        let mut stats = self.stats.lock();
        stats.sessions += 1;
        match outcome {
            Ok(session) => {
                stats.frames_received += session.frames_received;
                info!(
                    "Streaming session {} ended: {} frames ({:.1} fps average)",
                    stats.sessions,
                    session.frames_received,
                    session.average_fps()
                );
            }
            Err(e) => {
                stats.failures += 1;
                stats.last_error = Some(e.to_string());
                warn!("Streaming session {} failed: {}", stats.sessions, e);
            }
        }
    }

    /// Run `session` on the blocking pool until stopped or the restart policy
    /// gives up.
    ///
    /// Each run gets a fresh [`StopSignal`] which [`stop`](Self::stop) fires.
    pub async fn run<F>(&self, session: F) -> Result<SupervisorStats>
    where
        F: Fn(StopSignal) -> Result<StreamingStats> + Send + Sync + 'static,
    {
        let session = Arc::new(session);

        loop {
            let stop = StopSignal::new();
            *self.current_stop.lock() = Some(stop.clone());

            // stop() may have run before the signal was published
            if self.cancellation_token.is_cancelled() {
                break;
            }

            debug!("Starting streaming session");
            let session_fn = Arc::clone(&session);
            let outcome = tokio::task::spawn_blocking(move || session_fn(stop))
                .await
                .map_err(|e| {
                    error!("Streaming session task failed: {}", e);
                    ThetaError::system(format!("Streaming session task failed: {}", e))
                })?;

            *self.current_stop.lock() = None;
            self.record_outcome(&outcome);

            if self.cancellation_token.is_cancelled() {
                break;
            }

            if !self.config.restart_on_exit {
                debug!("Restart on exit disabled");
                break;
            }

            let restarts = self.stats.lock().restarts;
            if let Some(max) = self.config.max_restarts {
                if restarts >= max {
                    warn!("Giving up after {} restarts", restarts);
                    break;
                }
            }

            info!("Restarting stream in {:?}", self.config.restart_delay);
            tokio::select! {
                _ = self.cancellation_token.cancelled() => break,
                _ = tokio::time::sleep(self.config.restart_delay) => {}
            }

            self.stats.lock().restarts += 1;
        }

        *self.current_stop.lock() = None;
        Ok(self.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UvcError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn session_stats(frames: u64) -> StreamingStats {
        StreamingStats {
            frames_received: frames,
            ..StreamingStats::default()
        }
    }

    fn quick_restarts(max_restarts: Option<u32>) -> SupervisorConfig {
        SupervisorConfig {
            restart_on_exit: true,
            restart_delay: Duration::from_millis(10),
            max_restarts,
        }
    }

    #[tokio::test]
    async fn test_single_session_without_restart() {
        let supervisor = StreamSupervisor::new(SupervisorConfig {
            restart_on_exit: false,
            ..SupervisorConfig::default()
        });

        let stats = supervisor.run(|_| Ok(session_stats(42))).await.unwrap();

        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.restarts, 0);
        assert_eq!(stats.frames_received, 42);
    }

    #[tokio::test]
    async fn test_restart_limit() {
        let supervisor = StreamSupervisor::new(quick_restarts(Some(2)));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let stats = supervisor
            .run(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(UvcError::NoDevice.into())
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.sessions, 3);
        assert_eq!(stats.failures, 3);
        assert_eq!(stats.restarts, 2);
        assert_eq!(stats.last_error.as_deref(), Some("USB video error: No such device"));
    }

    #[tokio::test]
    async fn test_stop_interrupts_running_session() {
        let supervisor = Arc::new(StreamSupervisor::new(quick_restarts(None)));

        let stopper = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                supervisor.stop();
            })
        };

        let started = Instant::now();
        let stats = supervisor
            .run(|stop| {
                stop.wait_timeout(Duration::from_secs(30));
                Ok(session_stats(7))
            })
            .await
            .unwrap();
        stopper.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(supervisor.is_stopped());
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.frames_received, 7);
    }

    #[tokio::test]
    async fn test_stop_during_restart_delay() {
        let supervisor = Arc::new(StreamSupervisor::new(SupervisorConfig {
            restart_on_exit: true,
            restart_delay: Duration::from_secs(30),
            max_restarts: None,
        }));

        let stopper = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                supervisor.stop();
            })
        };

        let started = Instant::now();
        let stats = supervisor.run(|_| Ok(session_stats(1))).await.unwrap();
        stopper.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.restarts, 0);
    }

    #[tokio::test]
    async fn test_stopped_before_run() {
        let supervisor = StreamSupervisor::new(quick_restarts(None));
        supervisor.stop();

        let stats = supervisor
            .run(|_| -> Result<StreamingStats> { panic!("session must not start") })
            .await
            .unwrap();

        assert_eq!(stats.sessions, 0);
    }

    #[test]
    fn test_config_from_stream_section() {
        let stream = crate::config::ThetaConfig::default().stream;
        let config = SupervisorConfig::from(&stream);

        assert!(config.restart_on_exit);
        assert_eq!(config.restart_delay, Duration::from_secs(5));
        assert_eq!(config.max_restarts, None);
    }
}

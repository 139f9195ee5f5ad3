//! Reconnect supervisor
//!
//! Owns the connect → subscribe → consume loop against the broker:
//!
//! ```text
//! Stopped → Connecting → Subscribed ─(error)→ Backoff → Connecting → ...
//!                                      └─(too many consecutive failures)→ Failed
//! ```
//!
//! A successful subscribe resets the consecutive-failure counter. Messages are
//! handled one at a time in receipt order; `stop()` lets the in-flight message
//! finish before the session is released.

use event_bus::retry::BackoffPolicy;
use event_bus::{BusConnector, BusError, BusSession};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::connection::LiveConnection;
use crate::metrics::IngestMetrics;
use crate::processor::MessageProcessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Connecting,
    Subscribed,
    Backoff { attempt: u32, delay: Duration },
    Failed,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Stopped => "stopped",
            SupervisorState::Connecting => "connecting",
            SupervisorState::Subscribed => "subscribed",
            SupervisorState::Backoff { .. } => "backoff",
            SupervisorState::Failed => "failed",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    #[error("broker unreachable after {attempts} consecutive failures: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

enum SessionEnd {
    Stopped,
    Failed { error: String, subscribed: bool },
}

pub struct ReconnectSupervisor {
    connector: Arc<dyn BusConnector>,
    processor: MessageProcessor,
    connection: LiveConnection,
    metrics: IngestMetrics,
    policy: BackoffPolicy,
    filters: Vec<String>,
    running: AtomicBool,
    state: watch::Sender<SupervisorState>,
    shutdown: watch::Sender<bool>,
}

impl ReconnectSupervisor {
    pub fn new(
        connector: Arc<dyn BusConnector>,
        processor: MessageProcessor,
        connection: LiveConnection,
        metrics: IngestMetrics,
        policy: BackoffPolicy,
        filters: Vec<String>,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Stopped);
        let (shutdown, _) = watch::channel(false);
        Self {
            connector,
            processor,
            connection,
            metrics,
            policy,
            filters,
            running: AtomicBool::new(false),
            state,
            shutdown,
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the supervised loop until `stop()` or fatal exhaustion
    ///
    /// Calling this while the loop is already running returns `Ok(())` at once.
    /// A stop request is final: once stopped, `start()` returns immediately.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("Reconnect supervisor already running");
            return Ok(());
        }

        let result = self.run().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Request a graceful stop; the current message finishes first
    pub fn stop(&self) {
        tracing::info!("Reconnect supervisor stop requested");
        self.shutdown.send_replace(true);
    }

    async fn run(&self) -> Result<(), SupervisorError> {
        let mut shutdown = self.shutdown.subscribe();
        let mut failures: u32 = 0;

        tracing::info!(
            filters = ?self.filters,
            max_retries = self.policy.max_retries,
            "Reconnect supervisor started"
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            self.set_state(SupervisorState::Connecting);
            let error = match self.run_session(&mut shutdown).await {
                SessionEnd::Stopped => break,
                SessionEnd::Failed { error, subscribed } => {
                    if subscribed {
                        failures = 0;
                    }
                    error
                }
            };

            failures += 1;
            if !self.policy.allows(failures) {
                tracing::error!(
                    attempts = failures,
                    error = %error,
                    "Broker reconnect attempts exhausted, giving up"
                );
                self.set_state(SupervisorState::Failed);
                return Err(SupervisorError::RetriesExhausted {
                    attempts: failures,
                    last_error: error,
                });
            }

            let delay = self.policy.delay_for(failures);
            tracing::warn!(
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Broker session failed, backing off"
            );
            self.set_state(SupervisorState::Backoff {
                attempt: failures,
                delay,
            });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(&mut shutdown) => break,
            }
        }

        self.set_state(SupervisorState::Stopped);
        tracing::info!("Reconnect supervisor stopped");
        Ok(())
    }

    async fn run_session(&self, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        let mut session = match self.connector.connect().await {
            Ok(session) => session,
            Err(e) => {
                return SessionEnd::Failed {
                    error: e.to_string(),
                    subscribed: false,
                }
            }
        };

        for filter in &self.filters {
            if let Err(e) = session.subscribe(filter).await {
                release(session.as_mut()).await;
                return SessionEnd::Failed {
                    error: e.to_string(),
                    subscribed: false,
                };
            }
        }

        self.connection.set(session.publisher()).await;
        self.metrics.connections_active.set(1);
        self.set_state(SupervisorState::Subscribed);
        tracing::info!(filters = ?self.filters, "Subscribed to broker topics");

        let end = loop {
            let next = tokio::select! {
                biased;
                _ = stopped(shutdown) => break SessionEnd::Stopped,
                next = session.next_message() => next,
            };

            match next {
                // Handled outside the select so a stop request never cuts it short
                Ok(Some(msg)) => {
                    self.processor.handle(&msg).await;
                }
                Ok(None) => {
                    break SessionEnd::Failed {
                        error: "broker closed the session".to_string(),
                        subscribed: true,
                    }
                }
                // A late subscription refusal means the session never really subscribed
                Err(e) => {
                    break SessionEnd::Failed {
                        subscribed: !matches!(e, BusError::SubscribeError(_)),
                        error: e.to_string(),
                    }
                }
            }
        };

        self.connection.clear().await;
        self.metrics.connections_active.set(0);
        release(session.as_mut()).await;
        end
    }

    fn set_state(&self, state: SupervisorState) {
        self.state.send_replace(state);
    }
}

async fn release(session: &mut dyn BusSession) {
    if let Err(e) = session.disconnect().await {
        tracing::debug!(error = %e, "Broker disconnect failed");
    }
}

// Resolves once shutdown has been requested
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_labels() {
        assert_eq!(SupervisorState::Subscribed.to_string(), "subscribed");
        assert_eq!(
            SupervisorState::Backoff {
                attempt: 2,
                delay: Duration::from_secs(2)
            }
            .as_str(),
            "backoff"
        );
    }

    #[test]
    fn test_exhaustion_message_names_attempts() {
        let err = SupervisorError::RetriesExhausted {
            attempts: 6,
            last_error: "Connection error: refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "broker unreachable after 6 consecutive failures: Connection error: refused"
        );
    }
}

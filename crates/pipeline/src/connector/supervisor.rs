use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cryptics_metadata::ConnectConfig;
use tokio::select;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::control::ConnectControl;
use super::descriptor::{config_diff, ConnectorDescriptor};
use super::state::{apply_event, ConnectorEvent, ConnectorState};
use crate::backoff::Backoff;
use crate::error::ConnectorError;
use crate::metrics;

/// Polling and retry settings for one connector
#[derive(Debug, Clone, Copy)]
pub struct ConnectorSettings {
    pub poll_interval: Duration,
    pub ready_timeout: Duration,
    pub submission: Backoff,
    /// Consecutive automatic restarts before a failed connector is left alone
    pub max_restarts: u32,
}

impl ConnectorSettings {
    pub fn from_config(config: &ConnectConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            ready_timeout: Duration::from_millis(config.ready_timeout_ms),
            submission: Backoff::for_submission(config),
            max_restarts: config.submit_attempts,
        }
    }
}

/// Declares one connector on a connect worker and supervises it.
///
/// The connector state is owned here; everything else observes it
/// through `subscribe()`.
pub struct SinkConnector {
    descriptor: ConnectorDescriptor,
    config: BTreeMap<String, String>,
    control: Arc<dyn ConnectControl>,
    settings: ConnectorSettings,
    state: watch::Sender<ConnectorState>,
}

impl SinkConnector {
    pub fn new(
        descriptor: ConnectorDescriptor,
        config: BTreeMap<String, String>,
        control: Arc<dyn ConnectControl>,
        settings: ConnectorSettings,
    ) -> Self {
        let (state, _) = watch::channel(ConnectorState::Unsubmitted);
        metrics::set_connector_state(&descriptor.name, ConnectorState::Unsubmitted);
        Self {
            descriptor,
            config,
            control,
            settings,
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ConnectorDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> ConnectorState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectorState> {
        self.state.subscribe()
    }

    fn transition(&self, event: ConnectorEvent) -> ConnectorState {
        let current = self.state();
        match apply_event(current, &event) {
            Ok(next) => {
                if next != current {
                    info!(connector = %self.name(), from = %current, to = %next, event = %event, "connector state changed");
                    if next == ConnectorState::Degraded {
                        warn!(connector = %self.name(), event = %event, "connector degraded, still draining");
                    }
                    self.state.send_replace(next);
                    metrics::set_connector_state(self.name(), next);
                }
                next
            }
            Err(e) => {
                debug!(connector = %self.name(), error = %e, "ignoring event");
                current
            }
        }
    }

    /// Submit the descriptor, idempotently: the deployed config is compared
    /// field by field and only replaced when it differs. Submission is
    /// retried with backoff; exhaustion leaves the connector failed.
    pub async fn declare(&self) -> Result<ConnectorState, ConnectorError> {
        let backoff = self.settings.submission;
        let mut attempt = 1;
        loop {
            match self.submit_if_changed().await {
                Ok(changed) => {
                    // An unchanged running connector keeps its state
                    if changed || self.state() == ConnectorState::Unsubmitted {
                        return Ok(self.transition(ConnectorEvent::SubmissionAccepted));
                    }
                    return Ok(self.state());
                }
                Err(e) if attempt >= backoff.max_attempts() => {
                    error!(connector = %self.name(), attempts = attempt, error = %e, "connector submission failed");
                    self.transition(ConnectorEvent::SubmissionRejected {
                        reason: e.to_string(),
                    });
                    return Err(ConnectorError::Submission {
                        name: self.name().to_string(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = backoff.delay(attempt);
                    warn!(connector = %self.name(), attempt, delay_ms = delay.as_millis() as u64, error = %e, "connector submission failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn submit_if_changed(&self) -> Result<bool, ConnectorError> {
        if let Some(deployed) = self.control.get_config(self.name()).await? {
            let differing = config_diff(&self.config, &deployed);
            if differing.is_empty() {
                debug!(connector = %self.name(), "deployed config is current");
                return Ok(false);
            }
            info!(connector = %self.name(), fields = ?differing, "deployed config differs, resubmitting");
        }
        self.control.put_config(self.name(), &self.config).await?;
        info!(connector = %self.name(), topic = %self.descriptor.topic, table = %self.descriptor.table, "connector submitted");
        Ok(true)
    }

    /// Poll the worker once and apply what it reports
    pub async fn poll(&self) -> Result<ConnectorState, ConnectorError> {
        let status = self.control.status(self.name()).await?;
        Ok(match status.classify() {
            Some(event) => self.transition(event),
            None => self.state(),
        })
    }

    /// Ask the worker to restart the connector and its failed tasks
    pub async fn restart(&self) -> Result<ConnectorState, ConnectorError> {
        self.control.restart(self.name()).await?;
        Ok(self.transition(ConnectorEvent::RestartRequested))
    }

    /// Poll at a fixed interval until the connector is running or degraded.
    /// Fails with `Timeout` once `budget` is spent and with `Failed` if the
    /// worker reports the connector failed.
    pub async fn wait_until_ready(&self, budget: Duration) -> Result<ConnectorState, ConnectorError> {
        let wait = async {
            let mut ticker = interval(self.settings.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.poll().await {
                    Ok(state) if state.is_serving() => return Ok(state),
                    Ok(ConnectorState::Failed) => {
                        return Err(ConnectorError::Failed {
                            name: self.name().to_string(),
                            reason: "worker reported failure while waiting for readiness"
                                .to_string(),
                        })
                    }
                    Ok(state) => debug!(connector = %self.name(), state = %state, "connector not ready yet"),
                    Err(e) => warn!(connector = %self.name(), error = %e, "status poll failed"),
                }
            }
        };

        match tokio::time::timeout(budget, wait).await {
            Ok(result) => result,
            Err(_) => Err(ConnectorError::Timeout {
                name: self.name().to_string(),
                waited_ms: budget.as_millis() as u64,
                state: self.state(),
            }),
        }
    }

    /// Keep polling until shutdown. Failed connectors are restarted, up to
    /// `max_restarts` times in a row.
    pub async fn supervise(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut restarts = 0u32;

        loop {
            select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(connector = %self.name(), "connector supervisor stopping");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.poll().await {
                        Ok(ConnectorState::Failed) if restarts < self.settings.max_restarts => {
                            restarts += 1;
                            warn!(connector = %self.name(), restarts, "connector failed, restarting");
                            if let Err(e) = self.restart().await {
                                warn!(connector = %self.name(), error = %e, "restart request failed");
                            }
                        }
                        Ok(ConnectorState::Failed) => {}
                        Ok(ConnectorState::Running) => restarts = 0,
                        Ok(_) => {}
                        Err(e) => warn!(connector = %self.name(), error = %e, "status poll failed"),
                    }
                }
            }
        }
    }
}

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::sleep,
};

use crate::config::PaymentConfig;

use super::{PaymentError, PaymentGateway, PaymentIntent, PaymentMethod, PaymentOutcome, PaymentStatus, Verification};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait before each check. Zero means check immediately.
    pub interval: Duration,
    pub max_attempts: u32,
    /// How long `Success` stays visible before completion is reported.
    pub success_dwell: Duration,
}

impl PollPolicy {
    pub fn mpesa(config: &PaymentConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.mpesa_poll_interval_secs),
            max_attempts: config.mpesa_max_attempts.max(1),
            success_dwell: Duration::from_millis(config.success_dwell_ms),
        }
    }

    pub fn card(config: &PaymentConfig) -> Self {
        Self {
            interval: Duration::ZERO,
            max_attempts: config.card_max_attempts.max(1),
            success_dwell: Duration::from_millis(config.success_dwell_ms),
        }
    }

    pub fn for_method(method: PaymentMethod, config: &PaymentConfig) -> Self {
        match method {
            PaymentMethod::Mpesa => Self::mpesa(config),
            PaymentMethod::Card => Self::card(config),
        }
    }
}

/// Owns a running verification poll. Dropping the handle cancels the poll.
pub struct PaymentHandle {
    intent_id: String,
    status: watch::Receiver<PaymentStatus>,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<Result<PaymentOutcome, PaymentError>>,
}

impl PaymentHandle {
    pub fn intent_id(&self) -> &str {
        &self.intent_id
    }

    pub fn status(&self) -> PaymentStatus {
        self.status.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<PaymentStatus> {
        self.status.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn cancel(&self) {
        let _ = self.shutdown.send(());
    }

    /// Resolves once the poll reaches a terminal state and, on success,
    /// after the dwell delay.
    pub async fn wait(mut self) -> Result<PaymentOutcome, PaymentError> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(PaymentError::Cancelled),
            Err(e) => Err(PaymentError::Other(e.to_string())),
        }
    }
}

pub fn spawn_poll(gateway: Arc<dyn PaymentGateway>, mut intent: PaymentIntent, policy: PollPolicy) -> PaymentHandle {
    intent.status = PaymentStatus::Processing;

    let (status_tx, status_rx) = watch::channel(PaymentStatus::Processing);
    let (shutdown, shutdown_rx) = broadcast::channel(1);
    let intent_id = intent.id.clone();

    let task = tokio::spawn(run_poll(gateway, intent, policy, status_tx, shutdown_rx));

    PaymentHandle {
        intent_id,
        status: status_rx,
        shutdown,
        task,
    }
}

async fn run_poll(
    gateway: Arc<dyn PaymentGateway>,
    mut intent: PaymentIntent,
    policy: PollPolicy,
    status: watch::Sender<PaymentStatus>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<PaymentOutcome, PaymentError> {
    let reference = intent
        .transaction_id
        .clone()
        .ok_or_else(|| PaymentError::Other("Payment has no transaction reference".into()))?;

    let fail = |intent: &mut PaymentIntent, reason: String| {
        let failed = PaymentStatus::Failed { reason };
        intent.status = failed.clone();
        status.send_replace(failed);
    };

    for attempt in 1..=policy.max_attempts {
        if !policy.interval.is_zero() {
            tokio::select! {
                _ = sleep(policy.interval) => {}
                _ = shutdown.recv() => {
                    info!("Payment {} cancelled before check {}", intent.id, attempt);
                    return Err(PaymentError::Cancelled);
                }
            }
        }

        debug!("Verifying payment {} ({}/{})", intent.id, attempt, policy.max_attempts);

        let verification = tokio::select! {
            result = gateway.verify(intent.method, &reference) => result,
            _ = shutdown.recv() => {
                info!("Payment {} cancelled during check {}", intent.id, attempt);
                return Err(PaymentError::Cancelled);
            }
        };

        match verification {
            Ok(Verification::Success) => {
                info!("Payment {} confirmed after {} checks", intent.id, attempt);
                intent.status = PaymentStatus::Success;
                status.send_replace(PaymentStatus::Success);

                tokio::select! {
                    _ = sleep(policy.success_dwell) => {}
                    // already paid; cancelling only skips the dwell
                    _ = shutdown.recv() => {}
                }

                return Ok(PaymentOutcome {
                    intent,
                    attempts: attempt,
                });
            }
            Ok(Verification::Pending) => continue,
            Ok(Verification::Failed(reason)) => {
                warn!("Payment {} declined: {}", intent.id, reason);
                fail(&mut intent, reason.clone());
                return Err(PaymentError::Declined(reason));
            }
            Err(e) => {
                error!("Payment {} verification error: {}", intent.id, e);
                fail(&mut intent, e.to_string());
                return Err(PaymentError::Api(e));
            }
        }
    }

    warn!(
        "Payment {} not confirmed after {} checks",
        intent.id, policy.max_attempts
    );
    fail(&mut intent, "Payment verification timed out".to_string());
    Err(PaymentError::VerificationTimeout {
        attempts: policy.max_attempts,
    })
}

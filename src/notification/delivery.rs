use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    DeliveryError, DeviceContext, DeviceNotificationStep, MailDelivery, NotificationTransport,
    PushDelivery,
};
use crate::{
    chain::TaskChain,
    queue::{Task, TaskError, TaskHandler, TaskKind},
    store::{Datastore, Transaction},
};

/// Hands `deliver_push` and `deliver_mail` tasks to the transport
pub struct DeliveryHandler {
    store: Arc<dyn Datastore>,
    transport: Arc<dyn NotificationTransport>,
}

impl DeliveryHandler {
    pub fn new(store: Arc<dyn Datastore>, transport: Arc<dyn NotificationTransport>) -> Self {
        Self { store, transport }
    }

    /// Restarts the device chain over the tokens not tried yet, consuming
    /// the failed push in the same commit. Returns whether a token was left.
    async fn fall_back(&self, task: &Task, fallback: DeviceContext) -> Result<bool, TaskError> {
        let remaining: Vec<String> = self
            .store
            .get_user_config(&fallback.user_id)
            .await?
            .map(|config| config.deliverable_tokens())
            .unwrap_or_default()
            .into_iter()
            .filter(|token| !fallback.tried.contains(token))
            .collect();
        if remaining.is_empty() {
            return Ok(false);
        }

        let user_id = fallback.user_id.clone();
        let left = remaining.len();
        let mut tx = Transaction::consuming(task.id);
        TaskChain::<DeviceNotificationStep>::start(&mut tx, fallback, remaining)?;
        self.store.commit(tx).await?;
        info!(task_id = %task.id, user_id = %user_id, left, "Push failed, trying the next device");
        Ok(true)
    }

    async fn deliver_push(&self, task: &Task) -> Result<(), TaskError> {
        let delivery: PushDelivery = task.payload()?;
        let failure = match self.transport.send_push(&delivery).await {
            Ok(()) => {
                Self::delivered(task);
                return Ok(());
            }
            Err(e @ DeliveryError::Unavailable(_)) => return Err(TaskError::retryable(e.to_string())),
            Err(e) => e,
        };

        if let Some(fallback) = delivery.fallback {
            if self.fall_back(task, fallback).await? {
                return Ok(());
            }
        }
        Self::settle_failure(task, failure)
    }

    async fn deliver_mail(&self, task: &Task) -> Result<(), TaskError> {
        let delivery: MailDelivery = task.payload()?;
        match self.transport.send_mail(&delivery).await {
            Ok(()) => {
                Self::delivered(task);
                Ok(())
            }
            Err(e @ DeliveryError::Unavailable(_)) => Err(TaskError::retryable(e.to_string())),
            Err(e) => Self::settle_failure(task, e),
        }
    }

    fn delivered(task: &Task) {
        debug!(task_id = %task.id, kind = %task.kind, "Notification delivered");
    }

    fn settle_failure(task: &Task, failure: DeliveryError) -> Result<(), TaskError> {
        match failure {
            DeliveryError::InvalidToken(token) => {
                warn!(task_id = %task.id, token = %token, "Dropping notification for invalid token");
                Ok(())
            }
            e => Err(TaskError::fatal(e.to_string())),
        }
    }
}

#[async_trait]
impl TaskHandler for DeliveryHandler {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        match task.kind {
            TaskKind::DeliverPush => self.deliver_push(task).await,
            TaskKind::DeliverMail => self.deliver_mail(task).await,
            other => Err(TaskError::fatal(format!("cannot deliver a {other} task"))),
        }
    }

    fn name(&self) -> &'static str {
        "DeliveryHandler"
    }
}

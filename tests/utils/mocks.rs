use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use settlement::notification::{
    DeliveryError, MailDelivery, NotificationTransport, PushDelivery,
};

// ============================================================================
// Mock Infrastructure
// ============================================================================

/// Records every delivery; tokens can be scripted to fail
#[derive(Clone, Default)]
pub struct RecordingTransport {
    pushes: Arc<RwLock<Vec<PushDelivery>>>,
    mails: Arc<RwLock<Vec<MailDelivery>>>,
    failures: Arc<RwLock<HashMap<String, FailureMode>>>,
}

#[derive(Clone, Copy, Debug)]
pub enum FailureMode {
    InvalidToken,
    /// Unavailable this many times, then delivered
    UnavailableTimes(u32),
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_token(&self, token: &str, mode: FailureMode) {
        self.failures.write().await.insert(token.to_string(), mode);
    }

    pub async fn pushes(&self) -> Vec<PushDelivery> {
        self.pushes.read().await.clone()
    }

    pub async fn pushed_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .pushes
            .read()
            .await
            .iter()
            .map(|p| p.token.clone())
            .collect();
        tokens.sort();
        tokens
    }

    pub async fn mails(&self) -> Vec<MailDelivery> {
        self.mails.read().await.clone()
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send_push(&self, delivery: &PushDelivery) -> Result<(), DeliveryError> {
        let mut failures = self.failures.write().await;
        match failures.get_mut(&delivery.token) {
            Some(FailureMode::InvalidToken) => {
                return Err(DeliveryError::InvalidToken(delivery.token.clone()))
            }
            Some(FailureMode::UnavailableTimes(left)) if *left > 0 => {
                *left -= 1;
                return Err(DeliveryError::Unavailable("push service down".to_string()));
            }
            _ => {}
        }
        drop(failures);

        self.pushes.write().await.push(delivery.clone());
        Ok(())
    }

    async fn send_mail(&self, delivery: &MailDelivery) -> Result<(), DeliveryError> {
        self.mails.write().await.push(delivery.clone());
        Ok(())
    }
}

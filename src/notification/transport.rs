use async_trait::async_trait;
use tracing::info;

use super::{DeliveryError, MailDelivery, PushDelivery};

/// Push and mail delivery backends
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send_push(&self, delivery: &PushDelivery) -> Result<(), DeliveryError>;

    async fn send_mail(&self, delivery: &MailDelivery) -> Result<(), DeliveryError>;
}

/// Logs deliveries instead of sending them
#[derive(Debug, Default)]
pub struct TracingTransport;

#[async_trait]
impl NotificationTransport for TracingTransport {
    async fn send_push(&self, delivery: &PushDelivery) -> Result<(), DeliveryError> {
        info!(
            user_id = %delivery.user_id,
            token = %delivery.token,
            title = %delivery.payload.title,
            click_action = %delivery.payload.click_action,
            "Push notification"
        );
        Ok(())
    }

    async fn send_mail(&self, delivery: &MailDelivery) -> Result<(), DeliveryError> {
        info!(
            user_id = %delivery.user_id,
            address = %delivery.address,
            subject = %delivery.subject,
            "Mail notification"
        );
        Ok(())
    }
}

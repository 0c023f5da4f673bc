pub mod delivery;
pub mod errors;
pub mod fanout;
pub mod models;
pub mod transport;

pub use delivery::DeliveryHandler;
pub use errors::{DeliveryError, NotificationError};
pub use fanout::{DeviceNotificationStep, NotificationFanout, UserNotificationStep, MESSAGE_TAG};
pub use models::{
    DeviceContext, DeviceToken, MailConfig, MailDelivery, NewMessage, PushDelivery, PushPayload, UserConfig,
};
pub use transport::{NotificationTransport, TracingTransport};

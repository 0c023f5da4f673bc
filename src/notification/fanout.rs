use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{DeviceContext, MailDelivery, NewMessage, NotificationError, PushDelivery, PushPayload};
use crate::{
    chain::{ChainStep, StepControl, TaskChain},
    config::{ConfigLoader, DeliveryPolicy},
    game::{Game, Member},
    queue::{Task, TaskError, TaskKind},
    store::{Datastore, Transaction},
};

pub const MESSAGE_TAG: &str = "settlement-new-message";

pub fn notification_title(game: &Game, recipient: &Member, message: &NewMessage) -> String {
    let mut channel: Vec<String> = message
        .channel_members
        .iter()
        .map(|n| Game::abbreviate(n))
        .collect();
    channel.sort();
    format!(
        "{} ({}): {} => {}",
        game.desc,
        recipient.nation,
        Game::abbreviate(&message.sender),
        channel.join(",")
    )
}

pub fn truncate_body(body: &str, limit: usize) -> String {
    if body.chars().count() > limit {
        let mut truncated: String = body.chars().take(limit).collect();
        truncated.push_str("...");
        truncated
    } else {
        body.to_string()
    }
}

pub fn click_action(message: &NewMessage) -> String {
    format!(
        "/Game/{}/Channel/{}/Messages",
        message.game_id,
        message.channel()
    )
}

pub fn push_payload(game: &Game, recipient: &Member, message: &NewMessage, body_limit: usize) -> PushPayload {
    PushPayload {
        title: notification_title(game, recipient, message),
        body: truncate_body(&message.body, body_limit),
        tag: MESSAGE_TAG.to_string(),
        click_action: click_action(message),
    }
}

async fn load_game(store: &dyn Datastore, game_id: &str) -> Result<Game, NotificationError> {
    store
        .get_game(game_id)
        .await?
        .map(|g| g.value)
        .ok_or_else(|| NotificationError::GameNotFound(game_id.to_string()))
}

/// Outer step: one recipient user
pub struct UserNotificationStep {
    store: Arc<dyn Datastore>,
}

#[async_trait]
impl ChainStep for UserNotificationStep {
    type Context = NewMessage;
    type Item = String;

    const KIND: TaskKind = TaskKind::NotifyUsers;

    fn name(&self) -> &'static str {
        "UserNotificationStep"
    }

    async fn step(
        &self,
        message: &NewMessage,
        user_id: &String,
        tx: &mut Transaction,
        _handled: &mut BTreeSet<String>,
    ) -> Result<StepControl, TaskError> {
        let game = load_game(self.store.as_ref(), &message.game_id).await?;
        let Some(member) = game.member_by_user(user_id) else {
            warn!(user_id = %user_id, game_id = %game.id, "Recipient is not a member, skipping");
            return Ok(StepControl::Continue);
        };
        let Some(config) = self.store.get_user_config(user_id).await? else {
            info!(user_id = %user_id, "Recipient has no configuration, skipping");
            return Ok(StepControl::Continue);
        };

        let tokens = config.deliverable_tokens();
        let device_count = tokens.len();
        TaskChain::<DeviceNotificationStep>::start(
            tx,
            DeviceContext::new(message.clone(), user_id.clone()),
            tokens,
        )?;

        if let Some(address) = config.mail_address() {
            let subject = notification_title(&game, member, message);
            let body = format!(
                "{}\n\nVisit {} to reply.",
                message.body,
                click_action(message)
            );
            tx.enqueue(Task::new(
                TaskKind::DeliverMail,
                &MailDelivery {
                    user_id: user_id.clone(),
                    address: address.to_string(),
                    subject,
                    body,
                },
            )?);
        }

        debug!(
            user_id = %user_id,
            devices = device_count,
            mail = config.mail_address().is_some(),
            "Scheduled notifications for recipient"
        );
        Ok(StepControl::Continue)
    }
}

/// Inner step: one device token of one recipient
pub struct DeviceNotificationStep {
    store: Arc<dyn Datastore>,
    config: Arc<ConfigLoader>,
}

#[async_trait]
impl ChainStep for DeviceNotificationStep {
    type Context = DeviceContext;
    type Item = String;

    const KIND: TaskKind = TaskKind::NotifyDevices;

    fn name(&self) -> &'static str {
        "DeviceNotificationStep"
    }

    async fn step(
        &self,
        context: &DeviceContext,
        token: &String,
        tx: &mut Transaction,
        handled: &mut BTreeSet<String>,
    ) -> Result<StepControl, TaskError> {
        if handled.contains(token) || context.tried.contains(token) {
            debug!(token = %token, "Token already notified");
            return Ok(StepControl::Continue);
        }

        // Tokens may have been disabled or removed since the chain started
        let config = self.store.get_user_config(&context.user_id).await?;
        if config
            .as_ref()
            .and_then(|c| c.deliverable_token(token))
            .is_none()
        {
            debug!(user_id = %context.user_id, token = %token, "Token no longer deliverable");
            return Ok(StepControl::Continue);
        }

        let game = load_game(self.store.as_ref(), &context.message.game_id).await?;
        let Some(member) = game.member_by_user(&context.user_id) else {
            warn!(user_id = %context.user_id, "Recipient left the game, skipping");
            return Ok(StepControl::Stop);
        };
        let settings = self.config.get().await.map_err(NotificationError::from)?;
        let policy = settings.notifications.policy;

        // Under first-device the delivery handler resumes with the other
        // tokens if this send fails
        let fallback = (policy == DeliveryPolicy::FirstDevice).then(|| {
            let mut next = context.clone();
            next.tried.insert(token.clone());
            next
        });

        tx.enqueue(Task::new(
            TaskKind::DeliverPush,
            &PushDelivery {
                user_id: context.user_id.clone(),
                token: token.clone(),
                payload: push_payload(
                    &game,
                    member,
                    &context.message,
                    settings.notifications.body_limit,
                ),
                fallback,
            },
        )?);
        handled.insert(token.clone());

        match policy {
            DeliveryPolicy::AllDevices => Ok(StepControl::Continue),
            DeliveryPolicy::FirstDevice => Ok(StepControl::Stop),
        }
    }
}

/// Schedules new-message notifications: a chain over recipients whose steps
/// start a chain over each recipient's devices.
pub struct NotificationFanout {
    store: Arc<dyn Datastore>,
    users: Arc<TaskChain<UserNotificationStep>>,
    devices: Arc<TaskChain<DeviceNotificationStep>>,
}

impl NotificationFanout {
    pub fn new(store: Arc<dyn Datastore>, config: Arc<ConfigLoader>) -> Self {
        let users = TaskChain::new(
            UserNotificationStep {
                store: Arc::clone(&store),
            },
            Arc::clone(&store),
        );
        let devices = TaskChain::new(
            DeviceNotificationStep {
                store: Arc::clone(&store),
                config,
            },
            Arc::clone(&store),
        );
        Self {
            store,
            users: Arc::new(users),
            devices: Arc::new(devices),
        }
    }

    /// Handler for `notify_users` tasks
    pub fn user_chain(&self) -> Arc<TaskChain<UserNotificationStep>> {
        Arc::clone(&self.users)
    }

    /// Handler for `notify_devices` tasks
    pub fn device_chain(&self) -> Arc<TaskChain<DeviceNotificationStep>> {
        Arc::clone(&self.devices)
    }

    /// Channel members other than the sender who have not muted the sender
    pub fn recipients(game: &Game, message: &NewMessage) -> Vec<String> {
        message
            .channel_members
            .iter()
            .filter(|nation| **nation != message.sender)
            .filter_map(|nation| game.member_by_nation(nation))
            .filter(|member| !member.has_muted(&message.sender))
            .map(|member| member.user_id.clone())
            .collect()
    }

    /// Adds the notification chain for `message` to an open transaction, e.g.
    /// the one creating the message. Returns the recipients.
    pub fn start(
        tx: &mut Transaction,
        game: &Game,
        message: &NewMessage,
    ) -> Result<Vec<String>, NotificationError> {
        let recipients = Self::recipients(game, message);
        TaskChain::<UserNotificationStep>::start(tx, message.clone(), recipients.clone())?;
        Ok(recipients)
    }

    #[instrument(skip(self, message), fields(game_id = %message.game_id, message_id = %message.id))]
    pub async fn message_created(&self, message: &NewMessage) -> Result<Vec<String>, NotificationError> {
        let game = load_game(self.store.as_ref(), &message.game_id).await?;

        let mut tx = Transaction::new();
        let recipients = Self::start(&mut tx, &game, message)?;
        if recipients.is_empty() {
            info!("Message had no unmuted recipients, skipping notifications");
            return Ok(recipients);
        }

        self.store.commit(tx).await?;
        info!(recipients = ?recipients, "Scheduled message notifications");
        Ok(recipients)
    }
}

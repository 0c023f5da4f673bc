use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::game::Nation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceToken {
    pub value: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub app: String,
}

impl DeviceToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            disabled: false,
            app: String::new(),
        }
    }

    pub fn is_deliverable(&self) -> bool {
        !self.disabled && !self.value.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailConfig {
    pub address: String,
    pub enabled: bool,
}

/// Per-user notification channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    pub user_id: String,
    #[serde(default)]
    pub push_tokens: Vec<DeviceToken>,
    #[serde(default)]
    pub mail: Option<MailConfig>,
}

impl UserConfig {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            push_tokens: Vec::new(),
            mail: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.push_tokens.push(DeviceToken::new(token));
        self
    }

    pub fn with_mail(mut self, address: impl Into<String>) -> Self {
        self.mail = Some(MailConfig {
            address: address.into(),
            enabled: true,
        });
        self
    }

    pub fn deliverable_tokens(&self) -> Vec<String> {
        self.push_tokens
            .iter()
            .filter(|t| t.is_deliverable())
            .map(|t| t.value.clone())
            .collect()
    }

    pub fn deliverable_token(&self, value: &str) -> Option<&DeviceToken> {
        self.push_tokens
            .iter()
            .find(|t| t.value == value && t.is_deliverable())
    }

    pub fn mail_address(&self) -> Option<&str> {
        self.mail
            .as_ref()
            .filter(|m| m.enabled && !m.address.is_empty())
            .map(|m| m.address.as_str())
    }
}

/// A chat message that was just created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub id: String,
    pub game_id: String,
    pub sender: Nation,
    pub channel_members: Vec<Nation>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    /// Channel name as used in links, e.g. "Austria,England"
    pub fn channel(&self) -> String {
        let mut members = self.channel_members.clone();
        members.sort();
        members.join(",")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub tag: String,
    pub click_action: String,
}

/// Context of the per-device chain of one recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceContext {
    pub message: NewMessage,
    pub user_id: String,
    /// Tokens an earlier chain of this lineage already sent to
    #[serde(default)]
    pub tried: BTreeSet<String>,
}

impl DeviceContext {
    pub fn new(message: NewMessage, user_id: impl Into<String>) -> Self {
        Self {
            message,
            user_id: user_id.into(),
            tried: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushDelivery {
    pub user_id: String,
    pub token: String,
    pub payload: PushPayload,
    /// Where to pick up when this token fails and the user should still get
    /// one push. Set under the first-device policy only.
    #[serde(default)]
    pub fallback: Option<DeviceContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailDelivery {
    pub user_id: String,
    pub address: String,
    pub subject: String,
    pub body: String,
}

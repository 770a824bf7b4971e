//! Outbound notifications. Reconcilers only see the [`Notifier`] trait; the
//! production implementation posts to Discord webhooks.

use crate::error::NotifyError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

pub const DEFAULT_WEBHOOK: &str = "default";

pub const COLOR_RED: u32 = 0xff_00_00;
pub const COLOR_BLUE: u32 = 0x00_00_ff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    SeniorStaff,
    Online,
    Traffic,
}

impl Channel {
    pub const fn webhook_name(self) -> &'static str {
        match self {
            Self::SeniorStaff => "seniorstaff",
            Self::Online => "online",
            Self::Traffic => "traffic",
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.webhook_name())
    }
}

/// Discord webhook execute payload, trimmed to the fields used here.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub color: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl Message {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            embeds: Vec::new(),
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            content: None,
            embeds: vec![embed],
        }
    }
}

impl Embed {
    pub fn new(title: impl Into<String>, color: u32) -> Self {
        Self {
            title: title.into(),
            color,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn inline_field(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.to_string(),
            inline: true,
        });
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send(&self, channel: Channel, message: Message) -> Result<(), NotifyError>;
}

/// Sends `message` and logs a failure instead of returning it.
pub async fn notify(notifier: &dyn Notifier, channel: Channel, message: Message) {
    if let Err(e) = notifier.send(channel, message).await {
        warn!(error = ?e, %channel, "failed to send notification");
    }
}

/// Sends notifications in the background so a slow webhook never holds up the
/// pass that raised them.
#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    tasks: TaskTracker,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            tasks: TaskTracker::new(),
        }
    }

    pub fn dispatch(&self, channel: Channel, message: Message) {
        let notifier = Arc::clone(&self.notifier);
        self.tasks.spawn(async move {
            notify(notifier.as_ref(), channel, message).await;
        });
    }

    /// Waits until every notification dispatched so far has been sent or has
    /// failed.
    pub async fn flush(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

pub struct DiscordNotifier {
    client: Client,
    webhooks: HashMap<String, String>,
}

impl DiscordNotifier {
    pub fn new(client: Client, webhooks: HashMap<String, String>) -> Self {
        Self { client, webhooks }
    }

    /// Webhook URL for `channel`, falling back to the `default` webhook.
    fn webhook_for(&self, channel: Channel) -> Option<&str> {
        let configured = |name: &str| {
            self.webhooks
                .get(name)
                .map(String::as_str)
                .filter(|url| !url.is_empty())
        };

        configured(channel.webhook_name()).or_else(|| {
            debug!(%channel, "no webhook configured for channel, using default");
            configured(DEFAULT_WEBHOOK)
        })
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, channel: Channel, message: Message) -> Result<(), NotifyError> {
        let url = self
            .webhook_for(channel)
            .ok_or_else(|| NotifyError::WebhookNotConfigured(channel.to_string()))?;

        self.client
            .post(url)
            .json(&message)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<(Channel, Message)>>,
        fail: bool,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        /// Records every message but reports each send as failed.
        pub fn failing() -> Self {
            Self {
                sent: Mutex::default(),
                fail: true,
            }
        }

        pub fn sent(&self) -> Vec<(Channel, Message)> {
            self.sent.lock().clone()
        }

        pub fn sent_to(&self, channel: Channel) -> Vec<Message> {
            self.sent
                .lock()
                .iter()
                .filter(|(c, _)| *c == channel)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    /// A webhook that never answers.
    #[derive(Default)]
    pub struct StalledNotifier;

    #[async_trait]
    impl Notifier for StalledNotifier {
        async fn send(&self, _channel: Channel, _message: Message) -> Result<(), NotifyError> {
            std::future::pending().await
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, channel: Channel, message: Message) -> Result<(), NotifyError> {
            self.sent.lock().push((channel, message));
            if self.fail {
                Err(NotifyError::WebhookNotConfigured(channel.to_string()))
            } else {
                Ok(())
            }
        }
    }
}

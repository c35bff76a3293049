//! Notification fan-out: webhook and SMTP notifiers, queue dispatcher
//!
//! `AlertManager` only ever `try_send`s onto a bounded queue. The
//! dispatcher drains it and delivers to every notifier with a per-send
//! timeout; failures are logged and dropped.

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{NotificationConfig, SmtpConfig};
use crate::types::Alert;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("webhook delivery failed: {0}")]
    Webhook(String),
    #[error("invalid address {0}")]
    Address(String),
    #[error("smtp delivery failed: {0}")]
    Smtp(String),
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// Alert lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Opened,
    Resolved,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub alert: Alert,
}

impl Notification {
    pub fn subject(&self) -> String {
        match self.kind {
            NotificationKind::Opened => format!(
                "[{}] {} is failing",
                self.alert.severity, self.alert.component
            ),
            NotificationKind::Resolved => format!("[RESOLVED] {} recovered", self.alert.component),
        }
    }

    pub fn body(&self) -> String {
        let mut body = format!(
            "{}\n\nalert: {}\ncomponent: {}\nopened: {}\n",
            self.alert.message, self.alert.id, self.alert.component, self.alert.created_at
        );
        if let Some(resolved_at) = self.alert.resolved_at {
            body.push_str(&format!(
                "resolved: {} (open {}s)\n",
                resolved_at,
                self.alert.duration_secs()
            ));
        }
        for (k, v) in &self.alert.metadata {
            body.push_str(&format!("{}: {}\n", k, v));
        }
        body
    }
}

/// Trait for notification channels
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

// ============================================================================
// Webhook
// ============================================================================

/// POSTs the notification as JSON
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotifyError::Webhook(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(NotifyError::Webhook(format!("{} returned {}", self.url, resp.status())));
        }
        Ok(())
    }
}

// ============================================================================
// SMTP
// ============================================================================

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl SmtpNotifier {
    pub fn from_config(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|_| NotifyError::Address(config.from.clone()))?;
        let to = config
            .to
            .iter()
            .map(|addr| addr.parse().map_err(|_| NotifyError::Address(addr.clone())))
            .collect::<Result<Vec<Mailbox>, _>>()?;

        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| NotifyError::Smtp(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        builder = builder.port(config.port);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }
}

#[async_trait::async_trait]
impl Notifier for SmtpNotifier {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(notification.subject());
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        let email = builder
            .body(notification.body())
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;
        Ok(())
    }
}

/// Notifiers enabled by the configuration; absent or incomplete channels are skipped
pub fn notifiers_from_config(
    config: &NotificationConfig,
    client: &reqwest::Client,
) -> Vec<Arc<dyn Notifier>> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();

    match &config.webhook {
        Some(webhook) => {
            info!(url = %webhook.url, "Webhook notifications enabled");
            notifiers.push(Arc::new(WebhookNotifier::new(client.clone(), webhook.url.clone())));
        }
        None => info!("Webhook notifications disabled (no URL configured)"),
    }

    match &config.smtp {
        Some(smtp) if smtp.is_complete() => match SmtpNotifier::from_config(smtp) {
            Ok(n) => {
                info!(host = %smtp.host, port = smtp.port, recipients = smtp.to.len(), "Email notifications enabled");
                notifiers.push(Arc::new(n));
            }
            Err(e) => warn!(error = %e, "Email notifications disabled: invalid SMTP settings"),
        },
        Some(_) => info!("Email notifications disabled (SMTP host, sender or recipients missing)"),
        None => info!("Email notifications disabled (no SMTP host configured)"),
    }

    notifiers
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Drains the notification queue and delivers to every notifier
pub struct NotificationDispatcher {
    rx: mpsc::Receiver<Notification>,
    notifiers: Vec<Arc<dyn Notifier>>,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        rx: mpsc::Receiver<Notification>,
        notifiers: Vec<Arc<dyn Notifier>>,
        timeout: Duration,
    ) -> Self {
        Self {
            rx,
            notifiers,
            timeout,
        }
    }

    /// Run until cancelled or the queue closes
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(notifiers = self.notifiers.len(), "Notification dispatcher started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(notification) => self.deliver(&notification).await,
                    None => break,
                },
            }
        }
        info!("Notification dispatcher stopped");
    }

    async fn deliver(&self, notification: &Notification) {
        for notifier in &self.notifiers {
            let result = tokio::time::timeout(self.timeout, notifier.send(notification))
                .await
                .unwrap_or(Err(NotifyError::Timeout(self.timeout)));
            match result {
                Ok(()) => debug!(
                    notifier = notifier.name(),
                    alert = %notification.alert.id,
                    "Notification delivered"
                ),
                Err(e) => warn!(
                    notifier = notifier.name(),
                    alert = %notification.alert.id,
                    error = %e,
                    "Notification delivery failed"
                ),
            }
        }
    }
}

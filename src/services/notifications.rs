//! Notification manager, delivery channels, and rate limiting.
//!
//! The manager subscribes to the event bus, maps engine events to
//! notifications, filters them through its rules (minimum level plus
//! data-field conditions), and fans out to every channel a matching rule
//! names. A token-bucket limiter caps global throughput.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{Notification, NotificationLevel};
use crate::domain::ports::NotificationChannel;
use crate::services::event_bus::{EngineEvent, EventCategory, EventHandler};

/// Token bucket: at most `max_tokens` allowances per `refill_interval`.
///
/// `allow` never blocks; callers drop the notification when the bucket is
/// empty.
pub struct TokenBucketRateLimiter {
    max_tokens: u32,
    refill_interval: Duration,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucketRateLimiter {
    pub fn new(max_tokens: u32, refill_interval: Duration) -> Self {
        Self {
            max_tokens,
            refill_interval,
            state: Mutex::new(BucketState {
                tokens: max_tokens,
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn allow(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.last_refill.elapsed() >= self.refill_interval {
            state.tokens = self.max_tokens;
            state.last_refill = Instant::now();
        }
        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }
}

/// A routing rule: notifications at or above `min_level` whose data
/// matches every condition go to the named channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRule {
    pub name: String,
    pub min_level: NotificationLevel,
    #[serde(default)]
    pub conditions: Vec<DataCondition>,
    pub channels: Vec<String>,
}

/// An equality condition on a top-level data field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCondition {
    pub field: String,
    pub equals: String,
}

impl NotificationRule {
    pub fn matches(&self, notification: &Notification) -> bool {
        if notification.level < self.min_level {
            return false;
        }
        self.conditions.iter().all(|condition| {
            notification
                .data
                .get(&condition.field)
                .map(|value| match value {
                    Value::String(s) => s == &condition.equals,
                    other => other.to_string() == condition.equals,
                })
                .unwrap_or(false)
        })
    }
}

/// Appends each notification as a JSON line.
pub struct FileChannel {
    name: String,
    path: PathBuf,
}

impl FileChannel {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl NotificationChannel for FileChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> EngineResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut line = serde_json::to_vec(notification)?;
        line.push(b'\n');
        file.write_all(&line).await?;
        Ok(())
    }
}

/// Prints to the terminal with level-appropriate styling.
pub struct ConsoleChannel {
    name: String,
}

impl ConsoleChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl NotificationChannel for ConsoleChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> EngineResult<()> {
        let styled = match notification.level {
            NotificationLevel::Info => console::style(&notification.title).green(),
            NotificationLevel::Warning => console::style(&notification.title).yellow(),
            NotificationLevel::Error | NotificationLevel::Critical => {
                console::style(&notification.title).red().bold()
            }
        };
        println!(
            "[{}] {styled}: {}",
            notification.level.as_str(),
            notification.message
        );
        Ok(())
    }
}

/// POSTs the JSON payload to an HTTP endpoint; non-2xx is an error.
pub struct WebhookChannel {
    name: String,
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        headers: HashMap<String, String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            headers,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> EngineResult<()> {
        let mut request = self.client.post(&self.url).json(notification);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Executor(format!("webhook {}: {e}", self.name)))?;
        if !response.status().is_success() {
            return Err(EngineError::Executor(format!(
                "webhook {} returned {}",
                self.name,
                response.status()
            )));
        }
        Ok(())
    }
}

/// Posts a Slack-formatted message to an incoming-webhook URL.
pub struct SlackChannel {
    name: String,
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(name: impl Into<String>, webhook_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            webhook_url: webhook_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> EngineResult<()> {
        let emoji = match notification.level {
            NotificationLevel::Info => ":information_source:",
            NotificationLevel::Warning => ":warning:",
            NotificationLevel::Error => ":x:",
            NotificationLevel::Critical => ":rotating_light:",
        };
        let payload = serde_json::json!({
            "text": format!("{emoji} *{}*\n{}", notification.title, notification.message),
        });
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| EngineError::Executor(format!("slack {}: {e}", self.name)))?;
        if !response.status().is_success() {
            return Err(EngineError::Executor(format!(
                "slack {} returned {}",
                self.name,
                response.status()
            )));
        }
        Ok(())
    }
}

/// Pipes a plain-text message to a sendmail-compatible command.
pub struct EmailChannel {
    name: String,
    recipient: String,
    sendmail_command: String,
}

impl EmailChannel {
    pub fn new(name: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            recipient: recipient.into(),
            sendmail_command: "sendmail -t".to_string(),
        }
    }

    pub fn with_sendmail_command(mut self, command: impl Into<String>) -> Self {
        self.sendmail_command = command.into();
        self
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> EngineResult<()> {
        let body = format!(
            "To: {}\nSubject: [{}] {}\n\n{}\n",
            self.recipient,
            notification.level.as_str(),
            notification.title,
            notification.message
        );
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.sendmail_command)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::Executor(format!("email {}: {e}", self.name)))?;
        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(body.as_bytes()).await?;
        }
        let status = child
            .wait()
            .await
            .map_err(|e| EngineError::Executor(format!("email {}: {e}", self.name)))?;
        if !status.success() {
            return Err(EngineError::Executor(format!(
                "email {}: sendmail exited with {status}",
                self.name
            )));
        }
        Ok(())
    }
}

/// Routes notifications to channels through rules under a global rate
/// limiter.
pub struct NotificationManager {
    channels: RwLock<HashMap<String, Arc<dyn NotificationChannel>>>,
    rules: RwLock<Vec<NotificationRule>>,
    limiter: TokenBucketRateLimiter,
}

impl NotificationManager {
    pub fn new(limiter: TokenBucketRateLimiter) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            rules: RwLock::new(Vec::new()),
            limiter,
        }
    }

    pub async fn add_channel(&self, channel: Arc<dyn NotificationChannel>) -> EngineResult<()> {
        let name = channel.name().to_string();
        if name.trim().is_empty() {
            return Err(EngineError::Config(
                "channel name must not be empty".to_string(),
            ));
        }
        let mut channels = self.channels.write().await;
        if channels.contains_key(&name) {
            return Err(EngineError::Config(format!(
                "channel already registered: {name}"
            )));
        }
        channels.insert(name, channel);
        Ok(())
    }

    pub async fn add_rule(&self, rule: NotificationRule) -> EngineResult<()> {
        let channels = self.channels.read().await;
        for channel in &rule.channels {
            if !channels.contains_key(channel) {
                return Err(EngineError::Config(format!(
                    "rule {} references unknown channel {channel}",
                    rule.name
                )));
            }
        }
        drop(channels);
        let mut rules = self.rules.write().await;
        rules.push(rule);
        Ok(())
    }

    /// Dispatch one notification. Returns the names of the channels that
    /// accepted it.
    pub async fn notify(&self, notification: &Notification) -> Vec<String> {
        if !self.limiter.allow().await {
            warn!(title = %notification.title, "notification dropped by rate limiter");
            return Vec::new();
        }

        let targets: HashSet<String> = {
            let rules = self.rules.read().await;
            rules
                .iter()
                .filter(|rule| rule.matches(notification))
                .flat_map(|rule| rule.channels.iter().cloned())
                .collect()
        };
        if targets.is_empty() {
            debug!(title = %notification.title, "no rule matched notification");
            return Vec::new();
        }

        let channels = self.channels.read().await;
        let mut delivered = Vec::new();
        for name in targets {
            let Some(channel) = channels.get(&name) else {
                continue;
            };
            match channel.send(notification).await {
                Ok(()) => delivered.push(name),
                Err(e) => warn!(channel = %name, error = %e, "notification delivery failed"),
            }
        }
        delivered.sort();
        delivered
    }
}

#[async_trait]
impl EventHandler for NotificationManager {
    fn name(&self) -> &str {
        "notification-manager"
    }

    fn categories(&self) -> Vec<EventCategory> {
        vec![
            EventCategory::Execution,
            EventCategory::Rollback,
            EventCategory::Drift,
            EventCategory::Policy,
            EventCategory::Approval,
            EventCategory::Authorization,
        ]
    }

    async fn handle(&self, event: &EngineEvent) -> EngineResult<()> {
        if let Some(notification) = notification_for(event) {
            self.notify(&notification).await;
        }
        Ok(())
    }
}

/// Map an engine event onto a notification, or `None` for events too
/// chatty to notify on.
fn notification_for(event: &EngineEvent) -> Option<Notification> {
    match event {
        EngineEvent::ExecutionCompleted { module, summary } => {
            let level = if summary.failed > 0 {
                NotificationLevel::Error
            } else {
                NotificationLevel::Info
            };
            Some(
                Notification::new(
                    format!("Apply finished for {module}"),
                    format!(
                        "{} succeeded, {} failed, {} skipped",
                        summary.succeeded, summary.failed, summary.skipped
                    ),
                    level,
                )
                .with_data(serde_json::json!({"module": module}))
                .with_tag("apply"),
            )
        }
        EngineEvent::RollbackCompleted {
            module,
            succeeded,
            failed,
        } => Some(
            Notification::new(
                format!("Rollback ran for {module}"),
                format!("{succeeded} reverted, {failed} failed"),
                if *failed > 0 {
                    NotificationLevel::Critical
                } else {
                    NotificationLevel::Warning
                },
            )
            .with_data(serde_json::json!({"module": module}))
            .with_tag("rollback"),
        ),
        EngineEvent::DriftDetected {
            module,
            drifted,
            total,
        } => Some(
            Notification::new(
                format!("Drift detected in {module}"),
                format!("{drifted} of {total} resources diverged"),
                NotificationLevel::Warning,
            )
            .with_data(serde_json::json!({"module": module}))
            .with_tag("drift"),
        ),
        EngineEvent::PolicyViolated {
            module,
            policy,
            message,
            ..
        } => Some(
            Notification::new(
                format!("Policy violation in {module}"),
                format!("{policy}: {message}"),
                NotificationLevel::Warning,
            )
            .with_data(serde_json::json!({"module": module, "policy": policy}))
            .with_tag("policy"),
        ),
        EngineEvent::AuthorizationDenied { user, permission } => Some(
            Notification::new(
                "Authorization denied".to_string(),
                format!("{user} attempted {permission}"),
                NotificationLevel::Warning,
            )
            .with_data(serde_json::json!({"user": user}))
            .with_tag("rbac"),
        ),
        _ => None,
    }
}

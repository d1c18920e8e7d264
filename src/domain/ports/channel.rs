//! NotificationChannel port.

use async_trait::async_trait;

use crate::domain::errors::EngineResult;
use crate::domain::models::Notification;

/// A delivery target for notifications (file, console, webhook, Slack,
/// email).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name referenced by notification rules.
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> EngineResult<()>;
}

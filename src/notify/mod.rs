//! Desktop notifications and the new-card prompt built on them.
//!
//! A [`NotificationManager`] forwards notifications to one registered
//! [`NotificationBackend`]. Backends answer asynchronously: every reply is
//! queued on the manager's channel and picked up with
//! [`NotificationManager::next_reply`] or
//! [`NotificationManager::try_next_reply`].
//!
//! The manager is an ordinary value. Whoever composes the system owns it
//! and passes it to the components that notify.

mod card;
mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;

pub use card::{CardChoice, CardDecision, CardNotifier, MemoryStore, SeenCardsStore};
pub use memory::{MemoryBackend, MemoryBackendHandle};

use crate::CoreError;

/// Identifies a notification sent through a [`NotificationManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotificationId(pub(crate) u64);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "notification#{}", self.0)
    }
}

/// A notification to show.
///
/// # Example
///
/// ```
/// use stream_core::notify::Notification;
///
/// let notification = Notification::new("A new card has been connected.", "Use it?")
///     .icon("audio-card-symbolic")
///     .action("0", "Yes")
///     .action("1", "No");
/// assert_eq!(notification.actions.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Notification {
    /// Icon name.
    pub icon: Option<String>,
    /// One-line summary.
    pub summary: String,
    /// Longer body text.
    pub body: String,
    /// Action keys and their labels.
    pub actions: BTreeMap<String, String>,
    /// How long to show it. `None` leaves it to the backend.
    pub expire_timeout: Option<Duration>,
    /// A shown notification this one takes the place of.
    pub replaces: Option<NotificationId>,
}

impl Notification {
    /// Creates a notification with a summary and a body.
    pub fn new(summary: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    /// Sets the icon name.
    #[must_use]
    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Adds an action the user can pick.
    #[must_use]
    pub fn action(mut self, key: impl Into<String>, label: impl Into<String>) -> Self {
        self.actions.insert(key.into(), label.into());
        self
    }

    /// Hides the notification after `timeout`.
    #[must_use]
    pub fn expire_after(mut self, timeout: Duration) -> Self {
        self.expire_timeout = Some(timeout);
        self
    }

    /// Shows the notification in place of `id`.
    #[must_use]
    pub fn replaces(mut self, id: NotificationId) -> Self {
        self.replaces = Some(id);
        self
    }
}

/// How a notification ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyKind {
    /// The backend failed to show it.
    Error,
    /// It was cancelled through the manager.
    Cancelled,
    /// The user closed it.
    Dismissed,
    /// Its timeout elapsed.
    Expired,
    /// The user picked the action with this key.
    ActionInvoked(String),
}

/// A backend's answer to a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationReply {
    /// The notification this answers.
    pub id: NotificationId,
    /// What happened.
    pub kind: ReplyKind,
}

/// Where a backend delivers its replies.
#[derive(Debug, Clone)]
pub struct ReplySender {
    tx: mpsc::UnboundedSender<NotificationReply>,
}

impl ReplySender {
    /// Queues a reply for the manager. Replies after the manager is gone
    /// are dropped.
    pub fn send(&self, id: NotificationId, kind: ReplyKind) {
        if self.tx.send(NotificationReply { id, kind }).is_err() {
            tracing::debug!(%id, "notification manager gone, reply dropped");
        }
    }
}

/// Shows notifications somewhere: a desktop service, a tray icon, a log.
pub trait NotificationBackend: Send {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Shows `notification`. The outcome is reported through `replies`,
    /// possibly much later.
    fn send(&mut self, id: NotificationId, notification: &Notification, replies: &ReplySender);

    /// Withdraws a shown notification. A backend that still shows it
    /// replies [`ReplyKind::Cancelled`].
    fn cancel(&mut self, id: NotificationId, replies: &ReplySender);
}

/// Dispatches notifications to the registered backend.
pub struct NotificationManager {
    backend: Option<Box<dyn NotificationBackend>>,
    next_id: u64,
    replies: ReplySender,
    reply_rx: mpsc::UnboundedReceiver<NotificationReply>,
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationManager {
    /// Creates a manager without a backend.
    pub fn new() -> Self {
        let (tx, reply_rx) = mpsc::unbounded_channel();
        Self {
            backend: None,
            next_id: 1,
            replies: ReplySender { tx },
            reply_rx,
        }
    }

    /// Registers the backend. Only one may be registered at a time.
    pub fn register_backend(
        &mut self,
        backend: impl NotificationBackend + 'static,
    ) -> Result<(), CoreError> {
        if let Some(current) = &self.backend {
            tracing::error!(
                current = current.name(),
                "a notification backend is already registered"
            );
            return Err(CoreError::BackendAlreadyRegistered);
        }
        tracing::debug!(backend = backend.name(), "notification backend registered");
        self.backend = Some(Box::new(backend));
        Ok(())
    }

    /// Removes the backend and hands it back.
    pub fn unregister_backend(&mut self) -> Option<Box<dyn NotificationBackend>> {
        self.backend.take()
    }

    /// Returns `true` if a backend is registered.
    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Shows a notification. The reply arrives later on the reply channel.
    pub fn send(&mut self, notification: &Notification) -> Result<NotificationId, CoreError> {
        let Some(backend) = self.backend.as_mut() else {
            tracing::error!("no notification backend is registered");
            return Err(CoreError::NoBackend);
        };
        let id = NotificationId(self.next_id);
        self.next_id += 1;
        backend.send(id, notification, &self.replies);
        Ok(id)
    }

    /// Withdraws a notification.
    pub fn cancel(&mut self, id: NotificationId) -> Result<(), CoreError> {
        let Some(backend) = self.backend.as_mut() else {
            tracing::error!("no notification backend is registered");
            return Err(CoreError::NoBackend);
        };
        backend.cancel(id, &self.replies);
        Ok(())
    }

    /// Waits for the next reply.
    pub async fn next_reply(&mut self) -> Option<NotificationReply> {
        self.reply_rx.recv().await
    }

    /// Returns a queued reply without waiting.
    pub fn try_next_reply(&mut self) -> Option<NotificationReply> {
        self.reply_rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SilentBackend;

    impl NotificationBackend for SilentBackend {
        fn name(&self) -> &str {
            "silent"
        }

        fn send(&mut self, id: NotificationId, _n: &Notification, replies: &ReplySender) {
            replies.send(id, ReplyKind::Expired);
        }

        fn cancel(&mut self, _id: NotificationId, _replies: &ReplySender) {}
    }

    #[test]
    fn test_send_without_backend() {
        let mut manager = NotificationManager::new();
        let result = manager.send(&Notification::new("hi", ""));
        assert!(matches!(result, Err(CoreError::NoBackend)));
        assert!(matches!(
            manager.cancel(NotificationId(1)),
            Err(CoreError::NoBackend)
        ));
    }

    #[test]
    fn test_single_backend() {
        let mut manager = NotificationManager::new();
        manager.register_backend(SilentBackend).unwrap();
        assert!(matches!(
            manager.register_backend(SilentBackend),
            Err(CoreError::BackendAlreadyRegistered)
        ));

        let backend = manager.unregister_backend().unwrap();
        assert_eq!(backend.name(), "silent");
        assert!(!manager.has_backend());
        manager.register_backend(SilentBackend).unwrap();
    }

    #[tokio::test]
    async fn test_replies_are_delivered() {
        let mut manager = NotificationManager::new();
        manager.register_backend(SilentBackend).unwrap();

        let first = manager.send(&Notification::new("a", "")).unwrap();
        let second = manager.send(&Notification::new("b", "")).unwrap();
        assert_ne!(first, second);

        let reply = manager.next_reply().await.unwrap();
        assert_eq!(reply.id, first);
        assert_eq!(reply.kind, ReplyKind::Expired);
        assert_eq!(manager.try_next_reply().unwrap().id, second);
        assert!(manager.try_next_reply().is_none());
    }

    #[test]
    fn test_notification_builder() {
        let n = Notification::new("s", "b")
            .icon("i")
            .action("0", "Yes")
            .expire_after(Duration::from_secs(5))
            .replaces(NotificationId(3));
        assert_eq!(n.icon.as_deref(), Some("i"));
        assert_eq!(n.actions.get("0").map(String::as_str), Some("Yes"));
        assert_eq!(n.expire_timeout, Some(Duration::from_secs(5)));
        assert_eq!(n.replaces, Some(NotificationId(3)));
        assert_eq!(NotificationId(3).to_string(), "notification#3");
    }
}

//! In-process notification backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Notification, NotificationBackend, NotificationId, ReplyKind, ReplySender};

#[derive(Default)]
struct Shown {
    displaying: BTreeMap<NotificationId, (Notification, ReplySender)>,
    history: Vec<Notification>,
}

/// A backend that keeps notifications in memory.
///
/// Useful headless and in tests: the paired [`MemoryBackendHandle`] plays
/// the user, picking actions or dismissing what is shown.
pub struct MemoryBackend {
    shown: Arc<Mutex<Shown>>,
}

/// The user's side of a [`MemoryBackend`].
#[derive(Clone)]
pub struct MemoryBackendHandle {
    shown: Arc<Mutex<Shown>>,
}

impl MemoryBackend {
    /// Creates a backend and the handle that answers its notifications.
    pub fn new() -> (Self, MemoryBackendHandle) {
        let shown = Arc::new(Mutex::new(Shown::default()));
        (
            Self {
                shown: shown.clone(),
            },
            MemoryBackendHandle { shown },
        )
    }
}

impl NotificationBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn send(&mut self, id: NotificationId, notification: &Notification, replies: &ReplySender) {
        let mut shown = self.shown.lock();
        if let Some(replaced) = notification.replaces {
            shown.displaying.remove(&replaced);
        }
        shown
            .displaying
            .insert(id, (notification.clone(), replies.clone()));
        shown.history.push(notification.clone());
    }

    fn cancel(&mut self, id: NotificationId, replies: &ReplySender) {
        if self.shown.lock().displaying.remove(&id).is_some() {
            replies.send(id, ReplyKind::Cancelled);
        }
    }
}

impl MemoryBackendHandle {
    /// Notifications currently shown, oldest first.
    pub fn displaying(&self) -> Vec<(NotificationId, Notification)> {
        self.shown
            .lock()
            .displaying
            .iter()
            .map(|(id, (n, _))| (*id, n.clone()))
            .collect()
    }

    /// Every notification ever shown.
    pub fn history(&self) -> Vec<Notification> {
        self.shown.lock().history.clone()
    }

    /// Picks action `key` on `id`. Returns `false` if `id` is not shown or
    /// has no such action.
    pub fn invoke(&self, id: NotificationId, key: &str) -> bool {
        let mut shown = self.shown.lock();
        let has_action = shown
            .displaying
            .get(&id)
            .is_some_and(|(n, _)| n.actions.contains_key(key));
        if !has_action {
            return false;
        }
        close(&mut shown, id, ReplyKind::ActionInvoked(key.to_string()))
    }

    /// Closes `id` as if the user dismissed it.
    pub fn dismiss(&self, id: NotificationId) -> bool {
        let mut shown = self.shown.lock();
        close(&mut shown, id, ReplyKind::Dismissed)
    }

    /// Closes `id` as if its timeout elapsed.
    pub fn expire(&self, id: NotificationId) -> bool {
        let mut shown = self.shown.lock();
        close(&mut shown, id, ReplyKind::Expired)
    }
}

fn close(shown: &mut Shown, id: NotificationId, kind: ReplyKind) -> bool {
    match shown.displaying.remove(&id) {
        Some((_, replies)) => {
            replies.send(id, kind);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationManager;

    #[test]
    fn test_invoke_action() {
        let (backend, user) = MemoryBackend::new();
        let mut manager = NotificationManager::new();
        manager.register_backend(backend).unwrap();

        let id = manager
            .send(&Notification::new("s", "b").action("0", "Yes"))
            .unwrap();
        assert_eq!(user.displaying().len(), 1);
        assert!(!user.invoke(id, "7"));
        assert!(user.invoke(id, "0"));
        assert!(!user.invoke(id, "0"));

        let reply = manager.try_next_reply().unwrap();
        assert_eq!(reply.kind, ReplyKind::ActionInvoked("0".to_string()));
        assert!(user.displaying().is_empty());
    }

    #[test]
    fn test_cancel_replies_once() {
        let (backend, user) = MemoryBackend::new();
        let mut manager = NotificationManager::new();
        manager.register_backend(backend).unwrap();

        let id = manager.send(&Notification::new("s", "b")).unwrap();
        manager.cancel(id).unwrap();
        manager.cancel(id).unwrap();

        assert_eq!(manager.try_next_reply().unwrap().kind, ReplyKind::Cancelled);
        assert!(manager.try_next_reply().is_none());
        assert!(!user.dismiss(id));
    }

    #[test]
    fn test_replacement_hides_previous() {
        let (backend, user) = MemoryBackend::new();
        let mut manager = NotificationManager::new();
        manager.register_backend(backend).unwrap();

        let first = manager.send(&Notification::new("one", "")).unwrap();
        let second = manager
            .send(&Notification::new("two", "").replaces(first))
            .unwrap();

        let displaying = user.displaying();
        assert_eq!(displaying.len(), 1);
        assert_eq!(displaying[0].0, second);
        assert_eq!(user.history().len(), 2);
        assert!(user.expire(second));
        assert_eq!(manager.try_next_reply().unwrap().kind, ReplyKind::Expired);
    }
}

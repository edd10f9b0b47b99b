//! Asks whether a newly connected card should become the default.

use std::collections::HashMap;

use super::{Notification, NotificationId, NotificationManager, NotificationReply, ReplyKind};
use crate::card::Card;
use crate::core::Core;
use crate::id::{DeviceId, EndpointId};
use crate::state::{Direction, EndpointFlags};
use crate::CoreError;

const ACTION_YES: &str = "0";
const ACTION_NO: &str = "1";

/// What the user decided about a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardChoice {
    /// Make the card the default whenever it shows up.
    Always,
    /// Leave the defaults alone.
    Never,
}

/// Remembers choices by card description.
pub trait SeenCardsStore: Send {
    /// The saved choice for `card`, if any.
    fn load(&self, card: &str) -> Option<CardChoice>;

    /// Saves the choice for `card`.
    fn save(&mut self, card: &str, choice: CardChoice);
}

/// A [`SeenCardsStore`] that forgets everything on exit.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    choices: HashMap<String, CardChoice>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SeenCardsStore for MemoryStore {
    fn load(&self, card: &str) -> Option<CardChoice> {
        self.choices.get(card).copied()
    }

    fn save(&mut self, card: &str, choice: CardChoice) {
        self.choices.insert(card.to_string(), choice);
    }
}

/// What [`CardNotifier::card_added`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardDecision {
    /// The user is being asked.
    Asked(NotificationId),
    /// The saved choice made the card the default.
    MadeDefault,
    /// The saved choice was to leave it alone.
    Ignored,
}

#[derive(Debug)]
struct PendingCard {
    description: String,
    sink: Option<DeviceId>,
    source: Option<DeviceId>,
}

/// Offers to make each newly connected card the default, once per card.
pub struct CardNotifier<S: SeenCardsStore> {
    store: S,
    pending: HashMap<NotificationId, PendingCard>,
}

impl<S: SeenCardsStore> CardNotifier<S> {
    /// Creates a notifier remembering choices in `store`.
    pub fn new(store: S) -> Self {
        Self {
            store,
            pending: HashMap::new(),
        }
    }

    /// The choice store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Number of questions still waiting for an answer.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Handles a newly connected card.
    ///
    /// A card seen before is handled according to the saved choice. An
    /// unknown card prompts the user; the answer arrives later through
    /// [`handle_reply`](Self::handle_reply).
    pub fn card_added(
        &mut self,
        core: &mut Core,
        manager: &mut NotificationManager,
        card: &Card,
    ) -> Result<CardDecision, CoreError> {
        let description = card.description();
        match self.store.load(description) {
            Some(CardChoice::Always) => {
                make_default(core, card.sink(), card.source());
                return Ok(CardDecision::MadeDefault);
            }
            Some(CardChoice::Never) => return Ok(CardDecision::Ignored),
            None => {}
        }

        tracing::debug!(card = description, "card detected");
        let notification = Notification::new(
            "A new card has been connected.",
            format!("Would you like to set {description} as default?"),
        )
        .icon("audio-card-symbolic")
        .action(ACTION_YES, "Yes")
        .action(ACTION_NO, "No");

        let id = manager.send(&notification)?;
        self.pending.insert(
            id,
            PendingCard {
                description: description.to_string(),
                sink: card.sink(),
                source: card.source(),
            },
        );
        Ok(CardDecision::Asked(id))
    }

    /// Applies the user's answer. Returns `false` for replies to
    /// notifications this notifier did not send.
    pub fn handle_reply(&mut self, core: &mut Core, reply: &NotificationReply) -> bool {
        let Some(card) = self.pending.remove(&reply.id) else {
            return false;
        };
        tracing::debug!(card = %card.description, kind = ?reply.kind, "notification reply");

        match &reply.kind {
            ReplyKind::ActionInvoked(key) if key == ACTION_YES => {
                make_default(core, card.sink, card.source);
                self.store.save(&card.description, CardChoice::Always);
            }
            ReplyKind::ActionInvoked(key) if key == ACTION_NO => {
                self.store.save(&card.description, CardChoice::Never);
            }
            ReplyKind::Error => {
                tracing::error!(card = %card.description, "notification failed");
            }
            _ => {}
        }
        true
    }

    /// Applies every reply already queued on `manager`. Returns how many
    /// were for this notifier.
    pub fn process_replies(&mut self, core: &mut Core, manager: &mut NotificationManager) -> usize {
        let mut handled = 0;
        while let Some(reply) = manager.try_next_reply() {
            if self.handle_reply(core, &reply) {
                handled += 1;
            }
        }
        handled
    }
}

/// Makes `sink` and `source` the defaults and moves the streams of the
/// previous defaults over.
fn make_default(core: &mut Core, sink: Option<DeviceId>, source: Option<DeviceId>) {
    for (direction, device) in [(Direction::Playback, sink), (Direction::Capture, source)] {
        let Some(device) = device else {
            tracing::info!(?direction, "the card has no device for this direction");
            continue;
        };
        let previous = core.default_device(direction);
        if previous == Some(device) {
            continue;
        }
        if let Err(e) = core.set_default_device(device) {
            tracing::warn!(%device, error = %e, "failed to set default device");
            continue;
        }

        let Some(previous) = previous else { continue };
        let endpoints = movable_streams(core, previous);
        if endpoints.is_empty() {
            tracing::debug!(device = %previous, "no streams to move away");
        }
        for endpoint in endpoints {
            match core.move_endpoint(endpoint, device, false) {
                Ok(()) => tracing::info!(%endpoint, to = %device, "moved stream"),
                Err(e) => tracing::info!(%endpoint, to = %device, error = %e, "failed to move stream"),
            }
        }
    }
}

/// Linked streams of `device` that are not pinned to it.
fn movable_streams(core: &Core, device: DeviceId) -> Vec<EndpointId> {
    let Ok(info) = core.device_info(device) else {
        return Vec::new();
    };
    info.endpoints
        .into_iter()
        .filter(|&endpoint| {
            let linked = core.endpoint_state(endpoint).is_ok_and(|s| s.is_linked());
            let pinned = core
                .endpoint_flags(endpoint)
                .map_or(true, |flags| flags.contains(EndpointFlags::DONT_MOVE));
            if linked && pinned {
                tracing::debug!(%endpoint, %device, "stream is pinned to its device");
            }
            linked && !pinned
        })
        .collect()
}

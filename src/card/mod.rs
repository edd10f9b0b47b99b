//! Cards: a group of devices opened together under a selectable profile.
//!
//! A probe reports which output/input mapping combinations of a card work.
//! Each combination becomes a [`CardProfile`]; an extra `off` profile opens
//! nothing. Switching profiles closes and reopens only the side whose
//! mapping changed, so streams on the unchanged side keep playing.

mod probe;

use std::collections::BTreeMap;

pub use probe::{CardProbe, ProfileInfo, ProfilePair, StaticProbe};

use crate::backend::{NullDevice, NullDeviceConfig};
use crate::builder::DeviceBuilder;
use crate::core::Core;
use crate::id::DeviceId;
use crate::state::Direction;
use crate::CoreError;

/// Name of the profile that opens no device.
pub const PROFILE_OFF: &str = "off";

/// A selectable configuration of a card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardProfile {
    /// Unique name, e.g. `output-analog-stereo+input-analog-mono`.
    pub name: String,
    /// Human readable description.
    pub description: String,
    /// Higher is preferred.
    pub priority: u32,
    /// Output mapping, if the profile opens a playback device.
    pub sink: Option<ProfileInfo>,
    /// Input mapping, if the profile opens a capture device.
    pub source: Option<ProfileInfo>,
}

impl CardProfile {
    /// Builds the profile for one probed combination. `None` if both sides
    /// are empty.
    pub fn from_pair(sink: Option<ProfileInfo>, source: Option<ProfileInfo>) -> Option<Self> {
        let (name, description) = match (&sink, &source) {
            (Some(o), Some(i)) => (
                format!("output-{}+input-{}", o.name, i.name),
                format!("Output {} + Input {}", o.description, i.description),
            ),
            (Some(o), None) => (format!("output-{}", o.name), format!("Output {}", o.description)),
            (None, Some(i)) => (format!("input-{}", i.name), format!("Input {}", i.description)),
            (None, None) => return None,
        };
        let priority = sink.as_ref().map_or(0, |s| s.priority) * 100
            + source.as_ref().map_or(0, |s| s.priority);
        Some(Self {
            name,
            description,
            priority,
            sink,
            source,
        })
    }

    /// The profile that opens nothing.
    pub fn off() -> Self {
        Self {
            name: PROFILE_OFF.to_string(),
            description: "Off".to_string(),
            priority: 0,
            sink: None,
            source: None,
        }
    }

    /// Number of playback devices this profile opens.
    pub fn n_sinks(&self) -> usize {
        usize::from(self.sink.is_some())
    }

    /// Number of capture devices this profile opens.
    pub fn n_sources(&self) -> usize {
        usize::from(self.source.is_some())
    }
}

/// Opens and closes the devices of a card.
pub trait DeviceFactory: Send {
    /// Opens the `direction` device of `card` using `mapping`.
    fn open(
        &mut self,
        core: &mut Core,
        card: &str,
        direction: Direction,
        mapping: &ProfileInfo,
    ) -> Result<DeviceId, CoreError>;

    /// Closes a device opened by [`open`](Self::open).
    fn close(&mut self, core: &mut Core, device: DeviceId) {
        core.unlink_device(device);
    }
}

/// Opens every mapping as a [`NullDevice`] in the core's default spec.
#[derive(Default)]
pub struct NullDeviceFactory {
    config: Option<NullDeviceConfig>,
    running: BTreeMap<DeviceId, NullDevice>,
}

impl NullDeviceFactory {
    /// Creates a factory ticking at the core's fragment duration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `config` for every device instead.
    #[must_use]
    pub fn with_config(mut self, config: NullDeviceConfig) -> Self {
        self.config = Some(config);
        self
    }
}

impl DeviceFactory for NullDeviceFactory {
    fn open(
        &mut self,
        core: &mut Core,
        card: &str,
        direction: Direction,
        mapping: &ProfileInfo,
    ) -> Result<DeviceId, CoreError> {
        let mut spec = core.config().default_spec;
        spec.channels = mapping.channels;
        let config = self
            .config
            .clone()
            .unwrap_or_else(|| NullDeviceConfig::from(core.config()));

        let (prefix, builder) = match direction {
            Direction::Playback => (
                "output",
                DeviceBuilder::playback(format!("{card}.output.{}", mapping.name)),
            ),
            Direction::Capture => (
                "input",
                DeviceBuilder::capture(format!("{card}.input.{}", mapping.name)),
            ),
        };
        let builder = builder
            .description(format!("{card} {prefix} {}", mapping.description))
            .spec(spec);
        let (id, device) = NullDevice::start(core, builder, config)?;
        self.running.insert(id, device);
        Ok(id)
    }

    fn close(&mut self, core: &mut Core, device: DeviceId) {
        core.unlink_device(device);
        // dropping the backend joins its thread
        self.running.remove(&device);
    }
}

/// A card with its profiles and the devices of the active one.
pub struct Card {
    name: String,
    description: String,
    profiles: BTreeMap<String, CardProfile>,
    active: String,
    sink: Option<DeviceId>,
    source: Option<DeviceId>,
    factory: Box<dyn DeviceFactory>,
}

impl std::fmt::Debug for Card {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Card")
            .field("name", &self.name)
            .field("active", &self.active)
            .field("sink", &self.sink)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl Card {
    /// Probes `name` and opens the devices of the initial profile.
    ///
    /// The initial profile is `profile` if given, else the one with the
    /// highest priority. Fails with [`CoreError::NoProfiles`] if the probe
    /// finds nothing.
    pub fn new(
        core: &mut Core,
        name: impl Into<String>,
        probe: &dyn CardProbe,
        factory: impl DeviceFactory + 'static,
        profile: Option<&str>,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        let spec = core.config().default_spec;

        let mut profiles = BTreeMap::new();
        for (sink, source) in probe.probe(&name, &spec)? {
            if let Some(profile) = CardProfile::from_pair(sink, source) {
                tracing::info!(card = %name, profile = %profile.description, "found profile");
                profiles.insert(profile.name.clone(), profile);
            }
        }
        if profiles.is_empty() {
            tracing::error!(card = %name, "failed to find a working profile");
            return Err(CoreError::NoProfiles { card: name });
        }
        let best = profiles
            .values()
            .max_by_key(|p| p.priority)
            .map(|p| p.name.clone())
            .unwrap_or_default();
        profiles.insert(PROFILE_OFF.to_string(), CardProfile::off());

        let active = match profile {
            Some(requested) if profiles.contains_key(requested) => requested.to_string(),
            Some(requested) => {
                return Err(CoreError::UnknownProfile {
                    name: requested.to_string(),
                })
            }
            None => best,
        };

        let mut card = Self {
            description: name.clone(),
            name,
            profiles,
            active: PROFILE_OFF.to_string(),
            sink: None,
            source: None,
            factory: Box::new(factory),
        };
        card.set_profile(core, &active)?;
        Ok(card)
    }

    /// Card name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human readable description. Defaults to the name.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Sets the description.
    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// Every profile, `off` included, ordered by name.
    pub fn profiles(&self) -> impl Iterator<Item = &CardProfile> {
        self.profiles.values()
    }

    /// The active profile.
    pub fn active_profile(&self) -> Option<&CardProfile> {
        self.profiles.get(&self.active)
    }

    /// The playback device of the active profile.
    pub fn sink(&self) -> Option<DeviceId> {
        self.sink
    }

    /// The capture device of the active profile.
    pub fn source(&self) -> Option<DeviceId> {
        self.source
    }

    /// Switches to the profile called `name`.
    ///
    /// Only the side whose mapping changed is closed and reopened. A side
    /// that fails to open is logged and left closed.
    pub fn set_profile(&mut self, core: &mut Core, name: &str) -> Result<(), CoreError> {
        let Some(new) = self.profiles.get(name) else {
            return Err(CoreError::UnknownProfile {
                name: name.to_string(),
            });
        };
        let old = self.profiles.get(&self.active);
        let new_sink = new.sink.clone();
        let new_source = new.source.clone();
        let sink_changed = old.map(|p| &p.sink) != Some(&new_sink);
        let source_changed = old.map(|p| &p.source) != Some(&new_source);

        if sink_changed {
            self.sink = self.reopen(core, Direction::Playback, self.sink, new_sink.as_ref());
        }
        if source_changed {
            self.source = self.reopen(core, Direction::Capture, self.source, new_source.as_ref());
        }

        tracing::info!(card = %self.name, profile = name, "profile activated");
        self.active = name.to_string();
        Ok(())
    }

    fn reopen(
        &mut self,
        core: &mut Core,
        direction: Direction,
        current: Option<DeviceId>,
        mapping: Option<&ProfileInfo>,
    ) -> Option<DeviceId> {
        if let Some(device) = current {
            self.factory.close(core, device);
        }
        let mapping = mapping?;
        match self.factory.open(core, &self.name, direction, mapping) {
            Ok(device) => Some(device),
            Err(e) => {
                tracing::warn!(card = %self.name, mapping = %mapping.name, error = %e, "failed to open device");
                None
            }
        }
    }

    /// Streams linked to the card's devices.
    pub fn n_used(&self, core: &Core) -> usize {
        [self.sink, self.source]
            .into_iter()
            .flatten()
            .filter_map(|device| core.linked_by(device).ok())
            .sum()
    }

    /// Closes the card's devices.
    pub fn free(mut self, core: &mut Core) {
        for device in [self.sink.take(), self.source.take()].into_iter().flatten() {
            self.factory.close(core, device);
        }
        tracing::debug!(card = %self.name, "card freed");
    }
}

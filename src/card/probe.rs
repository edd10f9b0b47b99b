//! Profile probing.

use crate::format::SampleSpec;
use crate::CoreError;

/// One way of opening one direction of a card, as found by a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileInfo {
    /// Short identifier, e.g. `analog-stereo`.
    pub name: String,
    /// Human readable description, e.g. `Analog Stereo`.
    pub description: String,
    /// Higher is preferred.
    pub priority: u32,
    /// Channels a device opened with this mapping has.
    pub channels: u8,
}

impl ProfileInfo {
    /// Creates a mapping description.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        priority: u32,
        channels: u8,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            priority,
            channels,
        }
    }
}

/// An output mapping, an input mapping, or both at once.
pub type ProfilePair = (Option<ProfileInfo>, Option<ProfileInfo>);

/// Finds the working combinations of a card's output and input mappings.
///
/// Pairs with neither side set are ignored.
pub trait CardProbe {
    /// Probes `card` for mappings that can be opened in `spec`.
    fn probe(&self, card: &str, spec: &SampleSpec) -> Result<Vec<ProfilePair>, CoreError>;
}

/// A probe returning a fixed list, for virtual cards and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    pairs: Vec<ProfilePair>,
}

impl StaticProbe {
    /// Creates an empty probe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a duplex combination.
    #[must_use]
    pub fn duplex(mut self, output: ProfileInfo, input: ProfileInfo) -> Self {
        self.pairs.push((Some(output), Some(input)));
        self
    }

    /// Adds an output-only mapping.
    #[must_use]
    pub fn output(mut self, output: ProfileInfo) -> Self {
        self.pairs.push((Some(output), None));
        self
    }

    /// Adds an input-only mapping.
    #[must_use]
    pub fn input(mut self, input: ProfileInfo) -> Self {
        self.pairs.push((None, Some(input)));
        self
    }
}

impl CardProbe for StaticProbe {
    fn probe(&self, _card: &str, _spec: &SampleSpec) -> Result<Vec<ProfilePair>, CoreError> {
        Ok(self.pairs.clone())
    }
}

//! Identifiers for devices and stream endpoints.

use std::fmt;

/// Index of a device registered with a [`Core`](crate::Core).
///
/// Ids are allocated sequentially and never reused while the `Core` lives,
/// so a stale id simply fails to resolve instead of aliasing a newer device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub(crate) u32);

/// Index of a stream endpoint registered with a [`Core`](crate::Core).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub(crate) u32);

impl DeviceId {
    /// Returns the raw index.
    pub fn index(self) -> u32 {
        self.0
    }
}

impl EndpointId {
    /// Returns the raw index.
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(DeviceId(3).to_string(), "device#3");
        assert_eq!(EndpointId(7).to_string(), "stream#7");
    }

    #[test]
    fn test_id_ordering() {
        assert!(EndpointId(1) < EndpointId(2));
        assert_eq!(DeviceId(4).index(), 4);
    }
}

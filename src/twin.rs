//! Device twin synchronisation.
//!
//! Reported-state submissions travel through the [`MessageQueue`] like any
//! other outbound operation. Desired-property documents coming from the
//! transport are handed to the registered callback as-is: no merge, no schema
//! check and no deduplication. A transport that delivers the same patch twice
//! causes two callback invocations.
//!
//! [`MessageQueue`]: crate::queue::MessageQueue

use alloc::boxed::Box;
use core::fmt;

use serde::Deserialize;

/// Kind of desired-property payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TwinUpdate {
    /// The whole twin document (`desired` and `reported` sections).
    Complete,
    /// A patch of the desired properties only.
    Partial,
}

/// Callback receiving desired-property payloads.
pub type TwinCallback = Box<dyn FnMut(TwinUpdate, &[u8])>;

#[derive(Deserialize)]
struct VersionProbe {
    #[serde(rename = "$version", default)]
    version: Option<u64>,
}

#[derive(Deserialize)]
struct DocumentProbe {
    #[serde(default)]
    desired: Option<VersionProbe>,
}

/// Reads `$version` from a desired-property payload, if it has one.
pub fn desired_version(update: TwinUpdate, payload: &[u8]) -> Option<u64> {
    match update {
        TwinUpdate::Partial => serde_json_core::from_slice::<VersionProbe>(payload)
            .ok()
            .and_then(|(probe, _)| probe.version),
        TwinUpdate::Complete => serde_json_core::from_slice::<DocumentProbe>(payload)
            .ok()
            .and_then(|(doc, _)| doc.desired)
            .and_then(|desired| desired.version),
    }
}

/// Inbound half of the twin: desired-property delivery.
#[derive(Default)]
pub struct TwinSynchronizer {
    callback: Option<TwinCallback>,
    last_desired_version: Option<u64>,
}

impl TwinSynchronizer {
    /// Creates a synchronizer with no callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or clears the desired-property callback.
    pub fn set_callback(&mut self, callback: Option<TwinCallback>) {
        self.callback = callback;
    }

    /// Whether a callback is registered.
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Highest `$version` seen in any desired payload. Informational only.
    pub fn last_desired_version(&self) -> Option<u64> {
        self.last_desired_version
    }

    /// Delivers one desired-property payload to the application.
    pub fn on_desired(&mut self, update: TwinUpdate, payload: &[u8]) {
        if let Some(version) = desired_version(update, payload) {
            if self.last_desired_version.is_some_and(|last| version <= last) {
                debug!("desired version {} is not newer than the last one seen", version);
            }
            self.last_desired_version = Some(self.last_desired_version.map_or(version, |v| v.max(version)));
        }
        match self.callback.as_mut() {
            Some(callback) => callback(update, payload),
            None => debug!("dropping desired properties, no twin callback"),
        }
    }
}

impl fmt::Debug for TwinSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwinSynchronizer")
            .field("has_callback", &self.callback.is_some())
            .field("last_desired_version", &self.last_desired_version)
            .finish()
    }
}

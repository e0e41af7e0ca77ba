//! Network quality monitor.
//!
//! The platform feeds raw path observations in; the monitor classifies them
//! into a small quality scale and publishes every change as a
//! [`QualityTransition`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;

const TRANSITION_CAPACITY: usize = 32;

/// Classified connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    /// Unmetered, unconstrained link.
    Excellent,
    /// Usable link that may be metered.
    Good,
    /// Constrained link (low-data mode, weak signal).
    Poor,
    /// No usable path.
    Offline,
}

impl NetworkQuality {
    /// Returns true if automatic syncs may run at this quality.
    pub fn should_auto_sync(&self) -> bool {
        matches!(self, NetworkQuality::Excellent | NetworkQuality::Good)
    }
}

impl fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkQuality::Excellent => "excellent",
            NetworkQuality::Good => "good",
            NetworkQuality::Poor => "poor",
            NetworkQuality::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// Interface a path runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    /// Wi-Fi.
    Wifi,
    /// Wired ethernet.
    Wired,
    /// Cellular data.
    Cellular,
    /// Anything else (VPN loopback, unknown).
    Other,
}

/// A raw observation of the current network path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathObservation {
    /// A route to the internet exists.
    pub satisfied: bool,
    /// Interface carrying the route.
    pub interface: InterfaceKind,
    /// The path is metered.
    pub expensive: bool,
    /// The path is in a constrained (low-data) mode.
    pub constrained: bool,
}

impl PathObservation {
    /// Observation of an unconstrained Wi-Fi path.
    pub fn wifi() -> Self {
        Self {
            satisfied: true,
            interface: InterfaceKind::Wifi,
            expensive: false,
            constrained: false,
        }
    }

    /// Observation of a cellular path.
    pub fn cellular() -> Self {
        Self {
            satisfied: true,
            interface: InterfaceKind::Cellular,
            expensive: true,
            constrained: false,
        }
    }

    /// Observation with no usable path.
    pub fn unsatisfied() -> Self {
        Self {
            satisfied: false,
            interface: InterfaceKind::Other,
            expensive: false,
            constrained: false,
        }
    }

    /// Classifies this observation.
    pub fn classify(&self) -> NetworkQuality {
        if !self.satisfied {
            return NetworkQuality::Offline;
        }
        if self.constrained {
            return NetworkQuality::Poor;
        }
        match self.interface {
            InterfaceKind::Wifi | InterfaceKind::Wired if !self.expensive => {
                NetworkQuality::Excellent
            }
            _ => NetworkQuality::Good,
        }
    }
}

/// A change of classified quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityTransition {
    /// Position of this change in the monitor's history, starting at 1.
    pub seq: u64,
    /// Quality before the change.
    pub from: NetworkQuality,
    /// Quality after the change.
    pub to: NetworkQuality,
}

impl QualityTransition {
    /// Returns true when this transition moves into an auto-sync state.
    pub fn enables_auto_sync(&self) -> bool {
        !self.from.should_auto_sync() && self.to.should_auto_sync()
    }
}

/// Tracks current network quality and publishes transitions.
pub struct NetworkMonitor {
    current: RwLock<(NetworkQuality, u64)>,
    transitions: broadcast::Sender<QualityTransition>,
}

impl NetworkMonitor {
    /// Creates a monitor starting at `initial`.
    pub fn new(initial: NetworkQuality) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            current: RwLock::new((initial, 0)),
            transitions,
        }
    }

    /// Current classified quality.
    pub fn current(&self) -> NetworkQuality {
        self.current.read().0
    }

    /// Returns true if automatic syncs may run right now.
    pub fn should_auto_sync(&self) -> bool {
        self.current().should_auto_sync()
    }

    /// Subscribes to quality transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<QualityTransition> {
        self.transitions.subscribe()
    }

    /// Feeds a path observation. Returns the transition if quality changed.
    pub fn observe(&self, observation: PathObservation) -> Option<QualityTransition> {
        self.set_quality(observation.classify())
    }

    /// Sets the classified quality directly.
    pub fn set_quality(&self, quality: NetworkQuality) -> Option<QualityTransition> {
        let transition = {
            let mut current = self.current.write();
            let (from, seq) = *current;
            if from == quality {
                return None;
            }
            *current = (quality, seq + 1);
            QualityTransition {
                seq: seq + 1,
                from,
                to: quality,
            }
        };

        debug!(from = %transition.from, to = %transition.to, "network quality changed");
        // No subscribers is fine; the transition is still reflected in `current`.
        let _ = self.transitions.send(transition);
        Some(transition)
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkQuality::Offline)
    }
}

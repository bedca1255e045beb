#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::network::LayerId;

/// Perturbations the controller schedules against simulated time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SimEvent {
    /// Switch the step length and recompute every tract's scaled rates.
    ChangeTimeStep { hours: u32 },
    /// Cued recall followed by reconsolidation of a fresh hub pattern.
    Reactivate,
    SetFrozen { layer: LayerId, frozen: bool },
    /// Permanent freeze.
    Lesion { layer: LayerId },
    /// Plasticity inhibition on every tract touching `layer`.
    TogglePsi { layer: LayerId, on: bool },
}

impl SimEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SimEvent::ChangeTimeStep { .. } => "timeStep",
            SimEvent::Reactivate => "reactivate",
            SimEvent::SetFrozen { frozen: true, .. } => "freeze",
            SimEvent::SetFrozen { frozen: false, .. } => "unfreeze",
            SimEvent::Lesion { .. } => "lesion",
            SimEvent::TogglePsi { on: true, .. } => "psiOn",
            SimEvent::TogglePsi { on: false, .. } => "psiOff",
        }
    }
}

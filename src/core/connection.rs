//! Plastic synapse with a two-pool receptor model.
//!
//! Every connection has a post-synaptic density (PSD) that bounds how many
//! receptors it can hold. Receptors come in two pools:
//!
//! - fast: mobile receptors that fill whatever PSD capacity is free right
//!   after learning and are removed again within hours;
//! - slow: stable receptors that are inserted only while the connection is
//!   potentiated (and plasticity is not inhibited), so they carry the
//!   long-term trace.
//!
//! Strength is the total receptor count over [`STRENGTH_NORM`].

use tracing::trace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::SynapseParams;
use crate::error::Violation;
use crate::network::UnitId;
use crate::tract::TractRates;
use crate::unit::asigmoid;

/// Receptor count of a full-strength connection.
pub const STRENGTH_NORM: f64 = 100.0;

/// Absorbs float rounding in relaxations that approach a bound from above.
const BOUND_SLACK: f64 = 1e-9;

/// Probability that `cycles` of Hebbian stimulation potentiate a connection.
pub fn potentiation_probability(cycles: u32, synapse: &SynapseParams, max_pot_prob: f64) -> f64 {
    asigmoid(cycles as f64, synapse.pot_prob_k, synapse.pot_prob_half) * max_pot_prob
}

fn floor_checked(quantity: &'static str, value: f64, min: f64) -> Result<f64, Violation> {
    if value.is_nan() || value < min - BOUND_SLACK {
        return Err(Violation {
            quantity,
            value,
            bound: min,
        });
    }
    Ok(value.max(min))
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Connection {
    pub from: UnitId,
    pub to: UnitId,
    psd_size: f64,
    fast_receptors: f64,
    slow_receptors: f64,
    potentiated: bool,
    psi: bool,
}

impl Connection {
    /// A fresh, unpotentiated connection with every pool at its floor.
    pub fn new(from: UnitId, to: UnitId, synapse: &SynapseParams) -> Self {
        Self {
            from,
            to,
            psd_size: synapse.min_psd_size,
            fast_receptors: synapse.min_fast_receptors,
            slow_receptors: synapse.min_slow_receptors,
            potentiated: false,
            psi: false,
        }
    }

    pub fn psd_size(&self) -> f64 {
        self.psd_size
    }

    pub fn fast_receptors(&self) -> f64 {
        self.fast_receptors
    }

    pub fn slow_receptors(&self) -> f64 {
        self.slow_receptors
    }

    pub fn is_potentiated(&self) -> bool {
        self.potentiated
    }

    pub fn psi_on(&self) -> bool {
        self.psi
    }

    pub fn set_psi(&mut self, on: bool) {
        self.psi = on;
    }

    /// Both endpoints active.
    #[inline]
    pub fn is_hebbian(&self, active: &[bool]) -> bool {
        active[self.from] && active[self.to]
    }

    #[inline]
    pub fn strength(&self) -> f64 {
        (self.fast_receptors + self.slow_receptors) / STRENGTH_NORM
    }

    fn set_psd_size(&mut self, value: f64, synapse: &SynapseParams) -> Result<(), Violation> {
        let value = floor_checked("psdSize", value, synapse.min_psd_size)?;
        if value > synapse.max_psd_size + BOUND_SLACK {
            return Err(Violation {
                quantity: "psdSize",
                value,
                bound: synapse.max_psd_size,
            });
        }
        self.psd_size = value.min(synapse.max_psd_size);
        Ok(())
    }

    fn set_fast_receptors(&mut self, value: f64, synapse: &SynapseParams) -> Result<(), Violation> {
        self.fast_receptors = floor_checked("fastReceptors", value, synapse.min_fast_receptors)?;
        Ok(())
    }

    fn set_slow_receptors(&mut self, value: f64, synapse: &SynapseParams) -> Result<(), Violation> {
        self.slow_receptors = floor_checked("slowReceptors", value, synapse.min_slow_receptors)?;
        Ok(())
    }

    /// Grow the PSD over `cycles` stimulation cycles, fill the free
    /// capacity with fast receptors, then maybe potentiate.
    ///
    /// The caller checks the Hebbian condition. `draw` is a uniform variate
    /// for the potentiation trial. Returns whether the connection became
    /// potentiated by this call.
    pub fn learn(
        &mut self,
        rate: f64,
        cycles: u32,
        synapse: &SynapseParams,
        max_pot_prob: f64,
        draw: f64,
    ) -> Result<bool, Violation> {
        for _ in 0..cycles {
            let grown = self.psd_size + rate * (synapse.max_psd_size - self.psd_size);
            self.set_psd_size(grown, synapse)?;
        }
        self.set_fast_receptors(self.psd_size - self.slow_receptors, synapse)?;

        if !self.potentiated && !self.psi {
            let p = potentiation_probability(cycles, synapse, max_pot_prob);
            if draw < p {
                self.potentiated = true;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// One timestep of receptor turnover and PSD relaxation.
    pub fn traffic(
        &mut self,
        rates: &TractRates,
        synapse: &SynapseParams,
        hebbian: bool,
    ) -> Result<(), Violation> {
        let fast = self.fast_receptors
            - rates.fast_removal * (self.fast_receptors - synapse.min_fast_receptors);
        self.set_fast_receptors(fast, synapse)?;

        if self.potentiated && !self.psi {
            if hebbian {
                let room = self.psd_size - (self.fast_receptors + self.slow_receptors);
                let slow = self.slow_receptors + rates.slow_insertion.min(room.max(0.0));
                self.set_slow_receptors(slow, synapse)?;
            }
        } else {
            let slow = self.slow_receptors
                - rates.slow_removal * (self.slow_receptors - synapse.min_slow_receptors);
            self.set_slow_receptors(slow, synapse)?;
        }

        let target = (self.fast_receptors + self.slow_receptors).max(synapse.min_psd_size);
        let psd = self.psd_size - rates.psd_decay * (self.psd_size - target);
        self.set_psd_size(psd, synapse)?;

        trace!(
            target: "engram::plasticity",
            psd = self.psd_size,
            fast = self.fast_receptors,
            slow = self.slow_receptors,
            "trafficking"
        );
        Ok(())
    }

    /// Drop the potentiated flag and the stable receptor pool.
    pub fn depotentiate(&mut self, synapse: &SynapseParams) {
        self.potentiated = false;
        self.slow_receptors = synapse.min_slow_receptors;
    }

    /// Post-recall exchange: stable receptors are swapped out for mobile
    /// ones, keeping the PSD full.
    pub fn reactivate(&mut self, synapse: &SynapseParams) -> Result<(), Violation> {
        self.slow_receptors = synapse.min_slow_receptors;
        self.set_fast_receptors(self.psd_size - self.slow_receptors, synapse)
    }
}

use std::ops::Range;

use tracing::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::clock::{SimClock, REFERENCE_INTERVAL_HOURS};
use crate::config::{SynapseParams, TractParams};
use crate::connection::Connection;
use crate::error::{SimError, Violation};
use crate::network::{ConnId, LayerId, UnitId};
use crate::prng::Prng;
use crate::unit::unit_label;

/// Rounding allowance when combining probabilities near 1.
const PROB_SLACK: f64 = 1e-12;

/// Rescale a per-`from`-interval exponential decay rate to a `to` interval.
///
/// Applying the result once over `to` hours removes the same fraction as
/// applying `rate` once per `from` hours.
pub fn scale_exp_decay(rate: f64, from: f64, to: f64) -> f64 {
    1.0 - (1.0 - rate).powf(to / from)
}

/// Rescale a per-interval event probability.
///
/// A Bernoulli risk compounds exactly like an exponential decay.
pub fn scale_probability(prob: f64, from: f64, to: f64) -> f64 {
    scale_exp_decay(prob, from, to)
}

/// Rescale an additive per-interval rate.
pub fn scale_constant_rate(rate: f64, from: f64, to: f64) -> f64 {
    rate * to / from
}

/// Base and enzyme-driven depotentiation risks, as independent events.
pub fn combine_probabilities(a: f64, b: f64) -> f64 {
    a + b - a * b
}

/// Kinetic constants scaled to the current timestep.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TractRates {
    pub cons_learn: f64,
    pub psd_decay: f64,
    pub fast_removal: f64,
    pub slow_insertion: f64,
    pub slow_removal: f64,
    pub base_depot_prob: f64,
    pub enzyme_decay: f64,
    pub max_pot_prob: f64,
}

impl TractRates {
    pub fn scaled(params: &TractParams, step_hours: f64) -> Self {
        let r = REFERENCE_INTERVAL_HOURS;
        Self {
            cons_learn: scale_exp_decay(params.cons_learn_rate, r, step_hours),
            psd_decay: scale_exp_decay(params.psd_decay_rate, r, step_hours),
            fast_removal: scale_exp_decay(params.fast_removal_rate, r, step_hours),
            slow_insertion: scale_constant_rate(params.slow_insertion_rate, r, step_hours),
            slow_removal: scale_exp_decay(params.slow_removal_rate, r, step_hours),
            base_depot_prob: scale_probability(params.base_depot_prob, r, step_hours),
            enzyme_decay: scale_exp_decay(params.enzyme_decay_rate, r, step_hours),
            max_pot_prob: scale_probability(params.max_pot_prob, r, step_hours),
        }
    }
}

/// What a tract operation needs to see of the rest of the network.
///
/// `owned` marks the units this worker updates; a connection belongs to
/// the owner of its target unit.
#[derive(Debug, Clone, Copy)]
pub struct PlasticityCtx<'a> {
    pub active: &'a [bool],
    pub owned: &'a [bool],
    pub synapse: &'a SynapseParams,
    pub clock: &'a SimClock,
    /// Source of keyed draws for this phase.
    pub noise: &'a Prng,
    pub epoch: u64,
}

/// Directed bundle of connections from every unit of one layer to every
/// other unit of another.
#[derive(Debug, Clone)]
pub struct Tract {
    pub id: String,
    pub kind: String,
    pub from: LayerId,
    pub to: LayerId,
    /// Slice of the network's connection arena.
    pub connections: Range<ConnId>,
    from_name: String,
    to_name: String,
    from_base: UnitId,
    to_base: UnitId,
    params: TractParams,
    rates: TractRates,
    enzyme_level: f64,
    depot_prob: f64,
    /// `(enzyme level bits, step hours)` that `depot_prob` was computed for.
    depot_key: Option<(u64, u32)>,
}

impl Tract {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: &str,
        from: LayerId,
        to: LayerId,
        from_name: &str,
        to_name: &str,
        from_base: UnitId,
        to_base: UnitId,
        connections: Range<ConnId>,
        params: TractParams,
    ) -> Self {
        Self {
            id: format!("{from_name}-{to_name}"),
            kind: kind.to_string(),
            from,
            to,
            connections,
            from_name: from_name.to_string(),
            to_name: to_name.to_string(),
            from_base,
            to_base,
            params,
            rates: TractRates::default(),
            enzyme_level: 0.0,
            depot_prob: 0.0,
            depot_key: None,
        }
    }

    pub fn params(&self) -> &TractParams {
        &self.params
    }

    pub fn rates(&self) -> &TractRates {
        &self.rates
    }

    pub fn enzyme_level(&self) -> f64 {
        self.enzyme_level
    }

    /// Combined depotentiation probability for the current enzyme level
    /// and timestep.
    pub fn depot_prob(&self) -> f64 {
        self.depot_prob
    }

    pub fn connection_label(&self, c: &Connection) -> String {
        format!(
            "{}-{}",
            unit_label(&self.from_name, c.from - self.from_base),
            unit_label(&self.to_name, c.to - self.to_base)
        )
    }

    fn violation(&self, c: &Connection, clock: &SimClock, v: Violation) -> SimError {
        SimError::invariant(self.connection_label(c), clock.now, v)
    }

    /// Rescale every constant to the clock's step length.
    pub fn calc_rates(&mut self, clock: &SimClock) -> Result<(), SimError> {
        self.rates = TractRates::scaled(&self.params, clock.time_step as f64);
        self.calc_depot_prob(clock)
    }

    /// Recompute the combined probability if the enzyme level or the step
    /// length changed since the last call.
    pub fn calc_depot_prob(&mut self, clock: &SimClock) -> Result<(), SimError> {
        let key = (self.enzyme_level.to_bits(), clock.time_step);
        if self.depot_key == Some(key) {
            return Ok(());
        }

        let step = clock.time_step as f64;
        let base = scale_probability(self.params.base_depot_prob, REFERENCE_INTERVAL_HOURS, step);
        let enzyme = scale_probability(
            self.params.max_enzyme_depot_prob * self.enzyme_level,
            REFERENCE_INTERVAL_HOURS,
            step,
        );
        let p = combine_probabilities(base, enzyme);
        if p.is_nan() || p < 0.0 || p > 1.0 + PROB_SLACK {
            return Err(SimError::ProbabilityOverflow {
                tract: self.id.clone(),
                time: clock.now,
                prob: p,
            });
        }
        self.depot_prob = p.min(1.0);
        self.depot_key = Some(key);
        Ok(())
    }

    /// Learn at `rate` on every owned Hebbian connection. Returns how many
    /// connections became potentiated.
    pub fn stimulate(
        &self,
        rate: f64,
        cycles: u32,
        tag: &str,
        conns: &mut [Connection],
        ctx: &PlasticityCtx<'_>,
    ) -> Result<usize, SimError> {
        if rate <= 0.0 {
            return Ok(0);
        }
        let mut newly = 0;
        for (offset, c) in conns.iter_mut().enumerate() {
            if !ctx.owned[c.to] || !c.is_hebbian(ctx.active) {
                continue;
            }
            let draw = ctx
                .noise
                .keyed_f64(ctx.epoch, (self.connections.start + offset) as u64);
            let potentiated = c
                .learn(rate, cycles, ctx.synapse, self.rates.max_pot_prob, draw)
                .map_err(|v| self.violation(c, ctx.clock, v))?;
            if potentiated {
                newly += 1;
                debug!(
                    target: "engram::plasticity",
                    time = ctx.clock.now,
                    conn = %self.connection_label(c),
                    tag,
                    "potentiated"
                );
            }
        }
        Ok(newly)
    }

    /// One-shot learning of the presented pattern.
    pub fn acquire(
        &self,
        cycles: u32,
        tag: &str,
        conns: &mut [Connection],
        ctx: &PlasticityCtx<'_>,
    ) -> Result<usize, SimError> {
        self.stimulate(self.params.acq_learn_rate, cycles, tag, conns, ctx)
    }

    /// Slow learning of whatever the network settled into during replay.
    pub fn consolidate(
        &self,
        cycles: u32,
        conns: &mut [Connection],
        ctx: &PlasticityCtx<'_>,
    ) -> Result<usize, SimError> {
        self.stimulate(self.rates.cons_learn, cycles, "cons", conns, ctx)
    }

    /// Depotentiate each owned potentiated connection with the combined
    /// probability.
    pub fn depotentiate_some(&self, conns: &mut [Connection], ctx: &PlasticityCtx<'_>) -> usize {
        let mut dropped = 0;
        for (offset, c) in conns.iter_mut().enumerate() {
            if !ctx.owned[c.to] || !c.is_potentiated() {
                continue;
            }
            let draw = ctx
                .noise
                .keyed_f64(ctx.epoch, (self.connections.start + offset) as u64);
            if draw < self.depot_prob {
                c.depotentiate(ctx.synapse);
                dropped += 1;
                debug!(
                    target: "engram::plasticity",
                    time = ctx.clock.now,
                    conn = %self.connection_label(c),
                    "depotentiated"
                );
            }
        }
        dropped
    }

    /// Per-step background processes: random depotentiation, receptor
    /// trafficking, enzyme decay.
    pub fn maintain(&mut self, conns: &mut [Connection], ctx: &PlasticityCtx<'_>) -> Result<(), SimError> {
        self.depotentiate_some(conns, ctx);
        for c in conns.iter_mut().filter(|c| ctx.owned[c.to]) {
            let hebbian = c.is_hebbian(ctx.active);
            c.traffic(&self.rates, ctx.synapse, hebbian)
                .map_err(|v| self.violation(c, ctx.clock, v))?;
        }
        self.enzyme_level -= self.rates.enzyme_decay * self.enzyme_level;
        self.calc_depot_prob(ctx.clock)?;

        debug!(
            target: "engram::plasticity",
            time = ctx.clock.now,
            tract = %self.id,
            enzyme = self.enzyme_level,
            depot_prob = self.depot_prob,
            "maintained"
        );
        Ok(())
    }

    /// Raise the enzyme level and swap receptors on co-active connections.
    pub fn reactivate(&mut self, conns: &mut [Connection], ctx: &PlasticityCtx<'_>) -> Result<(), SimError> {
        self.enzyme_level = self.params.react_enzyme_level;
        self.calc_depot_prob(ctx.clock)?;
        for c in conns.iter_mut() {
            if ctx.owned[c.to] && c.is_hebbian(ctx.active) {
                c.reactivate(ctx.synapse)
                    .map_err(|v| self.violation(c, ctx.clock, v))?;
            }
        }
        Ok(())
    }

    pub fn toggle_psi(&self, conns: &mut [Connection], on: bool) {
        for c in conns {
            c.set_psi(on);
        }
    }

    /// Potentiated connections among those this worker owns.
    pub fn num_potentiated(&self, conns: &[Connection], owned: &[bool]) -> usize {
        conns
            .iter()
            .filter(|c| owned[c.to] && c.is_potentiated())
            .count()
    }

    #[cfg(test)]
    pub(crate) fn set_enzyme_level(&mut self, level: f64) {
        self.enzyme_level = level;
    }
}

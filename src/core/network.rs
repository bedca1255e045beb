//! Arena holding every unit, connection, layer and tract.
//!
//! Entities refer to each other by index: a layer or tract owns a range of
//! the unit or connection arena, a connection names its two units, a unit
//! lists its inbound connections. Current activations live in one flat
//! buffer indexed by [`UnitId`] so that a worker can exchange it wholesale.

use std::ops::Range;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::clock::{SimClock, SimTime};
use crate::config::{ModelConfig, SynapseParams, UnitParams};
use crate::connection::Connection;
use crate::error::{ConfigError, SimError};
use crate::layer::{Layer, PatternScore};
use crate::prng::Prng;
use crate::tract::{PlasticityCtx, Tract};
use crate::unit::Unit;

pub type UnitId = usize;
pub type ConnId = usize;
pub type LayerId = usize;
pub type TractId = usize;

/// Execution tier for the activation compute phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExecutionTier {
    /// Single-threaded (default, works everywhere).
    #[default]
    Scalar,
    /// Rayon over the units of each layer (requires `parallel` feature).
    Parallel,
}

/// Unit and connection counts of one layer or tract.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SizeEntry {
    pub id: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SizeSummary {
    pub layers: Vec<SizeEntry>,
    pub total_units: usize,
    pub tracts: Vec<SizeEntry>,
    pub total_connections: usize,
}

#[derive(Debug, Clone)]
pub struct Network {
    units: Vec<Unit>,
    active: Vec<bool>,
    owned: Vec<bool>,
    connections: Vec<Connection>,
    layers: Vec<Layer>,
    tracts: Vec<Tract>,
    unit_params: UnitParams,
    synapse: SynapseParams,
    tier: ExecutionTier,
    noise: Prng,
    epoch: u64,
}

impl Network {
    /// Lay out every layer's units contiguously, then connect each tract's
    /// source units to every target unit except itself.
    pub fn build(config: &ModelConfig, noise: Prng) -> Result<Self, SimError> {
        config.validate()?;

        let mut units = Vec::new();
        let mut layers = Vec::with_capacity(config.topology.layers.len());
        for (lid, spec) in config.topology.layers.iter().enumerate() {
            let start = units.len();
            units.extend((0..spec.size()).map(|i| Unit::new(lid, i)));
            layers.push(Layer::new(spec, start..units.len(), config.inhibition));
        }

        let mut connections = Vec::new();
        let mut tracts = Vec::with_capacity(config.topology.tracts.len());
        for spec in &config.topology.tracts {
            let from = layer_index(&layers, &spec.from)?;
            let to = layer_index(&layers, &spec.to)?;
            let params = config
                .tract_types
                .get(&spec.kind)
                .copied()
                .ok_or_else(|| {
                    ConfigError::Invalid(format!("no parameters for tract type '{}'", spec.kind))
                })?;

            let start = connections.len();
            let (from_units, to_units) = (layers[from].units.clone(), layers[to].units.clone());
            for fu in from_units.clone() {
                for tu in to_units.clone() {
                    if fu == tu {
                        continue;
                    }
                    units[tu].add_inbound(connections.len());
                    connections.push(Connection::new(fu, tu, &config.synapse));
                }
            }
            tracts.push(Tract::new(
                &spec.kind,
                from,
                to,
                &layers[from].id,
                &layers[to].id,
                from_units.start,
                to_units.start,
                start..connections.len(),
                params,
            ));
        }

        let n = units.len();
        Ok(Self {
            units,
            active: vec![false; n],
            owned: vec![true; n],
            connections,
            layers,
            tracts,
            unit_params: config.unit,
            synapse: config.synapse,
            tier: ExecutionTier::default(),
            noise,
            epoch: 0,
        })
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn tracts(&self) -> &[Tract] {
        &self.tracts
    }

    pub fn layer(&self, id: LayerId) -> &Layer {
        &self.layers[id]
    }

    pub fn tract(&self, id: TractId) -> &Tract {
        &self.tracts[id]
    }

    pub fn layer_id(&self, name: &str) -> Result<LayerId, SimError> {
        layer_index(&self.layers, name)
    }

    pub fn tract_id(&self, name: &str) -> Option<TractId> {
        self.tracts.iter().position(|t| t.id == name)
    }

    /// Global activation buffer.
    pub fn active(&self) -> &[bool] {
        &self.active
    }

    pub(crate) fn active_mut(&mut self) -> &mut [bool] {
        &mut self.active
    }

    pub fn layer_active(&self, id: LayerId) -> &[bool] {
        &self.active[self.layers[id].units.clone()]
    }

    pub fn tract_connections(&self, id: TractId) -> &[Connection] {
        &self.connections[self.tracts[id].connections.clone()]
    }

    pub fn synapse(&self) -> &SynapseParams {
        &self.synapse
    }

    pub fn layer_ranges(&self) -> Vec<Range<UnitId>> {
        self.layers.iter().map(|l| l.units.clone()).collect()
    }

    pub fn set_owned(&mut self, owned: Vec<bool>) {
        debug_assert_eq!(owned.len(), self.units.len());
        self.owned = owned;
    }

    pub fn owns(&self, unit: UnitId) -> bool {
        self.owned[unit]
    }

    pub fn set_execution_tier(&mut self, tier: ExecutionTier) {
        self.tier = tier;
    }

    pub fn execution_tier(&self) -> ExecutionTier {
        self.tier
    }

    /// The tier actually used, given compiled features.
    pub fn effective_execution_tier(&self) -> ExecutionTier {
        match self.tier {
            ExecutionTier::Parallel if cfg!(feature = "parallel") => ExecutionTier::Parallel,
            _ => ExecutionTier::Scalar,
        }
    }

    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    /// Phase one of a settle cycle: every owned unit of every layer that is
    /// neither frozen nor clamped decides its next state.
    pub fn compute_new_activations(&mut self) {
        let epoch = self.next_epoch();
        let tier = self.effective_execution_tier();
        let Self {
            units,
            active,
            owned,
            connections,
            layers,
            unit_params,
            noise,
            ..
        } = self;

        for layer in layers.iter().filter(|l| !l.is_frozen() && !l.clamped) {
            let inhibition = layer.inhibition();
            let range = layer.units.clone();
            let base = range.start;

            match tier {
                #[cfg(feature = "parallel")]
                ExecutionTier::Parallel => {
                    use rayon::prelude::*;
                    let (connections, active, owned, unit_params, noise) =
                        (&*connections, &*active, &*owned, &*unit_params, &*noise);
                    units[range].par_iter_mut().enumerate().for_each(|(i, u)| {
                        let uid = base + i;
                        if owned[uid] {
                            let draw = noise.keyed_f64(epoch, uid as u64);
                            u.compute_new_activation(connections, active, inhibition, unit_params, draw);
                        }
                    });
                }
                _ => {
                    for (i, u) in units[range].iter_mut().enumerate() {
                        let uid = base + i;
                        if owned[uid] {
                            let draw = noise.keyed_f64(epoch, uid as u64);
                            u.compute_new_activation(connections, active, inhibition, unit_params, draw);
                        }
                    }
                }
            }
        }
    }

    /// Phase two: commit pending states of owned units.
    pub fn apply_new_activations(&mut self) {
        for layer in self.layers.iter().filter(|l| !l.is_frozen() && !l.clamped) {
            for uid in layer.units.clone() {
                if self.owned[uid] {
                    self.active[uid] = self.units[uid].next_active();
                }
            }
        }
    }

    /// Run every non-frozen layer's controller against the (synchronized)
    /// activation buffer.
    pub fn adjust_inhibition(&mut self, time: SimTime) -> Result<(), SimError> {
        for layer in self.layers.iter_mut().filter(|l| !l.is_frozen()) {
            let n = layer.num_active(&self.active[layer.units.clone()]);
            layer.adjust_inhibition(n, time)?;
        }
        Ok(())
    }

    fn for_each_tract<F>(
        &mut self,
        clock: &SimClock,
        mut select: impl FnMut(&Tract) -> bool,
        mut f: F,
    ) -> Result<usize, SimError>
    where
        F: FnMut(&mut Tract, &mut [Connection], &PlasticityCtx<'_>) -> Result<usize, SimError>,
    {
        let epoch = self.next_epoch();
        let ctx = PlasticityCtx {
            active: &self.active,
            owned: &self.owned,
            synapse: &self.synapse,
            clock,
            noise: &self.noise,
            epoch,
        };
        let mut total = 0;
        for tract in self.tracts.iter_mut().filter(|t| select(t)) {
            let conns = &mut self.connections[tract.connections.clone()];
            total += f(tract, conns, &ctx)?;
        }
        Ok(total)
    }

    pub fn calc_rates(&mut self, clock: &SimClock) -> Result<(), SimError> {
        for t in &mut self.tracts {
            t.calc_rates(clock)?;
        }
        Ok(())
    }

    /// Acquisition learning on every tract. Returns newly potentiated
    /// connections owned here.
    pub fn acquire(&mut self, cycles: u32, tag: &str, clock: &SimClock) -> Result<usize, SimError> {
        self.for_each_tract(clock, |_| true, |t, conns, ctx| t.acquire(cycles, tag, conns, ctx))
    }

    pub fn consolidate(&mut self, cycles: u32, clock: &SimClock) -> Result<usize, SimError> {
        self.for_each_tract(clock, |_| true, |t, conns, ctx| t.consolidate(cycles, conns, ctx))
    }

    pub fn maintain(&mut self, clock: &SimClock) -> Result<(), SimError> {
        self.for_each_tract(clock, |_| true, |t, conns, ctx| {
            t.maintain(conns, ctx)?;
            Ok(0)
        })?;
        Ok(())
    }

    pub fn reactivate_tracts(&mut self, clock: &SimClock) -> Result<(), SimError> {
        self.for_each_tract(clock, |_| true, |t, conns, ctx| {
            t.reactivate(conns, ctx)?;
            Ok(0)
        })?;
        Ok(())
    }

    /// PSI on or off for every tract starting or ending in `layer`.
    pub fn toggle_psi(&mut self, layer: LayerId, on: bool) {
        for t in self.tracts.iter().filter(|t| t.from == layer || t.to == layer) {
            t.toggle_psi(&mut self.connections[t.connections.clone()], on);
        }
    }

    pub fn num_potentiated(&self, tract: TractId) -> usize {
        let t = &self.tracts[tract];
        t.num_potentiated(&self.connections[t.connections.clone()], &self.owned)
    }

    /// Clear every layer and release clamps.
    pub fn clear(&mut self) {
        self.active.fill(false);
        for l in &mut self.layers {
            l.clamped = false;
        }
    }

    pub fn set_clamped(&mut self, layer: LayerId, clamped: bool) {
        self.layers[layer].clamped = clamped;
    }

    pub fn make_pattern(&mut self, layer: LayerId, id: &str, rng: &mut Prng, time: SimTime) -> Result<(), SimError> {
        self.layers[layer].make_pattern(id, rng, time)?;
        Ok(())
    }

    pub fn set_pattern(&mut self, layer: LayerId, id: &str, time: SimTime) -> Result<(), SimError> {
        let l = &self.layers[layer];
        l.set_pattern(id, &mut self.active[l.units.clone()], time)
    }

    pub fn set_random_pattern(&mut self, layer: LayerId, rng: &mut Prng, time: SimTime) -> Result<String, SimError> {
        let l = &self.layers[layer];
        l.set_random_pattern(&mut self.active[l.units.clone()], rng, time)
    }

    pub fn clear_patterns(&mut self, layer: LayerId) {
        self.layers[layer].clear_patterns();
    }

    pub fn randomize(&mut self, layer: LayerId, rng: &mut Prng, time: SimTime) -> Result<(), SimError> {
        let l = &self.layers[layer];
        l.randomize(&mut self.active[l.units.clone()], rng, time)
    }

    /// Returns whether the request took effect (a lesioned layer ignores it).
    pub fn set_frozen(&mut self, layer: LayerId, frozen: bool) -> bool {
        let l = &mut self.layers[layer];
        let range = l.units.clone();
        l.set_frozen(frozen, &mut self.units[range.clone()], &mut self.active[range])
    }

    pub fn lesion(&mut self, layer: LayerId) {
        let l = &mut self.layers[layer];
        let range = l.units.clone();
        l.lesion(&mut self.units[range.clone()], &mut self.active[range]);
    }

    pub fn save_inhibition(&mut self) {
        self.layers.iter_mut().for_each(Layer::save_inhibition);
    }

    pub fn restore_inhibition(&mut self) {
        self.layers.iter_mut().for_each(Layer::restore_inhibition);
    }

    pub fn num_active(&self, layer: LayerId) -> usize {
        self.layers[layer].num_active(self.layer_active(layer))
    }

    /// Score over the units this worker owns only; `None` if the layer
    /// never defined `pattern`.
    pub fn owned_score(&self, layer: LayerId, pattern: &str) -> Option<PatternScore> {
        let l = &self.layers[layer];
        let view: Vec<bool> = l
            .units
            .clone()
            .map(|u| self.active[u] && self.owned[u])
            .collect();
        l.score(pattern, &view)
    }

    pub fn size_summary(&self) -> SizeSummary {
        let layers: Vec<SizeEntry> = self
            .layers
            .iter()
            .map(|l| SizeEntry {
                id: l.id.clone(),
                count: l.size(),
            })
            .collect();
        let tracts: Vec<SizeEntry> = self
            .tracts
            .iter()
            .map(|t| SizeEntry {
                id: t.id.clone(),
                count: t.connections.len(),
            })
            .collect();
        SizeSummary {
            total_units: layers.iter().map(|e| e.count).sum(),
            total_connections: tracts.iter().map(|e| e.count).sum(),
            layers,
            tracts,
        }
    }
}

fn layer_index(layers: &[Layer], name: &str) -> Result<LayerId, SimError> {
    layers
        .iter()
        .position(|l| l.id == name)
        .ok_or_else(|| SimError::UnknownLayer(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LayerSpec, SimParams, Topology};

    fn two_layer_config() -> ModelConfig {
        let topology = Topology::new(vec![
            LayerSpec::new("A", "hpc", 4, 4, 0.25),
            LayerSpec::new("B", "nc", 2, 3, 0.5),
        ])
        .with_bi_tract("A", "B", "hpc")
        .with_tract("A", "A", "hpc");
        ModelConfig::with_topology(topology).with_sim(SimParams {
            hub_layer: "A".into(),
            cue_layer: "B".into(),
            test_frozen_layers: vec![],
            ..SimParams::default()
        })
    }

    #[test]
    fn build_lays_out_arena() {
        let net = Network::build(&two_layer_config(), Prng::new(1)).unwrap();
        assert_eq!(net.units().len(), 22);
        assert_eq!(net.layer(1).units, 16..22);

        // A->B: 16*6, B->A: 6*16, A->A: 16*15 (no self-loops).
        let sizes: Vec<usize> = net.tracts().iter().map(|t| t.connections.len()).collect();
        assert_eq!(sizes, vec![96, 96, 240]);
        assert!(net.connections().iter().all(|c| c.from != c.to));

        // Every connection is listed as inbound on its target.
        for (cid, c) in net.connections().iter().enumerate() {
            assert!(net.units()[c.to].inbound().contains(&cid));
        }
        let summary = net.size_summary();
        assert_eq!(summary.total_units, 22);
        assert_eq!(summary.total_connections, 432);
        assert_eq!(net.tract_id("B-A"), Some(1));
    }

    #[test]
    fn compute_is_two_phase() {
        let mut net = Network::build(&two_layer_config(), Prng::new(1)).unwrap();
        let a = net.layer_id("A").unwrap();
        let mut rng = Prng::new(2);
        net.randomize(a, &mut rng, 0).unwrap();
        let before = net.active().to_vec();
        net.compute_new_activations();
        assert_eq!(net.active(), &before[..]);
        net.apply_new_activations();
        for (u, unit) in net.units().iter().enumerate() {
            assert_eq!(net.active()[u], unit.next_active());
        }
    }

    #[test]
    fn clamped_layer_holds_its_pattern() {
        let mut net = Network::build(&two_layer_config(), Prng::new(1)).unwrap();
        let a = net.layer_id("A").unwrap();
        let mut rng = Prng::new(2);
        net.make_pattern(a, "p", &mut rng, 0).unwrap();
        net.set_pattern(a, "p", 0).unwrap();
        net.set_clamped(a, true);
        let held = net.layer_active(a).to_vec();
        for _ in 0..10 {
            net.compute_new_activations();
            net.apply_new_activations();
        }
        assert_eq!(net.layer_active(a), &held[..]);
    }

    #[test]
    fn psi_touches_only_adjacent_tracts() {
        let topology = Topology::new(vec![
            LayerSpec::new("A", "hpc", 2, 2, 0.5),
            LayerSpec::new("B", "nc", 2, 2, 0.5),
            LayerSpec::new("C", "nc", 2, 2, 0.5),
        ])
        .with_tract("A", "B", "hpc")
        .with_tract("B", "C", "hpc");
        let config = ModelConfig::with_topology(topology).with_sim(SimParams {
            hub_layer: "A".into(),
            cue_layer: "A".into(),
            test_frozen_layers: vec![],
            ..SimParams::default()
        });
        let mut net = Network::build(&config, Prng::new(1)).unwrap();
        net.toggle_psi(net.layer_id("A").unwrap(), true);
        assert!(net.tract_connections(0).iter().all(Connection::psi_on));
        assert!(!net.tract_connections(1).iter().any(Connection::psi_on));
    }

    #[test]
    fn owned_score_masks_foreign_units() {
        let mut net = Network::build(&two_layer_config(), Prng::new(1)).unwrap();
        let a = net.layer_id("A").unwrap();
        let mut rng = Prng::new(5);
        net.make_pattern(a, "p", &mut rng, 0).unwrap();
        net.set_pattern(a, "p", 0).unwrap();
        assert_eq!(net.owned_score(a, "p").unwrap().hits, 4);

        net.set_owned(vec![false; net.units().len()]);
        let s = net.owned_score(a, "p").unwrap();
        assert_eq!((s.target, s.hits, s.extras), (4, 0, 0));
    }
}

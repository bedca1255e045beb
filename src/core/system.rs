//! Simulation controller.
//!
//! Owns the network, the clock, the event list and the shared random
//! stream, and drives the protocol: present and train patterns, replay the
//! hub during consolidation, run background maintenance every step, apply
//! scheduled perturbations and tests recall with cued retrievals.

use tracing::{debug, info};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::clock::{SimClock, SimTime};
use crate::config::ModelConfig;
use crate::distributed::{Distribution, Standalone};
use crate::error::SimError;
use crate::events::SimEvent;
use crate::network::{ExecutionTier, LayerId, Network};
use crate::observer::{
    connection_lines, render_grid, unit_lines, Record, ScoreRecord, SimulationAdapter, SystemSnapshot, CONN_HEADER,
    UNIT_HEADER,
};
use crate::prng::Prng;
use crate::scheduler::Scheduler;

/// Stream id of the keyed noise generator, forked off the shared one.
const NOISE_STREAM: u64 = 0x6e6f_6973_65;

/// Everything the coordinator recorded during [`Simulation::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RunReport {
    pub records: Vec<Record>,
    pub final_time: SimTime,
}

impl RunReport {
    pub fn scores(&self) -> impl Iterator<Item = &ScoreRecord> {
        self.records.iter().filter_map(Record::as_score)
    }
}

pub struct Simulation {
    config: ModelConfig,
    network: Network,
    clock: SimClock,
    scheduler: Scheduler<SimEvent>,
    /// Replicated decisions; advanced identically on every worker.
    shared: Prng,
    dist: Box<dyn Distribution>,
    hub: LayerId,
    cue: LayerId,
    test_frozen: Vec<LayerId>,
    records: Vec<Record>,
}

impl Simulation {
    pub fn new(config: ModelConfig) -> Result<Self, SimError> {
        Self::with_distribution(config, Box::new(Standalone))
    }

    /// Build this worker's replica. Every worker must be given the same
    /// config, including the seed.
    pub fn with_distribution(config: ModelConfig, mut dist: Box<dyn Distribution>) -> Result<Self, SimError> {
        config.validate()?;
        let shared = Prng::new(config.sim.seed);
        let mut network = Network::build(&config, shared.fork(NOISE_STREAM))?;
        let owned = dist.bind(&network.layer_ranges(), network.units().len())?;
        network.set_owned(owned);

        let hub = network.layer_id(&config.sim.hub_layer)?;
        let cue = network.layer_id(&config.sim.cue_layer)?;
        let test_frozen = config
            .sim
            .test_frozen_layers
            .iter()
            .map(|id| network.layer_id(id))
            .collect::<Result<Vec<_>, _>>()?;

        let mut sim = Self {
            clock: SimClock::new(config.sim.time_step),
            config,
            network,
            scheduler: Scheduler::new(),
            shared,
            dist,
            hub,
            cue,
            test_frozen,
            records: Vec::new(),
        };
        sim.schedule_from_config()?;
        sim.calc_rates()?;
        Ok(sim)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn hub(&self) -> LayerId {
        self.hub
    }

    pub fn cue(&self) -> LayerId {
        self.cue
    }

    pub fn layer_id(&self, name: &str) -> Result<LayerId, SimError> {
        self.network.layer_id(name)
    }

    pub fn is_coordinator(&self) -> bool {
        self.dist.is_coordinator()
    }

    pub fn pending_events(&self) -> usize {
        self.scheduler.len()
    }

    pub fn set_execution_tier(&mut self, tier: ExecutionTier) {
        self.network.set_execution_tier(tier);
    }

    /// This worker's view; tract counts cover owned connections only.
    pub fn snapshot(&self) -> SystemSnapshot {
        SimulationAdapter::new(self).snapshot()
    }

    /// Snapshot with tract counts summed over every worker. Every worker
    /// must call it; the coordinator gets `Some`.
    pub fn collect_snapshot(&mut self) -> Result<Option<SystemSnapshot>, SimError> {
        let mut snapshot = self.snapshot();
        let partial: Vec<u64> = snapshot.tracts.iter().map(|t| t.num_potentiated as u64).collect();
        let Some(totals) = self.dist.combine_counts(&partial)? else {
            return Ok(None);
        };
        for (t, total) in snapshot.tracts.iter_mut().zip(totals) {
            t.num_potentiated = total as usize;
        }
        Ok(Some(snapshot))
    }

    /// Final connection and unit state lines, headers included. Every
    /// worker must call it; the coordinator gets `Some`.
    pub fn state_lines(&mut self) -> Result<Option<Vec<String>>, SimError> {
        let now = self.clock.now;
        let owned = connection_lines(&self.network, now);
        let Some(conns) = self.dist.gather_lines(owned)? else {
            return Ok(None);
        };
        let mut lines = Vec::with_capacity(conns.len() + self.network.units().len() + 2);
        lines.push(CONN_HEADER.to_string());
        lines.extend(conns.into_iter().map(|(_, line)| line));
        lines.push(UNIT_HEADER.to_string());
        lines.extend(unit_lines(&self.network, now));
        Ok(Some(lines))
    }

    /// Records produced since the last call.
    pub fn take_records(&mut self) -> Vec<Record> {
        std::mem::take(&mut self.records)
    }

    fn record(&mut self, record: Record) {
        if self.dist.is_coordinator() {
            self.records.push(record);
        }
    }

    pub fn schedule(&mut self, at: SimTime, event: SimEvent) {
        self.scheduler.schedule(at, event);
    }

    /// Turn the configured perturbation times into events. Freeze and PSI
    /// times alternate on/off, starting with on.
    fn schedule_from_config(&mut self) -> Result<(), SimError> {
        let spec = self.config.schedule.clone();
        for &(at, hours) in &spec.time_step_changes {
            self.schedule(at, SimEvent::ChangeTimeStep { hours });
        }
        for &at in &spec.reactivate_times {
            self.schedule(at, SimEvent::Reactivate);
        }
        for (name, times) in &spec.freeze_times {
            let layer = self.network.layer_id(name)?;
            for (i, &at) in times.iter().enumerate() {
                self.schedule(at, SimEvent::SetFrozen { layer, frozen: i % 2 == 0 });
            }
        }
        for (name, &at) in &spec.lesion_times {
            let layer = self.network.layer_id(name)?;
            self.schedule(at, SimEvent::Lesion { layer });
        }
        for (name, times) in &spec.psi_times {
            let layer = self.network.layer_id(name)?;
            for (i, &at) in times.iter().enumerate() {
                self.schedule(at, SimEvent::TogglePsi { layer, on: i % 2 == 0 });
            }
        }
        debug!(target: "engram::schedule", events = self.scheduler.len(), "scheduled");
        Ok(())
    }

    pub fn calc_rates(&mut self) -> Result<(), SimError> {
        self.network.calc_rates(&self.clock)
    }

    /// Fire every event due now.
    pub fn process_events(&mut self) -> Result<(), SimError> {
        while let Some(ev) = self.scheduler.pop_due(self.clock.now) {
            self.handle(ev.payload)?;
        }
        Ok(())
    }

    fn handle(&mut self, event: SimEvent) -> Result<(), SimError> {
        info!(
            target: "engram::schedule",
            time = self.clock.now,
            event = event.name(),
            "event"
        );
        match event {
            SimEvent::ChangeTimeStep { hours } => {
                self.clock.time_step = hours;
                self.calc_rates()?;
            }
            SimEvent::Reactivate => self.reactivate()?,
            SimEvent::SetFrozen { layer, frozen } => {
                self.set_frozen(layer, frozen);
            }
            SimEvent::Lesion { layer } => self.lesion(layer),
            SimEvent::TogglePsi { layer, on } => self.toggle_psi(layer, on),
        }
        Ok(())
    }

    /// Synchronous compute/apply cycles with inhibition control.
    pub fn settle(&mut self) -> Result<(), SimError> {
        for _ in 0..self.config.sim.settle_cycles {
            self.network.compute_new_activations();
            self.network.apply_new_activations();
            self.dist.synchronize(self.network.active_mut())?;
            self.network.adjust_inhibition(self.clock.now)?;
        }
        Ok(())
    }

    /// Silence every layer and release clamps.
    pub fn clear(&mut self) {
        self.network.clear();
    }

    pub fn randomize(&mut self, layer: LayerId) -> Result<(), SimError> {
        self.network.randomize(layer, &mut self.shared, self.clock.now)
    }

    /// False if the layer is lesioned and the request was ignored.
    pub fn set_frozen(&mut self, layer: LayerId, frozen: bool) -> bool {
        self.network.set_frozen(layer, frozen)
    }

    pub fn lesion(&mut self, layer: LayerId) {
        info!(
            target: "engram::schedule",
            time = self.clock.now,
            layer = %self.network.layer(layer).id,
            "lesion"
        );
        self.network.lesion(layer);
    }

    pub fn toggle_psi(&mut self, layer: LayerId, on: bool) {
        self.network.toggle_psi(layer, on);
    }

    /// Define pattern `id` in every layer and make it the current activity.
    pub fn present_pattern(&mut self, id: &str) -> Result<(), SimError> {
        let now = self.clock.now;
        for layer in 0..self.network.layers().len() {
            self.network.make_pattern(layer, id, &mut self.shared, now)?;
            self.network.set_pattern(layer, id, now)?;
        }
        self.record_grids(&format!("Pattern {id}"));
        Ok(())
    }

    pub fn acquire(&mut self, cycles: u32, tag: &str) -> Result<usize, SimError> {
        let newly = self.network.acquire(cycles, tag, &self.clock)?;
        debug!(
            target: "engram::plasticity",
            time = self.clock.now,
            tag,
            newly,
            "acquired"
        );
        Ok(newly)
    }

    /// One-shot learning of the current activity.
    pub fn train(&mut self) -> Result<usize, SimError> {
        self.acquire(self.config.sim.train_stim_cycles, "train")
    }

    /// Replay a random hub pattern and learn what the network settles into.
    pub fn consolidate(&mut self) -> Result<(), SimError> {
        self.clear();
        if self.network.layer(self.hub).is_frozen() {
            debug!(target: "engram::schedule", time = self.clock.now, "hub frozen, no replay");
            return Ok(());
        }

        let now = self.clock.now;
        let pattern = self.network.set_random_pattern(self.hub, &mut self.shared, now)?;
        self.network.set_clamped(self.hub, true);
        info!(target: "engram::schedule", time = now, %pattern, "replay");

        self.record_grids("cons-present");
        self.settle()?;
        self.score_layers("cons", &pattern)?;
        self.record_grids("cons-settled");

        self.network
            .consolidate(self.config.sim.cons_stim_cycles, &self.clock)?;
        Ok(())
    }

    pub fn maintain(&mut self) -> Result<(), SimError> {
        self.network.maintain(&self.clock)
    }

    /// Clamp `pattern` in `cue`, settle, score every layer that knows it.
    pub fn retrieve(&mut self, cue: LayerId, pattern: &str, condition: &str) -> Result<Vec<ScoreRecord>, SimError> {
        self.clear();
        self.network.set_pattern(cue, pattern, self.clock.now)?;
        self.network.set_clamped(cue, true);

        self.record_grids(&format!("{condition}-present"));
        self.settle()?;
        let scores = self.score_layers(condition, pattern)?;
        self.record_grids(&format!("{condition}-settled"));
        Ok(scores)
    }

    /// Cued retrieval that leaves inhibition as it found it.
    pub fn test(&mut self, condition: &str) -> Result<Vec<ScoreRecord>, SimError> {
        let pattern = self.config.sim.cue_pattern.clone();
        self.network.save_inhibition();
        let scores = self.retrieve(self.cue, &pattern, condition);
        self.network.restore_inhibition();
        scores
    }

    /// `intact`, then one test per configured layer with it frozen.
    pub fn test_suite(&mut self) -> Result<(), SimError> {
        self.test("intact")?;
        for layer in self.test_frozen.clone() {
            let was_frozen = self.network.layer(layer).is_frozen();
            if !was_frozen {
                self.set_frozen(layer, true);
            }
            let condition = format!("{}-frozen", self.network.layer(layer).id.to_lowercase());
            self.test(&condition)?;
            if !was_frozen {
                self.set_frozen(layer, false);
            }
        }
        Ok(())
    }

    /// Recall the cue pattern, trigger reactivation in every tract, then
    /// replace the hub's catalog with one freshly trained pattern.
    pub fn reactivate(&mut self) -> Result<(), SimError> {
        let pattern = self.config.sim.cue_pattern.clone();
        self.retrieve(self.cue, &pattern, "reactivate")?;
        self.network.reactivate_tracts(&self.clock)?;

        let now = self.clock.now;
        self.network.clear_patterns(self.hub);
        self.network.make_pattern(self.hub, "react", &mut self.shared, now)?;
        self.network.set_pattern(self.hub, "react", now)?;
        self.record_grids("Pattern react");

        self.acquire(self.config.sim.react_stim_cycles, "react")?;
        Ok(())
    }

    /// One timestep: due events, replay, maintenance, advance.
    pub fn iterate(&mut self) -> Result<(), SimError> {
        self.process_events()?;
        self.consolidate()?;
        self.maintain()?;
        self.clock.advance();
        Ok(())
    }

    /// Score `pattern` in every layer that defines it. Returns the scores
    /// on the coordinator, nothing elsewhere.
    fn score_layers(&mut self, condition: &str, pattern: &str) -> Result<Vec<ScoreRecord>, SimError> {
        let mut scores = Vec::new();
        for layer in 0..self.network.layers().len() {
            let Some(local) = self.network.owned_score(layer, pattern) else {
                continue;
            };
            let partial = [local.hits as u64, local.extras as u64];
            if let Some(total) = self.dist.combine_layer_counts(layer, &partial)? {
                let score = ScoreRecord {
                    time: self.clock.now,
                    condition: condition.to_string(),
                    layer: self.network.layer(layer).id.clone(),
                    target: local.target,
                    hits: total[0] as usize,
                    extras: total[1] as usize,
                };
                self.record(Record::Score(score.clone()));
                scores.push(score);
            }
        }
        Ok(scores)
    }

    /// Active units per layer and potentiated connections per tract.
    pub fn record_state(&mut self) -> Result<(), SimError> {
        let now = self.clock.now;
        for layer in 0..self.network.layers().len() {
            let record = Record::LayerActivity {
                time: now,
                layer: self.network.layer(layer).id.clone(),
                active: self.network.num_active(layer),
            };
            self.record(record);
        }

        let partial: Vec<u64> = (0..self.network.tracts().len())
            .map(|t| self.network.num_potentiated(t) as u64)
            .collect();
        if let Some(totals) = self.dist.combine_counts(&partial)? {
            for (t, count) in totals.into_iter().enumerate() {
                let record = Record::Potentiated {
                    time: now,
                    tract: self.network.tract(t).id.clone(),
                    count,
                };
                self.record(record);
            }
        }
        Ok(())
    }

    fn record_grids(&mut self, tag: &str) {
        if !self.dist.is_coordinator() {
            return;
        }
        let now = self.clock.now;
        let grids: Vec<Record> = self
            .network
            .layers()
            .iter()
            .enumerate()
            .filter(|(_, l)| l.prints_patterns())
            .map(|(lid, l)| Record::Grid {
                time: now,
                tag: tag.to_string(),
                layer: l.id.clone(),
                rendering: render_grid(l.width as usize, l.height as usize, self.network.layer_active(lid)),
            })
            .collect();
        self.records.extend(grids);
    }

    /// The full protocol: background patterns, training of the cue pattern,
    /// then one step plus a test suite at a time until the stop time.
    pub fn run(&mut self) -> Result<RunReport, SimError> {
        info!(
            policy = self.dist.policy(),
            rank = self.dist.rank(),
            workers = self.dist.world_size(),
            seed = self.config.sim.seed,
            "run started"
        );
        self.calc_rates()?;
        self.process_events()?;

        for i in 0..self.config.sim.background_patterns {
            self.present_pattern(&format!("dummy-{i}"))?;
            self.train()?;
            self.iterate()?;
        }

        let pattern = self.config.sim.cue_pattern.clone();
        self.present_pattern(&pattern)?;
        self.train()?;

        while self.clock.now < self.config.sim.stop_time {
            self.iterate()?;
            self.record_state()?;
            self.test_suite()?;
        }

        info!(time = self.clock.now, "run finished");
        Ok(RunReport {
            records: self.take_records(),
            final_time: self.clock.now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InhibitionParams, LayerSpec, ScheduleSpec, SimParams, Topology, UnitParams};
    use crate::connection::potentiation_probability;
    use crate::distributed::{LayerPinned, RoundRobin, ThreadComm};

    fn small_config(seed: u64) -> ModelConfig {
        ModelConfig::default().with_sim(SimParams {
            settle_cycles: 10,
            stop_time: 3 * 24,
            ..SimParams::default().with_seed(seed)
        })
    }

    #[test]
    fn settle_holds_activity_near_target() {
        let topology = Topology::new(vec![LayerSpec::new("X", "hpc", 10, 10, 0.1)]).with_tract("X", "X", "hpc");
        let mut config = ModelConfig::with_topology(topology).with_sim(SimParams {
            test_frozen_layers: vec![],
            settle_cycles: 20,
            ..SimParams::default().with_roles("X", "X").with_seed(11)
        });
        config.unit = UnitParams::default().with_activation(2.0, -1.0);
        config.inhibition = InhibitionParams::default()
            .with_bounds(-5.0, 5.0)
            .with_init(1.0)
            .with_increment(0.1);

        let mut sim = Simulation::new(config).unwrap();
        let x = sim.layer_id("X").unwrap();
        sim.randomize(x).unwrap();
        for _ in 0..10 {
            sim.settle().unwrap();
        }
        let samples = 100;
        let mut total = 0;
        for _ in 0..samples {
            sim.settle().unwrap();
            total += sim.network().num_active(x);
        }
        let mean = total as f64 / samples as f64;
        assert!((mean - 10.0).abs() < 1.5, "mean activity {mean}");
    }

    #[test]
    fn training_potentiates_hebbian_connections_at_the_expected_rate() {
        let topology = Topology::new(vec![
            LayerSpec::new("A", "hpc", 4, 4, 0.25),
            LayerSpec::new("B", "hpc", 4, 4, 0.25),
        ])
        .with_bi_tract("A", "B", "hpc");

        let (mut hebbian, mut potentiated) = (0usize, 0usize);
        let mut expected = 0.0;
        for seed in 1..=200 {
            let config = ModelConfig::with_topology(topology.clone()).with_sim(SimParams {
                train_stim_cycles: 20,
                test_frozen_layers: vec![],
                ..SimParams::default().with_roles("A", "B").with_seed(seed)
            });
            let mut sim = Simulation::new(config).unwrap();
            sim.present_pattern("p").unwrap();
            let net = sim.network();
            assert!(net.connections().iter().all(|c| !c.is_potentiated()));

            sim.train().unwrap();
            let net = sim.network();
            expected = potentiation_probability(20, net.synapse(), net.tract(0).rates().max_pot_prob);
            for c in net.connections() {
                if c.is_hebbian(net.active()) {
                    hebbian += 1;
                    potentiated += usize::from(c.is_potentiated());
                } else {
                    assert!(!c.is_potentiated());
                }
            }
        }
        assert_eq!(hebbian, 200 * 32);
        let rate = potentiated as f64 / hebbian as f64;
        assert!((rate - expected).abs() < 0.03, "rate {rate} expected {expected}");
    }

    #[test]
    fn test_leaves_inhibition_untouched() {
        let mut sim = Simulation::new(small_config(3)).unwrap();
        sim.present_pattern("CS-US").unwrap();
        sim.train().unwrap();
        let before: Vec<f64> = sim.network().layers().iter().map(|l| l.inhibition()).collect();
        let scores = sim.test("intact").unwrap();
        let after: Vec<f64> = sim.network().layers().iter().map(|l| l.inhibition()).collect();
        assert_eq!(before, after);
        assert_eq!(scores.len(), 4);

        // The clamped cue reproduces its pattern exactly.
        let cue = scores.iter().find(|s| s.layer == "SC0").unwrap();
        assert_eq!((cue.target, cue.hits, cue.extras), (4, 4, 0));
    }

    #[test]
    fn lesion_is_permanent_and_stops_replay() {
        let mut sim = Simulation::new(small_config(4)).unwrap();
        sim.present_pattern("CS-US").unwrap();
        sim.train().unwrap();
        let hpc = sim.hub();
        sim.lesion(hpc);
        assert!(!sim.set_frozen(hpc, false));
        assert!(sim.network().layer(hpc).is_frozen());

        sim.consolidate().unwrap();
        assert!(sim.network().active().iter().all(|&a| !a));
    }

    #[test]
    fn reactivation_replaces_hub_catalog() {
        let mut sim = Simulation::new(small_config(5)).unwrap();
        sim.present_pattern("CS-US").unwrap();
        sim.train().unwrap();
        sim.reactivate().unwrap();

        let hub = sim.network().layer(sim.hub());
        assert_eq!(hub.pattern_ids(), &["react".to_string()]);
        let sc0 = sim.network().layer(sim.cue());
        assert!(sc0.pattern("CS-US").is_some());
        for t in sim.network().tracts() {
            assert_eq!(t.enzyme_level(), t.params().react_enzyme_level);
        }
    }

    #[test]
    fn scheduled_events_fire_on_their_step() {
        let config = small_config(6).with_schedule(
            ScheduleSpec::default()
                .with_freeze_times("ACC", vec![24, 48])
                .with_psi_times("SC1", vec![24])
                .with_time_step_change(48, 12),
        );
        let mut sim = Simulation::new(config).unwrap();
        let acc = sim.layer_id("ACC").unwrap();
        sim.present_pattern("CS-US").unwrap();
        sim.train().unwrap();
        assert_eq!(sim.pending_events(), 4);

        sim.iterate().unwrap(); // t = 0
        assert!(!sim.network().layer(acc).is_frozen());
        sim.iterate().unwrap(); // t = 24
        assert!(sim.network().layer(acc).is_frozen());
        let net = sim.network();
        for (tid, t) in net.tracts().iter().enumerate() {
            let touches_sc1 = t.id.split('-').any(|l| l == "SC1");
            assert_eq!(net.tract_connections(tid).iter().all(|c| c.psi_on()), touches_sc1);
        }
        let daily_decay = sim.network().tract(0).rates().psd_decay;
        sim.iterate().unwrap(); // t = 48
        assert!(!sim.network().layer(acc).is_frozen());
        assert_eq!(sim.clock().time_step, 12);
        assert_eq!(sim.clock().now, 60);
        assert!(sim.network().tract(0).rates().psd_decay < daily_decay);
        assert_eq!(sim.pending_events(), 0);
    }

    #[test]
    fn run_reports_every_condition() {
        let mut sim = Simulation::new(small_config(7)).unwrap();
        let report = sim.run().unwrap();
        assert_eq!(report.final_time, 72);

        let count = |cond: &str| report.scores().filter(|s| s.condition == cond).count();
        assert_eq!(count("intact"), 12);
        assert_eq!(count("acc-frozen"), 12);
        assert_eq!(count("hpc-frozen"), 12);
        assert_eq!(count("cons"), 12);

        for s in report.scores() {
            assert_eq!(s.target, 4);
            assert!(s.hits <= 4);
            if s.condition == "hpc-frozen" && s.layer == "HPC" {
                assert_eq!((s.hits, s.extras), (0, 0));
            }
        }
        // Freezing for a test does not leak into the next step.
        assert!(!sim.network().layers().iter().any(|l| l.is_frozen()));
    }

    fn run_distributed<F>(config: &ModelConfig, workers: usize, make: F) -> RunReport
    where
        F: Fn(ThreadComm) -> Box<dyn Distribution> + Sync,
    {
        let reports: Vec<RunReport> = std::thread::scope(|scope| {
            let handles: Vec<_> = ThreadComm::group(workers)
                .into_iter()
                .map(|comm| {
                    let make = &make;
                    scope.spawn(move || {
                        let mut sim = Simulation::with_distribution(config.clone(), make(comm)).unwrap();
                        sim.run().unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for other in &reports[1..] {
            assert!(other.records.is_empty());
        }
        reports.into_iter().next().unwrap()
    }

    #[test]
    fn distributed_state_lines_cover_every_connection() {
        let config = small_config(9);
        let mut standalone = Simulation::new(config.clone()).unwrap();
        standalone.run().unwrap();
        let expected = standalone.state_lines().unwrap().unwrap();
        let expected_snapshot = standalone.collect_snapshot().unwrap().unwrap();
        let conn_lines = expected.iter().filter(|l| l.contains(" conn ")).count();
        assert_eq!(conn_lines, standalone.network().connections().len());

        let outputs: Vec<(Option<Vec<String>>, Option<SystemSnapshot>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = ThreadComm::group(3)
                .into_iter()
                .map(|comm| {
                    let config = config.clone();
                    scope.spawn(move || {
                        let dist: Box<dyn Distribution> = Box::new(RoundRobin::new(comm));
                        let mut sim = Simulation::with_distribution(config, dist).unwrap();
                        sim.run().unwrap();
                        (sim.state_lines().unwrap(), sim.collect_snapshot().unwrap())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(outputs[0].0.as_ref(), Some(&expected));
        assert_eq!(outputs[0].1.as_ref(), Some(&expected_snapshot));
        assert!(outputs[1..].iter().all(|(l, s)| l.is_none() && s.is_none()));
    }

    #[test]
    fn distributed_runs_match_standalone() {
        let config = ModelConfig::default()
            .with_sim(SimParams {
                settle_cycles: 8,
                background_patterns: 1,
                stop_time: 3 * 24,
                ..SimParams::default().with_seed(21)
            })
            .with_schedule(ScheduleSpec::default().with_reactivation(48));

        let standalone = Simulation::new(config.clone()).unwrap().run().unwrap();
        assert!(standalone.scores().count() > 0);

        let round_robin = run_distributed(&config, 3, |c| Box::new(RoundRobin::new(c)) as Box<dyn Distribution>);
        assert_eq!(round_robin, standalone);

        let pinned = run_distributed(&config, 6, |c| Box::new(LayerPinned::new(c)) as Box<dyn Distribution>);
        assert_eq!(pinned, standalone);
    }
}

use std::collections::{BTreeMap, BTreeSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::props::Props;
use crate::clock::{parse_day_hours, SimTime};
use crate::connection::STRENGTH_NORM;
use crate::error::ConfigError;

fn check_unit_interval(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::OutOfRange {
            name: name.to_string(),
            value,
            expected: "a value in [0, 1]",
        });
    }
    Ok(())
}

fn check_non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::OutOfRange {
            name: name.to_string(),
            value,
            expected: "a finite value >= 0",
        });
    }
    Ok(())
}

fn check_finite(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::OutOfRange {
            name: name.to_string(),
            value,
            expected: "a finite value",
        });
    }
    Ok(())
}

fn day_hours_list(props: &mut Props, name: &str) -> Result<Vec<SimTime>, ConfigError> {
    props
        .get_or::<Vec<String>>(name, Vec::new())?
        .iter()
        .map(|s| parse_day_hours(s))
        .collect()
}

/// Activation function of every unit.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct UnitParams {
    /// Sigmoid gain.
    pub act_func_k: f64,
    /// Net input at or below this never activates a unit.
    pub act_threshold: f64,
}

impl Default for UnitParams {
    fn default() -> Self {
        Self {
            act_func_k: 5.0,
            act_threshold: 0.05,
        }
    }
}

impl UnitParams {
    pub fn with_activation(mut self, k: f64, threshold: f64) -> Self {
        self.act_func_k = k;
        self.act_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_finite("actFuncK", self.act_func_k)?;
        check_finite("actThreshold", self.act_threshold)
    }

    pub fn from_props(props: &mut Props) -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            act_func_k: props.get_or("actFuncK", d.act_func_k)?,
            act_threshold: props.get_or("actThreshold", d.act_threshold)?,
        })
    }
}

/// Receptor and PSD bounds shared by every connection.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SynapseParams {
    pub min_psd_size: f64,
    pub max_psd_size: f64,
    /// Floor of the stable (slow) receptor pool.
    pub min_slow_receptors: f64,
    /// Floor of the mobile (fast) receptor pool.
    pub min_fast_receptors: f64,
    /// Gain of the potentiation sigmoid over stimulation cycles.
    pub pot_prob_k: f64,
    /// Number of cycles at which the potentiation sigmoid crosses 0.5.
    pub pot_prob_half: f64,
}

impl Default for SynapseParams {
    fn default() -> Self {
        Self {
            min_psd_size: 2.0,
            max_psd_size: 100.0,
            min_slow_receptors: 1.0,
            min_fast_receptors: 1.0,
            pot_prob_k: 0.2,
            pot_prob_half: 20.0,
        }
    }
}

impl SynapseParams {
    pub fn with_psd_bounds(mut self, min: f64, max: f64) -> Self {
        self.min_psd_size = min;
        self.max_psd_size = max;
        self
    }

    pub fn with_receptor_floors(mut self, slow: f64, fast: f64) -> Self {
        self.min_slow_receptors = slow;
        self.min_fast_receptors = fast;
        self
    }

    pub fn with_potentiation_curve(mut self, k: f64, half: f64) -> Self {
        self.pot_prob_k = k;
        self.pot_prob_half = half;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_non_negative("minPsdSize", self.min_psd_size)?;
        check_non_negative("maxPsdSize", self.max_psd_size)?;
        check_non_negative("minNumCiAmpars", self.min_slow_receptors)?;
        check_non_negative("minNumCpAmpars", self.min_fast_receptors)?;
        check_finite("potProbK", self.pot_prob_k)?;
        check_finite("potProbHalf", self.pot_prob_half)?;
        if self.max_psd_size < self.min_psd_size {
            return Err(ConfigError::Invalid(format!(
                "maxPsdSize {} < minPsdSize {}",
                self.max_psd_size, self.min_psd_size
            )));
        }
        if self.max_psd_size > STRENGTH_NORM {
            return Err(ConfigError::OutOfRange {
                name: "maxPsdSize".into(),
                value: self.max_psd_size,
                expected: "at most the full-strength receptor count (100)",
            });
        }
        if self.min_slow_receptors + self.min_fast_receptors > self.max_psd_size {
            return Err(ConfigError::Invalid(
                "receptor floors exceed maxPsdSize".into(),
            ));
        }
        Ok(())
    }

    pub fn from_props(props: &mut Props) -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            min_psd_size: props.get_or("minPsdSize", d.min_psd_size)?,
            max_psd_size: props.get_or("maxPsdSize", d.max_psd_size)?,
            min_slow_receptors: props.get_or("minNumCiAmpars", d.min_slow_receptors)?,
            min_fast_receptors: props.get_or("minNumCpAmpars", d.min_fast_receptors)?,
            pot_prob_k: props.get_or("potProbK", d.pot_prob_k)?,
            pot_prob_half: props.get_or("potProbHalf", d.pot_prob_half)?,
        })
    }
}

/// Homeostatic inhibition controller bounds, shared by every layer.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct InhibitionParams {
    pub min: f64,
    pub max: f64,
    pub init: f64,
    /// Step per unit of relative activity error.
    pub increment: f64,
}

impl Default for InhibitionParams {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 10.0,
            init: 1.0,
            increment: 0.1,
        }
    }
}

impl InhibitionParams {
    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_init(mut self, init: f64) -> Self {
        self.init = init;
        self
    }

    pub fn with_increment(mut self, increment: f64) -> Self {
        self.increment = increment;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_finite("minInhibition", self.min)?;
        check_finite("maxInhibition", self.max)?;
        check_non_negative("inhibIncr", self.increment)?;
        if !(self.min..=self.max).contains(&self.init) {
            return Err(ConfigError::OutOfRange {
                name: "initInhibition".into(),
                value: self.init,
                expected: "a value within [minInhibition, maxInhibition]",
            });
        }
        Ok(())
    }

    pub fn from_props(props: &mut Props) -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            min: props.get_or("minInhibition", d.min)?,
            max: props.get_or("maxInhibition", d.max)?,
            init: props.get_or("initInhibition", d.init)?,
            increment: props.get_or("inhibIncr", d.increment)?,
        })
    }
}

/// Geometry and pattern policy of one layer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LayerSpec {
    pub id: String,
    /// Free-form population type, e.g. `hpc` or `nc`.
    pub kind: String,
    pub width: u32,
    pub height: u32,
    /// Target active fraction.
    pub k: f64,
    /// Carve patterns out of never-used units instead of sampling.
    #[cfg_attr(feature = "serde", serde(default))]
    pub orthogonal_patterns: bool,
    /// Render activation grids in diagnostics.
    #[cfg_attr(feature = "serde", serde(default))]
    pub print_patterns: bool,
}

impl LayerSpec {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, width: u32, height: u32, k: f64) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            width,
            height,
            k,
            orthogonal_patterns: false,
            print_patterns: false,
        }
    }

    pub fn with_orthogonal_patterns(mut self, on: bool) -> Self {
        self.orthogonal_patterns = on;
        self
    }

    pub fn size(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Units per pattern and the inhibition controller's target.
    pub fn pattern_size(&self) -> usize {
        (self.k * self.size() as f64).floor() as usize
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "layer {}: empty geometry {}x{}",
                self.id, self.width, self.height
            )));
        }
        if !(self.k > 0.0 && self.k <= 1.0) {
            return Err(ConfigError::OutOfRange {
                name: format!("{}.k", self.id),
                value: self.k,
                expected: "a value in (0, 1]",
            });
        }
        if self.pattern_size() == 0 {
            return Err(ConfigError::Invalid(format!(
                "layer {}: k * size rounds down to zero active units",
                self.id
            )));
        }
        Ok(())
    }

    pub fn from_props(props: &mut Props, id: &str, default_kind: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            id: id.to_string(),
            kind: props.get_or(&format!("{id}.type"), default_kind.to_string())?,
            width: props.get(&format!("{id}.width"))?,
            height: props.get(&format!("{id}.height"))?,
            k: props.get(&format!("{id}.k"))?,
            orthogonal_patterns: props.get_or("orthogonalPatterns", false)?,
            print_patterns: props.get_or("printPatterns", false)?,
        })
    }
}

/// Kinetic constants of one tract type, per reference interval.
///
/// `acq_learn_rate` and `react_enzyme_level` are not time-scaled.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TractParams {
    pub acq_learn_rate: f64,
    pub react_enzyme_level: f64,
    pub cons_learn_rate: f64,
    pub psd_decay_rate: f64,
    pub fast_removal_rate: f64,
    /// Additive receptor count per reference interval; not a fraction.
    pub slow_insertion_rate: f64,
    pub slow_removal_rate: f64,
    pub base_depot_prob: f64,
    pub max_enzyme_depot_prob: f64,
    pub enzyme_decay_rate: f64,
    pub max_pot_prob: f64,
}

impl Default for TractParams {
    fn default() -> Self {
        Self::hub()
    }
}

impl TractParams {
    /// Fast-learning, fast-forgetting tracts touching the hub.
    pub fn hub() -> Self {
        Self {
            acq_learn_rate: 0.1,
            react_enzyme_level: 1.0,
            cons_learn_rate: 0.002,
            psd_decay_rate: 0.01,
            fast_removal_rate: 0.05,
            slow_insertion_rate: 0.5,
            slow_removal_rate: 0.05,
            base_depot_prob: 0.002,
            max_enzyme_depot_prob: 0.05,
            enzyme_decay_rate: 0.05,
            max_pot_prob: 0.5,
        }
    }

    /// Slow-learning, durable tracts between peripheral layers.
    pub fn neocortical() -> Self {
        Self {
            acq_learn_rate: 0.02,
            cons_learn_rate: 0.01,
            psd_decay_rate: 0.002,
            base_depot_prob: 0.0002,
            max_pot_prob: 0.2,
            ..Self::hub()
        }
    }

    /// Built-in defaults for a tract type name.
    pub fn for_kind(kind: &str) -> Self {
        match kind {
            "nc" => Self::neocortical(),
            _ => Self::hub(),
        }
    }

    pub fn with_learn_rates(mut self, acquisition: f64, consolidation: f64) -> Self {
        self.acq_learn_rate = acquisition;
        self.cons_learn_rate = consolidation;
        self
    }

    pub fn with_depotentiation(mut self, base: f64, max_enzyme: f64) -> Self {
        self.base_depot_prob = base;
        self.max_enzyme_depot_prob = max_enzyme;
        self
    }

    pub fn with_max_pot_prob(mut self, p: f64) -> Self {
        self.max_pot_prob = p;
        self
    }

    /// Every constant in [0, 1] except the additive insertion rate.
    pub fn validate(&self, kind: &str) -> Result<(), ConfigError> {
        let checks = [
            ("acqLearnRate", self.acq_learn_rate),
            ("reactE3Level", self.react_enzyme_level),
            ("consLearnRate01h", self.cons_learn_rate),
            ("psdDecayRate01h", self.psd_decay_rate),
            ("cpAmparRemovalRate01h", self.fast_removal_rate),
            ("ciAmparRemovalRate01h", self.slow_removal_rate),
            ("baseDepotProb01h", self.base_depot_prob),
            ("maxE3DepotProb01h", self.max_enzyme_depot_prob),
            ("e3DecayRate01h", self.enzyme_decay_rate),
            ("maxPotProb01h", self.max_pot_prob),
        ];
        for (name, value) in checks {
            check_unit_interval(&format!("{kind}.{name}"), value)?;
        }
        check_non_negative(
            &format!("{kind}.ciAmparInsertionRate01h"),
            self.slow_insertion_rate,
        )
    }

    pub fn from_props(props: &mut Props, kind: &str) -> Result<Self, ConfigError> {
        let d = Self::for_kind(kind);
        let mut get = |name: &str, default: f64| props.get_or(&format!("{kind}.{name}"), default);
        Ok(Self {
            acq_learn_rate: get("acqLearnRate", d.acq_learn_rate)?,
            react_enzyme_level: get("reactE3Level", d.react_enzyme_level)?,
            cons_learn_rate: get("consLearnRate01h", d.cons_learn_rate)?,
            psd_decay_rate: get("psdDecayRate01h", d.psd_decay_rate)?,
            fast_removal_rate: get("cpAmparRemovalRate01h", d.fast_removal_rate)?,
            slow_insertion_rate: get("ciAmparInsertionRate01h", d.slow_insertion_rate)?,
            slow_removal_rate: get("ciAmparRemovalRate01h", d.slow_removal_rate)?,
            base_depot_prob: get("baseDepotProb01h", d.base_depot_prob)?,
            max_enzyme_depot_prob: get("maxE3DepotProb01h", d.max_enzyme_depot_prob)?,
            enzyme_decay_rate: get("e3DecayRate01h", d.enzyme_decay_rate)?,
            max_pot_prob: get("maxPotProb01h", d.max_pot_prob)?,
        })
    }
}

/// One directed tract; `kind` selects its [`TractParams`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TractSpec {
    pub from: String,
    pub to: String,
    pub kind: String,
}

impl TractSpec {
    pub fn new(from: impl Into<String>, to: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: kind.into(),
        }
    }

    pub fn id(&self) -> String {
        format!("{}-{}", self.from, self.to)
    }

    /// Parse `FROM-TO:kind`.
    fn parse(token: &str) -> Result<Self, ConfigError> {
        let bad = || ConfigError::Invalid(format!("bad tract '{token}' (expected FROM-TO:type)"));
        let (pair, kind) = token.split_once(':').ok_or_else(bad)?;
        let (from, to) = pair.split_once('-').ok_or_else(bad)?;
        if from.is_empty() || to.is_empty() || kind.is_empty() {
            return Err(bad());
        }
        Ok(Self::new(from, to, kind))
    }
}

/// Layers and the directed tracts between them.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Topology {
    pub layers: Vec<LayerSpec>,
    pub tracts: Vec<TractSpec>,
}

impl Default for Topology {
    /// Hub HPC wired to ACC and two sensory cortices; ACC wired to both.
    fn default() -> Self {
        let layers = vec![
            LayerSpec::new("HPC", "hpc", 4, 4, 0.25),
            LayerSpec::new("ACC", "nc", 4, 4, 0.25),
            LayerSpec::new("SC0", "nc", 4, 4, 0.25),
            LayerSpec::new("SC1", "nc", 4, 4, 0.25),
        ];
        Topology::new(layers)
            .with_bi_tract("HPC", "ACC", "hpc")
            .with_bi_tract("HPC", "SC0", "hpc")
            .with_bi_tract("HPC", "SC1", "hpc")
            .with_bi_tract("ACC", "SC0", "nc")
            .with_bi_tract("ACC", "SC1", "nc")
    }
}

impl Topology {
    pub fn new(layers: Vec<LayerSpec>) -> Self {
        Self {
            layers,
            tracts: Vec::new(),
        }
    }

    pub fn with_tract(mut self, from: &str, to: &str, kind: &str) -> Self {
        self.tracts.push(TractSpec::new(from, to, kind));
        self
    }

    /// Two tracts, one in either direction.
    pub fn with_bi_tract(self, a: &str, b: &str, kind: &str) -> Self {
        self.with_tract(a, b, kind).with_tract(b, a, kind)
    }

    pub fn layer(&self, id: &str) -> Option<&LayerSpec> {
        self.layers.iter().find(|l| l.id == id)
    }

    /// Distinct tract types in first-use order.
    pub fn tract_kinds(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.tracts
            .iter()
            .filter(|t| seen.insert(t.kind.clone()))
            .map(|t| t.kind.clone())
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.layers.is_empty() {
            return Err(ConfigError::Invalid("no layers defined".into()));
        }
        let mut ids = BTreeSet::new();
        for l in &self.layers {
            l.validate()?;
            if !ids.insert(l.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate layer id '{}'", l.id)));
            }
        }
        let mut tract_ids = BTreeSet::new();
        for t in &self.tracts {
            for end in [&t.from, &t.to] {
                if !ids.contains(end.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "tract {} references unknown layer '{end}'",
                        t.id()
                    )));
                }
            }
            if !tract_ids.insert(t.id()) {
                return Err(ConfigError::Invalid(format!("duplicate tract '{}'", t.id())));
            }
        }
        Ok(())
    }

    pub fn from_props(props: &mut Props, hub: &str) -> Result<Self, ConfigError> {
        let default = Topology::default();
        let default_ids: Vec<String> = default.layers.iter().map(|l| l.id.clone()).collect();
        let ids: Vec<String> = props.get_or("layers", default_ids)?;

        let mut layers = Vec::with_capacity(ids.len());
        for id in &ids {
            let kind = if id == hub { "hpc" } else { "nc" };
            layers.push(LayerSpec::from_props(props, id, kind)?);
        }

        let default_bi: Vec<String> = default
            .tracts
            .iter()
            .step_by(2)
            .map(|t| format!("{}:{}", t.id(), t.kind))
            .collect();

        let mut topology = Topology::new(layers);
        for token in props.get_or::<Vec<String>>("biTracts", default_bi)? {
            let t = TractSpec::parse(&token)?;
            topology = topology.with_bi_tract(&t.from, &t.to, &t.kind);
        }
        for token in props.get_or::<Vec<String>>("tracts", Vec::new())? {
            topology.tracts.push(TractSpec::parse(&token)?);
        }
        Ok(topology)
    }
}

/// Protocol constants of a run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SimParams {
    pub train_stim_cycles: u32,
    pub cons_stim_cycles: u32,
    pub react_stim_cycles: u32,
    pub settle_cycles: u32,
    /// Hours.
    pub stop_time: SimTime,
    pub background_patterns: u32,
    /// Initial step length in hours.
    pub time_step: u32,
    pub seed: u64,
    /// Layer replayed during consolidation.
    pub hub_layer: String,
    /// Layer cued in tests and reactivation.
    pub cue_layer: String,
    /// Pattern trained, tested and reactivated.
    pub cue_pattern: String,
    /// Layers each frozen for one extra test condition.
    pub test_frozen_layers: Vec<String>,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            train_stim_cycles: 50,
            cons_stim_cycles: 5,
            react_stim_cycles: 50,
            settle_cycles: 20,
            stop_time: 30 * 24,
            background_patterns: 0,
            time_step: 24,
            seed: 1,
            hub_layer: "HPC".into(),
            cue_layer: "SC0".into(),
            cue_pattern: "CS-US".into(),
            test_frozen_layers: vec!["ACC".into(), "HPC".into()],
        }
    }
}

impl SimParams {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_stop_time(mut self, hours: SimTime) -> Self {
        self.stop_time = hours;
        self
    }

    pub fn with_time_step(mut self, hours: u32) -> Self {
        self.time_step = hours;
        self
    }

    pub fn with_roles(mut self, hub: &str, cue: &str) -> Self {
        self.hub_layer = hub.into();
        self.cue_layer = cue.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.time_step == 0 {
            return Err(ConfigError::Invalid("timeStep must be >= 1 hour".into()));
        }
        if self.settle_cycles == 0 {
            return Err(ConfigError::Invalid("numSettleCycles must be >= 1".into()));
        }
        Ok(())
    }

    pub fn from_props(props: &mut Props) -> Result<Self, ConfigError> {
        let d = Self::default();
        let stop_time = match props.get_or::<Option<String>>("stopTime", None)? {
            Some(s) => parse_day_hours(&s)?,
            None => d.stop_time,
        };
        Ok(Self {
            train_stim_cycles: props.get_or("trainNumStimCycles", d.train_stim_cycles)?,
            cons_stim_cycles: props.get_or("consNumStimCycles", d.cons_stim_cycles)?,
            react_stim_cycles: props.get_or("reactNumStimCycles", d.react_stim_cycles)?,
            settle_cycles: props.get_or("numSettleCycles", d.settle_cycles)?,
            stop_time,
            background_patterns: props.get_or("numBackgroundPatterns", d.background_patterns)?,
            time_step: props.get_or("timeStep", d.time_step)?,
            seed: props.get_or("seed", d.seed)?,
            hub_layer: props.get_or("hubLayer", d.hub_layer)?,
            cue_layer: props.get_or("cueLayer", d.cue_layer)?,
            cue_pattern: props.get_or("cuePattern", d.cue_pattern)?,
            test_frozen_layers: props.get_or("testFrozenLayers", d.test_frozen_layers)?,
        })
    }
}

/// Perturbations scheduled at setup. Times are hours.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ScheduleSpec {
    /// `(time, new step length in hours)`.
    pub time_step_changes: Vec<(SimTime, u32)>,
    pub reactivate_times: Vec<SimTime>,
    /// Alternating freeze / unfreeze, starting with freeze.
    pub freeze_times: BTreeMap<String, Vec<SimTime>>,
    pub lesion_times: BTreeMap<String, SimTime>,
    /// Alternating PSI on / off, starting with on.
    pub psi_times: BTreeMap<String, Vec<SimTime>>,
}

impl ScheduleSpec {
    pub fn with_reactivation(mut self, at: SimTime) -> Self {
        self.reactivate_times.push(at);
        self
    }

    pub fn with_lesion(mut self, layer: &str, at: SimTime) -> Self {
        self.lesion_times.insert(layer.into(), at);
        self
    }

    pub fn with_freeze_times(mut self, layer: &str, times: Vec<SimTime>) -> Self {
        self.freeze_times.insert(layer.into(), times);
        self
    }

    pub fn with_psi_times(mut self, layer: &str, times: Vec<SimTime>) -> Self {
        self.psi_times.insert(layer.into(), times);
        self
    }

    pub fn with_time_step_change(mut self, at: SimTime, hours: u32) -> Self {
        self.time_step_changes.push((at, hours));
        self
    }

    pub fn validate(&self, topology: &Topology) -> Result<(), ConfigError> {
        let layer_names = self
            .freeze_times
            .keys()
            .chain(self.lesion_times.keys())
            .chain(self.psi_times.keys());
        for name in layer_names {
            if topology.layer(name).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "schedule references unknown layer '{name}'"
                )));
            }
        }
        if let Some((at, _)) = self.time_step_changes.iter().find(|(_, h)| *h == 0) {
            return Err(ConfigError::Invalid(format!(
                "timeStepChanges: zero step length at {at}h"
            )));
        }
        Ok(())
    }

    pub fn from_props(props: &mut Props, layer_ids: &[String]) -> Result<Self, ConfigError> {
        let raw: Vec<String> = props.get_or("timeStepChanges", Vec::new())?;
        if raw.len() % 2 != 0 {
            return Err(ConfigError::Invalid(
                "timeStepChanges must hold (time, hours) pairs".into(),
            ));
        }
        let mut time_step_changes = Vec::with_capacity(raw.len() / 2);
        for pair in raw.chunks_exact(2) {
            let hours = pair[1].trim().parse::<u32>().map_err(|_| {
                ConfigError::Invalid(format!("timeStepChanges: bad step length '{}'", pair[1]))
            })?;
            time_step_changes.push((parse_day_hours(&pair[0])?, hours));
        }

        let mut spec = ScheduleSpec {
            time_step_changes,
            reactivate_times: day_hours_list(props, "reactivateTimes")?,
            ..Default::default()
        };

        for id in layer_ids {
            let freezes = day_hours_list(props, &format!("{id}.freezeTimes"))?;
            if !freezes.is_empty() {
                spec.freeze_times.insert(id.clone(), freezes);
            }
            let psi = day_hours_list(props, &format!("{id}.psiTimes"))?;
            if !psi.is_empty() {
                spec.psi_times.insert(id.clone(), psi);
            }
            if let Some(s) = props.get_or::<Option<String>>(&format!("{id}.lesionTime"), None)? {
                spec.lesion_times.insert(id.clone(), parse_day_hours(&s)?);
            }
        }
        Ok(spec)
    }
}

/// Everything needed to build and run a simulation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ModelConfig {
    pub unit: UnitParams,
    pub synapse: SynapseParams,
    pub inhibition: InhibitionParams,
    pub topology: Topology,
    /// Tract type name -> kinetic constants.
    pub tract_types: BTreeMap<String, TractParams>,
    pub sim: SimParams,
    pub schedule: ScheduleSpec,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let topology = Topology::default();
        let tract_types = topology
            .tract_kinds()
            .into_iter()
            .map(|k| {
                let p = TractParams::for_kind(&k);
                (k, p)
            })
            .collect();
        Self {
            unit: UnitParams::default(),
            synapse: SynapseParams::default(),
            inhibition: InhibitionParams::default(),
            topology,
            tract_types,
            sim: SimParams::default(),
            schedule: ScheduleSpec::default(),
        }
    }
}

impl ModelConfig {
    /// A config over `topology` with built-in constants for its tract types.
    pub fn with_topology(topology: Topology) -> Self {
        let tract_types = topology
            .tract_kinds()
            .into_iter()
            .map(|k| {
                let p = TractParams::for_kind(&k);
                (k, p)
            })
            .collect();
        Self {
            topology,
            tract_types,
            ..Default::default()
        }
    }

    pub fn with_sim(mut self, sim: SimParams) -> Self {
        self.sim = sim;
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleSpec) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.unit.validate()?;
        self.synapse.validate()?;
        self.inhibition.validate()?;
        self.topology.validate()?;
        self.sim.validate()?;
        self.schedule.validate(&self.topology)?;

        for kind in self.topology.tract_kinds() {
            match self.tract_types.get(&kind) {
                Some(p) => p.validate(&kind)?,
                None => {
                    return Err(ConfigError::Invalid(format!(
                        "no parameters for tract type '{kind}'"
                    )))
                }
            }
        }

        let roles = [&self.sim.hub_layer, &self.sim.cue_layer]
            .into_iter()
            .chain(self.sim.test_frozen_layers.iter());
        for id in roles {
            if self.topology.layer(id).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "role references unknown layer '{id}'"
                )));
            }
        }
        Ok(())
    }

    /// Read every parameter; layer geometry is required, the rest defaults.
    pub fn from_props(props: &mut Props) -> Result<Self, ConfigError> {
        let unit = UnitParams::from_props(props)?;
        let synapse = SynapseParams::from_props(props)?;
        let inhibition = InhibitionParams::from_props(props)?;
        let sim = SimParams::from_props(props)?;
        let topology = Topology::from_props(props, &sim.hub_layer)?;

        let mut tract_types = BTreeMap::new();
        for kind in topology.tract_kinds() {
            let p = TractParams::from_props(props, &kind)?;
            tract_types.insert(kind, p);
        }

        let layer_ids: Vec<String> = topology.layers.iter().map(|l| l.id.clone()).collect();
        let schedule = ScheduleSpec::from_props(props, &layer_ids)?;

        let config = Self {
            unit,
            synapse,
            inhibition,
            topology,
            tract_types,
            sim,
            schedule,
        };
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "serde")]
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| ConfigError::Invalid(format!("bad JSON config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid(format!("cannot encode config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYERS: &str = "\
HPC.width: 4\nHPC.height: 4\nHPC.k: 0.25\n\
ACC.width: 4\nACC.height: 4\nACC.k: 0.25\n\
SC0.width: 4\nSC0.height: 4\nSC0.k: 0.25\n\
SC1.width: 4\nSC1.height: 4\nSC1.k: 0.25\n";

    fn props(extra: &str) -> Props {
        let mut p = Props::new();
        p.read_str(&format!("{LAYERS}{extra}"), "model.props").unwrap();
        p
    }

    #[test]
    fn defaults_validate() {
        ModelConfig::default().validate().unwrap();
    }

    #[test]
    fn default_topology_has_ten_tracts() {
        let t = Topology::default();
        assert_eq!(t.tracts.len(), 10);
        assert_eq!(t.tract_kinds(), vec!["hpc".to_string(), "nc".to_string()]);
        assert!(t.tracts.iter().any(|s| s.id() == "SC1-ACC"));
    }

    #[test]
    fn from_props_reads_kinetics_and_schedule() {
        let mut p = props(
            "hpc.maxPotProb01h: 0.9\n\
             timeStep: 6\n\
             stopTime: 10:12\n\
             reactivateTimes: { 3 5:6 }\n\
             timeStepChanges: { 2:0 12 }\n\
             HPC.freezeTimes: { 1 2 }\n\
             ACC.lesionTime: 4\n\
             SC0.psiTimes: { 1:0 }\n",
        );
        let c = ModelConfig::from_props(&mut p).unwrap();
        assert_eq!(c.tract_types["hpc"].max_pot_prob, 0.9);
        assert_eq!(c.sim.time_step, 6);
        assert_eq!(c.sim.stop_time, 10 * 24 + 12);
        assert_eq!(c.schedule.reactivate_times, vec![72, 126]);
        assert_eq!(c.schedule.time_step_changes, vec![(48, 12)]);
        assert_eq!(c.schedule.freeze_times["HPC"], vec![24, 48]);
        assert_eq!(c.schedule.lesion_times["ACC"], 96);
        assert_eq!(c.schedule.psi_times["SC0"], vec![24]);
        assert!(p.unused().is_empty());
    }

    #[test]
    fn missing_geometry_is_fatal() {
        let mut p = Props::new();
        p.read_str("HPC.width: 4\n", "model.props").unwrap();
        assert!(matches!(
            ModelConfig::from_props(&mut p),
            Err(ConfigError::Missing { .. })
        ));
    }

    #[test]
    fn rate_outside_unit_interval_is_rejected() {
        let mut p = props("nc.psdDecayRate01h: 1.5\n");
        match ModelConfig::from_props(&mut p) {
            Err(ConfigError::OutOfRange { name, .. }) => assert_eq!(name, "nc.psdDecayRate01h"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn insertion_rate_may_exceed_one() {
        let mut p = props("hpc.ciAmparInsertionRate01h: 3.0\n");
        let c = ModelConfig::from_props(&mut p).unwrap();
        assert_eq!(c.tract_types["hpc"].slow_insertion_rate, 3.0);
    }

    #[test]
    fn custom_topology_from_props() {
        let mut p = Props::new();
        p.read_str(
            "layers: { A B }\n\
             A.width: 4\nA.height: 4\nA.k: 0.25\n\
             B.width: 2\nB.height: 8\nB.k: 0.25\n\
             biTracts: { A-B:fast }\n\
             tracts: { A-A:fast }\n\
             hubLayer: A\ncueLayer: B\ntestFrozenLayers: { A }\n",
            "model.props",
        )
        .unwrap();
        let c = ModelConfig::from_props(&mut p).unwrap();
        let ids: Vec<String> = c.topology.tracts.iter().map(TractSpec::id).collect();
        assert_eq!(ids, vec!["A-B", "B-A", "A-A"]);
        assert_eq!(c.topology.layer("B").unwrap().pattern_size(), 4);
        assert!(c.tract_types.contains_key("fast"));
    }

    #[test]
    fn psd_beyond_full_strength_is_rejected() {
        let s = SynapseParams::default().with_psd_bounds(2.0, 150.0);
        assert!(matches!(
            s.validate(),
            Err(ConfigError::OutOfRange { ref name, .. }) if name == "maxPsdSize"
        ));
        SynapseParams::default().with_psd_bounds(2.0, STRENGTH_NORM).validate().unwrap();
    }

    #[test]
    fn zero_active_units_is_rejected() {
        let spec = LayerSpec::new("X", "nc", 2, 2, 0.1);
        assert!(spec.validate().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_config_round_trips_through_validation() {
        let c = ModelConfig::default();
        let text = c.to_json().unwrap();
        let back = ModelConfig::from_json(&text).unwrap();
        assert_eq!(back, c);
    }
}

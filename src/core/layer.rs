use std::ops::Range;

use hashbrown::HashMap;
use tracing::{debug, info};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::clock::SimTime;
use crate::config::{InhibitionParams, LayerSpec};
use crate::error::SimError;
use crate::network::UnitId;
use crate::prng::Prng;
use crate::unit::Unit;

/// A named set of unit indices (positions within the layer).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pattern {
    pub id: String,
    pub units: Vec<usize>,
}

/// Recall quality of one layer against one pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PatternScore {
    pub target: usize,
    pub hits: usize,
    /// Active units outside the pattern.
    pub extras: usize,
}

impl PatternScore {
    pub fn new(target: usize, hits: usize, num_active: usize) -> Self {
        Self {
            target,
            hits,
            extras: num_active.saturating_sub(hits),
        }
    }
}

/// Rectangular population sharing one inhibition controller.
///
/// Activation state lives in the network's buffer; methods that read or
/// write it take this layer's slice of that buffer.
#[derive(Debug, Clone)]
pub struct Layer {
    pub id: String,
    pub kind: String,
    pub width: u32,
    pub height: u32,
    pub k: f64,
    /// Slice of the network's unit arena.
    pub units: Range<UnitId>,
    /// Activation held externally; skip compute and apply.
    pub clamped: bool,
    frozen: bool,
    lesioned: bool,
    inhibition: f64,
    saved_inhibition: f64,
    params: InhibitionParams,
    orthogonal_patterns: bool,
    print_patterns: bool,
    next_pattern_unit: usize,
    patterns: HashMap<String, Pattern>,
    /// Definition order, for uniform random choice.
    pattern_ids: Vec<String>,
}

impl Layer {
    pub fn new(spec: &LayerSpec, units: Range<UnitId>, params: InhibitionParams) -> Self {
        Self {
            id: spec.id.clone(),
            kind: spec.kind.clone(),
            width: spec.width,
            height: spec.height,
            k: spec.k,
            units,
            clamped: false,
            frozen: false,
            lesioned: false,
            inhibition: params.init,
            saved_inhibition: params.init,
            params,
            orthogonal_patterns: spec.orthogonal_patterns,
            print_patterns: spec.print_patterns,
            next_pattern_unit: 0,
            patterns: HashMap::new(),
            pattern_ids: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.units.len()
    }

    /// `floor(k * size)`: units per pattern and the controller's setpoint.
    pub fn target_active(&self) -> usize {
        (self.k * self.size() as f64).floor() as usize
    }

    pub fn inhibition(&self) -> f64 {
        self.inhibition
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn is_lesioned(&self) -> bool {
        self.lesioned
    }

    pub fn prints_patterns(&self) -> bool {
        self.print_patterns
    }

    pub fn num_active(&self, active: &[bool]) -> usize {
        active.iter().filter(|&&a| a).count()
    }

    fn invalid(&self, time: SimTime, detail: &'static str) -> SimError {
        SimError::InvalidState {
            layer: self.id.clone(),
            time,
            detail,
        }
    }

    /// Nudge inhibition toward the level that yields `target_active` units.
    pub fn adjust_inhibition(&mut self, num_active: usize, time: SimTime) -> Result<(), SimError> {
        if self.frozen {
            return Err(self.invalid(time, "cannot adjust inhibition of a frozen layer"));
        }
        let target = self.target_active();
        if target == 0 {
            return Err(self.invalid(time, "target activity rounds down to zero"));
        }
        let error = num_active as f64 - target as f64;
        self.inhibition = (self.inhibition + error / target as f64 * self.params.increment)
            .clamp(self.params.min, self.params.max);

        debug!(
            target: "engram::inhibition",
            layer = %self.id,
            active = num_active,
            inhibition = self.inhibition,
            "adjusted"
        );
        Ok(())
    }

    pub fn save_inhibition(&mut self) {
        self.saved_inhibition = self.inhibition;
    }

    pub fn restore_inhibition(&mut self) {
        self.inhibition = self.saved_inhibition;
    }

    pub fn clear(&self, active: &mut [bool]) {
        active.fill(false);
    }

    /// Each unit active with probability `k`. Uses the shared generator, so
    /// every worker draws the same configuration.
    pub fn randomize(&self, active: &mut [bool], rng: &mut Prng, time: SimTime) -> Result<(), SimError> {
        if self.frozen {
            return Err(self.invalid(time, "cannot randomize a frozen layer"));
        }
        for a in active.iter_mut() {
            *a = rng.chance(self.k);
        }
        Ok(())
    }

    pub fn pattern(&self, id: &str) -> Option<&Pattern> {
        self.patterns.get(id)
    }

    pub fn pattern_ids(&self) -> &[String] {
        &self.pattern_ids
    }

    /// Define a new pattern of `target_active` units.
    ///
    /// Orthogonal layers hand out never-used units in order; others sample
    /// uniformly without replacement.
    pub fn make_pattern(&mut self, id: &str, rng: &mut Prng, time: SimTime) -> Result<&Pattern, SimError> {
        if self.patterns.contains_key(id) {
            return Err(SimError::DuplicatePattern {
                layer: self.id.clone(),
                pattern: id.to_string(),
                time,
            });
        }

        let count = self.target_active();
        let units = if self.orthogonal_patterns {
            if self.next_pattern_unit + count > self.size() {
                return Err(SimError::PatternsExhausted {
                    layer: self.id.clone(),
                    time,
                });
            }
            let start = self.next_pattern_unit;
            self.next_pattern_unit += count;
            (start..start + count).collect()
        } else {
            rng.sample_unique(count, self.size())
        };

        debug!(target: "engram::schedule", layer = %self.id, pattern = id, ?units, "pattern defined");
        self.pattern_ids.push(id.to_string());
        Ok(self
            .patterns
            .entry(id.to_string())
            .or_insert(Pattern {
                id: id.to_string(),
                units,
            }))
    }

    /// Clear the layer and activate the pattern's units. A frozen layer
    /// stays silent.
    pub fn set_pattern(&self, id: &str, active: &mut [bool], time: SimTime) -> Result<(), SimError> {
        let pattern = self.patterns.get(id).ok_or_else(|| SimError::UnknownPattern {
            layer: self.id.clone(),
            pattern: id.to_string(),
            time,
        })?;
        if self.frozen {
            return Ok(());
        }
        self.clear(active);
        for &i in &pattern.units {
            active[i] = true;
        }
        Ok(())
    }

    /// Apply a uniformly chosen defined pattern; returns its id.
    pub fn set_random_pattern(
        &self,
        active: &mut [bool],
        rng: &mut Prng,
        time: SimTime,
    ) -> Result<String, SimError> {
        if self.pattern_ids.is_empty() {
            return Err(self.invalid(time, "no patterns defined"));
        }
        let id = self.pattern_ids[rng.gen_range_usize(0, self.pattern_ids.len())].clone();
        self.set_pattern(&id, active, time)?;
        info!(target: "engram::schedule", layer = %self.id, pattern = %id, "random pattern");
        Ok(id)
    }

    pub fn clear_patterns(&mut self) {
        self.patterns.clear();
        self.pattern_ids.clear();
    }

    /// Hits and extras for a known pattern; `None` if the layer never
    /// defined it.
    pub fn score(&self, id: &str, active: &[bool]) -> Option<PatternScore> {
        let pattern = self.patterns.get(id)?;
        let hits = pattern.units.iter().filter(|&&i| active[i]).count();
        Some(PatternScore::new(pattern.units.len(), hits, self.num_active(active)))
    }

    /// Freeze or unfreeze. Ignored once lesioned. Returns whether the
    /// request took effect.
    pub fn set_frozen(&mut self, frozen: bool, units: &mut [Unit], active: &mut [bool]) -> bool {
        if self.lesioned {
            return false;
        }
        self.frozen = frozen;
        for u in units.iter_mut() {
            u.set_frozen(frozen);
        }
        if frozen {
            self.clear(active);
        }
        true
    }

    /// Permanent freeze.
    pub fn lesion(&mut self, units: &mut [Unit], active: &mut [bool]) {
        self.set_frozen(true, units, active);
        self.lesioned = true;
    }
}

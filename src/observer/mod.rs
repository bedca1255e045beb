use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::clock::SimTime;
use crate::network::{ConnId, Network};
use crate::system::Simulation;
use crate::unit::unit_label;

pub const SCORE_HEADER: &str = "time score condition layer target hits extras";
pub const LAYER_HEADER: &str = "time layer id numActive";
pub const TRACT_HEADER: &str = "time tract id numPotentiated";
pub const CONN_HEADER: &str = "time conn id psdSize fastCount slowCount potentiated hebbian";
pub const UNIT_HEADER: &str = "time unit id state";

/// Simulated hours as (possibly fractional) days.
pub fn days(time: SimTime) -> f64 {
    time as f64 / 24.0
}

/// Recall quality of one layer after a cued retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScoreRecord {
    pub time: SimTime,
    pub condition: String,
    pub layer: String,
    pub target: usize,
    pub hits: usize,
    pub extras: usize,
}

/// One line (or block) of run output, produced on the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Record {
    Score(ScoreRecord),
    LayerActivity {
        time: SimTime,
        layer: String,
        active: usize,
    },
    Potentiated {
        time: SimTime,
        tract: String,
        count: u64,
    },
    Grid {
        time: SimTime,
        tag: String,
        layer: String,
        rendering: String,
    },
}

impl Record {
    pub fn as_score(&self) -> Option<&ScoreRecord> {
        match self {
            Record::Score(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Score(s) => write!(
                f,
                "{} score {} {} {} {} {}",
                days(s.time),
                s.condition,
                s.layer,
                s.target,
                s.hits,
                s.extras
            ),
            Record::LayerActivity { time, layer, active } => write!(f, "{time} layer {layer} {active}"),
            Record::Potentiated { time, tract, count } => write!(f, "{time} tract {tract} {count}"),
            Record::Grid {
                time,
                tag,
                layer,
                rendering,
            } => write!(f, "{} {tag} {layer}\n{rendering}", days(*time)),
        }
    }
}

/// ASCII picture of a layer, `*` for active units.
///
/// ```text
/// +-------+
/// |*     *|
/// |  *    |
/// +-------+
/// ```
pub fn render_grid(width: usize, height: usize, active: &[bool]) -> String {
    let border = format!("+{}+", "-".repeat((2 * width).saturating_sub(1)));
    let mut out = border.clone();
    for row in 0..height {
        out.push_str("\n|");
        let cells: Vec<&str> = (0..width)
            .map(|col| if active[row * width + col] { "*" } else { " " })
            .collect();
        out.push_str(&cells.join(" "));
        out.push('|');
    }
    out.push('\n');
    out.push_str(&border);
    out
}

/// `time conn` lines for every connection this worker owns, keyed by
/// connection id.
pub fn connection_lines(net: &Network, time: SimTime) -> Vec<(ConnId, String)> {
    let active = net.active();
    let mut lines = Vec::new();
    for (tid, tract) in net.tracts().iter().enumerate() {
        for (offset, c) in net.tract_connections(tid).iter().enumerate() {
            if !net.owns(c.to) {
                continue;
            }
            let line = format!(
                "{} conn {} {:.1} {} {} {} {}",
                days(time),
                tract.connection_label(c),
                c.psd_size(),
                c.fast_receptors(),
                c.slow_receptors(),
                u8::from(c.is_potentiated()),
                u8::from(c.is_hebbian(active)),
            );
            lines.push((tract.connections.start + offset, line));
        }
    }
    lines
}

/// `time unit` lines, `a` for active and `i` for inactive.
pub fn unit_lines(net: &Network, time: SimTime) -> Vec<String> {
    let active = net.active();
    let mut lines = Vec::new();
    for layer in net.layers() {
        for (i, uid) in layer.units.clone().enumerate() {
            let state = if active[uid] { "a" } else { "i" };
            lines.push(format!("{} unit {} {state}", days(time), unit_label(&layer.id, i)));
        }
    }
    lines
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LayerSnapshot {
    pub id: String,
    pub size: usize,
    pub num_active: usize,
    pub inhibition: f64,
    pub clamped: bool,
    pub frozen: bool,
    pub lesioned: bool,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TractSnapshot {
    pub id: String,
    pub kind: String,
    pub connections: usize,
    /// Among connections owned by this worker, or over all workers in a
    /// snapshot from [`Simulation::collect_snapshot`].
    pub num_potentiated: usize,
    pub enzyme_level: f64,
    pub depot_prob: f64,
}

/// A read-only snapshot of the simulation state.
///
/// Taken on demand; the simulation cannot be steered through it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SystemSnapshot {
    pub time: SimTime,
    pub time_step: u32,
    pub pending_events: usize,
    pub layers: Vec<LayerSnapshot>,
    pub tracts: Vec<TractSnapshot>,
}

pub struct SimulationAdapter<'a> {
    sim: &'a Simulation,
}

impl<'a> SimulationAdapter<'a> {
    pub fn new(sim: &'a Simulation) -> Self {
        Self { sim }
    }

    pub fn snapshot(&self) -> SystemSnapshot {
        let net = self.sim.network();
        let clock = self.sim.clock();

        let layers = net
            .layers()
            .iter()
            .enumerate()
            .map(|(lid, l)| LayerSnapshot {
                id: l.id.clone(),
                size: l.size(),
                num_active: net.num_active(lid),
                inhibition: l.inhibition(),
                clamped: l.clamped,
                frozen: l.is_frozen(),
                lesioned: l.is_lesioned(),
                patterns: l.pattern_ids().to_vec(),
            })
            .collect();

        let tracts = net
            .tracts()
            .iter()
            .enumerate()
            .map(|(tid, t)| TractSnapshot {
                id: t.id.clone(),
                kind: t.kind.clone(),
                connections: t.connections.len(),
                num_potentiated: net.num_potentiated(tid),
                enzyme_level: t.enzyme_level(),
                depot_prob: t.depot_prob(),
            })
            .collect();

        SystemSnapshot {
            time: clock.now,
            time_step: clock.time_step,
            pending_events: self.sim.pending_events(),
            layers,
            tracts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_has_bordered_rows() {
        let active = [true, false, false, false, true, false];
        let grid = render_grid(3, 2, &active);
        assert_eq!(grid, "+-----+\n|*    |\n|  *  |\n+-----+");
    }

    #[test]
    fn score_line_uses_days() {
        let r = Record::Score(ScoreRecord {
            time: 36,
            condition: "intact".into(),
            layer: "HPC".into(),
            target: 4,
            hits: 3,
            extras: 1,
        });
        assert_eq!(r.to_string(), "1.5 score intact HPC 4 3 1");

        let r = Record::Potentiated {
            time: 48,
            tract: "HPC-ACC".into(),
            count: 7,
        };
        assert_eq!(r.to_string(), "48 tract HPC-ACC 7");
    }
}

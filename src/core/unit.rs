use crate::config::UnitParams;
use crate::connection::Connection;
use crate::network::{ConnId, LayerId};

/// Logistic curve crossing 0.5 at `x_half`; `k` sets the slope.
#[inline]
pub fn asigmoid(x: f64, k: f64, x_half: f64) -> f64 {
    1.0 / (1.0 + (-k * (x - x_half)).exp())
}

/// Probability that a unit with `net_input` becomes active.
///
/// Zero at or below the threshold, otherwise a sigmoid of the input
/// centred on the layer's inhibition level.
#[inline]
pub fn activation_probability(net_input: f64, inhibition: f64, params: &UnitParams) -> f64 {
    if net_input <= params.act_threshold {
        return 0.0;
    }
    asigmoid(net_input, params.act_func_k, inhibition)
}

/// `<layer>.<index>`, index zero-padded to two digits.
pub fn unit_label(layer: &str, index: usize) -> String {
    format!("{layer}.{index:02}")
}

/// One binary stochastic cell.
///
/// The current activation lives in the network's shared activation buffer
/// (so it can be gathered across workers); a unit only keeps its pending
/// next state.
#[derive(Debug, Clone)]
pub struct Unit {
    pub layer: LayerId,
    /// Position within the layer, row-major.
    pub index: usize,
    inbound: Vec<ConnId>,
    next_active: bool,
    last_net_input: f64,
    frozen: bool,
}

impl Unit {
    pub fn new(layer: LayerId, index: usize) -> Self {
        Self {
            layer,
            index,
            inbound: Vec::new(),
            next_active: false,
            last_net_input: 0.0,
            frozen: false,
        }
    }

    pub fn inbound(&self) -> &[ConnId] {
        &self.inbound
    }

    pub(crate) fn add_inbound(&mut self, conn: ConnId) {
        self.inbound.push(conn);
    }

    /// Sum of positive strengths over inbound connections from active units.
    pub fn net_input(&self, connections: &[Connection], active: &[bool]) -> f64 {
        self.inbound
            .iter()
            .map(|&c| &connections[c])
            .filter(|c| active[c.from])
            .map(Connection::strength)
            .filter(|&s| s > 0.0)
            .sum()
    }

    /// Phase one of a synchronous update: decide the next state.
    ///
    /// `draw` is a uniform variate in [0, 1) supplied by the caller.
    pub fn compute_new_activation(
        &mut self,
        connections: &[Connection],
        active: &[bool],
        inhibition: f64,
        params: &UnitParams,
        draw: f64,
    ) {
        if self.frozen {
            self.next_active = false;
            return;
        }
        let net = self.net_input(connections, active);
        self.next_active = draw < activation_probability(net, inhibition, params);
        self.last_net_input = net;
    }

    /// Pending state, committed by the layer in phase two.
    pub fn next_active(&self) -> bool {
        self.next_active
    }

    pub fn last_net_input(&self) -> f64 {
        self.last_net_input
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// The caller clears the unit's activation when freezing.
    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
        if frozen {
            self.next_active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SynapseParams;

    #[test]
    fn below_threshold_never_fires() {
        let p = UnitParams::default().with_activation(10.0, 0.5);
        assert_eq!(activation_probability(0.5, 0.0, &p), 0.0);
        assert!(activation_probability(0.51, 0.0, &p) > 0.99);
    }

    #[test]
    fn asigmoid_crosses_half_at_midpoint() {
        assert!((asigmoid(3.0, 2.0, 3.0) - 0.5).abs() < 1e-12);
        assert!(asigmoid(10.0, 2.0, 3.0) > 0.99);
        assert!(asigmoid(-10.0, 2.0, 3.0) < 0.01);
    }

    #[test]
    fn net_input_counts_only_active_sources() {
        let syn = SynapseParams::default();
        let conns = vec![Connection::new(0, 2, &syn), Connection::new(1, 2, &syn)];
        let mut u = Unit::new(0, 2);
        u.add_inbound(0);
        u.add_inbound(1);

        let s = conns[0].strength();
        assert!(s > 0.0);
        assert_eq!(u.net_input(&conns, &[true, false, false]), s);
        assert_eq!(u.net_input(&conns, &[true, true, false]), 2.0 * s);
        assert_eq!(u.net_input(&conns, &[false, false, true]), 0.0);
    }

    #[test]
    fn frozen_unit_stays_inactive() {
        let syn = SynapseParams::default();
        let conns = vec![Connection::new(0, 1, &syn)];
        let params = UnitParams::default().with_activation(1.0, -1.0);
        let mut u = Unit::new(0, 1);
        u.add_inbound(0);
        u.set_frozen(true);
        u.compute_new_activation(&conns, &[true, false], -100.0, &params, 0.0);
        assert!(!u.next_active());
        u.set_frozen(false);
        u.compute_new_activation(&conns, &[true, false], -100.0, &params, 0.0);
        assert!(u.next_active());
    }

    #[test]
    fn labels_are_zero_padded() {
        assert_eq!(unit_label("HPC", 3), "HPC.03");
        assert_eq!(unit_label("SC0", 12), "SC0.12");
    }
}

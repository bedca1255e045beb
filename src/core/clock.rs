use crate::error::ConfigError;

/// Simulated time in hours.
pub type SimTime = u64;

/// Rates in the configuration are given per this many hours.
pub const REFERENCE_INTERVAL_HOURS: f64 = 1.0;

/// Explicit simulation context: the current time and timestep length.
///
/// Passed to every operation that needs to know "when" or "how long", in
/// place of process-wide globals, so several simulations can coexist in one
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimClock {
    pub now: SimTime,
    /// Length of one step, in hours.
    pub time_step: u32,
}

impl SimClock {
    pub fn new(time_step: u32) -> Self {
        Self { now: 0, time_step }
    }

    pub fn advance(&mut self) {
        self.now = self.now.saturating_add(self.time_step as SimTime);
    }

    /// Step length relative to the reference interval.
    pub fn step_ratio(&self) -> f64 {
        self.time_step as f64 / REFERENCE_INTERVAL_HOURS
    }

    pub fn days(&self) -> f64 {
        self.now as f64 / 24.0
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new(24)
    }
}

/// Parse `days` or `days:hours` into hours.
pub fn parse_day_hours(s: &str) -> Result<SimTime, ConfigError> {
    let bad = |reason: &str| ConfigError::Invalid(format!("bad days:hours string '{s}': {reason}"));
    let mut parts = s.trim().split(':');
    let days = parts
        .next()
        .ok_or_else(|| bad("empty"))?
        .trim()
        .parse::<u64>()
        .map_err(|_| bad("days not an unsigned integer"))?;
    let hours = match parts.next() {
        Some(h) => h
            .trim()
            .parse::<u64>()
            .map_err(|_| bad("hours not an unsigned integer"))?,
        None => 0,
    };
    if parts.next().is_some() {
        return Err(bad("too many fields"));
    }
    days.checked_mul(24)
        .and_then(|h| h.checked_add(hours))
        .ok_or_else(|| bad("out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_days_and_day_hours() {
        assert_eq!(parse_day_hours("3").unwrap(), 72);
        assert_eq!(parse_day_hours("1:6").unwrap(), 30);
        assert_eq!(parse_day_hours(" 0:0 ").unwrap(), 0);
        assert!(parse_day_hours("1:2:3").is_err());
        assert!(parse_day_hours("x").is_err());
    }

    #[test]
    fn huge_day_counts_are_rejected() {
        let max = u64::MAX.to_string();
        assert!(parse_day_hours(&max).is_err());
        assert!(parse_day_hours(&format!("{}:23", u64::MAX / 24)).is_err());
        assert_eq!(parse_day_hours(&format!("{}", u64::MAX / 24)).unwrap(), u64::MAX / 24 * 24);
    }

    #[test]
    fn clock_advances_by_time_step() {
        let mut clock = SimClock::new(6);
        clock.advance();
        clock.advance();
        assert_eq!(clock.now, 12);
        assert!((clock.days() - 0.5).abs() < 1e-12);
    }
}

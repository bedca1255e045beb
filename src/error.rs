//! Error types.
//!
//! Nothing in the engine is recoverable: every error is meant to stop the
//! run. The variants carry enough context (entity id, simulated time,
//! file/line) for the final diagnostic.

use std::path::PathBuf;

use thiserror::Error;

use crate::clock::SimTime;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("property '{name}' not found in {file}")]
    Missing { name: String, file: String },

    #[error("{file} line {line} - {reason}: '{value}'")]
    Malformed {
        file: String,
        line: usize,
        value: String,
        reason: String,
    },

    #[error("bad value for '{name}': {value} (expected {expected})")]
    OutOfRange {
        name: String,
        value: f64,
        expected: &'static str,
    },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unused properties: {}", names.join(", "))]
    Unused { names: Vec<String> },

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum DistributedError {
    #[error("rank {rank}: peer {peer} disconnected")]
    Disconnected { rank: usize, peer: usize },

    #[error("rank {rank}: timed out waiting for peer {peer}")]
    Timeout { rank: usize, peer: usize },

    #[error("rank {rank}: protocol mismatch from peer {peer}: expected {expected}")]
    Protocol {
        rank: usize,
        peer: usize,
        expected: &'static str,
    },

    #[error("policy '{policy}' needs at least {needed} workers, got {got}")]
    TooFewWorkers {
        policy: &'static str,
        needed: usize,
        got: usize,
    },
}

/// A bounded quantity computed outside its legal range.
///
/// Raised by the low-level state setters; callers attach the entity id and
/// simulated time by converting it into [`SimError::Invariant`].
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub quantity: &'static str,
    pub value: f64,
    pub bound: f64,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} = {} violates bound {}",
            self.quantity, self.value, self.bound
        )
    }
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Distributed(#[from] DistributedError),

    #[error("t={time}h {entity}: {violation}")]
    Invariant {
        entity: String,
        time: SimTime,
        violation: Violation,
    },

    #[error("t={time}h tract {tract}: combined depotentiation probability {prob} exceeds 1")]
    ProbabilityOverflow {
        tract: String,
        time: SimTime,
        prob: f64,
    },

    #[error("t={time}h layer {layer}: duplicate pattern id '{pattern}'")]
    DuplicatePattern {
        layer: String,
        pattern: String,
        time: SimTime,
    },

    #[error("t={time}h layer {layer}: unknown pattern id '{pattern}'")]
    UnknownPattern {
        layer: String,
        pattern: String,
        time: SimTime,
    },

    #[error("t={time}h layer {layer}: orthogonal pattern units exhausted")]
    PatternsExhausted { layer: String, time: SimTime },

    #[error("unknown layer '{0}'")]
    UnknownLayer(String),

    #[error("t={time}h layer {layer}: {detail}")]
    InvalidState {
        layer: String,
        time: SimTime,
        detail: &'static str,
    },
}

impl SimError {
    pub fn invariant(entity: impl Into<String>, time: SimTime, violation: Violation) -> Self {
        SimError::Invariant {
            entity: entity.into(),
            time,
            violation,
        }
    }
}

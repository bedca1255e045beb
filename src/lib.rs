//! Systems-level memory consolidation simulator.
//!
//! Layers of stochastic binary units are joined by all-to-all tracts of
//! plastic connections. A hub layer binds neocortical layers during
//! one-shot training; offline replay of hub patterns, receptor trafficking
//! and scheduled perturbations (freeze, lesion, plasticity inhibition,
//! reactivation) then shape what can be recalled over simulated days.

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/clock.rs"]
pub mod clock;

#[path = "core/scheduler.rs"]
pub mod scheduler;

#[path = "core/events.rs"]
pub mod events;

#[path = "core/unit.rs"]
pub mod unit;

#[path = "core/connection.rs"]
pub mod connection;

#[path = "core/tract.rs"]
pub mod tract;

#[path = "core/layer.rs"]
pub mod layer;

#[path = "core/network.rs"]
pub mod network;

#[path = "core/system.rs"]
pub mod system;

pub mod config;
pub mod distributed;
pub mod error;
pub mod observer;

pub use config::ModelConfig;
pub use error::SimError;
pub use system::{RunReport, Simulation};

//! Model parameters: the line-oriented property reader and the typed
//! parameter structs built from it.

pub mod params;
pub mod props;

pub use params::{
    InhibitionParams, LayerSpec, ModelConfig, ScheduleSpec, SimParams, SynapseParams, Topology,
    TractParams, TractSpec, UnitParams,
};
pub use props::{FromProp, Matrix, PropRef, Props, UnusedProp};

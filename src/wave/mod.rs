//! Breadth-first wavefront propagation over distributed meshes.
//!
//! Two dual-graph drivers share one design: [`FaceCellWave`] alternates
//! face→cell and cell→face sweeps, [`PointEdgeWave`] alternates point→edge
//! and edge→point sweeps. Both synchronize coupled boundaries once per
//! round and terminate on global quiescence of the changed-entity count.

pub mod changed;
pub mod face_cell;
pub mod info;
pub mod payloads;
pub mod point_edge;

pub use changed::{BitFlags, ChangeSet};
pub use face_cell::{FaceCellWave, WaveOptions, propagate};
pub use info::{FaceCellInfo, PointEdgeInfo};
pub use payloads::{MinDistance, MinHop};
pub use point_edge::PointEdgeWave;

//! Reference payloads for the wave engines.
//!
//! [`MinHop`] is the minimal label wave — an entity keeps the smallest value
//! that has reached it, faces pick up cell value + 1 — used for topological
//! distance and layer counting. [`MinDistance`] carries a seed origin and
//! propagates true Euclidean wall distance, exercising the geometric hooks
//! (`leave_domain`/`enter_domain`/`apply_transform`) for real.

use crate::error::MeshWaveError;
use crate::stream::{Decoder, Encoder, WireCodec};
use crate::topology::mesh::MeshTopology;
use crate::topology::patch::Patch;
use crate::topology::transform::Transform;
use crate::wave::info::{FaceCellInfo, PointEdgeInfo};

// ---------------------------------------------------------------------------
// MinHop
// ---------------------------------------------------------------------------

/// Hop-count payload: `min(current, incoming)` on the receiving entity,
/// `min(current, incoming + 1)` when stepping from a cell onto a face (or
/// from an edge onto a point). `u64::MAX` is the unset state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MinHop {
    pub value: u64,
}

impl MinHop {
    pub fn seeded(value: u64) -> Self {
        Self { value }
    }

    fn take_min(&mut self, candidate: u64) -> bool {
        if candidate < self.value {
            self.value = candidate;
            true
        } else {
            false
        }
    }
}

impl Default for MinHop {
    fn default() -> Self {
        Self { value: u64::MAX }
    }
}

impl WireCodec for MinHop {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<(), MeshWaveError> {
        enc.write_u64(self.value)
    }
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, MeshWaveError> {
        Ok(Self {
            value: dec.read_u64()?,
        })
    }
}

impl FaceCellInfo for MinHop {
    type Ctx = ();

    fn valid(&self, _ctx: &()) -> bool {
        self.value != u64::MAX
    }

    fn same_as(&self, other: &Self, _tol: f64, _ctx: &()) -> bool {
        self.value == other.value
    }

    fn update_cell(
        &mut self,
        _mesh: &MeshTopology,
        _cell: usize,
        _face: usize,
        incoming: &Self,
        _tol: f64,
        _ctx: &mut (),
    ) -> bool {
        self.take_min(incoming.value)
    }

    fn update_face_from_cell(
        &mut self,
        _mesh: &MeshTopology,
        _face: usize,
        _cell: usize,
        incoming: &Self,
        _tol: f64,
        _ctx: &mut (),
    ) -> bool {
        self.take_min(incoming.value.saturating_add(1))
    }

    fn update_face_from_face(
        &mut self,
        _mesh: &MeshTopology,
        _face: usize,
        incoming: &Self,
        _tol: f64,
        _ctx: &mut (),
    ) -> bool {
        self.take_min(incoming.value)
    }
}

impl PointEdgeInfo for MinHop {
    type Ctx = ();

    fn valid(&self, _ctx: &()) -> bool {
        self.value != u64::MAX
    }

    fn same_as(&self, other: &Self, _tol: f64, _ctx: &()) -> bool {
        self.value == other.value
    }

    fn update_point(
        &mut self,
        _mesh: &MeshTopology,
        _point: usize,
        _edge: usize,
        incoming: &Self,
        _tol: f64,
        _ctx: &mut (),
    ) -> bool {
        self.take_min(incoming.value.saturating_add(1))
    }

    fn update_point_same(
        &mut self,
        _mesh: &MeshTopology,
        _point: usize,
        incoming: &Self,
        _tol: f64,
        _ctx: &mut (),
    ) -> bool {
        self.take_min(incoming.value)
    }

    fn update_edge(
        &mut self,
        _mesh: &MeshTopology,
        _edge: usize,
        _point: usize,
        incoming: &Self,
        _tol: f64,
        _ctx: &mut (),
    ) -> bool {
        self.take_min(incoming.value)
    }
}

// ---------------------------------------------------------------------------
// MinDistance
// ---------------------------------------------------------------------------

/// Euclidean wall-distance payload: carries the seed origin and the squared
/// distance to it. Origins travel in face-relative coordinates across
/// domain boundaries, so pure translations need no transform at all.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MinDistance {
    pub origin: [f64; 3],
    pub dist_sq: f64,
}

impl MinDistance {
    /// Seed at `origin` with zero distance.
    pub fn at(origin: [f64; 3]) -> Self {
        Self {
            origin,
            dist_sq: 0.0,
        }
    }

    pub fn distance(&self) -> f64 {
        self.dist_sq.sqrt()
    }

    fn dist2(a: [f64; 3], b: [f64; 3]) -> f64 {
        (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
    }

    /// Shared update rule: accept the incoming origin when it improves this
    /// entity's distance by more than the relative tolerance.
    fn update_from(&mut self, centre: [f64; 3], incoming: &Self, tol: f64) -> bool {
        let d2 = Self::dist2(centre, incoming.origin);
        if !self.dist_sq.is_finite() {
            self.origin = incoming.origin;
            self.dist_sq = d2;
            return true;
        }
        if d2 >= self.dist_sq {
            return false; // a converged entity never regresses
        }
        if self.dist_sq - d2 <= tol * self.dist_sq {
            return false; // improvement below tolerance: stop propagating
        }
        self.origin = incoming.origin;
        self.dist_sq = d2;
        true
    }
}

impl Default for MinDistance {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            dist_sq: f64::INFINITY,
        }
    }
}

impl WireCodec for MinDistance {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<(), MeshWaveError> {
        self.origin.encode(enc)?;
        enc.write_f64(self.dist_sq)
    }
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, MeshWaveError> {
        Ok(Self {
            origin: <[f64; 3]>::decode(dec)?,
            dist_sq: dec.read_f64()?,
        })
    }
}

impl FaceCellInfo for MinDistance {
    type Ctx = ();

    fn valid(&self, _ctx: &()) -> bool {
        self.dist_sq.is_finite()
    }

    fn same_as(&self, other: &Self, tol: f64, _ctx: &()) -> bool {
        let scale = self.dist_sq.max(other.dist_sq).max(1e-30);
        (self.dist_sq - other.dist_sq).abs() <= tol * scale
    }

    fn update_cell(
        &mut self,
        mesh: &MeshTopology,
        cell: usize,
        _face: usize,
        incoming: &Self,
        tol: f64,
        _ctx: &mut (),
    ) -> bool {
        self.update_from(mesh.cell_centre(cell), incoming, tol)
    }

    fn update_face_from_cell(
        &mut self,
        mesh: &MeshTopology,
        face: usize,
        _cell: usize,
        incoming: &Self,
        tol: f64,
        _ctx: &mut (),
    ) -> bool {
        self.update_from(mesh.face_centre(face), incoming, tol)
    }

    fn update_face_from_face(
        &mut self,
        mesh: &MeshTopology,
        face: usize,
        incoming: &Self,
        tol: f64,
        _ctx: &mut (),
    ) -> bool {
        self.update_from(mesh.face_centre(face), incoming, tol)
    }

    fn leave_domain(
        &mut self,
        _mesh: &MeshTopology,
        _patch: &Patch,
        _local_face: usize,
        face_centre: [f64; 3],
        _ctx: &mut (),
    ) {
        for i in 0..3 {
            self.origin[i] -= face_centre[i];
        }
    }

    fn enter_domain(
        &mut self,
        _mesh: &MeshTopology,
        _patch: &Patch,
        _local_face: usize,
        face_centre: [f64; 3],
        _ctx: &mut (),
    ) {
        for i in 0..3 {
            self.origin[i] += face_centre[i];
        }
    }

    fn apply_transform(&mut self, transform: &Transform, _ctx: &mut ()) {
        // origins are face-relative between leave and enter, so only the
        // rotational part applies
        self.origin = transform.apply_vector(self.origin);
    }

    fn interpolate(sources: &[(f64, Self)], _ctx: &()) -> Self {
        let total: f64 = sources.iter().map(|&(w, _)| w).sum();
        if total <= 0.0 {
            return Self::default();
        }
        let mut origin = [0.0; 3];
        for (w, s) in sources {
            for i in 0..3 {
                origin[i] += w / total * s.origin[i];
            }
        }
        // distance is re-derived at the receiving entity's next update
        let dist_sq = sources
            .iter()
            .map(|(_, s)| s.dist_sq)
            .fold(f64::INFINITY, f64::min);
        Self { origin, dist_sq }
    }
}

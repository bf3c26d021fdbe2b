//! Payload contracts for the wave engines.
//!
//! A payload decides for itself whether an incoming value improves on what
//! an entity already holds — the update methods return `true` only when the
//! change exceeds the payload's own tolerance interpretation, and that
//! signal is what keeps the wave running. A converged (`valid`) entity may
//! keep improving, but never regresses to invalid.

use crate::error::MeshWaveError;
use crate::stream::WireCodec;
use crate::topology::mesh::MeshTopology;
use crate::topology::patch::Patch;
use crate::topology::transform::Transform;

/// Payload carried by the face/cell wave.
///
/// `Default` is the "no information yet" state and must not be `valid`.
/// Values crossing processor or periodic boundaries go through
/// `leave_domain` / `apply_transform` / `enter_domain`, in that order on the
/// receiving side (leave on the sender, transform+enter on the receiver).
pub trait FaceCellInfo: Clone + Default + WireCodec {
    /// Client state threaded through every hook (distance data, solver
    /// handles, …). Use `()` when nothing is needed.
    type Ctx;

    /// Has this entity received usable information yet?
    fn valid(&self, ctx: &Self::Ctx) -> bool;

    /// Geometric equality within `tol`; drives the debug cyclic check.
    fn same_as(&self, other: &Self, tol: f64, ctx: &Self::Ctx) -> bool;

    /// Fold a neighbouring face's value into a cell. Return `true` iff the
    /// cell changed by more than the payload's tolerance interpretation.
    fn update_cell(
        &mut self,
        mesh: &MeshTopology,
        cell: usize,
        face: usize,
        incoming: &Self,
        tol: f64,
        ctx: &mut Self::Ctx,
    ) -> bool;

    /// Fold a neighbouring cell's value into a face.
    fn update_face_from_cell(
        &mut self,
        mesh: &MeshTopology,
        face: usize,
        cell: usize,
        incoming: &Self,
        tol: f64,
        ctx: &mut Self::Ctx,
    ) -> bool;

    /// Fold a coupled counterpart face's value into a face (processor,
    /// cyclic and non-conformal exchanges).
    fn update_face_from_face(
        &mut self,
        mesh: &MeshTopology,
        face: usize,
        incoming: &Self,
        tol: f64,
        ctx: &mut Self::Ctx,
    ) -> bool;

    /// Called on the sending side immediately before serialization, e.g. to
    /// convert absolute positions into a frame relative to the face centre.
    fn leave_domain(
        &mut self,
        _mesh: &MeshTopology,
        _patch: &Patch,
        _local_face: usize,
        _face_centre: [f64; 3],
        _ctx: &mut Self::Ctx,
    ) {
    }

    /// Called on the receiving side immediately after deserialization; the
    /// mirror of [`leave_domain`](Self::leave_domain).
    fn enter_domain(
        &mut self,
        _mesh: &MeshTopology,
        _patch: &Patch,
        _local_face: usize,
        _face_centre: [f64; 3],
        _ctx: &mut Self::Ctx,
    ) {
    }

    /// Rotate geometric state when the coupling's frame transform is a
    /// rotation rather than a pure translation.
    fn apply_transform(&mut self, _transform: &Transform, _ctx: &mut Self::Ctx) {}

    /// Combine weighted contributions across a non-conformal interface.
    ///
    /// The default takes the heaviest contributor; payloads with a numeric
    /// structure override with a true weighted combination.
    fn interpolate(sources: &[(f64, Self)], _ctx: &Self::Ctx) -> Self {
        sources
            .iter()
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }
}

/// Payload carried by the point/edge wave.
pub trait PointEdgeInfo: Clone + Default + WireCodec {
    type Ctx;

    fn valid(&self, ctx: &Self::Ctx) -> bool;

    fn same_as(&self, other: &Self, tol: f64, ctx: &Self::Ctx) -> bool;

    /// Fold an adjacent edge's value into a point.
    fn update_point(
        &mut self,
        mesh: &MeshTopology,
        point: usize,
        edge: usize,
        incoming: &Self,
        tol: f64,
        ctx: &mut Self::Ctx,
    ) -> bool;

    /// Fold a coupled duplicate point's value into a point (processor
    /// shared-point sync).
    fn update_point_same(
        &mut self,
        mesh: &MeshTopology,
        point: usize,
        incoming: &Self,
        tol: f64,
        ctx: &mut Self::Ctx,
    ) -> bool;

    /// Fold an endpoint's value into an edge.
    fn update_edge(
        &mut self,
        mesh: &MeshTopology,
        edge: usize,
        point: usize,
        incoming: &Self,
        tol: f64,
        ctx: &mut Self::Ctx,
    ) -> bool;

    /// Called on the sending side immediately before serialization.
    fn leave_domain(
        &mut self,
        _mesh: &MeshTopology,
        _patch: &Patch,
        _local_point: usize,
        _point_coord: [f64; 3],
        _ctx: &mut Self::Ctx,
    ) {
    }

    /// Called on the receiving side immediately after deserialization.
    fn enter_domain(
        &mut self,
        _mesh: &MeshTopology,
        _patch: &Patch,
        _local_point: usize,
        _point_coord: [f64; 3],
        _ctx: &mut Self::Ctx,
    ) {
    }

    fn apply_transform(&mut self, _transform: &Transform, _ctx: &mut Self::Ctx) {}
}

/// Validate that an info array matches the entity count it must cover.
pub(crate) fn check_arity<T>(
    kind: &'static str,
    expected: usize,
    slice: &[T],
) -> Result<(), MeshWaveError> {
    if slice.len() != expected {
        Err(MeshWaveError::InfoArity {
            kind,
            expected,
            got: slice.len(),
        })
    } else {
        Ok(())
    }
}

//! Mesh topology as the wave engines consume it.
//!
//! Owner/neighbour face addressing: every face stores its owner cell;
//! internal faces (indices `0..n_internal_faces`) additionally store a
//! neighbour cell. Boundary faces are tiled by [`Patch`] runs, in ascending
//! order, directly after the internal faces. Optional geometric and
//! point/edge data extend the same structure for payloads and the
//! point/edge wave.

use crate::error::MeshWaveError;
use crate::topology::patch::{Patch, PatchKind};
use itertools::Itertools;

/// Face/cell (and optionally point/edge) connectivity plus patch layout.
#[derive(Debug, Clone)]
pub struct MeshTopology {
    n_cells: usize,
    /// Owner cell per face.
    owner: Vec<usize>,
    /// Neighbour cell per internal face.
    neighbour: Vec<usize>,
    /// Bounding faces per cell, derived from owner/neighbour.
    cell_faces: Vec<Vec<usize>>,
    patches: Vec<Patch>,
    /// Patch index per boundary face (offset by `n_internal`).
    boundary_patch: Vec<usize>,
    face_centres: Vec<[f64; 3]>,
    cell_centres: Vec<[f64; 3]>,
    // point/edge layer (empty unless supplied)
    n_points: usize,
    edges: Vec<[usize; 2]>,
    point_edges: Vec<Vec<usize>>,
    point_coords: Vec<[f64; 3]>,
    /// Per patch: mesh points positionally matched with the partner side.
    patch_points: Vec<Vec<usize>>,
}

impl MeshTopology {
    /// Build and validate a topology.
    ///
    /// `neighbour.len()` defines the internal face count; `patches` must
    /// tile `neighbour.len()..owner.len()` exactly, in ascending order.
    pub fn new(
        n_cells: usize,
        owner: Vec<usize>,
        neighbour: Vec<usize>,
        patches: Vec<Patch>,
    ) -> Result<Self, MeshWaveError> {
        let n_faces = owner.len();
        let n_internal = neighbour.len();
        if n_internal > n_faces {
            return Err(MeshWaveError::Topology(format!(
                "{n_internal} internal faces but only {n_faces} faces total"
            )));
        }
        for (f, &c) in owner.iter().enumerate() {
            if c >= n_cells {
                return Err(MeshWaveError::Topology(format!(
                    "owner of face {f} is cell {c}, mesh has {n_cells} cells"
                )));
            }
        }
        for (f, &c) in neighbour.iter().enumerate() {
            if c >= n_cells {
                return Err(MeshWaveError::Topology(format!(
                    "neighbour of face {f} is cell {c}, mesh has {n_cells} cells"
                )));
            }
        }

        // patches tile the boundary region exactly once, ascending
        let mut cursor = n_internal;
        for patch in patches.iter().sorted_by_key(|p| p.start) {
            if patch.start != cursor {
                return Err(MeshWaveError::PatchCoverage {
                    patch: patch.name.clone(),
                    start: patch.start,
                    end: patch.start + patch.size,
                    problem: format!("leaves a gap or overlap at face {cursor}"),
                });
            }
            cursor += patch.size;
        }
        if cursor != n_faces {
            return Err(MeshWaveError::PatchCoverage {
                patch: "<end>".into(),
                start: cursor,
                end: n_faces,
                problem: "does not reach the last boundary face".into(),
            });
        }

        Self::validate_couplings(&patches)?;

        let mut boundary_patch = vec![usize::MAX; n_faces - n_internal];
        for (pi, patch) in patches.iter().enumerate() {
            for f in patch.faces() {
                boundary_patch[f - n_internal] = pi;
            }
        }

        let mut cell_faces: Vec<Vec<usize>> = vec![Vec::new(); n_cells];
        for (f, &c) in owner.iter().enumerate() {
            cell_faces[c].push(f);
        }
        for (f, &c) in neighbour.iter().enumerate() {
            cell_faces[c].push(f);
        }

        Ok(Self {
            n_cells,
            owner,
            neighbour,
            cell_faces,
            patches,
            boundary_patch,
            face_centres: Vec::new(),
            cell_centres: Vec::new(),
            n_points: 0,
            edges: Vec::new(),
            point_edges: Vec::new(),
            point_coords: Vec::new(),
            patch_points: Vec::new(),
        })
    }

    fn validate_couplings(patches: &[Patch]) -> Result<(), MeshWaveError> {
        let mut proc_ranks = std::collections::BTreeSet::new();
        for (pi, patch) in patches.iter().enumerate() {
            match &patch.kind {
                PatchKind::External => {}
                PatchKind::Processor { neighbour_rank, .. } => {
                    if !proc_ranks.insert(*neighbour_rank) {
                        return Err(MeshWaveError::DuplicateProcessorPatch {
                            rank: *neighbour_rank,
                        });
                    }
                }
                PatchKind::Cyclic { partner, .. } => {
                    let other = patches.get(*partner).ok_or_else(|| {
                        MeshWaveError::Topology(format!(
                            "cyclic patch `{}` names missing partner {partner}",
                            patch.name
                        ))
                    })?;
                    if other.size != patch.size {
                        return Err(MeshWaveError::PartnerArity {
                            patch: patch.name.clone(),
                            partner: other.name.clone(),
                            size: patch.size,
                            partner_size: other.size,
                        });
                    }
                    match other.kind {
                        PatchKind::Cyclic { partner: back, .. } if back == pi => {}
                        _ => {
                            return Err(MeshWaveError::Topology(format!(
                                "cyclic patch `{}` partner `{}` does not point back",
                                patch.name, other.name
                            )));
                        }
                    }
                }
                PatchKind::NonConformal { partner, weights } => {
                    let other = patches.get(*partner).ok_or_else(|| {
                        MeshWaveError::Topology(format!(
                            "non-conformal patch `{}` names missing partner {partner}",
                            patch.name
                        ))
                    })?;
                    if weights.sources.len() != patch.size {
                        return Err(MeshWaveError::PartnerArity {
                            patch: patch.name.clone(),
                            partner: other.name.clone(),
                            size: patch.size,
                            partner_size: weights.sources.len(),
                        });
                    }
                    for (i, srcs) in weights.sources.iter().enumerate() {
                        for &(j, w) in srcs {
                            if j >= other.size {
                                return Err(MeshWaveError::Topology(format!(
                                    "non-conformal patch `{}` face {i} references partner face \
                                     {j} beyond partner size {}",
                                    patch.name, other.size
                                )));
                            }
                            if !(0.0..=1.0 + 1e-9).contains(&w) {
                                return Err(MeshWaveError::Topology(format!(
                                    "non-conformal patch `{}` face {i} has weight {w} outside \
                                     [0, 1]",
                                    patch.name
                                )));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // --- optional layers ---------------------------------------------------

    pub fn with_face_centres(mut self, centres: Vec<[f64; 3]>) -> Result<Self, MeshWaveError> {
        if centres.len() != self.owner.len() {
            return Err(MeshWaveError::InfoArity {
                kind: "faces",
                expected: self.owner.len(),
                got: centres.len(),
            });
        }
        self.face_centres = centres;
        Ok(self)
    }

    pub fn with_cell_centres(mut self, centres: Vec<[f64; 3]>) -> Result<Self, MeshWaveError> {
        if centres.len() != self.n_cells {
            return Err(MeshWaveError::InfoArity {
                kind: "cells",
                expected: self.n_cells,
                got: centres.len(),
            });
        }
        self.cell_centres = centres;
        Ok(self)
    }

    /// Attach the point/edge layer: `edges[e]` joins two point indices.
    pub fn with_point_edges(
        mut self,
        n_points: usize,
        edges: Vec<[usize; 2]>,
    ) -> Result<Self, MeshWaveError> {
        for (e, &[a, b]) in edges.iter().enumerate() {
            if a >= n_points || b >= n_points {
                return Err(MeshWaveError::Topology(format!(
                    "edge {e} references point beyond {n_points}"
                )));
            }
        }
        let mut point_edges: Vec<Vec<usize>> = vec![Vec::new(); n_points];
        for (e, &[a, b]) in edges.iter().enumerate() {
            point_edges[a].push(e);
            point_edges[b].push(e);
        }
        self.n_points = n_points;
        self.edges = edges;
        self.point_edges = point_edges;
        self.patch_points = vec![Vec::new(); self.patches.len()];
        Ok(self)
    }

    pub fn with_point_coords(mut self, coords: Vec<[f64; 3]>) -> Result<Self, MeshWaveError> {
        if coords.len() != self.n_points {
            return Err(MeshWaveError::InfoArity {
                kind: "points",
                expected: self.n_points,
                got: coords.len(),
            });
        }
        self.point_coords = coords;
        Ok(self)
    }

    /// Declare the shared points of a coupled patch, positionally matched
    /// with the partner side's list.
    pub fn with_patch_points(
        mut self,
        patch_index: usize,
        points: Vec<usize>,
    ) -> Result<Self, MeshWaveError> {
        if self.patch_points.is_empty() {
            self.patch_points = vec![Vec::new(); self.patches.len()];
        }
        for &p in &points {
            if p >= self.n_points {
                return Err(MeshWaveError::Topology(format!(
                    "patch point {p} beyond {} points",
                    self.n_points
                )));
            }
        }
        self.patch_points[patch_index] = points;
        Ok(self)
    }

    // --- accessors -----------------------------------------------------------

    #[inline]
    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    #[inline]
    pub fn n_faces(&self) -> usize {
        self.owner.len()
    }

    #[inline]
    pub fn n_internal_faces(&self) -> usize {
        self.neighbour.len()
    }

    #[inline]
    pub fn is_internal(&self, face: usize) -> bool {
        face < self.neighbour.len()
    }

    #[inline]
    pub fn owner(&self, face: usize) -> usize {
        self.owner[face]
    }

    /// Neighbour cell of an internal face.
    #[inline]
    pub fn neighbour(&self, face: usize) -> Option<usize> {
        self.neighbour.get(face).copied()
    }

    #[inline]
    pub fn cell_faces(&self, cell: usize) -> &[usize] {
        &self.cell_faces[cell]
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn patch(&self, index: usize) -> &Patch {
        &self.patches[index]
    }

    /// Patch owning a boundary face.
    pub fn patch_of(&self, face: usize) -> Option<usize> {
        if face < self.n_internal_faces() || face >= self.n_faces() {
            return None;
        }
        Some(self.boundary_patch[face - self.n_internal_faces()])
    }

    /// Face centre, or the origin when geometry was not supplied.
    pub fn face_centre(&self, face: usize) -> [f64; 3] {
        self.face_centres.get(face).copied().unwrap_or([0.0; 3])
    }

    /// Cell centre, or the origin when geometry was not supplied.
    pub fn cell_centre(&self, cell: usize) -> [f64; 3] {
        self.cell_centres.get(cell).copied().unwrap_or([0.0; 3])
    }

    #[inline]
    pub fn n_points(&self) -> usize {
        self.n_points
    }

    #[inline]
    pub fn n_edges(&self) -> usize {
        self.edges.len()
    }

    #[inline]
    pub fn edge(&self, e: usize) -> [usize; 2] {
        self.edges[e]
    }

    #[inline]
    pub fn point_edges(&self, p: usize) -> &[usize] {
        &self.point_edges[p]
    }

    /// Point coordinate, or the origin when geometry was not supplied.
    pub fn point_coord(&self, point: usize) -> [f64; 3] {
        self.point_coords.get(point).copied().unwrap_or([0.0; 3])
    }

    pub fn patch_points(&self, patch_index: usize) -> &[usize] {
        self.patch_points
            .get(patch_index)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Ranks this partition shares processor patches with, ascending.
    pub fn neighbour_ranks(&self) -> Vec<usize> {
        self.patches
            .iter()
            .filter_map(|p| p.neighbour_rank())
            .sorted_unstable()
            .collect()
    }

    /// Processor patch towards `rank`, if any.
    pub fn processor_patch_to(&self, rank: usize) -> Option<usize> {
        self.patches
            .iter()
            .position(|p| p.neighbour_rank() == Some(rank))
    }
}

/// One rank's slice of a 1-D strip of `n_global` unit cells split into
/// contiguous blocks across `n_ranks`. Left/right block ends become
/// processor patches; the strip ends are `inlet`/`outlet` external patches.
pub fn line_mesh(
    n_global: usize,
    rank: usize,
    n_ranks: usize,
) -> Result<MeshTopology, MeshWaveError> {
    if n_ranks == 0 || rank >= n_ranks {
        return Err(MeshWaveError::RankOutOfRange {
            rank,
            size: n_ranks,
        });
    }
    if n_global < n_ranks {
        return Err(MeshWaveError::Topology(format!(
            "cannot split {n_global} cells across {n_ranks} ranks"
        )));
    }
    let base = n_global / n_ranks;
    let extra = n_global % n_ranks;
    let n_local = base + usize::from(rank < extra);
    let offset: usize = (0..rank).map(|r| base + usize::from(r < extra)).sum();

    let n_internal = n_local - 1;
    let mut owner: Vec<usize> = (0..n_internal).collect();
    let neighbour: Vec<usize> = (1..n_local).collect();

    // boundary faces: left then right
    owner.push(0);
    owner.push(n_local - 1);

    let mut patches = Vec::new();
    let left_kind = if rank == 0 {
        PatchKind::External
    } else {
        PatchKind::Processor {
            neighbour_rank: rank - 1,
            transform: None,
        }
    };
    let right_kind = if rank == n_ranks - 1 {
        PatchKind::External
    } else {
        PatchKind::Processor {
            neighbour_rank: rank + 1,
            transform: None,
        }
    };
    patches.push(Patch::new(
        if rank == 0 { "inlet" } else { "procLeft" },
        n_internal,
        1,
        left_kind,
    ));
    patches.push(Patch::new(
        if rank == n_ranks - 1 { "outlet" } else { "procRight" },
        n_internal + 1,
        1,
        right_kind,
    ));

    let mut face_centres = Vec::with_capacity(n_local + 1);
    for i in 0..n_internal {
        face_centres.push([(offset + i + 1) as f64, 0.0, 0.0]);
    }
    face_centres.push([offset as f64, 0.0, 0.0]);
    face_centres.push([(offset + n_local) as f64, 0.0, 0.0]);

    let cell_centres = (0..n_local)
        .map(|i| [(offset + i) as f64 + 0.5, 0.0, 0.0])
        .collect();

    MeshTopology::new(n_local, owner, neighbour, patches)?
        .with_face_centres(face_centres)?
        .with_cell_centres(cell_centres)
}

/// Serial convenience: the whole strip on one rank.
pub fn line_mesh_serial(n_cells: usize) -> Result<MeshTopology, MeshWaveError> {
    line_mesh(n_cells, 0, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_line_mesh_layout() {
        let mesh = line_mesh_serial(4).unwrap();
        assert_eq!(mesh.n_cells(), 4);
        assert_eq!(mesh.n_faces(), 5);
        assert_eq!(mesh.n_internal_faces(), 3);
        assert_eq!(mesh.owner(0), 0);
        assert_eq!(mesh.neighbour(0), Some(1));
        assert_eq!(mesh.neighbour(3), None);
        // cell 1 bounded by internal faces 0 and 1
        assert_eq!(mesh.cell_faces(1), &[1, 0]);
        assert_eq!(mesh.patches().len(), 2);
        assert!(!mesh.patch(0).is_coupled());
        assert_eq!(mesh.patch_of(3), Some(0));
        assert_eq!(mesh.patch_of(4), Some(1));
        assert_eq!(mesh.patch_of(0), None);
    }

    #[test]
    fn split_line_mesh_has_processor_patches() {
        let mesh = line_mesh(10, 1, 3).unwrap();
        // 10 across 3 ranks: 4,3,3 — rank 1 holds cells 4..7
        assert_eq!(mesh.n_cells(), 3);
        assert_eq!(mesh.neighbour_ranks(), vec![0, 2]);
        assert_eq!(mesh.processor_patch_to(0), Some(0));
        assert_eq!(mesh.processor_patch_to(2), Some(1));
        // geometry is global
        assert_eq!(mesh.cell_centre(0), [4.5, 0.0, 0.0]);
        assert_eq!(mesh.face_centre(mesh.n_internal_faces()), [4.0, 0.0, 0.0]);
    }

    #[test]
    fn patch_gap_is_rejected() {
        let patches = vec![Patch::new("far", 2, 1, PatchKind::External)];
        let err = MeshTopology::new(2, vec![0, 0, 1], vec![1], patches).unwrap_err();
        assert!(matches!(err, MeshWaveError::PatchCoverage { .. }));
    }

    #[test]
    fn cyclic_partner_must_point_back() {
        let patches = vec![
            Patch::new(
                "half0",
                1,
                1,
                PatchKind::Cyclic {
                    partner: 1,
                    transform: None,
                },
            ),
            Patch::new("half1", 2, 1, PatchKind::External),
        ];
        let err = MeshTopology::new(2, vec![0, 0, 1], vec![1], patches).unwrap_err();
        assert!(matches!(err, MeshWaveError::Topology(_)));
    }

    #[test]
    fn duplicate_processor_patch_rejected() {
        let patches = vec![
            Patch::new(
                "a",
                1,
                1,
                PatchKind::Processor {
                    neighbour_rank: 1,
                    transform: None,
                },
            ),
            Patch::new(
                "b",
                2,
                1,
                PatchKind::Processor {
                    neighbour_rank: 1,
                    transform: None,
                },
            ),
        ];
        let err = MeshTopology::new(2, vec![0, 0, 1], vec![1], patches).unwrap_err();
        assert!(matches!(
            err,
            MeshWaveError::DuplicateProcessorPatch { rank: 1 }
        ));
    }

    #[test]
    fn point_edge_layer_derives_adjacency() {
        let mesh = line_mesh_serial(2)
            .unwrap()
            .with_point_edges(3, vec![[0, 1], [1, 2]])
            .unwrap();
        assert_eq!(mesh.n_points(), 3);
        assert_eq!(mesh.point_edges(1), &[0, 1]);
        assert_eq!(mesh.edge(1), [1, 2]);
    }
}

//! `FaceCellWave`: breadth-first information propagation over the face/cell
//! dual graph.
//!
//! The engine alternates two sweeps — changed faces push into adjacent
//! cells, changed cells push into their bounding faces — and synchronizes
//! coupled boundaries once per round: explicit face-pair connections first,
//! then processor patches through a [`ChannelSet`], then cyclic pairings,
//! then non-conformal (area-weighted) interfaces. Cyclic and non-conformal
//! corrections run strictly after all processor data for the round has been
//! received, so they never act on stale cross-rank values.
//!
//! Each sweep ends in exactly one global sum-reduce of the changed-entity
//! count; that count is the sole termination signal.

use crate::comm::channel_set::ChannelSet;
use crate::comm::collectives::global_sum_u64;
use crate::comm::communicator::Communicator;
use crate::comm::config::CommConfig;
use crate::comm::tag::CommTag;
use crate::error::MeshWaveError;
use crate::stream::WireCodec;
use crate::topology::mesh::MeshTopology;
use crate::topology::patch::PatchKind;
use crate::wave::changed::ChangeSet;
use crate::wave::info::{FaceCellInfo, check_arity};

/// Tuning for one wave. The base tag family spans four tags: exchange
/// sizes, exchange data, reduce, reduce-broadcast.
#[derive(Debug, Clone, Copy)]
pub struct WaveOptions {
    /// Handed to every payload update; interpretation is payload-defined.
    pub tolerance: f64,
    /// Boundary-exchange configuration (strategy, format, base tag).
    pub comm: CommConfig,
    /// Assert cyclic halves agree after every cyclic exchange.
    pub check_cyclic: bool,
}

impl Default for WaveOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            comm: CommConfig::default(),
            check_cyclic: cfg!(debug_assertions) || cfg!(feature = "check-invariants"),
        }
    }
}

/// Wavefront driver over externally-owned per-face and per-cell info
/// arrays. The engine mutates the caller's storage in place and is the only
/// mutator for its lifetime.
pub struct FaceCellWave<'a, T: FaceCellInfo, C: Communicator> {
    mesh: &'a MeshTopology,
    comm: &'a C,
    opts: WaveOptions,
    face_info: &'a mut [T],
    cell_info: &'a mut [T],
    ctx: T::Ctx,
    changed_faces: ChangeSet,
    changed_cells: ChangeSet,
    /// Explicitly-declared face pairs coupled outside normal adjacency
    /// (baffle-style connections).
    connections: Vec<(usize, usize)>,
}

impl<'a, T, C> FaceCellWave<'a, T, C>
where
    T: FaceCellInfo,
    C: Communicator,
{
    pub fn new(
        mesh: &'a MeshTopology,
        comm: &'a C,
        face_info: &'a mut [T],
        cell_info: &'a mut [T],
        ctx: T::Ctx,
        opts: WaveOptions,
    ) -> Result<Self, MeshWaveError> {
        check_arity("faces", mesh.n_faces(), face_info)?;
        check_arity("cells", mesh.n_cells(), cell_info)?;
        let n_faces = mesh.n_faces();
        let n_cells = mesh.n_cells();
        Ok(Self {
            mesh,
            comm,
            opts,
            face_info,
            cell_info,
            ctx,
            changed_faces: ChangeSet::new(n_faces),
            changed_cells: ChangeSet::new(n_cells),
            connections: Vec::new(),
        })
    }

    /// Declare explicit face-pair couplings resolved every round.
    pub fn with_connections(
        mut self,
        connections: Vec<(usize, usize)>,
    ) -> Result<Self, MeshWaveError> {
        for &(a, b) in &connections {
            for f in [a, b] {
                if f >= self.mesh.n_faces() {
                    return Err(MeshWaveError::FaceOutOfRange {
                        face: f,
                        n_faces: self.mesh.n_faces(),
                    });
                }
            }
        }
        self.connections = connections;
        Ok(self)
    }

    /// Seed the wave: overwrite each face's value and mark it changed.
    pub fn set_face_info(&mut self, seeds: &[(usize, T)]) -> Result<(), MeshWaveError> {
        for (face, info) in seeds {
            if *face >= self.mesh.n_faces() {
                return Err(MeshWaveError::FaceOutOfRange {
                    face: *face,
                    n_faces: self.mesh.n_faces(),
                });
            }
            self.face_info[*face] = info.clone();
            self.changed_faces.insert(*face);
        }
        Ok(())
    }

    pub fn ctx(&self) -> &T::Ctx {
        &self.ctx
    }

    /// Faces marked changed on this rank right now.
    pub fn n_changed_faces(&self) -> usize {
        self.changed_faces.count()
    }

    pub fn n_changed_cells(&self) -> usize {
        self.changed_cells.count()
    }

    /// Cells that still hold no usable information.
    pub fn n_unvisited_cells(&self) -> usize {
        self.cell_info
            .iter()
            .filter(|i| !i.valid(&self.ctx))
            .count()
    }

    pub fn n_unvisited_faces(&self) -> usize {
        self.face_info
            .iter()
            .filter(|i| !i.valid(&self.ctx))
            .count()
    }

    fn reduce_tag(&self) -> CommTag {
        CommTag::new(self.opts.comm.base_tag).offset(2)
    }

    fn global_count(&self, local: u64) -> Result<u64, MeshWaveError> {
        global_sum_u64(self.comm, self.reduce_tag(), local)
    }

    // --- sweeps ---------------------------------------------------------

    /// Push every changed face's value into its owner (and, for internal
    /// faces, neighbour) cell. Clears the face-changed set. Returns the
    /// global count of cells changed.
    pub fn face_to_cell(&mut self) -> Result<u64, MeshWaveError> {
        let tol = self.opts.tolerance;
        let list = self.changed_faces.indices().to_vec();
        for &face in &list {
            if !self.changed_faces.contains(face) {
                continue; // retired mid-round, lazily compacted
            }
            let info = self.face_info[face].clone();
            let owner = self.mesh.owner(face);
            if self.cell_info[owner].update_cell(self.mesh, owner, face, &info, tol, &mut self.ctx)
            {
                self.changed_cells.insert(owner);
            }
            if let Some(nbr) = self.mesh.neighbour(face) {
                if self.cell_info[nbr].update_cell(self.mesh, nbr, face, &info, tol, &mut self.ctx)
                {
                    self.changed_cells.insert(nbr);
                }
            }
        }
        self.changed_faces.clear();
        let n = self.global_count(self.changed_cells.count() as u64)?;
        log::debug!(
            "rank {}: face_to_cell changed {} cells globally",
            self.comm.rank(),
            n
        );
        Ok(n)
    }

    /// Push every changed cell's value into its bounding faces, then
    /// synchronize coupled boundaries. Clears the cell-changed set. Returns
    /// the global count of faces changed.
    pub fn cell_to_face(&mut self) -> Result<u64, MeshWaveError> {
        let tol = self.opts.tolerance;
        let list = self.changed_cells.indices().to_vec();
        for &cell in &list {
            if !self.changed_cells.contains(cell) {
                continue;
            }
            let info = self.cell_info[cell].clone();
            for fi in 0..self.mesh.cell_faces(cell).len() {
                let face = self.mesh.cell_faces(cell)[fi];
                if self.face_info[face]
                    .update_face_from_cell(self.mesh, face, cell, &info, tol, &mut self.ctx)
                {
                    self.changed_faces.insert(face);
                }
            }
        }
        self.changed_cells.clear();
        self.sync_coupled_boundaries()?;
        let n = self.global_count(self.changed_faces.count() as u64)?;
        log::debug!(
            "rank {}: cell_to_face changed {} faces globally",
            self.comm.rank(),
            n
        );
        Ok(n)
    }

    /// One boundary-synchronization pass: explicit connections, processor
    /// exchange, cyclic pairings, non-conformal interfaces — in that order.
    pub fn sync_coupled_boundaries(&mut self) -> Result<(), MeshWaveError> {
        self.handle_explicit_connections();
        self.sync_processor_patches()?;
        self.sync_cyclic_patches();
        if self.opts.check_cyclic {
            self.check_cyclic_consistency();
        }
        self.sync_nonconformal_patches();
        Ok(())
    }

    fn handle_explicit_connections(&mut self) {
        if self.connections.is_empty() {
            return;
        }
        let tol = self.opts.tolerance;
        let mut updates: Vec<(usize, T)> = Vec::new();
        for &(a, b) in &self.connections {
            if self.changed_faces.contains(a) {
                updates.push((b, self.face_info[a].clone()));
            }
            if self.changed_faces.contains(b) {
                updates.push((a, self.face_info[b].clone()));
            }
        }
        for (face, info) in updates {
            if self.face_info[face].update_face_from_face(self.mesh, face, &info, tol, &mut self.ctx)
            {
                self.changed_faces.insert(face);
            }
        }
    }

    /// Exchange changed processor-boundary faces with the known neighbour
    /// ranks. `leave_domain` runs immediately before serialization on the
    /// sender, `apply_transform`/`enter_domain` immediately after
    /// deserialization on the receiver.
    fn sync_processor_patches(&mut self) -> Result<(), MeshWaveError> {
        let mesh = self.mesh;
        let neighbours = mesh.neighbour_ranks();
        if neighbours.is_empty() || !self.comm.is_parallel() {
            return Ok(());
        }
        let tol = self.opts.tolerance;
        let mut bufs = ChannelSet::new(self.comm, self.opts.comm);

        for patch in mesh.patches() {
            let Some(nbr) = patch.neighbour_rank() else {
                continue;
            };
            // collect before encoding: leave_domain may mutate values
            let mut entries: Vec<(usize, T)> = Vec::new();
            for face in patch.faces() {
                if self.changed_faces.contains(face) {
                    let lf = patch.local_index(face);
                    let mut info = self.face_info[face].clone();
                    info.leave_domain(mesh, patch, lf, mesh.face_centre(face), &mut self.ctx);
                    entries.push((lf, info));
                }
            }
            if entries.is_empty() {
                continue;
            }
            let mut enc = bufs.send_encoder(nbr);
            for (lf, info) in &entries {
                enc.write_usize(*lf)?;
                info.encode(&mut enc)?;
            }
        }
        bufs.finished_neighbour_sends(&neighbours, true)?;

        for patch in mesh.patches() {
            let Some(nbr) = patch.neighbour_rank() else {
                continue;
            };
            let mut incoming: Vec<(usize, T)> = Vec::new();
            {
                let mut dec = bufs.recv_decoder(nbr);
                while dec.has_more() {
                    let lf = dec.read_usize()?;
                    if lf >= patch.size {
                        return Err(MeshWaveError::comm(
                            nbr,
                            format!("received face index {lf} beyond patch size {}", patch.size),
                        ));
                    }
                    incoming.push((lf, T::decode(&mut dec)?));
                }
            }
            for (lf, mut info) in incoming {
                if let Some(t) = patch.transform() {
                    if t.is_rotational() {
                        info.apply_transform(t, &mut self.ctx);
                    }
                }
                let face = patch.start + lf;
                info.enter_domain(mesh, patch, lf, mesh.face_centre(face), &mut self.ctx);
                if self.face_info[face]
                    .update_face_from_face(mesh, face, &info, tol, &mut self.ctx)
                {
                    self.changed_faces.insert(face);
                }
            }
        }
        Ok(())
    }

    /// Exchange changed faces between cyclic patch halves through the same
    /// leave-domain / transform / enter-domain pipeline as the processor
    /// exchange. Values are snapshotted for both directions before any
    /// update lands, so one round stays symmetric.
    fn sync_cyclic_patches(&mut self) {
        let mesh = self.mesh;
        let tol = self.opts.tolerance;
        let mut updates: Vec<(usize, T)> = Vec::new();
        for patch in mesh.patches() {
            let PatchKind::Cyclic { partner, .. } = &patch.kind else {
                continue;
            };
            let other = mesh.patch(*partner);
            for lf in 0..patch.size {
                let src = other.start + lf;
                if !self.changed_faces.contains(src) {
                    continue;
                }
                let dst = patch.start + lf;
                let mut info = self.face_info[src].clone();
                info.leave_domain(mesh, other, lf, mesh.face_centre(src), &mut self.ctx);
                if let Some(t) = patch.transform() {
                    if t.is_rotational() {
                        info.apply_transform(t, &mut self.ctx);
                    }
                }
                info.enter_domain(mesh, patch, lf, mesh.face_centre(dst), &mut self.ctx);
                updates.push((dst, info));
            }
        }
        for (face, info) in updates {
            if self.face_info[face].update_face_from_face(mesh, face, &info, tol, &mut self.ctx) {
                self.changed_faces.insert(face);
            }
        }
    }

    /// Assert both halves of every cyclic pairing hold geometrically-equal
    /// values with identical changed flags. A mismatch is a tolerance or
    /// transform bug, never silently tolerated.
    fn check_cyclic_consistency(&mut self) {
        let mesh = self.mesh;
        let tol = self.opts.tolerance;
        for (pi, patch) in mesh.patches().iter().enumerate() {
            let PatchKind::Cyclic { partner, .. } = &patch.kind else {
                continue;
            };
            let other = mesh.patch(*partner);
            for lf in 0..patch.size {
                let own = patch.start + lf;
                let src = other.start + lf;
                let own_valid = self.face_info[own].valid(&self.ctx);
                let src_valid = self.face_info[src].valid(&self.ctx);
                if !(own_valid && src_valid) {
                    continue; // information has not reached this pair yet
                }
                let mut mirror = self.face_info[src].clone();
                mirror.leave_domain(mesh, other, lf, mesh.face_centre(src), &mut self.ctx);
                if let Some(t) = patch.transform() {
                    if t.is_rotational() {
                        mirror.apply_transform(t, &mut self.ctx);
                    }
                }
                mirror.enter_domain(mesh, patch, lf, mesh.face_centre(own), &mut self.ctx);
                if !self.face_info[own].same_as(&mirror, tol, &self.ctx) {
                    panic!(
                        "cyclic patch {pi} face {lf}: halves disagree beyond tolerance {tol} \
                         (faces {own} and {src})"
                    );
                }
                if self.changed_faces.contains(own) != self.changed_faces.contains(src) {
                    panic!(
                        "cyclic patch {pi} face {lf}: changed flags diverge (faces {own} and {src})"
                    );
                }
            }
        }
    }

    /// Interpolate changed source faces across non-conformal interfaces.
    /// Faces whose configured overlap weight is below the patch's
    /// `low_weight` threshold receive the payload default instead.
    fn sync_nonconformal_patches(&mut self) {
        let mesh = self.mesh;
        let tol = self.opts.tolerance;
        let mut updates: Vec<(usize, T)> = Vec::new();
        for patch in mesh.patches() {
            let PatchKind::NonConformal { partner, weights } = &patch.kind else {
                continue;
            };
            let other = mesh.patch(*partner);
            for lf in 0..patch.size {
                let changed_sources: Vec<(f64, T)> = weights.sources[lf]
                    .iter()
                    .filter(|&&(j, _)| self.changed_faces.contains(other.start + j))
                    .map(|&(j, w)| (w, self.face_info[other.start + j].clone()))
                    .collect();
                if changed_sources.is_empty() {
                    continue;
                }
                let incoming = if weights.total_weight(lf) < weights.low_weight {
                    T::default()
                } else {
                    T::interpolate(&changed_sources, &self.ctx)
                };
                updates.push((patch.start + lf, incoming));
            }
        }
        for (face, info) in updates {
            if self.face_info[face].update_face_from_face(mesh, face, &info, tol, &mut self.ctx) {
                self.changed_faces.insert(face);
            }
        }
    }

    // --- iteration --------------------------------------------------------

    /// Run up to `max_iter` face→cell / cell→face round pairs, stopping
    /// early on global quiescence. Returns the number of completed rounds.
    ///
    /// Every run begins with one boundary-synchronization pass so seeds
    /// placed on coupled faces reach their counterparts before the first
    /// sweep consumes the changed flags.
    ///
    /// `max_iter == -1` performs no work at all (seed-only initialization);
    /// `max_iter == 0` performs exactly the boundary-sync pass with no
    /// sweeps.
    pub fn iterate(&mut self, max_iter: i64) -> Result<usize, MeshWaveError> {
        if max_iter < 0 {
            return Ok(0);
        }
        self.sync_coupled_boundaries()?;
        if max_iter == 0 {
            return Ok(0);
        }
        let mut rounds = 0usize;
        while (rounds as i64) < max_iter {
            let n_cells = self.face_to_cell()?;
            if n_cells == 0 {
                break;
            }
            let n_faces = self.cell_to_face()?;
            rounds += 1;
            if n_faces == 0 {
                break;
            }
        }
        Ok(rounds)
    }

    /// Run to quiescence; exhausting `max_iter` without convergence is a
    /// configuration defect (connectivity or tolerance) and errors.
    pub fn run_to_convergence(&mut self, max_iter: usize) -> Result<usize, MeshWaveError> {
        let rounds = self.iterate(max_iter as i64)?;
        let remaining = self.global_count(
            (self.changed_faces.count() + self.changed_cells.count()) as u64,
        )?;
        if remaining > 0 {
            return Err(MeshWaveError::NonConvergence {
                max_iter,
                changed: remaining,
            });
        }
        Ok(rounds)
    }
}

/// One-call convenience: seed, then run to convergence.
pub fn propagate<T, C>(
    mesh: &MeshTopology,
    comm: &C,
    seeds: &[(usize, T)],
    face_info: &mut [T],
    cell_info: &mut [T],
    ctx: T::Ctx,
    opts: WaveOptions,
    max_iter: usize,
) -> Result<usize, MeshWaveError>
where
    T: FaceCellInfo,
    C: Communicator,
{
    let mut wave = FaceCellWave::new(mesh, comm, face_info, cell_info, ctx, opts)?;
    wave.set_face_info(seeds)?;
    wave.run_to_convergence(max_iter)
}

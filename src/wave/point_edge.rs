//! `PointEdgeWave`: the mirror propagation driver over the point/edge dual
//! graph.
//!
//! Points shared across processor patches are synchronized once per round
//! through the same buffered-exchange machinery as the face/cell wave,
//! using positionally-matched per-patch point lists. An extra sync runs
//! before the first sweep so seeds placed on shared points reach their
//! twins.

use crate::comm::channel_set::ChannelSet;
use crate::comm::collectives::global_sum_u64;
use crate::comm::communicator::Communicator;
use crate::comm::tag::CommTag;
use crate::error::MeshWaveError;
use crate::stream::WireCodec;
use crate::topology::mesh::MeshTopology;
use crate::wave::changed::ChangeSet;
use crate::wave::face_cell::WaveOptions;
use crate::wave::info::{PointEdgeInfo, check_arity};

/// Wavefront driver over externally-owned per-point and per-edge info
/// arrays.
pub struct PointEdgeWave<'a, T: PointEdgeInfo, C: Communicator> {
    mesh: &'a MeshTopology,
    comm: &'a C,
    opts: WaveOptions,
    point_info: &'a mut [T],
    edge_info: &'a mut [T],
    ctx: T::Ctx,
    changed_points: ChangeSet,
    changed_edges: ChangeSet,
}

impl<'a, T, C> PointEdgeWave<'a, T, C>
where
    T: PointEdgeInfo,
    C: Communicator,
{
    pub fn new(
        mesh: &'a MeshTopology,
        comm: &'a C,
        point_info: &'a mut [T],
        edge_info: &'a mut [T],
        ctx: T::Ctx,
        opts: WaveOptions,
    ) -> Result<Self, MeshWaveError> {
        if mesh.n_points() == 0 {
            return Err(MeshWaveError::Topology(
                "mesh has no point/edge layer; call with_point_edges first".into(),
            ));
        }
        check_arity("points", mesh.n_points(), point_info)?;
        check_arity("edges", mesh.n_edges(), edge_info)?;
        let n_points = mesh.n_points();
        let n_edges = mesh.n_edges();
        Ok(Self {
            mesh,
            comm,
            opts,
            point_info,
            edge_info,
            ctx,
            changed_points: ChangeSet::new(n_points),
            changed_edges: ChangeSet::new(n_edges),
        })
    }

    /// Seed the wave: overwrite each point's value and mark it changed.
    pub fn set_point_info(&mut self, seeds: &[(usize, T)]) -> Result<(), MeshWaveError> {
        for (point, info) in seeds {
            if *point >= self.mesh.n_points() {
                return Err(MeshWaveError::Topology(format!(
                    "seed point {point} beyond {} points",
                    self.mesh.n_points()
                )));
            }
            self.point_info[*point] = info.clone();
            self.changed_points.insert(*point);
        }
        Ok(())
    }

    pub fn n_changed_points(&self) -> usize {
        self.changed_points.count()
    }

    pub fn n_changed_edges(&self) -> usize {
        self.changed_edges.count()
    }

    pub fn n_unvisited_points(&self) -> usize {
        self.point_info
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

    /// Push every changed point's value into its adjacent edges. Clears the
    /// point-changed set. Returns the global count of edges changed.
    pub fn point_to_edge(&mut self) -> Result<u64, MeshWaveError> {
        let tol = self.opts.tolerance;
        let list = self.changed_points.indices().to_vec();
        for &point in &list {
            if !self.changed_points.contains(point) {
                continue;
            }
            let info = self.point_info[point].clone();
            for ei in 0..self.mesh.point_edges(point).len() {
                let edge = self.mesh.point_edges(point)[ei];
                if self.edge_info[edge].update_edge(self.mesh, edge, point, &info, tol, &mut self.ctx)
                {
                    self.changed_edges.insert(edge);
                }
            }
        }
        self.changed_points.clear();
        let n = self.global_count(self.changed_edges.count() as u64)?;
        log::debug!(
            "rank {}: point_to_edge changed {} edges globally",
            self.comm.rank(),
            n
        );
        Ok(n)
    }

    /// Push every changed edge's value into its two endpoints, then
    /// synchronize processor-shared points. Returns the global count of
    /// points changed.
    pub fn edge_to_point(&mut self) -> Result<u64, MeshWaveError> {
        let tol = self.opts.tolerance;
        let list = self.changed_edges.indices().to_vec();
        for &edge in &list {
            if !self.changed_edges.contains(edge) {
                continue;
            }
            let info = self.edge_info[edge].clone();
            let [a, b] = self.mesh.edge(edge);
            for point in [a, b] {
                if self.point_info[point].update_point(self.mesh, point, edge, &info, tol, &mut self.ctx)
                {
                    self.changed_points.insert(point);
                }
            }
        }
        self.changed_edges.clear();
        self.sync_shared_points()?;
        let n = self.global_count(self.changed_points.count() as u64)?;
        log::debug!(
            "rank {}: edge_to_point changed {} points globally",
            self.comm.rank(),
            n
        );
        Ok(n)
    }

    /// Exchange changed shared points with neighbour ranks. Point `k` of a
    /// patch's shared-point list matches point `k` of the partner's list.
    pub fn sync_shared_points(&mut self) -> Result<(), MeshWaveError> {
        let mesh = self.mesh;
        let neighbours: Vec<usize> = mesh
            .patches()
            .iter()
            .enumerate()
            .filter(|(pi, p)| p.neighbour_rank().is_some() && !mesh.patch_points(*pi).is_empty())
            .filter_map(|(_, p)| p.neighbour_rank())
            .collect();
        if neighbours.is_empty() || !self.comm.is_parallel() {
            return Ok(());
        }
        let tol = self.opts.tolerance;
        let mut bufs = ChannelSet::new(self.comm, self.opts.comm);

        for (pi, patch) in mesh.patches().iter().enumerate() {
            let Some(nbr) = patch.neighbour_rank() else {
                continue;
            };
            let shared = mesh.patch_points(pi);
            if shared.is_empty() {
                continue;
            }
            let mut entries: Vec<(usize, T)> = Vec::new();
            for (pos, &point) in shared.iter().enumerate() {
                if self.changed_points.contains(point) {
                    let mut info = self.point_info[point].clone();
                    info.leave_domain(mesh, patch, pos, mesh.point_coord(point), &mut self.ctx);
                    entries.push((pos, info));
                }
            }
            if entries.is_empty() {
                continue;
            }
            let mut enc = bufs.send_encoder(nbr);
            for (pos, info) in &entries {
                enc.write_usize(*pos)?;
                info.encode(&mut enc)?;
            }
        }
        bufs.finished_neighbour_sends(&neighbours, true)?;

        for (pi, patch) in mesh.patches().iter().enumerate() {
            let Some(nbr) = patch.neighbour_rank() else {
                continue;
            };
            let shared = mesh.patch_points(pi);
            if shared.is_empty() {
                continue;
            }
            let mut incoming: Vec<(usize, T)> = Vec::new();
            {
                let mut dec = bufs.recv_decoder(nbr);
                while dec.has_more() {
                    let pos = dec.read_usize()?;
                    if pos >= shared.len() {
                        return Err(MeshWaveError::comm(
                            nbr,
                            format!(
                                "received shared-point index {pos} beyond list of {}",
                                shared.len()
                            ),
                        ));
                    }
                    incoming.push((pos, T::decode(&mut dec)?));
                }
            }
            for (pos, mut info) in incoming {
                if let Some(t) = patch.transform() {
                    if t.is_rotational() {
                        info.apply_transform(t, &mut self.ctx);
                    }
                }
                let point = shared[pos];
                info.enter_domain(mesh, patch, pos, mesh.point_coord(point), &mut self.ctx);
                if self.point_info[point].update_point_same(mesh, point, &info, tol, &mut self.ctx)
                {
                    self.changed_points.insert(point);
                }
            }
        }
        Ok(())
    }

    /// Run up to `max_iter` point→edge / edge→point round pairs, after one
    /// initial shared-point sync so boundary seeds reach their twins.
    /// Semantics of `max_iter` match
    /// [`FaceCellWave::iterate`](crate::wave::face_cell::FaceCellWave::iterate).
    pub fn iterate(&mut self, max_iter: i64) -> Result<usize, MeshWaveError> {
        if max_iter < 0 {
            return Ok(0);
        }
        self.sync_shared_points()?;
        if max_iter == 0 {
            return Ok(0);
        }
        let mut rounds = 0usize;
        while (rounds as i64) < max_iter {
            let n_edges = self.point_to_edge()?;
            if n_edges == 0 {
                break;
            }
            let n_points = self.edge_to_point()?;
            rounds += 1;
            if n_points == 0 {
                break;
            }
        }
        Ok(rounds)
    }

    /// Run to quiescence; exhaustion is a configuration defect.
    pub fn run_to_convergence(&mut self, max_iter: usize) -> Result<usize, MeshWaveError> {
        let rounds = self.iterate(max_iter as i64)?;
        let remaining = self.global_count(
            (self.changed_points.count() + self.changed_edges.count()) as u64,
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

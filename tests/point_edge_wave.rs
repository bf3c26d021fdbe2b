//! Point/edge wave: hop counting along a path graph, serial and split
//! across two ranks with a shared boundary point.

use mesh_wave::comm::Communicator;
use mesh_wave::comm::communicator::{NoComm, ThreadComm};
use mesh_wave::topology::mesh::{MeshTopology, line_mesh, line_mesh_serial};
use mesh_wave::wave::face_cell::WaveOptions;
use mesh_wave::wave::payloads::MinHop;
use mesh_wave::wave::point_edge::PointEdgeWave;
use std::thread;

/// Points along a line mesh: one per cell boundary, edges joining
/// consecutive points.
fn with_path_points(mesh: MeshTopology) -> MeshTopology {
    let n_points = mesh.n_cells() + 1;
    let edges: Vec<[usize; 2]> = (0..mesh.n_cells()).map(|i| [i, i + 1]).collect();
    mesh.with_point_edges(n_points, edges).unwrap()
}

#[test]
fn serial_path_hops_count_up() {
    let comm = NoComm;
    let mesh = with_path_points(line_mesh_serial(4).unwrap());
    let mut point_info = vec![MinHop::default(); mesh.n_points()];
    let mut edge_info = vec![MinHop::default(); mesh.n_edges()];
    let mut wave = PointEdgeWave::new(
        &mesh,
        &comm,
        &mut point_info,
        &mut edge_info,
        (),
        WaveOptions::default(),
    )
    .unwrap();
    wave.set_point_info(&[(0, MinHop::seeded(0))]).unwrap();
    let rounds = wave.run_to_convergence(32).unwrap();
    assert!(rounds > 0);

    let points: Vec<u64> = point_info.iter().map(|i| i.value).collect();
    assert_eq!(points, vec![0, 1, 2, 3, 4]);
    let edges: Vec<u64> = edge_info.iter().map(|i| i.value).collect();
    assert_eq!(edges, vec![0, 1, 2, 3]);
}

#[test]
fn converged_point_wave_is_idempotent() {
    let comm = NoComm;
    let mesh = with_path_points(line_mesh_serial(3).unwrap());
    let mut point_info = vec![MinHop::default(); mesh.n_points()];
    let mut edge_info = vec![MinHop::default(); mesh.n_edges()];
    let mut wave = PointEdgeWave::new(
        &mesh,
        &comm,
        &mut point_info,
        &mut edge_info,
        (),
        WaveOptions::default(),
    )
    .unwrap();
    wave.set_point_info(&[(0, MinHop::seeded(0))]).unwrap();
    wave.run_to_convergence(32).unwrap();
    assert_eq!(wave.iterate(32).unwrap(), 0);
    assert_eq!(wave.n_unvisited_points(), 0);
}

/// Split the path across two ranks; the block-boundary point is shared and
/// synchronized through the processor patches.
#[test]
fn shared_point_couples_the_split_path() {
    let n_global_cells = 6;
    let comms = ThreadComm::universe(2);
    let results: Vec<Vec<(usize, u64)>> = thread::scope(|s| {
        let handles: Vec<_> = comms
            .iter()
            .map(|comm| {
                s.spawn(move || {
                    let rank = comm.rank();
                    // rank 0: cells 0..3, points g0..g3; rank 1: cells 3..6, points g3..g6
                    let base = line_mesh(n_global_cells, rank, 2).unwrap();
                    let n_local_cells = base.n_cells();
                    let offset = if rank == 0 { 0 } else { 3 };
                    let mut mesh = with_path_points(base);
                    // the shared point is the last local point on rank 0,
                    // the first on rank 1; both sit on the processor patch
                    let shared_local = if rank == 0 { n_local_cells } else { 0 };
                    let proc_patch = if rank == 0 { 1 } else { 0 };
                    mesh = mesh
                        .with_patch_points(proc_patch, vec![shared_local])
                        .unwrap();

                    let mut point_info = vec![MinHop::default(); mesh.n_points()];
                    let mut edge_info = vec![MinHop::default(); mesh.n_edges()];
                    let mut wave = PointEdgeWave::new(
                        &mesh,
                        comm,
                        &mut point_info,
                        &mut edge_info,
                        (),
                        WaveOptions::default(),
                    )
                    .unwrap();
                    if rank == 0 {
                        wave.set_point_info(&[(0, MinHop::seeded(0))]).unwrap();
                    }
                    wave.run_to_convergence(32).unwrap();
                    point_info
                        .iter()
                        .enumerate()
                        .map(|(p, i)| (offset + p, i.value))
                        .collect()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut global = vec![u64::MAX; n_global_cells + 1];
    for per_rank in results {
        for (g, v) in per_rank {
            // the shared point is reported by both ranks with the same value
            if global[g] != u64::MAX {
                assert_eq!(global[g], v, "shared point {g} disagrees");
            }
            global[g] = v;
        }
    }
    assert_eq!(global, (0..=n_global_cells as u64).collect::<Vec<_>>());
}

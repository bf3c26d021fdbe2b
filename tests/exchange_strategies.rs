//! Size-discovery strategy parity: for the same random send-size
//! distribution, every strategy must leave identical bytes in the receive
//! buffers — including the consensus exchange, which never exchanges sizes
//! at all.

use mesh_wave::comm::Communicator;
use mesh_wave::comm::communicator::ThreadComm;
use mesh_wave::comm::config::{CommConfig, ExchangeStrategy};
use mesh_wave::comm::channel_set::ChannelSet;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::thread;

fn spmd<F, R>(size: usize, f: F) -> Vec<R>
where
    F: Fn(&ThreadComm) -> R + Sync,
    R: Send,
{
    let comms = ThreadComm::universe(size);
    thread::scope(|s| {
        let f = &f;
        let handles: Vec<_> = comms
            .iter()
            .map(|comm| s.spawn(move || f(comm)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Deterministic per-pair payload: `len` bytes of a pattern derived from
/// `(src, dst)`.
fn payload(src: usize, dst: usize, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (src.wrapping_mul(31) ^ dst.wrapping_mul(7) ^ i) as u8)
        .collect()
}

fn random_exchange(
    comm: &ThreadComm,
    strategy: ExchangeStrategy,
    base_tag: u16,
    seed: u64,
) -> Vec<Vec<u8>> {
    let me = comm.rank();
    let config = CommConfig::default()
        .with_strategy(strategy)
        .with_base_tag(base_tag);
    let mut set = ChannelSet::new(comm, config);
    // each sender draws its own sizes; receivers know nothing in advance
    let mut rng = SmallRng::seed_from_u64(seed.wrapping_add(me as u64));
    for peer in 0..comm.size() {
        let len = if rng.gen_bool(0.3) {
            0
        } else {
            rng.gen_range(1..64)
        };
        set.send_channel(peer)
            .write_bytes(&payload(me, peer, len))
            .unwrap();
    }
    set.finished_sends(true).unwrap();
    let mut received = Vec::new();
    for peer in 0..comm.size() {
        let n = set.recv_size(peer);
        received.push(set.recv_channel(peer).read_bytes(n).unwrap().to_vec());
    }
    received
}

#[test]
fn all_strategies_deliver_identical_buffers() {
    for size in [1usize, 2, 8] {
        let reference = spmd(size, |comm| {
            random_exchange(comm, ExchangeStrategy::GatherScatter, 0x1000, 42)
        });
        // contents must also be *correct*, not merely consistent
        for (me, per_rank) in reference.iter().enumerate() {
            for (src, bytes) in per_rank.iter().enumerate() {
                assert_eq!(
                    bytes,
                    &payload(src, me, bytes.len()),
                    "rank {me} from {src} at size {size}"
                );
            }
        }
        for (i, strategy) in [
            ExchangeStrategy::Pairwise,
            ExchangeStrategy::AllToAll,
            ExchangeStrategy::Consensus,
        ]
        .into_iter()
        .enumerate()
        {
            let got = spmd(size, |comm| {
                random_exchange(comm, strategy, 0x2000 + 0x100 * i as u16, 42)
            });
            assert_eq!(got, reference, "{strategy:?} at size {size}");
        }
    }
}

#[test]
fn unregistered_speculative_sends_cost_nothing() {
    for strategy in [ExchangeStrategy::Pairwise, ExchangeStrategy::Consensus] {
        let totals = spmd(4, |comm| {
            let config = CommConfig::default()
                .with_strategy(strategy)
                .with_base_tag(0x5000);
            let mut set = ChannelSet::new(comm, config);
            set.init_register_send();
            for peer in 0..comm.size() {
                set.send_channel(peer).write_bytes(&[9; 16]).unwrap();
            }
            // nothing registered: all fills were speculative
            set.clear_unregistered();
            set.finished_sends(true).unwrap();
            (0..comm.size()).map(|r| set.recv_size(r)).sum::<usize>()
        });
        assert_eq!(totals, vec![0, 0, 0, 0], "{strategy:?}");
    }
}

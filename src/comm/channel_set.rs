//! Per-process-group exchange scratch space: one send and one receive
//! channel per rank, coordinated by a two-phase protocol.
//!
//! Phase 1 (`Filling`): writers fill per-rank send channels. Phase 2 begins
//! at [`ChannelSet::finished_sends`] — receive sizes are discovered with the
//! configured [`ExchangeStrategy`], data moves, and once the set reaches
//! `Exchanged` the receive channels may be read. Using an accessor in the
//! wrong phase is a programming defect and panics.
//!
//! The drop check catches protocol misuse late: a set dropped with unread
//! receive data (and no explicit [`ChannelSet::discard_remaining`]) panics
//! in debug builds and under the `check-invariants` feature.

use crate::comm::collectives::{exchange_consensus, exchange_sizes};
use crate::comm::communicator::{Communicator, Wait};
use crate::comm::config::{CommConfig, ExchangeStrategy};
use crate::comm::wire::{WireSize, cast_slice, cast_slice_from};
use crate::error::MeshWaveError;
use crate::stream::{ByteChannel, Decoder, Encoder};
use hashbrown::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangePhase {
    Filling,
    InFlight,
    Exchanged,
}

/// Send/receive buffer set for one logical exchange round.
pub struct ChannelSet<'c, C: Communicator> {
    comm: &'c C,
    config: CommConfig,
    sends: Vec<ByteChannel>,
    recvs: Vec<ByteChannel>,
    /// `Some` once `init_register_send` marked all sends speculative.
    registered: Option<Vec<bool>>,
    pending_recvs: Vec<(usize, C::RecvHandle)>,
    pending_sends: Vec<C::SendHandle>,
    expected: Vec<usize>,
    phase: ExchangePhase,
    discarded: bool,
}

impl<'c, C: Communicator> ChannelSet<'c, C> {
    pub fn new(comm: &'c C, config: CommConfig) -> Self {
        let size = comm.size();
        Self {
            comm,
            config,
            sends: (0..size).map(|_| ByteChannel::new()).collect(),
            recvs: (0..size).map(|_| ByteChannel::new()).collect(),
            registered: None,
            pending_recvs: Vec::new(),
            pending_sends: Vec::new(),
            expected: vec![0; size],
            phase: ExchangePhase::Filling,
            discarded: false,
        }
    }

    pub fn comm(&self) -> &C {
        self.comm
    }

    pub fn config(&self) -> &CommConfig {
        &self.config
    }

    /// Scratch send channel towards `rank`; only valid before the barrier.
    pub fn send_channel(&mut self, rank: usize) -> &mut ByteChannel {
        assert!(
            self.phase == ExchangePhase::Filling,
            "ChannelSet: send_channel({rank}) called after finished_sends"
        );
        assert!(
            rank < self.sends.len(),
            "ChannelSet: rank {rank} out of range for size {}",
            self.sends.len()
        );
        &mut self.sends[rank]
    }

    /// Typed writer into the send channel towards `rank`.
    pub fn send_encoder(&mut self, rank: usize) -> Encoder<'_> {
        let format = self.config.format;
        let widths = self.config.widths;
        Encoder::new(self.send_channel(rank), format, widths)
    }

    // --- registered-send bookkeeping -------------------------------------

    /// Mark every send as speculative; sends stay speculative until
    /// [`register_send`](Self::register_send) confirms them.
    pub fn init_register_send(&mut self) {
        assert!(
            self.phase == ExchangePhase::Filling,
            "ChannelSet: init_register_send after finished_sends"
        );
        self.registered = Some(vec![false; self.sends.len()]);
    }

    /// Confirm the send towards `rank` as real. Monotonic: a registered
    /// send is never unregistered.
    pub fn register_send(&mut self, rank: usize) {
        if let Some(flags) = self.registered.as_mut() {
            flags[rank] = true;
        }
    }

    /// Drop the buffers of every rank that was never registered, so
    /// speculative fills that turned out empty cost no bandwidth.
    pub fn clear_unregistered(&mut self) {
        assert!(
            self.phase == ExchangePhase::Filling,
            "ChannelSet: clear_unregistered after finished_sends"
        );
        if let Some(flags) = self.registered.as_ref() {
            for (rank, &keep) in flags.iter().enumerate() {
                if !keep {
                    self.sends[rank].clear();
                }
            }
        }
    }

    // --- the two-phase barrier --------------------------------------------

    /// Declare all sends complete and start moving data.
    ///
    /// With `wait = true` the call returns only when every receive channel
    /// is materialized. With `wait = false` the receives stay in flight and
    /// [`wait_receives`](Self::wait_receives) must run before any receive
    /// channel is read. The consensus strategy completes eagerly regardless
    /// (its termination detection is itself the wait).
    pub fn finished_sends(&mut self, wait: bool) -> Result<(), MeshWaveError> {
        assert!(
            self.phase == ExchangePhase::Filling,
            "ChannelSet: finished_sends called twice"
        );
        if self.config.strategy == ExchangeStrategy::Consensus {
            return self.finish_consensus();
        }
        let send_sizes: Vec<usize> = self.sends.iter().map(|c| c.len()).collect();
        let recv_sizes = exchange_sizes(
            self.comm,
            &send_sizes,
            self.config.strategy,
            self.config.tags().sizes,
            None,
        )?;
        self.begin_data_phase(recv_sizes, wait)
    }

    /// Restricted barrier: only `neighbours` are candidates for exchange.
    ///
    /// An optimization for mesh-adjacency patterns where the candidate set
    /// is small and known. Writing data for a rank outside the set is a
    /// protocol error.
    pub fn finished_neighbour_sends(
        &mut self,
        neighbours: &[usize],
        wait: bool,
    ) -> Result<(), MeshWaveError> {
        assert!(
            self.phase == ExchangePhase::Filling,
            "ChannelSet: finished_neighbour_sends called twice"
        );
        let me = self.comm.rank();
        for (rank, chan) in self.sends.iter().enumerate() {
            if !chan.is_empty() && rank != me && !neighbours.contains(&rank) {
                panic!(
                    "ChannelSet: data written for rank {rank}, which is not in the declared \
                     neighbour set"
                );
            }
        }
        let send_sizes: Vec<usize> = self.sends.iter().map(|c| c.len()).collect();
        let recv_sizes = exchange_sizes(
            self.comm,
            &send_sizes,
            ExchangeStrategy::Pairwise,
            self.config.tags().sizes,
            Some(neighbours),
        )?;
        self.begin_data_phase(recv_sizes, wait)
    }

    /// Hub-and-spoke specialization: every rank's send channel towards rank
    /// 0 is delivered there; nothing else moves.
    pub fn finished_gathers(&mut self, wait: bool) -> Result<(), MeshWaveError> {
        assert!(
            self.phase == ExchangePhase::Filling,
            "ChannelSet: finished_gathers called twice"
        );
        let me = self.comm.rank();
        for (rank, chan) in self.sends.iter().enumerate() {
            if !chan.is_empty() && rank != 0 && rank != me {
                panic!("ChannelSet: gather round may only send to the hub, found data for rank {rank}");
            }
        }
        let size = self.comm.size();
        let tags = self.config.tags();
        let mut recv_sizes = vec![0usize; size];
        if me == 0 {
            recv_sizes[0] = self.sends[0].len();
            for peer in 1..size {
                let bytes = self
                    .comm
                    .recv(peer, tags.sizes.base(), std::mem::size_of::<WireSize>())
                    .ok_or_else(|| MeshWaveError::comm(peer, "gather size header failed"))?;
                recv_sizes[peer] = cast_slice_from::<WireSize>(&bytes)[0].get();
            }
        } else {
            let header = WireSize::new(self.sends[0].len());
            self.comm
                .send(0, tags.sizes.base(), cast_slice(std::slice::from_ref(&header)));
        }
        self.begin_directed_phase(recv_sizes, me != 0, wait)
    }

    /// Hub-and-spoke specialization: the hub's per-rank send channels are
    /// delivered to their ranks; nothing flows towards the hub.
    pub fn finished_scatters(&mut self, wait: bool) -> Result<(), MeshWaveError> {
        assert!(
            self.phase == ExchangePhase::Filling,
            "ChannelSet: finished_scatters called twice"
        );
        let me = self.comm.rank();
        if me != 0 {
            for (rank, chan) in self.sends.iter().enumerate() {
                if !chan.is_empty() && rank != me {
                    panic!("ChannelSet: scatter round only delivers from the hub, rank {me} wrote data for {rank}");
                }
            }
        }
        let size = self.comm.size();
        let tags = self.config.tags();
        let mut recv_sizes = vec![0usize; size];
        if me == 0 {
            recv_sizes[0] = self.sends[0].len();
            for peer in 1..size {
                let header = WireSize::new(self.sends[peer].len());
                self.comm
                    .send(peer, tags.sizes.base(), cast_slice(std::slice::from_ref(&header)));
            }
        } else {
            let bytes = self
                .comm
                .recv(0, tags.sizes.base(), std::mem::size_of::<WireSize>())
                .ok_or_else(|| MeshWaveError::comm(0, "scatter size header failed"))?;
            recv_sizes[0] = cast_slice_from::<WireSize>(&bytes)[0].get();
        }
        self.begin_directed_phase(recv_sizes, me == 0, wait)
    }

    fn finish_consensus(&mut self) -> Result<(), MeshWaveError> {
        let me = self.comm.rank();
        let mut outgoing: HashMap<usize, Vec<u8>> = HashMap::new();
        for (rank, chan) in self.sends.iter().enumerate() {
            if !chan.is_empty() || rank == me {
                outgoing.insert(rank, chan.as_slice().to_vec());
            }
        }
        let mut received = exchange_consensus(self.comm, outgoing, self.config.tags().data)?;
        for (peer, data) in received.drain() {
            self.recvs[peer] = ByteChannel::from_bytes(data);
        }
        self.phase = ExchangePhase::Exchanged;
        log::trace!(
            "rank {me}: consensus exchange complete, {} bytes total received",
            self.recvs.iter().map(|c| c.len()).sum::<usize>()
        );
        Ok(())
    }

    /// Post the data-phase transfers for a symmetric exchange.
    fn begin_data_phase(
        &mut self,
        recv_sizes: Vec<usize>,
        wait: bool,
    ) -> Result<(), MeshWaveError> {
        self.begin_directed_phase(recv_sizes, true, wait)
    }

    /// Post transfers; `send_allowed` gates whether this rank sends at all
    /// (gather/scatter rounds are one-directional).
    fn begin_directed_phase(
        &mut self,
        recv_sizes: Vec<usize>,
        send_allowed: bool,
        wait: bool,
    ) -> Result<(), MeshWaveError> {
        let me = self.comm.rank();
        let tags = self.config.tags();

        // local slot short-circuits the transport
        self.recvs[me] = ByteChannel::from_bytes(self.sends[me].as_slice().to_vec());

        for peer in 0..self.comm.size() {
            if peer != me && recv_sizes[peer] > 0 {
                self.pending_recvs
                    .push((peer, self.comm.irecv(peer, tags.data.base(), recv_sizes[peer])));
            }
        }
        if send_allowed {
            for peer in 0..self.comm.size() {
                if peer != me && !self.sends[peer].is_empty() {
                    self.pending_sends
                        .push(self.comm.isend(peer, tags.data.base(), self.sends[peer].as_slice()));
                }
            }
        }
        self.expected = recv_sizes;
        self.phase = ExchangePhase::InFlight;
        if wait { self.wait_receives() } else { Ok(()) }
    }

    /// Complete an exchange started with `wait = false`.
    pub fn wait_receives(&mut self) -> Result<(), MeshWaveError> {
        assert!(
            self.phase == ExchangePhase::InFlight,
            "ChannelSet: wait_receives without an exchange in flight"
        );
        let mut maybe_err = None;
        for (peer, handle) in self.pending_recvs.drain(..) {
            match handle.wait() {
                Some(data) if data.len() == self.expected[peer] => {
                    if maybe_err.is_none() {
                        self.recvs[peer] = ByteChannel::from_bytes(data);
                    }
                }
                Some(data) if maybe_err.is_none() => {
                    maybe_err = Some(MeshWaveError::SizeMismatch {
                        neighbor: peer,
                        expected: self.expected[peer],
                        got: data.len(),
                    });
                }
                None if maybe_err.is_none() => {
                    maybe_err = Some(MeshWaveError::comm(peer, "exchange data receive failed"));
                }
                _ => {}
            }
        }
        for send in self.pending_sends.drain(..) {
            let _ = send.wait();
        }
        self.phase = ExchangePhase::Exchanged;
        match maybe_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // --- receive-side accessors -------------------------------------------

    /// Receive channel from `rank`; only valid after the exchange barrier.
    pub fn recv_channel(&mut self, rank: usize) -> &mut ByteChannel {
        assert!(
            self.phase == ExchangePhase::Exchanged,
            "ChannelSet: recv_channel({rank}) before the exchange barrier"
        );
        &mut self.recvs[rank]
    }

    /// Typed reader over the payload received from `rank`.
    pub fn recv_decoder(&mut self, rank: usize) -> Decoder<'_> {
        let format = self.config.format;
        let widths = self.config.widths;
        Decoder::new(self.recv_channel(rank), format, widths)
    }

    /// Bytes received from `rank` this round.
    pub fn recv_size(&self, rank: usize) -> usize {
        assert!(
            self.phase == ExchangePhase::Exchanged,
            "ChannelSet: recv_size({rank}) before the exchange barrier"
        );
        self.recvs[rank].len()
    }

    /// Ranks that delivered at least one byte this round.
    pub fn senders(&self) -> Vec<usize> {
        assert!(
            self.phase == ExchangePhase::Exchanged,
            "ChannelSet: senders() before the exchange barrier"
        );
        (0..self.recvs.len())
            .filter(|&r| !self.recvs[r].is_empty())
            .collect()
    }

    /// Explicitly waive the "all receive data consumed" drop check.
    pub fn discard_remaining(&mut self) {
        self.discarded = true;
    }

    /// Reset for the next logical exchange round. Implies discarding any
    /// unread receive data.
    pub fn clear(&mut self) {
        for chan in self.sends.iter_mut().chain(self.recvs.iter_mut()) {
            chan.clear();
        }
        self.registered = None;
        self.pending_recvs.clear();
        self.pending_sends.clear();
        self.expected.iter_mut().for_each(|n| *n = 0);
        self.phase = ExchangePhase::Filling;
        self.discarded = false;
    }
}

impl<C: Communicator> Drop for ChannelSet<'_, C> {
    fn drop(&mut self) {
        if !(cfg!(debug_assertions) || cfg!(feature = "check-invariants"))
            || std::thread::panicking()
        {
            return;
        }
        if self.phase == ExchangePhase::InFlight {
            panic!("ChannelSet dropped with an exchange still in flight (missing wait_receives)");
        }
        if self.phase == ExchangePhase::Exchanged && !self.discarded {
            for (rank, chan) in self.recvs.iter().enumerate() {
                if chan.remaining() > 0 {
                    panic!(
                        "ChannelSet dropped with {} unconsumed bytes from rank {rank}",
                        chan.remaining()
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::{NoComm, ThreadComm};
    use std::thread;

    fn config_with(strategy: ExchangeStrategy, base_tag: u16) -> CommConfig {
        CommConfig::default()
            .with_strategy(strategy)
            .with_base_tag(base_tag)
    }

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

    /// Every rank sends `10*me + peer` to every peer; verify contents.
    fn ring_exchange(comm: &ThreadComm, strategy: ExchangeStrategy, tag: u16) -> Vec<u64> {
        let me = comm.rank();
        let mut set = ChannelSet::new(comm, config_with(strategy, tag));
        for peer in 0..comm.size() {
            set.send_encoder(peer)
                .write_u64((10 * me + peer) as u64)
                .unwrap();
        }
        set.finished_sends(true).unwrap();
        let mut got = Vec::new();
        for peer in 0..comm.size() {
            got.push(set.recv_decoder(peer).read_u64().unwrap());
        }
        got
    }

    #[test]
    fn full_exchange_all_strategies() {
        for (i, strategy) in [
            ExchangeStrategy::GatherScatter,
            ExchangeStrategy::Pairwise,
            ExchangeStrategy::AllToAll,
            ExchangeStrategy::Consensus,
        ]
        .into_iter()
        .enumerate()
        {
            let results = spmd(3, |comm| ring_exchange(comm, strategy, 0x1000 + 16 * i as u16));
            for (me, got) in results.into_iter().enumerate() {
                let expected: Vec<u64> = (0..3).map(|peer| (10 * peer + me) as u64).collect();
                assert_eq!(got, expected, "strategy {strategy:?}, rank {me}");
            }
        }
    }

    #[test]
    fn neighbour_restricted_exchange() {
        // line topology 0-1-2: each rank only talks to adjacent ranks
        let results = spmd(3, |comm| {
            let me = comm.rank();
            let neighbours: Vec<usize> = match me {
                0 => vec![1],
                1 => vec![0, 2],
                _ => vec![1],
            };
            let mut set = ChannelSet::new(comm, config_with(ExchangeStrategy::Pairwise, 0x2000));
            for &nbr in &neighbours {
                set.send_encoder(nbr).write_usize(me).unwrap();
            }
            set.finished_neighbour_sends(&neighbours, true).unwrap();
            let mut got = Vec::new();
            for &nbr in &neighbours {
                got.push(set.recv_decoder(nbr).read_usize().unwrap());
            }
            set.discard_remaining();
            got
        });
        assert_eq!(results[0], vec![1]);
        assert_eq!(results[1], vec![0, 2]);
        assert_eq!(results[2], vec![1]);
    }

    #[test]
    fn deferred_wait_then_read() {
        let results = spmd(2, |comm| {
            let me = comm.rank();
            let other = 1 - me;
            let mut set = ChannelSet::new(comm, config_with(ExchangeStrategy::AllToAll, 0x3000));
            set.send_encoder(other).write_u64(me as u64 + 40).unwrap();
            set.finished_sends(false).unwrap();
            set.wait_receives().unwrap();
            set.recv_decoder(other).read_u64().unwrap()
        });
        assert_eq!(results, vec![41, 40]);
    }

    #[test]
    fn zero_registered_sends_deliver_nothing() {
        let results = spmd(3, |comm| {
            let mut set = ChannelSet::new(comm, config_with(ExchangeStrategy::Pairwise, 0x4000));
            set.init_register_send();
            for peer in 0..comm.size() {
                // speculative fills that never get registered
                set.send_encoder(peer).write_u64(0xDEAD).unwrap();
            }
            set.clear_unregistered();
            set.finished_sends(true).unwrap();
            (0..comm.size()).map(|r| set.recv_size(r)).sum::<usize>()
        });
        assert_eq!(results, vec![0, 0, 0]);
    }

    #[test]
    fn registered_send_survives_clear() {
        let results = spmd(2, |comm| {
            let me = comm.rank();
            let other = 1 - me;
            let mut set = ChannelSet::new(comm, config_with(ExchangeStrategy::Pairwise, 0x5000));
            set.init_register_send();
            set.send_encoder(other).write_u64(7).unwrap();
            set.register_send(other);
            set.clear_unregistered();
            set.finished_sends(true).unwrap();
            set.recv_decoder(other).read_u64().unwrap()
        });
        assert_eq!(results, vec![7, 7]);
    }

    #[test]
    fn gather_round_collects_at_hub() {
        let results = spmd(3, |comm| {
            let me = comm.rank();
            let mut set = ChannelSet::new(comm, config_with(ExchangeStrategy::Pairwise, 0x6000));
            set.send_encoder(0).write_usize(100 + me).unwrap();
            set.finished_gathers(true).unwrap();
            let mut got = Vec::new();
            if me == 0 {
                for peer in 0..comm.size() {
                    got.push(set.recv_decoder(peer).read_usize().unwrap());
                }
            } else {
                set.discard_remaining();
            }
            got
        });
        assert_eq!(results[0], vec![100, 101, 102]);
        assert!(results[1].is_empty());
        assert!(results[2].is_empty());
    }

    #[test]
    fn scatter_round_delivers_from_hub() {
        let results = spmd(3, |comm| {
            let me = comm.rank();
            let mut set = ChannelSet::new(comm, config_with(ExchangeStrategy::Pairwise, 0x7000));
            if me == 0 {
                for peer in 0..comm.size() {
                    set.send_encoder(peer).write_usize(200 + peer).unwrap();
                }
            }
            set.finished_scatters(true).unwrap();
            set.recv_decoder(0).read_usize().unwrap()
        });
        assert_eq!(results, vec![200, 201, 202]);
    }

    #[test]
    fn clear_resets_for_next_round() {
        let comm = NoComm;
        let mut set = ChannelSet::new(&comm, CommConfig::default());
        set.send_encoder(0).write_u64(1).unwrap();
        set.finished_sends(true).unwrap();
        assert_eq!(set.recv_decoder(0).read_u64().unwrap(), 1);
        set.clear();
        set.send_encoder(0).write_u64(2).unwrap();
        set.finished_sends(true).unwrap();
        assert_eq!(set.recv_decoder(0).read_u64().unwrap(), 2);
    }

    #[test]
    #[should_panic(expected = "before the exchange barrier")]
    fn reading_before_barrier_panics() {
        let comm = NoComm;
        let mut set = ChannelSet::new(&comm, CommConfig::default());
        let _ = set.recv_channel(0);
    }

    #[test]
    #[should_panic(expected = "finished_sends called twice")]
    fn double_finish_panics() {
        let comm = NoComm;
        let mut set = ChannelSet::new(&comm, CommConfig::default());
        set.finished_sends(true).unwrap();
        let _ = set.finished_sends(true);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "unconsumed bytes")]
    fn dropping_unread_data_panics_in_debug() {
        let comm = NoComm;
        let mut set = ChannelSet::new(&comm, CommConfig::default());
        set.send_encoder(0).write_u64(3).unwrap();
        set.finished_sends(true).unwrap();
        // dropped without reading or discarding
    }
}

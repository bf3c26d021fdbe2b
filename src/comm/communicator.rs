//! Thin façade over serial, intra-process (threaded) or inter-process (MPI)
//! message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees). All
//! handles are **waitable** but non-blocking — the exchange layers call
//! `.wait()` before they trust that a buffer is ready. A transport-level
//! failure is an unrecoverable infrastructure fault; backends surface it by
//! returning `None` from `wait()`, which the exchange layers escalate as
//! [`crate::error::MeshWaveError::CommFailure`].

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait + Send;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait + Send;
    /// Handle returned by `ibarrier`.
    type BarrierHandle: Poll + Send;

    /// This process's rank within the group.
    fn rank(&self) -> usize;
    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// True when more than one rank participates; collectives degrade to
    /// local no-ops otherwise.
    fn is_parallel(&self) -> bool {
        self.size() > 1
    }

    /// Initiate a send; the buffer is copied before return.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;

    /// Initiate a receive of up to `nbytes` bytes.
    fn irecv(&self, peer: usize, tag: u16, nbytes: usize) -> Self::RecvHandle;

    /// Blocking send (scheduled discipline): returns once the transport has
    /// taken responsibility for the message.
    fn send(&self, peer: usize, tag: u16, buf: &[u8]) {
        let _ = self.isend(peer, tag, buf).wait();
    }

    /// Blocking receive of up to `nbytes` bytes.
    fn recv(&self, peer: usize, tag: u16, nbytes: usize) -> Option<Vec<u8>> {
        self.irecv(peer, tag, nbytes).wait()
    }

    /// Non-destructively check for a pending message with `tag` from *any*
    /// source. Returns `(source_rank, byte_len)`. Required by the consensus
    /// exchange, where the sender set is unknown a priori.
    fn try_probe(&self, tag: u16) -> Option<(usize, usize)>;

    /// Begin a non-blocking barrier; completion is polled via
    /// [`Poll::test`]. Required by the consensus exchange termination.
    fn ibarrier(&self) -> Self::BarrierHandle;

    /// Blocking barrier over all ranks.
    fn barrier(&self) {
        let h = self.ibarrier();
        while !h.test() {
            std::thread::yield_now();
        }
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// Anything whose completion can be polled without consuming it.
pub trait Poll {
    fn test(&self) -> bool;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Poll for () {
    fn test(&self) -> bool {
        true
    }
}

/// Compile-time no-op comm for pure serial runs and unit tests.
///
/// Every collective built on top of it degrades to a local copy, which is
/// exactly the single-rank contract.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();
    type BarrierHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _nbytes: usize) {}
    fn try_probe(&self, _tag: u16) -> Option<(usize, usize)> {
        None
    }
    fn ibarrier(&self) {}
    fn barrier(&self) {}
}

// --- ThreadComm: intra-process, one simulated rank per thread ---

type Key = (usize, usize, u16); // (src, dst, tag)

/// Shared mailbox backing one [`ThreadComm`] universe.
///
/// Message queues are FIFO per `(src, dst, tag)` triple, matching the
/// within-peer-pair ordering guarantee. Barrier arrival counts are kept per
/// epoch; SPMD control flow guarantees all ranks issue barriers in the same
/// order, so epoch numbers line up across ranks.
#[derive(Debug)]
pub struct Mailbox {
    size: usize,
    queues: DashMap<Key, VecDeque<Bytes>>,
    barriers: DashMap<u64, usize>,
}

impl Mailbox {
    fn new(size: usize) -> Self {
        Self {
            size,
            queues: DashMap::new(),
            barriers: DashMap::new(),
        }
    }

    fn post(&self, key: Key, data: Bytes) {
        self.queues.entry(key).or_default().push_back(data);
    }

    fn take(&self, key: Key) -> Option<Bytes> {
        self.queues.get_mut(&key).and_then(|mut q| q.pop_front())
    }

    fn probe(&self, dst: usize, tag: u16) -> Option<(usize, usize)> {
        for entry in self.queues.iter() {
            let (src, to, t) = *entry.key();
            if to == dst && t == tag {
                if let Some(front) = entry.value().front() {
                    return Some((src, front.len()));
                }
            }
        }
        None
    }

    fn arrive(&self, epoch: u64) {
        *self.barriers.entry(epoch).or_insert(0) += 1;
    }

    fn arrived(&self, epoch: u64) -> usize {
        self.barriers.get(&epoch).map(|c| *c).unwrap_or(0)
    }
}

/// One simulated rank of an in-process universe; ranks run on threads and
/// exchange through a shared [`Mailbox`].
///
/// Sends complete eagerly (the local copy is taken immediately), so the
/// scheduled discipline never rendezvous-blocks under this backend — a
/// deliberately weaker but compatible behaviour.
#[derive(Debug)]
pub struct ThreadComm {
    rank: usize,
    mailbox: Arc<Mailbox>,
    epoch: AtomicU64,
}

impl ThreadComm {
    /// Create a universe of `size` ranks sharing one mailbox.
    pub fn universe(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "universe needs at least one rank");
        let mailbox = Arc::new(Mailbox::new(size));
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                mailbox: Arc::clone(&mailbox),
                epoch: AtomicU64::new(0),
            })
            .collect()
    }
}

/// Lazily-polling receive handle: the message is consumed at `wait()` time.
pub struct LocalRecv {
    mailbox: Arc<Mailbox>,
    key: Key,
    nbytes: usize,
}

impl Wait for LocalRecv {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(msg) = self.mailbox.take(self.key) {
                let n = msg.len().min(self.nbytes);
                return Some(msg[..n].to_vec());
            }
            std::thread::yield_now();
        }
    }
}

/// Barrier handle counting arrivals for one epoch.
pub struct LocalBarrier {
    mailbox: Arc<Mailbox>,
    epoch: u64,
}

impl Poll for LocalBarrier {
    fn test(&self) -> bool {
        self.mailbox.arrived(self.epoch) >= self.mailbox.size
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ();
    type RecvHandle = LocalRecv;
    type BarrierHandle = LocalBarrier;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.mailbox.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        self.mailbox
            .post((self.rank, peer, tag), Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, nbytes: usize) -> LocalRecv {
        LocalRecv {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            nbytes,
        }
    }

    fn try_probe(&self, tag: u16) -> Option<(usize, usize)> {
        self.mailbox.probe(self.rank, tag)
    }

    fn ibarrier(&self) -> LocalBarrier {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst);
        self.mailbox.arrive(epoch);
        LocalBarrier {
            mailbox: Arc::clone(&self.mailbox),
            epoch,
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Poll, Wait};
    use mpi::request::StaticScope;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// One MPI rank; owns the universe so finalize runs at drop.
    pub struct MpiComm {
        _universe: mpi::environment::Universe,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        pub fn new() -> Self {
            let universe = mpi::initialize().expect("MPI already initialized");
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                _universe: universe,
                world,
                rank,
                size,
            }
        }
    }

    pub struct MpiSend(mpi::request::Request<'static, Vec<u8>, StaticScope>);

    impl Wait for MpiSend {
        fn wait(self) -> Option<Vec<u8>> {
            self.0.wait();
            None
        }
    }

    pub struct MpiRecv(mpi::request::Request<'static, Vec<u8>, StaticScope>);

    impl Wait for MpiRecv {
        fn wait(self) -> Option<Vec<u8>> {
            let (data, _status) = self.0.wait_with_data();
            Some(data)
        }
    }

    pub struct MpiBarrier(std::cell::RefCell<Option<mpi::request::Request<'static, (), StaticScope>>>);

    unsafe impl Send for MpiBarrier {}

    impl Poll for MpiBarrier {
        fn test(&self) -> bool {
            let mut slot = self.0.borrow_mut();
            match slot.take() {
                None => true,
                Some(req) => match req.test() {
                    Ok(_) => true,
                    Err(req) => {
                        *slot = Some(req);
                        false
                    }
                },
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSend;
        type RecvHandle = MpiRecv;
        type BarrierHandle = MpiBarrier;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSend {
            let owned = buf.to_vec();
            MpiSend(
                self.world
                    .process_at_rank(peer as i32)
                    .immediate_send_with_tag(StaticScope, owned, tag as i32),
            )
        }

        fn irecv(&self, peer: usize, tag: u16, nbytes: usize) -> MpiRecv {
            let buffer = vec![0u8; nbytes];
            MpiRecv(
                self.world
                    .process_at_rank(peer as i32)
                    .immediate_receive_into_with_tag(StaticScope, buffer, tag as i32),
            )
        }

        fn try_probe(&self, tag: u16) -> Option<(usize, usize)> {
            self.world
                .any_process()
                .immediate_probe_with_tag(tag as i32)
                .map(|status| {
                    (
                        status.source_rank() as usize,
                        status.count(u8::equivalent_datatype()) as usize,
                    )
                })
        }

        fn ibarrier(&self) -> MpiBarrier {
            MpiBarrier(std::cell::RefCell::new(Some(
                self.world.immediate_barrier_with_scope(StaticScope),
            )))
        }

        fn barrier(&self) {
            self.world.barrier();
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

//! Sub-communicators: a communicator over a subset of a parent's ranks.
//!
//! Collectives issued on a [`SubComm`] see a dense rank space `0..n`; the
//! subgroup translates to parent ranks underneath. Handles are
//! reference-counted, so subgroups are cheap to clone and hand around.
//!
//! The non-blocking barrier of a subgroup is realized as a blocking
//! dissemination barrier at first poll: a parent-wide `ibarrier` would wait
//! on ranks outside the group. Consensus exchanges on a subgroup therefore
//! serialize their termination detection; acceptable, since subgroups are
//! typically small.

use crate::comm::communicator::{Communicator, Poll};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A communicator over `ranks` (parent rank ids) of `parent`.
pub struct SubComm<C: Communicator> {
    parent: Arc<C>,
    /// Parent rank of each subgroup rank, in subgroup order.
    ranks: Arc<Vec<usize>>,
    my_index: usize,
}

impl<C: Communicator> Clone for SubComm<C> {
    fn clone(&self) -> Self {
        Self {
            parent: Arc::clone(&self.parent),
            ranks: Arc::clone(&self.ranks),
            my_index: self.my_index,
        }
    }
}

impl<C: Communicator> SubComm<C> {
    /// Build the subgroup view for the calling rank. Returns `None` when the
    /// caller is not a member — non-members must not issue collectives on
    /// the subgroup.
    ///
    /// `ranks` must list distinct parent ranks; every member passes the same
    /// list in the same order (SPMD consistency).
    pub fn split(parent: Arc<C>, ranks: Vec<usize>) -> Option<Self> {
        let me = parent.rank();
        let my_index = ranks.iter().position(|&r| r == me)?;
        debug_assert!(
            ranks.iter().all(|&r| r < parent.size()),
            "subgroup rank out of parent range"
        );
        Some(Self {
            parent,
            ranks: Arc::new(ranks),
            my_index,
        })
    }

    /// Parent rank of a subgroup rank.
    pub fn parent_rank(&self, sub_rank: usize) -> usize {
        self.ranks[sub_rank]
    }
}

/// Barrier handle for a subgroup; completes the dissemination rounds on the
/// first poll.
pub struct SubBarrier<C: Communicator> {
    comm: SubComm<C>,
    tag: u16,
    done: AtomicBool,
}

impl<C: Communicator> Poll for SubBarrier<C> {
    fn test(&self) -> bool {
        if self.done.load(Ordering::Acquire) {
            return true;
        }
        // dissemination barrier over the subgroup
        let n = self.comm.size();
        let me = self.comm.rank();
        let mut round = 1usize;
        while round < n {
            let to = (me + round) % n;
            let from = (me + n - round % n) % n;
            self.comm.send(to, self.tag, &[1u8]);
            let _ = self.comm.recv(from, self.tag, 1);
            round <<= 1;
        }
        self.done.store(true, Ordering::Release);
        true
    }
}

/// Tag window reserved for subgroup barrier traffic.
const SUB_BARRIER_TAG: u16 = 0x3F00;

impl<C: Communicator> Communicator for SubComm<C> {
    type SendHandle = C::SendHandle;
    type RecvHandle = C::RecvHandle;
    type BarrierHandle = SubBarrier<C>;

    fn rank(&self) -> usize {
        self.my_index
    }

    fn size(&self) -> usize {
        self.ranks.len()
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        self.parent.isend(self.ranks[peer], tag, buf)
    }

    fn irecv(&self, peer: usize, tag: u16, nbytes: usize) -> Self::RecvHandle {
        self.parent.irecv(self.ranks[peer], tag, nbytes)
    }

    fn try_probe(&self, tag: u16) -> Option<(usize, usize)> {
        // only report messages from group members, translated to sub ranks
        let (src, len) = self.parent.try_probe(tag)?;
        self.ranks
            .iter()
            .position(|&r| r == src)
            .map(|sub| (sub, len))
    }

    fn ibarrier(&self) -> Self::BarrierHandle {
        SubBarrier {
            comm: self.clone(),
            tag: SUB_BARRIER_TAG,
            done: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::collectives::{all_reduce, broadcast_pod};
    use crate::comm::communicator::ThreadComm;
    use crate::comm::tag::CommTag;
    use std::thread;

    #[test]
    fn subgroup_reduce_ignores_outsiders() {
        let comms: Vec<Arc<ThreadComm>> =
            ThreadComm::universe(4).into_iter().map(Arc::new).collect();
        let results: Vec<Option<u64>> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| {
                    let comm = Arc::clone(comm);
                    s.spawn(move || {
                        // even ranks form a subgroup
                        let sub = SubComm::split(comm, vec![0, 2])?;
                        Some(
                            all_reduce(&sub, CommTag(0x900), sub.parent_rank(sub.rank()) as u64, |a, b| a + b)
                                .unwrap(),
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results, vec![Some(2), None, Some(2), None]);
    }

    #[test]
    fn subgroup_broadcast_uses_dense_ranks() {
        let comms: Vec<Arc<ThreadComm>> =
            ThreadComm::universe(3).into_iter().map(Arc::new).collect();
        let results: Vec<Option<u32>> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| {
                    let comm = Arc::clone(comm);
                    s.spawn(move || {
                        let sub = SubComm::split(comm, vec![2, 1])?;
                        // subgroup hub is parent rank 2
                        let mut v = if sub.rank() == 0 { 55u32 } else { 0 };
                        broadcast_pod(&sub, CommTag(0xA00), &mut v).unwrap();
                        Some(v)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results, vec![None, Some(55), Some(55)]);
    }
}

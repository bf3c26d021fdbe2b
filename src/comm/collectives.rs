//! Collective operations over a [`Communicator`].
//!
//! Every operation here degrades to a local no-op (or local copy) when the
//! communicator has exactly one rank, so serial and parallel runs share one
//! code path. The hub of rooted collectives is always rank 0.
//!
//! Combine operators passed to [`reduce_at_hub`]/[`all_reduce`] MUST be
//! associative; for a replicated-result guarantee they should also be
//! commutative, because combination is reordered across a binomial tree.

use crate::comm::communicator::{Communicator, Poll, Wait};
use crate::comm::config::ExchangeStrategy;
use crate::comm::tag::{CommTag, ExchangeTags};
use crate::comm::wire::{WireSize, cast_slice, cast_slice_from};
use crate::error::MeshWaveError;
use crate::stream::{ByteChannel, Decoder, Encoder, WidthPolicy, WireCodec, WireFormat};
use bytemuck::{Pod, Zeroable};
use hashbrown::HashMap;

fn pod_from_bytes<T: Pod + Zeroable>(bytes: &[u8], peer: usize) -> Result<T, MeshWaveError> {
    if bytes.len() != std::mem::size_of::<T>() {
        return Err(MeshWaveError::SizeMismatch {
            neighbor: peer,
            expected: std::mem::size_of::<T>(),
            got: bytes.len(),
        });
    }
    let mut out = T::zeroed();
    bytemuck::bytes_of_mut(&mut out).copy_from_slice(bytes);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Broadcast
// ---------------------------------------------------------------------------

/// Broadcast a fixed-layout value from rank 0 down a binomial tree.
pub fn broadcast_pod<T, C>(comm: &C, tag: CommTag, value: &mut T) -> Result<(), MeshWaveError>
where
    T: Pod + Zeroable,
    C: Communicator,
{
    if !comm.is_parallel() {
        return Ok(());
    }
    let size = comm.size();
    let rank = comm.rank();

    let mut mask = 1usize;
    while mask < size {
        if rank & mask != 0 {
            let parent = rank & !mask;
            let bytes = comm
                .recv(parent, tag.base(), std::mem::size_of::<T>())
                .ok_or_else(|| MeshWaveError::comm(parent, "broadcast receive failed"))?;
            *value = pod_from_bytes(&bytes, parent)?;
            break;
        }
        mask <<= 1;
    }
    mask >>= 1;
    while mask > 0 {
        if rank + mask < size {
            comm.send(rank + mask, tag.base(), bytemuck::bytes_of(value));
        }
        mask >>= 1;
    }
    Ok(())
}

/// Broadcast a variable-length byte block: length first, then payload.
pub fn broadcast_bytes<C>(
    comm: &C,
    tag: CommTag,
    bytes: &mut Vec<u8>,
) -> Result<(), MeshWaveError>
where
    C: Communicator,
{
    if !comm.is_parallel() {
        return Ok(());
    }
    let mut len = WireSize::new(bytes.len());
    broadcast_pod(comm, tag, &mut len)?;
    if comm.rank() != 0 {
        bytes.clear();
        bytes.resize(len.get(), 0);
    }

    let size = comm.size();
    let rank = comm.rank();
    let mut mask = 1usize;
    while mask < size {
        if rank & mask != 0 {
            let parent = rank & !mask;
            let data = comm
                .recv(parent, tag.base(), len.get())
                .ok_or_else(|| MeshWaveError::comm(parent, "broadcast receive failed"))?;
            if data.len() != len.get() {
                return Err(MeshWaveError::SizeMismatch {
                    neighbor: parent,
                    expected: len.get(),
                    got: data.len(),
                });
            }
            bytes.copy_from_slice(&data);
            break;
        }
        mask <<= 1;
    }
    mask >>= 1;
    while mask > 0 {
        if rank + mask < size {
            comm.send(rank + mask, tag.base(), bytes);
        }
        mask >>= 1;
    }
    Ok(())
}

/// Broadcast a variable-layout value by serializing on the hub and decoding
/// on every replica.
pub fn broadcast_value<T, C>(
    comm: &C,
    tag: CommTag,
    format: WireFormat,
    widths: WidthPolicy,
    value: &mut T,
) -> Result<(), MeshWaveError>
where
    T: WireCodec,
    C: Communicator,
{
    if !comm.is_parallel() {
        return Ok(());
    }
    let mut bytes = Vec::new();
    if comm.rank() == 0 {
        let mut chan = ByteChannel::new();
        let mut enc = Encoder::new(&mut chan, format, widths);
        value.encode(&mut enc)?;
        bytes = chan.into_vec();
    }
    broadcast_bytes(comm, tag, &mut bytes)?;
    if comm.rank() != 0 {
        let mut chan = ByteChannel::from_bytes(bytes);
        let mut dec = Decoder::new(&mut chan, format, widths);
        *value = T::decode(&mut dec)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Gather / scatter
// ---------------------------------------------------------------------------

/// Collect one fixed-layout value per rank at the hub, in rank order.
/// Returns `None` on non-hub ranks.
pub fn gather_pod<T, C>(comm: &C, tag: CommTag, value: T) -> Result<Option<Vec<T>>, MeshWaveError>
where
    T: Pod + Zeroable,
    C: Communicator,
{
    if !comm.is_parallel() {
        return Ok(Some(vec![value]));
    }
    if comm.rank() == 0 {
        let mut out = Vec::with_capacity(comm.size());
        out.push(value);
        for peer in 1..comm.size() {
            let bytes = comm
                .recv(peer, tag.base(), std::mem::size_of::<T>())
                .ok_or_else(|| MeshWaveError::comm(peer, "gather receive failed"))?;
            out.push(pod_from_bytes(&bytes, peer)?);
        }
        Ok(Some(out))
    } else {
        comm.send(0, tag.base(), bytemuck::bytes_of(&value));
        Ok(None)
    }
}

/// Gather at the hub, then replicate the full list everywhere.
pub fn all_gather_pod<T, C>(comm: &C, tag: CommTag, value: T) -> Result<Vec<T>, MeshWaveError>
where
    T: Pod + Zeroable,
    C: Communicator,
{
    let gathered = gather_pod(comm, tag, value)?;
    let mut bytes = gathered.map(|v| cast_slice(&v).to_vec()).unwrap_or_default();
    broadcast_bytes(comm, tag.offset(1), &mut bytes)?;
    Ok(cast_slice_from::<T>(&bytes).to_vec())
}

/// Distribute one fixed-layout value per rank from the hub. The hub passes
/// `Some(values)` with exactly one entry per rank; replicas pass `None`.
pub fn scatter_pod<T, C>(
    comm: &C,
    tag: CommTag,
    values: Option<&[T]>,
) -> Result<T, MeshWaveError>
where
    T: Pod + Zeroable,
    C: Communicator,
{
    if comm.rank() == 0 {
        let values = values.expect("scatter: hub rank must supply values");
        assert_eq!(
            values.len(),
            comm.size(),
            "scatter: hub must supply one value per rank"
        );
        for (peer, v) in values.iter().enumerate().skip(1) {
            comm.send(peer, tag.base(), bytemuck::bytes_of(v));
        }
        Ok(values[0])
    } else {
        let bytes = comm
            .recv(0, tag.base(), std::mem::size_of::<T>())
            .ok_or_else(|| MeshWaveError::comm(0, "scatter receive failed"))?;
        pod_from_bytes(&bytes, 0)
    }
}

// ---------------------------------------------------------------------------
// Reduce
// ---------------------------------------------------------------------------

/// Combine one value per rank into a single result at the hub, up a binomial
/// tree. Returns `None` on non-hub ranks (their partials are consumed).
pub fn reduce_at_hub<T, F, C>(
    comm: &C,
    tag: CommTag,
    value: T,
    op: F,
) -> Result<Option<T>, MeshWaveError>
where
    T: Pod + Zeroable,
    F: Fn(T, T) -> T,
    C: Communicator,
{
    if !comm.is_parallel() {
        return Ok(Some(value));
    }
    let size = comm.size();
    let rank = comm.rank();
    let mut acc = value;
    let mut mask = 1usize;
    while mask < size {
        if rank & mask != 0 {
            comm.send(rank & !mask, tag.base(), bytemuck::bytes_of(&acc));
            return Ok(None);
        }
        let partner = rank | mask;
        if partner < size {
            let bytes = comm
                .recv(partner, tag.base(), std::mem::size_of::<T>())
                .ok_or_else(|| MeshWaveError::comm(partner, "reduce receive failed"))?;
            acc = op(acc, pod_from_bytes(&bytes, partner)?);
        }
        mask <<= 1;
    }
    Ok(Some(acc))
}

/// Reduce at the hub, then broadcast the combined result to every rank.
pub fn all_reduce<T, F, C>(comm: &C, tag: CommTag, value: T, op: F) -> Result<T, MeshWaveError>
where
    T: Pod + Zeroable,
    F: Fn(T, T) -> T,
    C: Communicator,
{
    let mut result = reduce_at_hub(comm, tag, value, op)?.unwrap_or_else(T::zeroed);
    broadcast_pod(comm, tag.offset(1), &mut result)?;
    Ok(result)
}

/// Global sum of one value per rank.
pub fn global_sum<T, C>(comm: &C, tag: CommTag, value: T) -> Result<T, MeshWaveError>
where
    T: Pod + Zeroable + num_traits::Zero + Copy,
    C: Communicator,
{
    all_reduce(comm, tag, value, |a, b| a + b)
}

/// Global minimum of one value per rank.
pub fn global_min<T, C>(comm: &C, tag: CommTag, value: T) -> Result<T, MeshWaveError>
where
    T: Pod + Zeroable + num_traits::Bounded + PartialOrd + Copy,
    C: Communicator,
{
    all_reduce(comm, tag, value, |a, b| if b < a { b } else { a })
}

/// `u64` sum; the wave engines' sole per-sweep synchronization point.
pub fn global_sum_u64<C: Communicator>(
    comm: &C,
    tag: CommTag,
    value: u64,
) -> Result<u64, MeshWaveError> {
    global_sum(comm, tag, value)
}

/// Sum and count bundled into one record so a parallel average costs a
/// single reduction round, and the pair stays mutually consistent under
/// floating rounding.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct SumCount {
    pub sum: f64,
    pub count: u64,
}

static_assertions::assert_eq_size!(SumCount, [u8; 16]);

/// Reduce `(sum, count)` across all ranks in one round.
pub fn sum_and_count<C: Communicator>(
    comm: &C,
    tag: CommTag,
    sum: f64,
    count: u64,
) -> Result<(f64, u64), MeshWaveError> {
    let combined = all_reduce(comm, tag, SumCount { sum, count }, |a, b| SumCount {
        sum: a.sum + b.sum,
        count: a.count + b.count,
    })?;
    Ok((combined.sum, combined.count))
}

// ---------------------------------------------------------------------------
// Irregular exchange: size phase
// ---------------------------------------------------------------------------

/// Discover how many bytes this rank will receive from every other rank.
///
/// `send_sizes` holds one entry per rank of the communicator (index = peer).
/// `neighbours` optionally restricts the candidate peer set; ranks outside
/// it are assumed to exchange nothing. The four strategies produce identical
/// results for the same inputs — [`ExchangeStrategy::Consensus`] has no size
/// phase at all and must not be routed here.
pub fn exchange_sizes<C>(
    comm: &C,
    send_sizes: &[usize],
    strategy: ExchangeStrategy,
    tag: CommTag,
    neighbours: Option<&[usize]>,
) -> Result<Vec<usize>, MeshWaveError>
where
    C: Communicator,
{
    assert_eq!(
        send_sizes.len(),
        comm.size(),
        "exchange_sizes: one send size per rank required"
    );
    if !comm.is_parallel() {
        return Ok(send_sizes.to_vec());
    }
    match strategy {
        ExchangeStrategy::GatherScatter => exchange_sizes_gather_scatter(comm, send_sizes, tag),
        ExchangeStrategy::Pairwise => exchange_sizes_pairwise(comm, send_sizes, tag, neighbours),
        ExchangeStrategy::AllToAll => exchange_sizes_pairwise(comm, send_sizes, tag, None),
        ExchangeStrategy::Consensus => {
            panic!("consensus strategy discovers sizes by probing; it has no size phase")
        }
    }
}

/// Rows to the hub, transpose, rows back.
fn exchange_sizes_gather_scatter<C: Communicator>(
    comm: &C,
    send_sizes: &[usize],
    tag: CommTag,
) -> Result<Vec<usize>, MeshWaveError> {
    let size = comm.size();
    let rank = comm.rank();
    let row: Vec<WireSize> = send_sizes.iter().map(|&n| WireSize::new(n)).collect();

    if rank == 0 {
        let mut matrix: Vec<Vec<usize>> = vec![Vec::new(); size];
        matrix[0] = send_sizes.to_vec();
        for peer in 1..size {
            let bytes = comm
                .recv(peer, tag.base(), size * std::mem::size_of::<WireSize>())
                .ok_or_else(|| MeshWaveError::comm(peer, "size gather failed"))?;
            if bytes.len() != size * std::mem::size_of::<WireSize>() {
                return Err(MeshWaveError::SizeMismatch {
                    neighbor: peer,
                    expected: size * std::mem::size_of::<WireSize>(),
                    got: bytes.len(),
                });
            }
            matrix[peer] = cast_slice_from::<WireSize>(&bytes)
                .iter()
                .map(|w| w.get())
                .collect();
        }
        // transpose: what peer p receives is column p; the scatter leg flows
        // the opposite way, so the same tag cannot collide
        for peer in 1..size {
            let col: Vec<WireSize> = (0..size).map(|s| WireSize::new(matrix[s][peer])).collect();
            comm.send(peer, tag.base(), cast_slice(&col));
        }
        Ok((0..size).map(|s| matrix[s][0]).collect())
    } else {
        comm.send(0, tag.base(), cast_slice(&row));
        let bytes = comm
            .recv(0, tag.base(), size * std::mem::size_of::<WireSize>())
            .ok_or_else(|| MeshWaveError::comm(0, "size scatter failed"))?;
        Ok(cast_slice_from::<WireSize>(&bytes)
            .iter()
            .map(|w| w.get())
            .collect())
    }
}

/// Point-to-point pre-declaration: post all receives, post all sends, drain
/// everything before returning even if an error is recorded.
fn exchange_sizes_pairwise<C: Communicator>(
    comm: &C,
    send_sizes: &[usize],
    tag: CommTag,
    neighbours: Option<&[usize]>,
) -> Result<Vec<usize>, MeshWaveError> {
    let size = comm.size();
    let rank = comm.rank();
    let candidates: Vec<usize> = match neighbours {
        Some(nbrs) => nbrs.iter().copied().filter(|&r| r != rank).collect(),
        None => (0..size).filter(|&r| r != rank).collect(),
    };

    // 1) post all receives
    let mut pending_recvs = Vec::with_capacity(candidates.len());
    for &nbr in &candidates {
        pending_recvs.push((
            nbr,
            comm.irecv(nbr, tag.base(), std::mem::size_of::<WireSize>()),
        ));
    }

    // 2) post all sends, keeping the buffers alive until completion
    let mut pending_sends = Vec::with_capacity(candidates.len());
    let mut send_bufs = Vec::with_capacity(candidates.len());
    for &nbr in &candidates {
        let header = WireSize::new(send_sizes[nbr]);
        pending_sends.push(comm.isend(
            nbr,
            tag.base(),
            cast_slice(std::slice::from_ref(&header)),
        ));
        send_bufs.push(header);
    }

    // 3) wait for all receives, collecting counts (no early return)
    let mut recv_sizes = vec![0usize; size];
    recv_sizes[rank] = send_sizes[rank];
    let mut maybe_err = None;
    for (nbr, handle) in pending_recvs {
        match handle.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireSize>() => {
                if maybe_err.is_none() {
                    recv_sizes[nbr] = cast_slice_from::<WireSize>(&data)[0].get();
                }
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(MeshWaveError::SizeMismatch {
                    neighbor: nbr,
                    expected: std::mem::size_of::<WireSize>(),
                    got: data.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MeshWaveError::comm(nbr, "failed to receive size header"));
            }
            _ => {} // already have an error; just drain
        }
    }

    // 4) always drain the send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(recv_sizes),
    }
}

// ---------------------------------------------------------------------------
// Irregular exchange: data phase
// ---------------------------------------------------------------------------

/// Move one byte block per peer, sizes already known. `sends[r]` goes to
/// rank `r`; the returned vector holds what rank `r` sent us. The self slot
/// is copied locally.
pub fn exchange_bytes<C: Communicator>(
    comm: &C,
    sends: &[Vec<u8>],
    recv_sizes: &[usize],
    tag: CommTag,
) -> Result<Vec<Vec<u8>>, MeshWaveError> {
    let size = comm.size();
    let rank = comm.rank();
    assert_eq!(sends.len(), size, "exchange_bytes: one send block per rank");
    assert_eq!(recv_sizes.len(), size);

    let mut result: Vec<Vec<u8>> = vec![Vec::new(); size];
    result[rank] = sends[rank].clone();

    let mut pending_recvs = Vec::new();
    for peer in 0..size {
        if peer != rank && recv_sizes[peer] > 0 {
            pending_recvs.push((peer, comm.irecv(peer, tag.base(), recv_sizes[peer])));
        }
    }
    let mut pending_sends = Vec::new();
    for peer in 0..size {
        if peer != rank && !sends[peer].is_empty() {
            pending_sends.push(comm.isend(peer, tag.base(), &sends[peer]));
        }
    }

    let mut maybe_err = None;
    for (peer, handle) in pending_recvs {
        match handle.wait() {
            Some(data) if data.len() == recv_sizes[peer] => {
                if maybe_err.is_none() {
                    result[peer] = data;
                }
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(MeshWaveError::SizeMismatch {
                    neighbor: peer,
                    expected: recv_sizes[peer],
                    got: data.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MeshWaveError::comm(peer, "data receive failed"));
            }
            _ => {}
        }
    }
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(result),
    }
}

/// Non-blocking consensus exchange (NBX): deliver `sends` without any rank
/// knowing its sender set in advance.
///
/// Receivers probe for incoming messages with the exchange's private tag;
/// termination is detected by a non-blocking barrier entered once this
/// rank's sends have completed. Backends guarantee that a message posted
/// before its sender enters the barrier is visible to probes that run after
/// the barrier completes, so a final drain pass cannot miss data.
pub fn exchange_consensus<C: Communicator>(
    comm: &C,
    mut sends: HashMap<usize, Vec<u8>>,
    tag: CommTag,
) -> Result<HashMap<usize, Vec<u8>>, MeshWaveError> {
    let rank = comm.rank();
    let mut result = HashMap::new();
    if let Some(own) = sends.remove(&rank) {
        result.insert(rank, own);
    }
    if !comm.is_parallel() {
        return Ok(result);
    }

    let mut pending_sends = Vec::with_capacity(sends.len());
    for (&peer, data) in sends.iter() {
        debug_assert!(peer < comm.size());
        pending_sends.push(comm.isend(peer, tag.base(), data));
    }
    log::trace!(
        "rank {rank}: consensus exchange posted {} sends on tag {:#06x}",
        pending_sends.len(),
        tag.base()
    );

    // Sends must have completed before we may signal quiescence.
    for send in pending_sends {
        let _ = send.wait();
    }
    let barrier = comm.ibarrier();

    loop {
        if let Some((src, len)) = comm.try_probe(tag.base()) {
            let data = comm
                .recv(src, tag.base(), len)
                .ok_or_else(|| MeshWaveError::comm(src, "consensus receive failed"))?;
            result.insert(src, data);
            continue;
        }
        if barrier.test() {
            break;
        }
        std::thread::yield_now();
    }

    // Final drain: messages posted just before their senders reached the
    // barrier may not have been probed yet.
    while let Some((src, len)) = comm.try_probe(tag.base()) {
        let data = comm
            .recv(src, tag.base(), len)
            .ok_or_else(|| MeshWaveError::comm(src, "consensus receive failed"))?;
        result.insert(src, data);
    }
    Ok(result)
}

/// Convenience: run a full irregular exchange (size discovery + data phase,
/// or consensus) and return one received block per rank.
pub fn exchange<C: Communicator>(
    comm: &C,
    sends: &[Vec<u8>],
    strategy: ExchangeStrategy,
    tags: ExchangeTags,
    neighbours: Option<&[usize]>,
) -> Result<Vec<Vec<u8>>, MeshWaveError> {
    if strategy == ExchangeStrategy::Consensus {
        let map: HashMap<usize, Vec<u8>> = sends
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_empty())
            .map(|(r, b)| (r, b.clone()))
            .collect();
        let mut received = exchange_consensus(comm, map, tags.data)?;
        let mut out = vec![Vec::new(); comm.size()];
        for (peer, data) in received.drain() {
            out[peer] = data;
        }
        return Ok(out);
    }
    let send_sizes: Vec<usize> = sends.iter().map(|b| b.len()).collect();
    let recv_sizes = exchange_sizes(comm, &send_sizes, strategy, tags.sizes, neighbours)?;
    exchange_bytes(comm, sends, &recv_sizes, tags.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::{NoComm, ThreadComm};
    use std::thread;

    fn spmd<F>(size: usize, f: F) -> Vec<Vec<Vec<u8>>>
    where
        F: Fn(&ThreadComm) -> Vec<Vec<u8>> + Sync,
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

    #[test]
    fn broadcast_replicates_from_hub() {
        let comms = ThreadComm::universe(4);
        let got: Vec<u64> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let mut v: u64 = if comm.rank() == 0 { 99 } else { 0 };
                        broadcast_pod(comm, CommTag(0x100), &mut v).unwrap();
                        v
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(got, vec![99, 99, 99, 99]);
    }

    #[test]
    fn all_reduce_sums_over_tree() {
        for size in [1usize, 2, 3, 5, 8] {
            let comms = ThreadComm::universe(size);
            let got: Vec<u64> = thread::scope(|s| {
                let handles: Vec<_> = comms
                    .iter()
                    .map(|comm| {
                        s.spawn(move || {
                            all_reduce(comm, CommTag(0x200), comm.rank() as u64 + 1, |a, b| a + b)
                                .unwrap()
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });
            let expected = (size * (size + 1) / 2) as u64;
            assert!(got.iter().all(|&v| v == expected), "size {size}: {got:?}");
        }
    }

    #[test]
    fn gather_collects_in_rank_order() {
        let comms = ThreadComm::universe(3);
        let got: Vec<Option<Vec<u32>>> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        gather_pod(comm, CommTag(0x300), comm.rank() as u32 * 10).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(got[0], Some(vec![0, 10, 20]));
        assert_eq!(got[1], None);
        assert_eq!(got[2], None);
    }

    #[test]
    fn scatter_distributes_one_value_each() {
        let comms = ThreadComm::universe(3);
        let got: Vec<u16> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let values = [5u16, 6, 7];
                        let mine = if comm.rank() == 0 {
                            Some(&values[..])
                        } else {
                            None
                        };
                        scatter_pod(comm, CommTag(0x400), mine).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(got, vec![5, 6, 7]);
    }

    #[test]
    fn sum_and_count_bundles_one_round() {
        let comms = ThreadComm::universe(4);
        let got: Vec<(f64, u64)> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        sum_and_count(comm, CommTag(0x500), comm.rank() as f64, 1).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (sum, count) in got {
            assert_eq!(sum, 6.0);
            assert_eq!(count, 4);
        }
    }

    #[test]
    fn single_rank_collectives_are_local() {
        let comm = NoComm;
        let mut v = 3u64;
        broadcast_pod(&comm, CommTag(1), &mut v).unwrap();
        assert_eq!(v, 3);
        assert_eq!(all_reduce(&comm, CommTag(2), 5u64, |a, b| a + b).unwrap(), 5);
        assert_eq!(gather_pod(&comm, CommTag(3), 7u8).unwrap(), Some(vec![7]));
        let sizes = exchange_sizes(&comm, &[4], ExchangeStrategy::Pairwise, CommTag(4), None)
            .unwrap();
        assert_eq!(sizes, vec![4]);
    }

    fn strategy_exchange(size: usize, strategy: ExchangeStrategy) -> Vec<Vec<Vec<u8>>> {
        spmd(size, |comm| {
            // rank r sends r+1 copies of byte r to every higher rank
            let me = comm.rank();
            let sends: Vec<Vec<u8>> = (0..comm.size())
                .map(|peer| {
                    if peer > me {
                        vec![me as u8; me + 1]
                    } else {
                        Vec::new()
                    }
                })
                .collect();
            exchange(
                comm,
                &sends,
                strategy,
                ExchangeTags::from_base(CommTag(0x600)),
                None,
            )
            .unwrap()
        })
    }

    #[test]
    fn all_strategies_agree() {
        for size in [1usize, 2, 4] {
            let reference = strategy_exchange(size, ExchangeStrategy::GatherScatter);
            for strategy in [
                ExchangeStrategy::Pairwise,
                ExchangeStrategy::AllToAll,
                ExchangeStrategy::Consensus,
            ] {
                let got = strategy_exchange(size, strategy);
                assert_eq!(got, reference, "strategy {strategy:?} at size {size}");
            }
        }
    }

    #[test]
    fn consensus_handles_empty_graph() {
        let results = spmd(3, |comm| {
            let sends: Vec<Vec<u8>> = vec![Vec::new(); comm.size()];
            exchange(
                comm,
                &sends,
                ExchangeStrategy::Consensus,
                ExchangeTags::from_base(CommTag(0x700)),
                None,
            )
            .unwrap()
        });
        for per_rank in results {
            assert!(per_rank.iter().all(|b| b.is_empty()));
        }
    }
}

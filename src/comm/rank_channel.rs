//! Point-to-point channels: a byte channel bound to a peer rank, a tag, and
//! a send discipline.
//!
//! A [`RankSender`] with written data sends **exactly once** — either through
//! the explicit [`RankSender::send`] call or, failing that, at drop. A
//! non-blocking send hands back a [`PendingSend`] that must be waited on;
//! dropping one with the operation still outstanding is a dangling-operation
//! defect and panics.

use crate::comm::communicator::{Communicator, Wait};
use crate::comm::tag::CommTag;
use crate::error::MeshWaveError;
use crate::stream::{ByteChannel, Decoder, Encoder, WidthPolicy, WireFormat};

/// Send discipline for a rank channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SendMode {
    /// Rendezvous: block until the transport has delivered to the peer.
    Scheduled,
    /// Copy locally and return; wire transfer is the runtime's business.
    Buffered,
    /// Initiate and return a handle to be waited on later.
    NonBlocking,
}

/// Handle for an in-flight non-blocking send.
///
/// Must be waited on before the exchange round ends; dropping it with the
/// operation outstanding aborts, because the transport may still be reading
/// the buffer.
#[must_use = "a pending send must be waited on"]
pub struct PendingSend<H: Wait> {
    handle: Option<H>,
    peer: usize,
}

impl<H: Wait> PendingSend<H> {
    /// Block until the transport has finished with the buffer.
    pub fn wait(mut self) {
        if let Some(h) = self.handle.take() {
            let _ = h.wait();
        }
    }
}

impl<H: Wait> Drop for PendingSend<H> {
    fn drop(&mut self) {
        if self.handle.is_some() && !std::thread::panicking() {
            panic!(
                "PendingSend to rank {} dropped while the operation was still outstanding",
                self.peer
            );
        }
    }
}

/// Outgoing point-to-point channel: fill via [`encoder`](Self::encoder),
/// then [`send`](Self::send) (or let drop complete the send).
pub struct RankSender<'c, C: Communicator> {
    comm: &'c C,
    peer: usize,
    tag: CommTag,
    mode: SendMode,
    format: WireFormat,
    widths: WidthPolicy,
    channel: ByteChannel,
    sent: bool,
}

impl<'c, C: Communicator> RankSender<'c, C> {
    pub fn new(comm: &'c C, peer: usize, tag: CommTag, mode: SendMode) -> Self {
        Self::with_format(comm, peer, tag, mode, WireFormat::Binary, WidthPolicy::default())
    }

    pub fn with_format(
        comm: &'c C,
        peer: usize,
        tag: CommTag,
        mode: SendMode,
        format: WireFormat,
        widths: WidthPolicy,
    ) -> Self {
        assert!(
            peer < comm.size(),
            "RankSender: peer {} out of range for communicator of size {}",
            peer,
            comm.size()
        );
        Self {
            comm,
            peer,
            tag,
            mode,
            format,
            widths,
            channel: ByteChannel::new(),
            sent: false,
        }
    }

    pub fn peer(&self) -> usize {
        self.peer
    }

    pub fn mode(&self) -> SendMode {
        self.mode
    }

    /// Typed writer into the channel.
    pub fn encoder(&mut self) -> Encoder<'_> {
        Encoder::new(&mut self.channel, self.format, self.widths)
    }

    /// Raw access, for pre-serialized blocks.
    pub fn channel_mut(&mut self) -> &mut ByteChannel {
        &mut self.channel
    }

    /// Complete the send under this channel's discipline. Returns a handle
    /// only for [`SendMode::NonBlocking`].
    pub fn send(mut self) -> Option<PendingSend<C::SendHandle>> {
        self.sent = true;
        match self.mode {
            SendMode::Scheduled => {
                self.comm.send(self.peer, self.tag.base(), self.channel.as_slice());
                None
            }
            SendMode::Buffered => {
                // isend takes its local copy before returning; releasing the
                // handle immediately keeps buffered semantics.
                let handle = self.comm.isend(self.peer, self.tag.base(), self.channel.as_slice());
                let _ = handle.wait();
                None
            }
            SendMode::NonBlocking => Some(PendingSend {
                handle: Some(self.comm.isend(self.peer, self.tag.base(), self.channel.as_slice())),
                peer: self.peer,
            }),
        }
    }
}

impl<C: Communicator> Drop for RankSender<'_, C> {
    fn drop(&mut self) {
        // written data that was never explicitly sent goes out now, once
        if !self.sent && !self.channel.is_empty() {
            self.comm.send(self.peer, self.tag.base(), self.channel.as_slice());
        }
    }
}

/// Incoming point-to-point channel: a fully-materialized message plus a
/// typed reader over it.
pub struct RankReceiver {
    peer: usize,
    format: WireFormat,
    widths: WidthPolicy,
    channel: ByteChannel,
}

impl RankReceiver {
    /// Block until the message from `peer` with `tag` arrives.
    pub fn receive<C: Communicator>(
        comm: &C,
        peer: usize,
        tag: CommTag,
        nbytes: usize,
    ) -> Result<Self, MeshWaveError> {
        Self::receive_with_format(comm, peer, tag, nbytes, WireFormat::Binary, WidthPolicy::default())
    }

    pub fn receive_with_format<C: Communicator>(
        comm: &C,
        peer: usize,
        tag: CommTag,
        nbytes: usize,
        format: WireFormat,
        widths: WidthPolicy,
    ) -> Result<Self, MeshWaveError> {
        let data = comm
            .recv(peer, tag.base(), nbytes)
            .ok_or_else(|| MeshWaveError::comm(peer, "point-to-point receive failed"))?;
        Ok(Self {
            peer,
            format,
            widths,
            channel: ByteChannel::from_bytes(data),
        })
    }

    pub fn peer(&self) -> usize {
        self.peer
    }

    /// Typed reader over the received payload.
    pub fn decoder(&mut self) -> Decoder<'_> {
        Decoder::new(&mut self.channel, self.format, self.widths)
    }

    /// Bytes not yet consumed by the decoder.
    pub fn remaining(&self) -> usize {
        self.channel.remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::ThreadComm;

    #[test]
    fn explicit_send_and_typed_receive() {
        let comms = ThreadComm::universe(2);
        let mut tx = RankSender::new(&comms[0], 1, CommTag(0x10), SendMode::Scheduled);
        {
            let mut enc = tx.encoder();
            enc.write_u64(77).unwrap();
            enc.write_f64(2.5).unwrap();
        }
        assert!(tx.send().is_none());

        let mut rx = RankReceiver::receive(&comms[1], 0, CommTag(0x10), 16).unwrap();
        let mut dec = rx.decoder();
        assert_eq!(dec.read_u64().unwrap(), 77);
        assert_eq!(dec.read_f64().unwrap(), 2.5);
    }

    #[test]
    fn drop_completes_an_unsent_channel_exactly_once() {
        let comms = ThreadComm::universe(2);
        {
            let mut tx = RankSender::new(&comms[0], 1, CommTag(0x11), SendMode::Buffered);
            tx.encoder().write_u32(9).unwrap();
            // dropped without send()
        }
        let mut rx = RankReceiver::receive(&comms[1], 0, CommTag(0x11), 8).unwrap();
        assert_eq!(rx.decoder().read_u32().unwrap(), 9);
        // nothing further arrives
        assert_eq!(comms[1].try_probe(0x11), None);
    }

    #[test]
    fn empty_channel_drop_sends_nothing() {
        let comms = ThreadComm::universe(2);
        {
            let _tx = RankSender::new(&comms[0], 1, CommTag(0x12), SendMode::Scheduled);
        }
        assert_eq!(comms[1].try_probe(0x12), None);
    }

    #[test]
    fn non_blocking_send_completes_via_wait() {
        let comms = ThreadComm::universe(2);
        let mut tx = RankSender::new(&comms[0], 1, CommTag(0x13), SendMode::NonBlocking);
        tx.encoder().write_u8(5).unwrap();
        let pending = tx.send().expect("non-blocking mode returns a handle");
        pending.wait();
        let mut rx = RankReceiver::receive(&comms[1], 0, CommTag(0x13), 1).unwrap();
        assert_eq!(rx.decoder().read_u8().unwrap(), 5);
    }

    #[test]
    #[should_panic(expected = "still outstanding")]
    fn dropping_pending_send_panics() {
        let comms = ThreadComm::universe(2);
        let mut tx = RankSender::new(&comms[0], 1, CommTag(0x14), SendMode::NonBlocking);
        tx.encoder().write_u8(1).unwrap();
        let _pending = tx.send().unwrap();
        // _pending dropped here without wait()
    }
}

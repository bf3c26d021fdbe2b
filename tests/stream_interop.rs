//! Serialization interop across ranks: typed payloads survive point-to-point
//! channels in both wire formats, and variable-layout values replicate
//! through serialize-then-broadcast.

use mesh_wave::comm::Communicator;
use mesh_wave::comm::collectives::broadcast_value;
use mesh_wave::comm::communicator::ThreadComm;
use mesh_wave::comm::rank_channel::{RankReceiver, RankSender, SendMode};
use mesh_wave::comm::tag::CommTag;
use mesh_wave::stream::{IntWidth, WidthPolicy, WireCodec, WireFormat};
use mesh_wave::wave::payloads::MinDistance;
use std::thread;

#[test]
fn payload_round_trips_point_to_point_in_both_formats() {
    let original = MinDistance {
        origin: [0.125, -3.5, 7.0],
        dist_sq: 2.25,
    };
    for format in [WireFormat::Binary, WireFormat::Ascii] {
        let widths = WidthPolicy::default();
        let comms = ThreadComm::universe(2);
        let mut tx =
            RankSender::with_format(&comms[0], 1, CommTag(0x30), SendMode::Buffered, format, widths);
        original.encode(&mut tx.encoder()).unwrap();
        tx.send();

        // generous upper bound; the mailbox delivers the exact message
        let mut rx =
            RankReceiver::receive_with_format(&comms[1], 0, CommTag(0x30), 256, format, widths)
                .unwrap();
        let got = MinDistance::decode(&mut rx.decoder()).unwrap();
        assert_eq!(got, original, "{format:?}");
    }
}

#[test]
fn narrow_integer_width_interoperates() {
    let widths = WidthPolicy {
        ints: IntWidth::W32,
        floats: mesh_wave::stream::FloatWidth::W64,
    };
    let comms = ThreadComm::universe(2);
    let mut tx = RankSender::with_format(
        &comms[0],
        1,
        CommTag(0x31),
        SendMode::Scheduled,
        WireFormat::Binary,
        widths,
    );
    {
        let mut enc = tx.encoder();
        enc.write_usize(123456).unwrap();
        enc.write_i64(-77).unwrap();
    }
    tx.send();

    let mut rx = RankReceiver::receive_with_format(
        &comms[1],
        0,
        CommTag(0x31),
        64,
        WireFormat::Binary,
        widths,
    )
    .unwrap();
    let mut dec = rx.decoder();
    assert_eq!(dec.read_usize().unwrap(), 123456);
    assert_eq!(dec.read_i64().unwrap(), -77);
}

#[test]
fn variable_layout_broadcast_replicates() {
    let comms = ThreadComm::universe(3);
    let results: Vec<Vec<String>> = thread::scope(|s| {
        let handles: Vec<_> = comms
            .iter()
            .map(|comm| {
                s.spawn(move || {
                    let mut value: Vec<String> = if comm.rank() == 0 {
                        vec!["alpha".into(), "beta beta".into(), "γ".into()]
                    } else {
                        Vec::new()
                    };
                    broadcast_value(
                        comm,
                        CommTag(0x32),
                        WireFormat::Binary,
                        WidthPolicy::default(),
                        &mut value,
                    )
                    .unwrap();
                    value
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    for per_rank in &results {
        assert_eq!(per_rank, &results[0]);
    }
    assert_eq!(results[0].len(), 3);
}

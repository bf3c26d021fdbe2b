//! # mesh-wave
//!
//! mesh-wave is a modular Rust library for the communication and
//! information-propagation substrate of distributed-mesh PDE codes. It
//! provides byte-buffer streams with typed ASCII/binary serialization,
//! pluggable communication backends (serial, in-process threaded, MPI),
//! buffered per-rank exchange sets with four size-discovery strategies,
//! collective operations, and generic breadth-first wavefront engines over
//! the face/cell and point/edge dual graphs — consistent across processor,
//! periodic (cyclic), and non-conformal (area-weighted) boundaries.
//!
//! ## Layering
//! - [`stream`]: `ByteChannel` plus `Encoder`/`Decoder` with negotiable
//!   integer/float widths.
//! - [`comm`]: the [`Communicator`](comm::Communicator) trait and backends,
//!   point-to-point rank channels with three send disciplines, the
//!   [`ChannelSet`](comm::ChannelSet) two-phase exchange, and collectives
//!   (broadcast, gather, tree reduce, scatter, consensus/NBX exchange).
//! - [`topology`]: the mesh view the engines consume — owner/neighbour face
//!   addressing and boundary patches with coupling metadata.
//! - [`wave`]: the [`FaceCellWave`](wave::FaceCellWave) and
//!   [`PointEdgeWave`](wave::PointEdgeWave) drivers plus reference payloads.
//!
//! ## Execution model
//! SPMD: one process (or simulated rank) per mesh partition; every rank
//! issues the same collective calls in the same order. Collectives degrade
//! to local no-ops on single-rank communicators, so serial runs share the
//! parallel code path bit for bit.
//!
//! ## Determinism
//! Within one exchange round no ordering is guaranteed *between* distinct
//! peer pairs, but each pair's stream is FIFO. Cyclic and non-conformal
//! corrections apply strictly after all processor data for the round has
//! arrived.

pub mod comm;
pub mod error;
pub mod stream;
pub mod topology;
pub mod wave;

pub use error::MeshWaveError;

/// A convenient prelude importing the most-used traits and types.
pub mod prelude {
    pub use crate::comm::channel_set::ChannelSet;
    pub use crate::comm::collectives::{
        all_reduce, broadcast_pod, broadcast_value, exchange, global_sum_u64, sum_and_count,
    };
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::communicator::MpiComm;
    pub use crate::comm::communicator::{Communicator, NoComm, ThreadComm, Wait};
    pub use crate::comm::config::{CommConfig, ExchangeStrategy};
    pub use crate::comm::rank_channel::{RankReceiver, RankSender, SendMode};
    pub use crate::comm::subgroup::SubComm;
    pub use crate::comm::tag::{CommTag, ExchangeTags};
    pub use crate::error::MeshWaveError;
    pub use crate::stream::{ByteChannel, Decoder, Encoder, WireCodec, WireFormat};
    pub use crate::topology::mesh::{MeshTopology, line_mesh, line_mesh_serial};
    pub use crate::topology::patch::{AmiWeights, Patch, PatchKind};
    pub use crate::topology::transform::Transform;
    pub use crate::wave::face_cell::{FaceCellWave, WaveOptions, propagate};
    pub use crate::wave::info::{FaceCellInfo, PointEdgeInfo};
    pub use crate::wave::payloads::{MinDistance, MinHop};
    pub use crate::wave::point_edge::PointEdgeWave;
}

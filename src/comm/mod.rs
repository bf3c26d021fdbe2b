//! Process-group communication: point-to-point channels, buffered exchange
//! sets, and collective operations over a pluggable [`Communicator`].
//!
//! All ranks execute identical collective call sequences (SPMD); the only
//! permitted per-rank divergence is data values. Every collective degrades
//! to a local copy on a single-rank communicator.

pub mod channel_set;
pub mod collectives;
pub mod communicator;
pub mod config;
pub mod rank_channel;
pub mod subgroup;
pub mod tag;
pub mod wire;

pub use channel_set::ChannelSet;
pub use collectives::{
    all_gather_pod, all_reduce, broadcast_bytes, broadcast_pod, broadcast_value, exchange,
    exchange_bytes, exchange_consensus, exchange_sizes, gather_pod, global_min, global_sum,
    global_sum_u64, reduce_at_hub, scatter_pod, sum_and_count, SumCount,
};
#[cfg(feature = "mpi-support")]
pub use communicator::MpiComm;
pub use communicator::{Communicator, NoComm, Poll, ThreadComm, Wait};
pub use config::{CommConfig, ExchangeStrategy, default_config, set_default_config};
pub use rank_channel::{PendingSend, RankReceiver, RankSender, SendMode};
pub use subgroup::SubComm;
pub use tag::{CommTag, ExchangeTags, SequentialTags, TagAllocator};

//! Exchange configuration.
//!
//! The size-discovery strategy and stream format are explicit constructor
//! inputs everywhere; a process-wide default exists only for ergonomics and
//! is never the sole mechanism.

use crate::comm::tag::{CommTag, ExchangeTags};
use crate::stream::{WidthPolicy, WireFormat};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

/// How a buffered exchange discovers per-peer receive sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExchangeStrategy {
    /// Every rank gathers its size row to the hub, which transposes and
    /// scatters the receive rows back.
    GatherScatter,
    /// Every rank pre-declares sizes point-to-point to its candidate peers.
    Pairwise,
    /// One size word to every rank of the communicator.
    AllToAll,
    /// Non-blocking consensus (NBX): no size phase at all; receivers probe
    /// for messages until a barrier confirms global quiescence. Requires no
    /// prior knowledge of the communication graph.
    Consensus,
}

/// Configuration one exchange or wave carries.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CommConfig {
    pub strategy: ExchangeStrategy,
    pub format: WireFormat,
    pub widths: WidthPolicy,
    /// Base tag for the exchange's size/data pair.
    pub base_tag: u16,
}

impl CommConfig {
    pub fn tags(&self) -> ExchangeTags {
        ExchangeTags::from_base(CommTag::new(self.base_tag))
    }

    pub fn with_strategy(mut self, strategy: ExchangeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_base_tag(mut self, base_tag: u16) -> Self {
        self.base_tag = base_tag;
        self
    }

    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self
    }
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            strategy: ExchangeStrategy::Pairwise,
            format: WireFormat::Binary,
            widths: WidthPolicy::default(),
            base_tag: 0xBEE0,
        }
    }
}

static PROCESS_DEFAULT: Lazy<RwLock<CommConfig>> = Lazy::new(|| RwLock::new(CommConfig::default()));

/// The process-wide default configuration.
pub fn default_config() -> CommConfig {
    *PROCESS_DEFAULT.read()
}

/// Replace the process-wide default (returns the previous value).
pub fn set_default_config(config: CommConfig) -> CommConfig {
    std::mem::replace(&mut *PROCESS_DEFAULT.write(), config)
}

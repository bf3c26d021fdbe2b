//! MeshWaveError: unified error type for mesh-wave public APIs.
//!
//! Runtime conditions (short reads, width overflow, transport failures,
//! non-convergence) are reported through this enum. Protocol *misuse* —
//! reading an exchange buffer before its barrier, finishing a channel set
//! twice — is a programming defect and panics instead; see the
//! `comm::channel_set` docs.

use thiserror::Error;

/// Unified error type for mesh-wave operations.
#[derive(Debug, Error)]
pub enum MeshWaveError {
    /// A read consumed past the filled region of a byte channel.
    #[error("byte channel exhausted: needed {needed} bytes, {remaining} remaining")]
    ChannelExhausted { needed: usize, remaining: usize },

    /// A write exceeded the capacity of a fixed-storage byte channel.
    #[error("fixed byte channel overflow: capacity {capacity}, write needs {needed}")]
    FixedChannelOverflow { capacity: usize, needed: usize },

    /// A text-mode token failed to parse as the requested type.
    #[error("parse failure: token `{token}` is not a valid {expected}")]
    ParseFailure {
        token: String,
        expected: &'static str,
    },

    /// A text-mode read hit end-of-channel while scanning for a token.
    #[error("parse failure: channel ended while reading {expected}")]
    MissingToken { expected: &'static str },

    /// A quoted string was not terminated before end-of-channel.
    #[error("parse failure: unterminated quoted string")]
    UnterminatedString,

    /// A narrowing width conversion lost information on read.
    #[error("width conversion overflow: {value} does not fit in {target_bits} bits")]
    WidthOverflow { value: String, target_bits: u32 },

    /// Transport-level failure while talking to a peer rank.
    ///
    /// The design treats these as unrecoverable infrastructure faults;
    /// callers typically escalate rather than retry.
    #[error("communication with rank {neighbor} failed: {source}")]
    CommFailure {
        neighbor: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A peer delivered a different byte count than its size header declared.
    #[error("rank {neighbor} sent {got} bytes, size exchange declared {expected}")]
    SizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },

    /// A rank index outside `0..size` was passed to a communication routine.
    #[error("rank {rank} out of range for communicator of size {size}")]
    RankOutOfRange { rank: usize, size: usize },

    /// A face index referenced a face the topology does not have.
    #[error("face {face} out of range: mesh has {n_faces} faces")]
    FaceOutOfRange { face: usize, n_faces: usize },

    /// A cell index referenced a cell the topology does not have.
    #[error("cell {cell} out of range: mesh has {n_cells} cells")]
    CellOutOfRange { cell: usize, n_cells: usize },

    /// Owner/neighbour arrays disagree with the declared face count.
    #[error("topology error: {0}")]
    Topology(String),

    /// Patch ranges must tile the boundary region exactly once.
    #[error("patch `{patch}` covers faces {start}..{end} which {problem}")]
    PatchCoverage {
        patch: String,
        start: usize,
        end: usize,
        problem: String,
    },

    /// Cyclic and non-conformal patches must reference a partner of equal
    /// (cyclic) or declared (non-conformal) arity.
    #[error("patch `{patch}` and partner `{partner}` have mismatched sizes {size} vs {partner_size}")]
    PartnerArity {
        patch: String,
        partner: String,
        size: usize,
        partner_size: usize,
    },

    /// At most one processor patch per neighbour rank is supported.
    #[error("duplicate processor patch towards rank {rank}")]
    DuplicateProcessorPatch { rank: usize },

    /// The wave engine exhausted its iteration budget without quiescence.
    ///
    /// Indicates a connectivity or tolerance defect in the configuration,
    /// not a transient condition.
    #[error("wave did not converge within {max_iter} iterations ({changed} entities still changing)")]
    NonConvergence { max_iter: usize, changed: u64 },

    /// Seed or info array length disagrees with the mesh.
    #[error("info array holds {got} entries, mesh expects {expected} {kind}")]
    InfoArity {
        kind: &'static str,
        expected: usize,
        got: usize,
    },
}

impl MeshWaveError {
    /// Shorthand for a transport failure with a formatted description.
    pub fn comm(neighbor: usize, msg: impl Into<String>) -> Self {
        MeshWaveError::CommFailure {
            neighbor,
            source: msg.into().into(),
        }
    }
}

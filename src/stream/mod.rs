//! Byte-buffer streams and typed value serialization.
//!
//! [`ByteChannel`] is the unit every other layer serializes into: an
//! append-only, consume-once byte region with a read cursor. [`Encoder`] and
//! [`Decoder`] layer typed reads/writes on top, with a selectable
//! ASCII/binary format and negotiable integer/float byte widths so channels
//! written by a rank (or file) with a different native width can still be
//! read back.

pub mod byte_channel;
pub mod codec;

pub use byte_channel::ByteChannel;
pub use codec::{Decoder, Encoder, FloatWidth, IntWidth, WidthPolicy, WireCodec, WireFormat};

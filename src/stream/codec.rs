//! Typed value serialization into/out of a [`ByteChannel`].
//!
//! An [`Encoder`]/[`Decoder`] pair carries the channel's *format*
//! (ASCII tokens or little-endian binary) and its *width policy* — the byte
//! widths integers and floats were written with. A decoder whose caller asks
//! for a wider or narrower type than the stored width converts on the fly and
//! reports lossy narrowing as [`MeshWaveError::WidthOverflow`], so ranks and
//! files written with a different native width still interoperate.

use crate::error::MeshWaveError;
use crate::stream::byte_channel::ByteChannel;

/// Token vs. raw-byte encoding for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WireFormat {
    /// Whitespace-separated text tokens; strings quoted with backslash escapes.
    Ascii,
    /// Little-endian fixed-width binary.
    Binary,
}

/// On-wire byte width for integer values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IntWidth {
    W32,
    W64,
}

impl IntWidth {
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            IntWidth::W32 => 4,
            IntWidth::W64 => 8,
        }
    }
}

/// On-wire byte width for floating-point values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FloatWidth {
    W32,
    W64,
}

impl FloatWidth {
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            FloatWidth::W32 => 4,
            FloatWidth::W64 => 8,
        }
    }
}

/// Width metadata a channel carries with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WidthPolicy {
    pub ints: IntWidth,
    pub floats: FloatWidth,
}

impl Default for WidthPolicy {
    fn default() -> Self {
        Self {
            ints: IntWidth::W64,
            floats: FloatWidth::W64,
        }
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Typed writer over a byte channel. Never blocks; all output is buffer-local.
pub struct Encoder<'a> {
    chan: &'a mut ByteChannel,
    format: WireFormat,
    widths: WidthPolicy,
}

impl<'a> Encoder<'a> {
    pub fn new(chan: &'a mut ByteChannel, format: WireFormat, widths: WidthPolicy) -> Self {
        Self {
            chan,
            format,
            widths,
        }
    }

    /// Binary encoder with the default width policy.
    pub fn binary(chan: &'a mut ByteChannel) -> Self {
        Self::new(chan, WireFormat::Binary, WidthPolicy::default())
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    fn put_token(&mut self, token: &str) -> Result<(), MeshWaveError> {
        self.chan.write_bytes(token.as_bytes())?;
        self.chan.write_byte(b' ')
    }

    fn put_signed(&mut self, v: i64) -> Result<(), MeshWaveError> {
        match self.format {
            WireFormat::Ascii => self.put_token(&v.to_string()),
            WireFormat::Binary => match self.widths.ints {
                IntWidth::W32 => {
                    let narrow =
                        i32::try_from(v).map_err(|_| MeshWaveError::WidthOverflow {
                            value: v.to_string(),
                            target_bits: 32,
                        })?;
                    self.chan.write_bytes(&narrow.to_le_bytes())
                }
                IntWidth::W64 => self.chan.write_bytes(&v.to_le_bytes()),
            },
        }
    }

    fn put_unsigned(&mut self, v: u64) -> Result<(), MeshWaveError> {
        match self.format {
            WireFormat::Ascii => self.put_token(&v.to_string()),
            WireFormat::Binary => match self.widths.ints {
                IntWidth::W32 => {
                    let narrow =
                        u32::try_from(v).map_err(|_| MeshWaveError::WidthOverflow {
                            value: v.to_string(),
                            target_bits: 32,
                        })?;
                    self.chan.write_bytes(&narrow.to_le_bytes())
                }
                IntWidth::W64 => self.chan.write_bytes(&v.to_le_bytes()),
            },
        }
    }

    pub fn write_bool(&mut self, v: bool) -> Result<(), MeshWaveError> {
        match self.format {
            WireFormat::Ascii => self.put_token(if v { "1" } else { "0" }),
            WireFormat::Binary => self.chan.write_byte(v as u8),
        }
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), MeshWaveError> {
        match self.format {
            WireFormat::Ascii => self.put_token(&v.to_string()),
            WireFormat::Binary => self.chan.write_byte(v),
        }
    }

    pub fn write_i32(&mut self, v: i32) -> Result<(), MeshWaveError> {
        self.put_signed(v as i64)
    }

    pub fn write_i64(&mut self, v: i64) -> Result<(), MeshWaveError> {
        self.put_signed(v)
    }

    pub fn write_u32(&mut self, v: u32) -> Result<(), MeshWaveError> {
        self.put_unsigned(v as u64)
    }

    pub fn write_u64(&mut self, v: u64) -> Result<(), MeshWaveError> {
        self.put_unsigned(v)
    }

    pub fn write_usize(&mut self, v: usize) -> Result<(), MeshWaveError> {
        self.put_unsigned(v as u64)
    }

    pub fn write_f32(&mut self, v: f32) -> Result<(), MeshWaveError> {
        self.write_f64(v as f64)
    }

    pub fn write_f64(&mut self, v: f64) -> Result<(), MeshWaveError> {
        match self.format {
            WireFormat::Ascii => self.put_token(&format!("{v}")),
            WireFormat::Binary => match self.widths.floats {
                FloatWidth::W32 => self.chan.write_bytes(&(v as f32).to_le_bytes()),
                FloatWidth::W64 => self.chan.write_bytes(&v.to_le_bytes()),
            },
        }
    }

    /// Quoted in ASCII mode (`"` and `\` are escaped), length-prefixed raw
    /// bytes in binary mode.
    pub fn write_str(&mut self, s: &str) -> Result<(), MeshWaveError> {
        match self.format {
            WireFormat::Ascii => {
                self.chan.write_byte(b'"')?;
                for &b in s.as_bytes() {
                    if b == b'"' || b == b'\\' {
                        self.chan.write_byte(b'\\')?;
                    }
                    self.chan.write_byte(b)?;
                }
                self.chan.write_byte(b'"')?;
                self.chan.write_byte(b' ')
            }
            WireFormat::Binary => {
                self.put_unsigned(s.len() as u64)?;
                self.chan.write_bytes(s.as_bytes())
            }
        }
    }

    /// Opaque byte block: length prefix plus raw bytes (hex token in ASCII).
    pub fn write_blob(&mut self, data: &[u8]) -> Result<(), MeshWaveError> {
        self.put_unsigned(data.len() as u64)?;
        match self.format {
            WireFormat::Ascii => {
                let mut hex = String::with_capacity(data.len() * 2);
                for &b in data {
                    hex.push_str(&format!("{b:02x}"));
                }
                self.put_token(&hex)
            }
            WireFormat::Binary => self.chan.write_bytes(data),
        }
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Typed reader over a byte channel; the mirror of [`Encoder`].
pub struct Decoder<'a> {
    chan: &'a mut ByteChannel,
    format: WireFormat,
    widths: WidthPolicy,
}

impl<'a> Decoder<'a> {
    pub fn new(chan: &'a mut ByteChannel, format: WireFormat, widths: WidthPolicy) -> Self {
        Self {
            chan,
            format,
            widths,
        }
    }

    /// Binary decoder with the default width policy.
    pub fn binary(chan: &'a mut ByteChannel) -> Self {
        Self::new(chan, WireFormat::Binary, WidthPolicy::default())
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Bytes still unread in the underlying channel.
    pub fn remaining(&self) -> usize {
        self.chan.remaining()
    }

    /// True if another value is available. In ASCII mode this consumes any
    /// separating whitespace first.
    pub fn has_more(&mut self) -> bool {
        if self.format == WireFormat::Ascii {
            while matches!(self.chan.peek_byte(), Some(b' ' | b'\n' | b'\t' | b'\r')) {
                let _ = self.chan.read_byte();
            }
        }
        self.chan.remaining() > 0
    }

    fn next_token(&mut self, expected: &'static str) -> Result<String, MeshWaveError> {
        while matches!(self.chan.peek_byte(), Some(b' ' | b'\n' | b'\t' | b'\r')) {
            self.chan.read_byte()?;
        }
        if self.chan.remaining() == 0 {
            return Err(MeshWaveError::MissingToken { expected });
        }
        let mut token = Vec::new();
        while let Some(b) = self.chan.peek_byte() {
            if matches!(b, b' ' | b'\n' | b'\t' | b'\r') {
                break;
            }
            token.push(self.chan.read_byte()?);
        }
        String::from_utf8(token).map_err(|e| MeshWaveError::ParseFailure {
            token: format!("{:?}", e.as_bytes()),
            expected,
        })
    }

    fn take_signed(&mut self, expected: &'static str) -> Result<i64, MeshWaveError> {
        match self.format {
            WireFormat::Ascii => {
                let tok = self.next_token(expected)?;
                tok.parse::<i64>().map_err(|_| MeshWaveError::ParseFailure {
                    token: tok,
                    expected,
                })
            }
            WireFormat::Binary => match self.widths.ints {
                IntWidth::W32 => {
                    let raw = self.chan.read_bytes(4)?;
                    Ok(i32::from_le_bytes(raw.try_into().unwrap()) as i64)
                }
                IntWidth::W64 => {
                    let raw = self.chan.read_bytes(8)?;
                    Ok(i64::from_le_bytes(raw.try_into().unwrap()))
                }
            },
        }
    }

    fn take_unsigned(&mut self, expected: &'static str) -> Result<u64, MeshWaveError> {
        match self.format {
            WireFormat::Ascii => {
                let tok = self.next_token(expected)?;
                tok.parse::<u64>().map_err(|_| MeshWaveError::ParseFailure {
                    token: tok,
                    expected,
                })
            }
            WireFormat::Binary => match self.widths.ints {
                IntWidth::W32 => {
                    let raw = self.chan.read_bytes(4)?;
                    Ok(u32::from_le_bytes(raw.try_into().unwrap()) as u64)
                }
                IntWidth::W64 => {
                    let raw = self.chan.read_bytes(8)?;
                    Ok(u64::from_le_bytes(raw.try_into().unwrap()))
                }
            },
        }
    }

    pub fn read_bool(&mut self) -> Result<bool, MeshWaveError> {
        match self.format {
            WireFormat::Ascii => Ok(self.take_unsigned("bool")? != 0),
            WireFormat::Binary => Ok(self.chan.read_byte()? != 0),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, MeshWaveError> {
        match self.format {
            WireFormat::Ascii => {
                let v = self.take_unsigned("u8")?;
                u8::try_from(v).map_err(|_| MeshWaveError::WidthOverflow {
                    value: v.to_string(),
                    target_bits: 8,
                })
            }
            WireFormat::Binary => self.chan.read_byte(),
        }
    }

    pub fn read_i32(&mut self) -> Result<i32, MeshWaveError> {
        let v = self.take_signed("i32")?;
        i32::try_from(v).map_err(|_| MeshWaveError::WidthOverflow {
            value: v.to_string(),
            target_bits: 32,
        })
    }

    pub fn read_i64(&mut self) -> Result<i64, MeshWaveError> {
        self.take_signed("i64")
    }

    pub fn read_u32(&mut self) -> Result<u32, MeshWaveError> {
        let v = self.take_unsigned("u32")?;
        u32::try_from(v).map_err(|_| MeshWaveError::WidthOverflow {
            value: v.to_string(),
            target_bits: 32,
        })
    }

    pub fn read_u64(&mut self) -> Result<u64, MeshWaveError> {
        self.take_unsigned("u64")
    }

    pub fn read_usize(&mut self) -> Result<usize, MeshWaveError> {
        let v = self.take_unsigned("usize")?;
        usize::try_from(v).map_err(|_| MeshWaveError::WidthOverflow {
            value: v.to_string(),
            target_bits: usize::BITS,
        })
    }

    pub fn read_f32(&mut self) -> Result<f32, MeshWaveError> {
        Ok(self.read_f64()? as f32)
    }

    pub fn read_f64(&mut self) -> Result<f64, MeshWaveError> {
        match self.format {
            WireFormat::Ascii => {
                let tok = self.next_token("f64")?;
                tok.parse::<f64>().map_err(|_| MeshWaveError::ParseFailure {
                    token: tok,
                    expected: "f64",
                })
            }
            WireFormat::Binary => match self.widths.floats {
                FloatWidth::W32 => {
                    let raw = self.chan.read_bytes(4)?;
                    Ok(f32::from_le_bytes(raw.try_into().unwrap()) as f64)
                }
                FloatWidth::W64 => {
                    let raw = self.chan.read_bytes(8)?;
                    Ok(f64::from_le_bytes(raw.try_into().unwrap()))
                }
            },
        }
    }

    pub fn read_string(&mut self) -> Result<String, MeshWaveError> {
        match self.format {
            WireFormat::Ascii => {
                while matches!(self.chan.peek_byte(), Some(b' ' | b'\n' | b'\t' | b'\r')) {
                    self.chan.read_byte()?;
                }
                match self.chan.read_byte() {
                    Ok(b'"') => {}
                    Ok(other) => {
                        return Err(MeshWaveError::ParseFailure {
                            token: (other as char).to_string(),
                            expected: "opening quote",
                        });
                    }
                    Err(_) => return Err(MeshWaveError::MissingToken { expected: "string" }),
                }
                let mut out = Vec::new();
                loop {
                    match self.chan.read_byte() {
                        Ok(b'"') => break,
                        Ok(b'\\') => out.push(
                            self.chan
                                .read_byte()
                                .map_err(|_| MeshWaveError::UnterminatedString)?,
                        ),
                        Ok(b) => out.push(b),
                        Err(_) => return Err(MeshWaveError::UnterminatedString),
                    }
                }
                String::from_utf8(out).map_err(|e| MeshWaveError::ParseFailure {
                    token: format!("{:?}", e.as_bytes()),
                    expected: "utf-8 string",
                })
            }
            WireFormat::Binary => {
                let len = self.read_usize()?;
                let raw = self.chan.read_bytes(len)?.to_vec();
                String::from_utf8(raw).map_err(|e| MeshWaveError::ParseFailure {
                    token: format!("{:?}", e.as_bytes()),
                    expected: "utf-8 string",
                })
            }
        }
    }

    pub fn read_blob(&mut self) -> Result<Vec<u8>, MeshWaveError> {
        let len = self.read_usize()?;
        match self.format {
            WireFormat::Ascii => {
                let hex = self.next_token("hex blob")?;
                if hex.len() != len * 2 {
                    return Err(MeshWaveError::ParseFailure {
                        token: hex,
                        expected: "hex blob of declared length",
                    });
                }
                let mut out = Vec::with_capacity(len);
                for i in 0..len {
                    let pair = &hex[2 * i..2 * i + 2];
                    out.push(u8::from_str_radix(pair, 16).map_err(|_| {
                        MeshWaveError::ParseFailure {
                            token: pair.to_string(),
                            expected: "hex byte",
                        }
                    })?);
                }
                Ok(out)
            }
            WireFormat::Binary => Ok(self.chan.read_bytes(len)?.to_vec()),
        }
    }
}

// ---------------------------------------------------------------------------
// WireCodec
// ---------------------------------------------------------------------------

/// Types that know how to stream themselves through an encoder/decoder.
///
/// Payloads exchanged across processor boundaries implement this; contiguous
/// numeric types round-trip exactly in binary mode.
pub trait WireCodec: Sized {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<(), MeshWaveError>;
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, MeshWaveError>;
}

macro_rules! impl_wire_codec {
    ($($ty:ty => $wr:ident, $rd:ident;)*) => {$(
        impl WireCodec for $ty {
            fn encode(&self, enc: &mut Encoder<'_>) -> Result<(), MeshWaveError> {
                enc.$wr(*self)
            }
            fn decode(dec: &mut Decoder<'_>) -> Result<Self, MeshWaveError> {
                dec.$rd()
            }
        }
    )*};
}

impl_wire_codec! {
    bool => write_bool, read_bool;
    u8 => write_u8, read_u8;
    u32 => write_u32, read_u32;
    u64 => write_u64, read_u64;
    usize => write_usize, read_usize;
    i32 => write_i32, read_i32;
    i64 => write_i64, read_i64;
    f32 => write_f32, read_f32;
    f64 => write_f64, read_f64;
}

impl WireCodec for String {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<(), MeshWaveError> {
        enc.write_str(self)
    }
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, MeshWaveError> {
        dec.read_string()
    }
}

impl WireCodec for [f64; 3] {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<(), MeshWaveError> {
        for v in self {
            enc.write_f64(*v)?;
        }
        Ok(())
    }
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, MeshWaveError> {
        Ok([dec.read_f64()?, dec.read_f64()?, dec.read_f64()?])
    }
}

impl<T: WireCodec> WireCodec for Vec<T> {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<(), MeshWaveError> {
        enc.write_usize(self.len())?;
        for item in self {
            item.encode(enc)?;
        }
        Ok(())
    }
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, MeshWaveError> {
        let n = dec.read_usize()?;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(T::decode(dec)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: WireCodec + PartialEq + std::fmt::Debug + Clone>(
        value: T,
        format: WireFormat,
        widths: WidthPolicy,
    ) -> T {
        let mut chan = ByteChannel::new();
        {
            let mut enc = Encoder::new(&mut chan, format, widths);
            value.encode(&mut enc).unwrap();
        }
        let mut dec = Decoder::new(&mut chan, format, widths);
        T::decode(&mut dec).unwrap()
    }

    #[test]
    fn binary_round_trips_exactly() {
        let w = WidthPolicy::default();
        assert_eq!(round_trip(42u64, WireFormat::Binary, w), 42);
        assert_eq!(round_trip(-7i64, WireFormat::Binary, w), -7);
        assert_eq!(round_trip(1.5f64, WireFormat::Binary, w), 1.5);
        assert_eq!(
            round_trip(std::f64::consts::PI, WireFormat::Binary, w),
            std::f64::consts::PI
        );
        assert_eq!(
            round_trip("hi \"there\"".to_string(), WireFormat::Binary, w),
            "hi \"there\""
        );
        assert_eq!(
            round_trip(vec![1u32, 2, 3], WireFormat::Binary, w),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn ascii_round_trips() {
        let w = WidthPolicy::default();
        assert_eq!(round_trip(42u64, WireFormat::Ascii, w), 42);
        assert_eq!(round_trip(-7i64, WireFormat::Ascii, w), -7);
        // Display prints the shortest round-trip form, so floats survive text
        assert_eq!(
            round_trip(std::f64::consts::PI, WireFormat::Ascii, w),
            std::f64::consts::PI
        );
        assert_eq!(
            round_trip("a \\ b \" c".to_string(), WireFormat::Ascii, w),
            "a \\ b \" c"
        );
    }

    #[test]
    fn narrow_int_width_converts_on_read() {
        let narrow = WidthPolicy {
            ints: IntWidth::W32,
            floats: FloatWidth::W64,
        };
        let mut chan = ByteChannel::new();
        {
            let mut enc = Encoder::new(&mut chan, WireFormat::Binary, narrow);
            enc.write_u64(123).unwrap();
        }
        assert_eq!(chan.len(), 4); // stored as u32
        let mut dec = Decoder::new(&mut chan, WireFormat::Binary, narrow);
        assert_eq!(dec.read_u64().unwrap(), 123); // widened back
    }

    #[test]
    fn overflowing_narrow_write_fails() {
        let narrow = WidthPolicy {
            ints: IntWidth::W32,
            floats: FloatWidth::W64,
        };
        let mut chan = ByteChannel::new();
        let mut enc = Encoder::new(&mut chan, WireFormat::Binary, narrow);
        let err = enc.write_u64(u64::MAX).unwrap_err();
        assert!(matches!(
            err,
            MeshWaveError::WidthOverflow {
                target_bits: 32,
                ..
            }
        ));
    }

    #[test]
    fn narrow_float_width_loses_within_f32_precision() {
        let narrow = WidthPolicy {
            ints: IntWidth::W64,
            floats: FloatWidth::W32,
        };
        let mut chan = ByteChannel::new();
        {
            let mut enc = Encoder::new(&mut chan, WireFormat::Binary, narrow);
            enc.write_f64(std::f64::consts::PI).unwrap();
        }
        let mut dec = Decoder::new(&mut chan, WireFormat::Binary, narrow);
        let got = dec.read_f64().unwrap();
        assert!((got - std::f64::consts::PI).abs() < 1e-6);
    }

    #[test]
    fn blob_round_trips_both_formats() {
        for format in [WireFormat::Ascii, WireFormat::Binary] {
            let mut chan = ByteChannel::new();
            {
                let mut enc = Encoder::new(&mut chan, format, WidthPolicy::default());
                enc.write_blob(&[0x00, 0xff, 0x10, 0x7f]).unwrap();
            }
            let mut dec = Decoder::new(&mut chan, format, WidthPolicy::default());
            assert_eq!(dec.read_blob().unwrap(), vec![0x00, 0xff, 0x10, 0x7f]);
        }
    }

    #[test]
    fn truncated_binary_read_errors() {
        let mut chan = ByteChannel::from_bytes(vec![1, 2, 3]);
        let mut dec = Decoder::binary(&mut chan);
        assert!(matches!(
            dec.read_u64(),
            Err(MeshWaveError::ChannelExhausted { .. })
        ));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn i64_round_trip_all_formats(v in any::<i64>()) {
                let w = WidthPolicy::default();
                prop_assert_eq!(round_trip(v, WireFormat::Binary, w), v);
                prop_assert_eq!(round_trip(v, WireFormat::Ascii, w), v);
            }

            #[test]
            fn f64_round_trip_all_formats(v in -1.0e18f64..1.0e18) {
                let w = WidthPolicy::default();
                prop_assert_eq!(round_trip(v, WireFormat::Binary, w), v);
                prop_assert_eq!(round_trip(v, WireFormat::Ascii, w), v);
            }

            #[test]
            fn string_round_trip_ascii(s in ".*") {
                let w = WidthPolicy::default();
                prop_assert_eq!(round_trip(s.clone(), WireFormat::Ascii, w), s);
            }
        }
    }
}

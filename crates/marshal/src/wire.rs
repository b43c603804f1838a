//! The byte level of the format: version header, record tags, the
//! bounds-checked [`Reader`] cursor and the [`Writer`] buffer, the
//! variable-length integer codec, and the float token codec.
//!
//! # Integer encoding
//!
//! Small magnitudes pack into the lead byte itself: zero is a single zero
//! byte, `1..123` is `n + 5`, and `-123..0` is `256 + (n - 5)`. Anything
//! wider is a lead byte carrying the byte count (`count` for positive,
//! `256 - count` for negative) followed by up to four little-endian bytes,
//! cut short once the remaining high bytes are pure sign extension.
//!
//! # Float encoding
//!
//! A float record's payload is a length-prefixed token: the decimal text
//! rendered to 17 significant digits (`nan`, `inf`, `-inf`, and signed zero
//! as `0` / `-0` are spelled out), optionally followed by supplemental
//! mantissa bytes: 32-bit big-endian chunks of the binary fraction below
//! the top 37 mantissa bits, separated from the digits by a NUL byte and
//! trimmed of trailing zeros. The digits alone reproduce every finite
//! double bit-exactly, so decoding parses the text and skips the tail.

use crate::error::FormatError;

/// The major version of the wire format this implementation speaks.
pub const MAJOR_VERSION: u8 = 4;

/// The highest minor version this implementation accepts.
pub const MINOR_VERSION: u8 = 8;

/// Single-byte record tags of the historical format.
pub(crate) mod tag {
    pub const NIL: u8 = b'0';
    pub const TRUE: u8 = b'T';
    pub const FALSE: u8 = b'F';
    pub const FIXNUM: u8 = b'i';
    pub const BIGNUM: u8 = b'l';
    pub const FLOAT: u8 = b'f';
    pub const SYMBOL: u8 = b':';
    pub const SYMLINK: u8 = b';';
    pub const STRING: u8 = b'"';
    pub const REGEXP: u8 = b'/';
    pub const ARRAY: u8 = b'[';
    pub const HASH: u8 = b'{';
    pub const HASH_DEFAULT: u8 = b'}';
    pub const STRUCT: u8 = b'S';
    pub const OBJECT: u8 = b'o';
    pub const USER_BYTES: u8 = b'u';
    pub const USER_VALUE: u8 = b'U';
    pub const CLASS: u8 = b'c';
    pub const MODULE: u8 = b'm';
    pub const EXTENDED: u8 = b'e';
    pub const USER_CLASS: u8 = b'C';
    pub const IVARS: u8 = b'I';
    pub const LINK: u8 = b'@';
}

// =============================================================================
// Writer
// =============================================================================

/// An append-only output buffer with the format's primitive writers.
#[derive(Debug, Default)]
pub struct Writer {
    buffer: Vec<u8>,
}

impl Writer {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Consumes the writer and returns the accumulated bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> { self.buffer }

    /// Appends a single byte.
    pub fn put_u8(&mut self, byte: u8) { self.buffer.push(byte); }

    /// Appends raw bytes verbatim.
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Appends a variable-length integer.
    ///
    /// The wire range is `-2^31 ..= 2^32 - 1`; every length, count, and
    /// back-reference index the encoder produces falls inside it.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn put_long(&mut self, n: i64) {
        debug_assert!(
            n >= -(1 << 31) && n < (1 << 32),
            "long {n} outside the wire range"
        );

        if n == 0 {
            self.buffer.push(0);
        } else if n > 0 && n < 123 {
            self.buffer.push((n + 5) as u8);
        } else if n < 0 && n > -124 {
            self.buffer.push((256 + (n - 5)) as u8);
        } else {
            let mut bytes = [0u8; 4];
            let mut rest = n;
            let mut count = 0usize;

            for slot in &mut bytes {
                *slot = (rest & 0xff) as u8;
                rest >>= 8;
                count += 1;
                if rest == 0 || rest == -1 {
                    break;
                }
            }

            let lead = if n < 0 { 256 - count as i64 } else { count as i64 };
            self.buffer.push(lead as u8);
            self.buffer.extend_from_slice(&bytes[..count]);
        }
    }

    /// Appends a length-prefixed byte sequence.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is longer than the wire's length range.
    pub fn put_byte_sequence(&mut self, bytes: &[u8]) {
        let len = i64::try_from(bytes.len())
            .expect("byte sequence exceeds the wire length range");
        self.put_long(len);
        self.put_raw(bytes);
    }

    /// Appends a float payload: the length-prefixed token of `value`.
    pub fn put_float(&mut self, value: f64) {
        let token = float_token(value);
        self.put_byte_sequence(&token);
    }
}

// =============================================================================
// Reader
// =============================================================================

/// A bounds-checked cursor over an input buffer.
///
/// Every read reports truncation as a [`FormatError`] instead of panicking,
/// so an adversarial stream can never read out of bounds.
#[derive(Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    /// Creates a cursor at the start of `data`.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self { Self { data, position: 0 } }

    /// Reads a single byte.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::Truncated`] at end of input.
    pub fn get_u8(&mut self) -> Result<u8, FormatError> {
        let byte =
            *self.data.get(self.position).ok_or(FormatError::Truncated)?;
        self.position += 1;
        Ok(byte)
    }

    /// Reads exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::Truncated`] if fewer than `len` bytes remain.
    pub fn get_exact(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(FormatError::Truncated)?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Reads a variable-length integer.
    ///
    /// The result is `i64` because a hostile stream can legally express
    /// magnitudes up to `2^32 - 1`, beyond the encoder's own output range.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::Truncated`] if the stream ends mid-record.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn get_long(&mut self) -> Result<i64, FormatError> {
        let lead = i64::from(self.get_u8()?);

        if (1..5).contains(&lead) {
            let data = self.get_exact(lead as usize)?;
            let mut value = 0i64;
            for (index, byte) in data.iter().enumerate() {
                value |= i64::from(*byte) << (8 * index);
            }
            Ok(value)
        } else if lead > 251 {
            let size = 256 - lead;
            let data = self.get_exact(size as usize)?;
            let mut value = 0i64;
            for (index, byte) in data.iter().enumerate() {
                value |= i64::from(*byte) << (8 * index);
            }
            Ok(value - (1i64 << (8 * size)))
        } else if lead > 127 {
            Ok(lead - 256 + 5)
        } else if lead > 4 {
            Ok(lead - 5)
        } else {
            Ok(0)
        }
    }

    /// Reads a variable-length integer that must be a non-negative count.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::BadLength`] for negative values and
    /// [`FormatError::Truncated`] if the stream ends mid-record.
    pub fn get_count(&mut self) -> Result<usize, FormatError> {
        let value = self.get_long()?;
        usize::try_from(value).map_err(|_| FormatError::BadLength(value))
    }

    /// Reads a length-prefixed byte sequence.
    ///
    /// # Errors
    ///
    /// Returns a [`FormatError`] on a negative length or truncation.
    pub fn get_byte_sequence(&mut self) -> Result<&'a [u8], FormatError> {
        let len = self.get_count()?;
        self.get_exact(len)
    }
}

// =============================================================================
// Float token codec
// =============================================================================

/// Renders `value` as its wire token: decimal text plus the supplemental
/// mantissa tail.
#[must_use]
pub(crate) fn float_token(value: f64) -> Vec<u8> {
    if value.is_nan() {
        return b"nan".to_vec();
    }
    if value == 0.0 {
        return if value.is_sign_negative() {
            b"-0".to_vec()
        } else {
            b"0".to_vec()
        };
    }
    if value.is_infinite() {
        return if value < 0.0 {
            b"-inf".to_vec()
        } else {
            b"inf".to_vec()
        };
    }

    let mut token = format_decimal(value).into_bytes();
    token.extend_from_slice(&mantissa_tail(value));
    token
}

/// Parses a wire token back into a float.
///
/// The three specials and signed zero are matched exactly; otherwise the
/// leading decimal text is parsed and the binary tail (which always starts
/// at a byte no decimal literal contains) is ignored.
pub(crate) fn parse_float_token(token: &[u8]) -> Result<f64, FormatError> {
    match token {
        b"nan" => Ok(f64::NAN),
        b"inf" => Ok(f64::INFINITY),
        b"-inf" => Ok(f64::NEG_INFINITY),
        _ => {
            let end = token
                .iter()
                .position(|byte| {
                    !matches!(
                        byte,
                        b'0'..=b'9' | b'+' | b'-' | b'.' | b'e' | b'E'
                    )
                })
                .unwrap_or(token.len());
            let text = std::str::from_utf8(&token[..end])
                .map_err(|_| FormatError::MalformedFloat(String::new()))?;
            text.parse::<f64>()
                .map_err(|_| FormatError::MalformedFloat(text.to_owned()))
        }
    }
}

/// Renders the decimal text of a finite, nonzero float with 17 significant
/// digits: fixed notation while the decimal exponent lies in `[-4, 17)`,
/// scientific notation (sign and at least two exponent digits) otherwise,
/// trailing zeros trimmed in both.
fn format_decimal(value: f64) -> String {
    let scientific = format!("{value:.16e}");
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);

    let negative = mantissa.starts_with('-');
    let digits: String =
        mantissa.chars().filter(char::is_ascii_digit).collect();
    let digits = digits.trim_end_matches('0');
    let digits = if digits.is_empty() { "0" } else { digits };

    let mut out = String::new();
    if negative {
        out.push('-');
    }

    if !(-4..17).contains(&exponent) {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push('e');
        out.push(if exponent < 0 { '-' } else { '+' });
        let magnitude = exponent.unsigned_abs();
        if magnitude < 10 {
            out.push('0');
        }
        out.push_str(&magnitude.to_string());
    } else if exponent >= 0 {
        let int_len = usize::try_from(exponent).unwrap_or_default() + 1;
        if digits.len() <= int_len {
            out.push_str(digits);
            for _ in digits.len()..int_len {
                out.push('0');
            }
        } else {
            out.push_str(&digits[..int_len]);
            out.push('.');
            out.push_str(&digits[int_len..]);
        }
    } else {
        out.push_str("0.");
        for _ in 0..(-exponent - 1) {
            out.push('0');
        }
        out.push_str(digits);
    }

    out
}

/// Extracts the supplemental mantissa bytes of a finite, nonzero float:
/// the binary fraction below the top 37 mantissa bits, emitted as 4-byte
/// big-endian chunks behind a NUL separator, with trailing zero bytes
/// trimmed away (the separator included when the whole tail is zero).
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn mantissa_tail(value: f64) -> Vec<u8> {
    let (mantissa, _) = frexp(value.abs());
    let mut fraction = (mantissa * (1u64 << 37) as f64).fract();

    let mut out = Vec::new();
    if fraction > 0.0 {
        out.push(0);
    }
    while fraction > 0.0 {
        let scaled = fraction * 4_294_967_296.0;
        let chunk = scaled as u32;
        out.extend_from_slice(&chunk.to_be_bytes());
        fraction = scaled.fract();
    }
    while out.last() == Some(&0) {
        out.pop();
    }
    out
}

/// Splits a float into a mantissa in `[0.5, 1)` and a power-of-two
/// exponent, like the C library `frexp`.
#[allow(clippy::cast_possible_truncation)]
fn frexp(value: f64) -> (f64, i32) {
    if value == 0.0 || !value.is_finite() {
        return (value, 0);
    }

    let bits = value.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i32;

    if biased == 0 {
        // Subnormal: scale by 2^52 into the normal range first.
        let scaled = value * f64::from_bits(0x4330_0000_0000_0000);
        let (mantissa, exponent) = frexp(scaled);
        return (mantissa, exponent - 52);
    }

    let exponent = biased - 1022;
    let mantissa =
        f64::from_bits((bits & !(0x7ffu64 << 52)) | (1022u64 << 52));
    (mantissa, exponent)
}

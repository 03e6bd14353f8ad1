//! Request envelope carried by every inbound data frame.
//!
//! One WebSocket message is one request. The message body is:
//!
//! ```text
//! [u8 version] [u8 service_len] [service] [u8 method_len] [method] [payload]
//! ```
//!
//! - `version` is [`ENVELOPE_VERSION`]
//! - `service` is the fully qualified service name (`package.Service`), UTF-8
//! - `method` is the method name, UTF-8
//! - `payload` is the codec-encoded request and runs to the end of the frame
//!
//! Names are 1..=255 bytes. Replies are not enveloped; see the crate docs.

// Rust guideline compliant 2026-02

use thiserror::Error;

/// Current envelope version byte.
pub const ENVELOPE_VERSION: u8 = 0x01;

/// Longest service or method name the length byte can describe.
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Malformed or unencodable envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// Zero-length frame.
    #[error("empty frame")]
    Empty,
    /// The version byte is not one this hub understands.
    #[error("unsupported envelope version 0x{0:02x}")]
    UnsupportedVersion(u8),
    /// The frame ended inside the header.
    #[error("envelope truncated: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes the header claims.
        needed: usize,
        /// Bytes actually present.
        available: usize,
    },
    /// A service or method name has zero length.
    #[error("empty {0} name")]
    EmptyName(&'static str),
    /// A service or method name is not valid UTF-8.
    #[error("{0} name is not valid UTF-8")]
    InvalidUtf8(&'static str),
    /// A name does not fit the one-byte length prefix.
    #[error("{field} name too long: {len} bytes (max {MAX_NAME_LEN})")]
    NameTooLong {
        /// Which name overflowed.
        field: &'static str,
        /// Its length in bytes.
        len: usize,
    },
}

/// A parsed request envelope borrowing from the received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    /// Fully qualified service name.
    pub service: &'a str,
    /// Method name within the service.
    pub method: &'a str,
    /// Encoded request message.
    pub payload: &'a [u8],
}

impl<'a> Envelope<'a> {
    /// Parse an envelope from one received frame.
    ///
    /// # Errors
    ///
    /// Returns an [`EnvelopeError`] describing the first violation found.
    pub fn parse(frame: &'a [u8]) -> Result<Self, EnvelopeError> {
        let (&version, rest) = frame.split_first().ok_or(EnvelopeError::Empty)?;
        if version != ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(version));
        }
        let (service, rest) = read_name(rest, "service", frame.len())?;
        let (method, payload) = read_name(rest, "method", frame.len())?;
        Ok(Self {
            service,
            method,
            payload,
        })
    }

    /// Encode this envelope into a frame body.
    ///
    /// # Errors
    ///
    /// Returns an error if either name is empty or longer than [`MAX_NAME_LEN`].
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        encode(self.service, self.method, self.payload)
    }
}

/// Encode a request frame for `service`/`method` around `payload`.
///
/// # Errors
///
/// Returns an error if either name is empty or longer than [`MAX_NAME_LEN`].
pub fn encode(service: &str, method: &str, payload: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let service_len = name_len(service, "service")?;
    let method_len = name_len(method, "method")?;

    let mut buf = Vec::with_capacity(3 + service.len() + method.len() + payload.len());
    buf.push(ENVELOPE_VERSION);
    buf.push(service_len);
    buf.extend_from_slice(service.as_bytes());
    buf.push(method_len);
    buf.extend_from_slice(method.as_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

fn name_len(name: &str, field: &'static str) -> Result<u8, EnvelopeError> {
    if name.is_empty() {
        return Err(EnvelopeError::EmptyName(field));
    }
    u8::try_from(name.len()).map_err(|_| EnvelopeError::NameTooLong {
        field,
        len: name.len(),
    })
}

/// Read one length-prefixed name, returning it and the remaining bytes.
fn read_name<'a>(
    buf: &'a [u8],
    field: &'static str,
    frame_len: usize,
) -> Result<(&'a str, &'a [u8]), EnvelopeError> {
    let consumed = frame_len - buf.len();
    let (&len, rest) = buf.split_first().ok_or(EnvelopeError::Truncated {
        needed: consumed + 1,
        available: frame_len,
    })?;
    let len = usize::from(len);
    if len == 0 {
        return Err(EnvelopeError::EmptyName(field));
    }
    if rest.len() < len {
        return Err(EnvelopeError::Truncated {
            needed: consumed + 1 + len,
            available: frame_len,
        });
    }
    let (name, rest) = rest.split_at(len);
    let name = std::str::from_utf8(name).map_err(|_| EnvelopeError::InvalidUtf8(field))?;
    Ok((name, rest))
}

//! # interchat-codec
//!
//! Compact routing tokens for stateless interactive component callbacks.
//!
//! A chat platform hands back only a short opaque string from a prior
//! interaction. This crate packs a routing head (`prefix`, optional
//! `suffix`), positional arguments, and an optional absolute expiry into a
//! single token of at most [`MAX_TOKEN_LEN`] bytes, and recovers them
//! without any server-side session.
//!
//! ## Quick Start
//!
//! ```rust
//! use interchat_codec::RouteToken;
//!
//! let token = RouteToken::new("rules", Some("accept"))
//!     .arg("hub-42")
//!     .arg("user-7")
//!     .encode()
//!     .unwrap();
//! assert!(token.len() <= interchat_codec::MAX_TOKEN_LEN);
//!
//! let decoded = RouteToken::decode(&token).unwrap();
//! assert_eq!(decoded.prefix, "rules");
//! assert_eq!(decoded.suffix.as_deref(), Some("accept"));
//! assert_eq!(decoded.args, vec!["hub-42", "user-7"]);
//! ```
//!
//! Tokens whose literal form exceeds the length limit are transparently
//! deflate-compressed; decoding accepts both forms, so tokens minted by
//! older builds keep working.

#![deny(clippy::all)]
#![warn(missing_docs)]

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use std::io::{Read, Write};
use thiserror::Error;

/// Maximum encoded token length in bytes, dictated by the platform's
/// component identifier limit.
pub const MAX_TOKEN_LEN: usize = 100;

/// Field separator inside the literal payload. Must never appear in a
/// prefix, suffix, or argument.
const FIELD_SEP: char = '\u{1f}';

/// Separates the prefix from the suffix inside the routing head. Disallowed
/// in the prefix only; a suffix may contain further dots.
const HEAD_SEP: char = '.';

/// Marker for the literal (uncompressed) wire form.
const LITERAL_MARK: char = '0';

/// Marker for the deflate+base64 wire form.
const COMPRESSED_MARK: char = '1';

/// Errors returned by [`RouteToken::encode`] and [`RouteToken::decode`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// A prefix, suffix, or argument contains a reserved separator.
    #[error("argument contains reserved separator: {0:?}")]
    InvalidArgument(String),

    /// The encoded token exceeds [`MAX_TOKEN_LEN`] even after compression.
    #[error("encoded token is {0} bytes, limit is {MAX_TOKEN_LEN}")]
    TokenTooLong(usize),

    /// The token does not parse as either wire form.
    #[error("malformed token")]
    MalformedToken,

    /// The token carried an expiry that has passed.
    #[error("token expired")]
    ExpiredToken,
}

/// A decoded (or to-be-encoded) routing token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteToken {
    /// Routing prefix, e.g. `"rules"`. May not contain `.`.
    pub prefix: String,
    /// Optional routing suffix, e.g. `"accept"`.
    pub suffix: Option<String>,
    /// Positional arguments carried through the callback.
    pub args: Vec<String>,
    /// Absolute expiry; decoding after this instant fails `ExpiredToken`.
    pub expires_at: Option<DateTime<Utc>>,
}

impl RouteToken {
    /// Create a token with the given routing head and no arguments.
    pub fn new(prefix: impl Into<String>, suffix: Option<&str>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.map(str::to_string),
            args: Vec::new(),
            expires_at: None,
        }
    }

    /// Append a positional argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an absolute expiry instant.
    #[must_use]
    pub fn expires(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Encode into the wire form, compressing when the literal form would
    /// exceed [`MAX_TOKEN_LEN`].
    pub fn encode(&self) -> Result<String, CodecError> {
        if self.prefix.is_empty() || self.prefix.contains(FIELD_SEP) || self.prefix.contains(HEAD_SEP)
        {
            return Err(CodecError::InvalidArgument(self.prefix.clone()));
        }
        if let Some(suffix) = &self.suffix {
            if suffix.is_empty() || suffix.contains(FIELD_SEP) {
                return Err(CodecError::InvalidArgument(suffix.clone()));
            }
        }
        for arg in &self.args {
            if arg.contains(FIELD_SEP) {
                return Err(CodecError::InvalidArgument(arg.clone()));
            }
        }

        let head = match &self.suffix {
            Some(suffix) => format!("{}{}{}", self.prefix, HEAD_SEP, suffix),
            None => self.prefix.clone(),
        };
        let expiry = self
            .expires_at
            .map(|at| at.timestamp_millis().to_string())
            .unwrap_or_default();

        let mut payload = String::new();
        payload.push_str(&head);
        payload.push(FIELD_SEP);
        payload.push_str(&expiry);
        for arg in &self.args {
            payload.push(FIELD_SEP);
            payload.push_str(arg);
        }

        let literal_len = 1 + payload.len();
        if literal_len <= MAX_TOKEN_LEN {
            return Ok(format!("{LITERAL_MARK}{payload}"));
        }

        let compressed = deflate(payload.as_bytes()).map_err(|_| CodecError::MalformedToken)?;
        let encoded = format!("{COMPRESSED_MARK}{}", URL_SAFE_NO_PAD.encode(compressed));
        if encoded.len() > MAX_TOKEN_LEN {
            return Err(CodecError::TokenTooLong(encoded.len()));
        }
        Ok(encoded)
    }

    /// Decode a wire-form token, accepting both literal and compressed
    /// forms. Fails `ExpiredToken` when the carried expiry has passed.
    pub fn decode(token: &str) -> Result<Self, CodecError> {
        Self::decode_at(token, Utc::now())
    }

    /// Decode with an explicit "now", for expiry checks in tests.
    pub fn decode_at(token: &str, now: DateTime<Utc>) -> Result<Self, CodecError> {
        let mut chars = token.chars();
        let payload = match chars.next() {
            Some(LITERAL_MARK) => chars.as_str().to_string(),
            Some(COMPRESSED_MARK) => {
                let raw = URL_SAFE_NO_PAD
                    .decode(chars.as_str())
                    .map_err(|_| CodecError::MalformedToken)?;
                let bytes = inflate(&raw).map_err(|_| CodecError::MalformedToken)?;
                String::from_utf8(bytes).map_err(|_| CodecError::MalformedToken)?
            }
            _ => return Err(CodecError::MalformedToken),
        };

        let mut fields = payload.split(FIELD_SEP);
        let head = fields.next().ok_or(CodecError::MalformedToken)?;
        let expiry = fields.next().ok_or(CodecError::MalformedToken)?;
        if head.is_empty() {
            return Err(CodecError::MalformedToken);
        }

        let (prefix, suffix) = match head.split_once(HEAD_SEP) {
            Some((prefix, suffix)) => (prefix.to_string(), Some(suffix.to_string())),
            None => (head.to_string(), None),
        };
        if prefix.is_empty() || suffix.as_deref() == Some("") {
            return Err(CodecError::MalformedToken);
        }

        let expires_at = if expiry.is_empty() {
            None
        } else {
            let millis: i64 = expiry.parse().map_err(|_| CodecError::MalformedToken)?;
            Some(DateTime::from_timestamp_millis(millis).ok_or(CodecError::MalformedToken)?)
        };

        if let Some(at) = expires_at {
            if now > at {
                return Err(CodecError::ExpiredToken);
            }
        }

        Ok(Self {
            prefix,
            suffix,
            args: fields.map(str::to_string).collect(),
            expires_at,
        })
    }
}

fn deflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

fn inflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    DeflateDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample() -> RouteToken {
        RouteToken::new("report", Some("resolve"))
            .arg("call-9f3a")
            .arg("moderator-1")
    }

    #[test]
    fn round_trip_literal() {
        let token = sample().encode().unwrap();
        assert!(token.starts_with('0'));
        assert_eq!(RouteToken::decode(&token).unwrap(), sample());
    }

    #[test]
    fn round_trip_without_suffix_or_args() {
        let original = RouteToken::new("hangup", None);
        let decoded = RouteToken::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn round_trip_compressed() {
        // Repetitive payloads compress well below the limit even when the
        // literal form is far over it.
        let original = RouteToken::new("blacklist", Some("confirm"))
            .arg("a".repeat(60))
            .arg("a".repeat(60));
        let token = original.encode().unwrap();
        assert!(token.starts_with('1'));
        assert!(token.len() <= MAX_TOKEN_LEN);
        assert_eq!(RouteToken::decode(&token).unwrap(), original);
    }

    #[test]
    fn encode_is_deterministic() {
        assert_eq!(sample().encode().unwrap(), sample().encode().unwrap());
    }

    #[test]
    fn rejects_separator_in_argument() {
        let err = RouteToken::new("rules", None)
            .arg(format!("bad{FIELD_SEP}arg"))
            .encode()
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_dot_in_prefix() {
        let err = RouteToken::new("a.b", None).encode().unwrap_err();
        assert!(matches!(err, CodecError::InvalidArgument(_)));
    }

    #[test]
    fn oversize_fails_before_emit() {
        // High-entropy arguments defeat compression.
        let noise: String = (0..200).map(|i| ((i * 37 + 11) % 94 + 33) as u8 as char).collect();
        let err = RouteToken::new("x", None).arg(noise).encode().unwrap_err();
        assert!(matches!(err, CodecError::TokenTooLong(_)));
    }

    #[test]
    fn expiry_round_trips_and_enforces() {
        let at = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap()
            + Duration::minutes(5);
        let token = sample().expires(at).encode().unwrap();

        let decoded = RouteToken::decode_at(&token, at - Duration::seconds(1)).unwrap();
        assert_eq!(decoded.expires_at, Some(at));

        let err = RouteToken::decode_at(&token, at + Duration::seconds(1)).unwrap_err();
        assert_eq!(err, CodecError::ExpiredToken);
    }

    #[test]
    fn malformed_tokens_rejected() {
        for bad in ["", "zzz", "0", "1!!!not-base64", "1AAAA"] {
            assert_eq!(
                RouteToken::decode(bad).unwrap_err(),
                CodecError::MalformedToken,
                "token {bad:?} should be malformed"
            );
        }
    }

    #[test]
    fn literal_form_still_accepted_alongside_compressed() {
        // A short token never compresses; a long one always does. Both must
        // decode through the same entry point.
        let short = RouteToken::new("call", Some("skip")).arg("c1").encode().unwrap();
        let long = RouteToken::new("call", Some("skip"))
            .arg("c".repeat(90))
            .encode()
            .unwrap();
        assert!(short.starts_with('0'));
        assert!(long.starts_with('1'));
        assert!(RouteToken::decode(&short).is_ok());
        assert!(RouteToken::decode(&long).is_ok());
    }
}

//! Rate-limit metadata carried by forge responses
//!
//! Every response carries the primary quota for the authenticated account in
//! `X-RateLimit-*` headers. Failed responses additionally may carry
//! `Retry-After` (secondary rate limits). Both are parsed here into plain
//! values so the account layer never touches HTTP types.

use reqwest::header::HeaderMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Maximum number of characters of an error body handed to the error hook.
pub const MAX_ERROR_BODY_CHARS: usize = 256;

const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";
const RETRY_AFTER: &str = "retry-after";

/// Last observed primary quota for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub remaining: u64,
    pub limit: u64,
    pub reset_at: SystemTime,
}

impl QuotaSnapshot {
    /// Parse the `X-RateLimit-*` triple. Returns `None` unless all three are
    /// present and numeric (some endpoints omit them).
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        Some(Self {
            remaining: header_u64(headers, RATE_LIMIT_REMAINING)?,
            limit: header_u64(headers, RATE_LIMIT_LIMIT)?,
            reset_at: epoch_secs(header_u64(headers, RATE_LIMIT_RESET)?),
        })
    }
}

/// A failed response, reduced to what the error hook needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub status: u16,
    /// Body truncated to `MAX_ERROR_BODY_CHARS` characters
    pub body: String,
    /// `X-RateLimit-Reset`, epoch seconds
    pub rate_limit_reset: Option<u64>,
    /// `X-RateLimit-Remaining`
    pub rate_limit_remaining: Option<u64>,
    /// `Retry-After`, seconds
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            body: truncate_body(body),
            rate_limit_reset: None,
            rate_limit_remaining: None,
            retry_after: None,
        }
    }

    pub fn from_parts(status: u16, headers: &HeaderMap, body: &str) -> Self {
        Self {
            rate_limit_reset: header_u64(headers, RATE_LIMIT_RESET),
            rate_limit_remaining: header_u64(headers, RATE_LIMIT_REMAINING),
            retry_after: header_u64(headers, RETRY_AFTER),
            ..Self::new(status, body)
        }
    }

    /// When the account may be used again: the reset epoch if present, else
    /// now + `Retry-After`, else now + `default_wait`.
    pub fn reset_instant(&self, now: SystemTime, default_wait: Duration) -> SystemTime {
        if let Some(epoch) = self.rate_limit_reset {
            return epoch_secs(epoch);
        }
        if let Some(secs) = self.retry_after {
            return now + Duration::from_secs(secs);
        }
        now + default_wait
    }
}

/// Truncate a response body to `MAX_ERROR_BODY_CHARS` characters.
///
/// Counts characters, not bytes, so multi-byte text never splits mid-char.
pub fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((idx, _)) => body[..idx].to_string(),
        None => body.to_string(),
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn epoch_secs(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

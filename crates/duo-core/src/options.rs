//! Option value rules shared by the trust cache and the remote challenge
//!
//! Every numeric option is read with `atoi` semantics and then clamped into
//! range. Out-of-range values are never errors; they are pulled back to the
//! nearest legal value.

use serde::Serialize;

/// Maximum number of second-factor prompts per login
pub const MAX_PROMPTS: u32 = 3;

/// Longest trusted-origin window, in minutes
pub const MAX_TRUST_EXPIRE_MINUTES: u32 = 60;

/// Maximum number of configured group pattern entries
pub const MAX_GROUPS: usize = 256;

/// Remote request timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Timeout {
    /// Wait forever
    #[default]
    Unlimited,
    /// Give up after this many milliseconds
    Millis(u64),
}

/// Parse a boolean option. Only `yes`, `true`, `on` and `1` are true, and
/// the comparison is case-sensitive.
pub fn parse_boolean(value: &str) -> bool {
    matches!(value, "yes" | "true" | "on" | "1")
}

/// Parse an integer the way `atoi` does: skip leading whitespace, take an
/// optional sign and the longest run of digits. Anything unparsable is 0.
pub fn parse_int(value: &str) -> i64 {
    let s = value.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut n: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        n = n.saturating_mul(10).saturating_add(i64::from(b - b'0'));
    }

    if negative {
        -n
    } else {
        n
    }
}

/// Resolve the prompt limit. The limit only ever tightens relative to
/// `current`; a non-positive value pins it to a single prompt.
pub fn clamp_prompts(current: u32, value: i64) -> u32 {
    if value <= 0 {
        1
    } else if value < i64::from(current) {
        value as u32
    } else {
        current
    }
}

/// Resolve a timeout given in seconds
pub fn resolve_timeout(seconds: i64) -> Timeout {
    if seconds <= 0 {
        Timeout::Unlimited
    } else {
        Timeout::Millis((seconds as u64).saturating_mul(1000))
    }
}

/// Resolve the trusted-origin window in minutes. Zero disables the cache.
pub fn clamp_trust_expire(minutes: i64) -> u32 {
    if minutes <= 0 {
        0
    } else if minutes > i64::from(MAX_TRUST_EXPIRE_MINUTES) {
        MAX_TRUST_EXPIRE_MINUTES
    } else {
        minutes as u32
    }
}

//! Site channel lists.
//!
//! Two input forms are accepted:
//!
//! - Plain text: MHz values separated by commas, whitespace or newlines. A
//!   trailing `c` marks a control channel (`851.0125c`). `#` starts a comment.
//! - JSON: an array of `{"frequency_hz": ..., "role": "control" | "voice"}`.

use thiserror::Error;
use trunkplan_common::models::Channel;
use trunkplan_common::HZ_PER_MHZ;

#[derive(Debug, Error)]
pub enum ChannelParseError {
    #[error("line {line}: `{token}` is not a frequency in MHz")]
    InvalidToken { line: usize, token: String },
    #[error("invalid channel JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse either form, picking JSON when the input starts with `[`.
pub fn parse_channel_list(input: &str) -> Result<Vec<Channel>, ChannelParseError> {
    if input.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(input)?);
    }
    let mut channels = Vec::new();
    for (n, raw) in input.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default();
        for token in line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            channels.push(parse_token(token).ok_or_else(|| ChannelParseError::InvalidToken {
                line: n + 1,
                token: token.to_string(),
            })?);
        }
    }
    Ok(channels)
}

fn parse_token(token: &str) -> Option<Channel> {
    let (value, control) = match token.strip_suffix(['c', 'C']) {
        Some(v) => (v, true),
        None => (token, false),
    };
    let mhz: f64 = value.parse().ok()?;
    if !mhz.is_finite() || mhz <= 0.0 {
        return None;
    }
    let hz = (mhz * HZ_PER_MHZ).round() as u64;
    Some(if control {
        Channel::control(hz)
    } else {
        Channel::voice(hz)
    })
}

/// Render channels back into the plain-text form.
pub fn format_channel_list(channels: &[Channel]) -> String {
    channels
        .iter()
        .map(|c| {
            let mhz = format!("{:.6}", c.frequency_hz as f64 / HZ_PER_MHZ);
            let mhz = mhz.trim_end_matches('0').trim_end_matches('.');
            if c.is_control() {
                format!("{mhz}c")
            } else {
                mhz.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

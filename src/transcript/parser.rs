//! Transcript parser.
//!
//! Extraction delivers the on-screen chat as a single raw string whose shape
//! depends on which recognition path the device agent took. Parsing runs an
//! ordered list of layout grammars and the first one that covers every
//! non-blank line wins:
//!
//! 1. bracket-tagged bubbles: `[left|green] 你好` / `[right] 好的`
//! 2. role-prefixed lines: `对方: 你好` / `我: 好的` (`them:` / `me:` also)
//! 3. bare lines: every non-blank line is one bubble with no side signal

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Screen position of the avatar next to a bubble. Primary sender signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvatarSide {
    Left,
    Right,
    None,
}

/// One raw extracted chat-transcript unit, before sender resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Bubble {
    pub text: String,
    pub avatar_side: AvatarSide,
    pub bubble_color: Option<String>,
    /// Which extraction attempt produced this bubble.
    pub source_attempt: u32,
}

static BRACKET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(left|right|none)(?:\|([^\]]+))?\]\s*(.+)$").expect("bracket regex"));

static ROLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(对方|我|them|me)\s*[:：]\s*(.+)$").expect("role regex"));

/// Parse a raw transcript into ordered bubbles.
///
/// Returns an empty list only for blank input; the bare-line fallback accepts
/// anything else.
pub fn parse_transcript(raw: &str, source_attempt: u32) -> Vec<Bubble> {
    let lines: Vec<&str> = raw.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.is_empty() {
        return Vec::new();
    }

    if let Some(bubbles) = parse_bracket_layout(&lines, source_attempt) {
        return bubbles;
    }
    if let Some(bubbles) = parse_role_layout(&lines, source_attempt) {
        return bubbles;
    }
    parse_bare_layout(&lines, source_attempt)
}

/// Layout 1. Every line must match `[side|color] text` or `[side] text`.
fn parse_bracket_layout(lines: &[&str], source_attempt: u32) -> Option<Vec<Bubble>> {
    let mut bubbles = Vec::with_capacity(lines.len());
    for line in lines {
        let caps = BRACKET_RE.captures(line)?;
        let avatar_side = match caps.get(1).map(|m| m.as_str()) {
            Some("left") => AvatarSide::Left,
            Some("right") => AvatarSide::Right,
            _ => AvatarSide::None,
        };
        bubbles.push(Bubble {
            text: caps.get(3).map(|m| m.as_str().trim().to_string())?,
            avatar_side,
            bubble_color: caps.get(2).map(|m| m.as_str().trim().to_string()),
            source_attempt,
        });
    }
    Some(bubbles)
}

/// Layout 2. Every line must carry a role prefix; the role implies the side.
fn parse_role_layout(lines: &[&str], source_attempt: u32) -> Option<Vec<Bubble>> {
    let mut bubbles = Vec::with_capacity(lines.len());
    for line in lines {
        let caps = ROLE_RE.captures(line)?;
        let avatar_side = match caps.get(1).map(|m| m.as_str()) {
            Some("我") | Some("me") => AvatarSide::Right,
            _ => AvatarSide::Left,
        };
        bubbles.push(Bubble {
            text: caps.get(2).map(|m| m.as_str().trim().to_string())?,
            avatar_side,
            bubble_color: None,
            source_attempt,
        });
    }
    Some(bubbles)
}

/// Layout 3. Last resort: one bubble per non-blank line, no side signal.
fn parse_bare_layout(lines: &[&str], source_attempt: u32) -> Vec<Bubble> {
    lines
        .iter()
        .map(|line| Bubble {
            text: line.to_string(),
            avatar_side: AvatarSide::None,
            bubble_color: None,
            source_attempt,
        })
        .collect()
}

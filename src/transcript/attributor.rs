//! Sender attribution and cross-round de-duplication.
//!
//! Avatar side is the primary signal: left means the contact, right means
//! our own account. Bubble color is consulted only when the side is missing.
//! A bubble whose normalized text is a near-exact match of a recently
//! resolved message for the same (app, target) is dropped so a message
//! answered in an earlier polling round is never answered twice.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::parser::{AvatarSide, Bubble};

/// Resolved author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Mine,
    Theirs,
    Unknown,
}

/// A bubble after sender resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub sender: Sender,
    pub extracted_at: DateTime<Utc>,
}

/// Outcome of one polling round. Never persisted.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub success: bool,
    pub messages: Vec<Message>,
    pub attempts_used: u32,
}

/// How many recent resolved messages the dedup check looks back over.
pub const DEDUP_WINDOW: usize = 20;

/// Similarity at or above this counts as a re-extraction of the same message.
pub const DEDUP_THRESHOLD: f64 = 0.9;

/// Sender resolution plus similarity dedup. Pure; holds only policy knobs.
#[derive(Debug, Clone)]
pub struct Attributor {
    /// Bubble colors rendered for our own account (used only when the
    /// avatar side is missing).
    own_colors: Vec<String>,
    dedup_window: usize,
    dedup_threshold: f64,
}

impl Default for Attributor {
    fn default() -> Self {
        Self {
            own_colors: vec!["green".to_string(), "blue".to_string()],
            dedup_window: DEDUP_WINDOW,
            dedup_threshold: DEDUP_THRESHOLD,
        }
    }
}

impl Attributor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the own-bubble color set.
    pub fn with_own_colors(mut self, colors: Vec<String>) -> Self {
        self.own_colors = colors;
        self
    }

    /// Override the dedup window and threshold.
    pub fn with_dedup(mut self, window: usize, threshold: f64) -> Self {
        self.dedup_window = window;
        self.dedup_threshold = threshold;
        self
    }

    /// Resolve the sender of one bubble.
    pub fn resolve_sender(&self, bubble: &Bubble) -> Sender {
        match bubble.avatar_side {
            AvatarSide::Left => Sender::Theirs,
            AvatarSide::Right => Sender::Mine,
            AvatarSide::None => match &bubble.bubble_color {
                Some(color) if self.own_colors.iter().any(|c| c == color) => Sender::Mine,
                Some(_) => Sender::Theirs,
                None => Sender::Unknown,
            },
        }
    }

    /// Resolve a parsed bubble list into the newly-introduced messages,
    /// dropping bubbles already represented in `last_seen`.
    ///
    /// Ordering follows the transcript; the result is empty when every
    /// bubble is a re-extraction.
    pub fn resolve_new(&self, bubbles: &[Bubble], last_seen: &[Message]) -> Vec<Message> {
        let window_start = last_seen.len().saturating_sub(self.dedup_window);
        let recent = &last_seen[window_start..];

        let now = Utc::now();
        bubbles
            .iter()
            .filter(|bubble| !self.is_duplicate(&bubble.text, recent))
            .map(|bubble| Message {
                text: bubble.text.clone(),
                sender: self.resolve_sender(bubble),
                extracted_at: now,
            })
            .collect()
    }

    fn is_duplicate(&self, text: &str, recent: &[Message]) -> bool {
        let normalized = normalize(text);
        recent
            .iter()
            .any(|m| similarity(&normalized, &normalize(&m.text)) >= self.dedup_threshold)
    }
}

/// Normalize text for comparison: lowercase, punctuation and whitespace gone.
fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Character-set Jaccard similarity over normalized text.
fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a_set: HashSet<char> = a.chars().collect();
    let b_set: HashSet<char> = b.chars().collect();
    let intersection = a_set.intersection(&b_set).count() as f64;
    let union = a_set.union(&b_set).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bubble(text: &str, side: AvatarSide, color: Option<&str>) -> Bubble {
        Bubble {
            text: text.to_string(),
            avatar_side: side,
            bubble_color: color.map(str::to_string),
            source_attempt: 1,
        }
    }

    fn message(text: &str) -> Message {
        Message {
            text: text.to_string(),
            sender: Sender::Theirs,
            extracted_at: Utc::now(),
        }
    }

    #[test]
    fn test_avatar_side_beats_color() {
        let attr = Attributor::new();
        // Own-account color on a left bubble must not flip the sender.
        let b = bubble("在吗", AvatarSide::Left, Some("green"));
        assert_eq!(attr.resolve_sender(&b), Sender::Theirs);

        let b = bubble("在的", AvatarSide::Right, Some("white"));
        assert_eq!(attr.resolve_sender(&b), Sender::Mine);
    }

    #[test]
    fn test_color_disambiguates_missing_side() {
        let attr = Attributor::new();
        let b = bubble("好的", AvatarSide::None, Some("green"));
        assert_eq!(attr.resolve_sender(&b), Sender::Mine);

        let b = bubble("好的", AvatarSide::None, Some("white"));
        assert_eq!(attr.resolve_sender(&b), Sender::Theirs);

        let b = bubble("好的", AvatarSide::None, None);
        assert_eq!(attr.resolve_sender(&b), Sender::Unknown);
    }

    #[test]
    fn test_second_round_yields_nothing() {
        let attr = Attributor::new();
        let bubbles = vec![bubble("晚上一起吃饭吗？", AvatarSide::Left, None)];

        let first = attr.resolve_new(&bubbles, &[]);
        assert_eq!(first.len(), 1);

        let second = attr.resolve_new(&bubbles, &first);
        assert!(second.is_empty());
    }

    #[test]
    fn test_near_exact_match_dropped() {
        let attr = Attributor::new();
        let seen = vec![message("晚上一起吃饭吗？")];
        // Same text modulo punctuation and whitespace.
        let bubbles = vec![bubble("晚上一起吃饭吗 ", AvatarSide::Left, None)];
        assert!(attr.resolve_new(&bubbles, &seen).is_empty());
    }

    #[test]
    fn test_genuinely_new_message_kept() {
        let attr = Attributor::new();
        let seen = vec![message("晚上一起吃饭吗？")];
        let bubbles = vec![
            bubble("晚上一起吃饭吗？", AvatarSide::Left, None),
            bubble("明天的会议改到十点了", AvatarSide::Left, None),
        ];
        let fresh = attr.resolve_new(&bubbles, &seen);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].text, "明天的会议改到十点了");
    }

    #[test]
    fn test_dedup_window_bounds_lookback() {
        let attr = Attributor::new().with_dedup(2, 0.9);
        let seen: Vec<Message> = ["一条", "两条", "三条旧消息"].iter().map(|t| message(t)).collect();
        // "一条" fell out of the 2-message window, so it counts as new again.
        let bubbles = vec![bubble("一条", AvatarSide::Left, None)];
        assert_eq!(attr.resolve_new(&bubbles, &seen).len(), 1);
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", ""), 0.0);
        assert!(similarity("abcd", "abce") > 0.5);
    }
}

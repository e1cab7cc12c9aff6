//! Native notification targeting.
//!
//! OS notifications carry only a title and a body, so the conversation they
//! belong to is inferred from the open-conversation list. A match is only
//! reported when a single candidate clearly wins; anything else is ambiguous
//! and the host shows a notification without a click target.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NativeNotification {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationCandidate {
    /// Unique per thread.
    pub href: String,
    #[serde(default)]
    pub title: String,
    /// Latest message preview as rendered in the conversation list.
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub unread: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AmbiguityReason {
    NoCandidates,
    BelowConfidenceFloor,
    Tied,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum NotificationMatch {
    Matched { href: String, muted: bool },
    Ambiguous { reason: AmbiguityReason },
}

impl NotificationMatch {
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, NotificationMatch::Ambiguous { .. })
    }

    pub fn matched_href(&self) -> Option<&str> {
        match self {
            NotificationMatch::Matched { href, .. } => Some(href),
            NotificationMatch::Ambiguous { .. } => None,
        }
    }
}

/// Points awarded for an exact (normalized) title match.
pub const SCORE_TITLE_EXACT: u32 = 60;
/// Points awarded when one title mentions the other, e.g. a group title that
/// lists the sender, or a body prefixed with the candidate's name.
pub const SCORE_TITLE_MENTION: u32 = 35;
pub const SCORE_BODY_MATCH: u32 = 40;
pub const SCORE_UNREAD: u32 = 5;

const MIN_PREVIEW_CHARS: usize = 8;
const MIN_PREVIEW_WORDS: usize = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MatchThresholds {
    /// Minimum score for a candidate to be considered at all.
    pub confidence_floor: u32,
    /// Candidates within this many points of the leader tie with it.
    pub tie_margin: u32,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            confidence_floor: 50,
            tie_margin: 30,
        }
    }
}

impl MatchThresholds {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.tie_margin > self.confidence_floor {
            return Err(CoreError::TieMarginTooWide {
                tie_margin: self.tie_margin,
                confidence_floor: self.confidence_floor,
            });
        }
        Ok(())
    }
}

pub fn resolve_native_notification_target(
    notification: &NativeNotification,
    candidates: &[ConversationCandidate],
) -> NotificationMatch {
    resolve_with_thresholds(notification, candidates, &MatchThresholds::default())
}

pub fn resolve_with_thresholds(
    notification: &NativeNotification,
    candidates: &[ConversationCandidate],
    thresholds: &MatchThresholds,
) -> NotificationMatch {
    if candidates.is_empty() {
        return NotificationMatch::Ambiguous {
            reason: AmbiguityReason::NoCandidates,
        };
    }

    let title = normalize(&notification.title);
    let body = normalize(&notification.body);
    let scored: Vec<(u32, &ConversationCandidate)> = candidates
        .iter()
        .map(|candidate| (score_candidate(&title, &body, candidate), candidate))
        .collect();

    let best = scored.iter().map(|(score, _)| *score).max().unwrap_or(0);
    if best < thresholds.confidence_floor {
        debug!(best, "no candidate reached the confidence floor");
        return NotificationMatch::Ambiguous {
            reason: AmbiguityReason::BelowConfidenceFloor,
        };
    }

    let mut contenders = scored.iter().filter(|(score, _)| {
        *score >= thresholds.confidence_floor && best - *score <= thresholds.tie_margin
    });
    let Some((_, winner)) = contenders.next() else {
        return NotificationMatch::Ambiguous {
            reason: AmbiguityReason::BelowConfidenceFloor,
        };
    };
    if contenders.next().is_some() {
        debug!(best, "notification matches several conversations");
        return NotificationMatch::Ambiguous {
            reason: AmbiguityReason::Tied,
        };
    }

    NotificationMatch::Matched {
        href: winner.href.clone(),
        muted: winner.muted,
    }
}

fn score_candidate(title: &str, body: &str, candidate: &ConversationCandidate) -> u32 {
    let candidate_title = normalize(&candidate.title);
    let candidate_body = normalize(&candidate.body);
    let mut score = 0;

    if !title.is_empty() && title == candidate_title {
        score += SCORE_TITLE_EXACT;
    } else if mentions(&candidate_title, title)
        || mentions(title, &candidate_title)
        || body_names_sender(body, &candidate_title)
    {
        score += SCORE_TITLE_MENTION;
    }

    if !body.is_empty()
        && !candidate_body.is_empty()
        && (candidate_body.contains(body) || preview_quoted_in_body(body, &candidate_body))
    {
        score += SCORE_BODY_MATCH;
    }

    if candidate.unread {
        score += SCORE_UNREAD;
    }
    score
}

/// Whether `haystack` contains `needle` as a whole word run.
fn mentions(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() || haystack.len() <= needle.len() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        before.is_none_or(|c| !c.is_alphanumeric()) && after.is_none_or(|c| !c.is_alphanumeric())
    })
}

/// The conversation list truncates long messages, so the preview may be a
/// fragment of the notification body. Short previews ("ok", "lol") show up in
/// unrelated bodies and are ignored.
fn preview_quoted_in_body(body: &str, preview: &str) -> bool {
    let long_enough = preview.chars().count() >= MIN_PREVIEW_CHARS
        || preview.split(' ').count() >= MIN_PREVIEW_WORDS;
    long_enough && mentions(body, preview)
}

/// Group notifications are commonly rendered as `"Sender: message"`.
fn body_names_sender(body: &str, candidate_title: &str) -> bool {
    !candidate_title.is_empty()
        && body
            .split_once(':')
            .is_some_and(|(sender, _)| sender.trim() == candidate_title)
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| !matches!(*c, '\u{200b}' | '\u{200e}' | '\u{200f}' | '\u{feff}'))
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Suppresses repeat notifications for the same target within a TTL.
///
/// Entries are never evicted; they simply stop suppressing once stale.
#[derive(Debug, Clone)]
pub struct NotificationDeduper {
    ttl_ms: u64,
    last_shown: HashMap<String, u64>,
}

impl NotificationDeduper {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            last_shown: HashMap::new(),
        }
    }

    /// Returns `true` when `key` was shown less than `ttl_ms` ago. Otherwise
    /// records `now_ms` as the new show time and returns `false`.
    pub fn should_suppress(&mut self, key: &str, now_ms: u64) -> bool {
        if let Some(last) = self.last_shown.get(key)
            && now_ms.saturating_sub(*last) < self.ttl_ms
        {
            return true;
        }

        self.last_shown.insert(key.to_owned(), now_ms);
        false
    }
}

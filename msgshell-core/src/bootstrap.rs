//! Bootstrap tracking for popups opened at `about:blank`.
//!
//! Call flows open a blank popup and then redirect it a few times before it
//! lands on a call URL. While a popup is inside its bootstrap window each hop is
//! checked here instead of being classified on its own. Thread hops are only
//! let through once the popup has already proven it belongs to a call.

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::{
    BOOTSTRAP_WINDOW_MS, MAX_NAVIGATIONS, WindowOpenAction, classify::is_thread_url,
    is_messaging_host, path_segments,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootstrapLimits {
    pub window_ms: u64,
    pub max_navigations: u32,
}

impl Default for BootstrapLimits {
    fn default() -> Self {
        Self {
            window_ms: BOOTSTRAP_WINDOW_MS,
            max_navigations: MAX_NAVIGATIONS,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AllowedBy {
    CallSafe,
    TrustedIntermediate,
    PostCallThreadHop,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DenyReason {
    HopBudgetExhausted,
    WindowElapsed,
    /// `now` is earlier than the session start.
    ClockWentBackwards,
    /// A thread hop arrived before any call-safe hop.
    ColdThreadHop,
    UntrustedHop,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "decision", rename_all = "kebab-case")]
pub enum BootstrapDecision {
    Allowed { by: AllowedBy },
    Denied { reason: DenyReason },
}

impl BootstrapDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, BootstrapDecision::Allowed { .. })
    }

    pub fn allowed_by(&self) -> Option<AllowedBy> {
        match self {
            BootstrapDecision::Allowed { by } => Some(*by),
            BootstrapDecision::Denied { .. } => None,
        }
    }
}

struct HopContext<'a> {
    url: &'a str,
    action: WindowOpenAction,
    /// Thread URL on a messaging host; media viewers share the reroute action.
    is_thread: bool,
    had_call_safe_hop: bool,
}

struct BootstrapRule {
    allowed_by: AllowedBy,
    matches: fn(&HopContext<'_>) -> bool,
}

const BOOTSTRAP_RULES: &[BootstrapRule] = &[
    BootstrapRule {
        allowed_by: AllowedBy::CallSafe,
        matches: hop_is_call_safe,
    },
    BootstrapRule {
        allowed_by: AllowedBy::TrustedIntermediate,
        matches: hop_is_trusted_intermediate,
    },
    BootstrapRule {
        allowed_by: AllowedBy::PostCallThreadHop,
        matches: hop_is_post_call_thread,
    },
];

fn hop_is_call_safe(hop: &HopContext<'_>) -> bool {
    hop.action == WindowOpenAction::AllowChildWindow
}

fn hop_is_trusted_intermediate(hop: &HopContext<'_>) -> bool {
    is_trusted_intermediate(hop.url)
}

fn hop_is_post_call_thread(hop: &HopContext<'_>) -> bool {
    hop.action == WindowOpenAction::RerouteMainView && hop.is_thread && hop.had_call_safe_hop
}

/// Bridge pages the call flow passes through on the messaging hosts, as
/// leading path segments.
const TRUSTED_BRIDGE_PREFIXES: &[&[&str]] = &[
    &["rtc", "bootstrap"],
    &["rtc", "landing"],
    &["ajax", "rtc"],
];

/// Whether `url` is a known transient step of a call bootstrap redirect chain.
pub fn is_trusted_intermediate(url: &str) -> bool {
    let trimmed = url.trim();
    if trimmed.eq_ignore_ascii_case("about:blank") {
        return true;
    }
    let Ok(parsed) = Url::parse(trimmed) else {
        return false;
    };
    if parsed.scheme() != "https" {
        return false;
    }
    if !parsed.host_str().is_some_and(is_messaging_host) {
        return false;
    }
    let segments = path_segments(parsed.path());
    TRUSTED_BRIDGE_PREFIXES.iter().any(|prefix| {
        segments.len() >= prefix.len()
            && segments.iter().zip(prefix.iter()).all(|(s, p)| s == p)
    })
}

/// Decides whether hop `hop_index` of a bootstrap session may proceed.
///
/// `action` is the classifier's verdict for `url`. The session state is owned
/// by the caller; this function only reads it.
pub fn should_allow_about_blank_child_bootstrap_navigation(
    url: &str,
    action: WindowOpenAction,
    session_started_at_ms: u64,
    hop_index: u32,
    had_call_safe_hop: bool,
    now_ms: u64,
    limits: &BootstrapLimits,
) -> BootstrapDecision {
    if hop_index >= limits.max_navigations {
        return BootstrapDecision::Denied {
            reason: DenyReason::HopBudgetExhausted,
        };
    }
    let Some(elapsed) = now_ms.checked_sub(session_started_at_ms) else {
        return BootstrapDecision::Denied {
            reason: DenyReason::ClockWentBackwards,
        };
    };
    if elapsed >= limits.window_ms {
        return BootstrapDecision::Denied {
            reason: DenyReason::WindowElapsed,
        };
    }

    let hop = HopContext {
        url,
        action,
        is_thread: Url::parse(url.trim()).is_ok_and(|parsed| is_thread_url(&parsed)),
        had_call_safe_hop,
    };
    if let Some(rule) = BOOTSTRAP_RULES.iter().find(|rule| (rule.matches)(&hop)) {
        return BootstrapDecision::Allowed {
            by: rule.allowed_by,
        };
    }

    let reason = if hop.is_thread && !had_call_safe_hop {
        DenyReason::ColdThreadHop
    } else {
        DenyReason::UntrustedHop
    };
    BootstrapDecision::Denied { reason }
}

/// Per-popup bootstrap state. Owned by whoever owns the popup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapSession {
    started_at_ms: u64,
    hop_count: u32,
    had_call_safe_hop: bool,
}

impl BootstrapSession {
    pub fn start(now_ms: u64) -> Self {
        Self {
            started_at_ms: now_ms,
            hop_count: 0,
            had_call_safe_hop: false,
        }
    }

    pub fn hop_count(&self) -> u32 {
        self.hop_count
    }

    pub fn had_call_safe_hop(&self) -> bool {
        self.had_call_safe_hop
    }

    pub fn evaluate(
        &self,
        url: &str,
        action: WindowOpenAction,
        now_ms: u64,
        limits: &BootstrapLimits,
    ) -> BootstrapDecision {
        should_allow_about_blank_child_bootstrap_navigation(
            url,
            action,
            self.started_at_ms,
            self.hop_count,
            self.had_call_safe_hop,
            now_ms,
            limits,
        )
    }

    /// Evaluates the hop and records it. The hop counter is capped at the
    /// navigation budget.
    pub fn advance(
        &mut self,
        url: &str,
        action: WindowOpenAction,
        now_ms: u64,
        limits: &BootstrapLimits,
    ) -> BootstrapDecision {
        let decision = self.evaluate(url, action, now_ms, limits);
        debug!(
            hop = self.hop_count,
            %action,
            ?decision,
            "bootstrap hop evaluated"
        );

        self.hop_count = self
            .hop_count
            .saturating_add(1)
            .min(limits.max_navigations);
        if decision.allowed_by() == Some(AllowedBy::CallSafe) {
            self.had_call_safe_hop = true;
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decide_window_open_action;

    const CALL_URL: &str = "https://www.messenger.com/groupcall/ROOM:555/?call_id=1";
    const THREAD_URL: &str = "https://www.messenger.com/t/100012345";
    const BRIDGE_URL: &str = "https://www.messenger.com/rtc/bootstrap/?room=555";

    fn decide(url: &str, hop_index: u32, had_call_safe_hop: bool, now_ms: u64) -> BootstrapDecision {
        should_allow_about_blank_child_bootstrap_navigation(
            url,
            decide_window_open_action(url),
            1_000,
            hop_index,
            had_call_safe_hop,
            now_ms,
            &BootstrapLimits::default(),
        )
    }

    #[test]
    fn call_safe_hop_is_allowed() {
        assert_eq!(
            decide(CALL_URL, 0, false, 1_000).allowed_by(),
            Some(AllowedBy::CallSafe)
        );
    }

    #[test]
    fn hop_beyond_budget_is_denied_even_if_call_safe() {
        assert_eq!(
            decide(CALL_URL, MAX_NAVIGATIONS, true, 1_000),
            BootstrapDecision::Denied {
                reason: DenyReason::HopBudgetExhausted
            }
        );
    }

    #[test]
    fn hop_past_window_is_denied_even_at_hop_zero() {
        assert_eq!(
            decide(CALL_URL, 0, false, 1_000 + BOOTSTRAP_WINDOW_MS),
            BootstrapDecision::Denied {
                reason: DenyReason::WindowElapsed
            }
        );
        assert!(decide(CALL_URL, 0, false, 1_000 + BOOTSTRAP_WINDOW_MS - 1).is_allowed());
    }

    #[test]
    fn clock_going_backwards_fails_closed() {
        assert_eq!(
            decide(CALL_URL, 0, false, 999),
            BootstrapDecision::Denied {
                reason: DenyReason::ClockWentBackwards
            }
        );
    }

    #[test]
    fn thread_hop_requires_prior_call_safe_hop() {
        assert_eq!(
            decide(THREAD_URL, 1, false, 2_000),
            BootstrapDecision::Denied {
                reason: DenyReason::ColdThreadHop
            }
        );
        assert_eq!(
            decide(THREAD_URL, 1, true, 2_000).allowed_by(),
            Some(AllowedBy::PostCallThreadHop)
        );
    }

    #[test]
    fn media_viewer_after_a_call_is_not_a_thread_hop() {
        let media = "https://www.messenger.com/photo/?fbid=1";
        assert_eq!(decide_window_open_action(media), WindowOpenAction::RerouteMainView);
        for had_call_safe_hop in [false, true] {
            assert_eq!(
                decide(media, 1, had_call_safe_hop, 2_000),
                BootstrapDecision::Denied {
                    reason: DenyReason::UntrustedHop
                }
            );
        }
    }

    #[test]
    fn trusted_intermediate_is_allowed_regardless_of_prior_state() {
        for had_call_safe_hop in [false, true] {
            assert_eq!(
                decide(BRIDGE_URL, 2, had_call_safe_hop, 3_000).allowed_by(),
                Some(AllowedBy::TrustedIntermediate)
            );
        }
        assert_eq!(
            decide("about:blank", 0, false, 1_000).allowed_by(),
            Some(AllowedBy::TrustedIntermediate)
        );
    }

    #[test]
    fn external_and_unparseable_hops_are_denied() {
        for url in ["https://evil.example/phish", "%%%", "https://www.messenger.com/settings"] {
            assert_eq!(
                decide(url, 1, true, 2_000),
                BootstrapDecision::Denied {
                    reason: DenyReason::UntrustedHop
                },
                "{url}"
            );
        }
    }

    #[test]
    fn bridge_lookalikes_are_not_trusted() {
        assert!(!is_trusted_intermediate("https://evil.example/rtc/bootstrap"));
        assert!(!is_trusted_intermediate("http://www.messenger.com/rtc/bootstrap"));
        assert!(!is_trusted_intermediate("https://www.messenger.com/rtc/bootstrapper"));
        assert!(!is_trusted_intermediate("https://www.messenger.com/rtc"));
    }

    #[test]
    fn decisions_serialize_as_tagged_objects() {
        let allowed = serde_json::to_value(BootstrapDecision::Allowed {
            by: AllowedBy::TrustedIntermediate,
        })
        .unwrap();
        assert_eq!(
            allowed,
            serde_json::json!({"decision": "allowed", "by": "trusted-intermediate"})
        );
        let denied = serde_json::to_value(BootstrapDecision::Denied {
            reason: DenyReason::ColdThreadHop,
        })
        .unwrap();
        assert_eq!(
            denied,
            serde_json::json!({"decision": "denied", "reason": "cold-thread-hop"})
        );
    }

    #[test]
    fn session_walks_the_call_bootstrap_chain() {
        let limits = BootstrapLimits::default();
        let mut session = BootstrapSession::start(10_000);
        let hops = [
            (BRIDGE_URL, AllowedBy::TrustedIntermediate),
            (CALL_URL, AllowedBy::CallSafe),
            (THREAD_URL, AllowedBy::PostCallThreadHop),
            (CALL_URL, AllowedBy::CallSafe),
        ];
        for (i, (url, expected)) in hops.into_iter().enumerate() {
            let now = 10_000 + (i as u64) * 500;
            let decision = session.advance(url, decide_window_open_action(url), now, &limits);
            assert_eq!(decision.allowed_by(), Some(expected), "hop {i}: {url}");
        }
        assert_eq!(session.hop_count(), 4);
        assert!(session.had_call_safe_hop());
    }

    #[test]
    fn cold_session_cannot_smuggle_a_thread_hop() {
        let limits = BootstrapLimits::default();
        let mut session = BootstrapSession::start(0);
        let decision = session.advance(THREAD_URL, WindowOpenAction::RerouteMainView, 10, &limits);
        assert!(!decision.is_allowed());
        assert!(!session.had_call_safe_hop());
    }

    #[test]
    fn hop_count_never_exceeds_budget() {
        let limits = BootstrapLimits {
            window_ms: 60_000,
            max_navigations: 2,
        };
        let mut session = BootstrapSession::start(0);
        for now in 0..10 {
            let _ = session.advance(CALL_URL, WindowOpenAction::AllowChildWindow, now, &limits);
        }
        assert_eq!(session.hop_count(), 2);
        assert_eq!(
            session.evaluate(CALL_URL, WindowOpenAction::AllowChildWindow, 10, &limits),
            BootstrapDecision::Denied {
                reason: DenyReason::HopBudgetExhausted
            }
        );
    }
}

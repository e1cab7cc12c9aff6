//! Navigation, notification and viewport policy for the Messenger desktop shell.
//!
//! Every decision here is synchronous and side-effect free except for the two
//! small owned state holders ([`bootstrap::BootstrapSession`] and
//! [`notify::NotificationDeduper`]). Hosts feed in URLs, notification payloads
//! and DOM flags, and apply the returned decisions themselves.

pub mod bootstrap;
pub mod classify;
pub mod notify;
pub mod viewport;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use bootstrap::{
    AllowedBy, BootstrapDecision, BootstrapLimits, BootstrapSession, DenyReason,
    should_allow_about_blank_child_bootstrap_navigation,
};
pub use classify::{
    Classification, WindowOpenAction, classify_window_open, decide_window_open_action,
    external_open_target,
};
pub use notify::{
    AmbiguityReason, ConversationCandidate, MatchThresholds, NativeNotification,
    NotificationDeduper, NotificationMatch, resolve_native_notification_target,
    resolve_with_thresholds,
};
pub use viewport::{
    ViewportInput, ViewportMode, ViewportState, resolve_viewport_mode, should_apply_messages_crop,
};

/// How long an `about:blank` popup may keep navigating under bootstrap rules.
pub const BOOTSTRAP_WINDOW_MS: u64 = 15_000;
/// Hops an `about:blank` popup may make before bootstrap rules stop applying.
pub const MAX_NAVIGATIONS: u32 = 6;
pub const DEFAULT_DEDUP_TTL_MS: u64 = 4_000;

pub const PRIMARY_HOSTS: &[&str] = &["messenger.com", "www.messenger.com"];
pub const ALIAS_HOSTS: &[&str] = &["facebook.com", "www.facebook.com", "web.facebook.com"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("bootstrap window must be greater than zero")]
    ZeroBootstrapWindow,
    #[error("navigation budget must be greater than zero")]
    ZeroNavigationBudget,
    #[error("notification dedup ttl must be greater than zero")]
    ZeroDedupTtl,
    #[error("tie margin {tie_margin} must not exceed confidence floor {confidence_floor}")]
    TieMarginTooWide {
        tie_margin: u32,
        confidence_floor: u32,
    },
}

/// Host-tunable knobs. The bootstrap pair is the security boundary for popup
/// escape prevention, so it is configurable rather than hidden.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyTunables {
    pub bootstrap_window_ms: u64,
    pub max_navigations: u32,
    pub dedup_ttl_ms: u64,
}

impl Default for PolicyTunables {
    fn default() -> Self {
        Self {
            bootstrap_window_ms: BOOTSTRAP_WINDOW_MS,
            max_navigations: MAX_NAVIGATIONS,
            dedup_ttl_ms: DEFAULT_DEDUP_TTL_MS,
        }
    }
}

impl PolicyTunables {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.bootstrap_window_ms == 0 {
            return Err(CoreError::ZeroBootstrapWindow);
        }
        if self.max_navigations == 0 {
            return Err(CoreError::ZeroNavigationBudget);
        }
        if self.dedup_ttl_ms == 0 {
            return Err(CoreError::ZeroDedupTtl);
        }
        Ok(())
    }

    pub fn bootstrap_limits(&self) -> BootstrapLimits {
        BootstrapLimits {
            window_ms: self.bootstrap_window_ms,
            max_navigations: self.max_navigations,
        }
    }
}

pub(crate) fn is_primary_host(host: &str) -> bool {
    PRIMARY_HOSTS.iter().any(|h| host.eq_ignore_ascii_case(h))
}

pub(crate) fn is_alias_host(host: &str) -> bool {
    ALIAS_HOSTS.iter().any(|h| host.eq_ignore_ascii_case(h))
}

pub(crate) fn is_messaging_host(host: &str) -> bool {
    is_primary_host(host) || is_alias_host(host)
}

/// Lowercased, non-empty path segments.
pub(crate) fn path_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

//! Host-side glue: owns per-popup bootstrap sessions and the notification
//! deduper, and turns policy verdicts into concrete routing outcomes.

use std::collections::HashMap;

use msgshell_core::{
    AllowedBy, AmbiguityReason, BootstrapDecision, BootstrapLimits, BootstrapSession,
    ConversationCandidate, MatchThresholds, NativeNotification, NotificationDeduper,
    NotificationMatch, ViewportInput, ViewportState, WindowOpenAction, classify_window_open,
    external_open_target, resolve_with_thresholds,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::settings::SavedSettings;

pub type PopupId = String;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "route", rename_all = "kebab-case")]
pub enum NavigationOutcome {
    /// Spawn the child window (window open) or keep it on the new URL (popup
    /// navigation).
    ChildWindow { allowed_by: Option<AllowedBy> },
    RerouteMainView { url: String },
    DownloadMedia { url: String },
    /// Hand `url` to the OS browser. Link-shim wrappers are already removed.
    OpenExternal { url: String },
    /// Not safe to hand to the OS at all.
    Block { url: String },
}

impl NavigationOutcome {
    pub fn keeps_popup(&self) -> bool {
        matches!(self, NavigationOutcome::ChildWindow { .. })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "display", rename_all = "kebab-case")]
pub enum NotificationOutcome {
    /// Show and wire the click handler to `href`. Muted threads show silently.
    Show { href: String, silent: bool },
    /// Show without a click target.
    ShowGeneric { reason: AmbiguityReason },
    Suppressed { href: String },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ClassToggle {
    pub class: &'static str,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ViewportUpdate {
    pub mode: msgshell_core::ViewportMode,
    pub crop_enabled: bool,
    pub classes: Vec<ClassToggle>,
}

impl From<ViewportState> for ViewportUpdate {
    fn from(state: ViewportState) -> Self {
        Self {
            mode: state.mode(),
            crop_enabled: state.crop_enabled(),
            classes: state
                .class_toggles()
                .into_iter()
                .map(|(class, enabled)| ClassToggle { class, enabled })
                .collect(),
        }
    }
}

/// One line of a replay stream.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    WindowOpen {
        popup: PopupId,
        url: String,
        #[serde(default)]
        at_ms: Option<u64>,
    },
    PopupNavigation {
        popup: PopupId,
        url: String,
        #[serde(default)]
        at_ms: Option<u64>,
    },
    PopupClosed {
        popup: PopupId,
    },
    Notification {
        notification: NativeNotification,
        #[serde(default)]
        candidates: Vec<ConversationCandidate>,
        #[serde(default)]
        at_ms: Option<u64>,
    },
    Viewport {
        url_path: String,
        #[serde(default)]
        media_overlay_visible: bool,
    },
}

impl HostEvent {
    /// The event's own timestamp, if it carries one.
    pub fn at_ms(&self) -> Option<u64> {
        match self {
            HostEvent::WindowOpen { at_ms, .. }
            | HostEvent::PopupNavigation { at_ms, .. }
            | HostEvent::Notification { at_ms, .. } => *at_ms,
            HostEvent::PopupClosed { .. } | HostEvent::Viewport { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostDecision {
    Navigation {
        popup: PopupId,
        outcome: NavigationOutcome,
    },
    PopupClosed {
        popup: PopupId,
        had_session: bool,
    },
    Notification {
        outcome: NotificationOutcome,
    },
    Viewport {
        update: ViewportUpdate,
    },
}

/// Single-threaded policy host. Handlers must be called in event order; the
/// host is `Send` but not meant to be shared without external locking.
#[derive(Debug)]
pub struct PolicyHost {
    limits: BootstrapLimits,
    thresholds: MatchThresholds,
    sessions: HashMap<PopupId, BootstrapSession>,
    deduper: NotificationDeduper,
}

impl Default for PolicyHost {
    fn default() -> Self {
        Self::new(&SavedSettings::default())
    }
}

impl PolicyHost {
    pub fn new(settings: &SavedSettings) -> Self {
        Self {
            limits: settings.tunables.bootstrap_limits(),
            thresholds: settings.thresholds,
            sessions: HashMap::new(),
            deduper: NotificationDeduper::new(settings.tunables.dedup_ttl_ms),
        }
    }

    pub fn session(&self, popup: &str) -> Option<&BootstrapSession> {
        self.sessions.get(popup)
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn on_window_open(&mut self, popup: &str, url: &str, now_ms: u64) -> NavigationOutcome {
        if is_blank(url) {
            self.sessions
                .insert(popup.to_owned(), BootstrapSession::start(now_ms));
            info!(popup, "about:blank popup opened, bootstrap session started");
            return NavigationOutcome::ChildWindow { allowed_by: None };
        }

        let classification = classify_window_open(url);
        debug!(popup, url, rule = ?classification.rule, action = %classification.action, "window open classified");
        route_for(classification.action, url)
    }

    pub fn on_popup_navigation(&mut self, popup: &str, url: &str, now_ms: u64) -> NavigationOutcome {
        let action = classify_window_open(url).action;
        let Some(session) = self.sessions.get_mut(popup) else {
            return route_for(action, url);
        };

        match session.advance(url, action, now_ms, &self.limits) {
            BootstrapDecision::Allowed { by } => {
                info!(popup, url, allowed_by = ?by, hop = session.hop_count(), "bootstrap hop allowed");
                NavigationOutcome::ChildWindow {
                    allowed_by: Some(by),
                }
            }
            BootstrapDecision::Denied { reason } => {
                self.sessions.remove(popup);
                warn!(popup, url, ?reason, %action, "bootstrap hop denied, falling back to classifier");
                route_for(action, url)
            }
        }
    }

    /// Returns whether a bootstrap session was still attached to the popup.
    pub fn on_popup_closed(&mut self, popup: &str) -> bool {
        let had_session = self.sessions.remove(popup).is_some();
        debug!(popup, had_session, "popup closed");
        had_session
    }

    pub fn on_native_notification(
        &mut self,
        notification: &NativeNotification,
        candidates: &[ConversationCandidate],
        now_ms: u64,
    ) -> NotificationOutcome {
        match resolve_with_thresholds(notification, candidates, &self.thresholds) {
            NotificationMatch::Matched { href, muted } => {
                if self.deduper.should_suppress(&href, now_ms) {
                    debug!(href = %href, "duplicate notification suppressed");
                    NotificationOutcome::Suppressed { href }
                } else {
                    info!(href = %href, muted, "notification matched conversation");
                    NotificationOutcome::Show {
                        href,
                        silent: muted,
                    }
                }
            }
            NotificationMatch::Ambiguous { reason } => {
                info!(?reason, candidates = candidates.len(), "notification target ambiguous");
                NotificationOutcome::ShowGeneric { reason }
            }
        }
    }

    pub fn on_viewport_change(&self, input: &ViewportInput) -> ViewportUpdate {
        let state = ViewportState::resolve(input);
        debug!(path = %input.url_path, overlay = input.media_overlay_visible, mode = state.mode().as_str(), "viewport resolved");
        state.into()
    }

    /// Dispatches a replay event. `clock_ms` is used when the event carries no
    /// timestamp of its own.
    pub fn handle(&mut self, event: HostEvent, clock_ms: u64) -> HostDecision {
        match event {
            HostEvent::WindowOpen { popup, url, at_ms } => {
                let outcome = self.on_window_open(&popup, &url, at_ms.unwrap_or(clock_ms));
                HostDecision::Navigation { popup, outcome }
            }
            HostEvent::PopupNavigation { popup, url, at_ms } => {
                let outcome = self.on_popup_navigation(&popup, &url, at_ms.unwrap_or(clock_ms));
                HostDecision::Navigation { popup, outcome }
            }
            HostEvent::PopupClosed { popup } => {
                let had_session = self.on_popup_closed(&popup);
                HostDecision::PopupClosed { popup, had_session }
            }
            HostEvent::Notification {
                notification,
                candidates,
                at_ms,
            } => HostDecision::Notification {
                outcome: self.on_native_notification(
                    &notification,
                    &candidates,
                    at_ms.unwrap_or(clock_ms),
                ),
            },
            HostEvent::Viewport {
                url_path,
                media_overlay_visible,
            } => HostDecision::Viewport {
                update: self.on_viewport_change(&ViewportInput {
                    url_path,
                    media_overlay_visible,
                }),
            },
        }
    }
}

/// `window.open()` with no URL also yields a blank document.
fn is_blank(url: &str) -> bool {
    let trimmed = url.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("about:blank")
}

fn route_for(action: WindowOpenAction, url: &str) -> NavigationOutcome {
    match action {
        WindowOpenAction::AllowChildWindow => NavigationOutcome::ChildWindow { allowed_by: None },
        WindowOpenAction::RerouteMainView => NavigationOutcome::RerouteMainView {
            url: url.to_owned(),
        },
        WindowOpenAction::DownloadMedia => NavigationOutcome::DownloadMedia {
            url: url.to_owned(),
        },
        WindowOpenAction::OpenExternalBrowser => match external_open_target(url) {
            Some(target) => NavigationOutcome::OpenExternal {
                url: target.to_string(),
            },
            None => {
                warn!(url, "refusing to hand URL to the OS browser");
                NavigationOutcome::Block {
                    url: url.to_owned(),
                }
            }
        },
    }
}

//! Window-open classification.
//!
//! Rules are evaluated in order and the first match wins. Anything that fails to
//! parse, or matches no rule, is handed to the OS browser.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{is_alias_host, is_messaging_host, path_segments};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum WindowOpenAction {
    AllowChildWindow,
    RerouteMainView,
    DownloadMedia,
    OpenExternalBrowser,
}

impl WindowOpenAction {
    pub fn as_str(self) -> &'static str {
        match self {
            WindowOpenAction::AllowChildWindow => "allow-child-window",
            WindowOpenAction::RerouteMainView => "reroute-main-view",
            WindowOpenAction::DownloadMedia => "download-media",
            WindowOpenAction::OpenExternalBrowser => "open-external-browser",
        }
    }
}

impl std::fmt::Display for WindowOpenAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct ClassifierRule {
    pub name: &'static str,
    pub matches: fn(&Url) -> bool,
    pub action: WindowOpenAction,
}

pub const CLASSIFIER_RULES: &[ClassifierRule] = &[
    ClassifierRule {
        name: "call-or-video",
        matches: is_call_url,
        action: WindowOpenAction::AllowChildWindow,
    },
    ClassifierRule {
        name: "media-viewer",
        matches: is_media_viewer_url,
        action: WindowOpenAction::RerouteMainView,
    },
    ClassifierRule {
        name: "cdn-media-asset",
        matches: is_cdn_media_url,
        action: WindowOpenAction::DownloadMedia,
    },
    ClassifierRule {
        name: "message-thread",
        matches: is_thread_url,
        action: WindowOpenAction::RerouteMainView,
    },
];

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Classification {
    pub action: WindowOpenAction,
    /// `None` when the URL fell through to the external-browser default.
    pub rule: Option<&'static str>,
}

const CALL_SEGMENTS: &[&str] = &["groupcall", "videocall", "videochat", "call", "calls"];
const MEDIA_VIEWER_SEGMENTS: &[&str] = &[
    "photo",
    "photo.php",
    "photos",
    "video",
    "video.php",
    "videos",
    "stories",
    "story.php",
    "media_viewer",
    "attachment_preview",
];
const CDN_HOST_SUFFIXES: &[&str] = &["fbcdn.net", "cdninstagram.com", "fbsbx.com"];
const LINK_SHIM_HOSTS: &[&str] = &["l.messenger.com", "l.facebook.com", "lm.facebook.com"];
const EXTERNAL_SCHEMES: &[&str] = &["http", "https", "mailto"];

pub fn decide_window_open_action(url: &str) -> WindowOpenAction {
    classify_window_open(url).action
}

pub fn classify_window_open(url: &str) -> Classification {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return Classification {
            action: WindowOpenAction::OpenExternalBrowser,
            rule: None,
        };
    };

    CLASSIFIER_RULES
        .iter()
        .find(|rule| (rule.matches)(&parsed))
        .map(|rule| Classification {
            action: rule.action,
            rule: Some(rule.name),
        })
        .unwrap_or(Classification {
            action: WindowOpenAction::OpenExternalBrowser,
            rule: None,
        })
}

/// Resolves what the OS browser should actually be given for `url`.
///
/// Outbound link-shim URLs are unwrapped to their `u` target. Returns `None` for
/// anything that is not `http`, `https` or `mailto` after unwrapping.
pub fn external_open_target(url: &str) -> Option<Url> {
    let parsed = Url::parse(url.trim()).ok()?;
    let target = unwrap_link_shim(&parsed).unwrap_or(parsed);
    EXTERNAL_SCHEMES
        .contains(&target.scheme())
        .then_some(target)
}

fn unwrap_link_shim(url: &Url) -> Option<Url> {
    let host = url.host_str()?;
    if !LINK_SHIM_HOSTS.iter().any(|h| host.eq_ignore_ascii_case(h)) {
        return None;
    }
    if url.path() != "/l.php" {
        return None;
    }
    let (_, target) = url.query_pairs().find(|(key, _)| key == "u")?;
    Url::parse(&target).ok()
}

fn is_web_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "https" | "http")
}

fn messaging_segments(url: &Url) -> Option<Vec<String>> {
    if !is_web_scheme(url) {
        return None;
    }
    let host = url.host_str()?;
    is_messaging_host(host).then(|| path_segments(url.path()))
}

pub fn is_call_url(url: &Url) -> bool {
    messaging_segments(url).is_some_and(|segments| is_call_segments(&segments))
}

pub fn is_media_viewer_url(url: &Url) -> bool {
    messaging_segments(url).is_some_and(|segments| is_media_viewer_segments(&segments))
}

pub fn is_thread_url(url: &Url) -> bool {
    messaging_segments(url).is_some_and(|segments| {
        // The alias domain only hosts threads under /messages.
        let alias = url.host_str().is_some_and(is_alias_host);
        is_thread_segments(&segments) && (!alias || segments[0] == "messages")
    })
}

pub fn is_cdn_media_url(url: &Url) -> bool {
    if !is_web_scheme(url) {
        return false;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    CDN_HOST_SUFFIXES.iter().any(|suffix| {
        host == *suffix
            || host
                .strip_suffix(suffix)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Path-only variant used by the viewport resolver.
pub fn is_thread_path(path: &str) -> bool {
    is_thread_segments(&path_segments(path))
}

/// Path-only variant used by the viewport resolver.
pub fn is_media_viewer_path(path: &str) -> bool {
    is_media_viewer_segments(&path_segments(path))
}

fn is_call_segments(segments: &[String]) -> bool {
    segments
        .first()
        .is_some_and(|first| CALL_SEGMENTS.contains(&first.as_str()))
}

fn is_media_viewer_segments(segments: &[String]) -> bool {
    let leading = match segments {
        [messages, rest @ ..] if messages == "messages" => rest,
        all => all,
    };
    leading
        .first()
        .is_some_and(|first| MEDIA_VIEWER_SEGMENTS.contains(&first.as_str()))
}

fn is_thread_segments(segments: &[String]) -> bool {
    let refs: Vec<&str> = segments.iter().map(String::as_str).collect();
    let thread_id = match refs.as_slice() {
        ["t", id] | ["e2ee", "t", id] | ["messages", "t", id] | ["messages", "e2ee", "t", id] => {
            *id
        }
        _ => return false,
    };
    !thread_id.is_empty()
}

//! Viewport presentation mode.
//!
//! The mode is derived from the current path and the media overlay flag only.
//! Nothing is carried over between calls, so moving between threads cannot
//! leave a stale crop or media class behind.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::classify::{is_media_viewer_path, is_thread_path};

pub const CLASS_MODE_CHAT: &str = "msgshell-mode-chat";
pub const CLASS_MODE_MEDIA: &str = "msgshell-mode-media";
pub const CLASS_MODE_OTHER: &str = "msgshell-mode-other";
pub const CLASS_MESSAGES_CROP: &str = "msgshell-messages-crop";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ViewportMode {
    Chat,
    Media,
    Other,
}

impl ViewportMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ViewportMode::Chat => "chat",
            ViewportMode::Media => "media",
            ViewportMode::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ViewportInput {
    /// A path (`/messages/t/123`) or a full URL; only the path is used.
    pub url_path: String,
    #[serde(default)]
    pub media_overlay_visible: bool,
}

impl ViewportInput {
    pub fn new(url_path: impl Into<String>, media_overlay_visible: bool) -> Self {
        Self {
            url_path: url_path.into(),
            media_overlay_visible,
        }
    }
}

/// Resolved presentation state. Crop is a function of the mode and cannot be
/// set on its own.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ViewportState {
    mode: ViewportMode,
    crop_enabled: bool,
}

impl ViewportState {
    pub fn resolve(input: &ViewportInput) -> Self {
        Self::from_mode(resolve_viewport_mode(input))
    }

    pub fn from_mode(mode: ViewportMode) -> Self {
        Self {
            mode,
            crop_enabled: mode == ViewportMode::Chat,
        }
    }

    pub fn mode(&self) -> ViewportMode {
        self.mode
    }

    pub fn crop_enabled(&self) -> bool {
        self.crop_enabled
    }

    /// Every class this policy manages, paired with whether it should be set.
    /// Applying the full list replaces any previous state.
    pub fn class_toggles(&self) -> [(&'static str, bool); 4] {
        [
            (CLASS_MODE_CHAT, self.mode == ViewportMode::Chat),
            (CLASS_MODE_MEDIA, self.mode == ViewportMode::Media),
            (CLASS_MODE_OTHER, self.mode == ViewportMode::Other),
            (CLASS_MESSAGES_CROP, self.crop_enabled),
        ]
    }
}

pub fn resolve_viewport_mode(input: &ViewportInput) -> ViewportMode {
    if input.media_overlay_visible {
        return ViewportMode::Media;
    }
    let path = path_of(&input.url_path);
    if is_thread_path(&path) {
        ViewportMode::Chat
    } else if is_media_viewer_path(&path) {
        ViewportMode::Media
    } else {
        ViewportMode::Other
    }
}

pub fn should_apply_messages_crop(input: &ViewportInput) -> bool {
    ViewportState::resolve(input).crop_enabled()
}

fn path_of(url_or_path: &str) -> String {
    let trimmed = url_or_path.trim();
    if trimmed.starts_with('/') {
        return trimmed
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_owned();
    }
    Url::parse(trimmed)
        .map(|url| url.path().to_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(path: &str, overlay: bool) -> ViewportState {
        ViewportState::resolve(&ViewportInput::new(path, overlay))
    }

    #[test]
    fn thread_without_overlay_is_cropped_chat() {
        let s = state("/messages/t/123", false);
        assert_eq!(s.mode(), ViewportMode::Chat);
        assert!(s.crop_enabled());
    }

    #[test]
    fn overlay_wins_over_thread_path() {
        let s = state("/messages/t/123", true);
        assert_eq!(s.mode(), ViewportMode::Media);
        assert!(!s.crop_enabled());
    }

    #[test]
    fn media_route_is_media_regardless_of_overlay() {
        for overlay in [false, true] {
            let s = state("/photo/123", overlay);
            assert_eq!(s.mode(), ViewportMode::Media);
            assert!(!s.crop_enabled());
        }
    }

    #[test]
    fn other_routes_are_not_cropped() {
        let s = state("/settings", false);
        assert_eq!(s.mode(), ViewportMode::Other);
        assert!(!s.crop_enabled());
        assert!(!should_apply_messages_crop(&ViewportInput::new("", false)));
    }

    #[test]
    fn full_urls_and_query_strings_are_accepted() {
        assert_eq!(
            state("https://www.messenger.com/t/42?ref=notif", false).mode(),
            ViewportMode::Chat
        );
        assert_eq!(state("/t/42#composer", false).mode(), ViewportMode::Chat);
    }

    #[test]
    fn switching_threads_with_overlays_leaves_no_residue() {
        let sequence = [
            ("/messages/t/1", false, ViewportMode::Chat),
            ("/messages/t/1", true, ViewportMode::Media),
            ("/messages/t/1", false, ViewportMode::Chat),
            ("/messages/t/2", false, ViewportMode::Chat),
            ("/messages/t/2", true, ViewportMode::Media),
            ("/photo/9", false, ViewportMode::Media),
            ("/messages/t/2", false, ViewportMode::Chat),
            ("/messages/t/1", true, ViewportMode::Media),
            ("/messages/t/1", false, ViewportMode::Chat),
        ];
        for (path, overlay, expected) in sequence {
            let s = state(path, overlay);
            assert_eq!(s.mode(), expected, "{path} overlay={overlay}");
            assert_eq!(s.crop_enabled(), expected == ViewportMode::Chat);
        }
    }

    #[test]
    fn class_toggles_cover_every_class_exactly_once() {
        let toggles = state("/messages/t/1", false).class_toggles();
        let on: Vec<&str> = toggles
            .iter()
            .filter(|(_, enabled)| *enabled)
            .map(|(class, _)| *class)
            .collect();
        assert_eq!(on, vec![CLASS_MODE_CHAT, CLASS_MESSAGES_CROP]);
        assert_eq!(toggles.len(), 4);
    }
}

use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use msgshell_core::{CoreError, MatchThresholds, PolicyTunables};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// `settings.json` is a handful of numbers; anything bigger is not ours.
pub const MAX_SETTINGS_BYTES: u64 = 64 * 1024;

pub const DATA_DIR_ENV: &str = "MSGSHELL_DATA_DIR";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SavedSettings {
    #[serde(default)]
    pub tunables: PolicyTunables,
    #[serde(default)]
    pub thresholds: MatchThresholds,
}

impl SavedSettings {
    pub fn validate(&self) -> Result<(), CoreError> {
        self.tunables.validate()?;
        self.thresholds.validate()
    }
}

#[derive(Debug)]
pub enum SettingsLoadError {
    Open(io::Error),
    TooLarge { size: u64, max: u64 },
    Read(io::Error),
    Parse(serde_json::Error),
    Invalid(CoreError),
}

impl std::fmt::Display for SettingsLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsLoadError::Open(e) => write!(f, "cannot open settings: {e}"),
            SettingsLoadError::TooLarge { size, max } => {
                write!(f, "settings file too large: {size} bytes (limit {max})")
            }
            SettingsLoadError::Read(e) => write!(f, "cannot read settings: {e}"),
            SettingsLoadError::Parse(e) => write!(f, "settings are not valid JSON: {e}"),
            SettingsLoadError::Invalid(e) => write!(f, "settings rejected: {e}"),
        }
    }
}

impl std::error::Error for SettingsLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsLoadError::Open(e) | SettingsLoadError::Read(e) => Some(e),
            SettingsLoadError::Parse(e) => Some(e),
            SettingsLoadError::Invalid(e) => Some(e),
            SettingsLoadError::TooLarge { .. } => None,
        }
    }
}

#[derive(Debug)]
pub enum SettingsSaveError {
    Invalid(CoreError),
    Serialize(serde_json::Error),
    WriteTmp(io::Error),
    Rename(io::Error),
}

impl std::fmt::Display for SettingsSaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsSaveError::Invalid(e) => write!(f, "refusing to save invalid settings: {e}"),
            SettingsSaveError::Serialize(e) => write!(f, "cannot encode settings: {e}"),
            SettingsSaveError::WriteTmp(e) => write!(f, "cannot write temporary settings file: {e}"),
            SettingsSaveError::Rename(e) => write!(f, "cannot replace settings file: {e}"),
        }
    }
}

impl std::error::Error for SettingsSaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsSaveError::Invalid(e) => Some(e),
            SettingsSaveError::Serialize(e) => Some(e),
            SettingsSaveError::WriteTmp(e) | SettingsSaveError::Rename(e) => Some(e),
        }
    }
}

/// `$MSGSHELL_DATA_DIR`, else `%LOCALAPPDATA%\MsgShell`, else the working
/// directory.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    std::env::var_os("LOCALAPPDATA")
        .map(|base| PathBuf::from(base).join("MsgShell"))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn settings_path() -> PathBuf {
    let dir = data_dir();
    let _ = fs::create_dir_all(&dir);
    dir.join("settings.json")
}

pub fn parse_settings_json(data: &str) -> Result<SavedSettings, serde_json::Error> {
    serde_json::from_str::<SavedSettings>(data)
}

pub fn load_settings_from_path(path: &Path) -> Result<SavedSettings, SettingsLoadError> {
    let file = File::open(path).map_err(SettingsLoadError::Open)?;
    let size = file.metadata().map_err(SettingsLoadError::Read)?.len();
    if size > MAX_SETTINGS_BYTES {
        return Err(SettingsLoadError::TooLarge {
            size,
            max: MAX_SETTINGS_BYTES,
        });
    }

    // The file may grow between the size check and the read.
    let mut data = String::new();
    file.take(MAX_SETTINGS_BYTES)
        .read_to_string(&mut data)
        .map_err(SettingsLoadError::Read)?;
    let settings = parse_settings_json(&data).map_err(SettingsLoadError::Parse)?;
    settings.validate().map_err(SettingsLoadError::Invalid)?;
    Ok(settings)
}

/// Loads settings from `path`. A missing file silently yields defaults; an
/// unusable one is logged and also yields defaults.
pub fn load_settings_or_default(path: &Path) -> SavedSettings {
    match load_settings_from_path(path) {
        Ok(settings) => settings,
        Err(SettingsLoadError::Open(err)) if err.kind() == io::ErrorKind::NotFound => {
            SavedSettings::default()
        }
        Err(err) => {
            warn!(path = %path.display(), "ignoring settings file: {}", err);
            SavedSettings::default()
        }
    }
}

/// Command-line values that take precedence over the settings file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsOverrides {
    pub bootstrap_window_ms: Option<u64>,
    pub max_navigations: Option<u32>,
    pub dedup_ttl_ms: Option<u64>,
}

impl SettingsOverrides {
    pub fn apply(&self, settings: &mut SavedSettings) {
        let tunables = &mut settings.tunables;
        if let Some(window_ms) = self.bootstrap_window_ms {
            tunables.bootstrap_window_ms = window_ms;
        }
        if let Some(max_navigations) = self.max_navigations {
            tunables.max_navigations = max_navigations;
        }
        if let Some(ttl_ms) = self.dedup_ttl_ms {
            tunables.dedup_ttl_ms = ttl_ms;
        }
    }
}

/// The settings a run actually uses: the file at `path` (or defaults), with
/// `overrides` applied on top. Overrides are validated like file values.
pub fn effective_settings(
    path: &Path,
    overrides: &SettingsOverrides,
) -> Result<SavedSettings, CoreError> {
    let mut settings = load_settings_or_default(path);
    overrides.apply(&mut settings);
    settings.validate()?;
    Ok(settings)
}

pub fn save_settings_to_path(path: &Path, settings: &SavedSettings) -> Result<(), SettingsSaveError> {
    settings.validate().map_err(SettingsSaveError::Invalid)?;
    let payload = serde_json::to_vec_pretty(settings).map_err(SettingsSaveError::Serialize)?;

    let tmp = path.with_extension("json.tmp");
    write_synced(&tmp, &payload).map_err(SettingsSaveError::WriteTmp)?;
    fs::rename(&tmp, path).map_err(|err| {
        let _ = fs::remove_file(&tmp);
        SettingsSaveError::Rename(err)
    })
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

const SAVE_ATTEMPTS: u32 = 3;
const SAVE_BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Retries transient I/O failures with doubling backoff. Invalid settings fail
/// immediately.
pub fn save_settings_with_retry(
    path: &Path,
    settings: &SavedSettings,
) -> Result<(), SettingsSaveError> {
    let mut backoff = SAVE_BACKOFF_BASE;
    for attempt in 1..SAVE_ATTEMPTS {
        match save_settings_to_path(path, settings) {
            Err(err) if !matches!(err, SettingsSaveError::Invalid(_)) => {
                warn!(attempt, ?backoff, "settings save failed, retrying: {}", err);
                std::thread::sleep(backoff);
                backoff *= 2;
            }
            result => return result,
        }
    }
    save_settings_to_path(path, settings)
}

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context};
use capture::{CaptureConstraints, DEFAULT_CAPTURE_HEIGHT, DEFAULT_CAPTURE_WIDTH};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

pub const SETTINGS_FILE_NAME: &str = "yoga-client.toml";
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_url: String,
    /// Zero disables the timeout.
    pub request_timeout_secs: u64,
    pub playback_interval_ms: u64,
    pub preview_frame_cards: usize,
    pub capture_width: u32,
    pub capture_height: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            request_timeout_secs: 300,
            playback_interval_ms: 800,
            preview_frame_cards: 5,
            capture_width: DEFAULT_CAPTURE_WIDTH,
            capture_height: DEFAULT_CAPTURE_HEIGHT,
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn playback_interval(&self) -> Duration {
        Duration::from_millis(self.playback_interval_ms)
    }

    pub fn capture_constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            width: self.capture_width,
            height: self.capture_height,
        }
    }
}

/// Per-user settings file, e.g. `~/.config/yoga_pose_client/client.toml`.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("yoga_pose_client").join("client.toml"))
}

/// Loads settings from `explicit_path`, else `yoga-client.toml` in the working
/// directory, else the per-user file, then applies environment overrides.
pub fn load_settings(explicit_path: Option<&Path>) -> anyhow::Result<Settings> {
    let path = match explicit_path {
        Some(path) => Some(path.to_path_buf()),
        None => [Some(PathBuf::from(SETTINGS_FILE_NAME)), default_settings_path()]
            .into_iter()
            .flatten()
            .find(|candidate| candidate.is_file()),
    };

    let mut settings = match path {
        Some(path) => {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
            debug!(path = %path.display(), "config: loaded settings file");
            parse_settings(&raw)
                .with_context(|| format!("invalid settings file '{}'", path.display()))?
        }
        None => Settings::default(),
    };

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.api_url = normalize_api_url(&settings.api_url)?;
    Ok(settings)
}

pub fn parse_settings(raw: &str) -> anyhow::Result<Settings> {
    Ok(toml::from_str::<Settings>(raw)?)
}

pub fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("YOGA_API_URL") {
        settings.api_url = v;
    }
    if let Some(v) = lookup("APP__API_URL") {
        settings.api_url = v;
    }

    if let Some(v) = lookup("APP__REQUEST_TIMEOUT_SECS") {
        match v.parse() {
            Ok(parsed) => settings.request_timeout_secs = parsed,
            Err(_) => warn!(value = %v, "config: ignoring invalid APP__REQUEST_TIMEOUT_SECS"),
        }
    }
    if let Some(v) = lookup("APP__PLAYBACK_INTERVAL_MS") {
        match v.parse() {
            Ok(parsed) => settings.playback_interval_ms = parsed,
            Err(_) => warn!(value = %v, "config: ignoring invalid APP__PLAYBACK_INTERVAL_MS"),
        }
    }
}

/// Trims, defaults the scheme to `http`, and drops any trailing slash.
pub fn normalize_api_url(raw_api_url: &str) -> anyhow::Result<String> {
    let raw_api_url = raw_api_url.trim();
    if raw_api_url.is_empty() {
        return Ok(DEFAULT_API_URL.to_string());
    }

    let candidate = if raw_api_url.contains("://") {
        raw_api_url.to_string()
    } else {
        format!("http://{raw_api_url}")
    };

    let parsed =
        Url::parse(&candidate).with_context(|| format!("invalid api url '{raw_api_url}'"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(anyhow!(
            "api url '{raw_api_url}' must use http or https, got '{}'",
            parsed.scheme()
        ));
    }
    if parsed.host_str().is_none() {
        return Err(anyhow!("api url '{raw_api_url}' has no host"));
    }

    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        env,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    #[test]
    fn normalizes_bare_host_to_http_url() {
        assert_eq!(
            normalize_api_url("localhost:8000/").expect("normalize"),
            "http://localhost:8000"
        );
        assert_eq!(
            normalize_api_url(" https://pose.example.com/api/ ").expect("normalize"),
            "https://pose.example.com/api"
        );
        assert_eq!(normalize_api_url("").expect("default"), DEFAULT_API_URL);
    }

    #[test]
    fn rejects_non_http_schemes() {
        let err = normalize_api_url("ftp://pose.example.com").unwrap_err();
        assert!(err.to_string().contains("must use http or https"));
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let settings = parse_settings(
            r#"
            api_url = "http://10.0.0.5:9000"
            playback_interval_ms = 250
            "#,
        )
        .expect("parse");
        assert_eq!(settings.api_url, "http://10.0.0.5:9000");
        assert_eq!(settings.playback_interval(), Duration::from_millis(250));
        assert_eq!(settings.preview_frame_cards, 5);
        assert_eq!(settings.capture_constraints(), CaptureConstraints::default());
    }

    #[test]
    fn env_overrides_win_and_bad_numbers_are_ignored() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("YOGA_API_URL", "http://first:1"),
            ("APP__API_URL", "http://second:2"),
            ("APP__REQUEST_TIMEOUT_SECS", "0"),
            ("APP__PLAYBACK_INTERVAL_MS", "fast"),
        ]);
        let mut settings = Settings::default();
        apply_env_overrides(&mut settings, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.api_url, "http://second:2");
        assert_eq!(settings.request_timeout(), None);
        assert_eq!(settings.playback_interval_ms, 800);
    }

    #[test]
    fn loads_explicit_settings_file() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = env::temp_dir().join(format!("yoga_client_settings_{suffix}.toml"));
        fs::write(&path, "api_url = \"127.0.0.1:8123/\"\nrequest_timeout_secs = 30\n")
            .expect("write settings");

        let settings = load_settings(Some(&path)).expect("load");
        if env::var("YOGA_API_URL").is_err() && env::var("APP__API_URL").is_err() {
            assert_eq!(settings.api_url, "http://127.0.0.1:8123");
        }
        assert_eq!(settings.request_timeout(), Some(Duration::from_secs(30)));

        fs::remove_file(path).expect("cleanup");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = load_settings(Some(Path::new("/no/such/yoga-client.toml"))).unwrap_err();
        assert!(err.to_string().contains("failed to read settings file"));
    }
}

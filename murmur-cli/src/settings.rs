//! Persistent CLI settings (JSON file passed with `--config`).

use std::fs;
use std::path::{Path, PathBuf};

use murmur_core::{SessionConfig, SynthServerConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:18230";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct CliSettings {
    pub session: SessionConfig,
    /// Existing server to talk to. Ignored when `server.command` is set.
    pub server_url: String,
    /// Server subprocess to launch and keep warm.
    pub server: SynthServerConfig,
    pub request_timeout_secs: u64,
    pub output_path: PathBuf,
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            server_url: DEFAULT_SERVER_URL.into(),
            server: SynthServerConfig::default(),
            request_timeout_secs: 60,
            output_path: PathBuf::from("murmur.wav"),
        }
    }
}

impl CliSettings {
    pub fn normalize(&mut self) {
        self.session.prefetch_buffer_size = self.session.prefetch_buffer_size.clamp(1, 16);
        self.session.max_chars = self.session.max_chars.max(1);
        self.session.first_chunk_max_chars = self.session.first_chunk_max_chars.max(1);
        self.request_timeout_secs = self.request_timeout_secs.clamp(1, 600);
        let url = self.server_url.trim().trim_end_matches('/');
        self.server_url = if url.is_empty() {
            DEFAULT_SERVER_URL.into()
        } else {
            url.to_string()
        };
    }
}

/// Load settings; a missing or malformed file falls back to defaults.
pub fn load_settings(path: &Path) -> CliSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<CliSettings>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "invalid settings file; using defaults");
            CliSettings::default()
        }),
        Err(_) => CliSettings::default(),
    };
    settings.normalize();
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let raw = r#"{
            "session": { "narrationMode": true, "prefetchBufferSize": 0 },
            "serverUrl": "http://localhost:9000/",
            "server": { "command": ["python3", "tts_server.py"], "refText": "hello" }
        }"#;
        let mut settings: CliSettings = serde_json::from_str(raw).expect("parse");
        settings.normalize();

        assert!(settings.session.narration_mode);
        assert_eq!(settings.session.prefetch_buffer_size, 1);
        assert_eq!(settings.session.max_chars, 135);
        assert_eq!(settings.server_url, "http://localhost:9000");
        assert_eq!(settings.server.command, vec!["python3", "tts_server.py"]);
        assert_eq!(settings.server.ref_text.as_deref(), Some("hello"));
        assert_eq!(settings.server.port, 18_230);
        assert_eq!(settings.request_timeout_secs, 60);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings(Path::new("/nonexistent/murmur/settings.json"));
        assert_eq!(settings.server_url, DEFAULT_SERVER_URL);
        assert_eq!(settings.output_path, PathBuf::from("murmur.wav"));
    }
}

use std::path::{Path, PathBuf};

use anyhow::Context;
use reel_recording::RecordingOptions;
use tracing::*;

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("reel").join("config.json"))
}

/// Loads recording defaults. An explicit `path` must exist; the default
/// location is optional.
pub fn load(path: Option<&Path>) -> anyhow::Result<RecordingOptions> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => match default_path() {
            Some(path) => (path, false),
            None => return Ok(RecordingOptions::default()),
        },
    };

    if !required && !path.exists() {
        debug!(?path, "No config file, using defaults");
        return Ok(RecordingOptions::default());
    }

    let contents =
        std::fs::read_to_string(&path).with_context(|| format!("Reading config {path:?}"))?;
    let options = serde_json::from_str(&contents)
        .with_context(|| format!("Parsing config {path:?}"))?;

    debug!(?path, ?options, "Loaded config");

    Ok(options)
}

#[cfg(test)]
mod tests {
    use reel_recording::AudioRouting;

    use super::*;

    #[test]
    fn explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "audio": "mic", "safeLimiter": false }"#).unwrap();

        let options = load(Some(&path)).unwrap();

        assert_eq!(options.audio, AudioRouting::Microphone);
        assert!(!options.safe_limiter);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();

        assert!(load(Some(&dir.path().join("nope.json"))).is_err());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ audio: ").unwrap();

        let error = load(Some(&path)).unwrap_err();
        assert!(format!("{error:#}").contains("Parsing config"));
    }
}

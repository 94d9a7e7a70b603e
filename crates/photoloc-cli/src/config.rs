use photoloc_core::{geocoder, matcher, overpass};
use std::path::PathBuf;
use std::time::Duration;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing `clip_vision.onnx` and `clip_text_embeddings.json`.
    pub model_dir: PathBuf,
    /// Landmark table override; the embedded table is used when unset.
    pub landmarks_path: Option<PathBuf>,
    /// Minimum softmax score for a landmark match.
    pub threshold: f32,
    /// Ranked landmark candidates to log or print.
    pub top_k: usize,
    pub overpass_url: String,
    pub overpass_timeout: Duration,
    pub nominatim_url: String,
    /// Identifying user agent; Nominatim rejects anonymous clients.
    pub user_agent: String,
    pub geocode_language: String,
    pub geocode_timeout: Duration,
    /// Minimum spacing between reverse-geocoding requests.
    pub geocode_min_delay: Duration,
    pub geocode_attempts: u32,
    pub geocode_backoff: Duration,
}

impl Config {
    /// Load configuration from `PHOTOLOC_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("PHOTOLOC_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| photoloc_core::default_model_dir());

        Self {
            model_dir,
            landmarks_path: std::env::var("PHOTOLOC_LANDMARKS").ok().map(PathBuf::from),
            threshold: env_parse("PHOTOLOC_THRESHOLD", matcher::DEFAULT_THRESHOLD),
            top_k: env_parse("PHOTOLOC_TOP_K", matcher::DEFAULT_TOP_K),
            overpass_url: env_string("PHOTOLOC_OVERPASS_URL", overpass::DEFAULT_OVERPASS_URL),
            overpass_timeout: Duration::from_secs(env_parse(
                "PHOTOLOC_OVERPASS_TIMEOUT_SECS",
                overpass::DEFAULT_OVERPASS_TIMEOUT.as_secs(),
            )),
            nominatim_url: env_string("PHOTOLOC_NOMINATIM_URL", geocoder::DEFAULT_NOMINATIM_URL),
            user_agent: env_string(
                "PHOTOLOC_USER_AGENT",
                concat!("photoloc/", env!("CARGO_PKG_VERSION")),
            ),
            geocode_language: env_string("PHOTOLOC_GEOCODE_LANGUAGE", geocoder::DEFAULT_LANGUAGE),
            geocode_timeout: Duration::from_secs(env_parse(
                "PHOTOLOC_GEOCODE_TIMEOUT_SECS",
                geocoder::DEFAULT_REQUEST_TIMEOUT.as_secs(),
            )),
            geocode_min_delay: Duration::from_millis(env_parse("PHOTOLOC_GEOCODE_MIN_DELAY_MS", 1000)),
            geocode_attempts: env_parse("PHOTOLOC_GEOCODE_ATTEMPTS", 3),
            geocode_backoff: Duration::from_millis(env_parse("PHOTOLOC_GEOCODE_BACKOFF_MS", 2000)),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_falls_back_on_missing_or_garbage() {
        std::env::remove_var("PHOTOLOC_TEST_MISSING");
        assert_eq!(env_parse("PHOTOLOC_TEST_MISSING", 7u32), 7);

        std::env::set_var("PHOTOLOC_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_parse("PHOTOLOC_TEST_GARBAGE", 0.15f32), 0.15);
    }

    #[test]
    fn test_parse_reads_override() {
        std::env::set_var("PHOTOLOC_TEST_TOPK", "9");
        assert_eq!(env_parse("PHOTOLOC_TEST_TOPK", 5usize), 9);
        std::env::set_var("PHOTOLOC_TEST_URL", "http://localhost:8080");
        assert_eq!(env_string("PHOTOLOC_TEST_URL", "x"), "http://localhost:8080");
    }
}

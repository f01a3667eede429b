use std::path::PathBuf;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Per-request settings handed to the handler at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub data_dir: PathBuf,
    pub max_body_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIR)
    }
}

impl IngestConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = first_value(&lookup, &["TRIAL_INGEST_DATA_DIR", "DATA_DIR"])
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
        let max_body_bytes =
            parse_first::<usize>(&lookup, &["TRIAL_INGEST_MAX_BODY_BYTES", "MAX_BODY_BYTES"])
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_MAX_BODY_BYTES);
        Self {
            data_dir: PathBuf::from(data_dir),
            max_body_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportRuntime {
    Std,
    Axum,
}

impl TransportRuntime {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Std => "std",
            Self::Axum => "axum",
        }
    }
}

/// Process-level settings read once by the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub http_workers: usize,
    pub transport_runtime: TransportRuntime,
    pub error_log_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let bind_addr = first_value(&lookup, &["TRIAL_INGEST_BIND", "BIND_ADDR"])
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let http_workers =
            parse_first::<usize>(&lookup, &["TRIAL_INGEST_HTTP_WORKERS", "HTTP_WORKERS"])
                .filter(|workers| *workers > 0)
                .unwrap_or_else(default_http_workers);
        let transport_runtime = match first_value(
            &lookup,
            &["TRIAL_INGEST_TRANSPORT_RUNTIME", "TRANSPORT_RUNTIME"],
        )
        .as_deref()
        {
            Some("axum") => TransportRuntime::Axum,
            _ => TransportRuntime::Std,
        };
        let error_log_path = first_value(&lookup, &["TRIAL_INGEST_ERROR_LOG", "ERROR_LOG"])
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        Self {
            bind_addr,
            http_workers,
            transport_runtime,
            error_log_path,
        }
    }
}

fn default_http_workers() -> usize {
    std::thread::available_parallelism()
        .map(|parallelism| parallelism.get().clamp(1, 32))
        .unwrap_or(4)
}

fn first_value(lookup: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| lookup(*key))
}

fn parse_first<T>(lookup: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<T>
where
    T: std::str::FromStr,
{
    for key in keys {
        if let Some(value) = lookup(*key)
            && let Ok(parsed) = value.trim().parse::<T>()
        {
            return Some(parsed);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| values.get(key).cloned()
    }

    #[test]
    fn ingest_config_defaults_without_environment() {
        let config = IngestConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config, IngestConfig::default());
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.max_body_bytes, 10_485_760);
    }

    #[test]
    fn ingest_config_prefers_primary_keys_over_fallbacks() {
        let config = IngestConfig::from_lookup(lookup_from(&[
            ("TRIAL_INGEST_DATA_DIR", "/srv/trials"),
            ("DATA_DIR", "/tmp/ignored"),
            ("MAX_BODY_BYTES", "2048"),
        ]));
        assert_eq!(config.data_dir, PathBuf::from("/srv/trials"));
        assert_eq!(config.max_body_bytes, 2048);
    }

    #[test]
    fn ingest_config_ignores_invalid_limits() {
        for raw in ["0", "-5", "ten"] {
            let config =
                IngestConfig::from_lookup(lookup_from(&[("TRIAL_INGEST_MAX_BODY_BYTES", raw)]));
            assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES, "{raw}");
        }
    }

    #[test]
    fn server_config_parses_runtime_workers_and_log_path() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("TRIAL_INGEST_BIND", "0.0.0.0:9000"),
            ("HTTP_WORKERS", "3"),
            ("TRIAL_INGEST_TRANSPORT_RUNTIME", "axum"),
            ("ERROR_LOG", "data/error.log"),
        ]));
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.http_workers, 3);
        assert_eq!(config.transport_runtime, TransportRuntime::Axum);
        assert_eq!(config.error_log_path, Some(PathBuf::from("data/error.log")));
    }

    #[test]
    fn server_config_defaults_to_std_runtime() {
        let config = ServerConfig::from_lookup(lookup_from(&[("TRANSPORT_RUNTIME", "tokio")]));
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.transport_runtime, TransportRuntime::Std);
        assert!(config.http_workers >= 1);
        assert_eq!(config.error_log_path, None);
    }
}

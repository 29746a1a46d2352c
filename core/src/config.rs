//! Runtime configuration.
//!
//! Loaded the same way `RoomRtcConfig` was: an `LSNP_CONFIG` environment
//! variable holding a raw JSON string takes priority, then a path given on
//! the command line, then `lsnp_config.json` in the working directory, then
//! compiled-in defaults. Missing fields in a partially-specified file fall
//! back to `Default::default()` field by field via `impl_json!`.

use json_parser::{from_str, impl_json};
use std::error::Error;

#[derive(Debug, Clone)]
pub struct LsnpConfig {
    pub bind_address: String,
    pub port: u32,
    pub display_name: String,
    pub post_ttl_seconds: u64,
    pub token_ttl_seconds: u64,
    pub avatar_path: String,
    pub files_dir: String,
    pub downloads_dir: String,
    pub log_file_path: String,
    pub log_level: String,
    pub enable_console: bool,
    pub retry_count: u32,
    pub retry_interval_ms: u64,
}

impl Default for LsnpConfig {
    fn default() -> Self {
        LsnpConfig {
            bind_address: "0.0.0.0".to_string(),
            port: 50999,
            display_name: String::new(),
            post_ttl_seconds: 3600,
            token_ttl_seconds: 600,
            avatar_path: String::new(),
            files_dir: "lsnp_data".to_string(),
            downloads_dir: "lsnp_data/downloads".to_string(),
            log_file_path: "lsnp-node.log".to_string(),
            log_level: "info".to_string(),
            enable_console: true,
            retry_count: 3,
            retry_interval_ms: 2000,
        }
    }
}

impl_json! {
    LsnpConfig {
        bind_address: String,
        port: u32,
        display_name: String,
        post_ttl_seconds: u64,
        token_ttl_seconds: u64,
        avatar_path: String,
        files_dir: String,
        downloads_dir: String,
        log_file_path: String,
        log_level: String,
        enable_console: bool,
        retry_count: u32,
        retry_interval_ms: u64,
    }
}

impl LsnpConfig {
    pub fn load_from_file(path: &str) -> Result<Self, Box<dyn Error>> {
        let content = config_loader::load_config_file(path)?;
        from_str(&content).map_err(|e| e.into())
    }

    /// Resolves configuration the way `lsnp-node`'s `main` does: `LSNP_CONFIG`
    /// env var as a raw JSON string, then `path_arg` if given, then
    /// `lsnp_config.json`, falling back to defaults if nothing loads.
    pub fn resolve(path_arg: Option<&str>) -> Self {
        if let Ok(json_str) = std::env::var("LSNP_CONFIG") {
            if let Ok(cfg) = json_parser::from_str::<LsnpConfig>(&json_str) {
                return cfg;
            }
        }

        let config_path = path_arg
            .map(|s| s.to_string())
            .unwrap_or_else(|| "lsnp_config.json".to_string());

        LsnpConfig::load_from_file(&config_path).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = LsnpConfig::default();
        assert_eq!(cfg.port, 50999);
        assert_eq!(cfg.token_ttl_seconds, 600);
        assert_eq!(cfg.retry_count, 3);
        assert_eq!(cfg.retry_interval_ms, 2000);
    }

    #[test]
    fn resolve_falls_back_to_defaults_when_nothing_present() {
        std::env::remove_var("LSNP_CONFIG");
        let cfg = LsnpConfig::resolve(Some("/nonexistent/path/lsnp_config.json"));
        assert_eq!(cfg.port, 50999);
    }

    #[test]
    fn partial_json_fills_missing_fields_with_defaults() {
        let json = r#"{"port": 12345}"#;
        let cfg: LsnpConfig = from_str(json).unwrap();
        assert_eq!(cfg.port, 12345);
        assert_eq!(cfg.token_ttl_seconds, 600);
    }
}

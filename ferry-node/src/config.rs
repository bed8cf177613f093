//! Load config from file and environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Node configuration. File: ~/.config/ferry/config.toml or
/// /etc/ferry/config.toml. Env overrides: FERRY_TRACKER_HOST,
/// FERRY_UDP_PORT, FERRY_SEEDER_PORT, FERRY_PEER_PORT.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Tracker host for the seeder and leecher roles (default 127.0.0.1).
    #[serde(default = "default_tracker_host")]
    pub tracker_host: String,
    /// Tracker UDP discovery port (default 12000).
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    /// Seeder TCP transfer port (default 12500).
    #[serde(default = "default_seeder_port")]
    pub seeder_port: u16,
    /// Direct peer-to-peer TCP port (default 13000).
    #[serde(default = "default_peer_port")]
    pub peer_port: u16,
    /// Transfer chunk size in bytes (default 4096).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Tracker: seconds of silence before a peer is reaped (default 10).
    #[serde(default = "default_offline_threshold_secs")]
    pub offline_threshold_secs: u64,
    /// Tracker: seconds before an inactive match is dropped (default 10).
    #[serde(default = "default_unmatch_buffer_secs")]
    pub unmatch_buffer_secs: u64,
    /// Tracker: idle receive timeout driving the housekeeping tick (default 4).
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Peers: discovery receive timeout in seconds (default 5).
    #[serde(default = "default_waiting_time_secs")]
    pub waiting_time_secs: u64,
    /// Resend budget per chunk before the transfer aborts (default 5).
    #[serde(default = "default_max_chunk_retries")]
    pub max_chunk_retries: u32,
    /// Name announced to the tracker (default "ferry").
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Directory the seeder catalog is scanned from (default "shared").
    #[serde(default = "default_share_dir")]
    pub share_dir: PathBuf,
    /// Directory downloads are written to (default "downloads").
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Re-register as a seed source after a finished download (default false).
    #[serde(default)]
    pub seed_after_download: bool,
}

fn default_tracker_host() -> String {
    "127.0.0.1".to_string()
}
fn default_udp_port() -> u16 {
    12000
}
fn default_seeder_port() -> u16 {
    12500
}
fn default_peer_port() -> u16 {
    13000
}
fn default_chunk_size() -> u64 {
    4096
}
fn default_offline_threshold_secs() -> u64 {
    10
}
fn default_unmatch_buffer_secs() -> u64 {
    10
}
fn default_refresh_interval_secs() -> u64 {
    4
}
fn default_waiting_time_secs() -> u64 {
    5
}
fn default_max_chunk_retries() -> u32 {
    5
}
fn default_client_name() -> String {
    "ferry".to_string()
}
fn default_share_dir() -> PathBuf {
    PathBuf::from("shared")
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracker_host: default_tracker_host(),
            udp_port: default_udp_port(),
            seeder_port: default_seeder_port(),
            peer_port: default_peer_port(),
            chunk_size: default_chunk_size(),
            offline_threshold_secs: default_offline_threshold_secs(),
            unmatch_buffer_secs: default_unmatch_buffer_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            waiting_time_secs: default_waiting_time_secs(),
            max_chunk_retries: default_max_chunk_retries(),
            client_name: default_client_name(),
            share_dir: default_share_dir(),
            download_dir: default_download_dir(),
            seed_after_download: false,
        }
    }
}

impl Config {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn waiting_time(&self) -> Duration {
        Duration::from_secs(self.waiting_time_secs)
    }

    pub fn offline_threshold(&self) -> Duration {
        Duration::from_secs(self.offline_threshold_secs)
    }

    pub fn unmatch_buffer(&self) -> Duration {
        Duration::from_secs(self.unmatch_buffer_secs)
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("FERRY_TRACKER_HOST") {
        if !s.is_empty() {
            c.tracker_host = s;
        }
    }
    if let Ok(s) = std::env::var("FERRY_UDP_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.udp_port = p;
        }
    }
    if let Ok(s) = std::env::var("FERRY_SEEDER_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.seeder_port = p;
        }
    }
    if let Ok(s) = std::env::var("FERRY_PEER_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.peer_port = p;
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/ferry/config.toml"));
    }
    out.push(PathBuf::from("/etc/ferry/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<Config>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let c = Config::default();
        assert_eq!(c.udp_port, 12000);
        assert_eq!(c.seeder_port, 12500);
        assert_eq!(c.peer_port, 13000);
        assert_eq!(c.chunk_size, 4096);
        assert_eq!(c.refresh_interval(), Duration::from_secs(4));
        assert_eq!(c.offline_threshold(), Duration::from_secs(10));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let c: Config = toml::from_str("udp_port = 9000\nseed_after_download = true").unwrap();
        assert_eq!(c.udp_port, 9000);
        assert!(c.seed_after_download);
        assert_eq!(c.seeder_port, 12500);
        assert_eq!(c.client_name, "ferry");
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("mystery_knob = 1").is_err());
    }
}

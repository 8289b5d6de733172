//! Relay Server Configuration
//!
//! Configuration loaded from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address for the plaintext WebSocket listener.
    pub listen_addr: SocketAddr,
    /// Address for the TLS WebSocket listener.
    pub tls_listen_addr: SocketAddr,
    /// Address for the admin HTTP endpoint (health + metrics).
    pub http_addr: SocketAddr,
    /// Identity provider issuer URL; signing keys are fetched from its
    /// `.well-known/jwks.json`.
    pub issuer_url: String,
    /// Base URL of the profile API (`{url}/auth/me` resolves identities).
    pub profile_api_url: String,
    /// Window, in seconds, within which a fresh connection must present a
    /// valid auth frame and pass verification.
    pub auth_window_secs: u64,
    /// Maximum concurrent connections across both listeners.
    pub max_connections: usize,
    /// Maximum accepted frame size in bytes.
    pub max_frame_size: usize,
    /// When true, tenant keys are qualified by the member's location id,
    /// giving each location its own room.
    pub multi_location: bool,
    /// Data directory for persistent state (TLS certificate).
    pub data_dir: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            listen_addr: "0.0.0.0:8765".parse().unwrap(),
            tls_listen_addr: "0.0.0.0:8766".parse().unwrap(),
            http_addr: "127.0.0.1:8081".parse().unwrap(),
            issuer_url: "http://127.0.0.1:8090".to_string(),
            profile_api_url: "http://127.0.0.1:8091".to_string(),
            auth_window_secs: 10,
            max_connections: 1000,
            max_frame_size: 1_048_576, // 1 MB
            multi_location: false,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("RELAY_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }

        if let Ok(addr) = std::env::var("RELAY_TLS_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.tls_listen_addr = parsed;
            }
        }

        if let Ok(addr) = std::env::var("RELAY_HTTP_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.http_addr = parsed;
            }
        }

        if let Ok(url) = std::env::var("RELAY_ISSUER_URL") {
            config.issuer_url = url;
        }

        if let Ok(url) = std::env::var("RELAY_PROFILE_API_URL") {
            config.profile_api_url = url;
        }

        if let Ok(val) = std::env::var("RELAY_AUTH_WINDOW_SECS") {
            if let Ok(parsed) = val.parse() {
                config.auth_window_secs = parsed;
            }
        }

        if let Ok(val) = std::env::var("RELAY_MAX_CONNECTIONS") {
            if let Ok(parsed) = val.parse() {
                config.max_connections = parsed;
            }
        }

        if let Ok(val) = std::env::var("RELAY_MAX_FRAME_SIZE") {
            if let Ok(parsed) = val.parse() {
                config.max_frame_size = parsed;
            }
        }

        if let Ok(val) = std::env::var("RELAY_MULTI_LOCATION") {
            config.multi_location = val == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("RELAY_DATA_DIR") {
            config.data_dir = PathBuf::from(val);
        }

        config
    }

    /// Returns the auth window as a Duration.
    pub fn auth_window(&self) -> Duration {
        Duration::from_secs(self.auth_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();

        assert_eq!(config.listen_addr.port(), 8765);
        assert_eq!(config.tls_listen_addr.port(), 8766);
        assert_eq!(config.http_addr.port(), 8081);
        assert_eq!(config.auth_window_secs, 10);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.max_frame_size, 1_048_576);
        assert!(!config.multi_location);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
    }

    #[test]
    fn test_auth_window_duration() {
        let config = RelayConfig::default();
        assert_eq!(config.auth_window(), Duration::from_secs(10));
    }

    #[test]
    fn test_tls_port_follows_plaintext_port() {
        // Deployments pair the two ports next to each other.
        let config = RelayConfig::default();
        assert_eq!(config.tls_listen_addr.port(), config.listen_addr.port() + 1);
    }
}

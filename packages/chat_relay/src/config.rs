use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

// =============================================================================
// File config (figment-deserialized from defaults / relay.toml / env vars)
// =============================================================================
//
//   relay.toml:      [store]
//                    url = "sqlite://relay.db"
//
//   env var:         RELAY_STORE__URL=sqlite://relay.db   (double underscore = nesting)
//
// Hosting platforms hand out a bare `PORT`, and the store credentials usually
// arrive as `STORE_URL` / `STORE_KEY` (or `SUPABASE_URL` / `SUPABASE_KEY`);
// those are mapped onto the same keys.

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub store: StoreFileConfig,
    #[serde(default)]
    pub cors: CorsFileConfig,
}

/// Listener knobs (lives under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    /// Seconds between keepalive pings; 0 disables them.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Outbound events buffered per connection before deliveries fail.
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            ping_interval_secs: default_ping_interval_secs(),
            send_queue_capacity: default_send_queue_capacity(),
        }
    }
}

/// Backing store (lives under `[store]`). No url means pure relay mode.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreFileConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_shared_room")]
    pub shared_room: String,
}

impl Default for StoreFileConfig {
    fn default() -> Self {
        Self {
            url: None,
            key: None,
            table: default_table(),
            history_limit: default_history_limit(),
            shared_room: default_shared_room(),
        }
    }
}

/// Cross-origin policy (lives under `[cors]`). Empty list = any origin.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CorsFileConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}
fn default_ping_interval_secs() -> u64 {
    25
}
fn default_send_queue_capacity() -> usize {
    100
}
fn default_table() -> String {
    "message".to_string()
}
fn default_history_limit() -> usize {
    50
}
fn default_shared_room() -> String {
    crate::models::DEFAULT_ROOM.to_string()
}

/// Build a figment that layers: defaults → TOML file → `RELAY_*` env vars →
/// bare deployment env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `RELAY_SERVER__PORT=8080`  →  `server.port = 8080`
///   `RELAY_CORS__ALLOWED_ORIGINS=[https://chat.example]`
pub fn load_config(config_path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("RELAY_").split("__"))
        .merge(Env::raw().only(&["PORT"]).map(|_| "server.port".into()))
        .merge(Env::raw().only(&["SUPABASE_URL"]).map(|_| "store.url".into()))
        .merge(Env::raw().only(&["SUPABASE_KEY"]).map(|_| "store.key".into()))
        .merge(Env::raw().only(&["STORE_URL"]).map(|_| "store.url".into()))
        .merge(Env::raw().only(&["STORE_KEY"]).map(|_| "store.key".into()))
}

// =============================================================================
// Runtime config (derived from FileConfig, used throughout the server)
// =============================================================================

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub cors: CorsConfig,
}

impl RelayConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            server: ServerConfig::from_file(&fc.server),
            store: StoreConfig::from_file(&fc.store),
            cors: CorsConfig::from_file(&fc.cors),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: PathBuf,
    /// None = no keepalive pings
    pub ping_interval: Option<Duration>,
    pub send_queue_capacity: usize,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Self {
        Self {
            host: fc.host.clone(),
            port: fc.port,
            static_dir: fc.static_dir.clone(),
            ping_interval: if fc.ping_interval_secs == 0 {
                None
            } else {
                Some(Duration::from_secs(fc.ping_interval_secs))
            },
            send_queue_capacity: fc.send_queue_capacity.max(1),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Which backing store, if any, persistence mode talks to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    /// Pure relay mode.
    Disabled,
    /// Local SQLite database, e.g. `sqlite://relay.db` or `sqlite::memory:`.
    Sqlite { url: String },
    /// Hosted REST table API reached with an access key.
    Rest { url: String, key: String },
}

impl StoreBackend {
    pub fn resolve(url: Option<&str>, key: Option<&str>) -> Self {
        let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) else {
            return StoreBackend::Disabled;
        };

        if url.starts_with("sqlite:") {
            return StoreBackend::Sqlite {
                url: url.to_string(),
            };
        }

        if url.starts_with("http://") || url.starts_with("https://") {
            return match key.map(str::trim).filter(|k| !k.is_empty()) {
                Some(key) => StoreBackend::Rest {
                    url: url.to_string(),
                    key: key.to_string(),
                },
                None => {
                    warn!("Store url is set but no access key was given; running in relay mode");
                    StoreBackend::Disabled
                }
            };
        }

        warn!(url = %url, "Unrecognized store url scheme; running in relay mode");
        StoreBackend::Disabled
    }
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub table: String,
    pub history_limit: usize,
    pub shared_room: String,
}

impl StoreConfig {
    pub fn from_file(fc: &StoreFileConfig) -> Self {
        Self {
            backend: StoreBackend::resolve(fc.url.as_deref(), fc.key.as_deref()),
            table: fc.table.clone(),
            history_limit: fc.history_limit,
            shared_room: fc.shared_room.clone(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    pub fn from_file(fc: &CorsFileConfig) -> Self {
        Self {
            allowed_origins: fc
                .allowed_origins
                .iter()
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
        }
    }

    /// True when any origin may connect.
    pub fn is_open(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == "*")
    }
}

use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default)]
    pub use_json: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Fixed number of acceptor workers sharing the listening socket
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: 4,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Name of the shared store instance; attachers find it by this name
    pub store_name: String,
    pub account_count: usize,
    pub initial_balance: i64,
    /// Admission ceiling: transfers inside the gated section at once
    pub max_concurrent_transfers: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            store_name: "tellerd_ledger".to_string(),
            account_count: 100,
            initial_balance: 10_000,
            max_concurrent_transfers: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditConfig {
    /// Bounded queue depth between workers and the audit writer
    pub queue_capacity: usize,
    pub log_dir: String,
    pub log_file: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 128,
            log_dir: "logs".to_string(),
            log_file: "transaction.log".to_string(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_file() -> String {
    "tellerd.log".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            log_file: default_log_file(),
            use_json: false,
            rotation: default_rotation(),
            server: ServerConfig::default(),
            ledger: LedgerConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}

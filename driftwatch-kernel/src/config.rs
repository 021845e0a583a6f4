use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::warn;

pub const HEARTBEAT_TOPIC: &str = "driftwatch/instances/heartbeat@v1";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub mqtt: Option<MqttConf>,
    pub authority: AuthorityConf,
    pub linkage: LinkageConf,
    pub store: StoreConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_heartbeat_topic")]
    pub topic: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AuthorityConf {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LinkageConf {
    /// Environnements d'un service auto-créé quand le heartbeat n'en porte pas
    pub default_environments: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConf {
    pub snapshot_path: String,
    pub flush_interval_secs: u64,
}

fn default_heartbeat_topic() -> String {
    HEARTBEAT_TOPIC.to_string()
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

impl Default for AuthorityConf {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8888".into(),
            timeout_secs: 5,
        }
    }
}

impl Default for LinkageConf {
    fn default() -> Self {
        Self { default_environments: vec!["default".into()] }
    }
}

impl Default for StoreConf {
    fn default() -> Self {
        Self {
            snapshot_path: "./data/instances.json".into(),
            flush_interval_secs: 60,
        }
    }
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("DRIFTWATCH_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt).unwrap_or_else(|e| {
            warn!(path = %path, error = %e, "invalid kernel config, using defaults");
            KernelConfig::default()
        })
    } else {
        warn!(path = %path, "no kernel config file, using defaults");
        KernelConfig::default()
    }
}

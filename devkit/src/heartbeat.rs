/*!
Builder de heartbeats pour les tests

Part d'un payload valide minimal ("orders"/"i1") et permet de modifier un champ à la fois.
*/

use driftwatch_kernel::models::HeartbeatPayload;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct HeartbeatBuilder {
    payload: HeartbeatPayload,
}

impl HeartbeatBuilder {
    pub fn new<S: Into<String>>(service_name: S, instance_id: S) -> Self {
        Self {
            payload: HeartbeatPayload {
                service_name: service_name.into(),
                instance_id: instance_id.into(),
                ..HeartbeatPayload::default()
            },
        }
    }

    pub fn config_hash(mut self, hash: &str) -> Self {
        self.payload.config_hash = Some(hash.to_string());
        self
    }

    pub fn environment(mut self, environment: &str) -> Self {
        self.payload.environment = Some(environment.to_string());
        self
    }

    pub fn host(mut self, host: &str) -> Self {
        self.payload.host = Some(host.to_string());
        self
    }

    pub fn port(mut self, port: i32) -> Self {
        self.payload.port = Some(port);
        self
    }

    pub fn version(mut self, version: &str) -> Self {
        self.payload.version = Some(version.to_string());
        self
    }

    pub fn metadata(mut self, key: &str, value: &str) -> Self {
        self.payload.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> HeartbeatPayload {
        self.payload
    }

    /// Forme JSON telle qu'envoyée sur le fil (camelCase)
    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.payload).unwrap_or(Value::Null)
    }
}

impl Default for HeartbeatBuilder {
    fn default() -> Self {
        Self::new("orders", "i1")
    }
}

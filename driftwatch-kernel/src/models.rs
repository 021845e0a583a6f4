/**
 * MODÈLES - Entités manipulées par le moteur de réconciliation
 *
 * RÔLE : Payload de heartbeat (entrée), instance de service, service propriétaire,
 * événement de dérive. Les entités sont des valeurs immuables : une "mise à jour"
 * produit une nouvelle valeur via `Struct { champ, ..ancienne }`.
 */

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use time::OffsetDateTime;

/// Auteur des écritures faites par le moteur lui-même
pub const SYSTEM_ACTOR: &str = "system";

/// Heartbeat envoyé périodiquement par une instance applicative
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub service_name: String,
    pub instance_id: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<i32>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// Hash de la configuration actuellement appliquée
    #[serde(default)]
    pub config_hash: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl HeartbeatPayload {
    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(&self.service_name, &self.instance_id)
    }
}

/// Identité stable d'une instance : "service:instance".
/// `%` et `:` sont échappés dans chaque partie, la clé reste donc injective
/// même quand un nom contient le séparateur.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceKey(String);

impl InstanceKey {
    pub fn new(service_name: &str, instance_id: &str) -> Self {
        Self(format!("{}:{}", escape_part(service_name), escape_part(instance_id)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn escape_part(part: &str) -> String {
    part.replace('%', "%25").replace(':', "%3A")
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for InstanceKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Healthy,
    Drift,
    Unknown,
}

/// Un process en cours d'exécution d'un service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub id: InstanceKey,
    pub service_name: String,
    pub instance_id: String,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub environment: Option<String>,
    pub version: Option<String>,
    pub applied_hash: Option<String>,
    /// Dernier hash attendu connu
    pub expected_hash: Option<String>,
    pub status: InstanceStatus,
    /// `None` uniquement avant la première évaluation
    pub has_drift: Option<bool>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub drift_detected_at: Option<OffsetDateTime>,
    pub service_id: Option<String>,
    pub team_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub last_seen_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub created_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub updated_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    /// Instance vierge, jamais vue : HEALTHY, pas encore évaluée
    pub fn blank(service_name: &str, instance_id: &str) -> Self {
        Self {
            id: InstanceKey::new(service_name, instance_id),
            service_name: service_name.to_string(),
            instance_id: instance_id.to_string(),
            host: None,
            port: None,
            environment: None,
            version: None,
            applied_hash: None,
            expected_hash: None,
            status: InstanceStatus::Healthy,
            has_drift: None,
            drift_detected_at: None,
            service_id: None,
            team_id: None,
            last_seen_at: None,
            created_at: None,
            updated_at: None,
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Lifecycle {
    Active,
    Deprecated,
    Retired,
}

/// Service propriétaire d'un ensemble d'instances
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationService {
    /// Assigné par l'annuaire lors du premier `save` si absent
    pub id: Option<String>,
    pub display_name: String,
    /// `None` = service orphelin, en attente d'attribution
    pub owner_team_id: Option<String>,
    /// Ensemble trié et dédupliqué
    pub environments: BTreeSet<String>,
    pub lifecycle: Lifecycle,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub created_at: Option<OffsetDateTime>,
    pub created_by: Option<String>,
}

impl ApplicationService {
    pub fn is_orphaned(&self) -> bool {
        self.owner_team_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// DETECTED -> RESOLVED, jamais dans l'autre sens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftStatus {
    Detected,
    Resolved,
}

/// Une observation de dérive pour une instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriftEvent {
    pub id: String,
    pub service_name: String,
    pub instance_id: String,
    pub service_id: Option<String>,
    pub team_id: Option<String>,
    pub environment: Option<String>,
    pub expected_hash: String,
    pub applied_hash: String,
    pub severity: Severity,
    pub status: DriftStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub detected_at: OffsetDateTime,
    pub detected_by: String,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub resolved_at: Option<OffsetDateTime>,
    pub resolved_by: Option<String>,
    pub notes: Option<String>,
}

impl DriftEvent {
    pub fn is_unresolved(&self) -> bool {
        self.status == DriftStatus::Detected
    }

    /// Copie résolue ; un événement déjà résolu est renvoyé tel quel
    pub fn resolved(&self, resolved_by: &str, at: OffsetDateTime) -> Self {
        if !self.is_unresolved() {
            return self.clone();
        }
        Self {
            status: DriftStatus::Resolved,
            resolved_at: Some(at),
            resolved_by: Some(resolved_by.to_string()),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_key_format() {
        assert_eq!(InstanceKey::new("orders", "i1").as_str(), "orders:i1");
        assert_eq!(InstanceKey::new("a:b", "c%").as_str(), "a%3Ab:c%25");
    }

    #[test]
    fn test_instance_key_separator_in_names() {
        assert_ne!(InstanceKey::new("a:b", "c"), InstanceKey::new("a", "b:c"));
        assert_ne!(InstanceKey::new("a%3Ab", "c"), InstanceKey::new("a:b", "c"));
        // clé lue depuis un chemin HTTP = même forme que la clé dérivée
        assert_eq!(
            InstanceKey::from("a%3Ab:c".to_string()),
            InstanceKey::new("a:b", "c")
        );
    }

    #[test]
    fn test_payload_camel_case() {
        let raw = r#"{"serviceName":"orders","instanceId":"i1","configHash":"abc","port":8080}"#;
        let payload: HeartbeatPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.service_name, "orders");
        assert_eq!(payload.config_hash.as_deref(), Some("abc"));
        assert_eq!(payload.port, Some(8080));
        assert!(payload.metadata.is_empty());
    }

    #[test]
    fn test_resolved_is_one_way() {
        let now = OffsetDateTime::now_utc();
        let event = DriftEvent {
            id: "e1".into(),
            service_name: "orders".into(),
            instance_id: "i1".into(),
            service_id: None,
            team_id: None,
            environment: None,
            expected_hash: "xyz".into(),
            applied_hash: "abc".into(),
            severity: Severity::Medium,
            status: DriftStatus::Detected,
            detected_at: now,
            detected_by: SYSTEM_ACTOR.into(),
            resolved_at: None,
            resolved_by: None,
            notes: None,
        };
        let resolved = event.resolved("alice", now);
        assert_eq!(resolved.status, DriftStatus::Resolved);
        let again = resolved.resolved("bob", now);
        assert_eq!(again.resolved_by.as_deref(), Some("alice"));
    }
}

/**
 * PORTS COLLABORATEURS - Interfaces étroites vers les sous-systèmes externes
 *
 * RÔLE :
 * Le moteur ne connaît ni la base de données, ni l'annuaire des services, ni
 * l'autorité de configuration : il ne parle qu'à ces quatre traits.
 *
 * FONCTIONNEMENT :
 * - InstanceStore = lecture/écriture des instances par identité
 * - ServiceDirectory = services propriétaires, recherche par displayName
 * - DriftLedger = journal des événements de dérive (création, résolution en masse)
 * - ConfigAuthority = hash attendu + déclenchement d'un refresh distant
 *
 * Chaque appel peut faire de l'I/O réseau ; un échec remonte toujours en
 * `PortError` typée, jamais en `None` silencieux.
 */

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{ApplicationService, DriftEvent, InstanceKey, ServiceInstance};

/// Erreurs possibles lors des appels aux collaborateurs
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type PortResult<T> = Result<T, PortError>;

#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn find_by_id(&self, id: &InstanceKey) -> PortResult<Option<ServiceInstance>>;

    async fn save(&self, instance: ServiceInstance) -> PortResult<ServiceInstance>;

    /// Toutes les instances connues (pour l'API de lecture)
    async fn find_all(&self) -> PortResult<Vec<ServiceInstance>>;
}

#[async_trait]
pub trait ServiceDirectory: Send + Sync {
    /// Correspondance exacte sur le displayName
    async fn find_by_display_name(&self, name: &str) -> PortResult<Option<ApplicationService>>;

    /// Assigne un identifiant si absent
    async fn save(&self, service: ApplicationService) -> PortResult<ApplicationService>;
}

#[async_trait]
pub trait DriftLedger: Send + Sync {
    async fn save(&self, event: DriftEvent) -> PortResult<DriftEvent>;

    /// Résout tous les événements non résolus de (service, instance).
    /// Retourne le nombre d'événements résolus.
    async fn resolve_for_instance(
        &self,
        service_name: &str,
        instance_id: &str,
        resolved_by: &str,
    ) -> PortResult<usize>;

    async fn find_for_instance(
        &self,
        service_name: &str,
        instance_id: &str,
    ) -> PortResult<Vec<DriftEvent>>;
}

/// Réponse du mécanisme de re-synchronisation distant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshResponse {
    pub accepted: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[async_trait]
pub trait ConfigAuthority: Send + Sync {
    /// Hash que l'autorité considère correct pour (service, environnement)
    async fn effective_hash(
        &self,
        service_name: &str,
        environment: Option<&str>,
    ) -> PortResult<Option<String>>;

    /// Best-effort ; `destination` au format "service:instance"
    async fn trigger_refresh(&self, destination: &str) -> PortResult<RefreshResponse>;
}

/// Destination de refresh pour une instance
pub fn refresh_destination(service_name: &str, instance_id: &str) -> String {
    format!("{service_name}:{instance_id}")
}

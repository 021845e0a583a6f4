/**
 * MOTEUR DE RÉCONCILIATION - Point d'entrée unique `process_heartbeat`
 *
 * RÔLE : Orchestrer validation, liaison de service, mise à jour de l'instance,
 * hash attendu, machine à états de dérive et persistance.
 *
 * FLUX :
 * payload -> validate -> charge/initialise l'instance -> liaison au service
 * -> métadonnées runtime -> hash attendu (autorité) -> transition de dérive
 * -> save de l'instance -> signal d'invalidation de cache
 *
 * ERREURS :
 * - Validation : aucune écriture
 * - Configuration (autorité en échec) : aucune écriture instance/dérive
 * - Persistence : le store d'instances a échoué
 * Les échecs d'annuaire, du journal de dérive et du refresh sont absorbés plus bas.
 */

use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::backoff::{BackoffState, BackoffTracker};
use crate::drift::{DriftEvaluation, DriftStateMachine};
use crate::error::{KernelError, KernelResult};
use crate::health::HealthTracker;
use crate::linkage::ServiceLinkageResolver;
use crate::models::{
    ApplicationService, DriftEvent, HeartbeatPayload, InstanceKey, ServiceInstance,
};
use crate::ports::{ConfigAuthority, DriftLedger, InstanceStore, ServiceDirectory};
use crate::refresh::CorrectiveActionTrigger;
use crate::validation::validate;

/// Signal consultatif : l'instance et ses événements de dérive sont périmés en cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub instance_key: InstanceKey,
    pub service_name: String,
    pub instance_id: String,
}

/// Collaborateurs injectés dans le moteur
#[derive(Clone)]
pub struct Collaborators {
    pub instances: Arc<dyn InstanceStore>,
    pub services: Arc<dyn ServiceDirectory>,
    pub drift: Arc<dyn DriftLedger>,
    pub authority: Arc<dyn ConfigAuthority>,
}

pub struct ReconciliationEngine {
    instances: Arc<dyn InstanceStore>,
    drift_ledger: Arc<dyn DriftLedger>,
    authority: Arc<dyn ConfigAuthority>,
    linkage: ServiceLinkageResolver,
    drift: DriftStateMachine,
    backoff: Arc<BackoffTracker>,
    invalidations: broadcast::Sender<Invalidation>,
    health: Option<HealthTracker>,
}

impl ReconciliationEngine {
    pub fn new(
        collaborators: Collaborators,
        backoff: Arc<BackoffTracker>,
        default_environments: Vec<String>,
    ) -> Self {
        let (invalidations, _) = broadcast::channel(256);
        let refresh = CorrectiveActionTrigger::new(collaborators.authority.clone());
        Self {
            linkage: ServiceLinkageResolver::new(collaborators.services, default_environments),
            drift: DriftStateMachine::new(collaborators.drift.clone(), backoff.clone(), refresh),
            instances: collaborators.instances,
            drift_ledger: collaborators.drift,
            authority: collaborators.authority,
            backoff,
            invalidations,
            health: None,
        }
    }

    pub fn with_health(mut self, health: HealthTracker) -> Self {
        self.health = Some(health);
        self
    }

    /// Traite un heartbeat et renvoie l'instance telle que persistée
    pub async fn process_heartbeat(
        &self,
        payload: &HeartbeatPayload,
    ) -> KernelResult<ServiceInstance> {
        let result = self.reconcile(payload).await;
        if let Some(health) = &self.health {
            match &result {
                Ok((_, evaluation)) => {
                    health.record_accepted(evaluation.transition, evaluation.refresh_triggered)
                }
                Err(KernelError::Validation(_)) => health.record_rejected(),
                Err(_) => health.record_failed(),
            }
        }
        result.map(|(saved, _)| saved)
    }

    async fn reconcile(
        &self,
        payload: &HeartbeatPayload,
    ) -> KernelResult<(ServiceInstance, DriftEvaluation)> {
        let payload = validate(Some(payload))?;
        let key = payload.key();
        let environment = payload.environment.as_deref();
        let now = OffsetDateTime::now_utc();

        let existing = self
            .instances
            .find_by_id(&key)
            .await
            .map_err(KernelError::Persistence)?;

        let service = self
            .linkage
            .resolve(&payload.service_name, environment)
            .await
            .into_service();

        let (instance, first_heartbeat) = apply_heartbeat(existing, payload, &service, now);
        if first_heartbeat {
            info!(
                instance = %key,
                service_id = instance.service_id.as_deref().unwrap_or("-"),
                "registered new service instance"
            );
        }

        let expected = self
            .authority
            .effective_hash(&payload.service_name, environment)
            .await
            .map_err(|source| KernelError::Configuration {
                service: payload.service_name.clone(),
                environment: environment.unwrap_or("-").to_string(),
                source,
            })?;

        let evaluation = self.drift.evaluate(instance, expected, now).await;
        let saved = self
            .instances
            .save(evaluation.instance.clone())
            .await
            .map_err(KernelError::Persistence)?;

        debug!(
            instance = %key,
            transition = ?evaluation.transition,
            status = ?saved.status,
            "heartbeat processed"
        );
        self.announce(&saved);
        Ok((saved, evaluation))
    }

    fn announce(&self, instance: &ServiceInstance) {
        // pas d'abonné = pas de cache devant le moteur
        let _ = self.invalidations.send(Invalidation {
            instance_key: instance.id.clone(),
            service_name: instance.service_name.clone(),
            instance_id: instance.instance_id.clone(),
        });
    }

    pub fn subscribe_invalidations(&self) -> broadcast::Receiver<Invalidation> {
        self.invalidations.subscribe()
    }

    pub async fn instance(&self, key: &InstanceKey) -> KernelResult<Option<ServiceInstance>> {
        self.instances
            .find_by_id(key)
            .await
            .map_err(KernelError::Persistence)
    }

    pub async fn instances(&self) -> KernelResult<Vec<ServiceInstance>> {
        self.instances.find_all().await.map_err(KernelError::Persistence)
    }

    pub async fn drift_events(
        &self,
        service_name: &str,
        instance_id: &str,
    ) -> KernelResult<Vec<DriftEvent>> {
        self.drift_ledger
            .find_for_instance(service_name, instance_id)
            .await
            .map_err(KernelError::Persistence)
    }

    pub fn backoff_snapshot(&self, key: &InstanceKey) -> Option<BackoffState> {
        self.backoff.snapshot(key)
    }

    pub fn backoff_entries(&self) -> usize {
        self.backoff.len()
    }
}

/// Met à jour l'instance avec les données runtime du heartbeat.
/// Renvoie aussi `true` s'il s'agit du premier heartbeat vu pour cette instance.
pub fn apply_heartbeat(
    existing: Option<ServiceInstance>,
    payload: &HeartbeatPayload,
    service: &ApplicationService,
    now: OffsetDateTime,
) -> (ServiceInstance, bool) {
    let base = existing
        .unwrap_or_else(|| ServiceInstance::blank(&payload.service_name, &payload.instance_id));
    let first_heartbeat = base.created_at.is_none();

    let instance = ServiceInstance {
        created_at: base.created_at.or(Some(now)),
        host: payload.host.clone(),
        port: payload.port,
        environment: payload.environment.clone(),
        version: payload.version.clone(),
        applied_hash: payload.config_hash.clone(),
        last_seen_at: Some(now),
        updated_at: Some(now),
        metadata: payload.metadata.clone(),
        // la propriété suit le service à chaque heartbeat
        service_id: service.id.clone(),
        team_id: service.owner_team_id.clone(),
        ..base
    };
    (instance, first_heartbeat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstanceStatus, Lifecycle};
    use std::collections::{BTreeSet, HashMap};

    fn service(id: &str, team: Option<&str>) -> ApplicationService {
        ApplicationService {
            id: Some(id.into()),
            display_name: "orders".into(),
            owner_team_id: team.map(str::to_string),
            environments: BTreeSet::new(),
            lifecycle: Lifecycle::Active,
            created_at: None,
            created_by: None,
        }
    }

    fn payload() -> HeartbeatPayload {
        HeartbeatPayload {
            service_name: "orders".into(),
            instance_id: "i1".into(),
            host: Some("10.0.0.4".into()),
            port: Some(8080),
            environment: Some("prod".into()),
            version: Some("1.4.2".into()),
            config_hash: Some("abc".into()),
            metadata: HashMap::from([("zone".to_string(), "eu-1".to_string())]),
        }
    }

    #[test]
    fn test_first_heartbeat_initialises() {
        let now = OffsetDateTime::now_utc();
        let (instance, first) = apply_heartbeat(None, &payload(), &service("svc-1", None), now);
        assert!(first);
        assert_eq!(instance.id.as_str(), "orders:i1");
        assert_eq!(instance.status, InstanceStatus::Healthy);
        assert_eq!(instance.has_drift, None);
        assert_eq!(instance.created_at, Some(now));
        assert_eq!(instance.applied_hash.as_deref(), Some("abc"));
        assert_eq!(instance.service_id.as_deref(), Some("svc-1"));
        assert_eq!(instance.team_id, None);
        assert_eq!(instance.metadata.get("zone").map(String::as_str), Some("eu-1"));
    }

    #[test]
    fn test_runtime_fields_overwritten_and_owner_synced() {
        let t0 = OffsetDateTime::now_utc();
        let (first, _) = apply_heartbeat(None, &payload(), &service("svc-1", None), t0);

        let later = t0 + time::Duration::seconds(30);
        let next = HeartbeatPayload {
            host: None,
            config_hash: Some("def".into()),
            metadata: HashMap::new(),
            ..payload()
        };
        let (second, is_first) =
            apply_heartbeat(Some(first), &next, &service("svc-1", Some("team-a")), later);

        assert!(!is_first);
        assert_eq!(second.created_at, Some(t0));
        assert_eq!(second.last_seen_at, Some(later));
        assert_eq!(second.host, None);
        assert_eq!(second.applied_hash.as_deref(), Some("def"));
        assert!(second.metadata.is_empty());
        assert_eq!(second.team_id.as_deref(), Some("team-a"));
    }
}

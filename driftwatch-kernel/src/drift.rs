/**
 * MACHINE À ÉTATS DE DÉRIVE - Une transition par heartbeat
 *
 * RÔLE :
 * Comparer le hash appliqué (rapporté par l'instance) au hash attendu (autorité de
 * configuration) et faire évoluer l'état de l'instance + ses effets de bord.
 *
 * TRANSITIONS :
 * - Unknown    : un des deux hash manque -> UNKNOWN, hasDrift=false, backoff effacé
 * - Detected   : pas de dérive avant, hash différents -> DRIFT, événement DETECTED,
 *                refresh correctif, backoff initialisé
 * - Resolved   : dérive avant, hash égaux -> HEALTHY, événements résolus, backoff retiré
 * - Steady     : pas de dérive, hash égaux -> HEALTHY, résolution défensive des restes
 * - Persistent : dérive toujours là -> refresh seulement quand le backoff le permet
 *
 * Le statut n'est réaffirmé à DRIFT que sur Detected, pas à chaque tick Persistent.
 * Les échecs du journal de dérive sont logués et n'interrompent jamais la transition.
 */

use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backoff::BackoffTracker;
use crate::models::{
    DriftEvent, DriftStatus, InstanceStatus, ServiceInstance, Severity, SYSTEM_ACTOR,
};
use crate::ports::DriftLedger;
use crate::refresh::CorrectiveActionTrigger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftTransition {
    Unknown,
    Detected,
    Resolved,
    Steady,
    Persistent,
}

impl DriftTransition {
    /// Décide la transition ; un hash vide compte comme absent
    pub fn classify(
        prior_has_drift: Option<bool>,
        expected: Option<&str>,
        applied: Option<&str>,
    ) -> Self {
        let (Some(expected), Some(applied)) = (non_blank(expected), non_blank(applied)) else {
            return Self::Unknown;
        };
        let drifted_before = prior_has_drift == Some(true);
        match (drifted_before, expected == applied) {
            (false, false) => Self::Detected,
            (true, true) => Self::Resolved,
            (false, true) => Self::Steady,
            (true, false) => Self::Persistent,
        }
    }
}

fn non_blank(hash: Option<&str>) -> Option<&str> {
    hash.filter(|h| !h.trim().is_empty())
}

/// Résultat d'une évaluation : nouvelle valeur de l'instance + ce qui s'est passé
#[derive(Debug, Clone)]
pub struct DriftEvaluation {
    pub instance: ServiceInstance,
    pub transition: DriftTransition,
    pub refresh_triggered: bool,
}

pub struct DriftStateMachine {
    ledger: Arc<dyn DriftLedger>,
    backoff: Arc<BackoffTracker>,
    refresh: CorrectiveActionTrigger,
}

impl DriftStateMachine {
    pub fn new(
        ledger: Arc<dyn DriftLedger>,
        backoff: Arc<BackoffTracker>,
        refresh: CorrectiveActionTrigger,
    ) -> Self {
        Self {
            ledger,
            backoff,
            refresh,
        }
    }

    /// Applique la transition ; le hash appliqué est celui déjà porté par `instance`
    pub async fn evaluate(
        &self,
        instance: ServiceInstance,
        expected_hash: Option<String>,
        now: OffsetDateTime,
    ) -> DriftEvaluation {
        let transition = DriftTransition::classify(
            instance.has_drift,
            expected_hash.as_deref(),
            instance.applied_hash.as_deref(),
        );
        let key = instance.id.clone();
        let mut refresh_triggered = false;

        let instance = match transition {
            DriftTransition::Unknown => {
                debug!(instance = %key, "expected or applied hash missing, drift state unknown");
                self.backoff.remove(&key);
                ServiceInstance {
                    status: InstanceStatus::Unknown,
                    has_drift: Some(false),
                    ..instance
                }
            }
            DriftTransition::Detected => {
                let drifted = ServiceInstance {
                    has_drift: Some(true),
                    drift_detected_at: Some(now),
                    status: InstanceStatus::Drift,
                    expected_hash: expected_hash.clone(),
                    ..instance
                };
                info!(
                    instance = %key,
                    expected = drifted.expected_hash.as_deref().unwrap_or(""),
                    applied = drifted.applied_hash.as_deref().unwrap_or(""),
                    "configuration drift detected"
                );
                self.record_detection(&drifted, now).await;
                refresh_triggered = self
                    .refresh
                    .trigger_refresh(&drifted.service_name, &drifted.instance_id)
                    .await;
                self.backoff.reset(&key);
                drifted
            }
            DriftTransition::Resolved => {
                info!(instance = %key, "configuration drift resolved");
                self.resolve_events(&instance).await;
                self.backoff.remove(&key);
                ServiceInstance {
                    has_drift: Some(false),
                    drift_detected_at: None,
                    status: InstanceStatus::Healthy,
                    ..instance
                }
            }
            DriftTransition::Steady => {
                // événements restés ouverts d'une vie précédente du process
                self.resolve_events(&instance).await;
                self.backoff.remove(&key);
                ServiceInstance {
                    has_drift: Some(false),
                    status: InstanceStatus::Healthy,
                    ..instance
                }
            }
            DriftTransition::Persistent => {
                if self.backoff.bump_if_threshold(&key) {
                    debug!(instance = %key, "backoff threshold reached, re-triggering refresh");
                    refresh_triggered = self
                        .refresh
                        .trigger_refresh(&instance.service_name, &instance.instance_id)
                        .await;
                }
                instance
            }
        };

        DriftEvaluation {
            instance,
            transition,
            refresh_triggered,
        }
    }

    async fn record_detection(&self, instance: &ServiceInstance, now: OffsetDateTime) {
        let expected = instance.expected_hash.clone().unwrap_or_default();
        let applied = instance.applied_hash.clone().unwrap_or_default();
        let event = DriftEvent {
            id: Uuid::new_v4().to_string(),
            service_name: instance.service_name.clone(),
            instance_id: instance.instance_id.clone(),
            service_id: instance.service_id.clone(),
            team_id: instance.team_id.clone(),
            environment: instance.environment.clone(),
            notes: Some(format!(
                "Drift detected via heartbeat: expected {expected}, applied {applied}"
            )),
            expected_hash: expected,
            applied_hash: applied,
            severity: Severity::Medium,
            status: DriftStatus::Detected,
            detected_at: now,
            detected_by: SYSTEM_ACTOR.to_string(),
            resolved_at: None,
            resolved_by: None,
        };
        if let Err(e) = self.ledger.save(event).await {
            warn!(instance = %instance.id, error = %e, "failed to record drift event");
        }
    }

    async fn resolve_events(&self, instance: &ServiceInstance) {
        match self
            .ledger
            .resolve_for_instance(&instance.service_name, &instance.instance_id, SYSTEM_ACTOR)
            .await
        {
            Ok(0) => {}
            Ok(count) => info!(instance = %instance.id, count, "resolved drift events"),
            Err(e) => warn!(instance = %instance.id, error = %e, "failed to resolve drift events"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffState;
    use crate::ports::memory::MemoryDriftLedger;
    use crate::ports::{ConfigAuthority, PortResult, RefreshResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_classify_table() {
        use DriftTransition::*;
        assert_eq!(DriftTransition::classify(None, None, Some("abc")), Unknown);
        assert_eq!(DriftTransition::classify(Some(true), Some("abc"), None), Unknown);
        assert_eq!(DriftTransition::classify(None, Some(""), Some("abc")), Unknown);
        assert_eq!(DriftTransition::classify(None, Some("xyz"), Some("abc")), Detected);
        assert_eq!(DriftTransition::classify(Some(false), Some("xyz"), Some("abc")), Detected);
        assert_eq!(DriftTransition::classify(Some(true), Some("abc"), Some("abc")), Resolved);
        assert_eq!(DriftTransition::classify(None, Some("abc"), Some("abc")), Steady);
        assert_eq!(DriftTransition::classify(Some(true), Some("xyz"), Some("abc")), Persistent);
    }

    #[derive(Default)]
    struct CountingAuthority {
        refreshes: AtomicUsize,
    }

    #[async_trait]
    impl ConfigAuthority for CountingAuthority {
        async fn effective_hash(&self, _: &str, _: Option<&str>) -> PortResult<Option<String>> {
            Ok(None)
        }

        async fn trigger_refresh(&self, _: &str) -> PortResult<RefreshResponse> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(RefreshResponse {
                accepted: true,
                message: None,
            })
        }
    }

    fn machine() -> (DriftStateMachine, MemoryDriftLedger, Arc<BackoffTracker>, Arc<CountingAuthority>) {
        let ledger = MemoryDriftLedger::new();
        let backoff = Arc::new(BackoffTracker::new());
        let authority = Arc::new(CountingAuthority::default());
        let sm = DriftStateMachine::new(
            Arc::new(ledger.clone()),
            backoff.clone(),
            CorrectiveActionTrigger::new(authority.clone()),
        );
        (sm, ledger, backoff, authority)
    }

    fn instance(applied: Option<&str>) -> ServiceInstance {
        ServiceInstance {
            applied_hash: applied.map(str::to_string),
            ..ServiceInstance::blank("orders", "i1")
        }
    }

    #[tokio::test]
    async fn test_detection_effects() {
        let (sm, ledger, backoff, authority) = machine();
        let now = OffsetDateTime::now_utc();
        let eval = sm.evaluate(instance(Some("abc")), Some("xyz".into()), now).await;

        assert_eq!(eval.transition, DriftTransition::Detected);
        assert!(eval.refresh_triggered);
        assert_eq!(eval.instance.status, InstanceStatus::Drift);
        assert_eq!(eval.instance.has_drift, Some(true));
        assert_eq!(eval.instance.drift_detected_at, Some(now));
        assert_eq!(eval.instance.expected_hash.as_deref(), Some("xyz"));
        assert_eq!(ledger.all().len(), 1);
        assert_eq!(authority.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(backoff.snapshot(&eval.instance.id), Some(BackoffState::JUST_DETECTED));
    }

    #[tokio::test]
    async fn test_unknown_clears_backoff() {
        let (sm, _, backoff, _) = machine();
        let key = instance(None).id;
        backoff.reset(&key);
        let eval = sm
            .evaluate(instance(None), Some("xyz".into()), OffsetDateTime::now_utc())
            .await;
        assert_eq!(eval.instance.status, InstanceStatus::Unknown);
        assert_eq!(eval.instance.has_drift, Some(false));
        assert!(backoff.snapshot(&key).is_none());
    }

    #[tokio::test]
    async fn test_steady_clears_backoff_and_leftovers() {
        let (sm, ledger, backoff, authority) = machine();
        let leftover = sm
            .evaluate(instance(Some("abc")), Some("xyz".into()), OffsetDateTime::now_utc())
            .await;
        assert!(backoff.snapshot(&leftover.instance.id).is_some());

        let steady = ServiceInstance {
            has_drift: Some(false),
            ..instance(Some("xyz"))
        };
        let eval = sm
            .evaluate(steady, Some("xyz".into()), OffsetDateTime::now_utc())
            .await;

        assert_eq!(eval.transition, DriftTransition::Steady);
        assert_eq!(eval.instance.status, InstanceStatus::Healthy);
        assert!(!eval.refresh_triggered);
        assert!(backoff.snapshot(&eval.instance.id).is_none());
        assert!(ledger.all().iter().all(|e| !e.is_unresolved()));
        assert_eq!(authority.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persistent_tick_keeps_status() {
        let (sm, ledger, _, authority) = machine();
        let drifted = ServiceInstance {
            has_drift: Some(true),
            // statut modifié ailleurs : il n'est pas réaffirmé
            status: InstanceStatus::Healthy,
            ..instance(Some("abc"))
        };
        let eval = sm
            .evaluate(drifted, Some("xyz".into()), OffsetDateTime::now_utc())
            .await;
        assert_eq!(eval.transition, DriftTransition::Persistent);
        assert_eq!(eval.instance.status, InstanceStatus::Healthy);
        assert_eq!(eval.instance.has_drift, Some(true));
        assert!(ledger.all().is_empty());
        // aucune entrée de backoff (redémarrage) : le premier tick déclenche
        assert_eq!(authority.refreshes.load(Ordering::SeqCst), 1);
    }
}

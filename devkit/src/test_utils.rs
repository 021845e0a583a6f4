/*!
Test Harness pour le moteur de réconciliation

Facilite l'écriture de tests avec:
- Moteur complet câblé sur les stubs (backoff partagé observable)
- Envoi de heartbeats et assertions sur l'état persisté
- Compteurs d'écritures pour vérifier l'absence d'effets de bord
*/

use crate::heartbeat::HeartbeatBuilder;
use crate::stubs::{StubAuthority, StubDriftLedger, StubInstanceStore, StubServiceDirectory};
use anyhow::Result;
use driftwatch_kernel::models::{DriftEvent, DriftStatus, InstanceKey, InstanceStatus, ServiceInstance};
use driftwatch_kernel::{BackoffTracker, Collaborators, KernelResult, ReconciliationEngine};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Harness de test complet autour du moteur
pub struct TestHarness {
    pub instances: StubInstanceStore,
    pub services: StubServiceDirectory,
    pub ledger: StubDriftLedger,
    pub authority: StubAuthority,
    pub backoff: Arc<BackoffTracker>,
    pub engine: ReconciliationEngine,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_default_environments(vec!["default".to_string()])
    }

    pub fn with_default_environments(default_environments: Vec<String>) -> Self {
        init_tracing();

        let instances = StubInstanceStore::new();
        let services = StubServiceDirectory::new();
        let ledger = StubDriftLedger::new();
        let authority = StubAuthority::new();
        let backoff = Arc::new(BackoffTracker::new());

        let engine = ReconciliationEngine::new(
            Collaborators {
                instances: Arc::new(instances.clone()),
                services: Arc::new(services.clone()),
                drift: Arc::new(ledger.clone()),
                authority: Arc::new(authority.clone()),
            },
            backoff.clone(),
            default_environments,
        );

        Self {
            instances,
            services,
            ledger,
            authority,
            backoff,
            engine,
        }
    }

    pub async fn send(&self, heartbeat: HeartbeatBuilder) -> KernelResult<ServiceInstance> {
        self.engine.process_heartbeat(&heartbeat.build()).await
    }

    /// Envoie `n` fois le même heartbeat ; s'arrête à la première erreur
    pub async fn send_repeated(&self, heartbeat: &HeartbeatBuilder, n: usize) -> Result<()> {
        for _ in 0..n {
            self.send(heartbeat.clone()).await?;
        }
        Ok(())
    }

    pub fn stored(&self, service_name: &str, instance_id: &str) -> Option<ServiceInstance> {
        self.instances.get(&InstanceKey::new(service_name, instance_id))
    }

    pub fn events_for(&self, service_name: &str, instance_id: &str) -> Vec<DriftEvent> {
        self.ledger
            .events()
            .into_iter()
            .filter(|e| e.service_name == service_name && e.instance_id == instance_id)
            .collect()
    }

    pub fn refresh_count(&self) -> usize {
        self.authority.refresh_calls().len()
    }

    /// Total des écritures observables (instances + journal de dérive)
    pub fn write_count(&self) -> usize {
        self.instances.write_count() + self.ledger.write_count()
    }

    pub fn assert_status(
        &self,
        service_name: &str,
        instance_id: &str,
        expected: InstanceStatus,
    ) -> Result<()> {
        let Some(instance) = self.stored(service_name, instance_id) else {
            anyhow::bail!("instance {service_name}:{instance_id} was never persisted");
        };
        if instance.status != expected {
            anyhow::bail!(
                "status mismatch for {}: expected {:?}, got {:?}",
                instance.id,
                expected,
                instance.status
            );
        }
        Ok(())
    }

    pub fn assert_open_events(
        &self,
        service_name: &str,
        instance_id: &str,
        expected: usize,
    ) -> Result<()> {
        let open = self
            .events_for(service_name, instance_id)
            .iter()
            .filter(|e| e.status == DriftStatus::Detected)
            .count();
        if open != expected {
            anyhow::bail!("expected {expected} open drift events for {service_name}:{instance_id}, got {open}");
        }
        Ok(())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn init_tracing() {
    // déjà initialisé par un autre test du même binaire = ok
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// Macro pour écrire un test async autour d'un `TestHarness` neuf.
/// Le corps renvoie `anyhow::Result<()>`.
#[macro_export]
macro_rules! engine_test {
    ($name:ident, |$harness:ident| $body:block) => {
        #[tokio::test]
        async fn $name() {
            let $harness = $crate::test_utils::TestHarness::new();
            let result = async {
                let outcome: ::anyhow::Result<()> = $body;
                outcome
            }
            .await;
            if let Err(e) = result {
                panic!("Test '{}' failed: {}", stringify!($name), e);
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_harness_records_writes() {
        let harness = TestHarness::new();
        harness.authority.expect_hash(Some("abc"));

        let saved = harness
            .send(HeartbeatBuilder::default().config_hash("abc"))
            .await
            .unwrap();

        assert_eq!(saved.status, InstanceStatus::Healthy);
        assert_eq!(harness.instances.write_count(), 1);
        harness.assert_status("orders", "i1", InstanceStatus::Healthy).unwrap();
        assert!(harness.assert_status("orders", "i2", InstanceStatus::Healthy).is_err());
    }

    engine_test!(test_macro_runs_body, |harness| {
        harness.authority.expect_hash(Some("xyz"));
        harness.send(HeartbeatBuilder::default().config_hash("abc")).await?;
        harness.assert_status("orders", "i1", InstanceStatus::Drift)?;
        harness.assert_open_events("orders", "i1", 1)?;
        Ok(())
    });
}

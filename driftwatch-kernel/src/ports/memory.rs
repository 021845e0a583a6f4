/**
 * PORTS EN MÉMOIRE - Implémentations in-process des collaborateurs
 *
 * RÔLE :
 * Backends utilisés par le binaire du kernel quand aucun stockage externe n'est
 * branché. Cohérence read-your-writes par identité d'instance.
 *
 * FONCTIONNEMENT :
 * - MemoryInstanceStore : map clé -> instance, snapshot JSON sur disque (load/flush)
 * - MemoryServiceDirectory : services indexés par displayName, UUID v4 assigné au save
 * - MemoryDriftLedger : événements en liste, résolution en masse par (service, instance)
 */

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{DriftLedger, InstanceStore, PortResult, ServiceDirectory};
use crate::models::{ApplicationService, DriftEvent, InstanceKey, ServiceInstance};

type Shared<T> = Arc<parking_lot::Mutex<T>>;

pub type InstancesMap = HashMap<InstanceKey, ServiceInstance>;

#[derive(Clone, Default)]
pub struct MemoryInstanceStore {
    instances: Shared<InstancesMap>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store adossé à un fichier JSON (chargé au démarrage, flush périodique)
    pub fn with_snapshot<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            instances: Shared::default(),
            snapshot_path: Some(path.into()),
        }
    }

    /// Charge le snapshot ; fichier absent = démarrage à vide
    pub async fn load(&self) -> PortResult<usize> {
        let Some(path) = &self.snapshot_path else { return Ok(0) };
        if !Path::new(path).exists() {
            info!(path = %path.display(), "no instance snapshot, starting fresh");
            return Ok(0);
        }

        let content = tokio::fs::read_to_string(path).await?;
        let list: Vec<ServiceInstance> = if content.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&content)?
        };

        let mut map = self.instances.lock();
        map.clear();
        for instance in list {
            map.insert(instance.id.clone(), instance);
        }
        info!(count = map.len(), path = %path.display(), "loaded instance snapshot");
        Ok(map.len())
    }

    /// Écrit le snapshot JSON (no-op sans chemin configuré)
    pub async fn flush(&self) -> PortResult<()> {
        let Some(path) = &self.snapshot_path else { return Ok(()) };
        let content = {
            let map = self.instances.lock();
            let mut list: Vec<&ServiceInstance> = map.values().collect();
            list.sort_by(|a, b| a.id.cmp(&b.id));
            serde_json::to_string_pretty(&list)?
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content).await?;
        debug!(path = %path.display(), "flushed instance snapshot");
        Ok(())
    }

    /// Flush périodique du snapshot en tâche de fond
    pub fn spawn_flusher(&self, interval_secs: u64) {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            loop {
                interval.tick().await;
                if let Err(e) = store.flush().await {
                    warn!(error = %e, "failed to flush instance snapshot");
                }
            }
        });
    }

    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn find_by_id(&self, id: &InstanceKey) -> PortResult<Option<ServiceInstance>> {
        Ok(self.instances.lock().get(id).cloned())
    }

    async fn save(&self, instance: ServiceInstance) -> PortResult<ServiceInstance> {
        self.instances.lock().insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    async fn find_all(&self) -> PortResult<Vec<ServiceInstance>> {
        let mut list: Vec<ServiceInstance> = self.instances.lock().values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }
}

#[derive(Clone, Default)]
pub struct MemoryServiceDirectory {
    // displayName -> service
    services: Shared<HashMap<String, ApplicationService>>,
}

impl MemoryServiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<ApplicationService> {
        let mut list: Vec<ApplicationService> = self.services.lock().values().cloned().collect();
        list.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        list
    }
}

#[async_trait]
impl ServiceDirectory for MemoryServiceDirectory {
    async fn find_by_display_name(&self, name: &str) -> PortResult<Option<ApplicationService>> {
        Ok(self.services.lock().get(name).cloned())
    }

    /// Une création (sans id) qui perd la course contre une autre création du même
    /// displayName renvoie le service déjà enregistré, pour que toutes les
    /// instances pointent sur un seul identifiant.
    async fn save(&self, service: ApplicationService) -> PortResult<ApplicationService> {
        let mut services = self.services.lock();
        if service.id.is_none() {
            if let Some(existing) = services.get(&service.display_name) {
                return Ok(existing.clone());
            }
        }
        let saved = ApplicationService {
            id: service.id.clone().or_else(|| Some(Uuid::new_v4().to_string())),
            ..service
        };
        services.insert(saved.display_name.clone(), saved.clone());
        Ok(saved)
    }
}

#[derive(Clone, Default)]
pub struct MemoryDriftLedger {
    events: Shared<Vec<DriftEvent>>,
}

impl MemoryDriftLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<DriftEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl DriftLedger for MemoryDriftLedger {
    async fn save(&self, event: DriftEvent) -> PortResult<DriftEvent> {
        let mut events = self.events.lock();
        match events.iter_mut().find(|e| e.id == event.id) {
            Some(existing) => *existing = event.clone(),
            None => events.push(event.clone()),
        }
        Ok(event)
    }

    async fn resolve_for_instance(
        &self,
        service_name: &str,
        instance_id: &str,
        resolved_by: &str,
    ) -> PortResult<usize> {
        let now = OffsetDateTime::now_utc();
        let mut events = self.events.lock();
        let mut resolved = 0;
        for event in events.iter_mut().filter(|e| {
            e.is_unresolved() && e.service_name == service_name && e.instance_id == instance_id
        }) {
            *event = event.resolved(resolved_by, now);
            resolved += 1;
        }
        Ok(resolved)
    }

    async fn find_for_instance(
        &self,
        service_name: &str,
        instance_id: &str,
    ) -> PortResult<Vec<DriftEvent>> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.service_name == service_name && e.instance_id == instance_id)
            .cloned()
            .collect())
    }
}

/// Regroupe les trois stores en mémoire partagés par le kernel
#[derive(Clone, Default)]
pub struct MemoryBackends {
    pub instances: MemoryInstanceStore,
    pub services: MemoryServiceDirectory,
    pub drift: MemoryDriftLedger,
}

impl MemoryBackends {
    pub fn with_snapshot<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            instances: MemoryInstanceStore::with_snapshot(path),
            ..Self::default()
        }
    }

    pub fn instance_store(&self) -> Arc<dyn InstanceStore> {
        Arc::new(self.instances.clone())
    }

    pub fn service_directory(&self) -> Arc<dyn ServiceDirectory> {
        Arc::new(self.services.clone())
    }

    pub fn drift_ledger(&self) -> Arc<dyn DriftLedger> {
        Arc::new(self.drift.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DriftStatus, Lifecycle, Severity, SYSTEM_ACTOR};
    use std::collections::BTreeSet;

    fn event(id: &str, service: &str, instance: &str) -> DriftEvent {
        DriftEvent {
            id: id.into(),
            service_name: service.into(),
            instance_id: instance.into(),
            service_id: None,
            team_id: None,
            environment: None,
            expected_hash: "xyz".into(),
            applied_hash: "abc".into(),
            severity: Severity::Medium,
            status: DriftStatus::Detected,
            detected_at: OffsetDateTime::now_utc(),
            detected_by: SYSTEM_ACTOR.into(),
            resolved_at: None,
            resolved_by: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_directory_assigns_id() {
        let dir = MemoryServiceDirectory::new();
        let saved = dir
            .save(ApplicationService {
                id: None,
                display_name: "orders".into(),
                owner_team_id: None,
                environments: BTreeSet::new(),
                lifecycle: Lifecycle::Active,
                created_at: None,
                created_by: None,
            })
            .await
            .unwrap();
        assert!(saved.id.is_some());
        let found = dir.find_by_display_name("orders").await.unwrap().unwrap();
        assert_eq!(found.id, saved.id);
    }

    #[tokio::test]
    async fn test_racing_creations_share_one_service() {
        let dir = MemoryServiceDirectory::new();
        let orphan = |team: Option<&str>| ApplicationService {
            id: None,
            display_name: "orders".into(),
            owner_team_id: team.map(str::to_string),
            environments: BTreeSet::new(),
            lifecycle: Lifecycle::Active,
            created_at: None,
            created_by: None,
        };

        let first = dir.save(orphan(None)).await.unwrap();
        let second = dir.save(orphan(Some("team-x"))).await.unwrap();

        assert_eq!(second, first);
        assert_eq!(dir.all().len(), 1);

        // une mise à jour avec id remplace bien l'enregistrement
        let merged = dir
            .save(ApplicationService {
                environments: BTreeSet::from(["prod".to_string()]),
                ..first.clone()
            })
            .await
            .unwrap();
        assert_eq!(merged.id, first.id);
        assert_eq!(dir.all()[0].environments.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_is_scoped_to_instance() {
        let ledger = MemoryDriftLedger::new();
        ledger.save(event("e1", "orders", "i1")).await.unwrap();
        ledger.save(event("e2", "orders", "i1")).await.unwrap();
        ledger.save(event("e3", "orders", "i2")).await.unwrap();

        let count = ledger.resolve_for_instance("orders", "i1", "system").await.unwrap();
        assert_eq!(count, 2);

        let other = ledger.find_for_instance("orders", "i2").await.unwrap();
        assert!(other[0].is_unresolved());
        // deuxième passage : rien à résoudre
        assert_eq!(ledger.resolve_for_instance("orders", "i1", "system").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("instances.json");

        let store = MemoryInstanceStore::with_snapshot(&path);
        store.save(ServiceInstance::blank("orders", "i1")).await.unwrap();
        store.flush().await.unwrap();

        let reloaded = MemoryInstanceStore::with_snapshot(&path);
        assert_eq!(reloaded.load().await.unwrap(), 1);
        let found = reloaded
            .find_by_id(&InstanceKey::new("orders", "i1"))
            .await
            .unwrap();
        assert!(found.is_some());
    }
}

/*!
Stubs des collaborateurs du moteur pour tests sans backend

Chaque stub enregistre les appels reçus et peut simuler une panne à la demande,
ce qui permet de vérifier qu'un chemin d'erreur n'a laissé aucune écriture.
*/

use async_trait::async_trait;
use driftwatch_kernel::models::{ApplicationService, DriftEvent, InstanceKey, ServiceInstance};
use driftwatch_kernel::ports::{
    ConfigAuthority, DriftLedger, InstanceStore, PortError, PortResult, RefreshResponse,
    ServiceDirectory,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Interrupteur de panne partagé entre le test et le stub
#[derive(Clone, Default)]
pub struct Fault(Arc<AtomicBool>);

impl Fault {
    pub fn set(&self, failing: bool) {
        self.0.store(failing, Ordering::SeqCst);
    }

    pub fn check(&self, what: &str) -> PortResult<()> {
        if self.0.load(Ordering::SeqCst) {
            return Err(PortError::Backend(format!("injected failure: {what}")));
        }
        Ok(())
    }
}

// ----- Instance store -----

#[derive(Clone, Default)]
pub struct StubInstanceStore {
    instances: Arc<Mutex<HashMap<InstanceKey, ServiceInstance>>>,
    writes: Arc<AtomicUsize>,
    pub fail_reads: Fault,
    pub fail_writes: Fault,
}

impl StubInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pré-remplit le store sans compter d'écriture
    pub fn seed(&self, instance: ServiceInstance) {
        self.instances.lock().insert(instance.id.clone(), instance);
    }

    pub fn get(&self, key: &InstanceKey) -> Option<ServiceInstance> {
        self.instances.lock().get(key).cloned()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InstanceStore for StubInstanceStore {
    async fn find_by_id(&self, id: &InstanceKey) -> PortResult<Option<ServiceInstance>> {
        self.fail_reads.check("instance lookup")?;
        Ok(self.get(id))
    }

    async fn save(&self, instance: ServiceInstance) -> PortResult<ServiceInstance> {
        self.fail_writes.check("instance save")?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.instances.lock().insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    async fn find_all(&self) -> PortResult<Vec<ServiceInstance>> {
        self.fail_reads.check("instance listing")?;
        Ok(self.instances.lock().values().cloned().collect())
    }
}

// ----- Service directory -----

#[derive(Clone, Default)]
pub struct StubServiceDirectory {
    services: Arc<Mutex<Vec<ApplicationService>>>,
    next_id: Arc<AtomicUsize>,
    lookups: Arc<AtomicUsize>,
    pub fail_lookups: Fault,
    pub fail_saves: Fault,
}

impl StubServiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, service: ApplicationService) {
        self.services.lock().push(service);
    }

    pub fn all(&self) -> Vec<ApplicationService> {
        self.services.lock().clone()
    }

    pub fn by_name(&self, name: &str) -> Option<ApplicationService> {
        self.services.lock().iter().find(|s| s.display_name == name).cloned()
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Change le propriétaire d'un service déjà enregistré
    pub fn assign_owner(&self, name: &str, team_id: &str) {
        let mut services = self.services.lock();
        for service in services.iter_mut().filter(|s| s.display_name == name) {
            *service = ApplicationService {
                owner_team_id: Some(team_id.to_string()),
                ..service.clone()
            };
        }
    }
}

#[async_trait]
impl ServiceDirectory for StubServiceDirectory {
    async fn find_by_display_name(&self, name: &str) -> PortResult<Option<ApplicationService>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.fail_lookups.check("service lookup")?;
        Ok(self.by_name(name))
    }

    async fn save(&self, service: ApplicationService) -> PortResult<ApplicationService> {
        self.fail_saves.check("service save")?;
        // même règle que l'annuaire en mémoire : la création perdante récupère l'existant
        if service.id.is_none() {
            if let Some(existing) = self.by_name(&service.display_name) {
                return Ok(existing);
            }
        }
        let saved = match service.id {
            Some(_) => service,
            None => {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                ApplicationService {
                    id: Some(format!("svc-{n}")),
                    ..service
                }
            }
        };
        let mut services = self.services.lock();
        match services.iter_mut().find(|s| s.id == saved.id) {
            Some(existing) => *existing = saved.clone(),
            None => services.push(saved.clone()),
        }
        Ok(saved)
    }
}

// ----- Drift ledger -----

#[derive(Clone, Default)]
pub struct StubDriftLedger {
    events: Arc<Mutex<Vec<DriftEvent>>>,
    writes: Arc<AtomicUsize>,
    pub fail: Fault,
}

impl StubDriftLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, event: DriftEvent) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<DriftEvent> {
        self.events.lock().clone()
    }

    /// Nombre d'écritures (création + résolution)
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DriftLedger for StubDriftLedger {
    async fn save(&self, event: DriftEvent) -> PortResult<DriftEvent> {
        self.fail.check("drift event save")?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push(event.clone());
        Ok(event)
    }

    async fn resolve_for_instance(
        &self,
        service_name: &str,
        instance_id: &str,
        resolved_by: &str,
    ) -> PortResult<usize> {
        self.fail.check("drift event resolve")?;
        let now = time::OffsetDateTime::now_utc();
        let mut events = self.events.lock();
        let mut resolved = 0;
        for event in events.iter_mut().filter(|e| {
            e.service_name == service_name && e.instance_id == instance_id && e.is_unresolved()
        }) {
            *event = event.resolved(resolved_by, now);
            resolved += 1;
        }
        if resolved > 0 {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(resolved)
    }

    async fn find_for_instance(
        &self,
        service_name: &str,
        instance_id: &str,
    ) -> PortResult<Vec<DriftEvent>> {
        self.fail.check("drift event listing")?;
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.service_name == service_name && e.instance_id == instance_id)
            .cloned()
            .collect())
    }
}

// ----- Configuration authority -----

/// Autorité scriptable : un hash attendu par service, avec repli global
#[derive(Clone, Default)]
pub struct StubAuthority {
    hashes: Arc<Mutex<HashMap<String, Option<String>>>>,
    fallback: Arc<Mutex<Option<String>>>,
    lookups: Arc<Mutex<Vec<(String, Option<String>)>>>,
    refreshes: Arc<Mutex<Vec<String>>>,
    pub fail_lookups: Fault,
    pub fail_refresh: Fault,
}

impl StubAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash renvoyé pour tout service sans entrée dédiée
    pub fn expect_hash(&self, hash: Option<&str>) {
        *self.fallback.lock() = hash.map(str::to_string);
    }

    pub fn expect_hash_for(&self, service_name: &str, hash: Option<&str>) {
        self.hashes
            .lock()
            .insert(service_name.to_string(), hash.map(str::to_string));
    }

    /// Destinations reçues par `trigger_refresh`, dans l'ordre
    pub fn refresh_calls(&self) -> Vec<String> {
        self.refreshes.lock().clone()
    }

    pub fn lookups(&self) -> Vec<(String, Option<String>)> {
        self.lookups.lock().clone()
    }
}

#[async_trait]
impl ConfigAuthority for StubAuthority {
    async fn effective_hash(
        &self,
        service_name: &str,
        environment: Option<&str>,
    ) -> PortResult<Option<String>> {
        self.lookups
            .lock()
            .push((service_name.to_string(), environment.map(str::to_string)));
        self.fail_lookups.check("effective hash")?;
        let hashes = self.hashes.lock();
        Ok(match hashes.get(service_name) {
            Some(hash) => hash.clone(),
            None => self.fallback.lock().clone(),
        })
    }

    async fn trigger_refresh(&self, destination: &str) -> PortResult<RefreshResponse> {
        self.refreshes.lock().push(destination.to_string());
        self.fail_refresh.check("refresh")?;
        Ok(RefreshResponse {
            accepted: true,
            message: None,
        })
    }
}

/**
 * LIAISON DE SERVICE - Trouve ou fabrique le service propriétaire d'une instance
 *
 * RÔLE :
 * Rattacher chaque heartbeat à un ApplicationService, quoi qu'il arrive côté annuaire.
 *
 * FONCTIONNEMENT :
 * 1. Recherche exacte par displayName
 * 2. Trouvé + nouvel environnement -> fusion (ajout, tri, dédup) puis save
 * 3. Absent -> création d'un service orphelin (pas d'équipe, ACTIVE, créé par "system")
 * 4. Échec annuaire -> log + fallback orphelin avec un identifiant neuf
 *
 * Perdre le signal de vie est pire qu'un doublon orphelin : la réconciliation de
 * propriété est faite par un autre workflow. Le résultat dit explicitement quelle
 * branche a produit le service.
 */

use std::collections::BTreeSet;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{ApplicationService, Lifecycle, SYSTEM_ACTOR};
use crate::ports::{PortResult, ServiceDirectory};

/// Service rattaché à l'instance et branche qui l'a produit
#[derive(Debug, Clone, PartialEq)]
pub enum Linkage {
    /// Trouvé (éventuellement fusionné) ou créé normalement
    Resolved(ApplicationService),
    /// Produit par le fallback après un échec de l'annuaire
    FallbackCreated(ApplicationService),
}

impl Linkage {
    pub fn service(&self) -> &ApplicationService {
        match self {
            Self::Resolved(s) | Self::FallbackCreated(s) => s,
        }
    }

    pub fn into_service(self) -> ApplicationService {
        match self {
            Self::Resolved(s) | Self::FallbackCreated(s) => s,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::FallbackCreated(_))
    }
}

pub struct ServiceLinkageResolver {
    directory: Arc<dyn ServiceDirectory>,
    default_environments: BTreeSet<String>,
}

impl ServiceLinkageResolver {
    pub fn new(directory: Arc<dyn ServiceDirectory>, default_environments: Vec<String>) -> Self {
        Self {
            directory,
            default_environments: default_environments.into_iter().collect(),
        }
    }

    /// Ne remonte jamais d'erreur
    pub async fn resolve(&self, service_name: &str, environment: Option<&str>) -> Linkage {
        match self.find_or_create(service_name, environment).await {
            Ok(service) => Linkage::Resolved(service),
            Err(e) => {
                warn!(
                    service = %service_name,
                    error = %e,
                    "service directory failed, falling back to orphaned service"
                );
                Linkage::FallbackCreated(self.create_fallback(service_name, environment).await)
            }
        }
    }

    async fn find_or_create(
        &self,
        service_name: &str,
        environment: Option<&str>,
    ) -> PortResult<ApplicationService> {
        let Some(existing) = self.directory.find_by_display_name(service_name).await? else {
            let created = self
                .directory
                .save(self.orphan(service_name, environment, None))
                .await?;
            info!(
                service = %service_name,
                service_id = created.id.as_deref().unwrap_or("-"),
                "auto-created orphaned service"
            );
            return Ok(created);
        };

        match environment {
            Some(env) if !existing.environments.contains(env) => {
                let mut environments = existing.environments.clone();
                environments.insert(env.to_string());
                let merged = ApplicationService {
                    environments,
                    ..existing
                };
                info!(service = %service_name, environment = %env, "merged new environment into service");
                self.directory.save(merged).await
            }
            _ => Ok(existing),
        }
    }

    async fn create_fallback(
        &self,
        service_name: &str,
        environment: Option<&str>,
    ) -> ApplicationService {
        let orphan = self.orphan(service_name, environment, Some(Uuid::new_v4().to_string()));
        match self.directory.save(orphan.clone()).await {
            Ok(saved) => saved,
            Err(e) => {
                // le heartbeat continue avec le service non persisté
                error!(service = %service_name, error = %e, "fallback orphan save failed");
                orphan
            }
        }
    }

    fn orphan(
        &self,
        service_name: &str,
        environment: Option<&str>,
        id: Option<String>,
    ) -> ApplicationService {
        let environments = match environment {
            Some(env) => BTreeSet::from([env.to_string()]),
            None => self.default_environments.clone(),
        };
        ApplicationService {
            id,
            display_name: service_name.to_string(),
            owner_team_id: None,
            environments,
            lifecycle: Lifecycle::Active,
            created_at: Some(OffsetDateTime::now_utc()),
            created_by: Some(SYSTEM_ACTOR.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::memory::MemoryServiceDirectory;
    use crate::ports::PortError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn resolver(dir: Arc<dyn ServiceDirectory>) -> ServiceLinkageResolver {
        ServiceLinkageResolver::new(dir, vec!["default".to_string()])
    }

    /// Annuaire dont la recherche échoue ; les `save` réussissent ou non
    struct BrokenLookup {
        fail_saves: bool,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl ServiceDirectory for BrokenLookup {
        async fn find_by_display_name(&self, _: &str) -> PortResult<Option<ApplicationService>> {
            Err(PortError::Unavailable("directory down".into()))
        }

        async fn save(&self, service: ApplicationService) -> PortResult<ApplicationService> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.fail_saves {
                Err(PortError::Backend("write rejected".into()))
            } else {
                Ok(service)
            }
        }
    }

    #[tokio::test]
    async fn test_creates_orphan_for_unknown_service() {
        let dir = Arc::new(MemoryServiceDirectory::new());
        let linkage = resolver(dir.clone()).resolve("orders", Some("prod")).await;

        let Linkage::Resolved(service) = linkage else { panic!("expected Resolved") };
        assert_eq!(service.display_name, "orders");
        assert!(service.is_orphaned());
        assert!(service.id.is_some());
        assert_eq!(service.lifecycle, Lifecycle::Active);
        assert_eq!(service.created_by.as_deref(), Some("system"));
        assert_eq!(service.environments, BTreeSet::from(["prod".to_string()]));
        assert_eq!(dir.all().len(), 1);
    }

    #[tokio::test]
    async fn test_default_environments_without_payload_env() {
        let dir = Arc::new(MemoryServiceDirectory::new());
        let service = resolver(dir).resolve("orders", None).await.into_service();
        assert_eq!(service.environments, BTreeSet::from(["default".to_string()]));
    }

    #[tokio::test]
    async fn test_merges_new_environment_sorted() {
        let dir = Arc::new(MemoryServiceDirectory::new());
        let r = resolver(dir.clone());
        r.resolve("orders", Some("staging")).await;
        r.resolve("orders", Some("dev")).await;
        let service = r.resolve("orders", Some("staging")).await.into_service();

        let envs: Vec<&str> = service.environments.iter().map(String::as_str).collect();
        assert_eq!(envs, vec!["dev", "staging"]);
        assert_eq!(dir.all().len(), 1);
    }

    #[tokio::test]
    async fn test_existing_owner_is_kept() {
        let dir = Arc::new(MemoryServiceDirectory::new());
        dir.save(ApplicationService {
            id: Some("svc-1".into()),
            display_name: "orders".into(),
            owner_team_id: Some("team-a".into()),
            environments: BTreeSet::from(["prod".to_string()]),
            lifecycle: Lifecycle::Active,
            created_at: None,
            created_by: Some("alice".into()),
        })
        .await
        .unwrap();

        let service = resolver(dir).resolve("orders", Some("prod")).await.into_service();
        assert_eq!(service.id.as_deref(), Some("svc-1"));
        assert_eq!(service.owner_team_id.as_deref(), Some("team-a"));
    }

    #[tokio::test]
    async fn test_lookup_failure_falls_back() {
        let dir = Arc::new(BrokenLookup {
            fail_saves: false,
            saves: AtomicUsize::new(0),
        });
        let linkage = resolver(dir.clone()).resolve("orders", Some("prod")).await;

        assert!(linkage.is_fallback());
        let service = linkage.service();
        assert!(service.id.is_some(), "fallback must carry a fresh id");
        assert!(service.is_orphaned());
        assert_eq!(dir.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_survives_total_failure() {
        let dir = Arc::new(BrokenLookup {
            fail_saves: true,
            saves: AtomicUsize::new(0),
        });
        let linkage = resolver(dir).resolve("orders", None).await;
        assert!(linkage.is_fallback());
        assert_eq!(linkage.service().display_name, "orders");
    }
}

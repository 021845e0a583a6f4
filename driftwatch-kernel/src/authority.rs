/**
 * AUTORITÉ DE CONFIGURATION - Client HTTP
 *
 * RÔLE :
 * Demander le hash attendu pour (service, environnement) et déclencher le
 * refresh correctif d'une instance.
 *
 * ENDPOINTS :
 * - GET  {base}/hashes/{service}/{environnement} -> { "hash": "..." }, 404 = inconnu
 * - POST {base}/refresh?destination={service}:{instance} -> RefreshResponse
 *
 * Chaque nom est poussé comme un segment de chemin encodé : un `/`, `?` ou `#`
 * dans un nom ne change jamais la ressource interrogée.
 */

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::AuthorityConf;
use crate::ports::{ConfigAuthority, PortError, PortResult, RefreshResponse};

/// Profil interrogé quand le heartbeat ne porte pas d'environnement
pub const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Deserialize)]
struct HashBody {
    hash: Option<String>,
}

pub struct HttpConfigAuthority {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpConfigAuthority {
    pub fn new(conf: &AuthorityConf) -> PortResult<Self> {
        let base_url = Url::parse(&conf.base_url).map_err(|e| {
            PortError::Backend(format!("invalid authority base_url {}: {e}", conf.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(PortError::Backend(format!(
                "authority base_url {} cannot carry a path",
                conf.base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(conf.timeout_secs))
            .build()?;
        Ok(Self { client, base_url })
    }

    /// URL de base + segments encodés un par un
    fn endpoint(&self, segments: &[&str]) -> PortResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PortError::Backend(format!("authority base_url {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl ConfigAuthority for HttpConfigAuthority {
    async fn effective_hash(
        &self,
        service_name: &str,
        environment: Option<&str>,
    ) -> PortResult<Option<String>> {
        let profile = environment.unwrap_or(DEFAULT_PROFILE);
        let url = self.endpoint(&["hashes", service_name, profile])?;

        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(service = %service_name, profile, "no effective hash known");
                Ok(None)
            }
            status if status.is_success() => {
                let body: HashBody = response.json().await?;
                Ok(body.hash.filter(|h| !h.trim().is_empty()))
            }
            status => Err(PortError::Backend(format!(
                "authority answered {status} for {service_name}/{profile}"
            ))),
        }
    }

    async fn trigger_refresh(&self, destination: &str) -> PortResult<RefreshResponse> {
        let url = self.endpoint(&["refresh"])?;
        let response = self
            .client
            .post(url)
            .query(&[("destination", destination)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PortError::Backend(format!(
                "refresh of {destination} answered {}",
                response.status()
            )));
        }
        // corps vide en 2xx = accepté
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(RefreshResponse {
                accepted: true,
                message: None,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }
}

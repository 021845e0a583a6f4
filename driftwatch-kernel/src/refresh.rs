/**
 * REFRESH CORRECTIF - Re-synchronisation distante d'une instance
 *
 * RÔLE : Appel best-effort à l'autorité de configuration. Les échecs sont logués
 * et absorbés : ils n'atteignent jamais le flux de réconciliation ni l'instance persistée.
 */

use std::sync::Arc;
use tracing::{info, warn};

use crate::ports::{refresh_destination, ConfigAuthority};

#[derive(Clone)]
pub struct CorrectiveActionTrigger {
    authority: Arc<dyn ConfigAuthority>,
}

impl CorrectiveActionTrigger {
    pub fn new(authority: Arc<dyn ConfigAuthority>) -> Self {
        Self { authority }
    }

    /// `true` si l'autorité a accepté ; sert uniquement aux logs et au health
    pub async fn trigger_refresh(&self, service_name: &str, instance_id: &str) -> bool {
        let destination = refresh_destination(service_name, instance_id);
        match self.authority.trigger_refresh(&destination).await {
            Ok(response) if response.accepted => {
                info!(destination = %destination, "corrective refresh triggered");
                true
            }
            Ok(response) => {
                warn!(
                    destination = %destination,
                    message = response.message.as_deref().unwrap_or(""),
                    "corrective refresh not accepted"
                );
                false
            }
            Err(e) => {
                warn!(destination = %destination, error = %e, "corrective refresh failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{PortError, PortResult, RefreshResponse};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Recorder {
        fail: bool,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ConfigAuthority for Recorder {
        async fn effective_hash(&self, _: &str, _: Option<&str>) -> PortResult<Option<String>> {
            Ok(None)
        }

        async fn trigger_refresh(&self, destination: &str) -> PortResult<RefreshResponse> {
            self.calls.lock().push(destination.to_string());
            if self.fail {
                return Err(PortError::Unavailable("bus down".into()));
            }
            Ok(RefreshResponse {
                accepted: true,
                message: None,
            })
        }
    }

    #[tokio::test]
    async fn test_destination_format() {
        let authority = Arc::new(Recorder {
            fail: false,
            calls: Mutex::new(Vec::new()),
        });
        let trigger = CorrectiveActionTrigger::new(authority.clone());
        assert!(trigger.trigger_refresh("orders", "i1").await);
        assert_eq!(*authority.calls.lock(), vec!["orders:i1".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let authority = Arc::new(Recorder {
            fail: true,
            calls: Mutex::new(Vec::new()),
        });
        let trigger = CorrectiveActionTrigger::new(authority);
        assert!(!trigger.trigger_refresh("orders", "i1").await);
    }
}

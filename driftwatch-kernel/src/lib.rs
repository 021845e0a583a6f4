/**
 * DRIFTWATCH KERNEL - Réconciliation de dérive de configuration par heartbeat
 *
 * RÔLE : Les instances rapportent leur identité et le hash de configuration appliqué ;
 * le moteur le compare au hash attendu par l'autorité, journalise la dérive et
 * déclenche des refresh correctifs sous un backoff exponentiel par instance.
 */

pub mod authority;
pub mod backoff;
pub mod config;
pub mod drift;
pub mod engine;
pub mod error;
pub mod health;
pub mod http;
pub mod linkage;
pub mod models;
pub mod mqtt;
pub mod ports;
pub mod refresh;
pub mod validation;

pub use backoff::{BackoffState, BackoffTracker};
pub use engine::{Collaborators, Invalidation, ReconciliationEngine};
pub use error::{KernelError, KernelResult};
pub use models::{
    ApplicationService, DriftEvent, DriftStatus, HeartbeatPayload, InstanceKey, InstanceStatus,
    ServiceInstance,
};

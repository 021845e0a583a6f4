/*!
# Driftwatch DevKit - Stubs et utilitaires de test

Bibliothèque facilitant les tests du moteur de réconciliation avec:
- Stubs des quatre collaborateurs (enregistrement des appels + injection de pannes)
- Builder de heartbeats
- Harness complet autour de `ReconciliationEngine`
*/

pub mod heartbeat;
pub mod stubs;
pub mod test_utils;

pub use heartbeat::HeartbeatBuilder;
pub use stubs::{StubAuthority, StubDriftLedger, StubInstanceStore, StubServiceDirectory};
pub use test_utils::TestHarness;

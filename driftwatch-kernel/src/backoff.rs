/**
 * BACKOFF PAR INSTANCE - Cadence des refresh correctifs pendant une dérive
 *
 * RÔLE :
 * Tant qu'une instance reste en dérive, le refresh n'est re-déclenché que sur une
 * cadence doublante : le heartbeat de détection déclenche tout de suite, puis les
 * 2e, 4e, 8e et 16e heartbeats suivants, puis un sur 16.
 *
 * PORTÉE :
 * État local au process, injecté dans le moteur. Pas partagé entre réplicas, pas
 * persisté : après un redémarrage chaque instance en dérive repart du seuil minimal.
 */

use dashmap::DashMap;
use serde::Serialize;

use crate::models::InstanceKey;

/// Plafond de l'exposant : seuils 1, 2, 4, 8, 16, 16, ...
pub const MAX_BACKOFF_POWER: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffState {
    /// Heartbeats comptés dans la fenêtre courante
    pub retry_count: u32,
    pub backoff_power: u32,
}

impl BackoffState {
    /// État juste après la détection (la détection remplit la fenêtre de taille 1)
    pub const JUST_DETECTED: Self = Self {
        retry_count: 1,
        backoff_power: 0,
    };

    pub fn threshold(&self) -> u32 {
        1 << self.backoff_power.min(MAX_BACKOFF_POWER)
    }

    fn window_complete(&self) -> bool {
        self.retry_count >= self.threshold()
    }
}

/// Compteurs de backoff indexés par identité d'instance.
/// Chaque opération ne verrouille que le shard de sa clé.
#[derive(Debug, Default)]
pub struct BackoffTracker {
    states: DashMap<InstanceKey, BackoffState>,
}

impl BackoffTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remet l'instance sur les compteurs "juste détectée"
    pub fn reset(&self, key: &InstanceKey) {
        self.states.insert(key.clone(), BackoffState::JUST_DETECTED);
    }

    /// Compte un heartbeat de dérive persistante et indique si le seuil courant
    /// est atteint. Une fenêtre qui a déclenché ne bascule sur la puissance
    /// suivante qu'à l'appel d'après : juste après un déclenchement, `snapshot`
    /// montre donc les compteurs d'avant bascule (ex. retry=2, power=1), pas (0, 2).
    ///
    /// Clé inconnue = puissance 0 : le premier appel après un redémarrage déclenche.
    pub fn bump_if_threshold(&self, key: &InstanceKey) -> bool {
        let mut entry = self.states.entry(key.clone()).or_insert(BackoffState {
            retry_count: 0,
            backoff_power: 0,
        });
        let state = entry.value_mut();

        if state.window_complete() {
            state.retry_count = 0;
            state.backoff_power = (state.backoff_power + 1).min(MAX_BACKOFF_POWER);
        }
        state.retry_count += 1;
        state.window_complete()
    }

    pub fn remove(&self, key: &InstanceKey) {
        self.states.remove(key);
    }

    pub fn snapshot(&self, key: &InstanceKey) -> Option<BackoffState> {
        self.states.get(key).map(|s| *s.value())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

use crate::ports::PortError;

/// Erreurs remontées à l'appelant de `process_heartbeat`
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// Payload malformé, rejeté avant toute mutation
    #[error("invalid heartbeat: {0}")]
    Validation(String),
    /// Autorité de configuration injoignable ou en erreur ; le prochain heartbeat réessaie
    #[error("configuration authority failed for {service} ({environment}): {source}")]
    Configuration {
        service: String,
        environment: String,
        #[source]
        source: PortError,
    },
    #[error("instance store failure: {0}")]
    Persistence(#[source] PortError),
}

impl KernelError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Transitoire côté serveur (à réessayer) vs rejet côté client
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Validation(_))
    }
}

pub type KernelResult<T> = Result<T, KernelError>;

use crate::error::{KernelError, KernelResult};
use crate::models::HeartbeatPayload;

/// Valide la structure d'un heartbeat avant toute mutation.
/// `None` correspond à un payload absent.
pub fn validate(payload: Option<&HeartbeatPayload>) -> KernelResult<&HeartbeatPayload> {
    let payload = payload.ok_or_else(|| KernelError::validation("heartbeat payload is required"))?;

    if payload.service_name.trim().is_empty() {
        return Err(KernelError::validation("serviceName must not be blank"));
    }
    if payload.instance_id.trim().is_empty() {
        return Err(KernelError::validation("instanceId must not be blank"));
    }
    if let Some(host) = &payload.host {
        if host.trim().is_empty() {
            return Err(KernelError::validation("host must not be blank when present"));
        }
    }
    if let Some(port) = payload.port {
        if !(1..=65535).contains(&port) {
            return Err(KernelError::validation(format!(
                "port {port} is outside [1, 65535]"
            )));
        }
    }

    Ok(payload)
}

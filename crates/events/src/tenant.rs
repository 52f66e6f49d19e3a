use tallyline_core::TenantId;

use crate::EventEnvelope;

/// Messages that belong to exactly one tenant.
///
/// Lets infrastructure (subscribers, bus consumers) filter or reject messages
/// by tenant without knowing their payload type.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;
}

impl<E> TenantScoped for EventEnvelope<E> {
    fn tenant_id(&self) -> TenantId {
        EventEnvelope::tenant_id(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tallyline_core::OutboxId;

    fn keep_tenant<M: TenantScoped>(tenant_id: TenantId, messages: Vec<M>) -> Vec<M> {
        messages
            .into_iter()
            .filter(|m| m.tenant_id() == tenant_id)
            .collect()
    }

    #[test]
    fn filters_envelopes_by_tenant() {
        let (a, b) = (TenantId::new(), TenantId::new());
        let env = |t| EventEnvelope::new(OutboxId::new(), t, "test.ping", 1, Utc::now(), ());
        let kept = keep_tenant(a, vec![env(a), env(b), env(a)]);
        assert_eq!(kept.len(), 2);
    }
}

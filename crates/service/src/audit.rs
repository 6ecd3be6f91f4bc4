//! Audit trail of create, update and delete events on selected entities.

use std::sync::Arc;

use model::{AuditEvent, NewAuditLog, Order, Payment, Product, User};
use repository::AuditRepository;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::context::RequestContext;

/// Attributes never written to the audit trail.
pub const DEFAULT_EXCLUDED: &[&str] = &[
    "password",
    "password_hash",
    "remember_token",
    "two_factor_secret",
    "verification_token",
];

/// An entity whose changes are recorded in `audit_logs`.
///
/// Attributes are taken from the serde representation. `audit_include`
/// restricts them to a whitelist when non-empty, `audit_exclude` removes
/// entries on top of [`DEFAULT_EXCLUDED`].
pub trait Auditable: Serialize {
    const MODEL_TYPE: &'static str;

    fn audit_key(&self) -> i64;

    fn audit_include() -> &'static [&'static str] {
        &[]
    }

    fn audit_exclude() -> &'static [&'static str] {
        &[]
    }

    fn audit_attributes(&self) -> Map<String, Value> {
        let Ok(Value::Object(map)) = serde_json::to_value(self) else {
            return Map::new();
        };
        let include = Self::audit_include();
        let exclude = Self::audit_exclude();
        map.into_iter()
            .filter(|(key, _)| include.is_empty() || include.contains(&key.as_str()))
            .filter(|(key, _)| {
                !DEFAULT_EXCLUDED.contains(&key.as_str()) && !exclude.contains(&key.as_str())
            })
            .collect()
    }
}

impl Auditable for User {
    const MODEL_TYPE: &'static str = "user";

    fn audit_key(&self) -> i64 {
        self.id
    }
}

impl Auditable for Product {
    const MODEL_TYPE: &'static str = "product";

    fn audit_key(&self) -> i64 {
        self.id
    }

    fn audit_exclude() -> &'static [&'static str] {
        &["categories"]
    }
}

impl Auditable for Order {
    const MODEL_TYPE: &'static str = "order";

    fn audit_key(&self) -> i64 {
        self.id
    }

    fn audit_exclude() -> &'static [&'static str] {
        &["items"]
    }
}

impl Auditable for Payment {
    const MODEL_TYPE: &'static str = "payment";

    fn audit_key(&self) -> i64 {
        self.id
    }

    fn audit_exclude() -> &'static [&'static str] {
        &["paytr_token", "provider_response"]
    }
}

/// Old and new values of every attribute that differs, ignoring `updated_at`.
pub fn changed_values(
    before: &Map<String, Value>,
    after: &Map<String, Value>,
) -> (Map<String, Value>, Map<String, Value>) {
    let mut old = Map::new();
    let mut new = Map::new();
    for (key, value) in after {
        if key == "updated_at" || before.get(key) == Some(value) {
            continue;
        }
        old.insert(key.clone(), before.get(key).cloned().unwrap_or(Value::Null));
        new.insert(key.clone(), value.clone());
    }
    (old, new)
}

/// Writes audit entries enriched with the current [`RequestContext`].
#[derive(Clone)]
pub struct AuditLogger {
    repo: Arc<dyn AuditRepository>,
}

impl AuditLogger {
    pub fn new(repo: Arc<dyn AuditRepository>) -> Self {
        Self { repo }
    }

    pub async fn created<T: Auditable + Sync>(&self, model: &T) {
        let attributes = model.audit_attributes();
        self.write(
            T::MODEL_TYPE,
            model.audit_key(),
            AuditEvent::Created,
            None,
            Some(Value::Object(attributes)),
        )
        .await;
    }

    /// Records only the attributes that changed. Nothing is written when the
    /// only difference is `updated_at`.
    pub async fn updated<T: Auditable + Sync>(&self, before: &T, after: &T) {
        let (old, new) = changed_values(&before.audit_attributes(), &after.audit_attributes());
        if new.is_empty() {
            return;
        }
        self.write(
            T::MODEL_TYPE,
            after.audit_key(),
            AuditEvent::Updated,
            Some(Value::Object(old)),
            Some(Value::Object(new)),
        )
        .await;
    }

    pub async fn deleted<T: Auditable + Sync>(&self, model: &T) {
        let attributes = model.audit_attributes();
        self.write(
            T::MODEL_TYPE,
            model.audit_key(),
            AuditEvent::Deleted,
            Some(Value::Object(attributes)),
            None,
        )
        .await;
    }

    async fn write(
        &self,
        model_type: &str,
        model_id: i64,
        event: AuditEvent,
        old_values: Option<Value>,
        new_values: Option<Value>,
    ) {
        let ctx = RequestContext::current();
        let entry = NewAuditLog {
            model_type: model_type.to_string(),
            model_id,
            user_id: ctx.as_ref().and_then(|c| c.user_id()),
            event,
            old_values,
            new_values,
            ip_address: ctx.as_ref().and_then(|c| c.ip.clone()),
            user_agent: ctx.as_ref().and_then(|c| c.user_agent.clone()),
            url: ctx.as_ref().and_then(|c| c.url.clone()),
            trace_id: ctx.as_ref().map(|c| c.trace_id.clone()),
        };

        if let Err(err) = self.repo.insert(&entry).await {
            warn!(
                model_type,
                model_id,
                event = event.as_str(),
                error = %err,
                "Failed to write audit log"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryAuditRepository, sample_payment, sample_user};
    use serde_json::json;

    #[test]
    fn test_attributes_skip_secrets() {
        let attrs = sample_payment(1, 10, "ORDX").audit_attributes();
        assert!(attrs.contains_key("merchant_oid"));
        assert!(!attrs.contains_key("paytr_token"));
        assert!(!attrs.contains_key("provider_response"));

        let attrs = sample_user(1, "a@example.com").audit_attributes();
        assert!(!attrs.contains_key("password_hash"));
        assert!(!attrs.contains_key("verification_token"));
        assert_eq!(attrs["email"], json!("a@example.com"));
    }

    #[test]
    fn test_changed_values_ignore_updated_at() {
        let before = json!({ "name": "a", "price": 100, "updated_at": "x" });
        let after = json!({ "name": "a", "price": 150, "updated_at": "y" });
        let (old, new) = changed_values(
            before.as_object().unwrap(),
            after.as_object().unwrap(),
        );
        assert_eq!(Value::Object(old), json!({ "price": 100 }));
        assert_eq!(Value::Object(new), json!({ "price": 150 }));
    }

    #[tokio::test]
    async fn test_updated_without_changes_writes_nothing() {
        let repo = Arc::new(InMemoryAuditRepository::default());
        let logger = AuditLogger::new(repo.clone());
        let user = sample_user(3, "b@example.com");
        let mut touched = user.clone();
        touched.updated_at = chrono::Utc::now() + chrono::Duration::seconds(5);

        logger.updated(&user, &touched).await;
        assert!(repo.entries().is_empty());

        touched.name = "Yeni İsim".into();
        logger.updated(&user, &touched).await;
        let entries = repo.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, AuditEvent::Updated);
        assert_eq!(entries[0].new_values, Some(json!({ "name": "Yeni İsim" })));
    }

    #[tokio::test]
    async fn test_entry_carries_request_context() {
        let repo = Arc::new(InMemoryAuditRepository::default());
        let logger = AuditLogger::new(repo.clone());
        let ctx = Arc::new(RequestContext::new(
            "trace-audit",
            Some("192.0.2.10".into()),
            Some("curl/8".into()),
            Some("http://localhost/api/v1/products".into()),
        ));
        ctx.set_user(9);

        ctx.scope(logger.created(&sample_user(4, "c@example.com"))).await;

        let entry = &repo.entries()[0];
        assert_eq!(entry.user_id, Some(9));
        assert_eq!(entry.ip_address.as_deref(), Some("192.0.2.10"));
        assert_eq!(entry.trace_id.as_deref(), Some("trace-audit"));
        assert_eq!(entry.model_type, "user");
    }
}

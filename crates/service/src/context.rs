//! Request metadata visible to every service call made while handling a request.

use std::future::Future;
use std::sync::{Arc, OnceLock};

tokio::task_local! {
    static CURRENT: Arc<RequestContext>;
}

/// Set by the HTTP middleware for the lifetime of one request.
#[derive(Debug, Default)]
pub struct RequestContext {
    pub trace_id: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub url: Option<String>,
    user_id: OnceLock<i64>,
}

impl RequestContext {
    pub fn new(
        trace_id: impl Into<String>,
        ip: Option<String>,
        user_agent: Option<String>,
        url: Option<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            ip,
            user_agent,
            url,
            user_id: OnceLock::new(),
        }
    }

    /// Runs `fut` with `self` installed as the current context.
    pub async fn scope<F: Future>(self: Arc<Self>, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }

    /// The context of the running request, if any.
    pub fn current() -> Option<Arc<RequestContext>> {
        CURRENT.try_with(Arc::clone).ok()
    }

    /// Records the authenticated user. Only the first call has an effect.
    pub fn set_user(&self, user_id: i64) {
        let _ = self.user_id.set(user_id);
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id.get().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_current_is_scoped() {
        assert!(RequestContext::current().is_none());

        let ctx = Arc::new(RequestContext::new("trace-1", Some("10.0.0.1".into()), None, None));
        let seen = ctx
            .clone()
            .scope(async {
                let current = RequestContext::current().unwrap();
                current.set_user(42);
                current.set_user(7);
                (current.trace_id.clone(), current.user_id())
            })
            .await;

        assert_eq!(seen, ("trace-1".to_string(), Some(42)));
        assert_eq!(ctx.user_id(), Some(42));
        assert!(RequestContext::current().is_none());
    }
}

//! In-memory test definitions and the callbacks they carry.
use futures::future::BoxFuture;
use serde_json::Value;
use sightline_cache::CacheKey;
use sightline_drivers::SessionHandle;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a callback sees: the file's shared session plus the running test.
#[derive(Clone)]
pub struct TestContext {
    pub session: SessionHandle,
    pub test_name: String,
    pub payload: Option<Value>,
}

pub type Callback = Arc<dyn Fn(TestContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`Callback`].
pub fn callback<F, Fut>(f: F) -> Callback
where
    F: Fn(TestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Error a callback returns when an expectation does not hold.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (expected {expected}, got {actual})")]
pub struct AssertionFailed {
    pub expected: String,
    pub actual: String,
    pub message: String,
}

impl AssertionFailed {
    pub fn new(
        message: impl Into<String>,
        expected: impl fmt::Display,
        actual: impl fmt::Display,
    ) -> Self {
        Self {
            expected: expected.to_string(),
            actual: actual.to_string(),
            message: message.into(),
        }
    }
}

/// Fail with [`AssertionFailed`] unless `expected == actual`.
pub fn assert_equal<T>(message: &str, expected: T, actual: T) -> anyhow::Result<()>
where
    T: PartialEq + fmt::Display,
{
    if expected == actual {
        Ok(())
    } else {
        Err(AssertionFailed::new(message, expected, actual).into())
    }
}

#[derive(Clone)]
pub struct Expectation {
    pub description: String,
    pub callback: Option<Callback>,
}

/// One natural-language test. Shared behind `Arc` once execution starts.
#[derive(Clone, Default)]
pub struct TestDefinition {
    pub name: String,
    pub payload: Option<Value>,
    pub callback: Option<Callback>,
    pub expectations: Vec<Expectation>,
    pub before: Vec<Callback>,
    pub after: Vec<Callback>,
    /// Run `callback` as the whole test, without the model or the cache.
    pub direct: bool,
}

impl TestDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_callback(mut self, cb: Callback) -> Self {
        self.callback = Some(cb);
        self
    }

    pub fn expect(mut self, description: impl Into<String>) -> Self {
        self.expectations.push(Expectation {
            description: description.into(),
            callback: None,
        });
        self
    }

    pub fn expect_with(mut self, description: impl Into<String>, cb: Callback) -> Self {
        self.expectations.push(Expectation {
            description: description.into(),
            callback: Some(cb),
        });
        self
    }

    pub fn before(mut self, cb: Callback) -> Self {
        self.before.push(cb);
        self
    }

    pub fn after(mut self, cb: Callback) -> Self {
        self.after.push(cb);
        self
    }

    /// A test that is nothing but `cb`.
    pub fn direct(name: impl Into<String>, cb: Callback) -> Self {
        Self {
            name: name.into(),
            callback: Some(cb),
            direct: true,
            ..Self::default()
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_test(
            &self.name,
            self.payload.as_ref(),
            self.expectations.iter().map(|e| e.description.as_str()),
        )
    }

    pub fn context(&self, session: SessionHandle) -> TestContext {
        TestContext {
            session,
            test_name: self.name.clone(),
            payload: self.payload.clone(),
        }
    }
}

impl fmt::Debug for TestDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestDefinition")
            .field("name", &self.name)
            .field("payload", &self.payload)
            .field("has_callback", &self.callback.is_some())
            .field(
                "expectations",
                &self
                    .expectations
                    .iter()
                    .map(|e| e.description.as_str())
                    .collect::<Vec<_>>(),
            )
            .field("direct", &self.direct)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cache_key_ignores_callbacks() {
        let plain = TestDefinition::new("Login")
            .with_payload(json!({ "username": "alice" }))
            .expect("dashboard is visible");
        let with_cb = TestDefinition::new("Login")
            .with_payload(json!({ "username": "alice" }))
            .with_callback(callback(|_| async { Ok(()) }))
            .expect_with("dashboard is visible", callback(|_| async { Ok(()) }));
        assert_eq!(plain.cache_key(), with_cb.cache_key());
        assert_ne!(plain.cache_key(), plain.clone().expect("more").cache_key());
    }

    #[test]
    fn assertion_failures_carry_expected_and_actual() {
        let err = assert_equal("title", "Dashboard", "Login").unwrap_err();
        let failed = err.downcast_ref::<AssertionFailed>().unwrap();
        assert_eq!(failed.expected, "Dashboard");
        assert_eq!(failed.actual, "Login");
        assert!(assert_equal("n", 1, 1).is_ok());
    }
}

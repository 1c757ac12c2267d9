//! Tests and hooks collected for one test file.
use sightline_agent::{Callback, TestDefinition};
use std::sync::Arc;

/// Everything declared by one test file, in declaration order.
///
/// A registry is built fresh for every file; nothing leaks from one file's
/// hooks into the next.
#[derive(Clone, Default)]
pub struct Registry {
    tests: Vec<Arc<TestDefinition>>,
    base_url: Option<String>,
    pub(crate) before_all: Vec<Callback>,
    pub(crate) after_all: Vec<Callback>,
    pub(crate) before_each: Vec<Callback>,
    pub(crate) after_each: Vec<Callback>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn test(&mut self, test: TestDefinition) -> &mut Self {
        self.tests.push(Arc::new(test));
        self
    }

    pub fn before_all(&mut self, hook: Callback) -> &mut Self {
        self.before_all.push(hook);
        self
    }

    pub fn after_all(&mut self, hook: Callback) -> &mut Self {
        self.after_all.push(hook);
        self
    }

    pub fn before_each(&mut self, hook: Callback) -> &mut Self {
        self.before_each.push(hook);
        self
    }

    pub fn after_each(&mut self, hook: Callback) -> &mut Self {
        self.after_each.push(hook);
        self
    }

    /// Page every test starts from; overrides the configured base URL.
    pub fn set_base_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn tests(&self) -> &[Arc<TestDefinition>] {
        &self.tests
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Drop all tests and hooks.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_agent::callback;

    #[test]
    fn keeps_declaration_order_and_resets() {
        let mut registry = Registry::new();
        registry
            .test(TestDefinition::new("first"))
            .test(TestDefinition::new("second"))
            .before_all(callback(|_| async { Ok(()) }))
            .set_base_url("https://example.com");

        let names: Vec<_> = registry.tests().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["first", "second"]);
        assert_eq!(registry.before_all.len(), 1);

        registry.reset();
        assert!(registry.is_empty());
        assert!(registry.before_all.is_empty());
        assert_eq!(registry.base_url(), None);
    }
}

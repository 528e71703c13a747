//! Source resolvers: the contexts expressions pull values from.
//!
//! A parser instance closes over one set of task outputs and workflow
//! variables, plus an optional secret store. Each is exposed to expressions
//! through a case-insensitive prefix (`Outputs(...)`, `Variables(...)`,
//! `Secrets(...)`); custom prefixes can be registered at construction time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ExpressionError;

/// A capability that resolves a string key against one backing context.
///
/// Implementations may perform I/O (a secrets backend, for instance);
/// evaluation suspends only here.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<JsonValue, ExpressionError>;
}

/// Backing store for the `Secrets` prefix.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Fetch a secret by name; `None` when the secret does not exist.
    async fn secret(&self, name: &str) -> Result<Option<String>, ExpressionError>;
}

/// Case-insensitive prefix -> resolver map. Read-only during evaluation.
pub(crate) struct ResolverRegistry {
    resolvers: HashMap<String, Arc<dyn SourceResolver>>,
}

impl ResolverRegistry {
    pub(crate) fn new() -> Self {
        Self {
            resolvers: HashMap::new(),
        }
    }

    /// Register a resolver, failing on a prefix collision.
    pub(crate) fn register(
        &mut self,
        prefix: &str,
        resolver: Arc<dyn SourceResolver>,
    ) -> Result<(), ExpressionError> {
        let key = prefix.to_ascii_lowercase();
        if self.resolvers.contains_key(&key) {
            return Err(ExpressionError::DuplicateResolver {
                prefix: prefix.to_string(),
            });
        }
        self.resolvers.insert(key, resolver);
        Ok(())
    }

    /// Unchecked insert, used for the built-in prefixes.
    pub(crate) fn insert(&mut self, prefix: &str, resolver: Arc<dyn SourceResolver>) {
        self.resolvers.insert(prefix.to_ascii_lowercase(), resolver);
    }

    pub(crate) fn get(&self, prefix: &str) -> Option<&Arc<dyn SourceResolver>> {
        self.resolvers.get(&prefix.to_ascii_lowercase())
    }

    pub(crate) fn contains(&self, prefix: &str) -> bool {
        self.resolvers.contains_key(&prefix.to_ascii_lowercase())
    }
}

fn lookup(map: &HashMap<String, JsonValue>, key: &str) -> Option<JsonValue> {
    if let Some(found) = map.get(key) {
        return Some(found.clone());
    }
    map.iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
        .map(|(_, value)| value.clone())
}

/// Resolves task keys to the recorded output of a prior task.
pub struct OutputsResolver {
    outputs: HashMap<String, JsonValue>,
}

impl OutputsResolver {
    pub fn new(outputs: HashMap<String, JsonValue>) -> Self {
        Self { outputs }
    }
}

#[async_trait]
impl SourceResolver for OutputsResolver {
    async fn resolve(
        &self,
        key: &str,
        _cancel: &CancellationToken,
    ) -> Result<JsonValue, ExpressionError> {
        debug!(key, "resolving task output");
        lookup(&self.outputs, key).ok_or_else(|| ExpressionError::UnknownKey {
            source_name: "Outputs".to_string(),
            key: key.to_string(),
        })
    }
}

/// Resolves workflow-scoped variable names.
pub struct VariablesResolver {
    variables: HashMap<String, JsonValue>,
}

impl VariablesResolver {
    pub fn new(variables: HashMap<String, JsonValue>) -> Self {
        Self { variables }
    }
}

#[async_trait]
impl SourceResolver for VariablesResolver {
    async fn resolve(
        &self,
        key: &str,
        _cancel: &CancellationToken,
    ) -> Result<JsonValue, ExpressionError> {
        debug!(key, "resolving workflow variable");
        lookup(&self.variables, key).ok_or_else(|| ExpressionError::UnknownKey {
            source_name: "Variables".to_string(),
            key: key.to_string(),
        })
    }
}

/// Resolves secret names through the configured [`SecretProvider`].
pub struct SecretsResolver {
    provider: Arc<dyn SecretProvider>,
}

impl SecretsResolver {
    pub fn new(provider: Arc<dyn SecretProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl SourceResolver for SecretsResolver {
    async fn resolve(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<JsonValue, ExpressionError> {
        if cancel.is_cancelled() {
            return Err(ExpressionError::Cancelled);
        }
        debug!(key, "resolving secret");
        match self.provider.secret(key).await? {
            Some(value) => Ok(JsonValue::String(value)),
            None => Err(ExpressionError::UnknownKey {
                source_name: "Secrets".to_string(),
                key: key.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;
    use serde_json::json;

    #[test]
    fn test_registry_rejects_duplicate_prefix() {
        let mut registry = ResolverRegistry::new();
        let resolver: Arc<dyn SourceResolver> = Arc::new(OutputsResolver::new(HashMap::new()));
        registry.register("Outputs", resolver.clone()).unwrap();
        let err = registry.register("OUTPUTS", resolver).unwrap_err();
        assert!(matches!(err, ExpressionError::DuplicateResolver { .. }));
    }

    #[test]
    fn test_registry_lookup_is_case_insensitive() {
        let mut registry = ResolverRegistry::new();
        registry.insert("Outputs", Arc::new(OutputsResolver::new(HashMap::new())));
        assert!(registry.contains("outputs"));
        assert!(registry.contains("OUTPUTS"));
        assert!(registry.get("oUtPuTs").is_some());
        assert!(!registry.contains("secrets"));
    }

    #[tokio::test]
    async fn test_outputs_resolver() {
        let resolver = OutputsResolver::new(hashmap! {
            "task1".to_string() => json!({ "ok": true }),
        });
        let cancel = CancellationToken::new();
        let value = resolver.resolve("task1", &cancel).await.unwrap();
        assert_eq!(value, json!({ "ok": true }));

        // key lookup tolerates casing
        let value = resolver.resolve("TASK1", &cancel).await.unwrap();
        assert_eq!(value, json!({ "ok": true }));

        let err = resolver.resolve("missing", &cancel).await.unwrap_err();
        assert!(matches!(err, ExpressionError::UnknownKey { .. }));
    }
}

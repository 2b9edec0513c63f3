//! Category → recovery callback mapping, populated by callers.

use super::classifier::ErrorCategory;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// A zero-argument recovery attempt. Resolves to `true` when the failure
/// was remediated.
pub type RecoveryFn = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

#[derive(Default)]
pub struct RecoveryStrategyRegistry {
    strategies: RwLock<HashMap<ErrorCategory, RecoveryFn>>,
}

impl RecoveryStrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the strategy for `category`.
    pub fn register<F, Fut>(&self, category: ErrorCategory, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let callback: RecoveryFn = Arc::new(move || Box::pin(callback()));
        self.strategies.write().insert(category, callback);
    }

    pub fn lookup(&self, category: ErrorCategory) -> Option<RecoveryFn> {
        self.strategies.read().get(&category).cloned()
    }

    pub fn unregister(&self, category: ErrorCategory) -> bool {
        self.strategies.write().remove(&category).is_some()
    }

    pub fn categories(&self) -> Vec<ErrorCategory> {
        let mut categories: Vec<_> = self.strategies.read().keys().copied().collect();
        categories.sort();
        categories
    }
}

impl std::fmt::Debug for RecoveryStrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryStrategyRegistry")
            .field("categories", &self.categories())
            .finish()
    }
}

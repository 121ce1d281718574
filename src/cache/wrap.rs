//! Caching wrappers for async functions
//!
//! [`cached`] turns a key function and an async operation into a callable
//! that consults the tier chain before running the operation.

use crate::cache::{
    manager::CacheTierManager,
    types::{CacheKey, HitSource},
};
use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Builds namespaced keys of the form `category:identifier?k=v&k2=v2`
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    category: String,
    identifier: String,
    params: Vec<(String, String)>,
}

impl CacheKeyBuilder {
    /// Create a new cache key builder
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            identifier: String::new(),
            params: Vec::new(),
        }
    }

    /// Set the primary identifier
    pub fn identifier(mut self, id: impl fmt::Display) -> Self {
        self.identifier = id.to_string();
        self
    }

    /// Add a parameter to the key
    pub fn param(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    /// Build the cache key
    pub fn build(self) -> CacheKey {
        let mut key = format!("{}:{}", self.category, self.identifier);

        if !self.params.is_empty() {
            let params_str: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            key.push('?');
            key.push_str(&params_str.join("&"));
        }

        key
    }
}

/// An async operation whose results are cached under a derived key
pub struct CachedFn<A, R, K, Op> {
    manager: Arc<CacheTierManager>,
    category: String,
    key_fn: K,
    op: Op,
    _marker: PhantomData<fn(A) -> R>,
}

/// Wrap `op` so that calls with the same key share one cached result.
/// Fails immediately if `category` has no strategy.
pub fn cached<A, R, K, Op, Fut>(
    manager: Arc<CacheTierManager>,
    category: impl Into<String>,
    key_fn: K,
    op: Op,
) -> Result<CachedFn<A, R, K, Op>>
where
    K: Fn(&A) -> CacheKey,
    Op: Fn(A) -> Fut,
    Fut: Future<Output = anyhow::Result<R>>,
    R: Serialize + DeserializeOwned,
{
    let category = category.into();
    manager.registry().get(&category)?;

    Ok(CachedFn {
        manager,
        category,
        key_fn,
        op,
        _marker: PhantomData,
    })
}

impl<A, R, K, Op, Fut> CachedFn<A, R, K, Op>
where
    K: Fn(&A) -> CacheKey,
    Op: Fn(A) -> Fut,
    Fut: Future<Output = anyhow::Result<R>>,
    R: Serialize + DeserializeOwned,
{
    /// Return the cached result for `args`, running the operation on a miss
    pub async fn call(&self, args: A) -> Result<R> {
        self.call_traced(args).await.map(|(result, _)| result)
    }

    /// Like [`CachedFn::call`], also reporting which tier answered
    pub async fn call_traced(&self, args: A) -> Result<(R, HitSource)> {
        let key = (self.key_fn)(&args);
        let op = &self.op;

        let (value, source) = self
            .manager
            .get_or_generate(&key, &self.category, move || async move {
                let result = op(args).await?;
                Ok::<_, anyhow::Error>(serde_json::to_value(result)?)
            })
            .await?;

        Ok((serde_json::from_value(value)?, source))
    }

    /// Drop the cached result for `args`
    pub async fn invalidate(&self, args: &A) -> bool {
        self.manager.invalidate(&(self.key_fn)(args)).await
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}

// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;

use crate::store::error::StoreError;

/// Durable string key-value storage under namespaced keys
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replace the value stored under `key`. Either the whole value is
    /// written or the previous one remains.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// All keys starting with `prefix`, sorted
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

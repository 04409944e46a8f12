//! Set operations, including tokio-friendly add and remove.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task;

use crate::database::Database;
use crate::error::{StoreError, StoreResult};

impl Database {
    /// Adds `member`. Returns true when it was not already present.
    pub fn sadd<T: Serialize + ?Sized>(&self, key: &str, member: &T) -> StoreResult<bool> {
        let text = self.encode(member)?;
        self.sadd_encoded(key, &text)
    }

    /// Adds `member` on tokio's blocking pool so the calling task never blocks.
    pub async fn sadd_async<T>(&self, key: &str, member: &T) -> StoreResult<bool>
    where
        T: Serialize + ?Sized,
    {
        let text = self.encode(member)?;
        let db = self.clone();
        let key = key.to_string();
        task::spawn_blocking(move || db.sadd_encoded(&key, &text))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))?
    }

    pub fn scard(&self, key: &str) -> StoreResult<u64> {
        Ok(self.call_integer(&[b"SCARD", key.as_bytes()])?.max(0) as u64)
    }

    pub fn sismember<T: Serialize + ?Sized>(&self, key: &str, member: &T) -> StoreResult<bool> {
        let text = self.encode(member)?;
        self.call_bool(&[b"SISMEMBER", key.as_bytes(), text.as_bytes()])
    }

    /// Removes and decodes a random member; an empty set yields `T::default()`.
    pub fn spop<T: DeserializeOwned + Default>(&self, key: &str) -> StoreResult<T> {
        let data = self.call_bulk(&[b"SPOP", key.as_bytes()])?;
        self.decode(data.as_deref())
    }

    /// Removes `member`. Returns true when it was present.
    pub fn srem<T: Serialize + ?Sized>(&self, key: &str, member: &T) -> StoreResult<bool> {
        let text = self.encode(member)?;
        self.srem_encoded(key, &text)
    }

    /// Removes `member` on tokio's blocking pool.
    pub async fn srem_async<T>(&self, key: &str, member: &T) -> StoreResult<bool>
    where
        T: Serialize + ?Sized,
    {
        let text = self.encode(member)?;
        let db = self.clone();
        let key = key.to_string();
        task::spawn_blocking(move || db.srem_encoded(&key, &text))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))?
    }

    fn sadd_encoded(&self, key: &str, text: &str) -> StoreResult<bool> {
        self.call_bool(&[b"SADD", key.as_bytes(), text.as_bytes()])
    }

    fn srem_encoded(&self, key: &str, text: &str) -> StoreResult<bool> {
        self.call_bool(&[b"SREM", key.as_bytes(), text.as_bytes()])
    }
}

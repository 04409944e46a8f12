//! # Hash Operations
//!
//! Purpose: Typed access to fields of hash-valued keys.
//!
//! ## Usage Notes
//!
//! - Field values are JSON text like every other typed value.
//! - `hget_many` and `hget_all` only contain fields that are present.
//! - `hscan` walks a cursor; fields written during the walk may or may not
//!   be reported, and a field may be reported twice.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tkv_client::ClientError;
use tracing::trace;

use crate::database::{bulk_text, scan_page, with_key, Database};
use crate::error::{StoreError, StoreResult};
use crate::strings::SetCondition;

/// Fields requested per HSCAN round trip.
const HSCAN_BATCH: &[u8] = b"250";

impl Database {
    /// Removes `field`. Returns true when it existed.
    pub fn hdel(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.call_bool(&[b"HDEL", key.as_bytes(), field.as_bytes()])
    }

    /// Removes every field in `fields`. Returns how many were removed.
    pub fn hdel_many<F: AsRef<str>>(&self, key: &str, fields: &[F]) -> StoreResult<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let extra: Vec<&[u8]> = fields.iter().map(|field| field.as_ref().as_bytes()).collect();
        let args = with_key(b"HDEL", key, &extra);
        Ok(self.call_integer(&args)?.max(0) as u64)
    }

    pub fn hexists(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.call_bool(&[b"HEXISTS", key.as_bytes(), field.as_bytes()])
    }

    /// Reads and decodes one field; a missing field yields `T::default()`.
    pub fn hget<T: DeserializeOwned + Default>(&self, key: &str, field: &str) -> StoreResult<T> {
        let data = self.call_bulk(&[b"HGET", key.as_bytes(), field.as_bytes()])?;
        self.decode(data.as_deref())
    }

    /// Reads several fields in one round trip.
    ///
    /// Missing fields are left out of the result rather than reported.
    pub fn hget_many<T, F>(&self, key: &str, fields: &[F]) -> StoreResult<HashMap<String, T>>
    where
        T: DeserializeOwned + Default,
        F: AsRef<str>,
    {
        if fields.is_empty() {
            return Ok(HashMap::new());
        }
        let extra: Vec<&[u8]> = fields.iter().map(|field| field.as_ref().as_bytes()).collect();
        let args = with_key(b"HMGET", key, &extra);
        let replies = self.call_array(&args)?;

        let mut values = HashMap::with_capacity(replies.len());
        for (field, item) in fields.iter().zip(replies) {
            if let Some(data) = item.into_bulk()? {
                values.insert(field.as_ref().to_string(), self.decode(Some(&data))?);
            }
        }
        Ok(values)
    }

    /// Reads every field of the hash.
    pub fn hget_all<T>(&self, key: &str) -> StoreResult<HashMap<String, T>>
    where
        T: DeserializeOwned + Default,
    {
        let replies = self.call_array(&[b"HGETALL", key.as_bytes()])?;
        let mut values = HashMap::with_capacity(replies.len() / 2);
        let mut items = replies.into_iter();
        while let (Some(field), Some(value)) = (items.next(), items.next()) {
            let data = value.into_bulk()?;
            values.insert(bulk_text(field)?, self.decode(data.as_deref())?);
        }
        Ok(values)
    }

    /// Adds `by` to the integer field and returns the new value.
    pub fn hincr(&self, key: &str, field: &str, by: i64) -> StoreResult<i64> {
        let amount = by.to_string();
        self.call_integer(&[b"HINCRBY", key.as_bytes(), field.as_bytes(), amount.as_bytes()])
    }

    /// Adds `by` to the float field and returns the new value.
    pub fn hincr_float(&self, key: &str, field: &str, by: f64) -> StoreResult<f64> {
        let amount = by.to_string();
        let args: [&[u8]; 4] = [
            b"HINCRBYFLOAT",
            key.as_bytes(),
            field.as_bytes(),
            amount.as_bytes(),
        ];
        let Some(data) = self.call_bulk(&args)? else {
            return Ok(0.0);
        };
        std::str::from_utf8(&data)
            .ok()
            .and_then(|text| text.trim().parse().ok())
            .ok_or(StoreError::Protocol(ClientError::UnexpectedResponse))
    }

    /// Subtracts `by` from the integer field and returns the new value.
    ///
    /// `i64::MIN` has no positive counterpart and is rejected.
    pub fn hdecr(&self, key: &str, field: &str, by: i64) -> StoreResult<i64> {
        let negated = by
            .checked_neg()
            .ok_or_else(|| StoreError::InvalidArgument(format!("cannot decrement by {}", by)))?;
        self.hincr(key, field, negated)
    }

    /// Subtracts `by` from the float field and returns the new value.
    pub fn hdecr_float(&self, key: &str, field: &str, by: f64) -> StoreResult<f64> {
        self.hincr_float(key, field, -by)
    }

    pub fn hkeys(&self, key: &str) -> StoreResult<Vec<String>> {
        self.call_array(&[b"HKEYS", key.as_bytes()])?
            .into_iter()
            .map(bulk_text)
            .collect()
    }

    /// Decodes every field value of the hash.
    pub fn hvals<T: DeserializeOwned + Default>(&self, key: &str) -> StoreResult<Vec<T>> {
        self.call_array(&[b"HVALS", key.as_bytes()])?
            .into_iter()
            .map(|item| {
                let data = item.into_bulk()?;
                self.decode(data.as_deref())
            })
            .collect()
    }

    pub fn hlen(&self, key: &str) -> StoreResult<u64> {
        Ok(self.call_integer(&[b"HLEN", key.as_bytes()])?.max(0) as u64)
    }

    /// Encodes `value` into `field`.
    ///
    /// Returns true when a new field was created. `IfNotExists` writes only
    /// absent fields; `IfExists` has no server command and is rejected.
    pub fn hset<T: Serialize + ?Sized>(
        &self,
        key: &str,
        field: &str,
        value: &T,
        condition: SetCondition,
    ) -> StoreResult<bool> {
        let command: &[u8] = match condition {
            SetCondition::Always => b"HSET",
            SetCondition::IfNotExists => b"HSETNX",
            SetCondition::IfExists => {
                return Err(StoreError::UnsupportedCondition {
                    command: "HSET",
                    condition,
                })
            }
        };
        let text = self.encode(value)?;
        let args: [&[u8]; 4] = [command, key.as_bytes(), field.as_bytes(), text.as_bytes()];
        let created = self.call_bool(&args)?;
        trace!(key, field, created, "hset");
        Ok(created)
    }

    /// Writes several fields in one round trip. An empty input sends nothing.
    pub fn hset_many<I, F, V>(&self, key: &str, entries: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = (F, V)>,
        F: AsRef<str>,
        V: Serialize,
    {
        let mut encoded: Vec<(F, String)> = Vec::new();
        for (field, value) in entries {
            let text = self.encode(&value)?;
            encoded.push((field, text));
        }
        if encoded.is_empty() {
            return Ok(());
        }

        let mut extra: Vec<&[u8]> = Vec::with_capacity(encoded.len() * 2);
        for (field, text) in &encoded {
            extra.push(field.as_ref().as_bytes());
            extra.push(text.as_bytes());
        }
        let args = with_key(b"HSET", key, &extra);
        self.call(&args)?;
        Ok(())
    }

    /// Decodes the values of every field whose name matches `pattern`.
    pub fn hscan<T>(&self, key: &str, pattern: &str) -> StoreResult<Vec<T>>
    where
        T: DeserializeOwned + Default,
    {
        let mut values = Vec::new();
        let mut cursor = b"0".to_vec();
        loop {
            let args: [&[u8]; 7] = [
                b"HSCAN",
                key.as_bytes(),
                &cursor,
                b"MATCH",
                pattern.as_bytes(),
                b"COUNT",
                HSCAN_BATCH,
            ];
            let Some(reply) = self.call(&args)? else {
                return Ok(values);
            };
            let (next, batch) = scan_page(reply)?;
            let mut items = batch.into_iter();
            while let (Some(_field), Some(value)) = (items.next(), items.next()) {
                let data = value.into_bulk()?;
                values.push(self.decode(data.as_deref())?);
            }
            cursor = next;
            if cursor.as_slice() == b"0" || cursor.is_empty() {
                return Ok(values);
            }
        }
    }
}

//! # String Operations
//!
//! Purpose: Typed get/set of JSON-encoded values stored at plain keys, plus
//! integer counters.
//!
//! ## Usage Notes
//!
//! - Missing keys and empty stored text decode to `T::default()`.
//! - `get_many` decodes each entry on its own, so one malformed value does
//!   not hide the others.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::codec::CodecResult;
use crate::database::{with_key, Database};
use crate::error::StoreResult;

/// Precondition applied to a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetCondition {
    /// Write unconditionally.
    #[default]
    Always,
    /// Write only when the key (or field) already exists.
    IfExists,
    /// Write only when the key (or field) does not exist.
    IfNotExists,
}

impl Database {
    /// Reads and decodes the value at `key`.
    pub fn get<T: DeserializeOwned + Default>(&self, key: &str) -> StoreResult<T> {
        let data = self.call_bulk(&[b"GET", key.as_bytes()])?;
        self.decode(data.as_deref())
    }

    /// Reads several keys in one round trip, in request order.
    pub fn get_many<T, K>(&self, keys: &[K]) -> StoreResult<Vec<CodecResult<T>>>
    where
        T: DeserializeOwned + Default,
        K: AsRef<str>,
    {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"MGET");
        args.extend(keys.iter().map(|key| key.as_ref().as_bytes()));

        let codec = self.codec();
        let mut values = Vec::with_capacity(keys.len());
        for item in self.call_array(&args)? {
            let data = item.into_bulk()?;
            values.push(codec.decode(data.as_deref()));
        }
        Ok(values)
    }

    /// Encodes `value` and stores it at `key`.
    ///
    /// Sub-second expiries are sent in milliseconds. Returns false when the
    /// condition prevented the write (or the command was fire-and-forget).
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expiry: Option<Duration>,
        condition: SetCondition,
    ) -> StoreResult<bool> {
        let text = self.encode(value)?;
        let ttl = expiry.map(|expiry| {
            if expiry.subsec_nanos() == 0 {
                (&b"EX"[..], expiry.as_secs().to_string())
            } else {
                (&b"PX"[..], expiry.as_millis().to_string())
            }
        });

        let mut args = with_key(b"SET", key, &[text.as_bytes()]);
        if let Some((unit, amount)) = &ttl {
            args.push(*unit);
            args.push(amount.as_bytes());
        }
        match condition {
            SetCondition::Always => {}
            SetCondition::IfExists => args.push(b"XX"),
            SetCondition::IfNotExists => args.push(b"NX"),
        }

        let written = match self.call(&args)? {
            Some(reply) => reply.is_ok(),
            None => false,
        };
        trace!(key, written, "set");
        Ok(written)
    }

    /// Adds `by` to the integer at `key` and returns the new value.
    pub fn incr(&self, key: &str, by: i64) -> StoreResult<i64> {
        let amount = by.to_string();
        self.call_integer(&[b"INCRBY", key.as_bytes(), amount.as_bytes()])
    }

    /// Subtracts `by` from the integer at `key` and returns the new value.
    pub fn decr(&self, key: &str, by: i64) -> StoreResult<i64> {
        let amount = by.to_string();
        self.call_integer(&[b"DECRBY", key.as_bytes(), amount.as_bytes()])
    }
}

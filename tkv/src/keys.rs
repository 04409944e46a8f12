//! Key management: delete, existence, expiry, dump and pattern enumeration.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::database::{bulk_text, scan_page, Database};
use crate::error::{StoreError, StoreResult};

/// Keys requested per SCAN round trip.
const SCAN_BATCH: &[u8] = b"250";

impl Database {
    /// Deletes `key`. Returns true when it existed.
    pub fn del(&self, key: &str) -> StoreResult<bool> {
        self.call_bool(&[b"DEL", key.as_bytes()])
    }

    /// Deletes every key in `keys`. Returns how many were removed.
    pub fn del_many<K: AsRef<str>>(&self, keys: &[K]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"DEL");
        args.extend(keys.iter().map(|key| key.as_ref().as_bytes()));
        Ok(self.call_integer(&args)?.max(0) as u64)
    }

    pub fn exists(&self, key: &str) -> StoreResult<bool> {
        self.call_bool(&[b"EXISTS", key.as_bytes()])
    }

    /// Sets a relative expiry; `None` removes any expiry.
    ///
    /// Returns true when the key exists and its expiry changed.
    pub fn expire(&self, key: &str, expiry: Option<Duration>) -> StoreResult<bool> {
        let Some(expiry) = expiry else {
            return self.call_bool(&[b"PERSIST", key.as_bytes()]);
        };
        if expiry.subsec_nanos() == 0 {
            let secs = expiry.as_secs().to_string();
            self.call_bool(&[b"EXPIRE", key.as_bytes(), secs.as_bytes()])
        } else {
            let millis = expiry.as_millis().to_string();
            self.call_bool(&[b"PEXPIRE", key.as_bytes(), millis.as_bytes()])
        }
    }

    /// Sets an absolute expiry; `None` removes any expiry.
    pub fn expire_at(&self, key: &str, at: Option<DateTime<Utc>>) -> StoreResult<bool> {
        let Some(at) = at else {
            return self.call_bool(&[b"PERSIST", key.as_bytes()]);
        };
        if at.timestamp_subsec_millis() == 0 {
            let secs = at.timestamp().to_string();
            self.call_bool(&[b"EXPIREAT", key.as_bytes(), secs.as_bytes()])
        } else {
            let millis = at.timestamp_millis().to_string();
            self.call_bool(&[b"PEXPIREAT", key.as_bytes(), millis.as_bytes()])
        }
    }

    /// Serialized form of the value at `key` as produced by the server's DUMP.
    pub fn dump(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.call_bulk(&[b"DUMP", key.as_bytes()])
    }

    /// Enumerates keys matching `pattern` on the server at `endpoint`.
    ///
    /// Iterates with SCAN over a dedicated connection, so keys added or
    /// removed during the walk may or may not be reported. Command flags do
    /// not apply.
    pub fn keys(&self, endpoint: &str, pattern: &str) -> StoreResult<Vec<String>> {
        let link = self.manager().current()?;
        let mut conn = link.open_server(endpoint).map_err(StoreError::Connection)?;

        let mut keys = Vec::new();
        let mut cursor = b"0".to_vec();
        loop {
            let reply = conn.call(
                self.index(),
                &[b"SCAN", &cursor, b"MATCH", pattern.as_bytes(), b"COUNT", SCAN_BATCH],
            )?;
            let (next, batch) = scan_page(reply)?;
            for item in batch {
                keys.push(bulk_text(item)?);
            }
            cursor = next;
            if cursor.as_slice() == b"0" || cursor.is_empty() {
                break;
            }
        }
        conn.shutdown();
        debug!(endpoint, pattern, count = keys.len(), "key scan finished");
        Ok(keys)
    }
}

//! # Logical Database Handle
//!
//! Purpose: Carry the logical database index and per-call command flags for
//! the typed operation groups, and funnel every command through the
//! connection manager so each call sees the live link.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tkv_client::{ClientError, RespValue};

use crate::codec::JsonCodec;
use crate::error::{StoreError, StoreResult};
use crate::manager::ConnectionManager;

/// How a command waits for its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandFlags {
    /// Wait for the reply and return its value.
    #[default]
    None,
    /// Send the command and return the result type's default immediately.
    ///
    /// The reply is still read (and discarded) before the next command on
    /// the same connection; error replies are reported as lifecycle events.
    FireAndForget,
}

/// Cheap, cloneable handle on one logical database.
///
/// Operation groups are implemented in the `keys`, `strings`, `hashes`,
/// `sets`, `lists` and `pubsub` modules.
#[derive(Clone)]
pub struct Database {
    manager: ConnectionManager,
    index: u32,
    flags: CommandFlags,
}

impl Database {
    pub(crate) fn new(manager: ConnectionManager, index: u32) -> Self {
        Database {
            manager,
            index,
            flags: CommandFlags::None,
        }
    }

    /// Returns a copy of this handle sending commands with `flags`.
    pub fn with_flags(&self, flags: CommandFlags) -> Self {
        Database {
            manager: self.manager.clone(),
            index: self.index,
            flags,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn flags(&self) -> CommandFlags {
        self.flags
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn codec(&self) -> &JsonCodec {
        self.manager.codec()
    }

    /// Runs a command; `None` means it was sent fire-and-forget.
    pub(crate) fn call(&self, args: &[&[u8]]) -> StoreResult<Option<RespValue>> {
        let link = self.manager.current()?;
        match self.flags {
            CommandFlags::FireAndForget => {
                link.send(self.index, args)?;
                Ok(None)
            }
            CommandFlags::None => Ok(Some(link.exec(self.index, args)?)),
        }
    }

    pub(crate) fn call_integer(&self, args: &[&[u8]]) -> StoreResult<i64> {
        match self.call(args)? {
            Some(reply) => Ok(reply.into_integer()?),
            None => Ok(0),
        }
    }

    pub(crate) fn call_bool(&self, args: &[&[u8]]) -> StoreResult<bool> {
        Ok(self.call_integer(args)? > 0)
    }

    pub(crate) fn call_bulk(&self, args: &[&[u8]]) -> StoreResult<Option<Vec<u8>>> {
        match self.call(args)? {
            Some(reply) => Ok(reply.into_bulk()?),
            None => Ok(None),
        }
    }

    pub(crate) fn call_array(&self, args: &[&[u8]]) -> StoreResult<Vec<RespValue>> {
        match self.call(args)? {
            Some(reply) => Ok(reply.into_array()?),
            None => Ok(Vec::new()),
        }
    }

    pub(crate) fn encode<T: Serialize + ?Sized>(&self, value: &T) -> StoreResult<String> {
        Ok(self.codec().encode(value)?)
    }

    pub(crate) fn decode<T>(&self, data: Option<&[u8]>) -> StoreResult<T>
    where
        T: DeserializeOwned + Default,
    {
        Ok(self.codec().decode(data)?)
    }
}

/// Converts a bulk item of an array reply into text.
pub(crate) fn bulk_text(item: RespValue) -> StoreResult<String> {
    let data = item.into_bulk()?.unwrap_or_default();
    Ok(String::from_utf8_lossy(&data).into_owned())
}

/// Builds `[command, key, extra...]` argument lists.
pub(crate) fn with_key<'a>(command: &'a [u8], key: &'a str, extra: &[&'a [u8]]) -> Vec<&'a [u8]> {
    let mut args = Vec::with_capacity(2 + extra.len());
    args.push(command);
    args.push(key.as_bytes());
    args.extend_from_slice(extra);
    args
}

/// Splits a `[cursor, [items...]]` scan reply.
pub(crate) fn scan_page(reply: RespValue) -> StoreResult<(Vec<u8>, Vec<RespValue>)> {
    let mut parts = reply.into_array()?.into_iter();
    match (parts.next(), parts.next()) {
        (Some(cursor), Some(batch)) => {
            let cursor = cursor.into_bulk()?.unwrap_or_default();
            Ok((cursor, batch.into_array()?))
        }
        _ => Err(StoreError::Protocol(ClientError::UnexpectedResponse)),
    }
}

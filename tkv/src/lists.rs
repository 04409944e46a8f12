//! List push and pop at either end.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::database::Database;
use crate::error::{StoreError, StoreResult};
use crate::strings::SetCondition;

#[derive(Clone, Copy)]
enum End {
    Left,
    Right,
}

impl End {
    fn push_command(self, condition: SetCondition) -> StoreResult<&'static [u8]> {
        match (self, condition) {
            (End::Left, SetCondition::Always) => Ok(b"LPUSH"),
            (End::Left, SetCondition::IfExists) => Ok(b"LPUSHX"),
            (End::Right, SetCondition::Always) => Ok(b"RPUSH"),
            (End::Right, SetCondition::IfExists) => Ok(b"RPUSHX"),
            (end, SetCondition::IfNotExists) => Err(StoreError::UnsupportedCondition {
                command: match end {
                    End::Left => "LPUSH",
                    End::Right => "RPUSH",
                },
                condition,
            }),
        }
    }

    fn pop_command(self) -> &'static [u8] {
        match self {
            End::Left => b"LPOP",
            End::Right => b"RPOP",
        }
    }
}

impl Database {
    /// Prepends `value` and returns the new list length.
    ///
    /// With `IfExists` nothing is written to a missing key and 0 is returned.
    pub fn lpush<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        condition: SetCondition,
    ) -> StoreResult<u64> {
        self.push(End::Left, key, value, condition)
    }

    /// Appends `value` and returns the new list length.
    pub fn rpush<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        condition: SetCondition,
    ) -> StoreResult<u64> {
        self.push(End::Right, key, value, condition)
    }

    /// Removes and decodes the first element; an empty list yields `T::default()`.
    pub fn lpop<T: DeserializeOwned + Default>(&self, key: &str) -> StoreResult<T> {
        self.pop(End::Left, key)
    }

    /// Removes and decodes the last element.
    pub fn rpop<T: DeserializeOwned + Default>(&self, key: &str) -> StoreResult<T> {
        self.pop(End::Right, key)
    }

    fn push<T: Serialize + ?Sized>(
        &self,
        end: End,
        key: &str,
        value: &T,
        condition: SetCondition,
    ) -> StoreResult<u64> {
        let command = end.push_command(condition)?;
        let text = self.encode(value)?;
        Ok(self.call_integer(&[command, key.as_bytes(), text.as_bytes()])?.max(0) as u64)
    }

    fn pop<T: DeserializeOwned + Default>(&self, end: End, key: &str) -> StoreResult<T> {
        let data = self.call_bulk(&[end.pop_command(), key.as_bytes()])?;
        self.decode(data.as_deref())
    }
}

//! # JSON Value Codec
//!
//! Purpose: Turn typed values into the text blobs stored under keys, fields,
//! members and list elements, and back.
//!
//! ## Usage Notes
//!
//! - Absent values (anything serializing to JSON `null`) encode to the empty
//!   string; absent or empty input decodes to `T::default()`.
//! - Date/time fields opt into the codec's format with
//!   `#[serde(with = "tkv::codec::datetime")]` (or `datetime::option`). The
//!   format in effect is the one of the `JsonCodec` performing the call;
//!   outside a codec call the default `%Y-%m-%d %H:%M:%S` applies.
//!
//! ```rust
//! use chrono::NaiveDate;
//! use serde::{Deserialize, Serialize};
//! use tkv::codec::JsonCodec;
//!
//! #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
//! struct Order {
//!     id: u64,
//!     #[serde(with = "tkv::codec::datetime::option")]
//!     placed_at: Option<chrono::NaiveDateTime>,
//! }
//!
//! let codec = JsonCodec::new();
//! let order = Order {
//!     id: 7,
//!     placed_at: NaiveDate::from_ymd_opt(2024, 5, 1).and_then(|d| d.and_hms_opt(8, 30, 0)),
//! };
//! let text = codec.encode(&order).unwrap();
//! assert_eq!(text, r#"{"id":7,"placed_at":"2024-05-01 08:30:00"}"#);
//! assert_eq!(codec.decode_text::<Order>(Some(&text)).unwrap(), order);
//! ```

use std::cell::RefCell;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Date/time layout used unless a codec is configured otherwise.
pub const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Result type for codec calls.
pub type CodecResult<T> = Result<T, CodecError>;

/// Codec failures.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

thread_local! {
    static ACTIVE_FORMAT: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Installs a date/time format for the current thread until dropped.
struct FormatScope {
    previous: Option<String>,
}

impl FormatScope {
    fn enter(format: &str) -> Self {
        let previous = ACTIVE_FORMAT.with(|cell| cell.replace(Some(format.to_string())));
        FormatScope { previous }
    }
}

impl Drop for FormatScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE_FORMAT.with(|cell| {
            cell.replace(previous);
        });
    }
}

fn with_active_format<R>(f: impl FnOnce(&str) -> R) -> R {
    ACTIVE_FORMAT.with(|cell| match cell.borrow().as_deref() {
        Some(format) => f(format),
        None => f(DEFAULT_DATETIME_FORMAT),
    })
}

/// JSON codec with a configurable date/time format.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    datetime_format: String,
}

impl Default for JsonCodec {
    fn default() -> Self {
        JsonCodec {
            datetime_format: DEFAULT_DATETIME_FORMAT.to_string(),
        }
    }
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a `chrono` strftime layout for `datetime` fields.
    pub fn with_datetime_format(format: impl Into<String>) -> Self {
        JsonCodec {
            datetime_format: format.into(),
        }
    }

    pub fn datetime_format(&self) -> &str {
        &self.datetime_format
    }

    /// Encodes `value`; absent values become the empty string.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CodecResult<String> {
        let _scope = FormatScope::enter(&self.datetime_format);
        let text = serde_json::to_string(value).map_err(CodecError::Encode)?;
        if text == "null" {
            return Ok(String::new());
        }
        Ok(text)
    }

    /// Decodes stored bytes; `None` or empty input yields `T::default()`.
    pub fn decode<T: DeserializeOwned + Default>(&self, data: Option<&[u8]>) -> CodecResult<T> {
        match data {
            None => Ok(T::default()),
            Some(data) if data.is_empty() => Ok(T::default()),
            Some(data) => {
                let _scope = FormatScope::enter(&self.datetime_format);
                serde_json::from_slice(data).map_err(CodecError::Decode)
            }
        }
    }

    /// Text flavour of [`JsonCodec::decode`].
    pub fn decode_text<T: DeserializeOwned + Default>(&self, text: Option<&str>) -> CodecResult<T> {
        self.decode(text.map(str::as_bytes))
    }
}

/// Serde adapter for `chrono::NaiveDateTime` using the active codec format.
pub mod datetime {
    use std::fmt::Write;

    use chrono::NaiveDateTime;
    use serde::{de, ser, Deserialize, Deserializer, Serializer};

    use super::with_active_format;

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut text = String::with_capacity(19);
        with_active_format(|format| write!(text, "{}", value.format(format)))
            .map_err(|_| ser::Error::custom("invalid date/time format"))?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        with_active_format(|format| NaiveDateTime::parse_from_str(&text, format))
            .map_err(de::Error::custom)
    }

    /// Same as the parent module for `Option<NaiveDateTime>`.
    pub mod option {
        use chrono::NaiveDateTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
        where
            D: Deserializer<'de>,
        {
            #[derive(Deserialize)]
            struct Wrapped(#[serde(with = "crate::codec::datetime")] NaiveDateTime);

            let wrapped: Option<Wrapped> = Option::deserialize(deserializer)?;
            Ok(wrapped.map(|Wrapped(value)| value))
        }
    }
}

use std::{collections::HashMap, str::FromStr};

use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result, models::from_millis};

/// Typed view over the fields of one stored hash.
pub(super) struct Record<'a> {
    key: &'a str,
    fields: HashMap<String, String>,
}

impl<'a> Record<'a> {
    pub fn new(key: &'a str, fields: HashMap<String, String>) -> Self {
        Record { key, fields }
    }

    fn raw(&self, field: &str) -> Result<&str> {
        self.fields
            .get(field)
            .map(String::as_str)
            .ok_or_else(|| Error::corrupt(self.key, format!("missing {field}")))
    }

    pub fn string(&self, field: &str) -> Result<String> {
        self.raw(field).map(str::to_owned)
    }

    /// Profile-style fields that may simply be absent.
    pub fn string_or_default(&self, field: &str) -> String {
        self.fields.get(field).cloned().unwrap_or_default()
    }

    pub fn parse<T: FromStr>(&self, field: &str) -> Result<T> {
        let raw = self.raw(field)?;
        raw.parse()
            .map_err(|_| Error::corrupt(self.key, format!("{field} has unexpected value {raw:?}")))
    }

    /// Empty or missing means none.
    pub fn optional_uuid(&self, field: &str) -> Result<Option<Uuid>> {
        match self.fields.get(field).map(String::as_str) {
            None | Some("") => Ok(None),
            Some(_) => self.parse(field).map(Some),
        }
    }

    pub fn timestamp(&self, field: &str) -> Result<OffsetDateTime> {
        let millis = self.parse(field)?;
        from_millis(millis).ok_or_else(|| Error::corrupt(self.key, format!("{field} out of range")))
    }
}

pub(super) fn epoch_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

pub(super) fn optional(id: Option<Uuid>) -> String {
    id.map(|id| id.to_string()).unwrap_or_default()
}

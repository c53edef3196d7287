//! Bounded header table attached to requests and responses.
//!
//! # Design
//! The table mirrors the fixed-size C layout used at the FFI boundary: at most
//! `HEADER_CAPACITY` entries, each name at most `HEADER_NAME_LEN` bytes and
//! each value at most `HEADER_VALUE_LEN` bytes. Enforcing the bounds here means
//! any table that exists can be written into the C layout without truncation.
//!
//! Entries keep insertion order and names are not deduplicated.

use crate::error::ProcessorError;

/// Maximum number of entries in a `HeaderTable`.
pub const HEADER_CAPACITY: usize = 256;

/// Maximum length of a header name in bytes.
pub const HEADER_NAME_LEN: usize = 256;

/// Maximum length of a header value in bytes.
pub const HEADER_VALUE_LEN: usize = 4096 - HEADER_NAME_LEN;

/// A single name/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

/// Ordered, bounded collection of header entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderTable {
    entries: Vec<HeaderEntry>,
}

impl HeaderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    ///
    /// Fails with `CapacityExceeded` when the table is full or either string
    /// is over its length bound. Names and values must not contain NUL bytes,
    /// since they could not survive the C layout.
    pub fn insert(&mut self, name: &str, value: &str) -> Result<(), ProcessorError> {
        if self.entries.len() >= HEADER_CAPACITY
            || name.len() > HEADER_NAME_LEN
            || value.len() > HEADER_VALUE_LEN
        {
            return Err(ProcessorError::CapacityExceeded);
        }
        if name.is_empty() || name.contains('\0') || value.contains('\0') {
            return Err(ProcessorError::InvalidHeader(name.to_string()));
        }
        self.entries.push(HeaderEntry {
            name: name.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    /// Iterate over `(name, value)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= HEADER_CAPACITY
    }

    /// First value stored under `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .map(|e| e.value.as_str())
    }

    /// Copy the entries into a transport header map.
    pub(crate) fn to_header_map(&self) -> Result<http::HeaderMap, ProcessorError> {
        let mut map = http::HeaderMap::with_capacity(self.entries.len());
        for entry in &self.entries {
            let name = http::HeaderName::from_bytes(entry.name.as_bytes())
                .map_err(|_| ProcessorError::InvalidHeader(entry.name.clone()))?;
            let value = http::HeaderValue::from_str(&entry.value)
                .map_err(|_| ProcessorError::InvalidHeader(entry.name.clone()))?;
            map.append(name, value);
        }
        Ok(map)
    }

    /// Build a table from transport response headers.
    ///
    /// Entries that do not fit are skipped; the returned count says how many.
    pub(crate) fn from_header_map(map: &http::HeaderMap) -> (Self, usize) {
        let mut table = HeaderTable::new();
        let mut dropped = 0;
        for (name, value) in map {
            let value = String::from_utf8_lossy(value.as_bytes());
            if table.insert(name.as_str(), &value).is_err() {
                dropped += 1;
            }
        }
        (table, dropped)
    }
}

impl<'a> IntoIterator for &'a HeaderTable {
    type Item = &'a HeaderEntry;
    type IntoIter = std::slice::Iter<'a, HeaderEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_order_and_duplicates() {
        let mut table = HeaderTable::new();
        table.insert("Accept", "text/plain").unwrap();
        table.insert("X-Id", "1").unwrap();
        table.insert("X-Id", "2").unwrap();

        let pairs: Vec<_> = table.iter().collect();
        assert_eq!(
            pairs,
            vec![("Accept", "text/plain"), ("X-Id", "1"), ("X-Id", "2")]
        );
    }

    #[test]
    fn iteration_is_restartable() {
        let mut table = HeaderTable::new();
        table.insert("A", "1").unwrap();
        assert_eq!(table.iter().count(), 1);
        assert_eq!(table.iter().count(), 1);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut table = HeaderTable::new();
        for i in 0..HEADER_CAPACITY {
            table.insert(&format!("h{i}"), "v").unwrap();
        }
        assert!(table.is_full());
        let err = table.insert("one-more", "v").unwrap_err();
        assert!(matches!(err, ProcessorError::CapacityExceeded));
        assert_eq!(table.len(), HEADER_CAPACITY);
    }

    #[test]
    fn length_bounds_are_inclusive() {
        let mut table = HeaderTable::new();
        table
            .insert(&"n".repeat(HEADER_NAME_LEN), &"v".repeat(HEADER_VALUE_LEN))
            .unwrap();

        let err = table.insert(&"n".repeat(HEADER_NAME_LEN + 1), "v").unwrap_err();
        assert!(matches!(err, ProcessorError::CapacityExceeded));
        let err = table.insert("n", &"v".repeat(HEADER_VALUE_LEN + 1)).unwrap_err();
        assert!(matches!(err, ProcessorError::CapacityExceeded));
    }

    #[test]
    fn nul_bytes_are_rejected() {
        let mut table = HeaderTable::new();
        assert!(table.insert("a\0b", "v").is_err());
        assert!(table.insert("a", "v\0").is_err());
        assert!(table.insert("", "v").is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn get_is_case_insensitive() {
        let mut table = HeaderTable::new();
        table.insert("Content-Type", "application/json").unwrap();
        assert_eq!(table.get("content-type"), Some("application/json"));
        assert_eq!(table.get("missing"), None);
    }

    #[test]
    fn to_header_map_rejects_invalid_names() {
        let mut table = HeaderTable::new();
        table.insert("bad name", "v").unwrap();
        assert!(matches!(
            table.to_header_map(),
            Err(ProcessorError::InvalidHeader(_))
        ));
    }

    #[test]
    fn header_map_conversion_keeps_duplicates() {
        let mut table = HeaderTable::new();
        table.insert("x-a", "1").unwrap();
        table.insert("x-a", "2").unwrap();
        let map = table.to_header_map().unwrap();
        assert_eq!(map.get_all("x-a").iter().count(), 2);

        let (back, dropped) = HeaderTable::from_header_map(&map);
        assert_eq!(dropped, 0);
        assert_eq!(back.iter().collect::<Vec<_>>(), vec![("x-a", "1"), ("x-a", "2")]);
    }
}

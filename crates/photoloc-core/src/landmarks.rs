//! Curated landmark table.
//!
//! Maps case-folded landmark names to a display name, region and
//! coordinates. The default table is embedded at compile time from
//! `contrib/landmarks.toml`; deployments can load their own file instead.
//! Entry order is preserved because it is the vocabulary order seen by the
//! matcher, and therefore its tie-break order.

use crate::types::Coordinate;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

const DEFAULT_TABLE: &str = include_str!("../../../contrib/landmarks.toml");

#[derive(Error, Debug)]
pub enum TableError {
    #[error("cannot read landmark table {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("bad landmark TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate landmark name: {0}")]
    Duplicate(String),
    #[error("landmark {name} has out-of-range coordinates ({lat}, {lon})")]
    OutOfRange { name: String, lat: f64, lon: f64 },
    #[error("landmark entry with empty name")]
    EmptyName,
}

#[derive(Debug, Deserialize)]
struct TableFile {
    #[serde(default)]
    landmark: Vec<RecordEntry>,
}

#[derive(Debug, Deserialize)]
struct RecordEntry {
    name: String,
    display_name: String,
    region: String,
    lat: f64,
    lon: f64,
}

/// One curated landmark.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkRecord {
    /// Case-folded lookup key; also the label scored by the matcher.
    pub name: String,
    pub display_name: String,
    pub region: String,
    pub coordinate: Coordinate,
}

/// Immutable landmark lookup, shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct LandmarkTable {
    records: Vec<LandmarkRecord>,
    index: HashMap<String, usize>,
}

impl LandmarkTable {
    /// The table compiled into the binary.
    pub fn embedded() -> Result<Self, TableError> {
        Self::from_toml(DEFAULT_TABLE)
    }

    /// Load a table from a TOML file on disk.
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let src = std::fs::read_to_string(path).map_err(|source| TableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let table = Self::from_toml(&src)?;
        tracing::info!(path = %path.display(), count = table.len(), "loaded landmark table");
        Ok(table)
    }

    pub fn from_toml(src: &str) -> Result<Self, TableError> {
        let file: TableFile = toml::from_str(src)?;
        let mut records = Vec::with_capacity(file.landmark.len());
        let mut index = HashMap::with_capacity(file.landmark.len());

        for entry in file.landmark {
            let name = fold(&entry.name);
            if name.is_empty() {
                return Err(TableError::EmptyName);
            }
            if index.contains_key(&name) {
                return Err(TableError::Duplicate(name));
            }
            let coordinate = Coordinate::new(entry.lat, entry.lon).ok_or_else(|| {
                TableError::OutOfRange {
                    name: name.clone(),
                    lat: entry.lat,
                    lon: entry.lon,
                }
            })?;

            index.insert(name.clone(), records.len());
            records.push(LandmarkRecord {
                name,
                display_name: entry.display_name,
                region: entry.region,
                coordinate,
            });
        }

        Ok(Self { records, index })
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&LandmarkRecord> {
        self.index.get(&fold(name)).map(|&i| &self.records[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Landmark names in table order.
    pub fn names(&self) -> Vec<String> {
        self.records.iter().map(|r| r.name.clone()).collect()
    }

    pub fn records(&self) -> &[LandmarkRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Canonical key form: trimmed, lower-cased.
pub fn fold(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_table_loads() {
        let table = LandmarkTable::embedded().unwrap();
        assert_eq!(table.len(), 43);

        let petronas = table.get("petronas towers").unwrap();
        assert_eq!(petronas.display_name, "Petronas Twin Towers");
        assert_eq!(petronas.region, "Kuala Lumpur");
        assert_eq!(petronas.coordinate, Coordinate { latitude: 3.1579, longitude: 101.7116 });
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let table = LandmarkTable::embedded().unwrap();
        assert!(table.contains("Eiffel Tower"));
        assert!(table.contains("  STATUE OF LIBERTY "));
        assert!(!table.contains("atlantis"));
    }

    #[test]
    fn test_names_preserve_file_order() {
        let table = LandmarkTable::embedded().unwrap();
        let names = table.names();
        assert_eq!(names.first().map(String::as_str), Some("petronas towers"));
        assert_eq!(names.last().map(String::as_str), Some("taj mahal"));
    }

    #[test]
    fn test_names_are_folded() {
        let table = LandmarkTable::from_toml(
            r#"
            [[landmark]]
            name = "Great Wall"
            display_name = "Great Wall of China"
            region = "China"
            lat = 40.4319
            lon = 116.5704
            "#,
        )
        .unwrap();
        assert_eq!(table.names(), vec!["great wall".to_string()]);
    }

    #[test]
    fn test_duplicate_after_folding_rejected() {
        let src = r#"
            [[landmark]]
            name = "Big Ben"
            display_name = "Big Ben"
            region = "London"
            lat = 51.5007
            lon = -0.1246

            [[landmark]]
            name = "big ben"
            display_name = "Big Ben"
            region = "London"
            lat = 51.5007
            lon = -0.1246
        "#;
        assert!(matches!(
            LandmarkTable::from_toml(src),
            Err(TableError::Duplicate(name)) if name == "big ben"
        ));
    }

    #[test]
    fn test_out_of_range_rejected() {
        let src = r#"
            [[landmark]]
            name = "nowhere"
            display_name = "Nowhere"
            region = "Void"
            lat = 95.0
            lon = 0.0
        "#;
        assert!(matches!(
            LandmarkTable::from_toml(src),
            Err(TableError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_empty_file_is_empty_table() {
        let table = LandmarkTable::from_toml("").unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let err = LandmarkTable::load(Path::new("/nonexistent/landmarks.toml")).unwrap_err();
        assert!(matches!(err, TableError::Io { .. }));
    }
}

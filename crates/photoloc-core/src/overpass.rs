//! Landmark coordinate resolution.
//!
//! The curated table answers first. Names it does not know go to an
//! Overpass API interpreter as a case-insensitive name search over nodes and
//! ways; the first hit wins. The external search is a single attempt.

use crate::landmarks::{fold, LandmarkTable};
use crate::types::{Coordinate, CoordinateSource};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";
pub const DEFAULT_OVERPASS_TIMEOUT: Duration = Duration::from_secs(15);
const OVERPASS_QUERY_TIMEOUT_SECONDS: u32 = 25;

#[derive(Error, Debug)]
pub enum OverpassError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid Overpass JSON payload: {0}")]
    Decode(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No coordinates available")]
    NoCoordinates,
}

/// Point-of-interest search by name.
pub trait PoiSearch: Send + Sync {
    /// Coordinates of the first element whose name matches, if any.
    fn find_by_name(&self, name: &str) -> Result<Option<Coordinate>, OverpassError>;
}

#[derive(Debug, Deserialize)]
struct OverpassResponseDto {
    #[serde(default)]
    elements: Vec<OverpassElementDto>,
}

#[derive(Debug, Deserialize)]
struct OverpassElementDto {
    lat: Option<f64>,
    lon: Option<f64>,
    center: Option<OverpassCenterDto>,
}

#[derive(Debug, Deserialize)]
struct OverpassCenterDto {
    lat: f64,
    lon: f64,
}

impl OverpassElementDto {
    /// Way centre when present, else the node position.
    fn coordinates(&self) -> Option<(f64, f64)> {
        if let Some(center) = &self.center {
            return Some((center.lat, center.lon));
        }
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// Blocking Overpass API client.
pub struct OverpassClient {
    client: Client,
    endpoint: String,
}

impl OverpassClient {
    pub fn new(endpoint: &str, timeout: Duration, user_agent: &str) -> Result<Self, OverpassError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

impl PoiSearch for OverpassClient {
    fn find_by_name(&self, name: &str) -> Result<Option<Coordinate>, OverpassError> {
        let query = build_query(name);
        tracing::debug!(endpoint = %self.endpoint, name, "Overpass query");

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[("data", query)])
            .send()?;

        let status = response.status();
        let body = response.bytes()?;
        if !status.is_success() {
            return Err(OverpassError::Status {
                status,
                body: body_preview(&body),
            });
        }

        first_coordinate(&body)
    }
}

fn build_query(name: &str) -> String {
    let name = escape_quoted(name);
    format!(
        "[out:json][timeout:{OVERPASS_QUERY_TIMEOUT_SECONDS}];\n(\n  node[\"name\"~\"{name}\",i];\n  way[\"name\"~\"{name}\",i];\n);\nout center;"
    )
}

fn escape_quoted(raw: &str) -> String {
    raw.replace('\\', r"\\").replace('"', "\\\"")
}

/// Coordinate of the first element; `Ok(None)` when there are no elements.
fn first_coordinate(body: &[u8]) -> Result<Option<Coordinate>, OverpassError> {
    let decoded: OverpassResponseDto =
        serde_json::from_slice(body).map_err(|e| OverpassError::Decode(e.to_string()))?;
    let Some(first) = decoded.elements.first() else {
        return Ok(None);
    };
    let (lat, lon) = first
        .coordinates()
        .ok_or_else(|| OverpassError::Decode("first element has no coordinates".into()))?;
    Coordinate::new(lat, lon)
        .map(Some)
        .ok_or_else(|| OverpassError::Decode(format!("coordinates out of range ({lat}, {lon})")))
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    compact.chars().take(PREVIEW_CHAR_LIMIT).collect()
}

/// Resolved landmark position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandmarkLocation {
    pub coordinate: Coordinate,
    pub source: CoordinateSource,
}

/// Table-first landmark coordinate lookup with optional external search.
pub struct LandmarkResolver {
    table: Arc<LandmarkTable>,
    search: Option<Box<dyn PoiSearch>>,
}

impl LandmarkResolver {
    pub fn new(table: Arc<LandmarkTable>, search: Option<Box<dyn PoiSearch>>) -> Self {
        Self { table, search }
    }

    /// Table only; unknown names never leave the process.
    pub fn offline(table: Arc<LandmarkTable>) -> Self {
        Self::new(table, None)
    }

    pub fn resolve(&self, name: &str) -> Result<LandmarkLocation, ResolveError> {
        if let Some(record) = self.table.get(name) {
            return Ok(LandmarkLocation {
                coordinate: record.coordinate,
                source: CoordinateSource::Predefined,
            });
        }

        let Some(search) = &self.search else {
            tracing::info!(name, "landmark not in table and no search backend");
            return Err(ResolveError::NoCoordinates);
        };

        match search.find_by_name(&fold(name)) {
            Ok(Some(coordinate)) => {
                tracing::info!(name, %coordinate, "Overpass match");
                Ok(LandmarkLocation {
                    coordinate,
                    source: CoordinateSource::Overpass,
                })
            }
            Ok(None) => {
                tracing::info!(name, "Overpass returned no elements");
                Err(ResolveError::NoCoordinates)
            }
            Err(e) => {
                tracing::warn!(name, error = %e, "Overpass lookup failed");
                Err(ResolveError::NoCoordinates)
            }
        }
    }
}

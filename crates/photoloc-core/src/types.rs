use serde::{Deserialize, Serialize};
use std::fmt;

/// Address used when no stage produced anything.
pub const UNKNOWN: &str = "Unknown";
/// Geocoder answered but had no address for the coordinate.
pub const UNKNOWN_LOCATION: &str = "Unknown location";
/// Coordinate failed range validation before any lookup.
pub const INVALID_COORDINATES: &str = "Invalid coordinates";
/// Every geocoding attempt failed.
pub const GEOCODING_UNAVAILABLE: &str = "Geocoding service unavailable";

/// Decimal places kept on every coordinate.
const COORDINATE_SCALE: f64 = 1_000_000.0;

/// WGS84 latitude/longitude pair in signed decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Validate ranges and round both axes to 6 decimal places.
    ///
    /// Returns `None` for non-finite values, `|lat| > 90` or `|lon| > 180`.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let candidate = Self { latitude, longitude };
        if !candidate.is_valid() {
            return None;
        }
        Some(Self {
            latitude: round6(latitude),
            longitude: round6(longitude),
        })
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

fn round6(value: f64) -> f64 {
    (value * COORDINATE_SCALE).round() / COORDINATE_SCALE
}

/// Best landmark label for an image with its softmax score in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkMatch {
    /// Lower-cased canonical landmark name.
    pub name: String,
    pub score: f32,
}

/// Where a landmark's coordinates came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSource {
    Predefined,
    Overpass,
}

impl fmt::Display for CoordinateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Predefined => f.write_str("Predefined"),
            Self::Overpass => f.write_str("Overpass"),
        }
    }
}

/// Outcome of reverse geocoding: an address or one closed failure reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Geocoded {
    Address(String),
    /// The service answered without an address.
    NotFound,
    /// Rejected locally; no request was made.
    InvalidCoordinates,
    /// All attempts failed.
    Unavailable,
}

impl Geocoded {
    /// True only for a resolved address; sentinels are not meaningful.
    pub fn is_meaningful(&self) -> bool {
        matches!(self, Self::Address(_))
    }
}

impl fmt::Display for Geocoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(address) => f.write_str(address),
            Self::NotFound => f.write_str(UNKNOWN_LOCATION),
            Self::InvalidCoordinates => f.write_str(INVALID_COORDINATES),
            Self::Unavailable => f.write_str(GEOCODING_UNAVAILABLE),
        }
    }
}

/// Pipeline stage that produced a [`LocationResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocationMethod {
    #[default]
    None,
    GpsMetadata,
    Landmark(CoordinateSource),
}

impl fmt::Display for LocationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::GpsMetadata => f.write_str("GPS Metadata"),
            Self::Landmark(source) => write!(f, "Landmark ({source})"),
        }
    }
}

/// Final, always-displayable answer of the location pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationResult {
    pub address: String,
    pub method: LocationMethod,
    /// Coordinate the address was derived from, when one was found.
    pub coordinate: Option<Coordinate>,
    /// Landmark recognised in the image, when the landmark stage ran and matched.
    pub landmark: Option<LandmarkMatch>,
}

impl LocationResult {
    /// `("Unknown", "")`, the answer when every stage came up empty.
    pub fn unknown() -> Self {
        Self {
            address: UNKNOWN.to_string(),
            method: LocationMethod::None,
            coordinate: None,
            landmark: None,
        }
    }
}

impl Default for LocationResult {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Embedding vector produced by the vision-language model (image or label side).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Zero vectors score 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Scale to unit length in place; zero vectors are left untouched.
    pub fn normalize(&mut self) {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            self.values.iter_mut().for_each(|x| *x /= norm);
        }
    }
}

//! photoloc-core: photo location resolution.
//!
//! Reads EXIF GPS metadata when present and falls back to CLIP landmark
//! recognition over a curated table, with Overpass and Nominatim as the
//! external lookups. [`Locator`] chains the stages.

pub mod clip;
pub mod geocoder;
pub mod gps;
pub mod landmarks;
pub mod matcher;
pub mod overpass;
pub mod pipeline;
pub mod types;

pub use clip::ClipScorer;
pub use geocoder::{NominatimClient, RateLimiter, RetryPolicy, ReverseGeocode, ReverseGeocoder};
pub use gps::{extract_gps, normalize, ImageSource, RawGpsTags, RawValue};
pub use landmarks::{LandmarkRecord, LandmarkTable};
pub use matcher::{LabelScorer, LandmarkMatcher};
pub use overpass::{LandmarkLocation, LandmarkResolver, OverpassClient, PoiSearch};
pub use pipeline::Locator;
pub use types::{
    Coordinate, CoordinateSource, Embedding, Geocoded, LandmarkMatch, LocationMethod,
    LocationResult,
};

use std::path::PathBuf;

/// Default directory for model files: `$XDG_DATA_HOME/photoloc/models`,
/// falling back to `~/.local/share/photoloc/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("photoloc")
        .join("models")
}

//! Location resolution: GPS metadata first, landmark recognition second.
//!
//! Every stage reports "nothing" instead of failing, so [`Locator::locate`]
//! always returns a displayable [`LocationResult`].

use crate::gps::{self, ImageSource, RawGpsTags};
use crate::geocoder::ReverseGeocoder;
use crate::landmarks::LandmarkTable;
use crate::matcher::LandmarkMatcher;
use crate::overpass::LandmarkResolver;
use crate::types::{LocationMethod, LocationResult};
use image::DynamicImage;
use std::sync::Arc;

/// Runs the fallback chain for one image at a time.
pub struct Locator {
    table: Arc<LandmarkTable>,
    matcher: Option<LandmarkMatcher>,
    resolver: LandmarkResolver,
    geocoder: ReverseGeocoder,
}

impl Locator {
    /// `matcher` is `None` when no vision model is installed; the landmark
    /// stage is then skipped.
    pub fn new(
        table: Arc<LandmarkTable>,
        matcher: Option<LandmarkMatcher>,
        resolver: LandmarkResolver,
        geocoder: ReverseGeocoder,
    ) -> Self {
        Self {
            table,
            matcher,
            resolver,
            geocoder,
        }
    }

    /// Locate an image from a file or an in-memory upload.
    pub fn locate(&self, source: ImageSource<'_>) -> LocationResult {
        let tags = gps::extract_gps(source);
        self.resolve(tags.as_ref(), || decode_image(source))
    }

    /// Fallback chain over already-extracted GPS tags.
    ///
    /// `load_image` is only called when the landmark stage runs.
    pub fn resolve<F>(&self, gps_tags: Option<&RawGpsTags>, load_image: F) -> LocationResult
    where
        F: FnOnce() -> Option<DynamicImage>,
    {
        let mut result = LocationResult::unknown();

        if let Some(coordinate) = gps_tags.and_then(gps::normalize) {
            let geocoded = self.geocoder.address(coordinate);
            let meaningful = geocoded.is_meaningful();
            result = LocationResult {
                address: geocoded.to_string(),
                method: LocationMethod::GpsMetadata,
                coordinate: Some(coordinate),
                landmark: None,
            };
            if meaningful {
                return result;
            }
            tracing::info!(address = %result.address, "GPS address not usable; trying landmark");
        }

        let Some(matcher) = &self.matcher else {
            tracing::debug!("no landmark matcher configured");
            return result;
        };
        let Some(image) = load_image() else {
            return result;
        };
        let Some(landmark) = matcher.detect(&image) else {
            tracing::info!("no landmark detected with sufficient confidence");
            return result;
        };

        let location = match self.resolver.resolve(&landmark.name) {
            Ok(location) => location,
            Err(e) => {
                tracing::info!(landmark = %landmark.name, reason = %e, "landmark has no coordinates");
                result.landmark = Some(landmark);
                return result;
            }
        };

        let geocoded = self.geocoder.address(location.coordinate);
        if geocoded.is_meaningful() {
            return LocationResult {
                address: geocoded.to_string(),
                method: LocationMethod::Landmark(location.source),
                coordinate: Some(location.coordinate),
                landmark: Some(landmark),
            };
        }

        // Geocoder had nothing useful; label the landmark itself.
        let (address, method) = match self.table.get(&landmark.name) {
            Some(record) => (
                format!("{}, {}", record.display_name, record.region),
                LocationMethod::None,
            ),
            None => (
                format!(
                    "{} ({:.4}, {:.4})",
                    title_case(&landmark.name),
                    location.coordinate.latitude,
                    location.coordinate.longitude
                ),
                LocationMethod::Landmark(location.source),
            ),
        };
        tracing::info!(%address, "using landmark label");

        LocationResult {
            address,
            method,
            coordinate: Some(location.coordinate),
            landmark: Some(landmark),
        }
    }
}

fn decode_image(source: ImageSource<'_>) -> Option<DynamicImage> {
    let decoded = match source {
        ImageSource::Path(path) => image::open(path),
        ImageSource::Bytes(bytes) => image::load_from_memory(bytes),
    };
    match decoded {
        Ok(image) => Some(image),
        Err(e) => {
            tracing::warn!(error = %e, "cannot decode image for landmark matching");
            None
        }
    }
}

/// Upper-case the first letter of every alphabetic run, lower-case the rest.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

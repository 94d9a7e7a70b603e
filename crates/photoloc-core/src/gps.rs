//! EXIF GPS extraction and coordinate normalization.
//!
//! Extraction collects the raw GPS sub-IFD fields of an image keyed by tag
//! name. Normalization turns the latitude/longitude fields, which cameras
//! write as plain numbers, rationals or degree/minute/second sequences,
//! into a validated signed [`Coordinate`].

use crate::types::Coordinate;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Seek};
use std::path::Path;

pub const GPS_LATITUDE: &str = "GPSLatitude";
pub const GPS_LATITUDE_REF: &str = "GPSLatitudeRef";
pub const GPS_LONGITUDE: &str = "GPSLongitude";
pub const GPS_LONGITUDE_REF: &str = "GPSLongitudeRef";

/// One raw EXIF value as stored in the file.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Int(i64),
    Float(f64),
    /// Numerator / denominator.
    Rational(i64, i64),
    Text(String),
    Seq(Vec<RawValue>),
}

/// GPS tag name → raw value, e.g. `"GPSLatitude" → Seq[(3,1), (9,1), (2844,100)]`.
pub type RawGpsTags = BTreeMap<String, RawValue>;

/// Where an image comes from: a file on disk or an uploaded buffer.
#[derive(Debug, Clone, Copy)]
pub enum ImageSource<'a> {
    Path(&'a Path),
    Bytes(&'a [u8]),
}

/// Read the GPS block of an image.
///
/// Returns `None` when the image has no EXIF data, no GPS fields, or cannot
/// be read at all. The three cases are only distinguished in the logs.
pub fn extract_gps(source: ImageSource<'_>) -> Option<RawGpsTags> {
    match source {
        ImageSource::Path(path) => {
            let file = match File::open(path) {
                Ok(file) => file,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot open image for EXIF");
                    return None;
                }
            };
            read_gps(&mut BufReader::new(file))
        }
        ImageSource::Bytes(bytes) => read_gps(&mut Cursor::new(bytes)),
    }
}

fn read_gps<R: BufRead + Seek>(reader: &mut R) -> Option<RawGpsTags> {
    let exif = match exif::Reader::new().read_from_container(reader) {
        Ok(exif) => exif,
        Err(exif::Error::NotFound(_)) => {
            tracing::info!("no EXIF data found");
            return None;
        }
        Err(e) => {
            tracing::warn!(error = %e, "EXIF read failed");
            return None;
        }
    };

    let tags: RawGpsTags = exif
        .fields()
        .filter(|f| f.ifd_num == exif::In::PRIMARY && f.tag.context() == exif::Context::Gps)
        .filter_map(|f| Some((f.tag.to_string(), raw_value(&f.value)?)))
        .collect();

    if tags.is_empty() {
        tracing::info!("no GPS fields in EXIF data");
        return None;
    }

    tracing::debug!(keys = ?tags.keys().collect::<Vec<_>>(), "EXIF GPS fields");
    Some(tags)
}

/// Map an EXIF value onto [`RawValue`]. EXIF always stores a count, so
/// numeric fields become sequences; ASCII becomes text.
fn raw_value(value: &exif::Value) -> Option<RawValue> {
    fn seq<T>(items: &[T], f: impl Fn(&T) -> RawValue) -> RawValue {
        RawValue::Seq(items.iter().map(f).collect())
    }

    let raw = match value {
        exif::Value::Ascii(parts) => {
            let text = parts
                .iter()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .collect::<Vec<_>>()
                .join(" ");
            RawValue::Text(text)
        }
        exif::Value::Byte(v) => seq(v, |&x| RawValue::Int(i64::from(x))),
        exif::Value::Short(v) => seq(v, |&x| RawValue::Int(i64::from(x))),
        exif::Value::Long(v) => seq(v, |&x| RawValue::Int(i64::from(x))),
        exif::Value::SByte(v) => seq(v, |&x| RawValue::Int(i64::from(x))),
        exif::Value::SShort(v) => seq(v, |&x| RawValue::Int(i64::from(x))),
        exif::Value::SLong(v) => seq(v, |&x| RawValue::Int(i64::from(x))),
        exif::Value::Float(v) => seq(v, |&x| RawValue::Float(f64::from(x))),
        exif::Value::Double(v) => seq(v, |&x| RawValue::Float(x)),
        exif::Value::Rational(v) => seq(v, |r| {
            RawValue::Rational(i64::from(r.num), i64::from(r.denom))
        }),
        exif::Value::SRational(v) => seq(v, |r| {
            RawValue::Rational(i64::from(r.num), i64::from(r.denom))
        }),
        _ => return None,
    };
    Some(raw)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Latitude,
    Longitude,
}

/// Convert raw GPS tags into a validated coordinate.
///
/// Requires latitude, longitude and both hemisphere references. Any missing
/// field, unsupported value shape or out-of-range result yields `None`.
pub fn normalize(tags: &RawGpsTags) -> Option<Coordinate> {
    let fields = [GPS_LATITUDE, GPS_LATITUDE_REF, GPS_LONGITUDE, GPS_LONGITUDE_REF];
    let missing: Vec<&str> = fields
        .iter()
        .copied()
        .filter(|k| !tags.contains_key(*k))
        .collect();
    if !missing.is_empty() {
        tracing::info!(?missing, "GPS fields missing");
        return None;
    }

    let lat = signed_axis(&tags[GPS_LATITUDE], &tags[GPS_LATITUDE_REF], Axis::Latitude);
    let lon = signed_axis(&tags[GPS_LONGITUDE], &tags[GPS_LONGITUDE_REF], Axis::Longitude);
    let (Some(lat), Some(lon)) = (lat, lon) else {
        tracing::info!("GPS coordinate conversion failed");
        return None;
    };

    match Coordinate::new(lat, lon) {
        Some(coordinate) => {
            tracing::info!(lat = coordinate.latitude, lon = coordinate.longitude, "GPS coordinate");
            Some(coordinate)
        }
        None => {
            tracing::info!(lat, lon, "GPS coordinate out of range");
            None
        }
    }
}

fn signed_axis(value: &RawValue, reference: &RawValue, axis: Axis) -> Option<f64> {
    let negative = hemisphere_is_negative(reference, axis)?;
    let magnitude = degrees(value)?;
    Some(if negative { -magnitude } else { magnitude })
}

/// `Some(true)` for S/W, `Some(false)` for N/E, `None` for anything else
/// or a reference belonging to the other axis.
fn hemisphere_is_negative(reference: &RawValue, axis: Axis) -> Option<bool> {
    let RawValue::Text(text) = reference else {
        return None;
    };
    let c = text
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .chars()
        .next()?
        .to_ascii_uppercase();
    match (axis, c) {
        (Axis::Latitude, 'N') | (Axis::Longitude, 'E') => Some(false),
        (Axis::Latitude, 'S') | (Axis::Longitude, 'W') => Some(true),
        _ => None,
    }
}

/// Decimal degrees from a scalar, `[deg]`, `[deg, min]` or `[deg, min, sec]`.
fn degrees(value: &RawValue) -> Option<f64> {
    match value {
        RawValue::Seq(parts) => match parts.as_slice() {
            [deg, min, sec] => Some(number(deg)? + number(min)? / 60.0 + number(sec)? / 3600.0),
            [deg, min] => Some(number(deg)? + number(min)? / 60.0),
            [deg] => number(deg),
            _ => None,
        },
        scalar => number(scalar),
    }
}

fn number(value: &RawValue) -> Option<f64> {
    let n = match *value {
        RawValue::Int(i) => i as f64,
        RawValue::Float(f) => f,
        RawValue::Rational(_, 0) => return None,
        RawValue::Rational(num, den) => num as f64 / den as f64,
        RawValue::Text(_) | RawValue::Seq(_) => return None,
    };
    n.is_finite().then_some(n)
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn tags(lat: RawValue, lat_ref: &str, lon: RawValue, lon_ref: &str) -> RawGpsTags {
        RawGpsTags::from([
            (GPS_LATITUDE.to_string(), lat),
            (GPS_LATITUDE_REF.to_string(), RawValue::Text(lat_ref.into())),
            (GPS_LONGITUDE.to_string(), lon),
            (GPS_LONGITUDE_REF.to_string(), RawValue::Text(lon_ref.into())),
        ])
    }

    fn dms(d: (i64, i64), m: (i64, i64), s: (i64, i64)) -> RawValue {
        RawValue::Seq(vec![
            RawValue::Rational(d.0, d.1),
            RawValue::Rational(m.0, m.1),
            RawValue::Rational(s.0, s.1),
        ])
    }

    #[test]
    fn test_single_rational_degrees() {
        let t = tags(RawValue::Rational(3, 1), "N", RawValue::Rational(101, 1), "E");
        assert_eq!(normalize(&t), Some(Coordinate { latitude: 3.0, longitude: 101.0 }));
    }

    #[test]
    fn test_one_element_sequence() {
        let t = tags(
            RawValue::Seq(vec![RawValue::Rational(3, 1)]),
            "N",
            RawValue::Seq(vec![RawValue::Float(101.5)]),
            "E",
        );
        assert_eq!(normalize(&t), Some(Coordinate { latitude: 3.0, longitude: 101.5 }));
    }

    #[rstest]
    #[case("N", "E", 48.8584, 2.2945)]
    #[case("S", "E", -48.8584, 2.2945)]
    #[case("N", "W", 48.8584, -2.2945)]
    #[case("S", "W", -48.8584, -2.2945)]
    fn test_decimal_hemisphere_sign(
        #[case] lat_ref: &str,
        #[case] lon_ref: &str,
        #[case] lat: f64,
        #[case] lon: f64,
    ) {
        let t = tags(RawValue::Float(48.8584), lat_ref, RawValue::Float(2.2945), lon_ref);
        assert_eq!(normalize(&t), Some(Coordinate { latitude: lat, longitude: lon }));
    }

    #[rstest]
    #[case((3, 1), (9, 1), (2844, 100), 3.157_9)]
    #[case((40, 1), (26, 1), (4632, 100), 40.446_2)]
    #[case((0, 1), (30, 1), (0, 1), 0.5)]
    fn test_dms_rationals(
        #[case] d: (i64, i64),
        #[case] m: (i64, i64),
        #[case] s: (i64, i64),
        #[case] expected: f64,
    ) {
        let t = tags(dms(d, m, s), "N", RawValue::Int(10), "E");
        let c = normalize(&t).unwrap();
        assert!((c.latitude - expected).abs() < 1e-6, "got {}", c.latitude);
    }

    #[test]
    fn test_dms_mixed_plain_and_rational() {
        let lat = RawValue::Seq(vec![
            RawValue::Int(51),
            RawValue::Rational(30, 1),
            RawValue::Float(1.8),
        ]);
        let t = tags(lat, "N", RawValue::Float(0.1246), "W");
        let c = normalize(&t).unwrap();
        assert_eq!(c.latitude, 51.5005);
        assert_eq!(c.longitude, -0.1246);
    }

    #[test]
    fn test_degrees_and_minutes() {
        let lat = RawValue::Seq(vec![RawValue::Rational(22, 1), RawValue::Rational(57, 1)]);
        let t = tags(lat, "S", RawValue::Int(43), "W");
        let c = normalize(&t).unwrap();
        assert_eq!(c.latitude, -22.95);
        assert_eq!(c.longitude, -43.0);
    }

    #[test]
    fn test_rounds_to_six_places() {
        let t = tags(dms((1, 1), (0, 1), (1, 1)), "N", RawValue::Int(0), "E");
        // 1 + 1/3600 = 1.000277777...
        assert_eq!(normalize(&t).unwrap().latitude, 1.000278);
    }

    #[test]
    fn test_missing_field() {
        let mut t = tags(RawValue::Int(1), "N", RawValue::Int(2), "E");
        t.remove(GPS_LONGITUDE_REF);
        assert_eq!(normalize(&t), None);
    }

    #[rstest]
    #[case::four_elements(RawValue::Seq(vec![RawValue::Int(1); 4]))]
    #[case::empty(RawValue::Seq(vec![]))]
    #[case::zero_denominator(RawValue::Rational(3, 0))]
    #[case::text(RawValue::Text("3.1".into()))]
    #[case::nested(RawValue::Seq(vec![RawValue::Seq(vec![RawValue::Int(1)]), RawValue::Int(0)]))]
    #[case::infinite(RawValue::Float(f64::INFINITY))]
    fn test_malformed_shapes(#[case] lat: RawValue) {
        let t = tags(lat, "N", RawValue::Int(2), "E");
        assert_eq!(normalize(&t), None);
    }

    #[rstest]
    #[case::lat_too_large(91.0, 0.0)]
    #[case::lon_too_large(0.0, 180.5)]
    fn test_out_of_range(#[case] lat: f64, #[case] lon: f64) {
        let t = tags(RawValue::Float(lat), "N", RawValue::Float(lon), "E");
        assert_eq!(normalize(&t), None);
    }

    #[rstest]
    #[case::bogus("X", "E")]
    #[case::swapped_axes("E", "N")]
    #[case::empty("", "E")]
    fn test_bad_reference(#[case] lat_ref: &str, #[case] lon_ref: &str) {
        let t = tags(RawValue::Int(1), lat_ref, RawValue::Int(2), lon_ref);
        assert_eq!(normalize(&t), None);
    }

    #[test]
    fn test_reference_with_padding() {
        let t = tags(RawValue::Int(1), "s\0", RawValue::Int(2), " W ");
        assert_eq!(normalize(&t), Some(Coordinate { latitude: -1.0, longitude: -2.0 }));
    }

    #[test]
    fn test_extract_from_tiff_bytes() {
        let bytes = fixtures::kuala_lumpur_tiff();
        let tags = extract_gps(ImageSource::Bytes(&bytes)).expect("GPS tags");
        assert_eq!(tags.get(GPS_LATITUDE_REF), Some(&RawValue::Text("N".into())));
        assert_eq!(
            tags.get(GPS_LATITUDE),
            Some(&dms((3, 1), (9, 1), (2844, 100)))
        );

        let c = normalize(&tags).unwrap();
        assert!((c.latitude - 3.1579).abs() < 1e-6);
        assert!((c.longitude - 101.7116).abs() < 1e-6);
    }

    #[test]
    fn test_extract_from_jpeg_bytes() {
        let tiff = fixtures::tiff_with_gps(b'S', [(33, 1), (51, 1), (2448, 100)], b'E', [(151, 1), (12, 1), (5508, 100)]);
        let jpeg = fixtures::jpeg_with_exif(&tiff);
        let c = extract_gps(ImageSource::Bytes(&jpeg)).and_then(|t| normalize(&t)).unwrap();
        assert!((c.latitude + 33.8568).abs() < 1e-6);
        assert!((c.longitude - 151.2153).abs() < 1e-6);
    }

    #[test]
    fn test_extract_from_png_bytes() {
        let png = fixtures::png_with_exif(&fixtures::kuala_lumpur_tiff());
        let tags = extract_gps(ImageSource::Bytes(&png)).expect("GPS tags");
        let c = normalize(&tags).unwrap();
        assert!((c.latitude - 3.1579).abs() < 1e-6);
        assert!((c.longitude - 101.7116).abs() < 1e-6);
    }

    #[test]
    fn test_extract_png_without_gps_block() {
        let png = fixtures::png_with_exif(&fixtures::tiff_without_gps());
        assert_eq!(extract_gps(ImageSource::Bytes(&png)), None);
    }

    #[test]
    fn test_extract_without_gps_block() {
        let bytes = fixtures::tiff_without_gps();
        assert_eq!(extract_gps(ImageSource::Bytes(&bytes)), None);
    }

    #[test]
    fn test_extract_garbage_bytes() {
        assert_eq!(extract_gps(ImageSource::Bytes(b"definitely not an image")), None);
    }

    #[test]
    fn test_extract_missing_file() {
        let path = Path::new("/nonexistent/photoloc/missing.jpg");
        assert_eq!(extract_gps(ImageSource::Path(path)), None);
    }
}

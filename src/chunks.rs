//! Chunk metadata decoding.
//!
//! Chunk data trails the image payload as a sequence of blocks, each made of
//! the chunk bytes followed by a big-endian `u32` chunk id and a big-endian
//! `u32` length. Blocks are found by walking backward from the end of the
//! payload.

use crate::traits::{Buffer, ChunkParser, DeviceError};
use std::fmt::Write as _;
use thiserror::Error;
use tracing::debug;

/// Selector name meaning "no selection step".
pub const IGNORE_SELECTOR: &str = "Ignore";

/// Prefix turning a chunk field name into its feature name.
pub const CHUNK_FEATURE_PREFIX: &str = "Chunk";

/// Size of the id + length trailer of a chunk block.
const TRAILER_LEN: usize = 8;

/// Error aborting the decoding of one buffer.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The buffer carries no chunk data.
    #[error("No chunk found in buffer")]
    NoChunks,
    /// The parser rejected a selector value.
    #[error("Failed to set {selector} to {value}: {source}")]
    Selector {
        /// Selector feature name.
        selector: String,
        /// Requested selector value.
        value: String,
        /// Parser error.
        #[source]
        source: DeviceError,
    },
    /// Neither integer nor float decoding succeeded.
    #[error("Failed to decode {feature}: {source}")]
    Field {
        /// Chunk feature name.
        feature: String,
        /// Error of the float attempt.
        #[source]
        source: DeviceError,
    },
}

/// Fields to decode from a buffer and the selector values to iterate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    /// Field names without the `Chunk` prefix, in decode order.
    pub fields: Vec<String>,
    /// `(selector, value)` pairs applied in turn for every field.
    pub selectors: Vec<(String, String)>,
}

impl ChunkRequest {
    /// Build a request from a field list and a selector list of the form
    /// `[selector, value, value, ...]`.
    ///
    /// A selector list without any value falls back to a single
    /// [`IGNORE_SELECTOR`] step.
    pub fn from_lists(fields: Vec<String>, selector_list: &[String]) -> Self {
        let selectors = match selector_list.split_first() {
            Some((name, values)) if !values.is_empty() => values
                .iter()
                .map(|value| (name.clone(), value.clone()))
                .collect(),
            _ => vec![(IGNORE_SELECTOR.to_owned(), IGNORE_SELECTOR.to_owned())],
        };
        Self { fields, selectors }
    }

    /// Field names as handed to the device chunk list.
    pub fn chunk_list(&self) -> &[String] {
        &self.fields
    }
}

/// Decode every requested field of `buffer`.
///
/// Returns the decoded values separated by spaces, fields outer and selector
/// values inner. The first field that decodes neither as integer nor as float
/// aborts the whole buffer.
pub fn decode(
    parser: &mut dyn ChunkParser,
    buffer: &Buffer,
    request: &ChunkRequest,
) -> Result<String, DecodeError> {
    if !buffer.has_chunks {
        return Err(DecodeError::NoChunks);
    }

    let mut report = String::new();

    for field in &request.fields {
        let feature = format!("{CHUNK_FEATURE_PREFIX}{field}");

        for (selector, value) in &request.selectors {
            if selector != IGNORE_SELECTOR {
                parser.set_string_feature(selector, value).map_err(|source| {
                    DecodeError::Selector {
                        selector: selector.clone(),
                        value: value.clone(),
                        source,
                    }
                })?;
            }

            if !report.is_empty() {
                report.push(' ');
            }

            match parser.integer_value(buffer, &feature) {
                Ok(int_value) => {
                    let _ = write!(report, "{int_value}");
                }
                Err(int_err) => {
                    debug!(%feature, error = %int_err, "Integer decode failed, trying float");
                    let float_value = parser
                        .float_value(buffer, &feature)
                        .map_err(|source| DecodeError::Field {
                            feature: feature.clone(),
                            source,
                        })?;
                    report.push_str(&format_float(float_value));
                }
            }
        }
    }

    Ok(report)
}

/// Shortest form of `value` with 6 significant digits, in exponent notation
/// when the exponent is below -4 or above 5 (`1e-05`, `1.5`, `2.5e+07`).
pub fn format_float(value: f64) -> String {
    const PRECISION: i32 = 6;

    if !value.is_finite() {
        return if value.is_nan() {
            "nan".to_owned()
        } else if value > 0.0 {
            "inf".to_owned()
        } else {
            "-inf".to_owned()
        };
    }

    let scientific = format!("{value:.5e}");
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if exponent < -4 || exponent >= PRECISION {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{sign}{:02}",
            trim_fraction(mantissa),
            exponent.unsigned_abs()
        )
    } else {
        let decimals = usize::try_from(PRECISION - 1 - exponent).unwrap_or(0);
        trim_fraction(&format!("{value:.decimals$}")).to_owned()
    }
}

fn trim_fraction(digits: &str) -> &str {
    if digits.contains('.') {
        digits.trim_end_matches('0').trim_end_matches('.')
    } else {
        digits
    }
}

/// Find the data of chunk `id` in a payload.
pub fn find_chunk(payload: &[u8], id: u32) -> Option<&[u8]> {
    let mut end = payload.len();

    while end >= TRAILER_LEN {
        let trailer = payload.get(end - TRAILER_LEN..end)?;
        let (id_bytes, len_bytes) = trailer.split_at(4);
        let chunk_id = u32::from_be_bytes(id_bytes.try_into().ok()?);
        let chunk_len = u32::from_be_bytes(len_bytes.try_into().ok()?) as usize;
        let start = (end - TRAILER_LEN).checked_sub(chunk_len)?;

        if chunk_id == id {
            return payload.get(start..end - TRAILER_LEN);
        }
        end = start;
    }

    None
}

/// Write one chunk block into `dst` at `offset`.
///
/// Returns the offset just past the block, or `None` when it does not fit.
pub fn put_chunk(dst: &mut [u8], offset: usize, id: u32, data: &[u8]) -> Option<usize> {
    let len = u32::try_from(data.len()).ok()?;
    let data_end = offset.checked_add(data.len())?;
    let end = data_end.checked_add(TRAILER_LEN)?;

    dst.get_mut(offset..data_end)?.copy_from_slice(data);
    dst.get_mut(data_end..data_end + 4)?.copy_from_slice(&id.to_be_bytes());
    dst.get_mut(data_end + 4..end)?.copy_from_slice(&len.to_be_bytes());

    Some(end)
}

/// Size of a chunk block holding `data_len` bytes.
pub const fn chunk_block_len(data_len: usize) -> usize {
    data_len + TRAILER_LEN
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Result;
    use std::collections::HashMap;

    /// Parser over a fixed table keyed by `(feature, selector value)`.
    #[derive(Default)]
    struct TableParser {
        ints: HashMap<(String, String), i64>,
        floats: HashMap<(String, String), f64>,
        selector: String,
    }

    impl TableParser {
        fn with_int(mut self, feature: &str, value: i64) -> Self {
            self.ints
                .insert((feature.to_owned(), String::new()), value);
            self
        }

        fn with_float(mut self, feature: &str, selector: &str, value: f64) -> Self {
            self.floats
                .insert((feature.to_owned(), selector.to_owned()), value);
            self
        }
    }

    impl ChunkParser for TableParser {
        fn set_string_feature(&mut self, name: &str, value: &str) -> Result<()> {
            if name != "GainSelector" {
                return Err(DeviceError::unsupported(name));
            }
            value.clone_into(&mut self.selector);
            Ok(())
        }

        fn integer_value(&self, _buffer: &Buffer, name: &str) -> Result<i64> {
            self.ints
                .get(&(name.to_owned(), self.selector.clone()))
                .copied()
                .ok_or_else(|| DeviceError::Chunk {
                    name: name.to_owned(),
                    reason: "not an integer".to_owned(),
                })
        }

        fn float_value(&self, _buffer: &Buffer, name: &str) -> Result<f64> {
            self.floats
                .get(&(name.to_owned(), self.selector.clone()))
                .copied()
                .ok_or_else(|| DeviceError::Chunk {
                    name: name.to_owned(),
                    reason: "not a float".to_owned(),
                })
        }
    }

    fn chunk_buffer() -> Buffer {
        let mut buffer = Buffer::new(0);
        buffer.has_chunks = true;
        buffer
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| (*item).to_owned()).collect()
    }

    #[test]
    fn test_integer_field_reported() {
        let mut parser = TableParser::default().with_int("ChunkWidth", 1920);
        let request =
            ChunkRequest::from_lists(strings(&["Width"]), &strings(&["Ignore", "Ignore"]));

        let report = decode(&mut parser, &chunk_buffer(), &request).expect("decode should succeed");
        assert_eq!(report, "1920");
    }

    #[test]
    #[allow(clippy::approx_constant)]
    fn test_float_fallback() {
        let mut parser = TableParser::default().with_float("ChunkExposureTime", "", 3.14);
        let request =
            ChunkRequest::from_lists(strings(&["ExposureTime"]), &strings(&["Ignore", "Ignore"]));

        let report = decode(&mut parser, &chunk_buffer(), &request).expect("decode should succeed");
        assert_eq!(report, "3.14");
    }

    #[test]
    fn test_float_report_format() {
        assert_eq!(format_float(1e-5), "1e-05");
        assert_eq!(format_float(0.1 + 0.2), "0.3");
        assert_eq!(format_float(1.5), "1.5");
        assert_eq!(format_float(2.0), "2");
        assert_eq!(format_float(0.0), "0");
        assert_eq!(format_float(-0.000_25), "-0.00025");
        assert_eq!(format_float(123_456.0), "123456");
        assert_eq!(format_float(1_234_567.0), "1.23457e+06");
        assert_eq!(format_float(25_000_000.0), "2.5e+07");
        assert_eq!(format_float(999_999.5), "1e+06");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }

    #[test]
    fn test_both_decodes_failing_aborts() {
        let mut parser = TableParser::default().with_int("ChunkWidth", 640);
        let request =
            ChunkRequest::from_lists(strings(&["Width", "Bogus"]), &strings(&["Ignore", "Ignore"]));

        let err = decode(&mut parser, &chunk_buffer(), &request).expect_err("decode should fail");
        assert!(matches!(err, DecodeError::Field { ref feature, .. } if feature == "ChunkBogus"));
    }

    #[test]
    fn test_selector_iteration_order() {
        let mut parser = TableParser::default()
            .with_float("ChunkGain", "Red", 1.5)
            .with_float("ChunkGain", "Blue", 2.0)
            .with_float("ChunkBlack", "Red", 0.25)
            .with_float("ChunkBlack", "Blue", 0.5);
        let request = ChunkRequest::from_lists(
            strings(&["Gain", "Black"]),
            &strings(&["GainSelector", "Red", "Blue"]),
        );

        let report = decode(&mut parser, &chunk_buffer(), &request).expect("decode should succeed");
        assert_eq!(report, "1.5 2 0.25 0.5");
    }

    #[test]
    fn test_rejected_selector_aborts() {
        let mut parser = TableParser::default();
        let request =
            ChunkRequest::from_lists(strings(&["Gain"]), &strings(&["LineSelector", "Line0"]));

        let err = decode(&mut parser, &chunk_buffer(), &request).expect_err("decode should fail");
        assert!(matches!(err, DecodeError::Selector { .. }));
    }

    #[test]
    fn test_buffer_without_chunks() {
        let mut parser = TableParser::default().with_int("ChunkWidth", 1920);
        let request = ChunkRequest::from_lists(strings(&["Width"]), &[]);

        let err = decode(&mut parser, &Buffer::new(0), &request).expect_err("decode should fail");
        assert!(matches!(err, DecodeError::NoChunks));
    }

    #[test]
    fn test_short_selector_list_ignored() {
        let request = ChunkRequest::from_lists(strings(&["Width"]), &strings(&["GainSelector"]));
        assert_eq!(
            request.selectors,
            vec![(IGNORE_SELECTOR.to_owned(), IGNORE_SELECTOR.to_owned())]
        );
    }

    #[test]
    fn test_chunk_blocks_walk_backward() {
        let mut payload = vec![0u8; 4 + chunk_block_len(4) + chunk_block_len(8)];
        let offset = put_chunk(&mut payload, 4, 0x1000, &1920u32.to_be_bytes())
            .expect("chunk should fit");
        let end = put_chunk(&mut payload, offset, 0x1002, &2.5f64.to_be_bytes())
            .expect("chunk should fit");
        assert_eq!(end, payload.len());

        assert_eq!(find_chunk(&payload, 0x1000), Some(&1920u32.to_be_bytes()[..]));
        assert_eq!(find_chunk(&payload, 0x1002), Some(&2.5f64.to_be_bytes()[..]));
        assert_eq!(find_chunk(&payload, 0x1003), None);
    }

    #[test]
    fn test_chunk_does_not_fit() {
        let mut payload = vec![0u8; 10];
        assert_eq!(put_chunk(&mut payload, 0, 1, &[0; 4]), None);
    }

    #[test]
    fn test_corrupt_trailer_length() {
        let mut payload = vec![0u8; 8];
        payload[4..].copy_from_slice(&100u32.to_be_bytes());
        assert_eq!(find_chunk(&payload, 0), None);
    }
}

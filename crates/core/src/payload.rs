//! Decoding of inbound image payloads and outbound media encoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::CoreError;

/// Where the bytes of an inbound image come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Remote image to fetch with a GET.
    Url(String),
    /// Already-decoded inline bytes.
    Inline(Vec<u8>),
}

impl ImageSource {
    /// Classify and, for inline payloads, decode an `image` field.
    ///
    /// Strings starting with `http://` or `https://` are URLs. Anything
    /// else is base64, with everything up to and including the first
    /// comma (a data-URL header) stripped first. ASCII whitespace is
    /// ignored, so line-wrapped payloads decode.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(Self::Url(raw.to_string()));
        }

        let encoded: String = strip_data_url_header(raw)
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CoreError::Validation(format!("invalid base64 image payload: {e}")))?;
        Ok(Self::Inline(bytes))
    }
}

/// Drop a single leading `<header>,` prefix, if any.
fn strip_data_url_header(raw: &str) -> &str {
    match raw.split_once(',') {
        Some((_header, rest)) => rest,
        None => raw,
    }
}

/// Encode rendered media for the job result.
pub fn encode_media(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

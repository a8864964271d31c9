//! Content decoding from raw object bytes to text
//!
//! Tries a priority-ordered list of encodings and returns the first that
//! decodes cleanly. Keys with a known binary extension are never decoded.

use crate::types::SensitivityTier;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Supported text encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextEncoding {
    #[serde(rename = "utf-8")]
    Utf8,
    /// Strict KS X 1001 two-byte EUC-KR
    #[serde(rename = "euc-kr")]
    EucKr,
    /// Windows code page 949 (EUC-KR plus the unified Hangul extension)
    #[serde(rename = "cp949")]
    Cp949,
    /// ISO-8859-1; every byte sequence is valid
    #[serde(rename = "iso-8859-1")]
    Latin1,
}

impl TextEncoding {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::EucKr => "euc-kr",
            Self::Cp949 => "cp949",
            Self::Latin1 => "iso-8859-1",
        }
    }

    /// Decode without replacement characters; `None` on any invalid sequence
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            Self::Utf8 => std::str::from_utf8(bytes)
                .ok()
                .map(|s| s.strip_prefix('\u{feff}').unwrap_or(s).to_string()),
            Self::EucKr => {
                if !is_ks_x_1001(bytes) {
                    return None;
                }
                decode_windows_949(bytes)
            }
            Self::Cp949 => decode_windows_949(bytes),
            Self::Latin1 => Some(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

fn decode_windows_949(bytes: &[u8]) -> Option<String> {
    encoding_rs::EUC_KR
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
}

/// Structural check for the original EUC-KR byte ranges (lead and trail 0xA1..=0xFE)
fn is_ks_x_1001(bytes: &[u8]) -> bool {
    let mut iter = bytes.iter();
    while let Some(&b) = iter.next() {
        if b < 0x80 {
            continue;
        }
        if !(0xA1..=0xFE).contains(&b) {
            return false;
        }
        match iter.next() {
            Some(&trail) if (0xA1..=0xFE).contains(&trail) => {}
            _ => return false,
        }
    }
    true
}

/// Default encoding priority
pub fn default_encodings() -> Vec<TextEncoding> {
    vec![
        TextEncoding::Utf8,
        TextEncoding::EucKr,
        TextEncoding::Cp949,
        TextEncoding::Latin1,
    ]
}

/// Default binary extensions excluded from scanning
pub fn default_binary_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "pdf", "zip", "exe", "bin"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Result of decoding one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedContent {
    /// Decoded successfully
    Text {
        encoding: TextEncoding,
        text: String,
    },
    /// Key has a binary extension; content was not inspected
    Excluded { extension: String },
    /// No configured encoding accepted the bytes
    Undecodable,
}

impl DecodedContent {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Tier forced by a "no content" result; `None` when text is available
    ///
    /// Binary exclusion forces NONE, decode failure forces LOW.
    pub fn forced_tier(&self) -> Option<SensitivityTier> {
        match self {
            Self::Text { .. } => None,
            Self::Excluded { .. } => Some(SensitivityTier::None),
            Self::Undecodable => Some(SensitivityTier::Low),
        }
    }
}

/// Multi-encoding content decoder
#[derive(Debug, Clone)]
pub struct ContentDecoder {
    encodings: Vec<TextEncoding>,
    binary_extensions: HashSet<String>,
}

impl Default for ContentDecoder {
    fn default() -> Self {
        Self::new(default_encodings(), default_binary_extensions())
    }
}

impl ContentDecoder {
    pub fn new(encodings: Vec<TextEncoding>, binary_extensions: Vec<String>) -> Self {
        Self {
            encodings,
            binary_extensions: binary_extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn encodings(&self) -> &[TextEncoding] {
        &self.encodings
    }

    /// Binary extension of `key`, if it is in the exclusion set
    pub fn excluded_extension(&self, key: &str) -> Option<String> {
        let file_name = key.rsplit('/').next().unwrap_or(key);
        let (_, ext) = file_name.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        self.binary_extensions.contains(&ext).then_some(ext)
    }

    /// Decode `bytes` stored under `key`
    ///
    /// The extension check runs first, so an excluded key is never decoded.
    pub fn decode(&self, key: &str, bytes: &[u8]) -> DecodedContent {
        if let Some(extension) = self.excluded_extension(key) {
            tracing::debug!(key, extension = %extension, "Binary object excluded");
            return DecodedContent::Excluded { extension };
        }

        for encoding in &self.encodings {
            if let Some(text) = encoding.decode(bytes) {
                tracing::debug!(key, encoding = encoding.label(), "Object decoded");
                return DecodedContent::Text {
                    encoding: *encoding,
                    text,
                };
            }
        }

        tracing::warn!(key, "No encoding could decode object");
        DecodedContent::Undecodable
    }
}

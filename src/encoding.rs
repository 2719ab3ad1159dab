//! Decoding fetched files according to the `encoding` setting.
//!
//! Upstream data arrives in whatever encoding the publisher chose. Sources
//! read their cached files through [`TextEncoding::decode`] so a run can
//! pin a codec (`encoding = "latin1"`) or ask for detection
//! (`encoding = "chardet"`). Without the setting, files must be UTF-8.

use anyhow::{bail, Context, Result};
use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use std::path::Path;

use crate::error::{EngineError, EngineResult};
use crate::settings::PluginSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Detect,
    Fixed(&'static Encoding),
}

impl TextEncoding {
    pub fn from_settings(settings: &PluginSettings) -> EngineResult<Self> {
        match settings.str("encoding")? {
            None => Ok(Self::Utf8),
            Some("chardet") => Ok(Self::Detect),
            Some(label) => Encoding::for_label(label.trim().as_bytes())
                .map(Self::Fixed)
                .ok_or_else(|| EngineError::config(format!("unsupported encoding '{}'", label))),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        let encoding = match self {
            Self::Utf8 => {
                return String::from_utf8(bytes.to_vec())
                    .context("input is not valid UTF-8; set `encoding` for this source");
            }
            Self::Detect => {
                let mut detector = EncodingDetector::new();
                detector.feed(bytes, true);
                detector.guess(None, true)
            }
            Self::Fixed(encoding) => *encoding,
        };

        let (text, _, had_errors) = encoding.decode(bytes);
        if had_errors {
            bail!("Failed to decode bytes using {}", encoding.name());
        }
        Ok(text.into_owned())
    }

    /// Read and decode a whole file.
    pub fn read_to_string(&self, path: &Path) -> Result<String> {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        self.decode(&bytes)
            .with_context(|| format!("Failed to decode {}", path.display()))
    }
}

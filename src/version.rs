//! PDF version numbers accepted in the header and the catalog `/Version`.

use crate::error::Error;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Supported PDF versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PdfVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
    #[serde(rename = "1.2")]
    V1_2,
    #[serde(rename = "1.3")]
    V1_3,
    #[serde(rename = "1.4")]
    V1_4,
    #[serde(rename = "1.5")]
    V1_5,
    #[serde(rename = "1.6")]
    V1_6,
    #[serde(rename = "1.7")]
    V1_7,
    #[serde(rename = "2.0")]
    V2_0,
}

impl PdfVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            PdfVersion::V1_0 => "1.0",
            PdfVersion::V1_1 => "1.1",
            PdfVersion::V1_2 => "1.2",
            PdfVersion::V1_3 => "1.3",
            PdfVersion::V1_4 => "1.4",
            PdfVersion::V1_5 => "1.5",
            PdfVersion::V1_6 => "1.6",
            PdfVersion::V1_7 => "1.7",
            PdfVersion::V2_0 => "2.0",
        }
    }

    /// XRef streams and object streams exist from PDF 1.5 on, but producers
    /// stamping 1.3/1.4 headers on files using them are common.
    pub fn allows_xref_streams(&self) -> bool {
        *self >= PdfVersion::V1_3
    }
}

impl FromStr for PdfVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "1.0" => PdfVersion::V1_0,
            "1.1" => PdfVersion::V1_1,
            "1.2" => PdfVersion::V1_2,
            "1.3" => PdfVersion::V1_3,
            "1.4" => PdfVersion::V1_4,
            "1.5" => PdfVersion::V1_5,
            "1.6" => PdfVersion::V1_6,
            "1.7" => PdfVersion::V1_7,
            "2.0" => PdfVersion::V2_0,
            other => return Err(Error::UnsupportedVersion(other.to_string())),
        })
    }
}

impl fmt::Display for PdfVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_supported_versions() {
        for v in ["1.0", "1.1", "1.2", "1.3", "1.4", "1.5", "1.6", "1.7", "2.0"] {
            let parsed: PdfVersion = v.parse().unwrap();
            assert_eq!(parsed.to_string(), v);
        }
    }

    #[test]
    fn test_unsupported_versions() {
        for v in ["1.8", "2.1", "0.9", "abc", ""] {
            assert!(matches!(v.parse::<PdfVersion>(), Err(Error::UnsupportedVersion(_))));
        }
    }

    #[test]
    fn test_ordering() {
        assert!(PdfVersion::V1_2 < PdfVersion::V1_3);
        assert!(!PdfVersion::V1_2.allows_xref_streams());
        assert!(PdfVersion::V2_0.allows_xref_streams());
    }
}

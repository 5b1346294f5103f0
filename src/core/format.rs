//! Persisted artifact formats.
//!
//! Format strings follow file extensions: `o`/`obj` for object code, `bc` for
//! bitcode, `ll` for textual IR and `s`/`asm` for target assembly. An empty
//! format string falls back to the extension of the output path.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use super::error::UnitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// Target-specific relocatable object code.
    Object,
    /// Backend-native binary IR.
    Bitcode,
    /// Human-readable IR dump.
    TextualIr,
    /// Target assembly text.
    Assembly,
}

impl OutputFormat {
    /// Resolve the format for `path`, preferring an explicit `format`.
    pub fn resolve(path: &Path, format: &str) -> Result<Self, UnitError> {
        if !format.is_empty() {
            return format.parse();
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        ext.parse()
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Object => "o",
            Self::Bitcode => "bc",
            Self::TextualIr => "ll",
            Self::Assembly => "s",
        }
    }

    pub fn is_text(self) -> bool {
        matches!(self, Self::TextualIr | Self::Assembly)
    }
}

impl FromStr for OutputFormat {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "o" | "obj" => Ok(Self::Object),
            "bc" => Ok(Self::Bitcode),
            "ll" => Ok(Self::TextualIr),
            "s" | "asm" => Ok(Self::Assembly),
            other => Err(UnitError::UnsupportedFormat { format: other.to_string() }),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

//! Build options for compiled units.

use inkwell::OptimizationLevel;

/// Environment variable overriding the JIT optimization level (0-3).
pub const OPT_LEVEL_ENV: &str = "LLVM_UNIT_OPT_LEVEL";

/// Environment variable toggling module verification (0/1).
pub const VERIFY_ENV: &str = "LLVM_UNIT_VERIFY";

/// Options applied when a unit is built and when its engine is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitOptions {
    /// Optimization level of the JIT engine.
    pub opt_level: OptimizationLevel,
    /// Verify the module after all functions are lowered.
    pub verify: bool,
}

impl Default for UnitOptions {
    fn default() -> Self {
        Self {
            opt_level: OptimizationLevel::Aggressive,
            verify: true,
        }
    }
}

impl UnitOptions {
    /// Defaults, overridden by `LLVM_UNIT_OPT_LEVEL` and `LLVM_UNIT_VERIFY`.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(level) = std::env::var(OPT_LEVEL_ENV) {
            match level.trim().parse::<u8>().ok().and_then(opt_level_from_u8) {
                Some(level) => options.opt_level = level,
                None => log::warn!("Ignoring {}={}: expected 0-3", OPT_LEVEL_ENV, level),
            }
        }
        if let Ok(verify) = std::env::var(VERIFY_ENV) {
            match flag_from_str(&verify) {
                Some(verify) => options.verify = verify,
                None => log::warn!("Ignoring {}={}: expected 0/1, true/false or on/off", VERIFY_ENV, verify),
            }
        }
        options
    }

    pub fn with_opt_level(mut self, level: OptimizationLevel) -> Self {
        self.opt_level = level;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }
}

/// Parses a boolean switch: `1`/`true`/`on` or `0`/`false`/`off`.
pub fn flag_from_str(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// Maps `0..=3` to an LLVM optimization level.
pub fn opt_level_from_u8(level: u8) -> Option<OptimizationLevel> {
    match level {
        0 => Some(OptimizationLevel::None),
        1 => Some(OptimizationLevel::Less),
        2 => Some(OptimizationLevel::Default),
        3 => Some(OptimizationLevel::Aggressive),
        _ => None,
    }
}

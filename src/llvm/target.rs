//! Target resolution.
//!
//! Target strings look like `llvm -target=aarch64-linux-gnu -mcpu=cortex-a53 -mattr=+neon`.
//! The leading `llvm` selects this backend; the options pick the triple, CPU
//! and feature string handed to LLVM. Without `-target` the host triple, CPU
//! and features are used.

use std::sync::Once;

use inkwell::data_layout::DataLayout;
use inkwell::execution_engine::ExecutionEngine;
use inkwell::targets::{
    CodeModel, InitializationConfig, RelocMode, Target, TargetMachine, TargetTriple,
};
use inkwell::OptimizationLevel;

use crate::core::{UnitError, UnitResult};

static INIT_LLVM: Once = Once::new();

/// Initialize every LLVM target and link in MCJIT. Safe to call repeatedly.
pub fn initialize_llvm() {
    INIT_LLVM.call_once(|| {
        Target::initialize_all(&InitializationConfig::default());
        ExecutionEngine::link_in_mc_jit();
        log::debug!("LLVM targets initialized");
    });
}

/// Parsed form of a target string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSpec {
    pub triple: Option<String>,
    pub cpu: Option<String>,
    pub features: Option<String>,
}

impl TargetSpec {
    pub fn parse(spec: &str) -> UnitResult<Self> {
        let err = |reason: String| UnitError::Target {
            spec: spec.to_string(),
            reason,
        };

        let mut tokens = spec.split_whitespace();
        match tokens.next() {
            Some("llvm") => {}
            Some(other) => return Err(err(format!("expected 'llvm', found '{}'", other))),
            None => return Err(err("empty target string".into())),
        }

        let mut parsed = Self::default();
        for token in tokens {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| err(format!("option '{}' has no value", token)))?;
            if value.is_empty() {
                return Err(err(format!("option '{}' has no value", key)));
            }
            let slot = match key {
                "-target" | "-mtriple" => &mut parsed.triple,
                "-mcpu" => &mut parsed.cpu,
                "-mattr" => &mut parsed.features,
                _ => return Err(err(format!("unknown option '{}'", key))),
            };
            *slot = Some(value.to_string());
        }
        Ok(parsed)
    }
}

/// A resolved target: triple, CPU description and the machine used for emission.
pub struct TargetDescriptor {
    spec: String,
    triple: String,
    cpu: String,
    features: String,
    machine: TargetMachine,
}

impl TargetDescriptor {
    /// The target string this descriptor was resolved from.
    pub fn spec(&self) -> &str {
        &self.spec
    }

    pub fn triple(&self) -> &str {
        &self.triple
    }

    pub fn cpu(&self) -> &str {
        &self.cpu
    }

    pub fn features(&self) -> &str {
        &self.features
    }

    pub fn machine(&self) -> &TargetMachine {
        &self.machine
    }

    pub fn target_triple(&self) -> TargetTriple {
        TargetTriple::create(&self.triple)
    }

    pub fn data_layout(&self) -> DataLayout {
        self.machine.get_target_data().get_data_layout()
    }
}

impl std::fmt::Debug for TargetDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetDescriptor")
            .field("spec", &self.spec)
            .field("triple", &self.triple)
            .field("cpu", &self.cpu)
            .field("features", &self.features)
            .finish_non_exhaustive()
    }
}

/// Turns a target string into a [`TargetDescriptor`].
pub trait TargetResolver {
    fn resolve(&self, spec: &str) -> UnitResult<TargetDescriptor>;
}

/// Resolver backed by the LLVM target registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct LlvmTargetResolver;

impl TargetResolver for LlvmTargetResolver {
    fn resolve(&self, spec: &str) -> UnitResult<TargetDescriptor> {
        initialize_llvm();
        let parsed = TargetSpec::parse(spec)?;
        let err = |reason: String| UnitError::Target {
            spec: spec.to_string(),
            reason,
        };

        let (triple, cpu, features) = match parsed.triple {
            Some(triple) => (
                triple,
                parsed.cpu.unwrap_or_else(|| "generic".to_string()),
                parsed.features.unwrap_or_default(),
            ),
            None => (
                TargetMachine::get_default_triple()
                    .as_str()
                    .to_string_lossy()
                    .into_owned(),
                parsed
                    .cpu
                    .unwrap_or_else(|| TargetMachine::get_host_cpu_name().to_string()),
                parsed
                    .features
                    .unwrap_or_else(|| TargetMachine::get_host_cpu_features().to_string()),
            ),
        };

        let target_triple = TargetTriple::create(&triple);
        let target = Target::from_triple(&target_triple).map_err(|e| err(e.to_string()))?;
        let machine = target
            .create_target_machine(
                &target_triple,
                &cpu,
                &features,
                OptimizationLevel::Aggressive,
                RelocMode::PIC,
                CodeModel::Default,
            )
            .ok_or_else(|| err(format!("cannot create target machine for {}", triple)))?;

        log::debug!("Resolved target '{}' to {} (cpu {})", spec, triple, cpu);
        Ok(TargetDescriptor {
            spec: spec.to_string(),
            triple,
            cpu,
            features,
            machine,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_llvm() {
        assert_eq!(TargetSpec::parse("llvm").unwrap(), TargetSpec::default());
    }

    #[test]
    fn test_parse_options() {
        let spec = TargetSpec::parse("llvm -mtriple=aarch64-linux-gnu -mcpu=cortex-a53 -mattr=+neon")
            .unwrap();
        assert_eq!(spec.triple.as_deref(), Some("aarch64-linux-gnu"));
        assert_eq!(spec.cpu.as_deref(), Some("cortex-a53"));
        assert_eq!(spec.features.as_deref(), Some("+neon"));
    }

    #[test]
    fn test_parse_rejects_other_backends() {
        let err = TargetSpec::parse("cuda -arch=sm_80").unwrap_err();
        assert!(matches!(err, UnitError::Target { .. }));
        assert!(TargetSpec::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_option() {
        let err = TargetSpec::parse("llvm -system-lib=1").unwrap_err();
        assert!(err.to_string().contains("unknown option '-system-lib'"));
        assert!(TargetSpec::parse("llvm -mcpu").is_err());
        assert!(TargetSpec::parse("llvm -mcpu=").is_err());
    }

    #[test]
    fn test_resolve_host() {
        let target = LlvmTargetResolver.resolve("llvm").unwrap();
        let host = TargetMachine::get_default_triple();
        assert_eq!(target.triple(), host.as_str().to_str().unwrap());
        assert!(!target.data_layout().as_str().to_bytes().is_empty());
    }

    #[test]
    fn test_resolve_unknown_triple() {
        let err = LlvmTargetResolver
            .resolve("llvm -target=nonsense-unknown-none")
            .unwrap_err();
        assert!(matches!(err, UnitError::Target { .. }));
    }
}

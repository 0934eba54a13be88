//! Function registry
//!
//! Maps a unit type name to its constructor. Workers resolve every
//! `{type, parameters}` request through a registry; they never discover
//! unit types on their own.

use std::collections::BTreeMap;

use crate::config::UnitSpec;
use crate::error::ConfigError;
use crate::unit::{FunctionUnit, UnitIdentity};
use crate::units::{CoherenceUnit, DriftUnit, StackMeanUnit, ThresholdUnit, WorstOfUnit};

/// Builds one unit instance
pub type UnitConstructor = fn(UnitIdentity) -> Box<dyn FunctionUnit>;

#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    constructors: BTreeMap<String, UnitConstructor>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the reference units shipped with the crate
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ThresholdUnit::TYPE, ThresholdUnit::boxed);
        registry.register(DriftUnit::TYPE, DriftUnit::boxed);
        registry.register(CoherenceUnit::TYPE, CoherenceUnit::boxed);
        registry.register(StackMeanUnit::TYPE, StackMeanUnit::boxed);
        registry.register(WorstOfUnit::TYPE, WorstOfUnit::boxed);
        registry
    }

    pub fn register(&mut self, name: &str, constructor: UnitConstructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    pub fn resolve(&self, name: &str) -> Result<UnitConstructor, ConfigError> {
        self.constructors
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::UnknownFunction(name.to_string()))
    }

    /// Construct the unit a request describes. `default_id` is used when the
    /// request carries no explicit function id.
    pub fn build(&self, spec: &UnitSpec, default_id: u32) -> Result<Box<dyn FunctionUnit>, ConfigError> {
        let constructor = self.resolve(&spec.kind)?;
        Ok(constructor(UnitIdentity {
            function_id: spec.id.unwrap_or(default_id),
            name: spec.name.clone().unwrap_or_else(|| spec.kind.clone()),
        }))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FunctionCategory;

    #[test]
    fn test_builtin_resolves() {
        let registry = FunctionRegistry::builtin();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(
            names,
            vec!["coherence", "drift", "stack_mean", "threshold", "worst_of"]
        );
        let unit = registry
            .build(&UnitSpec::new("threshold").named("rms-limit"), 7)
            .unwrap();
        assert_eq!(unit.name(), "rms-limit");
        assert_eq!(unit.function_id(), 7);
        assert_eq!(unit.function_type(), FunctionCategory::Decision);
    }

    #[test]
    fn test_explicit_id_wins() {
        let registry = FunctionRegistry::builtin();
        let unit = registry.build(&UnitSpec::new("drift").with_id(42), 1).unwrap();
        assert_eq!(unit.function_id(), 42);
        assert_eq!(unit.name(), "drift");
    }

    #[test]
    fn test_unknown_type() {
        let registry = FunctionRegistry::builtin();
        assert_eq!(
            registry.resolve("fft").err(),
            Some(ConfigError::UnknownFunction("fft".to_string()))
        );
    }
}

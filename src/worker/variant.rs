//! Worker variants
//!
//! Every variant shares the same registration and binding machinery; they
//! only differ in how many devices they drive, which unit categories they
//! run and whether a result entry is recorded per drive step.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigError;
use crate::types::FunctionCategory;

const NORMAL_CATEGORIES: &[FunctionCategory] =
    &[FunctionCategory::Decision, FunctionCategory::Evaluation];
const INTEGRATION_CATEGORIES: &[FunctionCategory] = &[FunctionCategory::Other];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerVariant {
    NormalRealtime,
    IntegrationRealtime,
    IntegrationStack,
    MdNormalRealtime,
    MdIntegrationRealtime,
    MdIntegrationStack,
}

impl WorkerVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerVariant::NormalRealtime => "normal-realtime",
            WorkerVariant::IntegrationRealtime => "integration-realtime",
            WorkerVariant::IntegrationStack => "integration-stack",
            WorkerVariant::MdNormalRealtime => "md-normal-realtime",
            WorkerVariant::MdIntegrationRealtime => "md-integration-realtime",
            WorkerVariant::MdIntegrationStack => "md-integration-stack",
        }
    }

    pub fn is_multi_device(&self) -> bool {
        matches!(
            self,
            WorkerVariant::MdNormalRealtime
                | WorkerVariant::MdIntegrationRealtime
                | WorkerVariant::MdIntegrationStack
        )
    }

    /// Realtime variants append one result entry per drive step; stack
    /// variants accumulate and record once at the end of a pass.
    pub fn is_realtime(&self) -> bool {
        !matches!(
            self,
            WorkerVariant::IntegrationStack | WorkerVariant::MdIntegrationStack
        )
    }

    /// Categories run on every step, in execution order
    pub fn categories(&self) -> &'static [FunctionCategory] {
        match self {
            WorkerVariant::NormalRealtime | WorkerVariant::MdNormalRealtime => NORMAL_CATEGORIES,
            _ => INTEGRATION_CATEGORIES,
        }
    }

    pub fn runs(&self, category: FunctionCategory) -> bool {
        self.categories().contains(&category)
    }

    /// Single-device variants take exactly one device, multi-device ones at
    /// least two.
    pub fn check_device_count(&self, count: usize) -> Result<(), ConfigError> {
        let ok = if self.is_multi_device() {
            count >= 2
        } else {
            count == 1
        };
        if ok {
            Ok(())
        } else {
            Err(ConfigError::DeviceCountMismatch {
                variant: self.as_str().to_string(),
                count,
            })
        }
    }
}

impl fmt::Display for WorkerVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_names() {
        let v: WorkerVariant = serde_json::from_str("\"md-integration-stack\"").unwrap();
        assert_eq!(v, WorkerVariant::MdIntegrationStack);
        assert_eq!(
            serde_json::to_string(&WorkerVariant::IntegrationRealtime).unwrap(),
            "\"integration-realtime\""
        );
    }

    #[test]
    fn test_device_count() {
        assert!(WorkerVariant::NormalRealtime.check_device_count(1).is_ok());
        assert!(WorkerVariant::NormalRealtime.check_device_count(2).is_err());
        assert!(WorkerVariant::MdNormalRealtime.check_device_count(1).is_err());
        assert!(WorkerVariant::MdIntegrationStack.check_device_count(3).is_ok());
    }

    #[test]
    fn test_categories() {
        assert!(WorkerVariant::NormalRealtime.runs(FunctionCategory::Decision));
        assert!(!WorkerVariant::NormalRealtime.runs(FunctionCategory::Other));
        assert!(WorkerVariant::IntegrationStack.runs(FunctionCategory::Other));
        assert!(!WorkerVariant::IntegrationStack.is_realtime());
        assert!(WorkerVariant::MdIntegrationRealtime.is_realtime());
    }
}

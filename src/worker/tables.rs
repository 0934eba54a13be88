//! Per-device health tables
//!
//! Built once by `bind_to_devices()` from the contributions of every unit,
//! then only read until the next rebind.

use std::collections::BTreeMap;

use crate::error::ConfigError;
use crate::types::HealthInfo;
use crate::unit::FunctionUnit;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceTables {
    tables: BTreeMap<String, HealthInfo>,
}

impl DeviceTables {
    /// Union the contributions of `units` for every device
    pub fn build(devices: &[String], units: &[Box<dyn FunctionUnit>]) -> Result<Self, ConfigError> {
        let mut tables = Self::default();
        for device in devices {
            tables.tables.insert(device.clone(), HealthInfo::default());
        }
        tables.extend(units)?;
        Ok(tables)
    }

    /// Append the contributions of more units on top of the current tables
    pub fn extend(&mut self, units: &[Box<dyn FunctionUnit>]) -> Result<(), ConfigError> {
        for (device, info) in self.tables.iter_mut() {
            for unit in units {
                contribute(info, device, unit.as_ref())?;
            }
        }
        Ok(())
    }

    /// Copy in tables built elsewhere (a sub-worker's)
    pub fn absorb(&mut self, other: &DeviceTables) {
        for (device, info) in &other.tables {
            self.tables.insert(device.clone(), info.clone());
        }
    }

    pub fn get(&self, device: &str) -> Option<&HealthInfo> {
        self.tables.get(device)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HealthInfo)> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn to_map(&self) -> BTreeMap<String, HealthInfo> {
        self.tables.clone()
    }
}

fn contribute(info: &mut HealthInfo, device: &str, unit: &dyn FunctionUnit) -> Result<(), ConfigError> {
    let defines = unit.get_health_define(device);
    let defaults = unit.get_default_score(device);
    let limits = unit.get_score_limit(device);
    let reverse = unit.get_score_reverse(device);

    if defaults.len() != defines.len() || limits.len() != defines.len() || reverse.len() != defines.len()
    {
        return Err(ConfigError::TableLengthMismatch(device.to_string()));
    }
    for (i, name) in defines.iter().enumerate() {
        if info.health_define.contains(name) || defines[..i].contains(name) {
            return Err(ConfigError::OverlappingHealthDefine {
                device: device.to_string(),
                name: name.clone(),
            });
        }
    }

    info.column.extend(unit.get_column(device));
    info.health_define.extend(defines);
    info.default_score.extend(defaults);
    info.score_limit.extend(limits);
    info.score_reverse.extend(reverse);
    Ok(())
}

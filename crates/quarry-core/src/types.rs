// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared types: the process environment flag and migration phases.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{Display, EnumString};

/// Deployment environment, fixed once at startup.
///
/// Parses `DEV`/`STG`/`PROD` as well as the long names, case-insensitively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Environment {
    #[default]
    #[strum(to_string = "development", serialize = "dev")]
    Development,
    #[strum(to_string = "staging", serialize = "stg")]
    Staging,
    #[strum(to_string = "production", serialize = "prod")]
    Production,
}

impl Environment {
    /// Short upper-case name, used for the default database file name.
    pub fn short_name(self) -> &'static str {
        match self {
            Environment::Development => "DEV",
            Environment::Staging => "STG",
            Environment::Production => "PROD",
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

impl Serialize for Environment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Environment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.trim().parse().map_err(|_| {
            serde::de::Error::custom(format!(
                "unknown environment `{raw}`, expected one of: DEV (default), STG, PROD"
            ))
        })
    }
}

/// The three schema-changing operations of the migration runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MigrationPhase {
    Migrate,
    Rollback,
    Drop,
}

impl MigrationPhase {
    /// Sentinel message prefixed to every failure of this phase.
    pub fn failure_message(self) -> &'static str {
        match self {
            MigrationPhase::Migrate => "failed to run database migration",
            MigrationPhase::Rollback => "failed to run database rollback",
            MigrationPhase::Drop => "failed to drop database schema",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_short_and_long_names() {
        assert_eq!("DEV".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("stg".parse::<Environment>().unwrap(), Environment::Staging);
        assert_eq!("Production".parse::<Environment>().unwrap(), Environment::Production);
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn environment_serde_uses_long_name() {
        let json = serde_json::to_string(&Environment::Staging).unwrap();
        assert_eq!(json, "\"staging\"");
        let parsed: Environment = serde_json::from_str("\"PROD\"").unwrap();
        assert_eq!(parsed, Environment::Production);
    }

    #[test]
    fn only_production_is_production() {
        assert!(Environment::Production.is_production());
        assert!(!Environment::Staging.is_production());
        assert_eq!(Environment::default(), Environment::Development);
        assert_eq!(Environment::Production.short_name(), "PROD");
    }
}

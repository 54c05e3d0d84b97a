//! Field-pattern exclusion of survey entities.

use std::collections::BTreeMap;

use regex::Regex;
use survey_proxy_common::{AppError, AppResult};

use crate::entity::{Entity, stringify};

/// Ordered list of field → pattern rules.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    rules: Vec<(String, Regex)>,
}

impl Blacklist {
    /// Compile the configured rules. Rules are evaluated in field-name order.
    pub fn new(spec: &BTreeMap<String, String>) -> AppResult<Self> {
        let rules = spec
            .iter()
            .map(|(field, pattern)| {
                Regex::new(pattern)
                    .map(|regex| (field.clone(), regex))
                    .map_err(|e| {
                        AppError::Config(format!("invalid blacklist pattern for {field}: {e}"))
                    })
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Self { rules })
    }

    /// Whether no rule is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First field whose value matches its pattern, if any.
    #[must_use]
    pub fn matching_field(&self, entity: &Entity) -> Option<&str> {
        self.rules
            .iter()
            .find(|(field, regex)| {
                entity
                    .get(field)
                    .is_some_and(|value| regex.is_match(&stringify(value)))
            })
            .map(|(field, _)| field.as_str())
    }

    /// Whether the entity is excluded.
    #[must_use]
    pub fn is_blacklisted(&self, entity: &Entity) -> bool {
        self.matching_field(entity).is_some()
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Flat key/value record of everything the applicant has entered so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Draft(BTreeMap<String, String>);

impl Draft {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn into_values(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl From<BTreeMap<String, String>> for Draft {
    fn from(values: BTreeMap<String, String>) -> Self {
        Self(values)
    }
}

/// What gets written to storage: the field values plus the step pointer.
/// Completed steps are never stored; they are re-derived on restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedDraft {
    pub step: u8,
    pub values: Draft,
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::eval::{Evaluation, CONTROL};
use crate::parser::Allocation;

/// A feature flag definition as delivered by the backend.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    pub name: String,
    #[serde(default)]
    pub traffic_type_name: Option<String>,
    #[serde(default)]
    pub seed: i32,
    #[serde(default = "default_traffic_allocation")]
    pub traffic_allocation: u32,
    #[serde(default)]
    pub traffic_allocation_seed: i32,
    #[serde(default)]
    pub killed: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_treatment")]
    pub default_treatment: String,
    #[serde(default)]
    pub change_number: i64,
    #[serde(default)]
    pub algo: Option<u8>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configurations: Option<HashMap<String, String>>,
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
    #[serde(default)]
    pub sets: Vec<String>,
    #[serde(default)]
    pub impressions_disabled: bool,
}

/// Another split that must evaluate to one of the treatments `ts` for this split's rules to
/// apply.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Prerequisite {
    pub n: String,
    #[serde(default)]
    pub ts: Vec<String>,
}

fn default_traffic_allocation() -> u32 {
    100
}

fn default_treatment() -> String {
    CONTROL.to_string()
}

impl Split {
    pub fn allocation(&self) -> Allocation {
        Allocation::new(self.seed)
            .with_traffic_allocation(self.traffic_allocation, self.traffic_allocation_seed)
    }

    /// The configuration attached to `treatment`, if any.
    pub fn config(&self, treatment: &str) -> Option<&str> {
        self.configurations
            .as_ref()
            .and_then(|configurations| configurations.get(treatment))
            .map(String::as_str)
    }

    /// An evaluation of this split to `treatment`, carrying its change number and config.
    pub fn evaluation(&self, treatment: &str, label: impl Into<String>) -> Evaluation {
        Evaluation {
            treatment: Some(treatment.to_string()),
            label: label.into(),
            change_number: Some(self.change_number),
            config: self.config(treatment).map(String::from),
        }
    }

    pub fn default_evaluation(&self, label: impl Into<String>) -> Evaluation {
        self.evaluation(&self.default_treatment, label)
    }
}

//! Database model for the stored credits configuration record.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The singleton configuration record (versionless overwrite).
///
/// Maps are keyed by raw strings exactly as stored: plan ids are an open set,
/// and an action key written by an older deploy may no longer be in the known
/// set. Unknown action keys are dropped with a warning when the record is
/// merged over the defaults; a partially populated record is normal, not an
/// error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreditsConfigRecord {
    #[serde(default)]
    pub monthly_allowance_by_plan: HashMap<String, i64>,
    #[serde(default)]
    pub cost_by_action: HashMap<String, i64>,
}

impl CreditsConfigRecord {
    pub fn is_empty(&self) -> bool {
        self.monthly_allowance_by_plan.is_empty() && self.cost_by_action.is_empty()
    }
}

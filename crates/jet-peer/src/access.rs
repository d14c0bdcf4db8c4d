//! Access groups advertised with `add`.

use serde::Serialize;

/// Groups allowed to set and to fetch a state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateAccess {
    pub set_groups: Vec<String>,
    pub fetch_groups: Vec<String>,
}

/// Groups allowed to call and to fetch a method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodAccess {
    pub call_groups: Vec<String>,
    pub fetch_groups: Vec<String>,
}

impl StateAccess {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set_groups.is_empty() && self.fetch_groups.is_empty()
    }
}

impl MethodAccess {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.call_groups.is_empty() && self.fetch_groups.is_empty()
    }
}

// * Per-identifier handling directives supplied by the host's deprecation workflow

use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Invalid deprecation workflow JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Silence,
    Default,
}

impl Disposition {
    fn from_handler(handler: &str) -> Self {
        match handler {
            "silence" => Disposition::Silence,
            _ => Disposition::Default,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkflowEntry {
    handler: String,
    #[serde(rename = "matchId")]
    match_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowDocument {
    #[serde(default)]
    workflow: Vec<WorkflowEntry>,
}

/// Immutable identifier → disposition map for one page session.
///
/// An absent or empty workflow means no special handling for any identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierConfig {
    by_id: HashMap<String, Disposition>,
}

impl IdentifierConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `{"workflow": [{"handler": "silence", "matchId": "..."}]}`.
    ///
    /// Entries keyed by something other than an exact id are skipped.
    pub fn from_workflow_json(raw: &str) -> Result<Self, WorkflowError> {
        let document: WorkflowDocument = serde_json::from_str(raw)?;
        Ok(document
            .workflow
            .into_iter()
            .filter_map(|entry| {
                entry
                    .match_id
                    .map(|id| (id, Disposition::from_handler(&entry.handler)))
            })
            .collect())
    }

    pub fn with(mut self, id: impl Into<String>, disposition: Disposition) -> Self {
        self.by_id.insert(id.into(), disposition);
        self
    }

    pub fn disposition(&self, id: &str) -> Disposition {
        self.by_id.get(id).copied().unwrap_or(Disposition::Default)
    }

    pub fn is_silenced(&self, id: &str) -> bool {
        self.disposition(id) == Disposition::Silence
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl FromIterator<(String, Disposition)> for IdentifierConfig {
    fn from_iter<I: IntoIterator<Item = (String, Disposition)>>(iter: I) -> Self {
        Self {
            by_id: iter.into_iter().collect(),
        }
    }
}

// * Recognized deprecation identifiers
// * Two named sequences on disk: framework ids and host-core ids

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum AllowListError {
    #[error("Failed to read allow-list: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid allow-list YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct AllowListFile {
    #[serde(default)]
    ember_deprecation_ids: Option<Vec<String>>,
    #[serde(default)]
    discourse_deprecation_ids: Option<Vec<String>>,
}

/// Bounded set of identifiers the sink counts individually.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    ids: Vec<String>,
    lookup: HashSet<String>,
}

impl AllowList {
    pub fn from_yaml_str(raw: &str) -> Result<Self, AllowListError> {
        let file: AllowListFile = serde_yaml::from_str(raw)?;
        let ids = file
            .ember_deprecation_ids
            .unwrap_or_default()
            .into_iter()
            .chain(file.discourse_deprecation_ids.unwrap_or_default());
        Ok(ids.collect())
    }

    pub fn load(path: &Path) -> Result<Self, AllowListError> {
        let raw = std::fs::read_to_string(path)?;
        let list = Self::from_yaml_str(&raw)?;
        info!(path = %path.display(), ids = list.len(), "Loaded deprecation allow-list");
        Ok(list)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lookup.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for AllowList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = AllowList::default();
        for id in iter {
            let id = id.into();
            if list.lookup.insert(id.clone()) {
                list.ids.push(id);
            }
        }
        list
    }
}

// * Source attribution for deprecations
// * The collector only branches on the returned kind; detection lives behind SourceIdentifier

use crate::collector::event::{DeprecationEvent, DeprecationSource};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    static ref EXTENSION_FRAME: Regex =
        Regex::new(r"(?:chrome|moz|safari(?:-web)?)-extension://")
            .expect("! CRITICAL: Failed to compile extension frame regex");

    static ref THEME_FRAME: Regex =
        Regex::new(r"/theme-(?P<id>\d+)/(?P<path>[^\s:)?]+)")
            .expect("! CRITICAL: Failed to compile theme frame regex");

    static ref PLUGIN_FRAME: Regex =
        Regex::new(r"/plugins/(?P<name>[\w-]+)/(?P<path>[^\s:)?]+)")
            .expect("! CRITICAL: Failed to compile plugin frame regex");
}

/// Classifies which part of the page raised a deprecation.
pub trait SourceIdentifier: Send + Sync {
    fn identify(&self, event: &DeprecationEvent) -> DeprecationSource;
}

/// Treats every event as core. Used when no stack information is available.
#[derive(Debug, Default)]
pub struct CoreOnly;

impl SourceIdentifier for CoreOnly {
    fn identify(&self, _event: &DeprecationEvent) -> DeprecationSource {
        DeprecationSource::core()
    }
}

/// Walks the stack attached to an event and attributes it to the first
/// extension, theme or plugin frame found.
#[derive(Debug, Default)]
pub struct StackSourceIdentifier {
    theme_names: HashMap<u64, String>,
}

impl StackSourceIdentifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_theme(mut self, id: u64, name: impl Into<String>) -> Self {
        self.theme_names.insert(id, name.into());
        self
    }

    fn classify_frame(&self, frame: &str) -> Option<DeprecationSource> {
        if EXTENSION_FRAME.is_match(frame) {
            return Some(DeprecationSource::browser_extension());
        }

        if let Some(caps) = THEME_FRAME.captures(frame) {
            let id = caps["id"].parse::<u64>().ok()?;
            let name = self
                .theme_names
                .get(&id)
                .cloned()
                .unwrap_or_else(|| format!("theme {}", id));
            return Some(DeprecationSource::theme(name, Some(caps["path"].to_string())));
        }

        if let Some(caps) = PLUGIN_FRAME.captures(frame) {
            return Some(DeprecationSource::plugin(
                &caps["name"],
                Some(caps["path"].to_string()),
            ));
        }

        None
    }
}

impl SourceIdentifier for StackSourceIdentifier {
    fn identify(&self, event: &DeprecationEvent) -> DeprecationSource {
        event
            .options
            .stack
            .as_deref()
            .and_then(|stack| stack.lines().find_map(|frame| self.classify_frame(frame)))
            .unwrap_or_else(DeprecationSource::core)
    }
}

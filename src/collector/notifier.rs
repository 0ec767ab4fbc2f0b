// * Critical-deprecation advisory
// * Raises one dismissible warning per page session when an admin hits a critical deprecation

use crate::collector::event::DeprecationSource;
use crate::config::constants::{
    CORE_NAMESPACE_PREFIX, CRITICAL_DEPRECATION_ID, CRITICAL_NOTICE_DISMISS_DAYS,
    CRITICAL_NOTICE_ID,
};
use crate::config::settings::CollectorSettings;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ADVISORY_BASE_TEXT: &str = "One of your themes or plugins needs updating for compatibility with upcoming Discourse core changes.";

/// Presentation level for a global notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoticeLevel::Info => write!(f, "info"),
            NoticeLevel::Warning => write!(f, "warn"),
            NoticeLevel::Error => write!(f, "error"),
        }
    }
}

/// A site-wide banner handed to the host's notice area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalNotice {
    pub id: String,
    pub text: String,
    pub level: NoticeLevel,
    pub dismissable: bool,
    pub dismiss_duration: Duration,
}

/// Publishes global notices to the viewer
pub trait NoticePublisher: Send + Sync {
    fn publish(&self, notice: GlobalNotice);
}

/// Default publisher: writes the notice to the log
#[derive(Debug, Default)]
pub struct LoggingPublisher;

impl NoticePublisher for LoggingPublisher {
    fn publish(&self, notice: GlobalNotice) {
        tracing::warn!(
            notice_id = %notice.id,
            level = %notice.level,
            dismissable = notice.dismissable,
            "NOTICE: {}", notice.text
        );
    }
}

/// Who is looking at the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewerRole {
    #[default]
    Anonymous,
    User,
    Moderator,
    Admin,
}

impl ViewerRole {
    pub fn is_privileged(self) -> bool {
        self == ViewerRole::Admin
    }
}

/// Match predicate over deprecation identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CriticalPattern {
    /// The identifier equals this one exactly.
    Exact(String),
    /// The identifier does not start with this namespace prefix.
    OutsideNamespace(String),
}

impl CriticalPattern {
    pub fn matches(&self, id: &str) -> bool {
        match self {
            CriticalPattern::Exact(expected) => id == expected,
            CriticalPattern::OutsideNamespace(prefix) => !id.starts_with(prefix.as_str()),
        }
    }

    /// Exact match on the known critical id, then anything outside the core namespace.
    pub fn defaults() -> Vec<CriticalPattern> {
        vec![
            CriticalPattern::Exact(CRITICAL_DEPRECATION_ID.to_string()),
            CriticalPattern::OutsideNamespace(CORE_NAMESPACE_PREFIX.to_string()),
        ]
    }
}

impl fmt::Display for CriticalPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CriticalPattern::Exact(id) => write!(f, "exact:{}", id),
            CriticalPattern::OutsideNamespace(prefix) => write!(f, "outside:{}*", prefix),
        }
    }
}

pub struct CriticalDeprecationNotifier {
    patterns: Vec<CriticalPattern>,
    enabled: bool,
    operator_message: Option<String>,
    viewer: ViewerRole,
    warned: AtomicBool,
    publisher: Arc<dyn NoticePublisher>,
}

impl fmt::Debug for CriticalDeprecationNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalDeprecationNotifier")
            .field("patterns", &self.patterns)
            .field("enabled", &self.enabled)
            .field("viewer", &self.viewer)
            .field("warned", &self.has_warned())
            .finish()
    }
}

impl CriticalDeprecationNotifier {
    pub fn new(
        settings: &CollectorSettings,
        viewer: ViewerRole,
        publisher: Arc<dyn NoticePublisher>,
    ) -> Self {
        Self {
            patterns: CriticalPattern::defaults(),
            enabled: settings.warn_critical_deprecations,
            operator_message: settings.operator_message().map(str::to_string),
            viewer,
            warned: AtomicBool::new(false),
            publisher,
        }
    }

    pub fn with_patterns(mut self, patterns: Vec<CriticalPattern>) -> Self {
        self.patterns = patterns;
        self
    }

    pub fn has_warned(&self) -> bool {
        self.warned.load(Ordering::SeqCst)
    }

    /// First pattern matching `id`, in list order.
    pub fn matching_pattern(&self, id: &str) -> Option<&CriticalPattern> {
        self.patterns.iter().find(|pattern| pattern.matches(id))
    }

    /// Publishes the advisory if this is the first qualifying event of the session.
    /// Returns true when a notice was published.
    pub fn maybe_notify(&self, id: &str, source: &DeprecationSource) -> bool {
        if self.has_warned() || !self.viewer.is_privileged() || !self.enabled {
            return false;
        }

        let Some(pattern) = self.matching_pattern(id) else {
            return false;
        };

        // * Claim the flag before notifying so a reentrant call cannot fire twice
        if self.warned.swap(true, Ordering::SeqCst) {
            return false;
        }

        tracing::warn!(
            id = id,
            pattern = %pattern,
            source = %source.kind,
            "Critical deprecation observed"
        );
        self.notify(id, source);
        true
    }

    pub fn notify(&self, id: &str, source: &DeprecationSource) {
        tracing::debug!(id = id, "Publishing critical deprecation notice");
        self.publisher.publish(GlobalNotice {
            id: CRITICAL_NOTICE_ID.to_string(),
            text: self.compose_message(source),
            level: NoticeLevel::Warning,
            dismissable: true,
            dismiss_duration: Duration::from_secs(CRITICAL_NOTICE_DISMISS_DAYS * 24 * 60 * 60),
        });
    }

    pub fn compose_message(&self, source: &DeprecationSource) -> String {
        let mut message = ADVISORY_BASE_TEXT.to_string();

        if let Some(extra) = &self.operator_message {
            message.push(' ');
            message.push_str(extra);
        }

        if source.is_customization() {
            if let Some(name) = &source.name {
                message.push_str(&format!(" [Source: {} '{}'", source.kind, name));
                if let Some(path) = &source.path {
                    message.push_str(&format!(", file '{}'", path));
                }
                message.push(']');
            }
        }

        message
    }
}

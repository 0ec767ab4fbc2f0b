// * Deprecation events and the source attribution attached to them

use std::fmt;

/// Options passed alongside a deprecation message by the emitting hook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeprecationOptions {
    pub id: Option<String>,
    pub since: Option<String>,
    pub stack: Option<String>,
}

impl DeprecationOptions {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// A single observed deprecation; consumed synchronously and discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeprecationEvent {
    pub message: String,
    pub options: DeprecationOptions,
}

impl DeprecationEvent {
    pub fn new(message: impl Into<String>, options: DeprecationOptions) -> Self {
        Self {
            message: message.into(),
            options,
        }
    }

    // * Events without an identifier are malformed and never counted; ids are used exactly as given
    pub fn identifier(&self) -> Option<&str> {
        self.options.id.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Core,
    Theme,
    Plugin,
    BrowserExtension,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Core => write!(f, "core"),
            SourceKind::Theme => write!(f, "theme"),
            SourceKind::Plugin => write!(f, "plugin"),
            SourceKind::BrowserExtension => write!(f, "browser-extension"),
        }
    }
}

/// Where a deprecation was raised from, as far as it can be told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeprecationSource {
    pub kind: SourceKind,
    pub name: Option<String>,
    pub path: Option<String>,
}

impl DeprecationSource {
    pub fn core() -> Self {
        Self {
            kind: SourceKind::Core,
            name: None,
            path: None,
        }
    }

    pub fn theme(name: impl Into<String>, path: Option<String>) -> Self {
        Self {
            kind: SourceKind::Theme,
            name: Some(name.into()),
            path,
        }
    }

    pub fn plugin(name: impl Into<String>, path: Option<String>) -> Self {
        Self {
            kind: SourceKind::Plugin,
            name: Some(name.into()),
            path,
        }
    }

    pub fn browser_extension() -> Self {
        Self {
            kind: SourceKind::BrowserExtension,
            name: None,
            path: None,
        }
    }

    // * Third-party browser extensions inject code we neither own nor can fix
    pub fn is_disallowed(&self) -> bool {
        self.kind == SourceKind::BrowserExtension
    }

    pub fn is_customization(&self) -> bool {
        matches!(self.kind, SourceKind::Theme | SourceKind::Plugin)
    }
}

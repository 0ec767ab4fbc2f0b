// * Client-side aggregation and reporting pipeline
// * Event source hooks -> classification -> counting -> debounced beacon flush

pub mod aggregator;
pub mod event;
pub mod flush_timer;
pub mod hooks;
pub mod notifier;
pub mod service;
pub mod source;
pub mod transport;
pub mod workflow;

// * Re-exports for convenient access
pub use aggregator::{Aggregator, CounterMap, ReportBatch};
pub use event::{DeprecationEvent, DeprecationOptions, DeprecationSource, SourceKind};
pub use flush_timer::FlushTimer;
pub use hooks::{deprecated, DeprecationHandler, HandlerSlot, HookPoint};
pub use notifier::{
    CriticalDeprecationNotifier, CriticalPattern, GlobalNotice, LoggingPublisher, NoticeLevel,
    NoticePublisher, ViewerRole,
};
pub use service::{CollectorDeps, DeprecationCollector, PageEvent, TrackOutcome, Visibility};
pub use source::{CoreOnly, SourceIdentifier, StackSourceIdentifier};
pub use transport::{BeaconTransport, HttpBeacon, TransportError};
pub use workflow::{Disposition, IdentifierConfig, WorkflowError};

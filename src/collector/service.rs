// * Deprecation collector lifecycle
// * Classifies and counts events, debounces flushes, and flushes immediately when the page hides

use crate::collector::aggregator::{Aggregator, CounterMap, ReportBatch};
use crate::collector::event::DeprecationEvent;
use crate::collector::flush_timer::FlushTimer;
use crate::collector::hooks::{DeprecationHandler, HandlerSlot};
use crate::collector::notifier::{
    CriticalDeprecationNotifier, LoggingPublisher, NoticePublisher, ViewerRole,
};
use crate::collector::source::{CoreOnly, SourceIdentifier};
use crate::collector::transport::BeaconTransport;
use crate::collector::workflow::IdentifierConfig;
use crate::config::constants::{flush_debounce, COLLECTOR_ENDPOINT_PATH};
use crate::config::settings::CollectorSettings;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Page visibility as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// External page signals the collector listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    VisibilityChanged(Visibility),
    NavigationPending,
}

/// What `track` did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Counted; carries the identifier's count in the current window.
    Counted(u64),
    Silenced,
    Disallowed,
    Malformed,
    Inactive,
}

/// Collaborators the collector needs from its host
pub struct CollectorDeps {
    transport: Arc<dyn BeaconTransport>,
    notices: Arc<dyn NoticePublisher>,
    sources: Arc<dyn SourceIdentifier>,
    viewer: ViewerRole,
    slot: Arc<HandlerSlot>,
    flush_delay: Duration,
}

impl CollectorDeps {
    pub fn new(transport: Arc<dyn BeaconTransport>) -> Self {
        Self {
            transport,
            notices: Arc::new(LoggingPublisher),
            sources: Arc::new(CoreOnly),
            viewer: ViewerRole::default(),
            slot: HandlerSlot::global(),
            flush_delay: flush_debounce(),
        }
    }

    pub fn notices(mut self, notices: Arc<dyn NoticePublisher>) -> Self {
        self.notices = notices;
        self
    }

    pub fn sources(mut self, sources: Arc<dyn SourceIdentifier>) -> Self {
        self.sources = sources;
        self
    }

    pub fn viewer(mut self, viewer: ViewerRole) -> Self {
        self.viewer = viewer;
        self
    }

    pub fn slot(mut self, slot: Arc<HandlerSlot>) -> Self {
        self.slot = slot;
        self
    }

    pub fn flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = delay;
        self
    }
}

struct CollectorState {
    aggregator: Aggregator,
    timer: FlushTimer,
}

struct CollectorInner {
    config: IdentifierConfig,
    enabled: bool,
    sources: Arc<dyn SourceIdentifier>,
    notifier: CriticalDeprecationNotifier,
    transport: Arc<dyn BeaconTransport>,
    state: Mutex<CollectorState>,
    torn_down: AtomicBool,
}

impl CollectorInner {
    fn lock_state(&self) -> MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_active(&self) -> bool {
        self.enabled && !self.torn_down.load(Ordering::SeqCst)
    }

    fn track(self: &Arc<Self>, event: &DeprecationEvent) -> TrackOutcome {
        if !self.is_active() {
            return TrackOutcome::Inactive;
        }
        let Some(id) = event.identifier() else {
            return TrackOutcome::Malformed;
        };
        if self.config.is_silenced(id) {
            return TrackOutcome::Silenced;
        }

        let source = self.sources.identify(event);
        if source.is_disallowed() {
            debug!(id = id, source = %source.kind, "Deprecation from disallowed source ignored");
            return TrackOutcome::Disallowed;
        }

        self.notifier.maybe_notify(id, &source);

        let mut state = self.lock_state();
        let count = state.aggregator.increment(id);
        let weak = Arc::downgrade(self);
        state.timer.schedule(move |generation| fire(&weak, generation));
        debug!(id = id, count = count, "Deprecation tracked");

        TrackOutcome::Counted(count)
    }

    fn report(&self) -> Option<ReportBatch> {
        let batch = {
            let mut state = self.lock_state();
            state.timer.cancel();
            state.aggregator.take()
        }?;
        self.submit(&batch);
        Some(batch)
    }

    fn fire(&self, generation: u64) {
        let batch = {
            let mut state = self.lock_state();
            if !state.timer.take_if_current(generation) {
                debug!(generation = generation, "Stale flush timer ignored");
                return;
            }
            state.aggregator.take()
        };
        if let Some(batch) = batch {
            self.submit(&batch);
        }
    }

    fn submit(&self, batch: &ReportBatch) {
        match batch.to_payload() {
            Ok(payload) => {
                let queued = self.transport.send_beacon(COLLECTOR_ENDPOINT_PATH, payload);
                debug!(
                    identifiers = batch.len(),
                    total = batch.total(),
                    queued = queued,
                    "Deprecation report flushed"
                );
            }
            Err(e) => debug!(error = %e, "Deprecation report could not be encoded"),
        }
    }

    fn handle_visibility_changed(&self, visibility: Visibility) {
        if visibility != Visibility::Visible {
            self.report();
        }
    }

    fn handle_navigation_pending(self: &Arc<Self>) {
        if !self.is_active() {
            return;
        }
        let mut state = self.lock_state();
        if state.aggregator.is_empty() {
            return;
        }
        let weak = Arc::downgrade(self);
        state.timer.rearm(move |generation| fire(&weak, generation));
    }
}

fn fire(inner: &Weak<CollectorInner>, generation: u64) {
    if let Some(inner) = inner.upgrade() {
        inner.fire(generation);
    }
}

/// Registered in the handler slot; holds the collector weakly so the slot
/// never keeps a torn-down collector alive.
struct SlotHandler {
    inner: Weak<CollectorInner>,
}

impl DeprecationHandler for SlotHandler {
    fn handle(&self, event: &DeprecationEvent) {
        if let Some(inner) = self.inner.upgrade() {
            inner.track(event);
        }
    }
}

/// Client-side aggregation and reporting pipeline for one page session.
pub struct DeprecationCollector {
    inner: Arc<CollectorInner>,
    slot: Arc<HandlerSlot>,
    handler: Option<Arc<dyn DeprecationHandler>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl DeprecationCollector {
    /// Installs the collector as the slot's only handler and subscribes to page
    /// signals. With the collector disabled nothing is installed and every
    /// operation is a no-op.
    pub fn initialize(
        config: IdentifierConfig,
        settings: &CollectorSettings,
        deps: CollectorDeps,
        page_events: Option<broadcast::Receiver<PageEvent>>,
    ) -> Self {
        let notifier = CriticalDeprecationNotifier::new(settings, deps.viewer, deps.notices);
        let inner = Arc::new(CollectorInner {
            config,
            enabled: settings.enabled,
            sources: deps.sources,
            notifier,
            transport: deps.transport,
            state: Mutex::new(CollectorState {
                aggregator: Aggregator::new(),
                timer: FlushTimer::new(deps.flush_delay),
            }),
            torn_down: AtomicBool::new(false),
        });

        if !settings.enabled {
            info!("Deprecation collector disabled");
            return Self {
                inner,
                slot: deps.slot,
                handler: None,
                listener: Mutex::new(None),
            };
        }

        let handler: Arc<dyn DeprecationHandler> = Arc::new(SlotHandler {
            inner: Arc::downgrade(&inner),
        });
        if deps.slot.install(Arc::clone(&handler)).is_some() {
            debug!("Replaced previously installed deprecation handler");
        }

        let listener = page_events.and_then(|events| spawn_listener(Arc::downgrade(&inner), events));

        info!(
            silenced = inner.config.len(),
            listening = listener.is_some(),
            "Deprecation collector initialized"
        );

        Self {
            inner,
            slot: deps.slot,
            handler: Some(handler),
            listener: Mutex::new(listener),
        }
    }

    pub fn track(&self, event: &DeprecationEvent) -> TrackOutcome {
        self.inner.track(event)
    }

    /// Flushes now. Returns the batch handed to the transport, or None when
    /// there was nothing to send.
    pub fn report(&self) -> Option<ReportBatch> {
        self.inner.report()
    }

    pub fn handle_visibility_changed(&self, visibility: Visibility) {
        self.inner.handle_visibility_changed(visibility)
    }

    pub fn handle_navigation_pending(&self) {
        self.inner.handle_navigation_pending()
    }

    /// Unregisters the handler, stops listening and cancels the pending flush.
    /// Idempotent.
    pub fn teardown(&self) {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handler) = &self.handler {
            self.slot.uninstall_if(handler);
        }
        if let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
        self.inner.lock_state().timer.cancel();

        debug!("Deprecation collector torn down");
    }

    pub fn pending_counts(&self) -> CounterMap {
        self.inner.lock_state().aggregator.snapshot()
    }

    pub fn has_pending_flush(&self) -> bool {
        self.inner.lock_state().timer.is_pending()
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    pub fn notifier(&self) -> &CriticalDeprecationNotifier {
        &self.inner.notifier
    }
}

impl Drop for DeprecationCollector {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn spawn_listener(
    inner: Weak<CollectorInner>,
    mut events: broadcast::Receiver<PageEvent>,
) -> Option<JoinHandle<()>> {
    let handle = match Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => {
            debug!("No async runtime available, page signals not observed");
            return None;
        }
    };

    Some(handle.spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped = skipped, "Page signal listener lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let Some(inner) = inner.upgrade() else {
                break;
            };
            match event {
                PageEvent::VisibilityChanged(visibility) => {
                    inner.handle_visibility_changed(visibility)
                }
                PageEvent::NavigationPending => inner.handle_navigation_pending(),
            }
        }
    }))
}

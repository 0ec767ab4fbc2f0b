use deprecation_collector::collector::{
    BeaconTransport, CollectorDeps, DeprecationCollector, DeprecationOptions, Disposition,
    GlobalNotice, HandlerSlot, HookPoint, IdentifierConfig, NoticePublisher, PageEvent,
    StackSourceIdentifier, TrackOutcome, ViewerRole, Visibility,
};
use deprecation_collector::config::CollectorSettings;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

// * Test Suite for the client-side aggregation and flush protocol

#[derive(Default)]
struct RecordingTransport {
    payloads: Mutex<Vec<String>>,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<BTreeMap<String, u64>> {
        self.payloads
            .lock()
            .unwrap()
            .iter()
            .map(|p| serde_json::from_str(p).unwrap())
            .collect()
    }
}

impl BeaconTransport for RecordingTransport {
    fn send_beacon(&self, path: &str, payload: String) -> bool {
        assert_eq!(path, "/deprecation-collector/log");
        self.payloads.lock().unwrap().push(payload);
        true
    }
}

#[derive(Default)]
struct RecordingNotices {
    notices: Mutex<Vec<GlobalNotice>>,
}

impl NoticePublisher for RecordingNotices {
    fn publish(&self, notice: GlobalNotice) {
        self.notices.lock().unwrap().push(notice);
    }
}

struct Harness {
    slot: Arc<HandlerSlot>,
    transport: Arc<RecordingTransport>,
    notices: Arc<RecordingNotices>,
    collector: DeprecationCollector,
}

fn harness(config: IdentifierConfig, settings: CollectorSettings, viewer: ViewerRole) -> Harness {
    harness_with_events(config, settings, viewer, None)
}

fn harness_with_events(
    config: IdentifierConfig,
    settings: CollectorSettings,
    viewer: ViewerRole,
    events: Option<broadcast::Receiver<PageEvent>>,
) -> Harness {
    let slot = Arc::new(HandlerSlot::new());
    let transport = Arc::new(RecordingTransport::default());
    let notices = Arc::new(RecordingNotices::default());
    let deps = CollectorDeps::new(transport.clone())
        .notices(notices.clone())
        .sources(Arc::new(StackSourceIdentifier::new().with_theme(7, "Air")))
        .viewer(viewer)
        .slot(slot.clone());
    let collector = DeprecationCollector::initialize(config, &settings, deps, events);

    Harness {
        slot,
        transport,
        notices,
        collector,
    }
}

fn default_harness() -> Harness {
    harness(IdentifierConfig::new(), CollectorSettings::default(), ViewerRole::User)
}

fn raise(slot: &HandlerSlot, id: &str) {
    slot.emit(HookPoint::Application, "deprecated", DeprecationOptions::with_id(id));
}

#[tokio::test]
async fn test_scenario_d_report_then_empty_report() {
    let h = default_harness();

    raise(&h.slot, "discourse.fake");
    raise(&h.slot, "discourse.fake");
    h.collector.report();
    h.collector.report();

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0], BTreeMap::from([("discourse.fake".to_string(), 2)]));
    assert!(h.collector.pending_counts().is_empty());
}

#[tokio::test]
async fn test_counts_match_tracked_events_per_identifier() {
    let h = default_harness();

    for _ in 0..3 {
        raise(&h.slot, "ember.a");
    }
    raise(&h.slot, "ember.b");
    h.slot.emit(HookPoint::Framework, "deprecated", DeprecationOptions::with_id("ember.a"));

    let batch = h.collector.report().unwrap();
    assert_eq!(batch.counts().get("ember.a"), Some(&4));
    assert_eq!(batch.counts().get("ember.b"), Some(&1));
}

#[tokio::test]
async fn test_report_on_empty_state_sends_nothing() {
    let h = default_harness();
    assert!(h.collector.report().is_none());
    assert!(h.transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_burst_coalesces_into_one_flush() {
    let h = default_harness();

    for _ in 0..5 {
        raise(&h.slot, "discourse.fake");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert!(h.transport.sent().is_empty());

    // * First event armed the timer at t=0, so it fires at t=10 regardless of later events
    tokio::time::sleep(Duration::from_secs(6)).await;
    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].get("discourse.fake"), Some(&5));
    assert!(!h.collector.has_pending_flush());
}

#[tokio::test(start_paused = true)]
async fn test_counts_after_flush_go_to_next_report() {
    let h = default_harness();

    raise(&h.slot, "ember.a");
    tokio::time::sleep(Duration::from_secs(11)).await;
    raise(&h.slot, "ember.a");
    raise(&h.slot, "ember.b");
    tokio::time::sleep(Duration::from_secs(11)).await;

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].get("ember.a"), Some(&1));
    assert_eq!(sent[1].get("ember.a"), Some(&1));
    assert_eq!(sent[1].get("ember.b"), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_silenced_identifier_never_counts_or_arms() {
    let config = IdentifierConfig::new().with("ember.noisy", Disposition::Silence);
    let settings = CollectorSettings {
        warn_critical_deprecations: true,
        ..Default::default()
    };
    let h = harness(config, settings, ViewerRole::Admin);

    assert_eq!(
        h.collector.track(&deprecation("ember.noisy")),
        TrackOutcome::Silenced
    );
    assert!(h.collector.pending_counts().is_empty());
    assert!(!h.collector.has_pending_flush());
    assert!(h.notices.notices.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn test_browser_extension_events_discarded() {
    let h = default_harness();
    let event = deprecation_collector::collector::DeprecationEvent::new(
        "deprecated",
        DeprecationOptions::with_id("ember.a").stack("at x (moz-extension://abc/inject.js:1:1)"),
    );

    assert_eq!(h.collector.track(&event), TrackOutcome::Disallowed);
    assert!(h.collector.report().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_hidden_visibility_flushes_immediately_and_cancels_timer() {
    let h = default_harness();

    raise(&h.slot, "discourse.fake");
    assert!(h.collector.has_pending_flush());

    h.collector.handle_visibility_changed(Visibility::Visible);
    assert!(h.transport.sent().is_empty());

    h.collector.handle_visibility_changed(Visibility::Hidden);
    assert_eq!(h.transport.sent().len(), 1);
    assert!(!h.collector.has_pending_flush());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.transport.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_navigation_rearms_timer() {
    let h = default_harness();

    raise(&h.slot, "discourse.fake");
    tokio::time::sleep(Duration::from_secs(8)).await;
    h.collector.handle_navigation_pending();

    tokio::time::sleep(Duration::from_secs(8)).await;
    assert!(h.transport.sent().is_empty());

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.transport.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_navigation_with_nothing_counted_arms_nothing() {
    let h = default_harness();
    h.collector.handle_navigation_pending();
    assert!(!h.collector.has_pending_flush());
}

#[tokio::test]
async fn test_page_signals_drive_flush() {
    let (tx, rx) = broadcast::channel(8);
    let h = harness_with_events(
        IdentifierConfig::new(),
        CollectorSettings::default(),
        ViewerRole::User,
        Some(rx),
    );

    raise(&h.slot, "discourse.fake");
    tx.send(PageEvent::VisibilityChanged(Visibility::Hidden)).unwrap();

    for _ in 0..50 {
        if !h.transport.sent().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.transport.sent().len(), 1);

    h.collector.teardown();
    assert!(!h.slot.is_installed());
}

#[tokio::test]
async fn test_scenario_e_single_advisory_for_admin() {
    let settings = CollectorSettings {
        warn_critical_deprecations: true,
        critical_deprecations_message: Some(
            "Discourse core changes will be applied to your site on Jan 15.".to_string(),
        ),
        ..Default::default()
    };
    let h = harness(IdentifierConfig::new(), settings, ViewerRole::Admin);

    raise(&h.slot, "ember.component.reopen");
    raise(&h.slot, "ember.other");
    raise(&h.slot, "discourse.modal-controllers");

    let notices = h.notices.notices.lock().unwrap();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].text.contains(
        "One of your themes or plugins needs updating for compatibility with upcoming Discourse core changes"
    ));
    assert!(notices[0].text.contains("Jan 15."));
    assert!(h.collector.notifier().has_warned());
}

#[tokio::test]
async fn test_core_identifiers_do_not_warn() {
    let settings = CollectorSettings {
        warn_critical_deprecations: true,
        ..Default::default()
    };
    let h = harness(IdentifierConfig::new(), settings, ViewerRole::Admin);

    raise(&h.slot, "discourse.fake");
    assert!(h.notices.notices.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_reinitialize_replaces_handler() {
    let slot = Arc::new(HandlerSlot::new());
    let first_transport = Arc::new(RecordingTransport::default());
    let second_transport = Arc::new(RecordingTransport::default());
    let settings = CollectorSettings::default();

    let first = DeprecationCollector::initialize(
        IdentifierConfig::new(),
        &settings,
        CollectorDeps::new(first_transport.clone()).slot(slot.clone()),
        None,
    );
    let second = DeprecationCollector::initialize(
        IdentifierConfig::new(),
        &settings,
        CollectorDeps::new(second_transport.clone()).slot(slot.clone()),
        None,
    );

    raise(&slot, "discourse.fake");
    assert!(first.pending_counts().is_empty());
    assert_eq!(second.pending_counts().get("discourse.fake"), Some(&1));

    // * Tearing down the replaced collector must not unhook its successor
    first.teardown();
    assert!(slot.is_installed());
    drop(second);
    assert!(!slot.is_installed());
}

#[tokio::test]
async fn test_disabled_collector_is_inert() {
    let settings = CollectorSettings {
        enabled: false,
        ..Default::default()
    };
    let h = harness(IdentifierConfig::new(), settings, ViewerRole::Admin);

    assert!(!h.slot.is_installed());
    assert_eq!(h.collector.track(&deprecation("ember.a")), TrackOutcome::Inactive);
    assert!(h.collector.report().is_none());
    h.collector.teardown();
}

fn deprecation(id: &str) -> deprecation_collector::collector::DeprecationEvent {
    deprecation_collector::collector::DeprecationEvent::new("deprecated", DeprecationOptions::with_id(id))
}

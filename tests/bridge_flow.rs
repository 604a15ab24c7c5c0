//! End-to-end bridge behaviour against an in-memory bus

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::sync::mpsc;

use sync_status_bridge::accounts::{
    AccountEntry, ApplicationInfo, ConfiguredAccounts, Launcher, ServiceEntry,
};
use sync_status_bridge::error::{BridgeError, TransportError};
use sync_status_bridge::status::RawStatus;
use sync_status_bridge::transport::{
    BusHandle, CallReply, DaemonAddress, ReplyShape, Subscription, Transport, ABORT_SYNC,
    START_SYNC, SYNC_PROFILE,
};
use sync_status_bridge::{Bridge, Command, ModelEvent, Phase, TransferId, TransferState};

const QUEUED: i32 = 0;
const STARTED: i32 = 1;
const PROGRESS: i32 = 2;
const ERROR: i32 = 3;
const DONE: i32 = 4;
const ABORTED: i32 = 5;

const P1_PROFILE: &str = r#"<profile name="p1" type="sync">
    <key name="category" value="contacts"/>
    <key name="accountid" value="45"/>
    <key name="remote_service_name" value="google-contacts"/>
</profile>"#;

const P2_PROFILE: &str = r#"<profile name="p2" type="sync">
    <key name="category" value="calendar"/>
    <key name="displayname" value="Family calendar"/>
</profile>"#;

const P3_PROFILE: &str = r#"<profile name="p3" type="sync">
    <key name="category" value="email"/>
</profile>"#;

#[derive(Default)]
struct FakeBus {
    calls: Vec<(String, String)>,
    profiles: HashMap<String, String>,
    start_accepted: bool,
    refuse_connect: bool,
    fail_commands: bool,
    connections: u32,
    signals: Option<mpsc::UnboundedSender<RawStatus>>,
}

#[derive(Clone, Default)]
struct FakeTransport {
    bus: Arc<Mutex<FakeBus>>,
}

impl FakeTransport {
    fn new() -> Self {
        let transport = Self::default();
        {
            let mut bus = transport.bus.lock().unwrap();
            bus.start_accepted = true;
            bus.profiles.insert("p1".into(), P1_PROFILE.into());
            bus.profiles.insert("p2".into(), P2_PROFILE.into());
            bus.profiles.insert("p3".into(), P3_PROFILE.into());
        }
        transport
    }

    fn emit(&self, profile_id: &str, status: i32, message: &str, detail: i32) {
        let bus = self.bus.lock().unwrap();
        let signals = bus.signals.as_ref().expect("no subscription installed");
        signals
            .send(RawStatus {
                profile_id: profile_id.into(),
                status,
                message: message.into(),
                detail,
            })
            .unwrap();
    }

    /// Simulate the bus going away under the subscription
    fn drop_connection(&self) {
        self.bus.lock().unwrap().signals = None;
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.bus.lock().unwrap().calls.clone()
    }

    fn calls_to(&self, method: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == method)
            .map(|(_, arg)| arg)
            .collect()
    }
}

#[derive(Clone)]
struct FakeHandle {
    bus: Arc<Mutex<FakeBus>>,
    serial: u32,
}

impl Transport for FakeTransport {
    type Handle = FakeHandle;

    async fn connect(&self) -> Result<FakeHandle, TransportError> {
        let mut bus = self.bus.lock().unwrap();
        if bus.refuse_connect {
            return Err(TransportError::Unavailable("no session bus".into()));
        }
        bus.connections += 1;
        Ok(FakeHandle {
            bus: self.bus.clone(),
            serial: bus.connections,
        })
    }
}

impl BusHandle for FakeHandle {
    fn same_as(&self, other: &Self) -> bool {
        self.serial == other.serial
    }

    async fn subscribe(
        &self,
        _daemon: &DaemonAddress,
        _signal: &str,
    ) -> Result<Subscription, TransportError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.bus.lock().unwrap().signals = Some(tx);
        let stream = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx));
        Ok(Subscription::new(stream.boxed()))
    }

    async fn call(
        &self,
        _daemon: &DaemonAddress,
        method: &str,
        arg: &str,
        _reply: ReplyShape,
    ) -> Result<CallReply, TransportError> {
        let mut bus = self.bus.lock().unwrap();
        bus.calls.push((method.to_string(), arg.to_string()));
        if bus.fail_commands && method != SYNC_PROFILE {
            return Err(TransportError::Remote(format!("{} refused", method)));
        }
        match method {
            START_SYNC => Ok(CallReply::Bool(bus.start_accepted)),
            ABORT_SYNC => Ok(CallReply::Unit),
            SYNC_PROFILE => bus
                .profiles
                .get(arg)
                .cloned()
                .map(CallReply::Text)
                .ok_or_else(|| TransportError::Remote(format!("no profile {}", arg))),
            other => Err(TransportError::Remote(format!("unknown method {}", other))),
        }
    }
}

#[derive(Clone, Default)]
struct RecordingLauncher {
    urls: Rc<RefCell<Vec<String>>>,
}

impl Launcher for RecordingLauncher {
    fn launch(&self, url: &str) -> Result<(), BridgeError> {
        self.urls.borrow_mut().push(url.to_string());
        Ok(())
    }
}

fn accounts() -> ConfiguredAccounts {
    ConfiguredAccounts::new(
        &[AccountEntry {
            id: 45,
            display_name: "Work Google".into(),
        }],
        &[ServiceEntry {
            name: "google-contacts".into(),
            applications: vec![ApplicationInfo {
                name: "address-book-app".into(),
                icon: Some("google-contacts".into()),
                desktop_file: Some("/usr/share/applications/address-book-app.desktop".into()),
            }],
        }],
    )
}

struct Harness {
    bus: FakeTransport,
    bridge: Bridge<FakeTransport>,
    events: Rc<RefCell<Vec<ModelEvent>>>,
    launched: Rc<RefCell<Vec<String>>>,
}

impl Harness {
    fn new() -> Self {
        let bus = FakeTransport::new();
        let launcher = RecordingLauncher::default();
        let launched = launcher.urls.clone();
        let mut bridge = Bridge::new(
            bus.clone(),
            DaemonAddress::default(),
            Box::new(accounts()),
            Box::new(launcher),
        );

        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        bridge.observe(move |event| sink.borrow_mut().push(event.clone()));

        Self {
            bus,
            bridge,
            events,
            launched,
        }
    }

    async fn connected() -> Self {
        let mut harness = Self::new();
        harness.bridge.connect();
        assert!(harness.bridge.dispatch_next().await);
        assert!(harness.bridge.connected());
        harness
    }

    async fn signal(&mut self, profile_id: &str, status: i32, message: &str, detail: i32) {
        self.bus.emit(profile_id, status, message, detail);
        assert!(self.bridge.dispatch_next().await);
    }

    fn id_of(&self, profile_id: &str) -> TransferId {
        self.bridge.registry().get_by_profile(profile_id).unwrap().id
    }

    fn kinds(&self) -> Vec<&'static str> {
        self.events
            .borrow()
            .iter()
            .map(|event| match event {
                ModelEvent::Added { .. } => "added",
                ModelEvent::Changed { .. } => "changed",
                ModelEvent::Removed { .. } => "removed",
            })
            .collect()
    }
}

fn assert_close(actual: Option<f64>, expected: f64) {
    let actual = actual.expect("progress is indeterminate");
    assert!((actual - expected).abs() < 1e-9, "{} != {}", actual, expected);
}

#[tokio::test]
async fn test_reference_run() {
    let mut h = Harness::connected().await;

    h.signal("p1", QUEUED, "", 0).await;
    let transfer = h.bridge.registry().get_by_profile("p1").unwrap().clone();
    assert_eq!(transfer.state, TransferState::Queued);
    assert_eq!(transfer.progress, Some(0.0));
    assert_eq!(transfer.title, "Work Google");
    assert_eq!(transfer.icon, "google-contacts");

    h.signal("p1", STARTED, "", Phase::Initialising.marker()).await;
    let transfer = h.bridge.registry().get_by_profile("p1").unwrap();
    assert_eq!(transfer.state, TransferState::Running);
    assert_eq!(transfer.label.as_deref(), Some("Syncing"));
    assert_close(transfer.progress, 1.0 / 3.0);

    h.signal("p1", PROGRESS, "", 50).await;
    assert_close(h.bridge.registry().get_by_profile("p1").unwrap().progress, 0.5);

    h.signal("p1", DONE, "", 0).await;
    let transfer = h.bridge.registry().get_by_profile("p1").unwrap();
    assert_eq!(transfer.state, TransferState::Finished);
    assert_eq!(transfer.progress, Some(1.0));
    assert_eq!(transfer.label, None);

    assert_eq!(h.kinds(), vec!["added", "changed", "changed", "changed"]);
    assert_eq!(h.bus.calls_to(SYNC_PROFILE), vec!["p1".to_string()]);
}

#[tokio::test]
async fn test_progress_is_monotone_through_phases() {
    let mut h = Harness::connected().await;
    h.signal("p1", QUEUED, "", 0).await;

    let mut last = 0.0;
    let steps = [
        (STARTED, Phase::Initialising.marker()),
        (PROGRESS, 10),
        (PROGRESS, 90),
        (PROGRESS, Phase::Sending.marker()),
        (PROGRESS, 100),
        (PROGRESS, Phase::Receiving.marker()),
        (PROGRESS, 40),
        (PROGRESS, Phase::Finalising.marker()),
    ];
    for (status, detail) in steps {
        h.signal("p1", status, "", detail).await;
        let progress = h.bridge.registry().get_by_profile("p1").unwrap().progress;
        let progress = progress.unwrap();
        assert!(progress >= last, "{} fell below {} at detail {}", progress, last, detail);
        last = progress;
    }
    assert_close(Some(last), 1.0);

    h.signal("p1", QUEUED, "", 0).await;
    assert_eq!(h.bridge.registry().get_by_profile("p1").unwrap().progress, Some(0.0));
}

#[tokio::test]
async fn test_canceled_transfer_is_removed() {
    let mut h = Harness::connected().await;
    h.signal("p1", QUEUED, "", 0).await;
    let first = h.id_of("p1");

    h.signal("p1", ABORTED, "", 0).await;
    assert!(h.bridge.registry().is_empty());
    assert_eq!(h.kinds(), vec!["added", "changed", "removed"]);
    assert_eq!(h.events.borrow().last().map(ModelEvent::id), Some(first));

    // A later run of the same profile is a new transfer
    h.signal("p1", QUEUED, "", 0).await;
    assert_ne!(h.id_of("p1"), first);
    assert_eq!(h.kinds(), vec!["added", "changed", "removed", "added"]);
}

#[tokio::test]
async fn test_error_keeps_transfer_and_progress() {
    let mut h = Harness::connected().await;
    h.signal("p1", STARTED, "", Phase::Sending.marker()).await;
    h.signal("p1", PROGRESS, "", 30).await;

    h.signal("p1", ERROR, "Network down", 0).await;
    let transfer = h.bridge.registry().get_by_profile("p1").unwrap();
    assert_eq!(transfer.state, TransferState::Error);
    assert_eq!(transfer.error.as_deref(), Some("Network down"));
    assert_eq!(transfer.label, None);
    assert_close(transfer.progress, 1.0 / 3.0 + 0.1);
    assert_eq!(h.bridge.registry().len(), 1);
}

#[tokio::test]
async fn test_connection_loss_retires_everything() {
    let mut h = Harness::connected().await;
    h.signal("p1", STARTED, "", Phase::Receiving.marker()).await;
    h.signal("p2", QUEUED, "", 0).await;
    let old = h.id_of("p1");

    h.bus.drop_connection();
    assert!(h.bridge.dispatch_next().await);
    assert!(!h.bridge.connected());
    assert!(h.bridge.registry().is_empty());
    assert_eq!(h.kinds().iter().filter(|k| **k == "removed").count(), 2);

    // Nothing left to wait on
    assert!(!h.bridge.dispatch_next().await);

    h.bridge.connect();
    assert!(h.bridge.dispatch_next().await);
    assert!(h.bridge.connected());

    // A percentage without a phase: the old RECEIVING phase must be forgotten
    h.signal("p1", PROGRESS, "", 50).await;
    let transfer = h.bridge.registry().get_by_profile("p1").unwrap();
    assert_ne!(transfer.id, old);
    assert_eq!(transfer.progress, None);
    assert_eq!(transfer.tracker().phase(), None);
}

#[tokio::test]
async fn test_unseen_profiles_resolved_once_each() {
    let mut h = Harness::connected().await;
    h.signal("p1", QUEUED, "", 0).await;
    h.signal("p2", QUEUED, "", 0).await;
    h.signal("p1", STARTED, "", Phase::Initialising.marker()).await;
    h.signal("p2", STARTED, "", Phase::Initialising.marker()).await;

    assert_eq!(h.bus.calls_to(SYNC_PROFILE), vec!["p1".to_string(), "p2".to_string()]);
    assert_eq!(h.kinds(), vec!["added", "added", "changed", "changed"]);

    let p1 = h.bridge.registry().get_by_profile("p1").unwrap();
    let p2 = h.bridge.registry().get_by_profile("p2").unwrap();
    assert_eq!(p1.title, "Work Google");
    assert_eq!(p2.title, "Family calendar");
    assert_eq!(p2.icon, "calendar-app");
    assert_ne!(p1.id, p2.id);
}

#[tokio::test]
async fn test_missing_profile_still_creates_transfer() {
    let mut h = Harness::connected().await;
    h.signal("ghost", QUEUED, "", 0).await;

    let transfer = h.bridge.registry().get_by_profile("ghost").unwrap();
    assert_eq!(transfer.title, "Contacts");
    assert_eq!(transfer.icon, "address-book-app");
    assert_eq!(h.kinds(), vec!["added"]);
}

#[tokio::test]
async fn test_unknown_status_is_ignored() {
    let mut h = Harness::connected().await;
    h.signal("p1", 9, "", 0).await;

    assert!(h.bridge.registry().is_empty());
    assert!(h.events.borrow().is_empty());
    assert!(h.bus.calls().is_empty());
}

#[tokio::test]
async fn test_start_while_disconnected() {
    let mut h = Harness::new();
    let result = h.bridge.start(&TransferId::new()).await;
    assert!(matches!(result, Err(BridgeError::NotConnected)));
    assert!(h.bus.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_while_disconnected() {
    let mut h = Harness::new();
    let result = h.bridge.cancel(&TransferId::new()).await;
    assert!(matches!(result, Err(BridgeError::NotConnected)));
    assert!(h.bus.calls().is_empty());
}

#[tokio::test]
async fn test_start_remote_error_is_not_retried() {
    let mut h = Harness::connected().await;
    h.signal("p1", ERROR, "Auth failed", 0).await;
    let id = h.id_of("p1");
    h.bus.bus.lock().unwrap().fail_commands = true;

    let result = h.bridge.start(&id).await;
    assert!(matches!(
        result,
        Err(BridgeError::RemoteCall {
            method: START_SYNC,
            source: TransportError::Remote(_),
        })
    ));
    assert_eq!(h.bus.calls_to(START_SYNC).len(), 1);
    assert_eq!(h.bridge.registry().get(&id).unwrap().state, TransferState::Error);
}

#[tokio::test]
async fn test_cancel_remote_error_is_not_retried() {
    let mut h = Harness::connected().await;
    h.signal("p1", STARTED, "", Phase::Initialising.marker()).await;
    let id = h.id_of("p1");
    h.bus.bus.lock().unwrap().fail_commands = true;

    let result = h.bridge.cancel(&id).await;
    assert!(matches!(
        result,
        Err(BridgeError::RemoteCall {
            method: ABORT_SYNC,
            source: TransportError::Remote(_),
        })
    ));
    assert_eq!(h.bus.calls_to(ABORT_SYNC).len(), 1);
    assert_eq!(h.bridge.registry().get(&id).unwrap().state, TransferState::Running);
}

#[tokio::test]
async fn test_start_after_error_requeues() {
    let mut h = Harness::connected().await;
    h.signal("p1", STARTED, "", Phase::Sending.marker()).await;
    h.signal("p1", ERROR, "Auth failed", 0).await;
    let id = h.id_of("p1");

    h.bridge.start(&id).await.unwrap();
    assert_eq!(h.bus.calls_to(START_SYNC), vec!["p1".to_string()]);

    let transfer = h.bridge.registry().get(&id).unwrap();
    assert_eq!(transfer.state, TransferState::Queued);
    assert_eq!(transfer.progress, Some(0.0));
    assert_eq!(transfer.error, None);
    assert_eq!(h.kinds().last(), Some(&"changed"));
}

#[tokio::test]
async fn test_start_refused_by_daemon() {
    let mut h = Harness::connected().await;
    h.signal("p1", ERROR, "Auth failed", 0).await;
    let id = h.id_of("p1");
    h.bus.bus.lock().unwrap().start_accepted = false;

    let result = h.bridge.start(&id).await;
    assert!(matches!(result, Err(BridgeError::StartRejected(profile)) if profile == "p1"));
    assert_eq!(h.bridge.registry().get(&id).unwrap().state, TransferState::Error);
}

#[tokio::test]
async fn test_start_while_running_is_refused_locally() {
    let mut h = Harness::connected().await;
    h.signal("p1", STARTED, "", Phase::Initialising.marker()).await;
    let id = h.id_of("p1");

    let result = h.bridge.start(&id).await;
    assert!(matches!(result, Err(BridgeError::NotStartable(TransferState::Running))));
    assert!(h.bus.calls_to(START_SYNC).is_empty());
}

#[tokio::test]
async fn test_cancel_aborts_profile() {
    let mut h = Harness::connected().await;
    h.signal("p1", STARTED, "", Phase::Initialising.marker()).await;
    let id = h.id_of("p1");

    h.bridge.cancel(&id).await.unwrap();
    assert_eq!(h.bus.calls_to(ABORT_SYNC), vec!["p1".to_string()]);

    // Removal only happens once the daemon reports the abort
    assert_eq!(h.bridge.registry().len(), 1);
    h.signal("p1", ABORTED, "", 0).await;
    assert!(h.bridge.registry().is_empty());
}

#[tokio::test]
async fn test_cancel_unknown_transfer() {
    let mut h = Harness::connected().await;
    let result = h.bridge.cancel(&TransferId::new()).await;
    assert!(matches!(result, Err(BridgeError::UnknownEntity(_))));
    assert!(h.bus.calls_to(ABORT_SYNC).is_empty());
}

#[tokio::test]
async fn test_pause_and_resume_unsupported() {
    let mut h = Harness::connected().await;
    h.signal("p1", STARTED, "", Phase::Initialising.marker()).await;
    let id = h.id_of("p1");

    assert!(matches!(h.bridge.pause(&id), Err(BridgeError::Unsupported("pause"))));
    assert!(matches!(h.bridge.resume(&id), Err(BridgeError::Unsupported("resume"))));
    assert_eq!(h.bus.calls().len(), 1);
}

#[tokio::test]
async fn test_open_launches_application() {
    let mut h = Harness::connected().await;
    h.signal("p1", QUEUED, "", 0).await;
    h.signal("p2", QUEUED, "", 0).await;

    h.bridge.open(&h.id_of("p1")).unwrap();
    h.bridge.open(&h.id_of("p2")).unwrap();
    assert_eq!(
        *h.launched.borrow(),
        vec![
            "application:///address-book-app.desktop".to_string(),
            "application:///calendar-app.desktop".to_string(),
        ]
    );

    assert!(matches!(h.bridge.open(&TransferId::new()), Err(BridgeError::UnknownEntity(_))));
}

#[tokio::test]
async fn test_open_without_launch_target() {
    let mut h = Harness::connected().await;
    h.signal("p3", QUEUED, "", 0).await;
    let id = h.id_of("p3");

    let result = h.bridge.open(&id);
    assert!(matches!(result, Err(BridgeError::NoLaunchTarget(target)) if target == id.to_string()));
    assert!(h.launched.borrow().is_empty());
}

#[tokio::test]
async fn test_disconnect_while_connecting() {
    let mut h = Harness::new();
    h.bridge.connect();
    h.bridge.disconnect();

    assert!(!h.bridge.dispatch_next().await);
    assert!(!h.bridge.connected());
    assert_eq!(h.bus.bus.lock().unwrap().connections, 0);

    // The bridge can still connect afterwards
    h.bridge.connect();
    assert!(h.bridge.dispatch_next().await);
    assert!(h.bridge.connected());
}

#[tokio::test]
async fn test_connect_failure_leaves_bridge_idle() {
    let mut h = Harness::new();
    h.bus.bus.lock().unwrap().refuse_connect = true;

    h.bridge.connect();
    assert!(h.bridge.dispatch_next().await);
    assert!(!h.bridge.connected());
    assert!(!h.bridge.dispatch_next().await);
}

#[tokio::test]
async fn test_teardown_cancels_pending_connect() {
    let mut h = Harness::new();
    h.bridge.connect();
    h.bridge.teardown();

    assert!(!h.bridge.dispatch_next().await);
    assert!(!h.bridge.connected());
    assert_eq!(h.bus.bus.lock().unwrap().connections, 0);
}

#[tokio::test]
async fn test_command_loop() {
    let h = Harness::connected().await;
    let (tx, rx) = mpsc::unbounded_channel();

    let client = async move {
        let (command, reply) = Command::with_reply(|reply| Command::Connected { reply });
        tx.send(command).unwrap();
        assert!(reply.await.unwrap().unwrap());

        let (command, reply) = Command::with_reply(|reply| Command::Pause {
            id: TransferId::new(),
            reply,
        });
        tx.send(command).unwrap();
        assert!(matches!(reply.await.unwrap(), Err(BridgeError::Unsupported(_))));

        let (command, reply) = Command::with_reply(|reply| Command::Disconnect { reply });
        tx.send(command).unwrap();
        reply.await.unwrap().unwrap();

        let (command, reply) = Command::with_reply(|reply| Command::Connected { reply });
        tx.send(command).unwrap();
        assert!(!reply.await.unwrap().unwrap());
        // Dropping the sender ends the loop
    };

    tokio::join!(h.bridge.run(rx), client);
}

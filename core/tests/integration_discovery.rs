// Integration tests for broadcast → scan → decode over the simulated air
//
// Covers dedup (first sighting wins), filter-key rejection, permission
// gating, radio failures, and the guarantee that no delivery happens after
// Scanner::stop returns.

use async_trait::async_trait;
use parking_lot::Mutex;
use rollcall_core::simulated::{SimulatedAir, SimulatedRadio, StaticPermissions};
use rollcall_core::{
    AdvertiseRequest, Advertisement, BroadcastState, Broadcaster, CapabilityGate,
    DiscoveredPeer, DiscoverySink, FilterKey, Permission, Platform, ProtocolConfig,
    ProtocolError, RadioBridge, RadioError, RadioEvent, ScanRequest, ScanState, Scanner,
    SessionIdentifier,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

fn granted_gate() -> CapabilityGate {
    CapabilityGate::new(
        Platform::Android { api_level: 34 },
        Arc::new(StaticPermissions::grant_all()),
    )
}

fn scanner_on(radio: Arc<SimulatedRadio>) -> Scanner {
    Scanner::new(radio, granted_gate(), ProtocolConfig::default())
}

fn channel_sink() -> (
    impl DiscoverySink + 'static,
    mpsc::UnboundedReceiver<DiscoveredPeer>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = move |peer: DiscoveredPeer| {
        let _ = tx.send(peer);
    };
    (sink, rx)
}

fn matching(peer: &str, data: &[u8]) -> Advertisement {
    Advertisement::new(peer)
        .with_service(FilterKey::default().uuid())
        .with_manufacturer_data(data.to_vec())
}

async fn next_peer(rx: &mut mpsc::UnboundedReceiver<DiscoveredPeer>) -> DiscoveredPeer {
    timeout(WAIT, rx.recv())
        .await
        .expect("peer delivered in time")
        .expect("sink channel open")
}

#[tokio::test]
async fn test_duplicate_peer_delivered_once_with_first_payload() {
    let air = SimulatedAir::new();
    let scanner = scanner_on(Arc::new(air.radio("attendee")));
    let (sink, mut rx) = channel_sink();

    scanner.start(FilterKey::default(), sink).await.expect("start");
    air.inject(matching("dev-1", &[0, 0, 0, 7]));
    air.inject(matching("dev-1", &[0, 0, 0, 9]));
    air.inject(matching("dev-2", &[0, 0, 0, 3]));

    let first = next_peer(&mut rx).await;
    assert_eq!(first.peer_id, "dev-1");
    assert_eq!(first.session_identifier, Some(SessionIdentifier::new(7)));

    // Observation order is preserved, and dev-1's second sighting is gone
    let second = next_peer(&mut rx).await;
    assert_eq!(second.peer_id, "dev-2");

    scanner.stop().await;
    assert!(rx.try_recv().is_err());

    println!("✓ dev-1 delivered once with session 7");
}

#[tokio::test]
async fn test_unrelated_broadcasts_are_ignored() {
    let air = SimulatedAir::new();
    let scanner = scanner_on(Arc::new(air.radio("attendee")));
    let (sink, mut rx) = channel_sink();

    scanner.start(FilterKey::default(), sink).await.expect("start");
    air.inject(
        Advertisement::new("heart-rate-strap")
            .with_service(FilterKey::from_short(0x180F).uuid())
            .with_manufacturer_data(vec![0, 0, 0, 1]),
    );
    air.inject(Advertisement::new("no-services").with_manufacturer_data(vec![0, 0, 0, 2]));
    air.inject(matching("presenter", &[0, 0, 0, 5]));

    let peer = next_peer(&mut rx).await;
    assert_eq!(peer.peer_id, "presenter");
    scanner.stop().await;
}

#[tokio::test]
async fn test_short_key_filter_matches_full_uuid() {
    let air = SimulatedAir::new();
    let scanner = scanner_on(Arc::new(air.radio("attendee")));
    let (sink, mut rx) = channel_sink();

    let short: FilterKey = "180D".parse().expect("short key");
    scanner.start(short, sink).await.expect("start");
    air.inject(matching("presenter", &[0, 0, 0, 5]));

    assert_eq!(
        next_peer(&mut rx).await.session_identifier,
        Some(SessionIdentifier::new(5))
    );
    scanner.stop().await;
}

#[tokio::test]
async fn test_undecodable_peer_surfaces_without_identifier() {
    let air = SimulatedAir::new();
    let scanner = scanner_on(Arc::new(air.radio("attendee")));
    let (sink, mut rx) = channel_sink();

    scanner.start(FilterKey::default(), sink).await.expect("start");
    air.inject(matching("broken", &[0x01, 0x02]));
    air.inject(matching("fine", &[0, 0, 1, 0]));

    let broken = next_peer(&mut rx).await;
    assert_eq!(broken.peer_id, "broken");
    assert_eq!(broken.session_identifier, None);

    // Scanning carries on after a decode failure
    let fine = next_peer(&mut rx).await;
    assert_eq!(fine.session_identifier, Some(SessionIdentifier::new(256)));
    assert_eq!(scanner.state(), ScanState::Scanning);
    scanner.stop().await;
}

#[tokio::test]
async fn test_double_start_registers_once() {
    let air = SimulatedAir::new();
    let radio = Arc::new(air.radio("attendee"));
    let scanner = scanner_on(radio.clone());

    let (sink_a, _rx_a) = channel_sink();
    let (sink_b, _rx_b) = channel_sink();
    scanner.start(FilterKey::default(), sink_a).await.expect("first");
    scanner.start(FilterKey::default(), sink_b).await.expect("second is a no-op");

    assert_eq!(radio.scan_registrations(), 1);
    assert_eq!(scanner.state(), ScanState::Scanning);

    scanner.stop().await;
    scanner.stop().await;
    assert_eq!(scanner.state(), ScanState::Idle);
    assert!(!air.is_scanning("attendee"));
}

#[tokio::test]
async fn test_restart_forgets_previous_sightings() {
    let air = SimulatedAir::new();
    let scanner = scanner_on(Arc::new(air.radio("attendee")));

    let (sink, mut rx) = channel_sink();
    scanner.start(FilterKey::default(), sink).await.expect("start");
    air.inject(matching("dev-1", &[0, 0, 0, 7]));
    assert_eq!(next_peer(&mut rx).await.peer_id, "dev-1");
    scanner.stop().await;

    let (sink, mut rx) = channel_sink();
    scanner.start(FilterKey::default(), sink).await.expect("restart");
    air.inject(matching("dev-1", &[0, 0, 0, 9]));
    let again = next_peer(&mut rx).await;
    assert_eq!(again.session_identifier, Some(SessionIdentifier::new(9)));
    scanner.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_delivery_after_stop_returns() {
    let air = SimulatedAir::new();
    let scanner = scanner_on(Arc::new(air.radio("attendee")));

    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    scanner
        .start(FilterKey::default(), move |_peer: DiscoveredPeer| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .expect("start");

    for i in 0..500u32 {
        air.inject(matching(&format!("dev-{}", i), &i.to_be_bytes()));
    }
    scanner.stop().await;

    let at_stop = delivered.load(Ordering::SeqCst);
    assert_eq!(air.inject(matching("late", &[0, 0, 0, 1])), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(delivered.load(Ordering::SeqCst), at_stop);
}

#[tokio::test]
async fn test_permission_denial_blocks_scan() {
    let air = SimulatedAir::new();
    let radio = Arc::new(air.radio("attendee"));
    let permissions = Arc::new(StaticPermissions::denying([Permission::BluetoothConnect]));
    let gate = CapabilityGate::new(Platform::Android { api_level: 31 }, permissions.clone());
    let scanner = Scanner::new(radio.clone(), gate, ProtocolConfig::default());

    let (sink, _rx) = channel_sink();
    let err = scanner
        .start(FilterKey::default(), sink)
        .await
        .expect_err("denied");

    match err {
        ProtocolError::PermissionDenied { missing, .. } => {
            assert_eq!(missing, vec![Permission::BluetoothConnect]);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(permissions.requests(), 1);
    assert_eq!(scanner.state(), ScanState::Idle);
    assert_eq!(radio.scan_registrations(), 0);
}

#[tokio::test]
async fn test_radio_unavailable_leaves_idle() {
    let air = SimulatedAir::new();
    let radio = Arc::new(air.radio("attendee"));
    radio.set_available(false);
    let scanner = scanner_on(radio.clone());

    let (sink, _rx) = channel_sink();
    let err = scanner
        .start(FilterKey::default(), sink)
        .await
        .expect_err("radio off");
    assert!(matches!(err, ProtocolError::RadioUnavailable(_)));
    assert_eq!(scanner.state(), ScanState::Idle);

    radio.set_available(true);
    let (sink, _rx) = channel_sink();
    scanner.start(FilterKey::default(), sink).await.expect("retry");
    assert_eq!(scanner.state(), ScanState::Scanning);
    scanner.stop().await;
}

struct FailureSink {
    failures: mpsc::UnboundedSender<ProtocolError>,
}

impl DiscoverySink for FailureSink {
    fn on_discovered(&self, _peer: DiscoveredPeer) {}

    fn on_scan_failed(&self, error: ProtocolError) {
        let _ = self.failures.send(error);
    }
}

#[tokio::test]
async fn test_radio_failure_ends_scan() {
    let air = SimulatedAir::new();
    let radio = Arc::new(air.radio("attendee"));
    let scanner = scanner_on(radio.clone());

    let (tx, mut failures) = mpsc::unbounded_channel();
    scanner
        .start(FilterKey::default(), FailureSink { failures: tx })
        .await
        .expect("start");

    air.fail_scans("adapter reset");
    let error = timeout(WAIT, failures.recv())
        .await
        .expect("failure reported")
        .expect("channel open");
    assert!(matches!(error, ProtocolError::RadioUnavailable(_)));
    assert_eq!(scanner.state(), ScanState::Idle);

    // A new start registers a fresh scan
    let (sink, _rx) = channel_sink();
    scanner.start(FilterKey::default(), sink).await.expect("restart");
    assert_eq!(radio.scan_registrations(), 2);
    scanner.stop().await;
}

/// Radio that keeps a failed scan registered until `stop_scan`, as host
/// adapters do when their event stream dies.
#[derive(Default)]
struct StickyRadio {
    scan: Mutex<Option<mpsc::UnboundedSender<RadioEvent>>>,
    registrations: AtomicUsize,
}

impl StickyRadio {
    fn fail(&self) {
        if let Some(events) = self.scan.lock().as_ref() {
            let _ = events.send(RadioEvent::Failed(RadioError::Platform(
                "event stream ended".to_string(),
            )));
        }
    }

    fn is_registered(&self) -> bool {
        self.scan.lock().is_some()
    }
}

#[async_trait]
impl RadioBridge for StickyRadio {
    async fn start_advertising(&self, _request: AdvertiseRequest) -> Result<(), RadioError> {
        Err(RadioError::Unsupported("scan only".to_string()))
    }

    async fn stop_advertising(&self) -> Result<(), RadioError> {
        Ok(())
    }

    async fn start_scan(
        &self,
        _request: ScanRequest,
        events: mpsc::UnboundedSender<RadioEvent>,
    ) -> Result<(), RadioError> {
        let mut scan = self.scan.lock();
        if scan.is_some() {
            return Err(RadioError::AlreadyRegistered);
        }
        *scan = Some(events);
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.scan.lock().take();
        Ok(())
    }
}

#[tokio::test]
async fn test_restart_after_failure_releases_stale_registration() {
    let radio = Arc::new(StickyRadio::default());
    let scanner = Scanner::new(radio.clone(), granted_gate(), ProtocolConfig::default());

    let (tx, mut failures) = mpsc::unbounded_channel();
    scanner
        .start(FilterKey::default(), FailureSink { failures: tx })
        .await
        .expect("start");

    radio.fail();
    timeout(WAIT, failures.recv())
        .await
        .expect("failure reported")
        .expect("channel open");
    assert_eq!(scanner.state(), ScanState::Idle);
    assert!(radio.is_registered());

    let (sink, _rx) = channel_sink();
    scanner
        .start(FilterKey::default(), sink)
        .await
        .expect("retry after failure");
    assert_eq!(scanner.state(), ScanState::Scanning);
    assert_eq!(radio.registrations.load(Ordering::SeqCst), 2);

    scanner.stop().await;
    assert!(!radio.is_registered());
}

#[tokio::test]
async fn test_broadcast_discovered_end_to_end() {
    let air = SimulatedAir::new();
    let config = ProtocolConfig {
        company_id: Some(0xFFFF),
        ..ProtocolConfig::default()
    };
    let broadcaster = Broadcaster::new(
        Arc::new(air.radio("presenter")),
        granted_gate(),
        config.clone(),
    )
    .expect("config");
    let scanner = Scanner::new(Arc::new(air.radio("attendee")), granted_gate(), config);

    broadcaster
        .start_named(
            SessionIdentifier::new(42),
            FilterKey::default(),
            Some("Jaringan Komputer".to_string()),
        )
        .await
        .expect("broadcast");
    assert_eq!(broadcaster.state(), BroadcastState::Advertising);

    let (sink, mut rx) = channel_sink();
    scanner.start(FilterKey::default(), sink).await.expect("scan");
    assert_eq!(air.sweep(), 1);
    assert_eq!(air.sweep(), 1);

    let peer = next_peer(&mut rx).await;
    assert_eq!(peer.peer_id, "presenter");
    assert_eq!(peer.session_identifier, Some(SessionIdentifier::new(42)));
    assert_eq!(peer.local_name.as_deref(), Some("Jaringan Komputer"));

    broadcaster.stop().await;
    scanner.stop().await;
    assert!(rx.try_recv().is_err());
    assert_eq!(broadcaster.state(), BroadcastState::Idle);
}

#[tokio::test]
async fn test_broadcaster_radio_failure_stays_idle() {
    let air = SimulatedAir::new();
    let radio = Arc::new(air.radio("presenter"));
    radio.set_available(false);
    let broadcaster =
        Broadcaster::new(radio, granted_gate(), ProtocolConfig::default()).expect("config");

    let err = broadcaster
        .start(SessionIdentifier::new(1), FilterKey::default())
        .await
        .expect_err("radio off");
    assert!(matches!(err, ProtocolError::RadioUnavailable(_)));
    assert_eq!(broadcaster.state(), BroadcastState::Idle);
    assert!(broadcaster.current().is_none());
}

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use auc_relaymgr::{RelayError, RelayManager, RelayManagerConfig, RelayState, RELAY_PROTECT_TAG};
use auc_transport::testing::{MemoryHost, MemoryNetwork};
use auc_transport::{
    BoxStream, ConnManager, Connectedness, Host, Notifiee, PeerAddr, PeerId, StreamHandler,
    SubscriptionId, TransportError,
};
use tokio::time::Instant;

/// Delegates to a memory host and counts the calls made by `close`.
struct CountingHost {
    inner: Arc<MemoryHost>,
    stop_notify_calls: AtomicUsize,
}

#[async_trait]
impl Host for CountingHost {
    fn id(&self) -> &PeerId {
        self.inner.id()
    }
    fn set_stream_handler(&self, protocol: &str, handler: Arc<dyn StreamHandler>) {
        self.inner.set_stream_handler(protocol, handler)
    }
    fn remove_stream_handler(&self, protocol: &str) {
        self.inner.remove_stream_handler(protocol)
    }
    async fn new_stream(&self, peer: &PeerId, protocol: &str) -> Result<BoxStream, TransportError> {
        self.inner.new_stream(peer, protocol).await
    }
    async fn connect(&self, addr: &PeerAddr) -> Result<(), TransportError> {
        self.inner.connect(addr).await
    }
    fn connectedness(&self, peer: &PeerId) -> Connectedness {
        self.inner.connectedness(peer)
    }
    fn conn_manager(&self) -> &dyn ConnManager {
        self.inner.conn_manager()
    }
    fn notify(&self, notifiee: Arc<dyn Notifiee>) -> SubscriptionId {
        self.inner.notify(notifiee)
    }
    fn stop_notify(&self, id: SubscriptionId) {
        self.stop_notify_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.stop_notify(id)
    }
}

/// Memory host whose first successful dial is torn down straight away.
struct FlakyFirstDialHost {
    inner: Arc<MemoryHost>,
    drop_next: AtomicBool,
}

#[async_trait]
impl Host for FlakyFirstDialHost {
    fn id(&self) -> &PeerId {
        self.inner.id()
    }
    fn set_stream_handler(&self, protocol: &str, handler: Arc<dyn StreamHandler>) {
        self.inner.set_stream_handler(protocol, handler)
    }
    fn remove_stream_handler(&self, protocol: &str) {
        self.inner.remove_stream_handler(protocol)
    }
    async fn new_stream(&self, peer: &PeerId, protocol: &str) -> Result<BoxStream, TransportError> {
        self.inner.new_stream(peer, protocol).await
    }
    async fn connect(&self, addr: &PeerAddr) -> Result<(), TransportError> {
        self.inner.connect(addr).await?;
        if self.drop_next.swap(false, Ordering::SeqCst) {
            self.inner.drop_link(&addr.peer);
        }
        Ok(())
    }
    fn connectedness(&self, peer: &PeerId) -> Connectedness {
        self.inner.connectedness(peer)
    }
    fn conn_manager(&self) -> &dyn ConnManager {
        self.inner.conn_manager()
    }
    fn notify(&self, notifiee: Arc<dyn Notifiee>) -> SubscriptionId {
        self.inner.notify(notifiee)
    }
    fn stop_notify(&self, id: SubscriptionId) {
        self.inner.stop_notify(id)
    }
}

struct Setup {
    _net: Arc<MemoryNetwork>,
    local: Arc<MemoryHost>,
    relay: Arc<MemoryHost>,
}

fn setup() -> Setup {
    let net = MemoryNetwork::new();
    let local = net.add_host(PeerId::new("wallet-node").unwrap());
    let relay = net.add_host(PeerId::new("relay").unwrap());
    Setup {
        _net: net,
        local,
        relay,
    }
}

fn relay_addr() -> PeerAddr {
    "/ip4/203.0.113.7/tcp/4001/p2p/relay".parse().unwrap()
}

fn protected(host: &MemoryHost) -> bool {
    host.conn_manager()
        .is_protected(&PeerId::new("relay").unwrap(), Some(RELAY_PROTECT_TAG))
}

/// Poll `cond` for up to 30s of (usually paused) time, which spans at least
/// two health checks.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..3000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cond(), "condition not reached");
}

#[tokio::test(start_paused = true)]
async fn test_start_connects_and_protects() {
    let s = setup();
    let mgr = RelayManager::start(s.local.clone(), relay_addr(), RelayManagerConfig::default())
        .await
        .unwrap();

    assert_eq!(mgr.state(), RelayState::Connected);
    assert!(protected(&s.local));
    assert_eq!(s.local.connectedness(s.relay.id()), Connectedness::Connected);
    assert_eq!(s.local.subscriber_count(), 1);
    assert_eq!(
        mgr.relayed_addr().to_string(),
        "/ip4/203.0.113.7/tcp/4001/p2p/relay/p2p-circuit/p2p/wallet-node"
    );
    assert_eq!(mgr.relay_addr(), &relay_addr());

    // healthy polls do not redial
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(mgr.reconnect_attempts(), 0);
    assert_eq!(s.local.dial_attempts(s.relay.id()), 1);

    mgr.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_fails_when_initial_connect_fails() {
    let s = setup();
    s.local.set_dial_failure(true);
    let err = RelayManager::start(s.local.clone(), relay_addr(), RelayManagerConfig::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RelayError::Connect { .. }));
    assert!(!protected(&s.local));
    assert_eq!(s.local.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_rejects_self_as_relay() {
    let s = setup();
    let own: PeerAddr = "/ip4/127.0.0.1/tcp/1/p2p/wallet-node".parse().unwrap();
    assert!(matches!(
        RelayManager::start(s.local.clone(), own, RelayManagerConfig::default()).await,
        Err(RelayError::SelfRelay(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_triggers_one_reconnect() {
    let s = setup();
    let mgr = RelayManager::start(s.local.clone(), relay_addr(), RelayManagerConfig::default())
        .await
        .unwrap();

    s.local.set_dial_failure(true);
    s.local.drop_link(s.relay.id());
    wait_until(|| mgr.reconnect_attempts() == 1).await;
    assert_eq!(mgr.state(), RelayState::Unhealthy);
    assert_eq!(s.local.dial_attempts(s.relay.id()), 2);

    // the next health check retries and succeeds
    s.local.set_dial_failure(false);
    tokio::time::sleep(Duration::from_secs(11)).await;
    wait_until(|| mgr.state() == RelayState::Connected).await;
    assert_eq!(mgr.reconnect_attempts(), 2);
    assert_eq!(s.local.dial_attempts(s.relay.id()), 3);
    assert!(protected(&s.local));

    mgr.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_reconnects_before_next_poll() {
    let s = setup();
    let mgr = RelayManager::start(s.local.clone(), relay_addr(), RelayManagerConfig::default())
        .await
        .unwrap();

    let started = Instant::now();
    s.local.drop_link(s.relay.id());
    wait_until(|| mgr.reconnect_attempts() == 1 && mgr.state() == RelayState::Connected).await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(s.local.connectedness(s.relay.id()), Connectedness::Connected);

    // stays at exactly one attempt
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(mgr.reconnect_attempts(), 1);
    assert_eq!(s.local.dial_attempts(s.relay.id()), 2);

    mgr.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_unprotected_poll_triggers_reconnect() {
    let s = setup();
    let mgr = RelayManager::start(s.local.clone(), relay_addr(), RelayManagerConfig::default())
        .await
        .unwrap();

    s.local
        .conn_manager()
        .unprotect(s.relay.id(), RELAY_PROTECT_TAG);
    assert_eq!(mgr.reconnect_attempts(), 0);

    tokio::time::sleep(Duration::from_secs(11)).await;
    wait_until(|| mgr.reconnect_attempts() == 1).await;
    assert_eq!(mgr.state(), RelayState::Connected);
    assert!(protected(&s.local));
    assert_eq!(s.local.dial_attempts(s.relay.id()), 2);

    mgr.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_close_releases_everything_and_stops_reconnecting() {
    let s = setup();
    let mgr = RelayManager::start(s.local.clone(), relay_addr(), RelayManagerConfig::default())
        .await
        .unwrap();

    mgr.close().await;
    assert_eq!(mgr.state(), RelayState::Closed);
    assert!(!protected(&s.local));
    assert_eq!(s.local.subscriber_count(), 0);

    s.local.drop_link(s.relay.id());
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(s.local.dial_attempts(s.relay.id()), 1);
    assert_eq!(mgr.reconnect_attempts(), 0);
    assert_eq!(mgr.state(), RelayState::Closed);

    // idempotent
    mgr.close().await;
    assert_eq!(mgr.state(), RelayState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_close_runs_once() {
    let s = setup();
    let host = Arc::new(CountingHost {
        inner: s.local.clone(),
        stop_notify_calls: AtomicUsize::new(0),
    });
    let mgr = Arc::new(
        RelayManager::start(host.clone(), relay_addr(), RelayManagerConfig::default())
            .await
            .unwrap(),
    );

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let mgr = Arc::clone(&mgr);
        let host = Arc::clone(&host);
        tasks.push(tokio::spawn(async move {
            mgr.close().await;
            // shutdown has completed by the time any caller returns
            assert_eq!(mgr.state(), RelayState::Closed);
            assert_eq!(host.stop_notify_calls.load(Ordering::SeqCst), 1);
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }
    assert_eq!(host.stop_notify_calls.load(Ordering::SeqCst), 1);
    assert_eq!(s.local.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_does_not_wait_for_slow_dial() {
    let s = setup();
    let mgr = RelayManager::start(s.local.clone(), relay_addr(), RelayManagerConfig::default())
        .await
        .unwrap();

    s.local.set_dial_delay(Duration::from_secs(300));
    s.local.drop_link(s.relay.id());
    wait_until(|| mgr.reconnect_attempts() == 1).await;

    let started = Instant::now();
    mgr.close().await;
    assert!(started.elapsed() < Duration::from_secs(300));
    assert_eq!(mgr.state(), RelayState::Closed);
    assert!(!protected(&s.local));
}

#[tokio::test(start_paused = true)]
async fn test_drop_during_first_connect_is_seen() {
    let s = setup();
    let host = Arc::new(FlakyFirstDialHost {
        inner: s.local.clone(),
        drop_next: AtomicBool::new(true),
    });
    let started = Instant::now();
    let mgr = RelayManager::start(host, relay_addr(), RelayManagerConfig::default())
        .await
        .unwrap();

    // handled from the queued disconnect, not the 10s poll
    wait_until(|| mgr.reconnect_attempts() == 1 && mgr.state() == RelayState::Connected).await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(s.local.connectedness(s.relay.id()), Connectedness::Connected);
    assert_eq!(s.local.dial_attempts(s.relay.id()), 2);

    mgr.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_drop_without_close_releases_relay() {
    let s = setup();
    let mgr = RelayManager::start(s.local.clone(), relay_addr(), RelayManagerConfig::default())
        .await
        .unwrap();
    assert!(protected(&s.local));
    assert_eq!(s.local.subscriber_count(), 1);

    drop(mgr);
    assert!(!protected(&s.local));
    assert_eq!(s.local.subscriber_count(), 0);

    s.local.drop_link(s.relay.id());
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(s.local.dial_attempts(s.relay.id()), 1);
}

//! End-to-end group tests: read-through loading, TTL expiry, coalescing,
//! and two-node write-through replication with an in-process peer transport.

use async_trait::async_trait;
use bytes::Bytes;
use ember_cluster::{
    CacheOptions, Context, GetterFn, Group, GroupError, LoaderError, Peer, PeerChoice, PeerError,
    PeerPicker, RingPicker,
};
use ember_core::CacheType;
use ember_ring::Ring;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Backend loader that counts its invocations.
fn counting_getter(
    tag: &'static str,
) -> (Arc<dyn ember_cluster::Getter>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let getter = Arc::new(GetterFn(move |_ctx: Context, key: String| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<Bytes, LoaderError>(Bytes::from(format!("{tag}:{key}")))
        }
    }));
    (getter, calls)
}

/// In-process peer transport: dispatches into another node's group exactly
/// the way a real inbound handler must, tagging mutations `from_peer`.
struct GroupPeer {
    group: Group,
    set_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl GroupPeer {
    fn new(group: Group) -> Self {
        Self {
            group,
            set_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Peer for GroupPeer {
    async fn get(&self, _group: &str, key: &str) -> Result<Bytes, PeerError> {
        self.group
            .get(Context::from_peer(), key)
            .await
            .map(|view| view.into_bytes())
            .map_err(|err| PeerError::Transport(err.to_string()))
    }

    async fn set(
        &self,
        _ctx: Context,
        _group: &str,
        key: &str,
        value: Bytes,
    ) -> Result<(), PeerError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.group
            .set(Context::from_peer(), key, value)
            .await
            .map_err(|err| PeerError::Transport(err.to_string()))
    }

    async fn delete(&self, _group: &str, key: &str) -> Result<bool, PeerError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.group
            .delete(Context::from_peer(), key)
            .await
            .map(|_| true)
            .map_err(|err| PeerError::Transport(err.to_string()))
    }

    async fn close(&self) -> Result<(), PeerError> {
        Ok(())
    }
}

/// A two-node cluster wired through in-process peers.
struct TwoNodes {
    g1: Group,
    g2: Group,
    peer_to_g1: Arc<GroupPeer>,
    peer_to_g2: Arc<GroupPeer>,
    picker1: Arc<RingPicker>,
    loader_calls_g1: Arc<AtomicUsize>,
    loader_calls_g2: Arc<AtomicUsize>,
}

fn two_nodes() -> TwoNodes {
    let (getter1, loader_calls_g1) = counting_getter("n1");
    let (getter2, loader_calls_g2) = counting_getter("n2");

    let picker1 = Arc::new(RingPicker::new("n1", Ring::new()).unwrap());
    let picker2 = Arc::new(RingPicker::new("n2", Ring::new()).unwrap());

    let g1 = Group::builder("test", getter1)
        .peers(picker1.clone())
        .build();
    let g2 = Group::builder("test", getter2)
        .peers(picker2.clone())
        .build();

    let peer_to_g1 = Arc::new(GroupPeer::new(g1.clone()));
    let peer_to_g2 = Arc::new(GroupPeer::new(g2.clone()));

    picker1.add_peer("n2", peer_to_g2.clone()).unwrap();
    picker2.add_peer("n1", peer_to_g1.clone()).unwrap();

    TwoNodes {
        g1,
        g2,
        peer_to_g1,
        peer_to_g2,
        picker1,
        loader_calls_g1,
        loader_calls_g2,
    }
}

/// A key that node n1 routes to node n2.
fn key_owned_by_n2(picker1: &RingPicker) -> String {
    (0..10_000)
        .map(|i| format!("key-{i}"))
        .find(|key| matches!(picker1.pick_peer(key), PeerChoice::Remote(_)))
        .expect("two-node ring must route some key remotely")
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

#[tokio::test]
async fn set_then_get_round_trips() {
    let (getter, _) = counting_getter("backend");
    let group = Group::builder("kv", getter).build();

    group.set(Context::new(), "k", &b"stored"[..]).await.unwrap();
    let got = group.get(Context::new(), "k").await.unwrap();
    assert_eq!(got.as_slice(), b"stored");
}

#[tokio::test]
async fn validation_errors() {
    let (getter, _) = counting_getter("backend");
    let group = Group::builder("kv", getter).build();

    assert!(matches!(group.get(Context::new(), "").await, Err(GroupError::KeyRequired)));
    assert!(matches!(
        group.set(Context::new(), "", &b"v"[..]).await,
        Err(GroupError::KeyRequired)
    ));
    assert!(matches!(
        group.set(Context::new(), "k", &b""[..]).await,
        Err(GroupError::ValueRequired)
    ));
    assert!(matches!(
        group.delete(Context::new(), "").await,
        Err(GroupError::KeyRequired)
    ));

    group.close();
    group.close(); // idempotent
    assert!(matches!(group.get(Context::new(), "k").await, Err(GroupError::Closed)));
    assert!(matches!(
        group.set(Context::new(), "k", &b"v"[..]).await,
        Err(GroupError::Closed)
    ));
    assert!(matches!(
        group.delete(Context::new(), "k").await,
        Err(GroupError::Closed)
    ));
}

#[tokio::test]
async fn loader_populates_local_cache() {
    let (getter, calls) = counting_getter("backend");
    let group = Group::builder("kv", getter).build();

    let first = group.get(Context::new(), "user:1").await.unwrap();
    assert_eq!(first.as_slice(), b"backend:user:1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let second = group.get(Context::new(), "user:1").await.unwrap();
    assert_eq!(second, first);
    assert_eq!(calls.load(Ordering::SeqCst), 1, "second get must be a local hit");

    let stats = group.stats();
    assert_eq!(stats.local_hits, 1);
    assert_eq!(stats.local_misses, 1);
    assert_eq!(stats.loader_hits, 1);
    assert_eq!(stats.loads, 1);
    assert!(stats.hit_rate > 0.0);
}

#[tokio::test]
async fn loader_errors_are_returned_and_not_cached() {
    let failing = Arc::new(AtomicBool::new(true));
    let gate = failing.clone();
    let getter = Arc::new(GetterFn(move |_ctx: Context, key: String| {
        let gate = gate.clone();
        async move {
            if gate.load(Ordering::SeqCst) {
                Err::<Bytes, LoaderError>("backend down".into())
            } else {
                Ok(Bytes::from(format!("ok:{key}")))
            }
        }
    }));
    let group = Group::builder("kv", getter).build();

    let err = group.get(Context::new(), "k").await.unwrap_err();
    assert!(matches!(err, GroupError::Load { .. }));
    assert_eq!(group.stats().loader_errors, 1);

    // No negative caching: the next get retries the backend.
    failing.store(false, Ordering::SeqCst);
    let got = group.get(Context::new(), "k").await.unwrap();
    assert_eq!(got.as_slice(), b"ok:k");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cold_gets_coalesce_onto_one_load() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let getter = Arc::new(GetterFn(move |_ctx: Context, key: String| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<Bytes, LoaderError>(Bytes::from(format!("slow:{key}")))
        }
    }));
    let group = Group::builder("kv", getter).build();

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let group = group.clone();
        tasks.push(tokio::spawn(async move { group.get(Context::new(), "hot").await }));
    }
    for task in tasks {
        let got = task.await.unwrap().unwrap();
        assert_eq!(got.as_slice(), b"slow:hot");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1, "load must run exactly once");
}

#[tokio::test]
async fn group_ttl_expires_entries() {
    let (getter, calls) = counting_getter("backend");
    // The LRU backend stamps wall-clock TTLs, which keeps this test exact.
    let group = Group::builder("kv", getter)
        .cache_options(CacheOptions {
            cache_type: CacheType::Lru,
            ..CacheOptions::default()
        })
        .expiration(Duration::from_millis(80))
        .build();

    group.set(Context::new(), "k", &b"v"[..]).await.unwrap();
    assert_eq!(group.get(Context::new(), "k").await.unwrap().as_slice(), b"v");
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(150)).await;
    // The local entry expired, so the group falls through to the loader.
    assert_eq!(group.get(Context::new(), "k").await.unwrap().as_slice(), b"backend:k");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn peer_failure_falls_back_to_loader() {
    struct FailingPeer;

    #[async_trait]
    impl Peer for FailingPeer {
        async fn get(&self, _group: &str, _key: &str) -> Result<Bytes, PeerError> {
            Err(PeerError::Transport("connection refused".into()))
        }
        async fn set(
            &self,
            _ctx: Context,
            _group: &str,
            _key: &str,
            _value: Bytes,
        ) -> Result<(), PeerError> {
            Err(PeerError::Transport("connection refused".into()))
        }
        async fn delete(&self, _group: &str, _key: &str) -> Result<bool, PeerError> {
            Err(PeerError::Transport("connection refused".into()))
        }
        async fn close(&self) -> Result<(), PeerError> {
            Ok(())
        }
    }

    struct AlwaysRemote(Arc<dyn Peer>);
    impl PeerPicker for AlwaysRemote {
        fn pick_peer(&self, _key: &str) -> PeerChoice {
            PeerChoice::Remote(self.0.clone())
        }
    }

    let (getter, calls) = counting_getter("backend");
    let group = Group::builder("kv", getter)
        .peers(Arc::new(AlwaysRemote(Arc::new(FailingPeer))))
        .build();

    let got = group.get(Context::new(), "k").await.unwrap();
    assert_eq!(got.as_slice(), b"backend:k");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stats = group.stats();
    assert_eq!(stats.peer_misses, 1);
    assert_eq!(stats.loader_hits, 1);
}

#[tokio::test]
async fn remote_get_reads_through_the_owning_node() {
    let nodes = two_nodes();
    let key = key_owned_by_n2(&nodes.picker1);

    // Seed the owner directly; the owner's own set does not propagate.
    nodes
        .g2
        .set(Context::new(), &key, &b"remote-value"[..])
        .await
        .unwrap();

    let got = nodes.g1.get(Context::new(), &key).await.unwrap();
    assert_eq!(got.as_slice(), b"remote-value");

    let stats = nodes.g1.stats();
    assert_eq!(stats.peer_hits, 1);
    assert_eq!(nodes.loader_calls_g1.load(Ordering::SeqCst), 0);
    assert_eq!(nodes.loader_calls_g2.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn write_through_reaches_the_owner_without_looping() {
    let nodes = two_nodes();
    let key = key_owned_by_n2(&nodes.picker1);

    nodes.g1.set(Context::new(), &key, &b"v"[..]).await.unwrap();

    // Wait for the fire-and-forget propagation to land on the owner.
    let g2 = nodes.g2.clone();
    wait_until(move || g2.stats().cache.size == 1).await;

    assert_eq!(nodes.peer_to_g2.set_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        nodes.peer_to_g1.set_calls.load(Ordering::SeqCst),
        0,
        "peer-originated set must not be re-broadcast"
    );

    // The owner serves the value without touching its loader.
    let got = nodes.g2.get(Context::new(), &key).await.unwrap();
    assert_eq!(got.as_slice(), b"v");
    assert_eq!(nodes.loader_calls_g2.load(Ordering::SeqCst), 0);

    // The originator kept its local copy.
    let got = nodes.g1.get(Context::new(), &key).await.unwrap();
    assert_eq!(got.as_slice(), b"v");
    assert_eq!(nodes.g1.stats().local_hits, 1);
}

#[tokio::test]
async fn delete_propagates_to_the_owner_without_looping() {
    let nodes = two_nodes();
    let key = key_owned_by_n2(&nodes.picker1);

    nodes.g1.set(Context::new(), &key, &b"v"[..]).await.unwrap();
    let g2 = nodes.g2.clone();
    wait_until(move || g2.stats().cache.size == 1).await;

    nodes.g1.delete(Context::new(), &key).await.unwrap();
    let g2 = nodes.g2.clone();
    wait_until(move || g2.stats().cache.size == 0).await;

    assert_eq!(nodes.peer_to_g2.delete_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        nodes.peer_to_g1.delete_calls.load(Ordering::SeqCst),
        0,
        "peer-originated delete must not be re-broadcast"
    );
}

//! Tests for request distribution and retrieval

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lightwire_config::Config;
use lightwire_core::{
    CancelToken, Capabilities, PeerId, ServerConnection, ServerInfo, TransportError,
    TransportResult,
};
use lightwire_odr::{
    Distributor, OdrError, PeerSet, Request, RequestConstraint, RetrieveManager, ServerPool,
    ValidationError,
};
use lightwire_types::B256;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

enum Behavior {
    Answer(&'static [u8]),
    Hang,
    Fail,
    /// Answer once `release` is notified
    Gated(&'static [u8]),
}

struct MockServer {
    info: ServerInfo,
    behavior: Behavior,
    calls: AtomicUsize,
    closed: Notify,
    release: Notify,
}

#[async_trait]
impl ServerConnection for MockServer {
    fn info(&self) -> ServerInfo {
        self.info.clone()
    }

    async fn send(&self, _request: &[u8]) -> TransportResult<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Answer(answer) => Ok(Bytes::from_static(answer)),
            Behavior::Hang => std::future::pending().await,
            Behavior::Fail => Err(TransportError::SendFailed("connection reset".into())),
            Behavior::Gated(answer) => {
                self.release.notified().await;
                Ok(Bytes::from_static(answer))
            }
        }
    }

    async fn closed(&self) {
        self.closed.notified().await
    }
}

fn peer_id(n: u8) -> PeerId {
    PeerId::from_bytes(vec![n])
}

fn create_server(n: u8, behavior: Behavior) -> Arc<MockServer> {
    Arc::new(MockServer {
        info: ServerInfo {
            id: peer_id(n),
            head_number: 1_000,
            head_hash: B256::ZERO,
            capabilities: Capabilities::ALL,
            capacity: Some(2),
        },
        behavior,
        calls: AtomicUsize::new(0),
        closed: Notify::new(),
        release: Notify::new(),
    })
}

struct Stack {
    registry: Arc<PeerSet>,
    pool: Arc<ServerPool>,
    retrieve: Arc<RetrieveManager>,
    shutdown: CancelToken,
    distributor: Arc<Distributor>,
}

fn create_stack(config: Config) -> Stack {
    let shutdown = CancelToken::new();
    let registry = Arc::new(PeerSet::new());
    let pool = Arc::new(ServerPool::new(registry.clone(), &config, shutdown.clone()).unwrap());
    let distributor = Distributor::new(registry.clone());
    let retrieve = Arc::new(RetrieveManager::new(
        distributor.clone(),
        pool.clone(),
        config.request.max_retries,
        config.request.timeout(),
        shutdown.clone(),
    ));
    Stack {
        registry,
        pool,
        retrieve,
        shutdown,
        distributor,
    }
}

fn connect(stack: &Stack, server: &Arc<MockServer>) {
    let conn: Arc<dyn ServerConnection> = server.clone();
    stack.pool.on_connected(conn).unwrap();
}

fn accept_good(answer: &[u8]) -> Result<Vec<u8>, ValidationError> {
    if answer == b"good" {
        Ok(answer.to_vec())
    } else {
        Err(ValidationError::new("bad answer"))
    }
}

fn state_request() -> Request {
    Request::new(Bytes::from_static(b"query"), RequestConstraint::new(Capabilities::STATE))
}

fn spawn_retrieve(stack: &Stack, cancel: CancelToken) -> JoinHandle<Result<Vec<u8>, OdrError>> {
    spawn_retrieve_until(stack, cancel, Instant::now() + Duration::from_secs(10))
}

fn spawn_retrieve_until(
    stack: &Stack,
    cancel: CancelToken,
    deadline: Instant,
) -> JoinHandle<Result<Vec<u8>, OdrError>> {
    let retrieve = stack.retrieve.clone();
    tokio::spawn(async move {
        let result = retrieve
            .retrieve(state_request(), &accept_good, deadline, &cancel)
            .await;
        result
    })
}

fn trusted_config(ids: &[u8]) -> Config {
    let mut config = Config::default();
    config.peers.trusted = ids.iter().map(|n| peer_id(*n).to_base58()).collect();
    config
}

#[tokio::test(start_paused = true)]
async fn test_invalid_answers_retried_until_valid() {
    let stack = create_stack(trusted_config(&[3]));
    let p1 = create_server(1, Behavior::Answer(b"bogus"));
    let p2 = create_server(2, Behavior::Answer(b"bogus"));
    let p3 = create_server(3, Behavior::Answer(b"good"));
    for server in [&p1, &p2, &p3] {
        connect(&stack, server);
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    let value = stack
        .retrieve
        .retrieve(state_request(), &accept_good, deadline, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(value, b"good".to_vec());

    for server in [&p1, &p2, &p3] {
        assert_eq!(server.calls.load(Ordering::SeqCst), 1);
    }
    let initial = Config::default().reputation.initial;
    assert!(stack.pool.score(&peer_id(1)) < initial);
    assert!(stack.pool.score(&peer_id(2)) < initial);
    assert!(stack.pool.score(&peer_id(3)) > initial);
    assert_eq!(
        stack.registry.lookup(&peer_id(1)).unwrap().score(),
        stack.pool.score(&peer_id(1))
    );
}

#[tokio::test(start_paused = true)]
async fn test_peer_never_asked_twice() {
    let mut config = Config::default();
    config.request.max_retries = Some(5);
    let stack = create_stack(config);
    let p1 = create_server(1, Behavior::Answer(b"bogus"));
    connect(&stack, &p1);

    let deadline = Instant::now() + Duration::from_secs(10);
    let result = stack
        .retrieve
        .retrieve(state_request(), &accept_good, deadline, &CancelToken::new())
        .await;

    assert_eq!(result, Err(OdrError::NoEligiblePeer));
    assert_eq!(p1.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_limit_stops_before_untried_peers() {
    let mut config = Config::default();
    config.request.max_retries = Some(2);
    let stack = create_stack(config);
    let servers: Vec<_> = (1..=3)
        .map(|n| create_server(n, Behavior::Answer(b"bogus")))
        .collect();
    for server in &servers {
        connect(&stack, server);
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    let result = stack
        .retrieve
        .retrieve(state_request(), &accept_good, deadline, &CancelToken::new())
        .await;
    assert_eq!(result, Err(OdrError::NoEligiblePeer));

    let calls: Vec<usize> = servers
        .iter()
        .map(|s| s.calls.load(Ordering::SeqCst))
        .collect();
    assert_eq!(calls.iter().sum::<usize>(), 2);
    assert_eq!(calls.iter().filter(|c| **c == 0).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_peers_joining_mid_retrieval_are_tried() {
    let stack = create_stack(Config::default());
    let handle = spawn_retrieve(&stack, CancelToken::new());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(stack.distributor.stats().pending, 1);

    let p1 = create_server(1, Behavior::Answer(b"bogus"));
    let p2 = create_server(2, Behavior::Answer(b"good"));
    connect(&stack, &p1);
    connect(&stack, &p2);

    assert_eq!(handle.await.unwrap(), Ok(b"good".to_vec()));
    assert_eq!(p1.calls.load(Ordering::SeqCst), 1);
    assert_eq!(p2.calls.load(Ordering::SeqCst), 1);
    assert!(stack.pool.score(&peer_id(1)) < Config::default().reputation.initial);
}

#[tokio::test(start_paused = true)]
async fn test_answer_on_deadline_tick_accepted() {
    let stack = create_stack(Config::default());
    let p1 = create_server(1, Behavior::Gated(b"good"));
    connect(&stack, &p1);

    let deadline = Instant::now() + Duration::from_secs(2);
    let handle = spawn_retrieve_until(&stack, CancelToken::new(), deadline);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(p1.calls.load(Ordering::SeqCst), 1);
    p1.release.notify_one();
    tokio::time::advance(deadline - Instant::now()).await;

    assert_eq!(handle.await.unwrap(), Ok(b"good".to_vec()));
    assert!(stack.pool.score(&peer_id(1)) > Config::default().reputation.initial);
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_scored_and_retried() {
    let stack = create_stack(Config::default());
    let p1 = create_server(1, Behavior::Fail);
    let p2 = create_server(2, Behavior::Answer(b"good"));
    connect(&stack, &p1);
    connect(&stack, &p2);

    let deadline = Instant::now() + Duration::from_secs(10);
    let value = stack
        .retrieve
        .retrieve(state_request(), &accept_good, deadline, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(value, b"good".to_vec());

    let config = Config::default();
    assert_eq!(
        stack.pool.score(&peer_id(1)),
        config.reputation.initial - config.reputation.timeout_penalty
    );
}

#[tokio::test(start_paused = true)]
async fn test_peer_loss_reassigns() {
    let stack = create_stack(Config::default());
    let p1 = create_server(1, Behavior::Hang);
    let p2 = create_server(2, Behavior::Answer(b"good"));
    connect(&stack, &p1);
    connect(&stack, &p2);

    let handle = spawn_retrieve(&stack, CancelToken::new());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(stack.registry.lookup(&peer_id(1)).unwrap().in_flight(), 1);
    p1.closed.notify_one();

    assert_eq!(handle.await.unwrap(), Ok(b"good".to_vec()));
    assert!(!stack.registry.contains(&peer_id(1)));
    assert_eq!(stack.pool.score(&peer_id(1)), Config::default().reputation.initial);
}

#[tokio::test(start_paused = true)]
async fn test_peer_loss_without_alternative() {
    let stack = create_stack(Config::default());
    let p1 = create_server(1, Behavior::Hang);
    connect(&stack, &p1);

    let handle = spawn_retrieve(&stack, CancelToken::new());

    tokio::time::sleep(Duration::from_millis(10)).await;
    stack.pool.on_disconnected(&peer_id(1));

    assert_eq!(handle.await.unwrap(), Err(OdrError::NoEligiblePeer));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_frees_capacity() {
    let stack = create_stack(Config::default());
    let p1 = create_server(1, Behavior::Hang);
    connect(&stack, &p1);

    let cancel = CancelToken::new();
    let started = Instant::now();
    let handle = spawn_retrieve(&stack, cancel.clone());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(stack.registry.lookup(&peer_id(1)).unwrap().in_flight(), 1);
    cancel.cancel();

    assert_eq!(handle.await.unwrap(), Err(OdrError::Canceled));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(stack.registry.lookup(&peer_id(1)).unwrap().in_flight(), 0);
    assert_eq!(stack.distributor.stats().in_flight, 0);
    assert_eq!(stack.pool.score(&peer_id(1)), Config::default().reputation.initial);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_times_out() {
    let stack = create_stack(Config::default());
    let p1 = create_server(1, Behavior::Hang);
    connect(&stack, &p1);

    let deadline = Instant::now() + Duration::from_secs(2);
    let result = stack
        .retrieve
        .retrieve(state_request(), &accept_good, deadline, &CancelToken::new())
        .await;

    assert_eq!(result, Err(OdrError::Timeout));
    assert_eq!(stack.registry.lookup(&peer_id(1)).unwrap().in_flight(), 0);
    let config = Config::default();
    assert_eq!(
        stack.pool.score(&peer_id(1)),
        config.reputation.initial - config.reputation.timeout_penalty
    );
}

#[tokio::test(start_paused = true)]
async fn test_pending_request_times_out_without_peers() {
    let stack = create_stack(Config::default());

    let deadline = Instant::now() + Duration::from_secs(1);
    let result = stack
        .retrieve
        .retrieve(state_request(), &accept_good, deadline, &CancelToken::new())
        .await;
    assert_eq!(result, Err(OdrError::Timeout));
    assert_eq!(stack.distributor.stats().pending, 0);
}

#[tokio::test(start_paused = true)]
async fn test_trusted_only_below_fraction() {
    let mut config = trusted_config(&[3]);
    config.peers.min_trusted_fraction = Some(0.9);
    let stack = create_stack(config);
    let p1 = create_server(1, Behavior::Answer(b"good"));
    let p3 = create_server(3, Behavior::Answer(b"good"));
    connect(&stack, &p1);
    connect(&stack, &p3);
    assert!(stack.pool.requires_trusted());

    let deadline = Instant::now() + Duration::from_secs(10);
    stack
        .retrieve
        .retrieve(state_request(), &accept_good, deadline, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(p1.calls.load(Ordering::SeqCst), 0);
    assert_eq!(p3.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_resolves_outstanding() {
    let stack = create_stack(Config::default());
    let p1 = create_server(1, Behavior::Hang);
    connect(&stack, &p1);

    let handle = spawn_retrieve(&stack, CancelToken::new());

    tokio::time::sleep(Duration::from_millis(10)).await;
    stack.shutdown.cancel();
    stack.distributor.shutdown();

    assert_eq!(handle.await.unwrap(), Err(OdrError::Shutdown));
    let fresh = stack
        .retrieve
        .retrieve(
            state_request(),
            &accept_good,
            Instant::now() + Duration::from_secs(1),
            &CancelToken::new(),
        )
        .await;
    assert_eq!(fresh, Err(OdrError::Shutdown));
}

#[tokio::test(start_paused = true)]
async fn test_distributor_shutdown_releases_assigned_peer() {
    let stack = create_stack(Config::default());
    let p1 = create_server(1, Behavior::Hang);
    connect(&stack, &p1);

    let handle = spawn_retrieve(&stack, CancelToken::new());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(stack.registry.lookup(&peer_id(1)).unwrap().in_flight(), 1);
    stack.distributor.shutdown();

    assert_eq!(handle.await.unwrap(), Err(OdrError::Shutdown));
    assert_eq!(stack.registry.lookup(&peer_id(1)).unwrap().in_flight(), 0);
    assert_eq!(stack.pool.score(&peer_id(1)), Config::default().reputation.initial);
}

#[tokio::test(start_paused = true)]
async fn test_scores_stay_in_bounds() {
    let stack = create_stack(Config::default());
    let bounds = Config::default().reputation;
    for _ in 0..20 {
        stack
            .pool
            .report_outcome(&peer_id(1), lightwire_odr::Outcome::InvalidAnswer);
    }
    assert_eq!(stack.pool.score(&peer_id(1)), bounds.min);

    for _ in 0..200 {
        stack.pool.report_outcome(&peer_id(2), lightwire_odr::Outcome::Success);
    }
    assert_eq!(stack.pool.score(&peer_id(2)), bounds.max);
}

//! Tests for chain queries served through the ODR adapter

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use lightwire_config::Config;
use lightwire_core::{
    CancelToken, Capabilities, PeerId, ServerConnection, ServerInfo, TransportError,
    TransportResult,
};
use lightwire_odr::{
    prove, state_leaf, HeaderSource, LightOdrService, MemoryReputationStore, OdrError, OdrQuery,
    StateProofAnswer,
};
use lightwire_types::{keccak256, ordered_root, receipts_root, LightHeader, Receipt, B256};

const CHAIN_LENGTH: u64 = 8;

/// Headers, receipts and one state shared by every block.
struct Fixture {
    headers: Vec<LightHeader>,
    receipts: HashMap<B256, Vec<Receipt>>,
    state: Vec<(B256, Option<Vec<u8>>)>,
}

impl Fixture {
    fn new() -> Self {
        let state: Vec<(B256, Option<Vec<u8>>)> = vec![
            (keccak256(b"alice"), Some(b"balance=10".to_vec())),
            (keccak256(b"bob"), Some(b"balance=25".to_vec())),
            (keccak256(b"carol"), None),
        ];
        let state_root = ordered_root(&Self::leaves(&state));

        let mut headers: Vec<LightHeader> = Vec::new();
        let mut receipts = HashMap::new();
        for n in 0..CHAIN_LENGTH {
            let block_receipts = vec![Receipt {
                tx_hash: keccak256(&n.to_be_bytes()),
                status: 1,
                cumulative_gas_used: 21_000 * (n + 1),
                logs: vec![n as u8],
            }];
            let parent = headers.last().map(|h| h.hash).unwrap_or(B256::ZERO);
            let header = LightHeader::new(
                n,
                parent,
                state_root,
                receipts_root(&block_receipts),
                1_700_000_000 + n * 12,
            );
            receipts.insert(header.hash, block_receipts);
            headers.push(header);
        }

        Self {
            headers,
            receipts,
            state,
        }
    }

    fn leaves(state: &[(B256, Option<Vec<u8>>)]) -> Vec<B256> {
        state
            .iter()
            .map(|(key, value)| state_leaf(key, value.as_deref()))
            .collect()
    }

    fn answer(&self, request: &[u8], lie: bool) -> TransportResult<Bytes> {
        let query: OdrQuery = serde_json::from_slice(request)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        let json = match query {
            OdrQuery::StateProof { key, .. } => {
                let index = self
                    .state
                    .iter()
                    .position(|(k, _)| *k == key)
                    .ok_or_else(|| TransportError::SendFailed("unknown key".into()))?;
                let proof = prove(&Self::leaves(&self.state), index)
                    .ok_or_else(|| TransportError::SendFailed("no proof".into()))?;
                let mut value = self.state[index].1.clone();
                if lie {
                    value = Some(b"balance=1000000".to_vec());
                }
                serde_json::to_vec(&StateProofAnswer {
                    key,
                    value,
                    path: proof.path,
                })
            }
            OdrQuery::Receipts { block_hash } => {
                let mut receipts = self.receipts.get(&block_hash).cloned().unwrap_or_default();
                if lie {
                    receipts.clear();
                }
                serde_json::to_vec(&receipts)
            }
            OdrQuery::HeaderRange { start, count } => {
                let mut headers = self.headers[start as usize..(start + count) as usize].to_vec();
                if lie {
                    headers.reverse();
                }
                serde_json::to_vec(&headers)
            }
        };
        json.map(Bytes::from)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

struct LocalHeaders(Vec<LightHeader>);

impl HeaderSource for LocalHeaders {
    fn header_by_number(&self, number: u64) -> Option<LightHeader> {
        self.0.get(number as usize).cloned()
    }

    fn header_by_hash(&self, hash: &B256) -> Option<LightHeader> {
        self.0.iter().find(|h| h.hash == *hash).cloned()
    }
}

struct ChainServer {
    info: ServerInfo,
    fixture: Arc<Fixture>,
    lie: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl ServerConnection for ChainServer {
    fn info(&self) -> ServerInfo {
        self.info.clone()
    }

    async fn send(&self, request: &[u8]) -> TransportResult<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.fixture.answer(request, self.lie)
    }
}

fn create_server(n: u8, fixture: &Arc<Fixture>, lie: bool) -> Arc<ChainServer> {
    Arc::new(ChainServer {
        info: ServerInfo {
            id: PeerId::from_bytes(vec![n]),
            head_number: 100,
            head_hash: B256::ZERO,
            capabilities: Capabilities::ALL,
            capacity: Some(4),
        },
        fixture: fixture.clone(),
        lie,
        calls: AtomicUsize::new(0),
    })
}

fn create_service(fixture: &Arc<Fixture>) -> LightOdrService {
    let mut config = Config::default();
    config.request.timeout_ms = 1_000;
    LightOdrService::with_store(
        config,
        Arc::new(LocalHeaders(fixture.headers.clone())),
        Arc::new(MemoryReputationStore::new()),
    )
    .unwrap()
}

fn connect(service: &LightOdrService, server: &Arc<ChainServer>) {
    let conn: Arc<dyn ServerConnection> = server.clone();
    service.pool().on_connected(conn).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_state_value_proven_against_header() {
    let fixture = Arc::new(Fixture::new());
    let service = create_service(&fixture);
    let liar = create_server(1, &fixture, true);
    let honest = create_server(2, &fixture, false);
    connect(&service, &liar);
    connect(&service, &honest);

    let pass = service.odr().begin_pass();
    let cancel = CancelToken::new();
    let value = pass.state(5, keccak256(b"bob"), &cancel).await.unwrap();
    assert_eq!(value, Some(b"balance=25".to_vec()));

    assert_eq!(liar.calls.load(Ordering::SeqCst), 1);
    let initial = service.config().reputation.initial;
    assert!(service.pool().score(&liar.info.id) < initial);
    pass.complete();
}

#[tokio::test(start_paused = true)]
async fn test_absent_state_value() {
    let fixture = Arc::new(Fixture::new());
    let service = create_service(&fixture);
    connect(&service, &create_server(1, &fixture, false));

    let pass = service.odr().begin_pass();
    let value = pass
        .state(3, keccak256(b"carol"), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(value, None);
}

#[tokio::test(start_paused = true)]
async fn test_receipts_and_header_range() {
    let fixture = Arc::new(Fixture::new());
    let service = create_service(&fixture);
    let liar = create_server(1, &fixture, true);
    let honest = create_server(2, &fixture, false);
    connect(&service, &liar);
    connect(&service, &honest);

    let pass = service.odr().begin_pass();
    let cancel = CancelToken::new();
    let block = &fixture.headers[3];
    let receipts = pass.receipts(block.hash, &cancel).await.unwrap();
    assert_eq!(&receipts, &fixture.receipts[&block.hash]);

    let headers = pass.headers(2, 4, &cancel).await.unwrap();
    assert_eq!(headers, fixture.headers[2..6].to_vec());
    assert_eq!(pass.cached(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_pass_shares_identical_queries() {
    let fixture = Arc::new(Fixture::new());
    let service = create_service(&fixture);
    let server = create_server(1, &fixture, false);
    connect(&service, &server);

    let cancel = CancelToken::new();
    let block_hash = fixture.headers[4].hash;
    let pass = service.odr().begin_pass();
    let answers = join_all((0..4).map(|_| pass.receipts(block_hash, &cancel))).await;
    for answer in &answers {
        assert_eq!(answer.as_ref().unwrap(), &fixture.receipts[&block_hash]);
    }
    pass.receipts(block_hash, &cancel).await.unwrap();
    assert_eq!(server.calls.load(Ordering::SeqCst), 1);
    pass.complete();

    let next = service.odr().begin_pass();
    next.receipts(block_hash, &cancel).await.unwrap();
    assert_eq!(server.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_not_cached() {
    let fixture = Arc::new(Fixture::new());
    let service = create_service(&fixture);
    let cancel = CancelToken::new();
    let block_hash = fixture.headers[1].hash;

    let pass = service.odr().begin_pass();
    assert_eq!(
        pass.receipts(block_hash, &cancel).await,
        Err(OdrError::Timeout)
    );

    let server = create_server(1, &fixture, false);
    connect(&service, &server);
    let receipts = pass.receipts(block_hash, &cancel).await.unwrap();
    assert_eq!(receipts.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_header() {
    let fixture = Arc::new(Fixture::new());
    let service = create_service(&fixture);
    let server = create_server(1, &fixture, false);
    connect(&service, &server);

    let pass = service.odr().begin_pass();
    let result = pass.receipts(keccak256(b"nowhere"), &CancelToken::new()).await;
    assert!(matches!(result, Err(OdrError::UnknownHeader(_))));

    let result = pass.headers(6, 10, &CancelToken::new()).await;
    assert!(matches!(result, Err(OdrError::UnknownHeader(_))));
    assert_eq!(server.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_lagging_server_not_asked() {
    let fixture = Arc::new(Fixture::new());
    let service = create_service(&fixture);
    let lagging = Arc::new(ChainServer {
        info: ServerInfo {
            id: PeerId::from_bytes(vec![7]),
            head_number: 2,
            head_hash: B256::ZERO,
            capabilities: Capabilities::ALL,
            capacity: None,
        },
        fixture: fixture.clone(),
        lie: false,
        calls: AtomicUsize::new(0),
    });
    connect(&service, &lagging);

    let pass = service.odr().begin_pass();
    let result = pass.state(6, keccak256(b"alice"), &CancelToken::new()).await;
    assert_eq!(result, Err(OdrError::Timeout));
    assert_eq!(lagging.calls.load(Ordering::SeqCst), 0);

    service
        .registry()
        .set_head(&PeerId::from_bytes(vec![7]), 6, fixture.headers[6].hash)
        .unwrap();
    let value = pass.state(6, keccak256(b"alice"), &CancelToken::new()).await.unwrap();
    assert_eq!(value, Some(b"balance=10".to_vec()));
}

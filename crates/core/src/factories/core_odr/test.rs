use super::distributor::{Distributor, SendFailure, WakeOnChange};
use super::router::ReplyRouter;
use super::*;
use bytes::Bytes;
use lodr_test_utils::{enable_tracing, id::*};
use prost::Message;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

type Sent = Arc<Mutex<Vec<(PeerId, RequestKind, Bytes)>>>;

struct Harness {
    odr: Arc<CoreOdr>,
    registry: DynPeerRegistry,
    pool: DynServerPool,
    store: DynItemStore,
}

async fn harness(
    config: CoreOdrConfig,
    transport: DynTransport,
    indexer: DynChainIndexer,
) -> Harness {
    enable_tracing();
    let builder =
        Arc::new(crate::default_builder().with_default_config().unwrap());
    let registry = builder.peer_registry.create(builder.clone()).await.unwrap();
    let pool = builder.server_pool.create(builder.clone()).await.unwrap();
    let store = builder.item_store.create(builder.clone()).await.unwrap();
    let odr = Arc::new(CoreOdr::new(
        config,
        registry.clone(),
        pool.clone(),
        store.clone(),
        transport,
        indexer,
    ));
    Harness {
        odr,
        registry,
        pool,
        store,
    }
}

fn quick_config() -> CoreOdrConfig {
    CoreOdrConfig {
        request_timeout_ms: 200,
        peer_wait_grace_ms: 50,
        cht_section_size: 100,
        bloom_trie_section_size: 100,
        ..Default::default()
    }
}

/// A transport that records every send and never replies.
/// Sends fail if `fail` is set.
fn recording_transport(fail: bool) -> (DynTransport, Sent) {
    let sent: Sent = Arc::new(Mutex::new(Vec::new()));
    let mut t = MockTransport::new();
    t.expect_register_handler().returning(|_| {});
    t.expect_send().returning({
        let sent = sent.clone();
        move |peer, _id, kind, data| {
            sent.lock().unwrap().push((peer, kind, data));
            Box::pin(async move {
                if fail {
                    Err(LodrError::other("test send failure"))
                } else {
                    Ok(())
                }
            })
        }
    });
    (Arc::new(t), sent)
}

fn idle_transport() -> DynTransport {
    let mut t = MockTransport::new();
    t.expect_register_handler().returning(|_| {});
    t.expect_send().never();
    Arc::new(t)
}

fn idle_indexer() -> DynChainIndexer {
    let mut i = MockChainIndexer::new();
    i.expect_trusted_root().never();
    Arc::new(i)
}

fn fixed_indexer(root: Option<TrustedRoot>) -> DynChainIndexer {
    let mut i = MockChainIndexer::new();
    i.expect_trusted_root()
        .returning(move |_, _| Box::pin(async move { Ok(root) }));
    Arc::new(i)
}

fn stalled_indexer() -> DynChainIndexer {
    let mut i = MockChainIndexer::new();
    i.expect_trusted_root()
        .returning(|_, _| {
            Box::pin(std::future::pending::<LodrResult<Option<TrustedRoot>>>())
        });
    Arc::new(i)
}

fn peer_at(head: u64) -> PeerInfo {
    PeerInfo {
        id: random_peer_id(),
        addr: Some(random_peer_addr()),
        protocol_version: 2,
        serves: RequestKind::ALL.into_iter().collect(),
        head: HeadInfo {
            number: head,
            hash: random_hash(),
        },
    }
}

fn header(number: u64) -> Header {
    Header {
        number,
        extra: Bytes::from_static(b"test"),
        ..Default::default()
    }
}

#[test]
fn validate_config_rejects_zero_values() {
    let factory = CoreOdrFactory::create();
    let config = lodr_api::config::Config::default();

    factory.validate_config(&config).unwrap();

    config
        .set_module_config(&CoreOdrModConfig {
            core_odr: CoreOdrConfig {
                request_timeout_ms: 0,
                ..Default::default()
            },
        })
        .unwrap();
    factory.validate_config(&config).unwrap_err();

    config
        .set_module_config(&CoreOdrModConfig {
            core_odr: CoreOdrConfig {
                cht_section_size: 0,
                ..Default::default()
            },
        })
        .unwrap();
    factory.validate_config(&config).unwrap_err();
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_code_is_answered_locally() {
    let h = harness(quick_config(), idle_transport(), idle_indexer()).await;

    let code = h
        .odr
        .code(CancellationToken::new(), header(3), Hash::digest(b""))
        .await
        .unwrap();
    assert!(code.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn canceled_before_start_sends_nothing() {
    let h = harness(quick_config(), idle_transport(), idle_indexer()).await;
    h.registry.register(peer_at(10));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = h.odr.body(cancel, header(3)).await.unwrap_err();
    assert!(matches!(err, LodrError::Canceled), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_header_range_is_rejected() {
    let h = harness(quick_config(), idle_transport(), idle_indexer()).await;
    h.registry.register(peer_at(10));

    for count in [0, 6] {
        h.odr
            .headers(CancellationToken::new(), random_hash(), 4, count)
            .await
            .unwrap_err();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn ranges_near_the_top_block_do_not_overflow() {
    let h = harness(quick_config(), idle_transport(), idle_indexer()).await;
    h.registry.register(peer_at(10));

    // a valid range nobody can serve yet
    let err = h
        .odr
        .headers(CancellationToken::new(), random_hash(), u64::MAX, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, LodrError::NoPeerAvailable), "{err:?}");

    // sections ending past the last block
    let err = h
        .odr
        .canonical_header(CancellationToken::new(), u64::MAX)
        .await
        .unwrap_err();
    assert!(matches!(err, LodrError::Other { .. }), "{err:?}");

    let err = h
        .odr
        .bloom_bits(CancellationToken::new(), 0, u64::MAX)
        .await
        .unwrap_err();
    assert!(matches!(err, LodrError::Other { .. }), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_interrupts_a_slow_indexer() {
    let h = harness(quick_config(), idle_transport(), stalled_indexer()).await;
    h.registry.register(peer_at(1_000));

    let cancel = CancellationToken::new();
    let task = tokio::task::spawn({
        let odr = h.odr.clone();
        let cancel = cancel.clone();
        async move { odr.canonical_header(cancel, 250).await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let err = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, LodrError::Canceled), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn peer_removed_before_dispatch_fails_fast() {
    let h = harness(quick_config(), idle_transport(), idle_indexer()).await;
    let router = Arc::new(ReplyRouter::default());
    h.registry.register_handler(router.clone());
    let (_wake, wake_recv) = WakeOnChange::new();
    let dist = Arc::new(Distributor::new(
        h.registry.clone(),
        idle_transport(),
        router.clone(),
        wake_recv,
        4,
        Duration::from_secs(60),
    ));

    let peer = peer_at(10);
    h.registry.register(peer.clone());
    let request = Request::Code {
        block_hash: random_hash(),
        block_number: 3,
        code_hash: random_hash(),
    };
    let mut assignment = dist
        .assign(&request, &HashSet::new(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(&peer.id, assignment.peer());

    h.registry.unregister(&peer.id);

    let res = tokio::time::timeout(
        Duration::from_secs(1),
        assignment.send(request.encode()),
    )
    .await
    .unwrap();
    assert!(matches!(res, Err(SendFailure::PeerGone)));
    assert_eq!(0, router.len());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_trusted_root_fails_without_traffic() {
    let h = harness(quick_config(), idle_transport(), fixed_indexer(None)).await;
    h.registry.register(peer_at(1_000));

    let err = h
        .odr
        .canonical_header(CancellationToken::new(), 250)
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            LodrError::NoTrustedRoot {
                kind: HelperTrieKind::Cht,
                section: 2,
            }
        ),
        "{err:?}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unconfirmed_root_is_not_used() {
    let root = TrustedRoot {
        section: 3,
        root: random_hash(),
        confirmed: false,
    };
    let h = harness(
        quick_config(),
        idle_transport(),
        fixed_indexer(Some(root)),
    )
    .await;
    h.registry.register(peer_at(1_000));

    let err = h
        .odr
        .bloom_bits(CancellationToken::new(), 5, 3)
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            LodrError::NoTrustedRoot {
                kind: HelperTrieKind::BloomTrie,
                section: 3,
            }
        ),
        "{err:?}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn canonical_header_targets_its_section() {
    let (transport, sent) = recording_transport(true);
    let root = TrustedRoot {
        section: 2,
        root: random_hash(),
        confirmed: true,
    };
    let h = harness(quick_config(), transport, fixed_indexer(Some(root))).await;

    // one block short of knowing the whole section
    let behind = peer_at(298);
    let synced = peer_at(299);
    h.registry.register(behind.clone());
    h.registry.register(synced.clone());

    let err = h
        .odr
        .canonical_header(CancellationToken::new(), 250)
        .await
        .unwrap_err();
    assert!(
        matches!(err, LodrError::AllPeersFailed { attempts: 1 }),
        "{err:?}"
    );

    let sent = sent.lock().unwrap().clone();
    assert_eq!(1, sent.len());
    assert_eq!(synced.id, sent[0].0);
    assert_eq!(RequestKind::HelperTrieProof, sent[0].1);

    let req = lodr_api::protocol::HelperTrieReq::decode(sent[0].2.clone())
        .unwrap();
    assert_eq!(HelperTrieKind::Cht.to_wire(), req.kind);
    assert_eq!(2, req.section);
    assert_eq!(cht_key(250), req.key);
}

#[tokio::test(flavor = "multi_thread")]
async fn no_peer_available_without_attempts() {
    let h = harness(quick_config(), idle_transport(), idle_indexer()).await;

    let err = h
        .odr
        .receipts(CancellationToken::new(), header(3))
        .await
        .unwrap_err();
    assert!(matches!(err, LodrError::NoPeerAvailable), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn identical_queries_share_one_request() {
    let (transport, sent) = recording_transport(false);
    let h = harness(
        CoreOdrConfig {
            request_timeout_ms: 60_000,
            ..quick_config()
        },
        transport,
        idle_indexer(),
    )
    .await;
    let peer = peer_at(10);
    h.registry.register(peer.clone());

    let c1 = CancellationToken::new();
    let c2 = CancellationToken::new();
    let t1 = tokio::task::spawn({
        let odr = h.odr.clone();
        let c1 = c1.clone();
        async move { odr.body(c1, header(3)).await }
    });
    let t2 = tokio::task::spawn({
        let odr = h.odr.clone();
        let c2 = c2.clone();
        async move { odr.body(c2, header(3)).await }
    });

    lodr_test_utils::iter_check!(1000, {
        if !sent.lock().unwrap().is_empty() {
            break;
        }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(1, sent.lock().unwrap().len());
    assert_eq!(1, h.odr.manager.pending_len());

    // the first caller leaving does not stop the shared request
    c1.cancel();
    assert!(matches!(t1.await.unwrap(), Err(LodrError::Canceled)));
    assert_eq!(1, h.odr.manager.pending_len());
    assert_eq!(1, h.registry.get(&peer.id).unwrap().in_flight);

    // the last one leaving aborts it and releases the peer
    c2.cancel();
    assert!(matches!(t2.await.unwrap(), Err(LodrError::Canceled)));
    lodr_test_utils::iter_check!(1000, {
        if h.odr.manager.pending_len() == 0
            && h.registry.get(&peer.id).unwrap().in_flight == 0
        {
            break;
        }
    });
    assert_eq!(1, sent.lock().unwrap().len());
}

#[tokio::test(flavor = "multi_thread")]
async fn cached_items_skip_the_network() {
    let h = harness(quick_config(), idle_transport(), idle_indexer()).await;
    h.registry.register(peer_at(10));

    let hdr = header(3);
    let request = h
        .odr
        .to_request(&CancellationToken::new(), &Query::Receipts(hdr.clone()))
        .await
        .unwrap();
    let receipts = vec![Bytes::from_static(b"r0")];
    h.store
        .put(request.key(), Verified::Receipts(receipts.clone()));

    let got = h.odr.receipts(CancellationToken::new(), hdr).await.unwrap();
    assert_eq!(receipts, got);
}

#[tokio::test(flavor = "multi_thread")]
async fn evicted_peers_are_backed_off_in_the_server_pool() {
    let h = harness(quick_config(), idle_transport(), idle_indexer()).await;
    let peer = peer_at(10);
    let addr = peer.addr.clone().unwrap();
    h.registry.register(peer.clone());
    assert_eq!(vec![addr.clone()], h.pool.preferred(10));

    while h.registry.get(&peer.id).is_some() {
        assert!(h.registry.try_begin_request(&peer.id, 4));
        h.registry.record_outcome(&peer.id, PeerOutcome::InvalidProof);
    }

    assert!(h.pool.preferred(10).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnected_peers_stay_dialable() {
    let h = harness(quick_config(), idle_transport(), idle_indexer()).await;
    let peer = peer_at(10);
    let addr = peer.addr.clone().unwrap();
    h.registry.register(peer.clone());
    h.registry.unregister(&peer.id);

    assert_eq!(Some(addr), h.pool.suggest());
}

#[test]
fn partial_config_falls_back_to_defaults() {
    let config: CoreOdrModConfig = serde_json::from_str(
        r#"{"coreOdr":{"requestTimeoutMs":10,"chtSectionSize":4096}}"#,
    )
    .unwrap();
    assert_eq!(10, config.core_odr.request_timeout_ms);
    assert_eq!(4096, config.core_odr.cht_section_size);
    assert_eq!(4, config.core_odr.max_in_flight_per_peer);
    assert_eq!(32_768, config.core_odr.bloom_trie_section_size);
}

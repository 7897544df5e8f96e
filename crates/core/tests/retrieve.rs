use lodr_api::*;
use lodr_core::default_builder;
use lodr_core::factories::core_odr::{CoreOdrConfig, CoreOdrModConfig};
use lodr_core::factories::*;
use lodr_test_utils::{enable_tracing, id::*};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SECTION: u64 = 16;

struct Net {
    client: builder::LightClient,
    transport: Arc<MemTransport>,
    chain: Arc<MemChain>,
}

async fn setup(tune: impl FnOnce(&mut CoreOdrConfig)) -> Net {
    enable_tracing();
    let chain = Arc::new(MemChain::generate(40, SECTION, "main"));
    let transport = MemTransport::create();
    let indexer = MemChainIndexer::from_chain(&chain);

    let builder = default_builder().with_default_config().unwrap();
    let mut config = CoreOdrConfig {
        request_timeout_ms: 300,
        peer_wait_grace_ms: 100,
        cht_section_size: SECTION,
        bloom_trie_section_size: SECTION,
        ..Default::default()
    };
    tune(&mut config);
    builder
        .config
        .set_module_config(&CoreOdrModConfig { core_odr: config })
        .unwrap();

    let client = builder.build(transport.clone(), indexer).await.unwrap();
    Net {
        client,
        transport,
        chain,
    }
}

impl Net {
    fn info(&self, chain: &MemChain) -> PeerInfo {
        PeerInfo {
            id: random_peer_id(),
            addr: Some(random_peer_addr()),
            protocol_version: 2,
            serves: RequestKind::ALL.into_iter().collect(),
            head: chain.head(),
        }
    }

    fn add_peer_info(&self, info: PeerInfo, behavior: MemBehavior) {
        self.add_serving(&info, self.chain.clone(), behavior);
        self.client.peer_registry.register(info);
    }

    fn add_serving(
        &self,
        info: &PeerInfo,
        chain: Arc<MemChain>,
        behavior: MemBehavior,
    ) {
        self.transport.add_server(info.id.clone(), chain, behavior);
    }

    fn add_peer(&self, behavior: MemBehavior) -> PeerInfo {
        let info = self.info(&self.chain);
        self.add_peer_info(info.clone(), behavior);
        info
    }

    fn odr(&self) -> &DynOdr {
        &self.client.odr
    }
}

fn go() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test(flavor = "multi_thread")]
async fn honest_peer_serves_every_query() {
    let net = setup(|_| {}).await;
    net.add_peer(MemBehavior::Honest);
    let chain = net.chain.clone();
    let hdr = chain.header(12).clone();

    let headers = net
        .odr()
        .headers(go(), chain.header(10).hash(), 10, 5)
        .await
        .unwrap();
    assert_eq!(
        (6..=10).map(|n| chain.header(n).clone()).collect::<Vec<_>>(),
        headers
    );

    let body = net.odr().body(go(), hdr.clone()).await.unwrap();
    assert_eq!(chain.body(12), &body);

    let receipts = net.odr().receipts(go(), hdr.clone()).await.unwrap();
    assert_eq!(chain.receipts(12), &receipts[..]);

    let account = net
        .odr()
        .account(go(), hdr.clone(), account_key(3))
        .await
        .unwrap();
    assert_eq!(chain.account(3), account);

    let storage = net
        .odr()
        .storage(go(), hdr.clone(), chain.storage_root(), storage_key(2))
        .await
        .unwrap();
    assert_eq!(chain.storage(2), storage);

    let code = net
        .odr()
        .code(go(), hdr.clone(), chain.code_hash())
        .await
        .unwrap();
    assert_eq!(chain.code(), &code);

    let (canonical, td) = net.odr().canonical_header(go(), 20).await.unwrap();
    assert_eq!(chain.header(20), &canonical);
    assert_eq!(chain.total_difficulty(20), td);

    let bits = net.odr().bloom_bits(go(), 3, 1).await.unwrap();
    assert_eq!(chain.bloom_bits(3, 1).unwrap(), bits);
}

#[tokio::test(flavor = "multi_thread")]
async fn absent_account_is_proven_absent() {
    let net = setup(|_| {}).await;
    net.add_peer(MemBehavior::Honest);

    let account = net
        .odr()
        .account(go(), net.chain.header(5).clone(), account_key(ACCOUNT_COUNT + 7))
        .await
        .unwrap();
    assert_eq!(None, account);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_reply_fails_over_to_next_peer() {
    let net = setup(|_| {}).await;
    let corrupt = net.add_peer(MemBehavior::Corrupt);
    let honest = net.add_peer(MemBehavior::Honest);
    let spare = net.add_peer(MemBehavior::Honest);

    let body = net
        .odr()
        .body(go(), net.chain.header(7).clone())
        .await
        .unwrap();
    assert_eq!(net.chain.body(7), &body);

    let sent = net.transport.sent();
    assert_eq!(2, sent.len());
    assert_eq!(corrupt.id, sent[0].0);
    assert_eq!(honest.id, sent[1].0);
    assert_eq!(0, net.transport.sent_to(&spare.id));

    let corrupt = net.client.peer_registry.get(&corrupt.id).unwrap();
    let honest = net.client.peer_registry.get(&honest.id).unwrap();
    assert!(corrupt.score < honest.score);
    assert_eq!(0, corrupt.in_flight);
    assert_eq!(0, honest.in_flight);
}

#[tokio::test(flavor = "multi_thread")]
async fn data_from_another_chain_is_never_returned() {
    let net = setup(|_| {}).await;
    let fork = Arc::new(MemChain::generate(40, SECTION, "fork"));

    // announces the same head as the main chain, but serves the fork
    let liar = net.info(&net.chain);
    net.add_serving(&liar, fork.clone(), MemBehavior::Honest);
    net.client.peer_registry.register(liar.clone());

    let err = net
        .odr()
        .headers(go(), net.chain.header(30).hash(), 30, 3)
        .await
        .unwrap_err();
    assert!(
        matches!(err, LodrError::AllPeersFailed { attempts: 1 }),
        "{err:?}"
    );

    let err = net.odr().canonical_header(go(), 3).await.unwrap_err();
    assert!(
        matches!(err, LodrError::AllPeersFailed { attempts: 1 }),
        "{err:?}"
    );
    assert_eq!(2, net.transport.sent_to(&liar.id));
}

#[tokio::test(flavor = "multi_thread")]
async fn all_peers_failing_reports_attempts() {
    let net = setup(|_| {}).await;
    net.add_peer(MemBehavior::CannotServe);
    net.add_peer(MemBehavior::Fail);
    net.add_peer(MemBehavior::Corrupt);

    let err = net
        .odr()
        .receipts(go(), net.chain.header(2).clone())
        .await
        .unwrap_err();
    assert!(
        matches!(err, LodrError::AllPeersFailed { attempts: 3 }),
        "{err:?}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn no_eligible_peer_fails_without_traffic() {
    let net = setup(|_| {}).await;

    // behind the requested block
    let mut stale = net.info(&net.chain);
    stale.head.number = 4;
    net.add_peer_info(stale, MemBehavior::Honest);

    // does not serve receipts
    let mut partial = net.info(&net.chain);
    partial.serves.remove(&RequestKind::Receipts);
    net.add_peer_info(partial, MemBehavior::Honest);

    let err = net
        .odr()
        .receipts(go(), net.chain.header(10).clone())
        .await
        .unwrap_err();
    assert!(matches!(err, LodrError::NoPeerAvailable), "{err:?}");
    assert!(net.transport.sent().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn helper_trie_proofs_need_a_newer_protocol() {
    let net = setup(|_| {}).await;
    let mut old = net.info(&net.chain);
    old.protocol_version = 1;
    net.add_peer_info(old, MemBehavior::Honest);

    let err = net.odr().canonical_header(go(), 3).await.unwrap_err();
    assert!(matches!(err, LodrError::NoPeerAvailable), "{err:?}");

    // the same peer still serves everything else
    net.odr()
        .code(go(), net.chain.header(3).clone(), net.chain.code_hash())
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_section_fails_without_traffic() {
    let net = setup(|_| {}).await;
    net.add_peer(MemBehavior::Honest);

    // block 35 lies in the incomplete third section
    let err = net.odr().canonical_header(go(), 35).await.unwrap_err();
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
    assert!(net.transport.sent().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_peer_times_out_and_fails_over() {
    let net = setup(|c| c.request_timeout_ms = 200).await;
    let silent = net.add_peer(MemBehavior::Silent);
    net.add_peer(MemBehavior::Honest);

    let start = Instant::now();
    let body = net
        .odr()
        .body(go(), net.chain.header(9).clone())
        .await
        .unwrap();
    assert_eq!(net.chain.body(9), &body);
    assert!(start.elapsed() >= Duration::from_millis(200));

    let silent = net.client.peer_registry.get(&silent.id).unwrap();
    assert!(silent.score < 1.0);
    assert_eq!(0, silent.in_flight);
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnect_mid_request_fails_over() {
    let net = setup(|c| c.request_timeout_ms = 10_000).await;
    let slow = net.add_peer(MemBehavior::Delayed(Duration::from_secs(5)));
    net.add_peer(MemBehavior::Honest);

    let start = Instant::now();
    let task = tokio::task::spawn({
        let odr = net.client.odr.clone();
        let hdr = net.chain.header(4).clone();
        async move { odr.receipts(CancellationToken::new(), hdr).await }
    });

    lodr_test_utils::iter_check!(1000, {
        if net.transport.sent_to(&slow.id) == 1 {
            break;
        }
    });
    net.client.peer_registry.unregister(&slow.id);

    let receipts = task.await.unwrap().unwrap();
    assert_eq!(net.chain.receipts(4), &receipts[..]);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_identical_queries_share_one_request() {
    let net = setup(|_| {}).await;
    let peer = net.add_peer(MemBehavior::Delayed(Duration::from_millis(100)));
    let hdr = net.chain.header(11).clone();

    let all = futures::future::join_all((0..5).map(|_| {
        let odr = net.client.odr.clone();
        let hdr = hdr.clone();
        async move { odr.body(CancellationToken::new(), hdr).await }
    }))
    .await;

    for body in all {
        assert_eq!(net.chain.body(11), &body.unwrap());
    }
    assert_eq!(1, net.transport.sent_to(&peer.id));
}

#[tokio::test(flavor = "multi_thread")]
async fn canceled_waiter_leaves_the_others_served() {
    let net = setup(|c| c.request_timeout_ms = 5_000).await;
    let peer = net.add_peer(MemBehavior::Delayed(Duration::from_millis(500)));
    let hdr = net.chain.header(9).clone();

    let first = CancellationToken::new();
    let t1 = tokio::task::spawn({
        let odr = net.client.odr.clone();
        let hdr = hdr.clone();
        let first = first.clone();
        async move { odr.body(first, hdr).await }
    });
    lodr_test_utils::iter_check!(1000, {
        if net.transport.sent_to(&peer.id) == 1 {
            break;
        }
    });

    let t2 = tokio::task::spawn({
        let odr = net.client.odr.clone();
        let hdr = hdr.clone();
        async move { odr.body(CancellationToken::new(), hdr).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // the caller that started the request leaves
    first.cancel();
    let err = t1.await.unwrap().unwrap_err();
    assert!(matches!(err, LodrError::Canceled), "{err:?}");

    let body = t2.await.unwrap().unwrap();
    assert_eq!(net.chain.body(9), &body);
    assert_eq!(1, net.transport.sent_to(&peer.id));
}

#[tokio::test(flavor = "multi_thread")]
async fn late_callers_never_repeat_a_resolved_request() {
    let net = setup(|_| {}).await;
    let peer = net.add_peer(MemBehavior::Delayed(Duration::from_millis(5)));
    let hdr = net.chain.header(7).clone();

    // callers keep arriving before, during and after resolution
    let all = futures::future::join_all((0..200u64).map(|n| {
        let odr = net.client.odr.clone();
        let hdr = hdr.clone();
        tokio::task::spawn(async move {
            tokio::time::sleep(Duration::from_micros(n * 50)).await;
            odr.body(CancellationToken::new(), hdr).await
        })
    }))
    .await;

    for body in all {
        assert_eq!(net.chain.body(7), &body.unwrap().unwrap());
    }
    assert_eq!(1, net.transport.sent_to(&peer.id));
    assert_eq!(1, net.client.item_store.len());
}

#[tokio::test(flavor = "multi_thread")]
async fn busy_peer_queues_requests() {
    let net = setup(|c| c.max_in_flight_per_peer = 1).await;
    let peer = net.add_peer(MemBehavior::Delayed(Duration::from_millis(50)));

    let all = futures::future::join_all((0..4).map(|n| {
        let odr = net.client.odr.clone();
        let hdr = net.chain.header(n).clone();
        async move { odr.body(CancellationToken::new(), hdr).await }
    }))
    .await;

    for (n, body) in all.into_iter().enumerate() {
        assert_eq!(net.chain.body(n as u64), &body.unwrap());
    }
    assert_eq!(4, net.transport.sent_to(&peer.id));
    assert_eq!(0, net.client.peer_registry.get(&peer.id).unwrap().in_flight);
}

#[tokio::test(flavor = "multi_thread")]
async fn waits_for_a_peer_to_connect() {
    let net = setup(|c| c.peer_wait_grace_ms = 2_000).await;

    let task = tokio::task::spawn({
        let odr = net.client.odr.clone();
        let hdr = net.chain.header(6).clone();
        async move { odr.body(CancellationToken::new(), hdr).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    net.add_peer(MemBehavior::Honest);

    let body = task.await.unwrap().unwrap();
    assert_eq!(net.chain.body(6), &body);
}

#[tokio::test(flavor = "multi_thread")]
async fn repeatedly_invalid_peer_is_evicted() {
    let net = setup(|_| {}).await;
    let corrupt = net.add_peer(MemBehavior::Corrupt);
    let addr = corrupt.addr.clone().unwrap();
    assert!(net.client.server_pool.preferred(10).contains(&addr));

    for n in 0..3 {
        net.odr()
            .body(go(), net.chain.header(n).clone())
            .await
            .unwrap_err();
    }

    assert!(net.client.peer_registry.get(&corrupt.id).is_none());
    assert!(!net.client.server_pool.preferred(10).contains(&addr));

    let err = net
        .odr()
        .body(go(), net.chain.header(5).clone())
        .await
        .unwrap_err();
    assert!(matches!(err, LodrError::NoPeerAvailable), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn verified_items_are_cached() {
    let net = setup(|_| {}).await;
    let peer = net.add_peer(MemBehavior::Honest);
    let hdr = net.chain.header(8).clone();

    let a = net.odr().receipts(go(), hdr.clone()).await.unwrap();
    let b = net.odr().receipts(go(), hdr).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(1, net.transport.sent_to(&peer.id));
    assert_eq!(1, net.client.item_store.len());
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_config_fails_build() {
    enable_tracing();
    let builder = default_builder().with_default_config().unwrap();
    builder
        .config
        .set_module_config(&CoreOdrModConfig {
            core_odr: CoreOdrConfig {
                max_in_flight_per_peer: 0,
                ..Default::default()
            },
        })
        .unwrap();

    builder
        .build(MemTransport::create(), MemChainIndexer::create())
        .await
        .unwrap_err();
}

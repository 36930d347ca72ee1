//! End-to-end purchase scenarios against in-process collaborators.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

use conduit_checkout::purchase::session::Outcome;
use conduit_checkout::purchase::{EventEffect, IgnoreReason, StepState};
use conduit_checkout::remote::{
    AdQuote, AdSession, AdvertiserApi, Attestation, BestSource, BuyRequest, Collaborators,
    CreatorApi, DiscoveredSources, EventStreamSupervisor, NodeInfo, PeerListing, PreBuyRequest,
    PreInfo, PushEvent, PushSource, Quote, RegistryApi, RemoteError, RemoteResult,
    SettlementAgent, SubsidyPayment, SubsidyReceipt,
};
use conduit_checkout::storage::UpsertOutcome;
use conduit_checkout::{
    CatalogItem, CheckoutConfig, CheckoutError, Orchestrator, ProtocolMode, PurchaseLedger,
    PurchaseOptions, SourceMode, StepStatus,
};

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
enum BestSourceScript {
    Seeder(&'static str),
    #[default]
    Creator,
    Hang,
}

#[derive(Default)]
struct Mock {
    quote_rejection: Option<&'static str>,
    /// `None` makes the registry unreachable.
    peers: Option<Vec<&'static str>>,
    best_source: BestSourceScript,
    pre_key: Option<&'static str>,
    ad_duration_ms: Option<u64>,
    subsidy_status: Option<&'static str>,
    /// Pushed into `feed` when the agent is triggered.
    after_trigger: Vec<PushEvent>,
    feed: Mutex<Option<mpsc::Sender<PushEvent>>>,

    calls: Mutex<Vec<&'static str>>,
    timeline: Mutex<Vec<(&'static str, Instant)>>,
    buys: Mutex<Vec<BuyRequest>>,
    pre_buys: Mutex<Vec<PreBuyRequest>>,
}

impl Mock {
    fn record(&self, call: &'static str) {
        self.calls.lock().push(call);
        self.timeline.lock().push((call, Instant::now()));
    }

    fn called(&self, call: &str) -> bool {
        self.calls.lock().iter().any(|c| *c == call)
    }

    fn at(&self, call: &str) -> Instant {
        self.timeline
            .lock()
            .iter()
            .find(|(c, _)| *c == call)
            .map(|(_, at)| *at)
            .unwrap()
    }

    fn push_scripted_events(&self) {
        if let Some(tx) = self.feed.lock().as_ref() {
            for event in &self.after_trigger {
                tx.try_send(event.clone()).unwrap();
            }
        }
    }
}

#[async_trait]
impl CreatorApi for Mock {
    async fn request_quote(&self, _creator_url: &str, content_hash: &str) -> RemoteResult<Quote> {
        self.record("quote");
        if let Some(message) = self.quote_rejection {
            return Err(RemoteError::Rejected(message.to_string()));
        }
        Ok(Quote {
            bolt11: "lnbcrt5u1quote".into(),
            enc_filename: format!("{}.enc", content_hash),
            file_name: String::new(),
            content_hash: content_hash.to_string(),
            encrypted_hash: Some("E1".into()),
            price_sats: 500,
        })
    }

    async fn request_ad_quote(
        &self,
        _creator_url: &str,
        content_hash: &str,
        _advertiser_url: &str,
    ) -> RemoteResult<AdQuote> {
        self.record("ad_quote");
        Ok(AdQuote {
            buyer_invoice: "lnbcrt10n1key".into(),
            advertiser_invoice: "lnbcrt5u1subsidy".into(),
            price_sats: 500,
            campaign_id: "camp-1".into(),
            enc_filename: format!("{}.enc", content_hash),
            file_name: "song.mp3".into(),
            content_hash: content_hash.to_string(),
        })
    }
}

#[async_trait]
impl SettlementAgent for Mock {
    async fn pre_info(&self) -> RemoteResult<PreInfo> {
        self.record("pre_info");
        Ok(PreInfo {
            buyer_pk_hex: self.pre_key.map(str::to_string),
        })
    }

    async fn node_info(&self) -> RemoteResult<NodeInfo> {
        Ok(NodeInfo {
            node_id: "02buyer".into(),
        })
    }

    async fn best_source(&self, _content_hash: &str) -> RemoteResult<BestSource> {
        self.record("best_source");
        match self.best_source {
            BestSourceScript::Seeder(url) => Ok(BestSource {
                source: "seeder".into(),
                source_url: Some(url.to_string()),
                alias: Some("alpha".into()),
                latency_ms: Some(12),
            }),
            BestSourceScript::Creator => Ok(BestSource {
                source: "creator".into(),
                ..Default::default()
            }),
            BestSourceScript::Hang => std::future::pending().await,
        }
    }

    async fn discover_sources(&self, _content_hash: &str) -> RemoteResult<DiscoveredSources> {
        Ok(DiscoveredSources::default())
    }

    async fn trigger_buy(&self, request: &BuyRequest) -> RemoteResult<serde_json::Value> {
        self.record("trigger");
        self.buys.lock().push(request.clone());
        self.push_scripted_events();
        Ok(json!({ "status": "started" }))
    }

    async fn trigger_buy_pre(&self, request: &PreBuyRequest) -> RemoteResult<serde_json::Value> {
        self.record("trigger_pre");
        self.pre_buys.lock().push(request.clone());
        self.push_scripted_events();
        Ok(json!({ "status": "started" }))
    }
}

#[async_trait]
impl RegistryApi for Mock {
    async fn discover(&self, _content_hash: &str) -> RemoteResult<Vec<PeerListing>> {
        self.record("discover");
        match &self.peers {
            Some(peers) => Ok(peers
                .iter()
                .map(|p| PeerListing {
                    seeder_address: p.to_string(),
                })
                .collect()),
            None => Err(RemoteError::Transport("connection refused".into())),
        }
    }

    async fn listings(&self) -> RemoteResult<Vec<CatalogItem>> {
        Ok(vec![item("H1")])
    }
}

#[async_trait]
impl AdvertiserApi for Mock {
    async fn start_session(
        &self,
        _advertiser_url: &str,
        _campaign_id: &str,
        _buyer_pubkey: &str,
    ) -> RemoteResult<AdSession> {
        self.record("ad_start");
        Ok(AdSession {
            session_id: "sess-1".into(),
            duration_ms: self.ad_duration_ms,
        })
    }

    async fn complete_session(
        &self,
        _advertiser_url: &str,
        _campaign_id: &str,
        _session_id: &str,
        _buyer_pubkey: &str,
    ) -> RemoteResult<Attestation> {
        self.record("ad_complete");
        Ok(Attestation {
            token: "att-token".into(),
            payload: json!({ "session_id": "sess-1" }),
        })
    }

    async fn pay(
        &self,
        _advertiser_url: &str,
        _payment: &SubsidyPayment,
    ) -> RemoteResult<SubsidyReceipt> {
        self.record("ad_pay");
        Ok(SubsidyReceipt {
            status: self.subsidy_status.map(str::to_string),
        })
    }
}

/// The agent's console feed: a fixed history and one live connection fed
/// by whatever the mock pushes on trigger.
struct AgentFeed {
    history: Vec<PushEvent>,
    live: Mutex<Option<mpsc::Receiver<PushEvent>>>,
}

#[async_trait]
impl PushSource for AgentFeed {
    async fn history(&self, limit: usize) -> RemoteResult<Vec<PushEvent>> {
        Ok(self.history.iter().take(limit).cloned().collect())
    }

    async fn subscribe(&self) -> RemoteResult<BoxStream<'static, RemoteResult<PushEvent>>> {
        let rx = self
            .live
            .lock()
            .take()
            .ok_or_else(|| RemoteError::Transport("connection refused".into()))?;
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (Ok(event), rx))
        });
        Ok(stream.boxed())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn item(hash: &str) -> CatalogItem {
    CatalogItem {
        content_hash: hash.to_string(),
        file_name: "song.mp3".into(),
        size_bytes: 2048,
        price_sats: 500,
        creator_address: "10.0.0.1:3000".into(),
        pre_c1_hex: Some("c1".into()),
        encrypted_hash: None,
        playback_policy: Default::default(),
    }
}

fn orchestrator(mock: &Arc<Mock>) -> Orchestrator {
    let collaborators = Collaborators {
        creator: mock.clone(),
        agent: mock.clone(),
        registry: mock.clone(),
        advertiser: mock.clone(),
    };
    Orchestrator::new(
        collaborators,
        PurchaseLedger::open_temporary().unwrap(),
        CheckoutConfig::new("127.0.0.1:3000", "127.0.0.1:3003"),
    )
}

fn step(orch: &Orchestrator, id: &str) -> StepState {
    orch.snapshot()
        .unwrap()
        .steps
        .into_iter()
        .find(|s| s.id == id)
        .unwrap()
}

fn event(ty: &str, data: serde_json::Value) -> PushEvent {
    PushEvent::new(ty, data)
}

fn ad_options() -> PurchaseOptions {
    PurchaseOptions {
        advertiser_url: Some("10.0.0.9:3005".into()),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn direct_purchase_happy_path() {
    let saved = json!({ "content_hash": "H1", "path": "/tmp/decrypted-song.mp3", "bytes": 2048 });
    let mock = Arc::new(Mock {
        after_trigger: vec![
            event("PAYING_INVOICE", json!({})),
            event("PAYMENT_SENT", json!({})),
            event("PAYMENT_CONFIRMED", json!({})),
            event("FETCHING_ENC", json!({})),
            event("ENC_FETCHED", json!({ "bytes": 4096 })),
            event("DECRYPTING", json!({})),
            event("DECRYPTED", json!({})),
            event("VERIFIED", json!({ "matches": true })),
            event("FILE_SAVED", saved),
        ],
        ..Default::default()
    });
    let (tx, mut rx) = mpsc::channel(64);
    *mock.feed.lock() = Some(tx);
    let orch = orchestrator(&mock);

    let outcome = orch
        .run_purchase(item("H1"), ProtocolMode::Direct, PurchaseOptions::default(), &mut rx)
        .await
        .unwrap();

    match outcome {
        Outcome::Purchased { message, preview } => {
            assert_eq!(message, "Content purchased and verified!");
            let preview = preview.unwrap();
            assert_eq!(preview.url, "http://127.0.0.1:3000/api/decrypted/decrypted-song.mp3");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let snapshot = orch.snapshot().unwrap();
    assert_eq!(snapshot.steps.len(), 6);
    assert!(snapshot.steps.iter().all(|s| s.status == StepStatus::Done));
    assert_eq!(step(&orch, "invoice").detail, "500 sats");
    assert_eq!(step(&orch, "fetch").detail, "4.0 KB");
    assert!(!orch.is_busy());

    let record = orch.ledger().get("H1").unwrap().unwrap();
    assert_eq!(record.output_path, "/tmp/decrypted-song.mp3");
    assert_eq!(record.mode, ProtocolMode::Direct);
    assert_eq!(orch.ledger().len(), 1);

    let buys = mock.buys.lock();
    match &buys[0] {
        BuyRequest::Direct(buy) => {
            assert_eq!(buy.invoice, "lnbcrt5u1quote");
            assert_eq!(buy.enc_url, "http://10.0.0.1:3000/api/enc/H1.enc");
            assert!(buy.output.starts_with("/tmp/decrypted-"));
            assert!(buy.output.ends_with("-song.mp3"));
        }
        other => panic!("unexpected trigger: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn pre_peer_lookup_timeout_falls_back_to_creator() {
    let mock = Arc::new(Mock {
        pre_key: Some("a1b2c3d4e5f60718293a4b5c6d7e8f90"),
        best_source: BestSourceScript::Hang,
        ..Default::default()
    });
    let orch = orchestrator(&mock);
    let options = PurchaseOptions {
        source: SourceMode::Peer("http://seeder-x:4000".into()),
        ..Default::default()
    };

    orch.start_purchase(item("H1"), ProtocolMode::Pre, options)
        .await
        .unwrap();

    let prepurchase = step(&orch, "prepurchase");
    assert_eq!(prepurchase.status, StepStatus::Done);
    assert_eq!(
        prepurchase.detail,
        "500 sats via creator (fallback: timed out after 5000ms)"
    );
    assert_eq!(step(&orch, "preinfo").detail, "G2 pk: a1b2c3d4e5f60718...");
    assert_eq!(step(&orch, "pay").status, StepStatus::Active);

    let pre_buys = mock.pre_buys.lock();
    assert_eq!(pre_buys[0].seeder_url, None);
    assert_eq!(pre_buys[0].source_mode, "http://seeder-x:4000");
    assert!(pre_buys[0].output.contains("/decrypted-pre-"));
    drop(pre_buys);

    // The agent confirming the purchase must not erase the fallback note.
    orch.handle_event(&event("PRE_PURCHASE_RECEIVED", json!({ "price_sats": 500 })))
        .unwrap();
    assert_eq!(
        step(&orch, "prepurchase").detail,
        "500 sats via creator (fallback: timed out after 5000ms)"
    );
    assert_eq!(step(&orch, "pay").detail, "Paying 500 sats...");
}

#[tokio::test]
async fn pre_peer_lookup_uses_ranked_seeder() {
    let mock = Arc::new(Mock {
        pre_key: Some("abcd"),
        best_source: BestSourceScript::Seeder("10.0.0.7:4000"),
        ..Default::default()
    });
    let orch = orchestrator(&mock);
    let options = PurchaseOptions {
        source: SourceMode::Peer("http://10.0.0.7:4000".into()),
        ..Default::default()
    };

    orch.start_purchase(item("H1"), ProtocolMode::Pre, options)
        .await
        .unwrap();

    assert_eq!(
        step(&orch, "prepurchase").detail,
        "500 sats via seeder alpha (12ms)"
    );
    assert_eq!(
        mock.pre_buys.lock()[0].seeder_url.as_deref(),
        Some("http://10.0.0.7:4000")
    );
}

#[tokio::test]
async fn pre_without_agent_key_fails_first_step() {
    let mock = Arc::new(Mock::default());
    let orch = orchestrator(&mock);

    let err = orch
        .start_purchase(item("H1"), ProtocolMode::Pre, PurchaseOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::MissingPreKey { .. }));
    let preinfo = step(&orch, "preinfo");
    assert_eq!(preinfo.status, StepStatus::Fail);
    assert_eq!(preinfo.detail, "No buyer_pk_hex in response");
    assert_eq!(step(&orch, "prepurchase").status, StepStatus::Pending);
    assert!(!mock.called("trigger_pre"));
    assert!(!orch.is_busy());
}

#[tokio::test]
async fn chunked_with_zero_seeders_never_quotes_or_pays() {
    let mock = Arc::new(Mock {
        peers: Some(vec![]),
        ..Default::default()
    });
    let orch = orchestrator(&mock);

    let err = orch
        .start_purchase(item("H1"), ProtocolMode::Chunked, PurchaseOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::NoSeeders { .. }));
    assert_eq!(step(&orch, "invoice").status, StepStatus::Pending);
    assert_eq!(step(&orch, "cpay").status, StepStatus::Pending);
    assert!(!mock.called("quote"));
    assert!(!mock.called("trigger"));
    match orch.outcome() {
        Some(Outcome::Failed { message }) => assert!(message.starts_with("No seeders found")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!orch.is_busy());
}

#[tokio::test]
async fn seeder_mode_fails_when_registry_is_unreachable() {
    let mock = Arc::new(Mock::default());
    let orch = orchestrator(&mock);

    let err = orch
        .start_purchase(item("H1"), ProtocolMode::Seeder, PurchaseOptions::default())
        .await
        .unwrap_err();

    match err {
        CheckoutError::NoSeeders { reason } => assert!(reason.contains("connection refused")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!mock.called("quote"));
}

#[tokio::test]
async fn chunked_trigger_carries_discovered_peers() {
    let mock = Arc::new(Mock {
        peers: Some(vec!["10.0.0.7:4000", "10.0.0.8:4000"]),
        ..Default::default()
    });
    let orch = orchestrator(&mock);

    orch.start_purchase(item("H1"), ProtocolMode::Chunked, PurchaseOptions::default())
        .await
        .unwrap();

    assert_eq!(step(&orch, "cpay").detail, "Starting... (2 seeders)");
    match &mock.buys.lock()[0] {
        BuyRequest::Chunked(buy) => {
            assert_eq!(buy.mode, "chunked");
            assert_eq!(buy.encrypted_hash, "E1");
            assert_eq!(
                buy.seeder_urls,
                vec!["http://10.0.0.7:4000", "http://10.0.0.8:4000"]
            );
        }
        other => panic!("unexpected trigger: {:?}", other),
    }

    orch.handle_event(&event("CHUNKS_DOWNLOADED", json!({}))).unwrap();
    assert_eq!(step(&orch, "down").status, StepStatus::Done);
    assert_eq!(step(&orch, "assem").status, StepStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn ad_subsidy_rejected_fails_adpay_only() {
    let mock = Arc::new(Mock {
        ad_duration_ms: Some(2000),
        subsidy_status: Some("insufficient_budget"),
        ..Default::default()
    });
    let orch = orchestrator(&mock);

    let err = orch
        .start_purchase(item("H1"), ProtocolMode::Ad, ad_options())
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::SubsidyRejected { .. }));
    let adpay = step(&orch, "adpay");
    assert_eq!(adpay.status, StepStatus::Fail);
    assert_eq!(adpay.detail, "insufficient_budget");
    assert_eq!(step(&orch, "adhtlc").status, StepStatus::Pending);
    assert_eq!(
        orch.outcome().unwrap().message(),
        "Advertiser subsidy failed: insufficient_budget"
    );
}

#[tokio::test(start_paused = true)]
async fn ad_countdown_finishes_before_attestation() {
    let mock = Arc::new(Mock {
        ad_duration_ms: Some(3000),
        subsidy_status: Some("payment_sent"),
        ..Default::default()
    });
    let orch = orchestrator(&mock);

    orch.start_purchase(item("H1"), ProtocolMode::Ad, ad_options())
        .await
        .unwrap();

    let watched = mock.at("ad_complete") - mock.at("ad_start");
    assert!(watched >= Duration::from_secs(3), "watched {:?}", watched);
    assert!(mock.at("trigger") >= mock.at("ad_complete"));
    assert!(mock.at("ad_pay") >= mock.at("trigger"));

    assert_eq!(step(&orch, "adwatch").detail, "Ad viewed (3s)");
    assert_eq!(step(&orch, "adattest").status, StepStatus::Done);
    assert_eq!(step(&orch, "adpay").detail, "Subsidy paid (K_ad, not K)");
    assert_eq!(step(&orch, "adhtlc").status, StepStatus::Active);
    assert!(orch.is_busy());
}

#[tokio::test]
async fn ad_mode_requires_an_advertiser() {
    let orch = orchestrator(&Arc::new(Mock::default()));

    let err = orch
        .start_purchase(item("H1"), ProtocolMode::Ad, PurchaseOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::Input(ref m) if m == "Advertiser URL required"));
    assert!(orch.snapshot().is_none());
    assert_eq!(orch.epoch(), 0);
}

#[tokio::test]
async fn duplicate_save_keeps_one_ledger_record() {
    let mock = Arc::new(Mock::default());
    let orch = orchestrator(&mock);
    orch.start_purchase(item("H1"), ProtocolMode::Direct, PurchaseOptions::default())
        .await
        .unwrap();

    let saved = event("FILE_SAVED", json!({ "content_hash": "H1", "path": "/tmp/a.mp3" }));
    assert_eq!(
        orch.handle_event(&saved).unwrap(),
        EventEffect::Recorded(UpsertOutcome::Inserted)
    );
    assert_eq!(
        orch.handle_event(&saved).unwrap(),
        EventEffect::Recorded(UpsertOutcome::Replaced)
    );
    assert_eq!(orch.ledger().len(), 1);
    assert!(orch.is_purchased("H1").unwrap());
}

#[tokio::test]
async fn creator_rejection_is_shown_verbatim() {
    let mock = Arc::new(Mock {
        quote_rejection: Some("content not found"),
        ..Default::default()
    });
    let orch = orchestrator(&mock);

    orch.start_purchase(item("H1"), ProtocolMode::Direct, PurchaseOptions::default())
        .await
        .unwrap_err();

    let invoice = step(&orch, "invoice");
    assert_eq!(invoice.status, StepStatus::Fail);
    assert_eq!(invoice.detail, "content not found");
    assert_eq!(orch.outcome().unwrap().message(), "content not found");
}

#[tokio::test]
async fn hash_mismatch_ends_the_session() {
    let mock = Arc::new(Mock::default());
    let orch = orchestrator(&mock);
    orch.start_purchase(item("H1"), ProtocolMode::Direct, PurchaseOptions::default())
        .await
        .unwrap();

    let effect = orch
        .handle_event(&event("HASH_MISMATCH", json!({})))
        .unwrap();
    assert!(matches!(effect, EventEffect::Failed(_)));
    let verify = step(&orch, "verify");
    assert_eq!(verify.status, StepStatus::Fail);
    assert_eq!(verify.detail, "Mismatch!");

    // Nothing revives a failed session.
    let late = orch
        .handle_event(&event("FILE_SAVED", json!({ "path": "/tmp/a.mp3" })))
        .unwrap();
    assert_eq!(late, EventEffect::Ignored(IgnoreReason::SessionFailed));
    assert!(orch.ledger().is_empty());
}

#[tokio::test]
async fn buy_error_fails_the_running_step() {
    let orch = orchestrator(&Arc::new(Mock::default()));
    orch.start_purchase(item("H1"), ProtocolMode::Direct, PurchaseOptions::default())
        .await
        .unwrap();

    orch.handle_event(&event("BUY_ERROR", json!({ "message": "no route" })))
        .unwrap();

    let pay = step(&orch, "pay");
    assert_eq!(pay.status, StepStatus::Fail);
    assert_eq!(pay.detail, "no route");
    assert_eq!(orch.outcome().unwrap().message(), "no route");
}

#[tokio::test]
async fn one_purchase_at_a_time() {
    let orch = orchestrator(&Arc::new(Mock::default()));
    orch.start_purchase(item("H1"), ProtocolMode::Direct, PurchaseOptions::default())
        .await
        .unwrap();
    assert!(orch.is_busy());

    let err = orch
        .start_purchase(item("H2"), ProtocolMode::Direct, PurchaseOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::Busy));
    assert_eq!(orch.snapshot().unwrap().content_hash, "H1");

    orch.handle_event(&event("FILE_SAVED", json!({ "path": "/tmp/a.mp3" })))
        .unwrap();
    assert!(!orch.is_busy());
    let epoch = orch
        .start_purchase(item("H2"), ProtocolMode::Direct, PurchaseOptions::default())
        .await
        .unwrap();
    assert_eq!(epoch, 2);
}

#[tokio::test]
async fn events_from_an_earlier_session_are_ignored() {
    let orch = orchestrator(&Arc::new(Mock::default()));

    orch.start_purchase(item("H1"), ProtocolMode::Direct, PurchaseOptions::default())
        .await
        .unwrap();
    orch.handle_event(&event("PAYMENT_FAILED", json!({ "reason": "no route" })).with_id(5))
        .unwrap();
    assert!(!orch.is_busy());

    orch.start_purchase(item("H2"), ProtocolMode::Direct, PurchaseOptions::default())
        .await
        .unwrap();

    // A late replay of the first purchase's stream.
    let replayed = event("PAYMENT_SENT", json!({})).with_id(4);
    assert_eq!(
        orch.handle_event(&replayed).unwrap(),
        EventEffect::Ignored(IgnoreReason::BeforeSession)
    );
    // A fresh event that still names the first purchase.
    let stray = event("PAYMENT_SENT", json!({ "content_hash": "H1" })).with_id(6);
    assert_eq!(
        orch.handle_event(&stray).unwrap(),
        EventEffect::Ignored(IgnoreReason::OtherPurchase)
    );
    assert_eq!(step(&orch, "pay").status, StepStatus::Active);

    let ours = event("PAYMENT_SENT", json!({ "content_hash": "H2" })).with_id(7);
    assert_eq!(orch.handle_event(&ours).unwrap(), EventEffect::Applied);
    assert_eq!(step(&orch, "pay").status, StepStatus::Done);
    assert_eq!(step(&orch, "htlc").status, StepStatus::Active);
}

#[tokio::test]
async fn events_without_a_session_only_move_the_watermark() {
    let orch = orchestrator(&Arc::new(Mock::default()));
    let old = event("FILE_SAVED", json!({ "path": "/tmp/old.mp3" })).with_id(9);
    assert_eq!(
        orch.handle_event(&old).unwrap(),
        EventEffect::Ignored(IgnoreReason::NoSession)
    );

    orch.start_purchase(item("H1"), ProtocolMode::Direct, PurchaseOptions::default())
        .await
        .unwrap();
    assert_eq!(
        orch.handle_event(&old).unwrap(),
        EventEffect::Ignored(IgnoreReason::BeforeSession)
    );
    assert!(orch.ledger().is_empty());
}

#[tokio::test]
async fn stale_unnumbered_history_cannot_end_a_new_purchase() {
    let (live_tx, live_rx) = mpsc::channel(64);
    let mock = Arc::new(Mock {
        after_trigger: vec![
            event("PAYMENT_SENT", json!({})),
            event(
                "FILE_SAVED",
                json!({ "content_hash": "H1", "path": "/tmp/decrypted-song.mp3" }),
            ),
        ],
        ..Default::default()
    });
    *mock.feed.lock() = Some(live_tx);
    let agent = Arc::new(AgentFeed {
        history: vec![
            event("PAYMENT_FAILED", json!({ "reason": "old purchase" })),
            event("FILE_SAVED", json!({ "path": "/tmp/old.mp3" })),
        ],
        live: Mutex::new(Some(live_rx)),
    });
    let orch = orchestrator(&mock);

    // What the CLI does before buying: read history to move the watermark.
    for past in agent.history(500).await.unwrap() {
        assert_eq!(
            orch.handle_event(&past).unwrap(),
            EventEffect::Ignored(IgnoreReason::NoSession)
        );
    }

    let (tx, mut rx) = mpsc::channel(64);
    let supervisor = EventStreamSupervisor::new(agent.clone(), orch.config()).spawn(tx);
    let outcome = orch
        .run_purchase(item("H1"), ProtocolMode::Direct, PurchaseOptions::default(), &mut rx)
        .await
        .unwrap();
    supervisor.abort();

    assert!(outcome.is_success(), "unexpected outcome: {:?}", outcome);
    assert_eq!(step(&orch, "pay").status, StepStatus::Done);
    assert_eq!(
        orch.ledger().get("H1").unwrap().unwrap().output_path,
        "/tmp/decrypted-song.mp3"
    );
}

#[tokio::test]
async fn unrecordable_save_fails_the_purchase() {
    let mock = Arc::new(Mock {
        after_trigger: vec![
            event("PAYMENT_SENT", json!({})),
            event("FILE_SAVED", json!({ "content_hash": "H1" })),
        ],
        ..Default::default()
    });
    let (tx, mut rx) = mpsc::channel(64);
    *mock.feed.lock() = Some(tx);
    let orch = orchestrator(&mock);

    let outcome = orch
        .run_purchase(item("H1"), ProtocolMode::Direct, PurchaseOptions::default(), &mut rx)
        .await
        .unwrap();

    match outcome {
        Outcome::Failed { message } => assert_eq!(
            message,
            "Purchase saved but could not be recorded: invalid record: missing output path"
        ),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(orch.ledger().is_empty());
    assert!(!orch.is_busy());
    assert!(!orch.is_purchased("H1").unwrap());
}

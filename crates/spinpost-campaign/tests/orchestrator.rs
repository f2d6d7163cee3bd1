use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use spinpost_campaign::{
    CampaignError, CampaignService, ContextHandle, ContextProvider, DriverError, EntitlementError,
    EntitlementGate, EntitlementService, Orchestrator, OrchestratorSettings, Post, SubmitSignal,
    Submitter, SubscriptionStatus,
};
use spinpost_core::{
    Campaign, CampaignId, CampaignRequest, CampaignStatus, Destination, OutcomeResult,
    PacingPolicy,
};
use spinpost_protocol::StartReply;
use spinpost_store::{CampaignStore, MemoryRepository, Repository, StateStore};
use spinpost_transfer::MediaArchive;
use tokio::sync::{oneshot, Semaphore};

// ── fakes ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeContexts {
    /// Destinations whose context never opens.
    broken: HashSet<String>,
    opens: Mutex<HashMap<String, usize>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

#[async_trait]
impl ContextProvider for FakeContexts {
    async fn open(&self, destination: &Destination) -> Result<ContextHandle, DriverError> {
        *self
            .opens
            .lock()
            .unwrap()
            .entry(destination.id.clone())
            .or_default() += 1;
        if self.broken.contains(&destination.id) {
            return Err(DriverError::Transient("tab not ready".into()));
        }
        let n = self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(ContextHandle {
            id: format!("ctx-{n}"),
            destination_id: destination.id.clone(),
        })
    }

    async fn close(&self, _handle: ContextHandle) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy)]
enum Behaviour {
    Succeed,
    Fail,
    Hang,
    Panic,
}

#[derive(Default)]
struct FakeSubmitter {
    behaviour: HashMap<String, Behaviour>,
    posts: Mutex<Vec<Post>>,
    pending: Mutex<Vec<oneshot::Sender<SubmitSignal>>>,
}

#[async_trait]
impl Submitter for FakeSubmitter {
    async fn submit(
        &self,
        _handle: &ContextHandle,
        post: &Post,
    ) -> Result<oneshot::Receiver<SubmitSignal>, DriverError> {
        self.posts.lock().unwrap().push(post.clone());
        let (tx, rx) = oneshot::channel();
        match self
            .behaviour
            .get(&post.destination_id)
            .copied()
            .unwrap_or(Behaviour::Succeed)
        {
            Behaviour::Succeed => {
                let _ = tx.send(SubmitSignal::Success);
            }
            Behaviour::Fail => {
                let _ = tx.send(SubmitSignal::Failure("rejected by site".into()));
            }
            Behaviour::Hang => self.pending.lock().unwrap().push(tx),
            Behaviour::Panic => panic!("driver crashed"),
        }
        Ok(rx)
    }
}

struct FakeEntitlement {
    premium: bool,
    credits: Mutex<u32>,
    consumed: AtomicUsize,
    /// When set, every status fetch waits for a permit.
    hold: Option<Arc<Semaphore>>,
}

impl FakeEntitlement {
    fn new(premium: bool, credits: u32) -> Self {
        Self {
            premium,
            credits: Mutex::new(credits),
            consumed: AtomicUsize::new(0),
            hold: None,
        }
    }
}

#[async_trait]
impl EntitlementService for FakeEntitlement {
    async fn fetch_subscription_status(
        &self,
        _account_id: &str,
    ) -> Result<SubscriptionStatus, EntitlementError> {
        if let Some(hold) = &self.hold {
            hold.acquire().await.unwrap().forget();
        }
        Ok(SubscriptionStatus {
            premium: self.premium,
            subscription_id: None,
            credits: *self.credits.lock().unwrap(),
        })
    }

    async fn consume_credit(&self, _account_id: &str) -> Result<u32, EntitlementError> {
        self.consumed.fetch_add(1, Ordering::SeqCst);
        let mut c = self.credits.lock().unwrap();
        *c = c.saturating_sub(1);
        Ok(*c)
    }
}

// ── harness ────────────────────────────────────────────────────────────────

struct Harness {
    service: CampaignService,
    orchestrator: Arc<Orchestrator>,
    state: Arc<StateStore>,
    campaigns: CampaignStore,
    archive: MediaArchive,
    contexts: Arc<FakeContexts>,
    submitter: Arc<FakeSubmitter>,
    entitlement: Arc<FakeEntitlement>,
}

fn harness(contexts: FakeContexts, submitter: FakeSubmitter, entitlement: FakeEntitlement) -> Harness {
    let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let state = Arc::new(StateStore::hydrate(repo.clone()));
    let campaigns = CampaignStore::new(repo.clone());
    let archive = MediaArchive::new(repo);
    let contexts = Arc::new(contexts);
    let submitter = Arc::new(submitter);
    let entitlement = Arc::new(entitlement);
    let gate = Arc::new(EntitlementGate::new(entitlement.clone(), "acct-1"));
    let orchestrator = Arc::new(Orchestrator::new(
        state.clone(),
        campaigns.clone(),
        archive.clone(),
        contexts.clone(),
        submitter.clone(),
        gate,
        OrchestratorSettings::default(),
    ));
    Harness {
        service: CampaignService::new(orchestrator.clone()),
        orchestrator,
        state,
        campaigns,
        archive,
        contexts,
        submitter,
        entitlement,
    }
}

fn default_harness() -> Harness {
    harness(
        FakeContexts::default(),
        FakeSubmitter::default(),
        FakeEntitlement::new(false, 100),
    )
}

fn request(ids: &[&str], pacing: Option<PacingPolicy>) -> CampaignRequest {
    CampaignRequest {
        destinations: ids.iter().map(|id| Destination::new(*id)).collect(),
        template: "Hello {there|friend}".to_string(),
        media_refs: Vec::new(),
        pacing,
    }
}

fn stored(h: &Harness, req: CampaignRequest) -> CampaignId {
    let c = Campaign::from_request(req, None);
    h.campaigns.put(&c).unwrap();
    c.id
}

async fn wait_for_progress(h: &Harness, prefix: &str) {
    while !h.state.progress().text.starts_with(prefix) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn outcome(c: &Campaign, id: &str) -> OutcomeResult {
    c.outcomes
        .iter()
        .find(|o| o.destination_id == id)
        .map(|o| o.result)
        .unwrap_or_else(|| panic!("no outcome for {id}"))
}

// ── tests ──────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn every_destination_gets_exactly_one_outcome() {
    let h = harness(
        FakeContexts {
            broken: ["d4".to_string()].into(),
            ..Default::default()
        },
        FakeSubmitter {
            behaviour: [("d3".to_string(), Behaviour::Fail)].into(),
            ..Default::default()
        },
        FakeEntitlement::new(false, 100),
    );
    let ids = ["d1", "d2", "d3", "d4", "d5"];
    let id = stored(&h, request(&ids, Some(PacingPolicy::Continuous)));

    h.orchestrator.start(&id).await.unwrap().await.unwrap();

    let c = h.campaigns.get(&id).unwrap().unwrap();
    assert_eq!(c.status, CampaignStatus::Completed);
    assert_eq!(c.outcomes.len(), ids.len());
    let unique: HashSet<_> = c.outcomes.iter().map(|o| o.destination_id.clone()).collect();
    assert_eq!(unique.len(), ids.len());
    assert_eq!(outcome(&c, "d3"), OutcomeResult::Failure);
    assert_eq!(outcome(&c, "d4"), OutcomeResult::Failure);
    assert_eq!(c.count(OutcomeResult::Success), 3);

    // strictly sequential, in list order, every context closed
    let order: Vec<String> = h
        .submitter
        .posts
        .lock()
        .unwrap()
        .iter()
        .map(|p| p.destination_id.clone())
        .collect();
    assert_eq!(order, vec!["d1", "d2", "d3", "d5"]);
    assert_eq!(
        h.contexts.opened.load(Ordering::SeqCst),
        h.contexts.closed.load(Ordering::SeqCst)
    );

    // credits only for verified successes
    assert_eq!(h.entitlement.consumed.load(Ordering::SeqCst), 3);

    let flags = h.state.flags();
    assert!(!flags.is_running);
    assert!(h.state.progress().done);
}

#[tokio::test(start_paused = true)]
async fn posts_carry_expanded_text_and_attachments() {
    let h = default_harness();
    h.archive.store("m1", "image/png", b"\x89PNG").unwrap();
    let mut req = request(&["d1", "d2"], Some(PacingPolicy::Continuous));
    req.media_refs = vec!["m1".to_string()];
    let id = stored(&h, req);

    h.orchestrator.start(&id).await.unwrap().await.unwrap();

    let posts = h.submitter.posts.lock().unwrap();
    assert_eq!(posts.len(), 2);
    for p in posts.iter() {
        assert!(p.text == "Hello there" || p.text == "Hello friend", "got {}", p.text);
        assert_eq!(p.attachments.len(), 1);
        assert_eq!(p.attachments[0].bytes, b"\x89PNG");
    }
}

#[tokio::test(start_paused = true)]
async fn missing_media_blocks_start() {
    let h = default_harness();
    let mut req = request(&["d1"], None);
    req.media_refs = vec!["nope".to_string()];
    let id = stored(&h, req);

    assert!(matches!(
        h.orchestrator.start(&id).await,
        Err(CampaignError::Media(_))
    ));
    assert_eq!(h.contexts.opened.load(Ordering::SeqCst), 0);
    assert!(!h.state.flags().is_running);
}

#[tokio::test(start_paused = true)]
async fn start_while_running_is_rejected_without_mutation() {
    let h = harness(
        FakeContexts::default(),
        FakeSubmitter {
            behaviour: [("d1".to_string(), Behaviour::Hang)].into(),
            ..Default::default()
        },
        FakeEntitlement::new(true, 0),
    );
    let first = stored(&h, request(&["d1", "d2"], None));
    let _run = h.orchestrator.start(&first).await.unwrap();

    let flags_before = h.state.flags();
    let listed_before = h.campaigns.list().unwrap().len();

    let reply = h
        .service
        .start_campaign(request(&["x1"], None))
        .await
        .unwrap();
    assert!(matches!(reply, StartReply::Rejected { .. }));
    assert_eq!(h.state.flags(), flags_before);
    assert_eq!(h.campaigns.list().unwrap().len(), listed_before);

    // the orchestrator-level check rejects too
    assert!(matches!(
        h.orchestrator.start(&first).await,
        Err(CampaignError::CampaignConflict { .. })
    ));
    assert_eq!(h.state.flags(), flags_before);
}

#[tokio::test(start_paused = true)]
async fn stop_during_pacing_wait_ends_within_one_poll_step() {
    let h = default_harness();
    let pacing = PacingPolicy::Throttled {
        batch_size: 1,
        wait_minutes: 10,
        randomize_wait: false,
    };
    let id = stored(&h, request(&["d1", "d2", "d3", "d4"], Some(pacing)));
    let run = h.orchestrator.start(&id).await.unwrap();

    wait_for_progress(&h, "Waiting").await;
    let stopped_at = tokio::time::Instant::now();
    assert!(h.service.stop_campaign());
    run.await.unwrap();

    assert!(stopped_at.elapsed() <= Duration::from_secs(10), "took {:?}", stopped_at.elapsed());
    let c = h.campaigns.get(&id).unwrap().unwrap();
    assert_eq!(c.status, CampaignStatus::Stopped);
    assert_eq!(outcome(&c, "d1"), OutcomeResult::Success);
    for d in ["d2", "d3", "d4"] {
        assert_eq!(outcome(&c, d), OutcomeResult::Cancelled);
    }
    assert_eq!(h.submitter.posts.lock().unwrap().len(), 1);
    assert!(!h.state.flags().is_running);
    assert!(!h.state.flags().is_stopping);
}

#[tokio::test(start_paused = true)]
async fn acquisition_is_retried_then_destination_fails() {
    let h = harness(
        FakeContexts {
            broken: ["d1".to_string()].into(),
            ..Default::default()
        },
        FakeSubmitter::default(),
        FakeEntitlement::new(true, 0),
    );
    let id = stored(&h, request(&["d1", "d2"], Some(PacingPolicy::Continuous)));

    h.orchestrator.start(&id).await.unwrap().await.unwrap();

    assert_eq!(h.contexts.opens.lock().unwrap()["d1"], 3);
    let c = h.campaigns.get(&id).unwrap().unwrap();
    assert_eq!(outcome(&c, "d1"), OutcomeResult::Failure);
    assert!(c.outcomes[0].detail.as_deref().unwrap().contains("3 attempts"));
    assert_eq!(outcome(&c, "d2"), OutcomeResult::Success);
    assert_eq!(c.status, CampaignStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn missing_submit_signal_times_out_as_failure() {
    let h = harness(
        FakeContexts::default(),
        FakeSubmitter {
            behaviour: [("d1".to_string(), Behaviour::Hang)].into(),
            ..Default::default()
        },
        FakeEntitlement::new(false, 5),
    );
    let id = stored(&h, request(&["d1", "d2"], Some(PacingPolicy::Continuous)));

    h.orchestrator.start(&id).await.unwrap().await.unwrap();

    let c = h.campaigns.get(&id).unwrap().unwrap();
    assert_eq!(outcome(&c, "d1"), OutcomeResult::Failure);
    assert!(c.outcomes[0].detail.as_deref().unwrap().contains("120s"));
    assert_eq!(outcome(&c, "d2"), OutcomeResult::Success);
    assert_eq!(h.entitlement.consumed.load(Ordering::SeqCst), 1);
    assert_eq!(h.contexts.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn vanished_campaign_is_never_attempted() {
    let h = default_harness();
    let ghost = CampaignId::from("ghost");

    assert!(matches!(
        h.orchestrator.start(&ghost).await,
        Err(CampaignError::StaleCampaign(_))
    ));
    assert_eq!(h.contexts.opened.load(Ordering::SeqCst), 0);
    assert!(!h.state.flags().is_running);
}

#[tokio::test(start_paused = true)]
async fn deleting_mid_run_aborts_without_writes() {
    let h = default_harness();
    let pacing = PacingPolicy::Throttled {
        batch_size: 1,
        wait_minutes: 5,
        randomize_wait: false,
    };
    let id = stored(&h, request(&["d1", "d2", "d3"], Some(pacing)));
    let run = h.orchestrator.start(&id).await.unwrap();

    wait_for_progress(&h, "Waiting").await;
    h.service.delete_campaign(&id).unwrap();
    run.await.unwrap();

    assert!(h.campaigns.get(&id).unwrap().is_none());
    assert_eq!(h.submitter.posts.lock().unwrap().len(), 1);
    assert!(!h.state.flags().is_running);
}

#[tokio::test(start_paused = true)]
async fn crash_mid_loop_fails_remaining_and_releases() {
    let h = harness(
        FakeContexts::default(),
        FakeSubmitter {
            behaviour: [("d2".to_string(), Behaviour::Panic)].into(),
            ..Default::default()
        },
        FakeEntitlement::new(true, 0),
    );
    let id = stored(&h, request(&["d1", "d2", "d3"], Some(PacingPolicy::Continuous)));

    h.orchestrator.start(&id).await.unwrap().await.unwrap();

    let c = h.campaigns.get(&id).unwrap().unwrap();
    assert_eq!(c.status, CampaignStatus::Failed);
    assert_eq!(outcome(&c, "d1"), OutcomeResult::Success);
    assert_eq!(outcome(&c, "d2"), OutcomeResult::Failure);
    assert_eq!(outcome(&c, "d3"), OutcomeResult::Failure);
    assert!(!h.state.flags().is_running);

    // the context of the crashed attempt is released too
    let all_closed = tokio::time::timeout(Duration::from_secs(5), async {
        while h.contexts.closed.load(Ordering::SeqCst) < h.contexts.opened.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(all_closed.is_ok());
    assert_eq!(h.contexts.opened.load(Ordering::SeqCst), 2);
    assert_eq!(h.contexts.closed.load(Ordering::SeqCst), 2);

    // the slot is usable again
    let reply = h.service.start_campaign(request(&["d9"], None)).await.unwrap();
    assert!(matches!(reply, StartReply::Accepted { .. }));
}

#[tokio::test(start_paused = true)]
async fn exhausted_entitlement_blocks_start() {
    let h = harness(
        FakeContexts::default(),
        FakeSubmitter::default(),
        FakeEntitlement::new(false, 0),
    );

    let reply = h.service.start_campaign(request(&["d1"], None)).await.unwrap();
    assert!(matches!(reply, StartReply::Rejected { .. }));
    assert!(h.campaigns.list().unwrap().is_empty());
    assert_eq!(h.contexts.opened.load(Ordering::SeqCst), 0);
    assert!(!h.state.flags().is_running);
}

#[tokio::test(start_paused = true)]
async fn invalid_requests_are_errors() {
    let h = default_harness();
    assert!(matches!(
        h.service.start_campaign(request(&[], None)).await,
        Err(CampaignError::InvalidRequest(_))
    ));
    assert!(matches!(
        h.service.start_campaign(request(&["a", "a"], None)).await,
        Err(CampaignError::InvalidRequest(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn reset_stale_state_clears_leftover_flags() {
    let h = default_harness();
    let mut c = Campaign::from_request(request(&["d1", "d2"], None), None);
    c.set_status(CampaignStatus::Posting);
    h.campaigns.put(&c).unwrap();
    h.state.try_acquire(&c.id).unwrap();

    h.service.reset_stale_state().unwrap();

    assert!(!h.state.flags().is_running);
    let c = h.campaigns.get(&c.id).unwrap().unwrap();
    assert_eq!(c.status, CampaignStatus::Stopped);
    assert_eq!(c.count(OutcomeResult::Cancelled), 2);
}

#[tokio::test(start_paused = true)]
async fn status_reports_active_campaign() {
    let h = default_harness();
    let pacing = PacingPolicy::Throttled {
        batch_size: 1,
        wait_minutes: 5,
        randomize_wait: false,
    };
    let reply = h
        .service
        .start_campaign(request(&["d1", "d2"], Some(pacing)))
        .await
        .unwrap();
    let StartReply::Accepted { campaign_id } = reply else {
        panic!("expected accepted");
    };

    wait_for_progress(&h, "Waiting").await;
    let status = h.service.status().unwrap();
    assert_eq!(status.campaign_id, Some(campaign_id));
    assert_eq!(status.status, Some(CampaignStatus::Waiting));
    assert!(status.started);
    assert!(!status.done);
}

#[tokio::test(start_paused = true)]
async fn reset_during_start_keeps_the_slot() {
    let hold = Arc::new(Semaphore::new(0));
    let h = harness(
        FakeContexts::default(),
        FakeSubmitter::default(),
        FakeEntitlement {
            hold: Some(hold.clone()),
            ..FakeEntitlement::new(true, 0)
        },
    );
    let first = stored(&h, request(&["a1", "a2"], None));

    let orchestrator = h.orchestrator.clone();
    let pending_id = first.clone();
    let pending = tokio::spawn(async move { orchestrator.start(&pending_id).await });

    // the start now sits in the entitlement fetch, holding the slot
    while h.orchestrator.live_campaign().is_none() {
        tokio::task::yield_now().await;
    }
    assert!(h.state.flags().is_running);

    h.service.reset_stale_state().unwrap();
    assert!(h.state.flags().is_running);
    assert_eq!(h.state.flags().active_campaign_id, Some(first.clone()));

    let reply = h.service.start_campaign(request(&["b1"], None)).await.unwrap();
    assert!(matches!(reply, StartReply::Rejected { .. }));

    hold.add_permits(64);
    pending.await.unwrap().unwrap().await.unwrap();

    // the reset turned into a stop: nothing posted, nothing else active
    let c = h.campaigns.get(&first).unwrap().unwrap();
    assert_eq!(c.status, CampaignStatus::Stopped);
    assert_eq!(c.count(OutcomeResult::Cancelled), 2);
    assert!(h.submitter.posts.lock().unwrap().is_empty());
    let active = h
        .campaigns
        .list()
        .unwrap()
        .iter()
        .filter(|c| c.status.is_active())
        .count();
    assert_eq!(active, 0);
    assert!(!h.state.flags().is_running);
}

#[tokio::test(start_paused = true)]
async fn running_out_of_credits_ends_the_run() {
    let h = harness(
        FakeContexts::default(),
        FakeSubmitter::default(),
        FakeEntitlement::new(false, 1),
    );
    let ids = ["d1", "d2", "d3", "d4", "d5"];
    let id = stored(&h, request(&ids, Some(PacingPolicy::Continuous)));

    h.orchestrator.start(&id).await.unwrap().await.unwrap();

    assert_eq!(h.submitter.posts.lock().unwrap().len(), 1);
    assert_eq!(h.entitlement.consumed.load(Ordering::SeqCst), 1);

    let c = h.campaigns.get(&id).unwrap().unwrap();
    assert_eq!(c.status, CampaignStatus::Stopped);
    assert_eq!(outcome(&c, "d1"), OutcomeResult::Success);
    for d in ["d2", "d3", "d4", "d5"] {
        assert_eq!(outcome(&c, d), OutcomeResult::Cancelled);
    }
    let detail = c.outcomes[1].detail.as_deref().unwrap();
    assert_eq!(detail, CampaignError::EntitlementExhausted.to_string());
    assert_eq!(h.contexts.opened.load(Ordering::SeqCst), 1);
    assert!(!h.state.flags().is_running);
}

#[tokio::test(start_paused = true)]
async fn topped_up_credits_keep_the_run_going() {
    let h = harness(
        FakeContexts::default(),
        FakeSubmitter {
            behaviour: [("d2".to_string(), Behaviour::Hang)].into(),
            ..Default::default()
        },
        FakeEntitlement::new(false, 1),
    );
    let id = stored(&h, request(&["d1", "d2", "d3"], Some(PacingPolicy::Continuous)));
    let run = h.orchestrator.start(&id).await.unwrap();

    // balance hits zero after d1; a purchase lands before the next attempt
    while h.entitlement.consumed.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    *h.entitlement.credits.lock().unwrap() = 3;
    run.await.unwrap();

    let c = h.campaigns.get(&id).unwrap().unwrap();
    assert_eq!(c.status, CampaignStatus::Completed);
    assert_eq!(outcome(&c, "d1"), OutcomeResult::Success);
    assert_eq!(outcome(&c, "d2"), OutcomeResult::Failure);
    assert_eq!(outcome(&c, "d3"), OutcomeResult::Success);
}

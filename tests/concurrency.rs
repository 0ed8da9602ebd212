mod common;

use common::{FakeEngine, Harness, UnreachableRenewals};
use jetstream::application::{ClaimOutcome, LeaseCoordinator, Poller, RunOutcome};
use jetstream::domain::jobs::{JobStatus, JobUpdate, Precondition};
use jetstream::ports::repository::JobRepository;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_concurrent_workers_process_job_once() {
    let h = Harness::new();
    let job = h.submit("videos/u1_clip.mp4").await;
    let engine = FakeEngine::new(3);
    let calls = engine.calls.clone();

    let runners: Vec<_> = (0..5)
        .map(|i| Arc::new(h.runner(&format!("w{}", i), engine.clone())))
        .collect();
    let handles: Vec<_> = runners
        .into_iter()
        .map(|runner| {
            let job = job.clone();
            tokio::spawn(async move { runner.run(&job).await.unwrap() })
        })
        .collect();

    let mut completed = 0;
    let mut skipped = 0;
    for handle in handles {
        match handle.await.unwrap() {
            RunOutcome::Completed { .. } => completed += 1,
            RunOutcome::Skipped => skipped += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(completed, 1);
    assert_eq!(skipped, 4);
    assert_eq!(calls.split.load(Ordering::SeqCst), 1);
    assert_eq!(h.stored(&job).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_terminal_status_is_final() {
    let h = Harness::new();
    let done = h.submit("videos/u1_done.mp4").await;
    let broken = h.submit("videos/u1_broken.mp4").await;

    h.runner("w1", FakeEngine::new(2)).run(&done).await.unwrap();
    let mut failing = FakeEngine::new(2);
    failing.fail_chunk = Some(0);
    h.runner("w1", failing).run(&broken).await.unwrap();
    assert_eq!(h.stored(&done).await.status, JobStatus::Completed);
    assert_eq!(h.stored(&broken).await.status, JobStatus::Failed);

    let engine = FakeEngine::new(2);
    let calls = engine.calls.clone();
    let runner = h.runner("w2", engine);
    for job in [&done, &broken] {
        let current = h.stored(job).await;
        assert!(matches!(runner.run(&current).await.unwrap(), RunOutcome::Skipped));
    }
    assert_eq!(calls.total(), 0);
    assert_eq!(h.stored(&done).await.status, JobStatus::Completed);
    assert_eq!(h.stored(&broken).await.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_poller_drains_pending_jobs() {
    let h = Harness::new();
    let a = h.submit("videos/u1_a.mp4").await;
    let b = h.submit("videos/u2_b.mp4").await;

    let poller = Poller::new(h.runner("w1", FakeEngine::new(2)));
    let outcomes = poller.run_once().await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| matches!(o, RunOutcome::Completed { .. })));
    assert_eq!(h.stored(&a).await.status, JobStatus::Completed);
    assert_eq!(h.stored(&b).await.status, JobStatus::Completed);

    assert!(poller.run_once().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_expired_lease_is_picked_up_by_poller() {
    let mut h = Harness::new();
    h.config.lease_ttl = Some(Duration::from_secs(30));
    let job = h.submit("videos/u1_clip.mp4").await;

    let crashed = LeaseCoordinator::new(h.repo.clone(), "crashed", Some(Duration::from_millis(1)));
    assert!(matches!(crashed.claim(&job).await.unwrap(), ClaimOutcome::Claimed(_)));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let poller = Poller::new(h.runner("rescuer", FakeEngine::new(2)));
    let outcomes = poller.run_once().await.unwrap();
    assert!(matches!(outcomes.as_slice(), [RunOutcome::Completed { .. }]));

    let stored = h.stored(&job).await;
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.lease_owner.as_deref(), Some("rescuer"));
}

#[tokio::test]
async fn test_lost_lease_abandons_job() {
    let mut h = Harness::new();
    h.config.lease_ttl = Some(Duration::from_millis(60));
    let job = h.submit("videos/u1_clip.mp4").await;

    let mut engine = FakeEngine::new(2);
    engine.split_delay = Duration::from_secs(2);
    let runner = h.runner("slow", engine);

    let repo = h.repo.clone();
    let id = job.id.clone();
    let thief = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let steal = JobUpdate::default().with_lease("thief", None);
        assert!(repo
            .compare_and_swap(&id, &Precondition::LeaseHeldBy("slow".to_string()), &steal)
            .await
            .unwrap());
    });

    let outcome = runner.run(&job).await.unwrap();
    thief.await.unwrap();
    assert!(matches!(outcome, RunOutcome::LeaseLost));

    let stored = h.stored(&job).await;
    assert_eq!(stored.status, JobStatus::Processing);
    assert_eq!(stored.lease_owner.as_deref(), Some("thief"));
    assert!(stored.output_key.is_none());
}

#[tokio::test]
async fn test_unrenewable_worker_cannot_overwrite_rescuer() {
    let mut h = Harness::new();
    h.config.lease_ttl = Some(Duration::from_millis(60));
    let job = h.submit("videos/u1_clip.mp4").await;

    let mut stranded = FakeEngine::new(2);
    stranded.split_delay = Duration::from_millis(400);
    stranded.fail_chunk = Some(0);
    let cut_off = h.runner_with(
        "cut-off",
        h.storage.clone(),
        UnreachableRenewals(h.repo.clone()),
        stranded,
    );
    let rescuer = h.runner("rescuer", FakeEngine::new(2));

    let (first, second) = tokio::join!(cut_off.run(&job), async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let current = h.stored(&job).await;
        rescuer.run(&current).await
    });

    assert!(matches!(first.unwrap(), RunOutcome::LeaseLost));
    assert!(matches!(second.unwrap(), RunOutcome::Completed { .. }));

    // Give any straggling write a chance to land.
    tokio::time::sleep(Duration::from_millis(450)).await;
    let stored = h.stored(&job).await;
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.lease_owner.as_deref(), Some("rescuer"));
    assert!(stored.output_key.is_some());
}

//! Chunked job runner integration tests
//!
//! These drive `process_chunk` against in-memory stores and a canned
//! fetcher to cover the resumption contract: bounded chunks, persisted
//! checkpoints, the artifact cache, lease exclusivity, and the two
//! failure policies.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use lineup_ingest::errors::IngestError;
use lineup_ingest::jobs::{
    ChunkBudget, ChunkedJobRunner, JobArtifact, JobKind, JobStatus, SyncJob,
};
use lineup_ingest::models::{EpgChannelRecord, ProviderChannelRecord, StoredChannel, StoredEpgChannel};

use common::{
    CannedFetcher, InMemoryChannelStore, InMemoryEpgStore, InMemoryJobStore, epg_records,
    spool_dir, test_job_config,
};

struct Harness {
    jobs: Arc<InMemoryJobStore>,
    channels: Arc<InMemoryChannelStore>,
    epg: Arc<InMemoryEpgStore>,
    fetcher: Arc<CannedFetcher>,
    runner: ChunkedJobRunner,
    _spool: tempfile::TempDir,
}

fn harness(fetcher: CannedFetcher) -> Harness {
    let jobs = Arc::new(InMemoryJobStore::default());
    let channels = Arc::new(InMemoryChannelStore::default());
    let epg = Arc::new(InMemoryEpgStore::default());
    let fetcher = Arc::new(fetcher);
    let spool = spool_dir();
    let runner = ChunkedJobRunner::new(
        jobs.clone(),
        channels.clone(),
        epg.clone(),
        fetcher.clone(),
        &test_job_config(),
        spool.path().to_path_buf(),
    );
    Harness {
        jobs,
        channels,
        epg,
        fetcher,
        runner,
        _spool: spool,
    }
}

fn budget(max_items: usize) -> ChunkBudget {
    ChunkBudget::new(Duration::from_secs(60), Duration::from_millis(1)).with_max_items(max_items)
}

async fn create_job(h: &Harness, kind: JobKind) -> SyncJob {
    let job = SyncJob::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        kind,
        "http://epg.test/guide.xml.gz".to_string(),
    );
    use lineup_ingest::database::repositories::JobStore;
    h.jobs.create(&job).await.unwrap();
    job
}

// ====== Chunking and resumption ======

#[tokio::test]
async fn test_large_epg_job_completes_across_chunks() {
    let h = harness(CannedFetcher::new(JobArtifact::EpgChannels {
        records: epg_records(10_000),
    }));
    let job = create_job(&h, JobKind::EpgSync).await;

    let mut progress_trace = Vec::new();
    let mut polls = 0;
    loop {
        let done = h.runner.process_chunk(job.id, budget(3000)).await.unwrap();
        polls += 1;
        let row = h.jobs.get(job.id).unwrap();
        progress_trace.push(row.progress);
        if done {
            break;
        }
        assert!(row.progress < 100);
        assert!(!row.status.is_terminal());
    }

    // 10,000 records at 3000 items per chunk: three partial polls, one
    // finishing poll
    assert_eq!(polls, 4);
    // The expensive fetch+parse happened exactly once; later chunks used
    // the cached artifact
    assert_eq!(h.fetcher.fetch_calls.load(Ordering::SeqCst), 1);

    let row = h.jobs.get(job.id).unwrap();
    assert_eq!(row.status, JobStatus::Completed);
    assert_eq!(row.progress, 100);
    assert_eq!(row.processed_items, 10_000);
    assert_eq!(row.total_items, 10_000);
    assert!(row.artifact.is_none());
    assert!(row.artifact_path.is_none());
    assert!(row.claimed_until.is_none());
    assert!(row.error.is_none());

    // Every poll moves progress strictly forward
    for pair in progress_trace.windows(2) {
        assert!(pair[1] > pair[0], "progress stalled or went backwards: {progress_trace:?}");
    }

    assert_eq!(h.epg.all(job.target_id).len(), 10_000);
}

#[tokio::test]
async fn test_completed_job_is_a_noop() {
    let h = harness(CannedFetcher::new(JobArtifact::EpgChannels {
        records: epg_records(3),
    }));
    let mut job = create_job(&h, JobKind::EpgSync).await;
    job.status = JobStatus::Completed;
    job.progress = 100;
    use lineup_ingest::database::repositories::JobStore;
    h.jobs.create(&job).await.unwrap();

    let writes_before = h.jobs.update_calls.load(Ordering::SeqCst);
    let done = h.runner.process_chunk(job.id, budget(1000)).await.unwrap();
    assert!(done);
    assert_eq!(h.jobs.update_calls.load(Ordering::SeqCst), writes_before);
    assert_eq!(h.fetcher.fetch_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let h = harness(CannedFetcher::new(JobArtifact::EpgChannels {
        records: Vec::new(),
    }));
    let err = h
        .runner
        .process_chunk(Uuid::new_v4(), budget(1000))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::NotFound { .. }));
}

#[tokio::test]
async fn test_held_lease_backs_off_without_touching_the_job() {
    let h = harness(CannedFetcher::new(JobArtifact::EpgChannels {
        records: epg_records(5),
    }));
    let mut job = create_job(&h, JobKind::EpgSync).await;
    job.claimed_until = Some(Utc::now() + chrono::Duration::seconds(60));
    use lineup_ingest::database::repositories::JobStore;
    h.jobs.create(&job).await.unwrap();

    let done = h.runner.process_chunk(job.id, budget(1000)).await.unwrap();
    assert!(!done);
    assert_eq!(h.fetcher.fetch_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.jobs.get(job.id).unwrap().status, JobStatus::Pending);
}

// ====== Reconciliation through the runner ======

fn stored_epg(source_id: Uuid, channel_id: &str, display_name: &str) -> StoredEpgChannel {
    let now = Utc::now();
    StoredEpgChannel {
        id: Uuid::new_v4(),
        source_id,
        channel_id: channel_id.to_string(),
        display_name: display_name.to_string(),
        logo_url: None,
        custom_display_name: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn test_resync_preserves_user_owned_fields() {
    let h = harness(CannedFetcher::new(JobArtifact::EpgChannels {
        records: vec![EpgChannelRecord {
            channel_id: "bbc1.uk".to_string(),
            display_name: "BBC One HD".to_string(),
            logo_url: Some("http://logos.test/bbc1.png".to_string()),
        }],
    }));
    let job = create_job(&h, JobKind::EpgSync).await;

    let mut existing = stored_epg(job.target_id, "bbc1.uk", "BBC One");
    existing.custom_display_name = Some("Beeb".to_string());
    let existing_id = existing.id;
    h.epg.seed(existing);

    assert!(h.runner.process_chunk(job.id, budget(1000)).await.unwrap());

    let rows = h.epg.all(job.target_id);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, existing_id);
    assert_eq!(rows[0].display_name, "BBC One HD");
    assert_eq!(rows[0].custom_display_name.as_deref(), Some("Beeb"));
    assert_eq!(rows[0].logo_url.as_deref(), Some("http://logos.test/bbc1.png"));
}

#[tokio::test]
async fn test_sync_removes_channels_the_feed_dropped() {
    let h = harness(CannedFetcher::new(JobArtifact::EpgChannels {
        records: vec![EpgChannelRecord {
            channel_id: "bbc1.uk".to_string(),
            display_name: "BBC One".to_string(),
            logo_url: None,
        }],
    }));
    let job = create_job(&h, JobKind::EpgSync).await;
    h.epg.seed(stored_epg(job.target_id, "bbc1.uk", "BBC One"));
    h.epg.seed(stored_epg(job.target_id, "defunct.uk", "Gone TV"));

    assert!(h.runner.process_chunk(job.id, budget(1000)).await.unwrap());

    let rows = h.epg.all(job.target_id);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].channel_id, "bbc1.uk");
}

#[tokio::test]
async fn test_chunk_size_does_not_change_the_outcome() {
    let records = epg_records(2500);

    let run = |max_items: usize, records: Vec<EpgChannelRecord>| async move {
        let h = harness(CannedFetcher::new(JobArtifact::EpgChannels { records }));
        let job = create_job(&h, JobKind::EpgSync).await;
        h.epg.seed(stored_epg(job.target_id, "defunct.uk", "Gone TV"));
        for _ in 0..20 {
            if h.runner.process_chunk(job.id, budget(max_items)).await.unwrap() {
                break;
            }
        }
        assert_eq!(h.jobs.get(job.id).unwrap().status, JobStatus::Completed);
        h.epg
            .all(job.target_id)
            .into_iter()
            .map(|row| (row.channel_id, row.display_name, row.logo_url))
            .collect::<Vec<_>>()
    };

    let tiny_chunks = run(500, records.clone()).await;
    let one_chunk = run(100_000, records).await;
    assert_eq!(tiny_chunks.len(), 2500);
    assert_eq!(tiny_chunks, one_chunk);
}

// ====== Failure policy ======

#[tokio::test]
async fn test_fetch_failure_marks_the_job_failed() {
    let h = harness(CannedFetcher::failing(IngestError::malformed(
        "root element is not <tv>",
    )));
    let job = create_job(&h, JobKind::EpgSync).await;

    let done = h.runner.process_chunk(job.id, budget(1000)).await.unwrap();
    assert!(done);

    let row = h.jobs.get(job.id).unwrap();
    assert_eq!(row.status, JobStatus::Failed);
    assert!(row.error.as_deref().unwrap().contains("root element is not <tv>"));
    assert!(row.claimed_until.is_none());
}

#[tokio::test]
async fn test_store_failure_retries_from_checkpoint() {
    let h = harness(CannedFetcher::new(JobArtifact::EpgChannels {
        records: epg_records(10),
    }));
    let job = create_job(&h, JobKind::EpgSync).await;
    h.epg.gate.fail_next(1);

    // First poll hits the injected write failure after caching the
    // artifact; the job stays non-terminal
    let done = h.runner.process_chunk(job.id, budget(1000)).await.unwrap();
    assert!(!done);
    let row = h.jobs.get(job.id).unwrap();
    assert!(!row.status.is_terminal());
    assert!(row.has_artifact());

    // Second poll resumes without refetching and finishes
    let done = h.runner.process_chunk(job.id, budget(1000)).await.unwrap();
    assert!(done);
    assert_eq!(h.fetcher.fetch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.jobs.get(job.id).unwrap().status, JobStatus::Completed);
    assert_eq!(h.epg.all(job.target_id).len(), 10);
}

#[tokio::test]
async fn test_job_store_outage_on_claim_retries_next_poll() {
    let h = harness(CannedFetcher::new(JobArtifact::EpgChannels {
        records: epg_records(10),
    }));
    let job = create_job(&h, JobKind::EpgSync).await;
    h.jobs.gate.fail_next(1);

    // The lease claim hits the outage; the chunk yields instead of erroring
    let done = h.runner.process_chunk(job.id, budget(1000)).await.unwrap();
    assert!(!done);
    let row = h.jobs.get(job.id).unwrap();
    assert_eq!(row.status, JobStatus::Pending);
    assert!(row.claimed_until.is_none());
    assert_eq!(h.fetcher.fetch_calls.load(Ordering::SeqCst), 0);

    // Store is back; the next poll claims and finishes normally
    let done = h.runner.process_chunk(job.id, budget(1000)).await.unwrap();
    assert!(done);
    assert_eq!(h.jobs.get(job.id).unwrap().status, JobStatus::Completed);
    assert_eq!(h.epg.all(job.target_id).len(), 10);
}

// ====== Mapping jobs ======

fn stored_channel(source_id: Uuid, stream_id: &str, name: &str) -> StoredChannel {
    let now = Utc::now();
    StoredChannel {
        id: Uuid::new_v4(),
        source_id,
        stream_id: stream_id.to_string(),
        name: name.to_string(),
        stream_url: format!("http://host.test/live/{stream_id}.ts"),
        category_id: None,
        logo_url: None,
        epg_channel_id: None,
        auto_epg_channel_id: None,
        custom_epg_channel_id: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn test_mapping_job_assigns_auto_epg_ids() {
    let h = harness(CannedFetcher::new(JobArtifact::EpgChannels {
        records: Vec::new(),
    }));
    let job = create_job(&h, JobKind::MappingReconcile).await;

    h.epg.seed(stored_epg(job.owner_id, "bbc1.uk", "BBC One"));
    h.epg.seed(stored_epg(job.owner_id, "itv.uk", "ITV"));

    // Name match after quality-suffix stripping
    h.channels
        .seed(stored_channel(job.target_id, "101", "BBC One FHD"));
    // Provider hint pointing at a real guide channel
    let mut hinted = stored_channel(job.target_id, "102", "Totally Different Name");
    hinted.epg_channel_id = Some("itv.uk".to_string());
    h.channels.seed(hinted);
    // User mapping must survive the recompute
    let mut pinned = stored_channel(job.target_id, "103", "BBC One");
    pinned.custom_epg_channel_id = Some("bbc1.uk".to_string());
    h.channels.seed(pinned);
    // Nothing to match
    h.channels
        .seed(stored_channel(job.target_id, "104", "Obscure Shopping"));

    let done = h.runner.process_chunk(job.id, budget(1000)).await.unwrap();
    assert!(done);
    // Mapping jobs never fetch
    assert_eq!(h.fetcher.fetch_calls.load(Ordering::SeqCst), 0);

    let rows = h.channels.all(job.target_id);
    let by_stream = |id: &str| rows.iter().find(|r| r.stream_id == id).unwrap();
    assert_eq!(by_stream("101").auto_epg_channel_id.as_deref(), Some("bbc1.uk"));
    assert_eq!(by_stream("102").auto_epg_channel_id.as_deref(), Some("itv.uk"));
    assert_eq!(by_stream("103").auto_epg_channel_id.as_deref(), Some("bbc1.uk"));
    assert_eq!(by_stream("103").custom_epg_channel_id.as_deref(), Some("bbc1.uk"));
    assert!(by_stream("104").auto_epg_channel_id.is_none());

    let row = h.jobs.get(job.id).unwrap();
    assert_eq!(row.status, JobStatus::Completed);
    assert_eq!(row.total_items, 4);
}

// ====== Provider channel imports ======

#[tokio::test]
async fn test_provider_sync_imports_and_updates() {
    let h = harness(CannedFetcher::new(JobArtifact::ProviderChannels {
        records: vec![
            ProviderChannelRecord {
                stream_id: "7".to_string(),
                name: "Sky Sports Main Event".to_string(),
                stream_url: "http://host.test/live/u/p/7.ts".to_string(),
                category_id: Some("4".to_string()),
                logo_url: None,
                epg_channel_id: Some("skysports.uk".to_string()),
            },
            ProviderChannelRecord {
                stream_id: "8".to_string(),
                name: "Sky Cinema".to_string(),
                stream_url: "http://host.test/live/u/p/8.ts".to_string(),
                category_id: Some("5".to_string()),
                logo_url: None,
                epg_channel_id: None,
            },
        ],
    }));
    let job = create_job(&h, JobKind::XtreamSync).await;

    // Channel 7 exists under an old name with a user pin; 9 is stale
    let mut existing = stored_channel(job.target_id, "7", "Sky Sports 1");
    existing.custom_epg_channel_id = Some("custom.uk".to_string());
    h.channels.seed(existing);
    h.channels.seed(stored_channel(job.target_id, "9", "Old Channel"));

    let done = h.runner.process_chunk(job.id, budget(1000)).await.unwrap();
    assert!(done);

    let rows = h.channels.all(job.target_id);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].stream_id, "7");
    assert_eq!(rows[0].name, "Sky Sports Main Event");
    assert_eq!(rows[0].epg_channel_id.as_deref(), Some("skysports.uk"));
    assert_eq!(rows[0].custom_epg_channel_id.as_deref(), Some("custom.uk"));
    assert_eq!(rows[1].stream_id, "8");
}

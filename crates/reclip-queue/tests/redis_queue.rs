//! Redis queue tests. Require a running Redis (`REDIS_URL`).
//!
//! Run with `cargo test -p reclip-queue -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use reclip_models::{JobPatch, JobStatus, ProjectId};
use reclip_queue::{JobQueue, JobStore, QueueConfig, STALE_JOB_REASON};
use uuid::Uuid;

fn isolated_queue() -> JobQueue {
    let mut config = QueueConfig::from_env();
    config.key_prefix = format!("reclip-test-{}", Uuid::new_v4());
    JobQueue::new(config).expect("redis client")
}

#[tokio::test]
#[ignore]
async fn test_redis_lifecycle() {
    let queue = isolated_queue();
    let project = ProjectId::from("project-1");

    let job = queue
        .enqueue(project.clone(), "https://cdn.example.com/a.mp4".into())
        .await
        .unwrap();
    assert_eq!(queue.queued_len().await.unwrap(), 1);

    let claimed = queue.dequeue_next().await.unwrap().unwrap();
    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.status, JobStatus::Processing);
    assert_eq!(claimed.attempts, 1);

    assert!(queue
        .update(&job.id, JobPatch::progress(40).with_external_task_id("task-1"))
        .await
        .unwrap());
    assert!(queue
        .update(&job.id, JobPatch::progress(20).with_external_task_id("task-2"))
        .await
        .unwrap());

    let stored = queue.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.progress, 40);
    assert_eq!(stored.external_task_id.as_deref(), Some("task-1"));

    assert!(queue.complete(&job.id, Vec::new()).await.unwrap());
    assert!(!queue.fail(&job.id, "late").await.unwrap());

    let stored = queue.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.progress, 100);
    assert_eq!(queue.processing_len().await.unwrap(), 0);

    assert!(queue.remove_job(&job.id, &project).await.unwrap());
    assert!(queue.get(&job.id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn test_redis_concurrent_claims() {
    let queue = Arc::new(isolated_queue());
    let job = queue
        .enqueue(ProjectId::from("p"), "https://cdn.example.com/a.mp4".into())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let queue = Arc::clone(&queue);
        handles.push(tokio::spawn(async move { queue.dequeue_next().await.unwrap() }));
    }

    let mut claimed = Vec::new();
    for handle in handles {
        if let Some(job) = handle.await.unwrap() {
            claimed.push(job.id);
        }
    }
    assert_eq!(claimed, vec![job.id]);
}

#[tokio::test]
#[ignore]
async fn test_redis_stale_cleanup() {
    let mut config = QueueConfig::from_env().with_stale_threshold(Duration::from_secs(1));
    config.key_prefix = format!("reclip-test-{}", Uuid::new_v4());
    let queue = JobQueue::new(config).unwrap();

    let job = queue
        .enqueue(ProjectId::from("p"), "https://cdn.example.com/a.mp4".into())
        .await
        .unwrap();
    queue.dequeue_next().await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(queue.cleanup_stale_jobs().await.unwrap(), 1);
    let stored = queue.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some(STALE_JOB_REASON));
}

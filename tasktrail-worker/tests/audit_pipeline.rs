//! End-to-end audit pipeline: task service → dispatcher → queue → consumer → store

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tasktrail_shared::audit::{AuditDispatcher, AuditMessage, DispatcherConfig};
use tasktrail_shared::models::task::{CreateTask, Task, TaskStatus, TaskUpdate};
use tasktrail_shared::models::task_audit::{AuditAction, NewTaskAudit, TaskAudit};
use tasktrail_shared::models::user::CreateUser;
use tasktrail_shared::queue::{AuditPublisher, MemoryQueue, AUDIT_QUEUE};
use tasktrail_shared::repository::{
    InMemoryStore, RepositoryResult, TaskAuditRepository, UserRepository,
};
use tasktrail_shared::service::TaskService;
use tasktrail_worker::consumer::{AuditConsumer, ConsumerConfig, ConsumerStats};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn fast_config() -> ConsumerConfig {
    ConsumerConfig {
        block: Duration::from_millis(50),
        reconnect_delay: Duration::from_millis(10),
        retry_delay: Duration::ZERO,
        ..Default::default()
    }
}

type Running = JoinHandle<ConsumerStats>;

fn start(
    queue: Arc<MemoryQueue>,
    audits: Arc<dyn TaskAuditRepository>,
    config: ConsumerConfig,
    shutdown: CancellationToken,
) -> Running {
    let mut consumer = AuditConsumer::new(queue, audits, config);
    tokio::spawn(async move {
        consumer.run(shutdown).await;
        consumer.stats()
    })
}

async fn wait_for_audits(store: &InMemoryStore, count: usize) -> Vec<TaskAudit> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let audits = store.audits().await;
            if audits.len() >= count {
                return audits;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("audit rows did not arrive in time")
}

async fn stop(shutdown: CancellationToken, running: Running) -> ConsumerStats {
    shutdown.cancel();
    running.await.unwrap()
}

fn sample_message(entity_id: i64) -> AuditMessage {
    let task = Task {
        id: entity_id,
        title: "sample".to_string(),
        description: String::new(),
        status: TaskStatus::Pending,
        owner_id: 1,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    AuditMessage::created(1, &task)
}

fn parse(column: &Option<String>) -> Value {
    serde_json::from_str(column.as_deref().unwrap()).unwrap()
}

#[tokio::test]
async fn test_task_mutations_arrive_as_audit_rows() {
    let store = InMemoryStore::new();
    let queue = Arc::new(MemoryQueue::declared(AUDIT_QUEUE));
    let (dispatcher, handle) = AuditDispatcher::spawn(queue.clone(), DispatcherConfig::default());
    let service = TaskService::new(Arc::new(store.clone()), Arc::new(store.clone()), dispatcher);

    let owner = store
        .create_user(CreateUser {
            name: "owner".to_string(),
            email: None,
            password_hash: String::new(),
        })
        .await
        .unwrap();

    let task = service
        .create_task(
            owner.id,
            CreateTask {
                title: "A".to_string(),
                description: "desc".to_string(),
                status: TaskStatus::Pending,
                owner_id: 0,
            },
        )
        .await
        .unwrap();
    service
        .update_task(
            task.id,
            owner.id,
            TaskUpdate {
                title: Some("B".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    service.delete_task(task.id, owner.id).await.unwrap();
    handle.shutdown(Duration::from_secs(1)).await;

    let shutdown = CancellationToken::new();
    let running = start(queue.clone(), Arc::new(store.clone()), fast_config(), shutdown.clone());
    wait_for_audits(&store, 3).await;
    let stats = stop(shutdown, running).await;
    assert_eq!(stats.inserted, 3);

    let rows = store.list_audits("task", task.id).await.unwrap();
    let actions: Vec<AuditAction> = rows.iter().map(|r| r.action).collect();
    assert_eq!(
        actions,
        vec![AuditAction::Create, AuditAction::Update, AuditAction::Delete]
    );

    let created = &rows[0];
    assert_eq!(created.user_id, owner.id);
    assert!(created.old_values.is_none());
    assert_eq!(
        parse(&created.new_values),
        json!({"title": "A", "description": "desc", "status": "pending", "owner_id": owner.id})
    );

    let updated = &rows[1];
    assert_eq!(parse(&updated.changes), json!({"title": {"old": "A", "new": "B"}}));
    assert_eq!(parse(&updated.old_values)["description"], json!("desc"));

    let deleted = &rows[2];
    assert!(deleted.new_values.is_none());
    assert_eq!(parse(&deleted.old_values)["title"], json!("B"));

    assert!(rows.iter().all(|r| r.message_id.is_some()));
    assert_eq!(queue.acked().len(), 3);
    assert_eq!(queue.unacked_len(), 0);
}

#[tokio::test]
async fn test_failed_insert_is_retried_into_one_row() {
    let store = InMemoryStore::new();
    store.fail_next_audit_inserts(2);
    let queue = Arc::new(MemoryQueue::declared(AUDIT_QUEUE));
    queue.publish(&sample_message(7)).await.unwrap();

    let shutdown = CancellationToken::new();
    let running = start(queue.clone(), Arc::new(store.clone()), fast_config(), shutdown.clone());
    wait_for_audits(&store, 1).await;
    let stats = stop(shutdown, running).await;

    assert_eq!(stats.requeued, 2);
    assert_eq!(store.audits().await.len(), 1);
    assert_eq!(queue.acked().len(), 1);
}

#[tokio::test]
async fn test_exhausted_deliveries_are_dead_lettered() {
    let store = InMemoryStore::new();
    store.fail_next_audit_inserts(10);
    let queue = Arc::new(MemoryQueue::declared(AUDIT_QUEUE));
    queue.publish(&sample_message(7)).await.unwrap();

    let shutdown = CancellationToken::new();
    let config = ConsumerConfig {
        max_deliveries: Some(3),
        ..fast_config()
    };
    let running = start(queue.clone(), Arc::new(store.clone()), config, shutdown.clone());

    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.dead_letters().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    let stats = stop(shutdown, running).await;

    assert_eq!(stats.requeued, 2);
    assert_eq!(stats.dead_lettered, 1);
    assert!(store.audits().await.is_empty());
    assert_eq!(queue.ready_len(), 0);
}

#[tokio::test]
async fn test_malformed_payload_dropped_and_consumer_continues() {
    let store = InMemoryStore::new();
    let queue = Arc::new(MemoryQueue::declared(AUDIT_QUEUE));
    let poison = queue.publish_raw("definitely not json");
    queue.publish(&sample_message(8)).await.unwrap();

    let shutdown = CancellationToken::new();
    let running = start(queue.clone(), Arc::new(store.clone()), fast_config(), shutdown.clone());
    let rows = wait_for_audits(&store, 1).await;
    let stats = stop(shutdown, running).await;

    assert_eq!(rows[0].entity_id, 8);
    assert_eq!(queue.dropped(), vec![poison]);
    assert_eq!(stats.dropped, 1);
}

#[tokio::test]
async fn test_reconnects_after_receive_failure() {
    let store = InMemoryStore::new();
    let queue = Arc::new(MemoryQueue::declared(AUDIT_QUEUE));
    queue.fail_next_receives(2);
    queue.publish(&sample_message(9)).await.unwrap();

    let shutdown = CancellationToken::new();
    let running = start(queue.clone(), Arc::new(store.clone()), fast_config(), shutdown.clone());
    wait_for_audits(&store, 1).await;
    let stats = stop(shutdown, running).await;

    assert_eq!(stats.reconnects, 2);
    assert_eq!(stats.inserted, 1);
}

/// Audit repository whose inserts wait for the test to release them
struct GatedAudits {
    inner: InMemoryStore,
    started: Notify,
    gate: Semaphore,
}

#[async_trait]
impl TaskAuditRepository for GatedAudits {
    async fn insert_audit(&self, data: NewTaskAudit) -> RepositoryResult<bool> {
        self.started.notify_one();
        self.gate.acquire().await.unwrap().forget();
        self.inner.insert_audit(data).await
    }

    async fn list_audits(
        &self,
        entity_type: &str,
        entity_id: i64,
    ) -> RepositoryResult<Vec<TaskAudit>> {
        self.inner.list_audits(entity_type, entity_id).await
    }
}

#[tokio::test]
async fn test_shutdown_finishes_in_flight_message_only() {
    let store = InMemoryStore::new();
    let audits = Arc::new(GatedAudits {
        inner: store.clone(),
        started: Notify::new(),
        gate: Semaphore::new(0),
    });
    let queue = Arc::new(MemoryQueue::declared(AUDIT_QUEUE));
    for id in 1..=3 {
        queue.publish(&sample_message(id)).await.unwrap();
    }

    let shutdown = CancellationToken::new();
    let running = start(queue.clone(), audits.clone(), fast_config(), shutdown.clone());

    audits.started.notified().await;
    shutdown.cancel();
    audits.gate.add_permits(3);

    let stats = running.await.unwrap();

    assert_eq!(stats.inserted, 1);
    assert_eq!(store.audits().await.len(), 1);
    assert_eq!(queue.acked().len(), 1);
    assert_eq!(queue.ready_len(), 2, "unprocessed deliveries go back to the queue");
}

#[tokio::test]
async fn test_passive_consumer_waits_for_queue_to_appear() {
    let store = InMemoryStore::new();
    let queue = Arc::new(MemoryQueue::new(AUDIT_QUEUE));
    let config = ConsumerConfig {
        declare_mode: tasktrail_shared::queue::DeclareMode::Passive,
        ..fast_config()
    };

    let shutdown = CancellationToken::new();
    let running = start(queue.clone(), Arc::new(store.clone()), config, shutdown.clone());

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!running.is_finished(), "consumer gave up on the missing queue");

    // The first publish creates the stream
    queue.publish(&sample_message(11)).await.unwrap();
    let rows = wait_for_audits(&store, 1).await;
    let stats = stop(shutdown, running).await;

    assert_eq!(rows[0].entity_id, 11);
    assert!(stats.reconnects >= 1);
    assert_eq!(stats.inserted, 1);
}

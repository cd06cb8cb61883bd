use serde_json::json;

use super::*;
use crate::db::Database;
use crate::task::kind;

async fn store() -> TaskStore {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();
    TaskStore::new(db)
}

#[tokio::test]
async fn create_starts_queued() {
    let tasks = store().await;
    let task = tasks
        .create(kind::WORK, json!({"message": "do"}))
        .await
        .unwrap();

    assert_eq!(task.state, TaskState::Queued);
    assert!(task.claimed_by.is_none());

    let loaded = tasks.get(&task.task_id).await.unwrap().unwrap();
    assert_eq!(loaded.payload["message"], "do");
}

#[tokio::test]
async fn get_missing_returns_none() {
    let tasks = store().await;
    assert!(tasks.get("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn claim_moves_to_running_with_lease() {
    let tasks = store().await;
    let task = tasks.create(kind::WORK, json!({"message": "do"})).await.unwrap();

    let claimed = tasks
        .claim(&TaskFilter::by_id(&task.task_id), "main", 30)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(claimed.state, TaskState::Running);
    assert_eq!(claimed.claimed_by.as_deref(), Some("main"));
    assert!(claimed.claim_expires_at.unwrap() > claimed.updated_at);
}

#[tokio::test]
async fn live_lease_blocks_second_claimer() {
    let tasks = store().await;
    let task = tasks.create(kind::WORK, json!({"message": "do"})).await.unwrap();

    tasks
        .claim(&TaskFilter::by_id(&task.task_id), "a", 30)
        .await
        .unwrap()
        .unwrap();

    let second = tasks
        .claim(&TaskFilter::by_id(&task.task_id), "b", 30)
        .await
        .unwrap();
    assert!(second.is_none(), "unexpired lease must not be reclaimed");
}

#[tokio::test]
async fn expired_lease_is_reclaimable() {
    let tasks = store().await;
    let task = tasks.create(kind::WORK, json!({"message": "do"})).await.unwrap();

    tasks
        .claim(&TaskFilter::by_id(&task.task_id), "a", 30)
        .await
        .unwrap()
        .unwrap();

    // Age the lease into the past.
    tasks
        .update(
            &task.task_id,
            TaskPatch {
                claim_expires_at: Some(Some(1)),
                ..TaskPatch::default()
            },
        )
        .await
        .unwrap()
        .unwrap();

    let reclaimed = tasks
        .claim(&TaskFilter::by_id(&task.task_id), "b", 30)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reclaimed.claimed_by.as_deref(), Some("b"));
}

#[tokio::test]
async fn claim_by_type_is_fifo() {
    let tasks = store().await;
    let first = tasks.create(kind::WORK, json!({"message": "1"})).await.unwrap();
    let second = tasks.create(kind::WORK, json!({"message": "2"})).await.unwrap();

    let claimed = tasks
        .claim(&TaskFilter::by_type(kind::WORK), "main", 30)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.task_id, first.task_id);

    let claimed = tasks
        .claim(&TaskFilter::by_type(kind::WORK), "main", 30)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.task_id, second.task_id);

    assert!(
        tasks
            .claim(&TaskFilter::by_type(kind::WORK), "main", 30)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn claim_ignores_terminal_tasks() {
    let tasks = store().await;
    let task = tasks.create(kind::WORK, json!({"message": "do"})).await.unwrap();
    tasks.claim(&TaskFilter::by_id(&task.task_id), "m", 30).await.unwrap();
    tasks.complete(&task.task_id).await.unwrap().unwrap();

    assert!(
        tasks
            .claim(&TaskFilter::by_id(&task.task_id), "m", 30)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn complete_clears_lease() {
    let tasks = store().await;
    let task = tasks.create(kind::WORK, json!({"message": "do"})).await.unwrap();
    tasks.claim(&TaskFilter::by_id(&task.task_id), "m", 30).await.unwrap();

    let done = tasks.complete(&task.task_id).await.unwrap().unwrap();
    assert_eq!(done.state, TaskState::Done);
    assert!(done.claimed_by.is_none());
    assert!(done.claim_expires_at.is_none());
}

#[tokio::test]
async fn terminal_states_are_sticky() {
    let tasks = store().await;
    let task = tasks.create(kind::WORK, json!({"message": "do"})).await.unwrap();
    tasks.complete(&task.task_id).await.unwrap().unwrap();

    // Neither a second complete nor a fail moves the task again.
    assert!(tasks.complete(&task.task_id).await.unwrap().is_none());
    assert!(
        tasks
            .fail(&task.task_id, json!({"code": "X"}))
            .await
            .unwrap()
            .is_none()
    );

    let loaded = tasks.get(&task.task_id).await.unwrap().unwrap();
    assert_eq!(loaded.state, TaskState::Done);
}

#[tokio::test]
async fn fail_merges_error_into_payload() {
    let tasks = store().await;
    let task = tasks.create(kind::WORK, json!({"message": "do"})).await.unwrap();

    let failed = tasks
        .fail(&task.task_id, json!({"code": "WORKER_TIMEOUT", "message": "boom"}))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(failed.state, TaskState::Failed);
    assert_eq!(failed.payload["error"]["code"], "WORKER_TIMEOUT");
    assert_eq!(failed.payload["message"], "do");
}

#[tokio::test]
async fn update_deep_merges_payload() {
    let tasks = store().await;
    let task = tasks
        .create(kind::WORK, json!({"message": "do", "meta": {"channel_id": 1, "keep": true}}))
        .await
        .unwrap();

    let updated = tasks
        .update(
            &task.task_id,
            TaskPatch {
                payload: Some(json!({"meta": {"channel_id": 2}, "run_at": "2030-01-01T00:00:00Z"})),
                ..TaskPatch::default()
            },
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.payload["meta"]["channel_id"], 2);
    assert_eq!(updated.payload["meta"]["keep"], true);
    assert_eq!(updated.payload["message"], "do");
    assert_eq!(updated.payload["run_at"], "2030-01-01T00:00:00Z");
    assert!(updated.updated_at >= task.updated_at);
}

#[tokio::test]
async fn update_missing_returns_none() {
    let tasks = store().await;
    assert!(
        tasks
            .update("nope", TaskPatch::default())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn list_filters_by_type_and_state() {
    let tasks = store().await;
    tasks.create(kind::WORK, json!({"message": "a"})).await.unwrap();
    let b = tasks.create(kind::WORK, json!({"message": "b"})).await.unwrap();
    tasks.create(kind::NOTIFICATION, json!({"message": "n"})).await.unwrap();
    tasks.claim(&TaskFilter::by_id(&b.task_id), "m", 30).await.unwrap();

    let queued_work = tasks
        .list(Some(kind::WORK), Some(TaskState::Queued))
        .await
        .unwrap();
    assert_eq!(queued_work.len(), 1);
    assert_eq!(queued_work[0].payload["message"], "a");

    let all = tasks.list(None, None).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[test]
fn merge_patch_replaces_non_objects() {
    let mut target = json!({"a": [1, 2], "b": {"c": 1}});
    merge_patch(&mut target, json!({"a": [3], "b": {"d": 2}}));
    assert_eq!(target, json!({"a": [3], "b": {"c": 1, "d": 2}}));
}

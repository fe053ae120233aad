use std::sync::Arc;

use taskdeck_core::auth::{AuthGate, SessionToken};
use taskdeck_core::datastore::DataStore;
use taskdeck_core::error::StoreError;
use taskdeck_core::filter::{StatusFilter, derive_view, group_by_status};
use taskdeck_core::store::{LoadOutcome, TaskStore};
use taskdeck_core::sync::{Backend, LocalSyncClient};
use taskdeck_core::task::{TaskDraft, TaskPatch, TaskStatus};
use tempfile::tempdir;

fn open_store(datastore: &DataStore) -> TaskStore<Backend> {
    let auth = Arc::new(AuthGate::persistent(datastore.clone()).expect("auth gate"));
    let client = LocalSyncClient::open(datastore.clone()).expect("local client");
    TaskStore::new(Backend::Local(client), auth)
}

#[tokio::test]
async fn local_collection_survives_reopen() {
    let temp = tempdir().expect("tempdir");
    let datastore = DataStore::open(temp.path()).expect("open datastore");

    let store = open_store(&datastore);
    assert_eq!(
        store.add(TaskDraft::new("Buy milk", "two litres")).await,
        Err(StoreError::Unauthenticated)
    );

    store
        .auth()
        .establish(SessionToken::new("local").expect("token"))
        .expect("establish session");

    let milk = store
        .add(TaskDraft::new("Buy milk", "two litres"))
        .await
        .expect("add milk");
    let mut draft = TaskDraft::new("Call plumber", "kitchen sink");
    draft.due_date = Some("2026-04-01".to_string());
    let plumber = store.add(draft).await.expect("add plumber");
    store.mark_completed(&milk.id).await.expect("complete milk");
    store
        .update(
            &plumber.id,
            TaskPatch {
                status: Some(TaskStatus::InProgress),
                ..TaskPatch::default()
            },
        )
        .await
        .expect("start plumber");

    let reopened = open_store(&datastore);
    assert!(reopened.auth().is_authenticated());
    assert_eq!(
        reopened.load().await.expect("load"),
        LoadOutcome::Applied { count: 2 }
    );

    let tasks = reopened.list();
    assert_eq!(tasks[0].id, milk.id);
    assert_eq!(tasks[0].status, TaskStatus::Completed);
    assert_eq!(tasks[1].status, TaskStatus::InProgress);
    assert_eq!(tasks[1].due_date, plumber.due_date);

    let groups = group_by_status(&tasks);
    assert_eq!(groups.get(TaskStatus::Pending).len(), 0);
    assert_eq!(groups.total(), 2);

    let view = derive_view(&tasks, "SINK", StatusFilter::Only(TaskStatus::InProgress));
    assert_eq!(view.len(), 1);

    reopened.delete(&milk.id).await.expect("delete milk");
    assert_eq!(datastore.load_tasks().expect("load tasks").len(), 1);
}

#[tokio::test]
async fn logout_blocks_further_mutations() {
    let temp = tempdir().expect("tempdir");
    let datastore = DataStore::open(temp.path()).expect("open datastore");
    let store = open_store(&datastore);
    store
        .auth()
        .establish(SessionToken::new("local").expect("token"))
        .expect("establish session");

    let task = store
        .add(TaskDraft::new("Walk dog", "around the block"))
        .await
        .expect("add");

    store.auth().logout().expect("logout");
    assert_eq!(
        store.delete(&task.id).await,
        Err(StoreError::Unauthenticated)
    );
    assert_eq!(store.list().len(), 1);
    assert!(datastore.load_token().expect("load token").is_none());
}

#[tokio::test]
async fn task_text_is_stored_as_entered() {
    let temp = tempdir().expect("tempdir");
    let datastore = DataStore::open(temp.path()).expect("open datastore");
    let store = open_store(&datastore);
    store
        .auth()
        .establish(SessionToken::new("local").expect("token"))
        .expect("establish session");

    let draft = TaskDraft::new("  Buy Milk ", "two litres ");
    store.add(draft.clone()).await.expect("add");

    let tasks = store.list();
    assert_eq!(tasks[0].title, draft.title);
    assert_eq!(tasks[0].description, draft.description);

    let saved = datastore.load_tasks().expect("load tasks");
    assert_eq!(saved[0].title, draft.title);
}


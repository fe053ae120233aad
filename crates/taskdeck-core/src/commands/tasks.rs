use tracing::{
  debug,
  info,
  instrument
};

use super::App;
use crate::filter::{
  SearchBox,
  StatusFilter,
  derive_view,
  group_by_status
};
use crate::store::LoadOutcome;
use crate::task::{
  TaskDraft,
  TaskId,
  TaskPatch,
  TaskStatus
};

#[instrument(skip(app))]
pub(super) async fn cmd_list(
  app: &App,
  query: Option<&str>,
  status: StatusFilter,
  group: bool
) -> anyhow::Result<()> {
  info!("command list");
  refresh(app).await?;

  let snapshot = app.store.list();
  let view = derive_view(
    &snapshot,
    query.unwrap_or_default(),
    status
  );
  debug!(
    total = snapshot.len(),
    shown = view.len(),
    "derived list view"
  );

  if group {
    app.renderer.print_groups(
      &group_by_status(&view),
      app.today()
    )
  } else {
    app
      .renderer
      .print_task_table(&view, app.today())
  }
}

#[instrument(skip(app))]
pub(super) async fn cmd_show(
  app: &App,
  id: String
) -> anyhow::Result<()> {
  info!("command show");
  let task = app
    .store
    .fetch(&TaskId::new(id))
    .await?;
  app.renderer.print_task_info(&task)
}

#[instrument(skip(app, description, due))]
pub(super) async fn cmd_add(
  app: &App,
  title: String,
  description: String,
  due: Option<String>,
  status: Option<TaskStatus>
) -> anyhow::Result<()> {
  info!("command add");
  refresh(app).await?;

  let draft = TaskDraft {
    title,
    description,
    due_date: due,
    status
  };
  let task = app.store.add(draft).await?;
  println!("Created task {}.", task.id);
  Ok(())
}

#[instrument(skip(
  app,
  title,
  description,
  due
))]
pub(super) async fn cmd_edit(
  app: &App,
  id: String,
  title: Option<String>,
  description: Option<String>,
  due: Option<Option<String>>,
  status: Option<TaskStatus>
) -> anyhow::Result<()> {
  info!("command edit");
  refresh(app).await?;

  let patch = TaskPatch {
    title,
    description,
    due_date: due,
    status
  };
  let task = app
    .store
    .update(&TaskId::new(id), patch)
    .await?;
  println!("Modified task {}.", task.id);
  Ok(())
}

#[instrument(skip(app))]
pub(super) async fn cmd_done(
  app: &App,
  id: String
) -> anyhow::Result<()> {
  info!("command done");
  refresh(app).await?;

  let task = app
    .store
    .mark_completed(&TaskId::new(id))
    .await?;
  println!(
    "Completed task {} '{}'.",
    task.id, task.title
  );
  Ok(())
}

#[instrument(skip(app))]
pub(super) async fn cmd_delete(
  app: &App,
  id: String
) -> anyhow::Result<()> {
  info!("command delete");
  refresh(app).await?;

  let id = TaskId::new(id);
  app.store.delete(&id).await?;
  println!("Deleted task {id}.");
  Ok(())
}

#[instrument(skip(app, queries))]
pub(super) async fn cmd_search(
  app: &App,
  queries: Vec<String>,
  status: StatusFilter
) -> anyhow::Result<()> {
  info!(
    keystrokes = queries.len(),
    "command search"
  );
  refresh(app).await?;

  let mut search =
    SearchBox::new(app.cfg.debounce);
  for query in queries {
    search.input(query);
  }

  let snapshot = app.store.list();
  let Some((query, view)) = search
    .next_view(&snapshot, status)
    .await
  else {
    return Ok(());
  };

  println!("Results for {query:?}:");
  app
    .renderer
    .print_task_table(&view, app.today())
}

/// Loads the collection in the
/// background and waits for it.
async fn refresh(
  app: &App
) -> anyhow::Result<()> {
  let handle = app.store.spawn_load();
  match handle.outcome().await {
    | Some(Ok(LoadOutcome::Applied {
      count
    })) => {
      debug!(count, "collection refreshed");
    }
    | Some(Ok(LoadOutcome::Stale)) => {
      debug!(
        "refresh overtaken by a local \
         change"
      );
    }
    | Some(Err(err)) => {
      return Err(err.into());
    }
    | None => {
      debug!("refresh cancelled");
    }
  }
  Ok(())
}

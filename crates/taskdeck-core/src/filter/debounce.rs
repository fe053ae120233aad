use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{
  debug,
  trace
};

use super::{
  StatusFilter,
  derive_view
};
use crate::task::Task;

pub const DEFAULT_WINDOW: Duration =
  Duration::from_millis(300);

#[derive(Debug)]
struct Pending<T> {
  generation: u64,
  value:      T
}

/// Collapses bursts of values into one
/// delivery of the latest, once the
/// window has passed without a newer
/// push. Delivered values arrive on the
/// receiver returned by `new`.
///
/// Must be used inside a tokio runtime.
#[derive(Debug)]
pub struct Debouncer<T> {
  window:     Duration,
  slot:       Arc<Mutex<Option<Pending<T>>>>,
  timer:      Option<JoinHandle<()>>,
  generation: u64,
  output:     mpsc::UnboundedSender<T>
}

impl<T> Debouncer<T>
where
  T: Send + 'static
{
  pub fn new(
    window: Duration
  ) -> (Self, mpsc::UnboundedReceiver<T>)
  {
    let (output, receiver) =
      mpsc::unbounded_channel();
    let debouncer = Self {
      window,
      slot: Arc::new(Mutex::new(None)),
      timer: None,
      generation: 0,
      output
    };
    (debouncer, receiver)
  }

  #[must_use]
  pub fn window(&self) -> Duration {
    self.window
  }

  /// Replaces any pending value and
  /// restarts the window.
  pub fn push(&mut self, value: T) {
    self.stop_timer();
    self.generation += 1;
    let generation = self.generation;
    *self.slot.lock() = Some(Pending {
      generation,
      value
    });

    let slot = Arc::clone(&self.slot);
    let output = self.output.clone();
    let window = self.window;
    self.timer =
      Some(tokio::spawn(async move {
        tokio::time::sleep(window).await;
        let due = {
          let mut slot = slot.lock();
          match slot.as_ref() {
            | Some(pending)
              if pending.generation
                == generation =>
            {
              slot.take()
            }
            | _ => None
          }
        };
        if let Some(pending) = due {
          trace!(
            generation,
            "debounce window elapsed"
          );
          let _ = output.send(pending.value);
        }
      }));
  }

  /// Drops the pending value, if any.
  pub fn cancel(&mut self) -> bool {
    self.stop_timer();
    self.slot.lock().take().is_some()
  }

  /// Delivers the pending value now
  /// instead of waiting for the window.
  pub fn flush(&mut self) -> bool {
    self.stop_timer();
    let Some(pending) =
      self.slot.lock().take()
    else {
      return false;
    };
    self.output.send(pending.value).is_ok()
  }

  #[must_use]
  pub fn is_pending(&self) -> bool {
    self.slot.lock().is_some()
  }

  fn stop_timer(&mut self) {
    if let Some(timer) = self.timer.take()
    {
      timer.abort();
    }
  }
}

impl<T> Drop for Debouncer<T> {
  fn drop(&mut self) {
    if let Some(timer) = self.timer.take()
    {
      timer.abort();
    }
  }
}

/// The search field of a list view:
/// keystrokes go in, settled queries
/// come out.
#[derive(Debug)]
pub struct SearchBox {
  debouncer: Debouncer<String>,
  settled:   mpsc::UnboundedReceiver<String>,
  query:     String
}

impl SearchBox {
  pub fn new(window: Duration) -> Self {
    let (debouncer, settled) =
      Debouncer::new(window);
    Self {
      debouncer,
      settled,
      query: String::new()
    }
  }

  /// The query as typed so far, settled
  /// or not.
  #[must_use]
  pub fn query(&self) -> &str {
    &self.query
  }

  pub fn input(
    &mut self,
    query: impl Into<String>
  ) {
    self.query = query.into();
    self.debouncer.push(self.query.clone());
  }

  pub fn submit(&mut self) -> bool {
    self.debouncer.flush()
  }

  /// Waits for the next settled query.
  pub async fn settled(
    &mut self
  ) -> Option<String> {
    self.settled.recv().await
  }

  /// Waits for the next settled query and
  /// derives the view for it.
  pub async fn next_view(
    &mut self,
    tasks: &[Task],
    status_filter: StatusFilter
  ) -> Option<(String, Vec<Task>)> {
    let query = self.settled().await?;
    let view = derive_view(
      tasks,
      &query,
      status_filter
    );
    debug!(
      query = %query,
      shown = view.len(),
      "search settled"
    );
    Some((query, view))
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::{
    DEFAULT_WINDOW,
    Debouncer,
    SearchBox
  };
  use crate::filter::StatusFilter;

  #[tokio::test(start_paused = true)]
  async fn typing_burst_settles_once_on_latest()
   {
    let (mut debouncer, mut settled) =
      Debouncer::new(DEFAULT_WINDOW);

    for query in ["m", "mi", "mil", "milk"]
    {
      debouncer.push(query.to_string());
      tokio::time::sleep(
        Duration::from_millis(50)
      )
      .await;
    }

    assert_eq!(
      settled.recv().await.as_deref(),
      Some("milk")
    );
    let extra = tokio::time::timeout(
      Duration::from_secs(2),
      settled.recv()
    )
    .await;
    assert!(
      extra.is_err(),
      "burst produced a second delivery"
    );
  }

  #[tokio::test(start_paused = true)]
  async fn separate_bursts_each_settle() {
    let (mut debouncer, mut settled) =
      Debouncer::new(DEFAULT_WINDOW);

    debouncer.push(1);
    tokio::time::sleep(
      Duration::from_millis(400)
    )
    .await;
    debouncer.push(2);

    assert_eq!(settled.recv().await, Some(1));
    assert_eq!(settled.recv().await, Some(2));
  }

  #[tokio::test(start_paused = true)]
  async fn cancel_and_drop_discard_pending()
   {
    let (mut debouncer, mut settled) =
      Debouncer::new(DEFAULT_WINDOW);
    debouncer.push("stale");
    assert!(debouncer.is_pending());
    assert!(debouncer.cancel());
    assert!(!debouncer.is_pending());

    debouncer.push("dropped");
    drop(debouncer);
    assert_eq!(settled.recv().await, None);
  }

  #[tokio::test(start_paused = true)]
  async fn flush_delivers_immediately() {
    let (mut debouncer, mut settled) =
      Debouncer::new(Duration::from_secs(60));
    debouncer.push("now");
    assert!(debouncer.flush());
    assert!(!debouncer.flush());
    assert_eq!(
      settled.try_recv().ok(),
      Some("now")
    );
  }

  #[tokio::test(start_paused = true)]
  async fn search_box_derives_view_for_latest_query()
   {
    let mut search =
      SearchBox::new(DEFAULT_WINDOW);
    search.input("wal");
    search.input("walk");
    assert_eq!(search.query(), "walk");

    let tasks = Vec::new();
    let (query, view) = search
      .next_view(&tasks, StatusFilter::All)
      .await
      .expect("settled query");
    assert_eq!(query, "walk");
    assert!(view.is_empty());
  }
}

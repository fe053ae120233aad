pub mod debounce;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use tracing::trace;

pub use debounce::{
  Debouncer,
  SearchBox
};

use crate::task::{
  Task,
  TaskStatus
};

/// Case-insensitive substring match
/// on title or description. A blank
/// query keeps every task, in order.
#[tracing::instrument(skip(tasks), fields(total = tasks.len()))]
pub fn filter(
  tasks: &[Task],
  query: &str
) -> Vec<Task> {
  let needle =
    query.trim().to_lowercase();
  if needle.is_empty() {
    return tasks.to_vec();
  }

  let matched: Vec<Task> = tasks
    .iter()
    .filter(|task| {
      text_matches(task, &needle)
    })
    .cloned()
    .collect();

  trace!(
    matched = matched.len(),
    "filtered tasks"
  );
  matched
}

fn text_matches(
  task: &Task,
  needle: &str
) -> bool {
  task
    .title
    .to_lowercase()
    .contains(needle)
    || task
      .description
      .to_lowercase()
      .contains(needle)
}

/// Tasks bucketed by status. All three
/// buckets are always present.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusGroups {
  buckets: BTreeMap<TaskStatus, Vec<Task>>
}

impl StatusGroups {
  #[must_use]
  pub fn get(
    &self,
    status: TaskStatus
  ) -> &[Task] {
    self
      .buckets
      .get(&status)
      .map(Vec::as_slice)
      .unwrap_or_default()
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (TaskStatus, &[Task])>
  {
    self.buckets.iter().map(
      |(status, tasks)| {
        (*status, tasks.as_slice())
      }
    )
  }

  #[must_use]
  pub fn total(&self) -> usize {
    self
      .buckets
      .values()
      .map(Vec::len)
      .sum()
  }
}

#[must_use]
pub fn group_by_status(
  tasks: &[Task]
) -> StatusGroups {
  let mut buckets: BTreeMap<
    TaskStatus,
    Vec<Task>
  > = TaskStatus::ALL
    .iter()
    .map(|status| (*status, Vec::new()))
    .collect();

  for task in tasks {
    buckets
      .entry(task.status)
      .or_default()
      .push(task.clone());
  }

  StatusGroups {
    buckets
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default
)]
pub enum StatusFilter {
  #[default]
  All,
  Only(TaskStatus)
}

impl StatusFilter {
  #[must_use]
  pub fn accepts(
    self,
    task: &Task
  ) -> bool {
    match self {
      | Self::All => true,
      | Self::Only(status) => {
        task.status == status
      }
    }
  }
}

impl FromStr for StatusFilter {
  type Err = anyhow::Error;

  fn from_str(
    raw: &str
  ) -> Result<Self, Self::Err> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
      || trimmed.eq_ignore_ascii_case("all")
    {
      return Ok(Self::All);
    }

    trimmed
      .parse::<TaskStatus>()
      .map(Self::Only)
      .map_err(|_| {
        anyhow!(
          "unknown status filter \
           {trimmed:?}; expected all, \
           pending, in-progress or \
           completed"
        )
      })
  }
}

impl fmt::Display for StatusFilter {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    match self {
      | Self::All => f.write_str("all"),
      | Self::Only(status) => {
        write!(f, "{status}")
      }
    }
  }
}

/// What the list view shows: the
/// status selector first, then the
/// text query.
#[must_use]
pub fn derive_view(
  tasks: &[Task],
  query: &str,
  status_filter: StatusFilter
) -> Vec<Task> {
  let selected: Vec<Task> = tasks
    .iter()
    .filter(|task| {
      status_filter.accepts(task)
    })
    .cloned()
    .collect();
  filter(&selected, query)
}

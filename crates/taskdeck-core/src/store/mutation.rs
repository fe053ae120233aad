use crate::task::{Task, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

/// Lifecycle of one optimistic mutation:
/// `AppliedLocally -> Confirmed` or `AppliedLocally -> RolledBack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    AppliedLocally,
    Confirmed,
    RolledBack,
}

/// What it takes to put the collection back the way it was.
#[derive(Debug, Clone)]
pub(crate) enum Undo {
    RemoveInserted,
    Restore(Task),
    Reinsert { index: usize, task: Task },
}

#[derive(Debug, Clone)]
pub struct PendingMutation {
    op: u64,
    kind: MutationKind,
    task_id: TaskId,
    state: Reconciliation,
    undo: Option<Undo>,
}

impl PendingMutation {
    pub(crate) fn applied(op: u64, kind: MutationKind, task_id: TaskId, undo: Undo) -> Self {
        Self {
            op,
            kind,
            task_id,
            state: Reconciliation::AppliedLocally,
            undo: Some(undo),
        }
    }

    pub fn op(&self) -> u64 {
        self.op
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn state(&self) -> Reconciliation {
        self.state
    }

    pub fn is_settled(&self) -> bool {
        self.state != Reconciliation::AppliedLocally
    }

    /// Returns false when the mutation had already settled.
    pub(crate) fn confirm(&mut self) -> bool {
        if self.is_settled() {
            return false;
        }
        self.state = Reconciliation::Confirmed;
        self.undo = None;
        true
    }

    /// Hands back the undo record exactly once.
    pub(crate) fn roll_back(&mut self) -> Option<Undo> {
        if self.is_settled() {
            return None;
        }
        self.state = Reconciliation::RolledBack;
        self.undo.take()
    }
}

#[cfg(test)]
mod tests {
    use super::{MutationKind, PendingMutation, Reconciliation, Undo};
    use crate::task::TaskId;

    #[test]
    fn settles_only_once() {
        let mut confirmed =
            PendingMutation::applied(1, MutationKind::Create, TaskId::new("a"), Undo::RemoveInserted);
        assert!(confirmed.confirm());
        assert!(!confirmed.confirm());
        assert!(confirmed.roll_back().is_none());
        assert_eq!(confirmed.state(), Reconciliation::Confirmed);

        let mut rolled =
            PendingMutation::applied(2, MutationKind::Delete, TaskId::new("b"), Undo::RemoveInserted);
        assert!(rolled.roll_back().is_some());
        assert!(rolled.roll_back().is_none());
        assert!(!rolled.confirm());
        assert_eq!(rolled.state(), Reconciliation::RolledBack);
    }
}

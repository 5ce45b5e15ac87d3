//! Turns per-path observations into an ordered `SyncPlan` (§4.E).

use crate::detector::{ChangeKind, Observation, Presence};
use crate::model::{Action, ActionKind, ConflictKind, SyncPlan};
use crate::options::{SyncMode, SyncOptions};
use crate::path::Filter;

pub struct Planner<'a> {
    options: &'a SyncOptions,
    filter: &'a Filter,
}

impl<'a> Planner<'a> {
    pub fn new(options: &'a SyncOptions, filter: &'a Filter) -> Self {
        Self { options, filter }
    }

    pub fn plan(&self, observations: &[Observation]) -> SyncPlan {
        let mut plan = SyncPlan::default();

        for obs in observations {
            if !self.filter.is_included(&obs.path) {
                plan.no_ops.push(Action::new(obs.path.clone(), ActionKind::NoOp));
                continue;
            }

            let action = self.classify(obs);
            self.dispatch(&mut plan, action);
        }

        plan
    }

    fn dispatch(&self, plan: &mut SyncPlan, action: Action) {
        match action.kind {
            ActionKind::Upload => plan.uploads.push(action),
            ActionKind::Download => plan.downloads.push(action),
            ActionKind::DeleteLocal => plan.local_deletes.push(action),
            ActionKind::DeleteRemote => plan.remote_deletes.push(action),
            ActionKind::Conflict => plan.conflicts.push(action),
            ActionKind::NoOp | ActionKind::Converged => plan.no_ops.push(action),
            ActionKind::RemoveState => plan.removed_states.push(action),
        }
    }

    fn classify(&self, obs: &Observation) -> Action {
        let with_items = |kind: ActionKind| {
            Action::new(obs.path.clone(), kind).with_items(obs.local.item().cloned(), obs.remote.item().cloned())
        };

        if let (Presence::Present(local), Presence::Present(remote)) = (&obs.local, &obs.remote) {
            if local.is_directory != remote.is_directory {
                return with_items(ActionKind::Conflict).with_conflict_kind(ConflictKind::TypeConflict);
            }
        }

        match (obs.local_change, obs.remote_change) {
            (ChangeKind::Unchanged, ChangeKind::Unchanged) => with_items(ActionKind::NoOp),

            (ChangeKind::New, ChangeKind::Unchanged) => self.one_sided(with_items(ActionKind::Upload)),
            (ChangeKind::Unchanged, ChangeKind::New) => self.one_sided(with_items(ActionKind::Download)),
            (ChangeKind::Modified, ChangeKind::Unchanged) => self.one_sided(with_items(ActionKind::Upload)),
            (ChangeKind::Unchanged, ChangeKind::Modified) => self.one_sided(with_items(ActionKind::Download)),

            (ChangeKind::New, ChangeKind::New) => self.both_new(obs),

            (ChangeKind::Modified, ChangeKind::Modified) => {
                with_items(ActionKind::Conflict).with_conflict_kind(ConflictKind::BothModified)
            }

            (ChangeKind::Deleted, ChangeKind::Unchanged) => self.propagate_delete(with_items(ActionKind::DeleteRemote)),
            (ChangeKind::Unchanged, ChangeKind::Deleted) => self.propagate_delete(with_items(ActionKind::DeleteLocal)),

            (ChangeKind::Deleted, ChangeKind::Modified) => {
                with_items(ActionKind::Conflict).with_conflict_kind(ConflictKind::DeletedInSourceModifiedInTarget)
            }
            (ChangeKind::Modified, ChangeKind::Deleted) => {
                with_items(ActionKind::Conflict).with_conflict_kind(ConflictKind::ModifiedInSourceDeletedInTarget)
            }

            (ChangeKind::Deleted, ChangeKind::Deleted) => with_items(ActionKind::RemoveState),
            (ChangeKind::Deleted, ChangeKind::New) => self.one_sided(with_items(ActionKind::Download)),
            (ChangeKind::New, ChangeKind::Deleted) => self.one_sided(with_items(ActionKind::Upload)),
        }
    }

    /// Two new items at the same path: if their content already matches they
    /// converge without transfer (adopted as synced, not merely skipped —
    /// see `ActionKind::Converged`); otherwise it's a conflict since neither
    /// side has priority (§9).
    fn both_new(&self, obs: &Observation) -> Action {
        let with_items = |kind: ActionKind| {
            Action::new(obs.path.clone(), kind).with_items(obs.local.item().cloned(), obs.remote.item().cloned())
        };

        let identical = match (obs.local.item(), obs.remote.item()) {
            (Some(local), Some(remote)) if local.is_directory && remote.is_directory => true,
            (Some(local), Some(remote)) => {
                local.size == remote.size && local.hash.is_some() && local.hash == remote.hash
            }
            _ => false,
        };

        if identical {
            with_items(ActionKind::Converged)
        } else {
            with_items(ActionKind::Conflict).with_conflict_kind(ConflictKind::BothNewDivergent)
        }
    }

    /// Downgrade a transfer action to NoOp when the run's mode or
    /// `update_existing` flag forbids it.
    fn one_sided(&self, action: Action) -> Action {
        let allowed = match (self.options.mode, action.kind) {
            (SyncMode::UploadOnly, ActionKind::Download) => false,
            (SyncMode::DownloadOnly, ActionKind::Upload) => false,
            (SyncMode::MirrorToRemote, ActionKind::Download) => false,
            (SyncMode::MirrorToLocal, ActionKind::Upload) => false,
            _ => true,
        };

        if !allowed {
            return Action::new(action.path, ActionKind::NoOp).with_items(action.local, action.remote);
        }

        if !self.options.update_existing && action.local.is_some() && action.remote.is_some() {
            return Action::new(action.path, ActionKind::NoOp).with_items(action.local, action.remote);
        }

        action
    }

    /// Downgrade a propagated delete to NoOp when the run forbids deletion
    /// propagation or the mode doesn't permit this direction.
    fn propagate_delete(&self, action: Action) -> Action {
        let mode_allows = match (self.options.mode, action.kind) {
            (SyncMode::UploadOnly, ActionKind::DeleteRemote) => true,
            (SyncMode::UploadOnly, ActionKind::DeleteLocal) => false,
            (SyncMode::DownloadOnly, ActionKind::DeleteLocal) => true,
            (SyncMode::DownloadOnly, ActionKind::DeleteRemote) => false,
            (SyncMode::MirrorToRemote, ActionKind::DeleteRemote) => true,
            (SyncMode::MirrorToRemote, ActionKind::DeleteLocal) => false,
            (SyncMode::MirrorToLocal, ActionKind::DeleteLocal) => true,
            (SyncMode::MirrorToLocal, ActionKind::DeleteRemote) => false,
            (SyncMode::Bidirectional, _) => true,
            _ => true,
        };

        if !self.options.delete_propagation || !mode_allows {
            return Action::new(action.path.clone(), ActionKind::NoOp)
                .with_items(action.local, action.remote)
                .with_note(format!("deletion of {} was not propagated", action.path));
        }
        action
    }
}

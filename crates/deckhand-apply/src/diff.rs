//! Change set between a stage plan and its converged state.

use std::collections::BTreeMap;
use std::fmt;

use deckhand_core::ResourceId;
use deckhand_plan::{ResourceKind, StagePlan};
use deckhand_state::ResourceRecord;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    /// Properties changed since the last apply.
    Update,
    Unchanged,
    /// Recorded but no longer planned.
    Delete,
    /// Run-once triggers fire on every apply.
    Fire,
}

impl Action {
    fn symbol(&self) -> char {
        match self {
            Action::Create => '+',
            Action::Update => '~',
            Action::Unchanged => '=',
            Action::Delete => '-',
            Action::Fire => '!',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Unchanged => "unchanged",
            Action::Delete => "delete",
            Action::Fire => "fire",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub id: ResourceId,
    pub kind: String,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub stage: String,
    /// Planned resources in dependency order, then deletions.
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn action(&self, id: &ResourceId) -> Option<Action> {
        self.changes.iter().find(|c| &c.id == id).map(|c| c.action)
    }

    pub fn count(&self, action: Action) -> usize {
        self.changes.iter().filter(|c| c.action == action).count()
    }

    /// Whether applying would change anything besides firing triggers.
    pub fn is_converged(&self) -> bool {
        self.changes
            .iter()
            .all(|c| matches!(c.action, Action::Unchanged | Action::Fire))
    }

    pub fn deletions(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(|c| c.action == Action::Delete)
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stage {}:", self.stage)?;
        for change in &self.changes {
            writeln!(f, "  {} {:<18} {}", change.action.symbol(), change.kind, change.id)?;
        }
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged, {} to fire",
            self.count(Action::Create),
            self.count(Action::Update),
            self.count(Action::Delete),
            self.count(Action::Unchanged),
            self.count(Action::Fire),
        )
    }
}

pub fn diff(plan: &StagePlan, records: &[ResourceRecord]) -> ChangeSet {
    let mut recorded: BTreeMap<&ResourceId, &ResourceRecord> =
        records.iter().map(|r| (&r.id, r)).collect();

    let mut changes = Vec::with_capacity(plan.graph.len() + records.len());
    for id in plan.graph.topological_order() {
        let Some(node) = plan.graph.get(&id) else {
            continue;
        };
        let previous = recorded.remove(&id);
        let action = if node.kind() == ResourceKind::Trigger {
            Action::Fire
        } else {
            match previous {
                None => Action::Create,
                Some(record) if record.props_digest != node.props_digest() => Action::Update,
                Some(_) => Action::Unchanged,
            }
        };
        changes.push(Change {
            id,
            kind: node.kind().to_string(),
            action,
        });
    }

    for (id, record) in recorded {
        changes.push(Change {
            id: id.clone(),
            kind: record.kind.clone(),
            action: Action::Delete,
        });
    }

    ChangeSet {
        stage: plan.name.clone(),
        changes,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::fixtures::plan;

    fn records_for(plan: &StagePlan) -> Vec<ResourceRecord> {
        plan.graph
            .nodes()
            .map(|node| ResourceRecord {
                stage: plan.name.clone(),
                id: node.id.clone(),
                stack: node.stack().to_string(),
                kind: node.kind().to_string(),
                props: serde_json::to_value(&node.props).unwrap(),
                props_digest: node.props_digest(),
                depends_on: node.depends_on.iter().cloned().collect(),
                outputs: BTreeMap::new(),
                applied_at: 0,
                apply_id: 1,
            })
            .collect()
    }

    #[test]
    fn empty_state_creates_everything() {
        let plan = plan();
        let changes = diff(&plan, &[]);
        assert_eq!(changes.changes.len(), plan.graph.len());
        assert_eq!(changes.count(Action::Fire), 1);
        assert_eq!(changes.count(Action::Create), plan.graph.len() - 1);
        assert!(!changes.is_converged());
    }

    #[test]
    fn converged_state_only_fires_trigger() {
        let plan = plan();
        let changes = diff(&plan, &records_for(&plan));
        assert!(changes.is_converged());
        assert_eq!(changes.count(Action::Unchanged), plan.graph.len() - 1);
        assert_eq!(
            changes.action(plan.outputs.migration.trigger.id()),
            Some(Action::Fire)
        );
    }

    #[test]
    fn digest_change_is_an_update() {
        let plan = plan();
        let mut records = records_for(&plan);
        let service = plan.outputs.compute.service.id();
        for record in records.iter_mut().filter(|r| &r.id == service) {
            record.props_digest = "stale".to_string();
        }
        let changes = diff(&plan, &records);
        assert_eq!(changes.action(service), Some(Action::Update));
        assert_eq!(changes.count(Action::Update), 1);
    }

    #[test]
    fn unplanned_record_is_deleted_last() {
        let plan = plan();
        let mut records = records_for(&plan);
        let mut orphan = records[0].clone();
        orphan.id = ResourceId::new("shopNetwork", "shopLegacyGroup");
        records.push(orphan);

        let changes = diff(&plan, &records);
        let last = changes.changes.last().unwrap();
        assert_eq!(last.id.as_str(), "shopNetwork/shopLegacyGroup");
        assert_eq!(last.action, Action::Delete);
        assert_eq!(changes.deletions().count(), 1);
    }

    #[test]
    fn display_lists_every_change() {
        let rendered = diff(&plan(), &[]).to_string();
        assert!(rendered.starts_with("Stage Prod:"));
        assert!(rendered.contains("! trigger"));
        assert!(rendered.contains("20 to create"));
    }
}

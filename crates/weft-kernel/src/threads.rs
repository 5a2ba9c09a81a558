//! Hierarchical thread table.
//!
//! Threads form a tree rooted at `root`. Records live in an arena keyed by
//! the dot-separated thread id; parent links are keys, not references, so
//! arbitrarily deep trees carry no ownership cycles. Mutations are applied
//! only after the corresponding WAL record is durable; the `apply_*`
//! methods here are called both on the live path and during replay.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

/// Dot-separated hierarchical thread path. Each component matches
/// `[A-Za-z0-9_-]+`; the first component is the literal `root`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn root() -> Self {
        ThreadId("root".into())
    }

    pub fn parse(s: &str) -> KernelResult<Self> {
        let invalid = |reason: &str| KernelError::InvalidThreadId {
            id: s.to_string(),
            reason: reason.to_string(),
        };
        let mut components = s.split('.');
        if components.next() != Some("root") {
            return Err(invalid("first component must be 'root'"));
        }
        for component in s.split('.') {
            if component.is_empty() {
                return Err(invalid("empty component"));
            }
            if !component
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
            {
                return Err(invalid("component contains characters outside [A-Za-z0-9_-]"));
            }
        }
        Ok(ThreadId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "root"
    }

    pub fn parent(&self) -> Option<ThreadId> {
        self.0.rsplit_once('.').map(|(head, _)| ThreadId(head.to_string()))
    }

    /// Extend the path with one component.
    pub fn child(&self, component: &str) -> KernelResult<ThreadId> {
        let candidate = format!("{}.{}", self.0, component);
        ThreadId::parse(&candidate)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    Active,
    Completed,
    Failed,
}

impl ThreadState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ThreadState::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: ThreadId,
    pub profile: String,
    pub state: ThreadState,
    pub parent: Option<ThreadId>,
    pub children: Vec<ThreadId>,
    pub iteration_count: u32,
    pub created_at: u64,
    pub terminated_at: Option<u64>,
    pub failure: Option<String>,
}

/// The thread arena. Exactly one root; children reference parents by key.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ThreadTable {
    records: HashMap<ThreadId, ThreadRecord>,
}

impl ThreadTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ThreadId) -> Option<&ThreadRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &ThreadId) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn profile_of(&self, id: &ThreadId) -> Option<&str> {
        self.records.get(id).map(|r| r.profile.as_str())
    }

    /// Pick a child id under `parent` derived from `component`, appending a
    /// numeric suffix when the name is already taken.
    pub fn unique_child_id(&self, parent: &ThreadId, component: &str) -> KernelResult<ThreadId> {
        let candidate = parent.child(component)?;
        if !self.records.contains_key(&candidate) {
            return Ok(candidate);
        }
        let mut n = 2u32;
        loop {
            let candidate = parent.child(&format!("{component}-{n}"))?;
            if !self.records.contains_key(&candidate) {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    /// Depth-first walk from `root_id`, visiting parents before children.
    pub fn walk<F: FnMut(&ThreadRecord)>(&self, root_id: &ThreadId, visitor: &mut F) {
        if let Some(record) = self.records.get(root_id) {
            visitor(record);
            for child in record.children.clone() {
                self.walk(&child, visitor);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThreadRecord> {
        self.records.values()
    }

    // ── Apply path (live after WAL append, and during replay) ──

    pub fn apply_spawn(
        &mut self,
        id: &ThreadId,
        parent: Option<&ThreadId>,
        profile: &str,
        created_at: u64,
    ) {
        if self.records.contains_key(id) {
            return; // idempotent replay
        }
        self.records.insert(
            id.clone(),
            ThreadRecord {
                id: id.clone(),
                profile: profile.to_string(),
                state: ThreadState::Active,
                parent: parent.cloned(),
                children: Vec::new(),
                iteration_count: 0,
                created_at,
                terminated_at: None,
                failure: None,
            },
        );
        if let Some(parent_id) = parent {
            if let Some(parent_record) = self.records.get_mut(parent_id) {
                if !parent_record.children.contains(id) {
                    parent_record.children.push(id.clone());
                }
            }
        }
    }

    pub fn apply_return(&mut self, id: &ThreadId, at: u64) {
        if let Some(record) = self.records.get_mut(id) {
            if record.state == ThreadState::Active {
                record.state = ThreadState::Completed;
                record.terminated_at = Some(at);
            }
        }
    }

    pub fn apply_fail(&mut self, id: &ThreadId, reason: &str, at: u64) {
        if let Some(record) = self.records.get_mut(id) {
            if record.state == ThreadState::Active {
                record.state = ThreadState::Failed;
                record.terminated_at = Some(at);
                record.failure = Some(reason.to_string());
            }
        }
    }

    pub fn apply_iteration(&mut self, id: &ThreadId) {
        if let Some(record) = self.records.get_mut(id) {
            record.iteration_count += 1;
        }
    }

    pub fn apply_reap(&mut self, id: &ThreadId) {
        if let Some(record) = self.records.remove(id) {
            if let Some(parent_id) = record.parent {
                if let Some(parent_record) = self.records.get_mut(&parent_id) {
                    parent_record.children.retain(|c| c != id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> ThreadTable {
        let mut table = ThreadTable::new();
        table.apply_spawn(&ThreadId::root(), None, "root", 1);
        table
    }

    #[test]
    fn thread_id_wire_format() {
        assert!(ThreadId::parse("root").is_ok());
        assert!(ThreadId::parse("root.agent.tool-1").is_ok());
        assert!(ThreadId::parse("root.a_b.C9").is_ok());

        assert!(ThreadId::parse("agent").is_err());
        assert!(ThreadId::parse("root..agent").is_err());
        assert!(ThreadId::parse("root.agent!").is_err());
        assert!(ThreadId::parse("").is_err());
    }

    #[test]
    fn parent_is_prefix() {
        let id = ThreadId::parse("root.agent.tool").unwrap();
        assert_eq!(id.parent().unwrap().as_str(), "root.agent");
        assert_eq!(ThreadId::root().parent(), None);
    }

    #[test]
    fn spawn_links_parent_and_child() {
        let mut table = seeded();
        let child = ThreadId::parse("root.agent").unwrap();
        table.apply_spawn(&child, Some(&ThreadId::root()), "coding", 2);

        assert_eq!(table.get(&child).unwrap().profile, "coding");
        assert_eq!(table.get(&ThreadId::root()).unwrap().children, vec![child]);
    }

    #[test]
    fn terminal_states_are_absorbing() {
        let mut table = seeded();
        let root = ThreadId::root();
        table.apply_return(&root, 5);
        assert_eq!(table.get(&root).unwrap().state, ThreadState::Completed);

        // A later fail does not resurrect or flip the thread.
        table.apply_fail(&root, "late failure", 6);
        assert_eq!(table.get(&root).unwrap().state, ThreadState::Completed);
        assert_eq!(table.get(&root).unwrap().terminated_at, Some(5));
    }

    #[test]
    fn unique_child_id_appends_suffix() {
        let mut table = seeded();
        let first = table.unique_child_id(&ThreadId::root(), "agent").unwrap();
        table.apply_spawn(&first, Some(&ThreadId::root()), "p", 0);
        let second = table.unique_child_id(&ThreadId::root(), "agent").unwrap();
        assert_eq!(second.as_str(), "root.agent-2");
    }

    #[test]
    fn walk_visits_parents_first() {
        let mut table = seeded();
        let a = ThreadId::parse("root.a").unwrap();
        let b = ThreadId::parse("root.a.b").unwrap();
        table.apply_spawn(&a, Some(&ThreadId::root()), "p", 0);
        table.apply_spawn(&b, Some(&a), "p", 0);

        let mut seen = Vec::new();
        table.walk(&ThreadId::root(), &mut |r| seen.push(r.id.clone()));
        assert_eq!(seen, vec![ThreadId::root(), a, b]);
    }

    #[test]
    fn reap_unlinks_from_parent() {
        let mut table = seeded();
        let a = ThreadId::parse("root.a").unwrap();
        table.apply_spawn(&a, Some(&ThreadId::root()), "p", 0);
        table.apply_reap(&a);
        assert!(table.get(&a).is_none());
        assert!(table.get(&ThreadId::root()).unwrap().children.is_empty());
    }

    #[test]
    fn replay_is_idempotent() {
        let mut table = seeded();
        let a = ThreadId::parse("root.a").unwrap();
        table.apply_spawn(&a, Some(&ThreadId::root()), "p", 0);
        table.apply_spawn(&a, Some(&ThreadId::root()), "p", 0);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&ThreadId::root()).unwrap().children.len(), 1);
    }
}

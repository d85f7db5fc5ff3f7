/// Process directory - point-in-time views of the process table

use crate::error::{ProcError, Result};
use crate::platform;
use crate::types::{names_match, Pid, ProcessQuery, ProcessSnapshotEntry};
use std::collections::{HashMap, HashSet};

/// An immutable snapshot of the process table.
///
/// Every lookup function in this module takes a fresh one; nothing is cached
/// between calls.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    entries: Vec<ProcessSnapshotEntry>,
}

impl Snapshot {
    /// Enumerates all running processes
    pub fn take() -> Result<Self> {
        let entries = platform::snapshot().map_err(|e| {
            tracing::warn!("Failed to create process snapshot: {}", e);
            e
        })?;
        Ok(Self { entries })
    }

    pub fn from_entries(entries: Vec<ProcessSnapshotEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ProcessSnapshotEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ProcessSnapshotEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, pid: Pid) -> Option<&ProcessSnapshotEntry> {
        self.entries.iter().find(|e| e.pid == pid)
    }

    /// Applies the query resolution policy.
    ///
    /// Names resolve to the first match in enumeration order. Identifier 0
    /// never resolves.
    pub fn find(&self, query: &ProcessQuery) -> Option<Pid> {
        match query {
            ProcessQuery::Pid(0) => None,
            ProcessQuery::Pid(pid) => self.get(*pid).map(|e| e.pid),
            ProcessQuery::Name(name) => self
                .entries
                .iter()
                .find(|e| names_match(&e.name, name))
                .map(|e| e.pid),
        }
    }

    /// All identifiers running `name`, in enumeration order
    pub fn find_all(&self, name: &str) -> Vec<Pid> {
        self.entries
            .iter()
            .filter(|e| names_match(&e.name, name))
            .map(|e| e.pid)
            .collect()
    }

    /// parent -> children, in enumeration order
    pub fn children_index(&self) -> HashMap<Pid, Vec<Pid>> {
        let mut index: HashMap<Pid, Vec<Pid>> = HashMap::new();
        for entry in &self.entries {
            // The idle process is its own parent
            if entry.pid == entry.parent_pid {
                continue;
            }
            index.entry(entry.parent_pid).or_default().push(entry.pid);
        }
        index
    }

    /// Transitive descendants of `root`, children before their parents.
    ///
    /// `root` itself is not included. Parent links that loop back (possible
    /// once identifiers get recycled) are visited once.
    pub fn descendants(&self, root: Pid) -> Vec<Pid> {
        let index = self.children_index();
        let mut visited = HashSet::from([root]);
        let mut order = Vec::new();

        // (pid, children already pushed)
        let mut stack: Vec<(Pid, bool)> = index
            .get(&root)
            .into_iter()
            .flatten()
            .rev()
            .map(|&pid| (pid, false))
            .collect();

        while let Some((pid, expanded)) = stack.pop() {
            if expanded {
                order.push(pid);
                continue;
            }
            if !visited.insert(pid) {
                continue;
            }
            stack.push((pid, true));
            if let Some(children) = index.get(&pid) {
                for &child in children.iter().rev() {
                    if !visited.contains(&child) {
                        stack.push((child, false));
                    }
                }
            }
        }

        order
    }
}

/// Takes a snapshot of all running processes
pub fn snapshot() -> Result<Vec<ProcessSnapshotEntry>> {
    Ok(Snapshot::take()?.into_entries())
}

/// Resolves a query against a fresh snapshot. `None` means no such process.
pub fn resolve(query: &ProcessQuery) -> Result<Option<Pid>> {
    Ok(Snapshot::take()?.find(query))
}

/// All processes named `name` (case-insensitive), in enumeration order
pub fn resolve_all(name: &str) -> Result<Vec<Pid>> {
    if name.is_empty() {
        return Err(ProcError::InvalidArgument(
            "process name must not be empty".to_string(),
        ));
    }
    Ok(Snapshot::take()?.find_all(name))
}

/// Parses a query string and resolves it
pub fn exists(query: &str) -> Result<Option<Pid>> {
    resolve(&ProcessQuery::parse(query)?)
}

/// Parent identifier of the process the query resolves to
pub fn parent_of(query: &ProcessQuery) -> Result<Pid> {
    let snapshot = Snapshot::take()?;
    snapshot
        .find(query)
        .and_then(|pid| snapshot.get(pid))
        .map(|entry| entry.parent_pid)
        .ok_or_else(|| ProcError::NotFound(query.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pid: Pid, parent_pid: Pid, name: &str) -> ProcessSnapshotEntry {
        ProcessSnapshotEntry {
            pid,
            parent_pid,
            name: name.to_string(),
            thread_count: 1,
        }
    }

    fn sample() -> Snapshot {
        Snapshot::from_entries(vec![
            entry(0, 0, "[System Process]"),
            entry(4, 0, "System"),
            entry(100, 4, "init.exe"),
            entry(200, 100, "shell.exe"),
            entry(300, 200, "worker.exe"),
            entry(301, 200, "Worker.EXE"),
            entry(400, 300, "helper.exe"),
            entry(500, 100, "worker.exe"),
        ])
    }

    #[test]
    fn test_find_by_pid() {
        let snapshot = sample();
        assert_eq!(snapshot.find(&ProcessQuery::Pid(300)), Some(300));
        assert_eq!(snapshot.find(&ProcessQuery::Pid(999)), None);
        assert_eq!(snapshot.find(&ProcessQuery::Pid(0)), None);
    }

    #[test]
    fn test_find_by_name_first_match() {
        let snapshot = sample();
        assert_eq!(snapshot.find(&ProcessQuery::name("WORKER.exe")), Some(300));
        assert_eq!(snapshot.find(&ProcessQuery::name("missing.exe")), None);
    }

    #[test]
    fn test_find_all() {
        let snapshot = sample();
        assert_eq!(snapshot.find_all("worker.exe"), vec![300, 301, 500]);
        assert!(snapshot.find_all("missing.exe").is_empty());
    }

    #[test]
    fn test_descendants_bottom_up() {
        let snapshot = sample();
        assert_eq!(snapshot.descendants(200), vec![400, 300, 301]);
        assert_eq!(snapshot.descendants(100), vec![400, 300, 301, 200, 500]);
        assert!(snapshot.descendants(400).is_empty());
    }

    #[test]
    fn test_descendants_with_parent_cycle() {
        let snapshot = Snapshot::from_entries(vec![entry(10, 11, "a"), entry(11, 10, "b")]);
        assert_eq!(snapshot.descendants(10), vec![11]);
    }

    #[test]
    fn test_resolve_self() {
        let current_pid = std::process::id();
        let resolved = resolve(&ProcessQuery::Pid(current_pid)).unwrap();
        assert_eq!(resolved, Some(current_pid));
    }

    #[test]
    fn test_resolve_unused_pid() {
        assert_eq!(resolve(&ProcessQuery::Pid(u32::MAX - 1)).unwrap(), None);
    }

    #[test]
    fn test_resolve_all_agrees_with_snapshot() {
        let current_pid = std::process::id();
        let snapshot = Snapshot::take().unwrap();
        let name = snapshot.get(current_pid).unwrap().name.clone();

        let pids = resolve_all(&name).unwrap();
        assert!(pids.contains(&current_pid));

        let mut unique = pids.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), pids.len());
    }

    #[test]
    fn test_resolve_all_empty_name() {
        assert!(matches!(resolve_all(""), Err(ProcError::InvalidArgument(_))));
    }

    #[test]
    fn test_parent_of_self() {
        let parent = parent_of(&ProcessQuery::Pid(std::process::id())).unwrap();
        assert_ne!(parent, std::process::id());
    }
}

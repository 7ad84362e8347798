//! Process tree snapshots.
//!
//! A snapshot enumerates a root process and every live descendant at one
//! instant, read from `/proc/<pid>/stat`. It is a pure query: nothing is
//! signalled, nothing is owned. Captured once at session spawn time and
//! consumed once at teardown.

use std::collections::HashMap;
use std::fs;

use tracing::trace;

/// One process observed in a snapshot: its PID and last-seen command name.
///
/// Handles reference processes by PID only. A PID may have exited (and even
/// been reused) by the time it is acted on; consumers must treat "no such
/// process" as a terminal, successful state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub comm: String,
}

impl ProcessHandle {
    pub fn new(pid: u32, comm: &str) -> Self {
        Self {
            pid,
            comm: comm.to_string(),
        }
    }
}

impl std::fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.pid, self.comm)
    }
}

/// Immutable enumeration of a root process and its transitive descendants.
#[derive(Debug, Clone, Default)]
pub struct ProcessTreeSnapshot {
    handles: Vec<ProcessHandle>,
}

impl ProcessTreeSnapshot {
    /// Captures the tree rooted at `root`. A root of `None`, or a PID that
    /// no longer exists, yields an empty snapshot; that is not an error.
    pub fn capture(root: Option<u32>) -> Self {
        let Some(root) = root else {
            return Self::default();
        };

        let table = read_process_table();
        if !table.contains_key(&root) {
            return Self::default();
        }

        // Parent -> children index, then walk outward from the root.
        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        for (pid, entry) in &table {
            children.entry(entry.ppid).or_default().push(*pid);
        }

        let mut handles = Vec::new();
        let mut frontier = vec![root];
        while let Some(pid) = frontier.pop() {
            if let Some(entry) = table.get(&pid) {
                handles.push(ProcessHandle::new(pid, &entry.comm));
            }
            if let Some(kids) = children.get(&pid) {
                frontier.extend(kids.iter().copied());
            }
        }

        Self { handles }
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessHandle> {
        self.handles.iter()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.handles.iter().map(|h| h.pid).collect()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.handles.iter().any(|h| h.pid == pid)
    }

    #[cfg(test)]
    pub(crate) fn push_for_test(&mut self, handle: ProcessHandle) {
        self.handles.push(handle);
    }
}

struct StatEntry {
    ppid: u32,
    comm: String,
}

fn read_process_table() -> HashMap<u32, StatEntry> {
    let mut table = HashMap::new();
    let Ok(entries) = fs::read_dir("/proc") else {
        return table;
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        // Processes may vanish mid-walk; skip unreadable entries.
        let Ok(stat) = fs::read_to_string(entry.path().join("stat")) else {
            trace!(pid, "process vanished during /proc walk");
            continue;
        };
        if let Some(parsed) = parse_stat(&stat) {
            table.insert(pid, parsed);
        }
    }

    table
}

/// Parses `/proc/<pid>/stat`: `pid (comm) state ppid ...`. The comm field
/// may itself contain spaces or parentheses, so split at the last `)`.
fn parse_stat(stat: &str) -> Option<StatEntry> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let comm = stat.get(open + 1..close)?.to_string();
    let rest = stat.get(close + 2..)?;
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    let ppid = fields.next()?.parse::<u32>().ok()?;
    Some(StatEntry { ppid, comm })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::Duration;

    #[test]
    fn test_none_root_is_empty() {
        let snapshot = ProcessTreeSnapshot::capture(None);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.len(), 0);
    }

    #[test]
    fn test_missing_pid_is_empty() {
        // PIDs this large are rejected before /proc lookup even on hosts
        // with a raised pid_max.
        let snapshot = ProcessTreeSnapshot::capture(Some(u32::MAX - 1));
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_self_is_root_of_own_snapshot() {
        let me = std::process::id();
        let snapshot = ProcessTreeSnapshot::capture(Some(me));
        assert!(snapshot.contains(me));
        assert_eq!(snapshot.iter().next().map(|h| h.pid), Some(me));
    }

    #[test]
    fn test_descendants_are_enumerated() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("sleep 2 & sleep 2 & wait")
            .spawn()
            .expect("spawn shell");
        std::thread::sleep(Duration::from_millis(300));

        let snapshot = ProcessTreeSnapshot::capture(Some(child.id()));
        assert!(snapshot.contains(child.id()));
        assert!(
            snapshot.len() >= 3,
            "expected shell plus two sleeps, got {:?}",
            snapshot.pids()
        );

        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn test_parse_stat_plain() {
        let entry = parse_stat("1234 (term) S 42 1234 1234 0 -1").expect("parse");
        assert_eq!(entry.comm, "term");
        assert_eq!(entry.ppid, 42);
    }

    #[test]
    fn test_parse_stat_comm_with_spaces_and_parens() {
        let entry = parse_stat("99 (weird (name) x) R 7 99 99 0 -1").expect("parse");
        assert_eq!(entry.comm, "weird (name) x");
        assert_eq!(entry.ppid, 7);
    }
}

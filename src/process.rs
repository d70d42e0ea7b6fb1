//! Thread to process id resolution.
//!
//! Trace events only carry thread ids. The owning process id is filled in
//! afterwards, either from a tid->pid mapping persisted next to the dumps or
//! by asking the process table of the machine the trace was taken on.

use std::collections::HashMap;

use sysinfo::System;
use tracing::debug;

use crate::trace::TaskSet;

/// tid -> pid.
pub type PidMapping = HashMap<i32, u32>;

/// Source of tid -> pid mappings.
pub trait PidResolver {
    fn resolve(&self, tids: &[i32]) -> PidMapping;
}

/// Resolves against the process table of the running system.
#[derive(Debug, Default)]
pub struct LocalPidResolver;

impl PidResolver for LocalPidResolver {
    fn resolve(&self, tids: &[i32]) -> PidMapping {
        let sys = System::new_all();

        let mut owners: PidMapping = HashMap::new();
        for (pid, process) in sys.processes() {
            // Threads show up as their own entries on Linux; only real
            // processes own tasks.
            if process.thread_kind().is_some() {
                continue;
            }
            let pid = pid.as_u32();
            owners.insert(pid as i32, pid);
            if let Some(tasks) = process.tasks() {
                for task in tasks {
                    owners.insert(task.as_u32() as i32, pid);
                }
            }
        }

        tids.iter()
            .filter_map(|tid| owners.get(tid).map(|pid| (*tid, *pid)))
            .collect()
    }
}

/// A mapping that was loaded from disk.
impl PidResolver for PidMapping {
    fn resolve(&self, tids: &[i32]) -> PidMapping {
        tids.iter()
            .filter_map(|tid| self.get(tid).map(|pid| (*tid, *pid)))
            .collect()
    }
}

/// Set the pid of every task whose tid appears in `mapping`. Tasks sharing a
/// tid under different names all receive the pid. Returns the number of
/// tasks updated.
pub fn apply_pid_mapping(tasks: &mut TaskSet, mapping: &PidMapping) -> usize {
    let mut updated = 0;
    for task in tasks.iter_mut() {
        if let Some(pid) = mapping.get(&task.key.tid) {
            task.pid = Some(*pid);
            updated += 1;
        }
    }

    for tid in mapping.keys() {
        if !tasks.iter().any(|t| t.key.tid == *tid) {
            debug!(tid, "pid mapping entry matches no task");
        }
    }

    updated
}

/// Resolve pids for all tasks through `resolver`.
pub fn resolve_pids(tasks: &mut TaskSet, resolver: &dyn PidResolver) -> usize {
    let mut tids: Vec<i32> = tasks.iter().map(|t| t.key.tid).collect();
    tids.sort_unstable();
    tids.dedup();
    let mapping = resolver.resolve(&tids);
    apply_pid_mapping(tasks, &mapping)
}

/// The tid -> pid mapping currently known for `tasks`, in task order.
/// Unresolved tasks map to pid 0, matching what is written to disk.
pub fn tasks_pid_mapping(tasks: &TaskSet) -> Vec<(i32, u32)> {
    tasks
        .iter()
        .map(|t| (t.key.tid, t.pid.unwrap_or(0)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TaskKey;

    #[test]
    fn test_apply_mapping_to_every_name() {
        let mut tasks = TaskSet::new();
        tasks.get_or_create(&TaskKey::new("sh", 42));
        tasks.get_or_create(&TaskKey::new("app", 42));
        tasks.get_or_create(&TaskKey::new("other", 7));

        let mapping: PidMapping = [(42, 40), (99, 99)].into_iter().collect();
        assert_eq!(apply_pid_mapping(&mut tasks, &mapping), 2);

        assert_eq!(tasks.get(&TaskKey::new("sh", 42)).unwrap().pid, Some(40));
        assert_eq!(tasks.get(&TaskKey::new("app", 42)).unwrap().pid, Some(40));
        assert_eq!(tasks.get(&TaskKey::new("other", 7)).unwrap().pid, None);
    }

    #[test]
    fn test_resolve_with_loaded_mapping() {
        let mut tasks = TaskSet::new();
        tasks.get_or_create(&TaskKey::new("a", 1));
        tasks.get_or_create(&TaskKey::new("b", 2));

        let mapping: PidMapping = [(2, 20)].into_iter().collect();
        assert_eq!(resolve_pids(&mut tasks, &mapping), 1);
        assert_eq!(tasks_pid_mapping(&tasks), vec![(1, 0), (2, 20)]);
    }

    #[test]
    fn test_local_resolver_finds_own_process() {
        let me = std::process::id();
        let mapping = LocalPidResolver.resolve(&[me as i32]);
        assert_eq!(mapping.get(&(me as i32)), Some(&me));
    }
}

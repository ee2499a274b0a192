//! Dependency-aware scheduler (spec §4.2): ready-set computation, tiered
//! group priority, and mutual-exclusion selection.
//!
//! Plain functions over owned data, no teacher analog (the teacher repo
//! has no scheduler); built in the surrounding style — `Vec`/`HashMap`
//! based, one `#[cfg(test)]` module per behavior.

use std::collections::{HashMap, HashSet};

use crate::task::{GroupPriority, Status, Task, TaskId};

/// `IsReady`: true iff the task is not started and every element of its
/// effective dependency set (explicit ∪ implicit predecessor) is in
/// `completed`.
pub fn is_ready(task: &Task, all_ids: &HashSet<TaskId>, completed: &HashSet<TaskId>) -> bool {
    task.status == Status::NotStarted
        && task
            .effective_dependencies(all_ids)
            .iter()
            .all(|d| completed.contains(d))
}

/// Transitive count of dependents: how many tasks (directly or
/// transitively) depend on `id`. Used as the "unblocks more work" ranking
/// key — higher depth sorts first.
fn dependency_depth(id: &TaskId, tasks: &[Task], all_ids: &HashSet<TaskId>) -> usize {
    // Build reverse edges: dep -> [tasks that depend on dep].
    let mut reverse: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
    for t in tasks {
        for dep in t.effective_dependencies(all_ids) {
            reverse.entry(dep).or_default().push(t.id.clone());
        }
    }

    let mut seen = HashSet::new();
    let mut stack = vec![id.clone()];
    let mut count = 0usize;
    while let Some(cur) = stack.pop() {
        if let Some(children) = reverse.get(&cur) {
            for child in children {
                if seen.insert(child.clone()) {
                    count += 1;
                    stack.push(child.clone());
                }
            }
        }
    }
    count
}

/// The lowest-numbered tier that still has incomplete tasks. Modules not
/// present in `priorities` count as tier 0.
pub fn active_tier(tasks: &[Task], priorities: &GroupPriority) -> u32 {
    tasks
        .iter()
        .filter(|t| t.status != Status::Complete)
        .map(|t| priorities.tier_of(&t.id.module))
        .min()
        .unwrap_or(0)
}

/// Two tasks conflict (per the exclusion rule) if selecting both would
/// violate an explicit dependency edge or intra-module sequential order.
fn conflicts(a: &Task, b: &Task, all_ids: &HashSet<TaskId>) -> bool {
    if a.effective_dependencies(all_ids).contains(&b.id) || b.effective_dependencies(all_ids).contains(&a.id) {
        return true;
    }
    if a.id.module == b.id.module && a.id.prefix == b.id.prefix {
        // Non-consecutive reasoning is handled by is_ready (the lower
        // epic must already be complete for the higher to be ready at
        // all); the remaining conflict is two *ready* same-module tasks
        // racing each other when one isn't complete yet. Since both are
        // ready here, the only way both can be ready simultaneously with
        // an ordering constraint is if neither is the other's immediate
        // predecessor (already excluded above) — guard defensively
        // against selecting the higher before the lower completes.
        let (lower, higher) = if a.id.epic < b.id.epic { (a, b) } else { (b, a) };
        if higher.id.epic > lower.id.epic && lower.status != Status::Complete {
            return true;
        }
    }
    false
}

/// `GetReadyTasksExcluding`: up to `limit` tasks, selected per §4.2.
pub fn get_ready_tasks_excluding<'a>(
    tasks: &'a [Task],
    completed: &HashSet<TaskId>,
    in_progress: &HashSet<TaskId>,
    priorities: Option<&GroupPriority>,
    limit: usize,
) -> Vec<&'a Task> {
    let all_ids: HashSet<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();

    let mut candidates: Vec<&Task> = tasks
        .iter()
        .filter(|t| is_ready(t, &all_ids, completed))
        .filter(|t| {
            t.effective_dependencies(&all_ids)
                .iter()
                .all(|d| !in_progress.contains(d))
        })
        .collect();

    if let Some(priorities) = priorities {
        if !priorities.is_empty() {
            let tier = active_tier(tasks, priorities);
            candidates.retain(|t| priorities.tier_of(&t.id.module) == tier);
        }
    }

    candidates.sort_by(|a, b| {
        a.priority
            .rank()
            .cmp(&b.priority.rank())
            .then_with(|| {
                dependency_depth(&b.id, tasks, &all_ids).cmp(&dependency_depth(&a.id, tasks, &all_ids))
            })
            .then_with(|| a.id.module.cmp(&b.id.module))
            .then_with(|| a.id.epic.cmp(&b.id.epic))
    });

    let mut selected: Vec<&Task> = Vec::new();
    for candidate in candidates {
        if selected.len() >= limit {
            break;
        }
        if selected.iter().any(|s| conflicts(s, candidate, &all_ids)) {
            continue;
        }
        selected.push(candidate);
    }

    selected
}

/// `GetReadyTasks`: `GetReadyTasksExcluding` with an empty in-progress set.
pub fn get_ready_tasks(tasks: &[Task], completed: &HashSet<TaskId>, limit: usize) -> Vec<&Task> {
    get_ready_tasks_excluding(tasks, completed, &HashSet::new(), None, limit)
}

/// Kahn-scan topological sort over explicit + implicit dependency edges.
/// Cycles surface as tasks simply omitted from the output — the core does
/// not attempt cycle recovery.
pub fn topological_sort(tasks: &[Task]) -> Vec<TaskId> {
    let all_ids: HashSet<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();

    let mut in_degree: HashMap<TaskId, usize> = HashMap::new();
    let mut dependents: HashMap<TaskId, Vec<TaskId>> = HashMap::new();

    for t in tasks {
        let deps = t.effective_dependencies(&all_ids);
        in_degree.insert(t.id.clone(), deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(t.id.clone());
        }
    }

    let mut queue: Vec<TaskId> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(id, _)| id.clone())
        .collect();
    queue.sort();

    let mut out = Vec::new();
    let mut idx = 0;
    while idx < queue.len() {
        let cur = queue[idx].clone();
        idx += 1;
        out.push(cur.clone());
        if let Some(children) = dependents.get(&cur) {
            let mut newly_ready = Vec::new();
            for child in children {
                if let Some(deg) = in_degree.get_mut(child) {
                    *deg -= 1;
                    if *deg == 0 {
                        newly_ready.push(child.clone());
                    }
                }
            }
            newly_ready.sort();
            queue.extend(newly_ready);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;
    use std::path::PathBuf;

    fn task(module: &str, epic: u32, status: Status, depends_on: Vec<TaskId>) -> Task {
        Task {
            id: TaskId::new(module, epic),
            title: format!("{}-{}", module, epic),
            description: String::new(),
            status,
            priority: Priority::Normal,
            depends_on,
            needs_review: false,
            test_summary: None,
            github_issue: None,
            source_path: PathBuf::new(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn s2_ready_tasks_with_empty_completed() {
        let tasks = vec![
            task("tech", 0, Status::NotStarted, vec![]),
            task("tech", 1, Status::NotStarted, vec![TaskId::new("tech", 0)]),
            task("tech", 2, Status::NotStarted, vec![TaskId::new("tech", 1)]),
            task("billing", 0, Status::NotStarted, vec![]),
        ];
        let ready = get_ready_tasks(&tasks, &HashSet::new(), 10);
        let ids: HashSet<TaskId> = ready.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, HashSet::from([TaskId::new("tech", 0), TaskId::new("billing", 0)]));
    }

    #[test]
    fn s3_ready_tasks_after_predecessor_completes() {
        let tasks = vec![
            task("tech", 0, Status::Complete, vec![]),
            task("tech", 1, Status::NotStarted, vec![]), // implicit dep on tech/E00
            task("tech", 2, Status::NotStarted, vec![TaskId::new("tech", 1)]),
            task("billing", 0, Status::NotStarted, vec![]),
        ];
        let completed = HashSet::from([TaskId::new("tech", 0)]);
        // billing/E00 is already ready and has nothing to do with tech;
        // restrict the assertion to tech module readiness per S3.
        let ready = get_ready_tasks(&tasks, &completed, 10);
        let ids: HashSet<TaskId> = ready.iter().map(|t| t.id.clone()).collect();
        assert!(ids.contains(&TaskId::new("tech", 1)));
        assert!(!ids.contains(&TaskId::new("tech", 2)));
    }

    #[test]
    fn priority_law_high_before_normal() {
        let mut high = task("a", 0, Status::NotStarted, vec![]);
        high.priority = Priority::High;
        let normal = task("b", 0, Status::NotStarted, vec![]);
        let tasks = vec![normal, high];
        let ready = get_ready_tasks(&tasks, &HashSet::new(), 1);
        assert_eq!(ready[0].priority, Priority::High);
    }

    #[test]
    fn tiering_excludes_lower_priority_tiers_while_higher_incomplete() {
        let tasks = vec![
            task("a", 0, Status::NotStarted, vec![]),
            task("b", 0, Status::NotStarted, vec![]),
        ];
        let mut gp = GroupPriority::new();
        gp.set("a", 0);
        gp.set("b", 1);
        let ready = get_ready_tasks_excluding(&tasks, &HashSet::new(), &HashSet::new(), Some(&gp), 10);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id.module, "a");
    }

    #[test]
    fn exclusion_skips_same_module_non_consecutive_pair() {
        // E00 complete, E01 and E02 both "ready" in isolation (E02's
        // explicit dep is E01 so it can't actually be ready until E01 is
        // complete -- verify the scheduler doesn't select both anyway in
        // a contrived case where E02 has no explicit dep but shares a
        // module with a pending E01).
        let tasks = vec![
            task("m", 0, Status::Complete, vec![]),
            task("m", 1, Status::NotStarted, vec![]),
            task("m", 2, Status::NotStarted, vec![]),
        ];
        let completed = HashSet::from([TaskId::new("m", 0)]);
        let ready = get_ready_tasks(&tasks, &completed, 10);
        // m/E01 is ready (implicit dep on complete E00); m/E02's implicit
        // dep is E01 which is not complete, so is_ready already excludes
        // it -- confirming the scheduler never selects both.
        let ids: HashSet<TaskId> = ready.iter().map(|t| t.id.clone()).collect();
        assert!(ids.contains(&TaskId::new("m", 1)));
        assert!(!ids.contains(&TaskId::new("m", 2)));
    }

    #[test]
    fn excludes_tasks_whose_dependency_is_in_progress() {
        let tasks = vec![
            task("m", 0, Status::Complete, vec![]),
            task("m", 1, Status::NotStarted, vec![]),
        ];
        let completed = HashSet::from([TaskId::new("m", 0)]);
        let in_progress = HashSet::from([TaskId::new("m", 0)]);
        // Not realistic (completed tasks aren't in_progress) but exercises
        // the "candidate deps don't intersect in_progress" rule directly.
        let ready = get_ready_tasks_excluding(&tasks, &completed, &in_progress, None, 10);
        assert!(ready.is_empty());
    }

    #[test]
    fn topological_sort_orders_dependencies_first() {
        let tasks = vec![
            task("m", 2, Status::NotStarted, vec![TaskId::new("m", 1)]),
            task("m", 0, Status::NotStarted, vec![]),
            task("m", 1, Status::NotStarted, vec![]), // implicit dep on m/E00
        ];
        let order = topological_sort(&tasks);
        let pos = |id: &TaskId| order.iter().position(|x| x == id).unwrap();
        assert!(pos(&TaskId::new("m", 0)) < pos(&TaskId::new("m", 1)));
        assert!(pos(&TaskId::new("m", 1)) < pos(&TaskId::new("m", 2)));
    }

    #[test]
    fn topological_sort_omits_cycle_members() {
        // Two tasks in different modules with an explicit mutual
        // dependency form a cycle; neither ever reaches in-degree 0.
        let mut a = task("a", 0, Status::NotStarted, vec![TaskId::new("b", 0)]);
        let b = task("b", 0, Status::NotStarted, vec![TaskId::new("a", 0)]);
        a.depends_on = vec![TaskId::new("b", 0)];
        let tasks = vec![a, b];
        let order = topological_sort(&tasks);
        assert!(order.is_empty());
    }

    #[test]
    fn is_ready_matches_the_universal_property() {
        let all_ids = HashSet::from([TaskId::new("m", 0), TaskId::new("m", 1)]);
        let t = task("m", 1, Status::NotStarted, vec![]);
        assert!(!is_ready(&t, &all_ids, &HashSet::new()));
        let completed = HashSet::from([TaskId::new("m", 0)]);
        assert!(is_ready(&t, &all_ids, &completed));
    }
}

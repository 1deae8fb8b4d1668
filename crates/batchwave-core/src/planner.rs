use crate::error::{BatchError, Result};
use crate::task::TaskRecord;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Dependency extraction
// ---------------------------------------------------------------------------

static DEP_CLAUSE_RE: OnceLock<Regex> = OnceLock::new();
static BRACKET_ID_RE: OnceLock<Regex> = OnceLock::new();

/// A keyword followed by one or more bracketed ids:
/// `blocked by [T1]`, `Depends on: [T1], [T2] and [T3]`, `after [T4]`.
fn dep_clause_re() -> &'static Regex {
    DEP_CLAUSE_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:blocked\s+by|depends\s+on|after|requires)\b\s*:?\s*((?:\[[^\[\]]+\](?:\s*(?:,|&|\band\b)?\s*)?)+)",
        )
        .expect("valid dependency clause regex")
    })
}

fn bracket_id_re() -> &'static Regex {
    BRACKET_ID_RE.get_or_init(|| Regex::new(r"\[\s*([^\[\]]+?)\s*\]").expect("valid id regex"))
}

/// Distinct task ids referenced as blockers in `text`, in order of first
/// appearance.
pub fn extract_dependencies(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut deps = Vec::new();
    for clause in dep_clause_re().captures_iter(text) {
        let Some(list) = clause.get(1) else { continue };
        for id in bracket_id_re().captures_iter(list.as_str()) {
            let id = id[1].to_string();
            if seen.insert(id.clone()) {
                deps.push(id);
            }
        }
    }
    deps
}

// ---------------------------------------------------------------------------
// DependencyGraph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub task: TaskRecord,
    /// Blockers that exist in this task set.
    pub deps: Vec<String>,
    /// Tasks that list this one as a blocker. Informational only.
    pub dependents: Vec<String>,
    pub priority: u8,
}

/// Dependency graph over one planning snapshot. Nodes keep input order,
/// which is the final tie-break inside a wave.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    pub fn build(tasks: Vec<TaskRecord>) -> Result<Self> {
        let mut index = HashMap::new();
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.id.clone(), i).is_some() {
                return Err(BatchError::DuplicateTask(task.id.clone()));
            }
        }

        let mut nodes: Vec<GraphNode> = tasks
            .into_iter()
            .map(|task| {
                let deps: Vec<String> = extract_dependencies(&task.description)
                    .into_iter()
                    .filter(|dep| {
                        let known = index.contains_key(dep);
                        if !known {
                            tracing::debug!(task = %task.id, dep = %dep, "ignoring reference to unknown task");
                        }
                        known
                    })
                    .collect();
                GraphNode {
                    priority: task.priority,
                    task,
                    deps,
                    dependents: Vec::new(),
                }
            })
            .collect();

        let edges: Vec<(usize, String)> = nodes
            .iter()
            .flat_map(|node| {
                node.deps
                    .iter()
                    .map(|dep| (index[dep], node.task.id.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (dep_idx, dependent) in edges {
            nodes[dep_idx].dependents.push(dependent);
        }

        Ok(Self { nodes, index })
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn get(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Layer the graph into waves (Kahn's algorithm, one level at a time).
    ///
    /// Every task lands in the first wave after all of its blockers. Within a
    /// wave tasks are ordered by priority, then input order. If a level comes
    /// up empty while tasks remain, the remainder is reported as a cycle and
    /// no plan is produced.
    pub fn waves(&self) -> Result<Plan> {
        let n = self.nodes.len();
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|node| node.deps.len()).collect();

        let mut current: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut waves: Vec<Vec<usize>> = Vec::new();
        let mut scheduled = 0usize;

        while !current.is_empty() {
            current.sort_by_key(|&i| (self.nodes[i].priority, i));
            scheduled += current.len();

            let mut next = Vec::new();
            for &i in &current {
                for dependent in &self.nodes[i].dependents {
                    let d = self.index[dependent];
                    in_degree[d] -= 1;
                    if in_degree[d] == 0 {
                        next.push(d);
                    }
                }
            }

            waves.push(current);
            current = next;
        }

        if scheduled < n {
            let placed: HashSet<usize> = waves.iter().flatten().copied().collect();
            let stuck: Vec<String> = (0..n)
                .filter(|i| !placed.contains(i))
                .map(|i| self.nodes[i].task.id.clone())
                .collect();
            return Err(BatchError::DependencyCycle { stuck });
        }

        let waves = waves
            .into_iter()
            .enumerate()
            .map(|(number, members)| Wave {
                number: number + 1,
                tasks: members
                    .into_iter()
                    .map(|i| {
                        let node = &self.nodes[i];
                        WaveTask {
                            id: node.task.id.clone(),
                            title: node.task.title.clone(),
                            priority: node.priority,
                            deps: node.deps.clone(),
                        }
                    })
                    .collect(),
            })
            .collect();

        Ok(Plan { waves })
    }
}

// ---------------------------------------------------------------------------
// Plan / Wave
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveTask {
    pub id: String,
    pub title: String,
    pub priority: u8,
    pub deps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wave {
    pub number: usize,
    pub tasks: Vec<WaveTask>,
}

impl Wave {
    pub fn ids(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.id.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub waves: Vec<Wave>,
}

impl Plan {
    pub fn task_count(&self) -> usize {
        self.waves.iter().map(|w| w.tasks.len()).sum()
    }
}

/// Plan the pending subset of a task snapshot. Tasks that are already under
/// way or done are dropped, so references to them count as satisfied.
pub fn plan(tasks: Vec<TaskRecord>) -> Result<Plan> {
    let pending: Vec<TaskRecord> = tasks.into_iter().filter(|t| t.status.is_pending()).collect();
    DependencyGraph::build(pending)?.waves()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;

    fn task(id: &str, priority: u8, description: &str) -> TaskRecord {
        TaskRecord::new(id, format!("task {id}"))
            .with_priority(priority)
            .with_description(description)
    }

    fn wave_ids(plan: &Plan) -> Vec<Vec<String>> {
        plan.waves
            .iter()
            .map(|w| w.tasks.iter().map(|t| t.id.clone()).collect())
            .collect()
    }

    // -- extraction ---------------------------------------------------------

    #[test]
    fn extracts_each_keyword_case_insensitively() {
        assert_eq!(extract_dependencies("Blocked by [A]"), vec!["A"]);
        assert_eq!(extract_dependencies("DEPENDS ON [b-2]"), vec!["b-2"]);
        assert_eq!(extract_dependencies("run after [c]"), vec!["c"]);
        assert_eq!(extract_dependencies("Requires: [d]"), vec!["d"]);
    }

    #[test]
    fn extracts_lists_and_dedups() {
        let deps =
            extract_dependencies("depends on [T1], [T2] and [T3]. Also blocked by [T1] & [T4]");
        assert_eq!(deps, vec!["T1", "T2", "T3", "T4"]);
    }

    #[test]
    fn ignores_brackets_without_keyword() {
        assert!(extract_dependencies("see [T1] for context").is_empty());
        assert!(extract_dependencies("thereafter [T1]").is_empty());
        assert!(extract_dependencies("blocked by T1").is_empty());
    }

    // -- graph --------------------------------------------------------------

    #[test]
    fn dangling_references_are_dropped() {
        let graph =
            DependencyGraph::build(vec![task("A", 0, "blocked by [GHOST]"), task("B", 1, "")])
                .unwrap();
        assert!(graph.get("A").unwrap().deps.is_empty());
        let plan = graph.waves().unwrap();
        assert_eq!(wave_ids(&plan), vec![vec!["A", "B"]]);
    }

    #[test]
    fn dependents_are_reverse_links() {
        let graph = DependencyGraph::build(vec![
            task("A", 0, ""),
            task("B", 0, "after [A]"),
            task("C", 0, "after [A]"),
        ])
        .unwrap();
        assert_eq!(graph.get("A").unwrap().dependents, vec!["B", "C"]);
        assert!(graph.get("B").unwrap().dependents.is_empty());
    }

    #[test]
    fn duplicate_task_ids_are_rejected() {
        let err = DependencyGraph::build(vec![task("A", 0, ""), task("A", 1, "")]).unwrap_err();
        assert!(matches!(err, BatchError::DuplicateTask(id) if id == "A"));
    }

    // -- waves --------------------------------------------------------------

    #[test]
    fn example_scenario() {
        let plan = DependencyGraph::build(vec![
            task("T1", 1, ""),
            task("T2", 0, ""),
            task("T3", 0, "depends on [T1]"),
        ])
        .unwrap()
        .waves()
        .unwrap();
        assert_eq!(wave_ids(&plan), vec![vec!["T2", "T1"], vec!["T3"]]);
        assert_eq!(plan.waves[0].number, 1);
        assert_eq!(plan.waves[1].tasks[0].deps, vec!["T1"]);
    }

    #[test]
    fn priority_orders_within_wave() {
        let plan = DependencyGraph::build(vec![task("X", 2, ""), task("Y", 0, ""), task("Z", 1, "")])
            .unwrap()
            .waves()
            .unwrap();
        assert_eq!(wave_ids(&plan), vec![vec!["Y", "Z", "X"]]);
    }

    #[test]
    fn equal_priority_keeps_input_order() {
        let plan = DependencyGraph::build(vec![task("c", 1, ""), task("a", 1, ""), task("b", 1, "")])
            .unwrap()
            .waves()
            .unwrap();
        assert_eq!(wave_ids(&plan), vec![vec!["c", "a", "b"]]);
    }

    #[test]
    fn every_task_follows_its_deps() {
        let tasks = vec![
            task("deploy", 0, "requires [test] and [docs]"),
            task("docs", 2, "after [api]"),
            task("test", 1, "depends on [api], [db]"),
            task("api", 0, "blocked by [db]"),
            task("db", 3, ""),
            task("lint", 1, ""),
        ];
        let graph = DependencyGraph::build(tasks).unwrap();
        let plan = graph.waves().unwrap();

        let mut wave_of = HashMap::new();
        for wave in &plan.waves {
            for t in &wave.tasks {
                assert!(wave_of.insert(t.id.clone(), wave.number).is_none(), "scheduled twice");
            }
        }
        assert_eq!(wave_of.len(), 6);
        assert_eq!(plan.task_count(), 6);
        for node in graph.nodes() {
            for dep in &node.deps {
                assert!(wave_of[dep] < wave_of[&node.task.id]);
            }
        }
        assert_eq!(
            wave_ids(&plan),
            vec![
                vec!["lint", "db"],
                vec!["api"],
                vec!["test", "docs"],
                vec!["deploy"]
            ]
        );
    }

    #[test]
    fn two_node_cycle_is_an_error() {
        let err = DependencyGraph::build(vec![
            task("A", 0, "depends on [B]"),
            task("B", 0, "depends on [A]"),
            task("C", 0, ""),
        ])
        .unwrap()
        .waves()
        .unwrap_err();
        match err {
            BatchError::DependencyCycle { stuck } => assert_eq!(stuck, vec!["A", "B"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn cycle_reports_downstream_tasks_too() {
        let err = DependencyGraph::build(vec![
            task("A", 0, "after [B]"),
            task("B", 0, "after [A]"),
            task("D", 0, "after [A]"),
        ])
        .unwrap()
        .waves()
        .unwrap_err();
        assert!(err.to_string().contains("A, B, D"));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let err = DependencyGraph::build(vec![task("A", 0, "blocked by [A]")])
            .unwrap()
            .waves()
            .unwrap_err();
        assert!(matches!(err, BatchError::DependencyCycle { .. }));
    }

    #[test]
    fn plan_skips_started_tasks_and_treats_them_as_satisfied() {
        let plan = plan(vec![
            task("A", 0, "").with_status(TaskStatus::Done),
            task("B", 0, "after [A]"),
            task("C", 0, "after [B]").with_status(TaskStatus::Backlog),
            task("D", 0, "").with_status(TaskStatus::InProgress),
        ])
        .unwrap();
        assert_eq!(wave_ids(&plan), vec![vec!["B"], vec!["C"]]);
    }

    #[test]
    fn empty_input_is_empty_plan() {
        let plan = plan(Vec::new()).unwrap();
        assert!(plan.waves.is_empty());
    }
}

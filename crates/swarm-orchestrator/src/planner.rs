use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use swarm_core::message::is_safe_id;
use swarm_core::{Epic, Subtask, SwarmError, SwarmResult};

/// A subtask as proposed by the decomposing agent, before ids and defaults
/// are filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskDraft {
    /// Explicit id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Short name.
    pub title: String,
    /// What the worker must do.
    pub description: String,
    /// Files the subtask will own.
    pub files: Vec<String>,
    /// Ids of prerequisite subtasks.
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
    /// 1 to 5; out-of-range values are clamped.
    pub complexity: i64,
}

/// A proposed epic plus subtask drafts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decomposition {
    /// The proposed epic.
    pub epic: Epic,
    /// Proposed subtasks in plan order.
    pub subtasks: Vec<SubtaskDraft>,
}

impl Decomposition {
    /// Parse a decomposition from JSON.
    pub fn parse(raw: &str) -> SwarmResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| SwarmError::Validation(format!("invalid decomposition: {e}")))
    }
}

/// Summary returned by a successful validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Number of subtasks.
    pub subtask_count: usize,
    /// Subtasks with no dependencies.
    pub independent_tasks: usize,
    /// How many subtasks can start right away, capped at the worker limit.
    pub can_parallelize: usize,
}

/// Turns a [`Decomposition`] into a list of subtasks that satisfies file
/// exclusivity and forms a dependency DAG.
#[derive(Debug, Clone)]
pub struct PlanValidator {
    max_parallel: usize,
}

impl PlanValidator {
    /// Validator capping parallelism at `max_parallel`.
    pub fn new(max_parallel: usize) -> Self {
        Self { max_parallel }
    }

    /// Normalize `decomposition` and check it for file conflicts and cycles.
    pub fn validate(
        &self,
        decomposition: Decomposition,
    ) -> SwarmResult<(Epic, Vec<Subtask>, ValidationReport)> {
        let subtasks = normalize(decomposition.subtasks)?;

        let conflicts = detect_file_conflicts(&subtasks);
        if !conflicts.is_empty() {
            return Err(SwarmError::Validation(format!(
                "file conflicts detected: {}. each file can only be assigned to one subtask",
                conflicts.join(", ")
            )));
        }

        let dangling = check_dependencies(&subtasks);
        if !dangling.is_empty() {
            return Err(SwarmError::Validation(format!(
                "dependency errors: {}",
                dangling.join("; ")
            )));
        }

        if let Some(id) = find_cycle(&subtasks) {
            return Err(SwarmError::Validation(format!(
                "circular dependency detected involving \"{id}\""
            )));
        }

        let independent_tasks = subtasks.iter().filter(|s| s.is_independent()).count();
        let report = ValidationReport {
            subtask_count: subtasks.len(),
            independent_tasks,
            can_parallelize: independent_tasks.min(self.max_parallel),
        };
        Ok((decomposition.epic, subtasks, report))
    }
}

/// Fill default ids (`task-N` by position) and dependency lists, and reject
/// payloads that are structurally malformed.
fn normalize(drafts: Vec<SubtaskDraft>) -> SwarmResult<Vec<Subtask>> {
    if drafts.is_empty() {
        return Err(SwarmError::Validation(
            "decomposition contains no subtasks".into(),
        ));
    }
    let mut seen = HashSet::new();
    let mut subtasks = Vec::with_capacity(drafts.len());
    for (i, draft) in drafts.into_iter().enumerate() {
        let id = draft.id.unwrap_or_else(|| format!("task-{}", i + 1));
        if id.trim().is_empty() {
            return Err(SwarmError::Validation(format!(
                "subtask at position {} has an empty id",
                i + 1
            )));
        }
        // Ids become worktree directory names and mailbox ids.
        if !is_safe_id(&id) {
            return Err(SwarmError::Validation(format!(
                "subtask id \"{id}\" may only use letters, digits, '-', '_' or '.'"
            )));
        }
        if !seen.insert(id.clone()) {
            return Err(SwarmError::Validation(format!("duplicate subtask id \"{id}\"")));
        }
        let complexity = u8::try_from(draft.complexity)
            .ok()
            .filter(|c| (1..=5).contains(c))
            .ok_or_else(|| {
                SwarmError::Validation(format!(
                    "subtask \"{id}\" has complexity {}, expected 1 to 5",
                    draft.complexity
                ))
            })?;
        subtasks.push(Subtask {
            id,
            title: draft.title,
            description: draft.description,
            files: draft.files,
            dependencies: draft.dependencies.unwrap_or_default(),
            complexity,
        });
    }
    Ok(subtasks)
}

/// Every file path claimed by two or more subtasks, in detection order.
pub fn detect_file_conflicts(subtasks: &[Subtask]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut conflicts = Vec::new();
    for subtask in subtasks {
        // A subtask listing the same file twice does not conflict with itself.
        let mut own = HashSet::new();
        for file in subtask.files.iter().map(String::as_str) {
            if !own.insert(file) {
                continue;
            }
            let count = counts.entry(file).or_insert(0);
            *count += 1;
            if *count == 2 {
                conflicts.push(file.to_string());
            }
        }
    }
    conflicts
}

/// Dangling and self-referencing dependencies.
pub fn check_dependencies(subtasks: &[Subtask]) -> Vec<String> {
    let ids: HashSet<&str> = subtasks.iter().map(|s| s.id.as_str()).collect();
    let mut errors = Vec::new();
    for subtask in subtasks {
        for dep in &subtask.dependencies {
            if dep == &subtask.id {
                errors.push(format!("subtask \"{}\" depends on itself", subtask.id));
            } else if !ids.contains(dep.as_str()) {
                errors.push(format!(
                    "subtask \"{}\" depends on non-existent task \"{dep}\"",
                    subtask.id
                ));
            }
        }
    }
    errors
}

/// First subtask (in plan order) from which a dependency cycle is reachable.
pub fn find_cycle(subtasks: &[Subtask]) -> Option<String> {
    let graph: BTreeMap<&str, &[String]> = subtasks
        .iter()
        .map(|s| (s.id.as_str(), s.dependencies.as_slice()))
        .collect();
    // 1 = on the current path, 2 = fully explored
    let mut visited: HashMap<&str, u8> = HashMap::new();
    subtasks
        .iter()
        .find(|s| reaches_cycle(s.id.as_str(), &graph, &mut visited))
        .map(|s| s.id.clone())
}

/// Depth-first walk from `start` with an explicit stack, so long dependency
/// chains cannot exhaust the call stack.
fn reaches_cycle<'a>(
    start: &'a str,
    graph: &BTreeMap<&'a str, &'a [String]>,
    visited: &mut HashMap<&'a str, u8>,
) -> bool {
    match visited.get(start) {
        Some(1) => return true,
        Some(2) => return false,
        _ => {}
    }
    let deps_of = |id: &'a str| graph.get(id).copied().unwrap_or_default();
    visited.insert(start, 1);
    let mut stack: Vec<(&'a str, std::slice::Iter<'a, String>)> =
        vec![(start, deps_of(start).iter())];
    while let Some((id, deps)) = stack.last_mut() {
        match deps.next() {
            Some(dep) => match visited.get(dep.as_str()) {
                Some(1) => return true,
                Some(2) => {}
                _ => {
                    visited.insert(dep.as_str(), 1);
                    stack.push((dep.as_str(), deps_of(dep.as_str()).iter()));
                }
            },
            None => {
                visited.insert(*id, 2);
                stack.pop();
            }
        }
    }
    false
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn draft(id: Option<&str>, files: &[&str], deps: Option<&[&str]>) -> SubtaskDraft {
        SubtaskDraft {
            id: id.map(str::to_string),
            title: "t".into(),
            description: "d".into(),
            files: files.iter().map(|f| f.to_string()).collect(),
            dependencies: deps.map(|d| d.iter().map(|x| x.to_string()).collect()),
            complexity: 2,
        }
    }

    fn decomposition(subtasks: Vec<SubtaskDraft>) -> Decomposition {
        Decomposition {
            epic: Epic {
                title: "Epic".into(),
                description: None,
            },
            subtasks,
        }
    }

    fn validation_message(err: SwarmError) -> String {
        match err {
            SwarmError::Validation(msg) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_default_ids_and_dependencies() {
        let (_, subtasks, report) = PlanValidator::new(3)
            .validate(decomposition(vec![
                draft(None, &["a.rs"], None),
                draft(Some("custom"), &["b.rs"], Some(&["task-1"])),
                draft(None, &["c.rs"], None),
            ]))
            .unwrap();
        let ids: Vec<&str> = subtasks.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["task-1", "custom", "task-3"]);
        assert!(subtasks[0].dependencies.is_empty());
        assert_eq!(report.subtask_count, 3);
        assert_eq!(report.independent_tasks, 2);
        assert_eq!(report.can_parallelize, 2);
    }

    #[test]
    fn test_parallel_hint_is_capped() {
        let drafts = (0..5)
            .map(|i| {
                let file = format!("f{i}.rs");
                draft(None, &[file.as_str()], None)
            })
            .collect();
        let (_, _, report) = PlanValidator::new(3).validate(decomposition(drafts)).unwrap();
        assert_eq!(report.independent_tasks, 5);
        assert_eq!(report.can_parallelize, 3);
    }

    #[test]
    fn test_file_conflicts_name_every_path() {
        let err = PlanValidator::new(3)
            .validate(decomposition(vec![
                draft(None, &["x.ts", "y.ts"], None),
                draft(None, &["x.ts"], None),
                draft(None, &["y.ts", "z.ts"], None),
                draft(None, &["x.ts"], None),
            ]))
            .unwrap_err();
        let msg = validation_message(err);
        assert!(msg.contains("file conflicts detected: x.ts, y.ts"), "{msg}");
        assert!(!msg.contains("z.ts"));
    }

    #[test]
    fn test_repeated_file_within_one_subtask_is_not_a_conflict() {
        let subtasks = normalize(vec![
            draft(None, &["a.rs", "a.rs"], None),
            draft(None, &["b.rs"], None),
        ])
        .unwrap();
        assert!(detect_file_conflicts(&subtasks).is_empty());
    }

    #[test]
    fn test_dangling_and_self_dependencies() {
        let err = PlanValidator::new(3)
            .validate(decomposition(vec![
                draft(Some("a"), &["a.rs"], Some(&["a"])),
                draft(Some("b"), &["b.rs"], Some(&["ghost"])),
            ]))
            .unwrap_err();
        let msg = validation_message(err);
        assert!(msg.contains("\"a\" depends on itself"));
        assert!(msg.contains("\"b\" depends on non-existent task \"ghost\""));
    }

    #[test]
    fn test_two_node_cycle() {
        let err = PlanValidator::new(3)
            .validate(decomposition(vec![
                draft(Some("A"), &["a.rs"], Some(&["B"])),
                draft(Some("B"), &["b.rs"], Some(&["A"])),
            ]))
            .unwrap_err();
        assert!(validation_message(err).contains("circular dependency detected involving \"A\""));
    }

    #[test]
    fn test_cycle_reported_from_first_participant_reached() {
        let subtasks = normalize(vec![
            draft(Some("root"), &["r.rs"], None),
            draft(Some("x"), &["x.rs"], Some(&["y"])),
            draft(Some("y"), &["y.rs"], Some(&["z"])),
            draft(Some("z"), &["z.rs"], Some(&["x"])),
        ])
        .unwrap();
        assert_eq!(find_cycle(&subtasks), Some("x".to_string()));
    }

    #[test]
    fn test_diamond_is_acyclic() {
        let subtasks = normalize(vec![
            draft(Some("a"), &["a.rs"], None),
            draft(Some("b"), &["b.rs"], Some(&["a"])),
            draft(Some("c"), &["c.rs"], Some(&["a"])),
            draft(Some("d"), &["d.rs"], Some(&["b", "c"])),
        ])
        .unwrap();
        assert_eq!(find_cycle(&subtasks), None);
    }

    #[test]
    fn test_long_dependency_chain() {
        let drafts: Vec<SubtaskDraft> = (0..50_000)
            .map(|i| {
                let file = format!("f{i}.rs");
                let mut d = draft(Some(&format!("t{i}")), &[file.as_str()], None);
                if i > 0 {
                    d.dependencies = Some(vec![format!("t{}", i - 1)]);
                }
                d
            })
            .collect();
        let subtasks = normalize(drafts).unwrap();
        assert_eq!(find_cycle(&subtasks), None);

        let mut looped = subtasks;
        looped[0].dependencies = vec!["t49999".to_string()];
        assert_eq!(find_cycle(&looped), Some("t0".to_string()));
    }

    #[test]
    fn test_ids_must_be_path_safe() {
        for bad in ["auth login", "x/../../../escaped", "..", ".", "a\\b", "ünïcode"] {
            let err = PlanValidator::new(3)
                .validate(decomposition(vec![draft(Some(bad), &["a.rs"], None)]))
                .unwrap_err();
            assert_eq!(err.kind(), swarm_core::ErrorKind::Validation, "{bad}");
            assert!(validation_message(err).contains("may only use letters"), "{bad}");
        }
        assert!(PlanValidator::new(3)
            .validate(decomposition(vec![draft(Some("auth_login.v2-x"), &["a.rs"], None)]))
            .is_ok());
    }

    #[test]
    fn test_malformed_payloads() {
        let mut bad = draft(None, &["a.rs"], None);
        bad.complexity = 9;
        assert!(PlanValidator::new(3)
            .validate(decomposition(vec![bad]))
            .is_err());

        let dupes = vec![
            draft(Some("a"), &["a.rs"], None),
            draft(Some("a"), &["b.rs"], None),
        ];
        let msg = validation_message(PlanValidator::new(3).validate(decomposition(dupes)).unwrap_err());
        assert!(msg.contains("duplicate subtask id"));

        assert!(PlanValidator::new(3).validate(decomposition(vec![])).is_err());
        assert!(matches!(
            Decomposition::parse("{\"epic\": 1}"),
            Err(SwarmError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_accepts_minimal_payload() {
        let parsed = Decomposition::parse(
            r#"{"epic":{"title":"Login"},"subtasks":[{"title":"api","description":"d","files":["api.rs"],"complexity":3}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.subtasks.len(), 1);
        assert!(parsed.subtasks[0].id.is_none());
        assert!(parsed.subtasks[0].dependencies.is_none());
    }
}

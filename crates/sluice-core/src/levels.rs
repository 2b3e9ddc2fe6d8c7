use crate::errors::DagError;
use std::collections::HashMap;

/// A node of the dependency graph, borrowed from whatever task representation
/// the caller holds.
#[derive(Debug, Clone, Copy)]
pub struct TaskNode<'a> {
    pub name: &'a str,
    pub depends_on: &'a [String],
}

/// Groups tasks into execution levels with Kahn's algorithm.
///
/// Level 0 holds tasks with no dependencies, level 1 tasks that depend only
/// on level 0, and so on. The returned indices preserve the declared task
/// order within each level. A cycle is reported with the full set of
/// implicated task names.
pub fn level_groups(nodes: &[TaskNode<'_>]) -> Result<Vec<Vec<usize>>, DagError> {
    let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        if index_of.insert(node.name, i).is_some() {
            return Err(DagError::DuplicateTask(node.name.to_string()));
        }
    }

    let mut in_degree: Vec<usize> = nodes.iter().map(|n| n.depends_on.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        for dep in node.depends_on {
            let Some(&dep_idx) = index_of.get(dep.as_str()) else {
                return Err(DagError::UnknownDependency {
                    task: node.name.to_string(),
                    dependency: dep.clone(),
                });
            };
            dependents[dep_idx].push(i);
        }
    }

    let mut levels: Vec<Vec<usize>> = Vec::new();
    let mut resolved = vec![false; nodes.len()];
    let mut resolved_count = 0usize;

    while resolved_count < nodes.len() {
        let level: Vec<usize> = (0..nodes.len())
            .filter(|&i| !resolved[i] && in_degree[i] == 0)
            .collect();

        if level.is_empty() {
            let mut tasks: Vec<String> = (0..nodes.len())
                .filter(|&i| !resolved[i])
                .map(|i| nodes[i].name.to_string())
                .collect();
            tasks.sort();
            return Err(DagError::CycleDetected { tasks });
        }

        for &i in &level {
            resolved[i] = true;
            resolved_count += 1;
            for &child in &dependents[i] {
                in_degree[child] -= 1;
            }
        }
        levels.push(level);
    }

    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(defs: &[(&'static str, Vec<String>)]) -> Vec<(&'static str, Vec<String>)> {
        defs.to_vec()
    }

    fn groups(defs: &[(&'static str, Vec<String>)]) -> Result<Vec<Vec<usize>>, DagError> {
        let nodes: Vec<TaskNode<'_>> = defs
            .iter()
            .map(|(name, deps)| TaskNode {
                name,
                depends_on: deps,
            })
            .collect();
        level_groups(&nodes)
    }

    fn deps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn linear_chain_yields_one_task_per_level() {
        let defs = nodes(&[
            ("a", deps(&[])),
            ("b", deps(&["a"])),
            ("c", deps(&["b"])),
        ]);
        let levels = groups(&defs).expect("level grouping");
        assert_eq!(levels, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn diamond_groups_middle_tasks_together() {
        let defs = nodes(&[
            ("a", deps(&[])),
            ("b", deps(&["a"])),
            ("c", deps(&["a"])),
            ("d", deps(&["b", "c"])),
        ]);
        let levels = groups(&defs).expect("level grouping");
        assert_eq!(levels, vec![vec![0], vec![1, 2], vec![3]]);
    }

    #[test]
    fn independent_tasks_all_land_in_level_zero() {
        let defs = nodes(&[("a", deps(&[])), ("b", deps(&[])), ("c", deps(&[]))]);
        let levels = groups(&defs).expect("level grouping");
        assert_eq!(levels, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn empty_graph_has_no_levels() {
        let levels = level_groups(&[]).expect("empty grouping");
        assert!(levels.is_empty());
    }

    #[test]
    fn declared_order_is_preserved_within_a_level() {
        let defs = nodes(&[
            ("zeta", deps(&[])),
            ("alpha", deps(&[])),
            ("mid", deps(&["zeta", "alpha"])),
        ]);
        let levels = groups(&defs).expect("level grouping");
        assert_eq!(levels[0], vec![0, 1]);
    }

    #[test]
    fn every_dependency_lands_on_an_earlier_level() {
        let defs = nodes(&[
            ("a", deps(&[])),
            ("b", deps(&["a"])),
            ("c", deps(&["a"])),
            ("d", deps(&["b"])),
            ("e", deps(&["c", "d"])),
        ]);
        let levels = groups(&defs).expect("level grouping");

        let mut level_of = vec![0usize; defs.len()];
        for (level_idx, level) in levels.iter().enumerate() {
            for &task_idx in level {
                level_of[task_idx] = level_idx;
            }
        }
        for (i, (_, task_deps)) in defs.iter().enumerate() {
            for dep in task_deps {
                let dep_idx = defs.iter().position(|(n, _)| n == dep).expect("dep");
                assert!(level_of[dep_idx] < level_of[i]);
            }
        }
    }

    #[test]
    fn cycle_is_reported_with_implicated_tasks() {
        let defs = nodes(&[
            ("root", deps(&[])),
            ("a", deps(&["c", "root"])),
            ("b", deps(&["a"])),
            ("c", deps(&["b"])),
        ]);
        let err = groups(&defs).expect_err("cycle should fail");
        assert_eq!(
            err,
            DagError::CycleDetected {
                tasks: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            }
        );
        assert!(err.to_string().contains("a, b, c"));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let defs = nodes(&[("a", deps(&["ghost"]))]);
        let err = groups(&defs).expect_err("unknown dep should fail");
        assert_eq!(
            err,
            DagError::UnknownDependency {
                task: "a".to_string(),
                dependency: "ghost".to_string(),
            }
        );
    }

    #[test]
    fn duplicate_task_name_is_rejected() {
        let defs = nodes(&[("a", deps(&[])), ("a", deps(&[]))]);
        let err = groups(&defs).expect_err("duplicate should fail");
        assert_eq!(err, DagError::DuplicateTask("a".to_string()));
    }
}

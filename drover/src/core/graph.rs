//! Dependency ordering for projects (Kahn's algorithm).

use std::collections::{HashMap, HashSet, VecDeque};

use crate::core::types::{Project, ProjectFile};
use crate::error::GraphError;

/// Order `items` so every dependency precedes its dependents.
///
/// Zero in-degree items are seeded in input order, which makes the result
/// stable for independent subgraphs. Self dependencies, unknown dependency
/// names, and cycles are errors; nothing is silently dropped.
pub fn order<'a, T, K, D>(items: &'a [T], key_of: K, deps_of: D) -> Result<Vec<&'a T>, GraphError>
where
    K: Fn(&T) -> &str,
    D: Fn(&T) -> Vec<&str>,
{
    let indices = order_indices(items, &key_of, &deps_of)?;
    Ok(indices.into_iter().map(|index| &items[index]).collect())
}

/// Group items into waves: every item's dependencies live in earlier waves.
///
/// Items within a wave keep their topological order.
pub fn waves<'a, T, K, D>(items: &'a [T], key_of: K, deps_of: D) -> Result<Vec<Vec<&'a T>>, GraphError>
where
    K: Fn(&T) -> &str,
    D: Fn(&T) -> Vec<&str>,
{
    let sorted = order_indices(items, &key_of, &deps_of)?;
    let position: HashMap<&str, usize> = items
        .iter()
        .enumerate()
        .map(|(index, item)| (key_of(item), index))
        .collect();

    let mut level = vec![0usize; items.len()];
    for &index in &sorted {
        level[index] = deps_of(&items[index])
            .into_iter()
            .filter_map(|dep| position.get(dep))
            .map(|&dep| level[dep] + 1)
            .max()
            .unwrap_or(0);
    }

    let depth = level.iter().copied().max().map_or(0, |max| max + 1);
    let mut grouped: Vec<Vec<&T>> = vec![Vec::new(); depth];
    for index in sorted {
        grouped[level[index]].push(&items[index]);
    }
    Ok(grouped)
}

fn order_indices<T, K, D>(items: &[T], key_of: &K, deps_of: &D) -> Result<Vec<usize>, GraphError>
where
    K: Fn(&T) -> &str,
    D: Fn(&T) -> Vec<&str>,
{
    let mut position: HashMap<&str, usize> = HashMap::new();
    for (index, item) in items.iter().enumerate() {
        let key = key_of(item);
        if position.insert(key, index).is_some() {
            return Err(GraphError::Duplicate {
                name: key.to_string(),
            });
        }
    }

    // dependents[x] lists items that must come after x.
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
    let mut in_degree = vec![0usize; items.len()];
    for (index, item) in items.iter().enumerate() {
        let name = key_of(item);
        let mut seen = HashSet::new();
        for dep in deps_of(item) {
            if !seen.insert(dep) {
                continue;
            }
            if dep == name {
                return Err(GraphError::SelfDependency {
                    name: name.to_string(),
                });
            }
            let Some(&source) = position.get(dep) else {
                return Err(GraphError::UnknownDependency {
                    name: name.to_string(),
                    dependency: dep.to_string(),
                });
            };
            dependents[source].push(index);
            in_degree[index] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..items.len())
        .filter(|&index| in_degree[index] == 0)
        .collect();
    let mut sorted = Vec::with_capacity(items.len());
    while let Some(index) = queue.pop_front() {
        sorted.push(index);
        for &dependent in &dependents[index] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if sorted.len() < items.len() {
        let ordered: HashSet<usize> = sorted.iter().copied().collect();
        let names = (0..items.len())
            .filter(|index| !ordered.contains(index))
            .map(|index| key_of(&items[index]).to_string())
            .collect();
        return Err(GraphError::Cycle { names });
    }
    Ok(sorted)
}

/// Order projects by their declared dependencies.
pub fn order_projects(projects: &[Project]) -> Result<Vec<&Project>, GraphError> {
    order(projects, |p| p.name.as_str(), project_dependencies)
}

/// Dependency waves of projects for parallel execution.
pub fn project_waves(projects: &[Project]) -> Result<Vec<Vec<&Project>>, GraphError> {
    waves(projects, |p| p.name.as_str(), project_dependencies)
}

fn project_dependencies(project: &Project) -> Vec<&str> {
    project.dependencies.iter().map(String::as_str).collect()
}

/// Files by descending priority; equal priorities keep declaration order.
pub fn order_files(files: &[ProjectFile]) -> Vec<&ProjectFile> {
    let mut ordered: Vec<&ProjectFile> = files.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
    ordered
}

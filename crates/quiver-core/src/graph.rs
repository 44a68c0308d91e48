//! Dependency graph: install ordering and cycle detection.
//!
//! Nodes live in an arena indexed by position, with a name → index map for
//! lookups. Edges point from a dependency to its dependents, so a
//! topological order installs dependencies first.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::error::GraphError;
use crate::lockfile::LockFile;
use crate::model::Artifact;

struct Node {
    artifact: Artifact,
    dependents: Vec<usize>,
    in_degree: usize,
}

/// Orders a working set of artifacts, pulling missing dependencies from a
/// catalog.
pub struct DependencyResolver<'a> {
    catalog: &'a HashMap<String, Artifact>,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(catalog: &'a HashMap<String, Artifact>) -> Self {
        Self { catalog }
    }

    /// Return the working set plus its transitive dependencies, each
    /// dependency before its dependents. Ties keep discovery order.
    pub fn resolve(&self, working_set: &[Artifact]) -> Result<Vec<Artifact>, GraphError> {
        let mut nodes: Vec<Node> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for artifact in working_set {
            if !index.contains_key(&artifact.name) {
                index.insert(artifact.name.clone(), nodes.len());
                nodes.push(Node {
                    artifact: artifact.clone(),
                    dependents: Vec::new(),
                    in_degree: 0,
                });
            }
        }

        // Expand: every node's dependencies become nodes too.
        let mut cursor = 0;
        while cursor < nodes.len() {
            let deps: Vec<String> = nodes[cursor]
                .artifact
                .dependencies
                .iter()
                .map(|d| d.name.clone())
                .collect();

            for dep in deps {
                let dep_idx = match index.get(&dep) {
                    Some(&i) => i,
                    None => {
                        let artifact = self.catalog.get(&dep).ok_or_else(|| {
                            GraphError::DependencyNotFound {
                                dependency: dep.clone(),
                                dependent: nodes[cursor].artifact.name.clone(),
                            }
                        })?;
                        debug!(name = %dep, dependent = %nodes[cursor].artifact.name, "pulled dependency from catalog");
                        let i = nodes.len();
                        index.insert(dep.clone(), i);
                        nodes.push(Node {
                            artifact: artifact.clone(),
                            dependents: Vec::new(),
                            in_degree: 0,
                        });
                        i
                    }
                };

                if !nodes[dep_idx].dependents.contains(&cursor) {
                    nodes[dep_idx].dependents.push(cursor);
                    nodes[cursor].in_degree += 1;
                }
            }
            cursor += 1;
        }

        // Kahn, FIFO.
        let mut in_degree: Vec<usize> = nodes.iter().map(|n| n.in_degree).collect();
        let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order: Vec<usize> = Vec::with_capacity(nodes.len());

        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &dependent in &nodes[i].dependents {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if order.len() < nodes.len() {
            let involved = (0..nodes.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| nodes[i].artifact.name.clone())
                .collect();
            return Err(GraphError::CircularDependency { involved });
        }

        let mut slots: Vec<Option<Artifact>> = nodes.into_iter().map(|n| Some(n.artifact)).collect();
        Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Check the whole lock file for dependency cycles. The error lists the
/// cycle path, first node repeated at the end.
pub fn validate_dependencies(lockfile: &LockFile) -> Result<(), GraphError> {
    let mut names: Vec<&str> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for artifact in &lockfile.artifacts {
        if !index.contains_key(artifact.name.as_str()) {
            index.insert(artifact.name.as_str(), names.len());
            names.push(artifact.name.as_str());
        }
    }

    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); names.len()];
    for artifact in &lockfile.artifacts {
        let from = index[artifact.name.as_str()];
        for dep in &artifact.dependencies {
            if let Some(&to) = index.get(dep.name.as_str()) {
                if !edges[from].contains(&to) {
                    edges[from].push(to);
                }
            }
        }
    }

    let mut marks = vec![Mark::Unvisited; names.len()];
    for start in 0..names.len() {
        if marks[start] == Mark::Unvisited {
            if let Some(cycle) = find_cycle_from(start, &edges, &mut marks) {
                return Err(GraphError::CircularDependency {
                    involved: cycle.into_iter().map(|i| names[i].to_string()).collect(),
                });
            }
        }
    }
    Ok(())
}

/// Iterative DFS from `start`. `path` holds the current chain and `cursor`
/// the next edge to try for each node on it.
fn find_cycle_from(start: usize, edges: &[Vec<usize>], marks: &mut [Mark]) -> Option<Vec<usize>> {
    let mut path = vec![start];
    let mut cursor = vec![0usize];
    marks[start] = Mark::InProgress;

    while let Some(&node) = path.last() {
        let depth = path.len() - 1;
        let Some(&next) = edges[node].get(cursor[depth]) else {
            marks[node] = Mark::Done;
            path.pop();
            cursor.pop();
            continue;
        };
        cursor[depth] += 1;

        match marks[next] {
            Mark::InProgress => {
                let from = path.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle = path[from..].to_vec();
                cycle.push(next);
                return Some(cycle);
            }
            Mark::Unvisited => {
                marks[next] = Mark::InProgress;
                path.push(next);
                cursor.push(0);
            }
            Mark::Done => {}
        }
    }
    None
}

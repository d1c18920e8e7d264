//! Resource dependency graph.
//!
//! Builds a DAG over a module's resources from explicit `depends_on` edges
//! plus implicit kind-level rules, provides cycle detection, topological
//! sorting, and batch grouping for parallel execution.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{Module, Resource};

/// A node in the dependency graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub resource_id: String,
    /// Resource IDs this node depends on.
    pub dependencies: Vec<String>,
    /// Resource IDs depending on this node.
    pub dependents: Vec<String>,
}

/// Dependency graph over a module's resources.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    pub nodes: HashMap<String, GraphNode>,
}

impl DependencyGraph {
    /// Build the graph from a module: explicit `depends_on` edges plus the
    /// implicit kind-level rules, narrowed to actual property references so
    /// unrelated resources of the coupled kinds stay independent.
    pub fn from_module(module: &Module) -> Self {
        let resources = &module.spec.resources;
        let mut graph = Self::default();

        for resource in resources {
            graph.nodes.insert(
                resource.id(),
                GraphNode {
                    resource_id: resource.id(),
                    dependencies: Vec::new(),
                    dependents: Vec::new(),
                },
            );
        }

        for resource in resources {
            let mut deps: Vec<String> = resource.depends_on.clone();
            deps.extend(implicit_dependencies(resource, resources));
            deps.sort();
            deps.dedup();

            for dep in deps {
                if dep == resource.id() {
                    continue;
                }
                if graph.nodes.contains_key(&dep) {
                    graph.add_edge(&dep, &resource.id());
                }
            }
        }

        graph
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        if let Some(node) = self.nodes.get_mut(to) {
            if !node.dependencies.contains(&from.to_string()) {
                node.dependencies.push(from.to_string());
            }
        }
        if let Some(node) = self.nodes.get_mut(from) {
            if !node.dependents.contains(&to.to_string()) {
                node.dependents.push(to.to_string());
            }
        }
    }

    /// Check for a cycle with an iterative DFS over dependents.
    pub fn has_cycle(&self) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut in_stack: HashSet<&str> = HashSet::new();

        for id in self.nodes.keys() {
            if self.cycle_dfs(id, &mut visited, &mut in_stack) {
                return true;
            }
        }
        false
    }

    fn cycle_dfs<'a>(
        &'a self,
        id: &'a str,
        visited: &mut HashSet<&'a str>,
        in_stack: &mut HashSet<&'a str>,
    ) -> bool {
        if in_stack.contains(id) {
            return true;
        }
        if visited.contains(id) {
            return false;
        }
        visited.insert(id);
        in_stack.insert(id);

        if let Some(node) = self.nodes.get(id) {
            for dependent in &node.dependents {
                if self.cycle_dfs(dependent, visited, in_stack) {
                    return true;
                }
            }
        }

        in_stack.remove(id);
        false
    }

    /// Kahn's algorithm; fails with `CircularDependency` when a cycle
    /// prevents completion.
    pub fn topological_sort(&self) -> EngineResult<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        for (id, node) in &self.nodes {
            in_degree.insert(id, node.dependencies.len());
        }
        let mut roots: Vec<&str> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();
        roots.sort_unstable();
        queue.extend(roots);

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            if let Some(node) = self.nodes.get(id) {
                for dependent in &node.dependents {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dependent);
                        }
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck = self.first_unresolved(&order);
            return Err(EngineError::CircularDependency(stuck));
        }
        Ok(order)
    }

    /// Group resources into batches: every member of a batch has all of its
    /// dependencies in strictly earlier batches, so order within a batch is
    /// unconstrained.
    pub fn execution_batches(&self) -> EngineResult<Vec<Vec<String>>> {
        let mut batches = Vec::new();
        let mut remaining: HashSet<&str> = self.nodes.keys().map(String::as_str).collect();
        let mut completed: HashSet<&str> = HashSet::new();

        while !remaining.is_empty() {
            let mut batch: Vec<&str> = remaining
                .iter()
                .filter(|id| {
                    self.nodes
                        .get(**id)
                        .map(|node| {
                            node.dependencies
                                .iter()
                                .all(|dep| completed.contains(dep.as_str()))
                        })
                        .unwrap_or(false)
                })
                .copied()
                .collect();

            if batch.is_empty() {
                let stuck = self.first_unresolved(
                    &completed.iter().map(|s| (*s).to_string()).collect::<Vec<_>>(),
                );
                return Err(EngineError::CircularDependency(stuck));
            }

            batch.sort_unstable();
            for id in &batch {
                remaining.remove(*id);
                completed.insert(*id);
            }
            batches.push(batch.into_iter().map(String::from).collect());
        }

        debug!(batches = batches.len(), "computed execution batches");
        Ok(batches)
    }

    /// Name a node outside the resolved set, for cycle error messages.
    fn first_unresolved(&self, resolved: &[String]) -> String {
        let resolved: HashSet<&str> = resolved.iter().map(String::as_str).collect();
        let mut unresolved: Vec<&str> = self
            .nodes
            .keys()
            .map(String::as_str)
            .filter(|id| !resolved.contains(*id))
            .collect();
        unresolved.sort_unstable();
        unresolved.first().map_or_else(String::new, |s| (*s).to_string())
    }
}

/// Implicit kind-level dependencies, narrowed by property references:
/// a `file` depends on the `user` its owner/group names, a `service` on
/// the `pkg` its package property (or its own name) names, and a `shell`
/// on the user it runs as, the file its `creates` path matches, and any
/// pkg listed under `requires`.
fn implicit_dependencies(resource: &Resource, all: &[Resource]) -> Vec<String> {
    let mut deps = Vec::new();

    match resource.resource_type.as_str() {
        "file" => {
            for key in ["owner", "group"] {
                if let Some(name) = resource.property_str(key) {
                    push_if_declared(&mut deps, all, "user", name);
                }
            }
        }
        "service" => {
            let package = resource
                .property_str("package")
                .unwrap_or(resource.name.as_str());
            push_if_declared(&mut deps, all, "pkg", package);
        }
        "shell" => {
            if let Some(user) = resource.property_str("user") {
                push_if_declared(&mut deps, all, "user", user);
            }
            if let Some(creates) = resource.property_str("creates") {
                if let Some(file) = all.iter().find(|r| {
                    r.resource_type == "file" && r.property_str("path") == Some(creates)
                }) {
                    deps.push(file.id());
                }
            }
            if let Some(requires) = resource.property_str_list("requires") {
                for package in requires {
                    push_if_declared(&mut deps, all, "pkg", &package);
                }
            }
        }
        _ => {}
    }

    deps
}

fn push_if_declared(deps: &mut Vec<String>, all: &[Resource], kind: &str, name: &str) {
    if all
        .iter()
        .any(|r| r.resource_type == kind && r.name == name)
    {
        deps.push(format!("{kind}.{name}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ResourceState;

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|x| x == id).unwrap()
    }

    #[test]
    fn test_explicit_dependency_ordering() {
        let module = Module::new("m", "1.0.0")
            .with_resource(Resource::new("pkg", "nginx"))
            .with_resource(Resource::new("service", "nginx").with_dependency("pkg.nginx"));
        let graph = DependencyGraph::from_module(&module);

        let order = graph.topological_sort().unwrap();
        assert!(position(&order, "pkg.nginx") < position(&order, "service.nginx"));
    }

    #[test]
    fn test_independent_resources_share_one_batch() {
        let module = Module::new("m", "1.0.0")
            .with_resource(Resource::new("pkg", "git"))
            .with_resource(Resource::new("pkg", "vim"));
        let graph = DependencyGraph::from_module(&module);

        let batches = graph.execution_batches().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[test]
    fn test_file_owner_implies_user_dependency() {
        let module = Module::new("m", "1.0.0")
            .with_resource(Resource::new("user", "webuser"))
            .with_resource(
                Resource::new("file", "config")
                    .with_property("path", "/etc/app.conf")
                    .with_property("owner", "webuser"),
            );
        let graph = DependencyGraph::from_module(&module);

        let batches = graph.execution_batches().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], vec!["user.webuser".to_string()]);
        assert_eq!(batches[1], vec!["file.config".to_string()]);
    }

    #[test]
    fn test_file_without_declared_owner_stays_independent() {
        let module = Module::new("m", "1.0.0")
            .with_resource(Resource::new("user", "webuser"))
            .with_resource(
                Resource::new("file", "config")
                    .with_property("path", "/etc/app.conf")
                    .with_property("owner", "root"),
            );
        let graph = DependencyGraph::from_module(&module);

        let batches = graph.execution_batches().unwrap();
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn test_service_implies_pkg_dependency_by_name() {
        let module = Module::new("m", "1.0.0")
            .with_resource(Resource::new("pkg", "nginx"))
            .with_resource(Resource::new("service", "nginx").with_state(ResourceState::Running));
        let graph = DependencyGraph::from_module(&module);

        let order = graph.topological_sort().unwrap();
        assert!(position(&order, "pkg.nginx") < position(&order, "service.nginx"));
    }

    #[test]
    fn test_shell_creates_implies_file_dependency() {
        let module = Module::new("m", "1.0.0")
            .with_resource(Resource::new("file", "script").with_property("path", "/opt/run.sh"))
            .with_resource(
                Resource::new("shell", "bootstrap")
                    .with_property("command", "/opt/run.sh")
                    .with_property("creates", "/opt/run.sh"),
            );
        let graph = DependencyGraph::from_module(&module);
        let batches = graph.execution_batches().unwrap();
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn test_cycle_detection() {
        let module = Module::new("m", "1.0.0")
            .with_resource(Resource::new("shell", "a").with_property("command", "true"))
            .with_resource(Resource::new("shell", "b").with_property("command", "true"));
        let mut module = module;
        module.spec.resources[0].depends_on.push("shell.b".to_string());
        module.spec.resources[1].depends_on.push("shell.a".to_string());

        let graph = DependencyGraph::from_module(&module);
        assert!(graph.has_cycle());
        assert!(matches!(
            graph.topological_sort(),
            Err(EngineError::CircularDependency(_))
        ));
        assert!(matches!(
            graph.execution_batches(),
            Err(EngineError::CircularDependency(_))
        ));
    }

    #[test]
    fn test_diamond_batches() {
        let module = Module::new("m", "1.0.0")
            .with_resource(Resource::new("pkg", "base"))
            .with_resource(Resource::new("shell", "left").with_dependency("pkg.base"))
            .with_resource(Resource::new("shell", "right").with_dependency("pkg.base"))
            .with_resource(
                Resource::new("shell", "join")
                    .with_dependency("shell.left")
                    .with_dependency("shell.right"),
            );
        let graph = DependencyGraph::from_module(&module);

        let batches = graph.execution_batches().unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0], vec!["pkg.base".to_string()]);
        assert_eq!(batches[1].len(), 2);
        assert_eq!(batches[2], vec!["shell.join".to_string()]);
    }

    #[test]
    fn test_topological_soundness_for_every_edge() {
        let module = Module::new("m", "1.0.0")
            .with_resource(Resource::new("user", "svc"))
            .with_resource(
                Resource::new("file", "conf")
                    .with_property("path", "/etc/svc.conf")
                    .with_property("owner", "svc"),
            )
            .with_resource(Resource::new("pkg", "svc"))
            .with_resource(Resource::new("service", "svc").with_dependency("file.conf"));
        let graph = DependencyGraph::from_module(&module);

        let batches = graph.execution_batches().unwrap();
        let batch_of = |id: &str| {
            batches
                .iter()
                .position(|b| b.iter().any(|x| x == id))
                .unwrap()
        };
        for node in graph.nodes.values() {
            for dep in &node.dependencies {
                assert!(
                    batch_of(dep) < batch_of(&node.resource_id),
                    "{dep} must run before {}",
                    node.resource_id
                );
            }
        }
    }
}

//! Service dependency graph.
//!
//! Built from `depends_on` declarations. The same graph answers three
//! questions: is there a cycle (reported with its full path), what is the
//! deterministic startup order (Kahn's algorithm, alphabetical tie-break),
//! and which services may be created concurrently (dependency waves).

use crate::error::{GantryError, Result};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Directed dependency graph over service names.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// All nodes, sorted for deterministic iteration.
    nodes: Vec<String>,
    /// service -> services it depends on.
    deps: HashMap<String, Vec<String>>,
    /// dependency -> services depending on it.
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build and validate the graph from (service, dependencies) pairs.
    ///
    /// Rejects self-dependencies and references to undeclared services.
    pub fn build(declarations: &[(String, Vec<String>)]) -> Result<Self> {
        let mut nodes: Vec<String> = declarations.iter().map(|(name, _)| name.clone()).collect();
        nodes.sort();

        let declared: HashSet<&String> = nodes.iter().collect();
        let mut deps: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

        for name in &nodes {
            deps.insert(name.clone(), Vec::new());
            dependents.insert(name.clone(), Vec::new());
        }

        for (service, declared_deps) in declarations {
            for dep in declared_deps {
                if dep == service {
                    return Err(GantryError::SelfDependency { service: service.clone() });
                }
                if !declared.contains(dep) {
                    return Err(GantryError::MissingDependency {
                        service: service.clone(),
                        dependency: dep.clone(),
                    });
                }
                deps.get_mut(service).unwrap().push(dep.clone());
                dependents.get_mut(dep).unwrap().push(service.clone());
            }
        }

        // Sorted edge lists keep every traversal deterministic.
        for list in deps.values_mut() {
            list.sort();
            list.dedup();
        }
        for list in dependents.values_mut() {
            list.sort();
            list.dedup();
        }

        Ok(Self { nodes, deps, dependents })
    }

    /// Find a dependency cycle, reporting its full path (`a -> b -> a`).
    pub fn find_cycle(&self) -> Option<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut visiting: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();

        for node in &self.nodes {
            if !visited.contains(node.as_str()) {
                if let Some(path) =
                    self.dfs_cycle(node, &mut visited, &mut visiting, &mut stack)
                {
                    return Some(path);
                }
            }
        }
        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        visiting: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> Option<String> {
        visiting.insert(node);
        stack.push(node);

        for dep in &self.deps[node] {
            if visiting.contains(dep.as_str()) {
                // Revisit inside the current path: the cycle runs from the
                // first occurrence of `dep` to here, closed by `dep` itself.
                let start = stack.iter().position(|n| *n == dep.as_str()).unwrap_or(0);
                let mut path: Vec<&str> = stack[start..].to_vec();
                path.push(dep);
                return Some(path.join(" -> "));
            }
            if !visited.contains(dep.as_str()) {
                if let Some(path) = self.dfs_cycle(dep, visited, visiting, stack) {
                    return Some(path);
                }
            }
        }

        stack.pop();
        visiting.remove(node);
        visited.insert(node);
        None
    }

    /// Deterministic startup order: Kahn's algorithm with alphabetical
    /// tie-break among ready services.
    pub fn start_order(&self) -> Result<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.as_str(), self.deps[n].len())).collect();

        let mut ready: BinaryHeap<Reverse<&str>> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| Reverse(*name))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(Reverse(node)) = ready.pop() {
            order.push(node.to_string());

            for dependent in &self.dependents[node] {
                let degree = in_degree.get_mut(dependent.as_str()).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(dependent.as_str()));
                }
            }
        }

        if order.len() != self.nodes.len() {
            let path = self.find_cycle().unwrap_or_else(|| "<unknown>".to_string());
            return Err(GantryError::DependencyCycle { path });
        }

        Ok(order)
    }

    /// Teardown order: the exact reverse of the startup order.
    pub fn stop_order(&self) -> Result<Vec<String>> {
        let mut order = self.start_order()?;
        order.reverse();
        Ok(order)
    }

    /// Group services into dependency waves by repeated zero-in-degree
    /// extraction. Services within a wave share no dependency relationship
    /// and may be created concurrently; waves execute strictly in order.
    pub fn waves(&self) -> Result<Vec<Vec<String>>> {
        let mut in_degree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.as_str(), self.deps[n].len())).collect();

        let mut waves = Vec::new();

        while !in_degree.is_empty() {
            let mut wave: Vec<&str> = in_degree
                .iter()
                .filter(|(_, degree)| **degree == 0)
                .map(|(name, _)| *name)
                .collect();

            if wave.is_empty() {
                let path = self.find_cycle().unwrap_or_else(|| "<unknown>".to_string());
                return Err(GantryError::DependencyCycle { path });
            }

            wave.sort_unstable();
            for name in &wave {
                in_degree.remove(name);
                for dependent in &self.dependents[*name] {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                    }
                }
            }
            waves.push(wave.iter().map(|s| s.to_string()).collect());
        }

        Ok(waves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(decls: &[(&str, &[&str])]) -> Result<DependencyGraph> {
        let declarations: Vec<(String, Vec<String>)> = decls
            .iter()
            .map(|(n, d)| (n.to_string(), d.iter().map(|s| s.to_string()).collect()))
            .collect();
        DependencyGraph::build(&declarations)
    }

    #[test]
    fn test_simple_order() {
        let g = graph(&[("web", &["db"]), ("db", &[])]).unwrap();
        assert_eq!(g.start_order().unwrap(), vec!["db", "web"]);
        assert_eq!(g.stop_order().unwrap(), vec!["web", "db"]);
    }

    #[test]
    fn test_alphabetical_tie_break() {
        let g = graph(&[("zeta", &[]), ("alpha", &[]), ("mid", &[])]).unwrap();
        assert_eq!(g.start_order().unwrap(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_diamond_order_is_valid_topological() {
        let g = graph(&[
            ("web", &["api", "cache"]),
            ("api", &["db"]),
            ("cache", &[]),
            ("db", &[]),
        ])
        .unwrap();
        let order = g.start_order().unwrap();

        let pos = |s: &str| order.iter().position(|n| n == s).unwrap();
        assert!(pos("db") < pos("api"));
        assert!(pos("api") < pos("web"));
        assert!(pos("cache") < pos("web"));

        let mut reversed = order.clone();
        reversed.reverse();
        assert_eq!(g.stop_order().unwrap(), reversed);
    }

    #[test]
    fn test_self_dependency_rejected() {
        let err = graph(&[("web", &["web"])]).unwrap_err();
        assert!(matches!(err, GantryError::SelfDependency { service } if service == "web"));
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let err = graph(&[("web", &["ghost"])]).unwrap_err();
        assert!(matches!(
            err,
            GantryError::MissingDependency { service, dependency }
                if service == "web" && dependency == "ghost"
        ));
    }

    #[test]
    fn test_cycle_reports_full_path() {
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]).unwrap();
        let err = g.start_order().unwrap_err();
        match err {
            GantryError::DependencyCycle { path } => {
                assert_eq!(path, "a -> b -> c -> a");
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_two_node_cycle() {
        let g = graph(&[("a", &["b"]), ("b", &["a"])]).unwrap();
        let err = g.start_order().unwrap_err();
        match err {
            GantryError::DependencyCycle { path } => assert_eq!(path, "a -> b -> a"),
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_waves_group_independent_services() {
        let g = graph(&[
            ("web", &["api", "cache"]),
            ("api", &["db"]),
            ("cache", &[]),
            ("db", &[]),
        ])
        .unwrap();
        let waves = g.waves().unwrap();
        assert_eq!(waves, vec![vec!["cache", "db"], vec!["api"], vec!["web"]]);
    }

    #[test]
    fn test_waves_cycle_detected() {
        let g = graph(&[("a", &["b"]), ("b", &["a"]), ("c", &[])]).unwrap();
        assert!(matches!(g.waves(), Err(GantryError::DependencyCycle { .. })));
    }

    #[test]
    fn test_order_is_idempotent() {
        let g = graph(&[("web", &["db"]), ("db", &[]), ("worker", &["db"])]).unwrap();
        let first = g.start_order().unwrap();
        for _ in 0..5 {
            assert_eq!(g.start_order().unwrap(), first);
        }
    }
}

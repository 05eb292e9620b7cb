// Dependency graph over service names, validated and ordered once at load.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ControllerError, Result};

/// Directed acyclic graph of "service depends on service" edges.
///
/// Construction fails on cycles and on edges to undeclared services, so a
/// built graph always has a valid topological order.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    deps: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
    order: Vec<String>,
}

impl DependencyGraph {
    /// Builds the graph from `(service, dependencies)` pairs.
    pub fn new<I>(services: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let deps: BTreeMap<String, BTreeSet<String>> = services
            .into_iter()
            .map(|(name, deps)| (name, deps.into_iter().collect()))
            .collect();

        let mut dependents: BTreeMap<String, BTreeSet<String>> =
            deps.keys().map(|k| (k.clone(), BTreeSet::new())).collect();
        for (name, ds) in &deps {
            for d in ds {
                match dependents.get_mut(d) {
                    Some(set) => {
                        set.insert(name.clone());
                    }
                    None => {
                        return Err(ControllerError::Config(format!(
                            "service {name} depends on undeclared service {d}"
                        )))
                    }
                }
            }
        }

        let order = Self::order(&deps, &dependents)?;
        Ok(Self {
            deps,
            dependents,
            order,
        })
    }

    // Kahn's algorithm; the ready set is ordered so equal-rank services sort by name.
    fn order(
        deps: &BTreeMap<String, BTreeSet<String>>,
        dependents: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<Vec<String>> {
        let mut in_degree: BTreeMap<&str, usize> =
            deps.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(k, _)| *k)
            .collect();

        let mut order = Vec::with_capacity(deps.len());
        while let Some(next) = ready.pop_first() {
            order.push(next.to_string());
            for dependent in &dependents[next] {
                if let Some(d) = in_degree.get_mut(dependent.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }

        if order.len() != deps.len() {
            return Err(ControllerError::Cycle {
                path: Self::find_cycle(deps),
            });
        }
        Ok(order)
    }

    fn find_cycle(deps: &BTreeMap<String, BTreeSet<String>>) -> Vec<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            node: &'a str,
            deps: &'a BTreeMap<String, BTreeSet<String>>,
            marks: &mut BTreeMap<&'a str, Mark>,
            stack: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            match marks.get(node) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|n| *n == node).unwrap_or(0);
                    let mut path: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                    path.push(node.to_string());
                    return Some(path);
                }
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            stack.push(node);
            if let Some(ds) = deps.get(node) {
                for d in ds {
                    if let Some(path) = visit(d.as_str(), deps, marks, stack) {
                        return Some(path);
                    }
                }
            }
            stack.pop();
            marks.insert(node, Mark::Done);
            None
        }

        let mut marks = BTreeMap::new();
        let mut stack = Vec::new();
        for node in deps.keys() {
            if let Some(path) = visit(node.as_str(), deps, &mut marks, &mut stack) {
                return path;
            }
        }
        Vec::new()
    }

    /// Services ordered so that each appears after all of its dependencies.
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    pub fn contains(&self, name: &str) -> bool {
        self.deps.contains_key(name)
    }

    /// Direct dependencies of `name`.
    pub fn dependencies(&self, name: &str) -> Vec<String> {
        self.deps
            .get(name)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Services that directly depend on `name`.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.dependents
            .get(name)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every service that depends on `name` directly or through other services.
    pub fn transitive_dependents(&self, name: &str) -> Vec<String> {
        Self::reach(&self.dependents, name)
    }

    /// Every service `name` needs directly or through other services.
    pub fn transitive_dependencies(&self, name: &str) -> Vec<String> {
        Self::reach(&self.deps, name)
    }

    fn reach(edges: &BTreeMap<String, BTreeSet<String>>, from: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut queue: Vec<&str> = vec![from];
        while let Some(node) = queue.pop() {
            for next in edges.get(node).into_iter().flatten() {
                if next != from && seen.insert(next.clone()) {
                    queue.push(next.as_str());
                }
            }
        }
        seen.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }
}

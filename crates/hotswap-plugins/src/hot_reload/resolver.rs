//! Dependency resolver
//!
//! Owns the registered-plugin table and answers dependency queries:
//! satisfaction checks, load ordering (Kahn's algorithm), cycle
//! diagnostics and dependency trees.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use hotswap_kernel::plugin::{PluginMetadata, UnknownOperatorPolicy};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::constraint::{ConstraintParseError, VersionConstraint};

/// Registered plugin: name, version and parsed dependency list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique plugin name
    pub name: String,
    /// Dotted version string
    pub version: String,
    /// Dependencies in declaration order
    pub dependencies: Vec<VersionConstraint>,
}

impl PluginDescriptor {
    /// Build a descriptor, parsing every dependency specifier.
    pub fn new<S: AsRef<str>>(
        name: &str,
        version: &str,
        dependency_specs: &[S],
    ) -> Result<Self, ConstraintParseError> {
        let dependencies = dependency_specs
            .iter()
            .map(|spec| VersionConstraint::parse(spec.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            dependencies,
        })
    }

    /// Build a descriptor from plugin metadata.
    pub fn from_metadata(metadata: &PluginMetadata) -> Result<Self, ConstraintParseError> {
        Self::new(&metadata.name, &metadata.version, &metadata.dependencies)
    }

    /// Names of the direct dependencies, in declaration order.
    pub fn dependency_names(&self) -> Vec<String> {
        self.dependencies.iter().map(|d| d.name.clone()).collect()
    }
}

/// Outcome of a dependency check
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DependencyReport {
    /// Whether every direct dependency is present and version-compatible
    pub satisfied: bool,
    /// Human-readable entry per missing or mismatched dependency
    pub missing: Vec<String>,
}

impl DependencyReport {
    pub fn is_satisfied(&self) -> bool {
        self.satisfied
    }
}

/// Load order could not be computed because of a dependency cycle
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circular dependency involving: {}", .involved.join(", "))]
pub struct CycleError {
    /// Names left unvisited by the topological sort, sorted.
    /// Contains at least one cycle and possibly plugins downstream of it.
    pub involved: Vec<String>,
    /// One concrete cycle found among `involved`, first node repeated at the end
    pub cycle: Vec<String>,
}

/// Dependency resolver over the registered-plugin table
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    plugins: BTreeMap<String, PluginDescriptor>,
    policy: UnknownOperatorPolicy,
}

impl DependencyResolver {
    /// Create a new resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the policy for constraints that cannot be evaluated
    pub fn with_policy(mut self, policy: UnknownOperatorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> UnknownOperatorPolicy {
        self.policy
    }

    /// Register a plugin, replacing any prior registration under the same name.
    ///
    /// Nothing is registered if any specifier fails to parse.
    pub fn register<S: AsRef<str>>(
        &mut self,
        name: &str,
        version: &str,
        dependency_specs: &[S],
    ) -> Result<(), ConstraintParseError> {
        let descriptor = PluginDescriptor::new(name, version, dependency_specs)?;
        self.register_descriptor(descriptor);
        Ok(())
    }

    /// Register an already parsed descriptor (last write wins).
    pub fn register_descriptor(&mut self, descriptor: PluginDescriptor) {
        debug!(
            "Registering descriptor {} v{} ({} deps)",
            descriptor.name,
            descriptor.version,
            descriptor.dependencies.len()
        );
        self.plugins.insert(descriptor.name.clone(), descriptor);
    }

    /// Remove a registration
    pub fn unregister(&mut self, name: &str) -> Option<PluginDescriptor> {
        self.plugins.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&PluginDescriptor> {
        self.plugins.get(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn clear(&mut self) {
        self.plugins.clear();
    }

    /// Check the direct dependencies of a registered plugin.
    pub fn check_dependencies(&self, name: &str) -> DependencyReport {
        match self.plugins.get(name) {
            Some(descriptor) => self.check_descriptor(descriptor),
            None => DependencyReport {
                satisfied: false,
                missing: vec![format!("{} (not registered)", name)],
            },
        }
    }

    /// Check a descriptor's direct dependencies against the registered table.
    ///
    /// The descriptor need not be registered; a dependency on its own name
    /// is evaluated against the descriptor itself.
    pub fn check_descriptor(&self, descriptor: &PluginDescriptor) -> DependencyReport {
        let mut missing = Vec::new();

        for dep in &descriptor.dependencies {
            let found = if dep.name == descriptor.name {
                Some(descriptor.version.as_str())
            } else {
                self.plugins.get(&dep.name).map(|d| d.version.as_str())
            };

            match found {
                None => missing.push(format!("{} (not installed)", dep.name)),
                Some(version) if !dep.check_with_policy(version, self.policy) => {
                    missing.push(format!(
                        "{} (requires {}, found {})",
                        dep.name,
                        dep.requirement(),
                        version
                    ));
                }
                Some(_) => {}
            }
        }

        DependencyReport {
            satisfied: missing.is_empty(),
            missing,
        }
    }

    /// Compute an initialization order for every registered plugin.
    ///
    /// Edges run from a dependency to its dependent; dependencies on
    /// unregistered names contribute no edge. Ties are broken by name so
    /// the result is deterministic.
    pub fn resolve_load_order(&self) -> Result<Vec<String>, CycleError> {
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

        for (name, descriptor) in &self.plugins {
            let registered_deps: BTreeSet<&str> = descriptor
                .dependencies
                .iter()
                .map(|d| d.name.as_str())
                .filter(|dep| self.plugins.contains_key(*dep))
                .collect();

            in_degree.insert(name.as_str(), registered_deps.len());
            for dep in registered_deps {
                dependents.entry(dep).or_default().insert(name.as_str());
            }
        }

        // Kahn's algorithm
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(self.plugins.len());

        while let Some(name) = queue.pop_front() {
            order.push(name.to_string());

            if let Some(children) = dependents.get(name) {
                for child in children {
                    if let Some(deg) = in_degree.get_mut(child) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(*child);
                        }
                    }
                }
            }
        }

        if order.len() < self.plugins.len() {
            let visited: HashSet<&str> = order.iter().map(String::as_str).collect();
            let involved: Vec<String> = self
                .plugins
                .keys()
                .filter(|name| !visited.contains(name.as_str()))
                .cloned()
                .collect();
            let cycle = self.find_cycle(&involved);

            debug!("Load order stalled; unvisited: {:?}, cycle: {:?}", involved, cycle);
            return Err(CycleError { involved, cycle });
        }

        debug!("Resolved load order: {:?}", order);
        Ok(order)
    }

    /// Extract one concrete cycle from the unvisited remainder.
    ///
    /// Every unvisited node has an unvisited dependency, so walking
    /// dependency edges inside the subset always closes a loop.
    fn find_cycle(&self, subset: &[String]) -> Vec<String> {
        let members: HashSet<&str> = subset.iter().map(String::as_str).collect();
        let mut finished: HashSet<&str> = HashSet::new();

        for start in subset {
            let mut path: Vec<&str> = Vec::new();
            if let Some(cycle) = self.walk_cycle(start, &members, &mut path, &mut finished) {
                return cycle;
            }
        }

        Vec::new()
    }

    fn walk_cycle<'a>(
        &'a self,
        node: &'a str,
        members: &HashSet<&str>,
        path: &mut Vec<&'a str>,
        finished: &mut HashSet<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = path.iter().position(|n| *n == node) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|n| n.to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if finished.contains(node) {
            return None;
        }

        path.push(node);
        if let Some(descriptor) = self.plugins.get(node) {
            for dep in &descriptor.dependencies {
                if members.contains(dep.name.as_str())
                    && let Some(cycle) = self.walk_cycle(&dep.name, members, path, finished)
                {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        finished.insert(node);
        None
    }

    /// Direct dependency names of every plugin reachable from `name`.
    ///
    /// Unregistered dependencies are listed under their dependent but get
    /// no entry of their own. Returns an empty map if `name` is unregistered.
    pub fn dependency_tree(&self, name: &str) -> BTreeMap<String, Vec<String>> {
        let mut tree = BTreeMap::new();
        let mut stack = vec![name.to_string()];

        while let Some(current) = stack.pop() {
            if tree.contains_key(&current) {
                continue;
            }
            let Some(descriptor) = self.plugins.get(&current) else {
                continue;
            };

            let deps = descriptor.dependency_names();
            for dep in deps.iter().rev() {
                if !tree.contains_key(dep) {
                    stack.push(dep.clone());
                }
            }
            tree.insert(current, deps);
        }

        tree
    }

    /// Registered plugins that declare a direct dependency on `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.plugins
            .values()
            .filter(|d| d.name != name && d.dependencies.iter().any(|dep| dep.name == name))
            .map(|d| d.name.clone())
            .collect()
    }

    /// Dependents whose constraint on `descriptor.name` would reject
    /// `descriptor.version`.
    pub fn broken_dependents(&self, descriptor: &PluginDescriptor) -> Vec<String> {
        self.plugins
            .values()
            .filter(|d| d.name != descriptor.name)
            .filter(|d| {
                d.dependencies.iter().any(|dep| {
                    dep.name == descriptor.name
                        && !dep.check_with_policy(&descriptor.version, self.policy)
                })
            })
            .map(|d| d.name.clone())
            .collect()
    }
}

//! Manager registry: a dependency-aware startup/shutdown engine.
//!
//! The registry owns every manager by name and keeps a DAG over manager
//! names. Initialization visits managers in topological order, shutdown in
//! reverse. Cross-references between managers are by name lookup, never by
//! direct pointer capture, which keeps shutdown ordering safe.

use crate::error::{Error, Result};
use crate::manager::{Manager, ManagerStatus};
use parking_lot::RwLock;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Total budget for a shutdown phase
const SHUTDOWN_PHASE_BUDGET: Duration = Duration::from_secs(15);
/// Ceiling for a single plugin manager's shutdown
const PLUGIN_SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

/// Outcome of a `shutdown_all` run
#[derive(Debug, Default)]
pub struct ShutdownSummary {
    /// Manager errors encountered (name, message); shutdown continued past them
    pub errors: Vec<(String, String)>,
    /// Managers whose shutdown exceeded the phase budget
    pub timed_out: Vec<String>,
    /// Managers skipped because the budget was exhausted
    pub skipped: Vec<String>,
}

impl ShutdownSummary {
    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty() && self.timed_out.is_empty() && self.skipped.is_empty()
    }
}

struct RegistryInner {
    managers: HashMap<String, Arc<dyn Manager>>,
    nodes: HashMap<String, NodeIndex>,
    /// Edge dep -> dependent: a dependency points at the managers needing it
    graph: DiGraph<String, ()>,
    /// Registration order, used as the deterministic topological tie-break
    registration_order: Vec<String>,
    /// Names successfully initialized, in initialization order
    initialized: Vec<String>,
    /// Managers the registry forced unhealthy (shutdown deadline overruns)
    forced_unhealthy: HashSet<String>,
}

/// Registry of managers with dependency-ordered lifecycle
pub struct ManagerRegistry {
    inner: RwLock<RegistryInner>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                managers: HashMap::new(),
                nodes: HashMap::new(),
                graph: DiGraph::new(),
                registration_order: Vec::new(),
                initialized: Vec::new(),
                forced_unhealthy: HashSet::new(),
            }),
        }
    }

    /// Register a manager with its dependencies.
    ///
    /// Fails when a dependency is unknown or when the new edges would close
    /// a cycle; on failure no partial state remains.
    pub fn register(&self, manager: Arc<dyn Manager>, dependencies: &[&str]) -> Result<()> {
        let name = manager.name().to_string();
        let mut inner = self.inner.write();

        if inner.managers.contains_key(&name) {
            return Err(Error::dependency(format!(
                "manager '{name}' is already registered"
            )));
        }

        for dep in dependencies {
            if !inner.managers.contains_key(*dep) {
                return Err(Error::dependency(format!(
                    "dependency '{dep}' not found for '{name}'"
                )));
            }
        }

        let node = inner.graph.add_node(name.clone());
        let mut edges = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            let dep_node = inner.nodes[*dep];
            edges.push(inner.graph.add_edge(dep_node, node, ()));
        }

        if petgraph::algo::is_cyclic_directed(&inner.graph) {
            for edge in edges.into_iter().rev() {
                inner.graph.remove_edge(edge);
            }
            inner.graph.remove_node(node);
            return Err(Error::dependency(format!(
                "registering '{name}' would create a dependency cycle"
            )));
        }

        inner.nodes.insert(name.clone(), node);
        inner.managers.insert(name.clone(), manager);
        inner.registration_order.push(name.clone());
        tracing::debug!(manager = %name, deps = ?dependencies, "Registered manager");
        Ok(())
    }

    /// Add dependency edges to an already-registered manager.
    ///
    /// Used by tests and late wiring; the same cycle check and atomic
    /// rollback as `register` apply.
    pub fn add_dependencies(&self, name: &str, dependencies: &[&str]) -> Result<()> {
        let mut inner = self.inner.write();

        let node = *inner
            .nodes
            .get(name)
            .ok_or_else(|| Error::dependency(format!("manager '{name}' is not registered")))?;
        for dep in dependencies {
            if !inner.nodes.contains_key(*dep) {
                return Err(Error::dependency(format!(
                    "dependency '{dep}' not found for '{name}'"
                )));
            }
        }

        let mut edges = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            let dep_node = inner.nodes[*dep];
            edges.push(inner.graph.add_edge(dep_node, node, ()));
        }

        if petgraph::algo::is_cyclic_directed(&inner.graph) {
            for edge in edges.into_iter().rev() {
                inner.graph.remove_edge(edge);
            }
            return Err(Error::dependency(format!(
                "adding dependencies to '{name}' would create a cycle"
            )));
        }

        Ok(())
    }

    /// Look up a manager by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Manager>> {
        self.inner.read().managers.get(name).cloned()
    }

    /// Names of all registered managers, in registration order
    pub fn manager_names(&self) -> Vec<String> {
        self.inner.read().registration_order.clone()
    }

    /// Compute the topological initialization order.
    ///
    /// Kahn's algorithm over the petgraph structure; among ready nodes the
    /// earliest-registered wins, so the order is deterministic for a given
    /// registration sequence.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
        for name in &inner.registration_order {
            let node = inner.nodes[name];
            in_degree.insert(
                node,
                inner
                    .graph
                    .neighbors_directed(node, Direction::Incoming)
                    .count(),
            );
        }

        let mut order = Vec::with_capacity(inner.registration_order.len());
        let mut remaining: Vec<String> = inner.registration_order.clone();

        while !remaining.is_empty() {
            let next = remaining
                .iter()
                .position(|name| in_degree[&inner.nodes[name]] == 0);
            let Some(pos) = next else {
                return Err(Error::dependency(
                    "dependency graph contains a cycle".to_string(),
                ));
            };
            let name = remaining.remove(pos);
            let node = inner.nodes[&name];
            for dependent in inner.graph.neighbors_directed(node, Direction::Outgoing) {
                *in_degree.get_mut(&dependent).unwrap() -= 1;
            }
            order.push(name);
        }

        Ok(order)
    }

    /// Initialize all managers in dependency order.
    ///
    /// Stops at the first failing manager; managers initialized before the
    /// failure stay initialized and are shut down by a later
    /// `shutdown_all`. Returns the realized initialization order.
    pub async fn initialize_all(&self) -> Result<Vec<String>> {
        let order = self.topological_order()?;
        tracing::debug!(?order, "Initialization order");

        for name in &order {
            let manager = {
                let inner = self.inner.read();
                if inner.initialized.contains(name) {
                    continue;
                }
                inner.managers.get(name).cloned()
            };
            let Some(manager) = manager else { continue };

            tracing::debug!(manager = %name, "Initializing");
            manager
                .initialize()
                .await
                .map_err(|e| Error::manager_init(name.clone(), e.to_string()))?;
            self.inner.write().initialized.push(name.clone());
        }

        Ok(order)
    }

    /// Names successfully initialized so far, in initialization order
    pub fn initialized_managers(&self) -> Vec<String> {
        self.inner.read().initialized.clone()
    }

    /// Shut down initialized managers in reverse initialization order.
    ///
    /// Per-manager errors are logged and swallowed so every later shutdown
    /// still runs. The phase is bounded: once the budget is exhausted the
    /// remaining managers are marked unhealthy and skipped.
    pub async fn shutdown_all(&self) -> ShutdownSummary {
        let mut summary = ShutdownSummary::default();
        let order: Vec<String> = {
            let inner = self.inner.read();
            inner.initialized.iter().rev().cloned().collect()
        };
        tracing::debug!(?order, "Shutdown order");

        let phase_start = Instant::now();
        for name in &order {
            let manager = self.inner.read().managers.get(name).cloned();
            let Some(manager) = manager else { continue };

            let remaining = SHUTDOWN_PHASE_BUDGET.saturating_sub(phase_start.elapsed());
            if remaining.is_zero() {
                tracing::warn!(manager = %name, "Shutdown budget exhausted, marking unhealthy");
                self.inner.write().forced_unhealthy.insert(name.clone());
                summary.skipped.push(name.clone());
                continue;
            }

            let budget = if name.starts_with("plugin") {
                remaining.min(PLUGIN_SHUTDOWN_BUDGET)
            } else {
                remaining
            };

            tracing::debug!(manager = %name, "Shutting down");
            match tokio::time::timeout(budget, manager.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(manager = %name, error = %e, "Error during shutdown");
                    summary.errors.push((name.clone(), e.to_string()));
                }
                Err(_) => {
                    tracing::warn!(manager = %name, "Shutdown timed out, marking unhealthy");
                    self.inner.write().forced_unhealthy.insert(name.clone());
                    summary.timed_out.push(name.clone());
                }
            }
        }

        let mut inner = self.inner.write();
        inner.managers.clear();
        inner.nodes.clear();
        inner.graph.clear();
        inner.registration_order.clear();
        inner.initialized.clear();
        summary
    }

    /// Status snapshots for every manager, in registration order
    pub fn statuses(&self) -> Vec<ManagerStatus> {
        let inner = self.inner.read();
        inner
            .registration_order
            .iter()
            .filter_map(|name| inner.managers.get(name))
            .map(|manager| {
                let mut status = manager.status();
                if inner.forced_unhealthy.contains(&status.name) {
                    status.healthy = false;
                }
                status
            })
            .collect()
    }
}

impl Default for ManagerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Service descriptor registry.
//!
//! The registry is the static table of services the stack is made of. Its
//! dependency graph is checked for unknown names and cycles when the registry
//! is built, and a single start order is computed once: Kahn's algorithm,
//! taking the earliest-declared ready service at each step. The stop order is
//! the exact reverse.

use crate::error::{Error, Result};
use crate::service::ServiceDescriptor;
use stackctl_config::{ProbeSpec, StackConfig};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

/// Validated service table with its computed start order.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    /// Descriptors in declaration order
    descriptors: Vec<ServiceDescriptor>,
    /// Name to declaration index
    index: HashMap<String, usize>,
    /// Service names in start order
    order: Vec<String>,
}

impl ServiceRegistry {
    /// Build a registry, validating names and dependencies.
    pub fn new(descriptors: Vec<ServiceDescriptor>) -> Result<Self> {
        let mut index = HashMap::new();
        for (i, def) in descriptors.iter().enumerate() {
            if def.name.is_empty() || def.unit.is_empty() {
                return Err(Error::ConfigError(format!(
                    "service #{} has an empty name or unit",
                    i
                )));
            }
            if index.insert(def.name.clone(), i).is_some() {
                return Err(Error::ServiceAlreadyExists(def.name.clone()));
            }
        }

        for def in &descriptors {
            for dep in &def.depends_on {
                if !index.contains_key(dep) {
                    return Err(Error::UnknownDependency {
                        service: def.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let order = topological_sort(&descriptors, &index)?;

        Ok(Self {
            descriptors,
            index,
            order,
        })
    }

    /// Build the registry for a configuration: the built-in table with the
    /// configured per-service overrides applied.
    pub fn from_config(config: &StackConfig) -> Result<Self> {
        let mut descriptors = default_descriptors();

        for (name, o) in &config.services {
            let def = descriptors
                .iter_mut()
                .find(|d| &d.name == name)
                .ok_or_else(|| {
                    Error::ConfigError(format!("override for unknown service '{}'", name))
                })?;
            def.apply_override(o);
        }

        Self::new(descriptors)
    }

    /// Get a descriptor by name.
    pub fn get(&self, name: &str) -> Result<&ServiceDescriptor> {
        self.index
            .get(name)
            .map(|&i| &self.descriptors[i])
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))
    }

    /// Whether a service is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Service names in start order.
    pub fn start_order(&self) -> &[String] {
        &self.order
    }

    /// Service names in stop order (reverse of start order).
    pub fn stop_order(&self) -> Vec<String> {
        self.order.iter().rev().cloned().collect()
    }

    /// Restrict the start order to a subset of services.
    pub fn ordered_subset(&self, names: &[&str]) -> Result<Vec<String>> {
        for name in names {
            if !self.contains(name) {
                return Err(Error::ServiceNotFound(name.to_string()));
            }
        }
        Ok(self
            .order
            .iter()
            .filter(|n| names.contains(&n.as_str()))
            .cloned()
            .collect())
    }

    /// Descriptors in declaration order.
    pub fn descriptors(&self) -> &[ServiceDescriptor] {
        &self.descriptors
    }

    /// Services that depend on `name`, directly or transitively, in start order.
    pub fn dependents_of(&self, name: &str) -> Result<Vec<String>> {
        self.get(name)?;
        let mut found: HashSet<&str> = HashSet::new();
        found.insert(name);
        // The start order lists dependencies first, so one pass suffices.
        for service in &self.order {
            let def = &self.descriptors[self.index[service]];
            if def.depends_on.iter().any(|d| found.contains(d.as_str())) {
                found.insert(service.as_str());
            }
        }
        Ok(self
            .order
            .iter()
            .filter(|n| n.as_str() != name && found.contains(n.as_str()))
            .cloned()
            .collect())
    }
}

/// Topologically sort services, preferring declaration order among ready ones.
fn topological_sort(
    descriptors: &[ServiceDescriptor],
    index: &HashMap<String, usize>,
) -> Result<Vec<String>> {
    let mut in_degree = vec![0usize; descriptors.len()];
    let mut graph: Vec<Vec<usize>> = vec![Vec::new(); descriptors.len()];

    for (i, def) in descriptors.iter().enumerate() {
        for dep in &def.depends_on {
            let d = index[dep];
            graph[d].push(i);
            in_degree[i] += 1;
        }
    }

    // Kahn's algorithm
    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &deg)| deg == 0)
        .map(|(i, _)| i)
        .collect();

    let mut result = Vec::with_capacity(descriptors.len());

    while let Some(i) = ready.pop_first() {
        result.push(descriptors[i].name.clone());
        for &next in &graph[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if result.len() != descriptors.len() {
        let cycle: Vec<String> = descriptors
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, d)| d.name.clone())
            .collect();
        return Err(Error::CircularDependency(cycle));
    }

    Ok(result)
}

fn tcp(port: u16) -> ProbeSpec {
    ProbeSpec::Tcp {
        host: "127.0.0.1".to_string(),
        port,
    }
}

/// The built-in service table.
pub fn default_descriptors() -> Vec<ServiceDescriptor> {
    let secs = Duration::from_secs;
    vec![
        ServiceDescriptor::new("database", "postgresql")
            .with_description("Relational database")
            .with_probe(tcp(5432))
            .with_timeouts(secs(60), secs(60)),
        ServiceDescriptor::new("broker", "rabbitmq-server")
            .with_description("Message broker")
            .with_probe(tcp(5672))
            .with_timeouts(secs(90), secs(60)),
        ServiceDescriptor::new("search", "opensearch")
            .with_description("Search index")
            .with_probe(ProbeSpec::Http {
                url: "http://127.0.0.1:9200/_cluster/health".to_string(),
            })
            .with_timeouts(secs(120), secs(90)),
        ServiceDescriptor::new("worker", "stack-worker")
            .with_description("Transform worker")
            .with_dependencies(&["database", "broker", "search"])
            .with_probe(ProbeSpec::Active)
            .with_timeouts(secs(60), secs(60)),
        ServiceDescriptor::new("app", "stack-app")
            .with_description("Application server")
            .with_dependencies(&["database", "broker", "search"])
            .with_probe(ProbeSpec::Http {
                url: "http://127.0.0.1:3000/health".to_string(),
            })
            .with_timeouts(secs(120), secs(60)),
        ServiceDescriptor::new("proxy", "nginx")
            .with_description("Reverse proxy")
            .with_dependencies(&["app"])
            .with_probe(tcp(80))
            .with_timeouts(secs(30), secs(30)),
    ]
}

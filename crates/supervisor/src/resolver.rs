//! Startup ordering from declared service dependencies.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::config::ServiceConfig;

/// Outcome of ordering a set of services.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Resolution {
    /// Enabled service names; every dependency precedes its dependents.
    pub order: Vec<String>,

    /// Back edges `(dependent, dependency)` found while ordering.
    pub cycles: Vec<(String, String)>,
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum Mark {
    Visiting,
    Visited,
}

/// Orders services so that each one starts after the services it depends on.
///
/// Traversal is depth-first in name order, so the result is deterministic.
/// Disabled services are left out and do not hold back their dependents.
/// Dependencies on unknown services are ignored with a warning. A cycle is
/// reported with a warning and broken at the back edge, so the result is a
/// best-effort order rather than an error.
#[must_use]
pub fn resolve(services: &BTreeMap<String, ServiceConfig>) -> Resolution {
    let mut resolver = Resolver {
        services,
        marks: HashMap::new(),
        resolution: Resolution::default(),
    };

    for (name, config) in services {
        if config.enabled {
            resolver.visit(name);
        }
    }

    resolver.resolution
}

struct Resolver<'a> {
    services: &'a BTreeMap<String, ServiceConfig>,
    marks: HashMap<&'a str, Mark>,
    resolution: Resolution,
}

impl<'a> Resolver<'a> {
    fn visit(&mut self, name: &'a str) {
        if self.marks.contains_key(name) {
            return;
        }

        let services = self.services;
        let Some(config) = services.get(name) else {
            return;
        };

        self.marks.insert(name, Mark::Visiting);

        for dependency in &config.dependencies {
            match services.get(dependency.as_str()) {
                None => {
                    warn!(
                        "service {} depends on unknown service {}, ignoring",
                        name, dependency
                    );
                    continue;
                }
                Some(dep) if !dep.enabled => continue,
                Some(_) => {}
            }

            match self.marks.get(dependency.as_str()) {
                Some(Mark::Visiting) => {
                    warn!(
                        "dependency cycle detected between {} and {}, continuing with partial order",
                        name, dependency
                    );
                    self.resolution
                        .cycles
                        .push((name.to_string(), dependency.clone()));
                }
                Some(Mark::Visited) => {}
                None => self.visit(dependency),
            }
        }

        self.marks.insert(name, Mark::Visited);
        self.resolution.order.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    fn service(deps: &[&str]) -> ServiceConfig {
        ServiceConfig::new("/bin/true").with_dependencies(deps.iter().copied())
    }

    fn services(entries: Vec<(&str, ServiceConfig)>) -> BTreeMap<String, ServiceConfig> {
        entries
            .into_iter()
            .map(|(name, config)| (name.to_string(), config))
            .collect()
    }

    #[test]
    fn test_dependencies_start_first() {
        let resolution = resolve(&services(vec![
            ("worker", service(&["cache"])),
            ("cache", service(&["db"])),
            ("db", service(&[])),
        ]));

        assert_eq!(resolution.order, vec!["db", "cache", "worker"]);
        assert!(resolution.cycles.is_empty());
    }

    #[test]
    fn test_disabled_service_is_skipped() {
        let resolution = resolve(&services(vec![
            ("worker", service(&["cache"])),
            ("cache", service(&["db"]).disabled()),
            ("db", service(&[])),
        ]));

        assert_eq!(resolution.order, vec!["db", "worker"]);
    }

    #[test]
    fn test_every_dependency_precedes_dependent() {
        let graph = services(vec![
            ("api", service(&["auth", "core"])),
            ("auth", service(&["mesh"])),
            ("core", service(&["mesh", "data-anchor"])),
            ("data-anchor", service(&[])),
            ("mesh", service(&[])),
        ]);

        let resolution = resolve(&graph);
        let position = |name: &str| resolution.order.iter().position(|n| n == name).unwrap();

        assert_eq!(resolution.order.len(), graph.len());
        for (name, config) in &graph {
            for dep in &config.dependencies {
                assert!(position(dep) < position(name), "{dep} must precede {name}");
            }
        }
    }

    #[traced_test]
    #[test]
    fn test_cycle_terminates_with_warning() {
        let resolution = resolve(&services(vec![
            ("a", service(&["b"])),
            ("b", service(&["c"])),
            ("c", service(&["a"])),
        ]));

        assert_eq!(resolution.order.len(), 3);
        assert_eq!(resolution.cycles, vec![("c".to_string(), "a".to_string())]);
        assert!(logs_contain("dependency cycle detected"));
    }

    #[traced_test]
    #[test]
    fn test_unknown_dependency_is_ignored() {
        let resolution = resolve(&services(vec![("auth", service(&["vault"]))]));

        assert_eq!(resolution.order, vec!["auth"]);
        assert!(logs_contain("unknown service vault"));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(resolve(&BTreeMap::new()), Resolution::default());
    }
}

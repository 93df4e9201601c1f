//! Dependency graph validation and load ordering.

use std::collections::HashMap;

use lattice_core::PluginId;

use super::PluginDescriptor;
use crate::error::{PluginError, PluginResult};

/// Validates the dependency graph formed by `plugins` and computes the load
/// order as **layers** via Kahn's algorithm.
///
/// Each inner `Vec<usize>` holds indices into `plugins` whose dependencies all
/// live in earlier layers; within a layer indices keep their input order.
/// Unload order is the reverse.
///
/// # Errors
///
/// - [`PluginError::DuplicatePlugin`] if two descriptors share an id.
/// - [`PluginError::MissingDependency`] if a dependency is not in `plugins`.
/// - [`PluginError::IncompatibleVersion`] if a version constraint fails.
/// - [`PluginError::DependencyCycle`] naming the plugins on a cycle.
pub(crate) fn topological_layers(plugins: &[&PluginDescriptor]) -> PluginResult<Vec<Vec<usize>>> {
    let n = plugins.len();

    let mut index: HashMap<&PluginId, usize> = HashMap::with_capacity(n);
    for (i, plugin) in plugins.iter().enumerate() {
        if index.insert(plugin.id(), i).is_some() {
            return Err(PluginError::DuplicatePlugin(plugin.id().clone()));
        }
    }

    // Edge provider → dependent: the provider loads first.
    let mut in_degree: Vec<usize> = vec![0; n];
    let mut dependents: Vec<Vec<usize>> = vec![vec![]; n];

    for (i, plugin) in plugins.iter().enumerate() {
        for dep in plugin.dependencies() {
            let Some(&provider) = index.get(&dep.id) else {
                return Err(PluginError::MissingDependency {
                    plugin: plugin.id().clone(),
                    dependency: dep.id.clone(),
                });
            };
            let found = plugins[provider].version();
            if !dep.version_req.matches(&found) {
                return Err(PluginError::IncompatibleVersion {
                    plugin: plugin.id().clone(),
                    dependency: dep.id.clone(),
                    required: dep.version_req.to_string(),
                    found: found.to_string(),
                });
            }
            dependents[provider].push(i);
            in_degree[i] += 1;
        }
    }

    let mut layers: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut processed = 0;

    while !current.is_empty() {
        processed += current.len();
        let mut next: Vec<usize> = Vec::new();
        for &i in &current {
            for &j in &dependents[i] {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    next.push(j);
                }
            }
        }
        next.sort_unstable();
        layers.push(current);
        current = next;
    }

    if processed != n {
        return Err(PluginError::DependencyCycle {
            members: cycle_members(plugins, &in_degree, &dependents),
        });
    }

    Ok(layers)
}

/// Narrows the nodes Kahn's algorithm could not place down to those that sit
/// on a cycle, dropping plugins that merely depend on one.
fn cycle_members(
    plugins: &[&PluginDescriptor],
    in_degree: &[usize],
    dependents: &[Vec<usize>],
) -> Vec<PluginId> {
    let mut remaining: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();
    loop {
        let leaf = (0..plugins.len())
            .find(|&i| remaining[i] && !dependents[i].iter().any(|&j| remaining[j]));
        match leaf {
            Some(i) => remaining[i] = false,
            None => break,
        }
    }
    (0..plugins.len())
        .filter(|&i| remaining[i])
        .map(|i| plugins[i].id().clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Plugin, PluginContext, Version};
    use async_trait::async_trait;
    use lattice_core::BoxError;

    struct Noop;

    #[async_trait]
    impl Plugin for Noop {
        async fn on_enable(&self, _ctx: &PluginContext) -> Result<(), BoxError> {
            Ok(())
        }
    }

    fn desc(id: &str, deps: &[&str]) -> PluginDescriptor {
        deps.iter()
            .fold(PluginDescriptor::new(id, Version::new(1, 0, 0), Noop), |d, dep| {
                d.depends_on(*dep)
            })
    }

    fn ids(plugins: &[PluginDescriptor], layers: &[Vec<usize>]) -> Vec<Vec<String>> {
        layers
            .iter()
            .map(|l| l.iter().map(|&i| plugins[i].id().to_string()).collect())
            .collect()
    }

    #[test]
    fn test_layers() {
        let plugins = vec![
            desc("app", &["db", "http"]),
            desc("http", &[]),
            desc("db", &["log"]),
            desc("log", &[]),
        ];
        let refs: Vec<&PluginDescriptor> = plugins.iter().collect();
        let layers = topological_layers(&refs).unwrap();
        assert_eq!(
            ids(&plugins, &layers),
            vec![vec!["http", "log"], vec!["db"], vec!["app"]]
        );
    }

    #[test]
    fn test_cycle_is_reported() {
        let plugins = vec![desc("a", &["b"]), desc("b", &["a"]), desc("c", &["a"])];
        let refs: Vec<&PluginDescriptor> = plugins.iter().collect();
        assert_eq!(
            topological_layers(&refs),
            Err(PluginError::DependencyCycle {
                members: vec!["a".into(), "b".into()]
            })
        );
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let plugins = vec![desc("loop", &["loop"])];
        let refs: Vec<&PluginDescriptor> = plugins.iter().collect();
        assert!(matches!(
            topological_layers(&refs),
            Err(PluginError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_missing_and_incompatible() {
        let plugins = vec![desc("a", &["ghost"])];
        let refs: Vec<&PluginDescriptor> = plugins.iter().collect();
        assert_eq!(
            topological_layers(&refs),
            Err(PluginError::MissingDependency {
                plugin: "a".into(),
                dependency: "ghost".into()
            })
        );

        let plugins = vec![
            PluginDescriptor::new("a", Version::new(1, 0, 0), Noop)
                .depends_on_version("b", "^2.0".parse().unwrap()),
            desc("b", &[]),
        ];
        let refs: Vec<&PluginDescriptor> = plugins.iter().collect();
        assert!(matches!(
            topological_layers(&refs),
            Err(PluginError::IncompatibleVersion { .. })
        ));
    }

    #[test]
    fn test_duplicate_id() {
        let plugins = vec![desc("a", &[]), desc("a", &[])];
        let refs: Vec<&PluginDescriptor> = plugins.iter().collect();
        assert_eq!(
            topological_layers(&refs),
            Err(PluginError::DuplicatePlugin("a".into()))
        );
    }
}

//! Configuration rewriting (§4.E): YAML path-based mutation, JVM options
//! rewriting, and deployment-mode member-list/port selection.
//!
//! Key order is preserved because `serde_yaml::Mapping` is backed by an
//! order-preserving map; literal YAML *comment* preservation is not
//! available in this crate (see DESIGN.md) and is a documented
//! simplification relative to §4.E's comment-preserving node tree.

use std::fs;
use std::path::Path;

use regex::Regex;
use serde_yaml::Value;

use crate::error::InstallerError;

/// Copies `path` to a sibling `.bak` file before any mutation (§4.E).
fn backup(path: &Path) -> Result<(), InstallerError> {
    let mut backup_name = path.file_name().expect("config path has a file name").to_os_string();
    backup_name.push(".bak");
    let backup_path = path.with_file_name(backup_name);
    fs::copy(path, backup_path)?;
    Ok(())
}

fn navigate_mut<'a>(root: &'a mut Value, path: &[&str]) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path {
        current = current.as_mapping_mut()?.get_mut(&Value::from(*segment))?;
    }
    Some(current)
}

fn navigate_parent_mut<'a>(root: &'a mut Value, path: &[&'a str]) -> Option<(&'a mut serde_yaml::Mapping, &'a str)> {
    let (leaf, parents) = path.split_last()?;
    let mut current = root;
    for segment in parents {
        current = current.as_mapping_mut()?.entry(Value::from(*segment)).or_insert(Value::Mapping(Default::default()));
    }
    Some((current.as_mapping_mut()?, leaf))
}

/// Rewrites the scalar or sequence at `path` (dot-separated) to `value`,
/// backing up the file first.
pub fn set_value(file: &Path, path: &str, value: Value) -> Result<(), InstallerError> {
    backup(file)?;
    let raw = fs::read_to_string(file)?;
    let mut tree: Value = serde_yaml::from_str(&raw)?;

    let segments: Vec<&str> = path.split('.').collect();
    let (mapping, leaf) = navigate_parent_mut(&mut tree, &segments)
        .ok_or_else(|| InstallerError::ConfigPathNotFound(path.to_string()))?;
    mapping.insert(Value::from(leaf), value);

    fs::write(file, serde_yaml::to_string(&tree)?)?;
    Ok(())
}

/// Replaces the mapping entries at `path` with a fresh set, backing up the
/// file first.
pub fn set_map(file: &Path, path: &str, entries: Vec<(String, Value)>) -> Result<(), InstallerError> {
    let map: serde_yaml::Mapping = entries.into_iter().map(|(k, v)| (Value::from(k), v)).collect();
    set_value(file, path, Value::Mapping(map))
}

/// Reads the value at `path`, if present, without mutating the file.
pub fn get_value(file: &Path, path: &str) -> Result<Option<Value>, InstallerError> {
    let raw = fs::read_to_string(file)?;
    let mut tree: Value = serde_yaml::from_str(&raw)?;
    let segments: Vec<&str> = path.split('.').collect();
    Ok(navigate_mut(&mut tree, &segments).cloned())
}

/// Rewrites `-Xms`/`-Xmx` lines in a plain-text JVM options file to the
/// given heap sizes in gigabytes, backing up the file first. Both
/// directives must be present and are each rewritten exactly once.
pub fn rewrite_jvm_options(file: &Path, heap_gb: u32) -> Result<(), InstallerError> {
    backup(file)?;
    let raw = fs::read_to_string(file)?;

    let xms_re = Regex::new(r"(?m)^#?\s*-Xms\d+g\s*$").expect("valid regex");
    let xmx_re = Regex::new(r"(?m)^#?\s*-Xmx\d+g\s*$").expect("valid regex");

    let rewritten = xms_re.replace(&raw, format!("-Xms{heap_gb}g"));
    let rewritten = xmx_re.replace(&rewritten, format!("-Xmx{heap_gb}g"));

    fs::write(file, rewritten.as_ref())?;
    Ok(())
}

/// Deployment topology selecting per-role port and heap configuration
/// (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    /// All nodes share one port; the member list is `{master_i:port}`.
    Hybrid,
    /// Master and worker use distinct ports; the member list is the union
    /// of both, and the per-file port is chosen by config file name.
    Separated,
}

impl std::str::FromStr for DeploymentMode {
    type Err = InstallerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hybrid" => Ok(Self::Hybrid),
            "separated" => Ok(Self::Separated),
            other => Err(InstallerError::InvalidDeploymentMode(other.to_string())),
        }
    }
}

/// Resolves the member list for a given cluster shape and port scheme.
#[must_use]
pub fn member_list(mode: DeploymentMode, masters: &[String], workers: &[String], master_port: u16, worker_port: u16) -> Vec<String> {
    match mode {
        DeploymentMode::Hybrid => masters.iter().map(|host| format!("{host}:{master_port}")).collect(),
        DeploymentMode::Separated => masters
            .iter()
            .map(|host| format!("{host}:{master_port}"))
            .chain(workers.iter().map(|host| format!("{host}:{worker_port}")))
            .collect(),
    }
}

/// Resolves the port to write into a given hazelcast config file name
/// under separated deployment (§4.E).
#[must_use]
pub fn port_for_config_file(mode: DeploymentMode, file_name: &str, master_port: u16, worker_port: u16) -> u16 {
    match mode {
        DeploymentMode::Hybrid => master_port,
        DeploymentMode::Separated => {
            if file_name.contains("worker") {
                worker_port
            } else {
                master_port
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn set_value_rewrites_leaf_and_creates_backup() {
        let dir = tempdir().unwrap();
        let file = write(dir.path(), "hazelcast.yaml", "hazelcast:\n  cluster-name: dev\n  port: 5701\n");

        set_value(&file, "hazelcast.port", Value::from(5702)).unwrap();

        let backup_path = dir.path().join("hazelcast.yaml.bak");
        assert!(backup_path.exists());
        let rewritten: Value = serde_yaml::from_str(&fs::read_to_string(&file).unwrap()).unwrap();
        assert_eq!(rewritten["hazelcast"]["port"], Value::from(5702));
        assert_eq!(rewritten["hazelcast"]["cluster-name"], Value::from("dev"));
    }

    #[test]
    fn set_map_replaces_entries_wholesale() {
        let dir = tempdir().unwrap();
        let file = write(dir.path(), "hazelcast.yaml", "hazelcast:\n  network:\n    members: {}\n");

        set_map(
            &file,
            "hazelcast.network.members",
            vec![("master-1".to_string(), Value::from("10.0.0.1:5701"))],
        )
        .unwrap();

        let rewritten: Value = serde_yaml::from_str(&fs::read_to_string(&file).unwrap()).unwrap();
        assert_eq!(rewritten["hazelcast"]["network"]["members"]["master-1"], Value::from("10.0.0.1:5701"));
    }

    #[test]
    fn rewrite_jvm_options_replaces_both_directives_once() {
        let dir = tempdir().unwrap();
        let file = write(dir.path(), "jvm_options", "-server\n#-Xms2g\n-Xmx2g\n-XX:+UseG1GC\n");

        rewrite_jvm_options(&file, 8).unwrap();

        let content = fs::read_to_string(&file).unwrap();
        assert_eq!(content.matches("-Xms8g").count(), 1);
        assert_eq!(content.matches("-Xmx8g").count(), 1);
        assert!(content.contains("-XX:+UseG1GC"));
    }

    #[test]
    fn hybrid_member_list_uses_master_port_only() {
        let masters = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];
        let list = member_list(DeploymentMode::Hybrid, &masters, &[], 5701, 5702);
        assert_eq!(list, vec!["10.0.0.1:5701", "10.0.0.2:5701"]);
    }

    #[test]
    fn separated_member_list_is_union_of_masters_and_workers() {
        let masters = vec!["10.0.0.1".to_string()];
        let workers = vec!["10.0.0.2".to_string()];
        let list = member_list(DeploymentMode::Separated, &masters, &workers, 5701, 5702);
        assert_eq!(list, vec!["10.0.0.1:5701", "10.0.0.2:5702"]);
    }

    #[test]
    fn separated_port_selection_depends_on_file_name() {
        assert_eq!(port_for_config_file(DeploymentMode::Separated, "hazelcast-master.yaml", 5701, 5702), 5701);
        assert_eq!(port_for_config_file(DeploymentMode::Separated, "hazelcast-worker.yaml", 5701, 5702), 5702);
    }

    #[test]
    fn deployment_mode_parses_known_values_only() {
        assert_eq!("hybrid".parse::<DeploymentMode>().unwrap(), DeploymentMode::Hybrid);
        assert!("bogus".parse::<DeploymentMode>().is_err());
    }
}

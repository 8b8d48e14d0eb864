//! In-memory backend modeling the snapshot/clone graph.
//!
//! [`MockZfs`] implements enough ZFS semantics for the lifecycle engines
//! to run unmodified: recursive snapshots, clone origins, promote
//! re-parenting snapshots and rewriting dependent origins, and destroy
//! refusing while dependent clones exist. Every mutating call is recorded
//! so tests can assert exact adapter traffic (for example, that a dry run
//! performed zero mutations).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::error::{Error, Result};
use crate::path::DatasetPath;
use crate::types::{DatasetKind, GetOptions, ListOptions, Property, PropertySource};

use super::ZfsBackend;

/// One mutating call observed by the mock, in wire-format strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `zfs snapshot [-r]`
    Snapshot {
        /// Snapshot path created.
        target: String,
        /// Whether `-r` was used.
        recursive: bool,
    },
    /// `zfs clone`
    Clone {
        /// Source snapshot.
        snapshot: String,
        /// New dataset path.
        target: String,
    },
    /// `zfs promote`
    Promote(String),
    /// `zfs destroy -r`
    DestroyRecursive(String),
    /// `zfs destroy` on a snapshot
    DestroySnapshot(String),
    /// `zfs rename`
    Rename {
        /// Old path.
        from: String,
        /// New path.
        to: String,
    },
    /// `zfs set`
    Set {
        /// Dataset the property was set on.
        dataset: String,
        /// Property name.
        property: String,
        /// Property value.
        value: String,
    },
    /// `zpool set`
    PoolSet {
        /// Pool the property was set on.
        pool: String,
        /// Property name.
        property: String,
        /// Property value.
        value: String,
    },
    /// `zfs mount`
    Mount(String),
    /// Manual `mount -t zfs` at an explicit path
    MountAt {
        /// Dataset mounted.
        dataset: String,
        /// Where it was mounted.
        mountpoint: PathBuf,
    },
    /// `zfs umount`
    Unmount(String),
}

impl MockCall {
    /// Whether this call changes dataset or pool state. Mount traffic is
    /// excluded: it moves visibility, not data.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::Mount(_) | Self::MountAt { .. } | Self::Unmount(_)
        )
    }
}

#[derive(Debug, Clone)]
struct PropEntry {
    value: String,
    source: String,
}

#[derive(Debug, Clone)]
struct Node {
    kind: DatasetKind,
    creation: NaiveDateTime,
    origin: Option<String>,
    properties: BTreeMap<String, PropEntry>,
}

impl Node {
    fn new(kind: DatasetKind, creation: NaiveDateTime) -> Self {
        Self {
            kind,
            creation,
            origin: None,
            properties: BTreeMap::new(),
        }
    }
}

#[derive(Default)]
struct State {
    datasets: BTreeMap<String, Node>,
    pools: BTreeMap<String, BTreeMap<String, String>>,
    mounts: BTreeMap<PathBuf, String>,
    calls: Vec<MockCall>,
}

/// In-memory [`ZfsBackend`] for tests.
pub struct MockZfs {
    state: Mutex<State>,
}

/// Seeded datasets date their creation in minutes from this base.
fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

impl MockZfs {
    /// Empty mock with no pools or datasets.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Mock seeded with one pool.
    pub fn with_pool(pool: &str) -> Self {
        let mock = Self::new();
        mock.add_pool(pool);
        mock
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Fixture construction
    // =========================================================================

    /// Register a pool (no properties set).
    pub fn add_pool(&self, pool: &str) {
        self.state().pools.entry(pool.to_string()).or_default();
    }

    /// Seed a filesystem created `minutes` after the fixture base time.
    /// The pool is registered implicitly.
    pub fn add_filesystem(&self, path: &str, minutes: i64) {
        self.add_node(path, DatasetKind::Filesystem, minutes);
    }

    /// Seed a volume.
    pub fn add_volume(&self, path: &str, minutes: i64) {
        self.add_node(path, DatasetKind::Volume, minutes);
    }

    /// Seed a snapshot (`fs@name`).
    pub fn add_snapshot(&self, path: &str, minutes: i64) {
        self.add_node(path, DatasetKind::Snapshot, minutes);
    }

    /// Seed a filesystem that is a clone of `snapshot`.
    pub fn add_clone(&self, snapshot: &str, path: &str, minutes: i64) {
        self.add_node(path, DatasetKind::Filesystem, minutes);
        if let Some(node) = self.state().datasets.get_mut(path) {
            node.origin = Some(snapshot.to_string());
        }
    }

    fn add_node(&self, path: &str, kind: DatasetKind, minutes: i64) {
        let mut st = self.state();
        if let Some(pool) = path.split(['/', '@']).next() {
            st.pools.entry(pool.to_string()).or_default();
        }
        let creation = base_time() + Duration::minutes(minutes);
        st.datasets.insert(path.to_string(), Node::new(kind, creation));
    }

    /// Seed a property with `local` source.
    pub fn set_local_property(&self, dataset: &str, name: &str, value: &str) {
        self.seed_property(dataset, name, value, "local");
    }

    /// Seed a property with an arbitrary source string
    /// (`received`, `default`, `inherited`, ...).
    pub fn seed_property(&self, dataset: &str, name: &str, value: &str, source: &str) {
        if let Some(node) = self.state().datasets.get_mut(dataset) {
            node.properties.insert(
                name.to_string(),
                PropEntry {
                    value: value.to_string(),
                    source: source.to_string(),
                },
            );
        }
    }

    /// Seed a pool property (e.g. `bootfs`, `altroot`).
    pub fn set_pool_property(&self, pool: &str, name: &str, value: &str) {
        self.state()
            .pools
            .entry(pool.to_string())
            .or_default()
            .insert(name.to_string(), value.to_string());
    }

    /// Mark a dataset as currently mounted at `mountpoint`.
    pub fn set_mounted(&self, dataset: &str, mountpoint: &str) {
        self.state()
            .mounts
            .insert(PathBuf::from(mountpoint), dataset.to_string());
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Every call observed, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    /// Only the calls that mutate dataset or pool state.
    pub fn mutations(&self) -> Vec<MockCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    /// Forget recorded calls (keeps datasets).
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Whether a dataset or snapshot exists by exact path.
    pub fn contains(&self, path: &str) -> bool {
        self.state().datasets.contains_key(path)
    }

    /// All dataset paths, sorted.
    pub fn dataset_names(&self) -> Vec<String> {
        self.state().datasets.keys().cloned().collect()
    }

    /// Origin of a dataset, if it is a clone.
    pub fn origin_of(&self, path: &str) -> Option<String> {
        self.state().datasets.get(path).and_then(|n| n.origin.clone())
    }

    /// Properties of a dataset as name → value (any source).
    pub fn properties_of(&self, path: &str) -> BTreeMap<String, String> {
        self.state()
            .datasets
            .get(path)
            .map(|n| {
                n.properties
                    .iter()
                    .map(|(k, v)| (k.clone(), v.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn record(&self, call: MockCall) {
        self.state().calls.push(call);
    }
}

impl Default for MockZfs {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `candidate` falls inside a listing of `target` with the given
/// recursion settings. Depth counts path levels below the target, with a
/// snapshot adding one more level, matching `zfs list -d`.
fn within(target: &str, candidate: &str, recursive: bool, depth: Option<u32>) -> bool {
    if candidate == target {
        return true;
    }
    if !recursive && depth.is_none() {
        return false;
    }
    let levels = if let Some(rest) = candidate.strip_prefix(&format!("{target}/")) {
        rest.matches('/').count() + 1 + usize::from(rest.contains('@'))
    } else if candidate.strip_prefix(&format!("{target}@")).is_some() {
        1
    } else {
        return false;
    };
    depth.is_none_or(|d| levels <= d as usize)
}

fn format_creation(creation: NaiveDateTime) -> String {
    creation.format("%a %b %e %H:%M %Y").to_string()
}

fn column_value(name: &str, node: &Node, column: &str) -> String {
    match column {
        "name" => name.to_string(),
        "origin" => node.origin.clone().unwrap_or_else(|| "-".to_string()),
        "creation" => format_creation(node.creation),
        other => node
            .properties
            .get(other)
            .map(|e| e.value.clone())
            .unwrap_or_else(|| "-".to_string()),
    }
}

impl ZfsBackend for MockZfs {
    fn list(&self, target: &DatasetPath, opts: &ListOptions) -> Result<Vec<Vec<String>>> {
        let st = self.state();
        if !st.datasets.contains_key(target.as_str()) {
            return Err(Error::DatasetNotFound(target.to_string()));
        }
        let kinds: &[DatasetKind] = if opts.kinds.is_empty() {
            &[DatasetKind::Filesystem, DatasetKind::Volume]
        } else {
            &opts.kinds
        };
        let mut selected: Vec<(&String, &Node)> = st
            .datasets
            .iter()
            .filter(|(name, _)| within(target.as_str(), name, opts.recursive, opts.depth))
            .filter(|(_, node)| kinds.contains(&node.kind))
            .collect();
        if opts.sort_ascending.iter().any(|p| p == "creation") {
            selected.sort_by(|a, b| a.1.creation.cmp(&b.1.creation).then(a.0.cmp(b.0)));
        }
        if opts.sort_descending.iter().any(|p| p == "name") {
            selected.sort_by(|a, b| b.0.cmp(a.0));
        }
        let name_only = ["name".to_string()];
        let columns: &[String] = if opts.columns.is_empty() {
            &name_only
        } else {
            &opts.columns
        };
        Ok(selected
            .into_iter()
            .map(|(name, node)| {
                columns
                    .iter()
                    .map(|col| column_value(name, node, col))
                    .collect()
            })
            .collect())
    }

    fn get(
        &self,
        target: &DatasetPath,
        properties: &[&str],
        opts: &GetOptions,
    ) -> Result<Vec<Vec<String>>> {
        let st = self.state();
        if !st.datasets.contains_key(target.as_str()) {
            return Err(Error::DatasetNotFound(target.to_string()));
        }
        let kinds: &[DatasetKind] = if opts.kinds.is_empty() {
            &DatasetKind::ALL
        } else {
            &opts.kinds
        };
        let columns: Vec<&str> = if opts.columns.is_empty() {
            vec!["name", "property", "value", "source"]
        } else {
            opts.columns.iter().map(String::as_str).collect()
        };
        let sources: Vec<&str> = opts.sources.iter().map(|s| s.as_str()).collect();

        let mut rows = Vec::new();
        for (name, node) in st
            .datasets
            .iter()
            .filter(|(name, _)| within(target.as_str(), name, opts.recursive, opts.depth))
            .filter(|(_, node)| kinds.contains(&node.kind))
        {
            // (property, value, source) triples for this dataset
            let mut triples: Vec<(String, String, String)> = Vec::new();
            for prop in properties {
                if *prop == "all" {
                    for (pname, entry) in &node.properties {
                        triples.push((pname.clone(), entry.value.clone(), entry.source.clone()));
                    }
                } else {
                    let (value, source) = match *prop {
                        "origin" => (
                            node.origin.clone().unwrap_or_else(|| "-".to_string()),
                            "-".to_string(),
                        ),
                        "creation" => (format_creation(node.creation), "-".to_string()),
                        other => node
                            .properties
                            .get(other)
                            .map(|e| (e.value.clone(), e.source.clone()))
                            .unwrap_or_else(|| ("-".to_string(), "-".to_string())),
                    };
                    triples.push(((*prop).to_string(), value, source));
                }
            }
            for (pname, value, source) in triples {
                if !sources.is_empty() && !sources.contains(&source.as_str()) {
                    continue;
                }
                rows.push(
                    columns
                        .iter()
                        .map(|col| match *col {
                            "name" => name.clone(),
                            "property" => pname.clone(),
                            "value" => value.clone(),
                            "source" => source.clone(),
                            _ => "-".to_string(),
                        })
                        .collect(),
                );
            }
        }
        Ok(rows)
    }

    fn pool_property(&self, pool: &str, property: &str) -> Result<String> {
        let st = self.state();
        let props = st
            .pools
            .get(pool)
            .ok_or_else(|| Error::DatasetNotFound(pool.to_string()))?;
        Ok(props.get(property).cloned().unwrap_or_else(|| "-".to_string()))
    }

    fn mounted_dataset(&self, mountpoint: &Path) -> Result<Option<DatasetPath>> {
        let st = self.state();
        match st.mounts.get(mountpoint) {
            Some(dataset) => Ok(Some(DatasetPath::new(dataset.clone())?)),
            None => Ok(None),
        }
    }

    fn dataset_mountpoint(&self, dataset: &DatasetPath) -> Result<Option<PathBuf>> {
        let st = self.state();
        Ok(st
            .mounts
            .iter()
            .find(|(_, ds)| ds.as_str() == dataset.as_str())
            .map(|(mp, _)| mp.clone()))
    }

    fn set(&self, dataset: &DatasetPath, property: &Property) -> Result<()> {
        self.record(MockCall::Set {
            dataset: dataset.to_string(),
            property: property.name.clone(),
            value: property.value.clone(),
        });
        let mut st = self.state();
        let node = st
            .datasets
            .get_mut(dataset.as_str())
            .ok_or_else(|| Error::DatasetNotFound(dataset.to_string()))?;
        node.properties.insert(
            property.name.clone(),
            PropEntry {
                value: property.value.clone(),
                source: "local".to_string(),
            },
        );
        Ok(())
    }

    fn snapshot(&self, snapshot: &DatasetPath, recursive: bool) -> Result<()> {
        self.record(MockCall::Snapshot {
            target: snapshot.to_string(),
            recursive,
        });
        let fs = snapshot
            .snapshot_parent()
            .ok_or_else(|| Error::InvalidPath {
                path: snapshot.to_string(),
                reason: "snapshot requires fs@name",
            })?;
        let snap_name = snapshot.snapshot_name().unwrap_or_default().to_string();

        let mut st = self.state();
        if !st.datasets.contains_key(fs.as_str()) {
            return Err(Error::DatasetNotFound(fs.to_string()));
        }
        let targets: Vec<String> = if recursive {
            st.datasets
                .iter()
                .filter(|(name, node)| {
                    node.kind != DatasetKind::Snapshot
                        && (name.as_str() == fs.as_str()
                            || name.starts_with(&format!("{fs}/")))
                })
                .map(|(name, _)| name.clone())
                .collect()
        } else {
            vec![fs.to_string()]
        };
        // Recursive snapshots are atomic: check all before creating any.
        for target in &targets {
            let key = format!("{target}@{snap_name}");
            if st.datasets.contains_key(&key) {
                return Err(Error::DatasetExists(key));
            }
        }
        let creation = now();
        for target in targets {
            st.datasets.insert(
                format!("{target}@{snap_name}"),
                Node::new(DatasetKind::Snapshot, creation),
            );
        }
        Ok(())
    }

    fn clone(
        &self,
        snapshot: &DatasetPath,
        target: &DatasetPath,
        properties: &[Property],
    ) -> Result<()> {
        self.record(MockCall::Clone {
            snapshot: snapshot.to_string(),
            target: target.to_string(),
        });
        let mut st = self.state();
        match st.datasets.get(snapshot.as_str()) {
            Some(node) if node.kind == DatasetKind::Snapshot => {}
            _ => return Err(Error::DatasetNotFound(snapshot.to_string())),
        }
        if st.datasets.contains_key(target.as_str()) {
            return Err(Error::DatasetExists(target.to_string()));
        }
        if let Some(parent) = target.parent() {
            if !st.datasets.contains_key(parent.as_str()) {
                return Err(Error::DatasetNotFound(parent.to_string()));
            }
        }
        let mut node = Node::new(DatasetKind::Filesystem, now());
        node.origin = Some(snapshot.to_string());
        for property in properties {
            node.properties.insert(
                property.name.clone(),
                PropEntry {
                    value: property.value.clone(),
                    source: "local".to_string(),
                },
            );
        }
        st.datasets.insert(target.to_string(), node);
        Ok(())
    }

    fn promote(&self, dataset: &DatasetPath) -> Result<()> {
        self.record(MockCall::Promote(dataset.to_string()));
        let mut st = self.state();
        let origin = match st.datasets.get(dataset.as_str()) {
            None => return Err(Error::DatasetNotFound(dataset.to_string())),
            Some(node) => node.origin.clone().ok_or_else(|| Error::CommandFailed {
                command: "zfs promote".to_string(),
                stderr: format!("cannot promote '{dataset}': not a cloned filesystem"),
            })?,
        };
        let (origin_fs, _origin_snap) = match origin.split_once('@') {
            Some(parts) => parts,
            None => {
                return Err(Error::UnexpectedOutput {
                    what: "origin",
                    detail: origin,
                })
            }
        };
        let origin_fs = origin_fs.to_string();
        let origin_creation = st
            .datasets
            .get(&origin)
            .map(|n| n.creation)
            .unwrap_or_else(now);

        // Snapshots of the origin filesystem up to and including the
        // origin snapshot transfer to the promoted clone.
        let moved: Vec<(String, String)> = st
            .datasets
            .iter()
            .filter(|(name, node)| {
                node.kind == DatasetKind::Snapshot
                    && node.creation <= origin_creation
                    && name.starts_with(&format!("{origin_fs}@"))
            })
            .map(|(name, _)| {
                let snap = name.split_once('@').map(|(_, s)| s).unwrap_or_default();
                (name.clone(), format!("{dataset}@{snap}"))
            })
            .collect();

        for (old, new) in &moved {
            if let Some(node) = st.datasets.remove(old) {
                st.datasets.insert(new.clone(), node);
            }
            for node in st.datasets.values_mut() {
                if node.origin.as_deref() == Some(old.as_str()) {
                    node.origin = Some(new.clone());
                }
            }
        }

        // Swap the dependency direction.
        let prior_origin = st
            .datasets
            .get_mut(&origin_fs)
            .and_then(|node| node.origin.take());
        let new_origin_of_former_parent = moved
            .iter()
            .find(|(old, _)| *old == origin)
            .map(|(_, new)| new.clone());
        if let Some(node) = st.datasets.get_mut(&origin_fs) {
            node.origin = new_origin_of_former_parent;
        }
        if let Some(node) = st.datasets.get_mut(dataset.as_str()) {
            node.origin = prior_origin;
        }
        Ok(())
    }

    fn destroy_recursive(&self, dataset: &DatasetPath) -> Result<()> {
        self.record(MockCall::DestroyRecursive(dataset.to_string()));
        let mut st = self.state();
        if !st.datasets.contains_key(dataset.as_str()) {
            return Err(Error::DatasetNotFound(dataset.to_string()));
        }
        let doomed: Vec<String> = st
            .datasets
            .keys()
            .filter(|name| {
                let fs_part = name.split('@').next().unwrap_or(name);
                fs_part == dataset.as_str()
                    || fs_part.starts_with(&format!("{dataset}/"))
            })
            .cloned()
            .collect();
        // Refuse while any snapshot in the subtree still has an outside clone.
        for (name, node) in &st.datasets {
            if doomed.contains(name) {
                continue;
            }
            if let Some(origin) = &node.origin {
                if doomed.contains(origin) {
                    return Err(Error::DependentClones(dataset.to_string()));
                }
            }
        }
        for name in &doomed {
            st.datasets.remove(name);
        }
        st.mounts.retain(|_, ds| !doomed.contains(ds));
        Ok(())
    }

    fn destroy_snapshot(&self, snapshot: &DatasetPath) -> Result<()> {
        self.record(MockCall::DestroySnapshot(snapshot.to_string()));
        let mut st = self.state();
        match st.datasets.get(snapshot.as_str()) {
            Some(node) if node.kind == DatasetKind::Snapshot => {}
            _ => return Err(Error::DatasetNotFound(snapshot.to_string())),
        }
        let referenced = st
            .datasets
            .values()
            .any(|node| node.origin.as_deref() == Some(snapshot.as_str()));
        if referenced {
            return Err(Error::DependentClones(snapshot.to_string()));
        }
        st.datasets.remove(snapshot.as_str());
        Ok(())
    }

    fn rename(&self, from: &DatasetPath, to: &DatasetPath) -> Result<()> {
        self.record(MockCall::Rename {
            from: from.to_string(),
            to: to.to_string(),
        });
        let mut st = self.state();
        if !st.datasets.contains_key(from.as_str()) {
            return Err(Error::DatasetNotFound(from.to_string()));
        }
        if st.datasets.contains_key(to.as_str()) {
            return Err(Error::DatasetExists(to.to_string()));
        }
        if let Some(parent) = to.parent() {
            if !st.datasets.contains_key(parent.as_str()) {
                return Err(Error::DatasetNotFound(parent.to_string()));
            }
        }

        let rewrite = |name: &str| -> Option<String> {
            if name == from.as_str() {
                Some(to.to_string())
            } else {
                name.strip_prefix(&format!("{from}/"))
                    .map(|rest| format!("{to}/{rest}"))
                    .or_else(|| {
                        name.strip_prefix(&format!("{from}@"))
                            .map(|rest| format!("{to}@{rest}"))
                    })
            }
        };

        let moves: Vec<(String, String)> = st
            .datasets
            .keys()
            .filter_map(|name| rewrite(name).map(|new| (name.clone(), new)))
            .collect();
        for (old, new) in &moves {
            if let Some(node) = st.datasets.remove(old) {
                st.datasets.insert(new.clone(), node);
            }
        }
        // Origins and mounts referring to moved paths follow along.
        for node in st.datasets.values_mut() {
            if let Some(origin) = &node.origin {
                if let Some(new) = rewrite(origin) {
                    node.origin = Some(new);
                }
            }
        }
        for ds in st.mounts.values_mut() {
            if let Some(new) = rewrite(ds) {
                *ds = new;
            }
        }
        Ok(())
    }

    fn pool_set(&self, pool: &str, property: &Property) -> Result<()> {
        self.record(MockCall::PoolSet {
            pool: pool.to_string(),
            property: property.name.clone(),
            value: property.value.clone(),
        });
        let mut st = self.state();
        let props = st
            .pools
            .get_mut(pool)
            .ok_or_else(|| Error::DatasetNotFound(pool.to_string()))?;
        props.insert(property.name.clone(), property.value.clone());
        Ok(())
    }

    fn mount(&self, dataset: &DatasetPath) -> Result<()> {
        self.record(MockCall::Mount(dataset.to_string()));
        let mut st = self.state();
        let node = st
            .datasets
            .get(dataset.as_str())
            .ok_or_else(|| Error::DatasetNotFound(dataset.to_string()))?;
        let mountpoint = node
            .properties
            .get("mountpoint")
            .map(|e| e.value.clone())
            .filter(|v| v != "none" && v != "legacy" && v != "-")
            .ok_or_else(|| Error::CommandFailed {
                command: "zfs mount".to_string(),
                stderr: format!("cannot mount '{dataset}': no usable mountpoint"),
            })?;
        st.mounts.insert(PathBuf::from(mountpoint), dataset.to_string());
        Ok(())
    }

    fn mount_at(&self, dataset: &DatasetPath, mountpoint: &Path) -> Result<()> {
        self.record(MockCall::MountAt {
            dataset: dataset.to_string(),
            mountpoint: mountpoint.to_path_buf(),
        });
        let mut st = self.state();
        if !st.datasets.contains_key(dataset.as_str()) {
            return Err(Error::DatasetNotFound(dataset.to_string()));
        }
        st.mounts
            .insert(mountpoint.to_path_buf(), dataset.to_string());
        Ok(())
    }

    fn unmount(&self, dataset: &DatasetPath) -> Result<()> {
        self.record(MockCall::Unmount(dataset.to_string()));
        let mut st = self.state();
        let mountpoint = st
            .mounts
            .iter()
            .find(|(_, ds)| ds.as_str() == dataset.as_str())
            .map(|(mp, _)| mp.clone());
        match mountpoint {
            Some(mp) => {
                st.mounts.remove(&mp);
                Ok(())
            }
            None => Err(Error::CommandFailed {
                command: "zfs umount".to_string(),
                stderr: format!("cannot unmount '{dataset}': not currently mounted"),
            }),
        }
    }
}

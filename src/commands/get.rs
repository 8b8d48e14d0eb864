use crate::Context;
use crate::boot_env;
use crate::config;
use crate::plugins;
use crate::ui;
use anyhow::{Context as _, Result};
use zfskit::{DatasetKind, DatasetPath, GetOptions, ZfsBackend};

pub fn run(
    _ctx: &Context,
    zfs: &dyn ZfsBackend,
    recursive: bool,
    scripting: bool,
    defaults: bool,
    properties: &[String],
) -> Result<()> {
    if defaults {
        let rows = default_property_rows(properties);
        print_rows(&["PROPERTY", "DEFAULT", "DESCRIPTION"], &rows, scripting);
        return Ok(());
    }

    let be_root = boot_env::root(zfs)?;
    let rows = set_property_rows(zfs, &be_root, recursive, properties)?;
    let headers: &[&str] = if recursive {
        &["NAME", "PROPERTY", "VALUE"]
    } else {
        &["PROPERTY", "VALUE"]
    };
    print_rows(headers, &rows, scripting);
    Ok(())
}

fn print_rows(headers: &[&str], rows: &[Vec<String>], scripting: bool) {
    if scripting {
        ui::machine_table(rows);
    } else {
        ui::table(headers, rows);
    }
}

/// Namespaced properties currently set on the BE root (or, with
/// `recursive`, on each boot environment under it).
pub(crate) fn set_property_rows(
    zfs: &dyn ZfsBackend,
    be_root: &DatasetPath,
    recursive: bool,
    properties: &[String],
) -> Result<Vec<Vec<String>>> {
    let mut columns = vec!["property".to_string(), "value".to_string()];
    let mut property_index = 0;
    if recursive {
        columns.insert(0, "name".to_string());
        property_index = 1;
    }

    let requested: Vec<&str> = if properties.is_empty() {
        vec!["all"]
    } else {
        properties.iter().map(String::as_str).collect()
    };

    let opts = GetOptions {
        recursive,
        depth: None,
        kinds: vec![DatasetKind::Filesystem],
        sources: Vec::new(),
        columns,
    };
    let rows = zfs
        .get(be_root, &requested, &opts)
        .context("Failed to get zedenv properties")?;

    Ok(rows
        .into_iter()
        .filter(|row| {
            row.get(property_index)
                .is_some_and(|property| property.starts_with(config::NAMESPACE))
        })
        .collect())
}

/// Known properties with their defaults, core first, then per plugin.
fn default_property_rows(properties: &[String]) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for core in config::CORE_PROPERTIES {
        push_default(&mut rows, properties, config::core_key(core.property), core);
    }
    for spec in plugins::REGISTRY {
        for prop in spec.properties {
            push_default(
                &mut rows,
                properties,
                config::plugin_key(spec.name, prop.property),
                prop,
            );
        }
    }
    rows
}

fn push_default(
    rows: &mut Vec<Vec<String>>,
    requested: &[String],
    key: String,
    prop: &config::PropertyDefault,
) {
    let wanted =
        requested.is_empty() || requested.iter().any(|p| *p == key || p == prop.property);
    if wanted {
        rows.push(vec![
            key,
            prop.default.to_string(),
            prop.description.to_string(),
        ]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zfskit::MockZfs;

    fn booted_mock() -> MockZfs {
        let zfs = MockZfs::with_pool("rpool");
        zfs.add_filesystem("rpool/ROOT", 0);
        zfs.add_filesystem("rpool/ROOT/default", 0);
        zfs.set_mounted("rpool/ROOT/default", "/");
        zfs.set_pool_property("rpool", "bootfs", "rpool/ROOT/default");
        zfs
    }

    fn be_root() -> DatasetPath {
        DatasetPath::new("rpool/ROOT").unwrap()
    }

    #[test]
    fn test_set_property_rows_filters_namespace() {
        let zfs = booted_mock();
        zfs.set_local_property("rpool/ROOT", "org.zedenv:bootloader", "systemdboot");
        zfs.set_local_property("rpool/ROOT", "compression", "lz4");

        let rows = set_property_rows(&zfs, &be_root(), false, &[]).unwrap();
        assert_eq!(
            rows,
            vec![vec![
                "org.zedenv:bootloader".to_string(),
                "systemdboot".to_string()
            ]]
        );
    }

    #[test]
    fn test_set_property_rows_recursive_prepends_name() {
        let zfs = booted_mock();
        zfs.set_local_property("rpool/ROOT/default", "org.zedenv.systemdboot:esp", "/mnt/esp");

        let rows = set_property_rows(&zfs, &be_root(), true, &[]).unwrap();
        assert!(rows.contains(&vec![
            "rpool/ROOT/default".to_string(),
            "org.zedenv.systemdboot:esp".to_string(),
            "/mnt/esp".to_string(),
        ]));
    }

    #[test]
    fn test_set_property_rows_requested_subset() {
        let zfs = booted_mock();
        zfs.set_local_property("rpool/ROOT", "org.zedenv:bootloader", "systemdboot");
        zfs.set_local_property("rpool/ROOT", "org.zedenv.systemdboot:esp", "/mnt/esp");

        let rows =
            set_property_rows(&zfs, &be_root(), false, &["org.zedenv:bootloader".to_string()])
                .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], "org.zedenv:bootloader");
    }

    #[test]
    fn test_default_rows_cover_core_and_plugins() {
        let rows = default_property_rows(&[]);
        let keys: Vec<&str> = rows.iter().map(|r| r[0].as_str()).collect();
        assert!(keys.contains(&"org.zedenv:bootloader"));
        assert!(keys.contains(&"org.zedenv.systemdboot:esp"));
        assert!(keys.iter().all(|k| k.starts_with("org.zedenv")));
    }

    #[test]
    fn test_default_rows_match_bare_or_full_name() {
        let by_bare = default_property_rows(&["bootloader".to_string()]);
        assert_eq!(by_bare.len(), 1);
        assert_eq!(by_bare[0][0], "org.zedenv:bootloader");

        let by_key = default_property_rows(&["org.zedenv.systemdboot:esp".to_string()]);
        assert_eq!(by_key.len(), 1);
        assert_eq!(by_key[0][1], "/mnt/efi");
    }
}

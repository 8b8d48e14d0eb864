use crate::Context;
use crate::boot_env;
use crate::ui;
use anyhow::Result;
use std::path::Path;
use zfskit::{DatasetPath, ZfsBackend};

/// Space accounting columns requested by `--spaceused`.
const SPACE_COLUMNS: [&str; 5] = ["used", "usedds", "usedbysnapshots", "usedrefreserv", "refer"];

pub fn run(
    _ctx: &Context,
    zfs: &dyn ZfsBackend,
    spaceused: bool,
    scripting: bool,
    origin: bool,
) -> Result<()> {
    let be_root = boot_env::root(zfs)?;
    let rows = environment_rows(zfs, &be_root, spaceused, scripting, origin)?;

    if scripting {
        ui::machine_table(&rows);
    } else {
        let headers = display_headers(spaceused, origin);
        let headers: Vec<&str> = headers.iter().map(String::as_str).collect();
        ui::table(&headers, &rows);
    }
    Ok(())
}

/// One row per boot environment, oldest first.
///
/// Scripting rows carry exactly the queried columns so their layout is
/// stable for pipelines. Human rows additionally get the active flags
/// (`N` now, `R` on reboot) and the mountpoint.
pub(crate) fn environment_rows(
    zfs: &dyn ZfsBackend,
    be_root: &DatasetPath,
    spaceused: bool,
    scripting: bool,
    origin: bool,
) -> Result<Vec<Vec<String>>> {
    let columns = query_columns(spaceused, origin);
    let listed = boot_env::list_datasets(zfs, be_root, &columns)?;

    let root_dataset = zfs.mounted_dataset(Path::new("/"))?;
    let bootfs = boot_env::bootfs_for_pool(zfs, be_root.pool()).ok();

    let mut rows = Vec::new();
    for mut row in listed {
        let Some(name) = row.first().cloned() else {
            continue;
        };
        // Snapshots show up in the depth-1 listing, but they are an
        // implementation detail of cloning, not boot environments.
        if name.contains('@') {
            continue;
        }
        let dataset = DatasetPath::new(name)?;

        let creation = row.pop().unwrap_or_default();
        let origin_cell = origin.then(|| format_origin(&row.pop().unwrap_or_default()));

        let mut out = vec![dataset.child_name().to_string()];
        if !scripting {
            let mut active = String::new();
            if root_dataset.as_ref() == Some(&dataset) {
                active.push('N');
            }
            if bootfs.as_ref() == Some(&dataset) {
                active.push('R');
            }
            out.push(active);

            let mountpoint = zfs
                .dataset_mountpoint(&dataset)?
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string());
            out.push(mountpoint);
        }
        out.extend(row.into_iter().skip(1));
        if let Some(origin_cell) = origin_cell {
            out.push(origin_cell);
        }
        out.push(boot_env::display_creation(&creation));

        rows.push(out);
    }

    Ok(rows)
}

fn query_columns(spaceused: bool, origin: bool) -> Vec<&'static str> {
    let mut columns = vec!["name"];
    if spaceused {
        columns.extend(SPACE_COLUMNS);
    }
    if origin {
        columns.push("origin");
    }
    columns.push("creation");
    columns
}

/// Shorten a full origin path to `environment@snapshot`.
fn format_origin(origin: &str) -> String {
    match origin.split_once('@') {
        Some((parent, snapshot)) => {
            let child = parent.rsplit('/').next().unwrap_or(parent);
            format!("{child}@{snapshot}")
        }
        None => origin.to_string(),
    }
}

fn display_headers(spaceused: bool, origin: bool) -> Vec<String> {
    let mut headers: Vec<String> = query_columns(spaceused, origin)
        .iter()
        .map(|column| title_case(column))
        .collect();
    headers.insert(1, "Active".to_string());
    headers.insert(2, "Mountpoint".to_string());
    headers
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

use crate::Context;
use crate::boot_env;
use crate::config;
use anyhow::{Context as _, Result, bail};
use zfskit::{DatasetPath, Property, ZfsBackend};

pub fn run(_ctx: &Context, zfs: &dyn ZfsBackend, assignments: &[String]) -> Result<()> {
    let be_root = boot_env::root(zfs)?;
    apply_assignments(zfs, &be_root, assignments)
}

/// Validates every assignment before applying any of them, so a typo in
/// the second argument doesn't leave the first half applied.
pub(crate) fn apply_assignments(
    zfs: &dyn ZfsBackend,
    be_root: &DatasetPath,
    assignments: &[String],
) -> Result<()> {
    let properties = assignments
        .iter()
        .map(|arg| parse_assignment(arg))
        .collect::<Result<Vec<_>>>()?;

    for property in &properties {
        zfs.set(be_root, property).with_context(|| {
            format!(
                "Failed to set '{}={}' on '{be_root}'",
                property.name, property.value
            )
        })?;
    }
    Ok(())
}

fn parse_assignment(arg: &str) -> Result<Property> {
    let (name, value) = match arg.split_once('=') {
        Some((name, value)) if !name.is_empty() && !value.is_empty() => (name, value),
        _ => bail!("Property '{arg}' must be in the format 'property=value'."),
    };

    // Accepts org.zedenv:prop and org.zedenv.<plugin>:prop, nothing else.
    let namespaced = name
        .strip_prefix(config::NAMESPACE)
        .is_some_and(|rest| rest.starts_with(':') || rest.starts_with('.'));
    if !namespaced {
        bail!(
            "Property '{name}' is not in the '{}' namespace.",
            config::NAMESPACE
        );
    }

    Ok(Property::new(name, value))
}

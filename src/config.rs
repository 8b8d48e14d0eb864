//! Property namespace and defaults.
//!
//! Settings live as ZFS user properties in the `org.zedenv` namespace on
//! the BE root dataset, with per-bootloader settings under
//! `org.zedenv.<plugin>`. The value `-` marks a property as unset, since
//! ZFS offers no way to delete a user property without also dropping
//! inherited values.

/// User property namespace for core settings.
pub const NAMESPACE: &str = "org.zedenv";

/// Sentinel meaning "unset" for namespaced properties.
pub const UNSET: &str = "-";

/// A configurable property with its default and help text.
pub struct PropertyDefault {
    /// Bare property name without namespace.
    pub property: &'static str,
    /// Value assumed when the property is missing or `-`.
    pub default: &'static str,
    /// One-line description shown by `zedenv get --defaults`.
    pub description: &'static str,
}

/// Core properties understood outside any bootloader plugin.
pub const CORE_PROPERTIES: &[PropertyDefault] = &[PropertyDefault {
    property: "bootloader",
    default: "-",
    description: "Set a bootloader plugin.",
}];

/// Fully-qualified key for a core property.
pub fn core_key(property: &str) -> String {
    format!("{NAMESPACE}:{property}")
}

/// Fully-qualified key for a bootloader plugin property.
pub fn plugin_key(plugin: &str, property: &str) -> String {
    format!("{NAMESPACE}.{plugin}:{property}")
}

/// Whether a raw property value should be treated as unset.
pub fn is_unset(value: &str) -> bool {
    value.is_empty() || value == UNSET
}

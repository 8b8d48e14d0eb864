// Boot environment lifecycle
pub mod activate;
pub mod create;
pub mod destroy;
pub mod rename;

// Inspection and properties
pub mod get;
pub mod list;
pub mod set;

// Manual mounting
pub mod mount;
pub mod umount;

//! Shared data model for the DLM lock manager plugin.
//!
//! This crate has no dependency on the kernel DLM, CPG, or the record
//! file on disk: it only defines the types those layers agree on, plus
//! the plugin's error taxonomy and configuration schema.

mod client;
mod config;
mod error;
mod lock;
mod resource;

#[cfg(feature = "testing")]
pub mod testing;

pub use client::{ClusterClient, DlmClient};
pub use config::PluginConfig;
pub use error::{Error, Result};
pub use lock::{LockMode, LockRecord, LockStatus, RESOURCE_NAME_LEN};
pub use resource::{AcquireFlags, ObjectType, Resource, ResourceFlags, ResourceType};

/// Length in bytes of a VM UUID, matching `libvirt`'s `VIR_UUID_BUFLEN`.
pub const UUID_LEN: usize = 16;

/// A VM UUID as handed to `Session::create`.
pub type VmUuid = [u8; UUID_LEN];

use bitflags::bitflags;

use crate::lock::LockMode;

/// The kind of object a session is created for. Only [`ObjectType::Domain`]
/// is supported; the plugin surface rejects any other value before a
/// `Session` is ever constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    /// A virtual machine ("domain" in libvirt terms).
    Domain,
}

/// The kind of resource being added to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    /// A virtual disk image.
    Disk,
    /// A manually-managed lease, always lock-backed.
    Lease,
}

bitflags! {
    /// Flags passed to `add_resource`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResourceFlags: u32 {
        /// The disk is attached read-only; no lock is needed.
        const READONLY = 0b01;
        /// The resource should be locked in shared (`PRMODE`) mode
        /// rather than exclusive.
        const SHARED   = 0b10;
    }
}

bitflags! {
    /// Flags passed to `acquire`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AcquireFlags: u32 {
        /// Skip lock acquisition; the caller is attaching to a VM
        /// whose locks were already adopted during recovery.
        const REGISTER_ONLY = 0b01;
        /// Close the lockspace handle after a successful acquire; the
        /// caller is about to `exec` a child that must not inherit it.
        const RESTRICT      = 0b10;
    }
}

/// A resource queued on a session, waiting to be turned into a DLM
/// lock acquisition by `acquire`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// The already-hashed, fixed-width resource name.
    pub name: String,
    /// The mode to request from the DLM.
    pub mode: LockMode,
}

// Copyright (c) 2026, The devcoord Authors.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
// 1. Redistributions of source code must retain the above copyright
//    notice, this list of conditions and the following disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright
//    notice, this list of conditions and the following disclaimer in the
//    documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its
//    contributors may be used to endorse or promote products derived
//    from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! Traits and types shared between the devcoord coordinator daemon
//! and its external collaborators: the platform capability layer, the
//! device filesystem, and the device hosts on the far side of each
//! RPC channel.

use async_trait::async_trait;

pub mod bind;
pub mod proto;
pub mod types;

use types::ipc::{Channel, Job, Process, Resource};

pub use types::Error;

/// A `Result` type where the error value is a value from
/// `devcoord_api::types::Error`.
pub type Result<T> = std::result::Result<T, types::Error>;

/// Kernel-trace control requests forwarded from the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KtraceAction {
    /// Start tracing the given group mask.
    Start(u32),
    Stop,
    Rewind,
}

impl KtraceAction {
    /// Mask selecting every trace group.
    pub const GRP_ALL: u32 = 0xfff;
}

/// The handle bundle given to a freshly spawned device host. The
/// host's environment is inherited from the coordinator.
#[derive(Debug)]
pub struct Launch {
    /// The host's end of the coordinator RPC channel.
    pub rpc: Channel,
    /// A duplicate of the root resource capability.
    pub resource: Resource,
    /// A handle to the global virtual-filesystem root.
    pub vfs_root: Channel,
    /// The system-info job handle.
    pub sysinfo_job: Job,
}

/// The capability surface the coordinator consumes from the platform
/// it runs on. All operations are best effort; failures map into the
/// common error taxonomy.
#[async_trait]
pub trait Platform {
    /// Creates a named job to contain every spawned device host.
    fn create_job(&mut self, name: &str) -> Result<Job>;

    /// Spawns a device-host process inside `job`, loading `image` and
    /// passing the `launch` handle bundle.
    async fn spawn_devhost(
        &mut self,
        job: &Job,
        name: &str,
        image: &str,
        launch: Launch,
    ) -> Result<Process>;

    /// The root resource capability held on behalf of bus drivers.
    fn root_resource(&self) -> Resource;

    /// A fresh handle to the virtual-filesystem root.
    fn vfs_root(&mut self) -> Result<Channel>;

    /// The system-info job handle passed to hosts.
    fn sysinfo_job_root(&mut self) -> Result<Job>;

    /// Launches the ACPI service into `job`. Called once during boot;
    /// a failure is logged by the caller, never fatal.
    async fn acpi_bootstrap(&mut self, job: &Job) -> Result<()>;

    /// Brings up PCIe via ACPI. Platforms that don't need it fail
    /// here and succeed later without it.
    fn init_pcie(&mut self) -> Result<()>;

    fn reboot(&mut self);

    fn poweroff(&mut self);

    /// Invokes the ACPI `_PS0` method on the named object.
    fn acpi_ps0(&mut self, arg: &str) -> Result<()>;

    fn ktrace(&mut self, action: KtraceAction) -> Result<()>;

    /// Forwards a command to the kernel debug channel.
    fn debug_command(&mut self, cmd: &str) -> Result<()>;
}

/// Identifies one entry in the virtual device filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

/// The narrow face of the device filesystem the coordinator publishes
/// into. Implemented externally; the daemon ships an in-memory tree.
pub trait Devfs {
    /// The node devices with no published parent hang under.
    fn root(&self) -> NodeId;

    /// Inserts a filesystem-visible node for a device.
    fn publish(&mut self, parent: NodeId, name: &str) -> Result<NodeId>;

    /// Removes a node. Idempotent: unpublishing a node twice is a
    /// no-op after the first.
    fn unpublish(&mut self, node: NodeId);
}

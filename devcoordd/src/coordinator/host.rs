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

//! Device hosts: the sandboxed processes that load drivers, and the
//! outbound half of the RPC protocol that instantiates proxy devices
//! and binds drivers inside them.

use devcoord_api::bind::protocol;
use devcoord_api::proto::Msg;
use devcoord_api::types::ipc::{Channel, Handle, Message, Process};
use devcoord_api::{Error, Launch, Platform, Result};
use tracing::{debug, error, info, trace};

use super::device::{Device, DeviceFlags, DeviceId, Pending, PendingOp};
use super::Coordinator;
use crate::driver::Driver;
use crate::port::EventSource;

/// Arena key for a device host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostId(pub(crate) u32);

pub struct Devhost {
    /// The coordinator's end of the host process's control channel.
    pub rpc: Channel,
    pub proc: Process,
    pub koid: u64,
    /// Number of devices referencing this host.
    pub refcount: u32,
}

impl Coordinator {
    /// Spawns a fresh device-host process and records it. The host
    /// receives its end of a new control channel, a duplicate of the
    /// root resource, a vfs root handle, and the system-info job.
    pub(crate) async fn new_host(&mut self, name: &str) -> Result<HostId> {
        let (rpc, rpc_host) = Channel::create();
        let launch = Launch {
            rpc: rpc_host,
            resource: self.platform.root_resource().duplicate(),
            vfs_root: self.platform.vfs_root()?,
            sysinfo_job: self.platform.sysinfo_job_root()?,
        };
        let proc = self
            .platform
            .spawn_devhost(&self.job, name, &self.devhost_path, launch)
            .await
            .map_err(|e| {
                error!("launch devhost '{}': failed: {}", name, e);
                e
            })?;

        info!("launch devhost '{}': pid={}", name, proc.koid());

        let id = self.alloc_host_id();

        self.hosts.insert(
            id,
            Devhost {
                rpc,
                koid: proc.koid(),
                proc,
                refcount: 0,
            },
        );
        Ok(id)
    }

    /// Takes a device's reference on its host.
    pub(crate) fn ref_host(&mut self, id: HostId) {
        if let Some(host) = self.hosts.get_mut(&id) {
            host.refcount += 1;
        }
    }

    /// Drops one device's reference. The last one out closes the
    /// channel, kills the process, and frees the record.
    pub(crate) fn release_host(&mut self, id: HostId) {
        let Some(host) = self.hosts.get_mut(&id) else {
            return;
        };

        debug!("release host pid={} ref={}", host.koid, host.refcount);
        host.refcount = host.refcount.saturating_sub(1);

        if host.refcount > 0 {
            return;
        }

        debug!("destroy host pid={}", host.koid);
        host.proc.kill();
        self.hosts.remove(&id);
    }

    /// Ensures `parent` has a shadow, creating one when absent. The
    /// shadow inherits the parent's name and protocol and is owned
    /// through the parent's `shadow` slot.
    pub(crate) fn create_shadow(&mut self, parent: DeviceId) -> Result<DeviceId> {
        let pdev = self.devices.get(&parent).ok_or(Error::BadState)?;

        if let Some(shadow) = pdev.shadow {
            return Ok(shadow);
        }

        let (name, protocol_id) = (pdev.name.clone(), pdev.protocol_id);
        let mut dev = Device::new(&name, protocol_id);

        dev.flags = DeviceFlags::SHADOW;
        dev.parent = Some(parent);

        let id = self.alloc_device_id();

        self.devices.insert(id, dev);

        if let Some(pdev) = self.devices.get_mut(&parent) {
            pdev.shadow = Some(id);
            pdev.refcount += 1;
            debug!("dev '{}' ++ref={} (shadow)", pdev.name, pdev.refcount);
        }
        Ok(id)
    }

    /// Sends `CREATE_DEVICE` to a host, wiring a fresh RPC channel to
    /// the device and arming it on the port. Shadows defer to the
    /// device they proxy for bus args and the resource capability.
    fn host_create_device(
        &mut self,
        id: DeviceId,
        host: HostId,
        libname: &str,
    ) -> Result<()> {
        let (protocol_id, args, resource) = {
            let dev = self.devices.get(&id).ok_or(Error::BadState)?;
            let info = if dev.flags.contains(DeviceFlags::SHADOW) {
                let parent = dev.parent.ok_or(Error::Internal)?;

                self.devices.get(&parent).ok_or(Error::Internal)?
            } else {
                dev
            };

            (
                dev.protocol_id,
                info.args.clone(),
                info.resource.as_ref().map(|res| res.duplicate()),
            )
        };
        let buf = Msg::create_device(protocol_id, libname, &args).pack()?;
        let (rpc, rpc_host) = Channel::create();
        let mut handles = vec![Handle::Channel(rpc_host)];

        if let Some(res) = resource {
            handles.push(Handle::Resource(res));
        }

        trace!("rpc: create-device '{}' args='{}'", libname, args);
        self.hosts
            .get(&host)
            .ok_or(Error::BadState)?
            .rpc
            .write(Message::with_handles(buf, handles))?;

        if let Some(dev) = self.devices.get_mut(&id) {
            dev.rpc = Some(rpc);
        }

        let Coordinator { port, devices, .. } = self;

        if let Some(ch) = devices.get(&id).and_then(|dev| dev.rpc.as_ref()) {
            port.watch(EventSource::Device(id), ch);
        }
        Ok(())
    }

    /// Sends `BIND_DRIVER` to the device's host and queues the
    /// pending entry its status reply will retire.
    fn host_bind_driver(&mut self, id: DeviceId, libname: &str) -> Result<()> {
        let txid = self.alloc_txid();
        let buf = Msg::bind_driver(txid, libname).pack()?;
        let dev = self.devices.get_mut(&id).ok_or(Error::BadState)?;

        dev.rpc.as_ref().ok_or(Error::BadState)?.write(Message::new(buf))?;

        trace!("rpc: bind-driver '{}' dev='{}' txid={}", libname, dev.name, txid);
        dev.flags |= DeviceFlags::BOUND;
        dev.pending.push(Pending {
            txid,
            op: PendingOp::Bind,
        });
        Ok(())
    }

    /// Routes a driver onto a device. Non-bus devices get the driver
    /// in their own host. Bus devices bind through a shadow living in
    /// a dedicated host, instantiated on first use.
    pub(crate) async fn attempt_bind(
        &mut self,
        drv: Driver,
        id: DeviceId,
    ) -> Result<()> {
        let (flags, protocol_id, host) = {
            let dev = self.devices.get(&id).ok_or(Error::BadState)?;

            (dev.flags, dev.protocol_id, dev.host)
        };

        // Cannot bind a driver to an already-bound device, nor to one
        // on its way out.
        if flags.contains(DeviceFlags::BOUND)
            && !flags.contains(DeviceFlags::MULTI_BIND)
        {
            return Err(Error::BadState);
        }
        if flags.contains(DeviceFlags::DEAD) {
            return Err(Error::BadState);
        }

        if !flags.contains(DeviceFlags::BUSDEV) {
            if host.is_none() {
                error!("can't bind to device without devhost");
                return Err(Error::BadState);
            }
            return self.host_bind_driver(id, &drv.libname);
        }

        // Which host carries the far side of this bus, and which
        // library instantiates it there.
        let (libname, hostname) = if protocol_id == protocol::PCI
            || (id == self.root && drv.name == "pci")
        {
            ("driver/bus-pci.so", "devhost:pci")
        } else if protocol_id == protocol::MISC_PARENT {
            ("", "devhost:misc")
        } else if id == self.root {
            ("", "devhost:root")
        } else {
            error!("cannot create proto {:#x} shadow (yet)", protocol_id);
            return Err(Error::NotSupported);
        };

        let shadow = self.create_shadow(id).map_err(|e| {
            error!("cannot create shadow device: {}", e);
            e
        })?;

        // A shadow without a host gets one, with the device
        // instantiated inside it, before any driver is sent.
        if self
            .devices
            .get(&shadow)
            .map_or(false, |dev| dev.host.is_none())
        {
            let host = self.new_host(hostname).await?;

            if let Some(dev) = self.devices.get_mut(&shadow) {
                dev.host = Some(host);
            }
            self.ref_host(host);
            self.host_create_device(shadow, host, libname).map_err(|e| {
                error!("create device in '{}': {}", hostname, e);
                e
            })?;
        }

        self.host_bind_driver(shadow, &drv.libname)
    }
}

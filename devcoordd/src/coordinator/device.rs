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

//! Devices: the universal nodes of the coordinator's forest, plus the
//! tree operations that add, remove, release, and dump them.
//!
//! Ownership runs strictly downward. A parent holds a reference on
//! behalf of each child and of its shadow; a device holds one on its
//! host. Back-pointers (`parent`, `host`) are plain ids validated
//! against the arena, never owners.

use bitflags::bitflags;
use devcoord_api::bind::DeviceProp;
use devcoord_api::proto::{Msg, MAX_NAME_LEN};
use devcoord_api::types::ipc::{Channel, Handle, Resource};
use devcoord_api::{Devfs, Error, NodeId, Result};
use std::fmt::Write;
use tracing::{debug, error};

use super::host::HostId;
use super::{Coordinator, WorkOp};
use crate::port::EventSource;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceFlags: u32 {
        /// Never freed, never removed. The two permanent roots.
        const IMMORTAL = 1 << 0;
        /// Parents children in a separate host; binds via a shadow.
        const BUSDEV = 1 << 1;
        /// Accepts more than one driver.
        const MULTI_BIND = 1 << 2;
        /// A driver has been sent for this device.
        const BOUND = 1 << 3;
        /// Removed. Stays only while references drain.
        const DEAD = 1 << 4;
        /// Proxy for its parent inside another host.
        const SHADOW = 1 << 5;
    }
}

/// Arena key for a device. Ids are never reused within a run, so a
/// stale id simply fails its lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub(crate) u32);

/// A coordinator-initiated request awaiting its status reply,
/// correlated by transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub txid: u32,
    pub op: PendingOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    Bind,
}

pub struct Device {
    pub name: String,
    pub protocol_id: u32,
    pub props: Vec<DeviceProp>,
    pub args: String,
    pub flags: DeviceFlags,
    pub parent: Option<DeviceId>,
    pub children: Vec<DeviceId>,
    pub shadow: Option<DeviceId>,
    pub host: Option<HostId>,
    pub rpc: Option<Channel>,
    pub resource: Option<Resource>,
    pub pending: Vec<Pending>,
    pub refcount: u32,
    /// At most one work item per device; guarded by `queue_work`.
    pub queued: bool,
    pub node: Option<NodeId>,
}

impl Device {
    pub fn new(name: &str, protocol_id: u32) -> Device {
        Device {
            name: String::from(name),
            protocol_id,
            props: vec![],
            args: String::new(),
            flags: DeviceFlags::empty(),
            parent: None,
            children: vec![],
            shadow: None,
            host: None,
            rpc: None,
            resource: None,
            pending: vec![],
            refcount: 1,
            queued: false,
            node: None,
        }
    }
}

impl Coordinator {
    /// Creates a child device under `parent` from an `ADD_DEVICE`
    /// request. The first handle is the child's RPC channel; a second,
    /// if present, is its resource capability. Both are adopted on
    /// success and closed on failure.
    pub(crate) fn add_device(
        &mut self,
        parent: DeviceId,
        handles: Vec<Handle>,
        msg: &Msg,
    ) -> Result<DeviceId> {
        if handles.is_empty() || handles.len() > 2 {
            return Err(Error::InvalidArgs);
        }
        if msg.name.len() > MAX_NAME_LEN {
            return Err(Error::InvalidArgs);
        }

        let props = DeviceProp::parse_vec(&msg.data)?;
        let mut handles = handles.into_iter();
        let rpc = match handles.next() {
            Some(Handle::Channel(ch)) => ch,
            _ => return Err(Error::InvalidArgs),
        };
        let resource = match handles.next() {
            None => None,
            Some(Handle::Resource(res)) => Some(res),
            Some(_) => return Err(Error::InvalidArgs),
        };

        let mut dev = Device::new(&msg.name, msg.protocol_id);

        dev.props = props;
        dev.args = msg.args.clone();

        // Bus arguments or a resource capability make this, by
        // definition, a bus device.
        if !dev.args.is_empty() || resource.is_some() {
            dev.flags |= DeviceFlags::BUSDEV;
        }
        dev.rpc = Some(rpc);
        dev.resource = resource;

        // The child lives in its parent's host. When the parent is a
        // shadow, the rest of the work targets the device it proxies,
        // so children of proxies surface under the real device.
        let pdev = self.devices.get(&parent).ok_or(Error::Internal)?;

        dev.host = pdev.host;

        let parent = if pdev.flags.contains(DeviceFlags::SHADOW) {
            pdev.parent.ok_or(Error::Internal)?
        } else {
            parent
        };

        let parent_node = self
            .devices
            .get(&parent)
            .and_then(|p| p.node)
            .unwrap_or_else(|| self.devfs.root());

        dev.node = Some(self.devfs.publish(parent_node, &dev.name)?);
        dev.parent = Some(parent);

        let id = self.alloc_device_id();

        if let Some(ch) = dev.rpc.as_ref() {
            self.port.watch(EventSource::Device(id), ch);
        }
        if let Some(host) = dev.host {
            self.ref_host(host);
        }

        debug!(
            "publish dev '{}' props={} args='{}'",
            dev.name,
            dev.props.len(),
            dev.args
        );
        self.devices.insert(id, dev);

        if let Some(pdev) = self.devices.get_mut(&parent) {
            pdev.children.push(id);
            pdev.refcount += 1;
            debug!("dev '{}' ++ref={} (child)", pdev.name, pdev.refcount);
        }

        self.queue_work(id, WorkOp::DeviceAdded);
        Ok(id)
    }

    /// Removes a device from the tree: marks it dead, unpublishes it,
    /// detaches its host, unlinks it from its parent, and drops the
    /// tree's own reference. Ids held elsewhere stay valid lookups
    /// until the remaining references are released.
    pub(crate) fn remove_device(&mut self, id: DeviceId) -> Result<()> {
        let dev = self.devices.get_mut(&id).ok_or(Error::BadState)?;

        if dev.flags.contains(DeviceFlags::DEAD) {
            error!("cannot remove dev '{}' twice!", dev.name);
            return Err(Error::BadState);
        }
        if dev.flags.contains(DeviceFlags::IMMORTAL) {
            error!("cannot remove dev '{}' (immortal)", dev.name);
            return Err(Error::BadState);
        }

        debug!("remove dev '{}'", dev.name);
        dev.flags |= DeviceFlags::DEAD;

        let node = dev.node.take();
        let host = dev.host.take();
        let parent = dev.parent.take();
        let is_shadow = dev.flags.contains(DeviceFlags::SHADOW);

        // Unpublish first, cutting off further opens.
        if let Some(node) = node {
            self.devfs.unpublish(node);
        }
        if let Some(host) = host {
            self.release_host(host);
        }
        if let Some(parent) = parent {
            if let Some(pdev) = self.devices.get_mut(&parent) {
                if is_shadow {
                    pdev.shadow = None;
                } else {
                    pdev.children.retain(|child| *child != id);
                }
            }
            self.release_device(parent);
        }
        self.release_device(id);
        Ok(())
    }

    /// Drops one reference. At zero the device is destroyed — unless
    /// it is immortal, which survives at zero forever.
    pub(crate) fn release_device(&mut self, id: DeviceId) {
        let Some(dev) = self.devices.get_mut(&id) else {
            return;
        };

        debug!("release dev '{}' ref={}", dev.name, dev.refcount);
        dev.refcount = dev.refcount.saturating_sub(1);

        if dev.refcount > 0 || dev.flags.contains(DeviceFlags::IMMORTAL) {
            return;
        }

        debug!("destroy dev '{}'", dev.name);

        let node = dev.node.take();

        if let Some(node) = node {
            self.devfs.unpublish(node);
        }
        self.port.unwatch(EventSource::Device(id));

        // Dropping the arena entry closes the RPC and resource
        // handles.
        self.devices.remove(&id);
    }

    /// Pre-order dump of both roots, three spaces of indent per
    /// level. A shadow prints before the children, one level in.
    pub(crate) fn dump_state(&self, out: &mut String) {
        self.dump_device(out, self.root, 0);
        self.dump_device(out, self.misc, 1);
    }

    fn dump_device(&self, out: &mut String, id: DeviceId, indent: usize) {
        let Some(dev) = self.devices.get(&id) else {
            return;
        };
        let pid = dev
            .host
            .and_then(|host| self.hosts.get(&host))
            .map_or(0, |host| host.koid);
        let pad = indent * 3;

        if pid == 0 {
            let _ = writeln!(out, "{:pad$}[{}]", "", dev.name);
        } else {
            let _ = writeln!(
                out,
                "{:pad$}[{}] pid={}{}{}",
                "",
                dev.name,
                pid,
                if dev.flags.contains(DeviceFlags::BUSDEV) {
                    " busdev"
                } else {
                    ""
                },
                if dev.flags.contains(DeviceFlags::SHADOW) {
                    " shadow"
                } else {
                    ""
                },
            );
        }

        let mut indent = indent;

        if let Some(shadow) = dev.shadow {
            indent += 1;
            self.dump_device(out, shadow, indent);
        }
        for child in &dev.children {
            self.dump_device(out, *child, indent + 1);
        }
    }

    pub(crate) fn device_name(&self, id: DeviceId) -> String {
        self.devices
            .get(&id)
            .map_or_else(|| String::from("?"), |dev| dev.name.clone())
    }
}

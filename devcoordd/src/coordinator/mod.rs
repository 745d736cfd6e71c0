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

//! The coordinator: one context owning the event port, the work
//! queue, the device forest, the host table, and the driver registry.
//! Every mutation flows through its single event loop.

use devcoord_api::types::ipc::{Channel, Job, Message, Signals};
use devcoord_api::{proto, types::NO_ERROR, Devfs, Error, Platform, Result};
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::driver::Driver;
use crate::port::{EventPort, EventSource};

pub mod device;
pub mod host;
mod rpc;

use device::{Device, DeviceFlags, DeviceId};
use host::{Devhost, HostId};

use devcoord_api::bind::protocol;

/// Deferred work serviced one item per idle slot of the loop.
pub(crate) struct Work {
    pub op: WorkOp,
    pub device: DeviceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkOp {
    /// A freshly published device wants a bind scan.
    DeviceAdded,
}

pub struct Coordinator {
    pub(crate) devhost_path: String,
    pub(crate) platform: Box<dyn Platform + Send>,
    pub(crate) devfs: Box<dyn Devfs + Send>,
    pub(crate) port: EventPort,
    pub(crate) work: VecDeque<Work>,
    pub(crate) devices: HashMap<DeviceId, Device>,
    pub(crate) hosts: HashMap<HostId, Devhost>,
    pub(crate) drivers: Vec<Driver>,
    pub(crate) job: Job,
    pub(crate) root: DeviceId,
    pub(crate) misc: DeviceId,
    dmctl: Option<Channel>,
    dmctl_peer: Option<Channel>,
    pub(crate) launcher: Option<Channel>,
    next_device: u32,
    next_host: u32,
    next_txid: u32,
}

impl Coordinator {
    /// Builds the context: the host job, the event port, the two
    /// permanent roots, and the armed administrative channel.
    pub fn new(
        cfg: &Config,
        mut platform: Box<dyn Platform + Send>,
        devfs: Box<dyn Devfs + Send>,
    ) -> Result<Coordinator> {
        let job = platform.create_job("devcoord-drivers")?;
        let mut devices = HashMap::new();

        let mut root = Device::new("root", 0);

        root.flags = DeviceFlags::IMMORTAL
            | DeviceFlags::BUSDEV
            | DeviceFlags::MULTI_BIND;
        root.node = Some(devfs.root());

        let root_id = DeviceId(1);

        devices.insert(root_id, root);

        let mut misc = Device::new("misc", protocol::MISC_PARENT);

        misc.flags = DeviceFlags::IMMORTAL
            | DeviceFlags::BUSDEV
            | DeviceFlags::MULTI_BIND;

        let misc_id = DeviceId(2);

        devices.insert(misc_id, misc);

        let mut port = EventPort::new();
        let (dmctl, dmctl_peer) = Channel::create();

        port.watch(EventSource::Dmctl, &dmctl);

        Ok(Coordinator {
            devhost_path: cfg.devhost_path.clone(),
            platform,
            devfs,
            port,
            work: VecDeque::new(),
            devices,
            hosts: HashMap::new(),
            drivers: vec![],
            job,
            root: root_id,
            misc: misc_id,
            dmctl: Some(dmctl),
            dmctl_peer: Some(dmctl_peer),
            launcher: None,
            next_device: 3,
            next_host: 1,
            next_txid: 1,
        })
    }

    /// Hands out the far end of the administrative channel. Available
    /// once; the caller owns it for the life of the process.
    pub fn dmctl_channel(&mut self) -> Option<Channel> {
        self.dmctl_peer.take()
    }

    /// The boot sequence: best-effort ACPI/PCIe bring-up, `misc`
    /// publication, the built-in root drivers, then driver
    /// enumeration.
    pub async fn bootstrap(&mut self, cfg: &Config) -> Result<()> {
        if let Err(e) = self.platform.acpi_bootstrap(&self.job).await {
            warn!("acpi bootstrap failed: {}", e);
        } else if let Err(e) = self.platform.init_pcie() {
            // Some platforms simply don't init PCIe via ACPI.
            info!("pcie init skipped: {}", e);
        }

        let root_node = self
            .devices
            .get(&self.root)
            .and_then(|dev| dev.node)
            .unwrap_or_else(|| self.devfs.root());
        let node = self.devfs.publish(root_node, "misc")?;

        if let Some(misc) = self.devices.get_mut(&self.misc) {
            misc.node = Some(node);
        }

        // Bind the built-in root devices first.
        let drv = Driver::synthetic("root", "driver/root.so");

        if let Err(e) = self.attempt_bind(drv, self.root).await {
            warn!("root driver bind failed: {}", e);
        }

        let drv = Driver::synthetic("dmctl", "driver/dmctl.so");

        if let Err(e) = self.attempt_bind(drv, self.misc).await {
            warn!("dmctl driver bind failed: {}", e);
        }

        self.enumerate_drivers(cfg).await;
        Ok(())
    }

    /// The main loop. Inbound traffic has priority; one work item
    /// drains per idle slot.
    pub async fn run(mut self) -> Result<Infallible> {
        info!("coordinator running");

        loop {
            let next = if self.work.is_empty() {
                self.port.dispatch(None).await
            } else {
                match self.port.dispatch(Some(Duration::ZERO)).await {
                    Err(Error::TimedOut) => {
                        if let Some(work) = self.work.pop_front() {
                            self.process_work(work).await;
                        }
                        continue;
                    }
                    next => next,
                }
            };

            match next {
                Ok((source, signals)) => {
                    self.handle_event(source, signals).await
                }
                Err(e) => error!("port dispatch ended: {}", e),
            }
        }
    }

    pub(crate) async fn handle_event(
        &mut self,
        source: EventSource,
        signals: Signals,
    ) {
        match source {
            EventSource::Device(id) => self.device_event(id, signals).await,
            EventSource::Dmctl => self.dmctl_event(signals),
        }
    }

    /// Enqueues deferred work for a device. Each device has a single
    /// slot; enqueueing while already queued is a programmer error.
    pub(crate) fn queue_work(&mut self, id: DeviceId, op: WorkOp) {
        if let Some(dev) = self.devices.get_mut(&id) {
            assert!(!dev.queued, "device '{}' already queued", dev.name);
            dev.queued = true;
            self.work.push_back(Work { op, device: id });
        }
    }

    pub(crate) async fn process_work(&mut self, work: Work) {
        // Clear the slot before running the op so a reentrant enqueue
        // is legal.
        if let Some(dev) = self.devices.get_mut(&work.device) {
            dev.queued = false;
        }

        match work.op {
            WorkOp::DeviceAdded => self.device_added(work.device).await,
        }
    }

    // The administrative channel speaks raw command text; each write
    // is answered with a status record.
    fn dmctl_event(&mut self, signals: Signals) {
        if signals.contains(Signals::READABLE) {
            let Some(msg) = self.dmctl.as_ref().and_then(|ch| ch.try_read().ok())
            else {
                return;
            };
            let status = match self.handle_dmctl(&msg.bytes) {
                Ok(()) => NO_ERROR,
                Err(e) => e.code(),
            };

            if let Some(ch) = &self.dmctl {
                let rec = proto::Status { txid: 0, status };
                let _ = ch.write(Message::new(rec.encode()));
            }
        } else if signals.contains(Signals::PEER_CLOSED) {
            self.port.unwatch(EventSource::Dmctl);
            self.dmctl = None;
        }
    }

    pub(crate) fn alloc_device_id(&mut self) -> DeviceId {
        let id = DeviceId(self.next_device);

        self.next_device += 1;
        id
    }

    pub(crate) fn alloc_host_id(&mut self) -> HostId {
        let id = HostId(self.next_host);

        self.next_host += 1;
        id
    }

    // Transaction ids are never zero; zero marks fire-and-forget
    // frames.
    pub(crate) fn alloc_txid(&mut self) -> u32 {
        let txid = self.next_txid;

        self.next_txid = self.next_txid.checked_add(1).unwrap_or(1);
        txid
    }
}

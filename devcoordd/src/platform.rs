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

//! The in-process platform: hosts are recorded instead of launched,
//! power and trace requests are journaled, and every handle a real
//! devhost would receive stays reachable so the host side of the
//! protocol can be driven from the same process.

use async_trait::async_trait;
use devcoord_api::types::ipc::{Channel, Job, Process, Resource};
use devcoord_api::{Error, KtraceAction, Launch, Platform, Result};
use std::sync::{Arc, Mutex};

/// What a spawned devhost would have been handed.
#[cfg_attr(not(test), allow(dead_code))]
pub struct SpawnedHost {
    pub name: String,
    pub image: String,
    pub rpc: Channel,
    pub proc: Process,
    pub resource: Resource,
}

/// Every side effect requested of the platform, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    AcpiBootstrap,
    PcieInit,
    Reboot,
    Poweroff,
    AcpiPs0(String),
    Ktrace(KtraceAction),
    DebugCommand(String),
}

#[cfg_attr(not(test), allow(dead_code))]
struct Inner {
    root_resource: Resource,
    sysinfo: Job,
    retained: Vec<Channel>,
    spawned: Vec<SpawnedHost>,
    events: Vec<PlatformEvent>,
    fail_spawns: bool,
}

/// Cloning yields another handle onto the same platform state.
#[derive(Clone)]
pub struct LoopbackPlatform {
    inner: Arc<Mutex<Inner>>,
}

impl LoopbackPlatform {
    pub fn new() -> LoopbackPlatform {
        LoopbackPlatform {
            inner: Arc::new(Mutex::new(Inner {
                root_resource: Resource::new(),
                sysinfo: Job::new("sysinfo"),
                retained: vec![],
                spawned: vec![],
                events: vec![],
                fail_spawns: false,
            })),
        }
    }
}

impl Default for LoopbackPlatform {
    fn default() -> Self {
        LoopbackPlatform::new()
    }
}

#[cfg(test)]
impl LoopbackPlatform {
    /// Makes every subsequent spawn fail, for exercising error paths.
    pub fn fail_spawns(&self, fail: bool) {
        self.inner.lock().unwrap().fail_spawns = fail
    }

    pub fn spawn_count(&self) -> usize {
        self.inner.lock().unwrap().spawned.len()
    }

    /// Pulls the record of the first spawned host with this name,
    /// handing the host's side of the protocol to the caller.
    pub fn take_host(&self, name: &str) -> Option<SpawnedHost> {
        let mut inner = self.inner.lock().unwrap();
        let pos = inner.spawned.iter().position(|h| h.name == name)?;

        Some(inner.spawned.remove(pos))
    }

    pub fn events(&self) -> Vec<PlatformEvent> {
        self.inner.lock().unwrap().events.clone()
    }
}

#[async_trait]
impl Platform for LoopbackPlatform {
    fn create_job(&mut self, name: &str) -> Result<Job> {
        Ok(Job::new(name))
    }

    async fn spawn_devhost(
        &mut self,
        job: &Job,
        name: &str,
        image: &str,
        launch: Launch,
    ) -> Result<Process> {
        let mut inner = self.inner.lock().unwrap();

        if inner.fail_spawns {
            return Err(Error::Internal);
        }

        let proc = Process::new();

        job.attach(&proc);

        // The vfs handle a real host would hold open.
        inner.retained.push(launch.vfs_root);
        inner.spawned.push(SpawnedHost {
            name: String::from(name),
            image: String::from(image),
            rpc: launch.rpc,
            proc: proc.clone(),
            resource: launch.resource,
        });
        Ok(proc)
    }

    fn root_resource(&self) -> Resource {
        self.inner.lock().unwrap().root_resource.clone()
    }

    fn vfs_root(&mut self) -> Result<Channel> {
        let (kept, handed_out) = Channel::create();
        let mut inner = self.inner.lock().unwrap();

        inner.retained.push(kept);
        Ok(handed_out)
    }

    fn sysinfo_job_root(&mut self) -> Result<Job> {
        Ok(self.inner.lock().unwrap().sysinfo.clone())
    }

    async fn acpi_bootstrap(&mut self, _job: &Job) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .events
            .push(PlatformEvent::AcpiBootstrap);
        Ok(())
    }

    fn init_pcie(&mut self) -> Result<()> {
        self.inner.lock().unwrap().events.push(PlatformEvent::PcieInit);
        Ok(())
    }

    fn reboot(&mut self) {
        self.inner.lock().unwrap().events.push(PlatformEvent::Reboot)
    }

    fn poweroff(&mut self) {
        self.inner.lock().unwrap().events.push(PlatformEvent::Poweroff)
    }

    fn acpi_ps0(&mut self, arg: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .events
            .push(PlatformEvent::AcpiPs0(String::from(arg)));
        Ok(())
    }

    fn ktrace(&mut self, action: KtraceAction) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .events
            .push(PlatformEvent::Ktrace(action));
        Ok(())
    }

    fn debug_command(&mut self, cmd: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .events
            .push(PlatformEvent::DebugCommand(String::from(cmd)));
        Ok(())
    }
}

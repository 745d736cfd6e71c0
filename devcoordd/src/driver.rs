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

//! The driver registry and the bind paths that consult it: immediate
//! binding of the two reserved drivers at registration, the autobind
//! scan for freshly added devices, and administrative bind requests.

use devcoord_api::bind::{self, BindInst};
use devcoord_api::{Error, Result};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::coordinator::device::{DeviceFlags, DeviceId};
use crate::coordinator::Coordinator;

/// One registered driver. The registry is append-only for the life
/// of a run.
#[derive(Debug, Clone)]
pub struct Driver {
    pub name: String,
    pub libname: String,
    pub protocol_id: u32,
    pub binding: Vec<BindInst>,
}

impl Driver {
    /// The built-in root drivers bound during boot carry no bind
    /// program; they are pushed at their devices directly.
    pub fn synthetic(name: &str, libname: &str) -> Driver {
        Driver {
            name: String::from(name),
            libname: String::from(libname),
            protocol_id: 0,
            binding: vec![],
        }
    }
}

impl Coordinator {
    /// Appends a driver to the registry. The PCI root driver and misc
    /// drivers are recognised structurally and bound to their devices
    /// immediately, without the generic matcher.
    pub async fn register_driver(&mut self, drv: Driver) {
        info!(
            "driver '{}' @ '{}' proto={:#x}",
            drv.name, drv.libname, drv.protocol_id
        );
        self.drivers.push(drv.clone());

        if drv.name == "pci" {
            info!("driver '{}' @ '{}' is PCI", drv.name, drv.libname);

            let root = self.root;

            if let Err(e) = self.attempt_bind(drv, root).await {
                error!("pci root bind failed: {}", e);
            }
            return;
        }
        if bind::is_misc_binding(&drv.binding) {
            info!("driver '{}' @ '{}' is MISC", drv.name, drv.libname);

            let misc = self.misc;

            if let Err(e) = self.attempt_bind(drv, misc).await {
                error!("misc bind failed: {}", e);
            }
        }
    }

    /// Populates the registry from the configuration, once, during
    /// boot.
    pub async fn enumerate_drivers(&mut self, cfg: &Config) {
        info!("enumerating {} driver(s)", cfg.driver.len());

        for entry in &cfg.driver {
            self.register_driver(Driver {
                name: entry.name.clone(),
                libname: entry.libname.clone(),
                protocol_id: entry.protocol_id,
                binding: entry.binding.clone(),
            })
            .await;
        }
    }

    /// The `DEVICE_ADDED` work op: scan the registry in registration
    /// order and attempt the first driver that matches. Scanning
    /// stops after the first attempt whether or not it succeeds;
    /// unmatched devices are not retried.
    pub(crate) async fn device_added(&mut self, id: DeviceId) {
        let (flags, protocol_id, props, name) = {
            let Some(dev) = self.devices.get(&id) else {
                return;
            };

            if dev.flags.contains(DeviceFlags::DEAD) {
                return;
            }
            (
                dev.flags.bits(),
                dev.protocol_id,
                dev.props.clone(),
                dev.name.clone(),
            )
        };
        let drv = self
            .drivers
            .iter()
            .find(|drv| {
                bind::is_bindable(&drv.binding, flags, protocol_id, &props, true)
            })
            .cloned();

        if let Some(drv) = drv {
            info!("drv='{}' bindable to dev='{}'", drv.name, name);

            if let Err(e) = self.attempt_bind(drv, id).await {
                warn!("bind attempt for '{}' failed: {}", name, e);
            }
        }
    }

    /// The `BIND_DEVICE` op: look a driver up by its derived library
    /// path and bind it if eligible. A missing driver is intentionally
    /// a silent success.
    pub(crate) async fn bind_device(
        &mut self,
        id: DeviceId,
        drvname: &str,
    ) -> Result<()> {
        let libname = format!("driver/{}.so", drvname);

        info!("bind device '{}' '{}'", drvname, libname);

        // A bind request for a shadow shouldn't be possible.
        {
            let dev = self.devices.get(&id).ok_or(Error::BadState)?;

            if dev.flags.contains(DeviceFlags::SHADOW) {
                return Err(Error::NotSupported);
            }
        }

        let found = self
            .drivers
            .iter()
            .find(|drv| drv.libname == libname)
            .cloned();

        if let Some(drv) = found {
            let eligible = {
                let dev = self.devices.get(&id).ok_or(Error::BadState)?;

                bind::is_bindable(
                    &drv.binding,
                    dev.flags.bits(),
                    dev.protocol_id,
                    &dev.props,
                    false,
                )
            };

            if eligible {
                info!(
                    "drv='{}' bindable to dev='{}'",
                    drv.name,
                    self.device_name(id)
                );

                if let Err(e) = self.attempt_bind(drv, id).await {
                    warn!("bind attempt failed: {}", e);
                }
            }
        }
        Ok(())
    }
}

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

//! The inbound half of the RPC protocol: reading, validating, and
//! dispatching frames arriving from device hosts, and writing the
//! status reply every request (except `STATUS` itself) gets.

use devcoord_api::proto::{self, Msg, Op};
use devcoord_api::types::ipc::{Message, Signals};
use devcoord_api::types::NO_ERROR;
use devcoord_api::{Error, Result};
use tracing::{error, trace};

use super::device::{DeviceFlags, DeviceId, PendingOp};
use super::Coordinator;
use crate::port::{EventSource, Flow};

impl Coordinator {
    /// Handles one readiness event on a device channel. Any outcome
    /// other than a clean `Continue` tears the registration down:
    /// errors and disconnects also remove the device.
    pub(crate) async fn device_event(&mut self, id: DeviceId, signals: Signals) {
        if signals.contains(Signals::READABLE) {
            match self.device_read(id).await {
                Ok(Flow::Continue) => return,
                Ok(Flow::Stop) => (),
                Err(e) => {
                    error!("device '{}' rpc status: {}", self.device_name(id), e);
                    let _ = self.remove_device(id);
                }
            }
        } else if signals.contains(Signals::PEER_CLOSED) {
            error!("device '{}' disconnected!", self.device_name(id));
            let _ = self.remove_device(id);
        } else {
            error!("no work? {:?}", signals);
            return;
        }
        self.detach(id);
    }

    // Disarms the channel and drops the endpoint. The device record
    // itself lives on until its references drain.
    fn detach(&mut self, id: DeviceId) {
        self.port.unwatch(EventSource::Device(id));

        if let Some(dev) = self.devices.get_mut(&id) {
            dev.rpc = None;
        }
    }

    async fn device_read(&mut self, id: DeviceId) -> Result<Flow> {
        let raw = {
            let dev = self.devices.get(&id).ok_or(Error::Internal)?;

            if dev.flags.contains(DeviceFlags::DEAD) {
                error!("dev '{}' already dead (in read)", dev.name);
                return Err(Error::Internal);
            }
            dev.rpc.as_ref().ok_or(Error::Internal)?.try_read()?
        };

        let msg = match Msg::unpack(&raw.bytes) {
            Ok(msg) => msg,
            Err(e) => {
                // A malformed frame is answered on its transaction and
                // does not disturb the device.
                error!("rpc: bad frame from '{}': {}", self.device_name(id), e);
                self.send_status(id, proto::peek_txid(&raw.bytes), Err(e))?;
                return Ok(Flow::Continue);
            }
        };

        // Only ADD_DEVICE takes handles. For all other ops, silently
        // close any passed handles.
        let mut handles = raw.handles;

        if msg.op != Op::AddDevice {
            handles.clear();
        }

        let result = match msg.op {
            Op::AddDevice => {
                trace!("rpc: add-device '{}' args='{}'", msg.name, msg.args);
                self.add_device(id, handles, &msg).map(|_| ())
            }

            Op::RemoveDevice => {
                trace!("rpc: remove-device '{}'", self.device_name(id));

                // The reply goes out first; removal drops the tree's
                // reference, which may free the channel with it.
                self.send_status(id, msg.txid, Ok(()))?;
                let _ = self.remove_device(id);
                return Ok(Flow::Stop);
            }

            Op::BindDevice => {
                trace!("rpc: bind-device '{}'", self.device_name(id));
                self.bind_device(id, &msg.args).await
            }

            Op::RebindDevice => {
                trace!("rpc: rebind-device '{}'", self.device_name(id));
                Err(Error::NotSupported)
            }

            Op::DmCommand => self.handle_dmctl(&msg.data),

            Op::Status => {
                // A reply itself; elicits no reply of its own.
                self.handle_status_reply(id, &msg);
                return Ok(Flow::Continue);
            }

            Op::CreateDevice | Op::BindDriver => {
                // Coordinator-to-host ops have no business arriving
                // inbound.
                error!("rpc: unexpected op {:?} from '{}'", msg.op, self.device_name(id));
                Err(Error::NotSupported)
            }
        };

        self.send_status(id, msg.txid, result)?;
        Ok(Flow::Continue)
    }

    // Retires the pending entry the reply correlates with. Replies
    // that match nothing are logged and dropped.
    fn handle_status_reply(&mut self, id: DeviceId, msg: &Msg) {
        let Some(dev) = self.devices.get_mut(&id) else {
            return;
        };
        let Some(pos) = dev.pending.iter().position(|p| p.txid == msg.txid)
        else {
            error!("rpc: spurious status message (txid={})", msg.txid);
            return;
        };
        let pending = dev.pending.remove(pos);

        match pending.op {
            PendingOp::Bind => {
                if msg.status != NO_ERROR {
                    error!(
                        "rpc: bind-driver '{}' status {}",
                        dev.name, msg.status
                    );
                }
                // TODO: on failure, clear BOUND and try the next
                // driver in registration order.
            }
        }
    }

    fn send_status(
        &self,
        id: DeviceId,
        txid: u32,
        result: Result<()>,
    ) -> Result<()> {
        let status = match result {
            Ok(()) => NO_ERROR,
            Err(e) => e.code(),
        };
        let rec = proto::Status { txid, status };
        let dev = self.devices.get(&id).ok_or(Error::Internal)?;

        dev.rpc
            .as_ref()
            .ok_or(Error::Internal)?
            .write(Message::new(rec.encode()))
    }
}

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

//! Bind programs: the small instruction sequences drivers publish to
//! describe which devices they can claim. The evaluator is pure; for
//! identical inputs it always returns the same answer.

use crate::{Error, Result};
use serde_derive::{Deserialize, Serialize};

/// Well-known protocol tags.
pub mod protocol {
    /// Parent protocol for pure (bus-less) misc devices.
    pub const MISC_PARENT: u32 = 27;

    /// The PCI bus.
    pub const PCI: u32 = 22;
}

/// Program key selecting the device's flag bits.
pub const KEY_FLAGS: u32 = 0x0000;

/// Program key selecting the device's protocol id.
pub const KEY_PROTOCOL: u32 = 0x0001;

/// Program key selecting whether this evaluation is an automatic scan
/// (1) or an explicit administrative request (0).
pub const KEY_AUTOBIND: u32 = 0x0002;

/// First key routed to the device's property vector rather than a
/// built-in value.
pub const KEY_PROP_BASE: u32 = 0x0100;

/// One `(property_id, reserved, value)` triple of a device's
/// matchable property vector. Eight bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProp {
    pub id: u16,
    pub reserved: u16,
    pub value: u32,
}

impl DeviceProp {
    pub const WIRE_SIZE: usize = 8;

    pub fn new(id: u16, value: u32) -> DeviceProp {
        DeviceProp {
            id,
            reserved: 0,
            value,
        }
    }

    /// Decodes a property vector from a frame's data blob. The blob
    /// must be a whole number of triples.
    pub fn parse_vec(data: &[u8]) -> Result<Vec<DeviceProp>> {
        if data.len() % Self::WIRE_SIZE != 0 {
            return Err(Error::InvalidArgs);
        }
        Ok(data
            .chunks_exact(Self::WIRE_SIZE)
            .map(|chunk| DeviceProp {
                id: u16::from_ne_bytes([chunk[0], chunk[1]]),
                reserved: u16::from_ne_bytes([chunk[2], chunk[3]]),
                value: u32::from_ne_bytes([
                    chunk[4], chunk[5], chunk[6], chunk[7],
                ]),
            })
            .collect())
    }

    pub fn pack_vec(props: &[DeviceProp]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(props.len() * Self::WIRE_SIZE);

        for prop in props {
            buf.extend_from_slice(&prop.id.to_ne_bytes());
            buf.extend_from_slice(&prop.reserved.to_ne_bytes());
            buf.extend_from_slice(&prop.value.to_ne_bytes());
        }
        buf
    }
}

/// Comparison applied between the looked-up key and the instruction's
/// value. `Always` fires unconditionally.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Cond {
    #[default]
    Always,
    Equal,
    NotEqual,
    Gt,
    Lt,
    Ge,
    Le,
}

/// What an instruction does when its condition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BindOp {
    /// Stop evaluation: no match.
    Abort,
    /// Stop evaluation: match.
    Match,
    /// Jump forward to the instruction labelled `label`.
    Goto,
    /// Jump target; a no-op when executed.
    Label,
}

/// One fixed-width bind instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindInst {
    pub op: BindOp,
    #[serde(default)]
    pub cond: Cond,
    #[serde(default)]
    pub key: u32,
    #[serde(default)]
    pub value: u32,
    #[serde(default)]
    pub label: u32,
}

impl BindInst {
    pub fn match_if(cond: Cond, key: u32, value: u32) -> BindInst {
        BindInst {
            op: BindOp::Match,
            cond,
            key,
            value,
            label: 0,
        }
    }

    pub fn abort_if(cond: Cond, key: u32, value: u32) -> BindInst {
        BindInst {
            op: BindOp::Abort,
            cond,
            key,
            value,
            label: 0,
        }
    }

    pub fn goto_if(cond: Cond, key: u32, value: u32, label: u32) -> BindInst {
        BindInst {
            op: BindOp::Goto,
            cond,
            key,
            value,
            label,
        }
    }

    pub fn label(label: u32) -> BindInst {
        BindInst {
            op: BindOp::Label,
            cond: Cond::Always,
            key: 0,
            value: 0,
            label,
        }
    }
}

/// The program pure misc devices carry to get claimed by the primary
/// misc host. Drivers whose program equals this are recognised
/// structurally and bound without the generic scan.
pub fn misc_binding() -> Vec<BindInst> {
    vec![BindInst::match_if(
        Cond::Equal,
        KEY_PROTOCOL,
        protocol::MISC_PARENT,
    )]
}

pub fn is_misc_binding(program: &[BindInst]) -> bool {
    program == misc_binding()
}

// A key missing from both the built-ins and the property vector makes
// the instruction's condition false.
fn lookup(
    key: u32,
    flags: u32,
    protocol_id: u32,
    props: &[DeviceProp],
    autobind: bool,
) -> Option<u32> {
    match key {
        KEY_FLAGS => Some(flags),
        KEY_PROTOCOL => Some(protocol_id),
        KEY_AUTOBIND => Some(autobind as u32),
        key => u16::try_from(key).ok().and_then(|id| {
            props.iter().find(|prop| prop.id == id).map(|prop| prop.value)
        }),
    }
}

/// Evaluates a driver's bind program against a device, given the
/// device's flag bits, protocol, and property vector. Falling off
/// the end of the program, or jumping to a label that doesn't exist,
/// is a non-match.
pub fn is_bindable(
    program: &[BindInst],
    flags: u32,
    protocol_id: u32,
    props: &[DeviceProp],
    autobind: bool,
) -> bool {
    let mut ip = 0;

    while let Some(inst) = program.get(ip) {
        ip += 1;

        let taken = match inst.cond {
            Cond::Always => true,
            cond => lookup(inst.key, flags, protocol_id, props, autobind)
                .map_or(false, |lhs| match cond {
                    Cond::Always => true,
                    Cond::Equal => lhs == inst.value,
                    Cond::NotEqual => lhs != inst.value,
                    Cond::Gt => lhs > inst.value,
                    Cond::Lt => lhs < inst.value,
                    Cond::Ge => lhs >= inst.value,
                    Cond::Le => lhs <= inst.value,
                }),
        };

        if !taken {
            continue;
        }

        match inst.op {
            BindOp::Abort => return false,
            BindOp::Match => return true,
            BindOp::Label => (),
            BindOp::Goto => {
                match program[ip..]
                    .iter()
                    .position(|i| i.op == BindOp::Label && i.label == inst.label)
                {
                    Some(off) => ip += off,
                    None => return false,
                }
            }
        }
    }
    false
}

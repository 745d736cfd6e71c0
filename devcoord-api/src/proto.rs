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

//! The coordinator↔devhost wire protocol.
//!
//! Every frame starts with a fixed six-word header, followed by the
//! variable-length fields in the order data, name, args. `name` and
//! `args` are NUL-terminated; `namelen` counts the NUL, `argslen` does
//! not. Replies to host requests are a separate fixed two-word
//! [`Status`] record. Endianness is the host machine's; this is a
//! single-node protocol.

use crate::{Error, Result};

/// Upper bound on a whole frame, header included.
pub const MSG_MAX: usize = 4096;

/// Size of the fixed header: txid, op, protocol/status, namelen,
/// argslen, datalen.
pub const HEADER_LEN: usize = 24;

/// Longest device or driver-library name, excluding the NUL.
pub const MAX_NAME_LEN: usize = 31;

/// Operations carried in the header's `op` word. The discriminants
/// are the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Op {
    /// host → coord: create a child device. handle\[0\] is its RPC
    /// channel, handle\[1\] (if present) its resource capability.
    AddDevice = 1,
    /// host → coord: the host has removed this device.
    RemoveDevice = 2,
    /// host → coord: administrative request to bind a named driver.
    BindDevice = 3,
    /// host → coord: rebind request (refused).
    RebindDevice = 4,
    /// host → coord: administrative text command.
    DmCommand = 5,
    /// host → coord: reply to a prior coordinator-initiated op.
    Status = 6,
    /// coord → host: instantiate a proxy device in the host.
    CreateDevice = 7,
    /// coord → host: load the named driver and bind it.
    BindDriver = 8,
}

impl Op {
    fn from_u32(raw: u32) -> Option<Op> {
        match raw {
            1 => Some(Op::AddDevice),
            2 => Some(Op::RemoveDevice),
            3 => Some(Op::BindDevice),
            4 => Some(Op::RebindDevice),
            5 => Some(Op::DmCommand),
            6 => Some(Op::Status),
            7 => Some(Op::CreateDevice),
            8 => Some(Op::BindDriver),
            _ => None,
        }
    }
}

/// A decoded frame. The third header word is `protocol_id` for device
/// ops and the status value for `Status` frames; the constructors keep
/// the unused one zero so packing is lossless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    pub txid: u32,
    pub op: Op,
    pub protocol_id: u32,
    pub status: i32,
    pub data: Vec<u8>,
    pub name: String,
    pub args: String,
}

impl Msg {
    fn new(txid: u32, op: Op) -> Msg {
        Msg {
            txid,
            op,
            protocol_id: 0,
            status: 0,
            data: vec![],
            name: String::new(),
            args: String::new(),
        }
    }

    pub fn add_device(
        txid: u32,
        protocol_id: u32,
        props: Vec<u8>,
        name: &str,
        args: &str,
    ) -> Msg {
        Msg {
            protocol_id,
            data: props,
            name: String::from(name),
            args: String::from(args),
            ..Msg::new(txid, Op::AddDevice)
        }
    }

    pub fn remove_device(txid: u32) -> Msg {
        Msg::new(txid, Op::RemoveDevice)
    }

    /// The driver name rides in `args`, matching the host-side
    /// convention of passing bind arguments there.
    pub fn bind_device(txid: u32, drvname: &str) -> Msg {
        Msg {
            args: String::from(drvname),
            ..Msg::new(txid, Op::BindDevice)
        }
    }

    pub fn rebind_device(txid: u32) -> Msg {
        Msg::new(txid, Op::RebindDevice)
    }

    pub fn dm_command(txid: u32, cmd: &[u8]) -> Msg {
        Msg {
            data: cmd.to_vec(),
            ..Msg::new(txid, Op::DmCommand)
        }
    }

    pub fn status(txid: u32, status: i32) -> Msg {
        Msg {
            status,
            ..Msg::new(txid, Op::Status)
        }
    }

    pub fn create_device(protocol_id: u32, libname: &str, args: &str) -> Msg {
        Msg {
            protocol_id,
            name: String::from(libname),
            args: String::from(args),
            ..Msg::new(0, Op::CreateDevice)
        }
    }

    pub fn bind_driver(txid: u32, libname: &str) -> Msg {
        Msg {
            name: String::from(libname),
            ..Msg::new(txid, Op::BindDriver)
        }
    }

    /// Encodes the frame. Fails `InvalidArgs` when a field violates
    /// its bound (overlong name, embedded NUL, frame over `MSG_MAX`.)
    pub fn pack(&self) -> Result<Vec<u8>> {
        if self.name.len() > MAX_NAME_LEN {
            return Err(Error::InvalidArgs);
        }
        if self.name.as_bytes().contains(&0) || self.args.as_bytes().contains(&0)
        {
            return Err(Error::InvalidArgs);
        }

        let namelen = self.name.len() + 1;
        let argslen = self.args.len();
        let total = HEADER_LEN + self.data.len() + namelen + argslen + 1;

        if total > MSG_MAX {
            return Err(Error::InvalidArgs);
        }

        let word3 = match self.op {
            Op::Status => self.status as u32,
            _ => self.protocol_id,
        };
        let mut buf = Vec::with_capacity(total);

        buf.extend_from_slice(&self.txid.to_ne_bytes());
        buf.extend_from_slice(&(self.op as u32).to_ne_bytes());
        buf.extend_from_slice(&word3.to_ne_bytes());
        buf.extend_from_slice(&(namelen as u32).to_ne_bytes());
        buf.extend_from_slice(&(argslen as u32).to_ne_bytes());
        buf.extend_from_slice(&(self.data.len() as u32).to_ne_bytes());
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(self.name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(self.args.as_bytes());
        buf.push(0);
        Ok(buf)
    }

    /// Decodes a frame. Malformed framing (short header, inconsistent
    /// lengths, missing terminators, bad UTF-8) fails `InvalidArgs`;
    /// an op value outside the protocol fails `NotSupported`.
    pub fn unpack(buf: &[u8]) -> Result<Msg> {
        if buf.len() < HEADER_LEN || buf.len() > MSG_MAX {
            return Err(Error::InvalidArgs);
        }

        let word = |ii: usize| -> u32 {
            let at = ii * 4;

            u32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
        };
        let txid = word(0);
        let op = Op::from_u32(word(1)).ok_or(Error::NotSupported)?;
        let word3 = word(2);
        let namelen = word(3) as usize;
        let argslen = word(4) as usize;
        let datalen = word(5) as usize;

        if namelen == 0 || namelen > MAX_NAME_LEN + 1 {
            return Err(Error::InvalidArgs);
        }
        if buf.len() != HEADER_LEN + datalen + namelen + argslen + 1 {
            return Err(Error::InvalidArgs);
        }

        let data = &buf[HEADER_LEN..HEADER_LEN + datalen];
        let name = &buf[HEADER_LEN + datalen..HEADER_LEN + datalen + namelen];
        let args = &buf[HEADER_LEN + datalen + namelen..];

        let strip = |field: &[u8]| -> Result<String> {
            match field.split_last() {
                Some((0, body)) if !body.contains(&0) => {
                    String::from_utf8(body.to_vec())
                        .map_err(|_| Error::InvalidArgs)
                }
                _ => Err(Error::InvalidArgs),
            }
        };

        Ok(Msg {
            txid,
            op,
            protocol_id: if op == Op::Status { 0 } else { word3 },
            status: if op == Op::Status { word3 as i32 } else { 0 },
            data: data.to_vec(),
            name: strip(name)?,
            args: strip(args)?,
        })
    }
}

/// Reads the transaction id out of a frame that may not decode, so a
/// malformed request can still be answered on the right transaction.
pub fn peek_txid(buf: &[u8]) -> u32 {
    match buf {
        [a, b, c, d, ..] => u32::from_ne_bytes([*a, *b, *c, *d]),
        _ => 0,
    }
}

/// The fixed reply record the coordinator writes for every host
/// request (except `Status` frames, which are themselves replies.)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub txid: u32,
    pub status: i32,
}

impl Status {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);

        buf.extend_from_slice(&self.txid.to_ne_bytes());
        buf.extend_from_slice(&self.status.to_ne_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Status> {
        match buf {
            [a, b, c, d, e, f, g, h] => Ok(Status {
                txid: u32::from_ne_bytes([*a, *b, *c, *d]),
                status: i32::from_ne_bytes([*e, *f, *g, *h]),
            }),
            _ => Err(Error::InvalidArgs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips() {
        let msgs = vec![
            Msg::add_device(7, 42, vec![1, 0, 0, 0, 2, 0, 0, 0], "gpu", "busdev,0"),
            Msg::remove_device(8),
            Msg::bind_device(9, "xyz"),
            Msg::rebind_device(10),
            Msg::dm_command(11, b"dump"),
            Msg::status(12, -20),
            Msg::create_device(22, "driver/bus-pci.so", ""),
            Msg::bind_driver(13, "driver/root.so"),
        ];

        for msg in msgs {
            let buf = msg.pack().unwrap();

            assert_eq!(Msg::unpack(&buf).unwrap(), msg, "op {:?}", msg.op);
            assert_eq!(peek_txid(&buf), msg.txid);
        }
    }

    #[test]
    fn test_pack_rejects_bad_fields() {
        let long = "x".repeat(MAX_NAME_LEN + 1);

        assert_eq!(
            Msg::create_device(0, &long, "").pack(),
            Err(Error::InvalidArgs)
        );

        let big = Msg::add_device(0, 0, vec![0; MSG_MAX], "dev", "");

        assert_eq!(big.pack(), Err(Error::InvalidArgs));
    }

    #[test]
    fn test_unpack_rejects_malformed() {
        // Short header.

        assert_eq!(Msg::unpack(&[0; 8]), Err(Error::InvalidArgs));

        // Truncated payload.

        let mut buf = Msg::remove_device(1).pack().unwrap();

        buf.pop();
        assert_eq!(Msg::unpack(&buf), Err(Error::InvalidArgs));

        // Trailing junk.

        let mut buf = Msg::remove_device(1).pack().unwrap();

        buf.push(0xff);
        assert_eq!(Msg::unpack(&buf), Err(Error::InvalidArgs));

        // Overlong name length in the header.

        let mut buf = Msg::remove_device(1).pack().unwrap();

        buf[12..16].copy_from_slice(&(MAX_NAME_LEN as u32 + 2).to_ne_bytes());
        assert_eq!(Msg::unpack(&buf), Err(Error::InvalidArgs));

        // Missing NUL terminator on the name.

        let mut buf = Msg::bind_driver(1, "driver/a.so").pack().unwrap();
        let nul = HEADER_LEN + "driver/a.so".len();

        buf[nul] = b'!';
        assert_eq!(Msg::unpack(&buf), Err(Error::InvalidArgs));
    }

    #[test]
    fn test_unknown_op() {
        let mut buf = Msg::remove_device(3).pack().unwrap();

        buf[4..8].copy_from_slice(&0xdead_u32.to_ne_bytes());
        assert_eq!(Msg::unpack(&buf), Err(Error::NotSupported));
        assert_eq!(peek_txid(&buf), 3);
    }

    #[test]
    fn test_status_record() {
        let rec = Status {
            txid: 99,
            status: -10,
        };
        let buf = rec.encode();

        assert_eq!(buf.len(), 8);
        assert_eq!(Status::decode(&buf).unwrap(), rec);
        assert_eq!(Status::decode(&buf[..4]), Err(Error::InvalidArgs));
    }
}

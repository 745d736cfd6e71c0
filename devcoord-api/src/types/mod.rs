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

//! Defines fundamental types used throughout the devcoord codebase.

use std::fmt;

/// The status value carried in a reply when the request succeeded.
pub const NO_ERROR: i32 = 0;

/// Enumerates all the errors that can be reported in devcoord. The
/// first group mirrors the status codes that travel on the wire
/// between the coordinator and its device hosts; the remaining
/// variants never cross a channel and exist for the daemon's own
/// plumbing (configuration, retryable reads.)

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Error {
    /// Wire validation failure: bad sizes, bounds, or handle counts.
    InvalidArgs,

    /// The operation contradicts the device's lifecycle (removing a
    /// dead device, rebinding a bound one, binding a shadow.)
    BadState,

    /// The path is intentionally unimplemented, or the command or bus
    /// protocol is unknown.
    NotSupported,

    /// An allocation failed while building a device, shadow, or
    /// pending record.
    NoMemory,

    /// Framing inconsistency or unexpected internal state.
    Internal,

    /// The other end of a channel is gone.
    PeerClosed,

    /// A non-blocking operation found nothing to do. Retry after the
    /// next readiness event.
    ShouldWait,

    /// A bounded wait elapsed with nothing ready.
    TimedOut,

    /// A bad parameter was given in a configuration or a
    /// configuration was missing a required parameter.
    ConfigError(String),
}

impl Error {
    /// Returns the stable, negative code used when this error is
    /// written to a channel as the status field of a reply.
    /// `ConfigError` never crosses the wire; it degrades to the
    /// internal-error code.
    pub fn code(&self) -> i32 {
        match self {
            Error::Internal => -1,
            Error::NotSupported => -2,
            Error::NoMemory => -4,
            Error::InvalidArgs => -10,
            Error::BadState => -20,
            Error::ShouldWait => -22,
            Error::TimedOut => -23,
            Error::PeerClosed => -24,
            Error::ConfigError(_) => -1,
        }
    }

    /// Maps a wire status back to a result. Unknown negative codes
    /// collapse to `Internal` rather than being trusted.
    pub fn check(code: i32) -> Result<(), Error> {
        match code {
            NO_ERROR => Ok(()),
            -2 => Err(Error::NotSupported),
            -4 => Err(Error::NoMemory),
            -10 => Err(Error::InvalidArgs),
            -20 => Err(Error::BadState),
            -22 => Err(Error::ShouldWait),
            -23 => Err(Error::TimedOut),
            -24 => Err(Error::PeerClosed),
            _ => Err(Error::Internal),
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidArgs => write!(f, "invalid arguments"),
            Error::BadState => write!(f, "operation contradicts state"),
            Error::NotSupported => write!(f, "not supported"),
            Error::NoMemory => write!(f, "out of memory"),
            Error::Internal => write!(f, "internal error"),
            Error::PeerClosed => write!(f, "peer closed"),
            Error::ShouldWait => write!(f, "would block"),
            Error::TimedOut => write!(f, "timed out"),
            Error::ConfigError(v) => write!(f, "config error: {}", &v),
        }
    }
}

pub mod ipc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes() {
        // Every wire-visible variant must survive the code/check round
        // trip.

        for err in [
            Error::Internal,
            Error::NotSupported,
            Error::NoMemory,
            Error::InvalidArgs,
            Error::BadState,
            Error::ShouldWait,
            Error::TimedOut,
            Error::PeerClosed,
        ] {
            assert_eq!(Error::check(err.code()), Err(err));
        }

        assert_eq!(Error::check(NO_ERROR), Ok(()));

        // Unknown codes are not trusted.

        assert_eq!(Error::check(-9999), Err(Error::Internal));
        assert_eq!(
            Error::check(Error::ConfigError("x".into()).code()),
            Err(Error::Internal)
        );
    }
}

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

//! The administrative control surface: exact-match text commands that
//! either act immediately or forward to an external subsystem.

use devcoord_api::types::ipc::Message;
use devcoord_api::{Error, KtraceAction, Platform, Result};
use tracing::error;

use crate::coordinator::Coordinator;

const HELP: &str = "dump        - dump device tree\n\
                    poweroff    - power off the system\n\
                    shutdown    - power off the system\n\
                    reboot      - reboot the system\n\
                    kerneldebug - send a command to the kernel\n\
                    ktraceoff   - stop kernel tracing\n\
                    ktraceon    - start kernel tracing\n\
                    acpi-ps0    - invoke the _PS0 method on an acpi object\n";

impl Coordinator {
    /// Runs one command. Commands match on exact length and bytes;
    /// anything unrecognised is refused.
    pub(crate) fn handle_dmctl(&mut self, cmd: &[u8]) -> Result<()> {
        match cmd {
            b"dump" => {
                let mut out = String::new();

                self.dump_state(&mut out);
                print!("{}", out);
                Ok(())
            }
            b"help" => {
                print!("{}", HELP);
                Ok(())
            }
            b"reboot" => {
                self.platform.reboot();
                Ok(())
            }
            b"poweroff" | b"shutdown" => {
                self.platform.poweroff();
                Ok(())
            }
            b"ktraceon" => self
                .platform
                .ktrace(KtraceAction::Start(KtraceAction::GRP_ALL)),
            b"ktraceoff" => {
                self.platform.ktrace(KtraceAction::Stop)?;
                self.platform.ktrace(KtraceAction::Rewind)
            }
            cmd => self.dmctl_forward(cmd),
        }
    }

    // The prefixed commands, each forwarding its tail elsewhere. An
    // empty tail is not a command.
    fn dmctl_forward(&mut self, cmd: &[u8]) -> Result<()> {
        if let Some(arg) = cmd.strip_prefix(b"acpi-ps0:".as_slice()) {
            if !arg.is_empty() {
                let arg =
                    std::str::from_utf8(arg).map_err(|_| Error::InvalidArgs)?;

                return self.platform.acpi_ps0(arg);
            }
        }
        if let Some(tail) = cmd.strip_prefix(b"kerneldebug ".as_slice()) {
            if !tail.is_empty() {
                let tail =
                    std::str::from_utf8(tail).map_err(|_| Error::InvalidArgs)?;

                return self.platform.debug_command(tail);
            }
        }
        if cmd.len() > 1 && cmd[0] == b'@' {
            // The launcher gets the whole command, '@' included.
            let launcher = self.launcher.as_ref().ok_or(Error::PeerClosed)?;

            return launcher.write(Message::new(cmd.to_vec()));
        }

        error!("dmctl: unknown command '{}'", String::from_utf8_lossy(cmd));
        Err(Error::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::coordinator::Coordinator;
    use crate::devfs::MemDevfs;
    use crate::platform::{LoopbackPlatform, PlatformEvent};
    use devcoord_api::types::ipc::Channel;
    use devcoord_api::KtraceAction;

    fn coordinator() -> (Coordinator, LoopbackPlatform) {
        let platform = LoopbackPlatform::new();
        let coordinator = Coordinator::new(
            &Config::default(),
            Box::new(platform.clone()),
            Box::new(MemDevfs::new()),
        )
        .unwrap();

        (coordinator, platform)
    }

    #[test]
    fn test_power_commands() {
        let (mut c, platform) = coordinator();

        c.handle_dmctl(b"reboot").unwrap();
        c.handle_dmctl(b"poweroff").unwrap();
        c.handle_dmctl(b"shutdown").unwrap();

        assert_eq!(
            platform.events(),
            vec![
                PlatformEvent::Reboot,
                PlatformEvent::Poweroff,
                PlatformEvent::Poweroff
            ]
        );
    }

    #[test]
    fn test_ktrace_commands() {
        let (mut c, platform) = coordinator();

        c.handle_dmctl(b"ktraceon").unwrap();
        c.handle_dmctl(b"ktraceoff").unwrap();

        assert_eq!(
            platform.events(),
            vec![
                PlatformEvent::Ktrace(KtraceAction::Start(
                    KtraceAction::GRP_ALL
                )),
                PlatformEvent::Ktrace(KtraceAction::Stop),
                PlatformEvent::Ktrace(KtraceAction::Rewind)
            ]
        );
    }

    #[test]
    fn test_acpi_ps0() {
        let (mut c, platform) = coordinator();

        c.handle_dmctl(b"acpi-ps0:\\_SB.PCI0").unwrap();
        assert_eq!(
            platform.events(),
            vec![PlatformEvent::AcpiPs0(String::from("\\_SB.PCI0"))]
        );

        // The bare prefix is not a command.

        assert_eq!(c.handle_dmctl(b"acpi-ps0:"), Err(Error::NotSupported));
    }

    #[test]
    fn test_kerneldebug() {
        let (mut c, platform) = coordinator();

        c.handle_dmctl(b"kerneldebug threadstats").unwrap();
        assert_eq!(
            platform.events(),
            vec![PlatformEvent::DebugCommand(String::from("threadstats"))]
        );

        assert_eq!(c.handle_dmctl(b"kerneldebug "), Err(Error::NotSupported));
    }

    #[test]
    fn test_launcher_forwarding() {
        let (mut c, _platform) = coordinator();

        // Without a launcher the channel is effectively gone.

        assert_eq!(c.handle_dmctl(b"@run shell"), Err(Error::PeerClosed));

        let (ours, theirs) = Channel::create();

        c.launcher = Some(ours);
        c.handle_dmctl(b"@run shell").unwrap();

        // The launcher sees the whole command, '@' included.

        assert_eq!(theirs.try_read().unwrap().bytes, b"@run shell");

        // A lone '@' is not a command.

        assert_eq!(c.handle_dmctl(b"@"), Err(Error::NotSupported));
    }

    #[test]
    fn test_dump_and_help() {
        let (mut c, _platform) = coordinator();

        c.handle_dmctl(b"dump").unwrap();
        c.handle_dmctl(b"help").unwrap();
    }

    #[test]
    fn test_unknown_commands() {
        let (mut c, _platform) = coordinator();

        for cmd in [&b"dumpp"[..], &b"dum"[..], &b""[..], &b"reboot "[..]] {
            assert_eq!(c.handle_dmctl(cmd), Err(Error::NotSupported));
        }
    }
}

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

//! The event port: demultiplexes readiness on many channels into one
//! serialised stream of callbacks. The port owns only lightweight
//! waiters; the channels themselves stay with the devices that speak
//! on them.

use devcoord_api::types::ipc::{Channel, ChannelWaiter, Signals};
use devcoord_api::{Error, Result};
use std::future::poll_fn;
use std::task::{Context, Poll};
use tokio::time::Duration;

use crate::coordinator::device::DeviceId;

/// Identifies the handler a ready channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    /// A device's RPC channel.
    Device(DeviceId),
    /// The administrative command channel.
    Dmctl,
}

/// What a handler wants done with its registration afterwards.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Tear the handler down; the channel is done.
    Stop,
}

pub struct EventPort {
    handlers: Vec<(EventSource, ChannelWaiter)>,
    next_scan: usize,
}

impl EventPort {
    pub fn new() -> EventPort {
        EventPort {
            handlers: vec![],
            next_scan: 0,
        }
    }

    /// Arms `source` for readiness events on `chan`. Re-watching an
    /// armed source is a programmer error.
    pub fn watch(&mut self, source: EventSource, chan: &Channel) {
        assert!(
            self.handlers.iter().all(|(s, _)| *s != source),
            "{:?} is already armed on the port",
            source
        );
        self.handlers.push((source, chan.waiter()));
    }

    /// Disarms `source`. Idempotent, so callers can unconditionally
    /// unregister on any error path.
    pub fn unwatch(&mut self, source: EventSource) {
        self.handlers.retain(|(s, _)| *s != source);
    }

    // Scans the armed set once, starting past the handler delivered
    // last time so one busy channel cannot starve the rest.
    fn poll_next(
        handlers: &[(EventSource, ChannelWaiter)],
        next_scan: &mut usize,
        cx: &mut Context<'_>,
    ) -> Poll<(EventSource, Signals)> {
        let n = handlers.len();

        if n == 0 {
            return Poll::Pending;
        }

        let start = *next_scan % n;

        for ii in 0..n {
            let (source, waiter) = &handlers[(start + ii) % n];

            if let Poll::Ready(sig) = waiter.poll_readable(cx) {
                *next_scan = (start + ii + 1) % n;
                return Poll::Ready((*source, sig));
            }
        }
        Poll::Pending
    }

    /// Waits up to `timeout` (forever when `None`) and delivers at
    /// most one ready source. Returns `TimedOut` when a finite
    /// timeout elapses with nothing ready.
    pub async fn dispatch(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<(EventSource, Signals)> {
        let EventPort {
            handlers,
            next_scan,
        } = self;
        let wait = poll_fn(|cx| Self::poll_next(handlers, next_scan, cx));

        match timeout {
            None => Ok(wait.await),
            Some(dur) => tokio::time::timeout(dur, wait)
                .await
                .map_err(|_| Error::TimedOut),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devcoord_api::types::ipc::Message;

    const POLL: Option<Duration> = Some(Duration::ZERO);

    #[tokio::test]
    async fn test_dispatch_delivers_readable() {
        let mut port = EventPort::new();
        let (a, b) = Channel::create();

        port.watch(EventSource::Dmctl, &b);
        assert_eq!(port.dispatch(POLL).await, Err(Error::TimedOut));

        a.write(Message::new(vec![1])).unwrap();

        let (source, sig) = port.dispatch(POLL).await.unwrap();

        assert_eq!(source, EventSource::Dmctl);
        assert!(sig.contains(Signals::READABLE));

        // Level triggered: the message is still queued.

        let (source, _) = port.dispatch(POLL).await.unwrap();

        assert_eq!(source, EventSource::Dmctl);

        let _ = b.try_read().unwrap();
        assert_eq!(port.dispatch(POLL).await, Err(Error::TimedOut));
    }

    #[tokio::test]
    async fn test_dispatch_reports_peer_closed() {
        let mut port = EventPort::new();
        let (a, b) = Channel::create();

        port.watch(EventSource::Device(DeviceId(4)), &b);
        drop(a);

        let (source, sig) = port.dispatch(POLL).await.unwrap();

        assert_eq!(source, EventSource::Device(DeviceId(4)));
        assert!(sig.contains(Signals::PEER_CLOSED));
    }

    #[tokio::test]
    async fn test_dispatch_blocks_until_ready() {
        let mut port = EventPort::new();
        let (a, b) = Channel::create();

        port.watch(EventSource::Dmctl, &b);

        let write = async {
            tokio::task::yield_now().await;
            a.write(Message::new(vec![])).unwrap();
        };
        let (next, _) = tokio::join!(port.dispatch(None), write);

        assert!(next.is_ok());
    }

    #[tokio::test]
    async fn test_unwatch_disarms() {
        let mut port = EventPort::new();
        let (a, b) = Channel::create();

        port.watch(EventSource::Dmctl, &b);
        a.write(Message::new(vec![])).unwrap();
        port.unwatch(EventSource::Dmctl);

        assert_eq!(port.dispatch(POLL).await, Err(Error::TimedOut));

        // A second unwatch is a no-op.

        port.unwatch(EventSource::Dmctl);
    }

    #[tokio::test]
    async fn test_dispatch_rotates_between_ready_sources() {
        let mut port = EventPort::new();
        let (a1, b1) = Channel::create();
        let (a2, b2) = Channel::create();

        port.watch(EventSource::Device(DeviceId(1)), &b1);
        port.watch(EventSource::Device(DeviceId(2)), &b2);
        a1.write(Message::new(vec![])).unwrap();
        a2.write(Message::new(vec![])).unwrap();

        let (first, _) = port.dispatch(POLL).await.unwrap();
        let (second, _) = port.dispatch(POLL).await.unwrap();

        assert_ne!(first, second);
    }

    #[test]
    #[should_panic(expected = "already armed")]
    fn test_rewatch_panics() {
        let mut port = EventPort::new();
        let (_a, b) = Channel::create();

        port.watch(EventSource::Dmctl, &b);
        port.watch(EventSource::Dmctl, &b);
    }
}

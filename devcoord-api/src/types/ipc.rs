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

//! In-process stand-ins for the kernel objects the coordinator talks
//! through: bidirectional message channels that can carry handles,
//! plus processes and jobs with koids and a kill switch. Reads and
//! writes never block; waiting happens through a [`ChannelWaiter`],
//! which is what the event port arms.

use crate::{Error, Result};
use std::collections::VecDeque;
use std::fmt;
use std::future::poll_fn;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll, Waker};

use bitflags::bitflags;

bitflags! {
    /// Readiness signals observed on a channel endpoint.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Signals: u32 {
        const READABLE = 1 << 0;
        const PEER_CLOSED = 1 << 1;
    }
}

static NEXT_KOID: AtomicU64 = AtomicU64::new(1);

fn alloc_koid() -> u64 {
    NEXT_KOID.fetch_add(1, Ordering::Relaxed)
}

/// One datagram on a channel: a byte payload plus zero or more
/// transferred handles. Ownership of the handles moves with the
/// message; dropping an unclaimed message closes them.
#[derive(Debug, Default)]
pub struct Message {
    pub bytes: Vec<u8>,
    pub handles: Vec<Handle>,
}

impl Message {
    pub fn new(bytes: Vec<u8>) -> Message {
        Message {
            bytes,
            handles: vec![],
        }
    }

    pub fn with_handles(bytes: Vec<u8>, handles: Vec<Handle>) -> Message {
        Message { bytes, handles }
    }
}

/// A transferable capability. Only the kinds the device protocol
/// actually moves are representable.
#[derive(Debug)]
pub enum Handle {
    Channel(Channel),
    Resource(Resource),
}

// The receive side of one endpoint. The peer endpoint pushes into
// `queue`; `closed` latches when the peer is dropped.
struct Endpoint {
    queue: VecDeque<Message>,
    closed: bool,
    waker: Option<Waker>,
}

impl Endpoint {
    fn new() -> Arc<Mutex<Endpoint>> {
        Arc::new(Mutex::new(Endpoint {
            queue: VecDeque::new(),
            closed: false,
            waker: None,
        }))
    }

    fn signals(&self) -> Signals {
        let mut sig = Signals::empty();

        if !self.queue.is_empty() {
            sig |= Signals::READABLE
        }
        if self.closed {
            sig |= Signals::PEER_CLOSED
        }
        sig
    }

    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake()
        }
    }
}

/// One endpoint of a bidirectional channel. Dropping an endpoint
/// closes it; the peer then observes `PEER_CLOSED` once its queue
/// drains.
pub struct Channel {
    rx: Arc<Mutex<Endpoint>>,
    tx: Weak<Mutex<Endpoint>>,
    koid: u64,
}

impl Channel {
    /// Creates a connected pair of endpoints.
    pub fn create() -> (Channel, Channel) {
        let a = Endpoint::new();
        let b = Endpoint::new();

        (
            Channel {
                rx: a.clone(),
                tx: Arc::downgrade(&b),
                koid: alloc_koid(),
            },
            Channel {
                rx: b,
                tx: Arc::downgrade(&a),
                koid: alloc_koid(),
            },
        )
    }

    pub fn koid(&self) -> u64 {
        self.koid
    }

    /// Queues a message for the peer. Never blocks. Fails with
    /// `PeerClosed` when the other endpoint is gone.
    pub fn write(&self, msg: Message) -> Result<()> {
        let peer = self.tx.upgrade().ok_or(Error::PeerClosed)?;
        let mut ep = peer.lock().unwrap();

        if ep.closed {
            return Err(Error::PeerClosed);
        }
        ep.queue.push_back(msg);
        ep.wake();
        Ok(())
    }

    /// Takes the next queued message. Never blocks: an empty queue
    /// reports `ShouldWait` (or `PeerClosed` once the peer is gone and
    /// the queue has drained.)
    pub fn try_read(&self) -> Result<Message> {
        let mut ep = self.rx.lock().unwrap();

        match ep.queue.pop_front() {
            Some(msg) => Ok(msg),
            None if ep.closed => Err(Error::PeerClosed),
            None => Err(Error::ShouldWait),
        }
    }

    /// Hands out the receive-side state so an event port can wait for
    /// readiness without owning the endpoint.
    pub fn waiter(&self) -> ChannelWaiter {
        ChannelWaiter {
            rx: self.rx.clone(),
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        // Latch closure on the peer so its reads and waits observe it.
        if let Some(peer) = self.tx.upgrade() {
            let mut ep = peer.lock().unwrap();

            ep.closed = true;
            ep.wake();
        }

        // Any waiter still armed on this endpoint must not hang.
        let mut ep = self.rx.lock().unwrap();

        ep.closed = true;
        ep.wake();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Channel").field("koid", &self.koid).finish()
    }
}

/// A read-side observer for one channel endpoint. Holds the shared
/// receive state alive, so stale waiters must be disarmed when their
/// channel goes away.
pub struct ChannelWaiter {
    rx: Arc<Mutex<Endpoint>>,
}

impl ChannelWaiter {
    /// Non-blocking readiness probe.
    pub fn readiness(&self) -> Option<Signals> {
        let sig = self.rx.lock().unwrap().signals();

        if sig.is_empty() {
            None
        } else {
            Some(sig)
        }
    }

    /// Polls for readiness, registering the task's waker while the
    /// endpoint is idle.
    pub fn poll_readable(&self, cx: &mut Context<'_>) -> Poll<Signals> {
        let mut ep = self.rx.lock().unwrap();
        let sig = ep.signals();

        if sig.is_empty() {
            ep.waker = Some(cx.waker().clone());
            Poll::Pending
        } else {
            Poll::Ready(sig)
        }
    }

    /// Waits until the endpoint is readable or its peer has closed.
    pub async fn readable(&self) -> Signals {
        poll_fn(|cx| self.poll_readable(cx)).await
    }
}

/// An opaque capability forwarded to bus devices at create time.
/// Duplication yields an indistinguishable handle to the same
/// underlying object.
#[derive(Clone)]
pub struct Resource {
    koid: u64,
    token: Arc<()>,
}

impl Resource {
    pub fn new() -> Resource {
        Resource {
            koid: alloc_koid(),
            token: Arc::new(()),
        }
    }

    pub fn koid(&self) -> u64 {
        self.koid
    }

    pub fn duplicate(&self) -> Resource {
        self.clone()
    }

    /// True when both handles refer to the same underlying object.
    pub fn same_object(&self, other: &Resource) -> bool {
        Arc::ptr_eq(&self.token, &other.token)
    }
}

impl Default for Resource {
    fn default() -> Self {
        Resource::new()
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Resource").field("koid", &self.koid).finish()
    }
}

/// A spawned task handle. Cloning yields another handle to the same
/// process, so an observer can watch liveness after the owner kills
/// it.
#[derive(Clone, Debug)]
pub struct Process {
    koid: u64,
    alive: Arc<AtomicBool>,
}

impl Process {
    pub fn new() -> Process {
        Process {
            koid: alloc_koid(),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn koid(&self) -> u64 {
        self.koid
    }

    pub fn kill(&self) {
        self.alive.store(false, Ordering::Relaxed)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}

impl Default for Process {
    fn default() -> Self {
        Process::new()
    }
}

struct JobInner {
    name: String,
    procs: Mutex<Vec<Process>>,
}

/// A group of processes forming one failure domain. Killing the job
/// kills every process spawned within it.
#[derive(Clone)]
pub struct Job {
    koid: u64,
    inner: Arc<JobInner>,
}

impl Job {
    pub fn new(name: &str) -> Job {
        Job {
            koid: alloc_koid(),
            inner: Arc::new(JobInner {
                name: String::from(name),
                procs: Mutex::new(vec![]),
            }),
        }
    }

    pub fn koid(&self) -> u64 {
        self.koid
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Records a process as belonging to this job.
    pub fn attach(&self, proc: &Process) {
        self.inner.procs.lock().unwrap().push(proc.clone())
    }

    pub fn kill(&self) {
        for proc in self.inner.procs.lock().unwrap().iter() {
            proc.kill()
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Job")
            .field("koid", &self.koid)
            .field("name", &self.inner.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let (a, b) = Channel::create();

        a.write(Message::new(vec![1, 2, 3])).unwrap();
        a.write(Message::new(vec![4])).unwrap();

        assert_eq!(b.try_read().unwrap().bytes, vec![1, 2, 3]);
        assert_eq!(b.try_read().unwrap().bytes, vec![4]);
        assert_eq!(b.try_read().unwrap_err(), Error::ShouldWait);
    }

    #[test]
    fn test_peer_closed() {
        let (a, b) = Channel::create();

        a.write(Message::new(vec![9])).unwrap();
        drop(a);

        // Queued traffic drains before closure is reported.

        assert_eq!(b.try_read().unwrap().bytes, vec![9]);
        assert_eq!(b.try_read().unwrap_err(), Error::PeerClosed);
        assert_eq!(b.write(Message::new(vec![])), Err(Error::PeerClosed));
    }

    #[test]
    fn test_handle_transfer() {
        let (a, b) = Channel::create();
        let (c, d) = Channel::create();

        a.write(Message::with_handles(vec![], vec![Handle::Channel(d)]))
            .unwrap();

        let mut msg = b.try_read().unwrap();

        match msg.handles.pop() {
            Some(Handle::Channel(d)) => {
                c.write(Message::new(vec![7])).unwrap();
                assert_eq!(d.try_read().unwrap().bytes, vec![7]);
            }
            other => panic!("expected a channel handle, got {:?}", other),
        }
    }

    #[test]
    fn test_dropped_message_closes_handles() {
        let (a, b) = Channel::create();
        let (c, d) = Channel::create();

        a.write(Message::with_handles(vec![], vec![Handle::Channel(d)]))
            .unwrap();
        drop(b.try_read().unwrap());

        assert_eq!(c.try_read().unwrap_err(), Error::PeerClosed);
    }

    #[tokio::test]
    async fn test_waiter_readable() {
        let (a, b) = Channel::create();
        let waiter = b.waiter();

        assert_eq!(waiter.readiness(), None);

        a.write(Message::new(vec![1])).unwrap();
        assert_eq!(waiter.readable().await, Signals::READABLE);

        let _ = b.try_read().unwrap();
        drop(a);
        assert_eq!(waiter.readable().await, Signals::PEER_CLOSED);
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_write() {
        let (a, b) = Channel::create();
        let waiter = b.waiter();

        let write = async {
            tokio::task::yield_now().await;
            a.write(Message::new(vec![2])).unwrap();
        };
        let (sig, _) = tokio::join!(waiter.readable(), write);

        assert!(sig.contains(Signals::READABLE));
    }

    #[test]
    fn test_resource_duplicate() {
        let r = Resource::new();
        let dup = r.duplicate();

        assert!(r.same_object(&dup));
        assert!(!r.same_object(&Resource::new()));
    }

    #[test]
    fn test_job_kill_is_a_failure_domain() {
        let job = Job::new("drivers");
        let p1 = Process::new();
        let p2 = Process::new();

        job.attach(&p1);
        job.attach(&p2);
        assert!(p1.is_alive() && p2.is_alive());

        job.kill();
        assert!(!p1.is_alive() && !p2.is_alive());
    }
}

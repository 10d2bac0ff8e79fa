//! The single-threaded readiness-multiplexing loop, per `spec.md` §4.1.
//!
//! `Reactor<R>` is a thin, spec-shaped facade over `mio::Poll`: the
//! registration table is a dense `Vec<Option<Entry<R>>>` indexed by raw
//! file descriptor (§9: "any container with O(1) average lookup keyed by a
//! small integer... including a dense vector indexed by fd"), and
//! `wait()`/`next_read()`/`next_write()` rebuild ordered ready-queues every
//! cycle instead of exposing `mio::Events` directly to callers.
//!
//! `R` is the caller's resource type (see `smtp::server::Resource`) — the
//! reactor owns it for the resource's registered lifetime and hands out
//! `&mut R` to readiness handlers for the duration of one callback, per the
//! single-ownership model in §9's design notes.

use mio::event::Source;
use mio::{Events, Poll, Token};
use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::time::Duration;
use thiserror::Error;

/// The four resource kinds the server's reactor multiplexes, per `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    PassiveV4,
    PassiveV6,
    TcpClient,
    ControlUdp,
}

/// A read/write interest mask. Deliberately not `mio::Interest` so that an
/// empty mask (both bits cleared) is representable, matching "removal by
/// bitmask preserves the other [bit]" in `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const READ: Interest = Interest { read: true, write: false };
    pub const WRITE: Interest = Interest { read: false, write: true };
    pub const BOTH: Interest = Interest { read: true, write: true };

    pub fn is_empty(self) -> bool {
        !self.read && !self.write
    }

    pub fn union(self, other: Interest) -> Interest {
        Interest {
            read: self.read || other.read,
            write: self.write || other.write,
        }
    }

    /// Bits in `self` but not already in `other`.
    fn new_bits(self, other: Interest) -> Interest {
        Interest {
            read: self.read && !other.read,
            write: self.write && !other.write,
        }
    }

    /// `self` with `other`'s bits cleared.
    pub fn remove(self, other: Interest) -> Interest {
        Interest {
            read: self.read && !other.read,
            write: self.write && !other.write,
        }
    }

    fn to_mio(self) -> Option<mio::Interest> {
        match (self.read, self.write) {
            (true, true) => Some(mio::Interest::READABLE | mio::Interest::WRITABLE),
            (true, false) => Some(mio::Interest::READABLE),
            (false, true) => Some(mio::Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("out of resources registering fd {0}")]
    OutOfResources(RawFd),
    #[error("reactor wait failed: {0}")]
    WaitFailed(#[source] std::io::Error),
}

/// A resource the reactor can register: an mio I/O source plus whatever
/// raw fd it's bound to.
pub trait Registrable {
    fn raw_fd(&self) -> RawFd;
    fn source(&mut self) -> &mut dyn Source;
}

struct Entry<R> {
    resource: R,
    type_tag: TypeTag,
    interest: Interest,
}

/// The readiness-multiplexing loop described in `spec.md` §4.1.
pub struct Reactor<R> {
    poll: Poll,
    events: Events,
    table: Vec<Option<Entry<R>>>,
    read_ready: VecDeque<RawFd>,
    write_ready: VecDeque<RawFd>,
    /// Highest fd ever registered; monotone, never decreased (fd numbers
    /// are reused by the OS, so shrinking this would be unsound bookkeeping
    /// rather than useful, per §4.1 "algorithm notes").
    high_water: usize,
}

impl<R: Registrable> Reactor<R> {
    pub fn new(capacity_hint: usize) -> std::io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(1024),
            table: Vec::with_capacity(capacity_hint),
            read_ready: VecDeque::new(),
            write_ready: VecDeque::new(),
            high_water: 0,
        })
    }

    fn ensure_capacity(&mut self, fd: RawFd) {
        let idx = fd as usize;
        if idx >= self.table.len() {
            self.table.resize_with(idx + 1, || None);
        }
    }

    /// Registers `resource` for the given interest bits under `type_tag`.
    ///
    /// If `resource`'s fd is already present for any requested bit, that
    /// bit is a no-op and the already-stored `type_tag`/resource are kept
    /// (duplicate add preserves first-registered attributes); the newly
    /// passed `resource` is simply dropped in that case.
    pub fn register(
        &mut self,
        mut resource: R,
        mask: Interest,
        type_tag: TypeTag,
    ) -> Result<RawFd, ReactorError> {
        let fd = resource.raw_fd();
        self.ensure_capacity(fd);

        if let Some(entry) = self.table[fd as usize].as_mut() {
            let fresh = mask.new_bits(entry.interest);
            if !fresh.is_empty() {
                let merged = entry.interest.union(mask);
                self.poll
                    .registry()
                    .reregister(entry.resource.source(), Token(fd as usize), merged.to_mio().unwrap())
                    .map_err(|_| ReactorError::OutOfResources(fd))?;
                entry.interest = merged;
            }
            // `resource` (the caller's freshly constructed duplicate) is dropped here.
            return Ok(fd);
        }

        if let Some(mio_mask) = mask.to_mio() {
            self.poll
                .registry()
                .register(resource.source(), Token(fd as usize), mio_mask)
                .map_err(|_| ReactorError::OutOfResources(fd))?;
        }
        self.table[fd as usize] = Some(Entry {
            resource,
            type_tag,
            interest: mask,
        });
        if fd as usize >= self.high_water {
            self.high_water = fd as usize + 1;
        }
        Ok(fd)
    }

    /// Clears `mask`'s bits from `fd`'s interest. When no interest remains,
    /// the entry's `type_tag` and resource are released; if `free_data` is
    /// true the resource is dropped here, otherwise it is handed back to
    /// the caller (e.g. to re-register it under a different type_tag).
    pub fn deregister(&mut self, fd: RawFd, mask: Interest, free_data: bool) -> Option<R> {
        let idx = fd as usize;
        let entry = self.table.get_mut(idx)?.as_mut()?;
        entry.interest = entry.interest.remove(mask);
        let remaining = entry.interest;

        if remaining.is_empty() {
            let mut entry = self.table[idx].take()?;
            let _ = self.poll.registry().deregister(entry.resource.source());
            if free_data {
                drop(entry.resource);
                None
            } else {
                Some(entry.resource)
            }
        } else {
            let _ = self.poll.registry().reregister(
                entry.resource.source(),
                Token(idx),
                remaining.to_mio().unwrap(),
            );
            None
        }
    }

    /// Replaces `fd`'s interest mask wholesale (as opposed to `register`'s
    /// additive merge), used by handlers that flip between read-only and
    /// read+write as outbound data comes and goes. `mask` empty is
    /// rejected — use `deregister` to drop an entry entirely.
    pub fn modify_interest(&mut self, fd: RawFd, mask: Interest) -> Result<(), ReactorError> {
        let entry = self
            .table
            .get_mut(fd as usize)
            .and_then(|e| e.as_mut())
            .ok_or(ReactorError::OutOfResources(fd))?;
        if let Some(mio_mask) = mask.to_mio() {
            self.poll
                .registry()
                .reregister(entry.resource.source(), Token(fd as usize), mio_mask)
                .map_err(|_| ReactorError::OutOfResources(fd))?;
            entry.interest = mask;
        }
        Ok(())
    }

    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut R> {
        self.table.get_mut(fd as usize)?.as_mut().map(|e| &mut e.resource)
    }

    pub fn type_tag(&self, fd: RawFd) -> Option<TypeTag> {
        self.table.get(fd as usize)?.as_ref().map(|e| e.type_tag)
    }

    pub fn interest(&self, fd: RawFd) -> Option<Interest> {
        self.table.get(fd as usize)?.as_ref().map(|e| e.interest)
    }

    /// Blocks until at least one fd is ready or `timeout` elapses, then
    /// rebuilds the ordered read/write ready-queues. `Interrupted` errors
    /// from the OS primitive are retried internally.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<(), ReactorError> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ReactorError::WaitFailed(e)),
            }
        }

        let mut reads: Vec<RawFd> = Vec::new();
        let mut writes: Vec<RawFd> = Vec::new();
        for event in self.events.iter() {
            let fd = event.token().0 as RawFd;
            if event.is_readable() {
                reads.push(fd);
            }
            if event.is_writable() {
                writes.push(fd);
            }
        }
        // mio does not guarantee registration order; ascending-fd order is
        // the best available proxy for "first-registered first-served"
        // within a kind (§4.1), since fds in a single process are handed
        // out in increasing order between reuses.
        reads.sort_unstable();
        writes.sort_unstable();
        self.read_ready = reads.into();
        self.write_ready = writes.into();
        Ok(())
    }

    pub fn next_read(&mut self) -> Option<(RawFd, TypeTag)> {
        let fd = self.read_ready.pop_front()?;
        let tag = self.type_tag(fd)?;
        Some((fd, tag))
    }

    pub fn next_write(&mut self) -> Option<(RawFd, TypeTag)> {
        let fd = self.write_ready.pop_front()?;
        let tag = self.type_tag(fd)?;
        Some((fd, tag))
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }
}

#[cfg(test)]
mod tests;

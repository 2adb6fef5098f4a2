//! Readiness multiplexing
//!
//! Guest `poll` and `select` name guest descriptors. Both are translated into
//! a single host `select` over the corresponding real descriptors, and the
//! host's answer is translated back into guest terms. Every descriptor is
//! resolved before anything is written back, so a bad descriptor fails the
//! whole call without partial output.

use std::os::fd::RawFd;

use bitflags::bitflags;

use super::errno::Errno;
use crate::host::{DescriptorTranslator, HostFdSet, HostOps};

bitflags! {
    /// Linux poll event bits.
    ///
    /// Only `POLLIN`, `POLLOUT` and `POLLERR` are ever reported; the rest
    /// are accepted in requests and otherwise ignored.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PollEvents: i16 {
        const POLLIN = 0x001;
        const POLLPRI = 0x002;
        const POLLOUT = 0x004;
        const POLLERR = 0x008;
        const POLLHUP = 0x010;
        const POLLNVAL = 0x020;
        const POLLRDNORM = 0x040;
        const POLLRDBAND = 0x080;
        const POLLWRNORM = 0x100;
        const POLLWRBAND = 0x200;
        const POLLMSG = 0x400;
        const POLLREMOVE = 0x1000;
        const POLLRDHUP = 0x2000;
    }
}

/// Linux `struct pollfd`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollFd {
    pub fd: i32,
    pub events: i16,
    pub revents: i16,
}

impl PollFd {
    pub fn new(fd: i32, events: PollEvents) -> Self {
        Self { fd, events: events.bits(), revents: 0 }
    }

    pub fn observed(&self) -> PollEvents {
        PollEvents::from_bits_truncate(self.revents)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Interest {
    read: bool,
    write: bool,
    error: bool,
}

impl Interest {
    fn any(&self) -> bool {
        self.read || self.write || self.error
    }
}

/// The three host sets handed to one `select`, plus the highest descriptor.
struct ReadinessSets {
    read: HostFdSet,
    write: HostFdSet,
    error: HostFdSet,
    max_fd: RawFd,
}

impl ReadinessSets {
    fn new() -> Self {
        Self {
            read: HostFdSet::new(),
            write: HostFdSet::new(),
            error: HostFdSet::new(),
            max_fd: -1,
        }
    }

    fn add(&mut self, real: RawFd, interest: Interest) -> Result<(), Errno> {
        HostFdSet::check(real)?;
        if interest.read {
            self.read.insert(real)?;
        }
        if interest.write {
            self.write.insert(real)?;
        }
        if interest.error {
            self.error.insert(real)?;
        }
        self.max_fd = self.max_fd.max(real);
        Ok(())
    }

    fn wait(&mut self, host: &mut dyn HostOps, timeout: Option<&mut libc::timeval>) -> Result<usize, Errno> {
        host.select(self.max_fd + 1, &mut self.read, &mut self.write, &mut self.error, timeout)
    }

    /// Post-wait status of `real`, narrowed to what was asked for.
    fn observed(&self, real: RawFd, interest: Interest) -> Interest {
        Interest {
            read: interest.read && self.read.contains(real),
            write: interest.write && self.write.contains(real),
            error: interest.error && self.error.contains(real),
        }
    }
}

fn timeval_from_millis(timeout_ms: i32) -> Option<libc::timeval> {
    if timeout_ms < 0 {
        return None;
    }
    Some(libc::timeval {
        tv_sec: (timeout_ms / 1000) as libc::time_t,
        tv_usec: ((timeout_ms % 1000) * 1000) as libc::suseconds_t,
    })
}

/// Guest `poll(entries, nfds, timeout)`. A negative timeout waits forever.
pub fn sys_poll(
    fds: &dyn DescriptorTranslator,
    host: &mut dyn HostOps,
    entries: &mut [PollFd],
    timeout_ms: i32,
) -> Result<usize, Errno> {
    let resolved = entries
        .iter()
        .map(|entry| {
            let events = PollEvents::from_bits_truncate(entry.events);
            let interest = Interest {
                read: events.contains(PollEvents::POLLIN),
                write: events.contains(PollEvents::POLLOUT),
                error: events.contains(PollEvents::POLLERR),
            };
            fds.resolve(entry.fd).map(|real| (real, interest))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut sets = ReadinessSets::new();
    for &(real, interest) in &resolved {
        sets.add(real, interest)?;
    }

    let mut timeout = timeval_from_millis(timeout_ms);
    let ready = sets.wait(host, timeout.as_mut())?;

    for (entry, &(real, interest)) in entries.iter_mut().zip(&resolved) {
        let mut revents = PollEvents::empty();
        if ready > 0 {
            let observed = sets.observed(real, interest);
            revents.set(PollEvents::POLLIN, observed.read);
            revents.set(PollEvents::POLLOUT, observed.write);
            revents.set(PollEvents::POLLERR, observed.error);
        }
        entry.revents = revents.bits();
    }
    if ready == 0 {
        log::trace!("poll: timed out with no change");
    }
    Ok(ready)
}

const BITS_PER_WORD: usize = usize::BITS as usize;

/// A guest `fd_set`: a bitmask over register-width words.
pub struct GuestFdSet<'a> {
    words: &'a mut [usize],
}

impl<'a> GuestFdSet<'a> {
    /// View `words` as a set able to hold descriptors below `nfds`.
    pub fn new(words: &'a mut [usize], nfds: usize) -> Result<Self, Errno> {
        if words.len() * BITS_PER_WORD < nfds {
            return Err(Errno::EFAULT);
        }
        Ok(Self { words })
    }

    /// Number of words needed to cover `nfds` descriptors.
    pub fn words_for(nfds: usize) -> usize {
        nfds.div_ceil(BITS_PER_WORD)
    }

    pub fn contains(&self, fd: usize) -> bool {
        self.words
            .get(fd / BITS_PER_WORD)
            .is_some_and(|word| word & (1 << (fd % BITS_PER_WORD)) != 0)
    }

    /// The highest descriptor in the set.
    pub fn highest(&self) -> Option<usize> {
        let (index, word) = self.words.iter().enumerate().rev().find(|(_, word)| **word != 0)?;
        Some(index * BITS_PER_WORD + (BITS_PER_WORD - 1 - word.leading_zeros() as usize))
    }

    pub fn set(&mut self, fd: usize, member: bool) {
        if let Some(word) = self.words.get_mut(fd / BITS_PER_WORD) {
            let bit = 1 << (fd % BITS_PER_WORD);
            if member {
                *word |= bit;
            } else {
                *word &= !bit;
            }
        }
    }
}

fn member(set: &Option<GuestFdSet<'_>>, fd: usize) -> bool {
    set.as_ref().is_some_and(|set| set.contains(fd))
}

/// Guest `select(nfds, readfds, writefds, exceptfds, timeout)`.
///
/// The timeval is handed to the host as is, so the guest observes whatever
/// the host writes back into it. Output sets are only rewritten for
/// descriptors that appeared in some input set.
pub fn sys_select(
    fds: &dyn DescriptorTranslator,
    host: &mut dyn HostOps,
    nfds: i32,
    readfds: Option<&mut [usize]>,
    writefds: Option<&mut [usize]>,
    exceptfds: Option<&mut [usize]>,
    timeout: Option<&mut libc::timeval>,
) -> Result<usize, Errno> {
    if nfds < 0 {
        return Err(Errno::EINVAL);
    }
    let nfds = nfds as usize;
    let mut reads = readfds.map(|w| GuestFdSet::new(w, nfds)).transpose()?;
    let mut writes = writefds.map(|w| GuestFdSet::new(w, nfds)).transpose()?;
    let mut excepts = exceptfds.map(|w| GuestFdSet::new(w, nfds)).transpose()?;

    // Nothing at or above the highest member of any set needs a look.
    let scan = [&reads, &writes, &excepts]
        .into_iter()
        .filter_map(|set| set.as_ref().and_then(GuestFdSet::highest))
        .max()
        .map_or(0, |highest| (highest + 1).min(nfds));

    let mut interested: Vec<(usize, RawFd, Interest)> = Vec::new();
    let mut sets = ReadinessSets::new();
    for guest in 0..scan {
        let interest = Interest {
            read: member(&reads, guest),
            write: member(&writes, guest),
            error: member(&excepts, guest),
        };
        if !interest.any() {
            continue;
        }
        let real = fds.resolve(guest as i32)?;
        sets.add(real, interest)?;
        interested.push((guest, real, interest));
    }

    let ready = sets.wait(host, timeout)?;

    for &(guest, real, interest) in &interested {
        let status = sets.observed(real, interest);
        if let Some(set) = reads.as_mut() {
            set.set(guest, status.read);
        }
        if let Some(set) = writes.as_mut() {
            set.set(guest, status.write);
        }
        if let Some(set) = excepts.as_mut() {
            set.set(guest, status.error);
        }
    }
    Ok(ready)
}

/// `pselect6` needs an atomic signal-mask swap around the wait, which the
/// shim does not provide.
pub fn sys_pselect6() -> Result<usize, Errno> {
    Err(Errno::ENOSYS)
}

//! Descriptor relocation
//!
//! Turns a guest -> real descriptor map into the host operations that make
//! real descriptor *N* refer to what the guest has open as *N*. Planning is
//! pure; [`RelocationPlan::apply`] runs the result against [`HostOps`].
//!
//! A real descriptor is only overwritten once every entry that still needs
//! it has a copy. Copies live in numbered stash slots, duplicated above every
//! descriptor number the map mentions, and are closed at the end.

use std::os::fd::RawFd;

use crate::abi::linux::errno::Errno;
use crate::host::HostOps;

/// Where a placement reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// A host descriptor number
    Fd(RawFd),
    /// A stashed copy
    Slot(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdOp {
    /// Duplicate `fd` above the floor and remember it as `slot`.
    Stash { fd: RawFd, slot: usize },
    /// Duplicate `source` onto `target`.
    Place { source: Source, target: RawFd },
    /// Close the copy held in `slot`.
    Discard { slot: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelocationPlan {
    ops: Vec<FdOp>,
    slots: usize,
    floor: RawFd,
}

impl RelocationPlan {
    /// Plan the relocation of `map`, a list of `(guest, real)` pairs with
    /// unique guest numbers. Entries are handled in the order given.
    pub fn new(map: &[(i32, RawFd)]) -> Self {
        let mut sources: Vec<(i32, Source)> = map.iter().map(|&(guest, real)| (guest, Source::Fd(real))).collect();
        let floor = map
            .iter()
            .flat_map(|&(guest, real)| [guest, real])
            .max()
            .map_or(0, |highest| highest + 1);
        let mut ops = Vec::new();
        let mut slots = 0;

        for index in 0..sources.len() {
            let (target, source) = sources[index];
            if source == Source::Fd(target) {
                continue;
            }
            // `target` is about to be overwritten: park it for anyone else
            // still reading from it.
            let mut stashed = None;
            for (other, (_, other_source)) in sources.iter_mut().enumerate() {
                if other != index && *other_source == Source::Fd(target) {
                    let slot = *stashed.get_or_insert_with(|| {
                        ops.push(FdOp::Stash { fd: target, slot: slots });
                        slots += 1;
                        slots - 1
                    });
                    *other_source = Source::Slot(slot);
                }
            }
            ops.push(FdOp::Place { source, target });
            sources[index].1 = Source::Fd(target);
        }

        ops.extend((0..slots).map(|slot| FdOp::Discard { slot }));
        Self { ops, slots, floor }
    }

    pub fn ops(&self) -> &[FdOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Lowest descriptor number a stash copy may take.
    pub fn floor(&self) -> RawFd {
        self.floor
    }

    /// Run the plan. Stops at the first failing operation; whatever was
    /// already moved stays moved.
    pub fn apply(&self, host: &mut dyn HostOps) -> Result<(), Errno> {
        let mut stash: Vec<Option<RawFd>> = vec![None; self.slots];
        for op in &self.ops {
            match *op {
                FdOp::Stash { fd, slot } => {
                    let copy = host.dup_above(fd, self.floor)?;
                    log::trace!("relocate: stash real fd {} as {} (slot {})", fd, copy, slot);
                    stash[slot] = Some(copy);
                }
                FdOp::Place { source, target } => {
                    let fd = match source {
                        Source::Fd(fd) => fd,
                        Source::Slot(slot) => stash[slot].ok_or(Errno::EBADF)?,
                    };
                    log::trace!("relocate: real fd {} -> {}", fd, target);
                    host.dup2(fd, target)?;
                }
                FdOp::Discard { slot } => {
                    if let Some(copy) = stash[slot].take() {
                        host.close(copy)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Buffer checked out of a [`BufferArena`]. Ownership of `buffer` travels with
/// the lease (for example across the sort worker boundary); the slot stays
/// reserved until the lease is checked back in.
#[derive(Debug)]
pub struct Lease<T> {
    slot: usize,
    generation: u64,
    pub buffer: T,
}

impl<T> Lease<T> {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug)]
enum Slot<T> {
    Free(T),
    Leased { generation: u64 },
    Lost,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ArenaError {
    UnknownSlot(usize),
    NotLeased(usize),
    StaleLease { slot: usize, expected: u64, got: u64 },
}

impl std::fmt::Display for ArenaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownSlot(slot) => write!(f, "arena has no slot {slot}"),
            Self::NotLeased(slot) => write!(f, "arena slot {slot} is not leased"),
            Self::StaleLease {
                slot,
                expected,
                got,
            } => write!(
                f,
                "stale lease for slot {slot}: expected generation {expected}, got {got}"
            ),
        }
    }
}

impl std::error::Error for ArenaError {}

/// Fixed set of pre-allocated buffers. Every checkout stamps a fresh
/// generation, so a lease can only be returned to the slot it came from and
/// only once.
#[derive(Debug)]
pub struct BufferArena<T> {
    slots: Vec<Slot<T>>,
    next_generation: u64,
}

impl<T> BufferArena<T> {
    pub fn new(buffers: impl IntoIterator<Item = T>) -> Self {
        Self {
            slots: buffers.into_iter().map(Slot::Free).collect(),
            next_generation: 1,
        }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Free(_)))
            .count()
    }

    pub fn leased_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Leased { .. }))
            .count()
    }

    /// Takes the lowest free slot, or `None` when every buffer is leased or lost.
    pub fn checkout(&mut self) -> Option<Lease<T>> {
        let slot = self
            .slots
            .iter()
            .position(|slot| matches!(slot, Slot::Free(_)))?;
        let generation = self.next_generation;
        self.next_generation += 1;

        let previous = std::mem::replace(&mut self.slots[slot], Slot::Leased { generation });
        match previous {
            Slot::Free(buffer) => Some(Lease {
                slot,
                generation,
                buffer,
            }),
            _ => None,
        }
    }

    pub fn checkin(&mut self, lease: Lease<T>) -> Result<(), ArenaError> {
        let entry = self
            .slots
            .get_mut(lease.slot)
            .ok_or(ArenaError::UnknownSlot(lease.slot))?;
        let expected = match entry {
            Slot::Leased { generation } => *generation,
            _ => return Err(ArenaError::NotLeased(lease.slot)),
        };
        if expected != lease.generation {
            return Err(ArenaError::StaleLease {
                slot: lease.slot,
                expected,
                got: lease.generation,
            });
        }
        *entry = Slot::Free(lease.buffer);
        Ok(())
    }

    /// Marks a leased slot as lost, for when its holder died without
    /// returning the buffer.
    pub fn forfeit(&mut self, slot: usize) -> Result<(), ArenaError> {
        let entry = self.slots.get_mut(slot).ok_or(ArenaError::UnknownSlot(slot))?;
        if !matches!(entry, Slot::Leased { .. }) {
            return Err(ArenaError::NotLeased(slot));
        }
        *entry = Slot::Lost;
        Ok(())
    }

    /// Refills lost slots with freshly built buffers.
    pub fn replace_lost(&mut self, mut make: impl FnMut() -> T) -> usize {
        let mut replaced = 0;
        for slot in &mut self.slots {
            if matches!(slot, Slot::Lost) {
                *slot = Slot::Free(make());
                replaced += 1;
            }
        }
        replaced
    }
}

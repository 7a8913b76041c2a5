// Bounded ledger of buffers currently owned by the backend
//
// Slots are addressed by index and tagged with a generation that bumps every
// time a slot is freed, so a token handed to the backend can never match a
// later buffer that happens to reuse the same slot.

use std::fmt;

use super::{MediaPacket, StreamKind, VideoFrameDescriptor};

/// Default number of buffers that may be in flight per session
pub const DEFAULT_LEDGER_CAPACITY: usize = 64;

/// Identity of one in-flight buffer, as seen by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferToken {
    index: u32,
    generation: u32,
}

impl BufferToken {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for BufferToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// A buffer in flight
#[derive(Debug)]
pub struct BufferEntry {
    pub packet: MediaPacket,
    pub kind: StreamKind,
    /// Wrapper created at push time for semi-planar frames
    pub descriptor: Option<VideoFrameDescriptor>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<BufferEntry>,
}

/// Why a consumption signal did not match any entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMiss {
    /// Index past the end of the table
    Unknown,
    /// Slot exists but is empty
    Vacant,
    /// Slot was reused since the token was issued
    Stale { current_generation: u32 },
}

/// Slot table with a free list
#[derive(Debug)]
pub struct BufferLedger {
    slots: Vec<Slot>,
    free: Vec<u32>,
    capacity: usize,
    in_flight: usize,
}

impl BufferLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            capacity,
            in_flight: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.in_flight
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight == 0
    }

    pub fn is_full(&self) -> bool {
        self.in_flight >= self.capacity
    }

    /// Record a pushed buffer. Hands the entry back when the ledger is full.
    pub fn insert(&mut self, entry: BufferEntry) -> Result<BufferToken, BufferEntry> {
        if self.is_full() {
            return Err(entry);
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.entry = Some(entry);
        self.in_flight += 1;

        Ok(BufferToken {
            index,
            generation: slot.generation,
        })
    }

    /// Remove the entry for `token`
    pub fn release(&mut self, token: BufferToken) -> Result<BufferEntry, ReleaseMiss> {
        let slot = self
            .slots
            .get_mut(token.index as usize)
            .ok_or(ReleaseMiss::Unknown)?;

        if slot.generation != token.generation {
            return Err(ReleaseMiss::Stale {
                current_generation: slot.generation,
            });
        }

        let entry = slot.entry.take().ok_or(ReleaseMiss::Vacant)?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(token.index);
        self.in_flight -= 1;
        Ok(entry)
    }

    pub fn get(&self, token: BufferToken) -> Option<&BufferEntry> {
        self.slots
            .get(token.index as usize)
            .filter(|slot| slot.generation == token.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    /// Drop every entry, returning the packets (used when a session is torn down)
    pub fn drain(&mut self) -> Vec<MediaPacket> {
        let mut packets = Vec::with_capacity(self.in_flight);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(entry) = slot.entry.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                packets.push(entry.packet);
            }
        }
        self.in_flight = 0;
        packets
    }
}

impl Default for BufferLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pts: u64) -> BufferEntry {
        BufferEntry {
            packet: MediaPacket::audio(8000, 1, pts, vec![0u8; 16]),
            kind: StreamKind::Audio,
            descriptor: None,
        }
    }

    #[test]
    fn insert_until_full() {
        let mut ledger = BufferLedger::new(2);
        let a = ledger.insert(entry(1)).unwrap();
        let b = ledger.insert(entry(2)).unwrap();
        assert_ne!(a, b);
        assert!(ledger.is_full());

        let rejected = ledger.insert(entry(3)).unwrap_err();
        assert_eq!(rejected.packet.pts(), 3);

        // Existing entries are untouched by the rejected insert
        assert_eq!(ledger.get(a).unwrap().packet.pts(), 1);
        assert_eq!(ledger.get(b).unwrap().packet.pts(), 2);
    }

    #[test]
    fn release_returns_the_pushed_packet() {
        let mut ledger = BufferLedger::new(4);
        let token = ledger.insert(entry(42)).unwrap();
        let released = ledger.release(token).unwrap();
        assert_eq!(released.packet.pts(), 42);
        assert!(ledger.is_empty());
    }

    #[test]
    fn reused_slot_rejects_stale_token() {
        let mut ledger = BufferLedger::new(1);
        let first = ledger.insert(entry(1)).unwrap();
        ledger.release(first).unwrap();

        let second = ledger.insert(entry(2)).unwrap();
        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());

        assert_eq!(
            ledger.release(first).unwrap_err(),
            ReleaseMiss::Stale {
                current_generation: second.generation()
            }
        );
        assert_eq!(ledger.release(second).unwrap().packet.pts(), 2);
    }

    #[test]
    fn double_release_is_reported() {
        let mut ledger = BufferLedger::new(2);
        let token = ledger.insert(entry(1)).unwrap();
        ledger.release(token).unwrap();
        assert!(matches!(ledger.release(token), Err(ReleaseMiss::Stale { .. })));
    }

    #[test]
    fn unknown_index() {
        let mut ledger = BufferLedger::new(2);
        let token = BufferToken {
            index: 7,
            generation: 0,
        };
        assert_eq!(ledger.release(token).unwrap_err(), ReleaseMiss::Unknown);
    }

    #[test]
    fn drain_frees_every_slot() {
        let mut ledger = BufferLedger::new(3);
        for pts in 0..3 {
            ledger.insert(entry(pts)).unwrap();
        }
        let packets = ledger.drain();
        assert_eq!(packets.len(), 3);
        assert!(ledger.is_empty());
        assert!(ledger.insert(entry(9)).is_ok());
    }
}

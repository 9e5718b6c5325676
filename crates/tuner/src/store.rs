//! Endpoint interval store
//!
//! Fixed-capacity table of endpoints whose interval was overwritten during
//! the current patch cycle, keyed by endpoint address.

use tracing::warn;

/// Maximum endpoints tracked per device (one interrupt IN, one interrupt OUT)
pub const MAX_PATCHED_ENDPOINTS: usize = 2;

/// Original interval of one patched endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointRestoreEntry {
    pub address: u8,
    pub original_interval: u8,
}

/// Restore table for the current patch generation
#[derive(Debug, Clone, Default)]
pub struct IntervalStore {
    entries: [Option<EndpointRestoreEntry>; MAX_PATCHED_ENDPOINTS],
}

impl IntervalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the pre-patch interval of an endpoint.
    ///
    /// Returns `false` when the table is full; the caller must then leave the
    /// endpoint untouched. An existing entry for the same address is kept.
    pub fn record_original(&mut self, address: u8, value: u8) -> bool {
        if self.position(address).is_some() {
            return true;
        }

        match self.entries.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(EndpointRestoreEntry {
                    address,
                    original_interval: value,
                });
                true
            }
            None => {
                warn!(
                    "Interval store full ({} entries), cannot record EP {:#04x}",
                    MAX_PATCHED_ENDPOINTS, address
                );
                false
            }
        }
    }

    pub fn lookup_original(&self, address: u8) -> Option<u8> {
        self.position(address)
            .and_then(|idx| self.entries[idx])
            .map(|entry| entry.original_interval)
    }

    /// Remove and return the original interval of an endpoint
    pub fn take_original(&mut self, address: u8) -> Option<u8> {
        let idx = self.position(address)?;
        self.entries[idx].take().map(|entry| entry.original_interval)
    }

    /// Start a new generation
    pub fn clear(&mut self) {
        self.entries = [None; MAX_PATCHED_ENDPOINTS];
    }

    pub fn has_capacity(&self) -> bool {
        self.len() < MAX_PATCHED_ENDPOINTS
    }

    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> impl Iterator<Item = &EndpointRestoreEntry> {
        self.entries.iter().flatten()
    }

    fn position(&self, address: u8) -> Option<usize> {
        self.entries
            .iter()
            .position(|slot| slot.is_some_and(|entry| entry.address == address))
    }
}

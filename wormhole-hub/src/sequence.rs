use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide allocator for command correlation keys.
///
/// The first value handed out is 1; 0 is reserved for registration outcomes
/// and never allocated.
#[derive(Debug, Default)]
pub struct Sequencer(AtomicU64);

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        let next = self.0.fetch_add(1, Ordering::Relaxed) + 1;

        // Wrapping a u64 back to the reserved value takes ~10^19 commands.
        debug_assert_ne!(next, 0, "sequence counter overflow");
        next
    }
}

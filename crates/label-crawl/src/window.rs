//! Confirmation-windowed block ranges.
//!
//! The crawler never reads a block newer than `head - confirmations`.

/// Blocks kept between the crawl window and the chain head.
pub const DEFAULT_CONFIRMATIONS: u64 = 10;

/// Blocks past the cursor covered by one window.
pub const DEFAULT_BATCH_SIZE: u64 = 5;

/// Result of asking for the next range to crawl.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Window {
    /// `[start, end]` is confirmed and can be read.
    Ready { start: u64, end: u64 },
    /// The head has not moved far enough past the cursor.
    Stalled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfirmationWindow {
    pub confirmations: u64,
    pub batch_size: u64,
}

impl ConfirmationWindow {
    pub fn new(confirmations: u64, batch_size: u64) -> Self {
        Self {
            confirmations,
            batch_size,
        }
    }

    /// Highest block that may be read, `None` while the chain is shorter
    /// than the confirmation depth.
    pub fn safe_head(&self, head: u64) -> Option<u64> {
        head.checked_sub(self.confirmations)
    }

    /// `end = min(head - confirmations, cursor + batch_size)`; stalled when
    /// `end < cursor`.
    pub fn next(&self, cursor: u64, head: u64) -> Window {
        let Some(safe_head) = self.safe_head(head) else {
            return Window::Stalled;
        };
        let end = safe_head.min(cursor.saturating_add(self.batch_size));
        if end < cursor {
            Window::Stalled
        } else {
            Window::Ready { start: cursor, end }
        }
    }
}

impl Default for ConfirmationWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRMATIONS, DEFAULT_BATCH_SIZE)
    }
}

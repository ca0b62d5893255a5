//! Byte ceiling over the working set of one index build.

/// Default ceiling on chunk bytes held by one index build (64 MiB).
pub const DEFAULT_MAX_BYTES: usize = 64 * 1024 * 1024;

/// Default cap on the number of candidate documents per build.
pub const DEFAULT_CANDIDATE_LIMIT: usize = 500;

/// Tracks bytes admitted into an index build against a fixed ceiling.
///
/// The counters are the only state that survives between queries and are
/// reset by [`MemoryBudget::clear`] at the start of every build.
#[derive(Debug, Clone)]
pub struct MemoryBudget {
    max_bytes: usize,
    candidate_limit: usize,
    used_bytes: usize,
    admitted: usize,
    rejected: usize,
}

impl MemoryBudget {
    pub fn new(max_bytes: usize, candidate_limit: usize) -> Self {
        Self {
            max_bytes,
            candidate_limit: candidate_limit.max(1),
            used_bytes: 0,
            admitted: 0,
            rejected: 0,
        }
    }

    /// Reserve `bytes` if they fit under the ceiling.
    pub fn try_reserve(&mut self, bytes: usize) -> bool {
        match self.used_bytes.checked_add(bytes) {
            Some(total) if total <= self.max_bytes => {
                self.used_bytes = total;
                self.admitted += 1;
                true
            }
            _ => {
                self.rejected += 1;
                false
            }
        }
    }

    pub fn used(&self) -> usize {
        self.used_bytes
    }

    pub fn remaining(&self) -> usize {
        self.max_bytes.saturating_sub(self.used_bytes)
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn candidate_limit(&self) -> usize {
        self.candidate_limit
    }

    /// Number of successful reservations since the last clear.
    pub fn admitted(&self) -> usize {
        self.admitted
    }

    /// Number of refused reservations since the last clear.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    pub fn is_exhausted(&self) -> bool {
        self.rejected > 0 || self.used_bytes >= self.max_bytes
    }

    pub fn clear(&mut self) {
        self.used_bytes = 0;
        self.admitted = 0;
        self.rejected = 0;
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BYTES, DEFAULT_CANDIDATE_LIMIT)
    }
}

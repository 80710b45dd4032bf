use std::collections::BTreeSet;
use std::sync::Mutex;

pub const DEFAULT_RTP_PORT_RANGE: (u16, u16) = (20_000, 20_200);

/// Allocator for server-side RTP/RTCP port pairs.
///
/// Pairs are (even RTP, odd RTCP). Released pairs are recycled before
/// the range grows.
pub struct PortPool {
    inner: Mutex<Inner>,
}

struct Inner {
    next: u16,
    end: u16,
    /// RTP ports freed by torn-down sessions
    free: BTreeSet<u16>,
}

impl PortPool {
    pub fn new(start: u16, end: u16) -> Self {
        // RTP convention wants the pair to start on an even port
        let start = start + (start & 1);
        Self {
            inner: Mutex::new(Inner {
                next: start,
                end,
                free: BTreeSet::new(),
            }),
        }
    }

    pub fn allocate_pair(&self) -> Option<(u16, u16)> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&rtp) = inner.free.iter().next() {
            inner.free.remove(&rtp);
            return Some((rtp, rtp + 1));
        }
        if inner.next + 1 > inner.end {
            return None;
        }
        let rtp = inner.next;
        inner.next += 2;
        Some((rtp, rtp + 1))
    }

    pub fn release_pair(&self, rtp: u16) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.free.insert(rtp);
    }
}

impl Default for PortPool {
    fn default() -> Self {
        Self::new(DEFAULT_RTP_PORT_RANGE.0, DEFAULT_RTP_PORT_RANGE.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_even_odd_pairs_sequentially() {
        let pool = PortPool::new(20_000, 20_010);
        assert_eq!(pool.allocate_pair(), Some((20_000, 20_001)));
        assert_eq!(pool.allocate_pair(), Some((20_002, 20_003)));
        assert_eq!(pool.allocate_pair(), Some((20_004, 20_005)));
    }

    #[test]
    fn recycles_released_pairs() {
        let pool = PortPool::new(20_000, 20_010);
        assert_eq!(pool.allocate_pair(), Some((20_000, 20_001)));
        assert_eq!(pool.allocate_pair(), Some((20_002, 20_003)));
        pool.release_pair(20_000);
        // Reuses 20000 before growing the range
        assert_eq!(pool.allocate_pair(), Some((20_000, 20_001)));
        assert_eq!(pool.allocate_pair(), Some((20_004, 20_005)));
    }

    #[test]
    fn odd_start_is_rounded_up() {
        let pool = PortPool::new(20_001, 20_010);
        assert_eq!(pool.allocate_pair(), Some((20_002, 20_003)));
    }

    #[test]
    fn exhausted_range_returns_none() {
        let pool = PortPool::new(20_000, 20_003);
        assert_eq!(pool.allocate_pair(), Some((20_000, 20_001)));
        assert_eq!(pool.allocate_pair(), Some((20_002, 20_003)));
        assert_eq!(pool.allocate_pair(), None);
        pool.release_pair(20_002);
        assert_eq!(pool.allocate_pair(), Some((20_002, 20_003)));
    }
}

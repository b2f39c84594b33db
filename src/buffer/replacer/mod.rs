//! Eviction order for the page cache.
//!
//! - [`SlotQueue`] - Index-linked queue of resident slots
//! - [`EvictionPolicy`] - Whether accesses reorder the queue

mod queue;

pub use queue::SlotQueue;

/// How the cache picks its eviction victim.
///
/// Both policies evict from the back of the [`SlotQueue`]; they differ in
/// whether a cache hit moves the slot to the front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Least recently used: hits promote the slot.
    #[default]
    Lru,
    /// First in, first out: slots keep their arrival order.
    Fifo,
}

impl EvictionPolicy {
    #[inline]
    pub fn promotes_on_access(self) -> bool {
        matches!(self, EvictionPolicy::Lru)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_lru() {
        assert_eq!(EvictionPolicy::default(), EvictionPolicy::Lru);
        assert!(EvictionPolicy::Lru.promotes_on_access());
        assert!(!EvictionPolicy::Fifo.promotes_on_access());
    }
}

//! Square size buckets

use serde::{Deserialize, Serialize};

use crate::core::{CoreError, CoreResult, Dimensions};

/// A provider's finite, ascending set of supported square edge lengths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeBuckets(Vec<u32>);

impl SizeBuckets {
    /// Builds a bucket set; the edges are sorted and deduplicated
    pub fn new(mut edges: Vec<u32>) -> CoreResult<Self> {
        edges.retain(|e| *e > 0);
        edges.sort_unstable();
        edges.dedup();

        if edges.is_empty() {
            return Err(CoreError::InvalidRequest(
                "Size bucket set cannot be empty".to_string(),
            ));
        }

        Ok(Self(edges))
    }

    pub fn edges(&self) -> &[u32] {
        &self.0
    }

    /// Largest bucket not above the requested longest edge, clamped to the
    /// smallest bucket. Always square.
    pub fn negotiate(&self, requested: Dimensions) -> Dimensions {
        let longest = requested.max_edge();
        let edge = self
            .0
            .iter()
            .rev()
            .find(|edge| **edge <= longest)
            .or_else(|| self.0.first())
            .copied()
            .unwrap_or(longest);

        Dimensions::square(edge)
    }

    pub fn contains(&self, edge: u32) -> bool {
        self.0.binary_search(&edge).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dalle_buckets() -> SizeBuckets {
        SizeBuckets::new(vec![256, 512, 1024]).unwrap()
    }

    #[test]
    fn test_negotiate_picks_largest_bucket_below() {
        let buckets = dalle_buckets();
        assert_eq!(
            buckets.negotiate(Dimensions::new(900, 900)),
            Dimensions::square(512)
        );
    }

    #[test]
    fn test_negotiate_clamps_to_largest() {
        assert_eq!(
            dalle_buckets().negotiate(Dimensions::new(2000, 2000)),
            Dimensions::square(1024)
        );
    }

    #[test]
    fn test_negotiate_clamps_to_smallest() {
        assert_eq!(
            dalle_buckets().negotiate(Dimensions::new(100, 100)),
            Dimensions::square(256)
        );
    }

    #[test]
    fn test_negotiate_exact_match_is_idempotent() {
        let buckets = dalle_buckets();
        let once = buckets.negotiate(Dimensions::new(512, 512));
        assert_eq!(once, Dimensions::square(512));
        assert_eq!(buckets.negotiate(once), once);
    }

    #[test]
    fn test_negotiate_uses_longest_edge() {
        assert_eq!(
            dalle_buckets().negotiate(Dimensions::new(1100, 300)),
            Dimensions::square(1024)
        );
        assert_eq!(
            dalle_buckets().negotiate(Dimensions::new(300, 600)),
            Dimensions::square(512)
        );
    }

    #[test]
    fn test_buckets_sorted_and_deduped() {
        let buckets = SizeBuckets::new(vec![1024, 256, 512, 256]).unwrap();
        assert_eq!(buckets.edges(), &[256, 512, 1024]);
        assert!(buckets.contains(512));
        assert!(!buckets.contains(300));
    }

    #[test]
    fn test_empty_buckets_rejected() {
        assert!(SizeBuckets::new(vec![]).is_err());
        assert!(SizeBuckets::new(vec![0]).is_err());
    }
}

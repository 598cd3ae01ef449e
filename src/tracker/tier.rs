//! BEP-12 multi-tier announce-list handling: shuffle each tier once at
//! load time, try its trackers in order, and promote whichever one just
//! worked to the front of its tier so it's tried first next time.
use rand::seq::SliceRandom;
use tracing::warn;

use super::transport::{Deadline, TrackerTransport};
use super::{AnnounceParams, AnnounceResult, TrackerResult};

/// Owns the announce-list tiers for one torrent and the connected
/// transport for whichever tracker last answered.
pub struct TierManager {
    tiers: Vec<Vec<String>>,
}

impl TierManager {
    /// Builds a tier manager from a torrent's `announce-list` (or, absent
    /// that, a single tier containing just its `announce` URL), shuffling
    /// each tier's order once up front per BEP-12.
    pub fn new(announce: &str, announce_list: &[Vec<String>]) -> Self {
        let mut tiers: Vec<Vec<String>> = if announce_list.is_empty() {
            vec![vec![announce.to_string()]]
        } else {
            announce_list.to_vec()
        };
        let mut rng = rand::rng();
        for tier in &mut tiers {
            tier.shuffle(&mut rng);
        }
        Self { tiers }
    }

    /// Tries every tracker in every tier, in order, until one answers an
    /// announce request successfully. On success, that tracker is moved to
    /// the front of its tier so it's tried first on the next announce.
    /// `deadline`, if set, bounds each individual tracker attempt (not the
    /// whole walk across tiers) per spec's per-transport cancellation rule.
    pub async fn announce(&mut self, params: &AnnounceParams, deadline: Deadline) -> TrackerResult<AnnounceResult> {
        for tier in &mut self.tiers {
            for idx in 0..tier.len() {
                let url = tier[idx].clone();
                match try_announce(&url, params, deadline).await {
                    Ok(result) => {
                        let promoted = tier.remove(idx);
                        tier.insert(0, promoted);
                        return Ok(result);
                    }
                    Err(err) => {
                        warn!(tracker = %url, error = %err, "tracker announce failed, trying next");
                    }
                }
            }
        }
        Err(super::TrackerError::AllTiersFailed)
    }

    pub fn tiers(&self) -> &[Vec<String>] {
        &self.tiers
    }
}

async fn try_announce(url: &str, params: &AnnounceParams, deadline: Deadline) -> TrackerResult<AnnounceResult> {
    let mut transport = TrackerTransport::connect(url, deadline).await?;
    transport.announce(params, deadline).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_single_tier_without_announce_list() {
        let tm = TierManager::new("http://a.example/announce", &[]);
        assert_eq!(tm.tiers().len(), 1);
        assert_eq!(tm.tiers()[0], vec!["http://a.example/announce".to_string()]);
    }

    #[test]
    fn preserves_tier_membership_while_shuffling_order() {
        let list = vec![
            vec!["http://a.example/announce".to_string(), "http://b.example/announce".to_string()],
            vec!["udp://c.example:80".to_string()],
        ];
        let tm = TierManager::new("http://unused/announce", &list);
        assert_eq!(tm.tiers().len(), 2);
        let mut first_tier = tm.tiers()[0].clone();
        first_tier.sort();
        assert_eq!(
            first_tier,
            vec!["http://a.example/announce".to_string(), "http://b.example/announce".to_string()]
        );
        assert_eq!(tm.tiers()[1], vec!["udp://c.example:80".to_string()]);
    }
}

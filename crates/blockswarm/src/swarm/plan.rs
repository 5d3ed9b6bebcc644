//! Deciding how many blocks a file has, and which peer sends which block.
use std::net::SocketAddr;

use crate::{error::Error, wire::Holder};

/// One block count reported by the holders of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub block_count: u32,
    /// How many holders reported this count.
    pub peers: usize,
}

/// Picks the block count of a file when its holders disagree.
///
/// `candidates` is never empty, has no duplicate count and is sorted by
/// count. Returning `None` abandons the download.
pub trait BlockCountChooser: Send + Sync {
    fn choose(&self, filename: &str, candidates: &[Candidate]) -> Option<u32>;
}

impl<F> BlockCountChooser for F
where
    F: Fn(&str, &[u32]) -> Option<u32> + Send + Sync,
{
    fn choose(&self, filename: &str, candidates: &[Candidate]) -> Option<u32> {
        let counts: Vec<u32> = candidates.iter().map(|c| c.block_count).collect();
        self(filename, &counts)
    }
}

/// Always use the same count, whatever the holders report.
#[derive(Debug, Clone, Copy)]
pub struct FixedCount(pub u32);

impl BlockCountChooser for FixedCount {
    fn choose(&self, _filename: &str, _candidates: &[Candidate]) -> Option<u32> {
        Some(self.0)
    }
}

/// Use the count reported by the most holders, the larger count on a tie.
#[derive(Debug, Clone, Copy, Default)]
pub struct MostReported;

impl BlockCountChooser for MostReported {
    fn choose(&self, _filename: &str, candidates: &[Candidate]) -> Option<u32> {
        candidates
            .iter()
            .max_by_key(|c| (c.peers, c.block_count))
            .map(|c| c.block_count)
    }
}

/// What the holders of a file agree on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Every holder that reported a count reported this one.
    Unique(u32),
    /// Distinct counts, sorted.
    Ambiguous(Vec<Candidate>),
}

/// Collect the distinct counts reported by `holders`, ignoring the holders
/// without a count. `None` if no holder has a count.
pub fn resolve_counts(holders: &[Holder]) -> Option<Resolution> {
    let mut candidates: Vec<Candidate> = Vec::new();

    for count in holders.iter().filter_map(|h| h.block_count) {
        match candidates.iter_mut().find(|c| c.block_count == count) {
            Some(c) => c.peers += 1,
            None => candidates.push(Candidate { block_count: count, peers: 1 }),
        }
    }

    candidates.sort_by_key(|c| c.block_count);

    match candidates.len() {
        0 => None,
        1 => Some(Resolution::Unique(candidates[0].block_count)),
        _ => Some(Resolution::Ambiguous(candidates)),
    }
}

/// The block count to download, asking `chooser` only if the holders
/// disagree.
pub fn choose_block_count<C>(
    filename: &str,
    holders: &[Holder],
    chooser: &C,
) -> Result<u32, Error>
where
    C: BlockCountChooser + ?Sized,
{
    match resolve_counts(holders) {
        None => Err(Error::NoConsensus(filename.to_owned())),
        Some(Resolution::Unique(n)) => Ok(n),
        Some(Resolution::Ambiguous(candidates)) => chooser
            .choose(filename, &candidates)
            .ok_or_else(|| Error::NoConsensus(filename.to_owned())),
    }
}

/// The blocks one peer is asked for, ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub addr: SocketAddr,
    pub indices: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    pub block_count: u32,
    /// In the order of the holders, peers without any block are left out.
    pub assignments: Vec<Assignment>,
}

impl DownloadPlan {
    /// Spread the blocks over the holders that reported `block_count`:
    /// block `i` goes to the compatible holder number `i mod k`.
    pub fn round_robin(
        filename: &str,
        block_count: u32,
        holders: &[Holder],
    ) -> Result<Self, Error> {
        let compatible: Vec<SocketAddr> = holders
            .iter()
            .filter(|h| h.block_count == Some(block_count))
            .map(|h| h.addr)
            .collect();

        if compatible.is_empty() {
            return Err(Error::NoCompatiblePeer(filename.to_owned(), block_count));
        }

        let k = compatible.len();
        let mut assignments: Vec<Assignment> = compatible
            .into_iter()
            .map(|addr| Assignment { addr, indices: Vec::new() })
            .collect();

        for index in 0..block_count {
            assignments[index as usize % k].indices.push(index);
        }

        assignments.retain(|a| !a.indices.is_empty());

        Ok(Self { block_count, assignments })
    }

    pub fn peer_count(&self) -> usize {
        self.assignments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holder(port: u16, count: Option<u32>) -> Holder {
        Holder { addr: SocketAddr::from(([127, 0, 0, 1], port)), block_count: count }
    }

    #[test]
    fn unique_count() {
        let holders = [holder(1, Some(3)), holder(2, Some(3)), holder(3, None)];
        assert_eq!(resolve_counts(&holders), Some(Resolution::Unique(3)));
        assert_eq!(choose_block_count("f", &holders, &MostReported).unwrap(), 3);
    }

    #[test]
    fn no_count_is_no_consensus() {
        assert_eq!(resolve_counts(&[]), None);

        let holders = [holder(1, None)];
        assert!(matches!(
            choose_block_count("f", &holders, &MostReported),
            Err(Error::NoConsensus(_))
        ));
    }

    #[test]
    fn ambiguous_counts_go_to_the_chooser() {
        let holders = [holder(1, Some(5)), holder(2, Some(3)), holder(3, Some(5))];

        let expected = vec![
            Candidate { block_count: 3, peers: 1 },
            Candidate { block_count: 5, peers: 2 },
        ];
        assert_eq!(resolve_counts(&holders), Some(Resolution::Ambiguous(expected)));

        assert_eq!(choose_block_count("f", &holders, &MostReported).unwrap(), 5);
        assert_eq!(choose_block_count("f", &holders, &FixedCount(3)).unwrap(), 3);

        let smallest = |_: &str, counts: &[u32]| counts.first().copied();
        assert_eq!(choose_block_count("f", &holders, &smallest).unwrap(), 3);

        let decline = |_: &str, _: &[u32]| -> Option<u32> { None };
        assert!(matches!(
            choose_block_count("f", &holders, &decline),
            Err(Error::NoConsensus(_))
        ));
    }

    #[test]
    fn most_reported_tie_takes_the_larger() {
        let candidates = [
            Candidate { block_count: 3, peers: 2 },
            Candidate { block_count: 4, peers: 2 },
            Candidate { block_count: 9, peers: 1 },
        ];
        assert_eq!(MostReported.choose("f", &candidates), Some(4));
    }

    #[test]
    fn round_robin_is_a_partition() {
        for n in [0u32, 1, 2, 3, 10, 11, 1000] {
            let holders = [holder(1, Some(n)), holder(2, Some(n + 1)), holder(3, Some(n)), holder(4, Some(n))];
            let plan = DownloadPlan::round_robin("f", n, &holders).unwrap();

            let mut all: Vec<u32> = plan.assignments.iter().flat_map(|a| a.indices.clone()).collect();
            all.sort();
            assert_eq!(all, (0..n).collect::<Vec<_>>());

            let sizes: Vec<usize> = plan.assignments.iter().map(|a| a.indices.len()).collect();
            if let (Some(min), Some(max)) = (sizes.iter().min(), sizes.iter().max()) {
                assert!(max - min <= 1);
                assert!(*min > 0);
            }
            assert!(plan.assignments.iter().all(|a| a.addr.port() != 2));
        }
    }

    #[test]
    fn round_robin_order() {
        let holders = [holder(1, Some(5)), holder(2, Some(5))];
        let plan = DownloadPlan::round_robin("f", 5, &holders).unwrap();

        assert_eq!(plan.peer_count(), 2);
        assert_eq!(plan.assignments[0].addr.port(), 1);
        assert_eq!(plan.assignments[0].indices, vec![0, 2, 4]);
        assert_eq!(plan.assignments[1].indices, vec![1, 3]);
    }

    #[test]
    fn no_compatible_peer() {
        let holders = [holder(1, Some(5))];
        assert!(matches!(
            DownloadPlan::round_robin("f", 6, &holders),
            Err(Error::NoCompatiblePeer(_, 6))
        ));
    }
}

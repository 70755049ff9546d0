use crate::pool::CandidatePool;
use crate::portfolio::Combination;

/// Caps how many securities of one sector a combination may hold.
#[derive(Debug, Clone, Copy)]
pub struct DiversificationFilter<'a> {
    pool: &'a CandidatePool,
    max_per_sector: usize,
}

impl<'a> DiversificationFilter<'a> {
    pub fn new(pool: &'a CandidatePool, max_per_sector: usize) -> Self {
        DiversificationFilter {
            pool,
            max_per_sector,
        }
    }

    pub fn max_per_sector(&self) -> usize {
        self.max_per_sector
    }

    pub fn is_valid(&self, combination: &Combination) -> bool {
        self.is_valid_indices(combination.indices())
    }

    pub fn is_valid_indices(&self, indices: &[usize]) -> bool {
        self.sector_counts(indices)
            .iter()
            .all(|&count| count <= self.max_per_sector)
    }

    /// Whether `candidate` could join `indices` without breaking the cap.
    pub fn can_add(&self, indices: &[usize], candidate: usize) -> bool {
        let sector = self.pool.sector_id(candidate);
        indices
            .iter()
            .filter(|&&idx| self.pool.sector_id(idx) == sector)
            .count()
            < self.max_per_sector
    }

    pub fn sector_counts(&self, indices: &[usize]) -> Vec<usize> {
        let mut counts = vec![0usize; self.pool.sector_count()];
        indices
            .iter()
            .for_each(|&idx| counts[self.pool.sector_id(idx)] += 1);
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Security;
    use itertools::Itertools;

    fn pool() -> CandidatePool {
        let sectors = ["Tech", "Tech", "Energy", "Energy", "Health", "Health", "Tech"];
        CandidatePool::new(
            sectors
                .iter()
                .enumerate()
                .map(|(i, sector)| Security {
                    ticker: format!("T{}", i),
                    sector: sector.to_string(),
                    score: 1.,
                    returns: vec![0.01 * i as f64, 0.02, -0.01],
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_accepts_and_rejects_by_sector_count() {
        let pool = pool();
        let filter = DiversificationFilter::new(&pool, 2);
        for indices in (0..pool.len()).combinations(4) {
            let counts = filter.sector_counts(&indices);
            let combination = Combination::new(indices);
            if filter.is_valid(&combination) {
                assert!(counts.iter().all(|&c| c <= 2));
            } else {
                assert!(counts.iter().any(|&c| c > 2));
            }
        }
        assert!(!filter.is_valid(&Combination::new(vec![0, 1, 6])));
        assert!(filter.is_valid(&Combination::new(vec![0, 1, 2])));
    }

    #[test]
    fn test_can_add() {
        let pool = pool();
        let filter = DiversificationFilter::new(&pool, 2);
        assert!(filter.can_add(&[0, 2], 1));
        assert!(!filter.can_add(&[0, 1], 6));
    }
}

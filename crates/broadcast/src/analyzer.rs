//! Maximum disjoint path set search.
//!
//! Two observed paths are compatible when they are node-disjoint apart from
//! their shared origin. The largest set of pairwise compatible paths is a
//! maximum clique of the compatibility graph, which is searched exactly with
//! branch and bound over `u64` bitmasks.

use dolev_types::Path;

/// Largest input the analyzer looks at. Paths past this index are ignored.
pub const MAX_ANALYZED_PATHS: usize = 64;

/// Exact disjoint path analysis.
///
/// Worst case is exponential in the number of paths, which the broadcaster
/// keeps small (dominated paths pruned, at most [`MAX_ANALYZED_PATHS`] kept).
/// Results never exceed the true maximum: only the first
/// [`MAX_ANALYZED_PATHS`] entries are considered, and a subset can only have
/// a smaller or equal answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisjointPathAnalyzer;

impl DisjointPathAnalyzer {
    /// Size of the largest pairwise disjoint subset of `paths`. Empty input gives 0.
    pub fn max_disjoint_set_size(paths: &[Path]) -> usize {
        Search::new(paths, None).run().count_ones() as usize
    }

    /// Check whether more than `threshold` pairwise disjoint paths exist.
    ///
    /// Stops as soon as such a set is found.
    pub fn exceeds(paths: &[Path], threshold: usize) -> bool {
        Search::new(paths, Some(threshold)).run().count_ones() as usize > threshold
    }

    /// Indices (ascending) of one maximum pairwise disjoint subset.
    pub fn find_disjoint_set(paths: &[Path]) -> Vec<usize> {
        let set = Search::new(paths, None).run();
        (0..MAX_ANALYZED_PATHS)
            .filter(|&i| set & (1u64 << i) != 0)
            .collect()
    }

    /// Pairwise compatibility: disjoint, and not the same path twice.
    pub fn compatible(a: &Path, b: &Path) -> bool {
        a != b && a.disjoint_from(b)
    }
}

struct Search {
    compat: Vec<u64>,
    best: u64,
    best_size: usize,
    stop_above: Option<usize>,
}

impl Search {
    fn new(paths: &[Path], stop_above: Option<usize>) -> Self {
        let paths = &paths[..paths.len().min(MAX_ANALYZED_PATHS)];
        let compat = paths
            .iter()
            .enumerate()
            .map(|(i, a)| {
                paths
                    .iter()
                    .enumerate()
                    .filter(|&(j, b)| i != j && DisjointPathAnalyzer::compatible(a, b))
                    .fold(0u64, |mask, (j, _)| mask | (1u64 << j))
            })
            .collect();

        Self {
            compat,
            best: 0,
            best_size: 0,
            stop_above,
        }
    }

    fn all(&self) -> u64 {
        match self.compat.len() {
            0 => 0,
            MAX_ANALYZED_PATHS => u64::MAX,
            n => (1u64 << n) - 1,
        }
    }

    fn run(mut self) -> u64 {
        self.seed_greedy();
        if !self.done() {
            let all = self.all();
            self.expand(0, 0, all);
        }
        self.best
    }

    /// Lower bound: take paths in order of most compatible neighbours.
    fn seed_greedy(&mut self) {
        let mut order: Vec<usize> = (0..self.compat.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.compat[i].count_ones()));

        let mut chosen = 0u64;
        let mut allowed = self.all();
        for i in order {
            if allowed & (1u64 << i) != 0 {
                chosen |= 1u64 << i;
                allowed &= self.compat[i];
            }
        }
        self.record(chosen);
    }

    fn record(&mut self, set: u64) {
        let size = set.count_ones() as usize;
        if size > self.best_size {
            self.best = set;
            self.best_size = size;
        }
    }

    fn done(&self) -> bool {
        self.stop_above.is_some_and(|t| self.best_size > t)
    }

    /// Returns true once the caller's threshold has been exceeded.
    fn expand(&mut self, chosen: u64, size: usize, mut candidates: u64) -> bool {
        self.record(chosen);
        if self.done() {
            return true;
        }
        while candidates != 0 {
            if size + candidates.count_ones() as usize <= self.best_size {
                return false;
            }
            let i = candidates.trailing_zeros();
            candidates &= !(1u64 << i);
            if self.expand(chosen | (1u64 << i), size + 1, candidates & self.compat[i as usize]) {
                return true;
            }
        }
        false
    }
}

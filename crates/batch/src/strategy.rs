//! Parallel execution strategies for whole jobs

use crate::error::Result;
use rayon::prelude::*;

/// How a batch of jobs is scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcessingMode {
    /// One job at a time
    Sequential,
    /// Jobs spread over the global rayon pool
    #[default]
    Parallel,
    /// Jobs spread over a dedicated pool with this many threads
    ParallelWith(usize),
}

impl ProcessingMode {
    /// Apply `f` to every item, keeping input order in the output
    pub fn map<T, U, F>(&self, items: &[T], f: F) -> Result<Vec<U>>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        match self {
            ProcessingMode::Sequential => Ok(items.iter().map(f).collect()),
            ProcessingMode::Parallel => Ok(items.par_iter().map(f).collect()),
            ProcessingMode::ParallelWith(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(*threads)
                    .build()?;
                Ok(pool.install(|| items.par_iter().map(f).collect()))
            }
        }
    }

    /// Threads the mode runs on
    pub fn threads(&self) -> usize {
        match self {
            ProcessingMode::Sequential => 1,
            ProcessingMode::Parallel => num_cpus(),
            ProcessingMode::ParallelWith(n) => *n,
        }
    }
}

/// Get the number of available CPU cores
pub fn num_cpus() -> usize {
    rayon::current_num_threads()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modes_agree() {
        let items: Vec<usize> = (0..100).collect();
        let expected: Vec<usize> = items.iter().map(|i| i * i).collect();
        for mode in [
            ProcessingMode::Sequential,
            ProcessingMode::Parallel,
            ProcessingMode::ParallelWith(3),
        ] {
            assert_eq!(mode.map(&items, |i| i * i).unwrap(), expected);
        }
    }

    #[test]
    fn test_threads() {
        assert_eq!(ProcessingMode::Sequential.threads(), 1);
        assert_eq!(ProcessingMode::ParallelWith(4).threads(), 4);
        assert!(ProcessingMode::Parallel.threads() >= 1);
    }
}

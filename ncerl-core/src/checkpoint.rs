//! Schedule of step thresholds at which the policy is saved.
use crate::error::NcerlError;
use anyhow::Result;
use std::{cmp::Reverse, collections::BinaryHeap};

/// Step thresholds, popped in ascending order.
///
/// ```rust
/// use ncerl_core::CheckpointSchedule;
///
/// let mut schedule = CheckpointSchedule::new(vec![100, 50, 200]).unwrap();
/// assert_eq!(schedule.remaining(), vec![200, 100, 50]);
/// assert_eq!(schedule.pop_due(40), None);
/// assert_eq!(schedule.pop_due(60), Some(50));
/// assert_eq!(schedule.remaining(), vec![200, 100]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CheckpointSchedule(BinaryHeap<Reverse<usize>>);

impl CheckpointSchedule {
    /// Builds a schedule from thresholds given in any order.
    ///
    /// Duplicated thresholds are rejected.
    pub fn new(thresholds: Vec<usize>) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(thresholds.len());
        for t in thresholds {
            if heap.iter().any(|&Reverse(x)| x == t) {
                return Err(NcerlError::InvalidConfig(format!(
                    "duplicated checkpoint threshold {}",
                    t
                ))
                .into());
            }
            heap.push(Reverse(t));
        }
        Ok(Self(heap))
    }

    /// Pops the smallest threshold if `steps` reached it.
    ///
    /// At most one threshold is popped per call, even if several are due.
    pub fn pop_due(&mut self, steps: usize) -> Option<usize> {
        match self.0.peek() {
            Some(&Reverse(t)) if steps >= t => {
                self.0.pop();
                Some(t)
            }
            _ => None,
        }
    }

    /// Thresholds not yet reached, sorted in descending order.
    pub fn remaining(&self) -> Vec<usize> {
        let mut v = self.0.iter().map(|&Reverse(t)| t).collect::<Vec<_>>();
        v.sort_unstable_by(|a, b| b.cmp(a));
        v
    }

    /// Returns `true` if every threshold has been popped.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of remaining thresholds.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_one_threshold_per_call() -> Result<()> {
        let mut schedule = CheckpointSchedule::new(vec![100, 50, 200])?;

        // Both 50 and 100 are due but only the smallest is popped
        assert_eq!(schedule.pop_due(150), Some(50));
        assert_eq!(schedule.remaining(), vec![200, 100]);
        assert_eq!(schedule.pop_due(150), Some(100));
        assert_eq!(schedule.pop_due(150), None);
        assert_eq!(schedule.pop_due(200), Some(200));
        assert!(schedule.is_empty());
        assert_eq!(schedule.pop_due(10_000), None);
        Ok(())
    }

    #[test]
    fn test_rejects_duplicates() {
        assert!(CheckpointSchedule::new(vec![10, 20, 10]).is_err());
    }

    #[test]
    fn test_empty() -> Result<()> {
        let mut schedule = CheckpointSchedule::new(vec![])?;
        assert!(schedule.is_empty());
        assert_eq!(schedule.pop_due(1), None);
        Ok(())
    }
}

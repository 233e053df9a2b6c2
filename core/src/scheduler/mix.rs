//! Profile assignment for new users

/// Smooth weighted round-robin over user profiles
///
/// Any window of `total weight` consecutive spawns contains each profile
/// exactly `weight` times, so small populations still follow the mix.
#[derive(Debug, Clone)]
pub(crate) struct ProfileMix {
    weights: Vec<i64>,
    current: Vec<i64>,
    total: i64,
}

impl ProfileMix {
    pub(crate) fn new(weights: impl IntoIterator<Item = u32>) -> Self {
        let weights: Vec<i64> = weights.into_iter().map(i64::from).collect();
        let total = weights.iter().sum();
        Self {
            current: vec![0; weights.len()],
            weights,
            total,
        }
    }

    /// Index of the profile for the next spawned user
    pub(crate) fn next(&mut self) -> usize {
        let mut best = 0;
        for (i, weight) in self.weights.iter().enumerate() {
            self.current[i] += weight;
            if self.current[i] > self.current[best] {
                best = i;
            }
        }
        if let Some(chosen) = self.current.get_mut(best) {
            *chosen -= self.total;
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_follows_weights() {
        let mut mix = ProfileMix::new([3, 1]);
        let picks: Vec<usize> = (0..8).map(|_| mix.next()).collect();
        assert_eq!(picks.iter().filter(|&&p| p == 0).count(), 6);
        assert_eq!(picks.iter().filter(|&&p| p == 1).count(), 2);
    }

    #[test]
    fn test_mix_interleaves() {
        let mut mix = ProfileMix::new([1, 1]);
        let picks: Vec<usize> = (0..4).map(|_| mix.next()).collect();
        assert_eq!(picks, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_single_profile() {
        let mut mix = ProfileMix::new([5]);
        assert!((0..10).all(|_| mix.next() == 0));
    }
}

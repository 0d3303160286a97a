use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::snapshot::ProcessSnapshot;
use crate::status::{AppGroup, StatusCandidate, StatusConfig};

/// Source of the uniform choices made while resolving ties.
pub trait RandomPicker {
    /// Returns an index in `[0, n)`. Never called with `n == 0`.
    fn pick_index(&mut self, n: usize) -> usize;
}

/// Production picker backed by an OS-seeded RNG.
pub struct RngPicker {
    rng: StdRng,
}

impl RngPicker {
    pub fn from_os_rng() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    #[cfg(test)]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomPicker for RngPicker {
    fn pick_index(&mut self, n: usize) -> usize {
        self.rng.random_range(0..n)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("group with priority {priority} has no candidate statuses")]
    NoCandidates { priority: i32 },
    #[error("picker returned index {index} for {len} choices")]
    PickOutOfRange { index: usize, len: usize },
}

/// Picks the status to display for `snapshot`.
///
/// Groups with at least one running name are active. Among them the lowest
/// priority value wins; equal-priority groups are chosen between with `picker`,
/// and so is the candidate inside the chosen group. With nothing active the
/// fallback is returned.
pub fn resolve<'a, P: RandomPicker + ?Sized>(
    snapshot: &ProcessSnapshot,
    config: &'a StatusConfig,
    picker: &mut P,
) -> Result<&'a StatusCandidate, ResolveError> {
    let active: Vec<&AppGroup> = config
        .groups
        .iter()
        .filter(|g| g.names().iter().any(|name| snapshot.contains(name)))
        .collect();

    let Some(top) = active.iter().map(|g| g.priority()).min() else {
        return Ok(&config.fallback);
    };

    let tie_set: Vec<&AppGroup> = active.into_iter().filter(|g| g.priority() == top).collect();
    let group = pick(&tie_set, picker)?;

    if group.candidates().is_empty() {
        return Err(ResolveError::NoCandidates {
            priority: group.priority(),
        });
    }
    pick(group.candidates(), picker)
}

fn pick<'a, T, P: RandomPicker + ?Sized>(items: &'a [T], picker: &mut P) -> Result<&'a T, ResolveError> {
    let index = picker.pick_index(items.len());
    items.get(index).ok_or(ResolveError::PickOutOfRange {
        index,
        len: items.len(),
    })
}

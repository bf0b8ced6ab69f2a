//! The latest-value cell.

use crate::common::Bpm;

/// Holds the most recent sample.
///
/// Overwritten only through `replace_if_changed`; never cleared once set.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatestValue {
    current: Option<Bpm>,
}

impl LatestValue {
    pub fn new(initial: Option<Bpm>) -> Self {
        Self { current: initial }
    }

    pub fn get(&self) -> Option<Bpm> {
        self.current
    }

    /// Stores `sample` if it differs from the held value.
    /// Returns `true` if the value changed.
    pub fn replace_if_changed(&mut self, sample: Bpm) -> bool {
        if self.current == Some(sample) {
            return false;
        }
        self.current = Some(sample);
        true
    }
}

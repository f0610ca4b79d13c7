use glam::Vec3;
use rayon::prelude::*;

use crate::particle::StateRecord;

const RADIX_BITS: u32 = 8;
const BUCKETS: usize = 1 << RADIX_BITS;
const DIGIT_MASK: u32 = (BUCKETS - 1) as u32;
const PASSES: u32 = u32::BITS / RADIX_BITS;

/// Squared camera distance as raw IEEE-754 bits. Valid as an unsigned radix
/// key because squared distances are never negative.
#[inline]
pub fn depth_key(position: Vec3, camera: Vec3) -> u32 {
    position.distance_squared(camera).to_bits()
}

/// Back-to-front depth sorter. The three N-sized working arrays grow on
/// first use and are reused across calls.
#[derive(Debug, Default)]
pub struct RadixSorter {
    keys: Vec<u32>,
    sorted_keys: Vec<u32>,
    sorted_ids: Vec<u32>,
}

impl RadixSorter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(count: usize) -> Self {
        Self {
            keys: Vec::with_capacity(count),
            sorted_keys: Vec::with_capacity(count),
            sorted_ids: Vec::with_capacity(count),
        }
    }

    /// Overwrites `ids` with the particles of `positions` ordered farthest to
    /// nearest from `camera`. Both slices must be the same length.
    pub fn sort_back_to_front(&mut self, ids: &mut [u32], positions: &[StateRecord], camera: Vec3) {
        debug_assert_eq!(ids.len(), positions.len());
        let count = ids.len();
        if count == 0 {
            return;
        }

        self.keys.clear();
        self.keys.par_extend(
            positions
                .par_iter()
                .map(|record| depth_key(record.position(), camera)),
        );
        ids.iter_mut()
            .enumerate()
            .for_each(|(index, id)| *id = index as u32);

        self.sort_ascending(ids);
        ids.reverse();
    }

    /// Same as [`sort_back_to_front`](Self::sort_back_to_front) but over
    /// precomputed keys, one per id in `0..keys.len()`.
    #[cfg(test)]
    pub fn sort_keys_back_to_front(&mut self, ids: &mut [u32], keys: &[u32]) {
        debug_assert_eq!(ids.len(), keys.len());
        self.keys.clear();
        self.keys.extend_from_slice(keys);
        ids.iter_mut()
            .enumerate()
            .for_each(|(index, id)| *id = index as u32);

        self.sort_ascending(ids);
        ids.reverse();
    }

    /// LSD passes over `self.keys`, permuting `ids` alongside.
    fn sort_ascending(&mut self, ids: &mut [u32]) {
        let count = ids.len();
        self.sorted_keys.resize(count, 0);
        self.sorted_ids.resize(count, 0);

        let mut buckets = [0usize; BUCKETS];
        for pass in 0..PASSES {
            let shift = pass * RADIX_BITS;

            buckets.fill(0);
            for key in &self.keys {
                buckets[((key >> shift) & DIGIT_MASK) as usize] += 1;
            }
            // Inclusive prefix sum: each bucket holds its END offset.
            for digit in 1..BUCKETS {
                buckets[digit] += buckets[digit - 1];
            }

            // Reverse scan filling buckets from the back keeps each pass stable.
            for index in (0..count).rev() {
                let key = self.keys[index];
                let bucket = &mut buckets[((key >> shift) & DIGIT_MASK) as usize];
                *bucket -= 1;
                self.sorted_keys[*bucket] = key;
                self.sorted_ids[*bucket] = ids[index];
            }

            std::mem::swap(&mut self.keys, &mut self.sorted_keys);
            ids.copy_from_slice(&self.sorted_ids);
        }
    }
}

// src/core/chunker.rs

//! Sphere-pixelation chunk numbering for a database family.
//!
//! A family's `(numStripes, numSubStripes)` partitions the sphere into
//! declination stripes, each further divided into a stripe-dependent number
//! of chunks so that every chunk covers roughly the same solid angle (chunks
//! near the poles are wider in right ascension). This module is the single
//! place that knows how to go from `(numStripes, numSubStripes)` to the set
//! of valid chunk numbers, and centralizes the dummy-chunk sentinel (§9).

/// Reserved chunk number that must exist as a (usually empty) table on every
/// worker and is excluded from all replication/rebalance/purge planning.
pub const DUMMY_CHUNK_ID: i32 = 1_234_567_890;

/// Computes and caches the valid chunk numbers for one family's striping
/// parameters. Construction is the only place the stripe geometry is
/// computed; `is_valid`/`all_chunks` are pure lookups afterwards.
#[derive(Debug, Clone)]
pub struct Chunker {
    num_stripes: u32,
    num_sub_stripes: u32,
    /// First chunk number of stripe `i`, length `num_stripes + 1` (the last
    /// entry is the total chunk count, i.e. one-past-the-end).
    stripe_offsets: Vec<i32>,
}

impl Chunker {
    pub fn new(num_stripes: u32, num_sub_stripes: u32) -> Self {
        let mut stripe_offsets = Vec::with_capacity(num_stripes as usize + 1);
        let mut next = 0i32;
        for stripe in 0..num_stripes {
            stripe_offsets.push(next);
            next += chunks_in_stripe(stripe, num_stripes) as i32;
        }
        stripe_offsets.push(next);
        Self {
            num_stripes,
            num_sub_stripes,
            stripe_offsets,
        }
    }

    pub fn num_stripes(&self) -> u32 {
        self.num_stripes
    }

    pub fn num_sub_stripes(&self) -> u32 {
        self.num_sub_stripes
    }

    /// Total number of non-dummy chunks defined by this family's geometry.
    pub fn total_chunks(&self) -> i32 {
        *self.stripe_offsets.last().unwrap_or(&0)
    }

    /// A chunk number is valid if it is the dummy sentinel, or a real chunk
    /// number produced by this geometry.
    pub fn is_valid(&self, chunk: i32) -> bool {
        chunk == DUMMY_CHUNK_ID || (chunk >= 0 && chunk < self.total_chunks())
    }

    /// All real (non-dummy) chunk numbers for this family, in ascending
    /// order. Used by `build-empty-chunks-list` (§4.8) and by tests.
    pub fn all_chunks(&self) -> impl Iterator<Item = i32> + '_ {
        0..self.total_chunks()
    }

    /// The stripe index a (real, valid) chunk number belongs to.
    pub fn stripe_of(&self, chunk: i32) -> Option<u32> {
        if chunk == DUMMY_CHUNK_ID || chunk < 0 {
            return None;
        }
        self.stripe_offsets
            .windows(2)
            .position(|w| chunk >= w[0] && chunk < w[1])
            .map(|i| i as u32)
    }
}

/// Equal-solid-angle chunk count for a stripe, following the standard
/// pixelization approach: each stripe covers a fixed declination band, and
/// the number of chunks in it is scaled by `cos` of the band's center
/// declination (stripes near the poles need fewer, wider chunks to keep
/// chunk area roughly constant). Always at least 1.
fn chunks_in_stripe(stripe: u32, num_stripes: u32) -> u32 {
    let stripe_height_deg = 180.0 / num_stripes as f64;
    let dec_min = -90.0 + stripe as f64 * stripe_height_deg;
    let dec_center = (dec_min + stripe_height_deg / 2.0).to_radians();
    let max_chunks_at_equator = 2 * num_stripes;
    let count = (max_chunks_at_equator as f64 * dec_center.cos()).round() as i64;
    count.max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_chunk_is_always_valid() {
        let c = Chunker::new(340, 12);
        assert!(c.is_valid(DUMMY_CHUNK_ID));
    }

    #[test]
    fn negative_and_out_of_range_are_invalid() {
        let c = Chunker::new(10, 2);
        assert!(!c.is_valid(-1));
        assert!(!c.is_valid(c.total_chunks()));
        assert!(c.is_valid(0));
        assert!(c.is_valid(c.total_chunks() - 1));
    }

    #[test]
    fn all_chunks_len_matches_total() {
        let c = Chunker::new(20, 4);
        assert_eq!(c.all_chunks().count() as i32, c.total_chunks());
    }

    #[test]
    fn equatorial_stripes_are_widest() {
        // A stripe straddling the equator should have at least as many
        // chunks as a stripe near a pole.
        let c = Chunker::new(8, 2);
        let equator_stripe = 4;
        let polar_stripe = 0;
        let equator_count = c.stripe_offsets[equator_stripe as usize + 1]
            - c.stripe_offsets[equator_stripe as usize];
        let polar_count =
            c.stripe_offsets[polar_stripe as usize + 1] - c.stripe_offsets[polar_stripe as usize];
        assert!(equator_count >= polar_count);
    }

    #[test]
    fn stripe_of_round_trips_within_bounds() {
        let c = Chunker::new(50, 6);
        for chunk in [0, c.total_chunks() / 2, c.total_chunks() - 1] {
            assert!(c.stripe_of(chunk).is_some());
        }
        assert_eq!(c.stripe_of(DUMMY_CHUNK_ID), None);
    }
}

//! Boolean token masks and random mask-subset selection
//!
//! Masks live on the CPU as dense row-major `[batch, seq_len]` booleans; the
//! decoder and the training loss apply them to host-side token buffers before
//! building each model input tensor.

use rand::Rng;

/// Dense `[batch, seq_len]` boolean mask; `true` marks a masked position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMask {
    batch: usize,
    seq_len: usize,
    data: Vec<bool>,
}

impl TokenMask {
    /// Mask with every position set to `value`
    pub fn filled(batch: usize, seq_len: usize, value: bool) -> Self {
        Self {
            batch,
            seq_len,
            data: vec![value; batch * seq_len],
        }
    }

    /// Build from per-row vectors; rows must share one length
    pub fn from_rows(rows: Vec<Vec<bool>>) -> Self {
        let batch = rows.len();
        let seq_len = rows.first().map(|r| r.len()).unwrap_or(0);
        debug_assert!(rows.iter().all(|r| r.len() == seq_len));
        Self {
            batch,
            seq_len,
            data: rows.into_iter().flatten().collect(),
        }
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.batch, self.seq_len)
    }

    pub fn get(&self, b: usize, i: usize) -> bool {
        self.data[b * self.seq_len + i]
    }

    pub fn set(&mut self, b: usize, i: usize, value: bool) {
        self.data[b * self.seq_len + i] = value;
    }

    pub fn row(&self, b: usize) -> &[bool] {
        &self.data[b * self.seq_len..(b + 1) * self.seq_len]
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.data
    }

    /// Number of masked positions in row `b`
    pub fn count_row(&self, b: usize) -> usize {
        self.row(b).iter().filter(|&&m| m).count()
    }

    /// Masked-position counts for every row
    pub fn row_counts(&self) -> Vec<usize> {
        (0..self.batch).map(|b| self.count_row(b)).collect()
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&m| m).count()
    }

    /// Flat row-major indices of masked positions
    pub fn flat_indices(&self) -> Vec<u32> {
        self.data
            .iter()
            .enumerate()
            .filter(|(_, &m)| m)
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// `self &= !other`
    pub fn clear_where(&mut self, other: &TokenMask) {
        debug_assert_eq!(self.dims(), other.dims());
        for (m, &o) in self.data.iter_mut().zip(other.data.iter()) {
            *m &= !o;
        }
    }
}

/// Number of positions selected from `eligible` for a real-valued target
///
/// Positions are selected while their rank is below the target, so a target
/// of 2.3 selects 3 positions; never more than are eligible.
fn selected_count(target: f64, eligible: usize) -> usize {
    if target <= 0.0 {
        return 0;
    }
    (target.ceil() as usize).min(eligible)
}

/// Select a random subset of each row's masked positions
///
/// Every eligible position draws an independent uniform key; the lowest
/// `ceil(max(eligible * prob, min_mask))` keys in each row are selected.
/// Positions outside `mask` take an infinite key and are never selected, so
/// rows with different eligible counts stay independent.
pub fn mask_subset_prob<R: Rng + ?Sized>(
    mask: &TokenMask,
    prob: f64,
    min_mask: f64,
    rng: &mut R,
) -> TokenMask {
    let (batch, seq_len) = mask.dims();
    let mut subset = TokenMask::filled(batch, seq_len, false);

    for b in 0..batch {
        let row = mask.row(b);
        let eligible = row.iter().filter(|&&m| m).count();
        let target = (eligible as f64 * prob).max(min_mask);
        let k = selected_count(target, eligible);
        if k == 0 {
            continue;
        }

        let mut keyed: Vec<(f32, usize)> = row
            .iter()
            .enumerate()
            .map(|(i, &m)| {
                let key = if m { rng.gen::<f32>() } else { f32::INFINITY };
                (key, i)
            })
            .collect();
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0));

        for &(_, i) in keyed.iter().take(k) {
            subset.set(b, i, row[i]);
        }
    }

    subset
}

/// Primary training mask: per row, a random `ceil(max(fraction * seq_len, 1))` positions
pub fn random_primary_mask<R: Rng + ?Sized>(
    fractions: &[f64],
    seq_len: usize,
    rng: &mut R,
) -> TokenMask {
    let all = TokenMask::filled(1, seq_len, true);
    let rows = fractions
        .iter()
        .map(|&p| mask_subset_prob(&all, p, 1.0, rng).row(0).to_vec())
        .collect();
    TokenMask::from_rows(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn uneven_mask() -> TokenMask {
        TokenMask::from_rows(vec![
            vec![true, false, true, true, false, true, true, true, false, true],
            vec![false, false, true, false, false, false, false, true, false, false],
            vec![false; 10],
        ])
    }

    #[test]
    fn test_subset_stays_inside_eligible_mask() {
        let mut rng = StdRng::seed_from_u64(0);
        let mask = uneven_mask();
        for &p in &[0.0, 0.1, 0.5, 0.9, 1.0] {
            for _ in 0..50 {
                let subset = mask_subset_prob(&mask, p, 0.0, &mut rng);
                for (s, m) in subset.as_slice().iter().zip(mask.as_slice()) {
                    assert!(!*s || *m);
                }
            }
        }
    }

    #[test]
    fn test_subset_count_per_row() {
        let mut rng = StdRng::seed_from_u64(1);
        let mask = uneven_mask();
        let subset = mask_subset_prob(&mask, 0.5, 0.0, &mut rng);
        // eligible 7 -> 3.5 -> 4, eligible 2 -> 1, eligible 0 -> 0
        assert_eq!(subset.row_counts(), vec![4, 1, 0]);

        let subset = mask_subset_prob(&mask, 0.1, 2.0, &mut rng);
        assert_eq!(subset.row_counts(), vec![2, 2, 0]);
    }

    #[test]
    fn test_subset_count_close_to_rounded_target() {
        let mut rng = StdRng::seed_from_u64(2);
        let mask = TokenMask::filled(4, 37, true);
        for &p in &[0.05, 0.15, 0.33, 0.8] {
            let subset = mask_subset_prob(&mask, p, 0.0, &mut rng);
            let expected = (37.0 * p).round() as i64;
            for count in subset.row_counts() {
                assert!((count as i64 - expected).abs() <= 1);
            }
        }
    }

    #[test]
    fn test_primary_mask_at_least_one() {
        let mut rng = StdRng::seed_from_u64(3);
        let mask = random_primary_mask(&[0.0, 0.25, 1.0], 16, &mut rng);
        assert_eq!(mask.row_counts(), vec![1, 4, 16]);
    }

    #[test]
    fn test_flat_indices_and_count() {
        let mask = uneven_mask();
        assert_eq!(&mask.flat_indices()[..3], &[0, 2, 3]);
        assert_eq!(mask.count(), 9);
        assert_eq!(mask.row_counts(), vec![7, 2, 0]);
    }

    #[test]
    fn test_clear_where() {
        let mut a = TokenMask::filled(1, 4, true);
        let b = TokenMask::from_rows(vec![vec![true, false, true, false]]);
        a.clear_where(&b);
        assert_eq!(a.row(0), &[false, true, false, true]);
    }
}

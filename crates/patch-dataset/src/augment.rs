//! Flip / rotate augmentation applied identically to input and target.

use ndarray::{s, Array3, ArrayView3};
use rand::Rng;

/// One draw from the dihedral group of the square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Augmentation {
    pub flip_rows: bool,
    pub flip_cols: bool,
    /// Counter-clockwise quarter turns, `0..4`.
    pub quarter_turns: u8,
}

impl Augmentation {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            flip_rows: rng.gen_bool(0.5),
            flip_cols: rng.gen_bool(0.5),
            quarter_turns: rng.gen_range(0..4),
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    /// Apply to a `(C, P, P)` stack; every plane gets the same transform.
    pub fn apply(&self, stack: ArrayView3<f32>) -> Array3<f32> {
        let mut view = stack;
        if self.flip_rows {
            view = view.slice_move(s![.., ..;-1, ..]);
        }
        if self.flip_cols {
            view = view.slice_move(s![.., .., ..;-1]);
        }
        for _ in 0..self.quarter_turns % 4 {
            // transpose then reverse rows = 90 degrees counter-clockwise
            view = view.permuted_axes([0, 2, 1]).slice_move(s![.., ..;-1, ..]);
        }
        view.as_standard_layout().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn plane() -> Array3<f32> {
        // [[0, 1], [2, 3]]
        Array::from_shape_vec((1, 2, 2), vec![0.0, 1.0, 2.0, 3.0]).unwrap()
    }

    #[test]
    fn test_quarter_turn() {
        let turned = Augmentation {
            quarter_turns: 1,
            ..Default::default()
        }
        .apply(plane().view());
        // np.rot90([[0, 1], [2, 3]]) == [[1, 3], [0, 2]]
        assert_eq!(turned.iter().copied().collect::<Vec<_>>(), vec![1.0, 3.0, 0.0, 2.0]);
    }

    #[test]
    fn test_flips() {
        let rows = Augmentation {
            flip_rows: true,
            ..Default::default()
        }
        .apply(plane().view());
        assert_eq!(rows.iter().copied().collect::<Vec<_>>(), vec![2.0, 3.0, 0.0, 1.0]);

        let cols = Augmentation {
            flip_cols: true,
            ..Default::default()
        }
        .apply(plane().view());
        assert_eq!(cols.iter().copied().collect::<Vec<_>>(), vec![1.0, 0.0, 3.0, 2.0]);
    }

    #[test]
    fn test_four_turns_is_identity() {
        let data = Array::from_shape_fn((2, 5, 5), |(c, r, col)| (c * 100 + r * 5 + col) as f32);
        let aug = Augmentation {
            quarter_turns: 4,
            ..Default::default()
        };
        assert_eq!(aug.apply(data.view()), data);
    }

    #[test]
    fn test_same_draw_same_result() {
        let data = Array::from_shape_fn((2, 4, 4), |(c, r, col)| (c * 16 + r * 4 + col) as f32);
        let mut rng = StdRng::seed_from_u64(3);
        let aug = Augmentation::random(&mut rng);
        assert_eq!(aug.apply(data.view()), aug.apply(data.view()));
    }
}

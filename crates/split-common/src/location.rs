//! Absolute patch locations.

use serde::{Deserialize, Serialize};

/// Top-left corner of a patch plus the frame it belongs to.
///
/// Rows and columns are signed: a patch under pad-boundary tiling or a
/// neighbor lookup may start outside the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Top-left row
    pub row: i64,
    /// Top-left column
    pub col: i64,
    /// Frame (time) index
    pub t: usize,
}

/// Cardinal direction for neighbor lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Unit `(d_row, d_col)` step.
    pub fn delta(&self) -> (i64, i64) {
        match self {
            Direction::Up => (-1, 0),
            Direction::Down => (1, 0),
            Direction::Left => (0, -1),
            Direction::Right => (0, 1),
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

impl Location {
    pub fn new(row: i64, col: i64, t: usize) -> Self {
        Self { row, col, t }
    }

    /// `(row, col, time)` triple.
    pub fn hwt(&self) -> (i64, i64, usize) {
        (self.row, self.col, self.t)
    }

    /// Location moved by `step` pixels in `direction`.
    pub fn shifted(&self, direction: Direction, step: usize) -> Location {
        let (dr, dc) = direction.delta();
        let step = step as i64;
        Location {
            row: self.row + dr * step,
            col: self.col + dc * step,
            t: self.t,
        }
    }

    /// True when a `size_h x size_w` patch at this location lies inside a
    /// `height x width` frame.
    pub fn fits_within(&self, size_h: usize, size_w: usize, height: usize, width: usize) -> bool {
        self.row >= 0
            && self.col >= 0
            && self.row + size_h as i64 <= height as i64
            && self.col + size_w as i64 <= width as i64
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t={} row={} col={}", self.t, self.row, self.col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_round_trip() {
        let loc = Location::new(64, 128, 2);
        for dir in Direction::ALL {
            let moved = loc.shifted(dir, 64);
            assert_ne!(moved, loc);
            assert_eq!(moved.shifted(dir.opposite(), 64), loc);
            assert_eq!(moved.t, 2);
        }
    }

    #[test]
    fn test_shift_can_go_negative() {
        let loc = Location::new(0, 0, 0);
        assert_eq!(loc.shifted(Direction::Up, 32), Location::new(-32, 0, 0));
        assert_eq!(loc.shifted(Direction::Left, 32), Location::new(0, -32, 0));
    }

    #[test]
    fn test_fits_within() {
        assert!(Location::new(0, 0, 0).fits_within(64, 64, 128, 128));
        assert!(Location::new(64, 64, 0).fits_within(64, 64, 128, 128));
        assert!(!Location::new(65, 0, 0).fits_within(64, 64, 128, 128));
        assert!(!Location::new(-1, 0, 0).fits_within(64, 64, 128, 128));
    }
}

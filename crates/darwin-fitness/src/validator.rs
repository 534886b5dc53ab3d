//! Legality checks for game actions.
//!
//! Grids are indexed `[col][row]`: the grid width is the number of columns and the height
//! is the length of each column.

use crate::protocol::GameAction;

const DIRECTIONS: usize = 4;

/// Checks candidate actions against the mountain grid and the agent's territory.
#[derive(Debug, Clone, Default)]
pub struct ActionValidator {
    mountains: Vec<Vec<bool>>,
    width: usize,
    height: usize,
}

impl ActionValidator {
    #[must_use]
    pub fn new(mountains: Vec<Vec<bool>>) -> Self {
        let mut validator = Self::default();
        validator.observe(&mountains);
        validator
    }

    /// Records the mountain grid the first time a non-empty one is seen.
    pub fn observe(&mut self, mountains: &[Vec<bool>]) {
        if self.width > 0 || mountains.is_empty() {
            return;
        }
        self.width = mountains.len();
        self.height = mountains[0].len();
        self.mountains = mountains.to_vec();
    }

    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Whether `action` is legal.
    ///
    /// A pass is always legal. Otherwise the target must be on the grid, not a mountain,
    /// and next to a cell in `owned` when ownership is known. Without a mountain grid only
    /// the field ranges are checked.
    #[must_use]
    pub fn is_valid(&self, action: &GameAction, owned: Option<&[Vec<bool>]>) -> bool {
        if action.pass() > 1 || action.split() > 1 || action.direction() >= DIRECTIONS {
            return false;
        }
        if action.pass() == 1 {
            return true;
        }
        if self.width == 0 {
            return true;
        }
        let (row, col) = (action.row(), action.col());
        if row >= self.height || col >= self.width {
            return false;
        }
        if cell(&self.mountains, col, row) {
            return false;
        }
        match owned {
            Some(owned) => self
                .neighbours(col, row)
                .any(|(c, r)| cell(owned, c, r)),
            None => true,
        }
    }

    fn neighbours(&self, col: usize, row: usize) -> impl Iterator<Item = (usize, usize)> {
        let (width, height) = (self.width, self.height);
        [(0, -1), (0, 1), (-1, 0), (1, 0)]
            .into_iter()
            .filter_map(move |(dc, dr): (isize, isize)| {
                let c = col.checked_add_signed(dc)?;
                let r = row.checked_add_signed(dr)?;
                (c < width && r < height).then_some((c, r))
            })
    }
}

fn cell(grid: &[Vec<bool>], col: usize, row: usize) -> bool {
    grid.get(col)
        .and_then(|column| column.get(row))
        .copied()
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(cells: &[(usize, usize)]) -> Vec<Vec<bool>> {
        let mut grid = vec![vec![false; 3]; 3];
        for &(c, r) in cells {
            grid[c][r] = true;
        }
        grid
    }

    #[test]
    fn test_three_by_three_scenario() {
        let validator = ActionValidator::new(grid(&[(0, 2)]));
        let owned = grid(&[(0, 0)]);
        let owned = Some(owned.as_slice());

        assert!(validator.is_valid(&GameAction::new([0, 0, 1, 0, 0]), owned));
        assert!(!validator.is_valid(&GameAction::new([0, 2, 0, 0, 0]), owned));
        assert!(!validator.is_valid(&GameAction::new([0, 2, 2, 0, 0]), owned));
        assert!(validator.is_valid(&GameAction::new([1, 2, 0, 0, 0]), owned));
    }

    #[test]
    fn test_field_ranges() {
        let validator = ActionValidator::new(grid(&[]));
        assert!(!validator.is_valid(&GameAction::new([2, 0, 0, 0, 0]), None));
        assert!(!validator.is_valid(&GameAction::new([0, 0, 0, 4, 0]), None));
        assert!(!validator.is_valid(&GameAction::new([0, 0, 0, 0, 2]), None));
        assert!(!validator.is_valid(&GameAction::new([0, 3, 0, 0, 0]), None));
        assert!(!validator.is_valid(&GameAction::new([0, 0, 3, 0, 0]), None));
        assert!(validator.is_valid(&GameAction::new([0, 2, 2, 3, 1]), None));
    }

    #[test]
    fn test_without_grid_only_ranges_apply() {
        let validator = ActionValidator::default();
        assert_eq!(validator.dimensions(), (0, 0));
        assert!(validator.is_valid(&GameAction::new([0, 40, 40, 0, 0]), None));
        assert!(validator.is_valid(&GameAction::PASS, None));
    }

    #[test]
    fn test_grid_is_inferred_once() {
        let mut validator = ActionValidator::default();
        validator.observe(&[]);
        validator.observe(&vec![vec![false; 2]; 4]);
        validator.observe(&grid(&[]));
        assert_eq!(validator.dimensions(), (4, 2));
    }
}

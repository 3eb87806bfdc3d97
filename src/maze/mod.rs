//! Maze grids and the sources that produce them
//!
//! A [`Grid`] is a rectangular array of [`CellType`] addressed by
//! [`Position`]. Grids are produced by the local recursive-backtracker
//! [`generator`] or by a remote service behind the [`MazeSource`] trait;
//! [`MazeProvider`] picks between them and always yields a usable layout.

mod generator;
mod source;

pub use generator::{generate, generate_with_rng, start_corners, MAX_GENERATION_ATTEMPTS};
pub use source::{
    validate_remote_grid, verify_layout, LocalMazeSource, MazeError, MazeLayout, MazeProvider,
    MazeSource, RemoteMazeSource,
};

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;

/// Type of a single maze cell
///
/// The discriminants are the wire encoding used in `GameStarted` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellType {
    /// Impassable
    Wall = 0,
    /// Walkable path
    Free = 1,
    /// The goal; reaching it wins the game
    Finish = 2,
}

impl CellType {
    /// Wire code of this cell
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a wire code
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(CellType::Wall),
            1 => Some(CellType::Free),
            2 => Some(CellType::Finish),
            _ => None,
        }
    }

    pub fn is_walkable(self) -> bool {
        !matches!(self, CellType::Wall)
    }
}

/// A cell coordinate; `x` is the column, `y` the row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance to another position
    pub fn distance(&self, other: &Position) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// The four orthogonal neighbours (may lie outside any grid)
    pub fn neighbors(&self) -> [Position; 4] {
        [
            Position::new(self.x, self.y - 1),
            Position::new(self.x + 1, self.y),
            Position::new(self.x, self.y + 1),
            Position::new(self.x - 1, self.y),
        ]
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Rectangular maze grid stored row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<CellType>,
}

impl Grid {
    /// Create a grid with every cell set to `cell`
    pub fn filled(width: usize, height: usize, cell: CellType) -> Self {
        Self {
            width,
            height,
            cells: vec![cell; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Whether `pos` lies inside the grid
    pub fn contains(&self, pos: Position) -> bool {
        pos.x >= 0 && pos.y >= 0 && (pos.x as usize) < self.width && (pos.y as usize) < self.height
    }

    fn index(&self, pos: Position) -> Option<usize> {
        self.contains(pos)
            .then(|| pos.y as usize * self.width + pos.x as usize)
    }

    /// Cell at `pos`, or `None` when out of bounds
    pub fn get(&self, pos: Position) -> Option<CellType> {
        self.index(pos).map(|i| self.cells[i])
    }

    /// Overwrite the cell at `pos`. Returns false when out of bounds.
    pub fn set(&mut self, pos: Position, cell: CellType) -> bool {
        match self.index(pos) {
            Some(i) => {
                self.cells[i] = cell;
                true
            }
            None => false,
        }
    }

    /// Whether `pos` lies on the outermost ring of cells
    pub fn is_border(&self, pos: Position) -> bool {
        self.contains(pos)
            && (pos.x == 0
                || pos.y == 0
                || pos.x as usize == self.width - 1
                || pos.y as usize == self.height - 1)
    }

    /// Iterate over all cells in row-major order
    pub fn cells(&self) -> impl Iterator<Item = (Position, CellType)> + '_ {
        let width = self.width;
        self.cells.iter().enumerate().map(move |(i, cell)| {
            (
                Position::new((i % width) as i32, (i / width) as i32),
                *cell,
            )
        })
    }

    /// Number of cells of the given type
    pub fn count(&self, cell: CellType) -> usize {
        self.cells.iter().filter(|c| **c == cell).count()
    }

    /// Position of the first finish cell
    pub fn finish(&self) -> Option<Position> {
        self.cells()
            .find(|(_, cell)| *cell == CellType::Finish)
            .map(|(pos, _)| pos)
    }

    /// Whether every border cell is a wall
    pub fn border_is_walled(&self) -> bool {
        self.cells()
            .filter(|(pos, _)| self.is_border(*pos))
            .all(|(_, cell)| cell == CellType::Wall)
    }

    /// Whether a walkable path connects `from` and `to`
    pub fn connects(&self, from: Position, to: Position) -> bool {
        let walkable = |pos: Position| self.get(pos).is_some_and(CellType::is_walkable);
        if !walkable(from) || !walkable(to) {
            return false;
        }

        let mut seen = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            if current == to {
                return true;
            }
            for next in current.neighbors() {
                if walkable(next) && seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        false
    }

    /// Rows of wire codes, `rows[y][x]`
    pub fn to_rows(&self) -> Vec<Vec<u8>> {
        self.cells
            .chunks(self.width)
            .map(|row| row.iter().map(|c| c.code()).collect())
            .collect()
    }
}

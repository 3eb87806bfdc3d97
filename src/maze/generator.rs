//! Randomized recursive-backtracker maze generation
//!
//! Carving runs on odd coordinates starting from `(1, 1)`, so every odd/odd
//! interior cell ends up connected to the start. Player corners are then
//! forced open and joined to that carved lattice, and the finish is dropped
//! near the centre. Because the finish can land on an uncarved cell, every
//! generated maze is checked for reachability from all corners and
//! regenerated when the check fails.

use super::{CellType, Grid, Position};
use rand::seq::SliceRandom;
use rand::Rng;

/// Regeneration attempts before the finish is moved to a carved cell
pub const MAX_GENERATION_ATTEMPTS: usize = 16;

/// Maximum offset of the finish from the grid centre on each axis
const FINISH_JITTER: i32 = 3;

/// Carving steps: two cells in each cardinal direction
const STEPS: [(i32, i32); 4] = [(0, 2), (2, 0), (0, -2), (-2, 0)];

/// Player start corners in assignment order
pub fn start_corners(width: usize, height: usize) -> [Position; 4] {
    let (w, h) = (width as i32, height as i32);
    [
        Position::new(1, 1),
        Position::new(w - 2, 1),
        Position::new(1, h - 2),
        Position::new(w - 2, h - 2),
    ]
}

/// Generate a maze using the thread-local RNG
pub fn generate(width: usize, height: usize) -> Grid {
    generate_with_rng(width, height, &mut rand::thread_rng())
}

/// Generate a maze with a caller-supplied RNG
///
/// The result always has a walled border, exactly one finish cell, open
/// start corners, and a path from every corner to the finish.
pub fn generate_with_rng<R: Rng + ?Sized>(width: usize, height: usize, rng: &mut R) -> Grid {
    let corners = start_corners(width, height);

    for attempt in 1..=MAX_GENERATION_ATTEMPTS {
        let mut grid = carve(width, height, rng);
        open_corners(&mut grid, &corners);

        let finish = pick_finish(&grid, &corners, rng);
        grid.set(finish, CellType::Finish);

        if corners.iter().all(|corner| grid.connects(*corner, finish)) {
            tracing::debug!(
                "Maze {}x{} generated on attempt {}, finish at {}, {} free cells",
                width,
                height,
                attempt,
                finish,
                grid.count(CellType::Free)
            );
            return grid;
        }

        tracing::debug!(
            "Finish at {} unreachable on attempt {}, regenerating",
            finish,
            attempt
        );
    }

    let mut grid = carve(width, height, rng);
    open_corners(&mut grid, &corners);
    let finish = carved_cell_near_center(&grid, &corners);
    grid.set(finish, CellType::Finish);
    tracing::warn!(
        "Maze regeneration exhausted after {} attempts, finish moved to carved cell {}",
        MAX_GENERATION_ATTEMPTS,
        finish
    );
    grid
}

fn carve<R: Rng + ?Sized>(width: usize, height: usize, rng: &mut R) -> Grid {
    let mut grid = Grid::filled(width, height, CellType::Wall);
    let (w, h) = (width as i32, height as i32);

    let start = Position::new(1, 1);
    grid.set(start, CellType::Free);
    let mut stack = vec![start];

    while let Some(&current) = stack.last() {
        let neighbors: Vec<Position> = STEPS
            .iter()
            .map(|(dx, dy)| Position::new(current.x + dx, current.y + dy))
            .filter(|next| {
                next.x > 0
                    && next.x < w - 1
                    && next.y > 0
                    && next.y < h - 1
                    && grid.get(*next) == Some(CellType::Wall)
            })
            .collect();

        match neighbors.choose(rng) {
            Some(&next) => {
                let between = Position::new(
                    current.x + (next.x - current.x) / 2,
                    current.y + (next.y - current.y) / 2,
                );
                grid.set(next, CellType::Free);
                grid.set(between, CellType::Free);
                stack.push(next);
            }
            None => {
                stack.pop();
            }
        }
    }

    grid
}

/// Open each corner and join it to the nearest odd/odd cell. With an even
/// width or height the far corners sit on even coordinates, which the
/// backtracker never reaches.
fn open_corners(grid: &mut Grid, corners: &[Position]) {
    for corner in corners {
        let nx = if corner.x % 2 == 1 { corner.x } else { corner.x - 1 };
        let ny = if corner.y % 2 == 1 { corner.y } else { corner.y - 1 };
        grid.set(*corner, CellType::Free);
        grid.set(Position::new(nx, corner.y), CellType::Free);
        grid.set(Position::new(nx, ny), CellType::Free);
    }
}

/// Random interior cell within the jitter window around the centre,
/// never one of the start corners
fn pick_finish<R: Rng + ?Sized>(grid: &Grid, corners: &[Position], rng: &mut R) -> Position {
    let center = center_of(grid);
    let candidates: Vec<Position> = window(grid, center)
        .filter(|pos| !corners.contains(pos))
        .collect();

    candidates.choose(rng).copied().unwrap_or(center)
}

/// Odd/odd cell closest to the centre. The backtracker carves all of
/// them, so this cell is always reachable from `(1, 1)`.
fn carved_cell_near_center(grid: &Grid, corners: &[Position]) -> Position {
    let center = center_of(grid);
    grid.cells()
        .filter(|(pos, cell)| {
            pos.x % 2 == 1
                && pos.y % 2 == 1
                && *cell == CellType::Free
                && !grid.is_border(*pos)
                && !corners.contains(pos)
        })
        .map(|(pos, _)| pos)
        .min_by_key(|pos| pos.distance(&center))
        .unwrap_or(center)
}

fn center_of(grid: &Grid) -> Position {
    Position::new((grid.width() / 2) as i32, (grid.height() / 2) as i32)
}

fn window(grid: &Grid, center: Position) -> impl Iterator<Item = Position> {
    let max_x = grid.width() as i32 - 2;
    let max_y = grid.height() as i32 - 2;
    let xs = (center.x - FINISH_JITTER).max(1)..=(center.x + FINISH_JITTER).min(max_x);
    let ys = (center.y - FINISH_JITTER).max(1)..=(center.y + FINISH_JITTER).min(max_y);
    ys.flat_map(move |y| xs.clone().map(move |x| Position::new(x, y)))
}

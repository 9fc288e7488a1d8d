//! Immutable board topology.
//!
//! A [`Board`] is built once from a text layout and never changes afterwards. Runtime changes
//! (barricades being captured and relocated) live in [`GameState`](crate::game::GameState),
//! which overlays them on the board's initial spot kinds.
//!
//! # Layout format
//!
//! One line per row, top row first. `y` grows upward (the last line is `y = 0`) and `x` grows
//! to the right. Shorter lines are padded with outside spots. Lines that are empty are ignored.
//!
//! | Glyph | Meaning |
//! |---|---|
//! | `.` or space | outside the board |
//! | `o` | normal spot |
//! | `#` | normal spot holding a barricade at the start of a match |
//! | `*` | the goal |
//! | `B` `R` `G` `Y` | starting spot of Blue, Red, Green, Yellow |
//!
//! Spots are connected to their orthogonal playable neighbours. The goal, the starting spots
//! and the lowest row of normal spots can never hold a barricade.

use std::{collections::VecDeque, fmt::Display};

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};

/// The classic 17 columns board.
pub const STANDARD_LAYOUT: &str = "
........*........
oooooooo#oooooooo
o...............o
oooooooo#oooooooo
........o........
......oo#oo......
......o...o......
....oo#ooo#oo....
....o.......o....
..oooooo#oooooo..
..o...o...o...o..
#ooo#ooo#ooo#ooo#
o...o...o...o...o
ooooooooooooooooo
..B...R...G...Y..
";

/// One of the four seats. Also the order in which seats play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Color {
    /// Opens every match.
    Blue,
    /// Second seat.
    Red,
    /// Third seat.
    Green,
    /// Fourth seat.
    Yellow,
}

impl Color {
    /// All seats in playing order.
    pub const ALL: [Color; 4] = [Color::Blue, Color::Red, Color::Green, Color::Yellow];

    /// Seat number, `0..4`.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The seat playing after this one.
    pub fn next(self) -> Color {
        Color::ALL[(self.index() + 1) % Color::ALL.len()]
    }

    fn from_glyph(glyph: char) -> Option<Color> {
        match glyph {
            'B' => Some(Color::Blue),
            'R' => Some(Color::Red),
            'G' => Some(Color::Green),
            'Y' => Some(Color::Yellow),
            _ => None,
        }
    }
}

impl Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Color::Blue => "BLUE",
            Color::Red => "RED",
            Color::Green => "GREEN",
            Color::Yellow => "YELLOW",
        };
        f.write_str(name)
    }
}

/// Grid coordinate of a spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Column, growing to the right.
    pub x: i32,
    /// Row, growing toward the goal.
    pub y: i32,
}

impl Position {
    /// Shorthand constructor.
    pub const fn new(x: i32, y: i32) -> Position {
        Position { x, y }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// What a spot contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpotKind {
    /// Not part of the board.
    Outside,
    /// Empty playable spot (possibly with a pawn on it).
    Normal,
    /// Playable spot currently holding a barricade.
    Barricade,
    /// The finish.
    Goal,
}

/// A board cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spot {
    /// Content of the spot.
    pub kind: SpotKind,
    /// Set when the spot is where pawns of that color enter the board.
    pub starting_color: Option<Color>,
    /// Playable spots one step away, ordered up, left, right, down.
    pub neighbors: Vec<Position>,
    /// A barricade can never be put here.
    pub barricade_locked: bool,
    /// Steps to the goal, ignoring barricades.
    pub distance_to_goal: u32,
    /// Where the spot is.
    pub position: Position,
}

impl Spot {
    /// True for anything a pawn may stand on.
    pub fn is_playable(&self) -> bool {
        self.kind != SpotKind::Outside
    }
}

/// Immutable board topology, validated at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    width: usize,
    height: usize,
    spots: Vec<Spot>,
    goal: Position,
    starts: [Position; 4],
}

impl Board {
    /// The classic board built from [`STANDARD_LAYOUT`].
    pub fn standard() -> Board {
        // checked by `standard_board_is_valid`
        Board::from_layout(STANDARD_LAYOUT).unwrap_or_else(|e| panic!("standard layout: {e:#}"))
    }

    /// Parse and validate a layout (see module documentation for the format).
    ///
    /// # Errors
    /// Returned for unknown glyphs, a missing or duplicated goal or starting spot, a barricade
    /// on a locked spot, or any playable spot from which the goal cannot be reached.
    pub fn from_layout(layout: &str) -> anyhow::Result<Board> {
        let rows: Vec<&str> = layout.lines().filter(|l| !l.trim().is_empty()).collect();
        if rows.is_empty() {
            bail!("empty board layout");
        }
        let height = rows.len();
        let width = rows.iter().map(|r| r.chars().count()).max().unwrap_or(0);

        let mut spots = Vec::with_capacity(width * height);
        let mut goal = None;
        let mut starts: [Option<Position>; 4] = [None; 4];

        // row-major, y = 0 first
        for y in 0..height {
            let row: Vec<char> = rows[height - 1 - y].chars().collect();
            for x in 0..width {
                let position = Position::new(x as i32, y as i32);
                let glyph = row.get(x).copied().unwrap_or('.');
                let mut starting_color = None;
                let kind = match glyph {
                    '.' | ' ' => SpotKind::Outside,
                    'o' => SpotKind::Normal,
                    '#' => SpotKind::Barricade,
                    '*' => {
                        if let Some(other) = goal.replace(position) {
                            bail!("two goals: {other} and {position}");
                        }
                        SpotKind::Goal
                    }
                    c => {
                        let color = Color::from_glyph(c)
                            .ok_or_else(|| anyhow!("unknown glyph '{c}' at {position}"))?;
                        if let Some(other) = starts[color.index()].replace(position) {
                            bail!("two starting spots for {color}: {other} and {position}");
                        }
                        starting_color = Some(color);
                        SpotKind::Normal
                    }
                };
                spots.push(Spot {
                    kind,
                    starting_color,
                    neighbors: vec![],
                    barricade_locked: false,
                    distance_to_goal: 0,
                    position,
                });
            }
        }

        let goal = goal.context("layout has no goal")?;
        let mut start_positions = [goal; 4];
        for color in Color::ALL {
            start_positions[color.index()] =
                starts[color.index()].with_context(|| format!("no starting spot for {color}"))?;
        }

        let mut board = Board {
            width,
            height,
            spots,
            goal,
            starts: start_positions,
        };
        board.connect();
        board.lock_spots()?;
        board.compute_distances()?;
        Ok(board)
    }

    fn connect(&mut self) {
        const STEPS: [(i32, i32); 4] = [(0, 1), (-1, 0), (1, 0), (0, -1)];
        for i in 0..self.spots.len() {
            if !self.spots[i].is_playable() {
                continue;
            }
            let here = self.spots[i].position;
            let neighbors = STEPS
                .iter()
                .map(|(dx, dy)| Position::new(here.x + dx, here.y + dy))
                .filter(|p| self.spot(*p).is_some_and(Spot::is_playable))
                .collect();
            self.spots[i].neighbors = neighbors;
        }
    }

    fn lock_spots(&mut self) -> anyhow::Result<()> {
        let lowest_row = self
            .spots
            .iter()
            .filter(|s| {
                matches!(s.kind, SpotKind::Normal | SpotKind::Barricade)
                    && s.starting_color.is_none()
            })
            .map(|s| s.position.y)
            .min()
            .context("layout has no normal spot")?;

        for spot in &mut self.spots {
            spot.barricade_locked = spot.is_playable()
                && (spot.kind == SpotKind::Goal
                    || spot.starting_color.is_some()
                    || spot.position.y == lowest_row);
            if spot.barricade_locked && spot.kind == SpotKind::Barricade {
                bail!("barricade on locked spot {}", spot.position);
            }
        }
        Ok(())
    }

    fn compute_distances(&mut self) -> anyhow::Result<()> {
        let mut distances: Vec<Option<u32>> = vec![None; self.spots.len()];
        let mut queue = VecDeque::from([self.goal]);
        distances[self.index_of(self.goal)] = Some(0);

        while let Some(here) = queue.pop_front() {
            let i = self.index_of(here);
            let next = distances[i].unwrap_or(0) + 1;
            for neighbor in self.spots[i].neighbors.clone() {
                let j = self.index_of(neighbor);
                if distances[j].is_none() {
                    distances[j] = Some(next);
                    queue.push_back(neighbor);
                }
            }
        }

        for (spot, distance) in self.spots.iter_mut().zip(distances) {
            if !spot.is_playable() {
                continue;
            }
            spot.distance_to_goal = distance
                .with_context(|| format!("goal unreachable from {}", spot.position))?;
        }
        Ok(())
    }

    fn index_of(&self, position: Position) -> usize {
        position.y as usize * self.width + position.x as usize
    }

    /// Spot at `position`, `None` when off the grid. Outside spots are returned.
    pub fn spot(&self, position: Position) -> Option<&Spot> {
        if position.x < 0
            || position.y < 0
            || position.x as usize >= self.width
            || position.y as usize >= self.height
        {
            return None;
        }
        self.spots.get(self.index_of(position))
    }

    /// Every cell, row-major from `y = 0`, including outside ones.
    pub fn spots(&self) -> &[Spot] {
        &self.spots
    }

    /// Only the cells a pawn may stand on.
    pub fn playable_spots(&self) -> impl Iterator<Item = &Spot> {
        self.spots.iter().filter(|s| s.is_playable())
    }

    /// Where pawns of `color` enter the board.
    pub fn starting_spot(&self, color: Color) -> &Spot {
        &self.spots[self.index_of(self.starts[color.index()])]
    }

    /// The finish.
    pub fn goal(&self) -> Position {
        self.goal
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Positions of the barricades a match starts with.
    pub fn initial_barricades(&self) -> impl Iterator<Item = Position> + '_ {
        self.spots
            .iter()
            .filter(|s| s.kind == SpotKind::Barricade)
            .map(|s| s.position)
    }
}

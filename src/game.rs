//! Match state and the values exchanged with bots.
//!
//! [`GameState`] is authoritative and host-only: it is mutated exclusively by the rules engine
//! and owned by the orchestrator driving the match. [`MoveOptions`] and [`Move`] are plain
//! serializable data so they can be deep-copied across a sandbox boundary.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    sync::Arc,
};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::board::{Board, Color, Position, Spot, SpotKind};

/// Pawns owned by each seat.
pub const PAWNS_PER_COLOR: usize = 5;

/// Faces of the die.
pub const DIE_FACES: u8 = 6;

/// Identifies one pawn: its color and its number, `1..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PawnId {
    /// Owner.
    pub color: Color,
    /// Which of the owner's pawns, starting at 1.
    pub index: u8,
}

impl Display for PawnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.color, self.index)
    }
}

/// A pawn and where it stands. `position == None` means it waits at its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pawn {
    /// Which pawn.
    pub id: PawnId,
    /// Spot the pawn is on, `None` at base.
    pub position: Option<Position>,
}

impl Pawn {
    /// True while the pawn has not entered the board.
    pub fn at_base(&self) -> bool {
        self.position.is_none()
    }
}

/// One turn: a pawn going from one spot to another.
///
/// `barricade` is set exactly when `to` holds a barricade, and names where the captured
/// barricade is put back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    /// The pawn being moved.
    pub pawn: PawnId,
    /// Where the pawn was, `None` when it enters from its base.
    pub from: Option<Position>,
    /// Where the pawn lands.
    pub to: Position,
    /// Relocation target of a captured barricade.
    pub barricade: Option<Position>,
}

impl Display for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.from {
            Some(from) => write!(f, "{} {from} -> {}", self.pawn, self.to)?,
            None => write!(f, "{} base -> {}", self.pawn, self.to)?,
        }
        if let Some(barricade) = self.barricade {
            write!(f, " (barricade to {barricade})")?;
        }
        Ok(())
    }
}

/// Authoritative state of one match.
#[derive(Debug, Clone)]
pub struct GameState {
    board: Arc<Board>,
    pub(crate) pawns: [[Pawn; PAWNS_PER_COLOR]; 4],
    pub(crate) barricades: BTreeSet<Position>,
    pub(crate) turn: u32,
    pub(crate) current: Color,
    pub(crate) die: u8,
    pub(crate) winner: Option<Color>,
    pub(crate) rng: ChaCha8Rng,
}

impl GameState {
    /// Every pawn at base, barricades where the board puts them, Blue to play.
    ///
    /// The die is rolled from a generator seeded with `seed`, so two states built from the same
    /// board and seed evolve identically under the same moves.
    pub fn new(board: Arc<Board>, seed: u64) -> GameState {
        let pawns = Color::ALL.map(|color| {
            std::array::from_fn(|i| Pawn {
                id: PawnId {
                    color,
                    index: i as u8 + 1,
                },
                position: None,
            })
        });
        let barricades = board.initial_barricades().collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let die = rng.gen_range(1..=DIE_FACES);

        GameState {
            board,
            pawns,
            barricades,
            turn: 0,
            current: Color::Blue,
            die,
            winner: None,
            rng,
        }
    }

    /// The topology this match is played on.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Shared handle on the topology.
    pub fn board_handle(&self) -> Arc<Board> {
        self.board.clone()
    }

    /// Pawns of `color`, ordered by index.
    pub fn pawns(&self, color: Color) -> &[Pawn] {
        &self.pawns[color.index()]
    }

    /// Every pawn on the board or at base.
    pub fn all_pawns(&self) -> impl Iterator<Item = &Pawn> {
        self.pawns.iter().flatten()
    }

    /// Pawn standing on `position`, if any.
    pub fn pawn_at(&self, position: Position) -> Option<&Pawn> {
        self.all_pawns().find(|p| p.position == Some(position))
    }

    /// Spots currently holding a barricade.
    pub fn barricades(&self) -> &BTreeSet<Position> {
        &self.barricades
    }

    /// Content of `position` once runtime barricade moves are applied.
    pub fn spot_kind(&self, position: Position) -> SpotKind {
        match self.board.spot(position) {
            None => SpotKind::Outside,
            Some(spot) => match spot.kind {
                SpotKind::Normal | SpotKind::Barricade => {
                    if self.barricades.contains(&position) {
                        SpotKind::Barricade
                    } else {
                        SpotKind::Normal
                    }
                }
                kind => kind,
            },
        }
    }

    /// Board spot with its runtime kind.
    pub fn spot(&self, position: Position) -> Option<Spot> {
        let mut spot = self.board.spot(position)?.clone();
        spot.kind = self.spot_kind(position);
        Some(spot)
    }

    /// Number of moves applied so far.
    pub fn turn(&self) -> u32 {
        self.turn
    }

    /// Step value the current player has to move.
    pub fn die(&self) -> u8 {
        self.die
    }

    /// Seat that has won, once the match is over.
    pub fn winner(&self) -> Option<Color> {
        self.winner
    }

    /// Goal distance of a pawn. Pawns at base are one step behind their starting spot.
    pub fn pawn_distance(&self, pawn: &Pawn) -> u32 {
        match pawn.position.and_then(|p| self.board.spot(p)) {
            Some(spot) => spot.distance_to_goal,
            None => self.board.starting_spot(pawn.id.color).distance_to_goal + 1,
        }
    }

    pub(crate) fn pawn_mut(&mut self, id: PawnId) -> Option<&mut Pawn> {
        self.pawns[id.color.index()]
            .iter_mut()
            .find(|p| p.id.index == id.index)
    }

    pub(crate) fn roll(&mut self) -> u8 {
        self.die = self.rng.gen_range(1..=DIE_FACES);
        self.die
    }
}

/// A pawn as shown to bots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PawnView {
    /// Owner.
    pub color: Color,
    /// Pawn number, `1..=5`.
    pub index: u8,
    /// Spot the pawn stands on, `None` at base.
    pub position: Option<Position>,
    /// The spot itself, `None` at base.
    pub spot: Option<Spot>,
}

/// Read-only snapshot handed to the bot on move. Rebuilt every turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOptions {
    /// Seat on move.
    pub color: Color,
    /// Steps to walk this turn.
    pub die: u8,
    /// Moves applied so far in the match.
    pub turn: u32,
    /// Pawns of the seat on move.
    pub my_pawns: Vec<PawnView>,
    /// Everybody else's pawns.
    pub other_pawns: Vec<PawnView>,
    /// Board width, so `all_spots[y * width + x]` is the spot at `(x, y)`.
    pub width: usize,
    /// Every cell, row-major from `y = 0`, with runtime kinds.
    pub all_spots: Vec<Spot>,
    /// Spots holding a barricade.
    pub has_barricade: Vec<Spot>,
    /// Empty spots a captured barricade may be moved to.
    pub can_have_barricade: Vec<Spot>,
    /// Every legal move. Returning anything else forfeits the choice.
    ///
    /// Pawns at base all have the same moves, so only the lowest-index one is listed for
    /// entering the board. Entering with another base pawn is not a legal move.
    pub moves: Vec<Move>,
    /// Where each seat's pawns land when leaving base.
    pub starting_positions: BTreeMap<Color, Spot>,
}

impl MoveOptions {
    /// Spot at `position`.
    pub fn spot(&self, position: Position) -> Option<&Spot> {
        if position.x < 0 || position.y < 0 || position.x as usize >= self.width {
            return None;
        }
        self.all_spots
            .get(position.y as usize * self.width + position.x as usize)
    }

    /// Goal distance after playing `mv`.
    pub fn distance_after(&self, mv: &Move) -> u32 {
        self.spot(mv.to).map_or(u32::MAX, |s| s.distance_to_goal)
    }

    /// Goal distance before playing `mv`. Base counts as one step behind the starting spot.
    pub fn distance_before(&self, mv: &Move) -> u32 {
        match mv.from.and_then(|p| self.spot(p)) {
            Some(spot) => spot.distance_to_goal,
            None => self
                .starting_positions
                .get(&mv.pawn.color)
                .map_or(u32::MAX, |s| s.distance_to_goal + 1),
        }
    }
}

//! Rules engine: legal move generation and state transitions.
//!
//! Everything here is a pure function of a [`GameState`]; [`apply_move`] never repairs an
//! invalid move, it rejects it. Callers that deal with untrusted input (the orchestrator) must
//! substitute a legal move before calling it.
//!
//! Movement rules:
//! - the seat on move walks one pawn exactly `die` steps along spot neighbours, never visiting
//!   a spot twice;
//! - a pawn leaving its base counts its starting spot as the first step;
//! - pawns may be passed freely, barricades and the goal may not: they can only be landed on;
//! - landing on an opponent sends it back to its base, landing on an own pawn is not allowed;
//! - landing on a barricade captures it, and the move names an empty unlocked spot to put it
//!   back on.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    board::{Board, Color, Position, SpotKind},
    error::RulesError,
    game::{GameState, Move, MoveOptions, Pawn, PawnView},
};

/// Consecutive rolls without any playable seat before giving up.
pub const MAX_ROLLS_WITHOUT_MOVE: usize = 64;

/// Moves available to a seat, together with the snapshot a bot is shown.
#[derive(Debug, Clone)]
pub struct LegalMoves {
    /// Ordered by pawn index, then by goal distance of the landing spot.
    pub moves: Vec<Move>,
    /// Derived view, its `moves` field equals `moves`.
    pub options: MoveOptions,
}

/// Fresh match state on `board`, with the die rolled for the first seat able to move.
///
/// # Errors
/// [`RulesError::Deadlock`] when the board leaves nobody a move.
pub fn initial_state(board: Arc<Board>, seed: u64) -> Result<GameState, RulesError> {
    let mut state = GameState::new(board, seed);
    if enumerate(&state, state.current).is_empty() {
        pass_turn(&mut state)?;
    }
    Ok(state)
}

/// Seat expected to move next.
pub fn current_player(state: &GameState) -> Color {
    state.current
}

/// Every legal move of `color` for the current die, and the matching [`MoveOptions`].
pub fn legal_moves(state: &GameState, color: Color) -> LegalMoves {
    let moves = enumerate(state, color);
    let options = move_options(state, color, moves.clone());
    LegalMoves { moves, options }
}

/// Validate `mv` against the legal set of the seat on move and apply it.
///
/// On success the returned state has the pawn moved, any captured opponent sent to base, any
/// captured barricade relocated, the turn counter advanced and, unless the move won the match,
/// the die rolled for the next seat able to move.
///
/// # Errors
/// - [`RulesError::GameOver`] if the match already has a winner
/// - [`RulesError::IllegalMove`] if `mv` is not a legal move of the current seat
/// - [`RulesError::Deadlock`] if no seat can move afterwards
pub fn apply_move(state: &GameState, mv: &Move) -> Result<GameState, RulesError> {
    if let Some(winner) = state.winner {
        return Err(RulesError::GameOver(winner));
    }
    let illegal = |reason| RulesError::IllegalMove { mv: *mv, reason };

    if mv.pawn.color != state.current {
        return Err(illegal("not this seat's turn"));
    }
    let captures_barricade = state.spot_kind(mv.to) == SpotKind::Barricade;
    match (captures_barricade, mv.barricade.is_some()) {
        (true, false) => return Err(illegal("captured barricade needs a relocation target")),
        (false, true) => return Err(illegal("relocation target without a captured barricade")),
        _ => {}
    }
    if !enumerate(state, state.current).contains(mv) {
        return Err(illegal("not in the legal move set"));
    }

    let mut next = state.clone();
    if let Some(victim) = state.pawn_at(mv.to).map(|p| p.id) {
        trace!(%victim, "captured");
        if let Some(pawn) = next.pawn_mut(victim) {
            pawn.position = None;
        }
    }
    if let Some(pawn) = next.pawn_mut(mv.pawn) {
        pawn.position = Some(mv.to);
    }
    if let Some(target) = mv.barricade {
        next.barricades.remove(&mv.to);
        next.barricades.insert(target);
    }
    next.turn += 1;

    let reached_goal = next
        .board()
        .spot(mv.to)
        .is_some_and(|s| s.distance_to_goal == 0);
    if reached_goal {
        debug!(winner = %mv.pawn.color, turn = next.turn, "goal reached");
        next.winner = Some(mv.pawn.color);
        return Ok(next);
    }

    pass_turn(&mut next)?;
    Ok(next)
}

/// Seats ranked by their best pawn's goal distance, ties kept in seat order.
pub fn finishing_order(state: &GameState) -> Vec<Color> {
    let mut order = Color::ALL.to_vec();
    order.sort_by_key(|color| {
        state
            .pawns(*color)
            .iter()
            .map(|p| state.pawn_distance(p))
            .min()
            .unwrap_or(u32::MAX)
    });
    order
}

/// Empty spots that may receive a captured barricade, in board order.
pub fn barricade_targets(state: &GameState) -> Vec<Position> {
    state
        .board()
        .playable_spots()
        .filter(|s| s.kind != SpotKind::Goal && !s.barricade_locked)
        .map(|s| s.position)
        .filter(|p| !state.barricades.contains(p) && state.pawn_at(*p).is_none())
        .collect()
}

fn pass_turn(state: &mut GameState) -> Result<(), RulesError> {
    for _ in 0..MAX_ROLLS_WITHOUT_MOVE {
        state.current = state.current.next();
        let die = state.roll();
        if !enumerate(state, state.current).is_empty() {
            return Ok(());
        }
        debug!(seat = %state.current, die, "no legal move, skipping seat");
    }
    Err(RulesError::Deadlock(MAX_ROLLS_WITHOUT_MOVE))
}

fn enumerate(state: &GameState, color: Color) -> Vec<Move> {
    let board = state.board();
    let steps = state.die as usize;
    let relocations = barricade_targets(state);
    let mut moves = vec![];
    let mut base_pawn_done = false;

    for pawn in state.pawns(color) {
        let mut landings = BTreeSet::new();
        match pawn.position {
            Some(origin) => {
                let mut path = vec![origin];
                walk(state, color, origin, steps, &mut path, &mut landings);
            }
            None if !base_pawn_done => {
                // every pawn at base has the same moves, only the first one lists them
                base_pawn_done = true;
                let start = board.starting_spot(color).position;
                if steps == 1 {
                    if can_land(state, color, start) {
                        landings.insert(start);
                    }
                } else if can_pass(state, start) {
                    let mut path = vec![start];
                    walk(state, color, start, steps - 1, &mut path, &mut landings);
                }
            }
            None => continue,
        }

        let mut landings: Vec<Position> = landings.into_iter().collect();
        landings.sort_by_key(|p| (board.spot(*p).map_or(u32::MAX, |s| s.distance_to_goal), *p));

        for to in landings {
            let base = Move {
                pawn: pawn.id,
                from: pawn.position,
                to,
                barricade: None,
            };
            if state.spot_kind(to) == SpotKind::Barricade {
                moves.extend(relocations.iter().map(|target| Move {
                    barricade: Some(*target),
                    ..base
                }));
            } else {
                moves.push(base);
            }
        }
    }
    moves
}

fn walk(
    state: &GameState,
    color: Color,
    here: Position,
    remaining: usize,
    path: &mut Vec<Position>,
    landings: &mut BTreeSet<Position>,
) {
    let Some(spot) = state.board().spot(here) else {
        return;
    };
    for &next in &spot.neighbors {
        if path.contains(&next) {
            continue;
        }
        if remaining == 1 {
            if can_land(state, color, next) {
                landings.insert(next);
            }
        } else if can_pass(state, next) {
            path.push(next);
            walk(state, color, next, remaining - 1, path, landings);
            path.pop();
        }
    }
}

fn can_pass(state: &GameState, position: Position) -> bool {
    state.spot_kind(position) == SpotKind::Normal
}

fn can_land(state: &GameState, color: Color, position: Position) -> bool {
    state.spot_kind(position) != SpotKind::Outside
        && state
            .pawn_at(position)
            .map_or(true, |occupant| occupant.id.color != color)
}

fn move_options(state: &GameState, color: Color, moves: Vec<Move>) -> MoveOptions {
    let view = |p: &Pawn| PawnView {
        color: p.id.color,
        index: p.id.index,
        position: p.position,
        spot: p.position.and_then(|pos| state.spot(pos)),
    };
    let spots_at = |positions: Vec<Position>| {
        positions
            .into_iter()
            .filter_map(|p| state.spot(p))
            .collect::<Vec<_>>()
    };

    MoveOptions {
        color,
        die: state.die,
        turn: state.turn,
        my_pawns: state.pawns(color).iter().map(view).collect(),
        other_pawns: state
            .all_pawns()
            .filter(|p| p.id.color != color)
            .map(view)
            .collect(),
        width: state.board().width(),
        all_spots: state
            .board()
            .spots()
            .iter()
            .filter_map(|s| state.spot(s.position))
            .collect(),
        has_barricade: spots_at(state.barricades.iter().copied().collect()),
        can_have_barricade: spots_at(barricade_targets(state)),
        moves,
        starting_positions: Color::ALL
            .iter()
            .filter_map(|c| Some((*c, state.spot(state.board().starting_spot(*c).position)?)))
            .collect(),
    }
}

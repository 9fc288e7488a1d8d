use std::{collections::BTreeSet, sync::Arc};

use blockade_arena::{
    board::{Board, Color, Position, SpotKind},
    game::{GameState, Move},
    rules,
};
use proptest::{prelude::*, sample::Index};

const TINY: &str = "
...*...
...#...
ooooooo
ooooooo
B.R.G.Y
";

/// Landing spots of a walk of `steps` from `origin`, found by brute force.
fn reachable(state: &GameState, color: Color, origin: Position, steps: usize) -> BTreeSet<Position> {
    fn go(
        state: &GameState,
        color: Color,
        path: &mut Vec<Position>,
        steps: usize,
        found: &mut BTreeSet<Position>,
    ) {
        let here = *path.last().unwrap();
        if steps == 0 {
            let own = state.pawn_at(here).is_some_and(|p| p.id.color == color);
            if !own {
                found.insert(here);
            }
            return;
        }
        if path.len() > 1 && state.spot_kind(here) != SpotKind::Normal {
            return;
        }
        for &next in &state.board().spot(here).unwrap().neighbors {
            if !path.contains(&next) {
                path.push(next);
                go(state, color, path, steps - 1, found);
                path.pop();
            }
        }
    }
    let mut found = BTreeSet::new();
    go(state, color, &mut vec![origin], steps, &mut found);
    found
}

fn check_board(state: &GameState, barricade_count: usize) {
    let board = state.board();
    let occupied: Vec<Position> = state.all_pawns().filter_map(|p| p.position).collect();
    let distinct: BTreeSet<&Position> = occupied.iter().collect();
    assert_eq!(occupied.len(), distinct.len(), "two pawns share a spot");

    assert_eq!(state.barricades().len(), barricade_count);
    for &barricade in state.barricades() {
        let spot = board.spot(barricade).unwrap();
        assert!(!spot.barricade_locked, "barricade on locked spot {barricade}");
        assert_ne!(spot.kind, SpotKind::Goal);
        assert!(state.pawn_at(barricade).is_none(), "barricade under a pawn");
    }

    let on_goal = occupied
        .iter()
        .any(|p| board.spot(*p).unwrap().distance_to_goal == 0);
    assert_eq!(state.winner().is_some(), on_goal);
}

fn check_moves(state: &GameState, seat: Color, moves: &[Move]) {
    let board = state.board();
    for mv in moves {
        assert_eq!(mv.pawn.color, seat);
        let pawn = state.pawns(seat)[mv.pawn.index as usize - 1];
        assert_eq!(mv.from, pawn.position);

        let landings = match mv.from {
            Some(origin) => reachable(state, seat, origin, state.die() as usize),
            None => {
                let start = board.starting_spot(seat).position;
                if state.die() == 1 {
                    reachable(state, seat, start, 0)
                } else if state.spot_kind(start) == SpotKind::Normal {
                    reachable(state, seat, start, state.die() as usize - 1)
                } else {
                    BTreeSet::new()
                }
            }
        };
        assert!(landings.contains(&mv.to), "{mv} is not a walk of {}", state.die());

        if state.spot_kind(mv.to) == SpotKind::Barricade {
            let target = mv.barricade.expect("capture without relocation");
            let spot = board.spot(target).unwrap();
            assert_eq!(state.spot_kind(target), SpotKind::Normal);
            assert!(!spot.barricade_locked);
            assert!(state.pawn_at(target).is_none());
        } else {
            assert_eq!(mv.barricade, None);
        }
    }
}

fn playout(board: Board, seed: u64, picks: &[Index]) {
    let barricade_count = board.initial_barricades().count();
    let mut state = rules::initial_state(Arc::new(board), seed).unwrap();
    check_board(&state, barricade_count);

    for pick in picks {
        if state.winner().is_some() {
            break;
        }
        let seat = rules::current_player(&state);
        let legal = rules::legal_moves(&state, seat);
        assert!(!legal.moves.is_empty(), "{seat} is on move without moves");
        assert_eq!(legal.options.moves, legal.moves);
        check_moves(&state, seat, &legal.moves);

        let mv = legal.moves[pick.index(legal.moves.len())];
        let victim = state.pawn_at(mv.to).map(|p| p.id);
        let next = rules::apply_move(&state, &mv).unwrap();

        assert_eq!(next.turn(), state.turn() + 1);
        assert_eq!(next.pawn_at(mv.to).map(|p| p.id), Some(mv.pawn));
        if let Some(victim) = victim {
            let pawn = next.pawns(victim.color)[victim.index as usize - 1];
            assert!(pawn.at_base(), "captured {victim} is still on the board");
        }
        check_board(&next, barricade_count);
        state = next;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn standard_board_playouts_keep_invariants(
        seed in any::<u64>(),
        picks in prop::collection::vec(any::<Index>(), 150),
    ) {
        playout(Board::standard(), seed, &picks);
    }

    #[test]
    fn tiny_board_playouts_keep_invariants(
        seed in any::<u64>(),
        picks in prop::collection::vec(any::<Index>(), 300),
    ) {
        playout(Board::from_layout(TINY).unwrap(), seed, &picks);
    }

    #[test]
    fn illegal_moves_are_always_rejected(seed in any::<u64>(), dx in -3i32..=3, dy in -3i32..=3) {
        let state = rules::initial_state(Arc::new(Board::standard()), seed).unwrap();
        let seat = rules::current_player(&state);
        let legal = rules::legal_moves(&state, seat).moves;
        let mut mv = legal[0];
        mv.to = Position::new(mv.to.x + dx, mv.to.y + dy);
        prop_assume!(!legal.contains(&mv));
        prop_assert!(rules::apply_move(&state, &mv).is_err());
    }
}

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::Duration,
};

use blockade_arena::prelude::*;

const TINY: &str = "
...*...
...#...
ooooooo
ooooooo
B.R.G.Y
";

fn pool() -> Vec<Bot> {
    let mut pool = builtin::all();
    pool.push(Bot::native("SecondRandom", builtin::random_move));
    pool.push(Bot::native("SecondBasic", builtin::basic_move));
    pool
}

fn config() -> Configuration {
    Configuration::new()
        .with_seed(Some(2024))
        .with_move_budget(Duration::from_secs(2))
}

fn check_standings(standings: &[Rating], records: &[MatchRecord], target: u32) {
    assert!(standings.iter().all(|r| r.played >= target));
    assert!(standings
        .windows(2)
        .all(|w| w[0].skill.mean >= w[1].skill.mean));

    let played: u32 = standings.iter().map(|r| r.played).sum();
    assert_eq!(played as usize, records.len() * 4);
    let wins: u32 = standings.iter().map(|r| r.wins).sum();
    assert_eq!(wins as usize, records.len());

    let mut win_counts: BTreeMap<&str, u32> = BTreeMap::new();
    for record in records {
        assert_eq!(record.finishing_order.len(), 4);
        assert_eq!(record.finishing_order[0], record.winner);
        *win_counts.entry(record.winner.as_str()).or_default() += 1;
    }
    for rating in standings {
        assert_eq!(
            win_counts.get(rating.name.as_str()).copied().unwrap_or(0),
            rating.wins
        );
    }
}

#[test]
fn every_bot_reaches_the_target() {
    let board = Arc::new(Board::from_layout(TINY).unwrap());
    let scheduler = TournamentScheduler::new(board, config()).unwrap();

    let mut records = vec![];
    let standings = scheduler
        .run_with(&pool(), 20, |record| records.push(record.clone()))
        .unwrap();

    assert_eq!(standings.len(), 6);
    check_standings(&standings, &records, 20);
    // sequential runs stop as soon as the last bot reaches the target
    let last = records.last().unwrap();
    let before_last: Vec<&Rating> = standings
        .iter()
        .filter(|r| last.seats.contains(&r.name))
        .collect();
    assert!(before_last.iter().any(|r| r.played == 20));
}

#[test]
fn pipelined_matches_keep_counts_consistent() {
    let board = Arc::new(Board::from_layout(TINY).unwrap());
    let scheduler =
        TournamentScheduler::new(board, config().with_parallel_matches(3)).unwrap();

    let mut records = vec![];
    let standings = scheduler
        .run_with(&pool(), 12, |record| records.push(record.clone()))
        .unwrap();

    check_standings(&standings, &records, 12);
    let mut numbers: Vec<usize> = records.iter().map(|r| r.number).collect();
    numbers.sort_unstable();
    assert_eq!(numbers, (1..=records.len()).collect::<Vec<_>>());
}

#[test]
fn faulty_bots_do_not_stop_a_tournament() {
    let board = Arc::new(Board::from_layout(TINY).unwrap());
    let scheduler = TournamentScheduler::new(
        board,
        config().with_move_budget(Duration::from_millis(50)),
    )
    .unwrap();

    let mut pool = pool();
    pool.truncate(3);
    pool.push(Bot::broken("DoesNotCompile", "unexpected end of input"));
    pool.push(Bot::native("Panics", |_: &MoveOptions| -> anyhow::Result<Move> {
        panic!("bot bug")
    }));

    let mut records = vec![];
    let standings = scheduler
        .run_with(&pool, 5, |record| records.push(record.clone()))
        .unwrap();
    check_standings(&standings, &records, 5);
    assert!(records.iter().any(|r| r.fallbacks > 0));
}

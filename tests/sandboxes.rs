use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use blockade_arena::{
    board::{Board, Color},
    bot::Bot,
    error::SandboxFault,
    game::MoveOptions,
    rules,
    sandbox::{load_sandbox, MatchToken, MoveSandbox, ProcessSandbox, SandboxSettings},
};

const OVERHEAD: Duration = Duration::from_millis(500);

fn options() -> MoveOptions {
    let state = rules::initial_state(Arc::new(Board::standard()), 21).unwrap();
    rules::legal_moves(&state, rules::current_player(&state)).options
}

fn settings() -> SandboxSettings {
    SandboxSettings {
        startup_timeout: Duration::from_secs(5),
        bot_stderr: false,
    }
}

fn tcp_bot(strategy: &str) -> Bot {
    Bot::executable(
        format!("tcp-{strategy}"),
        env!("CARGO_BIN_EXE_tcp_bot"),
        vec![strategy.to_string()],
    )
}

#[test]
fn hanging_native_bot_times_out_within_budget() {
    let hang = Bot::native("hang", |_: &MoveOptions| loop {
        thread::sleep(Duration::from_secs(60));
    });
    let mut sandbox = load_sandbox(&hang, Color::Blue, settings());
    let budget = Duration::from_millis(100);

    let start = Instant::now();
    let proposal = sandbox.propose(MatchToken(1), &options(), budget).wait();
    assert_eq!(proposal.outcome, Err(SandboxFault::Timeout));
    assert!(start.elapsed() >= budget);
    assert!(start.elapsed() < budget + OVERHEAD);
    sandbox.teardown();
}

#[test]
fn throwing_native_bot_crashes() {
    let thrower = Bot::native("thrower", |_: &MoveOptions| -> anyhow::Result<_> {
        anyhow::bail!("syntax error on line 3")
    });
    let mut sandbox = load_sandbox(&thrower, Color::Red, settings());
    let proposal = sandbox
        .propose(MatchToken(1), &options(), Duration::from_secs(2))
        .wait();
    assert!(matches!(proposal.outcome, Err(SandboxFault::Crashed(m)) if m.contains("line 3")));
}

#[test]
fn broken_bot_is_unavailable() {
    let mut sandbox = load_sandbox(&Bot::broken("broken", "does not compile"), Color::Green, settings());
    let start = Instant::now();
    let proposal = sandbox
        .propose(MatchToken(1), &options(), Duration::from_secs(2))
        .wait();
    assert_eq!(
        proposal.outcome,
        Err(SandboxFault::Unavailable("does not compile".into()))
    );
    assert!(start.elapsed() < OVERHEAD);
}

#[test]
fn process_bot_answers_with_a_legal_move() {
    let options = options();
    let mut sandbox = load_sandbox(&tcp_bot("basic"), Color::Blue, settings());
    for token in 1..=3 {
        let proposal = sandbox
            .propose(MatchToken(token), &options, Duration::from_secs(5))
            .wait();
        let mv = proposal.outcome.unwrap();
        assert!(options.moves.contains(&mv));
        assert_eq!(proposal.token, MatchToken(token));
    }
}

#[test]
fn hanging_process_bot_is_killed_and_relaunched() {
    let options = options();
    let mut sandbox = ProcessSandbox::new(
        "tcp-hang",
        env!("CARGO_BIN_EXE_tcp_bot").into(),
        vec!["hang".into()],
        settings(),
    );
    assert!(sandbox.is_connected());
    let budget = Duration::from_millis(100);

    let start = Instant::now();
    let proposal = sandbox.propose(MatchToken(1), &options, budget).wait();
    assert_eq!(proposal.outcome, Err(SandboxFault::Timeout));
    assert!(start.elapsed() < budget + OVERHEAD);

    sandbox.teardown();
    assert!(!sandbox.is_connected());
    let proposal = sandbox.propose(MatchToken(1), &options, budget).wait();
    assert_eq!(proposal.outcome, Err(SandboxFault::Timeout));
    assert!(sandbox.is_connected());
}

#[test]
fn misbehaving_process_bots_crash() {
    let options = options();
    for strategy in ["error", "exit", "garbage"] {
        let mut sandbox = load_sandbox(&tcp_bot(strategy), Color::Yellow, settings());
        for token in 1..=2 {
            let outcome = sandbox
                .propose(MatchToken(token), &options, Duration::from_secs(5))
                .wait()
                .outcome;
            assert!(
                matches!(outcome, Err(SandboxFault::Crashed(_))),
                "{strategy}: {outcome:?}"
            );
        }
    }
}

#[test]
fn unknown_strategy_is_unavailable() {
    let mut sandbox = load_sandbox(&tcp_bot("nonsense"), Color::Blue, settings());
    let outcome = sandbox
        .propose(MatchToken(1), &options(), Duration::from_secs(1))
        .wait()
        .outcome;
    assert!(matches!(outcome, Err(SandboxFault::Unavailable(_))));
}

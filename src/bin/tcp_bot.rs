//! Out-of-process bot speaking the arena protocol.
//!
//! Usage: `tcp_bot <port> [strategy]`, where strategy is one of `random`, `first`, `killer`,
//! `basic` (the default), or one of the misbehaving ones used in tests: `hang` never answers,
//! `error` answers with an error, `exit` quits on the first request, `garbage` answers with
//! something that is not JSON.

use std::{
    env,
    io::Write,
    net::{Ipv4Addr, TcpStream},
    process, thread,
    time::Duration,
};

use anyhow::{bail, Context};
use blockade_arena::{bot::builtin, protocol};

fn main() -> anyhow::Result<()> {
    let mut args = env::args().skip(1);
    let port: u16 = args
        .next()
        .context("missing port argument")?
        .parse()
        .context("port is not a number")?;
    let strategy = args.next().unwrap_or_else(|| "basic".to_string());

    match strategy.as_str() {
        "random" => protocol::serve(port, builtin::random_move),
        "first" => protocol::serve(port, builtin::first_move),
        "killer" => protocol::serve(port, builtin::killer_move),
        "basic" => protocol::serve(port, builtin::basic_move),
        "hang" => protocol::serve(port, |_| loop {
            thread::sleep(Duration::from_secs(60));
        }),
        "error" => protocol::serve(port, |_| bail!("this bot always gives up")),
        "exit" => protocol::serve(port, |_| process::exit(3)),
        "garbage" => {
            let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))?;
            loop {
                stream.write_all(b"this is not json\n")?;
                thread::sleep(Duration::from_millis(10));
            }
        }
        other => bail!("unknown strategy '{other}'"),
    }
}

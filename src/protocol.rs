//! Wire format between the host and out-of-process bots.
//!
//! The host listens on a loopback port and launches the bot with that port as its first
//! argument. The bot connects back, then the two exchange newline-delimited JSON: one
//! [`Request`] per turn, answered by one [`Response`] echoing its `token` and `request`.

use std::{
    io::{BufRead, BufReader, Write},
    net::{Ipv4Addr, TcpStream},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    game::{Move, MoveOptions},
    sandbox::MatchToken,
};

/// Host to bot: pick a move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Match the request belongs to.
    pub token: MatchToken,
    /// Sequence number, unique per connection.
    pub request: u64,
    /// What the bot may do.
    pub options: MoveOptions,
}

/// Bot to host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Copied from the request.
    pub token: MatchToken,
    /// Copied from the request.
    pub request: u64,
    /// The answer.
    pub reply: BotReply,
}

/// What a bot answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotReply {
    /// Chosen move.
    Move(Move),
    /// The bot failed to choose.
    Error(String),
}

/// Serialize `message` as one protocol line.
pub fn encode<T: Serialize>(message: &T) -> anyhow::Result<String> {
    let mut line = serde_json::to_string(message).context("could not encode message")?;
    line.push('\n');
    Ok(line)
}

/// Parse one protocol line.
pub fn decode<'a, T: Deserialize<'a>>(line: &'a str) -> anyhow::Result<T> {
    serde_json::from_str(line.trim_end()).context("malformed message")
}

/// Bot side of the protocol: connect to `port` and answer requests with `bot` until the host
/// closes the connection.
pub fn serve<F>(port: u16, mut bot: F) -> anyhow::Result<()>
where
    F: FnMut(&MoveOptions) -> anyhow::Result<Move>,
{
    let stream =
        TcpStream::connect((Ipv4Addr::LOCALHOST, port)).context("could not reach the host")?;
    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = line.context("connection lost")?;
        let request: Request = decode(&line)?;
        let reply = match bot(&request.options) {
            Ok(mv) => BotReply::Move(mv),
            Err(e) => BotReply::Error(format!("{e:#}")),
        };
        let response = Response {
            token: request.token,
            request: request.request,
            reply,
        };
        writer.write_all(encode(&response)?.as_bytes())?;
        writer.flush()?;
    }
    debug!("host closed the connection");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Color, Position};
    use crate::game::PawnId;

    #[test]
    fn responses_are_single_lines() {
        let response = Response {
            token: MatchToken(3),
            request: 9,
            reply: BotReply::Move(Move {
                pawn: PawnId {
                    color: Color::Green,
                    index: 2,
                },
                from: None,
                to: Position::new(10, 0),
                barricade: None,
            }),
        };
        let line = encode(&response).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(decode::<Response>(&line).unwrap(), response);
    }

    #[test]
    fn error_replies_use_snake_case_tags() {
        let line = r#"{"token":1,"request":0,"reply":{"error":"gave up"}}"#;
        let response: Response = decode(line).unwrap();
        assert_eq!(response.reply, BotReply::Error("gave up".into()));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode::<Response>("not json").is_err());
    }
}

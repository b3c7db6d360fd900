//! Text protocol spoken over UDP between the robot and a base station.
//!
//! Frames look like `$NAME[=][?]ARGS*`, usually followed by a newline.
//! Anything outside `$ ... *` is ignored. Replies are plain text lines,
//! tuples formatted as `[a, b, c]`.

use std::fmt;

use thiserror::Error;

/// Reply to `$CHECK*`.
pub const HELLO: &str = "Hello from QuickBot\n";

/// Longest frame body accepted, in bytes.
pub const MAX_FRAME_LEN: usize = 128;

const START: u8 = b'$';
const END: u8 = b'*';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("no frame in input")]
    NoFrame,
    #[error("frame not terminated")]
    Unterminated,
    #[error("frame longer than {} bytes", MAX_FRAME_LEN)]
    TooLong,
    #[error("frame is not valid UTF-8")]
    NotUtf8,
    #[error("bad command name in {0:?}")]
    BadName(String),
    #[error("unknown command {0}")]
    UnknownCommand(String),
    #[error("{0} is a query and needs '?'")]
    MissingQuery(String),
    #[error("bad arguments for {command}: {args:?}")]
    BadArguments { command: String, args: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// Reference speeds.
    Pwm,
    /// Cumulative logical ticks since the last reset.
    Ticks,
    /// Estimated signed speeds.
    Speed,
    IrValues,
    IrDistances,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Check,
    Query(Query),
    SetSpeed { left: f64, right: f64 },
    /// Set speeds and get ticks and speeds back in one round trip.
    Update { left: f64, right: f64 },
    Reset,
    End,
}

impl Command {
    /// Whether the robot answers this command.
    pub fn expects_reply(&self) -> bool {
        matches!(self, Command::Check | Command::Query(_) | Command::Update { .. })
    }

    pub fn to_frame(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Check => write!(f, "$CHECK*"),
            Command::Query(q) => {
                let name = match q {
                    Query::Pwm => "PWM",
                    Query::Ticks => "ENVAL",
                    Query::Speed => "ENVEL",
                    Query::IrValues => "IRVAL",
                    Query::IrDistances => "IRDIST",
                };
                write!(f, "${}?*", name)
            }
            Command::SetSpeed { left, right } => write!(f, "$PWM={},{}*", left, right),
            Command::Update { left, right } => write!(f, "$UPDATE={},{}*", left, right),
            Command::Reset => write!(f, "$RESET*"),
            Command::End => write!(f, "$END*"),
        }
    }
}

enum State {
    WaitStart,
    InFrame,
}

/// Incremental frame splitter. Feed it bytes as they arrive.
pub struct FrameParser {
    state: State,
    body: Vec<u8>,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            state: State::WaitStart,
            body: Vec::with_capacity(MAX_FRAME_LEN),
        }
    }

    /// Process one byte. Returns `Some` once a frame closes or has to be
    /// dropped.
    pub fn push(&mut self, byte: u8) -> Option<Result<Command, FrameError>> {
        match self.state {
            State::WaitStart => {
                if byte == START {
                    self.body.clear();
                    self.state = State::InFrame;
                }
                None
            }
            State::InFrame => match byte {
                // a fresh start drops whatever was half received
                START => {
                    self.body.clear();
                    None
                }
                END => {
                    self.state = State::WaitStart;
                    Some(
                        std::str::from_utf8(&self.body)
                            .map_err(|_| FrameError::NotUtf8)
                            .and_then(parse_body),
                    )
                }
                _ if self.body.len() >= MAX_FRAME_LEN => {
                    self.state = State::WaitStart;
                    Some(Err(FrameError::TooLong))
                }
                _ => {
                    self.body.push(byte);
                    None
                }
            },
        }
    }

    /// Push every byte of `bytes`, collecting the frames that close.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Command, FrameError>> {
        bytes.iter().filter_map(|b| self.push(*b)).collect()
    }

    /// Drop any half-received frame, reporting it as `Unterminated`.
    pub fn finish(&mut self) -> Option<FrameError> {
        let open = matches!(self.state, State::InFrame);
        self.state = State::WaitStart;
        self.body.clear();
        open.then_some(FrameError::Unterminated)
    }
}

/// Every frame in one datagram. Nothing carries over between datagrams: a
/// frame still open at the end comes back as `Unterminated`.
pub fn parse_datagram(bytes: &[u8]) -> Vec<Result<Command, FrameError>> {
    let mut parser = FrameParser::new();
    let mut frames = parser.feed(bytes);
    frames.extend(parser.finish().map(Err));
    frames
}

/// Parse the first frame found in `text`.
pub fn parse_frame(text: &str) -> Result<Command, FrameError> {
    let mut parser = FrameParser::new();
    let mut started = false;
    for byte in text.bytes() {
        started |= byte == START;
        if let Some(result) = parser.push(byte) {
            return result;
        }
    }
    Err(if started { FrameError::Unterminated } else { FrameError::NoFrame })
}

fn parse_body(body: &str) -> Result<Command, FrameError> {
    let name_len = body.bytes().take_while(u8::is_ascii_uppercase).count();
    if name_len < 3 {
        return Err(FrameError::BadName(body.to_string()));
    }
    let (name, mut rest) = body.split_at(name_len);

    let set = rest.starts_with('=');
    if set {
        rest = &rest[1..];
    }
    let query = rest.starts_with('?');
    if query {
        rest = &rest[1..];
    }
    let args = if set { rest.trim() } else { "" };

    let query_only = |q: Query| {
        if query {
            Ok(Command::Query(q))
        } else {
            Err(FrameError::MissingQuery(name.to_string()))
        }
    };

    match name {
        "CHECK" => Ok(Command::Check),
        "PWM" if query => Ok(Command::Query(Query::Pwm)),
        "PWM" => {
            let (left, right) = parse_pair(name, args)?;
            Ok(Command::SetSpeed { left, right })
        }
        "UPDATE" => {
            let (left, right) = parse_pair(name, args)?;
            Ok(Command::Update { left, right })
        }
        "ENVAL" => query_only(Query::Ticks),
        "ENVEL" => query_only(Query::Speed),
        "IRVAL" => query_only(Query::IrValues),
        "IRDIST" => query_only(Query::IrDistances),
        "RESET" => Ok(Command::Reset),
        "END" => Ok(Command::End),
        _ => Err(FrameError::UnknownCommand(name.to_string())),
    }
}

fn parse_pair(command: &str, args: &str) -> Result<(f64, f64), FrameError> {
    let bad = || FrameError::BadArguments {
        command: command.to_string(),
        args: args.to_string(),
    };
    let mut parts = args.split(',').map(|p| p.trim().parse::<f64>());
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(left)), Some(Ok(right)), None) if left.is_finite() && right.is_finite() => {
            Ok((left, right))
        }
        _ => Err(bad()),
    }
}

/// `[a, b, ...]` followed by a newline.
pub fn format_tuple(values: &[f64]) -> String {
    let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]\n", items.join(", "))
}

/// Pull every number out of a tuple reply, ignoring brackets and commas.
pub fn parse_tuple(reply: &str) -> Result<Vec<f64>, FrameError> {
    reply
        .split(|c: char| c == '[' || c == ']' || c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>().map_err(|_| FrameError::BadArguments {
                command: "reply".to_string(),
                args: reply.trim().to_string(),
            })
        })
        .collect()
}

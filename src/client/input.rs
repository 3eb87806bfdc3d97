//! Input handling - parse user input and commands

use anyhow::{bail, Result};

/// One orthogonal step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Offset applied to a position, with y growing downwards
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    fn parse(word: &str) -> Option<Self> {
        match word {
            "w" | "k" | "up" | "north" => Some(Direction::Up),
            "s" | "j" | "down" | "south" => Some(Direction::Down),
            "a" | "h" | "left" | "west" => Some(Direction::Left),
            "d" | "l" | "right" | "east" => Some(Direction::Right),
            _ => None,
        }
    }
}

/// Parsed user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedInput {
    /// Blank line
    Empty,

    /// Move one step: `w`/`a`/`s`/`d`, vi keys or `up`/`down`/...
    Move(Direction),

    /// A run of steps such as `ddds`
    Path(Vec<Direction>),

    /// Control command: :command args
    ControlCommand { command: String, args: Vec<String> },
}

/// Parse a line of user input
pub fn parse_input(line: &str) -> Result<ParsedInput> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ParsedInput::Empty);
    }

    if let Some(rest) = line.strip_prefix(':') {
        let parts: Vec<&str> = rest.splitn(2, ' ').collect();
        let command = parts[0].to_lowercase();
        if command.is_empty() {
            bail!("Missing command after ':'");
        }
        let args = parts
            .get(1)
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default();

        return Ok(ParsedInput::ControlCommand { command, args });
    }

    let lowered = line.to_lowercase();
    if let Some(direction) = Direction::parse(&lowered) {
        return Ok(ParsedInput::Move(direction));
    }

    let steps: Option<Vec<Direction>> = lowered
        .chars()
        .map(|c| Direction::parse(c.encode_utf8(&mut [0u8; 4])))
        .collect();
    match steps {
        Some(steps) => Ok(ParsedInput::Path(steps)),
        None => bail!("Unknown input '{}'. Type :help for commands", line),
    }
}

//! Text formats for saved games and move records.
//!
//! A save (`.jungle`) is a full snapshot of one position: player names, side to move,
//! remaining undos and one line per piece. A record (`.record`) is the command log of
//! a session, rebuilt by replaying it through [`GameState::make_move`] and
//! [`GameState::undo`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::game::{
    Animal, Board, GameError, GameState, Move, ParseError, Piece, Players, Position, Side,
    UNDO_QUOTA,
};

/// A line that was not applied, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    pub line_no: usize,
    pub line: String,
    pub reason: ParseError,
}

impl fmt::Display for SkippedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} (`{}`)", self.line_no, self.reason, self.line)
    }
}

#[derive(Debug, Clone)]
pub struct LoadReport {
    pub state: GameState,
    pub skipped: Vec<SkippedLine>,
}

/// Encode the full position in the save format.
pub fn encode_save(state: &GameState) -> String {
    let players = state.players();
    let mut out = String::new();
    out.push_str(&format!("player RED {}\n", players.red));
    out.push_str(&format!("player BLUE {}\n", players.blue));
    out.push_str(&format!("current {}\n", state.current_player().keyword()));
    for side in [Side::Red, Side::Blue] {
        out.push_str(&format!(
            "undos {} {}\n",
            side.keyword(),
            state.undo_remaining(side)
        ));
    }
    for cell in state.board().cells() {
        if let Some(piece) = cell.piece {
            out.push_str(&format!(
                "piece {} {} {} {}\n",
                cell.row,
                cell.col,
                piece.owner.keyword(),
                piece.rank()
            ));
        }
    }
    out
}

/// Decode a save. Never fails: bad lines are skipped and reported, missing
/// directives fall back to defaults (full undo quotas, Red to move).
pub fn decode_save(text: &str) -> LoadReport {
    let mut board = Board::new();
    board.clear_pieces();
    let mut players = Players::default();
    let mut current = Side::Red;
    let mut undos = [UNDO_QUOTA, UNDO_QUOTA];
    let mut skipped = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parsed = match SaveLine::parse(line) {
            Ok(parsed) => parsed,
            Err(reason) => {
                warn!(line_no = idx + 1, %line, %reason, "skipping save line");
                skipped.push(SkippedLine {
                    line_no: idx + 1,
                    line: line.to_string(),
                    reason,
                });
                continue;
            }
        };

        match parsed {
            SaveLine::Player(side, name) => players.set_name(side, name),
            SaveLine::Current(side) => current = side,
            SaveLine::Undos(side, value) => {
                undos[side_index(side)] = value.clamp(0, i64::from(UNDO_QUOTA)) as u8;
            }
            SaveLine::Piece(pos, piece) => board.set_piece(pos, Some(piece)),
        }
    }

    let state = GameState::from_parts(board, players, current, undos[0], undos[1]);
    LoadReport { state, skipped }
}

fn side_index(side: Side) -> usize {
    match side {
        Side::Red => 0,
        Side::Blue => 1,
    }
}

enum SaveLine {
    Player(Side, String),
    Current(Side),
    Undos(Side, i64),
    Piece(Position, Piece),
}

impl SaveLine {
    fn parse(line: &str) -> Result<SaveLine, ParseError> {
        let mut head = line.splitn(2, char::is_whitespace);
        let directive = head.next().unwrap_or_default().to_ascii_lowercase();
        let rest = head.next().unwrap_or_default().trim();
        let fields: Vec<&str> = rest.split_whitespace().collect();

        match directive.as_str() {
            "player" => {
                // names may contain spaces
                let mut parts = rest.splitn(2, char::is_whitespace);
                let side = parts.next().filter(|s| !s.is_empty());
                let side: Side = side.ok_or(ParseError::MissingField("side"))?.parse()?;
                let name = parts.next().map(str::trim).filter(|n| !n.is_empty());
                let name = name.ok_or(ParseError::MissingField("name"))?;
                Ok(SaveLine::Player(side, name.to_string()))
            }
            "current" => {
                let side = fields.first().ok_or(ParseError::MissingField("side"))?;
                Ok(SaveLine::Current(side.parse()?))
            }
            "undos" => {
                let &[side, value, ..] = fields.as_slice() else {
                    return Err(ParseError::MissingField("undo count"));
                };
                Ok(SaveLine::Undos(side.parse()?, parse_int(value)?))
            }
            "piece" => {
                let &[row, col, owner, rank, ..] = fields.as_slice() else {
                    return Err(ParseError::MissingField("piece fields"));
                };
                let (row, col) = (parse_int(row)?, parse_int(col)?);
                let owner: Side = owner.parse()?;
                let rank = parse_int(rank)?;
                let pos = match (usize::try_from(row), usize::try_from(col)) {
                    (Ok(r), Ok(c)) if Position::new(r, c).in_bounds() => Position::new(r, c),
                    _ => return Err(ParseError::OutOfBounds { row, col }),
                };
                let animal = u8::try_from(rank)
                    .ok()
                    .and_then(Animal::from_rank)
                    .ok_or(ParseError::InvalidRank(rank))?;
                Ok(SaveLine::Piece(pos, Piece::new(animal, owner)))
            }
            _ => Err(ParseError::UnknownDirective(directive)),
        }
    }
}

fn parse_int(s: &str) -> Result<i64, ParseError> {
    s.parse()
        .map_err(|_| ParseError::InvalidNumber(s.to_string()))
}

/// One command of a session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEntry {
    /// Begin a fresh game; missing names are drawn at random on replay.
    Start {
        red: Option<String>,
        blue: Option<String>,
    },
    Move(Move),
    Undo,
    Stop,
}

impl LogEntry {
    /// Parse one record line. Blank lines and `#` comments yield `None`.
    pub fn parse(line: &str) -> Result<Option<LogEntry>, ParseError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let (directive, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let entry = match directive.to_ascii_lowercase().as_str() {
            "start" => {
                let mut names = parse_start_names(rest)?.into_iter();
                let (red, blue) = (names.next().flatten(), names.next().flatten());
                if let Some(extra) = names.next() {
                    return Err(ParseError::ExtraField(
                        extra.unwrap_or_else(|| UNNAMED.to_string()),
                    ));
                }
                LogEntry::Start { red, blue }
            }
            "move" => {
                let &[from, to] = fields.as_slice() else {
                    return Err(ParseError::MissingField("move coordinates"));
                };
                LogEntry::Move(Move::new(
                    Position::parse_notation(from)?,
                    Position::parse_notation(to)?,
                ))
            }
            "undo" if fields.is_empty() => LogEntry::Undo,
            "stop" if fields.is_empty() => LogEntry::Stop,
            other => return Err(ParseError::UnknownDirective(other.to_string())),
        };
        Ok(Some(entry))
    }
}

/// Placeholder for a name left to be drawn at random.
const UNNAMED: &str = "-";

/// Split the names of a `start` line. Quoted names may hold spaces, with `\`
/// escaping the next character; a bare `-` is a missing name.
fn parse_start_names(rest: &str) -> Result<Vec<Option<String>>, ParseError> {
    let mut names = Vec::new();
    let mut chars = rest.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            break;
        };

        if first == '"' {
            chars.next();
            let mut name = String::new();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some(c) => name.push(c),
                        None => return Err(ParseError::UnterminatedQuote(rest.to_string())),
                    },
                    Some(c) => name.push(c),
                    None => return Err(ParseError::UnterminatedQuote(rest.to_string())),
                }
            }
            names.push(Some(name));
        } else {
            let mut word = String::new();
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                word.push(c);
            }
            names.push((word != UNNAMED).then_some(word));
        }
    }
    Ok(names)
}

fn write_name(f: &mut fmt::Formatter<'_>, name: Option<&str>) -> fmt::Result {
    let Some(name) = name else {
        return write!(f, " {UNNAMED}");
    };
    let needs_quotes = name.is_empty()
        || name == UNNAMED
        || name
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\');
    if !needs_quotes {
        return write!(f, " {name}");
    }

    f.write_str(" \"")?;
    for c in name.chars() {
        if c == '"' || c == '\\' {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    f.write_str("\"")
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogEntry::Start { red, blue } => {
                f.write_str("start")?;
                // trailing missing names are left off
                match (red.as_deref(), blue.as_deref()) {
                    (None, None) => Ok(()),
                    (red, None) => write_name(f, red),
                    (red, blue) => {
                        write_name(f, red)?;
                        write_name(f, blue)
                    }
                }
            }
            LogEntry::Move(mv) => write!(f, "move {} {}", mv.from, mv.to),
            LogEntry::Undo => f.write_str("undo"),
            LogEntry::Stop => f.write_str("stop"),
        }
    }
}

/// Parse a whole record, keeping the good lines and reporting the rest.
pub fn parse_log(text: &str) -> (Vec<LogEntry>, Vec<SkippedLine>) {
    let mut entries = Vec::new();
    let mut skipped = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        match LogEntry::parse(line) {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => {}
            Err(reason) => {
                warn!(line_no = idx + 1, line = %line.trim(), %reason, "skipping record line");
                skipped.push(SkippedLine {
                    line_no: idx + 1,
                    line: line.trim().to_string(),
                    reason,
                });
            }
        }
    }
    (entries, skipped)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Game(#[from] GameError),
    #[error("undo before the game started")]
    NotStarted,
}

/// An entry that replay could not apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayIssue {
    pub index: usize,
    pub entry: LogEntry,
    pub error: ReplayError,
}

#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub state: GameState,
    pub applied: usize,
    pub issues: Vec<ReplayIssue>,
    /// Record lines that could not be parsed and were never replayed.
    pub skipped: Vec<SkippedLine>,
    /// Replay halted on a `stop` entry.
    pub stopped: bool,
}

/// Rebuild a game by feeding `entries` through the public move and undo operations.
/// `skipped` is left empty; [`replay_log`] fills it from the text it parsed.
///
/// A `move` seen before any `start` begins a game with random names. Replay halts
/// at `stop` or as soon as the game is won.
pub fn replay(entries: &[LogEntry]) -> ReplayReport {
    let mut state = GameState::default();
    let mut started = false;
    let mut applied = 0;
    let mut issues = Vec::new();
    let mut stopped = false;

    for (index, entry) in entries.iter().enumerate() {
        let outcome: Result<(), ReplayError> = match entry {
            LogEntry::Start { red, blue } => {
                state = GameState::with_players(Players::or_random(red.as_deref(), blue.as_deref()));
                started = true;
                Ok(())
            }
            LogEntry::Move(mv) => {
                if !started {
                    debug!("record has no start line, starting with random names");
                    state = GameState::with_players(Players::or_random(None, None));
                    started = true;
                }
                state.make_move(*mv).map(|_| ()).map_err(ReplayError::from)
            }
            LogEntry::Undo if !started => Err(ReplayError::NotStarted),
            LogEntry::Undo => state.undo().map(|_| ()).map_err(ReplayError::from),
            LogEntry::Stop => {
                stopped = true;
                Ok(())
            }
        };

        match outcome {
            Ok(()) => applied += 1,
            Err(error) => {
                warn!(index, %entry, %error, "replay entry rejected");
                issues.push(ReplayIssue {
                    index,
                    entry: entry.clone(),
                    error,
                });
            }
        }

        if stopped || state.is_game_over() {
            break;
        }
    }

    ReplayReport {
        state,
        applied,
        issues,
        skipped: Vec::new(),
        stopped,
    }
}

/// Parse and replay a whole record.
pub fn replay_log(text: &str) -> ReplayReport {
    let (entries, skipped) = parse_log(text);
    ReplayReport {
        skipped,
        ..replay(&entries)
    }
}

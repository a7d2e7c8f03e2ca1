use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

use crate::history::History;

/// Board size constants
pub const ROWS: usize = 10;
pub const COLS: usize = 7;

/// Row 0 is reserved for front-end affordances and is never a landing square.
pub const ACTION_ROW: usize = 0;

/// Undos available to each side over the life of a game.
pub const UNDO_QUOTA: u8 = 3;

pub const BLUE_DEN: Position = Position { row: 1, col: 3 };
pub const RED_DEN: Position = Position { row: 9, col: 3 };

/// Traps around Blue's den weaken Red invaders and vice versa.
const TRAPS_WEAKENING_RED: [(usize, usize); 3] = [(1, 2), (1, 4), (2, 3)];
const TRAPS_WEAKENING_BLUE: [(usize, usize); 3] = [(9, 2), (9, 4), (8, 3)];

const RIVER_ROWS: std::ops::RangeInclusive<usize> = 4..=6;
const RIVER_COLS: [usize; 4] = [1, 2, 4, 5];

const RED_SETUP: [(usize, usize, Animal); 8] = [
    (9, 6, Animal::Lion),
    (9, 0, Animal::Tiger),
    (8, 5, Animal::Dog),
    (8, 1, Animal::Cat),
    (7, 4, Animal::Leopard),
    (7, 2, Animal::Wolf),
    (7, 0, Animal::Elephant),
    (7, 6, Animal::Rat),
];

const BLUE_SETUP: [(usize, usize, Animal); 8] = [
    (1, 0, Animal::Lion),
    (1, 6, Animal::Tiger),
    (2, 1, Animal::Dog),
    (2, 5, Animal::Cat),
    (3, 2, Animal::Leopard),
    (3, 4, Animal::Wolf),
    (3, 6, Animal::Elephant),
    (3, 0, Animal::Rat),
];

const NAME_POOL: [&str; 21] = [
    "Tiger",
    "Dragon",
    "Phoenix",
    "Panda",
    "Monkey",
    "Crane",
    "Leopard",
    "Wolf",
    "Peter",
    "Andrew",
    "James",
    "John",
    "Philip",
    "Bartholomew",
    "Matthew",
    "Thomas",
    "Semaj",
    "Simon",
    "Thaddeus",
    "Amadeus",
    "Steve404",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Red,
    Blue,
}

impl Side {
    pub fn opponent(&self) -> Side {
        match self {
            Side::Red => Side::Blue,
            Side::Blue => Side::Red,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Side::Red => "Red",
            Side::Blue => "Blue",
        }
    }

    /// Keyword used by the save format.
    pub fn keyword(&self) -> &'static str {
        match self {
            Side::Red => "RED",
            Side::Blue => "BLUE",
        }
    }

    /// The den this side defends.
    pub fn den(&self) -> Position {
        match self {
            Side::Red => RED_DEN,
            Side::Blue => BLUE_DEN,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Side {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RED" => Ok(Side::Red),
            "BLUE" => Ok(Side::Blue),
            _ => Err(ParseError::UnknownSide(s.to_string())),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Animal {
    Rat = 1,
    Cat = 2,
    Dog = 3,
    Wolf = 4,
    Leopard = 5,
    Tiger = 6,
    Lion = 7,
    Elephant = 8,
}

impl Animal {
    pub const ALL: [Animal; 8] = [
        Animal::Rat,
        Animal::Cat,
        Animal::Dog,
        Animal::Wolf,
        Animal::Leopard,
        Animal::Tiger,
        Animal::Lion,
        Animal::Elephant,
    ];

    pub fn rank(&self) -> u8 {
        *self as u8
    }

    pub fn from_rank(rank: u8) -> Option<Animal> {
        Animal::ALL.get(usize::from(rank).checked_sub(1)?).copied()
    }

    /// Tigers and lions may leap across the river.
    pub fn can_jump_river(&self) -> bool {
        matches!(self, Animal::Tiger | Animal::Lion)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub animal: Animal,
    pub owner: Side,
}

impl Piece {
    pub fn new(animal: Animal, owner: Side) -> Self {
        Piece { animal, owner }
    }

    pub fn rank(&self) -> u8 {
        self.animal.rank()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

impl Position {
    pub fn new(row: usize, col: usize) -> Self {
        Position { row, col }
    }

    pub fn in_bounds(&self) -> bool {
        self.row < ROWS && self.col < COLS
    }

    /// Parse board notation such as `A7`: a column letter A-G followed by a row digit.
    pub fn parse_notation(s: &str) -> Result<Position, ParseError> {
        let mut chars = s.trim().chars();
        let (Some(letter), Some(digit), None) = (chars.next(), chars.next(), chars.next()) else {
            return Err(ParseError::InvalidCoordinate(s.to_string()));
        };
        let letter = letter.to_ascii_uppercase();
        if !('A'..='G').contains(&letter) {
            return Err(ParseError::InvalidCoordinate(s.to_string()));
        }
        let row = digit
            .to_digit(10)
            .ok_or_else(|| ParseError::InvalidCoordinate(s.to_string()))?;
        Ok(Position::new(row as usize, (letter as u8 - b'A') as usize))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match u8::try_from(self.col).ok().filter(|col| *col < 26) {
            Some(col) => write!(f, "{}{}", char::from(b'A' + col), self.row),
            None => write!(f, "({}, {})", self.row, self.col),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub from: Position,
    pub to: Position,
}

impl Move {
    pub fn new(from: Position, to: Position) -> Self {
        Move { from, to }
    }

    /// Build a move from raw row/column indices.
    pub fn from_coords(from_row: usize, from_col: usize, to_row: usize, to_col: usize) -> Self {
        Move::new(
            Position::new(from_row, from_col),
            Position::new(to_row, to_col),
        )
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// A board square. Terrain flags are fixed when the board is built.
///
/// On a den `den_owner` is the defending side. On a trap it is the side whose
/// pieces lose their rank protection there, i.e. the invader of the adjacent den.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
    pub river: bool,
    pub trap: bool,
    pub den: bool,
    pub den_owner: Option<Side>,
    pub piece: Option<Piece>,
}

impl Cell {
    fn land(row: usize, col: usize) -> Self {
        Cell {
            row,
            col,
            river: false,
            trap: false,
            den: false,
            den_owner: None,
            piece: None,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.row, self.col)
    }
}

/// The 10x7 grid. Plain values all the way down, so a copy is a full snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    cells: [[Cell; COLS]; ROWS],
}

impl Board {
    /// Terrain plus the standard starting placement.
    pub fn new() -> Self {
        let mut board = Board::terrain_only();
        for &(row, col, animal) in &RED_SETUP {
            board.cells[row][col].piece = Some(Piece::new(animal, Side::Red));
        }
        for &(row, col, animal) in &BLUE_SETUP {
            board.cells[row][col].piece = Some(Piece::new(animal, Side::Blue));
        }
        board
    }

    /// Rivers, dens and traps with no pieces on them.
    pub fn terrain_only() -> Self {
        let mut cells = [[Cell::land(0, 0); COLS]; ROWS];
        for (row, cells_row) in cells.iter_mut().enumerate() {
            for (col, cell) in cells_row.iter_mut().enumerate() {
                *cell = Cell::land(row, col);
            }
        }

        for row in RIVER_ROWS {
            for col in RIVER_COLS {
                cells[row][col].river = true;
            }
        }

        for side in [Side::Red, Side::Blue] {
            let den = side.den();
            cells[den.row][den.col].den = true;
            cells[den.row][den.col].den_owner = Some(side);
        }

        for &(row, col) in &TRAPS_WEAKENING_RED {
            cells[row][col].trap = true;
            cells[row][col].den_owner = Some(Side::Red);
        }
        for &(row, col) in &TRAPS_WEAKENING_BLUE {
            cells[row][col].trap = true;
            cells[row][col].den_owner = Some(Side::Blue);
        }

        Board { cells }
    }

    /// Panics on an out-of-bounds position; callers check `in_bounds` first.
    pub fn cell(&self, pos: Position) -> &Cell {
        &self.cells[pos.row][pos.col]
    }

    pub fn get_piece(&self, pos: Position) -> Option<Piece> {
        if pos.in_bounds() {
            self.cells[pos.row][pos.col].piece
        } else {
            None
        }
    }

    pub(crate) fn set_piece(&mut self, pos: Position, piece: Option<Piece>) {
        self.cells[pos.row][pos.col].piece = piece;
    }

    pub(crate) fn clear_pieces(&mut self) {
        for cell in self.cells.iter_mut().flatten() {
            cell.piece = None;
        }
    }

    pub fn is_river(&self, pos: Position) -> bool {
        pos.in_bounds() && self.cell(pos).river
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter().flatten()
    }

    pub fn count_pieces(&self, side: Side) -> usize {
        self.cells()
            .filter(|cell| cell.piece.is_some_and(|p| p.owner == side))
            .count()
    }

    pub fn total_pieces(&self) -> usize {
        self.cells().filter(|cell| cell.piece.is_some()).count()
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveKind {
    Step,
    RiverJump,
}

/// Why a capture was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CaptureRefusal {
    #[error("Elephant cannot capture rat")]
    ElephantCannotCaptureRat,
    #[error("Rat can only capture elephant if both are on land or both are in the river")]
    RatElephantAcrossWater,
    #[error("Rat can only capture or be captured if both pieces are in the river or both are on land")]
    RatAcrossWater,
    #[error("Attacker rank {attacker} is lower than defender rank {defender}")]
    RankTooLow { attacker: u8, defender: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum MoveError {
    #[error("Position {0:?} is off the board")]
    OutOfBounds(Position),
    #[error("Cannot move into action row")]
    ActionRow,
    #[error(
        "Pieces can only move vertically or horizontally by one square, except tiger/lion can jump river"
    )]
    IllegalGeometry,
    #[error("Cannot jump: rat blocks the river")]
    RatBlocksJump,
    #[error("Only the rat can move into or out of water")]
    WaterRestricted,
    #[error("No piece at the source position")]
    NoPiece,
    #[error("You can only move your own pieces")]
    NotYourPiece,
    #[error("Cannot move to a cell occupied by your own piece")]
    OwnPieceAtDestination,
    #[error("Cannot capture: {0}")]
    CaptureRefused(#[from] CaptureRefusal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum UndoError {
    #[error("No moves to undo")]
    NoHistory,
    #[error("No undos remaining for {0}")]
    QuotaExhausted(Side),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("Invalid move: {0}")]
    InvalidMove(#[from] MoveError),
    #[error("Undo failed: {0}")]
    Undo(#[from] UndoError),
    #[error("Game already over")]
    GameOver,
}

/// Failures decoding notation or persisted lines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown directive `{0}`")]
    UnknownDirective(String),
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("`{0}` is not a number")]
    InvalidNumber(String),
    #[error("unknown side `{0}`")]
    UnknownSide(String),
    #[error("rank {0} is not between 1 and 8")]
    InvalidRank(i64),
    #[error("square ({row}, {col}) is off the board")]
    OutOfBounds { row: i64, col: i64 },
    #[error("`{0}` is not a board coordinate")]
    InvalidCoordinate(String),
    #[error("unterminated quote in `{0}`")]
    UnterminatedQuote(String),
    #[error("unexpected `{0}`")]
    ExtraField(String),
}

/// A move that passed every check, ready to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckedMove {
    pub kind: MoveKind,
    pub piece: Piece,
    pub captured: Option<Piece>,
}

/// Check a move for `mover` against the movement rules, first failure wins.
///
/// Capture rules are not consulted here; see [`check_move`].
pub fn validate(board: &Board, mover: Side, mv: Move) -> Result<MoveKind, MoveError> {
    if !mv.from.in_bounds() {
        return Err(MoveError::OutOfBounds(mv.from));
    }
    if !mv.to.in_bounds() {
        return Err(MoveError::OutOfBounds(mv.to));
    }
    if mv.to.row == ACTION_ROW {
        return Err(MoveError::ActionRow);
    }

    let piece = board.get_piece(mv.from);
    let d_row = mv.from.row.abs_diff(mv.to.row);
    let d_col = mv.from.col.abs_diff(mv.to.col);

    let kind = if d_row + d_col == 1 {
        MoveKind::Step
    } else if piece.is_some_and(|p| p.animal.can_jump_river()) && river_jump(board, mv)? {
        MoveKind::RiverJump
    } else {
        return Err(MoveError::IllegalGeometry);
    };

    if kind == MoveKind::Step
        && (board.is_river(mv.from) || board.is_river(mv.to))
        && piece.is_none_or(|p| p.animal != Animal::Rat)
    {
        return Err(MoveError::WaterRestricted);
    }

    let piece = piece.ok_or(MoveError::NoPiece)?;
    if piece.owner != mover {
        return Err(MoveError::NotYourPiece);
    }
    if board.get_piece(mv.to).is_some_and(|p| p.owner == mover) {
        return Err(MoveError::OwnPieceAtDestination);
    }

    Ok(kind)
}

/// Whether `mv` is a straight leap over nothing but river, landing on dry land.
/// A rat anywhere in the path blocks it.
fn river_jump(board: &Board, mv: Move) -> Result<bool, MoveError> {
    let path: Vec<Position> = if mv.from.row == mv.to.row {
        let (lo, hi) = (mv.from.col.min(mv.to.col), mv.from.col.max(mv.to.col));
        (lo + 1..hi).map(|c| Position::new(mv.from.row, c)).collect()
    } else if mv.from.col == mv.to.col {
        let (lo, hi) = (mv.from.row.min(mv.to.row), mv.from.row.max(mv.to.row));
        (lo + 1..hi).map(|r| Position::new(r, mv.from.col)).collect()
    } else {
        return Ok(false);
    };

    if path.is_empty() || !path.iter().all(|&pos| board.is_river(pos)) {
        return Ok(false);
    }
    if path
        .iter()
        .any(|&pos| board.get_piece(pos).is_some_and(|p| p.animal == Animal::Rat))
    {
        return Err(MoveError::RatBlocksJump);
    }

    Ok(!board.is_river(mv.to))
}

/// Decide whether `attacker` leaving `from` may take `defender` standing on `to`.
pub fn resolve_capture(
    attacker: Piece,
    defender: Piece,
    from: &Cell,
    to: &Cell,
) -> Result<(), CaptureRefusal> {
    if to.trap && to.den_owner == Some(defender.owner) {
        return Ok(());
    }

    let same_terrain = from.river == to.river;
    match (attacker.animal, defender.animal) {
        (Animal::Rat, Animal::Elephant) => {
            return if same_terrain {
                Ok(())
            } else {
                Err(CaptureRefusal::RatElephantAcrossWater)
            };
        }
        (Animal::Elephant, Animal::Rat) => return Err(CaptureRefusal::ElephantCannotCaptureRat),
        _ => {}
    }

    if (attacker.animal == Animal::Rat || defender.animal == Animal::Rat) && !same_terrain {
        return Err(CaptureRefusal::RatAcrossWater);
    }

    if attacker.rank() >= defender.rank() {
        Ok(())
    } else {
        Err(CaptureRefusal::RankTooLow {
            attacker: attacker.rank(),
            defender: defender.rank(),
        })
    }
}

/// Full legality check: movement rules, then the capture rules if the move lands on an enemy.
pub fn check_move(board: &Board, mover: Side, mv: Move) -> Result<CheckedMove, MoveError> {
    let kind = validate(board, mover, mv)?;
    let piece = board.get_piece(mv.from).ok_or(MoveError::NoPiece)?;
    let captured = board.get_piece(mv.to);
    if let Some(defender) = captured {
        resolve_capture(piece, defender, board.cell(mv.from), board.cell(mv.to))?;
    }
    Ok(CheckedMove {
        kind,
        piece,
        captured,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WinReason {
    Elimination,
    DenInvasion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameResult {
    pub winner: Side,
    pub reason: WinReason,
}

/// Result of a successfully applied move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOutcome {
    pub kind: MoveKind,
    pub captured: Option<Piece>,
    pub result: Option<GameResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Players {
    pub red: String,
    pub blue: String,
}

impl Players {
    pub fn new(red: impl Into<String>, blue: impl Into<String>) -> Self {
        Players {
            red: red.into(),
            blue: blue.into(),
        }
    }

    /// Two distinct names drawn from the built-in pool.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut picked = NAME_POOL.choose_multiple(rng, 2);
        let red = picked.next().copied().unwrap_or("Red");
        let blue = picked.next().copied().unwrap_or("Blue");
        Players::new(red, blue)
    }

    /// Use the given names, filling any missing or blank one at random.
    pub fn or_random(red: Option<&str>, blue: Option<&str>) -> Self {
        let mut players = Players::random(&mut rand::thread_rng());
        if let Some(red) = red.map(str::trim).filter(|n| !n.is_empty()) {
            players.red = red.to_string();
        }
        if let Some(blue) = blue.map(str::trim).filter(|n| !n.is_empty()) {
            players.blue = blue.to_string();
        }
        players
    }

    pub fn name(&self, side: Side) -> &str {
        match side {
            Side::Red => &self.red,
            Side::Blue => &self.blue,
        }
    }

    pub fn set_name(&mut self, side: Side, name: impl Into<String>) {
        match side {
            Side::Red => self.red = name.into(),
            Side::Blue => self.blue = name.into(),
        }
    }

    /// `"<name> (Red)"` style label.
    pub fn label(&self, side: Side) -> String {
        format!("{} ({})", self.name(side), side)
    }
}

impl Default for Players {
    fn default() -> Self {
        Players::new("Red", "Blue")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameState {
    board: Board,
    players: Players,
    current_player: Side,
    red_undo_remaining: u8,
    blue_undo_remaining: u8,
    history: History,
    move_count: usize,
    result: Option<GameResult>,
}

impl GameState {
    /// Start a game: standard terrain and pieces, full undo quotas, empty history. Red moves first.
    pub fn new_game(red: impl Into<String>, blue: impl Into<String>) -> Self {
        Self::with_players(Players::new(red, blue))
    }

    pub fn with_players(players: Players) -> Self {
        Self::from_parts(Board::new(), players, Side::Red, UNDO_QUOTA, UNDO_QUOTA)
    }

    /// Assemble a state from persisted parts. Quotas are clamped; history and result start empty.
    pub(crate) fn from_parts(
        board: Board,
        players: Players,
        current_player: Side,
        red_undo_remaining: u8,
        blue_undo_remaining: u8,
    ) -> Self {
        GameState {
            board,
            players,
            current_player,
            red_undo_remaining: red_undo_remaining.min(UNDO_QUOTA),
            blue_undo_remaining: blue_undo_remaining.min(UNDO_QUOTA),
            history: History::new(),
            move_count: 0,
            result: None,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn players(&self) -> &Players {
        &self.players
    }

    pub fn set_player_name(&mut self, side: Side, name: impl Into<String>) {
        self.players.set_name(side, name);
    }

    pub fn current_player(&self) -> Side {
        self.current_player
    }

    pub fn undo_remaining(&self, side: Side) -> u8 {
        match side {
            Side::Red => self.red_undo_remaining,
            Side::Blue => self.blue_undo_remaining,
        }
    }

    fn undo_remaining_mut(&mut self, side: Side) -> &mut u8 {
        match side {
            Side::Red => &mut self.red_undo_remaining,
            Side::Blue => &mut self.blue_undo_remaining,
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn move_count(&self) -> usize {
        self.move_count
    }

    pub fn result(&self) -> Option<&GameResult> {
        self.result.as_ref()
    }

    pub fn is_game_over(&self) -> bool {
        self.result.is_some()
    }

    /// Winner label such as `"Alice (Red)"`, once the game has ended.
    pub fn winner(&self) -> Option<String> {
        self.result.map(|r| self.players.label(r.winner))
    }

    pub fn remaining_pieces(&self, side: Side) -> usize {
        self.board.count_pieces(side)
    }

    pub fn get_piece(&self, pos: Position) -> Option<Piece> {
        self.board.get_piece(pos)
    }

    /// Check a move for the side to play without applying it.
    pub fn check_move(&self, mv: Move) -> Result<CheckedMove, GameError> {
        if self.is_game_over() {
            return Err(GameError::GameOver);
        }
        Ok(check_move(&self.board, self.current_player, mv)?)
    }

    /// Every legal move for the side to play.
    pub fn legal_moves(&self) -> Vec<Move> {
        if self.is_game_over() {
            return Vec::new();
        }

        let mut moves = Vec::new();
        for cell in self.board.cells() {
            if !cell.piece.is_some_and(|p| p.owner == self.current_player) {
                continue;
            }
            let from = cell.position();
            for row in 1..ROWS {
                for col in 0..COLS {
                    let mv = Move::new(from, Position::new(row, col));
                    if check_move(&self.board, self.current_player, mv).is_ok() {
                        moves.push(mv);
                    }
                }
            }
        }
        moves
    }

    /// Make a move and update the game state
    pub fn make_move(&mut self, mv: Move) -> Result<MoveOutcome, GameError> {
        let checked = self.check_move(mv)?;

        self.history.push(self.board);

        self.board.set_piece(mv.to, Some(checked.piece));
        self.board.set_piece(mv.from, None);

        let mover = self.current_player;
        self.current_player = mover.opponent();
        self.move_count += 1;

        self.check_game_end();

        debug!(
            side = %mover,
            %mv,
            kind = ?checked.kind,
            captured = ?checked.captured.map(|p| p.animal),
            "move applied"
        );

        Ok(MoveOutcome {
            kind: checked.kind,
            captured: checked.captured,
            result: self.result,
        })
    }

    /// Take back the last move, charging the undo to the side that made it.
    ///
    /// Returns that side, which is also the side to play afterwards.
    pub fn undo(&mut self) -> Result<Side, GameError> {
        if self.history.is_empty() {
            return Err(UndoError::NoHistory.into());
        }

        let undone = self.current_player.opponent();
        if self.undo_remaining(undone) == 0 {
            return Err(UndoError::QuotaExhausted(undone).into());
        }

        let snapshot = self.history.pop().ok_or(UndoError::NoHistory)?;
        self.board = snapshot;
        self.current_player = undone;
        self.move_count = self.move_count.saturating_sub(1);
        *self.undo_remaining_mut(undone) -= 1;
        // Moves are refused once the game is over, so the undone move is the one that ended it.
        self.result = None;

        debug!(
            side = %undone,
            remaining = self.undo_remaining(undone),
            "move undone"
        );

        Ok(undone)
    }

    fn check_game_end(&mut self) {
        if self.result.is_some() {
            return;
        }

        let result = [Side::Red, Side::Blue]
            .into_iter()
            .find(|&side| self.board.count_pieces(side) == 0)
            .map(|loser| GameResult {
                winner: loser.opponent(),
                reason: WinReason::Elimination,
            })
            .or_else(|| {
                [Side::Red, Side::Blue]
                    .into_iter()
                    .find(|&side| {
                        self.board
                            .get_piece(side.opponent().den())
                            .is_some_and(|p| p.owner == side)
                    })
                    .map(|winner| GameResult {
                        winner,
                        reason: WinReason::DenInvasion,
                    })
            });

        if let Some(result) = result {
            info!(winner = %self.players.label(result.winner), reason = ?result.reason, "game over");
            self.result = Some(result);
        }
    }

    /// Human readable announcement of the result.
    pub fn result_message(&self) -> Option<String> {
        let result = self.result?;
        let winner = self.players.label(result.winner);
        let loser = result.winner.opponent();
        Some(match result.reason {
            WinReason::Elimination => {
                format!("{winner} wins by capturing all opponent's pieces!")
            }
            WinReason::DenInvasion => format!("{winner} wins by entering {loser}'s den!"),
        })
    }

    /// Get a string representation of the board
    pub fn display_board(&self) -> String {
        let mut result = String::new();
        result.push_str("\n   A  B  C  D  E  F  G\n");
        for row in 1..ROWS {
            result.push_str(&format!("{} ", row));
            for col in 0..COLS {
                let cell = self.board.cell(Position::new(row, col));
                let glyph = match cell.piece {
                    Some(piece) => {
                        let tag = match piece.owner {
                            Side::Red => 'R',
                            Side::Blue => 'B',
                        };
                        format!("{}{}", tag, piece.rank())
                    }
                    None if cell.river => "~~".to_string(),
                    None if cell.den => "DD".to_string(),
                    None if cell.trap => "[]".to_string(),
                    None => " .".to_string(),
                };
                result.push_str(&glyph);
                result.push(' ');
            }
            result.push('\n');
        }

        let red = self.players.label(Side::Red);
        let blue = self.players.label(Side::Blue);
        result.push_str(&format!(
            "Remaining pieces: {}: {}, {}: {}\n",
            red,
            self.remaining_pieces(Side::Red),
            blue,
            self.remaining_pieces(Side::Blue)
        ));
        result.push_str(&format!(
            "Remaining undo: {}: {}, {}: {}\n",
            red, self.red_undo_remaining, blue, self.blue_undo_remaining
        ));
        result.push_str(&format!(
            "Current player: {}\n",
            self.players.label(self.current_player)
        ));

        result
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::with_players(Players::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_board() -> GameState {
        GameState::new_game("Alice", "Bob")
    }

    /// Helper to place a piece on the board
    fn set_piece(state: &mut GameState, row: usize, col: usize, piece: Option<Piece>) {
        state.board.set_piece(Position::new(row, col), piece);
    }

    fn clear_board(state: &mut GameState) {
        state.board.clear_pieces();
    }

    fn red(animal: Animal) -> Option<Piece> {
        Some(Piece::new(animal, Side::Red))
    }

    fn blue(animal: Animal) -> Option<Piece> {
        Some(Piece::new(animal, Side::Blue))
    }

    fn play(state: &mut GameState, fr: usize, fc: usize, tr: usize, tc: usize) -> Result<MoveOutcome, GameError> {
        state.make_move(Move::from_coords(fr, fc, tr, tc))
    }

    fn rejected(err: MoveError) -> Result<MoveOutcome, GameError> {
        Err(GameError::InvalidMove(err))
    }

    #[test]
    fn test_initial_setup() {
        let game = create_test_board();

        assert_eq!(game.current_player(), Side::Red);
        assert_eq!(game.remaining_pieces(Side::Red), 8);
        assert_eq!(game.remaining_pieces(Side::Blue), 8);
        assert_eq!(game.undo_remaining(Side::Red), UNDO_QUOTA);
        assert_eq!(game.undo_remaining(Side::Blue), UNDO_QUOTA);
        assert_eq!(game.history_len(), 0);

        assert_eq!(
            game.get_piece(Position::new(9, 6)),
            red(Animal::Lion)
        );
        assert_eq!(
            game.get_piece(Position::new(3, 6)),
            blue(Animal::Elephant)
        );

        for side in [Side::Red, Side::Blue] {
            let mut ranks: Vec<u8> = game
                .board()
                .cells()
                .filter_map(|c| c.piece)
                .filter(|p| p.owner == side)
                .map(|p| p.rank())
                .collect();
            ranks.sort();
            assert_eq!(ranks, (1..=8).collect::<Vec<u8>>());
        }
    }

    #[test]
    fn test_terrain_layout() {
        let board = Board::terrain_only();

        assert_eq!(board.cells().filter(|c| c.den).count(), 2);
        assert_eq!(board.cells().filter(|c| c.trap).count(), 6);
        assert_eq!(board.cells().filter(|c| c.river).count(), 12);
        assert_eq!(board.total_pieces(), 0);

        assert_eq!(board.cell(BLUE_DEN).den_owner, Some(Side::Blue));
        assert_eq!(board.cell(RED_DEN).den_owner, Some(Side::Red));

        // Traps next to Blue's den are where Red pieces are vulnerable.
        assert!(board.cell(Position::new(2, 3)).trap);
        assert_eq!(board.cell(Position::new(2, 3)).den_owner, Some(Side::Red));
        assert_eq!(board.cell(Position::new(8, 3)).den_owner, Some(Side::Blue));

        assert!(board.is_river(Position::new(4, 1)));
        assert!(board.is_river(Position::new(6, 5)));
        assert!(!board.is_river(Position::new(5, 3)));
        assert!(!board.is_river(Position::new(5, 0)));
    }

    #[test]
    fn test_animal_ranks() {
        assert_eq!(Animal::from_rank(1), Some(Animal::Rat));
        assert_eq!(Animal::from_rank(8), Some(Animal::Elephant));
        assert_eq!(Animal::from_rank(0), None);
        assert_eq!(Animal::from_rank(9), None);
        assert_eq!(Animal::Leopard.rank(), 5);
    }

    #[test]
    fn test_notation() {
        assert_eq!(Position::parse_notation("A7"), Ok(Position::new(7, 0)));
        assert_eq!(Position::parse_notation("g1"), Ok(Position::new(1, 6)));
        assert!(Position::parse_notation("H1").is_err());
        assert!(Position::parse_notation("A").is_err());
        assert!(Position::parse_notation("A10").is_err());
        assert_eq!(Position::new(6, 3).to_string(), "D6");
        assert_eq!(Position::new(3, 200).to_string(), "(3, 200)");
        assert_eq!(
            Move::from_coords(2, 1, 2, usize::MAX).to_string(),
            format!("B2 -> (2, {})", usize::MAX)
        );
    }

    #[test]
    fn test_valid_move_switches_player() {
        let mut game = create_test_board();

        let outcome = play(&mut game, 8, 1, 7, 1).unwrap();
        assert_eq!(outcome.kind, MoveKind::Step);
        assert_eq!(outcome.captured, None);
        assert_eq!(game.current_player(), Side::Blue);
        assert_eq!(game.move_count(), 1);
        assert_eq!(game.history_len(), 1);
    }

    #[test]
    fn test_cannot_enter_action_row() {
        let mut game = create_test_board();

        assert_eq!(play(&mut game, 7, 2, 0, 2), rejected(MoveError::ActionRow));
        assert_eq!(game.current_player(), Side::Red);
        assert_eq!(game.history_len(), 0);
    }

    #[test]
    fn test_out_of_bounds_is_rejected() {
        let mut game = create_test_board();

        assert_eq!(
            play(&mut game, 9, 6, 9, 7),
            rejected(MoveError::OutOfBounds(Position::new(9, 7)))
        );
        assert_eq!(
            play(&mut game, 10, 0, 9, 0),
            rejected(MoveError::OutOfBounds(Position::new(10, 0)))
        );
    }

    #[test]
    fn test_move_from_empty_cell() {
        let mut game = create_test_board();

        assert_eq!(play(&mut game, 8, 2, 8, 3), rejected(MoveError::NoPiece));
        assert_eq!(game.current_player(), Side::Red);
    }

    #[test]
    fn test_move_opponents_piece() {
        let mut game = create_test_board();

        assert_eq!(play(&mut game, 1, 0, 2, 0), rejected(MoveError::NotYourPiece));
        assert_eq!(game.current_player(), Side::Red);
    }

    #[test]
    fn test_move_more_than_one_square() {
        let mut game = create_test_board();

        assert_eq!(play(&mut game, 7, 2, 5, 2), rejected(MoveError::IllegalGeometry));
        assert_eq!(play(&mut game, 7, 2, 8, 3), rejected(MoveError::IllegalGeometry));
        assert_eq!(play(&mut game, 7, 2, 7, 2), rejected(MoveError::IllegalGeometry));
    }

    #[test]
    fn test_move_to_cell_with_own_piece() {
        let mut game = create_test_board();

        play(&mut game, 7, 2, 7, 1).unwrap();
        play(&mut game, 3, 0, 3, 1).unwrap();
        assert_eq!(
            play(&mut game, 7, 1, 8, 1),
            rejected(MoveError::OwnPieceAtDestination)
        );
        assert_eq!(game.current_player(), Side::Red);
    }

    #[test]
    fn test_rat_into_river() {
        let mut game = create_test_board();

        play(&mut game, 7, 6, 6, 6).unwrap();
        play(&mut game, 3, 0, 4, 0).unwrap();
        let outcome = play(&mut game, 6, 6, 6, 5).unwrap();
        assert_eq!(outcome.kind, MoveKind::Step);
        assert_eq!(game.get_piece(Position::new(6, 5)), red(Animal::Rat));
    }

    #[test]
    fn test_non_rat_into_river() {
        let mut game = create_test_board();

        assert_eq!(play(&mut game, 7, 4, 6, 4), rejected(MoveError::WaterRestricted));
        assert_eq!(game.current_player(), Side::Red);
    }

    #[test]
    fn test_non_rat_cannot_step_out_of_river() {
        let mut game = create_test_board();
        clear_board(&mut game);
        set_piece(&mut game, 5, 1, red(Animal::Dog));
        set_piece(&mut game, 1, 6, blue(Animal::Dog));

        assert_eq!(play(&mut game, 5, 1, 5, 0), rejected(MoveError::WaterRestricted));
    }

    #[test]
    fn test_vertical_river_jump() {
        let mut game = create_test_board();
        clear_board(&mut game);
        set_piece(&mut game, 7, 1, red(Animal::Tiger));
        set_piece(&mut game, 3, 5, blue(Animal::Tiger));

        let outcome = play(&mut game, 7, 1, 3, 1).unwrap();
        assert_eq!(outcome.kind, MoveKind::RiverJump);
        assert_eq!(game.current_player(), Side::Blue);

        play(&mut game, 3, 5, 7, 5).unwrap();
        assert_eq!(game.current_player(), Side::Red);
    }

    #[test]
    fn test_horizontal_river_jump() {
        let mut game = create_test_board();
        clear_board(&mut game);
        set_piece(&mut game, 6, 6, red(Animal::Lion));
        set_piece(&mut game, 4, 6, blue(Animal::Tiger));

        play(&mut game, 6, 6, 6, 3).unwrap();
        play(&mut game, 4, 6, 4, 3).unwrap();
        assert_eq!(game.get_piece(Position::new(6, 3)), red(Animal::Lion));
        assert_eq!(game.get_piece(Position::new(4, 3)), blue(Animal::Tiger));
    }

    #[test]
    fn test_rat_blocks_jump() {
        let mut game = create_test_board();
        clear_board(&mut game);
        set_piece(&mut game, 7, 1, red(Animal::Tiger));
        set_piece(&mut game, 5, 1, blue(Animal::Rat));
        set_piece(&mut game, 1, 6, blue(Animal::Lion));

        assert_eq!(play(&mut game, 7, 1, 3, 1), rejected(MoveError::RatBlocksJump));
        assert_eq!(game.current_player(), Side::Red);
    }

    #[test]
    fn test_only_tiger_and_lion_jump() {
        let mut game = create_test_board();
        clear_board(&mut game);
        set_piece(&mut game, 7, 1, red(Animal::Elephant));
        set_piece(&mut game, 1, 6, blue(Animal::Lion));

        assert_eq!(play(&mut game, 7, 1, 3, 1), rejected(MoveError::IllegalGeometry));
    }

    #[test]
    fn test_jump_must_cross_the_whole_river() {
        let mut game = create_test_board();
        clear_board(&mut game);
        set_piece(&mut game, 7, 1, red(Animal::Tiger));
        set_piece(&mut game, 1, 6, blue(Animal::Lion));

        // Landing in the river or crossing land are not jumps.
        assert_eq!(play(&mut game, 7, 1, 5, 1), rejected(MoveError::IllegalGeometry));
        assert_eq!(play(&mut game, 7, 1, 2, 1), rejected(MoveError::IllegalGeometry));
    }

    #[test]
    fn test_capture_lower_and_same_rank() {
        let mut game = create_test_board();
        clear_board(&mut game);
        set_piece(&mut game, 5, 3, red(Animal::Leopard));
        set_piece(&mut game, 4, 3, blue(Animal::Leopard));
        set_piece(&mut game, 8, 0, red(Animal::Dog));
        set_piece(&mut game, 1, 0, blue(Animal::Cat));

        let outcome = play(&mut game, 5, 3, 4, 3).unwrap();
        assert_eq!(outcome.captured, blue(Animal::Leopard));
        assert_eq!(game.remaining_pieces(Side::Blue), 1);
    }

    #[test]
    fn test_capture_higher_rank() {
        let mut game = create_test_board();
        clear_board(&mut game);
        set_piece(&mut game, 5, 3, red(Animal::Wolf));
        set_piece(&mut game, 4, 3, blue(Animal::Leopard));

        assert_eq!(
            play(&mut game, 5, 3, 4, 3),
            rejected(MoveError::CaptureRefused(CaptureRefusal::RankTooLow {
                attacker: 4,
                defender: 5
            }))
        );
        assert_eq!(game.remaining_pieces(Side::Blue), 1);
    }

    #[test]
    fn test_rat_and_elephant() {
        let mut game = create_test_board();
        clear_board(&mut game);
        set_piece(&mut game, 5, 6, red(Animal::Rat));
        set_piece(&mut game, 4, 6, blue(Animal::Elephant));
        set_piece(&mut game, 1, 0, blue(Animal::Cat));
        game.current_player = Side::Blue;

        assert_eq!(
            play(&mut game, 4, 6, 5, 6),
            rejected(MoveError::CaptureRefused(
                CaptureRefusal::ElephantCannotCaptureRat
            ))
        );

        play(&mut game, 1, 0, 1, 1).unwrap();
        let outcome = play(&mut game, 5, 6, 4, 6).unwrap();
        assert_eq!(outcome.captured, blue(Animal::Elephant));
        assert_eq!(game.remaining_pieces(Side::Blue), 1);
    }

    #[test]
    fn test_river_rat_cannot_take_land_elephant() {
        let mut game = create_test_board();
        clear_board(&mut game);
        set_piece(&mut game, 5, 5, red(Animal::Rat));
        set_piece(&mut game, 5, 6, blue(Animal::Elephant));

        assert_eq!(
            play(&mut game, 5, 5, 5, 6),
            rejected(MoveError::CaptureRefused(
                CaptureRefusal::RatElephantAcrossWater
            ))
        );
        assert_eq!(game.current_player(), Side::Red);
    }

    #[test]
    fn test_rat_capture_rat_across_water() {
        let mut game = create_test_board();
        clear_board(&mut game);
        set_piece(&mut game, 4, 3, blue(Animal::Rat));
        set_piece(&mut game, 4, 4, red(Animal::Rat));
        set_piece(&mut game, 9, 0, red(Animal::Cat));
        game.current_player = Side::Blue;

        assert_eq!(
            play(&mut game, 4, 3, 4, 4),
            rejected(MoveError::CaptureRefused(CaptureRefusal::RatAcrossWater))
        );

        set_piece(&mut game, 4, 4, None);
        set_piece(&mut game, 5, 3, red(Animal::Rat));
        play(&mut game, 4, 3, 5, 3).unwrap();
        assert_eq!(game.remaining_pieces(Side::Red), 1);
        assert_eq!(game.current_player(), Side::Red);
    }

    #[test]
    fn test_capture_inside_trap() {
        let mut game = create_test_board();
        clear_board(&mut game);
        // Red leopard sitting in a trap next to Blue's den
        set_piece(&mut game, 2, 3, red(Animal::Leopard));
        set_piece(&mut game, 2, 2, blue(Animal::Cat));
        set_piece(&mut game, 9, 0, red(Animal::Dog));
        game.current_player = Side::Blue;

        let outcome = play(&mut game, 2, 2, 2, 3).unwrap();
        assert_eq!(outcome.captured, red(Animal::Leopard));
        assert_eq!(game.remaining_pieces(Side::Red), 1);
    }

    #[test]
    fn test_own_trap_gives_no_weakness() {
        let mut game = create_test_board();
        clear_board(&mut game);
        // Blue leopard defending in a trap beside its own den
        set_piece(&mut game, 2, 3, blue(Animal::Leopard));
        set_piece(&mut game, 3, 3, red(Animal::Cat));
        set_piece(&mut game, 1, 0, blue(Animal::Dog));

        assert_eq!(
            play(&mut game, 3, 3, 2, 3),
            rejected(MoveError::CaptureRefused(CaptureRefusal::RankTooLow {
                attacker: 2,
                defender: 5
            }))
        );
    }

    #[test]
    fn test_trap_override_beats_elephant_rat_rule() {
        let board = Board::terrain_only();
        let trap = board.cell(Position::new(8, 3));
        let beside = board.cell(Position::new(8, 2));
        let elephant = Piece::new(Animal::Elephant, Side::Red);
        let rat = Piece::new(Animal::Rat, Side::Blue);

        assert_eq!(resolve_capture(elephant, rat, beside, trap), Ok(()));
    }

    #[test]
    fn test_elephant_never_captures_rat() {
        let board = Board::terrain_only();
        let elephant = Piece::new(Animal::Elephant, Side::Red);
        let rat = Piece::new(Animal::Rat, Side::Blue);
        let land = board.cell(Position::new(5, 3));
        let river = board.cell(Position::new(5, 4));

        for (from, to) in [(land, land), (land, river), (river, land), (river, river)] {
            assert_eq!(
                resolve_capture(elephant, rat, from, to),
                Err(CaptureRefusal::ElephantCannotCaptureRat)
            );
        }
    }

    #[test]
    fn test_rat_takes_elephant_only_on_same_terrain() {
        let board = Board::terrain_only();
        let rat = Piece::new(Animal::Rat, Side::Red);
        let elephant = Piece::new(Animal::Elephant, Side::Blue);
        let land = board.cell(Position::new(5, 3));
        let river = board.cell(Position::new(5, 4));

        assert_eq!(resolve_capture(rat, elephant, land, land), Ok(()));
        assert_eq!(resolve_capture(rat, elephant, river, river), Ok(()));
        assert!(resolve_capture(rat, elephant, land, river).is_err());
        assert!(resolve_capture(rat, elephant, river, land).is_err());
    }

    #[test]
    fn test_den_invasion_wins() {
        let mut game = create_test_board();
        clear_board(&mut game);
        set_piece(&mut game, 2, 3, red(Animal::Leopard));
        set_piece(&mut game, 5, 0, blue(Animal::Dog));

        let outcome = play(&mut game, 2, 3, 1, 3).unwrap();
        assert_eq!(
            outcome.result,
            Some(GameResult {
                winner: Side::Red,
                reason: WinReason::DenInvasion
            })
        );
        assert!(game.is_game_over());
        assert_eq!(game.winner().as_deref(), Some("Alice (Red)"));
        assert_eq!(game.remaining_pieces(Side::Blue), 1);
    }

    #[test]
    fn test_last_piece_captured_wins() {
        let mut game = create_test_board();
        clear_board(&mut game);
        set_piece(&mut game, 5, 3, red(Animal::Lion));
        set_piece(&mut game, 4, 3, blue(Animal::Cat));

        play(&mut game, 5, 3, 4, 3).unwrap();
        assert!(game.is_game_over());
        assert_eq!(game.result().map(|r| r.reason), Some(WinReason::Elimination));
        assert_eq!(game.winner().as_deref(), Some("Alice (Red)"));
        assert_eq!(
            game.result_message().as_deref(),
            Some("Alice (Red) wins by capturing all opponent's pieces!")
        );
    }

    #[test]
    fn test_cannot_move_after_game_over() {
        let mut game = create_test_board();
        clear_board(&mut game);
        set_piece(&mut game, 5, 3, red(Animal::Lion));
        set_piece(&mut game, 4, 3, blue(Animal::Cat));
        set_piece(&mut game, 8, 0, red(Animal::Dog));

        play(&mut game, 5, 3, 4, 3).unwrap();
        assert_eq!(play(&mut game, 8, 0, 7, 0), Err(GameError::GameOver));
        assert!(game.legal_moves().is_empty());
    }

    #[test]
    fn test_result_is_not_overwritten() {
        let mut game = create_test_board();
        clear_board(&mut game);
        set_piece(&mut game, 2, 3, red(Animal::Leopard));
        set_piece(&mut game, 5, 0, blue(Animal::Dog));
        play(&mut game, 2, 3, 1, 3).unwrap();

        // Wipe Red out behind the engine's back; the recorded result stays.
        clear_board(&mut game);
        game.check_game_end();
        assert_eq!(game.result().map(|r| r.winner), Some(Side::Red));
        assert_eq!(game.result().map(|r| r.reason), Some(WinReason::DenInvasion));
    }

    #[test]
    fn test_undo_restores_board_and_player() {
        let mut game = create_test_board();
        let before = *game.board();

        play(&mut game, 7, 6, 6, 6).unwrap();
        assert_eq!(game.undo(), Ok(Side::Red));
        assert_eq!(*game.board(), before);
        assert_eq!(game.current_player(), Side::Red);
        assert_eq!(game.undo_remaining(Side::Red), 2);
        assert_eq!(game.undo_remaining(Side::Blue), 3);
        assert_eq!(game.move_count(), 0);
    }

    #[test]
    fn test_no_moves_to_undo() {
        let mut game = create_test_board();

        assert_eq!(game.undo(), Err(GameError::Undo(UndoError::NoHistory)));
        assert_eq!(game.current_player(), Side::Red);
        assert_eq!(game.undo_remaining(Side::Red), 3);

        play(&mut game, 8, 1, 7, 1).unwrap();
        game.undo().unwrap();
        assert_eq!(game.undo(), Err(GameError::Undo(UndoError::NoHistory)));
    }

    #[test]
    fn test_undo_charges_the_side_that_moved() {
        let mut game = create_test_board();

        play(&mut game, 8, 1, 7, 1).unwrap();
        play(&mut game, 2, 1, 2, 2).unwrap();
        assert_eq!(game.undo(), Ok(Side::Blue));
        assert_eq!(game.current_player(), Side::Blue);
        assert_eq!(game.undo_remaining(Side::Blue), 2);
        assert_eq!(game.undo_remaining(Side::Red), 3);
    }

    #[test]
    fn test_undo_quota_exhausted() {
        let mut game = create_test_board();

        for _ in 0..3 {
            play(&mut game, 8, 1, 7, 1).unwrap();
            assert_eq!(game.undo(), Ok(Side::Red));
        }
        assert_eq!(game.undo_remaining(Side::Red), 0);

        play(&mut game, 8, 1, 7, 1).unwrap();
        let board = *game.board();
        assert_eq!(
            game.undo(),
            Err(GameError::Undo(UndoError::QuotaExhausted(Side::Red)))
        );
        assert_eq!(*game.board(), board);
        assert_eq!(game.current_player(), Side::Blue);

        // Blue still has its own allowance.
        play(&mut game, 2, 1, 2, 2).unwrap();
        assert_eq!(game.undo(), Ok(Side::Blue));
    }

    #[test]
    fn test_undo_clears_game_over() {
        let mut game = create_test_board();
        clear_board(&mut game);
        set_piece(&mut game, 2, 3, red(Animal::Leopard));
        set_piece(&mut game, 5, 0, blue(Animal::Dog));

        play(&mut game, 2, 3, 1, 3).unwrap();
        assert!(game.is_game_over());

        game.undo().unwrap();
        assert!(!game.is_game_over());
        assert_eq!(game.winner(), None);
        assert_eq!(game.get_piece(Position::new(2, 3)), red(Animal::Leopard));
        assert_eq!(game.current_player(), Side::Red);
    }

    #[test]
    fn test_undo_restores_captured_piece() {
        let mut game = create_test_board();
        clear_board(&mut game);
        set_piece(&mut game, 5, 3, red(Animal::Leopard));
        set_piece(&mut game, 4, 3, blue(Animal::Wolf));
        set_piece(&mut game, 1, 0, blue(Animal::Cat));

        play(&mut game, 5, 3, 4, 3).unwrap();
        assert_eq!(game.remaining_pieces(Side::Blue), 1);
        game.undo().unwrap();
        assert_eq!(game.remaining_pieces(Side::Blue), 2);
        assert_eq!(game.get_piece(Position::new(4, 3)), blue(Animal::Wolf));
    }

    #[test]
    fn test_rejected_move_leaves_history_alone() {
        let mut game = create_test_board();

        play(&mut game, 8, 1, 7, 1).unwrap();
        assert!(play(&mut game, 3, 6, 5, 6).is_err());
        assert_eq!(game.history_len(), 1);
        assert_eq!(game.current_player(), Side::Blue);
    }

    #[test]
    fn test_turns_alternate_and_pieces_never_increase() {
        let mut game = create_test_board();
        let mut pieces = game.board().total_pieces();

        for step in 0..40 {
            let moves = game.legal_moves();
            if moves.is_empty() || game.is_game_over() {
                break;
            }
            let mover = game.current_player();
            let mv = moves[(step * 7) % moves.len()];
            play(&mut game, mv.from.row, mv.from.col, mv.to.row, mv.to.col).unwrap();
            assert_eq!(game.current_player(), mover.opponent());
            let now = game.board().total_pieces();
            assert!(now <= pieces);
            pieces = now;
        }
    }

    #[test]
    fn test_legal_moves_are_accepted() {
        let game = create_test_board();
        let moves = game.legal_moves();

        assert!(!moves.is_empty());
        for mv in moves {
            assert!(mv.to.row != ACTION_ROW);
            let mut copy = game.clone();
            assert!(copy.make_move(mv).is_ok(), "{} should be legal", mv);
        }
    }

    #[test]
    fn test_random_players_are_distinct() {
        let players = Players::random(&mut rand::thread_rng());
        assert_ne!(players.red, players.blue);

        let players = Players::or_random(Some("Alice"), None);
        assert_eq!(players.red, "Alice");
        assert!(!players.blue.is_empty());
    }

    #[test]
    fn test_display_board() {
        let game = create_test_board();
        let text = game.display_board();

        assert!(text.contains("A  B  C  D  E  F  G"));
        assert!(text.contains("B7"));
        assert!(text.contains("~~"));
        assert!(text.contains("Current player: Alice (Red)"));
    }

    #[test]
    fn test_state_serializes() {
        let mut game = create_test_board();
        play(&mut game, 8, 1, 7, 1).unwrap();

        let json = serde_json::to_string(&game).unwrap();
        let back: GameState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.board(), game.board());
        assert_eq!(back.current_player(), Side::Blue);
        assert_eq!(back.history_len(), 1);
    }
}

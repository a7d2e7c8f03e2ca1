use thiserror::Error;
use tracing::warn;

use crate::game::{GameError, GameState, Move, MoveOutcome, ParseError, Players, Position, Side};
use crate::persistence::LogEntry;
use crate::store::{Recorder, Store, StoreError};

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Print the board after every applied command.
    pub verbose: bool,
}

/// A game being played, with its commands written to a record as they happen.
///
/// Recording is best-effort: a failed write never stops play. It is logged and
/// kept in [`Session::record_errors`], so the caller can tell the record is incomplete.
pub struct Session {
    state: GameState,
    recorder: Option<Recorder>,
    record_errors: Vec<StoreError>,
    config: SessionConfig,
}

impl Session {
    /// Start a recorded game. If the record cannot be opened the game runs unrecorded.
    pub fn start(players: Players, store: &Store, config: SessionConfig) -> Self {
        let mut record_errors = Vec::new();
        let recorder = match store.open_record(&players) {
            Ok(recorder) => Some(recorder),
            Err(e) => {
                warn!(error = %e, "failed to create game record");
                record_errors.push(e);
                None
            }
        };

        let session = Session {
            state: GameState::with_players(players),
            recorder,
            record_errors,
            config,
        };
        session.show();
        session
    }

    /// Continue from an existing state without recording, as for loaded saves.
    pub fn review(state: GameState, config: SessionConfig) -> Self {
        Session {
            state,
            recorder: None,
            record_errors: Vec::new(),
            config,
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn into_state(self) -> GameState {
        self.state
    }

    pub fn recorder(&self) -> Option<&Recorder> {
        self.recorder.as_ref()
    }

    /// Failures opening or writing the record, oldest first.
    pub fn record_errors(&self) -> &[StoreError] {
        &self.record_errors
    }

    /// Whether every applied command made it into a record.
    pub fn is_fully_recorded(&self) -> bool {
        self.recorder.is_some() && self.record_errors.is_empty()
    }

    pub fn play(&mut self, mv: Move) -> Result<MoveOutcome, GameError> {
        let outcome = self.state.make_move(mv)?;

        self.record(&LogEntry::Move(mv).to_string());
        if let Some(message) = self.state.result_message() {
            self.record(&format!("# {message}"));
        }
        self.show();

        Ok(outcome)
    }

    /// Play a move given in board notation, e.g. `("A7", "A6")`.
    pub fn play_notation(&mut self, from: &str, to: &str) -> Result<MoveOutcome, SessionError> {
        let mv = Move::new(Position::parse_notation(from)?, Position::parse_notation(to)?);
        Ok(self.play(mv)?)
    }

    pub fn undo(&mut self) -> Result<Side, GameError> {
        let side = self.state.undo()?;
        self.record(&LogEntry::Undo.to_string());
        if self.config.verbose {
            println!(
                "Undo successful. {} has {} undos remaining.",
                self.state.players().label(side),
                self.state.undo_remaining(side)
            );
        }
        self.show();
        Ok(side)
    }

    /// Write a line to the session record, if there is one.
    pub fn append_log_event(&self, text: &str) -> Result<(), StoreError> {
        match &self.recorder {
            Some(recorder) => recorder.append(text),
            None => Ok(()),
        }
    }

    fn record(&mut self, text: &str) {
        if let Err(e) = self.append_log_event(text) {
            if let Some(recorder) = &self.recorder {
                warn!(path = %recorder.path().display(), error = %e, "failed to write game record");
            }
            self.record_errors.push(e);
        }
    }

    pub fn save(&self, store: &Store) -> Result<u32, StoreError> {
        store.save(&self.state)
    }

    fn show(&self) {
        if !self.config.verbose {
            return;
        }
        println!("{}", self.state.display_board());
        if let Some(message) = self.state.result_message() {
            println!("{message}");
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Game(#[from] GameError),
}

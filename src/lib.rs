pub mod game;
pub mod history;
pub mod persistence;
pub mod session;
pub mod store;

pub use game::*;
pub use history::*;
pub use persistence::*;
pub use session::*;
pub use store::*;

// Game entities owned by the game/phase resources; settlement only reads them
// and flips `finished`.

pub mod models;

pub use models::{Game, Member, Nation, Province};

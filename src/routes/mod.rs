pub mod auth;
pub mod me;
pub mod middleware;
pub mod player;
pub mod sets;

pub use auth::*;
pub use me::*;
pub use middleware::{require_auth, AuthUser};
pub use player::*;
pub use sets::*;

pub mod handshake;
pub mod player;
pub mod refresher;
pub mod sets;
pub mod sync;
pub mod users;

pub use handshake::HandshakeCoordinator;
pub use refresher::CredentialRefresher;
pub use sets::SetService;
pub use sync::{SyncEngine, SyncReport};
pub use users::UserService;

mod access;
mod controller;
mod directory;
mod manager;
mod member;
mod messages;
mod requests;
mod sessions;
mod state;

#[cfg(test)]
mod testing;

pub use access::*;
pub use controller::*;
pub use directory::*;
pub use manager::*;
pub use member::*;
pub use messages::*;
pub use requests::*;
pub use sessions::*;
pub use state::*;

use uuid::Uuid;

/// Identifies a group of synchronized sessions.
pub type GroupId = Uuid;
/// Identifies a user in the user directory.
pub type UserId = Uuid;
/// Identifies a library collection folder.
pub type FolderId = Uuid;
/// Identifies a connected client session. Unique within the session registry.
pub type SessionId = String;

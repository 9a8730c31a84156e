use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

mod config;
mod queuing;
mod time;

pub use config::*;
pub use queuing::*;
pub use time::*;

// Reduces verbosity
pub type Store<Id, T> = Arc<DashMap<Id, T>>;
pub type ArcedStore<Id, T> = Store<Id, Arc<T>>;

/// Identifies an item in the media library.
pub type ItemId = Uuid;

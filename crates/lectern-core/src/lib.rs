//! Lectern Core - Audiobook playback session and resume engine
//!
//! This crate provides the playback session state machine, the persisted
//! preference and position store, the sleep timer, the audio library
//! catalog and the remote-control surface.

pub mod command;
pub mod library;
pub mod media;
pub mod remote;
pub mod session;
pub mod sleep;
pub mod store;

pub use command::{ Command, CommandError, SleepArg };
pub use library::{ Catalog, Folder, FsCatalog, LibraryError, Track };
pub use media::{ LoadToken, MediaEngine, MediaError, MediaEvent, MediaEventKind, SimulatedEngine };
pub use remote::{ NowPlaying, RemoteCommand };
pub use session::{ PlaybackState, Session, SessionError, SessionEvent };
pub use sleep::{ SleepMode, SleepTimer };
pub use store::{ JsonFileStore, KeyValueStore, MemoryStore, Preferences, StoreError };

//! Preference and position persistence
//!
//! A flat key-value namespace holding the resume pointer, per-track
//! positions, per-folder skip settings and behaviour toggles. Key names are
//! part of the on-disk format and must not change between releases.

use std::collections::BTreeMap;
use std::fs;
use std::path::{ Path, PathBuf };

use serde::{ Deserialize, Serialize };
use thiserror::Error;


/// Playback rates offered to the listener.
pub const AVAILABLE_RATES: [f32; 9] = [ 0.5, 0.75, 1.0, 1.25, 1.5, 1.75, 2.0, 2.5, 3.0 ];


/// Text form of a path as stored. Paths that are not valid UTF-8 would not
/// read back as the same path, so they are not persisted at all.
fn stored_path( path: &Path ) -> Option<&str> {
    let text = path.to_str();
    if text.is_none() {
        tracing::warn!( "Not persisting non UTF-8 path {:?}", path );
    }
    text
}


/// Errors that can occur while persisting preferences.
#[derive( Debug, Error )]
pub enum StoreError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Serialization error: {0}" )]
    Serialize( #[from] serde_json::Error ),
}


/// A single stored value.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( untagged )]
pub enum StoredValue {
    Bool( bool ),
    Number( f64 ),
    Text( String ),
}


impl StoredValue {
    pub fn as_bool( &self ) -> Option<bool> {
        match self {
            StoredValue::Bool( b ) => Some( *b ),
            _ => None,
        }
    }


    pub fn as_f64( &self ) -> Option<f64> {
        match self {
            StoredValue::Number( n ) if n.is_finite() => Some( *n ),
            _ => None,
        }
    }


    pub fn as_str( &self ) -> Option<&str> {
        match self {
            StoredValue::Text( s ) => Some( s ),
            _ => None,
        }
    }
}


/// A set of changes applied together. `None` removes the key.
pub type Batch = Vec<( String, Option<StoredValue> )>;


/// Durable key-value backend.
///
/// Every change in one `write` call must become visible together, so paired
/// values (the resume path and its elapsed time) are never observed apart.
pub trait KeyValueStore {
    fn get( &self, key: &str ) -> Option<StoredValue>;

    fn write( &mut self, batch: Batch ) -> Result<(), StoreError>;
}


impl<S: KeyValueStore + ?Sized> KeyValueStore for &mut S {
    fn get( &self, key: &str ) -> Option<StoredValue> {
        ( **self ).get( key )
    }


    fn write( &mut self, batch: Batch ) -> Result<(), StoreError> {
        ( **self ).write( batch )
    }
}


fn apply( map: &mut BTreeMap<String, StoredValue>, batch: Batch ) {
    for ( key, value ) in batch {
        match value {
            Some( v ) => { map.insert( key, v ); }
            None => { map.remove( &key ); }
        }
    }
}


/// In-memory store, for tests and throwaway sessions.
#[derive( Debug, Clone, Default, PartialEq )]
pub struct MemoryStore {
    values: BTreeMap<String, StoredValue>,
}


impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}


impl KeyValueStore for MemoryStore {
    fn get( &self, key: &str ) -> Option<StoredValue> {
        self.values.get( key ).cloned()
    }


    fn write( &mut self, batch: Batch ) -> Result<(), StoreError> {
        apply( &mut self.values, batch );
        Ok(())
    }
}


/// Store persisted as one JSON object on disk.
///
/// Reads are served from memory; each write rewrites the file through a
/// temporary sibling and a rename.
#[derive( Debug )]
pub struct JsonFileStore {
    path: PathBuf,
    values: BTreeMap<String, StoredValue>,
}


impl JsonFileStore {
    /// Opens the store at `path`. A missing file starts empty; an unreadable
    /// one is logged and replaced on the next write.
    pub fn open( path: impl Into<PathBuf> ) -> Result<Self, StoreError> {
        let path = path.into();

        let values = if path.exists() {
            let contents = fs::read_to_string( &path )?;
            match serde_json::from_str( &contents ) {
                Ok( v ) => v,
                Err( e ) => {
                    tracing::warn!( "Discarding unreadable state file {:?}: {}", path, e );
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok( Self { path, values } )
    }


    /// Default state file: `<data dir>/lectern/state.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_local_dir().map( |d| d.join( "lectern" ).join( "state.json" ) )
    }


    pub fn path( &self ) -> &Path {
        &self.path
    }


    fn persist( &self ) -> Result<(), StoreError> {
        if let Some( parent ) = self.path.parent() {
            fs::create_dir_all( parent )?;
        }
        let json = serde_json::to_string_pretty( &self.values )?;
        let tmp = self.path.with_extension( "json.tmp" );
        fs::write( &tmp, json )?;
        fs::rename( &tmp, &self.path )?;
        Ok(())
    }
}


impl KeyValueStore for JsonFileStore {
    fn get( &self, key: &str ) -> Option<StoredValue> {
        self.values.get( key ).cloned()
    }


    fn write( &mut self, batch: Batch ) -> Result<(), StoreError> {
        apply( &mut self.values, batch );
        self.persist()
    }
}


mod keys {
    use std::path::Path;

    pub const PLAYBACK_RATE: &str = "playback_rate";
    pub const LAST_PLAYED_PATH: &str = "last_played_path";
    pub const LAST_PLAYED_ELAPSED: &str = "last_played_elapsed";
    pub const DEFAULT_SKIP_INTRO: &str = "default_skip_intro_seconds";
    pub const DEFAULT_SKIP_OUTRO: &str = "default_skip_outro_seconds";
    pub const AUTO_PLAY_ON_LAUNCH: &str = "auto_play_on_launch";
    pub const REMEMBER_POSITION_PER_TRACK: &str = "remember_position_per_track";


    pub fn track_position( path: &Path ) -> String {
        format!( "track_position:{}", path.display() )
    }


    pub fn folder_skip_intro( folder: &str ) -> String {
        format!( "folder_skip_intro:{}", folder )
    }


    pub fn folder_skip_outro( folder: &str ) -> String {
        format!( "folder_skip_outro:{}", folder )
    }


    pub fn folder_last_track( folder: &str ) -> String {
        format!( "folder_last_track:{}", folder )
    }
}


/// The global resume pointer.
#[derive( Debug, Clone, PartialEq )]
pub struct ResumePoint {
    pub path: PathBuf,
    pub elapsed: f64,
}


/// Typed access to the stored preferences, with default substitution.
///
/// Write failures are logged and dropped: resume state is best-effort.
#[derive( Debug )]
pub struct Preferences<S> {
    store: S,
}


impl<S: KeyValueStore> Preferences<S> {
    pub fn new( store: S ) -> Self {
        Self { store }
    }


    /// Gets the backing store.
    pub fn store( &self ) -> &S {
        &self.store
    }


    pub fn into_store( self ) -> S {
        self.store
    }


    fn commit( &mut self, batch: Batch ) {
        if let Err( e ) = self.store.write( batch ) {
            tracing::warn!( "Failed to persist preferences: {}", e );
        }
    }


    fn set( &mut self, key: impl Into<String>, value: StoredValue ) {
        self.commit( vec![ ( key.into(), Some( value ) ) ] );
    }


    fn number( &self, key: &str ) -> Option<f64> {
        self.store.get( key ).and_then( |v| v.as_f64() )
    }


    fn seconds( &self, key: &str ) -> Option<u32> {
        self.number( key ).map( |n| n.max( 0.0 ) as u32 )
    }


    fn flag( &self, key: &str ) -> Option<bool> {
        self.store.get( key ).and_then( |v| v.as_bool() )
    }


    // -- playback rate

    /// Stored global rate, `1.0` when unset or invalid.
    pub fn playback_rate( &self ) -> f32 {
        match self.number( keys::PLAYBACK_RATE ) {
            Some( rate ) if rate > 0.0 => rate as f32,
            _ => 1.0,
        }
    }


    pub fn set_playback_rate( &mut self, rate: f32 ) {
        self.set( keys::PLAYBACK_RATE, StoredValue::Number( rate as f64 ) );
    }


    // -- global resume pointer

    pub fn resume_point( &self ) -> Option<ResumePoint> {
        let path = self.store.get( keys::LAST_PLAYED_PATH )?;
        let path = PathBuf::from( path.as_str()? );
        let elapsed = self.number( keys::LAST_PLAYED_ELAPSED ).unwrap_or( 0.0 ).max( 0.0 );
        Some( ResumePoint { path, elapsed } )
    }


    pub fn save_resume_point( &mut self, path: &Path, elapsed: f64 ) {
        let Some( text ) = stored_path( path ) else {
            return;
        };
        self.commit( vec![
            ( keys::LAST_PLAYED_PATH.into(), Some( StoredValue::Text( text.into() ) ) ),
            ( keys::LAST_PLAYED_ELAPSED.into(), Some( StoredValue::Number( elapsed ) ) ),
        ]);
    }


    pub fn clear_resume_point( &mut self ) {
        self.commit( vec![
            ( keys::LAST_PLAYED_PATH.into(), None ),
            ( keys::LAST_PLAYED_ELAPSED.into(), None ),
        ]);
    }


    /// Saves the resume pointer and, when enabled, the per-track position
    /// in one batch.
    pub fn save_playback_position( &mut self, path: &Path, elapsed: f64 ) {
        let Some( text ) = stored_path( path ) else {
            return;
        };
        let mut batch: Batch = vec![
            ( keys::LAST_PLAYED_PATH.into(), Some( StoredValue::Text( text.into() ) ) ),
            ( keys::LAST_PLAYED_ELAPSED.into(), Some( StoredValue::Number( elapsed ) ) ),
        ];
        if self.remember_position_per_track() {
            batch.push(( keys::track_position( path ), Some( StoredValue::Number( elapsed ) ) ));
        }
        self.commit( batch );
    }


    // -- per-track positions

    /// Remembered position of a track; `0.0` when unset or when per-track
    /// memory is disabled.
    pub fn track_position( &self, path: &Path ) -> f64 {
        if !self.remember_position_per_track() {
            return 0.0;
        }
        self.number( &keys::track_position( path ) ).unwrap_or( 0.0 ).max( 0.0 )
    }


    pub fn save_track_position( &mut self, path: &Path, elapsed: f64 ) {
        if !self.remember_position_per_track() || stored_path( path ).is_none() {
            return;
        }
        self.set( keys::track_position( path ), StoredValue::Number( elapsed ) );
    }


    pub fn clear_track_position( &mut self, path: &Path ) {
        self.commit( vec![ ( keys::track_position( path ), None ) ] );
    }


    // -- skip intro / outro

    pub fn default_skip_intro( &self ) -> u32 {
        self.seconds( keys::DEFAULT_SKIP_INTRO ).unwrap_or( 0 )
    }


    pub fn set_default_skip_intro( &mut self, seconds: u32 ) {
        self.set( keys::DEFAULT_SKIP_INTRO, StoredValue::Number( seconds as f64 ) );
    }


    pub fn default_skip_outro( &self ) -> u32 {
        self.seconds( keys::DEFAULT_SKIP_OUTRO ).unwrap_or( 0 )
    }


    pub fn set_default_skip_outro( &mut self, seconds: u32 ) {
        self.set( keys::DEFAULT_SKIP_OUTRO, StoredValue::Number( seconds as f64 ) );
    }


    /// Skip-intro seconds for a folder, falling back to the current global
    /// default when the folder was never configured.
    pub fn skip_intro( &self, folder: &str ) -> u32 {
        self.seconds( &keys::folder_skip_intro( folder ) )
            .unwrap_or_else( || self.default_skip_intro() )
    }


    pub fn set_skip_intro( &mut self, folder: &str, seconds: u32 ) {
        self.set( keys::folder_skip_intro( folder ), StoredValue::Number( seconds as f64 ) );
    }


    /// Skip-outro seconds for a folder, with the same fallback as `skip_intro`.
    pub fn skip_outro( &self, folder: &str ) -> u32 {
        self.seconds( &keys::folder_skip_outro( folder ) )
            .unwrap_or_else( || self.default_skip_outro() )
    }


    pub fn set_skip_outro( &mut self, folder: &str, seconds: u32 ) {
        self.set( keys::folder_skip_outro( folder ), StoredValue::Number( seconds as f64 ) );
    }


    // -- per-folder last track

    pub fn last_played_track( &self, folder: &str ) -> Option<PathBuf> {
        self.store.get( &keys::folder_last_track( folder ) )
            .and_then( |v| v.as_str().map( PathBuf::from ) )
    }


    pub fn save_last_played_track( &mut self, folder: &str, path: &Path ) {
        if let Some( text ) = stored_path( path ) {
            self.set( keys::folder_last_track( folder ), StoredValue::Text( text.into() ) );
        }
    }


    pub fn clear_last_played_track( &mut self, folder: &str ) {
        self.commit( vec![ ( keys::folder_last_track( folder ), None ) ] );
    }


    // -- toggles

    pub fn auto_play_on_launch( &self ) -> bool {
        self.flag( keys::AUTO_PLAY_ON_LAUNCH ).unwrap_or( false )
    }


    pub fn set_auto_play_on_launch( &mut self, enabled: bool ) {
        self.set( keys::AUTO_PLAY_ON_LAUNCH, StoredValue::Bool( enabled ) );
    }


    pub fn remember_position_per_track( &self ) -> bool {
        self.flag( keys::REMEMBER_POSITION_PER_TRACK ).unwrap_or( true )
    }


    pub fn set_remember_position_per_track( &mut self, enabled: bool ) {
        self.set( keys::REMEMBER_POSITION_PER_TRACK, StoredValue::Bool( enabled ) );
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn prefs() -> Preferences<MemoryStore> {
        Preferences::new( MemoryStore::new() )
    }


    #[test]
    fn test_defaults() {
        let p = prefs();
        assert_eq!( p.playback_rate(), 1.0 );
        assert!( p.resume_point().is_none() );
        assert_eq!( p.default_skip_intro(), 0 );
        assert_eq!( p.default_skip_outro(), 0 );
        assert!( !p.auto_play_on_launch() );
        assert!( p.remember_position_per_track() );
        assert_eq!( p.track_position( Path::new( "/a.mp3" ) ), 0.0 );
        assert!( p.last_played_track( "Dune" ).is_none() );
    }


    #[test]
    fn test_invalid_rate_falls_back() {
        let mut p = prefs();
        p.set_playback_rate( 0.0 );
        assert_eq!( p.playback_rate(), 1.0 );
        p.set_playback_rate( 1.5 );
        assert_eq!( p.playback_rate(), 1.5 );
    }


    #[test]
    fn test_folder_skip_follows_later_default_changes() {
        let mut p = prefs();
        p.set_skip_intro( "Configured", 20 );
        assert_eq!( p.skip_intro( "Other" ), 0 );

        p.set_default_skip_intro( 30 );
        assert_eq!( p.skip_intro( "Configured" ), 20 );
        assert_eq!( p.skip_intro( "Other" ), 30 );

        // Reading never creates an entry
        p.set_default_skip_intro( 5 );
        assert_eq!( p.skip_intro( "Other" ), 5 );
    }


    #[test]
    fn test_explicit_zero_overrides_default() {
        let mut p = prefs();
        p.set_default_skip_outro( 45 );
        p.set_skip_outro( "Podcast", 0 );
        assert_eq!( p.skip_outro( "Podcast" ), 0 );
        assert_eq!( p.skip_outro( "Book" ), 45 );
    }


    #[test]
    fn test_playback_position_is_paired() {
        let mut p = prefs();
        let path = Path::new( "/books/Dune/01.mp3" );
        p.save_playback_position( path, 42.5 );

        assert_eq!( p.resume_point(), Some( ResumePoint { path: path.to_path_buf(), elapsed: 42.5 } ) );
        assert_eq!( p.track_position( path ), 42.5 );

        p.clear_resume_point();
        assert!( p.resume_point().is_none() );
        assert_eq!( p.track_position( path ), 42.5 );
    }


    #[test]
    fn test_track_memory_toggle_keeps_global_pointer() {
        let mut p = prefs();
        let path = Path::new( "/books/Dune/01.mp3" );
        p.set_remember_position_per_track( false );
        p.save_playback_position( path, 12.0 );
        p.save_track_position( path, 13.0 );

        assert_eq!( p.resume_point().map( |r| r.elapsed ), Some( 12.0 ) );
        assert_eq!( p.track_position( path ), 0.0 );

        p.set_remember_position_per_track( true );
        assert_eq!( p.track_position( path ), 0.0 );
    }


    #[test]
    fn test_last_played_track_per_folder() {
        let mut p = prefs();
        p.save_last_played_track( "Dune", Path::new( "/books/Dune/03.mp3" ) );
        assert_eq!( p.last_played_track( "Dune" ), Some( PathBuf::from( "/books/Dune/03.mp3" ) ) );
        p.clear_last_played_track( "Dune" );
        assert!( p.last_played_track( "Dune" ).is_none() );
    }


    #[cfg( unix )]
    #[test]
    fn test_non_utf8_paths_are_not_persisted() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let path = Path::new( OsStr::from_bytes( b"/books/Dune/\xff.mp3" ) );
        let mut store = MemoryStore::new();
        {
            let mut p = Preferences::new( &mut store );
            p.save_resume_point( Path::new( "/books/Dune/01.mp3" ), 40.0 );
            p.save_playback_position( path, 12.0 );
            p.save_resume_point( path, 12.0 );
            p.save_track_position( path, 12.0 );
            p.save_last_played_track( "Dune", path );

            assert_eq!( p.resume_point().unwrap().path, PathBuf::from( "/books/Dune/01.mp3" ) );
            assert_eq!( p.track_position( path ), 0.0 );
            assert!( p.last_played_track( "Dune" ).is_none() );
        }
        assert!( store.get( &keys::track_position( path ) ).is_none() );
    }


    #[test]
    fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "nested" ).join( "state.json" );

        {
            let mut p = Preferences::new( JsonFileStore::open( &path ).unwrap() );
            p.save_playback_position( Path::new( "/books/a.mp3" ), 50.0 );
            p.set_playback_rate( 1.25 );
            p.set_auto_play_on_launch( true );
        }

        let p = Preferences::new( JsonFileStore::open( &path ).unwrap() );
        assert_eq!( p.resume_point().map( |r| r.elapsed ), Some( 50.0 ) );
        assert_eq!( p.playback_rate(), 1.25 );
        assert!( p.auto_play_on_launch() );
        assert!( !path.with_extension( "json.tmp" ).exists() );
    }


    #[test]
    fn test_json_store_survives_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "state.json" );
        fs::write( &path, "{ not json" ).unwrap();

        let mut store = JsonFileStore::open( &path ).unwrap();
        assert!( store.get( keys::PLAYBACK_RATE ).is_none() );
        store.write( vec![ ( keys::PLAYBACK_RATE.into(), Some( StoredValue::Number( 2.0 ) ) ) ] ).unwrap();
        assert_eq!( JsonFileStore::open( &path ).unwrap().get( keys::PLAYBACK_RATE ), Some( StoredValue::Number( 2.0 ) ) );
    }
}

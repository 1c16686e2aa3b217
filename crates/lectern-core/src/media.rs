//! Media engine interface
//!
//! The session drives decoding and output through `MediaEngine`. Engines
//! report readiness, settled seeks, natural ends and failures as events
//! tagged with the `LoadToken` of the load they belong to, so callbacks from
//! a superseded track can be told apart from the current one.

use std::collections::{ HashMap, HashSet };
use std::path::{ Path, PathBuf };

use thiserror::Error;

use crate::library::is_audio_file;


/// Errors an engine can report synchronously from `load`.
#[derive( Debug, Error )]
pub enum MediaError {
    #[error( "Failed to open file: {0}" )]
    FileOpen( String ),

    #[error( "Unsupported format: {0}" )]
    Unsupported( String ),
}


/// Identifies one `load` call.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash, Default )]
pub struct LoadToken( u64 );


impl LoadToken {
    /// The token following this one.
    pub fn next( self ) -> Self {
        LoadToken( self.0.wrapping_add( 1 ) )
    }
}


/// What happened inside the engine.
#[derive( Debug, Clone, PartialEq )]
pub enum MediaEventKind {
    /// The loaded media can accept seeks and start playing
    Ready,
    SeekCompleted,
    /// Playback reached the end of the media
    Finished,
    Failed( String ),
}


#[derive( Debug, Clone, PartialEq )]
pub struct MediaEvent {
    pub token: LoadToken,
    pub kind: MediaEventKind,
}


/// A single-item media player.
///
/// `load` returns as soon as loading has started; `Ready` follows through
/// `poll_events`. Positions and durations are in seconds.
pub trait MediaEngine {
    fn load( &mut self, path: &Path, token: LoadToken ) -> Result<(), MediaError>;

    /// Drops the loaded item; pending events for it are discarded.
    fn unload( &mut self );

    fn play( &mut self, rate: f32 );

    fn pause( &mut self );

    fn seek( &mut self, position: f64 );

    fn set_rate( &mut self, rate: f32 );

    fn is_playing( &self ) -> bool;

    fn position( &self ) -> f64;

    /// Length of the loaded item, `0.0` when unknown.
    fn duration( &self ) -> f64;

    fn poll_events( &mut self ) -> Vec<MediaEvent>;
}


/// Resolves a track length for the simulated engine.
pub type DurationProbe = fn( &Path ) -> Option<f64>;


#[derive( Debug )]
struct LoadedItem {
    token: LoadToken,
    duration: f64,
    position: f64,
    ready: bool,
    playing: bool,
    rate: f32,
}


/// Engine with a virtual clock and no audio output.
///
/// Time only moves through `advance`. Used by the tests and by the headless
/// driver.
#[derive( Default )]
pub struct SimulatedEngine {
    durations: HashMap<PathBuf, f64>,
    probe: Option<DurationProbe>,
    failing: HashSet<PathBuf>,
    manual_ready: bool,
    item: Option<LoadedItem>,
    events: Vec<MediaEvent>,
}


impl SimulatedEngine {
    /// Creates an engine that knows no media yet.
    pub fn new() -> Self {
        Self::default()
    }


    /// Creates an engine that asks `probe` for the length of unknown paths.
    pub fn with_probe( probe: DurationProbe ) -> Self {
        Self { probe: Some( probe ), ..Self::default() }
    }


    /// Registers the length of a path.
    pub fn set_duration( &mut self, path: impl Into<PathBuf>, duration: f64 ) {
        self.durations.insert( path.into(), duration );
    }


    /// Makes loads of `path` fail asynchronously with a decode error.
    pub fn fail_path( &mut self, path: impl Into<PathBuf> ) {
        self.failing.insert( path.into() );
    }


    /// When disabled, loads stay pending until `complete_load`.
    pub fn set_auto_ready( &mut self, auto: bool ) {
        self.manual_ready = !auto;
    }


    /// Finishes a pending load.
    pub fn complete_load( &mut self ) {
        if let Some( item ) = self.item.as_mut() {
            if !item.ready {
                item.ready = true;
                self.events.push( MediaEvent { token: item.token, kind: MediaEventKind::Ready } );
            }
        }
    }


    /// Rate of the loaded item.
    pub fn rate( &self ) -> Option<f32> {
        self.item.as_ref().map( |i| i.rate )
    }


    /// Moves the clock forward by `seconds` of wall time.
    pub fn advance( &mut self, seconds: f64 ) {
        let Some( item ) = self.item.as_mut() else { return };
        if !item.ready || !item.playing {
            return;
        }

        item.position += seconds * item.rate as f64;
        if item.position >= item.duration {
            item.position = item.duration;
            item.playing = false;
            tracing::debug!( "Simulated playback reached end" );
            self.events.push( MediaEvent { token: item.token, kind: MediaEventKind::Finished } );
        }
    }


    fn duration_of( &self, path: &Path ) -> Option<f64> {
        self.durations.get( path ).copied()
            .or_else( || self.probe.and_then( |probe| probe( path ) ) )
            .filter( |d| *d > 0.0 )
    }
}


impl MediaEngine for SimulatedEngine {
    fn load( &mut self, path: &Path, token: LoadToken ) -> Result<(), MediaError> {
        self.unload();

        if !is_audio_file( path ) {
            return Err( MediaError::Unsupported( path.display().to_string() ) );
        }

        if self.failing.contains( path ) {
            self.item = Some( LoadedItem {
                token, duration: 0.0, position: 0.0, ready: false, playing: false, rate: 1.0,
            });
            self.events.push( MediaEvent {
                token,
                kind: MediaEventKind::Failed( format!( "cannot decode {}", path.display() ) ),
            });
            return Ok(());
        }

        let duration = self.duration_of( path )
            .ok_or_else( || MediaError::FileOpen( path.display().to_string() ) )?;

        self.item = Some( LoadedItem {
            token, duration, position: 0.0, ready: false, playing: false, rate: 1.0,
        });
        if !self.manual_ready {
            self.complete_load();
        }
        Ok(())
    }


    fn unload( &mut self ) {
        self.item = None;
        self.events.clear();
    }


    fn play( &mut self, rate: f32 ) {
        if let Some( item ) = self.item.as_mut() {
            item.playing = true;
            item.rate = rate;
        }
    }


    fn pause( &mut self ) {
        if let Some( item ) = self.item.as_mut() {
            item.playing = false;
        }
    }


    fn seek( &mut self, position: f64 ) {
        if let Some( item ) = self.item.as_mut() {
            item.position = position.clamp( 0.0, item.duration );
            self.events.push( MediaEvent { token: item.token, kind: MediaEventKind::SeekCompleted } );
        }
    }


    fn set_rate( &mut self, rate: f32 ) {
        if let Some( item ) = self.item.as_mut() {
            item.rate = rate;
        }
    }


    fn is_playing( &self ) -> bool {
        self.item.as_ref().map( |i| i.playing ).unwrap_or( false )
    }


    fn position( &self ) -> f64 {
        self.item.as_ref().map( |i| i.position ).unwrap_or( 0.0 )
    }


    fn duration( &self ) -> f64 {
        self.item.as_ref().map( |i| i.duration ).unwrap_or( 0.0 )
    }


    fn poll_events( &mut self ) -> Vec<MediaEvent> {
        std::mem::take( &mut self.events )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_load_reports_ready() {
        let mut engine = SimulatedEngine::new();
        engine.set_duration( "/a.mp3", 10.0 );
        let token = LoadToken::default().next();

        engine.load( Path::new( "/a.mp3" ), token ).unwrap();
        assert_eq!( engine.poll_events(), vec![ MediaEvent { token, kind: MediaEventKind::Ready } ] );
        assert_eq!( engine.duration(), 10.0 );
    }


    #[test]
    fn test_unknown_path_fails_to_open() {
        let mut engine = SimulatedEngine::new();
        let result = engine.load( Path::new( "/missing.mp3" ), LoadToken::default() );
        assert!( matches!( result, Err( MediaError::FileOpen( _ ) ) ) );

        let result = engine.load( Path::new( "/notes.txt" ), LoadToken::default() );
        assert!( matches!( result, Err( MediaError::Unsupported( _ ) ) ) );
    }


    #[test]
    fn test_advance_respects_rate_and_finishes() {
        let mut engine = SimulatedEngine::new();
        engine.set_duration( "/a.mp3", 10.0 );
        engine.load( Path::new( "/a.mp3" ), LoadToken::default() ).unwrap();
        engine.poll_events();

        engine.play( 2.0 );
        engine.advance( 3.0 );
        assert_eq!( engine.position(), 6.0 );
        engine.advance( 3.0 );
        assert_eq!( engine.position(), 10.0 );
        assert!( !engine.is_playing() );
        assert_eq!( engine.poll_events()[ 0 ].kind, MediaEventKind::Finished );
    }


    #[test]
    fn test_manual_ready_defers_playback() {
        let mut engine = SimulatedEngine::new();
        engine.set_duration( "/a.mp3", 10.0 );
        engine.set_auto_ready( false );
        engine.load( Path::new( "/a.mp3" ), LoadToken::default() ).unwrap();
        assert!( engine.poll_events().is_empty() );

        engine.play( 1.0 );
        engine.advance( 1.0 );
        assert_eq!( engine.position(), 0.0 );

        engine.complete_load();
        assert_eq!( engine.poll_events()[ 0 ].kind, MediaEventKind::Ready );
    }


    #[test]
    fn test_unload_drops_pending_events() {
        let mut engine = SimulatedEngine::new();
        engine.set_duration( "/a.mp3", 10.0 );
        engine.load( Path::new( "/a.mp3" ), LoadToken::default() ).unwrap();
        engine.seek( 4.0 );
        engine.unload();
        assert!( engine.poll_events().is_empty() );
        assert_eq!( engine.position(), 0.0 );
    }
}

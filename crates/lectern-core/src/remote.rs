//! Remote-control surface
//!
//! Transport commands arriving from lock screens, headsets and media keys,
//! and the now-playing metadata pushed back to them.

use crate::library::Catalog;
use crate::media::MediaEngine;
use crate::session::Session;
use crate::store::KeyValueStore;


/// A transport command from an external control surface.
#[derive( Debug, Clone, Copy, PartialEq )]
pub enum RemoteCommand {
    Play,
    Pause,
    TogglePlayPause,
    Next,
    Previous,
    /// Seconds to jump forward
    SkipForward( f64 ),
    SkipBackward( f64 ),
    /// Absolute position in seconds
    SeekTo( f64 ),
}


/// Metadata for now-playing displays.
#[derive( Debug, Clone, PartialEq )]
pub struct NowPlaying {
    pub title: String,
    /// Folder name
    pub subtitle: String,
    pub duration: f64,
    pub elapsed: f64,
    /// `0.0` while paused
    pub rate: f32,
    pub index: usize,
    pub count: usize,
}


impl NowPlaying {
    /// One-line summary, e.g. `Chapter 3 (Dune) 2/12 1:05/20:00`.
    pub fn summary( &self ) -> String {
        format!(
            "{} ({}) {}/{} {}/{}",
            self.title,
            self.subtitle,
            self.index + 1,
            self.count,
            format_clock( self.elapsed ),
            format_clock( self.duration ),
        )
    }
}


/// Formats seconds as `m:ss`, or `h:mm:ss` past an hour.
pub fn format_clock( seconds: f64 ) -> String {
    let total = if seconds.is_finite() { seconds.max( 0.0 ) as u64 } else { 0 };
    let ( h, m, s ) = ( total / 3600, ( total % 3600 ) / 60, total % 60 );
    if h > 0 {
        format!( "{}:{:02}:{:02}", h, m, s )
    } else {
        format!( "{}:{:02}", m, s )
    }
}


impl<E: MediaEngine, S: KeyValueStore, C: Catalog> Session<E, S, C> {
    /// Applies a remote command to the session.
    pub fn handle_remote( &mut self, command: RemoteCommand ) {
        tracing::debug!( "Remote command: {:?}", command );
        match command {
            RemoteCommand::Play => self.play(),
            RemoteCommand::Pause => self.pause(),
            RemoteCommand::TogglePlayPause => self.toggle_play_pause(),
            RemoteCommand::Next => { self.play_next(); }
            RemoteCommand::Previous => self.play_previous(),
            RemoteCommand::SkipForward( secs ) => self.skip_forward( secs ),
            RemoteCommand::SkipBackward( secs ) => self.skip_backward( secs ),
            RemoteCommand::SeekTo( time ) => self.seek( time ),
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::session::tests::{ run, session_with, track };
    use crate::session::SessionEvent;
    use crate::store::MemoryStore;


    #[test]
    fn test_remote_transport() {
        let tracks = vec![ track( "Dune", "01.mp3", 120.0 ), track( "Dune", "02.mp3", 120.0 ) ];
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 0 ], tracks.clone() );

        session.handle_remote( RemoteCommand::TogglePlayPause );
        assert!( !session.is_playing() );
        session.handle_remote( RemoteCommand::Play );
        assert!( session.is_playing() );

        session.handle_remote( RemoteCommand::SeekTo( 60.0 ) );
        session.handle_remote( RemoteCommand::SkipBackward( 15.0 ) );
        assert_eq!( session.elapsed(), 45.0 );

        session.handle_remote( RemoteCommand::Next );
        assert_eq!( session.current_index(), 1 );
        session.handle_remote( RemoteCommand::Previous );
        assert_eq!( session.current_index(), 0 );

        session.handle_remote( RemoteCommand::Pause );
        assert!( !session.is_playing() );
    }


    #[test]
    fn test_now_playing_tracks_rate_and_position() {
        let tracks = vec![ track( "Dune", "Chapter 3.m4b", 1200.0 ), track( "Dune", "Chapter 4.m4b", 900.0 ) ];
        let mut session = session_with( &tracks, MemoryStore::new() );
        assert!( session.now_playing().is_none() );

        session.play_track( &tracks[ 0 ], tracks.clone() );
        session.set_rate( 1.5 ).unwrap();
        session.seek( 65.0 );
        let info = session.now_playing().unwrap();
        assert_eq!( info.title, "Chapter 3" );
        assert_eq!( info.subtitle, "Dune" );
        assert_eq!( info.rate, 1.5 );
        assert_eq!( info.summary(), "Chapter 3 (Dune) 1/2 1:05/20:00" );

        session.pause();
        assert_eq!( session.now_playing().unwrap().rate, 0.0 );
    }


    #[test]
    fn test_now_playing_refreshes_faster_at_adjusted_rate() {
        let tracks = vec![ track( "Dune", "01.mp3", 600.0 ) ];
        let count_refreshes = |rate: f32| {
            let mut session = session_with( &tracks, MemoryStore::new() );
            session.set_rate( rate ).unwrap();
            session.play_track( &tracks[ 0 ], tracks.clone() );
            let events = session.subscribe();
            run( &mut session, 20.0 );
            events.try_iter().filter( |e| matches!( e, SessionEvent::NowPlaying( _ ) ) ).count()
        };

        assert_eq!( count_refreshes( 1.0 ), 2 );
        assert_eq!( count_refreshes( 2.0 ), 4 );
    }


    #[test]
    fn test_format_clock() {
        assert_eq!( format_clock( 0.0 ), "0:00" );
        assert_eq!( format_clock( 65.4 ), "1:05" );
        assert_eq!( format_clock( 3725.0 ), "1:02:05" );
        assert_eq!( format_clock( f64::NAN ), "0:00" );
    }
}

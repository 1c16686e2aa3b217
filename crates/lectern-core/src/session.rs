//! Playback session engine
//!
//! Owns the current track, playlist, rate and loading state, and decides
//! where each track starts. Every trigger (host ticks, remote commands,
//! interruptions, lifecycle hooks, media events) lands on one `Session` from
//! a single control context; observers receive `SessionEvent`s over
//! channels.

use std::sync::mpsc::{ self, Receiver, Sender };
use std::time::Duration;

use thiserror::Error;

use crate::library::{ Catalog, Folder, Track };
use crate::media::{ LoadToken, MediaEngine, MediaEvent, MediaEventKind };
use crate::remote::NowPlaying;
use crate::sleep::SleepTimer;
use crate::store::{ KeyValueStore, Preferences, AVAILABLE_RATES };


/// How often hosts are expected to call `Session::tick`.
pub const TICK_INTERVAL: Duration = Duration::from_millis( 500 );

/// Default jump for skip forward/backward, in seconds.
pub const DEFAULT_SKIP_SECONDS: f64 = 15.0;

/// Past this point, "previous" restarts the current track.
const RESTART_THRESHOLD: f64 = 3.0;

/// A remembered position this close to the end is treated as finished.
const RESUME_END_MARGIN: f64 = 5.0;

/// Skip-intro only applies when the track outlasts the intro by this much.
const SKIP_INTRO_MIN_MARGIN: f64 = 10.0;

/// Narrowest outro window. At faster rates the window grows to the media
/// time one tick covers, so a tick always lands inside it.
const SKIP_OUTRO_WINDOW: f64 = 1.0;
const SAVE_INTERVAL: f64 = 30.0;
const NOW_PLAYING_INTERVAL: f64 = 10.0;
const NOW_PLAYING_INTERVAL_ADJUSTED_RATE: f64 = 5.0;


/// Errors returned by session operations.
#[derive( Debug, Error )]
pub enum SessionError {
    #[error( "Unsupported playback rate: {0}" )]
    InvalidRate( f32 ),
}


/// Notifications delivered to subscribers.
#[derive( Debug, Clone, PartialEq )]
pub enum SessionEvent {
    TrackChanged { track: Option<Track> },
    PlayingChanged { is_playing: bool },
    /// Forwarded on every tick while playing
    TimeUpdated { elapsed: f64, duration: f64 },
    TrackFinished { track: Track },
    NowPlaying( Option<NowPlaying> ),
    SleepTimerExpired,
}


/// Point-in-time view of the session.
#[derive( Debug, Clone, PartialEq )]
pub struct PlaybackState {
    pub current_track: Option<Track>,
    pub playlist: Vec<Track>,
    pub current_index: usize,
    pub is_playing: bool,
    pub elapsed: f64,
    pub duration: f64,
    pub rate: f32,
}


impl PlaybackState {
    /// Fraction of the track played, in `[0, 1]`.
    pub fn progress( &self ) -> f64 {
        if self.duration > 0.0 {
            ( self.elapsed / self.duration ).clamp( 0.0, 1.0 )
        } else {
            0.0
        }
    }


    pub fn has_next( &self ) -> bool {
        self.current_track.is_some() && self.current_index + 1 < self.playlist.len()
    }


    pub fn has_previous( &self ) -> bool {
        self.current_track.is_some() && self.current_index > 0
    }
}


/// Where a freshly loaded track should start.
#[derive( Debug, Clone, Copy, PartialEq )]
enum StartPosition {
    /// Per-track memory, then skip-intro, then zero
    ResumePolicy,
    At( f64 ),
}


#[derive( Debug, Clone, Copy, PartialEq )]
enum LoadPhase {
    Empty,
    /// Seeks and play/pause intent are recorded and applied once ready
    Loading { token: LoadToken, start: StartPosition, autoplay: bool },
    Ready { token: LoadToken },
}


/// The playback session.
pub struct Session<E, S, C> {
    engine: E,
    prefs: Preferences<S>,
    catalog: C,
    current_track: Option<Track>,
    playlist: Vec<Track>,
    current_index: usize,
    rate: f32,
    phase: LoadPhase,
    last_token: LoadToken,
    sleep: SleepTimer,
    resume_after_interruption: bool,
    outro_skipped: bool,
    since_save: f64,
    since_now_playing: f64,
    observers: Vec<Sender<SessionEvent>>,
}


impl<E: MediaEngine, S: KeyValueStore, C: Catalog> Session<E, S, C> {
    /// Creates an idle session. The playback rate comes from the store.
    pub fn new( engine: E, store: S, catalog: C ) -> Self {
        let prefs = Preferences::new( store );
        let rate = prefs.playback_rate();

        Self {
            engine,
            prefs,
            catalog,
            current_track: None,
            playlist: Vec::new(),
            current_index: 0,
            rate,
            phase: LoadPhase::Empty,
            last_token: LoadToken::default(),
            sleep: SleepTimer::new(),
            resume_after_interruption: false,
            outro_skipped: false,
            since_save: 0.0,
            since_now_playing: 0.0,
            observers: Vec::new(),
        }
    }


    // -- accessors

    pub fn engine( &self ) -> &E {
        &self.engine
    }


    pub fn engine_mut( &mut self ) -> &mut E {
        &mut self.engine
    }


    pub fn preferences( &self ) -> &Preferences<S> {
        &self.prefs
    }


    pub fn preferences_mut( &mut self ) -> &mut Preferences<S> {
        &mut self.prefs
    }


    pub fn catalog( &self ) -> &C {
        &self.catalog
    }


    pub fn sleep_timer( &self ) -> &SleepTimer {
        &self.sleep
    }


    pub fn current_track( &self ) -> Option<&Track> {
        self.current_track.as_ref()
    }


    pub fn playlist( &self ) -> &[Track] {
        &self.playlist
    }


    pub fn current_index( &self ) -> usize {
        self.current_index
    }


    pub fn rate( &self ) -> f32 {
        self.rate
    }


    /// Whether a load is still pending.
    pub fn is_loading( &self ) -> bool {
        matches!( self.phase, LoadPhase::Loading { .. } )
    }


    /// Playing, or about to play once the pending load completes.
    pub fn is_playing( &self ) -> bool {
        match self.phase {
            LoadPhase::Empty => false,
            LoadPhase::Loading { autoplay, .. } => autoplay,
            LoadPhase::Ready { .. } => self.engine.is_playing(),
        }
    }


    /// Current position. While loading, the position the track will start at
    /// when one was requested.
    pub fn elapsed( &self ) -> f64 {
        match self.phase {
            LoadPhase::Empty => 0.0,
            LoadPhase::Loading { start: StartPosition::At( t ), .. } => t,
            LoadPhase::Loading { .. } => 0.0,
            LoadPhase::Ready { .. } => self.engine.position(),
        }
    }


    /// Length of the current track: the engine's figure when known, the
    /// catalog's otherwise.
    pub fn duration( &self ) -> f64 {
        let reported = match self.phase {
            LoadPhase::Ready { .. } => self.engine.duration(),
            _ => 0.0,
        };
        if reported > 0.0 {
            return reported;
        }
        self.current_track.as_ref().map( |t| t.duration ).unwrap_or( 0.0 )
    }


    pub fn has_next( &self ) -> bool {
        self.current_track.is_some() && self.current_index + 1 < self.playlist.len()
    }


    pub fn snapshot( &self ) -> PlaybackState {
        PlaybackState {
            current_track: self.current_track.clone(),
            playlist: self.playlist.clone(),
            current_index: self.current_index,
            is_playing: self.is_playing(),
            elapsed: self.elapsed(),
            duration: self.duration(),
            rate: self.rate,
        }
    }


    /// Metadata for external now-playing surfaces; `None` when nothing is loaded.
    pub fn now_playing( &self ) -> Option<NowPlaying> {
        self.now_playing_at( self.elapsed() )
    }


    /// Registers an observer. Dropped receivers are pruned on the next event.
    pub fn subscribe( &mut self ) -> Receiver<SessionEvent> {
        let ( tx, rx ) = mpsc::channel();
        self.observers.push( tx );
        rx
    }


    // -- track selection

    /// Starts `track` within `playlist`, resuming according to the stored
    /// per-track position and the folder's skip-intro setting.
    ///
    /// A track missing from `playlist` falls back to index 0.
    ///
    /// @returns false when nothing could be loaded
    pub fn play_track( &mut self, track: &Track, playlist: Vec<Track> ) -> bool {
        let index = playlist.iter().position( |t| t == track ).unwrap_or( 0 );
        self.save_position();
        self.playlist = playlist;
        self.start_track( index )
    }


    /// Starts the playlist entry at `index`. Out of range is a no-op.
    pub fn play_at( &mut self, index: usize ) -> bool {
        if index >= self.playlist.len() {
            tracing::debug!( "Ignoring play_at({}) on a playlist of {}", index, self.playlist.len() );
            return false;
        }
        self.save_position();
        self.start_track( index )
    }


    /// Advances to the next track. No-op on the last one.
    pub fn play_next( &mut self ) -> bool {
        if !self.has_next() {
            return false;
        }
        self.play_at( self.current_index + 1 )
    }


    /// Restarts the current track when more than three seconds in, otherwise
    /// moves to the previous one. On the first track it always restarts.
    pub fn play_previous( &mut self ) {
        if self.current_track.is_none() {
            return;
        }
        if self.elapsed() > RESTART_THRESHOLD || self.current_index == 0 {
            self.seek( 0.0 );
        } else {
            self.play_at( self.current_index - 1 );
        }
    }


    fn start_track( &mut self, index: usize ) -> bool {
        let started = self.load_track( index, StartPosition::ResumePolicy, true );
        if started {
            if let Some( track ) = &self.current_track {
                self.prefs.save_last_played_track( &track.folder_name, &track.path );
            }
        }
        started
    }


    fn load_track( &mut self, index: usize, start: StartPosition, autoplay: bool ) -> bool {
        let Some( track ) = self.playlist.get( index ).cloned() else {
            return false;
        };

        self.engine.unload();
        let token = self.last_token.next();
        self.last_token = token;

        self.current_index = index;
        self.current_track = Some( track.clone() );
        self.outro_skipped = false;
        self.since_save = 0.0;
        self.since_now_playing = 0.0;

        tracing::info!( "Loading: {:?}", track.path );
        if let Err( e ) = self.engine.load( &track.path, token ) {
            self.abandon_track( &e.to_string() );
            return false;
        }

        self.phase = LoadPhase::Loading { token, start, autoplay };
        self.emit( SessionEvent::TrackChanged { track: Some( track ) } );
        self.emit( SessionEvent::PlayingChanged { is_playing: autoplay } );
        self.publish_now_playing();

        // Engines that are ready immediately have already queued the event
        self.pump();
        !matches!( self.phase, LoadPhase::Empty )
    }


    fn abandon_track( &mut self, reason: &str ) {
        tracing::warn!( "Playback failed: {}", reason );
        self.engine.unload();
        self.phase = LoadPhase::Empty;
        self.current_track = None;
        self.emit( SessionEvent::TrackChanged { track: None } );
        self.emit( SessionEvent::PlayingChanged { is_playing: false } );
        self.emit( SessionEvent::NowPlaying( None ) );
    }


    /// Start position for a fresh play of the current track.
    fn resume_offset( &self ) -> f64 {
        let Some( track ) = &self.current_track else {
            return 0.0;
        };
        let duration = self.duration();

        let saved = self.prefs.track_position( &track.path );
        if saved > 0.0 && saved < duration - RESUME_END_MARGIN {
            return saved;
        }

        let intro = f64::from( self.prefs.skip_intro( &track.folder_name ) );
        if intro > 0.0 && duration >= intro + SKIP_INTRO_MIN_MARGIN {
            return intro;
        }
        0.0
    }


    fn clamp_position( &self, time: f64 ) -> f64 {
        if !time.is_finite() {
            return 0.0;
        }
        let duration = self.duration();
        if duration > 0.0 {
            time.clamp( 0.0, duration )
        } else {
            time.max( 0.0 )
        }
    }


    // -- transport

    /// Starts or resumes playback. While loading, records the intent.
    /// A track halted at its end restarts from the beginning.
    pub fn play( &mut self ) {
        match self.phase {
            LoadPhase::Empty => {}
            LoadPhase::Loading { token, start, autoplay } => {
                if !autoplay {
                    self.phase = LoadPhase::Loading { token, start, autoplay: true };
                    self.emit( SessionEvent::PlayingChanged { is_playing: true } );
                }
            }
            LoadPhase::Ready { .. } => {
                if self.engine.is_playing() {
                    return;
                }
                let duration = self.duration();
                if duration > 0.0 && self.engine.position() >= duration {
                    self.engine.seek( 0.0 );
                }
                self.engine.play( self.rate );
                tracing::info!( "Playing" );
                self.emit( SessionEvent::PlayingChanged { is_playing: true } );
                self.publish_now_playing();
            }
        }
    }


    /// Pauses and persists the position. Safe to call repeatedly.
    pub fn pause( &mut self ) {
        match self.phase {
            LoadPhase::Empty => return,
            LoadPhase::Loading { token, start, .. } => {
                self.phase = LoadPhase::Loading { token, start, autoplay: false };
            }
            LoadPhase::Ready { .. } => self.engine.pause(),
        }
        tracing::info!( "Paused" );
        self.emit( SessionEvent::PlayingChanged { is_playing: false } );
        self.save_position();
        self.publish_now_playing();
    }


    pub fn toggle_play_pause( &mut self ) {
        if self.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }


    /// Seeks to `time`, clamped to the track. Non-finite input is ignored.
    ///
    /// While loading, the target replaces the pending start position.
    pub fn seek( &mut self, time: f64 ) {
        if !time.is_finite() {
            return;
        }
        let target = self.clamp_position( time );

        match self.phase {
            LoadPhase::Empty => return,
            LoadPhase::Loading { token, autoplay, .. } => {
                self.phase = LoadPhase::Loading { token, start: StartPosition::At( target ), autoplay };
            }
            LoadPhase::Ready { .. } => self.engine.seek( target ),
        }
        tracing::debug!( "Seek to {:.1}s", target );
        self.publish_now_playing_at( target );
    }


    pub fn skip_forward( &mut self, seconds: f64 ) {
        if seconds > 0.0 {
            self.seek( self.elapsed() + seconds );
        }
    }


    pub fn skip_backward( &mut self, seconds: f64 ) {
        if seconds > 0.0 {
            self.seek( self.elapsed() - seconds );
        }
    }


    /// Sets and persists the playback rate, applying it at once when playing.
    pub fn set_rate( &mut self, rate: f32 ) -> Result<(), SessionError> {
        let rate = AVAILABLE_RATES.iter()
            .copied()
            .find( |r| ( r - rate ).abs() < 0.01 )
            .ok_or( SessionError::InvalidRate( rate ) )?;

        self.rate = rate;
        self.prefs.set_playback_rate( rate );
        if matches!( self.phase, LoadPhase::Ready { .. } ) && self.engine.is_playing() {
            self.engine.set_rate( rate );
        }
        tracing::info!( "Playback rate: {}x", rate );
        self.publish_now_playing();
        Ok(())
    }


    // -- playlist maintenance

    /// Replaces the playlist, keeping the current track when it is still in
    /// the new list. When it is not, playback stops and the resume pointer
    /// is cleared.
    pub fn update_playlist( &mut self, playlist: Vec<Track> ) {
        let Some( current ) = self.current_track.clone() else {
            self.playlist = playlist;
            self.current_index = 0;
            return;
        };

        match playlist.iter().position( |t| *t == current ) {
            Some( index ) => {
                self.current_index = index;
                self.current_track = Some( playlist[ index ].clone() );
                self.playlist = playlist;
            }
            None => {
                tracing::info!( "Current track left the playlist: {:?}", current.path );
                let was_playing = self.is_playing();
                self.engine.unload();
                self.phase = LoadPhase::Empty;
                self.current_track = None;
                self.current_index = 0;
                self.playlist = playlist;
                self.prefs.clear_resume_point();
                self.emit( SessionEvent::TrackChanged { track: None } );
                if was_playing {
                    self.emit( SessionEvent::PlayingChanged { is_playing: false } );
                }
                self.emit( SessionEvent::NowPlaying( None ) );
            }
        }
    }


    /// Deletes a track from the library and forgets everything stored about it.
    pub fn remove_track( &mut self, track: &Track ) -> bool {
        if !self.catalog.delete_track( track ) {
            tracing::warn!( "Could not delete {:?}", track.path );
            return false;
        }

        self.prefs.clear_track_position( &track.path );
        if self.prefs.resume_point().is_some_and( |p| p.path == track.path ) {
            self.prefs.clear_resume_point();
        }
        if self.prefs.last_played_track( &track.folder_name ).as_deref() == Some( track.path.as_path() ) {
            self.prefs.clear_last_played_track( &track.folder_name );
        }

        if self.playlist.contains( track ) {
            let remaining = self.playlist.iter()
                .filter( |t| *t != track )
                .cloned()
                .collect();
            self.update_playlist( remaining );
        }
        true
    }


    /// Deletes a folder and its tracks, with the same cleanup as `remove_track`.
    pub fn remove_folder( &mut self, folder: &Folder ) -> bool {
        let tracks = self.catalog.list_tracks( folder );
        if !self.catalog.delete_folder( folder ) {
            tracing::warn!( "Could not delete {:?}", folder.path );
            return false;
        }

        for track in &tracks {
            self.prefs.clear_track_position( &track.path );
        }
        self.prefs.clear_last_played_track( &folder.name );
        if self.prefs.resume_point().is_some_and( |p| p.path.starts_with( &folder.path ) ) {
            self.prefs.clear_resume_point();
        }

        if self.playlist.iter().any( |t| t.path.starts_with( &folder.path ) ) {
            self.update_playlist( Vec::new() );
        }
        true
    }


    // -- restore and lifecycle

    /// Loads the track named by the resume pointer, paused at its saved
    /// position, with its folder as the playlist.
    ///
    /// @returns false when there is nothing to restore or the file is gone
    pub fn restore( &mut self ) -> bool {
        let Some( point ) = self.prefs.resume_point() else {
            return false;
        };
        let Some( folder ) = self.catalog.resolve_folder( &point.path ) else {
            tracing::info!( "Saved track no longer exists: {:?}", point.path );
            return false;
        };

        let tracks = self.catalog.list_tracks( &folder );
        let Some( index ) = tracks.iter().position( |t| t.path == point.path ) else {
            return false;
        };

        tracing::info!( "Restoring {:?} at {:.1}s", point.path, point.elapsed );
        self.playlist = tracks;
        self.load_track( index, StartPosition::At( point.elapsed ), false )
    }


    /// `restore`, then start playing if auto-play on launch is enabled.
    pub fn restore_on_launch( &mut self ) -> bool {
        let restored = self.restore();
        if restored && self.prefs.auto_play_on_launch() {
            self.play();
        }
        restored
    }


    /// The host is going to the background.
    pub fn enter_background( &mut self ) {
        self.save_position();
    }


    /// The host is shutting down.
    pub fn terminate( &mut self ) {
        self.save_position();
        self.engine.unload();
        self.phase = LoadPhase::Empty;
        tracing::info!( "Session terminated" );
    }


    // -- interruptions

    /// Another audio source took over.
    pub fn interruption_began( &mut self ) {
        self.resume_after_interruption = self.is_playing();
        if self.resume_after_interruption {
            self.pause();
        }
    }


    /// Resumes only when playing before the interruption and the system
    /// allows it.
    pub fn interruption_ended( &mut self, should_resume: bool ) {
        let resume = self.resume_after_interruption && should_resume;
        self.resume_after_interruption = false;
        if resume {
            self.play();
        }
    }


    /// The output device went away, e.g. headphones unplugged.
    pub fn audio_route_lost( &mut self ) {
        self.resume_after_interruption = false;
        if self.is_playing() {
            self.pause();
        }
    }


    // -- sleep timer

    pub fn start_sleep_timer( &mut self, minutes: u32 ) -> bool {
        let started = self.sleep.start( minutes );
        if started {
            tracing::info!( "Sleep timer: {} minutes", minutes );
        }
        started
    }


    pub fn sleep_at_end_of_track( &mut self ) {
        tracing::info!( "Sleep timer: end of track" );
        self.sleep.stop_at_end_of_track();
    }


    pub fn cancel_sleep_timer( &mut self ) {
        self.sleep.cancel();
    }


    // -- clock and media events

    /// Drains engine events.
    pub fn pump( &mut self ) {
        for event in self.engine.poll_events() {
            self.handle_media_event( event );
        }
    }


    /// Applies one engine event. Events for a superseded load are dropped.
    pub fn handle_media_event( &mut self, event: MediaEvent ) {
        let active = match self.phase {
            LoadPhase::Loading { token, .. } | LoadPhase::Ready { token } => Some( token ),
            LoadPhase::Empty => None,
        };
        if active != Some( event.token ) {
            tracing::debug!( "Ignoring stale media event: {:?}", event.kind );
            return;
        }

        match event.kind {
            MediaEventKind::Ready => self.on_ready(),
            MediaEventKind::SeekCompleted => self.save_position(),
            MediaEventKind::Finished => self.on_finished(),
            MediaEventKind::Failed( reason ) => self.abandon_track( &reason ),
        }
    }


    /// Advances session time. Call every `TICK_INTERVAL` with the time that
    /// actually passed.
    pub fn tick( &mut self, elapsed: Duration ) {
        self.pump();

        if self.sleep.advance( elapsed ) {
            tracing::info!( "Sleep timer expired" );
            self.emit( SessionEvent::SleepTimerExpired );
            self.pause();
        }

        if !matches!( self.phase, LoadPhase::Ready { .. } ) || !self.engine.is_playing() {
            return;
        }

        let dt = elapsed.as_secs_f64();
        let position = self.engine.position();
        let duration = self.duration();
        self.emit( SessionEvent::TimeUpdated { elapsed: position, duration } );

        self.since_now_playing += dt;
        let refresh = if ( self.rate - 1.0 ).abs() > f32::EPSILON {
            NOW_PLAYING_INTERVAL_ADJUSTED_RATE
        } else {
            NOW_PLAYING_INTERVAL
        };
        if self.since_now_playing >= refresh {
            self.publish_now_playing_at( position );
        }

        self.since_save += dt;
        if self.since_save >= SAVE_INTERVAL {
            tracing::debug!( "Periodic save at {:.1}s", position );
            self.save_position_at( position );
        }

        self.check_skip_outro( position, duration, dt );
    }


    fn on_ready( &mut self ) {
        let LoadPhase::Loading { token, start, autoplay } = self.phase else {
            return;
        };
        self.phase = LoadPhase::Ready { token };

        let target = match start {
            StartPosition::At( t ) => t,
            StartPosition::ResumePolicy => self.resume_offset(),
        };
        let target = self.clamp_position( target );
        if target > 0.0 {
            self.engine.seek( target );
        }
        if autoplay {
            self.engine.play( self.rate );
        }

        tracing::debug!( "Ready at {:.1}s", target );
        self.save_position_at( target );
        self.publish_now_playing_at( target );
    }


    fn on_finished( &mut self ) {
        let Some( track ) = self.current_track.clone() else {
            return;
        };
        tracing::info!( "Finished: {:?}", track.path );
        self.finish_track( track );
    }


    fn check_skip_outro( &mut self, position: f64, duration: f64, dt: f64 ) {
        if self.outro_skipped || duration <= 0.0 || !self.has_next() {
            return;
        }
        let Some( track ) = self.current_track.clone() else {
            return;
        };
        let outro = f64::from( self.prefs.skip_outro( &track.folder_name ) );
        if outro <= 0.0 {
            return;
        }

        let window = SKIP_OUTRO_WINDOW.max( dt * f64::from( self.rate ) );
        let remaining = duration - position;
        if remaining >= outro && remaining <= outro + window {
            tracing::info!( "Skipping outro of {:?}", track.path );
            self.outro_skipped = true;
            self.finish_track( track );
        }
    }


    /// A track is done, naturally or by outro skip.
    fn finish_track( &mut self, track: Track ) {
        self.prefs.clear_track_position( &track.path );
        self.emit( SessionEvent::TrackFinished { track: track.clone() } );

        if self.sleep.take_end_of_track() {
            tracing::info!( "Sleep timer: stopping after {:?}", track.path );
            self.halt( &track );
        } else if self.has_next() {
            self.start_track( self.current_index + 1 );
        } else {
            self.halt( &track );
        }
    }


    /// Stops with the pointer rewound, so the next launch starts the track over.
    fn halt( &mut self, track: &Track ) {
        self.engine.pause();
        self.prefs.save_resume_point( &track.path, 0.0 );
        self.emit( SessionEvent::PlayingChanged { is_playing: false } );
        self.publish_now_playing();
    }


    // -- helpers

    fn save_position( &mut self ) {
        if matches!( self.phase, LoadPhase::Ready { .. } ) {
            let position = self.engine.position();
            self.save_position_at( position );
        }
    }


    fn save_position_at( &mut self, elapsed: f64 ) {
        if let Some( track ) = &self.current_track {
            self.prefs.save_playback_position( &track.path, elapsed );
        }
        self.since_save = 0.0;
    }


    fn now_playing_at( &self, elapsed: f64 ) -> Option<NowPlaying> {
        let track = self.current_track.as_ref()?;
        Some( NowPlaying {
            title: track.display_name().to_string(),
            subtitle: track.folder_name.clone(),
            duration: self.duration(),
            elapsed,
            rate: if self.is_playing() { self.rate } else { 0.0 },
            index: self.current_index,
            count: self.playlist.len(),
        })
    }


    fn publish_now_playing( &mut self ) {
        let elapsed = self.elapsed();
        self.publish_now_playing_at( elapsed );
    }


    fn publish_now_playing_at( &mut self, elapsed: f64 ) {
        let info = self.now_playing_at( elapsed );
        self.since_now_playing = 0.0;
        self.emit( SessionEvent::NowPlaying( info ) );
    }


    fn emit( &mut self, event: SessionEvent ) {
        self.observers.retain( |tx| tx.send( event.clone() ).is_ok() );
    }
}


#[cfg( test )]
pub( crate ) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;
    use std::path::{ Path, PathBuf };

    use crate::library::FsCatalog;
    use crate::media::SimulatedEngine;
    use crate::store::MemoryStore;


    /// In-memory catalog of folders under `/books`.
    pub struct FakeCatalog {
        folders: RefCell<Vec<( Folder, Vec<Track> )>>,
    }


    impl FakeCatalog {
        pub fn with_folder( name: &str, tracks: &[Track] ) -> Self {
            let folder = Folder {
                path: PathBuf::from( "/books" ).join( name ),
                name: name.to_string(),
                track_count: tracks.len(),
            };
            Self { folders: RefCell::new( vec![ ( folder, tracks.to_vec() ) ] ) }
        }


        pub fn folder( &self, name: &str ) -> Option<Folder> {
            self.folders.borrow().iter()
                .find( |( f, _ )| f.name == name )
                .map( |( f, _ )| f.clone() )
        }
    }


    impl Catalog for FakeCatalog {
        fn list_folders( &self, _root: &Path ) -> Vec<Folder> {
            self.folders.borrow().iter()
                .map( |( f, tracks )| Folder { track_count: tracks.len(), ..f.clone() } )
                .collect()
        }


        fn list_tracks( &self, folder: &Folder ) -> Vec<Track> {
            self.folders.borrow().iter()
                .find( |( f, _ )| f == folder )
                .map( |( _, tracks )| tracks.clone() )
                .unwrap_or_default()
        }


        fn resolve_folder( &self, track_path: &Path ) -> Option<Folder> {
            self.folders.borrow().iter()
                .find( |( _, tracks )| tracks.iter().any( |t| t.path == track_path ) )
                .map( |( f, tracks )| Folder { track_count: tracks.len(), ..f.clone() } )
        }


        fn delete_folder( &self, folder: &Folder ) -> bool {
            let mut folders = self.folders.borrow_mut();
            let before = folders.len();
            folders.retain( |( f, _ )| f != folder );
            folders.len() != before
        }


        fn delete_track( &self, track: &Track ) -> bool {
            let mut folders = self.folders.borrow_mut();
            for ( _, tracks ) in folders.iter_mut() {
                if let Some( i ) = tracks.iter().position( |t| t == track ) {
                    tracks.remove( i );
                    return true;
                }
            }
            false
        }
    }


    pub type TestSession = Session<SimulatedEngine, MemoryStore, FakeCatalog>;


    pub fn track( folder: &str, name: &str, duration: f64 ) -> Track {
        Track::from_path( format!( "/books/{}/{}", folder, name ) ).with_duration( duration )
    }


    pub fn session_with( tracks: &[Track], store: MemoryStore ) -> TestSession {
        let mut engine = SimulatedEngine::new();
        for t in tracks {
            engine.set_duration( t.path.clone(), t.duration );
        }
        let catalog = FakeCatalog::with_folder( &tracks[ 0 ].folder_name, tracks );
        Session::new( engine, store, catalog )
    }


    /// Plays `seconds` of wall time in tick-sized steps.
    pub fn run( session: &mut TestSession, seconds: f64 ) {
        let steps = ( seconds / TICK_INTERVAL.as_secs_f64() ).round() as usize;
        for _ in 0..steps {
            session.engine_mut().advance( TICK_INTERVAL.as_secs_f64() );
            session.tick( TICK_INTERVAL );
        }
    }


    fn book() -> Vec<Track> {
        vec![
            track( "Dune", "01.mp3", 600.0 ),
            track( "Dune", "02.mp3", 300.0 ),
            track( "Dune", "03.mp3", 300.0 ),
        ]
    }


    #[test]
    fn test_play_track_starts_and_remembers_folder_track() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );

        assert!( session.play_track( &tracks[ 1 ], tracks.clone() ) );
        assert_eq!( session.current_index(), 1 );
        assert_eq!( session.current_track(), Some( &tracks[ 1 ] ) );
        assert!( session.is_playing() );
        assert_eq!( session.engine().rate(), Some( 1.0 ) );
        assert_eq!(
            session.preferences().last_played_track( "Dune" ),
            Some( tracks[ 1 ].path.clone() )
        );
    }


    #[test]
    fn test_play_track_outside_playlist_starts_first() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        let stray = track( "Other", "x.mp3", 10.0 );

        assert!( session.play_track( &stray, tracks.clone() ) );
        assert_eq!( session.current_index(), 0 );
        assert_eq!( session.current_track(), Some( &tracks[ 0 ] ) );
    }


    #[test]
    fn test_play_at_out_of_range_is_noop() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 0 ], tracks.clone() );

        assert!( !session.play_at( 3 ) );
        assert_eq!( session.current_index(), 0 );
        assert!( session.is_playing() );
    }


    #[test]
    fn test_play_next_stops_at_last_track() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 2 ], tracks.clone() );

        assert!( !session.play_next() );
        assert_eq!( session.current_index(), 2 );
    }


    #[test]
    fn test_previous_restarts_past_threshold() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 1 ], tracks.clone() );

        session.seek( 3.1 );
        session.play_previous();
        assert_eq!( session.current_index(), 1 );
        assert_eq!( session.elapsed(), 0.0 );
    }


    #[test]
    fn test_previous_moves_back_early_in_track() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 1 ], tracks.clone() );

        session.seek( 2.9 );
        session.play_previous();
        assert_eq!( session.current_index(), 0 );
    }


    #[test]
    fn test_previous_on_first_track_restarts() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 0 ], tracks.clone() );

        session.seek( 1.0 );
        session.play_previous();
        assert_eq!( session.current_index(), 0 );
        assert_eq!( session.elapsed(), 0.0 );
    }


    #[test]
    fn test_resume_prefers_remembered_position() {
        let tracks = vec![ track( "Dune", "01.mp3", 300.0 ) ];
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.preferences_mut().save_track_position( &tracks[ 0 ].path, 120.0 );
        session.preferences_mut().set_skip_intro( "Dune", 20 );

        session.play_track( &tracks[ 0 ], tracks.clone() );
        assert_eq!( session.elapsed(), 120.0 );
    }


    #[test]
    fn test_resume_falls_back_to_skip_intro() {
        let tracks = vec![ track( "Dune", "01.mp3", 300.0 ) ];
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.preferences_mut().set_skip_intro( "Dune", 20 );

        session.play_track( &tracks[ 0 ], tracks.clone() );
        assert_eq!( session.elapsed(), 20.0 );
    }


    #[test]
    fn test_skip_intro_ignored_for_short_track() {
        let tracks = vec![ track( "Dune", "01.mp3", 25.0 ) ];
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.preferences_mut().set_skip_intro( "Dune", 20 );

        session.play_track( &tracks[ 0 ], tracks.clone() );
        assert_eq!( session.elapsed(), 0.0 );
    }


    #[test]
    fn test_position_near_end_is_not_resumed() {
        let tracks = vec![ track( "Dune", "01.mp3", 300.0 ) ];
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.preferences_mut().save_track_position( &tracks[ 0 ].path, 297.0 );
        session.preferences_mut().set_skip_intro( "Dune", 20 );

        session.play_track( &tracks[ 0 ], tracks.clone() );
        assert_eq!( session.elapsed(), 20.0 );
    }


    #[test]
    fn test_skip_outro_advances_once() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.preferences_mut().set_skip_outro( "Dune", 30 );
        session.play_track( &tracks[ 0 ], tracks.clone() );
        session.preferences_mut().save_track_position( &tracks[ 0 ].path, 500.0 );

        session.seek( 570.0 );
        session.tick( TICK_INTERVAL );
        assert_eq!( session.current_index(), 1 );
        assert_eq!( session.preferences().track_position( &tracks[ 0 ].path ), 0.0 );

        run( &mut session, 5.0 );
        assert_eq!( session.current_index(), 1 );
        assert!( session.is_playing() );
    }


    #[test]
    fn test_skip_outro_at_triple_rate() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.preferences_mut().set_skip_outro( "Dune", 30 );
        session.set_rate( 3.0 ).unwrap();
        session.play_track( &tracks[ 0 ], tracks.clone() );

        // 1.5 s of media per tick steps from 31.2 s remaining to 29.7 s
        session.seek( 562.8 );
        run( &mut session, 5.0 );
        assert_eq!( session.current_index(), 1 );
        assert!( session.elapsed() < 30.0 );
    }


    #[test]
    fn test_skip_outro_suppressed_on_last_track() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.preferences_mut().set_skip_outro( "Dune", 30 );
        session.play_track( &tracks[ 2 ], tracks.clone() );

        session.seek( 270.0 );
        run( &mut session, 5.0 );
        assert_eq!( session.current_index(), 2 );
        assert!( session.is_playing() );
        assert!( session.elapsed() > 270.0 );
    }


    #[test]
    fn test_finished_track_advances_and_forgets_position() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 1 ], tracks.clone() );
        session.seek( 298.0 );
        run( &mut session, 2.5 );

        assert_eq!( session.current_index(), 2 );
        assert_eq!( session.preferences().track_position( &tracks[ 1 ].path ), 0.0 );
        assert!( session.is_playing() );
    }


    #[test]
    fn test_last_track_halts_with_pointer_rewound() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        let events = session.subscribe();
        session.play_track( &tracks[ 2 ], tracks.clone() );
        session.seek( 299.0 );
        run( &mut session, 1.5 );

        assert!( !session.is_playing() );
        assert_eq!( session.current_index(), 2 );
        let point = session.preferences().resume_point().unwrap();
        assert_eq!( point.path, tracks[ 2 ].path );
        assert_eq!( point.elapsed, 0.0 );
        assert!( events.try_iter().any( |e| e == SessionEvent::TrackFinished { track: tracks[ 2 ].clone() } ) );

        session.play();
        assert_eq!( session.elapsed(), 0.0 );
        assert!( session.is_playing() );
    }


    #[test]
    fn test_update_playlist_reindexes_current() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 1 ], tracks.clone() );

        let reordered = vec![ tracks[ 1 ].clone().with_duration( 301.0 ), tracks[ 2 ].clone() ];
        session.update_playlist( reordered );
        assert_eq!( session.current_index(), 0 );
        assert_eq!( session.current_track().map( |t| t.duration ), Some( 301.0 ) );
        assert!( session.is_playing() );
    }


    #[test]
    fn test_update_playlist_without_current_stops() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        let events = session.subscribe();
        session.play_track( &tracks[ 1 ], tracks.clone() );

        session.update_playlist( vec![ tracks[ 0 ].clone(), tracks[ 2 ].clone() ] );
        assert!( session.current_track().is_none() );
        assert!( !session.is_playing() );
        assert!( session.preferences().resume_point().is_none() );
        assert_eq!( session.playlist().len(), 2 );
        assert!( events.try_iter().any( |e| e == SessionEvent::TrackChanged { track: None } ) );
    }


    #[test]
    fn test_pause_is_idempotent() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 0 ], tracks.clone() );
        run( &mut session, 4.0 );

        session.pause();
        let first = session.preferences().store().clone();
        session.pause();
        assert_eq!( session.preferences().store(), &first );
        assert!( !session.is_playing() );
        assert_eq!( session.preferences().resume_point().unwrap().elapsed, 4.0 );
    }


    #[test]
    fn test_pause_without_track_memory_still_saves_pointer() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.preferences_mut().set_remember_position_per_track( false );
        session.play_track( &tracks[ 0 ], tracks.clone() );
        session.seek( 42.0 );
        session.pause();

        let point = session.preferences().resume_point().unwrap();
        assert_eq!( point.elapsed, 42.0 );
        session.preferences_mut().set_remember_position_per_track( true );
        assert_eq!( session.preferences().track_position( &tracks[ 0 ].path ), 0.0 );
    }


    #[test]
    fn test_seek_clamps_and_ignores_nan() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 1 ], tracks.clone() );

        session.seek( 1000.0 );
        assert_eq!( session.elapsed(), 300.0 );
        session.seek( -5.0 );
        assert_eq!( session.elapsed(), 0.0 );
        session.seek( 10.0 );
        session.seek( f64::NAN );
        assert_eq!( session.elapsed(), 10.0 );
    }


    #[test]
    fn test_seek_publishes_target_immediately() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 0 ], tracks.clone() );
        let events = session.subscribe();

        session.seek( 42.0 );
        let last = events.try_iter()
            .filter_map( |e| match e {
                SessionEvent::NowPlaying( info ) => info,
                _ => None,
            })
            .last()
            .unwrap();
        assert_eq!( last.elapsed, 42.0 );
    }


    #[test]
    fn test_skip_forward_and_backward() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 0 ], tracks.clone() );

        session.skip_forward( DEFAULT_SKIP_SECONDS );
        assert_eq!( session.elapsed(), 15.0 );
        session.skip_backward( 30.0 );
        assert_eq!( session.elapsed(), 0.0 );
        session.skip_forward( -4.0 );
        assert_eq!( session.elapsed(), 0.0 );
    }


    #[test]
    fn test_loading_defers_seek_and_play() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.engine_mut().set_auto_ready( false );
        session.play_track( &tracks[ 0 ], tracks.clone() );

        assert!( session.is_loading() );
        session.pause();
        session.seek( 40.0 );
        assert_eq!( session.elapsed(), 40.0 );
        assert!( !session.engine().is_playing() );
        session.play();

        session.engine_mut().complete_load();
        session.pump();
        assert!( !session.is_loading() );
        assert_eq!( session.engine().position(), 40.0 );
        assert!( session.engine().is_playing() );
    }


    #[test]
    fn test_stale_events_are_ignored() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 0 ], tracks.clone() );

        session.handle_media_event( MediaEvent {
            token: LoadToken::default(),
            kind: MediaEventKind::Finished,
        });
        assert_eq!( session.current_index(), 0 );
        assert!( session.is_playing() );
    }


    #[test]
    fn test_load_failure_clears_track() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.engine_mut().fail_path( tracks[ 0 ].path.clone() );
        let events = session.subscribe();

        assert!( !session.play_track( &tracks[ 0 ], tracks.clone() ) );
        assert!( session.current_track().is_none() );
        assert!( !session.is_playing() );
        let events: Vec<_> = events.try_iter().collect();
        assert!( events.contains( &SessionEvent::TrackChanged { track: None } ) );
        assert!( events.contains( &SessionEvent::NowPlaying( None ) ) );
        assert!( session.preferences().last_played_track( "Dune" ).is_none() );
    }


    #[test]
    fn test_unopenable_file_clears_track() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        let unknown = track( "Dune", "04.mp3", 10.0 );
        let mut playlist = tracks.clone();
        playlist.push( unknown.clone() );

        assert!( !session.play_track( &unknown, playlist ) );
        assert!( session.current_track().is_none() );
    }


    #[test]
    fn test_periodic_save() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 0 ], tracks.clone() );

        run( &mut session, 29.0 );
        assert_eq!( session.preferences().resume_point().unwrap().elapsed, 0.0 );
        run( &mut session, 1.0 );
        assert_eq!( session.preferences().resume_point().unwrap().elapsed, 30.0 );
        assert_eq!( session.preferences().track_position( &tracks[ 0 ].path ), 30.0 );
    }


    #[test]
    fn test_set_rate() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 0 ], tracks.clone() );

        assert!( matches!( session.set_rate( 1.1 ), Err( SessionError::InvalidRate( _ ) ) ) );
        assert_eq!( session.rate(), 1.0 );

        session.set_rate( 1.5 ).unwrap();
        assert_eq!( session.engine().rate(), Some( 1.5 ) );
        assert_eq!( session.preferences().playback_rate(), 1.5 );

        run( &mut session, 2.0 );
        assert_eq!( session.elapsed(), 3.0 );
    }


    #[test]
    fn test_stored_rate_applies_to_new_session() {
        let tracks = book();
        let mut store = MemoryStore::new();
        Preferences::new( &mut store ).set_playback_rate( 2.0 );
        let mut session = session_with( &tracks, store );

        session.play_track( &tracks[ 0 ], tracks.clone() );
        assert_eq!( session.engine().rate(), Some( 2.0 ) );
    }


    #[test]
    fn test_sleep_countdown_pauses_once() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        let events = session.subscribe();
        session.play_track( &tracks[ 0 ], tracks.clone() );
        assert!( session.start_sleep_timer( 1 ) );

        run( &mut session, 60.0 );
        assert!( !session.is_playing() );
        assert!( !session.sleep_timer().is_active() );
        let expired = events.try_iter().filter( |e| *e == SessionEvent::SleepTimerExpired ).count();
        assert_eq!( expired, 1 );
    }


    #[test]
    fn test_cancelled_sleep_timer_keeps_playing() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 0 ], tracks.clone() );
        session.start_sleep_timer( 1 );
        run( &mut session, 30.0 );
        session.cancel_sleep_timer();

        run( &mut session, 60.0 );
        assert!( session.is_playing() );
    }


    #[test]
    fn test_sleep_at_end_of_track_stops_instead_of_advancing() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 1 ], tracks.clone() );
        session.sleep_at_end_of_track();
        session.seek( 299.0 );
        run( &mut session, 1.5 );

        assert_eq!( session.current_index(), 1 );
        assert!( !session.is_playing() );
        assert!( !session.sleep_timer().is_active() );
    }


    #[test]
    fn test_interruption_resumes_only_if_playing() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 0 ], tracks.clone() );

        session.interruption_began();
        assert!( !session.is_playing() );
        session.interruption_ended( true );
        assert!( session.is_playing() );

        session.pause();
        session.interruption_began();
        session.interruption_ended( true );
        assert!( !session.is_playing() );

        session.play();
        session.interruption_began();
        session.interruption_ended( false );
        assert!( !session.is_playing() );
    }


    #[test]
    fn test_route_loss_pauses_without_resume() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 0 ], tracks.clone() );

        session.interruption_began();
        session.audio_route_lost();
        session.interruption_ended( true );
        assert!( !session.is_playing() );
    }


    #[test]
    fn test_enter_background_saves_pointer() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 0 ], tracks.clone() );
        run( &mut session, 10.0 );

        session.enter_background();
        let point = session.preferences().resume_point().unwrap();
        assert_eq!( point.path, tracks[ 0 ].path );
        assert_eq!( point.elapsed, 10.0 );
        assert_eq!( session.preferences().track_position( &tracks[ 0 ].path ), 10.0 );
        assert!( session.is_playing() );
    }


    #[test]
    fn test_terminate_saves_and_unloads() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 1 ], tracks.clone() );
        run( &mut session, 12.0 );

        session.terminate();
        assert_eq!( session.preferences().resume_point().unwrap().elapsed, 12.0 );
        assert_eq!( session.preferences().track_position( &tracks[ 1 ].path ), 12.0 );
        assert!( !session.is_playing() );
        assert!( !session.is_loading() );
        assert_eq!( session.elapsed(), 0.0 );
        assert!( !session.engine().is_playing() );
        assert_eq!( session.engine().duration(), 0.0 );

        // Nothing left to save
        session.terminate();
        assert_eq!( session.preferences().resume_point().unwrap().elapsed, 12.0 );
    }


    #[test]
    fn test_seek_settle_persists_without_pause() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 0 ], tracks.clone() );

        session.seek( 100.0 );
        assert_eq!( session.preferences().resume_point().unwrap().elapsed, 0.0 );
        session.pump();
        assert!( session.is_playing() );
        assert_eq!( session.preferences().resume_point().unwrap().elapsed, 100.0 );
        assert_eq!( session.preferences().track_position( &tracks[ 0 ].path ), 100.0 );
    }


    #[test]
    fn test_restore_missing_track() {
        let tracks = book();
        let mut store = MemoryStore::new();
        Preferences::new( &mut store ).save_resume_point( Path::new( "/books/Gone/01.mp3" ), 12.0 );
        let mut session = session_with( &tracks, store );

        assert!( !session.restore() );
        assert!( session.current_track().is_none() );
    }


    #[test]
    fn test_restore_on_launch_autoplays_when_enabled() {
        let tracks = book();
        let mut store = MemoryStore::new();
        {
            let mut prefs = Preferences::new( &mut store );
            prefs.save_resume_point( &tracks[ 1 ].path, 75.0 );
            prefs.set_auto_play_on_launch( true );
        }
        let mut session = session_with( &tracks, store );

        assert!( session.restore_on_launch() );
        assert!( session.is_playing() );
        assert_eq!( session.current_index(), 1 );
        assert_eq!( session.elapsed(), 75.0 );
        assert_eq!( session.playlist().len(), 3 );
    }


    #[test]
    fn test_remove_current_track() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 1 ], tracks.clone() );
        session.seek( 50.0 );
        session.pause();

        assert!( session.remove_track( &tracks[ 1 ] ) );
        assert!( session.current_track().is_none() );
        assert!( session.preferences().resume_point().is_none() );
        assert!( session.preferences().last_played_track( "Dune" ).is_none() );
        assert_eq!( session.preferences().track_position( &tracks[ 1 ].path ), 0.0 );
        assert_eq!( session.playlist().len(), 2 );
        assert!( !session.remove_track( &tracks[ 1 ] ) );
    }


    #[test]
    fn test_remove_other_track_keeps_playing() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 1 ], tracks.clone() );

        assert!( session.remove_track( &tracks[ 0 ] ) );
        assert_eq!( session.current_index(), 0 );
        assert_eq!( session.current_track(), Some( &tracks[ 1 ] ) );
        assert!( session.is_playing() );
    }


    #[test]
    fn test_remove_folder_stops_playback() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        session.play_track( &tracks[ 0 ], tracks.clone() );
        session.seek( 30.0 );
        session.pause();
        let folder = session.catalog().folder( "Dune" ).unwrap();

        assert!( session.remove_folder( &folder ) );
        assert!( session.current_track().is_none() );
        assert!( session.playlist().is_empty() );
        assert!( session.preferences().resume_point().is_none() );
        assert!( session.preferences().last_played_track( "Dune" ).is_none() );
        assert!( session.catalog().list_folders( Path::new( "/books" ) ).is_empty() );
    }


    #[test]
    fn test_snapshot() {
        let tracks = book();
        let mut session = session_with( &tracks, MemoryStore::new() );
        assert!( !session.snapshot().has_next() );

        session.play_track( &tracks[ 1 ], tracks.clone() );
        session.seek( 150.0 );
        let state = session.snapshot();
        assert_eq!( state.progress(), 0.5 );
        assert!( state.has_next() );
        assert!( state.has_previous() );
        assert!( state.is_playing );
    }


    #[test]
    fn test_resume_across_sessions_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join( "Dune" );
        fs::create_dir( &folder ).unwrap();
        fs::write( folder.join( "A.mp3" ), b"" ).unwrap();
        fs::write( folder.join( "B.mp3" ), b"" ).unwrap();

        let engine_for = || {
            let mut engine = SimulatedEngine::new();
            engine.set_duration( folder.join( "A.mp3" ), 100.0 );
            engine.set_duration( folder.join( "B.mp3" ), 100.0 );
            engine
        };

        let catalog = FsCatalog::new();
        let dune = catalog.list_folders( dir.path() ).remove( 0 );
        let tracks = catalog.list_tracks( &dune );
        assert_eq!( tracks.len(), 2 );

        let mut first = Session::new( engine_for(), MemoryStore::new(), catalog );
        first.play_track( &tracks[ 0 ], tracks.clone() );
        first.seek( 50.0 );
        first.pump();
        first.pause();
        let store = first.preferences().store().clone();

        let mut second = Session::new( engine_for(), store, FsCatalog::new() );
        assert!( second.restore() );
        assert!( !second.is_playing() );
        assert_eq!( second.current_track().map( |t| t.path.clone() ), Some( folder.join( "A.mp3" ) ) );
        assert_eq!( second.playlist().len(), 2 );

        second.play();
        assert!( second.is_playing() );
        assert_eq!( second.elapsed(), 50.0 );
    }
}

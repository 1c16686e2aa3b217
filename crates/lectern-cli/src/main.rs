//! Lectern CLI - Headless driver for the playback session
//!
//! Composition root: builds the session from the JSON state file, the
//! filesystem catalog and the simulated engine, then serialises clock ticks,
//! console commands and background duration probes onto one task.

mod cli;

use std::path::{ Path, PathBuf };

use anyhow::{ Context, Result };
use clap::Parser;
use tokio::io::{ AsyncBufReadExt, BufReader };
use tokio::sync::mpsc::{ unbounded_channel, UnboundedSender };
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{ layer::SubscriberExt, util::SubscriberInitExt, EnvFilter };

use lectern_core::{
    command::{ self, SleepArg },
    library::probe_duration,
    remote::format_clock,
    session::TICK_INTERVAL,
    Catalog, Command, Folder, FsCatalog, JsonFileStore, SessionEvent,
    Session, SimulatedEngine, Track,
};

use cli::Args;


type AppSession = Session<SimulatedEngine, JsonFileStore, FsCatalog>;


/// Durations probed off the control path for one folder.
struct ProbeResult {
    folder: Folder,
    tracks: Vec<Track>,
}


fn probe( path: &Path ) -> Option<f64> {
    probe_duration( path ).ok()
}


/// Application state.
struct App {
    session: AppSession,
    root: PathBuf,
    folders: Vec<Folder>,
    folder: Option<Folder>,
    tracks: Vec<Track>,
    probe_tx: UnboundedSender<ProbeResult>,
    should_quit: bool,
}


impl App {
    /// Lists folders under the library root.
    fn list_folders( &mut self ) {
        self.folders = self.session.catalog().list_folders( &self.root );
        if self.folders.is_empty() {
            println!( "No audiobook folders under {}", self.root.display() );
        }
        for ( i, folder ) in self.folders.iter().enumerate() {
            println!( "{:>3}. {} ({} tracks)", i + 1, folder.name, folder.track_count );
        }
    }


    /// Opens a folder: fast listing now, durations in the background.
    fn open_folder( &mut self, folder: Folder ) {
        self.tracks = self.session.catalog().list_tracks( &folder );
        println!( "Opened {} ({} tracks)", folder.name, self.tracks.len() );

        let tracks = self.tracks.clone();
        let target = folder.clone();
        let tx = self.probe_tx.clone();
        tokio::spawn( async move {
            let probed = tokio::task::spawn_blocking( move || FsCatalog::new().with_durations( tracks ) ).await;
            match probed {
                Ok( tracks ) => { let _ = tx.send( ProbeResult { folder: target, tracks } ); }
                Err( e ) => tracing::warn!( "Duration probe failed: {}", e ),
            }
        });

        self.folder = Some( folder );
    }


    /// Applies back-filled durations to the listing and, when it is the
    /// playing folder, to the session playlist.
    fn apply_probe( &mut self, result: ProbeResult ) {
        for track in &result.tracks {
            if track.duration > 0.0 {
                self.session.engine_mut().set_duration( track.path.clone(), track.duration );
            }
        }

        if self.folder.as_ref() == Some( &result.folder ) {
            self.tracks = result.tracks.clone();
        }

        let playing_here = self.session.playlist().first()
            .is_some_and( |t| t.path.starts_with( &result.folder.path ) );
        if playing_here {
            tracing::debug!( "Durations ready for {}", result.folder.name );
            self.session.update_playlist( result.tracks );
        }
    }


    fn list_tracks( &self ) {
        let Some( folder ) = &self.folder else {
            println!( "No folder open. Use 'folders' and 'open <n>'." );
            return;
        };

        let last = self.session.preferences().last_played_track( &folder.name );
        let current = self.session.current_track().map( |t| t.path.clone() );
        for ( i, track ) in self.tracks.iter().enumerate() {
            let marker = if current.as_ref() == Some( &track.path ) {
                ">"
            } else if last.as_ref() == Some( &track.path ) {
                "*"
            } else {
                " "
            };
            let length = if track.duration > 0.0 { format_clock( track.duration ) } else { "--:--".into() };
            println!( "{} {:>3}. {} [{}]", marker, i + 1, track.display_name(), length );
        }
    }


    /// Plays track `index` of the open folder, or resumes. With nothing
    /// loaded, starts the folder's last played track.
    fn play( &mut self, index: Option<usize> ) {
        match index {
            Some( i ) => match self.tracks.get( i ).cloned() {
                Some( track ) => { self.session.play_track( &track, self.tracks.clone() ); }
                None => println!( "No track {}", i + 1 ),
            },
            None if self.session.current_track().is_some() => self.session.play(),
            None => {
                let Some( folder ) = &self.folder else {
                    println!( "Nothing to play. Open a folder first." );
                    return;
                };
                let last = self.session.preferences().last_played_track( &folder.name );
                let track = last
                    .and_then( |p| self.tracks.iter().find( |t| t.path == p ) )
                    .or( self.tracks.first() )
                    .cloned();
                if let Some( track ) = track {
                    self.session.play_track( &track, self.tracks.clone() );
                }
            }
        }
    }


    fn delete( &mut self, index: usize ) {
        let Some( track ) = self.tracks.get( index ).cloned() else {
            println!( "No track {}", index + 1 );
            return;
        };
        if self.session.remove_track( &track ) {
            self.tracks.retain( |t| *t != track );
            println!( "Deleted {}", track.display_name() );
        } else {
            println!( "Could not delete {}", track.display_name() );
        }
    }


    /// Folder the skip settings apply to: the playing one, else the open one.
    fn settings_folder( &self ) -> Option<String> {
        self.session.current_track()
            .map( |t| t.folder_name.clone() )
            .or_else( || self.folder.as_ref().map( |f| f.name.clone() ) )
    }


    fn status( &self ) {
        let state = self.session.snapshot();
        match self.session.now_playing() {
            Some( info ) => println!(
                "{} {} | {}x | sleep: {}",
                if state.is_playing { "Playing" } else { "Paused" },
                info.summary(),
                state.rate,
                self.session.sleep_timer().label(),
            ),
            None => println!( "Stopped | {}x | sleep: {}", state.rate, self.session.sleep_timer().label() ),
        }
    }


    fn handle_line( &mut self, line: &str ) {
        if line.trim().is_empty() {
            return;
        }
        let cmd = match Command::parse( line ) {
            Ok( cmd ) => cmd,
            Err( e ) => {
                println!( "{}", e );
                return;
            }
        };

        if let Some( remote ) = cmd.as_remote() {
            self.session.handle_remote( remote );
            return;
        }

        match cmd {
            Command::Folders => self.list_folders(),
            Command::Open { index } => {
                if self.folders.is_empty() {
                    self.folders = self.session.catalog().list_folders( &self.root );
                }
                match self.folders.get( index ).cloned() {
                    Some( folder ) => self.open_folder( folder ),
                    None => println!( "No folder {}", index + 1 ),
                }
            }
            Command::Tracks => self.list_tracks(),
            Command::Delete { index } => self.delete( index ),
            Command::Play { index } => self.play( index ),
            Command::Rate { rate } => {
                if let Err( e ) = self.session.set_rate( rate ) {
                    println!( "{}", e );
                }
            }
            Command::Sleep( SleepArg::Minutes( m ) ) => { self.session.start_sleep_timer( m ); }
            Command::Sleep( SleepArg::EndOfTrack ) => self.session.sleep_at_end_of_track(),
            Command::Sleep( SleepArg::Off ) => self.session.cancel_sleep_timer(),
            Command::Intro { seconds } | Command::Outro { seconds } => {
                let Some( folder ) = self.settings_folder() else {
                    println!( "No folder open" );
                    return;
                };
                let prefs = self.session.preferences_mut();
                if matches!( cmd, Command::Intro { .. } ) {
                    prefs.set_skip_intro( &folder, seconds );
                } else {
                    prefs.set_skip_outro( &folder, seconds );
                }
            }
            Command::AutoPlay { enabled } => self.session.preferences_mut().set_auto_play_on_launch( enabled ),
            Command::Remember { enabled } => self.session.preferences_mut().set_remember_position_per_track( enabled ),
            Command::Status => self.status(),
            Command::Save => {
                self.session.enter_background();
                println!( "Position saved" );
            }
            Command::Help => println!( "{}", command::help_text() ),
            Command::Quit => self.should_quit = true,
            // Transport commands were routed through the remote surface
            _ => {}
        }
    }
}


/// One read from stdin. `None` once input is closed or unreadable, so the
/// session still gets terminated.
fn console_input( read: std::io::Result<Option<String>> ) -> Option<String> {
    match read {
        Ok( line ) => line,
        Err( e ) => {
            tracing::warn!( "Failed to read console input: {}", e );
            None
        }
    }
}


fn print_event( event: &SessionEvent ) {
    match event {
        SessionEvent::TrackChanged { track: Some( track ) } => {
            println!( "Now playing: {} ({})", track.display_name(), track.folder_name );
        }
        SessionEvent::TrackChanged { track: None } => println!( "Stopped" ),
        SessionEvent::TrackFinished { track } => println!( "Finished: {}", track.display_name() ),
        SessionEvent::SleepTimerExpired => println!( "Sleep timer expired" ),
        _ => {}
    }
}


#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with( EnvFilter::try_from_default_env().unwrap_or_else( |_| "info".into() ) )
        .with( tracing_subscriber::fmt::layer().with_writer( std::io::stderr ) )
        .init();

    let args = Args::parse();

    let state_path = args.state.clone()
        .or_else( JsonFileStore::default_path )
        .context( "No data directory for the state file; pass --state" )?;
    let store = JsonFileStore::open( &state_path )
        .with_context( || format!( "Failed to open state file {}", state_path.display() ) )?;
    tracing::info!( "State file: {}", state_path.display() );

    let mut session = Session::new( SimulatedEngine::with_probe( probe ), store, FsCatalog::new() );
    let events = session.subscribe();

    let ( probe_tx, mut probe_rx ) = unbounded_channel();
    let mut app = App {
        session,
        root: args.library_root(),
        folders: Vec::new(),
        folder: None,
        tracks: Vec::new(),
        probe_tx,
        should_quit: false,
    };

    if !args.no_restore && app.session.restore_on_launch() {
        app.status();
    }
    println!( "Type 'help' for commands." );

    let mut lines = BufReader::new( tokio::io::stdin() ).lines();
    let mut ticker = tokio::time::interval( TICK_INTERVAL );
    ticker.set_missed_tick_behavior( MissedTickBehavior::Delay );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                app.session.engine_mut().advance( TICK_INTERVAL.as_secs_f64() );
                app.session.tick( TICK_INTERVAL );
            }
            line = lines.next_line() => match console_input( line ) {
                Some( line ) => app.handle_line( &line ),
                None => app.should_quit = true,
            },
            Some( result ) = probe_rx.recv() => app.apply_probe( result ),
            _ = tokio::signal::ctrl_c() => app.should_quit = true,
        }

        for event in events.try_iter() {
            print_event( &event );
        }

        if app.should_quit {
            break;
        }
    }

    app.session.terminate();
    Ok(())
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::io::{ Error, ErrorKind };


    #[test]
    fn test_console_input() {
        assert_eq!( console_input( Ok( Some( "play 2".into() ) ) ), Some( "play 2".into() ) );
        assert_eq!( console_input( Ok( None ) ), None );
    }


    #[test]
    fn test_unreadable_console_input_ends_loop() {
        let read = Err( Error::new( ErrorKind::InvalidData, "stream did not contain valid UTF-8" ) );
        assert_eq!( console_input( read ), None );
    }
}

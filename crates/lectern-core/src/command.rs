//! Console command parsing.
//!
//! Text commands accepted by the headless driver. Indices typed by the user
//! are 1-based and converted to 0-based here.

use std::str::FromStr;

use thiserror::Error;

use crate::remote::RemoteCommand;
use crate::session::DEFAULT_SKIP_SECONDS;
use crate::sleep::SLEEP_PRESETS;


/// Errors that can occur during command parsing.
#[derive( Debug, Error )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// Parsed console command.
#[derive( Debug, Clone, PartialEq )]
pub enum Command {
    // Library commands
    Folders,
    Open { index: usize },
    Tracks,
    Delete { index: usize },

    // Playback commands
    Play { index: Option<usize> },
    Pause,
    Toggle,
    Next,
    Prev,
    Seek { seconds: f64 },
    Forward { seconds: f64 },
    Rewind { seconds: f64 },
    Rate { rate: f32 },
    Sleep( SleepArg ),

    // Preference commands
    Intro { seconds: u32 },
    Outro { seconds: u32 },
    AutoPlay { enabled: bool },
    Remember { enabled: bool },

    Status,
    /// Persist the current position now, as when the host is backgrounded
    Save,
    Help,
    Quit,
}


/// Sleep timer argument.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum SleepArg {
    Minutes( u32 ),
    EndOfTrack,
    Off,
}


/// Accepted sleep arguments, listing the minute presets.
fn sleep_choices() -> String {
    let presets: Vec<String> = SLEEP_PRESETS.iter().map( |m| m.to_string() ).collect();
    format!( "minutes (e.g. {}), 'end' or 'off'", presets.join( ", " ) )
}


impl FromStr for SleepArg {
    type Err = CommandError;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "end" | "eot" => Ok( SleepArg::EndOfTrack ),
            "off" | "cancel" => Ok( SleepArg::Off ),
            other => match other.parse::<u32>() {
                Ok( 0 ) | Err( _ ) => Err( CommandError::InvalidArgument(
                    format!( "Invalid sleep timer: '{}'. Use {}", s, sleep_choices() )
                )),
                Ok( minutes ) => Ok( SleepArg::Minutes( minutes ) ),
            },
        }
    }
}


impl Command {
    /// Parses one line of console input.
    ///
    /// @param input - The command line to parse
    ///
    /// @returns The parsed command or an error
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let mut parts = input.splitn( 2, ' ' );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( |s| s.trim() ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            "folders" | "ls" => Ok( Command::Folders ),
            "open" | "o" => {
                let arg = args.ok_or_else( || CommandError::MissingArgument( "folder number".into() ) )?;
                Ok( Command::Open { index: parse_index( arg )? } )
            }
            "tracks" | "t" => Ok( Command::Tracks ),
            "delete" | "del" | "rm" => {
                let arg = args.ok_or_else( || CommandError::MissingArgument( "track number".into() ) )?;
                Ok( Command::Delete { index: parse_index( arg )? } )
            }

            "play" | "p" => {
                let index = args.map( parse_index ).transpose()?;
                Ok( Command::Play { index } )
            }
            "pause" | "pa" => Ok( Command::Pause ),
            "toggle" | "tg" => Ok( Command::Toggle ),
            "next" | "n" => Ok( Command::Next ),
            "prev" | "previous" | "pr" => Ok( Command::Prev ),
            "seek" | "sk" => {
                let arg = args.ok_or_else( || CommandError::MissingArgument( "time position".into() ) )?;
                Ok( Command::Seek { seconds: parse_time( arg )? } )
            }
            "ff" | "fwd" => Ok( Command::Forward { seconds: parse_skip( args )? } ),
            "rew" | "back" => Ok( Command::Rewind { seconds: parse_skip( args )? } ),
            "rate" | "speed" => {
                let arg = args.ok_or_else( || CommandError::MissingArgument( "rate".into() ) )?;
                let rate = arg.trim_end_matches( 'x' ).parse()
                    .map_err( |_| CommandError::InvalidArgument( format!( "Invalid rate: {}", arg ) ) )?;
                Ok( Command::Rate { rate } )
            }
            "sleep" | "sl" => {
                let arg = args.ok_or_else( || CommandError::MissingArgument( sleep_choices() ) )?;
                Ok( Command::Sleep( arg.parse()? ) )
            }

            "intro" => Ok( Command::Intro { seconds: parse_seconds( args )? } ),
            "outro" => Ok( Command::Outro { seconds: parse_seconds( args )? } ),
            "autoplay" => Ok( Command::AutoPlay { enabled: parse_switch( args )? } ),
            "remember" => Ok( Command::Remember { enabled: parse_switch( args )? } ),

            "status" | "st" => Ok( Command::Status ),
            "save" | "bg" => Ok( Command::Save ),
            "help" | "h" | "?" => Ok( Command::Help ),
            "quit" | "q" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }


    /// The remote-control equivalent, for commands that are pure transport.
    pub fn as_remote( &self ) -> Option<RemoteCommand> {
        match *self {
            Command::Play { index: None } => Some( RemoteCommand::Play ),
            Command::Pause => Some( RemoteCommand::Pause ),
            Command::Toggle => Some( RemoteCommand::TogglePlayPause ),
            Command::Next => Some( RemoteCommand::Next ),
            Command::Prev => Some( RemoteCommand::Previous ),
            Command::Seek { seconds } => Some( RemoteCommand::SeekTo( seconds ) ),
            Command::Forward { seconds } => Some( RemoteCommand::SkipForward( seconds ) ),
            Command::Rewind { seconds } => Some( RemoteCommand::SkipBackward( seconds ) ),
            _ => None,
        }
    }
}


/// Parses a 1-based index into a 0-based one.
fn parse_index( s: &str ) -> Result<usize, CommandError> {
    match s.parse::<usize>() {
        Ok( n ) if n > 0 => Ok( n - 1 ),
        _ => Err( CommandError::InvalidArgument( format!( "Invalid number: {}", s ) ) ),
    }
}


/// Parses a time string like "1:30", "1:02:05" or "90" into seconds.
///
/// @param s - Time string in format "H:MM:SS", "MM:SS", or just seconds
///
/// @returns Seconds or error
fn parse_time( s: &str ) -> Result<f64, CommandError> {
    let invalid = || CommandError::InvalidArgument( format!( "Invalid time: {}", s ) );

    let mut total = 0.0;
    for part in s.trim().split( ':' ) {
        let value: f64 = part.parse().map_err( |_| invalid() )?;
        if !value.is_finite() || value < 0.0 {
            return Err( invalid() );
        }
        total = total * 60.0 + value;
    }
    Ok( total )
}


fn parse_skip( args: Option<&str> ) -> Result<f64, CommandError> {
    match args {
        None => Ok( DEFAULT_SKIP_SECONDS ),
        Some( s ) => match parse_time( s )? {
            secs if secs > 0.0 => Ok( secs ),
            _ => Err( CommandError::InvalidArgument( format!( "Skip must be positive: {}", s ) ) ),
        },
    }
}


fn parse_seconds( args: Option<&str> ) -> Result<u32, CommandError> {
    let arg = args.ok_or_else( || CommandError::MissingArgument( "seconds".into() ) )?;
    arg.parse()
        .map_err( |_| CommandError::InvalidArgument( format!( "Invalid seconds: {}", arg ) ) )
}


fn parse_switch( args: Option<&str> ) -> Result<bool, CommandError> {
    let arg = args.ok_or_else( || CommandError::MissingArgument( "'on' or 'off'".into() ) )?;
    match arg.to_lowercase().as_str() {
        "on" | "yes" | "true" | "1" => Ok( true ),
        "off" | "no" | "false" | "0" => Ok( false ),
        _ => Err( CommandError::InvalidArgument( format!( "Expected 'on' or 'off': {}", arg ) ) ),
    }
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Library:
  folders           List audiobook folders
  open <n>          Open folder n as the playlist
  tracks            List tracks of the open folder
  delete <n>        Delete track n from disk

Playback:
  play [n]          Resume, or start track n
  pause             Pause playback
  toggle            Toggle play/pause
  next / prev       Next track / previous (restarts after 3s)
  seek <time>       Seek to position (e.g. 1:30)
  ff [secs]         Skip forward (default 15)
  rew [secs]        Skip backward (default 15)
  rate <x>          Playback rate (0.5 - 3.0)
  sleep <m|end|off> Sleep timer: minutes, end of track, or cancel

Settings:
  intro <secs>      Skip intro for the open folder
  outro <secs>      Skip outro for the open folder
  autoplay on|off   Resume playing on launch
  remember on|off   Remember position per track

Other:
  status            Show what is playing
  save              Save the current position now
  help              Show this help
  quit              Save and exit"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_open_is_one_based() {
        assert_eq!( Command::parse( "open 3" ).unwrap(), Command::Open { index: 2 } );
        assert!( matches!( Command::parse( "open 0" ), Err( CommandError::InvalidArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "open" ), Err( CommandError::MissingArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_play_with_and_without_index() {
        assert_eq!( Command::parse( "play" ).unwrap(), Command::Play { index: None } );
        assert_eq!( Command::parse( "p 1" ).unwrap(), Command::Play { index: Some( 0 ) } );
    }


    #[test]
    fn test_parse_seek() {
        assert_eq!( Command::parse( "seek 1:30" ).unwrap(), Command::Seek { seconds: 90.0 } );
        assert_eq!( Command::parse( "seek 45" ).unwrap(), Command::Seek { seconds: 45.0 } );
        assert_eq!( Command::parse( "seek 1:02:05" ).unwrap(), Command::Seek { seconds: 3725.0 } );
        assert!( Command::parse( "seek abc" ).is_err() );
    }


    #[test]
    fn test_parse_skip_defaults() {
        assert_eq!( Command::parse( "ff" ).unwrap(), Command::Forward { seconds: 15.0 } );
        assert_eq!( Command::parse( "rew 30" ).unwrap(), Command::Rewind { seconds: 30.0 } );
        assert!( Command::parse( "ff 0" ).is_err() );
    }


    #[test]
    fn test_parse_rate() {
        assert_eq!( Command::parse( "rate 1.5x" ).unwrap(), Command::Rate { rate: 1.5 } );
        assert!( Command::parse( "rate fast" ).is_err() );
    }


    #[test]
    fn test_parse_sleep() {
        assert_eq!( Command::parse( "sleep 30" ).unwrap(), Command::Sleep( SleepArg::Minutes( 30 ) ) );
        assert_eq!( Command::parse( "sleep END" ).unwrap(), Command::Sleep( SleepArg::EndOfTrack ) );
        assert_eq!( Command::parse( "sleep off" ).unwrap(), Command::Sleep( SleepArg::Off ) );
        assert!( Command::parse( "sleep 0" ).is_err() );
    }


    #[test]
    fn test_sleep_errors_list_presets() {
        let missing = Command::parse( "sleep" ).unwrap_err().to_string();
        assert!( missing.contains( "15, 30, 45, 60, 90" ), "{}", missing );
        let invalid = Command::parse( "sleep soon" ).unwrap_err().to_string();
        assert!( invalid.contains( "'soon'" ) && invalid.contains( "90" ), "{}", invalid );
    }


    #[test]
    fn test_parse_save() {
        assert_eq!( Command::parse( "save" ).unwrap(), Command::Save );
        assert_eq!( Command::parse( "bg" ).unwrap(), Command::Save );
        assert_eq!( Command::Save.as_remote(), None );
    }


    #[test]
    fn test_parse_switches() {
        assert_eq!( Command::parse( "autoplay on" ).unwrap(), Command::AutoPlay { enabled: true } );
        assert_eq!( Command::parse( "remember off" ).unwrap(), Command::Remember { enabled: false } );
        assert!( Command::parse( "remember maybe" ).is_err() );
    }


    #[test]
    fn test_parse_unknown() {
        assert!( matches!( Command::parse( "foobar" ), Err( CommandError::Unknown( _ ) ) ) );
        assert!( matches!( Command::parse( "   " ), Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_as_remote() {
        assert_eq!( Command::parse( "toggle" ).unwrap().as_remote(), Some( RemoteCommand::TogglePlayPause ) );
        assert_eq!( Command::parse( "seek 10" ).unwrap().as_remote(), Some( RemoteCommand::SeekTo( 10.0 ) ) );
        assert_eq!( Command::parse( "play 2" ).unwrap().as_remote(), None );
        assert_eq!( Command::parse( "status" ).unwrap().as_remote(), None );
    }
}

//! Command-line argument parsing for Lectern.

use std::path::PathBuf;

use clap::Parser;


/// Lectern - A headless audiobook player that remembers where you stopped.
#[derive( Parser, Debug )]
#[command( name = "lectern" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Library root holding one directory per audiobook.
    #[arg( short, long )]
    pub root: Option<PathBuf>,

    /// State file for positions and preferences.
    #[arg( short, long )]
    pub state: Option<PathBuf>,

    /// Do not reload the last played track on startup.
    #[arg( long )]
    pub no_restore: bool,
}


impl Args {
    /// Library root: the flag, then the user's audio directory, then home.
    pub fn library_root( &self ) -> PathBuf {
        self.root.clone()
            .or_else( dirs::audio_dir )
            .or_else( dirs::home_dir )
            .unwrap_or_else( || PathBuf::from( "." ) )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_flags() {
        let args = Args::parse_from([ "lectern", "--root", "/books", "--no-restore" ]);
        assert_eq!( args.library_root(), PathBuf::from( "/books" ) );
        assert!( args.no_restore );
        assert!( args.state.is_none() );
    }
}

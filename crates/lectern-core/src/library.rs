//! Folder and track catalog
//!
//! Lists audio folders under a root directory, orders their tracks
//! naturally, probes durations, and deletes files on request.

use std::cmp::Ordering;
use std::fs::{ self, File };
use std::hash::{ Hash, Hasher };
use std::path::{ Path, PathBuf };

use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;


/// Supported audio file extensions (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "m4a", "m4b", "wav", "aac", "flac", "caf", "ogg", "opus",
];


/// Errors that can occur during library operations.
#[derive( Debug, Error )]
pub enum LibraryError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Path not found: {0}" )]
    NotFound( PathBuf ),

    #[error( "Access denied: {0}" )]
    AccessDenied( PathBuf ),

    #[error( "Probe failed for {path}: {reason}" )]
    Probe { path: PathBuf, reason: String },
}


/// An audio file inside a folder.
///
/// Identity is the absolute path: two tracks are equal when their paths are,
/// whatever their probed durations.
#[derive( Debug, Clone )]
pub struct Track {
    pub path: PathBuf,
    pub file_name: String,
    pub folder_name: String,
    /// Length in seconds, `0.0` until probed
    pub duration: f64,
}


impl Track {
    /// Builds a track from its path, without probing the file.
    pub fn from_path( path: impl Into<PathBuf> ) -> Self {
        let path = path.into();
        let file_name = path.file_name()
            .map( |n| n.to_string_lossy().into_owned() )
            .unwrap_or_default();
        let folder_name = path.parent()
            .and_then( |p| p.file_name() )
            .map( |n| n.to_string_lossy().into_owned() )
            .unwrap_or_default();

        Self { path, file_name, folder_name, duration: 0.0 }
    }


    /// Sets the duration, for builder-style construction.
    pub fn with_duration( mut self, duration: f64 ) -> Self {
        self.duration = duration;
        self
    }


    /// File name without its extension.
    pub fn display_name( &self ) -> &str {
        Path::new( &self.file_name )
            .file_stem()
            .and_then( |s| s.to_str() )
            .unwrap_or( &self.file_name )
    }
}


impl PartialEq for Track {
    fn eq( &self, other: &Self ) -> bool {
        self.path == other.path
    }
}


impl Eq for Track {}


impl Hash for Track {
    fn hash<H: Hasher>( &self, state: &mut H ) {
        self.path.hash( state );
    }
}


/// A directory holding at least one supported audio file.
#[derive( Debug, Clone )]
pub struct Folder {
    pub path: PathBuf,
    pub name: String,
    pub track_count: usize,
}


impl PartialEq for Folder {
    fn eq( &self, other: &Self ) -> bool {
        self.path == other.path
    }
}


impl Eq for Folder {}


/// Read-only view of the audio library plus the two destructive operations.
///
/// Implementations must not cache folder metadata between calls: track
/// counts change when files are deleted.
pub trait Catalog {
    /// Folders directly under `root` that contain supported files, naturally sorted.
    fn list_folders( &self, root: &Path ) -> Vec<Folder>;

    /// Tracks of a folder, naturally sorted by file name.
    fn list_tracks( &self, folder: &Folder ) -> Vec<Track>;

    /// Resolves the folder owning `track_path`, or `None` if the file is gone.
    fn resolve_folder( &self, track_path: &Path ) -> Option<Folder>;

    fn delete_folder( &self, folder: &Folder ) -> bool;

    fn delete_track( &self, track: &Track ) -> bool;
}


/// Catalog backed by the local filesystem.
#[derive( Debug, Clone, Copy, Default )]
pub struct FsCatalog;


impl FsCatalog {
    /// Creates a new filesystem catalog.
    pub fn new() -> Self {
        Self
    }


    /// Second listing pass: fills in durations for tracks that have none.
    ///
    /// Slow (opens every file), so callers run it off the control path.
    pub fn with_durations( &self, tracks: Vec<Track> ) -> Vec<Track> {
        tracks.into_iter()
            .map( |mut track| {
                if track.duration <= 0.0 {
                    match probe_duration( &track.path ) {
                        Ok( secs ) => track.duration = secs,
                        Err( e ) => tracing::debug!( "Duration unavailable: {}", e ),
                    }
                }
                track
            })
            .collect()
    }


    /// Lists visible directory entries, mapping the interesting IO failures.
    fn read_entries( dir: &Path ) -> Result<Vec<PathBuf>, LibraryError> {
        let entries = match fs::read_dir( dir ) {
            Ok( e ) => e,
            Err( e ) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err( LibraryError::AccessDenied( dir.to_path_buf() ) );
            }
            Err( e ) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err( LibraryError::NotFound( dir.to_path_buf() ) );
            }
            Err( e ) => return Err( LibraryError::Io( e ) ),
        };

        Ok( entries
            .flatten()
            .map( |entry| entry.path() )
            .filter( |path| !is_hidden( path ) )
            .collect() )
    }


    fn audio_files( dir: &Path ) -> Vec<PathBuf> {
        match Self::read_entries( dir ) {
            Ok( entries ) => entries.into_iter()
                .filter( |p| p.is_file() && is_audio_file( p ) )
                .collect(),
            Err( e ) => {
                tracing::warn!( "Failed to list {:?}: {}", dir, e );
                Vec::new()
            }
        }
    }


    fn folder_at( path: &Path ) -> Folder {
        let name = path.file_name()
            .map( |n| n.to_string_lossy().into_owned() )
            .unwrap_or_default();
        let track_count = Self::audio_files( path ).len();

        Folder { path: path.to_path_buf(), name, track_count }
    }
}


impl Catalog for FsCatalog {
    fn list_folders( &self, root: &Path ) -> Vec<Folder> {
        let entries = match Self::read_entries( root ) {
            Ok( e ) => e,
            Err( e ) => {
                tracing::warn!( "Failed to scan root {:?}: {}", root, e );
                return Vec::new();
            }
        };

        let mut folders: Vec<Folder> = entries.into_iter()
            .filter( |p| p.is_dir() )
            .map( |p| Self::folder_at( &p ) )
            .filter( |f| f.track_count > 0 )
            .collect();

        folders.sort_by( |a, b| natural_cmp( &a.name, &b.name ) );
        tracing::info!( "Found {} folders under {:?}", folders.len(), root );
        folders
    }


    fn list_tracks( &self, folder: &Folder ) -> Vec<Track> {
        let mut tracks: Vec<Track> = Self::audio_files( &folder.path )
            .into_iter()
            .map( |path| {
                let mut track = Track::from_path( path );
                track.folder_name = folder.name.clone();
                track
            })
            .collect();

        tracks.sort_by( |a, b| natural_cmp( &a.file_name, &b.file_name ) );
        tracks
    }


    fn resolve_folder( &self, track_path: &Path ) -> Option<Folder> {
        if !track_path.is_file() {
            return None;
        }
        let parent = track_path.parent()?;
        Some( Self::folder_at( parent ) )
    }


    fn delete_folder( &self, folder: &Folder ) -> bool {
        match fs::remove_dir_all( &folder.path ) {
            Ok(()) => {
                tracing::info!( "Deleted folder {:?}", folder.path );
                true
            }
            Err( e ) => {
                tracing::warn!( "Failed to delete folder {:?}: {}", folder.path, e );
                false
            }
        }
    }


    fn delete_track( &self, track: &Track ) -> bool {
        match fs::remove_file( &track.path ) {
            Ok(()) => {
                tracing::info!( "Deleted track {:?}", track.path );
                true
            }
            Err( e ) => {
                tracing::warn!( "Failed to delete track {:?}: {}", track.path, e );
                false
            }
        }
    }
}


/// Reads the container-reported length of an audio file, in seconds.
pub fn probe_duration( path: &Path ) -> Result<f64, LibraryError> {
    let probe_error = |reason: &str| LibraryError::Probe {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let file = File::open( path )?;
    let mss = MediaSourceStream::new( Box::new( file ), Default::default() );

    let mut hint = Hint::new();
    if let Some( ext ) = path.extension().and_then( |e| e.to_str() ) {
        hint.with_extension( ext );
    }

    let probed = symphonia::default::get_probe()
        .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
        .map_err( |e| probe_error( &e.to_string() ) )?;

    let track = probed.format
        .tracks()
        .iter()
        .find( |t| t.codec_params.codec != CODEC_TYPE_NULL )
        .ok_or_else( || probe_error( "no audio track" ) )?;

    let params = &track.codec_params;
    let frames = params.n_frames.ok_or_else( || probe_error( "unknown length" ) )?;

    if let Some( time_base ) = params.time_base {
        let time = time_base.calc_time( frames );
        Ok( time.seconds as f64 + time.frac )
    } else if let Some( rate ) = params.sample_rate {
        Ok( frames as f64 / rate as f64 )
    } else {
        Err( probe_error( "unknown time base" ) )
    }
}


/// Checks if a file has a supported audio extension.
pub fn is_audio_file( path: &Path ) -> bool {
    path.extension()
        .and_then( |e| e.to_str() )
        .map( |e| SUPPORTED_EXTENSIONS.contains( &e.to_lowercase().as_str() ) )
        .unwrap_or( false )
}


fn is_hidden( path: &Path ) -> bool {
    path.file_name()
        .and_then( |n| n.to_str() )
        .map( |n| n.starts_with( '.' ) )
        .unwrap_or( false )
}


/// Piece of a name: a run of digits or a run of anything else.
#[derive( Debug, PartialEq, Eq )]
enum Chunk {
    Digits( String ),
    Text( String ),
}


/// Maps full-width ASCII forms (and the ideographic space) to their
/// half-width equivalents.
fn fold_width( c: char ) -> char {
    match c {
        '\u{FF01}'..='\u{FF5E}' => char::from_u32( c as u32 - 0xFEE0 ).unwrap_or( c ),
        '\u{3000}' => ' ',
        _ => c,
    }
}


fn chunks( s: &str ) -> Vec<Chunk> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_digits = false;

    for c in s.chars().map( fold_width ) {
        let is_digit = c.is_ascii_digit();
        if !current.is_empty() && is_digit != in_digits {
            let run = std::mem::take( &mut current );
            out.push( if in_digits { Chunk::Digits( run ) } else { Chunk::Text( run ) } );
        }
        in_digits = is_digit;
        if is_digit {
            current.push( c );
        } else {
            current.extend( c.to_lowercase() );
        }
    }

    if !current.is_empty() {
        out.push( if in_digits { Chunk::Digits( current ) } else { Chunk::Text( current ) } );
    }
    out
}


fn cmp_digits( a: &str, b: &str ) -> Ordering {
    let a = a.trim_start_matches( '0' );
    let b = b.trim_start_matches( '0' );
    a.len().cmp( &b.len() ).then_with( || a.cmp( b ) )
}


/// Natural ordering: digit runs compare as integers, the rest compares
/// case- and width-insensitively. `track2` sorts before `track10`.
pub fn natural_cmp( a: &str, b: &str ) -> Ordering {
    let left = chunks( a );
    let right = chunks( b );

    for ( l, r ) in left.iter().zip( right.iter() ) {
        let ord = match ( l, r ) {
            ( Chunk::Digits( x ), Chunk::Digits( y ) ) => cmp_digits( x, y ),
            ( Chunk::Text( x ), Chunk::Text( y ) ) => x.cmp( y ),
            ( Chunk::Digits( _ ), Chunk::Text( _ ) ) => Ordering::Less,
            ( Chunk::Text( _ ), Chunk::Digits( _ ) ) => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    // Equal up to the shorter name; fall back to raw order so sorting is total
    left.len().cmp( &right.len() ).then_with( || a.cmp( b ) )
}


#[cfg( test )]
mod tests {
    use super::*;


    fn touch( path: &Path ) {
        fs::write( path, b"" ).unwrap();
    }


    #[test]
    fn test_natural_digits_compare_numerically() {
        assert_eq!( natural_cmp( "track2", "track10" ), Ordering::Less );
        assert_eq!( "track2".cmp( "track10" ), Ordering::Greater );
        assert_eq!( natural_cmp( "track2", "track2a" ), Ordering::Less );
        assert_eq!( natural_cmp( "track2a", "track10" ), Ordering::Less );
    }


    #[test]
    fn test_natural_leading_zeros() {
        assert_eq!( natural_cmp( "01", "02" ), Ordering::Less );
        assert_eq!( natural_cmp( "02", "10" ), Ordering::Less );
        assert_eq!( natural_cmp( "009", "10" ), Ordering::Less );
    }


    #[test]
    fn test_natural_case_and_width_insensitive() {
        assert_eq!( natural_cmp( "Chapter 3", "chapter 12" ), Ordering::Less );
        assert_eq!( natural_cmp( "ｔｒａｃｋ９", "track10" ), Ordering::Less );
        assert_eq!( natural_cmp( "B", "a" ), Ordering::Greater );
    }


    #[test]
    fn test_natural_sort_order() {
        let mut names = vec![ "10.mp3", "2.mp3", "1.mp3", "Intro.mp3", "02b.mp3" ];
        names.sort_by( |a, b| natural_cmp( a, b ) );
        assert_eq!( names, vec![ "1.mp3", "2.mp3", "02b.mp3", "10.mp3", "Intro.mp3" ] );
    }


    #[test]
    fn test_track_identity_ignores_duration() {
        let a = Track::from_path( "/books/Dune/01.mp3" );
        let b = Track::from_path( "/books/Dune/01.mp3" ).with_duration( 321.0 );
        assert_eq!( a, b );
        assert_eq!( a.folder_name, "Dune" );
        assert_eq!( a.display_name(), "01" );
    }


    #[test]
    fn test_is_audio_file() {
        assert!( is_audio_file( Path::new( "a/b.MP3" ) ) );
        assert!( is_audio_file( Path::new( "book.m4b" ) ) );
        assert!( !is_audio_file( Path::new( "cover.jpg" ) ) );
        assert!( !is_audio_file( Path::new( "README" ) ) );
    }


    #[test]
    fn test_list_folders_and_tracks() {
        let root = tempfile::tempdir().unwrap();
        let book = root.path().join( "Book 10" );
        let other = root.path().join( "Book 2" );
        let empty = root.path().join( "Artwork" );
        fs::create_dir( &book ).unwrap();
        fs::create_dir( &other ).unwrap();
        fs::create_dir( &empty ).unwrap();
        touch( &book.join( "track10.mp3" ) );
        touch( &book.join( "track2.mp3" ) );
        touch( &book.join( "notes.txt" ) );
        touch( &book.join( ".hidden.mp3" ) );
        touch( &other.join( "a.m4a" ) );
        touch( &empty.join( "cover.png" ) );

        let catalog = FsCatalog::new();
        let folders = catalog.list_folders( root.path() );
        let names: Vec<_> = folders.iter().map( |f| f.name.as_str() ).collect();
        assert_eq!( names, vec![ "Book 2", "Book 10" ] );
        assert_eq!( folders[ 1 ].track_count, 2 );

        let tracks = catalog.list_tracks( &folders[ 1 ] );
        let files: Vec<_> = tracks.iter().map( |t| t.file_name.as_str() ).collect();
        assert_eq!( files, vec![ "track2.mp3", "track10.mp3" ] );
        assert!( tracks.iter().all( |t| t.duration == 0.0 && t.folder_name == "Book 10" ) );
    }


    #[test]
    fn test_resolve_folder_recounts_and_handles_missing() {
        let root = tempfile::tempdir().unwrap();
        let book = root.path().join( "Book" );
        fs::create_dir( &book ).unwrap();
        touch( &book.join( "1.mp3" ) );
        touch( &book.join( "2.mp3" ) );

        let catalog = FsCatalog::new();
        let folder = catalog.resolve_folder( &book.join( "1.mp3" ) ).unwrap();
        assert_eq!( folder.name, "Book" );
        assert_eq!( folder.track_count, 2 );

        let track = catalog.list_tracks( &folder ).remove( 1 );
        assert!( catalog.delete_track( &track ) );
        assert_eq!( catalog.resolve_folder( &book.join( "1.mp3" ) ).unwrap().track_count, 1 );
        assert!( catalog.resolve_folder( &book.join( "2.mp3" ) ).is_none() );

        assert!( catalog.delete_folder( &folder ) );
        assert!( !book.exists() );
        assert!( catalog.list_folders( root.path() ).is_empty() );
    }


    #[test]
    fn test_missing_root_lists_nothing() {
        let catalog = FsCatalog::new();
        assert!( catalog.list_folders( Path::new( "/definitely/not/here" ) ).is_empty() );
    }


    #[test]
    fn test_probe_rejects_non_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "broken.mp3" );
        fs::write( &path, b"not really audio" ).unwrap();

        assert!( probe_duration( &path ).is_err() );
        let tracks = FsCatalog::new().with_durations( vec![ Track::from_path( &path ) ] );
        assert_eq!( tracks[ 0 ].duration, 0.0 );
    }
}

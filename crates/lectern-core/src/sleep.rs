//! Sleep timer
//!
//! Either counts down and then asks the session to pause, or flags that
//! playback should stop when the current track ends.

use std::time::Duration;


/// Minute presets offered by the UI.
pub const SLEEP_PRESETS: [u32; 5] = [ 15, 30, 45, 60, 90 ];


/// Current timer mode. The two active modes are mutually exclusive.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum SleepMode {
    #[default]
    Off,
    Countdown { remaining: Duration },
    EndOfTrack,
}


/// Cancellable sleep timer, driven by the session tick.
#[derive( Debug, Default )]
pub struct SleepTimer {
    mode: SleepMode,
}


impl SleepTimer {
    pub fn new() -> Self {
        Self::default()
    }


    /// Starts a countdown of `minutes`, replacing any active mode.
    ///
    /// @returns false (and leaves the timer untouched) for zero minutes
    pub fn start( &mut self, minutes: u32 ) -> bool {
        if minutes == 0 {
            return false;
        }
        self.mode = SleepMode::Countdown {
            remaining: Duration::from_secs( u64::from( minutes ) * 60 ),
        };
        true
    }


    /// Stops playback when the current track ends, replacing any countdown.
    pub fn stop_at_end_of_track( &mut self ) {
        self.mode = SleepMode::EndOfTrack;
    }


    pub fn cancel( &mut self ) {
        self.mode = SleepMode::Off;
    }


    pub fn mode( &self ) -> SleepMode {
        self.mode
    }


    pub fn is_active( &self ) -> bool {
        self.mode != SleepMode::Off
    }


    /// Time left on a countdown; `None` in the other modes.
    pub fn remaining( &self ) -> Option<Duration> {
        match self.mode {
            SleepMode::Countdown { remaining } => Some( remaining ),
            _ => None,
        }
    }


    pub fn is_end_of_track( &self ) -> bool {
        self.mode == SleepMode::EndOfTrack
    }


    /// Moves the countdown forward.
    ///
    /// @returns true exactly once, on the call that reaches zero; the timer
    /// is off afterwards
    pub fn advance( &mut self, elapsed: Duration ) -> bool {
        if let SleepMode::Countdown { remaining } = self.mode {
            let left = remaining.saturating_sub( elapsed );
            if left.is_zero() {
                self.mode = SleepMode::Off;
                return true;
            }
            self.mode = SleepMode::Countdown { remaining: left };
        }
        false
    }


    /// Consumes the end-of-track flag.
    pub fn take_end_of_track( &mut self ) -> bool {
        if self.is_end_of_track() {
            self.mode = SleepMode::Off;
            true
        } else {
            false
        }
    }


    /// Short label for display: `m:ss`, `end of track`, or `off`.
    pub fn label( &self ) -> String {
        match self.mode {
            SleepMode::Off => "off".to_string(),
            SleepMode::EndOfTrack => "end of track".to_string(),
            SleepMode::Countdown { remaining } => {
                let secs = remaining.as_secs();
                format!( "{}:{:02}", secs / 60, secs % 60 )
            }
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_countdown_fires_once() {
        let mut timer = SleepTimer::new();
        assert!( timer.start( 1 ) );
        assert!( !timer.advance( Duration::from_secs( 59 ) ) );
        assert_eq!( timer.remaining(), Some( Duration::from_secs( 1 ) ) );
        assert!( timer.advance( Duration::from_secs( 5 ) ) );
        assert!( !timer.advance( Duration::from_secs( 5 ) ) );
        assert!( !timer.is_active() );
    }


    #[test]
    fn test_cancel_prevents_expiry() {
        let mut timer = SleepTimer::new();
        timer.start( 15 );
        timer.advance( Duration::from_secs( 899 ) );
        timer.cancel();
        assert!( !timer.advance( Duration::from_secs( 10 ) ) );
        assert_eq!( timer.remaining(), None );
    }


    #[test]
    fn test_modes_are_exclusive() {
        let mut timer = SleepTimer::new();
        timer.start( 30 );
        timer.stop_at_end_of_track();
        assert_eq!( timer.remaining(), None );
        assert!( !timer.advance( Duration::from_secs( 3600 ) ) );

        timer.start( 45 );
        assert!( !timer.is_end_of_track() );
        assert!( !timer.take_end_of_track() );
    }


    #[test]
    fn test_zero_minutes_rejected() {
        let mut timer = SleepTimer::new();
        timer.stop_at_end_of_track();
        assert!( !timer.start( 0 ) );
        assert!( timer.is_end_of_track() );
    }


    #[test]
    fn test_label() {
        let mut timer = SleepTimer::new();
        assert_eq!( timer.label(), "off" );
        timer.start( 2 );
        timer.advance( Duration::from_secs( 55 ) );
        assert_eq!( timer.label(), "1:05" );
        timer.stop_at_end_of_track();
        assert_eq!( timer.label(), "end of track" );
        assert!( timer.take_end_of_track() );
        assert_eq!( timer.mode(), SleepMode::Off );
    }
}

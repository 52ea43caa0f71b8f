//! Current movie and playback status of a room
//!
//! The stored seek is only rewritten on explicit updates. Reads extrapolate
//! from the last update while playing, so no server-side ticking is needed.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::Instant;

use crate::{models::MovieId, Error, Result};

/// Playback status as broadcast to clients
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Status {
    pub is_playing: bool,
    /// Position in seconds
    pub seek: f64,
    pub rate: f64,
    #[serde(skip)]
    updated_at: Instant,
}

impl Status {
    fn new(is_playing: bool) -> Self {
        Self {
            is_playing,
            seek: 0.0,
            rate: 1.0,
            updated_at: Instant::now(),
        }
    }

    /// Status as of `now`, with the seek advanced while playing
    #[must_use]
    pub fn at(&self, now: Instant) -> Self {
        if !self.is_playing {
            return *self;
        }
        let elapsed = now.saturating_duration_since(self.updated_at).as_secs_f64();
        Self {
            seek: self.seek + self.rate * elapsed,
            updated_at: now,
            ..*self
        }
    }

    #[must_use]
    pub const fn updated_at(&self) -> Instant {
        self.updated_at
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::new(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Current {
    pub movie_id: Option<MovieId>,
    pub live: bool,
    pub status: Status,
    /// Bumped on every change
    pub version: u64,
}

/// Lock-guarded [`Current`] of one room
#[derive(Debug, Default)]
pub struct CurrentState {
    inner: RwLock<Current>,
}

impl Default for Current {
    fn default() -> Self {
        Self {
            movie_id: None,
            live: false,
            status: Status::default(),
            version: 0,
        }
    }
}

fn validate(seek: f64, rate: f64, time_diff: f64) -> Result<()> {
    if !seek.is_finite() || !time_diff.is_finite() {
        return Err(Error::InvalidOperation(
            "Seek and time difference must be finite".to_string(),
        ));
    }
    if !rate.is_finite() || rate <= 0.0 {
        return Err(Error::InvalidOperation(format!("Invalid playback rate {rate}")));
    }
    Ok(())
}

/// Seek corrected by how long the update spent in transit from the client
fn corrected_seek(playing: bool, seek: f64, rate: f64, time_diff: f64) -> f64 {
    let seek = if playing { seek + time_diff * rate } else { seek };
    seek.max(0.0)
}

impl CurrentState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Point at a new movie, or at none; status restarts from zero
    pub fn set_movie(&self, movie_id: Option<MovieId>, live: bool, play: bool) -> Current {
        let mut current = self.inner.write();
        current.movie_id = movie_id;
        current.live = live;
        current.status = Status::new(play);
        current.version += 1;
        current.clone()
    }

    /// Overwrite the whole status
    ///
    /// `time_diff` is the client-reported delay in seconds between the user
    /// action and this update.
    pub fn set_status(&self, playing: bool, seek: f64, rate: f64, time_diff: f64) -> Result<Status> {
        validate(seek, rate, time_diff)?;
        let mut current = self.inner.write();
        current.status = Status {
            is_playing: playing,
            seek: corrected_seek(playing, seek, rate, time_diff),
            rate,
            updated_at: Instant::now(),
        };
        current.version += 1;
        Ok(current.status)
    }

    /// Overwrite seek and rate, keeping the playing flag
    pub fn set_seek_rate(&self, seek: f64, rate: f64, time_diff: f64) -> Result<Status> {
        validate(seek, rate, time_diff)?;
        let mut current = self.inner.write();
        let playing = current.status.is_playing;
        current.status = Status {
            is_playing: playing,
            seek: corrected_seek(playing, seek, rate, time_diff),
            rate,
            updated_at: Instant::now(),
        };
        current.version += 1;
        Ok(current.status)
    }

    /// Current state with the seek extrapolated to now
    #[must_use]
    pub fn snapshot(&self) -> Current {
        let current = self.inner.read();
        Current {
            status: current.status.at(Instant::now()),
            ..current.clone()
        }
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.read().status.at(Instant::now())
    }

    #[must_use]
    pub fn movie_id(&self) -> Option<MovieId> {
        self.inner.read().movie_id.clone()
    }

    #[must_use]
    pub fn is_current(&self, movie_id: &MovieId) -> bool {
        self.inner.read().movie_id.as_ref() == Some(movie_id)
    }

    /// Whether any of `movie_ids` is the current movie
    #[must_use]
    pub fn contains_any(&self, movie_ids: &[MovieId]) -> bool {
        let current = self.inner.read();
        current
            .movie_id
            .as_ref()
            .is_some_and(|id| movie_ids.contains(id))
    }

    /// Whether an expiry token handed out earlier is stale
    ///
    /// `current_token` is the expiry token of the current movie right now.
    #[must_use]
    pub const fn check_expired(token: u64, current_token: u64) -> bool {
        token != current_token
    }
}

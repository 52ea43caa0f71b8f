//! Ordered movie collection of a room
//!
//! Loaded from storage on first use. Mutations are serialized, persisted
//! first, and only then applied in memory, so a storage failure leaves the
//! in-memory list untouched. Index order always equals position order.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OnceCell as AsyncOnceCell};
use tracing::debug;

use crate::{
    cache::{new_vendor_movie_cache, VendorMovieCache},
    models::{BaseMovie, Movie, MovieId, Page, PageParams, RoomId, UserId},
    storage::RoomStorage,
    vendor::VendorRegistry,
    Error, Result,
};

/// A movie in a room's list, plus its lazily created vendor URL cache
pub struct RoomMovie {
    movie: Movie,
    position: AtomicI64,
    vendor_cache: OnceCell<VendorMovieCache>,
}

impl std::fmt::Debug for RoomMovie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomMovie")
            .field("id", &self.movie.id)
            .field("position", &self.position())
            .field("vendor_cache", &self.vendor_cache.get())
            .finish()
    }
}

impl RoomMovie {
    #[must_use]
    pub fn new(movie: Movie) -> Self {
        let position = AtomicI64::new(movie.position);
        Self {
            movie,
            position,
            vendor_cache: OnceCell::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &MovieId {
        &self.movie.id
    }

    #[must_use]
    pub const fn base(&self) -> &BaseMovie {
        &self.movie.base
    }

    #[must_use]
    pub const fn creator_id(&self) -> &UserId {
        &self.movie.creator_id
    }

    #[must_use]
    pub fn position(&self) -> i64 {
        self.position.load(Ordering::Acquire)
    }

    fn set_position(&self, position: i64) {
        self.position.store(position, Ordering::Release);
    }

    /// The stored movie with its current position
    #[must_use]
    pub fn snapshot(&self) -> Movie {
        Movie {
            position: self.position(),
            ..self.movie.clone()
        }
    }

    /// Vendor URL cache, created on first use; `None` for direct-URL movies
    pub fn vendor_cache(
        &self,
        vendors: &Arc<VendorRegistry>,
        ttl: Duration,
    ) -> Option<&VendorMovieCache> {
        let info = self.movie.base.vendor.as_ref()?;
        Some(
            self.vendor_cache
                .get_or_init(|| new_vendor_movie_cache(info.clone(), Arc::clone(vendors), ttl)),
        )
    }

    /// Token that changes whenever cached resolutions of this movie go stale
    ///
    /// Derived from the movie identity and source, plus the vendor cache
    /// generation once URLs have been resolved.
    #[must_use]
    pub fn expire_id(&self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.movie.id.as_str().as_bytes());
        hasher.update(self.movie.base.url.as_bytes());
        if let Some(vendor) = &self.movie.base.vendor {
            hasher.update(vendor.backend.as_bytes());
            hasher.update(vendor.path.as_bytes());
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let base = u64::from_be_bytes(bytes);

        let generation = self.vendor_cache.get().map_or(0, VendorMovieCache::generation);
        base.wrapping_add(generation)
    }

    #[must_use]
    pub fn check_expired(&self, token: u64) -> bool {
        token != self.expire_id()
    }
}

type Movies = IndexMap<MovieId, Arc<RoomMovie>>;

pub struct MovieList {
    room_id: RoomId,
    storage: Arc<dyn RoomStorage>,
    movies: AsyncOnceCell<RwLock<Movies>>,
    /// Serializes persist-then-apply mutations
    write_lock: Mutex<()>,
}

impl MovieList {
    #[must_use]
    pub fn new(room_id: RoomId, storage: Arc<dyn RoomStorage>) -> Self {
        Self {
            room_id,
            storage,
            movies: AsyncOnceCell::new(),
            write_lock: Mutex::new(()),
        }
    }

    async fn movies(&self) -> Result<&RwLock<Movies>> {
        self.movies
            .get_or_try_init(|| async {
                let mut stored = self
                    .storage
                    .load_movies(&self.room_id)
                    .await
                    .map_err(|e| e.context(format!("load movies of room {}", self.room_id)))?;
                debug!(room_id = %self.room_id, count = stored.len(), "Loaded movie list");
                let mut movies: Movies = IndexMap::with_capacity(stored.len());
                stored.sort_by_key(|m| m.position);
                for movie in stored {
                    movies.insert(movie.id.clone(), Arc::new(RoomMovie::new(movie)));
                }
                Ok::<_, Error>(RwLock::new(movies))
            })
            .await
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.movies.initialized()
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.movies().await?.read().len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn get(&self, movie_id: &MovieId) -> Result<Arc<RoomMovie>> {
        self.movies()
            .await?
            .read()
            .get(movie_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Movie {movie_id} not found")))
    }

    pub async fn add(&self, movie: Movie) -> Result<Arc<RoomMovie>> {
        let mut added = self.add_many(vec![movie]).await?;
        added
            .pop()
            .ok_or_else(|| Error::Internal("Added movie missing from result".to_string()))
    }

    /// Append movies to the end of the list
    ///
    /// Room IDs and positions are assigned here. Fails without side effects if
    /// any ID is already present or repeated within the batch.
    pub async fn add_many(&self, mut movies: Vec<Movie>) -> Result<Vec<Arc<RoomMovie>>> {
        let list = self.movies().await?;
        let _guard = self.write_lock.lock().await;

        {
            let current = list.read();
            let mut seen = HashSet::with_capacity(movies.len());
            for movie in &movies {
                if current.contains_key(&movie.id) || !seen.insert(&movie.id) {
                    return Err(Error::InvalidOperation(format!(
                        "Movie {} already exists",
                        movie.id
                    )));
                }
            }

            let next = current.values().last().map_or(0, |m| m.position() + 1);
            for (offset, movie) in (0_i64..).zip(movies.iter_mut()) {
                movie.room_id = self.room_id.clone();
                movie.position = next + offset;
            }
        }

        self.storage.create_movies(&movies).await?;

        let added: Vec<_> = movies
            .into_iter()
            .map(|movie| Arc::new(RoomMovie::new(movie)))
            .collect();
        let mut current = list.write();
        for movie in &added {
            current.insert(movie.id().clone(), Arc::clone(movie));
        }
        Ok(added)
    }

    /// Replace a movie's editable fields; the vendor cache starts over
    pub async fn update(&self, movie_id: &MovieId, base: BaseMovie) -> Result<Arc<RoomMovie>> {
        let list = self.movies().await?;
        let _guard = self.write_lock.lock().await;

        let existing = list
            .read()
            .get(movie_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Movie {movie_id} not found")))?;

        self.storage
            .update_movie(&self.room_id, movie_id, &base)
            .await?;

        let mut movie = existing.snapshot();
        movie.base = base;
        let updated = Arc::new(RoomMovie::new(movie));
        list.write().insert(movie_id.clone(), Arc::clone(&updated));
        Ok(updated)
    }

    pub async fn delete(&self, movie_id: &MovieId) -> Result<()> {
        self.delete_many(std::slice::from_ref(movie_id)).await
    }

    /// Remove movies; fails without side effects if any ID is unknown
    pub async fn delete_many(&self, movie_ids: &[MovieId]) -> Result<()> {
        let list = self.movies().await?;
        let _guard = self.write_lock.lock().await;

        {
            let current = list.read();
            if let Some(missing) = movie_ids.iter().find(|id| !current.contains_key(*id)) {
                return Err(Error::NotFound(format!("Movie {missing} not found")));
            }
        }

        self.storage
            .delete_movies(&self.room_id, movie_ids)
            .await?;

        let mut current = list.write();
        for id in movie_ids {
            current.shift_remove(id);
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        let list = self.movies().await?;
        let _guard = self.write_lock.lock().await;

        self.storage.delete_room_movies(&self.room_id).await?;
        list.write().clear();
        Ok(())
    }

    /// Exchange the positions of two movies
    pub async fn swap(&self, a: &MovieId, b: &MovieId) -> Result<()> {
        let list = self.movies().await?;
        let _guard = self.write_lock.lock().await;

        {
            let current = list.read();
            for id in [a, b] {
                if !current.contains_key(id) {
                    return Err(Error::NotFound(format!("Movie {id} not found")));
                }
            }
        }
        if a == b {
            return Ok(());
        }

        self.storage
            .swap_movie_positions(&self.room_id, a, b)
            .await?;

        let mut current = list.write();
        if let (Some(ia), Some(ib)) = (current.get_index_of(a), current.get_index_of(b)) {
            let (ma, mb) = (Arc::clone(&current[ia]), Arc::clone(&current[ib]));
            let pa = ma.position();
            ma.set_position(mb.position());
            mb.set_position(pa);
            current.swap_indices(ia, ib);
        }
        Ok(())
    }

    /// One page of the list in position order, optionally only one creator's movies
    pub async fn list(&self, params: PageParams, creator: Option<&UserId>) -> Result<Page<Movie>> {
        let list = self.movies().await?;
        let current = list.read();

        let matching = current
            .values()
            .filter(|m| creator.map_or(true, |c| m.creator_id() == c));
        let total = matching.clone().count();
        let items = matching
            .skip(params.offset())
            .take(params.limit())
            .map(|m| m.snapshot())
            .collect();

        Ok(Page::new(items, total, params))
    }

    /// Every movie in position order
    pub async fn all(&self) -> Result<Vec<Arc<RoomMovie>>> {
        Ok(self.movies().await?.read().values().cloned().collect())
    }

    /// Drop in-memory state; a list that was never loaded is left alone
    pub fn close(&self) {
        if let Some(list) = self.movies.get() {
            list.write().clear();
        }
    }
}

//! TTL cache with single-flight refresh
//!
//! A [`RefreshCache`] holds one value produced by an expensive, possibly
//! unreliable refresh function (typically a vendor call). It moves through
//! `Empty -> Refreshing -> Valid`, and back to `Refreshing` once the TTL runs
//! out. While a refresh is in flight every caller attaches to the same shared
//! future, so N concurrent `get`s cost one refresh and all observe one outcome.
//!
//! A failed or canceled refresh leaves the previous value and timestamp as they
//! were, so the next call simply retries.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use synctv_room::cache::RefreshCache;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> synctv_room::Result<()> {
//! let cache = RefreshCache::new(Duration::from_secs(60), |_ctx, ()| async {
//!     Ok::<_, synctv_room::Error>("token".to_string())
//! });
//! let token = cache.get(&CancellationToken::new(), ()).await?;
//! assert_eq!(token.as_str(), "token");
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Boxed refresh function: `(cancellation, dependency args) -> value`
pub type RefreshFn<T, A> =
    Arc<dyn Fn(CancellationToken, A) -> BoxFuture<'static, Result<T>> + Send + Sync>;

type SharedRefresh<T> = Shared<BoxFuture<'static, Result<Arc<T>>>>;

struct Pending<T> {
    id: u64,
    future: SharedRefresh<T>,
    token: CancellationToken,
}

struct State<T> {
    value: Option<Arc<T>>,
    refreshed_at: Option<Instant>,
    /// Number of successful refreshes so far
    generation: u64,
    next_id: u64,
    pending: Option<Pending<T>>,
}

struct Inner<T, A> {
    refresh: RefreshFn<T, A>,
    /// Zero: populate once, never expire
    ttl: Duration,
    state: Mutex<State<T>>,
}

/// Single-flight TTL cache around a refresh function
pub struct RefreshCache<T, A = ()> {
    inner: Arc<Inner<T, A>>,
}

impl<T, A> Clone for RefreshCache<T, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, A> std::fmt::Debug for RefreshCache<T, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RefreshCache")
            .field("ttl", &self.inner.ttl)
            .field("generation", &state.generation)
            .field("refreshing", &state.pending.is_some())
            .finish()
    }
}

impl<T, A> RefreshCache<T, A>
where
    T: Send + Sync + 'static,
    A: Send + 'static,
{
    /// Create an empty cache; nothing runs until the first `get`
    pub fn new<F, Fut>(ttl: Duration, refresh: F) -> Self
    where
        F: Fn(CancellationToken, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let refresh: RefreshFn<T, A> = Arc::new(move |ctx, args| refresh(ctx, args).boxed());
        Self {
            inner: Arc::new(Inner {
                refresh,
                ttl,
                state: Mutex::new(State {
                    value: None,
                    refreshed_at: None,
                    generation: 0,
                    next_id: 0,
                    pending: None,
                }),
            }),
        }
    }

    /// Return the cached value, refreshing first if it is missing or expired
    ///
    /// `args` is only consumed if this call has to start a refresh.
    pub async fn get(&self, ctx: &CancellationToken, args: A) -> Result<Arc<T>> {
        let future = {
            let mut state = self.inner.state.lock();
            if let Some(value) = self.fresh_value(&state) {
                return Ok(value);
            }
            self.attach_or_start(&mut state, ctx, args)
        };
        Self::wait(ctx, future).await
    }

    /// Refresh regardless of the TTL
    ///
    /// Joins a refresh that is already in flight instead of starting another.
    pub async fn force_refresh(&self, ctx: &CancellationToken, args: A) -> Result<Arc<T>> {
        let future = {
            let mut state = self.inner.state.lock();
            self.attach_or_start(&mut state, ctx, args)
        };
        Self::wait(ctx, future).await
    }

    /// Last successfully refreshed value, without refreshing or checking the TTL
    #[must_use]
    pub fn data(&self) -> Option<Arc<T>> {
        self.inner.state.lock().value.clone()
    }

    #[must_use]
    pub fn last_refreshed(&self) -> Option<Instant> {
        self.inner.state.lock().refreshed_at
    }

    /// Bumped on every successful refresh; 0 until the first one
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.inner.state.lock().pending.is_some()
    }

    /// Drop the cached value so the next `get` refreshes; an in-flight refresh is kept
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.value = None;
        state.refreshed_at = None;
    }

    fn fresh_value(&self, state: &State<T>) -> Option<Arc<T>> {
        let value = state.value.as_ref()?;
        if self.inner.ttl.is_zero() {
            return Some(Arc::clone(value));
        }
        match state.refreshed_at {
            Some(at) if at.elapsed() < self.inner.ttl => Some(Arc::clone(value)),
            _ => None,
        }
    }

    fn attach_or_start(
        &self,
        state: &mut State<T>,
        ctx: &CancellationToken,
        args: A,
    ) -> SharedRefresh<T> {
        if let Some(pending) = &state.pending {
            // a refresh whose owner was canceled would only ever yield Canceled
            if !pending.token.is_cancelled() {
                return pending.future.clone();
            }
        }

        state.next_id += 1;
        let id = state.next_id;
        let token = ctx.child_token();
        let refresh = Arc::clone(&self.inner.refresh);
        let weak = Arc::downgrade(&self.inner);
        let refresh_token = token.clone();

        debug!(refresh_id = id, "Starting cache refresh");

        let future = async move {
            let outcome = tokio::select! {
                biased;
                () = refresh_token.cancelled() => Err(Error::Canceled("cache refresh canceled".to_string())),
                result = refresh(refresh_token.clone(), args) => result,
            };
            Self::complete(&weak, id, outcome)
        }
        .boxed()
        .shared();

        state.pending = Some(Pending {
            id,
            future: future.clone(),
            token,
        });
        future
    }

    fn complete(weak: &Weak<Inner<T, A>>, id: u64, outcome: Result<T>) -> Result<Arc<T>> {
        let outcome = outcome.map(Arc::new);
        let Some(inner) = weak.upgrade() else {
            return outcome;
        };

        let mut state = inner.state.lock();
        let current = state.pending.as_ref().is_some_and(|p| p.id == id);
        if current {
            state.pending = None;
        }

        match &outcome {
            Ok(value) if current => {
                state.value = Some(Arc::clone(value));
                state.refreshed_at = Some(Instant::now());
                state.generation += 1;
                debug!(refresh_id = id, generation = state.generation, "Cache refreshed");
            }
            Ok(_) => {
                debug!(refresh_id = id, "Superseded cache refresh finished, result discarded");
            }
            Err(err) => {
                warn!(refresh_id = id, error = %err, "Cache refresh failed, keeping previous value");
            }
        }
        outcome
    }

    async fn wait(ctx: &CancellationToken, future: SharedRefresh<T>) -> Result<Arc<T>> {
        tokio::select! {
            biased;
            () = ctx.cancelled() => Err(Error::Canceled("cache read canceled".to_string())),
            result = future => result,
        }
    }
}

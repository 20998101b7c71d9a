//! Bounded pool of reusable rendering sessions.
//!
//! Sessions are expensive to open and unsafe to share, so the pool keeps a
//! stack of idle sessions (most recently released first), tracks which ones
//! are handed out, and caps how many can be handed out at once. Waiting for a
//! free session parks on a [`Notify`]; nothing polls.
//!
//! Sessions that fail to reset on release are destroyed, and a replacement is
//! opened in the background while the idle stack is below its target.

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use utoipa::ToSchema;

use crate::error::RenderError;
use crate::models::{PoolConfig, Viewport};
use crate::rendering::{EngineError, EngineSession, RenderEngine, SubResourceFilter};

pub type SessionId = u64;

/// How freshly opened sessions are configured
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub viewport: Viewport,
    pub filter: SubResourceFilter,
}

/// A pooled engine session together with its current viewport
pub struct Session {
    id: SessionId,
    viewport: Viewport,
    handle: Box<dyn EngineSession>,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Reconfigure the viewport, remembering it for later reuse
    pub async fn set_viewport(&mut self, viewport: Viewport) -> Result<(), EngineError> {
        self.handle.set_viewport(viewport).await?;
        self.viewport = viewport;
        Ok(())
    }

    pub fn engine(&mut self) -> &mut dyn EngineSession {
        self.handle.as_mut()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("viewport", &self.viewport)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct PoolStats {
    /// Sessions waiting in the idle stack
    pub idle: usize,
    /// Sessions handed out (including ones being opened for an acquirer)
    pub busy: usize,
    pub max_busy: usize,
    pub idle_target: usize,
    /// Sessions opened over the pool's lifetime
    pub created: u64,
    /// Sessions closed or discarded over the pool's lifetime
    pub destroyed: u64,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<Session>,
    busy: HashSet<SessionId>,
    pending_replacements: usize,
    created: u64,
    destroyed: u64,
    closed: bool,
}

struct PoolInner {
    engine: Arc<dyn RenderEngine>,
    config: PoolConfig,
    defaults: SessionDefaults,
    state: Mutex<PoolState>,
    /// Signalled whenever a session returns to idle or a busy slot frees up
    released: Notify,
    /// Background close/replacement work
    background: Mutex<JoinSet<()>>,
    next_id: AtomicU64,
}

enum Slot {
    Idle(Session),
    Create(SessionId),
    Full,
}

/// Shared handle to a session pool
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl SessionPool {
    pub fn new(engine: Arc<dyn RenderEngine>, config: PoolConfig, defaults: SessionDefaults) -> Self {
        let max_busy = config.max_busy.max(1);
        if max_busy != config.max_busy {
            tracing::warn!("pool.max_busy must be at least 1, using 1");
        }
        let config = PoolConfig { max_busy, ..config };

        Self {
            inner: Arc::new(PoolInner {
                engine,
                config,
                defaults,
                state: Mutex::new(PoolState::default()),
                released: Notify::new(),
                background: Mutex::new(JoinSet::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Open `count` sessions concurrently and add the ones that succeed to idle.
    ///
    /// Returns how many were opened; failures only shrink the pool.
    pub async fn warm_up(&self, count: usize) -> usize {
        let inner = &self.inner;
        let attempts = (0..count).map(|_| {
            inner
                .engine
                .open_session(inner.defaults.viewport, &inner.defaults.filter)
        });
        let results = futures_util::future::join_all(attempts).await;

        let mut opened = Vec::new();
        for result in results {
            match result {
                Ok(handle) => opened.push(inner.wrap(handle)),
                Err(e) => tracing::warn!(error = %e, "Session creation failed during warm-up"),
            }
        }

        let added = opened.len();
        let rejected = {
            let mut state = inner.lock_state();
            if state.closed {
                Some(opened)
            } else {
                state.created += added as u64;
                state.idle.extend(opened);
                None
            }
        };
        if let Some(sessions) = rejected {
            for mut session in sessions {
                session.handle.close().await;
            }
            return 0;
        }
        inner.released.notify_waiters();

        tracing::info!(requested = count, opened = added, "Session pool warmed up");
        added
    }

    /// Get a session that is open and ready for a render.
    ///
    /// Reuses the most recently released idle session, opens a new one while
    /// under `max_busy`, and otherwise waits until a session is released.
    pub async fn acquire(&self) -> Result<SessionLease, RenderError> {
        match self.inner.config.acquire_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.acquire_inner())
                .await
                .map_err(|_| {
                    tracing::warn!(waited_ms = limit.as_millis() as u64, "No session became available");
                    RenderError::PoolExhausted {
                        waited_ms: limit.as_millis() as u64,
                    }
                })?,
            None => self.acquire_inner().await,
        }
    }

    async fn acquire_inner(&self) -> Result<SessionLease, RenderError> {
        loop {
            // Register interest before inspecting state so a release between
            // the check and the await is not missed.
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.inner.take_slot()? {
                Slot::Idle(session) => {
                    tracing::trace!(session = session.id, "Reusing idle session");
                    return Ok(self.lease(session));
                }
                Slot::Create(id) => {
                    let session = self.inner.open_reserved(id).await?;
                    return Ok(self.lease(session));
                }
                Slot::Full => {
                    tracing::trace!("Pool at capacity, waiting for a release");
                    notified.await;
                }
            }
        }
    }

    fn lease(&self, session: Session) -> SessionLease {
        SessionLease {
            session: Some(session),
            pool: self.inner.clone(),
        }
    }

    /// Return a session after a render.
    ///
    /// The session's content is cleared; on success it goes back to idle and
    /// one waiter is woken. A session that is closed or fails to reset is
    /// destroyed instead.
    pub async fn release(&self, mut lease: SessionLease) {
        if lease.is_closed() {
            let session = lease.take();
            tracing::debug!(session = session.id, "Released session is closed, dropping it");
            self.inner.forget(session);
            return;
        }

        if self.inner.lock_state().closed {
            let mut session = lease.take();
            session.handle.close().await;
            self.inner.forget(session);
            return;
        }

        // The lease still owns the session while resetting, so a cancelled
        // release falls back to the lease's drop handling.
        match lease.engine().clear_content().await {
            Ok(()) => {
                let session = lease.take();
                let id = session.id;
                {
                    let mut state = self.inner.lock_state();
                    state.busy.remove(&id);
                    if state.closed {
                        state.destroyed += 1;
                        drop(state);
                        self.inner.retire_in_background(session, false);
                    } else {
                        state.idle.push(session);
                    }
                }
                self.inner.released.notify_one();
                tracing::trace!(session = id, "Session returned to idle");
            }
            Err(e) => {
                let session = lease.take();
                tracing::warn!(
                    session = session.id,
                    error = %e,
                    "Session corrupted: reset failed, destroying"
                );
                self.inner.retire(session);
            }
        }
    }

    /// Destroy a session without attempting a reset.
    ///
    /// Used when the session can no longer be trusted (deadline expiry, fatal
    /// engine error). A replacement is opened in the background if idle
    /// capacity is below target.
    pub fn destroy(&self, mut lease: SessionLease, reason: &str) {
        let session = lease.take();
        tracing::warn!(session = session.id, reason, "Destroying session");
        self.inner.retire(session);
    }

    /// Wait for outstanding background work (closes and replacements)
    pub async fn settle(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.inner.lock_background());
            if tasks.is_empty() {
                return;
            }
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    if e.is_panic() {
                        tracing::warn!(error = %e, "Background session task panicked");
                    }
                }
            }
        }
    }

    /// Close every session and release the engine.
    ///
    /// New acquisitions fail with `ShuttingDown`; sessions still handed out
    /// are closed when they are released.
    pub async fn shutdown(&self) {
        let idle = {
            let mut state = self.inner.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.idle)
        };
        self.inner.released.notify_waiters();

        let mut tasks = std::mem::take(&mut *self.inner.lock_background());
        tasks.shutdown().await;

        let closed = idle.len();
        for mut session in idle {
            session.handle.close().await;
        }
        self.inner.lock_state().destroyed += closed as u64;

        self.inner.engine.shutdown().await;
        tracing::info!(closed_idle = closed, "Session pool shut down");
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock_state();
        PoolStats {
            idle: state.idle.len(),
            busy: state.busy.len(),
            max_busy: self.inner.config.max_busy,
            idle_target: self.inner.config.idle_target,
            created: state.created,
            destroyed: state.destroyed,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock_state().closed
    }
}

impl PoolInner {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_background(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.background.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wrap(&self, handle: Box<dyn EngineSession>) -> Session {
        Session {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            viewport: self.defaults.viewport,
            handle,
        }
    }

    /// Decide how an acquirer gets its session; bookkeeping only
    fn take_slot(&self) -> Result<Slot, RenderError> {
        let mut state = self.lock_state();
        if state.closed {
            return Err(RenderError::ShuttingDown);
        }

        while let Some(session) = state.idle.pop() {
            if session.is_closed() {
                tracing::debug!(session = session.id, "Discarding dead idle session");
                state.destroyed += 1;
                continue;
            }
            state.busy.insert(session.id);
            return Ok(Slot::Idle(session));
        }

        if state.busy.len() < self.config.max_busy {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            state.busy.insert(id);
            return Ok(Slot::Create(id));
        }

        Ok(Slot::Full)
    }

    /// Open a session for a busy slot reserved by `take_slot`
    async fn open_reserved(&self, id: SessionId) -> Result<Session, RenderError> {
        let reservation = Reservation {
            pool: self,
            id,
            armed: true,
        };

        let result = self
            .engine
            .open_session(self.defaults.viewport, &self.defaults.filter)
            .await;

        match result {
            Ok(mut handle) => {
                let closed = {
                    let mut state = self.lock_state();
                    if !state.closed {
                        state.created += 1;
                    }
                    state.closed
                };
                if closed {
                    handle.close().await;
                    return Err(RenderError::ShuttingDown);
                }
                reservation.disarm();
                tracing::debug!(session = id, "Opened session on demand");
                Ok(Session {
                    id,
                    viewport: self.defaults.viewport,
                    handle,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session creation failed");
                Err(RenderError::SessionCreationFailed(e.to_string()))
            }
        }
    }

    /// Remove a busy session that needs no further action
    fn forget(&self, session: Session) {
        {
            let mut state = self.lock_state();
            state.busy.remove(&session.id);
            state.destroyed += 1;
        }
        self.released.notify_one();
    }

    /// Remove a busy session, close it and top up idle capacity in the background
    fn retire(self: &Arc<Self>, session: Session) {
        let replace = {
            let mut state = self.lock_state();
            state.busy.remove(&session.id);
            state.destroyed += 1;
            let replace = !state.closed
                && state.idle.len() + state.pending_replacements < self.config.idle_target;
            if replace {
                state.pending_replacements += 1;
            }
            replace
        };
        // A busy slot just freed up.
        self.released.notify_one();
        self.retire_in_background(session, replace);
    }

    fn retire_in_background(self: &Arc<Self>, mut session: Session, replace: bool) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(session = session.id, "No runtime available, dropping session");
            if replace {
                self.lock_state().pending_replacements -= 1;
            }
            return;
        };

        let inner = self.clone();
        let mut tasks = self.lock_background();
        while tasks.try_join_next().is_some() {}
        tasks.spawn_on(
            async move {
                session.handle.close().await;
                if replace {
                    inner.open_replacement().await;
                }
            },
            &runtime,
        );
    }

    async fn open_replacement(&self) {
        let result = self
            .engine
            .open_session(self.defaults.viewport, &self.defaults.filter)
            .await;

        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                let mut state = self.lock_state();
                state.pending_replacements = state.pending_replacements.saturating_sub(1);
                drop(state);
                tracing::warn!(error = %e, "Replacement session creation failed");
                return;
            }
        };

        let session = self.wrap(handle);
        let id = session.id;
        let rejected = {
            let mut state = self.lock_state();
            state.pending_replacements = state.pending_replacements.saturating_sub(1);
            if state.closed {
                Some(session)
            } else {
                state.created += 1;
                state.idle.push(session);
                None
            }
        };

        match rejected {
            Some(mut session) => session.handle.close().await,
            None => {
                self.released.notify_one();
                tracing::debug!(session = id, "Replacement session added to idle");
            }
        }
    }
}

/// Busy slot held while a session is being opened; freed if the open fails
/// or the acquirer goes away.
struct Reservation<'a> {
    pool: &'a PoolInner,
    id: SessionId,
    armed: bool,
}

impl Reservation<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.lock_state().busy.remove(&self.id);
            self.pool.released.notify_one();
        }
    }
}

/// Exclusive use of one pooled session.
///
/// Hand it back with [`SessionPool::release`] or [`SessionPool::destroy`].
/// A lease dropped any other way (for example because the render future was
/// cancelled mid-operation) destroys its session, since its state is unknown.
pub struct SessionLease {
    session: Option<Session>,
    pool: Arc<PoolInner>,
}

impl SessionLease {
    fn take(&mut self) -> Session {
        self.session
            .take()
            .expect("lease holds its session until handed back")
    }
}

impl Deref for SessionLease {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
            .as_ref()
            .expect("lease holds its session until handed back")
    }
}

impl DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut Session {
        self.session
            .as_mut()
            .expect("lease holds its session until handed back")
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::warn!(session = session.id, "Session lease dropped without release, destroying");
            self.pool.retire(session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClipRect, ContentBox};
    use crate::rendering::{Bitmap, ContentProbe, ReadinessPolicy};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    async fn acquire_within(pool: &SessionPool, limit: Duration) -> Option<SessionLease> {
        tokio::time::timeout(limit, pool.acquire())
            .await
            .ok()
            .and_then(Result::ok)
    }

    /// Engine whose sessions can be told to fail their reset
    #[derive(Default)]
    struct StubEngine {
        opened: AtomicU64,
        fail_reset: Arc<AtomicBool>,
    }

    struct StubSession {
        closed: bool,
        fail_reset: Arc<AtomicBool>,
    }

    #[async_trait]
    impl RenderEngine for StubEngine {
        async fn open_session(
            &self,
            _viewport: Viewport,
            _filter: &SubResourceFilter,
        ) -> Result<Box<dyn EngineSession>, EngineError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubSession {
                closed: false,
                fail_reset: self.fail_reset.clone(),
            }))
        }

        async fn shutdown(&self) {}
    }

    #[async_trait]
    impl EngineSession for StubSession {
        async fn set_viewport(&mut self, _viewport: Viewport) -> Result<(), EngineError> {
            Ok(())
        }

        async fn load(&mut self, _markup: &str, _readiness: ReadinessPolicy) -> Result<(), EngineError> {
            Ok(())
        }

        async fn wait_until(&mut self, _probe: &ContentProbe, _timeout: Duration) -> Result<bool, EngineError> {
            Ok(true)
        }

        async fn measure_content(&mut self) -> Result<ContentBox, EngineError> {
            Ok(ContentBox { width: 1, height: 1 })
        }

        async fn capture(&mut self, clip: ClipRect, _opaque: bool) -> Result<Bitmap, EngineError> {
            Ok(Bitmap {
                width: clip.width,
                height: clip.height,
                png: Vec::new(),
            })
        }

        async fn clear_content(&mut self) -> Result<(), EngineError> {
            if self.fail_reset.load(Ordering::SeqCst) {
                Err(EngineError::Crashed("reset failed".to_string()))
            } else {
                Ok(())
            }
        }

        fn is_closed(&self) -> bool {
            self.closed
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    fn pool(engine: Arc<StubEngine>, idle_target: usize, max_busy: usize) -> SessionPool {
        SessionPool::new(
            engine,
            PoolConfig {
                idle_target,
                max_busy,
                warm_up: 0,
                acquire_timeout_ms: None,
            },
            SessionDefaults {
                viewport: Viewport::default(),
                filter: SubResourceFilter::allow_all(),
            },
        )
    }

    #[tokio::test]
    async fn test_idle_is_reused_as_stack() {
        let engine = Arc::new(StubEngine::default());
        let pool = pool(engine.clone(), 2, 2);
        assert_eq!(pool.warm_up(2).await, 2);

        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        let second_id = second.id();
        pool.release(first).await;
        pool.release(second).await;

        // Most recently released comes back first.
        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id(), second_id);
        pool.release(again).await;
        assert_eq!(engine.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropped_lease_frees_its_slot() {
        let engine = Arc::new(StubEngine::default());
        let pool = pool(engine, 0, 1);

        let lease = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().busy, 1);
        drop(lease);
        assert_eq!(pool.stats().busy, 0);

        let next = acquire_within(&pool, Duration::from_secs(1)).await;
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn test_failed_reset_destroys_and_replaces() {
        let engine = Arc::new(StubEngine::default());
        let pool = pool(engine.clone(), 1, 1);
        pool.warm_up(1).await;

        let lease = pool.acquire().await.unwrap();
        let bad_id = lease.id();
        engine.fail_reset.store(true, Ordering::SeqCst);
        pool.release(lease).await;
        engine.fail_reset.store(false, Ordering::SeqCst);
        pool.settle().await;

        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.busy, 0);
        assert_eq!(stats.destroyed, 1);

        let lease = pool.acquire().await.unwrap();
        assert_ne!(lease.id(), bad_id);
        pool.release(lease).await;
    }

    #[tokio::test]
    async fn test_shutdown_rejects_acquire() {
        let engine = Arc::new(StubEngine::default());
        let pool = pool(engine, 1, 1);
        pool.warm_up(1).await;
        pool.shutdown().await;

        assert!(matches!(pool.acquire().await, Err(RenderError::ShuttingDown)));
        assert_eq!(pool.stats().idle, 0);
        assert!(pool.is_shut_down());
    }
}

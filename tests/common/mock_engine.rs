//! Scriptable in-memory rendering engine.
//!
//! Sessions keep every document loaded into them until `clear_content`, so a
//! missing reset shows up as leftover content in the next capture. Captures
//! return the concatenated markup instead of real PNG data.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use snapcard::models::{ClipRect, ContentBox, Viewport};
use snapcard::rendering::{
    Bitmap, ContentProbe, EngineError, EngineSession, ReadinessPolicy, RenderEngine,
    SubResourceFilter,
};

/// Something a session did, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Opened(u64),
    Viewport(u64, u32),
    LoadStarted(u64),
    LoadFinished(u64),
    Captured(u64),
    Cleared(u64),
    Closed(u64),
}

#[derive(Default)]
pub struct MockState {
    next_id: AtomicU64,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    fail_opens: AtomicUsize,
    fail_resets: AtomicUsize,
    crash_loads: AtomicUsize,
    reject_loads: AtomicUsize,
    open_delay_ms: AtomicU64,
    load_delay_ms: AtomicU64,
    active_loads: AtomicUsize,
    pub max_active_loads: AtomicUsize,
    killed: Mutex<HashSet<u64>>,
    events: Mutex<Vec<Event>>,
    pub shut_down: AtomicBool,
    last_filter: Mutex<Option<SubResourceFilter>>,
}

impl MockState {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    /// Take one unit from a failure budget
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Engine handle shared between the pool under test and the test itself
#[derive(Clone, Default)]
pub struct MockEngine {
    pub state: Arc<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn max_active_loads(&self) -> usize {
        self.state.max_active_loads.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.shut_down.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.events.lock().unwrap().clone()
    }

    /// The next `n` session opens fail
    pub fn fail_next_opens(&self, n: usize) {
        self.state.fail_opens.store(n, Ordering::SeqCst);
    }

    /// The next `n` content resets fail
    pub fn fail_next_resets(&self, n: usize) {
        self.state.fail_resets.store(n, Ordering::SeqCst);
    }

    /// The next `n` loads crash their session
    pub fn crash_next_loads(&self, n: usize) {
        self.state.crash_loads.store(n, Ordering::SeqCst);
    }

    /// The next `n` loads fail with a markup error
    pub fn reject_next_loads(&self, n: usize) {
        self.state.reject_loads.store(n, Ordering::SeqCst);
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.state
            .open_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_load_delay(&self, delay: Duration) {
        self.state
            .load_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make a session report itself closed from now on
    pub fn kill(&self, session: u64) {
        self.state.killed.lock().unwrap().insert(session);
    }

    pub fn last_filter(&self) -> Option<SubResourceFilter> {
        self.state.last_filter.lock().unwrap().clone()
    }

    /// Engine-side ids of sessions that loaded content, in load order
    pub fn loaded_sessions(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::LoadStarted(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl RenderEngine for MockEngine {
    async fn open_session(
        &self,
        viewport: Viewport,
        filter: &SubResourceFilter,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        let delay = self.state.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.is_shut_down() {
            return Err(EngineError::ShutDown);
        }
        if MockState::take(&self.state.fail_opens) {
            return Err(EngineError::Launch("mock open failure".to_string()));
        }

        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        *self.state.last_filter.lock().unwrap() = Some(filter.clone());
        self.state.record(Event::Opened(id));

        Ok(Box::new(MockSession {
            id,
            state: self.state.clone(),
            viewport,
            content: Vec::new(),
            closed: false,
        }))
    }

    async fn shutdown(&self) {
        self.state.shut_down.store(true, Ordering::SeqCst);
    }
}

pub struct MockSession {
    id: u64,
    state: Arc<MockState>,
    viewport: Viewport,
    content: Vec<String>,
    closed: bool,
}

impl MockSession {
    fn check(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Value of `name="..."` in markup
fn attribute(markup: &str, name: &str) -> Option<u32> {
    let needle = format!("{name}=\"");
    let start = markup.find(&needle)? + needle.len();
    let end = markup[start..].find('"')? + start;
    markup[start..end].trim().parse::<f64>().ok().map(|v| v.ceil() as u32)
}

#[async_trait]
impl EngineSession for MockSession {
    async fn set_viewport(&mut self, viewport: Viewport) -> Result<(), EngineError> {
        self.check()?;
        self.viewport = viewport;
        self.state.record(Event::Viewport(self.id, viewport.width));
        Ok(())
    }

    async fn load(&mut self, markup: &str, _readiness: ReadinessPolicy) -> Result<(), EngineError> {
        self.check()?;
        self.state.record(Event::LoadStarted(self.id));

        let active = self.state.active_loads.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active_loads.fetch_max(active, Ordering::SeqCst);
        let delay = self.state.load_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.state.active_loads.fetch_sub(1, Ordering::SeqCst);

        if MockState::take(&self.state.crash_loads) {
            self.closed = true;
            return Err(EngineError::Crashed("mock crash".to_string()));
        }
        if MockState::take(&self.state.reject_loads) {
            return Err(EngineError::Markup("mock markup error".to_string()));
        }

        self.content.push(markup.to_string());
        self.state.record(Event::LoadFinished(self.id));
        Ok(())
    }

    async fn wait_until(&mut self, probe: &ContentProbe, timeout: Duration) -> Result<bool, EngineError> {
        self.check()?;
        let satisfied = match probe {
            ContentProbe::DocumentLoaded => !self.content.is_empty(),
            ContentProbe::ElementPresent(id) => {
                let needle = format!("id=\"{id}\"");
                self.content.iter().any(|c| c.contains(&needle))
            }
        };
        if !satisfied {
            tokio::time::sleep(timeout).await;
        }
        Ok(satisfied)
    }

    async fn measure_content(&mut self) -> Result<ContentBox, EngineError> {
        self.check()?;
        let latest = self.content.last().ok_or(EngineError::NoContent)?;
        Ok(ContentBox {
            width: attribute(latest, "data-width").unwrap_or(self.viewport.width),
            height: attribute(latest, "data-height").unwrap_or(50),
        })
    }

    async fn capture(&mut self, clip: ClipRect, _opaque: bool) -> Result<Bitmap, EngineError> {
        self.check()?;
        let (width, height) = clip.pixel_size(self.viewport.density);
        self.state.record(Event::Captured(self.id));
        Ok(Bitmap {
            width,
            height,
            png: self.content.join("\n").into_bytes(),
        })
    }

    async fn clear_content(&mut self) -> Result<(), EngineError> {
        self.check()?;
        if MockState::take(&self.state.fail_resets) {
            return Err(EngineError::Crashed("mock reset failure".to_string()));
        }
        self.content.clear();
        self.state.record(Event::Cleared(self.id));
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed || self.state.killed.lock().unwrap().contains(&self.id)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
        }
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        self.state.record(Event::Closed(self.id));
    }
}

//! The render runtime.
//!
//! # Architecture
//!
//! ```text
//!  any thread                      UI thread (owns Runtime)
//!  ──────────                      ────────────────────────
//!  SetState::set ─► trigger ─► FrameSignal::request ─► tick()
//!                                                       │
//!                        ┌──────────────────────────────┘
//!                        ▼
//!   expand ─► resolve styles ─► diff ─► dispose ─► apply ─► effects
//! ```
//!
//! A render is requested by bumping the frame signal. `tick` folds every
//! request seen so far into one pass, and defers when the previous commit
//! was less than one frame interval ago. Requests made while a pass runs
//! (effects, providers) are picked up by the next tick.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, trace, warn};

use super::boundary::{ErrorBoundary, ErrorSource};
use super::expand::expand_root;
use super::frame::{FrameSignal, WaitOutcome};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::hooks::{HookStore, RenderContext, RenderPath};
use crate::renderer::{Patcher, Renderer};
use crate::stream::Subscription;
use crate::style::{StyleResolver, StyleToken, resolve_tree};
use crate::tree::{DiffStats, Differ, Node, Patch, PatchKinds};

/// Passes `flush` runs before giving up on a tree that never settles.
const MAX_FLUSH_PASSES: usize = 100;

/// Summary of one committed pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    /// Last request generation the pass covered.
    pub generation: u64,
    pub patches: usize,
    #[serde(skip)]
    pub kinds: PatchKinds,
    pub contained_errors: usize,
    pub disposed_components: usize,
    pub patch_failures: usize,
    pub effect_errors: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Nothing to render.
    Idle,
    /// A pass ran and committed.
    Rendered(PassReport),
    /// A render is pending but the frame interval has not elapsed.
    Deferred(Duration),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RuntimeStats {
    pub passes: u64,
    pub failed_passes: u64,
    pub deferred_ticks: u64,
    /// Requests folded into a pass started for an earlier request.
    pub coalesced_requests: u64,
    pub patches: u64,
    pub contained_errors: u64,
    pub disposed_components: u64,
    pub diff: DiffStats,
}

// =============================================================================
// RenderHandle
// =============================================================================

/// Cross-thread handle to a [`Runtime`].
#[derive(Clone)]
pub struct RenderHandle {
    signal: Arc<FrameSignal>,
    timeout: Duration,
}

impl RenderHandle {
    /// Ask for a render. Returns the generation to wait for.
    pub fn request_render(&self) -> u64 {
        self.signal.request()
    }

    /// Wait up to the configured marshal timeout for a commit covering
    /// `generation`.
    pub fn wait_for_commit(&self, generation: u64) -> Result<()> {
        self.wait_for_commit_timeout(generation, self.timeout)
    }

    /// Fails with [`Error::PassFailed`] when the pass that picked up
    /// `generation` aborted, and with [`Error::MarshalTimeout`] when none
    /// did in time.
    pub fn wait_for_commit_timeout(&self, generation: u64, timeout: Duration) -> Result<()> {
        match self.signal.wait_for_commit(generation, timeout) {
            WaitOutcome::Committed => Ok(()),
            WaitOutcome::Failed => Err(Error::PassFailed { generation }),
            WaitOutcome::Pending => Err(Error::MarshalTimeout { waited: timeout }),
        }
    }

    /// Request a render and wait for it to commit.
    pub fn render_and_wait(&self) -> Result<()> {
        let generation = self.request_render();
        self.wait_for_commit(generation)
    }

    pub fn committed_generation(&self) -> u64 {
        self.signal.committed()
    }

    /// Make [`Runtime::run`] return after its current pass.
    pub fn stop(&self) {
        self.signal.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.signal.is_stopped()
    }
}

// =============================================================================
// Runtime
// =============================================================================

pub struct Runtime<R: Renderer> {
    config: RuntimeConfig,
    renderer: R,
    patcher: Patcher<R::Widget>,
    store: HookStore,
    differ: Differ,
    resolver: Option<Box<dyn StyleResolver>>,
    token: StyleToken,
    root: Option<Node>,
    committed: Option<Node>,
    boundary: ErrorBoundary,
    signal: Arc<FrameSignal>,
    last_commit: Option<Instant>,
    stats: RuntimeStats,
    _trigger: Subscription,
}

impl<R: Renderer> Runtime<R> {
    pub fn new(renderer: R, config: RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let store = HookStore::new();
        let signal = Arc::new(FrameSignal::new());
        let trigger = {
            let signal = signal.clone();
            store.trigger().subscribe(move |count| {
                trace!(count, "render trigger");
                signal.request();
            })
        };
        let differ = Differ::new(config.diff_cache_capacity, config.diff_cache_max_patches)
            .with_coalesce_moves(config.coalesce_moves);

        Ok(Self {
            boundary: ErrorBoundary::new(config.error_history),
            config,
            renderer,
            patcher: Patcher::new(),
            store,
            differ,
            resolver: None,
            token: StyleToken::default(),
            root: None,
            committed: None,
            signal,
            last_commit: None,
            stats: RuntimeStats::default(),
            _trigger: trigger,
        })
    }

    pub fn with_style_resolver(mut self, resolver: impl StyleResolver + 'static) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    pub fn with_style_token(mut self, token: StyleToken) -> Self {
        self.token = token;
        self
    }

    // -------------------------------------------------------------------------
    // accessors
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    /// The last committed, fully expanded tree.
    pub fn committed(&self) -> Option<&Node> {
        self.committed.as_ref()
    }

    pub fn hooks(&self) -> &HookStore {
        &self.store
    }

    pub fn boundary(&self) -> &ErrorBoundary {
        &self.boundary
    }

    pub fn boundary_mut(&mut self) -> &mut ErrorBoundary {
        &mut self.boundary
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            diff: self.differ.stats().clone(),
            ..self.stats.clone()
        }
    }

    pub fn style_token(&self) -> StyleToken {
        self.token
    }

    pub fn handle(&self) -> RenderHandle {
        RenderHandle {
            signal: self.signal.clone(),
            timeout: self.config.marshal_timeout(),
        }
    }

    /// True when a render was requested and not yet committed.
    pub fn is_dirty(&self) -> bool {
        self.signal.pending() > 0
    }

    // -------------------------------------------------------------------------
    // driving
    // -------------------------------------------------------------------------

    /// Set the declared tree and request a render.
    pub fn mount(&mut self, root: Node) {
        debug!(nodes = root.count(), "mounting tree");
        self.root = Some(root);
        self.signal.request();
    }

    /// Change breakpoint or theme; every class is resolved again.
    pub fn set_style_token(&mut self, token: StyleToken) {
        if token != self.token {
            self.token = token;
            self.signal.request();
        }
    }

    /// Remove the tree: dispose every hook slot, then destroy every widget.
    pub fn unmount(&mut self) -> PassReport {
        let started = Instant::now();
        self.root = None;
        let generation = self.signal.requested();

        let disposed = self.store.clear();
        self.boundary.report_all(ErrorSource::Disposal, disposed.errors);
        let patches = self.differ.diff(self.committed.take().as_ref(), None);
        let applied = self.patcher.apply(&mut self.renderer, &patches);
        let patch_failures = applied.failures.len();
        self.boundary.report_all(ErrorSource::Patch, applied.failures);

        self.signal.commit(generation);
        self.last_commit = Some(Instant::now());
        PassReport {
            generation,
            patches: patches.len(),
            kinds: PatchKinds::of(&patches),
            contained_errors: 0,
            disposed_components: disposed.components,
            patch_failures,
            effect_errors: 0,
            duration: started.elapsed(),
        }
    }

    /// One scheduling step. Fatal expansion errors are returned after being
    /// reported; the committed tree stays as it was.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        let requested = self.signal.requested();
        let consumed = self.signal.consumed();
        if requested <= consumed {
            return Ok(TickOutcome::Idle);
        }

        if let Some(last) = self.last_commit {
            let interval = self.config.frame_interval();
            let elapsed = last.elapsed();
            if elapsed < interval {
                self.stats.deferred_ticks += 1;
                return Ok(TickOutcome::Deferred(interval - elapsed));
            }
        }

        self.stats.coalesced_requests += requested - consumed - 1;
        let result = self.render_pass(requested);
        // A failed pass consumes its requests too; the next state change
        // starts a fresh attempt. Waiters learn it did not commit.
        self.last_commit = Some(Instant::now());
        match &result {
            Ok(_) => self.signal.commit(requested),
            Err(_) => self.signal.fail(requested),
        }
        result.map(TickOutcome::Rendered)
    }

    /// Tick until nothing is pending, sleeping across deferrals. Returns the
    /// number of committed passes.
    pub fn flush(&mut self) -> Result<usize> {
        let mut passes = 0;
        while passes < MAX_FLUSH_PASSES {
            match self.tick()? {
                TickOutcome::Idle => return Ok(passes),
                TickOutcome::Rendered(_) => passes += 1,
                TickOutcome::Deferred(wait) => thread::sleep(wait),
            }
        }
        warn!(passes, "tree did not settle; render requests still pending");
        Ok(passes)
    }

    /// Block and render until [`RenderHandle::stop`] is called. Errors are
    /// reported to the error boundary and do not end the loop.
    pub fn run(&mut self) {
        debug!("render loop started");
        let idle_wait = self.config.marshal_timeout();
        while !self.signal.is_stopped() {
            match self.tick() {
                Ok(TickOutcome::Idle) => self.signal.wait_for_request(idle_wait),
                Ok(TickOutcome::Deferred(wait)) => thread::sleep(wait),
                Ok(TickOutcome::Rendered(report)) => {
                    trace!(patches = report.patches, "frame committed")
                }
                Err(err) => debug!(error = %err, "pass failed"),
            }
        }
        self.signal.resume();
        debug!("render loop stopped");
    }

    // -------------------------------------------------------------------------
    // pass
    // -------------------------------------------------------------------------

    fn render_pass(&mut self, generation: u64) -> Result<PassReport> {
        let started = Instant::now();
        let Some(root) = self.root.clone() else {
            return Ok(self.empty_report(generation, started));
        };

        let mut ctx = RenderContext::new(&mut self.store, self.config.max_expansion_depth);
        let expanded = expand_root(&mut ctx, &root);
        let (live, contained) = ctx.finish();
        let contained_errors = contained.len();
        self.stats.contained_errors += contained_errors as u64;
        self.boundary.report_all(ErrorSource::Expansion, contained);

        let mut tree = match expanded {
            Ok(tree) => tree,
            Err(err) => {
                self.store.discard_pending();
                self.stats.failed_passes += 1;
                self.boundary.report(ErrorSource::Expansion, err.clone());
                return Err(err);
            }
        };

        if let Some(resolver) = &self.resolver {
            let styled = resolve_tree(&mut tree, resolver.as_ref(), &self.token);
            trace!(styled, "styles resolved");
        }

        self.differ
            .set_caching(self.config.diff_cache_capacity > 0 && self.store.is_empty());
        let patches = self.differ.diff(self.committed.as_ref(), Some(&tree));

        let disposed = self.dispose_removed(&patches, &live);

        let applied = self.patcher.apply(&mut self.renderer, &patches);
        let patch_failures = applied.failures.len();
        self.committed = if applied.is_clean() {
            Some(tree)
        } else {
            self.patcher.snapshot()
        };
        self.boundary.report_all(ErrorSource::Patch, applied.failures);

        let effect_errors = self.store.flush_effects();
        let effect_count = effect_errors.len();
        self.boundary.report_all(ErrorSource::Effect, effect_errors);

        self.stats.passes += 1;
        self.stats.patches += patches.len() as u64;
        self.stats.disposed_components += disposed as u64;

        let report = PassReport {
            generation,
            patches: patches.len(),
            kinds: PatchKinds::of(&patches),
            contained_errors,
            disposed_components: disposed,
            patch_failures,
            effect_errors: effect_count,
            duration: started.elapsed(),
        };
        debug!(
            generation,
            patches = report.patches,
            disposed,
            elapsed_us = report.duration.as_micros() as u64,
            "render pass committed"
        );
        Ok(report)
    }

    /// Dispose hook slots of removed and replaced subtrees, then of every
    /// component this pass did not render.
    fn dispose_removed(&mut self, patches: &[Patch], live: &HashSet<RenderPath>) -> usize {
        let mut components = 0;
        for patch in patches.iter().filter(|p| p.removes_subtree()) {
            let report = self.store.dispose_subtree(&patch.path, live);
            components += report.components;
            self.boundary.report_all(ErrorSource::Disposal, report.errors);
        }
        let swept = self.store.sweep(live);
        components += swept.components;
        self.boundary.report_all(ErrorSource::Disposal, swept.errors);
        components
    }

    fn empty_report(&self, generation: u64, started: Instant) -> PassReport {
        PassReport {
            generation,
            patches: 0,
            kinds: PatchKinds::empty(),
            contained_errors: 0,
            disposed_components: 0,
            patch_failures: 0,
            effect_errors: 0,
            duration: started.elapsed(),
        }
    }
}

//! Texture resource and memory manager.
//!
//! Resources are shared by cache key and reference counted by the nodes that
//! display them. Every byte uploaded to the GPU is tracked against two
//! thresholds: crossing `critical_threshold` triggers an aggressive LRU
//! eviction down to the target level, and idle frames free everything that
//! is no longer referenced.

mod loader;
mod resource;

pub use loader::{
    ImageLoader, LoadCompleter, LoadedTexture, TextureLoader, UploadReporter,
    SVG_QUALITY_MULTIPLIER,
};
pub use resource::{
    CacheKey, PixelData, PixelFormat, Procedural, TextureId, TextureResource, TextureSource,
    TextureState,
};

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use loader::Completion;

use crate::error::TextureError;
use crate::events::Diagnostic;

/// Memory budget of the texture manager.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureMemoryConfig {
    /// Usage above which an aggressive cleanup runs
    pub critical_threshold: u64,
    /// Fraction of the critical threshold cleanup aims for
    pub target_threshold_level: f32,
    /// Minimum time between periodic cleanups while above target
    pub cleanup_interval: Duration,
    /// How long the stage must stay idle before idle cleanup runs
    pub idle_cleanup_delay: Duration,
    /// Refuse loads that cannot fit under the critical threshold
    pub do_not_exceed_critical_threshold: bool,
}

impl Default for TextureMemoryConfig {
    fn default() -> Self {
        Self {
            critical_threshold: 124 * 1024 * 1024,
            target_threshold_level: 0.5,
            cleanup_interval: Duration::from_secs(5),
            idle_cleanup_delay: Duration::ZERO,
            do_not_exceed_critical_threshold: false,
        }
    }
}

impl TextureMemoryConfig {
    pub fn target_threshold(&self) -> u64 {
        let level = self.target_threshold_level.clamp(0.0, 1.0) as f64;
        (self.critical_threshold as f64 * level).round() as u64
    }
}

/// How aggressively a cleanup pass selects resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupMode {
    /// Free every unreferenced resource
    Idle,
    /// Free unreferenced resources in LRU order until usage is at target
    Critical,
    /// Like `Critical`, but rate limited by `cleanup_interval`
    Periodic,
}

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanupReport {
    pub evicted: usize,
    pub bytes_freed: u64,
}

/// Snapshot of texture memory usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryInfo {
    pub critical_threshold: u64,
    pub target_threshold: u64,
    pub used: u64,
    /// Bytes held by resources with references or a renderable owner
    pub renderable_used: u64,
    pub resident: usize,
    pub loading: usize,
    pub failed: usize,
}

/// GPU work produced by the manager, handed to the renderer at submit time.
#[derive(Debug, Clone, PartialEq)]
pub enum TextureCommand {
    Upload {
        texture: TextureId,
        data: LoadedTexture,
    },
    AllocateTarget {
        texture: TextureId,
        width: u32,
        height: u32,
    },
    Free {
        texture: TextureId,
    },
}

/// What the batcher can do with a texture this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renderable {
    Ready,
    /// Failed permanently; draw the quad untextured
    Failed,
    /// Not drawable yet (loading or evicted)
    Pending,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    resource: Option<TextureResource>,
}

pub struct TextureManager {
    config: TextureMemoryConfig,
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    cache: HashMap<u64, TextureId>,
    used: u64,
    loader: Box<dyn TextureLoader>,
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
    commands: Vec<TextureCommand>,
    diagnostics: Vec<Diagnostic>,
    frame: u64,
    load_seq: u64,
    critical_requested: bool,
    last_cleanup: Option<Instant>,
    /// A drawable texture changed state since the last frame
    changed: bool,
    totals: CleanupReport,
}

impl TextureManager {
    pub fn new(config: TextureMemoryConfig, loader: impl TextureLoader + 'static) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            config,
            slots: Vec::new(),
            free_slots: Vec::new(),
            cache: HashMap::new(),
            used: 0,
            loader: Box::new(loader),
            sender,
            receiver,
            commands: Vec::new(),
            diagnostics: Vec::new(),
            frame: 0,
            load_seq: 0,
            critical_requested: false,
            last_cleanup: None,
            changed: false,
            totals: CleanupReport::default(),
        }
    }

    pub fn config(&self) -> &TextureMemoryConfig {
        &self.config
    }

    /// Bytes currently counted against the budget.
    pub fn used_bytes(&self) -> u64 {
        self.used
    }

    /// Number of resources still held by the cache.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.resource.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resource(&self, id: TextureId) -> Option<&TextureResource> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.resource.as_ref()
    }

    fn resource_mut(&mut self, id: TextureId) -> Option<&mut TextureResource> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.resource.as_mut()
    }

    pub fn state(&self, id: TextureId) -> Option<&TextureState> {
        self.resource(id).map(|r| r.state())
    }

    pub fn ref_count(&self, id: TextureId) -> u32 {
        self.resource(id).map(|r| r.ref_count).unwrap_or(0)
    }

    /// Look up the cached resource for a key without acquiring it.
    pub fn lookup(&self, key: CacheKey) -> Option<TextureId> {
        match key {
            CacheKey::Keyed(hash) => self.cache.get(&hash).copied(),
            CacheKey::NoCache => None,
        }
    }

    /// Acquire a texture for `source`, sharing any cached instance with the
    /// same key. Starts a load when the resource is not resident.
    pub fn acquire(&mut self, source: TextureSource) -> TextureId {
        let key = source.cache_key();
        self.acquire_with_key(key, source)
    }

    /// Acquire with an explicit cache key.
    pub fn acquire_with_key(&mut self, key: CacheKey, source: TextureSource) -> TextureId {
        let existing = self.lookup(key).filter(|id| self.resource(*id).is_some());
        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.insert(key, source);
                if let CacheKey::Keyed(hash) = key {
                    self.cache.insert(hash, id);
                }
                id
            }
        };

        let needs_load = match self.resource_mut(id) {
            Some(res) => {
                res.ref_count += 1;
                res.needs_load()
            }
            None => false,
        };
        if needs_load {
            self.start_load(id);
        }
        id
    }

    /// Drop one reference. Non-cached resources are freed and removed as
    /// soon as their count reaches zero.
    pub fn release(&mut self, id: TextureId) {
        let Some(res) = self.resource_mut(id) else {
            log::warn!("Release of unknown texture {id:?}");
            return;
        };
        if res.ref_count == 0 {
            log::warn!("Release of unreferenced texture {id:?}");
            return;
        }
        res.ref_count -= 1;
        if res.ref_count == 0 && res.key == CacheKey::NoCache && !res.renderable_owner {
            self.free(id);
            self.remove(id);
        }
    }

    /// Mark a resource as owned by something renderable outside the tree,
    /// protecting it from every cleanup mode.
    pub fn set_renderable_owner(&mut self, id: TextureId, owner: bool) {
        if let Some(res) = self.resource_mut(id) {
            res.renderable_owner = owner;
        }
    }

    /// Record a render use in the current frame for LRU ordering.
    pub fn touch(&mut self, id: TextureId) {
        let frame = self.frame;
        if let Some(res) = self.resource_mut(id) {
            res.last_used_frame = frame;
        }
    }

    pub(crate) fn begin_frame(&mut self, frame: u64) {
        self.frame = frame;
    }

    /// Classify a texture for drawing; a freed texture is queued for reload.
    pub(crate) fn renderable(&mut self, id: TextureId) -> Renderable {
        let state = match self.resource(id) {
            Some(res) => res.state.clone(),
            None => return Renderable::Failed,
        };
        match state {
            TextureState::Loaded => Renderable::Ready,
            TextureState::Failed(err) if !err.is_retryable() => Renderable::Failed,
            TextureState::Failed(_) | TextureState::Freed | TextureState::Initial => {
                if self.ref_count(id) > 0 {
                    self.start_load(id);
                }
                Renderable::Pending
            }
            TextureState::Loading => Renderable::Pending,
        }
    }

    /// Allocate an offscreen render target of the given size.
    pub fn allocate_render_target(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<TextureId, TextureError> {
        let bytes = PixelFormat::Rgba8.byte_size(width, height);
        if width == 0 || height == 0 {
            return Err(TextureError::RenderTargetAllocation {
                width,
                height,
                reason: "zero size".to_string(),
            });
        }
        if let Err(err) = self.make_room(bytes) {
            return Err(TextureError::RenderTargetAllocation {
                width,
                height,
                reason: err.to_string(),
            });
        }

        let id = self.insert(
            CacheKey::NoCache,
            TextureSource::RenderTarget { width, height },
        );
        self.load_seq += 1;
        let (frame, seq) = (self.frame, self.load_seq);
        if let Some(res) = self.resource_mut(id) {
            res.ref_count = 1;
            res.state = TextureState::Loaded;
            res.width = width;
            res.height = height;
            res.format = PixelFormat::Rgba8;
            res.byte_size = bytes;
            res.last_used_frame = frame;
            res.load_seq = seq;
        }
        self.used += bytes;
        if self.used > self.config.critical_threshold {
            self.critical_requested = true;
        }
        self.commands.push(TextureCommand::AllocateTarget {
            texture: id,
            width,
            height,
        });
        log::debug!("Allocated {width}x{height} render target {id:?}");
        Ok(id)
    }

    /// Apply every queued load and upload completion.
    ///
    /// Returns the number of completions that changed a resource.
    pub fn process_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.receiver.try_recv() {
            let changed = match completion {
                Completion::Load {
                    texture,
                    generation,
                    result,
                } => self.complete_load(texture, generation, result),
                Completion::UploadFailed { texture, reason } => {
                    self.fail_upload(texture, reason)
                }
            };
            if changed {
                applied += 1;
            }
        }
        applied
    }

    /// Handle for renderers to report failed uploads.
    pub fn upload_reporter(&self) -> UploadReporter {
        UploadReporter::new(self.sender.clone())
    }

    /// Run a cleanup pass in the given mode.
    pub fn cleanup(&mut self, mode: CleanupMode) -> CleanupReport {
        self.cleanup_to(mode, self.config.target_threshold())
    }

    fn cleanup_to(&mut self, mode: CleanupMode, goal: u64) -> CleanupReport {
        let report = match mode {
            CleanupMode::Idle => self.idle_cleanup(),
            CleanupMode::Critical | CleanupMode::Periodic => {
                self.critical_requested = false;
                self.evict_until(goal)
            }
        };
        self.totals.evicted += report.evicted;
        self.totals.bytes_freed += report.bytes_freed;
        if report.evicted > 0 {
            log::debug!(
                "{mode:?} texture cleanup evicted {} resources, {} bytes, {} bytes in use",
                report.evicted,
                report.bytes_freed,
                self.used
            );
        }
        report
    }

    /// Per-tick budget check: critical cleanup when over the critical
    /// threshold (or requested by a completion), periodic cleanup when over
    /// target and the interval has elapsed.
    pub fn maybe_cleanup(&mut self, now: Instant) -> Option<(CleanupMode, CleanupReport)> {
        if self.critical_requested || self.used > self.config.critical_threshold {
            let report = self.cleanup(CleanupMode::Critical);
            self.last_cleanup = Some(now);
            return Some((CleanupMode::Critical, report));
        }
        if self.used > self.config.target_threshold() {
            let due = self
                .last_cleanup
                .map(|last| now.saturating_duration_since(last) >= self.config.cleanup_interval)
                .unwrap_or(true);
            if due {
                let report = self.cleanup(CleanupMode::Periodic);
                self.last_cleanup = Some(now);
                return Some((CleanupMode::Periodic, report));
            }
        }
        None
    }

    pub fn memory_info(&self) -> MemoryInfo {
        let mut info = MemoryInfo {
            critical_threshold: self.config.critical_threshold,
            target_threshold: self.config.target_threshold(),
            used: self.used,
            ..MemoryInfo::default()
        };
        for res in self.slots.iter().filter_map(|s| s.resource.as_ref()) {
            match res.state {
                TextureState::Loaded => info.resident += 1,
                TextureState::Loading => info.loading += 1,
                TextureState::Failed(_) => info.failed += 1,
                _ => {}
            }
            if res.ref_count > 0 || res.renderable_owner {
                info.renderable_used += res.byte_size;
            }
        }
        info
    }

    /// Totals over every cleanup pass so far.
    pub fn eviction_totals(&self) -> CleanupReport {
        self.totals
    }

    pub fn take_commands(&mut self) -> Vec<TextureCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Whether a texture became drawable (or failed) since the last call.
    pub(crate) fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    fn insert(&mut self, key: CacheKey, source: TextureSource) -> TextureId {
        let index = match self.free_slots.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = TextureId {
            index,
            generation: slot.generation,
        };
        slot.resource = Some(TextureResource::new(id, key, source));
        id
    }

    fn remove(&mut self, id: TextureId) {
        let Some(slot) = self.slots.get_mut(id.index as usize) else {
            return;
        };
        if slot.generation != id.generation {
            return;
        }
        if let Some(res) = slot.resource.take() {
            if let CacheKey::Keyed(hash) = res.key {
                if self.cache.get(&hash) == Some(&id) {
                    self.cache.remove(&hash);
                }
            }
            slot.generation = slot.generation.wrapping_add(1);
            self.free_slots.push(id.index);
        }
    }

    /// Release GPU memory of a resource and move it to `Freed`.
    fn free(&mut self, id: TextureId) -> u64 {
        let Some(res) = self.resource_mut(id) else {
            return 0;
        };
        let bytes = res.byte_size;
        let was_resident = res.state.is_loaded();
        res.byte_size = 0;
        res.state = TextureState::Freed;
        self.used = self.used.saturating_sub(bytes);
        if was_resident {
            self.commands.push(TextureCommand::Free { texture: id });
        }
        bytes
    }

    /// Evict and make sure `incoming` more bytes fit under the budget.
    fn make_room(&mut self, incoming: u64) -> Result<(), TextureError> {
        let critical = self.config.critical_threshold;
        if self.critical_requested || self.used + incoming > critical {
            // Leave room for the incoming bytes, not just the target level.
            let goal = self
                .config
                .target_threshold()
                .min(critical.saturating_sub(incoming));
            let report = self.cleanup_to(CleanupMode::Critical, goal);
            log::debug!("Pre-load cleanup freed {} bytes", report.bytes_freed);
        }
        if self.config.do_not_exceed_critical_threshold && self.used + incoming > critical {
            return Err(TextureError::MemoryPressure {
                requested: incoming,
                used: self.used,
                critical,
            });
        }
        Ok(())
    }

    fn start_load(&mut self, id: TextureId) {
        let Some(source) = self.resource(id).map(|r| r.source.clone()) else {
            return;
        };
        let incoming = source.expected_bytes().unwrap_or(0);
        if let Err(err) = self.make_room(incoming) {
            log::warn!("Refusing to load texture {id:?}: {err}");
            self.fail(id, err);
            return;
        }

        let Some(res) = self.resource_mut(id) else {
            return;
        };
        res.state = TextureState::Loading;
        res.load_generation = res.load_generation.wrapping_add(1);
        let completer = LoadCompleter::new(id, res.load_generation, self.sender.clone());
        log::trace!("Loading texture {id:?}");
        self.loader.load(&source, completer);
    }

    fn fail(&mut self, id: TextureId, error: TextureError) {
        if let Some(res) = self.resource_mut(id) {
            res.state = TextureState::Failed(error.clone());
        }
        self.changed = true;
        self.diagnostics.push(Diagnostic::Texture { texture: id, error });
    }

    fn complete_load(
        &mut self,
        id: TextureId,
        generation: u32,
        result: Result<LoadedTexture, String>,
    ) -> bool {
        let Some(res) = self.resource_mut(id) else {
            log::debug!("Discarding completion for removed texture {id:?}");
            return false;
        };
        if res.load_generation != generation || res.state != TextureState::Loading {
            log::debug!("Discarding stale completion for texture {id:?}");
            return false;
        }
        if res.ref_count == 0 && !res.renderable_owner {
            log::debug!("Discarding completion for unreferenced texture {id:?}");
            res.state = TextureState::Freed;
            return false;
        }

        let data = match result {
            Ok(data) => data,
            Err(reason) => {
                log::warn!("Texture {id:?} failed to load: {reason}");
                self.fail(id, TextureError::LoadFailed(reason));
                return true;
            }
        };

        let bytes = data.byte_size();
        if let Err(err) = self.make_room(bytes) {
            log::warn!("Dropping loaded texture {id:?}: {err}");
            self.fail(id, err);
            return true;
        }

        self.load_seq += 1;
        let (frame, seq) = (self.frame, self.load_seq);
        let Some(res) = self.resource_mut(id) else {
            return false;
        };
        res.state = TextureState::Loaded;
        res.width = data.width;
        res.height = data.height;
        res.format = data.format;
        res.byte_size = bytes;
        res.last_used_frame = frame;
        res.load_seq = seq;

        self.used += bytes;
        if self.used > self.config.critical_threshold {
            self.critical_requested = true;
        }
        self.commands.push(TextureCommand::Upload { texture: id, data });
        self.changed = true;
        true
    }

    fn fail_upload(&mut self, id: TextureId, reason: String) -> bool {
        let Some(res) = self.resource_mut(id) else {
            return false;
        };
        if !res.state.is_loaded() {
            return false;
        }
        let bytes = res.byte_size;
        res.byte_size = 0;
        self.used = self.used.saturating_sub(bytes);
        log::warn!("Texture {id:?} upload failed: {reason}");
        self.fail(id, TextureError::UploadFailed(reason));
        true
    }

    fn evict_until(&mut self, goal: u64) -> CleanupReport {
        let mut candidates: Vec<(u64, u64, TextureId)> = self
            .slots
            .iter()
            .filter_map(|s| s.resource.as_ref())
            .filter(|r| r.is_evictable())
            .map(|r| (r.last_used_frame, r.load_seq, r.id))
            .collect();
        candidates.sort_unstable();

        let mut report = CleanupReport::default();
        for (_, _, id) in candidates {
            if self.used <= goal {
                break;
            }
            report.bytes_freed += self.free(id);
            report.evicted += 1;
        }
        report
    }

    fn idle_cleanup(&mut self) -> CleanupReport {
        // Entries already freed by an earlier pass are dropped from the cache.
        let stale: Vec<TextureId> = self
            .slots
            .iter()
            .filter_map(|s| s.resource.as_ref())
            .filter(|r| r.ref_count == 0 && !r.renderable_owner && r.state == TextureState::Freed)
            .map(|r| r.id)
            .collect();

        let evictable: Vec<TextureId> = self
            .slots
            .iter()
            .filter_map(|s| s.resource.as_ref())
            .filter(|r| r.is_evictable())
            .map(|r| r.id)
            .collect();

        let mut report = CleanupReport::default();
        for id in evictable {
            report.bytes_freed += self.free(id);
            report.evicted += 1;
        }
        for id in stale {
            self.remove(id);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Holds completers so tests decide when and how loads finish.
    #[derive(Default, Clone)]
    struct HeldLoader {
        pending: std::rc::Rc<std::cell::RefCell<Vec<LoadCompleter>>>,
    }

    impl TextureLoader for HeldLoader {
        fn load(&mut self, _source: &TextureSource, completer: LoadCompleter) {
            self.pending.borrow_mut().push(completer);
        }
    }

    impl HeldLoader {
        fn finish_all(&self, bytes_per_side: u32) {
            for completer in self.pending.borrow_mut().drain(..) {
                completer.complete(Ok(rgba(bytes_per_side, bytes_per_side)));
            }
        }
    }

    const MB: u64 = 1024 * 1024;

    fn rgba(width: u32, height: u32) -> LoadedTexture {
        LoadedTexture {
            width,
            height,
            format: PixelFormat::Rgba8,
            pixels: Arc::from(vec![0u8; (width * height * 4) as usize]),
        }
    }

    /// Raw pixels of exactly `mb` megabytes.
    fn pixels(tag: u8, mb: u32) -> TextureSource {
        let width = 512;
        let height = 512 * mb;
        TextureSource::Pixels(PixelData {
            width,
            height,
            format: PixelFormat::Rgba8,
            data: Arc::from(vec![tag; (width * height * 4) as usize]),
        })
    }

    fn manager(critical_mb: u64, strict: bool) -> TextureManager {
        TextureManager::new(
            TextureMemoryConfig {
                critical_threshold: critical_mb * MB,
                target_threshold_level: 0.7,
                cleanup_interval: Duration::from_secs(5),
                idle_cleanup_delay: Duration::ZERO,
                do_not_exceed_critical_threshold: strict,
            },
            ImageLoader::new(),
        )
    }

    #[test]
    fn test_same_key_shares_instance() {
        let mut mgr = manager(100, false);
        let a = mgr.acquire(TextureSource::Url("a.png".into()));
        let b = mgr.acquire(TextureSource::Url("a.png".into()));
        assert_eq!(a, b);
        assert_eq!(mgr.ref_count(a), 2);
        mgr.release(a);
        assert_eq!(mgr.ref_count(a), 1);
    }

    #[test]
    fn test_completion_applies_on_drain() {
        let mut mgr = manager(100, false);
        let id = mgr.acquire(pixels(1, 1));
        // Loaded synchronously, but not applied until the queue is drained.
        assert_eq!(mgr.state(id), Some(&TextureState::Loading));
        assert_eq!(mgr.used_bytes(), 0);

        assert_eq!(mgr.process_completions(), 1);
        assert_eq!(mgr.state(id), Some(&TextureState::Loaded));
        assert_eq!(mgr.used_bytes(), MB);
        let commands = mgr.take_commands();
        assert!(matches!(commands[0], TextureCommand::Upload { texture, .. } if texture == id));
    }

    #[test]
    fn test_load_failure_is_recorded() {
        let mut mgr = manager(100, false);
        let id = mgr.acquire(TextureSource::Encoded(Arc::from(&b"garbage"[..])));
        mgr.process_completions();
        assert!(matches!(
            mgr.state(id),
            Some(TextureState::Failed(TextureError::LoadFailed(_)))
        ));
        assert_eq!(mgr.used_bytes(), 0);
        assert_eq!(mgr.take_diagnostics().len(), 1);
    }

    #[test]
    fn test_idle_cleanup_frees_unreferenced() {
        let mut mgr = manager(100, false);
        let a = mgr.acquire(pixels(1, 1));
        let b = mgr.acquire(pixels(2, 1));
        mgr.process_completions();
        mgr.release(a);

        let report = mgr.cleanup(CleanupMode::Idle);
        assert_eq!(report.evicted, 1);
        assert_eq!(mgr.state(a), Some(&TextureState::Freed));
        assert_eq!(mgr.state(b), Some(&TextureState::Loaded));
        assert_eq!(mgr.used_bytes(), MB);

        // A second idle pass prunes the freed entry from the cache.
        mgr.cleanup(CleanupMode::Idle);
        assert!(mgr.resource(a).is_none());
        assert!(mgr.lookup(pixels(1, 1).cache_key()).is_none());
    }

    #[test]
    fn test_critical_cleanup_follows_lru() {
        let mut mgr = manager(10, false);
        let ids: Vec<_> = (0..3u8)
            .map(|i| {
                mgr.begin_frame(i as u64);
                let id = mgr.acquire(pixels(i, 3));
                mgr.process_completions();
                id
            })
            .collect();
        for &id in &ids {
            mgr.release(id);
        }
        // Oldest texture was used most recently.
        mgr.begin_frame(10);
        mgr.touch(ids[0]);

        let report = mgr.cleanup(CleanupMode::Critical);
        // 9MB down to the 7MB target: one eviction.
        assert_eq!(report.evicted, 1);
        assert_eq!(mgr.state(ids[1]), Some(&TextureState::Freed));
        assert_eq!(mgr.state(ids[0]), Some(&TextureState::Loaded));
    }

    #[test]
    fn test_referenced_textures_survive_every_cleanup() {
        let mut mgr = manager(1, false);
        let id = mgr.acquire(pixels(1, 2));
        mgr.process_completions();
        for mode in [CleanupMode::Idle, CleanupMode::Critical, CleanupMode::Periodic] {
            mgr.cleanup(mode);
            assert_eq!(mgr.state(id), Some(&TextureState::Loaded));
        }
    }

    #[test]
    fn test_renderable_owner_protects() {
        let mut mgr = manager(100, false);
        let id = mgr.acquire(pixels(1, 1));
        mgr.process_completions();
        mgr.set_renderable_owner(id, true);
        mgr.release(id);
        mgr.cleanup(CleanupMode::Idle);
        assert_eq!(mgr.state(id), Some(&TextureState::Loaded));
    }

    #[test]
    fn test_strict_mode_refuses_loads() {
        let mut mgr = manager(2, true);
        let a = mgr.acquire(pixels(1, 2));
        mgr.process_completions();
        let b = mgr.acquire(pixels(2, 1));
        assert!(matches!(
            mgr.state(b),
            Some(TextureState::Failed(TextureError::MemoryPressure { .. }))
        ));
        assert_eq!(mgr.used_bytes(), 2 * MB);

        // Freeing the first makes room on the next attempt.
        mgr.release(a);
        assert_eq!(mgr.renderable(b), Renderable::Pending);
        mgr.process_completions();
        assert_eq!(mgr.state(b), Some(&TextureState::Loaded));
        assert_eq!(mgr.used_bytes(), MB);
    }

    #[test]
    fn test_stale_completion_is_discarded() {
        let loader = HeldLoader::default();
        let mut mgr = TextureManager::new(TextureMemoryConfig::default(), loader.clone());
        let id = mgr.acquire(TextureSource::Url("a.png".into()));
        mgr.release(id);
        loader.finish_all(4);
        assert_eq!(mgr.process_completions(), 0);
        assert_eq!(mgr.state(id), Some(&TextureState::Freed));
        assert_eq!(mgr.used_bytes(), 0);
        assert!(mgr.take_commands().is_empty());
    }

    #[test]
    fn test_reload_after_eviction() {
        let loader = HeldLoader::default();
        let mut mgr = TextureManager::new(TextureMemoryConfig::default(), loader.clone());
        let id = mgr.acquire(TextureSource::Url("a.png".into()));
        loader.finish_all(4);
        mgr.process_completions();
        mgr.release(id);
        mgr.cleanup(CleanupMode::Idle);
        assert_eq!(mgr.state(id), Some(&TextureState::Freed));

        let again = mgr.acquire(TextureSource::Url("a.png".into()));
        assert_eq!(again, id);
        assert_eq!(mgr.state(id), Some(&TextureState::Loading));
        loader.finish_all(4);
        mgr.process_completions();
        assert_eq!(mgr.state(id), Some(&TextureState::Loaded));
    }

    #[test]
    fn test_no_cache_resources_are_removed_on_release() {
        let mut mgr = manager(100, false);
        let a = mgr.acquire_with_key(CacheKey::NoCache, pixels(1, 1));
        let b = mgr.acquire_with_key(CacheKey::NoCache, pixels(1, 1));
        assert_ne!(a, b);
        mgr.process_completions();
        mgr.release(a);
        assert!(mgr.resource(a).is_none());
        assert_eq!(mgr.used_bytes(), MB);
        assert!(mgr
            .take_commands()
            .contains(&TextureCommand::Free { texture: a }));
    }

    #[test]
    fn test_upload_failure_returns_bytes() {
        let mut mgr = manager(100, false);
        let id = mgr.acquire(pixels(1, 1));
        mgr.process_completions();
        mgr.upload_reporter().upload_failed(id, "device lost");
        mgr.process_completions();
        assert!(matches!(
            mgr.state(id),
            Some(TextureState::Failed(TextureError::UploadFailed(_)))
        ));
        assert_eq!(mgr.used_bytes(), 0);
        assert_eq!(mgr.renderable(id), Renderable::Failed);
    }

    #[test]
    fn test_render_target_allocation() {
        let mut mgr = manager(1, true);
        let target = mgr.allocate_render_target(256, 256).unwrap();
        assert_eq!(mgr.used_bytes(), 256 * 256 * 4);
        assert_eq!(mgr.renderable(target), Renderable::Ready);

        let err = mgr.allocate_render_target(1024, 1024).unwrap_err();
        assert!(matches!(err, TextureError::RenderTargetAllocation { .. }));

        mgr.release(target);
        assert_eq!(mgr.used_bytes(), 0);
        assert!(mgr.resource(target).is_none());
    }

    #[test]
    fn test_periodic_cleanup_is_rate_limited() {
        let mut mgr = manager(10, false);
        let a = mgr.acquire(pixels(1, 4));
        let b = mgr.acquire(pixels(2, 4));
        mgr.process_completions();
        mgr.release(a);
        mgr.release(b);

        let start = Instant::now();
        let first = mgr.maybe_cleanup(start);
        assert!(matches!(first, Some((CleanupMode::Periodic, r)) if r.evicted == 1));

        // Refill above target; the interval has not elapsed yet.
        let c = mgr.acquire(pixels(3, 4));
        mgr.process_completions();
        mgr.release(c);
        assert!(mgr.maybe_cleanup(start + Duration::from_secs(1)).is_none());
        assert!(mgr.maybe_cleanup(start + Duration::from_secs(6)).is_some());
    }

    #[test]
    fn test_memory_info() {
        let mut mgr = manager(10, false);
        let a = mgr.acquire(pixels(1, 1));
        let _b = mgr.acquire(pixels(2, 2));
        mgr.process_completions();
        mgr.release(a);
        let info = mgr.memory_info();
        assert_eq!(info.used, 3 * MB);
        assert_eq!(info.renderable_used, 2 * MB);
        assert_eq!(info.resident, 2);
        assert_eq!(info.critical_threshold, 10 * MB);
        assert_eq!(info.target_threshold, 7 * MB);
    }
}

//! Frame scheduling: idle/active state, frame throttling and animation timing.
//!
//! The scheduler decides *whether* a tick does anything. It does not own a
//! clock; every call takes the current [`Instant`] so hosts and tests can
//! drive it from their own time source.

use std::time::{Duration, Instant};

use crate::events::StageEvent;
use crate::tree::SceneTree;

/// Result of advancing an animation by one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationStatus {
    Running,
    Finished,
}

/// Something that mutates the scene over time.
///
/// Interpolation is up to the implementor; the scheduler only provides the
/// time that passed since the animation last ran.
pub trait Animation {
    fn advance(&mut self, tree: &mut SceneTree, delta: Duration) -> AnimationStatus;

    /// Maximum rate at which this animation wants to be stepped. Ticks in
    /// between accumulate time so the next step sees the full delta.
    fn fps_cap(&self) -> Option<f32> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnimationId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// The last tick found nothing to draw
    Idle,
    Active,
}

struct AnimationSlot {
    id: AnimationId,
    animation: Box<dyn Animation>,
    /// Time not yet delivered to the animation
    pending: Duration,
}

/// `None` means uncapped, including caps too small to express as a duration.
fn frame_interval(fps: f32) -> Option<Duration> {
    if !fps.is_finite() || fps <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f32(1.0 / fps).ok()
}

pub struct FrameScheduler {
    state: SchedulerState,
    target_fps: Option<f32>,
    last_tick: Option<Instant>,
    animations: Vec<AnimationSlot>,
    next_animation: u64,
    fps_update_interval: Duration,
    fps_window_start: Option<Instant>,
    fps_frames: u32,
    idle_since: Option<Instant>,
    idle_cleanup_done: bool,
}

impl FrameScheduler {
    /// A new scheduler starts active so the first frame is drawn.
    pub fn new(target_fps: Option<f32>, fps_update_interval: Duration) -> Self {
        Self {
            state: SchedulerState::Active,
            target_fps,
            last_tick: None,
            animations: Vec::new(),
            next_animation: 0,
            fps_update_interval,
            fps_window_start: None,
            fps_frames: 0,
            idle_since: None,
            idle_cleanup_done: true,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn target_fps(&self) -> Option<f32> {
        self.target_fps
    }

    pub fn set_target_fps(&mut self, fps: Option<f32>) {
        self.target_fps = fps;
    }

    pub fn add_animation(&mut self, animation: Box<dyn Animation>) -> AnimationId {
        let id = AnimationId(self.next_animation);
        self.next_animation += 1;
        self.animations.push(AnimationSlot {
            id,
            animation,
            pending: Duration::ZERO,
        });
        id
    }

    /// Stop an animation without a final step. Returns whether it was running.
    pub fn remove_animation(&mut self, id: AnimationId) -> bool {
        let before = self.animations.len();
        self.animations.retain(|slot| slot.id != id);
        self.animations.len() != before
    }

    pub fn animation_count(&self) -> usize {
        self.animations.len()
    }

    /// Start a tick at `now`.
    ///
    /// Returns the time since the last accepted tick, or `None` when the
    /// global frame cap has not elapsed yet. A rejected tick leaves the
    /// reference point untouched, so the next accepted tick receives the
    /// whole interval.
    pub fn begin_tick(&mut self, now: Instant) -> Option<Duration> {
        let delta = match self.last_tick {
            Some(last) => now.saturating_duration_since(last),
            None => Duration::ZERO,
        };
        if self.last_tick.is_some() {
            if let Some(min) = self.target_fps.and_then(frame_interval) {
                if delta < min {
                    return None;
                }
            }
        }
        self.last_tick = Some(now);
        Some(delta)
    }

    /// Step every animation whose own cap allows it and drop finished ones.
    pub fn advance_animations(&mut self, tree: &mut SceneTree, delta: Duration) {
        self.animations.retain_mut(|slot| {
            slot.pending += delta;
            if let Some(min) = slot.animation.fps_cap().and_then(frame_interval) {
                if slot.pending < min {
                    return true;
                }
            }
            let step = std::mem::take(&mut slot.pending);
            match slot.animation.advance(tree, step) {
                AnimationStatus::Running => true,
                AnimationStatus::Finished => {
                    log::trace!("Animation {:?} finished", slot.id);
                    false
                }
            }
        });
    }

    /// Close a tick. `rendered` says whether the pipeline ran.
    pub fn finish_tick(&mut self, now: Instant, rendered: bool) -> Vec<StageEvent> {
        let mut events = Vec::new();

        match (self.state, rendered) {
            (SchedulerState::Idle, true) => {
                log::debug!("Scheduler active");
                self.state = SchedulerState::Active;
                self.idle_since = None;
                events.push(StageEvent::Active);
            }
            (SchedulerState::Active, false) => {
                log::debug!("Scheduler idle");
                self.state = SchedulerState::Idle;
                self.idle_since = Some(now);
                self.idle_cleanup_done = false;
                self.fps_window_start = None;
                self.fps_frames = 0;
                events.push(StageEvent::Idle);
            }
            _ => {}
        }

        if rendered {
            let start = *self.fps_window_start.get_or_insert(now);
            self.fps_frames += 1;
            let elapsed = now.saturating_duration_since(start);
            if !self.fps_update_interval.is_zero() && elapsed >= self.fps_update_interval {
                let fps = self.fps_frames as f32 / elapsed.as_secs_f32();
                events.push(StageEvent::FpsUpdate { fps });
                self.fps_window_start = Some(now);
                self.fps_frames = 0;
            }
        }

        events
    }

    /// Whether the idle texture cleanup should run now. Fires at most once
    /// per idle period, `delay` after entering idle.
    pub fn idle_cleanup_due(&mut self, now: Instant, delay: Duration) -> bool {
        if self.state != SchedulerState::Idle || self.idle_cleanup_done {
            return false;
        }
        let Some(since) = self.idle_since else {
            return false;
        };
        if now.saturating_duration_since(since) < delay {
            return false;
        }
        self.idle_cleanup_done = true;
        true
    }
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("state", &self.state)
            .field("target_fps", &self.target_fps)
            .field("animations", &self.animations.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::node::NodeProps;

    struct Recorder {
        steps: Rc<RefCell<Vec<Duration>>>,
        cap: Option<f32>,
        remaining: usize,
    }

    impl Animation for Recorder {
        fn advance(&mut self, _tree: &mut SceneTree, delta: Duration) -> AnimationStatus {
            self.steps.borrow_mut().push(delta);
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining == 0 {
                AnimationStatus::Finished
            } else {
                AnimationStatus::Running
            }
        }

        fn fps_cap(&self) -> Option<f32> {
            self.cap
        }
    }

    fn recorder(cap: Option<f32>, remaining: usize) -> (Box<dyn Animation>, Rc<RefCell<Vec<Duration>>>) {
        let steps = Rc::new(RefCell::new(Vec::new()));
        let anim = Recorder {
            steps: steps.clone(),
            cap,
            remaining,
        };
        (Box::new(anim), steps)
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_delta_since_previous_tick() {
        let mut scheduler = FrameScheduler::new(None, Duration::from_secs(1));
        let t0 = Instant::now();
        assert_eq!(scheduler.begin_tick(t0), Some(Duration::ZERO));
        assert_eq!(scheduler.begin_tick(t0 + ms(16)), Some(ms(16)));
        assert_eq!(scheduler.begin_tick(t0 + ms(50)), Some(ms(34)));
    }

    #[test]
    fn test_global_cap_accumulates_skipped_time() {
        let mut scheduler = FrameScheduler::new(Some(30.0), Duration::from_secs(1));
        let t0 = Instant::now();
        scheduler.begin_tick(t0);
        assert_eq!(scheduler.begin_tick(t0 + ms(16)), None);
        assert_eq!(scheduler.begin_tick(t0 + ms(40)), Some(ms(40)));
    }

    #[test]
    fn test_unrepresentable_caps_are_uncapped() {
        let mut tree = SceneTree::new(10.0, 10.0);
        let mut scheduler = FrameScheduler::new(Some(1e-39), Duration::from_secs(1));
        let t0 = Instant::now();
        assert_eq!(scheduler.begin_tick(t0), Some(Duration::ZERO));
        assert_eq!(scheduler.begin_tick(t0 + ms(16)), Some(ms(16)));

        let (anim, steps) = recorder(Some(1e-39), usize::MAX);
        scheduler.add_animation(anim);
        scheduler.advance_animations(&mut tree, ms(16));
        assert_eq!(*steps.borrow(), vec![ms(16)]);
    }

    #[test]
    fn test_per_animation_cap() {
        let mut tree = SceneTree::new(10.0, 10.0);
        let mut scheduler = FrameScheduler::new(None, Duration::from_secs(1));
        let (anim, steps) = recorder(Some(20.0), usize::MAX);
        scheduler.add_animation(anim);

        for _ in 0..6 {
            scheduler.advance_animations(&mut tree, ms(20));
        }
        // 50ms interval: steps after the 3rd and 6th tick with 60ms each
        assert_eq!(*steps.borrow(), vec![ms(60), ms(60)]);
    }

    #[test]
    fn test_finished_animations_are_dropped() {
        let mut tree = SceneTree::new(10.0, 10.0);
        let mut scheduler = FrameScheduler::new(None, Duration::from_secs(1));
        let (anim, steps) = recorder(None, 2);
        scheduler.add_animation(anim);
        let (other, _) = recorder(None, usize::MAX);
        let other = scheduler.add_animation(other);

        scheduler.advance_animations(&mut tree, ms(16));
        scheduler.advance_animations(&mut tree, ms(16));
        scheduler.advance_animations(&mut tree, ms(16));
        assert_eq!(steps.borrow().len(), 2);
        assert_eq!(scheduler.animation_count(), 1);
        assert!(scheduler.remove_animation(other));
        assert!(!scheduler.remove_animation(other));
    }

    #[test]
    fn test_animation_can_mutate_tree() {
        struct Slide(crate::tree::NodeId);
        impl Animation for Slide {
            fn advance(&mut self, tree: &mut SceneTree, delta: Duration) -> AnimationStatus {
                let x = tree.props(self.0).map(|p| p.x).unwrap_or(0.0);
                tree.set_x(self.0, x + delta.as_millis() as f32);
                AnimationStatus::Running
            }
        }

        let mut tree = SceneTree::new(100.0, 100.0);
        let node = tree
            .create_node(tree.root(), NodeProps::rect(0.0, 0.0, 10.0, 10.0))
            .unwrap();
        tree.finish_frame();
        let mut scheduler = FrameScheduler::new(None, Duration::from_secs(1));
        scheduler.add_animation(Box::new(Slide(node)));
        scheduler.advance_animations(&mut tree, ms(5));
        assert_eq!(tree.props(node).unwrap().x, 5.0);
        assert!(tree.has_pending_work());
    }

    #[test]
    fn test_idle_and_active_transitions() {
        let mut scheduler = FrameScheduler::new(None, Duration::from_secs(1));
        let t0 = Instant::now();
        assert!(scheduler.finish_tick(t0, true).is_empty());
        assert_eq!(scheduler.finish_tick(t0 + ms(16), false), vec![StageEvent::Idle]);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.finish_tick(t0 + ms(32), false).is_empty());
        assert_eq!(scheduler.finish_tick(t0 + ms(48), true), vec![StageEvent::Active]);
        assert_eq!(scheduler.state(), SchedulerState::Active);
    }

    #[test]
    fn test_idle_cleanup_fires_once_after_delay() {
        let mut scheduler = FrameScheduler::new(None, Duration::from_secs(1));
        let t0 = Instant::now();
        assert!(!scheduler.idle_cleanup_due(t0, Duration::ZERO));
        scheduler.finish_tick(t0, false);
        assert!(!scheduler.idle_cleanup_due(t0 + ms(50), ms(100)));
        assert!(scheduler.idle_cleanup_due(t0 + ms(100), ms(100)));
        assert!(!scheduler.idle_cleanup_due(t0 + ms(200), ms(100)));

        scheduler.finish_tick(t0 + ms(300), true);
        scheduler.finish_tick(t0 + ms(316), false);
        assert!(scheduler.idle_cleanup_due(t0 + ms(316), Duration::ZERO));
    }

    #[test]
    fn test_fps_update_after_interval() {
        let mut scheduler = FrameScheduler::new(None, ms(100));
        let t0 = Instant::now();
        let mut updates = Vec::new();
        for i in 0..=10 {
            updates.extend(scheduler.finish_tick(t0 + ms(i * 10), true));
        }
        assert_eq!(updates.len(), 1);
        match updates[0] {
            StageEvent::FpsUpdate { fps } => assert!((fps - 110.0).abs() < 0.5),
            ref other => panic!("unexpected event {other:?}"),
        }
    }
}

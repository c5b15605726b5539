//! Single-flight playback scheduler
//!
//! Owns the buzzer and the one playback slot. `play_tone`, `play_melody` and
//! `cancel` are synchronous and return immediately; the timed part of every
//! task is carried out by [`PlaybackScheduler::run`], which runs as its own
//! embassy task and yields only at note and gap boundaries.
//!
//! Starting a task cancels the previous one first ("last command wins").
//! Every note is followed by a silent gap, so a task normally ends already
//! silent; a task cut short mid-note is silenced by whoever retires it.

use core::cell::RefCell;

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use heapless::Vec;
use log::{debug, info};

use crate::tone::{PwmOutput, ToneGenerator};

/// Longest melody the scheduler stores
pub const MAX_NOTES: usize = 64;

/// One sound primitive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    pub freq_hz: i32,
    pub duration_ms: u32,
    pub duty: f32,
}

impl Note {
    /// Negative frequencies become rests, duty is clamped to [0, 1]
    pub fn new(freq_hz: i32, duration_ms: u32, duty: f32) -> Self {
        let duty = if duty.is_nan() { 0.0 } else { duty.clamp(0.0, 1.0) };
        Self {
            freq_hz: freq_hz.max(0),
            duration_ms,
            duty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackKind {
    Tone,
    Melody,
}

/// Lifecycle of a playback task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    /// Ran to its natural end
    Completed,
    /// Preempted or explicitly canceled
    Canceled,
}

/// Snapshot of the most recent task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackStatus {
    pub id: u32,
    pub kind: PlaybackKind,
    pub state: TaskState,
    pub notes: usize,
}

struct PlaybackTask {
    id: u32,
    kind: PlaybackKind,
    notes: Vec<Note, MAX_NOTES>,
    gap_ms: u32,
    state: TaskState,
    claimed: bool,
}

/// What the runner has to wait for after sounding a note
struct Step {
    duration_ms: u32,
    gap_ms: u32,
}

struct Slot<P> {
    tone: ToneGenerator<P>,
    current: Option<PlaybackTask>,
    next_id: u32,
}

impl<P: PwmOutput> Slot<P> {
    fn running(&mut self, id: u32) -> Option<&mut PlaybackTask> {
        self.current
            .as_mut()
            .filter(|task| task.id == id && task.state == TaskState::Running)
    }

    /// Move the running task (if any) to `state` and silence the buzzer.
    fn retire(&mut self, state: TaskState) -> Option<u32> {
        let task = self
            .current
            .as_mut()
            .filter(|task| task.state == TaskState::Running)?;
        task.state = state;
        self.tone.silence();
        Some(task.id)
    }
}

/// Owner of the buzzer and of the single current-task slot
pub struct PlaybackScheduler<P> {
    slot: Mutex<CriticalSectionRawMutex, RefCell<Slot<P>>>,
    wake: Signal<CriticalSectionRawMutex, ()>,
}

impl<P: PwmOutput> PlaybackScheduler<P> {
    pub fn new(pwm: P) -> Self {
        Self {
            slot: Mutex::new(RefCell::new(Slot {
                tone: ToneGenerator::new(pwm),
                current: None,
                next_id: 0,
            })),
            wake: Signal::new(),
        }
    }

    fn with_slot<R>(&self, f: impl FnOnce(&mut Slot<P>) -> R) -> R {
        self.slot.lock(|slot| f(&mut slot.borrow_mut()))
    }

    /// Play one tone for `duration_ms`, replacing whatever is playing
    pub fn play_tone(&self, freq_hz: i32, duration_ms: u32, duty: f32) {
        let mut notes = Vec::new();
        // Capacity is MAX_NOTES, one note always fits.
        let _ = notes.push(Note::new(freq_hz, duration_ms, duty));
        self.install(PlaybackKind::Tone, notes, 0);
    }

    /// Play `(freq_hz, duration_ms)` pairs in order with `gap_ms` of silence
    /// after each. Returns how many notes were accepted.
    pub fn play_melody(&self, notes: &[(i32, u32)], gap_ms: u32, duty: f32) -> usize {
        let notes: Vec<Note, MAX_NOTES> = notes
            .iter()
            .take(MAX_NOTES)
            .map(|&(freq_hz, duration_ms)| Note::new(freq_hz, duration_ms, duty))
            .collect();
        let accepted = notes.len();
        self.install(PlaybackKind::Melody, notes, gap_ms);
        accepted
    }

    /// Cancel the running task, if any. Returns whether one was running.
    ///
    /// The buzzer is silent when this returns.
    pub fn cancel(&self) -> bool {
        match self.with_slot(|slot| slot.retire(TaskState::Canceled)) {
            Some(id) => {
                info!("[PLAY] task {} canceled", id);
                self.wake.signal(());
                true
            }
            None => {
                debug!("[PLAY] cancel requested with nothing playing");
                false
            }
        }
    }

    pub fn status(&self) -> Option<PlaybackStatus> {
        self.with_slot(|slot| {
            slot.current.as_ref().map(|task| PlaybackStatus {
                id: task.id,
                kind: task.kind,
                state: task.state,
                notes: task.notes.len(),
            })
        })
    }

    pub fn is_sounding(&self) -> bool {
        self.with_slot(|slot| slot.tone.is_sounding())
    }

    // Cancel-previous and install-new happen under one lock, with no await in between.
    fn install(&self, kind: PlaybackKind, notes: Vec<Note, MAX_NOTES>, gap_ms: u32) {
        let note_count = notes.len();
        let (preempted, id) = self.with_slot(|slot| {
            let preempted = slot.retire(TaskState::Canceled);
            slot.next_id = slot.next_id.wrapping_add(1);
            let id = slot.next_id;
            slot.current = Some(PlaybackTask {
                id,
                kind,
                notes,
                gap_ms,
                state: TaskState::Running,
                claimed: false,
            });
            (preempted, id)
        });

        if let Some(old) = preempted {
            info!("[PLAY] task {} preempted by task {}", old, id);
        }
        info!(
            "[PLAY] task {} scheduled: {:?}, {} note(s), gap {} ms",
            id, kind, note_count, gap_ms
        );
        self.wake.signal(());
    }

    /// Playback loop; spawn once and never return.
    pub async fn run(&self) -> ! {
        loop {
            match self.claim_next() {
                Some(id) => self.play(id).await,
                None => self.wake.wait().await,
            }
        }
    }

    fn claim_next(&self) -> Option<u32> {
        self.with_slot(|slot| {
            let task = slot.current.as_mut()?;
            if task.state == TaskState::Running && !task.claimed {
                task.claimed = true;
                Some(task.id)
            } else {
                None
            }
        })
    }

    async fn play(&self, id: u32) {
        let mut guard = PlaybackGuard {
            scheduler: self,
            id,
            finished: false,
        };

        let mut index = 0;
        while let Some(step) = self.sound_note(id, index) {
            if !self.hold(id, step.duration_ms).await {
                return;
            }
            // The gap follows every note, the last one included.
            if !self.rest(id) || !self.hold(id, step.gap_ms).await {
                return;
            }
            index += 1;
        }
        guard.finished = true;
    }

    fn sound_note(&self, id: u32, index: usize) -> Option<Step> {
        self.with_slot(|slot| {
            let task = slot.running(id)?;
            let note = *task.notes.get(index)?;
            let step = Step {
                duration_ms: note.duration_ms,
                gap_ms: task.gap_ms,
            };
            debug!(
                "[PLAY] task {} note {}: {} Hz for {} ms",
                id, index, note.freq_hz, note.duration_ms
            );
            slot.tone.start(note.freq_hz, note.duty);
            Some(step)
        })
    }

    fn rest(&self, id: u32) -> bool {
        self.with_slot(|slot| {
            if slot.running(id).is_none() {
                return false;
            }
            slot.tone.stop();
            true
        })
    }

    /// Wait `ms`, waking early on any slot change. Returns whether task `id`
    /// is still running afterwards.
    async fn hold(&self, id: u32, ms: u32) -> bool {
        let deadline = Instant::now() + Duration::from_millis(ms as u64);
        while self.is_running(id) {
            match select(Timer::at(deadline), self.wake.wait()).await {
                Either::First(()) => return self.is_running(id),
                Either::Second(()) => {}
            }
        }
        false
    }

    fn is_running(&self, id: u32) -> bool {
        self.with_slot(|slot| slot.running(id).is_some())
    }

    fn finish(&self, id: u32, state: TaskState) {
        let retired = self.with_slot(|slot| {
            slot.running(id)?;
            slot.retire(state)
        });
        if retired.is_some() {
            info!("[PLAY] task {} {:?}", id, state);
        }
    }
}

/// Retires the task when playback stops for any reason, including the
/// runner future being dropped mid-note.
struct PlaybackGuard<'a, P: PwmOutput> {
    scheduler: &'a PlaybackScheduler<P>,
    id: u32,
    finished: bool,
}

impl<P: PwmOutput> Drop for PlaybackGuard<'_, P> {
    fn drop(&mut self) {
        let state = if self.finished {
            TaskState::Completed
        } else {
            TaskState::Canceled
        };
        self.scheduler.finish(self.id, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use alloc::vec::Vec as StdVec;
    use core::convert::Infallible;
    use core::future::Future;
    use embassy_futures::block_on;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Call {
        Set(u32, u16),
        Stop,
    }

    #[derive(Clone, Default)]
    struct Tape(Rc<RefCell<StdVec<(Instant, Call)>>>);

    impl Tape {
        fn calls(&self) -> StdVec<Call> {
            self.0.borrow().iter().map(|(_, call)| *call).collect()
        }

        fn timeline(&self) -> StdVec<(Instant, Call)> {
            self.0.borrow().clone()
        }

        fn stops_after_last_set(&self) -> usize {
            let calls = self.calls();
            let start = calls
                .iter()
                .rposition(|c| matches!(c, Call::Set(..)))
                .unwrap_or(0);
            calls[start..].iter().filter(|c| **c == Call::Stop).count()
        }
    }

    impl PwmOutput for Tape {
        type Error = Infallible;

        fn max_duty(&self) -> u16 {
            1000
        }

        fn set_pwm(&mut self, freq_hz: u32, duty: u16) -> Result<(), Infallible> {
            self.0
                .borrow_mut()
                .push((Instant::now(), Call::Set(freq_hz, duty)));
            Ok(())
        }

        fn stop_pwm(&mut self) {
            self.0.borrow_mut().push((Instant::now(), Call::Stop));
        }
    }

    fn scheduler() -> (PlaybackScheduler<Tape>, Tape) {
        let tape = Tape::default();
        let scheduler = PlaybackScheduler::new(tape.clone());
        tape.0.borrow_mut().clear();
        (scheduler, tape)
    }

    /// Run the playback loop alongside `f` until `f` finishes.
    fn drive<P: PwmOutput, F: Future>(scheduler: &PlaybackScheduler<P>, f: F) -> F::Output {
        block_on(async {
            match select(scheduler.run(), f).await {
                Either::First(never) => match never {},
                Either::Second(out) => out,
            }
        })
    }

    async fn sleep_ms(ms: u64) {
        Timer::after_millis(ms).await;
    }

    #[test]
    fn tone_plays_then_completes() {
        let (scheduler, tape) = scheduler();
        scheduler.play_tone(440, 30, 0.5);
        drive(&scheduler, sleep_ms(80));

        assert_eq!(tape.calls(), [Call::Set(440, 500), Call::Stop]);
        let status = scheduler.status().unwrap();
        assert_eq!(status.kind, PlaybackKind::Tone);
        assert_eq!(status.state, TaskState::Completed);
        assert!(!scheduler.is_sounding());
    }

    #[test]
    fn melody_plays_in_order_with_gap() {
        let (scheduler, tape) = scheduler();
        let accepted = scheduler.play_melody(&[(440, 100), (550, 100)], 20, 0.5);
        assert_eq!(accepted, 2);
        drive(&scheduler, sleep_ms(300));

        let timeline = tape.timeline();
        let calls: StdVec<Call> = timeline.iter().map(|(_, c)| *c).collect();
        assert_eq!(
            calls,
            [
                Call::Set(440, 500),
                Call::Stop,
                Call::Set(550, 500),
                Call::Stop
            ]
        );
        let held = timeline[1].0 - timeline[0].0;
        let gap = timeline[2].0 - timeline[1].0;
        assert!(held >= Duration::from_millis(100), "note held {:?}", held);
        assert!(gap >= Duration::from_millis(20), "gap {:?}", gap);
        assert_eq!(scheduler.status().unwrap().state, TaskState::Completed);
        assert!(!scheduler.is_sounding());
    }

    #[test]
    fn gap_is_held_after_the_last_note() {
        let (scheduler, tape) = scheduler();
        scheduler.play_melody(&[(440, 10)], 200, 0.5);

        drive(&scheduler, async {
            sleep_ms(60).await;
            assert!(!scheduler.is_sounding());
            assert_eq!(scheduler.status().unwrap().state, TaskState::Running);
            sleep_ms(200).await;
        });

        assert_eq!(tape.calls(), [Call::Set(440, 500), Call::Stop]);
        assert_eq!(scheduler.status().unwrap().state, TaskState::Completed);
    }

    #[test]
    fn cancel_during_gap_keeps_single_silence() {
        let (scheduler, tape) = scheduler();
        scheduler.play_melody(&[(440, 10), (550, 10)], 200, 0.5);

        drive(&scheduler, async {
            sleep_ms(60).await;
            assert!(scheduler.cancel());
            sleep_ms(20).await;
        });

        assert_eq!(tape.calls(), [Call::Set(440, 500), Call::Stop]);
        assert_eq!(scheduler.status().unwrap().state, TaskState::Canceled);
    }

    #[test]
    fn new_tone_preempts_running_melody() {
        let (scheduler, tape) = scheduler();
        scheduler.play_melody(&[(440, 500), (550, 500)], 20, 0.5);

        drive(&scheduler, async {
            sleep_ms(50).await;
            assert!(scheduler.is_sounding());
            scheduler.play_tone(880, 30, 0.5);
            // The old note is silenced before the call returns.
            assert!(!scheduler.is_sounding());
            assert_eq!(scheduler.status().unwrap().state, TaskState::Running);
            sleep_ms(100).await;
        });

        assert_eq!(
            tape.calls(),
            [
                Call::Set(440, 500),
                Call::Stop,
                Call::Set(880, 500),
                Call::Stop
            ]
        );
        let status = scheduler.status().unwrap();
        assert_eq!(status.id, 2);
        assert_eq!(status.kind, PlaybackKind::Tone);
        assert_eq!(status.state, TaskState::Completed);
    }

    #[test]
    fn cancel_silences_mid_note_exactly_once() {
        let (scheduler, tape) = scheduler();
        scheduler.play_melody(&[(440, 500), (550, 500)], 20, 0.5);

        drive(&scheduler, async {
            sleep_ms(50).await;
            assert!(scheduler.cancel());
            assert!(!scheduler.is_sounding());
            sleep_ms(100).await;
        });

        assert_eq!(tape.calls(), [Call::Set(440, 500), Call::Stop]);
        assert_eq!(tape.stops_after_last_set(), 1);
        assert_eq!(scheduler.status().unwrap().state, TaskState::Canceled);
    }

    #[test]
    fn natural_completion_silences_exactly_once() {
        let (scheduler, tape) = scheduler();
        scheduler.play_melody(&[(440, 10), (0, 10), (660, 10)], 5, 0.25);
        drive(&scheduler, sleep_ms(100));

        assert_eq!(tape.stops_after_last_set(), 1);
        assert_eq!(scheduler.status().unwrap().state, TaskState::Completed);
    }

    #[test]
    fn cancel_when_idle_is_a_noop() {
        let (scheduler, tape) = scheduler();
        assert!(!scheduler.cancel());
        assert!(!scheduler.cancel());
        assert!(scheduler.status().is_none());
        assert!(tape.calls().is_empty());
    }

    #[test]
    fn cancel_after_completion_keeps_state() {
        let (scheduler, _tape) = scheduler();
        scheduler.play_tone(440, 5, 0.5);
        drive(&scheduler, sleep_ms(30));
        assert!(!scheduler.cancel());
        assert_eq!(scheduler.status().unwrap().state, TaskState::Completed);
    }

    #[test]
    fn dropping_the_runner_mid_note_still_silences() {
        let (scheduler, tape) = scheduler();
        scheduler.play_tone(440, 1000, 0.5);
        drive(&scheduler, sleep_ms(20));

        assert_eq!(tape.calls(), [Call::Set(440, 500), Call::Stop]);
        assert!(!scheduler.is_sounding());
        assert_eq!(scheduler.status().unwrap().state, TaskState::Canceled);
    }

    #[test]
    fn empty_melody_completes_silently() {
        let (scheduler, tape) = scheduler();
        assert_eq!(scheduler.play_melody(&[], 50, 0.5), 0);
        drive(&scheduler, sleep_ms(10));
        assert!(tape.calls().is_empty());
        assert_eq!(scheduler.status().unwrap().state, TaskState::Completed);
    }

    #[test]
    fn long_melodies_are_truncated() {
        let (scheduler, _tape) = scheduler();
        let notes = [(440, 1); MAX_NOTES + 10];
        assert_eq!(scheduler.play_melody(&notes, 0, 0.5), MAX_NOTES);
        assert_eq!(scheduler.status().unwrap().notes, MAX_NOTES);
    }

    #[test]
    fn notes_are_normalized() {
        let note = Note::new(-440, 100, 1.5);
        assert_eq!(note.freq_hz, 0);
        assert_eq!(note.duty, 1.0);
        assert_eq!(Note::new(440, 100, f32::NAN).duty, 0.0);
    }
}

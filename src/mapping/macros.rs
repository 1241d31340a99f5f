//! Timed playback of macro bindings.
//!
//! Each running macro is a queue of press/release/wait steps. The engine
//! advances all queues once per tick; steps that became due while the tick
//! was late are played back-to-back so order is always preserved.

use crate::mapping::action::{Action, MacroStep, MACRO_TAP};
use crate::output::codes::OutputCode;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Profile generation and binding index of the binding that started a macro.
pub type MacroKey = (u64, usize);

#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    Press(OutputCode),
    Release(OutputCode),
    Wait(Duration),
}

#[derive(Debug)]
struct Playback {
    key: MacroKey,
    steps: VecDeque<Step>,
    next_at: Instant,
    held: Vec<OutputCode>,
}

#[derive(Debug, Default)]
pub struct MacroPlayer {
    running: Vec<Playback>,
}

fn expand(steps: &[MacroStep]) -> VecDeque<Step> {
    let mut queue = VecDeque::with_capacity(steps.len() * 3);
    for step in steps {
        match *step {
            MacroStep::Tap(code) => {
                queue.push_back(Step::Press(code));
                queue.push_back(Step::Wait(MACRO_TAP));
                queue.push_back(Step::Release(code));
            }
            MacroStep::Press(code) => queue.push_back(Step::Press(code)),
            MacroStep::Release(code) => queue.push_back(Step::Release(code)),
            MacroStep::Sleep(duration) => queue.push_back(Step::Wait(duration)),
        }
    }
    queue
}

impl MacroPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a macro. A macro that is still playing is not restarted.
    pub fn start(&mut self, key: MacroKey, steps: &[MacroStep], now: Instant) -> bool {
        if self.is_running(key) {
            debug!("Macro {:?} still running, trigger ignored", key);
            return false;
        }
        self.running.push(Playback {
            key,
            steps: expand(steps),
            next_at: now,
            held: Vec::new(),
        });
        true
    }

    pub fn is_running(&self, key: MacroKey) -> bool {
        self.running.iter().any(|p| p.key == key)
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Emit every step that is due at `now`.
    pub fn advance(&mut self, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        for playback in &mut self.running {
            while playback.next_at <= now {
                let Some(step) = playback.steps.pop_front() else {
                    break;
                };
                match step {
                    Step::Press(code) => {
                        playback.held.push(code);
                        actions.push(Action::press(code));
                    }
                    Step::Release(code) => {
                        if let Some(pos) = playback.held.iter().position(|c| *c == code) {
                            playback.held.remove(pos);
                        }
                        actions.push(Action::release(code));
                    }
                    Step::Wait(duration) => playback.next_at += duration,
                }
            }
        }
        self.running.retain(|p| !p.steps.is_empty());
        actions
    }

    /// Stop all macros and release whatever they still hold.
    pub fn cancel_all(&mut self) -> Vec<Action> {
        self.running
            .drain(..)
            .flat_map(|p| p.held.into_iter().rev())
            .map(Action::release)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::codes;

    fn code(name: &str) -> OutputCode {
        codes::lookup(name).expect("known code")
    }

    #[test]
    fn tap_presses_and_releases_after_hold_time() {
        let start = Instant::now();
        let mut player = MacroPlayer::new();
        assert!(player.start((0, 0), &[MacroStep::Tap(code("KEY_A"))], start));

        assert_eq!(player.advance(start), vec![Action::press(code("KEY_A"))]);
        assert!(player.advance(start + Duration::from_millis(10)).is_empty());
        assert_eq!(
            player.advance(start + MACRO_TAP),
            vec![Action::release(code("KEY_A"))]
        );
        assert!(player.is_empty());
    }

    #[test]
    fn late_ticks_catch_up_in_order() {
        let start = Instant::now();
        let mut player = MacroPlayer::new();
        let steps = [
            MacroStep::Tap(code("KEY_A")),
            MacroStep::Sleep(Duration::from_millis(50)),
            MacroStep::Tap(code("KEY_B")),
        ];
        player.start((0, 0), &steps, start);

        let actions = player.advance(start + Duration::from_millis(500));
        assert_eq!(
            actions,
            vec![
                Action::press(code("KEY_A")),
                Action::release(code("KEY_A")),
                Action::press(code("KEY_B")),
                Action::release(code("KEY_B")),
            ]
        );
    }

    #[test]
    fn retrigger_while_running_is_ignored() {
        let start = Instant::now();
        let mut player = MacroPlayer::new();
        let steps = [MacroStep::Tap(code("KEY_A"))];
        assert!(player.start((1, 3), &steps, start));
        assert!(!player.start((1, 3), &steps, start));
        assert!(player.start((2, 3), &steps, start));
        assert_eq!(player.len(), 2);
    }

    #[test]
    fn cancel_releases_held_keys() {
        let start = Instant::now();
        let mut player = MacroPlayer::new();
        let steps = [
            MacroStep::Press(code("KEY_LEFTCTRL")),
            MacroStep::Sleep(Duration::from_secs(1)),
            MacroStep::Release(code("KEY_LEFTCTRL")),
        ];
        player.start((0, 0), &steps, start);
        player.advance(start);

        assert_eq!(player.cancel_all(), vec![Action::release(code("KEY_LEFTCTRL"))]);
        assert!(player.is_empty());
    }
}

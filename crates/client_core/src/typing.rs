//! Edge-triggered typing indicator with a single resettable debounce timer.
//!
//! The first keystroke raises `typing=true`; every keystroke restarts the
//! timer; only the expiry of the latest timer lowers the signal again.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypingState {
    #[default]
    Idle,
    TypingSignaled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keystroke {
    /// `typing=true` has to be transmitted.
    pub raise: bool,
    /// Token of the timer armed by this keystroke.
    pub timer: u64,
}

#[derive(Debug, Default)]
pub struct TypingSignal {
    state: TypingState,
    timer: u64,
}

impl TypingSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TypingState {
        self.state
    }

    pub fn keystroke(&mut self) -> Keystroke {
        let raise = self.state == TypingState::Idle;
        self.state = TypingState::TypingSignaled;
        self.timer = self.timer.wrapping_add(1);
        Keystroke {
            raise,
            timer: self.timer,
        }
    }

    /// Timer callback. Returns true when `typing=false` has to be transmitted;
    /// tokens from superseded timers are ignored.
    pub fn expire(&mut self, timer: u64) -> bool {
        if timer != self.timer || self.state != TypingState::TypingSignaled {
            return false;
        }
        self.state = TypingState::Idle;
        true
    }

    /// Drops back to idle and invalidates any armed timer. Returns whether the
    /// signal was raised.
    pub fn reset(&mut self) -> bool {
        let was_raised = self.state == TypingState::TypingSignaled;
        self.state = TypingState::Idle;
        self.timer = self.timer.wrapping_add(1);
        was_raised
    }
}

// SPDX-License-Identifier: MPL-2.0

//! Module lifecycle state machine
//!
//! Pure bookkeeping: no callbacks run here. The registry applies these
//! transitions under a per-module lock and performs the side effects
//! (events, `cleanup`, cancellation) after releasing it.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Lifecycle state of a registered module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Uninitialized,
    Initializing,
    Ready,
    Processing,
    Error,
    Disabled,
}

impl ModuleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleState::Uninitialized => "uninitialized",
            ModuleState::Initializing => "initializing",
            ModuleState::Ready => "ready",
            ModuleState::Processing => "processing",
            ModuleState::Error => "error",
            ModuleState::Disabled => "disabled",
        }
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: ModuleState) -> bool {
        use ModuleState::*;
        matches!(
            (self, next),
            (Uninitialized, Initializing)
                | (Uninitialized, Disabled)
                | (Initializing, Ready)
                | (Initializing, Error)
                | (Initializing, Uninitialized)
                | (Ready, Processing)
                | (Ready, Disabled)
                | (Ready, Uninitialized)
                | (Processing, Ready)
                | (Processing, Error)
                | (Processing, Disabled)
                | (Processing, Uninitialized)
                | (Error, Processing)
                | (Error, Disabled)
                | (Error, Uninitialized)
        )
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change to report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub from: ModuleState,
    pub to: ModuleState,
}

/// How a `process` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallOutcome {
    Success,
    Failure,
    /// Aborted by disable or unbind; not the module's fault
    Cancelled,
}

/// Auto-disable policy
#[derive(Debug, Clone, Copy)]
pub(crate) struct FailurePolicy {
    pub threshold: u32,
    pub window: Duration,
}

/// Side effects owed after a lifecycle update
#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub transitions: Vec<Transition>,
    /// The module just crossed the failure threshold
    pub auto_disabled: bool,
    /// `cleanup` must run now (outside the lock)
    pub run_cleanup: bool,
    /// The session ended while the module was busy; cleanup waits for it
    pub cleanup_deferred: bool,
    /// Failures currently inside the window
    pub failures: usize,
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: ModuleState,
    /// `process` calls in flight
    active: usize,
    /// `initialize` succeeded in the current session
    initialized: bool,
    /// `initialize` is running
    init_running: bool,
    failures: VecDeque<Instant>,
    /// `initialize` was attempted and `cleanup` has not run yet
    needs_cleanup: bool,
    /// Disabled or reset while busy; cleanup runs once the module is idle
    cleanup_deferred: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: ModuleState::Uninitialized,
            active: 0,
            initialized: false,
            init_running: false,
            failures: VecDeque::new(),
            needs_cleanup: false,
            cleanup_deferred: false,
        }
    }
}

impl Lifecycle {
    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn active(&self) -> usize {
        self.active
    }

    fn go(&mut self, to: ModuleState, effects: &mut Effects) -> bool {
        if self.state == to || !self.state.can_transition_to(to) {
            return false;
        }
        effects.transitions.push(Transition {
            from: self.state,
            to,
        });
        self.state = to;
        true
    }

    /// Uninitialized -> Initializing
    ///
    /// Refused while cleanup of the previous session is still owed.
    pub fn begin_init(&mut self) -> Option<Effects> {
        if self.state != ModuleState::Uninitialized || self.cleanup_deferred {
            return None;
        }
        let mut effects = Effects::default();
        self.go(ModuleState::Initializing, &mut effects);
        self.init_running = true;
        self.needs_cleanup = true;
        self.failures.clear();
        Some(effects)
    }

    /// Initializing -> Ready, or -> Error with immediate cleanup
    ///
    /// If the session ended while `initialize` ran, the owed cleanup runs now
    /// instead.
    pub fn finish_init(&mut self, ok: bool) -> Effects {
        let mut effects = Effects::default();
        self.init_running = false;
        if self.state != ModuleState::Initializing {
            effects.run_cleanup = self.settle_deferred();
            return effects;
        }
        if ok {
            self.go(ModuleState::Ready, &mut effects);
            self.initialized = true;
        } else {
            self.go(ModuleState::Error, &mut effects);
            effects.run_cleanup = self.take_cleanup();
        }
        effects
    }

    /// Claim the module for one `process` call
    ///
    /// Returns `None` if the module is not dispatchable.
    pub fn begin_call(&mut self) -> Option<Effects> {
        let dispatchable = self.initialized
            && matches!(
                self.state,
                ModuleState::Ready | ModuleState::Processing | ModuleState::Error
            );
        if !dispatchable {
            return None;
        }
        let mut effects = Effects::default();
        self.go(ModuleState::Processing, &mut effects);
        self.active += 1;
        Some(effects)
    }

    /// Record the end of a `process` call
    pub fn end_call(&mut self, outcome: CallOutcome, now: Instant, policy: FailurePolicy) -> Effects {
        let mut effects = Effects::default();
        self.active = self.active.saturating_sub(1);

        match outcome {
            CallOutcome::Success => {
                self.failures.clear();
                if self.active == 0 {
                    self.go(ModuleState::Ready, &mut effects);
                }
            }
            CallOutcome::Cancelled => {
                if self.active == 0 && self.state == ModuleState::Processing {
                    self.go(ModuleState::Ready, &mut effects);
                }
            }
            CallOutcome::Failure => {
                while self
                    .failures
                    .front()
                    .is_some_and(|t| now.duration_since(*t) > policy.window)
                {
                    self.failures.pop_front();
                }
                self.failures.push_back(now);
                self.go(ModuleState::Error, &mut effects);

                if self.state == ModuleState::Error
                    && self.failures.len() >= policy.threshold as usize
                {
                    self.go(ModuleState::Disabled, &mut effects);
                    effects.auto_disabled = true;
                    self.cleanup_deferred = self.needs_cleanup;
                }
            }
        }

        effects.failures = self.failures.len();
        effects.run_cleanup = self.settle_deferred();
        effects
    }

    /// Explicit disable
    ///
    /// Cleanup runs now, or when the last in-flight call ends.
    pub fn disable(&mut self) -> Effects {
        let mut effects = Effects::default();
        if !self.go(ModuleState::Disabled, &mut effects) {
            return effects;
        }
        if self.active == 0 {
            effects.run_cleanup = self.take_cleanup();
        } else {
            self.cleanup_deferred = self.needs_cleanup;
        }
        effects
    }

    /// Session ended: back to Uninitialized unless Disabled
    ///
    /// Cleanup runs now, or once a running `initialize` or the last in-flight
    /// call returns.
    pub fn reset(&mut self) -> Effects {
        let mut effects = Effects::default();
        if self.state != ModuleState::Disabled {
            self.go(ModuleState::Uninitialized, &mut effects);
        }
        self.initialized = false;
        self.failures.clear();
        if self.init_running || self.active > 0 {
            self.cleanup_deferred = self.needs_cleanup;
            effects.cleanup_deferred = self.cleanup_deferred;
        } else {
            self.cleanup_deferred = false;
            effects.run_cleanup = self.take_cleanup();
        }
        effects
    }

    /// Run owed cleanup once the module is idle
    fn settle_deferred(&mut self) -> bool {
        if !self.cleanup_deferred || self.active > 0 || self.init_running {
            return false;
        }
        self.cleanup_deferred = false;
        self.take_cleanup()
    }

    fn take_cleanup(&mut self) -> bool {
        std::mem::replace(&mut self.needs_cleanup, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: FailurePolicy = FailurePolicy {
        threshold: 3,
        window: Duration::from_secs(10),
    };

    fn ready() -> Lifecycle {
        let mut lc = Lifecycle::default();
        lc.begin_init().unwrap();
        lc.finish_init(true);
        lc
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut lc = Lifecycle::default();
        let init = lc.begin_init().unwrap();
        assert_eq!(init.transitions[0].to, ModuleState::Initializing);
        lc.finish_init(true);
        assert_eq!(lc.state(), ModuleState::Ready);

        let begin = lc.begin_call().unwrap();
        assert_eq!(begin.transitions.len(), 1);
        let end = lc.end_call(CallOutcome::Success, Instant::now(), POLICY);
        assert_eq!(
            end.transitions,
            vec![Transition {
                from: ModuleState::Processing,
                to: ModuleState::Ready
            }]
        );
    }

    #[test]
    fn test_failed_init_cleans_up_once() {
        let mut lc = Lifecycle::default();
        lc.begin_init().unwrap();
        let effects = lc.finish_init(false);
        assert_eq!(lc.state(), ModuleState::Error);
        assert!(effects.run_cleanup);
        assert!(lc.begin_call().is_none());
        assert!(!lc.reset().run_cleanup);
        assert_eq!(lc.state(), ModuleState::Uninitialized);
    }

    #[test]
    fn test_threshold_disables() {
        let mut lc = ready();
        let now = Instant::now();
        for i in 0..3 {
            lc.begin_call().unwrap();
            let effects = lc.end_call(CallOutcome::Failure, now, POLICY);
            assert_eq!(effects.auto_disabled, i == 2);
        }
        assert_eq!(lc.state(), ModuleState::Disabled);
        assert!(lc.begin_call().is_none());
    }

    #[test]
    fn test_success_clears_failure_window() {
        let mut lc = ready();
        let now = Instant::now();
        for _ in 0..2 {
            lc.begin_call().unwrap();
            lc.end_call(CallOutcome::Failure, now, POLICY);
        }
        lc.begin_call().unwrap();
        lc.end_call(CallOutcome::Success, now, POLICY);
        lc.begin_call().unwrap();
        let effects = lc.end_call(CallOutcome::Failure, now, POLICY);
        assert_eq!(effects.failures, 1);
        assert_eq!(lc.state(), ModuleState::Error);
    }

    #[test]
    fn test_old_failures_leave_window() {
        let mut lc = ready();
        let start = Instant::now();
        for _ in 0..2 {
            lc.begin_call().unwrap();
            lc.end_call(CallOutcome::Failure, start, POLICY);
        }
        lc.begin_call().unwrap();
        let later = start + Duration::from_secs(11);
        let effects = lc.end_call(CallOutcome::Failure, later, POLICY);
        assert_eq!(effects.failures, 1);
        assert!(!effects.auto_disabled);
    }

    #[test]
    fn test_disable_defers_cleanup_while_active() {
        let mut lc = ready();
        lc.begin_call().unwrap();
        let effects = lc.disable();
        assert!(!effects.run_cleanup);
        let end = lc.end_call(CallOutcome::Cancelled, Instant::now(), POLICY);
        assert!(end.run_cleanup);
        assert!(lc.end_call(CallOutcome::Cancelled, Instant::now(), POLICY).transitions.is_empty());
    }

    #[test]
    fn test_reset_during_init_cleans_up_after_init() {
        let mut lc = Lifecycle::default();
        lc.begin_init().unwrap();
        let reset = lc.reset();
        assert!(!reset.run_cleanup);
        assert!(reset.cleanup_deferred);
        assert_eq!(lc.state(), ModuleState::Uninitialized);

        let finished = lc.finish_init(true);
        assert!(finished.run_cleanup);
        assert!(finished.transitions.is_empty());
        assert_eq!(lc.state(), ModuleState::Uninitialized);
        assert!(lc.begin_call().is_none());
        assert!(!lc.reset().run_cleanup);
    }

    #[test]
    fn test_reset_with_call_in_flight_waits_for_it() {
        let mut lc = ready();
        lc.begin_call().unwrap();
        let reset = lc.reset();
        assert!(!reset.run_cleanup);
        assert!(reset.cleanup_deferred);

        // No new session until the old one is cleaned up
        assert!(lc.begin_init().is_none());

        let end = lc.end_call(CallOutcome::Failure, Instant::now(), POLICY);
        assert!(end.run_cleanup);
        assert!(!end.auto_disabled);
        assert_eq!(lc.state(), ModuleState::Uninitialized);
        assert!(lc.begin_init().is_some());
    }

    #[test]
    fn test_disabled_is_terminal() {
        for next in [
            ModuleState::Uninitialized,
            ModuleState::Initializing,
            ModuleState::Ready,
            ModuleState::Processing,
            ModuleState::Error,
        ] {
            assert!(!ModuleState::Disabled.can_transition_to(next));
        }
    }
}

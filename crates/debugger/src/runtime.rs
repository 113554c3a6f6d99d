//! Run control state machine

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::queue::QueueTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeState {
    Starting,
    StartingWithoutDebugger,
    StartingWithDebugger,
    Running,
    Paused,
    /// Running while the debugger is active
    Resumed,
    SingleStep,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateMachineAction {
    StartWithoutDebugger,
    StartWithDebugger,
    Run,
    Resume,
    Pause,
    SingleStep,
    Stop,
}

impl RuntimeState {
    /// State reached by applying `action`, `None` when the action is not
    /// valid here
    ///
    /// Pausing a stopped runtime is handled by the session.
    pub fn next(self, action: StateMachineAction) -> Option<RuntimeState> {
        use RuntimeState as S;
        use StateMachineAction as A;

        if action == A::Stop {
            return (self != S::Stopped).then_some(S::Stopped);
        }

        match (self, action) {
            (S::Starting, A::StartWithoutDebugger) => Some(S::StartingWithoutDebugger),
            (S::Starting, A::StartWithDebugger) => Some(S::StartingWithDebugger),
            (S::StartingWithoutDebugger, A::Run | A::Resume) => Some(S::Running),
            (S::StartingWithoutDebugger, A::Pause) => Some(S::Paused),
            (S::StartingWithDebugger, A::Pause) => Some(S::Paused),
            (S::Running, A::Pause) => Some(S::Paused),
            (S::Paused, A::Run) => Some(S::Running),
            (S::Paused, A::Resume) => Some(S::Resumed),
            (S::Paused, A::SingleStep) => Some(S::SingleStep),
            (S::Resumed, A::Run) => Some(S::Running),
            (S::Resumed, A::Pause) => Some(S::Paused),
            (S::SingleStep, A::Pause) => Some(S::Paused),
            _ => None,
        }
    }

    pub fn is_paused(self) -> bool {
        self == RuntimeState::Paused
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeState::Starting => "starting",
            RuntimeState::StartingWithoutDebugger => "starting-without-debugger",
            RuntimeState::StartingWithDebugger => "starting-with-debugger",
            RuntimeState::Running => "running",
            RuntimeState::Paused => "paused",
            RuntimeState::Resumed => "resumed",
            RuntimeState::SingleStep => "single-step",
            RuntimeState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SingleStepMode {
    #[default]
    StepInto,
    StepOver,
    StepOut,
}

impl FromStr for SingleStepMode {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "into" | "step-into" => Ok(SingleStepMode::StepInto),
            "over" | "step-over" => Ok(SingleStepMode::StepOver),
            "out" | "step-out" => Ok(SingleStepMode::StepOut),
            other => eyre::bail!("unknown single step mode {other:?}"),
        }
    }
}

/// What the current single step started from
#[derive(Debug, Default)]
pub(crate) struct StepTracker {
    pub(crate) mode: SingleStepMode,
    /// Queue head when the step was requested
    pub(crate) queue_task: Option<QueueTask>,
    /// Task skipped by the last automatic step
    pub(crate) last_skipped: Option<u64>,
}

impl StepTracker {
    pub(crate) fn clear(&mut self) {
        self.queue_task = None;
        self.last_skipped = None;
    }

    pub(crate) fn begin(&mut self, mode: SingleStepMode, head: Option<QueueTask>) {
        self.mode = mode;
        self.queue_task = head;
        self.last_skipped = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RuntimeState as S;
    use StateMachineAction as A;

    #[test]
    fn test_start_with_debugger() {
        let state = S::Starting.next(A::StartWithDebugger).unwrap();
        assert_eq!(state, S::StartingWithDebugger);
        assert_eq!(state.next(A::Run), None);
        assert_eq!(state.next(A::Pause), Some(S::Paused));
    }

    #[test]
    fn test_step_cycle() {
        let stepping = S::Paused.next(A::SingleStep).unwrap();
        assert_eq!(stepping, S::SingleStep);
        assert_eq!(stepping.next(A::Pause), Some(S::Paused));
        assert_eq!(stepping.next(A::Resume), None);
    }

    #[test]
    fn test_resume_and_leave_debug_mode() {
        let resumed = S::Paused.next(A::Resume).unwrap();
        assert_eq!(resumed, S::Resumed);
        assert_eq!(resumed.next(A::Run), Some(S::Running));
        assert_eq!(S::Paused.next(A::Run), Some(S::Running));
    }

    #[test]
    fn test_stop_from_anywhere() {
        for state in [S::Starting, S::Running, S::Paused, S::Resumed, S::SingleStep] {
            assert_eq!(state.next(A::Stop), Some(S::Stopped));
        }
        assert_eq!(S::Stopped.next(A::Stop), None);
        assert_eq!(S::Stopped.next(A::Pause), None);
    }

    #[test]
    fn test_step_mode_names() {
        assert_eq!("over".parse::<SingleStepMode>().unwrap(), SingleStepMode::StepOver);
        assert_eq!("step-out".parse::<SingleStepMode>().unwrap(), SingleStepMode::StepOut);
        assert!("sideways".parse::<SingleStepMode>().is_err());
    }
}

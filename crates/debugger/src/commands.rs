//! Requests from a [`crate::Debugger`] handle to its session thread
//!
//! Every request that expects an answer carries a oneshot channel the
//! session thread replies on once the request has been applied.

use crate::error::SessionError;
use crate::runtime::SingleStepMode;
use crate::session::{BreakpointAction, Session};
use crate::state::MirrorSnapshot;

/// Run control operations forwarded to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Control {
    Resume,
    Pause,
    SingleStep(Option<SingleStepMode>),
    ToggleDebugger,
    /// Component path
    Breakpoint(BreakpointAction, String),
    Stop,
}

impl Control {
    pub(crate) fn apply(self, session: &mut Session) -> Result<(), SessionError> {
        match self {
            Control::Resume => session.resume(),
            Control::Pause => session.pause(),
            Control::SingleStep(mode) => session.single_step(mode),
            Control::ToggleDebugger => session.toggle_debugger(),
            Control::Breakpoint(action, path) => session.breakpoint(action, &path),
            Control::Stop => {
                session.stop(true);
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
pub(crate) enum Command {
    Control {
        control: Control,
        response_tx: oneshot::Sender<Result<(), SessionError>>,
    },

    Snapshot(oneshot::Sender<MirrorSnapshot>),

    /// Stop the session and end the background thread
    Shutdown,
}

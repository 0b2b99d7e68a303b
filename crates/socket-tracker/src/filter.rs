//! Policy gate for forwarding payload data

use crate::config::{TargetMatch, TraceControl};
use crate::state::ConnectionState;

/// Why data was or was not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DataDecision {
    Send,
    /// Traffic of the monitoring process itself
    SelfProcess,
    /// Covered by a "disable up to generation N" directive
    Disabled,
    /// Protocol unknown, or not traced for the connection's role
    NotTraced,
}

/// Decides which connections have their payload forwarded. Stats and
/// lifecycle events do not pass through here.
#[derive(Debug, Clone)]
pub(crate) struct ControlFilter {
    control: TraceControl,
}

impl ControlFilter {
    pub(crate) fn new(control: TraceControl) -> Self {
        Self { control }
    }

    pub(crate) fn control(&self) -> &TraceControl {
        &self.control
    }

    pub(crate) fn target(&self, pid: u32) -> TargetMatch {
        self.control.target.matches(pid)
    }

    /// `force` is set for observations of the targeted process; it
    /// overrides the protocol policy but not the self and disable checks.
    pub(crate) fn decide(&self, pid: u32, force: bool, state: &ConnectionState) -> DataDecision {
        if self.control.self_pid == Some(pid) {
            return DataDecision::SelfProcess;
        }
        if state.is_disabled() {
            return DataDecision::Disabled;
        }
        if force || self.traces_protocol(state) {
            DataDecision::Send
        } else {
            DataDecision::NotTraced
        }
    }

    fn traces_protocol(&self, state: &ConnectionState) -> bool {
        state.protocol.is_known() && self.control.mask(state.protocol).allows(state.role)
    }
}

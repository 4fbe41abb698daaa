//! Backend state vocabulary and its mapping onto [`ProcessState`].

use super::ProcessState;

pub const STATE_INITIAL: &str = "STATE_INITIAL";
pub const STATE_PENDING: &str = "STATE_PENDING";
pub const STATE_STARTING: &str = "STATE_STARTING";
pub const STATE_RUNNING: &str = "STATE_RUNNING";
pub const STATE_STOPPING: &str = "STATE_STOPPING";
pub const STATE_STOPPING_RESTART: &str = "STATE_STOPPING_RESTART";
pub const STATE_REQUEST_CANCELED: &str = "STATE_REQUEST_CANCELED";
pub const STATE_TERMINATED: &str = "STATE_TERMINATED";
pub const STATE_EXITED: &str = "STATE_EXITED";

/// Every label the backends in this crate can report.
pub const KNOWN_LABELS: [&str; 9] = [
    STATE_INITIAL,
    STATE_PENDING,
    STATE_STARTING,
    STATE_RUNNING,
    STATE_STOPPING,
    STATE_STOPPING_RESTART,
    STATE_REQUEST_CANCELED,
    STATE_TERMINATED,
    STATE_EXITED,
];

/// Translate a backend label into the canonical state.
///
/// Total: unknown labels become [`ProcessState::Invalid`]. For
/// `STATE_EXITED` the result code decides between `Exited` (zero) and
/// `Failed` (anything else, including no code at all).
pub fn translate(label: &str, result_code: Option<i32>) -> ProcessState {
    match label {
        STATE_INITIAL | STATE_PENDING | STATE_STARTING => ProcessState::Requesting,
        STATE_RUNNING => ProcessState::Running,
        STATE_STOPPING => ProcessState::Terminating,
        STATE_STOPPING_RESTART => ProcessState::Invalid,
        STATE_REQUEST_CANCELED => ProcessState::Rejected,
        STATE_TERMINATED => ProcessState::Terminated,
        STATE_EXITED => match result_code {
            Some(0) => ProcessState::Exited,
            _ => ProcessState::Failed,
        },
        _ => ProcessState::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_family_is_requesting() {
        for label in [STATE_INITIAL, STATE_PENDING, STATE_STARTING] {
            assert_eq!(translate(label, None), ProcessState::Requesting);
        }
    }

    #[test]
    fn static_mapping() {
        assert_eq!(translate(STATE_RUNNING, None), ProcessState::Running);
        assert_eq!(translate(STATE_STOPPING, None), ProcessState::Terminating);
        assert_eq!(translate(STATE_STOPPING_RESTART, None), ProcessState::Invalid);
        assert_eq!(translate(STATE_REQUEST_CANCELED, None), ProcessState::Rejected);
        assert_eq!(translate(STATE_TERMINATED, None), ProcessState::Terminated);
    }

    #[test]
    fn exited_branches_on_result_code() {
        assert_eq!(translate(STATE_EXITED, Some(0)), ProcessState::Exited);
        assert_eq!(translate(STATE_EXITED, Some(1)), ProcessState::Failed);
        assert_eq!(translate(STATE_EXITED, Some(-9)), ProcessState::Failed);
        assert_eq!(translate(STATE_EXITED, None), ProcessState::Failed);
    }

    #[test]
    fn result_code_ignored_outside_exited() {
        assert_eq!(translate(STATE_RUNNING, Some(3)), ProcessState::Running);
    }

    #[test]
    fn total_over_known_labels_plus_unknown() {
        for label in KNOWN_LABELS {
            // must not panic
            let _ = translate(label, Some(0));
        }
        assert_eq!(translate("STATE_BACKOFF", None), ProcessState::Invalid);
        assert_eq!(translate("", Some(0)), ProcessState::Invalid);
    }
}

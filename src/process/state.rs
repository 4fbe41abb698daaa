use serde::ser::{Serialize, SerializeTuple, Serializer};

/// Canonical lifecycle state of a supervised process.
///
/// Ordered by rank. On the wire a state is the pair `[rank, "NAME"]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProcessState {
    Requesting,
    Running,
    Terminating,
    Terminated,
    Failed,
    Rejected,
    Invalid,
    Exited,
}

impl ProcessState {
    pub const ALL: [ProcessState; 8] = [
        ProcessState::Requesting,
        ProcessState::Running,
        ProcessState::Terminating,
        ProcessState::Terminated,
        ProcessState::Failed,
        ProcessState::Rejected,
        ProcessState::Invalid,
        ProcessState::Exited,
    ];

    pub fn rank(self) -> u16 {
        match self {
            ProcessState::Requesting => 100,
            ProcessState::Running => 500,
            ProcessState::Terminating => 600,
            ProcessState::Terminated => 700,
            ProcessState::Failed => 800,
            ProcessState::Rejected => 850,
            ProcessState::Invalid => 900,
            ProcessState::Exited => 1000,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProcessState::Requesting => "REQUESTING",
            ProcessState::Running => "RUNNING",
            ProcessState::Terminating => "TERMINATING",
            ProcessState::Terminated => "TERMINATED",
            ProcessState::Failed => "FAILED",
            ProcessState::Rejected => "REJECTED",
            ProcessState::Invalid => "INVALID",
            ProcessState::Exited => "EXITED",
        }
    }

    /// States that occupy a slot.
    pub fn is_admitted(self) -> bool {
        matches!(
            self,
            ProcessState::Requesting | ProcessState::Running | ProcessState::Terminating
        )
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for ProcessState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tup = serializer.serialize_tuple(2)?;
        tup.serialize_element(&self.rank())?;
        tup.serialize_element(self.name())?;
        tup.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_follow_declaration_order() {
        let ranks: Vec<u16> = ProcessState::ALL.iter().map(|s| s.rank()).collect();
        assert_eq!(ranks, vec![100, 500, 600, 700, 800, 850, 900, 1000]);
        for pair in ProcessState::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn only_live_states_are_admitted() {
        let admitted: Vec<ProcessState> = ProcessState::ALL
            .iter()
            .copied()
            .filter(|s| s.is_admitted())
            .collect();
        assert_eq!(
            admitted,
            vec![
                ProcessState::Requesting,
                ProcessState::Running,
                ProcessState::Terminating
            ]
        );
    }

    #[test]
    fn serializes_as_rank_name_pair() {
        let json = serde_json::to_value(ProcessState::Running).unwrap();
        assert_eq!(json, serde_json::json!([500, "RUNNING"]));
        let json = serde_json::to_value(ProcessState::Rejected).unwrap();
        assert_eq!(json, serde_json::json!([850, "REJECTED"]));
    }

    #[test]
    fn display_uses_name() {
        assert_eq!(ProcessState::Exited.to_string(), "EXITED");
    }
}

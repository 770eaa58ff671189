//! Plan records: an ordered to-do list stored per session.

use serde::{Deserialize, Serialize};

/// Canonical plan id for a session.
pub fn plan_id_for(session_id: &str) -> String {
    format!("plan_{session_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Pending,
    Running,
    Done,
    Blocked,
    Errored,
}

/// A single task in a plan. Ids are positive and unique within the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub id: u32,
    pub text: String,
    pub status: PlanStatus,
}

/// The full plan state, also used as the `plan` event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    /// Canonical: `plan_<session_id>`.
    pub plan_id: String,
    pub items: Vec<PlanItem>,
    /// Correlates a snapshot with the mutating tool call, for the UI.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_call_id: String,
}

impl PlanSnapshot {
    pub fn empty(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            items: Vec::new(),
            tool_call_id: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_id_is_prefixed_session_id() {
        assert_eq!(plan_id_for("session_42"), "plan_session_42");
    }

    #[test]
    fn snapshot_round_trip() {
        let plan = PlanSnapshot {
            plan_id: "plan_s1".into(),
            items: vec![
                PlanItem {
                    id: 1,
                    text: "outline".into(),
                    status: PlanStatus::Done,
                },
                PlanItem {
                    id: 2,
                    text: "draft".into(),
                    status: PlanStatus::Running,
                },
            ],
            tool_call_id: String::new(),
        };
        let wire = serde_json::to_string(&plan).unwrap();
        assert!(wire.contains(r#""status":"running""#));
        assert!(!wire.contains("tool_call_id"));
        let back: PlanSnapshot = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, plan);
    }
}

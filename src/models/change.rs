use serde::{Deserialize, Serialize};

use super::{ActiveConductor, ConductorId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Row-level notification from the `active_conductors` changefeed.
///
/// `record` carries the new row for inserts and updates. Deletes, and
/// payloads that were too large for NOTIFY, arrive without it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub conductor_id: ConductorId,
    #[serde(default)]
    pub record: Option<ActiveConductor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trigger_payload() {
        let payload = r#"
        {
            "op": "UPDATE",
            "conductor_id": "5f0c3f38-3a8e-4d0e-9d55-1f2b8a2f6c10",
            "record": {
                "conductor_id": "5f0c3f38-3a8e-4d0e-9d55-1f2b8a2f6c10",
                "is_active": true,
                "latitude": 37.7251,
                "longitude": -8.7831,
                "accuracy": 6.5,
                "is_available": true,
                "status": "on_tour",
                "updated_at": "2026-03-14T10:15:02.481+00:00",
                "last_ping": null
            }
        }
        "#;

        let event: ChangeEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.op, ChangeOp::Update);
        let record = event.record.unwrap();
        assert_eq!(record.latitude, Some(37.7251));
        assert!(record.updated_at.is_some());
        assert!(record.last_ping.is_none());
    }

    #[test]
    fn test_parse_delete_without_record() {
        let payload = r#"{"op":"DELETE","conductor_id":"5f0c3f38-3a8e-4d0e-9d55-1f2b8a2f6c10"}"#;
        let event: ChangeEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.op, ChangeOp::Delete);
        assert!(event.record.is_none());
    }
}

use serde::{Deserialize, Serialize};

pub mod timestamp;

pub use timestamp::Timestamp;

/// A user-owned task record as it appears on the wire.
///
/// `owner_id` is assigned from the authenticated caller at creation
/// and never accepted from request input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub completed: bool,
    pub owner_id: String,
    pub created_at: Timestamp,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "timestamp::lenient_option"
    )]
    pub updated_at: Option<Timestamp>,
}

/// Validates a task title and returns the trimmed value that is
/// stored. Titles that are empty after trimming are rejected.
pub fn validate_title(raw: &str) -> Result<String, &'static str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("title must be non-empty after trimming");
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_title_trims_surrounding_whitespace() {
        assert_eq!(validate_title("  Buy milk  ").unwrap(), "Buy milk");
        assert_eq!(validate_title("Buy milk").unwrap(), "Buy milk");
    }

    #[test]
    fn validate_title_rejects_whitespace_only() {
        assert!(validate_title("").is_err());
        assert!(validate_title("   ").is_err());
        assert!(validate_title("\t\n").is_err());
    }

    #[test]
    fn task_serializes_camel_case_and_omits_absent_updated_at() {
        let task = Task {
            id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            title: "Buy milk".to_string(),
            completed: false,
            owner_id: "u1".to_string(),
            created_at: Timestamp::from_epoch_ms(1_700_000_000_000),
            updated_at: None,
        };

        let value = serde_json::to_value(&task).expect("task should serialize");
        assert_eq!(value["ownerId"], "u1");
        assert_eq!(value["createdAt"]["seconds"], 1_700_000_000_i64);
        assert_eq!(value["createdAt"]["nanoseconds"], 0);
        assert!(value.get("updatedAt").is_none());
    }

    #[test]
    fn task_round_trips_with_updated_at() {
        let task = Task {
            id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            title: "Buy milk".to_string(),
            completed: true,
            owner_id: "u1".to_string(),
            created_at: Timestamp::from_epoch_ms(1_700_000_000_000),
            updated_at: Some(Timestamp::from_epoch_ms(1_700_000_001_500)),
        };

        let json = serde_json::to_string(&task).expect("task should serialize");
        let back: Task = serde_json::from_str(&json).expect("task should deserialize");
        assert_eq!(back, task);
    }

    #[test]
    fn task_deserializes_unknown_updated_at_shape_as_absent() {
        let json = serde_json::json!({
            "id": "t1",
            "title": "Buy milk",
            "completed": false,
            "ownerId": "u1",
            "createdAt": {"seconds": 1, "nanoseconds": 0},
            "updatedAt": {"bogus": true},
        });

        let task: Task = serde_json::from_value(json).expect("task should deserialize");
        assert!(task.updated_at.is_none());
    }
}

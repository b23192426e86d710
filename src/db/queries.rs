macro_rules! active_row_predicate {
    () => {
        "conductor_id = $1 AND is_active = true"
    };
}

/// Shared by every conditional write; `$1` is always the conductor id.
pub const ACTIVE_ROW_PREDICATE: &str = active_row_predicate!();

pub const NOTIFY_CHANNEL: &str = "active_conductors_changes";

pub const UPDATE_POSITION_IF_ACTIVE: &str = concat!(
    r#"
UPDATE active_conductors
SET latitude = $2,
    longitude = $3,
    accuracy = $4,
    updated_at = $5
WHERE "#,
    active_row_predicate!(),
    ";"
);

pub const UPDATE_STATUS_IF_ACTIVE: &str = concat!(
    r#"
UPDATE active_conductors
SET is_available = $2,
    status = $3
WHERE "#,
    active_row_predicate!(),
    ";"
);

pub const TOUCH_PING_IF_ACTIVE: &str = concat!(
    r#"
UPDATE active_conductors
SET last_ping = $2
WHERE "#,
    active_row_predicate!(),
    ";"
);

pub const SELECT_ACTIVE_DIRECTORY: &str = r#"
SELECT a.conductor_id,
       c.name,
       c.whatsapp,
       a.latitude,
       a.longitude,
       a.accuracy,
       a.is_available,
       a.status,
       a.updated_at,
       a.last_ping
FROM active_conductors a
JOIN conductors c ON c.id = a.conductor_id
WHERE a.is_active = true
ORDER BY c.name;
"#;

pub const SELECT_CONDUCTORS: &str = r#"
SELECT id, name, whatsapp, is_active FROM conductors ORDER BY name;
"#;

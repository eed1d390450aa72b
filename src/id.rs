use uuid::Uuid;

/// Fresh record id. v7 keeps ids roughly insertion ordered.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

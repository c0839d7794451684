/// Parent id written by instrumentations for spans without a parent.
pub const ROOT_PARENT_SENTINEL: &str = "0000000000000000";

/// Whether `parent_id` means "no parent": empty, or exactly the 16-zero sentinel.
pub fn is_root_parent(parent_id: &str) -> bool {
    parent_id.is_empty() || parent_id == ROOT_PARENT_SENTINEL
}

/// Trims a raw parent id and maps a missing value to the sentinel.
pub fn normalize_parent_id(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => ROOT_PARENT_SENTINEL.to_string(),
    }
}

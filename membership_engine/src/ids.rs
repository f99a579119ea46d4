/// Membership Engine: Identifier Primitives
///
/// Node ids are ASCII `[a-zA-Z0-9_-]+`. Generated ids are UUID v4.

use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Fresh id for a node created without a caller-supplied one.
pub fn new_node_id() -> String {
    Uuid::new_v4().to_string()
}

/// Validate that a node id matches `[a-zA-Z0-9_-]+`.
pub fn validate_node_id(id: &str) -> Result<()> {
    if id.is_empty() || !id.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-') {
        return Err(EngineError::InvalidInput(format!(
            "node id {:?} must match [a-zA-Z0-9_-]+",
            id
        )));
    }
    Ok(())
}

/// `current + 1`, rejecting u32 overflow.
pub fn checked_next(current: u32) -> Result<u32> {
    current
        .checked_add(1)
        .ok_or_else(|| EngineError::InvalidInput(format!("code number overflow after {}", current)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_node_id_ok() {
        assert!(validate_node_id("pastor_1").is_ok());
        assert!(validate_node_id("A-B_c-3").is_ok());
        assert!(validate_node_id(&new_node_id()).is_ok());
    }

    #[test]
    fn test_validate_node_id_bad() {
        assert!(validate_node_id("").is_err());
        assert!(validate_node_id("id with spaces").is_err());
        assert!(validate_node_id("zone:1").is_err());
    }

    #[test]
    fn test_checked_next() {
        assert_eq!(checked_next(3).unwrap(), 4);
        assert!(checked_next(u32::MAX).is_err());
    }
}

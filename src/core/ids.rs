use chrono::{DateTime, Utc};
use rand::Rng;

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Creation-time id: millisecond timestamp plus a short random suffix so two
/// records created within the same millisecond do not collide.
pub fn new_id() -> String {
    let suffix: u16 = rand::rng().random();
    format!("{}{:04x}", now().timestamp_millis(), suffix)
}

pub fn scene_id(batch: i64, index: usize) -> String {
    format!("{}-{}", batch, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_format_and_uniqueness() {
        let a = new_id();
        let b = new_id();
        assert!(!a.is_empty());
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a.len(), b.len());
        assert_ne!(a, b);
    }

    #[test]
    fn test_scene_id() {
        assert_eq!(scene_id(1700000000000, 3), "1700000000000-3");
    }
}

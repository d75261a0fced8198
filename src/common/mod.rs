//! Common utilities shared between CLI and daemon modes

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

/// Milliseconds since the Unix epoch, saturating at zero for clocks set
/// before 1970
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Split a trailing `:<digits>` suffix off a string.
///
/// Searching from the right keeps Windows paths like `C:\src\main.rs:10`
/// and URIs like `file:///src/main.rs:10` intact.
pub fn split_numeric_suffix(s: &str) -> Option<(&str, u32)> {
    let colon_idx = s.rfind(':')?;
    let (head, tail) = s.split_at(colon_idx);
    let digits = &tail[1..];
    if head.is_empty() || digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|n| (head, n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_numeric_suffix() {
        assert_eq!(split_numeric_suffix("src/main.rs:42"), Some(("src/main.rs", 42)));
        assert_eq!(
            split_numeric_suffix("file:///src/main.rs:7"),
            Some(("file:///src/main.rs", 7))
        );
        assert_eq!(split_numeric_suffix("main"), None);
        assert_eq!(split_numeric_suffix("src/main.rs:"), None);
        assert_eq!(split_numeric_suffix(":12"), None);
    }
}

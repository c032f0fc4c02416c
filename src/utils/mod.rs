use chrono::Local;
use std::path::PathBuf;
use which::which;

use crate::errors::{AppError, Result};

/// Timestamp format shared by working directories and dump files.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Finds a client tool such as `pg_dump` in the system PATH.
pub fn find_executable(program: &str) -> Result<PathBuf> {
    which(program).map_err(|e| AppError::MissingExecutable(program.to_string(), e))
}

pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_fourteen_digits() {
        let ts = timestamp();
        assert_eq!(ts.len(), 14);
        assert!(ts.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn missing_executable_is_reported_by_name() {
        let err = find_executable("definitely-not-a-real-dump-tool").unwrap_err();
        assert!(err.to_string().contains("definitely-not-a-real-dump-tool"));
    }
}

use std::fs;
use std::path::Path;

pub fn exists_or_create_dir(path: &Path) -> Result<(), std::io::Error> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Wall-clock time as fractional seconds since the Unix epoch.
pub fn epoch_seconds() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

/// Renders an argv for log lines.
pub fn display_command(argv: &[String]) -> String {
    argv.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exists_or_create_dir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        exists_or_create_dir(&nested).unwrap();
        exists_or_create_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_epoch_seconds_is_recent() {
        // 2020-01-01
        assert!(epoch_seconds() > 1_577_836_800.0);
    }
}

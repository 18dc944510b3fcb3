//! Collapsed-stack report output
//!
//! One line per distinct stack, `<encoded-stack> <count>`, highest count
//! first, lines joined with `\n` and no trailing newline. Flame graph tools
//! (`flamegraph.pl`, `inferno-flamegraph`) consume this directly.

use std::fs;
use std::path::Path;

use crate::encoder::StackKey;
use crate::error::{Result, SamplerError};

/// Renders and persists frequency reports
pub struct ReportFormatter;

impl ReportFormatter {
    /// Render already-sorted entries
    pub fn render(entries: &[(StackKey, u64)]) -> String {
        entries
            .iter()
            .map(|(key, count)| format!("{} {}", key, count))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Write `text` to `path`, replacing any existing file
    pub fn write_to(path: &Path, text: &str) -> Result<()> {
        fs::write(path, text).map_err(|source| SamplerError::WriteFailure {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::StackEncoder;
    use crate::frame::{Frame, Sample};
    use tempfile::TempDir;

    fn key(function: &str) -> StackKey {
        StackEncoder::encode(&Sample::new(vec![
            Frame::new("app", "main.rs", 3, "main"),
            Frame::new("app", "main.rs", 8, function),
        ]))
        .unwrap()
    }

    #[test]
    fn test_render_lines() {
        let text = ReportFormatter::render(&[(key("hot"), 7), (key("cold"), 2)]);
        assert_eq!(
            text,
            "app:main.rs:3:main;app:main.rs:8:hot 7\napp:main.rs:3:main;app:main.rs:8:cold 2"
        );
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(ReportFormatter::render(&[]), "");
    }

    #[test]
    fn test_write_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.stacks");
        fs::write(&path, "stale contents that are longer than the new report").unwrap();

        ReportFormatter::write_to(&path, "a 1").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a 1");
    }

    #[test]
    fn test_write_to_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("out.stacks");

        let err = ReportFormatter::write_to(&path, "a 1").unwrap_err();
        match err {
            SamplerError::WriteFailure { path: failed, .. } => assert_eq!(failed, path),
            other => panic!("unexpected error: {other}"),
        }
    }
}

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Rewrite `KEY=value` lines in an env file in place.
///
/// Existing keys keep their position, comments and unrelated lines are preserved
/// verbatim, and keys not yet present are appended in the order given.
pub fn upsert_env_vars(env_path: &Path, updates: &[(&str, String)]) -> Result<()> {
    let existing = match fs::read_to_string(env_path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", env_path.display()))
        }
    };

    let mut replaced: HashSet<&str> = HashSet::new();
    let mut out: Vec<String> = Vec::new();
    for line in existing.lines() {
        let s = line.trim();
        if s.is_empty() || s.starts_with('#') || !s.contains('=') {
            out.push(line.to_string());
            continue;
        }
        let key = s.split('=').next().unwrap_or_default().trim();
        match updates.iter().find(|(k, _)| *k == key) {
            Some((k, v)) => {
                out.push(format!("{}={}", k, v));
                replaced.insert(*k);
            }
            None => out.push(line.to_string()),
        }
    }

    for (k, v) in updates {
        if !replaced.contains(k) {
            out.push(format!("{}={}", k, v));
        }
    }

    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).ok();
        }
    }
    fs::write(env_path, out.join("\n") + "\n")
        .with_context(|| format!("failed to write {}", env_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn upsert_preserves_comments_and_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(
            &path,
            "# agent settings\nSUPABASE_URL=https://x\n\nIDE_INPUT_POS=1,2\n# trailing\n",
        )
        .unwrap();

        upsert_env_vars(
            &path,
            &[
                ("IDE_INPUT_REGION", "10,20,300,40".to_string()),
                ("IDE_INPUT_POS", "160,40".to_string()),
            ],
        )
        .unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "# agent settings\nSUPABASE_URL=https://x\n\nIDE_INPUT_POS=160,40\n# trailing\nIDE_INPUT_REGION=10,20,300,40\n"
        );
    }

    #[test]
    fn upsert_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(".env");
        upsert_env_vars(&path, &[("IDE_OUTPUT_POS", "5,6".to_string())]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "IDE_OUTPUT_POS=5,6\n");
    }

    #[test]
    fn upsert_matches_keys_with_spaces_around_equals() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "IDE_OUTPUT_POS = 1,1\n").unwrap();
        upsert_env_vars(&path, &[("IDE_OUTPUT_POS", "9,9".to_string())]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "IDE_OUTPUT_POS=9,9\n");
    }
}

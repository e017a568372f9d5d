//! Class-config and callback-file parsing (§6, §10.3).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{CliError, Result};

/// Mirrors the original `Config` class's `getOptionBlock`/`getAllOptionBlocks`
/// shape: one `[block]` per classfile search root plus arbitrary `key =
/// value` options under it. `roots` is derived from every block's `path`
/// entry rather than kept as a separate top-level list, so the file stays a
/// flat table of blocks.
#[derive(Debug, Deserialize)]
pub struct ClassConfig {
    #[serde(flatten)]
    pub options: HashMap<String, HashMap<String, String>>,
}

impl ClassConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(CliError::Io)?;
        toml::from_str(&text).map_err(|e| CliError::BadConfig(e.to_string()))
    }

    /// Every block's `path` entry, in declaration order, as a class-file
    /// search root.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.options.values().filter_map(|block| block.get("path")).map(PathBuf::from).collect()
    }
}

/// One `class_name method_name+signature` pair from a `--callback` file.
#[derive(Debug, Clone)]
pub struct CallbackEntry {
    pub klass_name: String,
    pub signature: String,
}

/// Parses a newline-delimited `class_name method_name+signature` callback
/// file. Not structured enough to warrant `serde`; blank lines and `#`
/// comments are skipped.
pub fn load_callbacks(path: &Path) -> Result<Vec<CallbackEntry>> {
    let text = std::fs::read_to_string(path).map_err(CliError::Io)?;
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, char::is_whitespace);
        let klass_name = parts.next().unwrap_or_default().to_string();
        let signature = parts.next().unwrap_or_default().trim().to_string();
        if klass_name.is_empty() || signature.is_empty() {
            return Err(CliError::BadConfig(format!("malformed callback line: {line}")));
        }
        out.push(CallbackEntry { klass_name, signature });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_config_collects_roots_from_every_block() {
        let toml = r#"
            [main]
            path = "classes"
            other = "1"

            [lib]
            path = "libs"
        "#;
        let config: ClassConfig = toml::from_str(toml).unwrap();
        let mut roots = config.roots();
        roots.sort();
        assert_eq!(roots, vec![PathBuf::from("classes"), PathBuf::from("libs")]);
    }

    #[test]
    fn callback_file_skips_blank_lines_and_comments() {
        let dir = std::env::temp_dir().join(format!("jportal-cli-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("callbacks.txt");
        std::fs::write(&path, "# comment\n\ncom/example/A a()V\ncom/example/B b(I)V\n").unwrap();

        let entries = load_callbacks(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].klass_name, "com/example/A");
        assert_eq!(entries[0].signature, "a()V");

        std::fs::remove_file(&path).unwrap();
        std::fs::remove_dir(&dir).unwrap();
    }

    #[test]
    fn malformed_callback_line_is_rejected() {
        let dir = std::env::temp_dir().join(format!("jportal-cli-test-malformed-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("callbacks.txt");
        std::fs::write(&path, "com/example/A\n").unwrap();

        assert!(load_callbacks(&path).is_err());

        std::fs::remove_file(&path).unwrap();
        std::fs::remove_dir(&dir).unwrap();
    }
}

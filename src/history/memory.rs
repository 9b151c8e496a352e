//! Forever memory: externally authored, read-only context notes.
//!
//! One free-form note per line. Loaded lazily on first use, cached for the
//! process lifetime, never written and never invalidated.

use std::fs;
use std::path::PathBuf;

use once_cell::sync::OnceCell;

/// Read-only note source for the reply generator.
pub struct ForeverMemory {
    path: PathBuf,
    cell: OnceCell<String>,
}

impl ForeverMemory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cell: OnceCell::new(),
        }
    }

    /// Full memory text. A missing or unreadable file reads as empty.
    pub fn get(&self) -> &str {
        self.cell.get_or_init(|| match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "no forever memory loaded");
                String::new()
            }
        })
    }

    /// Non-blank note lines.
    pub fn notes(&self) -> Vec<&str> {
        self.get()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use uuid::Uuid;

    #[test]
    fn test_missing_file_reads_empty() {
        let memory = ForeverMemory::new(env::temp_dir().join(format!("nope_{}.txt", Uuid::new_v4())));
        assert_eq!(memory.get(), "");
        assert!(memory.notes().is_empty());
    }

    #[test]
    fn test_loaded_once_and_cached() {
        let path = env::temp_dir().join(format!("chat_copilot_memory_{}.txt", Uuid::new_v4()));
        fs::write(&path, "主人叫小明\n\n回复要简短\n").unwrap();

        let memory = ForeverMemory::new(&path);
        assert_eq!(memory.notes(), vec!["主人叫小明", "回复要简短"]);

        // A later file change is invisible: the first read is cached forever.
        fs::write(&path, "changed").unwrap();
        assert_eq!(memory.notes(), vec!["主人叫小明", "回复要简短"]);

        let _ = fs::remove_file(&path);
    }
}

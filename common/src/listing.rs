use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Sub-directories of `parent`, sorted by name. Entries whose name starts
/// with a dot are skipped unless `include_hidden` is set. Symlinks to
/// directories count as directories; broken links are skipped.
pub fn list_dirs(parent: &Path, include_hidden: bool) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        if !include_hidden && entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

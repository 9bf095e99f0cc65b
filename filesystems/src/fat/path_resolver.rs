// Slash-separated paths on top of single-directory lookups

use fatvol_core::{BlockDevice, FatError, VolumeConfig};

use super::dir_ops::Entry;
use super::volume::FileSystem;

/// Non-empty components of `path`; `/` and `\` both separate, `.` is
/// dropped
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\']).filter(|c| !c.is_empty() && *c != ".")
}

/// Split into parent path and final component. The parent is empty for
/// entries directly in the root.
pub fn split_parent(path: &str) -> (&str, &str) {
    let path = path.trim_end_matches(['/', '\\']);
    match path.rfind(['/', '\\']) {
        Some(at) => (&path[..at], &path[at + 1..]),
        None => ("", path),
    }
}

impl<D: BlockDevice, C: VolumeConfig> FileSystem<D, C> {
    /// Resolve a path from the root. `Ok(None)` is the root itself.
    pub fn open_path(&mut self, path: &str) -> Result<Option<Entry>, FatError> {
        let mut current: Option<Entry> = None;
        for component in components(path) {
            current = Some(self.lookup(current.as_ref(), component)?);
        }
        Ok(current)
    }

    /// Resolve the parent directory of `path` and return it with the final
    /// component
    pub fn open_parent<'p>(&mut self, path: &'p str) -> Result<(Option<Entry>, &'p str), FatError> {
        let (parent, name) = split_parent(path);
        let parent = self.open_path(parent)?;
        if parent.as_ref().is_some_and(|p| !p.is_dir()) {
            return Err(FatError::NotADirectory);
        }
        Ok((parent, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::dir_ops::EntryKind;
    use crate::fat::format::make;
    use fatvol_core::{DefaultConfig, FormatOptions, MemoryDevice};

    #[test]
    fn test_components() {
        let parts: Vec<_> = components("/a//b\\./c/").collect();
        assert_eq!(parts, vec!["a", "b", "c"]);
        assert_eq!(split_parent("/docs/readme.txt"), ("/docs", "readme.txt"));
        assert_eq!(split_parent("top.txt"), ("", "top.txt"));
        assert_eq!(split_parent("/a/b/"), ("/a", "b"));
    }

    #[test]
    fn test_open_nested_path() {
        let mut dev = MemoryDevice::new(2880, 512);
        make::<DefaultConfig, _>(&mut dev, &FormatOptions::new([0; 4])).unwrap();
        let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
        let docs = fs.create_entry(None, "docs", EntryKind::Directory).unwrap();
        let notes = fs.create_entry(Some(&docs), "Notes", EntryKind::Directory).unwrap();
        fs.create_entry(Some(&notes), "todo.txt", EntryKind::File { size: 0 }).unwrap();

        assert!(fs.open_path("/").unwrap().is_none());
        let found = fs.open_path("/DOCS/notes/TODO.TXT").unwrap().unwrap();
        assert_eq!(found.name(), "todo.txt");
        assert!(matches!(fs.open_path("/docs/missing"), Err(FatError::NotFound)));
        assert!(matches!(
            fs.open_path("/docs/notes/todo.txt/deeper"),
            Err(FatError::NotADirectory)
        ));

        let (parent, name) = fs.open_parent("docs/Notes/new.txt").unwrap();
        assert_eq!(parent.unwrap().first_cluster(), notes.first_cluster());
        assert_eq!(name, "new.txt");
    }
}

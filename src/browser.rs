//! Directory listing for the shell's file pane.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::toolchain::is_c_source;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
}

impl Entry {
    pub fn is_debuggable(&self) -> bool {
        !self.is_dir && is_c_source(&self.path)
    }
}

#[derive(Clone, Debug)]
pub struct FileBrowser {
    cwd: PathBuf,
    entries: Vec<Entry>,
    selected: Option<usize>,
}

impl FileBrowser {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let mut browser = Self {
            cwd: dir.into(),
            entries: Vec::new(),
            selected: None,
        };
        browser.refresh()?;
        Ok(browser)
    }

    /// Re-reads the directory: hidden entries skipped, directories first,
    /// then by name.
    pub fn refresh(&mut self) -> io::Result<()> {
        let mut entries = Vec::new();
        for item in fs::read_dir(&self.cwd)? {
            let item = item?;
            let name = item.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let path = item.path();
            // Follows symlinks, unlike DirEntry::file_type.
            let is_dir = path.is_dir();
            entries.push(Entry { name, path, is_dir });
        }
        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
        self.entries = entries;
        self.selected = None;
        Ok(())
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn selected(&self) -> Option<&Entry> {
        self.selected.and_then(|i| self.entries.get(i))
    }

    pub fn select(&mut self, index: usize) {
        if index < self.entries.len() {
            self.selected = Some(index);
        }
    }

    /// Enters the directory at `index`. Files are selected instead.
    pub fn activate(&mut self, index: usize) -> io::Result<()> {
        let Some(entry) = self.entries.get(index) else {
            return Ok(());
        };
        if entry.is_dir {
            self.cwd = entry.path.clone();
            self.refresh()
        } else {
            self.selected = Some(index);
            Ok(())
        }
    }

    pub fn parent(&mut self) -> io::Result<()> {
        if let Some(parent) = self.cwd.parent() {
            self.cwd = parent.to_path_buf();
            self.refresh()?;
        }
        Ok(())
    }
}

//! Capability-based filesystem helpers for harvest artefacts.
//!
//! Page bodies are written into a scratch directory opened once with ambient
//! authority; every later access goes through the directory handle, so page
//! names can never escape it.
#![forbid(unsafe_code)]

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use std::io;
use std::path::Component;

/// Extension of page artefacts.
pub const PAGE_EXTENSION: &str = "geojson";

/// File name of the page artefact for window `sequence` of harvest `stem`.
///
/// ```
/// assert_eq!(harvest_fs::page_file_name("ws_layer", 3), "ws_layer_part3.geojson");
/// ```
#[must_use]
pub fn page_file_name(stem: &str, sequence: u64) -> String {
    format!("{stem}_part{sequence}.{PAGE_EXTENSION}")
}

/// Directory holding the raw page bodies of one harvest.
#[derive(Debug)]
pub struct ScratchDir {
    path: Utf8PathBuf,
    dir: fs_utf8::Dir,
}

impl ScratchDir {
    /// Create `path` (and missing parents) and open it.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while creating or opening the directory.
    pub fn create(path: &Utf8Path) -> io::Result<Self> {
        ensure_dir(path)?;
        let dir = fs_utf8::Dir::open_ambient_dir(path, ambient_authority())?;
        Ok(Self {
            path: path.to_path_buf(),
            dir,
        })
    }

    /// Path the directory was opened at.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Write `contents` to `name`, replacing any previous artefact.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised by the write.
    pub fn write(&self, name: &str, contents: &[u8]) -> io::Result<Utf8PathBuf> {
        self.dir.write(name, contents)?;
        Ok(self.path.join(name))
    }

    /// Read the artefact `name`.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised by the read, including a missing file.
    pub fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        self.dir.read(name)
    }

    /// Names of the regular files in the directory, sorted.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while listing the directory.
    pub fn list(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in self.dir.entries()? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name()?);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete the directory and everything in it.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while removing the tree.
    pub fn remove(self) -> io::Result<()> {
        let Self { path, dir } = self;
        drop(dir);
        let (base, relative) = base_dir_and_relative(&path)?;
        if relative.as_os_str().is_empty() {
            return Err(io::Error::other(format!(
                "refusing to remove filesystem root `{path}`"
            )));
        }
        base.remove_dir_all(&relative)
    }
}

/// Read a whole UTF-8 text file.
///
/// # Errors
///
/// Returns any I/O error raised while opening or reading, including invalid
/// UTF-8 content.
pub fn read_to_string(path: &Utf8Path) -> io::Result<String> {
    let (base, relative) = base_dir_and_relative(path)?;
    base.read_to_string(&relative)
}

/// Write `contents` to `path`, creating parent directories first.
///
/// # Errors
///
/// Returns any I/O error raised while creating directories or writing.
pub fn write_file(path: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    ensure_parent_dir(path)?;
    let (base, relative) = base_dir_and_relative(path)?;
    base.write(&relative, contents)
}

/// Ensure `path` exists as a directory, creating missing components.
///
/// # Errors
///
/// Returns any I/O error raised while creating directories.
pub fn ensure_dir(path: &Utf8Path) -> io::Result<()> {
    if path.as_str().is_empty() {
        return Ok(());
    }
    let (base_dir, relative) = base_dir_and_relative(path)?;
    if relative.as_os_str().is_empty() {
        return Ok(());
    }
    base_dir.create_dir_all(&relative)
}

/// Ensure the parent directory of the file at `path` exists.
///
/// # Errors
///
/// Returns any I/O error raised while creating directories.
pub fn ensure_parent_dir(path: &Utf8Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}

/// Split a path into an ambient base directory and a relative suffix, so
/// absolute paths can be handled through cap-std.
///
/// # Errors
///
/// Returns an error for non-UTF-8 prefixes or when the base cannot be opened.
pub fn base_dir_and_relative(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let std_path = path.as_std_path();

    let (base, relative) = match std_path.components().next() {
        // Windows absolute path with a drive or UNC prefix.
        Some(Component::Prefix(prefix)) => {
            let prefix_str = prefix
                .as_os_str()
                .to_str()
                .ok_or_else(|| io::Error::other("non-UTF-8 path prefix"))?;
            let base = Utf8PathBuf::from(prefix_str).join(std::path::MAIN_SEPARATOR.to_string());
            let relative = std_path
                .strip_prefix(base.as_std_path())
                .or_else(|_| std_path.strip_prefix(prefix.as_os_str()))
                .map_err(|_| io::Error::other("failed to strip prefix from path"))?
                .to_path_buf();
            (base, relative)
        }
        Some(Component::RootDir) => {
            let base = Utf8PathBuf::from(std::path::MAIN_SEPARATOR.to_string());
            let relative = std_path
                .strip_prefix(base.as_std_path())
                .map_err(|_| io::Error::other("failed to strip root from absolute path"))?
                .to_path_buf();
            (base, relative)
        }
        _ => (Utf8PathBuf::from("."), std_path.to_path_buf()),
    };

    let dir = fs_utf8::Dir::open_ambient_dir(&base, ambient_authority())?;
    let relative =
        Utf8PathBuf::from_path_buf(relative).map_err(|_| io::Error::other("non-UTF-8 path"))?;
    Ok((dir, relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn root() -> (TempDir, Utf8PathBuf) {
        let temp = TempDir::new().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf-8 temp path");
        (temp, path)
    }

    #[rstest]
    fn creates_nested_scratch_and_lists_pages(root: (TempDir, Utf8PathBuf)) {
        let (_guard, base) = root;
        let scratch = ScratchDir::create(&base.join("results/run")).expect("create scratch");
        scratch
            .write(&page_file_name("h", 2), b"{}")
            .expect("write page 2");
        let written = scratch
            .write(&page_file_name("h", 1), b"[]")
            .expect("write page 1");
        assert_eq!(written, base.join("results/run/h_part1.geojson"));
        assert_eq!(
            scratch.list().expect("list"),
            ["h_part1.geojson", "h_part2.geojson"]
        );
        assert_eq!(scratch.read("h_part1.geojson").expect("read"), b"[]");
    }

    #[rstest]
    fn remove_deletes_the_tree(root: (TempDir, Utf8PathBuf)) {
        let (_guard, base) = root;
        let path = base.join("scratch");
        let scratch = ScratchDir::create(&path).expect("create scratch");
        scratch.write("a.geojson", b"{}").expect("write");
        scratch.remove().expect("remove");
        assert!(!path.exists());
    }

    #[rstest]
    fn escaping_names_are_rejected(root: (TempDir, Utf8PathBuf)) {
        let (_guard, base) = root;
        let scratch = ScratchDir::create(&base.join("inner")).expect("create scratch");
        assert!(scratch.write("../outside.geojson", b"{}").is_err());
        assert!(!base.join("outside.geojson").exists());
    }

    #[rstest]
    fn ensure_parent_dir_creates_missing_components(root: (TempDir, Utf8PathBuf)) {
        let (_guard, base) = root;
        let db = base.join("data/nested/harvest.db");
        ensure_parent_dir(&db).expect("create parents");
        assert!(base.join("data/nested").is_dir());
    }

    #[rstest]
    fn text_files_round_trip_through_new_directories(root: (TempDir, Utf8PathBuf)) {
        let (_guard, base) = root;
        let path = base.join("catalog/wfs_info.json");
        write_file(&path, b"{\"ws\": {}}").expect("write catalog");
        assert_eq!(read_to_string(&path).expect("read catalog"), "{\"ws\": {}}");
    }
}

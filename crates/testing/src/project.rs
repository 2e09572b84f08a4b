use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A throwaway Python project rooted in a temporary directory.
///
/// Files are addressed by project-relative paths with forward slashes;
/// parent directories are created on demand. The directory is removed when
/// the fixture drops.
pub struct PythonProject {
    dir: TempDir,
}

impl PythonProject {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create fixture directory"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path for a project-relative file.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Write a file, creating parent directories as needed.
    pub fn add_file(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create fixture directories");
        }
        fs::write(&path, contents).expect("failed to write fixture file");
        path
    }

    /// Rewrite a file with new contents and push its mtime forward, so
    /// staleness checks see the change even on coarse-timestamp
    /// filesystems.
    pub fn rewrite_file(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.add_file(relative, contents);
        let file = fs::File::options()
            .write(true)
            .open(&path)
            .expect("failed to open fixture file");
        file.set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(5))
            .expect("failed to bump fixture mtime");
        path
    }

    pub fn remove_file(&self, relative: &str) {
        fs::remove_file(self.path(relative)).expect("failed to remove fixture file");
    }
}

impl Default for PythonProject {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_files_are_created() {
        let project = PythonProject::new();
        let path = project.add_file("pkg/sub/mod.py", "x = 1\n");
        assert!(path.is_file());
        assert_eq!(fs::read_to_string(path).unwrap(), "x = 1\n");
    }

    #[test]
    fn test_rewrite_bumps_mtime() {
        let project = PythonProject::new();
        let path = project.add_file("a.py", "x = 1\n");
        let before = fs::metadata(&path).unwrap().modified().unwrap();
        project.rewrite_file("a.py", "x = 2\n");
        let after = fs::metadata(&path).unwrap().modified().unwrap();
        assert!(after > before);
    }
}

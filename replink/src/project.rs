//! Named script projects on local storage.
//!
//! A project is a directory under the store root whose entry point is
//! `main.py`; directories without one are ignored. There is no index file:
//! the filesystem is the source of truth, and timestamps come from file
//! metadata.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, info};

use crate::error::{Error, Result};

/// Entry-point file every project must have.
pub const MAIN_FILE: &str = "main.py";

/// Program seeded into a freshly created project.
const DEFAULT_MAIN: &str = r"# New replink project.
#
# This program runs when the project is uploaded to the board.

from machine import Pin
import time

led = Pin(2, Pin.OUT)

while True:
    led.value(not led.value())
    time.sleep(0.5)
";

/// A stored script project.
#[derive(Debug, Clone)]
pub struct Project {
    /// Project name (its directory name under the store root).
    pub name: String,
    /// Absolute path of the project directory.
    pub path: PathBuf,
    /// Last modification time of the entry point, if readable.
    pub modified: Option<SystemTime>,
}

/// A file belonging to a project.
#[derive(Debug, Clone)]
pub struct ProjectFile {
    /// File name within the project directory.
    pub name: String,
    /// File content.
    pub content: String,
    /// Whether this is the entry point.
    pub is_main: bool,
}

/// Filesystem-backed store of script projects.
pub struct ProjectStore {
    root: PathBuf,
}

impl ProjectStore {
    /// Create a store rooted at the given directory. The directory is
    /// created lazily on the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a project, seeding its entry point with a starter program.
    ///
    /// Creating a name that already exists is not an error; an existing
    /// entry point is left untouched.
    pub fn create(&self, name: &str) -> Result<Project> {
        validate_name(name, "project")?;

        let dir = self.root.join(name);
        fs::create_dir_all(&dir)?;

        let main = dir.join(MAIN_FILE);
        if !main.exists() {
            fs::write(&main, DEFAULT_MAIN)?;
            info!("created project '{name}' at {}", dir.display());
        } else {
            debug!("project '{name}' already exists");
        }

        self.load(name, dir)
    }

    /// List all projects, most recently modified first.
    pub fn list(&self) -> Result<Vec<Project>> {
        let mut projects = Vec::new();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            // A store that was never written to has no projects.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(projects),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if !entry.path().join(MAIN_FILE).exists() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            projects.push(self.load(&name, entry.path())?);
        }

        projects.sort_by(|a, b| b.modified.cmp(&a.modified).then(a.name.cmp(&b.name)));
        Ok(projects)
    }

    /// Look up a project by name.
    pub fn get(&self, name: &str) -> Result<Project> {
        validate_name(name, "project")?;
        let dir = self.root.join(name);
        if !dir.join(MAIN_FILE).exists() {
            return Err(Error::Project(format!("no such project: {name}")));
        }
        self.load(name, dir)
    }

    /// Write a file into a project.
    pub fn save_file(&self, name: &str, file_name: &str, content: &str) -> Result<()> {
        validate_name(file_name, "file")?;
        let project = self.get(name)?;
        fs::write(project.path.join(file_name), content)?;
        debug!("saved {file_name} in project '{name}'");
        Ok(())
    }

    /// Read a file from a project.
    pub fn read_file(&self, name: &str, file_name: &str) -> Result<String> {
        validate_name(file_name, "file")?;
        let project = self.get(name)?;
        let path = project.path.join(file_name);
        fs::read_to_string(&path)
            .map_err(|_| Error::Project(format!("no file {file_name} in project {name}")))
    }

    /// Read the entry-point program of a project.
    pub fn main_content(&self, name: &str) -> Result<String> {
        self.read_file(name, MAIN_FILE)
    }

    /// Enumerate a project's Python files, entry point first, then
    /// alphabetically.
    pub fn files(&self, name: &str) -> Result<Vec<ProjectFile>> {
        let project = self.get(name)?;
        let mut files = Vec::new();

        for entry in fs::read_dir(&project.path)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("py") {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            files.push(ProjectFile {
                is_main: file_name == MAIN_FILE,
                content: fs::read_to_string(&path)?,
                name: file_name,
            });
        }

        files.sort_by(|a, b| b.is_main.cmp(&a.is_main).then(a.name.cmp(&b.name)));
        Ok(files)
    }

    /// Delete a project and everything in it.
    pub fn delete(&self, name: &str) -> Result<()> {
        let project = self.get(name)?;
        fs::remove_dir_all(&project.path)?;
        info!("deleted project '{name}'");
        Ok(())
    }

    fn load(&self, name: &str, dir: PathBuf) -> Result<Project> {
        let modified = fs::metadata(dir.join(MAIN_FILE))
            .and_then(|m| m.modified())
            .ok();
        Ok(Project {
            name: name.to_string(),
            path: dir,
            modified,
        })
    }
}

/// Reject names that would escape the store root or collide with path
/// machinery.
fn validate_name(name: &str, what: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(Error::Project(format!("invalid {what} name: {name:?}")));
    }
    Ok(())
}

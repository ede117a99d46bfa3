//! Test in a mock environment

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use gypsum::world::{CommandResult, World};

/// A mock [`World`] implementation that works entirely in-memory: a
/// file table, canned command outputs, and a log of executed commands.
pub struct MockWorld {
    inner: Mutex<MockWorldInner>,
}

struct MockWorldInner {
    files: HashMap<PathBuf, String>,
    commands: HashMap<String, CommandResult>,
    exec_log: Vec<String>,
    written: Vec<PathBuf>,
}

impl World for MockWorld {
    fn exists(&self, path: &Path) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.files.contains_key(path)
    }

    fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"))
    }

    fn write_file(&self, path: &Path, contents: &str) -> std::io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.files.insert(path.to_owned(), contents.to_owned());
        inner.written.push(path.to_owned());
        Ok(())
    }

    fn create_dir_all(&self, _path: &Path) -> std::io::Result<()> {
        Ok(())
    }

    fn run_command(&self, _cwd: &Path, command: &str) -> std::io::Result<CommandResult> {
        let mut inner = self.inner.lock().unwrap();
        inner.exec_log.push(command.to_owned());
        Ok(inner.commands.get(command).cloned().unwrap_or(CommandResult {
            status: 127,
            stdout: String::new(),
            stderr: format!("mock: unknown command: {command}"),
        }))
    }
}

#[allow(unused)]
impl MockWorld {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockWorldInner {
                files: HashMap::new(),
                commands: HashMap::new(),
                exec_log: Vec::new(),
                written: Vec::new(),
            }),
        }
    }

    /// Seed a file.
    pub fn add_file(&self, path: impl AsRef<Path>, contents: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .files
            .insert(path.as_ref().to_owned(), contents.to_owned());
    }

    /// Script the stdout of a command substitution.
    pub fn add_command(&self, command: &str, stdout: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.insert(
            command.to_owned(),
            CommandResult {
                status: 0,
                stdout: stdout.to_owned(),
                stderr: String::new(),
            },
        );
    }

    /// Contents of a file, if present (seeded or generated).
    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.files.get(path.as_ref()).cloned()
    }

    /// Every path written by the generator, in write order.
    pub fn written(&self) -> Vec<PathBuf> {
        let inner = self.inner.lock().unwrap();
        inner.written.clone()
    }

    /// Take and clear the command execution log.
    pub fn take_log(&self) -> Vec<String> {
        let mut inner = self.inner.lock().unwrap();
        std::mem::take(&mut inner.exec_log)
    }
}

impl Default for MockWorld {
    fn default() -> Self {
        Self::new()
    }
}

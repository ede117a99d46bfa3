use std::path::Path;
use std::process::Command;

/// A trait that abstracts over how the generator interacts with the
/// outside world.
///
/// All file and process operations go through this trait: the loader
/// reads build descriptions, the expression engine spawns command
/// substitutions, and the emitters write the generated build files. You
/// may implement this trait to customize the view of the world as seen
/// by the generator; the tests use an in-memory implementation so a
/// whole generation run touches no disk.
///
/// A default implementation is available at [`LocalWorld`].
pub trait World: Send + Sync {
    /// Test whether a file exists.
    fn exists(&self, path: &Path) -> bool;

    /// Read a file into a string.
    fn read_to_string(&self, path: &Path) -> std::io::Result<String>;

    /// Write a file, replacing any previous contents.
    fn write_file(&self, path: &Path, contents: &str) -> std::io::Result<()>;

    /// Create a directory and all of its parents. Idempotent.
    fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;

    /// Run `command` through a shell with `cwd` as working directory,
    /// wait for it to exit, and capture its output. No timeout is
    /// imposed; the child inherits the generator's lifetime.
    fn run_command(&self, cwd: &Path, command: &str) -> std::io::Result<CommandResult>;
}

/// The captured outcome of a command substitution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status; non-zero aborts the expansion that spawned it.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// The default implementation of [`World`], which interacts with the
/// local filesystem and spawns local processes.
pub struct LocalWorld;
pub static LOCAL_WORLD: LocalWorld = LocalWorld;

impl World for LocalWorld {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn write_file(&self, path: &Path, contents: &str) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, contents)
    }

    fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn run_command(&self, cwd: &Path, command: &str) -> std::io::Result<CommandResult> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .output()?;
        Ok(CommandResult {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

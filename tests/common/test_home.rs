use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};

/// Creates a lockyard home under target/home with a random 8-character name.
/// The directory is removed when the guard is dropped.
pub struct TestHomeGuard {
    path: PathBuf,
}

impl TestHomeGuard {
    pub fn new() -> Self {
        let random_name: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();

        let path = PathBuf::from("target/home").join(random_name);
        fs::create_dir_all(&path).expect("Failed to create test home directory");

        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lockyard_home(&self) -> PathBuf {
        self.path.join(".lockyard")
    }

    /// Writes `lockyard.toml` into the lockyard home.
    pub fn write_config(&self, contents: &str) -> &Self {
        let home = self.lockyard_home();
        fs::create_dir_all(&home).expect("Failed to create .lockyard directory");
        fs::write(home.join("lockyard.toml"), contents).expect("Failed to write lockyard.toml");
        self
    }
}

impl Drop for TestHomeGuard {
    fn drop(&mut self) {
        if self.path.exists() {
            fs::remove_dir_all(&self.path).unwrap_or_else(|e| {
                eprintln!(
                    "Failed to cleanup test directory {}: {}",
                    self.path.display(),
                    e
                );
            });
        }
    }
}

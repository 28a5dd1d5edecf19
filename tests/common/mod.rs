//! Common test utilities for sari integration tests.
//!
//! Provides `TestEnv` for setting up isolated workspaces with database,
//! search service, and indexer all wired together against a real temp
//! directory (the indexer walks the filesystem, so unlike the unit tests
//! colocated with each module, these exercise the full scan path).

#![allow(dead_code)] // Test utilities may not all be used in every test file

use sari::config::Config;
use sari::db::Database;
use sari::services::{Indexer, SearchService};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

/// A complete test environment with all services wired together.
pub struct TestEnv {
    pub dir: TempDir,
    pub db: Arc<Database>,
    pub search: Arc<SearchService>,
}

impl TestEnv {
    /// Creates a new empty test environment.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp directory");
        let db = Arc::new(Database::in_memory().expect("failed to create in-memory database"));
        let search = Arc::new(SearchService::new(Arc::clone(&db)));

        Self { dir, db, search }
    }

    /// Creates an indexer for this environment, using default `Config`.
    pub fn indexer(&self) -> Indexer {
        Indexer::new(Arc::clone(&self.db), self.dir.path().to_path_buf(), Config::default())
    }

    /// Writes a file to the test directory.
    pub fn write_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent directories");
        }
        fs::write(&path, content).expect("failed to write test file");
    }

    /// Indexes all files in the test directory.
    pub fn index_all(&self) {
        let indexer = self.indexer();
        indexer.scan(None).expect("failed to index files");
    }

    /// Gets the full path to a file in the test directory.
    pub fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates a test environment with pre-populated Rust source files.
pub fn rust_codebase() -> TestEnv {
    let env = TestEnv::new();

    env.write_file(
        "main.rs",
        r#"fn main() {
    let config = Config::load();
    let result = authenticate(&config);
    println!("{:?}", result);
}
"#,
    );

    env.write_file(
        "auth.rs",
        r#"use crate::config::Config;
use crate::error::AuthError;

/// Authenticates a user with the given configuration.
pub fn authenticate(config: &Config) -> Result<User, AuthError> {
    let credentials = config.credentials();
    validate_credentials(&credentials)?;
    Ok(User::new("authenticated_user"))
}

fn validate_credentials(creds: &Credentials) -> Result<(), AuthError> {
    if creds.is_valid() {
        Ok(())
    } else {
        Err(AuthError::InvalidCredentials)
    }
}

pub struct User {
    username: String,
}

impl User {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
        }
    }
}
"#,
    );

    env.write_file(
        "config.rs",
        r#"/// Application configuration.
pub struct Config {
    api_key: String,
    timeout: u64,
}

impl Config {
    pub fn load() -> Self {
        Self {
            api_key: std::env::var("API_KEY").unwrap_or_default(),
            timeout: 30,
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            api_key: self.api_key.clone(),
        }
    }
}

pub struct Credentials {
    pub api_key: String,
}

impl Credentials {
    pub fn is_valid(&self) -> bool {
        !self.api_key.is_empty()
    }
}
"#,
    );

    env.write_file(
        "error.rs",
        r#"use std::fmt;

#[derive(Debug)]
pub enum AuthError {
    InvalidCredentials,
    Timeout,
    NetworkError(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "Invalid credentials"),
            Self::Timeout => write!(f, "Authentication timed out"),
            Self::NetworkError(msg) => write!(f, "Network error: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}
"#,
    );

    env.write_file(
        "lib.rs",
        r#"//! A sample library for testing.

mod auth;
mod config;
mod error;

pub use auth::{authenticate, User};
pub use config::Config;
pub use error::AuthError;
"#,
    );

    env
}

/// Creates a test environment with files containing specific patterns.
pub fn pattern_test_codebase() -> TestEnv {
    let env = TestEnv::new();

    env.write_file(
        "many_matches.rs",
        r#"fn foo() { println!("foo"); }
fn bar() { println!("foo"); }
fn baz() { println!("foo"); }
fn qux() { println!("foo"); }
fn quux() { println!("foo"); }
"#,
    );

    env.write_file("single_match.rs", "fn main() { println!(\"foo\"); }\n");
    env.write_file("no_match.rs", "fn main() { println!(\"bar\"); }\n");

    env.write_file(
        "unicode.rs",
        r#"fn greet_chinese() {
    println!("\u{4f60}\u{597d}\u{4e16}\u{754c}"); // Hello World
}

fn greet_emoji() {
    println!("\u{1F44B} Hello!"); // Wave emoji
}
"#,
    );

    env.write_file("src/nested/deep.rs", "pub fn deep_function() {}\n");
    env.write_file("src/nested/deeper/very_deep.rs", "pub fn very_deep_function() {}\n");

    env
}

/// Creates a minimal test environment with just one file.
pub fn minimal_codebase() -> TestEnv {
    let env = TestEnv::new();
    env.write_file("test.rs", "fn main() {}\n");
    env
}

/// Asserts that search hits contain a file whose path ends with `filename`.
pub fn assert_results_contain(hits: &[sari::services::SearchHit], filename: &str) {
    let found = hits.iter().any(|h| h.path.ends_with(filename));
    assert!(found, "expected hits to contain '{filename}', but got: {:?}", hits.iter().map(|h| &h.path).collect::<Vec<_>>());
}

/// Asserts that search hits do NOT contain a file whose path ends with `filename`.
pub fn assert_results_not_contain(hits: &[sari::services::SearchHit], filename: &str) {
    let found = hits.iter().any(|h| h.path.ends_with(filename));
    assert!(!found, "expected hits NOT to contain '{filename}', but it was found");
}

//! Shared test infrastructure for CLI integration tests.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Isolated working directory with a config, an items file, and a status file.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    /// Create a workspace with a default config and the given items.
    pub fn new(items: &Value) -> Self {
        let workspace = Self {
            dir: TempDir::new().expect("tempdir"),
        };
        let init = workspace.run(&["init", "--path", "stagerun.json"]);
        assert!(init.status.success(), "init failed: {}", stderr(&init));
        fs::write(
            workspace.items_path(),
            serde_json::to_vec_pretty(items).expect("serialize items"),
        )
        .expect("write items");
        workspace
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn items_path(&self) -> PathBuf {
        self.path().join("items.json")
    }

    pub fn status_path(&self) -> PathBuf {
        self.path().join("status.json")
    }

    /// Run the binary inside the workspace with config discovery pinned to it.
    pub fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_stagerun"))
            .args(args)
            .current_dir(self.path())
            .env_remove("STAGERUN_CONFIG")
            .env("XDG_CONFIG_HOME", self.path())
            .env("RUST_LOG", "warn")
            .output()
            .expect("spawn stagerun")
    }

    /// `run` over the items file with a fast, non-retrying policy.
    pub fn run_stage(&self, stage: &str, command: &str, extra: &[&str]) -> Output {
        let items = self.items_path();
        let items = items.to_str().expect("utf-8 temp path");
        let mut args = vec![
            "run",
            "--items",
            items,
            "--stage",
            stage,
            "--command",
            command,
            "--max-retries",
            "0",
            "--retry-delay",
            "0",
        ];
        args.extend_from_slice(extra);
        self.run(&args)
    }

    pub fn status_json(&self) -> Value {
        let bytes = fs::read(self.status_path()).expect("read status file");
        serde_json::from_slice(&bytes).expect("parse status file")
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

//! Language dispatch table shared by the local and container executors.

use crate::config::types::LocalExecutorConfig;

/// Stem of the transient source files the executors write. Every call gets
/// its own `code_exec_main-<tag>.<ext>` so concurrent calls never share one.
pub const DRIVER_PREFIX: &str = "code_exec_main";

const DRIVER_EXTENSIONS: &[&str] = &["py", "go", "js", "sh"];

/// Whether `name` is a driver file written by an executor.
pub fn is_driver_file(name: &str) -> bool {
    let Some(rest) = name.strip_prefix(DRIVER_PREFIX) else {
        return false;
    };
    match rest.rsplit_once('.') {
        Some((tag, extension)) => {
            (tag.is_empty() || tag.starts_with('-')) && DRIVER_EXTENSIONS.contains(&extension)
        }
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    Go,
    JavaScript,
    Shell,
}

impl Language {
    /// Unknown or missing hints fall back to Python.
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint.map(|h| h.trim().to_lowercase()).as_deref() {
            Some("go") | Some("golang") => Language::Go,
            Some("javascript") | Some("js") | Some("node") | Some("nodejs") => Language::JavaScript,
            Some("bash") | Some("sh") | Some("shell") | Some("zsh") => Language::Shell,
            _ => Language::Python,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Go => "go",
            Language::JavaScript => "javascript",
            Language::Shell => "bash",
        }
    }

    fn driver_extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::Go => "go",
            Language::JavaScript => "js",
            Language::Shell => "sh",
        }
    }

    /// Driver file name for one call. The tag keeps concurrent calls apart;
    /// a hyphen separates it because `_suffix.go` names carry build
    /// constraints in Go.
    pub fn driver_file(&self, tag: &str) -> String {
        format!("{}-{}.{}", DRIVER_PREFIX, tag, self.driver_extension())
    }

    /// Source text as it should be written to the driver file.
    pub fn prepare_source(&self, code: &str) -> String {
        match self {
            Language::Go => wrap_go_program(code),
            _ => code.to_string(),
        }
    }

    /// Host program and arguments. The shell variant reads the code from stdin.
    pub fn local_command(&self, programs: &LocalExecutorConfig, driver: &str) -> (String, Vec<String>) {
        match self {
            Language::Python => (programs.python.clone(), vec![driver.to_string()]),
            Language::Go => (
                programs.go.clone(),
                vec!["run".to_string(), driver.to_string()],
            ),
            Language::JavaScript => (programs.node.clone(), vec![driver.to_string()]),
            Language::Shell => (programs.shell.clone(), vec!["-s".to_string()]),
        }
    }

    pub fn reads_stdin(&self) -> bool {
        matches!(self, Language::Shell)
    }

    /// Command run inside the container, relative to its working directory.
    pub fn container_command(&self, driver: &str) -> Vec<String> {
        let driver = driver.to_string();
        match self {
            Language::Python => vec!["python3".to_string(), driver],
            Language::Go => vec!["go".to_string(), "run".to_string(), driver],
            Language::JavaScript => vec!["node".to_string(), driver],
            Language::Shell => vec!["bash".to_string(), driver],
        }
    }
}

/// Wraps bare Go statements in a `package main` / `func main` shell. Import
/// lines are hoisted above `main`. Complete programs are returned unchanged.
pub fn wrap_go_program(code: &str) -> String {
    if code.lines().any(|line| line.trim_start().starts_with("package main")) {
        return code.to_string();
    }

    let mut imports = Vec::new();
    let mut body = Vec::new();
    let mut in_import_block = false;
    for line in code.lines() {
        let trimmed = line.trim();
        if in_import_block {
            imports.push(line);
            if trimmed == ")" {
                in_import_block = false;
            }
        } else if trimmed.starts_with("import (") {
            in_import_block = true;
            imports.push(line);
        } else if trimmed.starts_with("import ") {
            imports.push(line);
        } else {
            body.push(line);
        }
    }

    let mut program = String::from("package main\n\n");
    if !imports.is_empty() {
        program.push_str(&imports.join("\n"));
        program.push_str("\n\n");
    }
    program.push_str("func main() {\n");
    program.push_str(&body.join("\n"));
    program.push_str("\n}\n");
    program
}

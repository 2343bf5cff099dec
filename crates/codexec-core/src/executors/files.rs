//! Staging and collection of execution files.
//!
//! Both unsafe executors apply the same rules when deciding which files in the
//! working directory are outputs: only top-level regular files that appeared
//! during the run, excluding hidden files, byte-compiled artifacts, driver
//! sources and the staged inputs themselves.

use crate::core_types::CodeExecutionFile;
use crate::executors::language::is_driver_file;
use std::collections::HashSet;
use std::io::{self, Cursor, Read};
use std::path::{Component, Path};
use tokio::fs;

const EXCLUDED_EXTENSIONS: &[&str] = &["pyc", "pyo"];
const EXCLUDED_NAMES: &[&str] = &["go.mod", "go.sum", "__pycache__"];

pub fn is_excluded_output(name: &str, input_names: &HashSet<String>) -> bool {
    if name.is_empty() || name.starts_with('.') {
        return true;
    }
    if is_driver_file(name) || EXCLUDED_NAMES.contains(&name) {
        return true;
    }
    if let Some(extension) = Path::new(name).extension().and_then(|e| e.to_str()) {
        if EXCLUDED_EXTENSIONS.contains(&extension) {
            return true;
        }
    }
    input_names.contains(name)
}

/// Names of the top-level entries currently in `dir`.
pub async fn snapshot_names(dir: &Path) -> io::Result<HashSet<String>> {
    let mut names = HashSet::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        names.insert(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

pub async fn write_input_files(dir: &Path, files: &[CodeExecutionFile]) -> io::Result<()> {
    for file in files {
        let name = sanitize_file_name(&file.name)?;
        fs::write(dir.join(name), &file.content).await?;
    }
    Ok(())
}

/// Regular files in `dir` that were not there before the run.
pub async fn collect_new_files(
    dir: &Path,
    before: &HashSet<String>,
    input_names: &HashSet<String>,
) -> io::Result<Vec<CodeExecutionFile>> {
    let mut outputs = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if before.contains(&name) || is_excluded_output(&name, input_names) {
            continue;
        }
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let content = fs::read(entry.path()).await?;
        outputs.push(CodeExecutionFile::new(name, content));
    }
    outputs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(outputs)
}

/// File names are staged flat into the working directory; anything that would
/// escape it is rejected.
pub fn sanitize_file_name(name: &str) -> io::Result<&str> {
    let path = Path::new(name);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Invalid input file name '{}': must be a plain file name", name),
        )),
    }
}

/// Packs in-memory files into a flat tar archive.
pub fn build_tar(files: &[(&str, &[u8])]) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in files {
        let name = sanitize_file_name(name)?;
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *content)?;
    }
    builder.into_inner()
}

/// Packs a directory (e.g. a Docker build context) into a tar archive.
pub fn tar_directory(dir: &Path) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_dir_all(".", dir)?;
    builder.into_inner()
}

/// Reads the top-level regular files out of an archive of a directory, as
/// produced by the container runtime: entries are prefixed with the
/// directory's own name.
pub fn read_tar_files(archive: &[u8]) -> io::Result<Vec<CodeExecutionFile>> {
    let mut files = Vec::new();
    let mut archive = tar::Archive::new(Cursor::new(archive));
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.into_owned();
        let components: Vec<String> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if components.len() != 2 {
            continue;
        }
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        files.push(CodeExecutionFile::new(components[1].clone(), content));
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exclusion_rules() {
        let inputs = names(&["data.csv"]);
        assert!(is_excluded_output(".hidden", &inputs));
        assert!(is_excluded_output("code_exec_main.py", &inputs));
        assert!(is_excluded_output("code_exec_main-0f3a.go", &inputs));
        assert!(is_excluded_output("module.pyc", &inputs));
        assert!(is_excluded_output("data.csv", &inputs));
        assert!(!is_excluded_output("plot.png", &inputs));
        assert!(!is_excluded_output("report.py", &inputs));
    }

    #[test]
    fn test_sanitize_rejects_paths() {
        assert!(sanitize_file_name("data.csv").is_ok());
        assert!(sanitize_file_name("../etc/passwd").is_err());
        assert!(sanitize_file_name("/etc/passwd").is_err());
        assert!(sanitize_file_name("nested/file.txt").is_err());
    }

    #[tokio::test]
    async fn test_collect_new_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.txt"), "old").await.unwrap();
        let before = snapshot_names(dir.path()).await.unwrap();

        fs::write(dir.path().join("new.txt"), "new").await.unwrap();
        fs::write(dir.path().join(".cache"), "x").await.unwrap();
        fs::write(dir.path().join("code_exec_main.py"), "print(1)").await.unwrap();
        fs::write(dir.path().join("input.csv"), "1,2").await.unwrap();
        fs::create_dir(dir.path().join("subdir")).await.unwrap();

        let outputs = collect_new_files(dir.path(), &before, &names(&["input.csv"]))
            .await
            .unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].name, "new.txt");
        assert_eq!(outputs[0].content, b"new");
        assert_eq!(outputs[0].size, 3);
    }

    #[test]
    fn test_tar_archive_of_directory_is_read_back() {
        // Mimic the runtime's layout: every entry lives under the directory name.
        let mut builder = tar::Builder::new(Vec::new());
        for (path, content) in [("app/result.txt", "42"), ("app/nested/deep.txt", "x")] {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, content.as_bytes()).unwrap();
        }
        let archive = builder.into_inner().unwrap();

        let files = read_tar_files(&archive).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "result.txt");
        assert_eq!(files[0].content, b"42");
    }

    #[test]
    fn test_build_tar_contains_files() {
        let archive = build_tar(&[("a.txt", b"alpha".as_slice()), ("b.txt", b"beta".as_slice())]).unwrap();
        let mut archive = tar::Archive::new(Cursor::new(archive));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }
}

//! Workspace materialization.
//!
//! Each submission gets a temporary directory holding the main source file,
//! any sanitized auxiliary files, and `input.txt` when stdin was supplied.
//! The directory is uploaded into the sandbox as a single tar archive and is
//! deleted when the [`Workspace`] drops, whatever the outcome.

use std::fs;
use std::io;

use sandrun_languages::LanguageSpec;
use sandrun_languages::LanguageTag;
use sandrun_languages::extract_java_classname;
use tempfile::TempDir;

use crate::submission::Submission;
use crate::submission::sanitize_file_name;

/// The file stdin is materialized into.
pub const STDIN_FILE: &str = "input.txt";

/// A materialized on-disk workspace for one execution.
#[derive(Debug)]
pub struct Workspace {
    /// The temporary directory; removed on drop.
    dir: TempDir,

    /// The name of the main source file.
    main_file: String,

    /// Whether `input.txt` was written.
    has_stdin: bool,
}

impl Workspace {
    /// Writes a submission's files into a fresh temporary directory.
    pub fn materialize(submission: &Submission, spec: &LanguageSpec) -> io::Result<Self> {
        let dir = TempDir::new()?;

        // Java requires the file to be named after its public class.
        let main_file = if spec.tag() == LanguageTag::Java {
            format!("{}.java", extract_java_classname(&submission.code))
        } else {
            format!("main{}", spec.extension())
        };

        fs::write(dir.path().join(&main_file), &submission.code)?;

        for file in &submission.files {
            let name = sanitize_file_name(&file.name);
            fs::write(dir.path().join(name), &file.content)?;
        }

        let has_stdin = match submission.stdin() {
            Some(stdin) => {
                fs::write(dir.path().join(STDIN_FILE), stdin)?;
                true
            }
            None => false,
        };

        Ok(Self {
            dir,
            main_file,
            has_stdin,
        })
    }

    /// Gets the name of the main source file.
    pub fn main_file(&self) -> &str {
        &self.main_file
    }

    /// Whether stdin was materialized.
    pub fn has_stdin(&self) -> bool {
        self.has_stdin
    }

    /// Packs the workspace into an in-memory tar archive.
    pub fn archive(&self) -> io::Result<Vec<u8>> {
        let mut files = Vec::new();

        for entry in fs::read_dir(self.dir.path())? {
            let entry = entry?;

            if entry.file_type()?.is_file() {
                files.push((
                    entry.file_name().to_string_lossy().into_owned(),
                    fs::read(entry.path())?,
                ));
            }
        }

        Ok(sandrun_docker::container::archive_files(
            files
                .iter()
                .map(|(name, contents)| (name.as_str(), contents.as_slice())),
        ))
    }
}

#[cfg(test)]
mod tests {
    use sandrun_languages::LanguageRegistry;

    use super::*;

    /// A submission carrying the given pieces.
    fn submission(
        language: LanguageTag,
        code: &str,
        stdin: Option<&str>,
        files: Vec<(&str, &str)>,
    ) -> Submission {
        Submission {
            language,
            code: code.to_string(),
            stdin: stdin.map(String::from),
            files: files
                .into_iter()
                .map(|(name, content)| crate::submission::SourceFile {
                    name: name.to_string(),
                    content: content.to_string(),
                })
                .collect(),
            install_packages: Vec::new(),
        }
    }

    #[test]
    fn python_main_file() {
        let registry = LanguageRegistry::new();
        let s = submission(LanguageTag::Python, "print(1)", None, Vec::new());
        let workspace = Workspace::materialize(&s, registry.get(LanguageTag::Python)).unwrap();

        assert_eq!(workspace.main_file(), "main.py");
        assert!(!workspace.has_stdin());
    }

    #[test]
    fn java_main_file_is_named_after_the_class() {
        let registry = LanguageRegistry::new();
        let s = submission(
            LanguageTag::Java,
            "public class Foo { public static void main(String[] a) {} }",
            None,
            Vec::new(),
        );
        let workspace = Workspace::materialize(&s, registry.get(LanguageTag::Java)).unwrap();

        assert_eq!(workspace.main_file(), "Foo.java");
    }

    #[test]
    fn stdin_and_extra_files_are_written() {
        let registry = LanguageRegistry::new();
        let s = submission(
            LanguageTag::Python,
            "print(open('data.txt').read())",
            Some("world\n"),
            vec![("../sneaky/data.txt", "1 2 3")],
        );
        let workspace = Workspace::materialize(&s, registry.get(LanguageTag::Python)).unwrap();

        assert!(workspace.has_stdin());

        let archive = workspace.archive().unwrap();
        let mut reader = tar::Archive::new(std::io::Cursor::new(archive));
        let mut names: Vec<_> = reader
            .entries()
            .unwrap()
            .map(|entry| {
                entry
                    .unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        names.sort();

        assert_eq!(names, ["data.txt", "input.txt", "main.py"]);
    }

    #[test]
    fn workspace_directory_is_removed_on_drop() {
        let registry = LanguageRegistry::new();
        let s = submission(LanguageTag::Python, "print(1)", None, Vec::new());
        let workspace = Workspace::materialize(&s, registry.get(LanguageTag::Python)).unwrap();

        let path = workspace.dir.path().to_path_buf();
        assert!(path.exists());
        drop(workspace);
        assert!(!path.exists());
    }
}

//! Submissions and their validation.

use std::sync::LazyLock;

use regex::Regex;
use sandrun_languages::LanguageTag;
use serde::Deserialize;
use thiserror::Error;

/// The largest accepted source, in bytes.
pub const MAX_CODE_BYTES: usize = 1_000_000;

/// Matches a well-formed package name (npm scopes included).
static PACKAGE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._\-@/]+$").expect("regex should compile"));

/// A reason a submission was rejected before anything ran.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ValidationError {
    /// The code was empty or whitespace.
    #[error("Code cannot be empty")]
    EmptyCode,
    /// The code exceeded [`MAX_CODE_BYTES`].
    #[error("Code is too large (max 1MB)")]
    CodeTooLarge,
    /// Java code without a class declaration.
    #[error("Java code must contain a class")]
    JavaMissingClass,
    /// A package name with characters outside the allowed set.
    #[error("Invalid package name `{0}`")]
    InvalidPackageName(String),
}

/// An auxiliary file uploaded alongside the main source.
#[derive(Clone, Debug, Deserialize)]
pub struct SourceFile {
    /// The client-supplied file name; sanitized before use.
    pub name: String,

    /// The file contents.
    pub content: String,
}

/// One client request: a program plus its inputs.
#[derive(Clone, Debug, Deserialize)]
pub struct Submission {
    /// The language to execute the code as.
    pub language: LanguageTag,

    /// The source code.
    pub code: String,

    /// Standard input, supplied up-front.
    #[serde(default)]
    pub stdin: Option<String>,

    /// Auxiliary files to place in the workspace.
    #[serde(default)]
    pub files: Vec<SourceFile>,

    /// Packages to install before running (python and nodejs only).
    #[serde(default)]
    pub install_packages: Vec<String>,
}

impl Submission {
    /// Gets the standard input, treating an empty string as absent.
    pub fn stdin(&self) -> Option<&str> {
        self.stdin.as_deref().filter(|stdin| !stdin.is_empty())
    }

    /// Validates the submission.
    ///
    /// The language itself is already proven valid by deserialization into
    /// the closed [`LanguageTag`] set.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.code.trim().is_empty() {
            return Err(ValidationError::EmptyCode);
        }

        if self.code.len() > MAX_CODE_BYTES {
            return Err(ValidationError::CodeTooLarge);
        }

        if self.language == LanguageTag::Java && !self.code.contains("class") {
            return Err(ValidationError::JavaMissingClass);
        }

        for package in &self.install_packages {
            if !PACKAGE_NAME.is_match(package) {
                return Err(ValidationError::InvalidPackageName(package.clone()));
            }
        }

        Ok(())
    }
}

/// Sanitizes a client-supplied file name.
///
/// Path components are stripped and anything outside `[A-Za-z0-9._-]` is
/// replaced with `_`. Duplicates after sanitization overwrite silently at
/// materialization time.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name);

    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        String::from("file")
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal valid submission for the given language and code.
    fn submission(language: LanguageTag, code: &str) -> Submission {
        Submission {
            language,
            code: code.to_string(),
            stdin: None,
            files: Vec::new(),
            install_packages: Vec::new(),
        }
    }

    #[test]
    fn empty_and_whitespace_code_fail() {
        assert_eq!(
            submission(LanguageTag::Python, "").validate(),
            Err(ValidationError::EmptyCode)
        );
        assert_eq!(
            submission(LanguageTag::Python, "   ").validate(),
            Err(ValidationError::EmptyCode)
        );
    }

    #[test]
    fn code_size_boundary() {
        let at_limit = "a".repeat(MAX_CODE_BYTES);
        assert!(submission(LanguageTag::Python, &at_limit).validate().is_ok());

        let over_limit = "a".repeat(MAX_CODE_BYTES + 1);
        assert_eq!(
            submission(LanguageTag::Python, &over_limit).validate(),
            Err(ValidationError::CodeTooLarge)
        );
    }

    #[test]
    fn java_requires_a_class() {
        assert_eq!(
            submission(LanguageTag::Java, "System.out.println(1);").validate(),
            Err(ValidationError::JavaMissingClass)
        );
        assert!(
            submission(LanguageTag::Java, "public class Main {}")
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn package_names_are_checked() {
        let mut s = submission(LanguageTag::Python, "import numpy");
        s.install_packages = vec![String::from("numpy"), String::from("@scope/pkg")];
        assert!(s.validate().is_ok());

        s.install_packages = vec![String::from("numpy; rm -rf /")];
        assert_eq!(
            s.validate(),
            Err(ValidationError::InvalidPackageName(String::from(
                "numpy; rm -rf /"
            )))
        );
    }

    #[test]
    fn empty_stdin_is_absent() {
        let mut s = submission(LanguageTag::Python, "print(input())");
        assert!(s.stdin().is_none());

        s.stdin = Some(String::new());
        assert!(s.stdin().is_none());

        s.stdin = Some(String::from("world\n"));
        assert_eq!(s.stdin(), Some("world\n"));
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("data.csv"), "data.csv");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name(r"C:\temp\evil.txt"), "evil.txt");
        assert_eq!(sanitize_file_name("my file (1).txt"), "my_file__1_.txt");
        assert_eq!(sanitize_file_name("dir/"), "file");
    }

    #[test]
    fn submissions_deserialize_from_wire_frames() {
        let frame = r#"{
            "language": "python",
            "code": "print('Hello')",
            "stdin": "",
            "files": [{"name": "data.txt", "content": "1 2 3"}],
            "install_packages": ["numpy"]
        }"#;

        let s: Submission = serde_json::from_str(frame).unwrap();
        assert_eq!(s.language, LanguageTag::Python);
        assert!(s.stdin().is_none());
        assert_eq!(s.files.len(), 1);
        assert_eq!(s.install_packages, ["numpy"]);

        let minimal: Submission = serde_json::from_str(
            r#"{"language": "html", "code": "<p>hi</p>"}"#,
        )
        .unwrap();
        assert_eq!(minimal.language, LanguageTag::Html);

        assert!(serde_json::from_str::<Submission>(r#"{"language": "rust", "code": "fn main() {}"}"#).is_err());
    }
}

//! The static language registry used by the sandrun execution engine.
//!
//! A [`LanguageSpec`] binds a language tag to everything the engine needs to
//! run code written in that language: the sandbox image, the source file
//! extension, the execution command template, a starter template, the
//! missing-dependency patterns, and the package install templates.
//!
//! The registry is constructed once at process start and passed around as an
//! explicit collaborator; there is no hidden module state.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub mod detect;

pub use detect::MissingDependency;

/// The directory inside the sandbox where sources and stdin are materialized.
pub const WORKSPACE_DIR: &str = "/workspace";

/// Matches the name of the first public class in a Java source.
static JAVA_CLASSNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"public\s+class\s+(\w+)").expect("regex should compile"));

/// An error within this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A language tag that is not in the registry.
    #[error("unknown language `{0}`")]
    UnknownLanguage(String),
}

/// A [`Result`](std::result::Result) with an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of supported language tags.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageTag {
    /// Python 3.
    Python,
    /// Node.js.
    Nodejs,
    /// Java.
    Java,
    /// C++.
    Cpp,
    /// An Ubuntu shell; the submitted code is the program.
    Ubuntu,
    /// HTML; rendered client-side without a sandbox.
    Html,
}

impl LanguageTag {
    /// All tags, in registry order.
    pub const ALL: &'static [LanguageTag] = &[
        LanguageTag::Python,
        LanguageTag::Nodejs,
        LanguageTag::Java,
        LanguageTag::Cpp,
        LanguageTag::Ubuntu,
        LanguageTag::Html,
    ];

    /// The lowercase wire name of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageTag::Python => "python",
            LanguageTag::Nodejs => "nodejs",
            LanguageTag::Java => "java",
            LanguageTag::Cpp => "cpp",
            LanguageTag::Ubuntu => "ubuntu",
            LanguageTag::Html => "html",
        }
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LanguageTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .find(|tag| tag.as_str() == s)
            .copied()
            .ok_or_else(|| Error::UnknownLanguage(s.to_string()))
    }
}

/// A package manager referenced by dependency patterns and install templates.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    /// The Python package installer.
    Pip,
    /// The Node.js package manager.
    Npm,
}

impl PackageManager {
    /// The lowercase name of the package manager.
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Pip => "pip",
            PackageManager::Npm => "npm",
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the engine needs to know about one language.
#[derive(Debug)]
pub struct LanguageSpec {
    /// The tag this spec describes.
    tag: LanguageTag,

    /// The sandbox image; `None` for the sandbox-less preview language.
    image: Option<&'static str>,

    /// The source file suffix (including the leading dot).
    extension: &'static str,

    /// The execution command template with `{file}`, `{classname}` and
    /// `{code}` placeholders.
    command_template: &'static [&'static str],

    /// Example source shown to new users.
    starter_template: &'static str,

    /// Missing-dependency patterns, grouped by package manager. Each regex has
    /// exactly one capture group: the package name.
    dep_patterns: Vec<(PackageManager, Vec<Regex>)>,

    /// Install command templates with one `{package}` placeholder.
    install_templates: IndexMap<PackageManager, &'static str>,

    /// Whether containers for this language get network access even outside
    /// the install path.
    network_allowed_for_exec: bool,
}

impl LanguageSpec {
    /// Gets the tag this spec describes.
    pub fn tag(&self) -> LanguageTag {
        self.tag
    }

    /// Gets the sandbox image, if the language uses one.
    pub fn image(&self) -> Option<&'static str> {
        self.image
    }

    /// Gets the source file suffix.
    pub fn extension(&self) -> &'static str {
        self.extension
    }

    /// Gets the starter template.
    pub fn starter_template(&self) -> &'static str {
        self.starter_template
    }

    /// Gets the missing-dependency patterns.
    pub fn dep_patterns(&self) -> &[(PackageManager, Vec<Regex>)] {
        &self.dep_patterns
    }

    /// Whether containers for this language always get network access.
    pub fn network_allowed_for_exec(&self) -> bool {
        self.network_allowed_for_exec
    }

    /// Whether the language supports an install-then-run prelude.
    pub fn supports_install(&self) -> bool {
        !self.install_templates.is_empty()
    }

    /// Gets the package manager used for install preludes, if any.
    pub fn primary_package_manager(&self) -> Option<PackageManager> {
        self.install_templates.keys().next().copied()
    }

    /// Renders the install command for a single package.
    pub fn install_command(&self, manager: PackageManager, package: &str) -> Option<String> {
        self.install_templates
            .get(&manager)
            .map(|template| template.replace("{package}", package))
    }

    /// Renders the execution command by substituting placeholders.
    ///
    /// `{file}` becomes `/workspace/<file_name>`, `{classname}` the first
    /// public class in `code` (falling back to `Main`), and `{code}` the raw
    /// code itself. Each placeholder is substituted in a single pass per
    /// token.
    ///
    /// `{code}` is only used by the `ubuntu` template (`bash -c {code}`): the
    /// code is the program there and runs inside its own sandbox, so it is
    /// passed through without quoting.
    pub fn render_command(&self, code: &str, file_name: &str) -> Vec<String> {
        self.command_template
            .iter()
            .map(|token| {
                token
                    .replace("{file}", &format!("{WORKSPACE_DIR}/{file_name}"))
                    .replace("{classname}", &extract_java_classname(code))
                    .replace("{code}", code)
            })
            .collect()
    }
}

/// Extracts the name of the first public class in a Java source, defaulting
/// to `Main`.
pub fn extract_java_classname(code: &str) -> String {
    JAVA_CLASSNAME
        .captures(code)
        .map(|captures| captures[1].to_string())
        .unwrap_or_else(|| String::from("Main"))
}

/// The static table of language specs.
#[derive(Debug)]
pub struct LanguageRegistry {
    /// The specs, keyed by tag in registry order.
    specs: IndexMap<LanguageTag, LanguageSpec>,
}

impl LanguageRegistry {
    /// Constructs the registry.
    pub fn new() -> Self {
        let mut specs = IndexMap::new();

        specs.insert(
            LanguageTag::Python,
            LanguageSpec {
                tag: LanguageTag::Python,
                image: Some("python:3.11-slim"),
                extension: ".py",
                command_template: &["python", "-u", "{file}"],
                starter_template: "# Python Code\nprint(\"Hello, World!\")\n",
                dep_patterns: vec![(
                    PackageManager::Pip,
                    compile_patterns(&[
                        r"ModuleNotFoundError: No module named '(\w+)'",
                        r"ImportError: No module named (\w+)",
                    ]),
                )],
                install_templates: IndexMap::from([(
                    PackageManager::Pip,
                    "pip install --no-cache-dir {package}",
                )]),
                network_allowed_for_exec: false,
            },
        );

        specs.insert(
            LanguageTag::Nodejs,
            LanguageSpec {
                tag: LanguageTag::Nodejs,
                image: Some("node:20-alpine"),
                extension: ".js",
                command_template: &["node", "{file}"],
                starter_template: "// Node.js Code\nconsole.log(\"Hello, World!\");\n",
                dep_patterns: vec![(
                    PackageManager::Npm,
                    compile_patterns(&[
                        r"Cannot find module '([\w\-@/]+)'",
                        r"Error \[ERR_MODULE_NOT_FOUND\].*'([\w\-@/]+)'",
                    ]),
                )],
                install_templates: IndexMap::from([(
                    PackageManager::Npm,
                    "npm install {package}",
                )]),
                network_allowed_for_exec: false,
            },
        );

        specs.insert(
            LanguageTag::Java,
            LanguageSpec {
                tag: LanguageTag::Java,
                image: Some("eclipse-temurin:21-jre"),
                extension: ".java",
                command_template: &["sh", "-c", "javac {file} && java {classname}"],
                starter_template: "public class Main {\n    public static void main(String[] \
                                   args) {\n        System.out.println(\"Hello, World!\");\n    \
                                   }\n}\n",
                dep_patterns: Vec::new(),
                install_templates: IndexMap::new(),
                network_allowed_for_exec: false,
            },
        );

        specs.insert(
            LanguageTag::Cpp,
            LanguageSpec {
                tag: LanguageTag::Cpp,
                image: Some("gcc:12"),
                extension: ".cpp",
                command_template: &["sh", "-c", "g++ {file} -o /tmp/program && /tmp/program"],
                starter_template: "#include <iostream>\nusing namespace std;\n\nint main() {\n    \
                                   cout << \"Hello, World!\" << endl;\n    return 0;\n}\n",
                dep_patterns: Vec::new(),
                install_templates: IndexMap::new(),
                network_allowed_for_exec: false,
            },
        );

        specs.insert(
            LanguageTag::Ubuntu,
            LanguageSpec {
                tag: LanguageTag::Ubuntu,
                image: Some("ubuntu:22.04"),
                extension: ".sh",
                command_template: &["bash", "-c", "{code}"],
                starter_template: "# Ubuntu Shell\necho \"Hello, World!\"\n",
                dep_patterns: Vec::new(),
                install_templates: IndexMap::new(),
                network_allowed_for_exec: true,
            },
        );

        specs.insert(
            LanguageTag::Html,
            LanguageSpec {
                tag: LanguageTag::Html,
                image: None,
                extension: ".html",
                command_template: &[],
                starter_template: "<!DOCTYPE html>\n<html>\n<head>\n    \
                                   <title>Page</title>\n</head>\n<body>\n    <h1>Hello, \
                                   World!</h1>\n</body>\n</html>\n",
                dep_patterns: Vec::new(),
                install_templates: IndexMap::new(),
                network_allowed_for_exec: false,
            },
        );

        Self { specs }
    }

    /// Gets the spec for a tag.
    ///
    /// The tag set is closed, so every tag has a spec.
    pub fn get(&self, tag: LanguageTag) -> &LanguageSpec {
        self.specs
            .get(&tag)
            .expect("every language tag has a registered spec")
    }

    /// Looks up a spec by wire name.
    pub fn get_by_name(&self, name: &str) -> Result<&LanguageSpec> {
        Ok(self.get(name.parse()?))
    }

    /// Iterates over all specs in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &LanguageSpec> {
        self.specs.values()
    }

    /// Iterates over the sandbox images of all languages that use one.
    pub fn images(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.specs.values().filter_map(|spec| spec.image)
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Compiles a set of pattern strings.
fn compile_patterns(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|pattern| Regex::new(pattern).expect("regex should compile"))
        .collect()
}

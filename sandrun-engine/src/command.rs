//! Command composition.
//!
//! Turns a submission into the exact command handed to the sandbox: the plain
//! run command, the stdin redirection wrapper, and the install-then-run shell
//! script with its sentinel lines.

use sandrun_languages::LanguageSpec;
use sandrun_languages::LanguageTag;
use sandrun_languages::PackageManager;
use sandrun_languages::WORKSPACE_DIR;

use crate::submission::Submission;
use crate::workspace::STDIN_FILE;
use crate::workspace::Workspace;

/// The sentinel line the install script prints when the program starts.
///
/// Both sentinels are part of the wire contract between the script and the
/// output classifier: they are the only signal the engine has that the
/// install phase succeeded or failed.
pub const RUNNING_SENTINEL: &str = "▶▶▶ RUNNING CODE ▶▶▶";

/// The sentinel line the install script prints when installation fails.
pub const INSTALL_FAILED_SENTINEL: &str = "❌ INSTALL FAILED — check package name and try again";

/// How an output line should be surfaced to the client.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LineKind {
    /// The line contains the running sentinel: install succeeded.
    InstallComplete,
    /// The line contains the failure sentinel: install failed, nothing ran.
    InstallError,
    /// Ordinary program output.
    Stdout,
}

/// Classifies one line of combined sandbox output.
pub fn classify_line(line: &str) -> LineKind {
    if line.contains(RUNNING_SENTINEL) {
        LineKind::InstallComplete
    } else if line.contains(INSTALL_FAILED_SENTINEL) {
        LineKind::InstallError
    } else {
        LineKind::Stdout
    }
}

/// Whether the submission takes the install path.
pub fn uses_install_path(submission: &Submission, spec: &LanguageSpec) -> bool {
    !submission.install_packages.is_empty() && spec.supports_install()
}

/// Composes the command for a submission.
///
/// Takes the install path when packages were requested and the language
/// supports it; otherwise the plain run command.
pub fn compose(submission: &Submission, spec: &LanguageSpec, workspace: &Workspace) -> Vec<String> {
    if uses_install_path(submission, spec) {
        // supports_install() implies a primary package manager.
        let manager = spec
            .primary_package_manager()
            .expect("install-capable languages have a package manager");

        install_then_run(
            submission,
            spec,
            manager,
            workspace.main_file(),
            workspace.has_stdin(),
        )
    } else {
        run_command(submission, spec, workspace.main_file(), workspace.has_stdin())
    }
}

/// Renders the plain run command, redirecting stdin when present.
fn run_command(
    submission: &Submission,
    spec: &LanguageSpec,
    main_file: &str,
    has_stdin: bool,
) -> Vec<String> {
    let command = spec.render_command(&submission.code, main_file);

    if !has_stdin || spec.tag() == LanguageTag::Ubuntu {
        return command;
    }

    vec![
        String::from("sh"),
        String::from("-c"),
        format!("{} < {WORKSPACE_DIR}/{STDIN_FILE}", flatten(&command)),
    ]
}

/// Builds the install-then-run shell script.
///
/// The script installs all requested packages with combined output, prints
/// [`INSTALL_FAILED_SENTINEL`] and exits with the install status on failure
/// (skipping the run phase), or prints [`RUNNING_SENTINEL`] and runs the
/// program. Both sentinels are printed as standalone lines.
fn install_then_run(
    submission: &Submission,
    spec: &LanguageSpec,
    manager: PackageManager,
    main_file: &str,
    has_stdin: bool,
) -> Vec<String> {
    let install = spec
        .install_command(manager, &submission.install_packages.join(" "))
        .expect("install-capable languages render install commands");

    let mut run = flatten(&spec.render_command(&submission.code, main_file));
    if has_stdin {
        run = format!("{run} < {WORKSPACE_DIR}/{STDIN_FILE}");
    }

    let script = format!(
        "{install} 2>&1\n\
         status=$?\n\
         if [ $status -ne 0 ]; then\n  \
         echo {failed}\n  \
         exit $status\n\
         fi\n\
         echo {running}\n\
         {run}",
        failed = quote(INSTALL_FAILED_SENTINEL),
        running = quote(RUNNING_SENTINEL),
    );

    vec![String::from("sh"), String::from("-c"), script]
}

/// Flattens a token vector into a single shell command string.
///
/// A `sh -c <script>` command keeps its script verbatim (quoting it would
/// turn the script into a single word); anything else is joined with shell
/// quoting.
fn flatten(command: &[String]) -> String {
    match command {
        [shell, flag, script] if shell == "sh" && flag == "-c" => script.clone(),
        _ => shlex::try_join(command.iter().map(String::as_str))
            // Command tokens are registry constants plus sanitized file names
            // and identifiers; none can contain a nul byte.
            .expect("command tokens contain no nul bytes"),
    }
}

/// Shell-quotes a sentinel for an `echo`.
fn quote(text: &str) -> String {
    shlex::try_quote(text)
        .expect("sentinels contain no nul bytes")
        .into_owned()
}

/// The factor applied to the execution deadline while the install path runs.
pub const INSTALL_TIMEOUT_MULTIPLIER: u64 = 3;

#[cfg(test)]
mod tests {
    use sandrun_languages::LanguageRegistry;

    use super::*;
    use crate::submission::Submission;

    /// A submission with the given pieces.
    fn submission(
        language: LanguageTag,
        code: &str,
        stdin: Option<&str>,
        install_packages: Vec<&str>,
    ) -> Submission {
        Submission {
            language,
            code: code.to_string(),
            stdin: stdin.map(String::from),
            files: Vec::new(),
            install_packages: install_packages.into_iter().map(String::from).collect(),
        }
    }

    /// Materializes a workspace for a submission.
    fn workspace(submission: &Submission, registry: &LanguageRegistry) -> Workspace {
        Workspace::materialize(submission, registry.get(submission.language)).unwrap()
    }

    #[test]
    fn plain_python_command() {
        let registry = LanguageRegistry::new();
        let s = submission(LanguageTag::Python, "print(1)", None, Vec::new());
        let command = compose(&s, registry.get(LanguageTag::Python), &workspace(&s, &registry));

        assert_eq!(command, ["python", "-u", "/workspace/main.py"]);
    }

    #[test]
    fn stdin_redirects_through_a_shell() {
        let registry = LanguageRegistry::new();
        let s = submission(LanguageTag::Python, "print(input())", Some("world\n"), Vec::new());
        let command = compose(&s, registry.get(LanguageTag::Python), &workspace(&s, &registry));

        assert_eq!(
            command,
            [
                "sh",
                "-c",
                "python -u /workspace/main.py < /workspace/input.txt"
            ]
        );
    }

    #[test]
    fn stdin_redirect_appends_to_shell_templates() {
        let registry = LanguageRegistry::new();
        let code = "public class Foo { public static void main(String[] a) {} }";
        let s = submission(LanguageTag::Java, code, Some("1\n"), Vec::new());
        let command = compose(&s, registry.get(LanguageTag::Java), &workspace(&s, &registry));

        assert_eq!(
            command,
            [
                "sh",
                "-c",
                "javac /workspace/Foo.java && java Foo < /workspace/input.txt"
            ]
        );
    }

    #[test]
    fn ubuntu_ignores_stdin_redirection() {
        let registry = LanguageRegistry::new();
        let s = submission(LanguageTag::Ubuntu, "read x; echo $x", Some("hi\n"), Vec::new());
        let command = compose(&s, registry.get(LanguageTag::Ubuntu), &workspace(&s, &registry));

        assert_eq!(command, ["bash", "-c", "read x; echo $x"]);
    }

    #[test]
    fn install_script_carries_the_sentinel_contract() {
        let registry = LanguageRegistry::new();
        let s = submission(
            LanguageTag::Python,
            "import numpy",
            None,
            vec!["numpy", "pandas"],
        );
        let command = compose(&s, registry.get(LanguageTag::Python), &workspace(&s, &registry));

        assert_eq!(command[..2], [String::from("sh"), String::from("-c")]);
        let script = &command[2];

        assert!(script.contains("pip install --no-cache-dir numpy pandas 2>&1"));
        assert!(script.contains(RUNNING_SENTINEL));
        assert!(script.contains(INSTALL_FAILED_SENTINEL));
        assert!(script.contains("python -u /workspace/main.py"));

        // The failure branch exits before the run phase.
        let failed_at = script.find(INSTALL_FAILED_SENTINEL).unwrap();
        let exit_at = script.find("exit $status").unwrap();
        let running_at = script.find(RUNNING_SENTINEL).unwrap();
        assert!(failed_at < exit_at && exit_at < running_at);
    }

    #[test]
    fn install_script_redirects_stdin_for_the_run_phase() {
        let registry = LanguageRegistry::new();
        let s = submission(
            LanguageTag::Nodejs,
            "console.log(1)",
            Some("x\n"),
            vec!["left-pad"],
        );
        let command = compose(&s, registry.get(LanguageTag::Nodejs), &workspace(&s, &registry));

        let script = &command[2];
        assert!(script.contains("npm install left-pad 2>&1"));
        assert!(script.contains("node /workspace/main.js < /workspace/input.txt"));
    }

    #[test]
    fn install_packages_for_unsupported_languages_fall_back_to_a_plain_run() {
        let registry = LanguageRegistry::new();
        let s = submission(LanguageTag::Cpp, "int main() {}", None, vec!["boost"]);
        let spec = registry.get(LanguageTag::Cpp);

        assert!(!uses_install_path(&s, spec));
        let command = compose(&s, spec, &workspace(&s, &registry));
        assert_eq!(
            command,
            ["sh", "-c", "g++ /workspace/main.cpp -o /tmp/program && /tmp/program"]
        );
    }

    #[test]
    fn sentinels_classify_lines() {
        assert_eq!(
            classify_line("▶▶▶ RUNNING CODE ▶▶▶\n"),
            LineKind::InstallComplete
        );
        assert_eq!(
            classify_line("❌ INSTALL FAILED — check package name and try again\n"),
            LineKind::InstallError
        );
        assert_eq!(classify_line("Hello, World!\n"), LineKind::Stdout);
    }
}

//! Missing-dependency detection.
//!
//! A pure scan of captured sandbox output against the registry's per-language
//! patterns. No network, no state: the caller decides what to do with a hit.

use crate::LanguageSpec;
use crate::PackageManager;

/// A dependency discovered to be missing from a sandbox.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MissingDependency {
    /// The package manager that owns the package.
    pub package_manager: PackageManager,

    /// The captured package name.
    pub package_name: String,
}

/// Scans output for the first missing dependency.
///
/// Patterns are tried in registry order; the first pattern that matches
/// anywhere in the output wins.
pub fn first_missing_dependency(spec: &LanguageSpec, output: &str) -> Option<MissingDependency> {
    for (manager, patterns) in spec.dep_patterns() {
        for pattern in patterns {
            if let Some(captures) = pattern.captures(output) {
                return Some(MissingDependency {
                    package_manager: *manager,
                    package_name: captures[1].to_string(),
                });
            }
        }
    }

    None
}

/// Scans output for every missing dependency.
///
/// The result is deduplicated by package name, preserving discovery order.
pub fn missing_dependencies(spec: &LanguageSpec, output: &str) -> Vec<MissingDependency> {
    let mut found = Vec::new();

    for (manager, patterns) in spec.dep_patterns() {
        for pattern in patterns {
            for captures in pattern.captures_iter(output) {
                let name = &captures[1];

                if !found
                    .iter()
                    .any(|dep: &MissingDependency| dep.package_name == name)
                {
                    found.push(MissingDependency {
                        package_manager: *manager,
                        package_name: name.to_string(),
                    });
                }
            }
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LanguageRegistry;
    use crate::LanguageTag;

    /// Table-driven single-hit cases, per language.
    #[test]
    fn detects_first_missing_dependency() {
        let registry = LanguageRegistry::new();

        let cases: &[(LanguageTag, &str, Option<(PackageManager, &str)>)] = &[
            (
                LanguageTag::Python,
                "Traceback (most recent call last):\n  File \"main.py\", line 1\nModuleNotFoundError: No module named 'numpy'",
                Some((PackageManager::Pip, "numpy")),
            ),
            (
                LanguageTag::Python,
                "ImportError: No module named requests",
                Some((PackageManager::Pip, "requests")),
            ),
            (
                LanguageTag::Python,
                "SyntaxError: invalid syntax",
                None,
            ),
            (
                LanguageTag::Nodejs,
                "Error: Cannot find module 'left-pad'\n    at Function.Module._resolveFilename",
                Some((PackageManager::Npm, "left-pad")),
            ),
            (
                LanguageTag::Nodejs,
                "node:internal/errors Error [ERR_MODULE_NOT_FOUND]: Cannot find package '@scope/pkg'",
                Some((PackageManager::Npm, "@scope/pkg")),
            ),
            (
                LanguageTag::Cpp,
                "fatal error: boost/asio.hpp: No such file or directory",
                None,
            ),
        ];

        for (tag, output, expected) in cases {
            let detected = first_missing_dependency(registry.get(*tag), output);

            match expected {
                Some((manager, name)) => {
                    let dep = detected.unwrap_or_else(|| panic!("expected a hit for {output:?}"));
                    assert_eq!(dep.package_manager, *manager);
                    assert_eq!(dep.package_name, *name);
                }
                None => assert!(detected.is_none(), "unexpected hit for {output:?}"),
            }
        }
    }

    #[test]
    fn multi_hit_dedupes_preserving_order() {
        let registry = LanguageRegistry::new();
        let output = "ModuleNotFoundError: No module named 'numpy'\n\
                      ModuleNotFoundError: No module named 'pandas'\n\
                      ModuleNotFoundError: No module named 'numpy'";

        let deps = missing_dependencies(registry.get(LanguageTag::Python), output);
        let names: Vec<_> = deps.iter().map(|dep| dep.package_name.as_str()).collect();

        assert_eq!(names, ["numpy", "pandas"]);
    }

    #[test]
    fn detection_spans_lines() {
        let registry = LanguageRegistry::new();
        let output = "some earlier noise\nmore noise\n\
                      ModuleNotFoundError: No module named 'scipy'\ntrailing";

        let dep = first_missing_dependency(registry.get(LanguageTag::Python), output).unwrap();
        assert_eq!(dep.package_name, "scipy");
    }
}

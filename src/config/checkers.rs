//! External checker registry
//!
//! Hardcoded specs for the syntax checkers gatecheck knows how to drive:
//! the argv to run, the config files that enable or tune them, how their
//! output is shaped and which checkers supersede which. The registry only
//! describes the calling convention; whether a checker actually runs is
//! decided per push from PATH and the pushed tree.

use lazy_static::lazy_static;
use regex::Regex;

use crate::checks::file::shebang_exe;
use crate::git::commit::ChangedFile;

/// Spec for one external checker invocation.
#[derive(Debug, PartialEq, Eq)]
pub struct CheckerSpec {
    /// Command name, resolved on PATH.
    pub name: &'static str,
    /// Full argv; `args[0]` is the command.
    pub args: &'static [&'static str],
    /// File extension this checker owns.
    pub extension: &'static str,
    /// Also claim extensionless scripts whose shebang matches the
    /// interpreter pattern of `extension`.
    pub match_shebang: bool,
    /// Config file candidates at the repository top level.
    pub config_files: &'static [&'static str],
    /// Skip the checker entirely when no config candidate is committed.
    pub config_required: bool,
    /// Leading output lines to discard.
    pub header: usize,
    /// Trailing output lines to discard.
    pub footer: usize,
    /// The exit code carries no signal; only parsed problems count.
    pub bogus_return_code: bool,
    /// Append the logical file path to the argv (the content still arrives
    /// on stdin; the path only feeds per-file config such as excludes).
    pub append_filepath: bool,
    /// Checkers that make this one redundant when they can run.
    pub preferred: &'static [&'static str],
}

impl CheckerSpec {
    pub fn applies_to(&self, file: &ChangedFile, content: &[u8]) -> bool {
        if !file.checkable() || file.is_symlink() || file.in_templates() {
            return false;
        }
        if file.extension() == Some(self.extension) {
            return true;
        }
        if self.match_shebang {
            if let (Some(exe), Some(pattern)) =
                (shebang_exe(content), interpreter_pattern(self.extension))
            {
                return pattern.is_match(&exe);
            }
        }
        false
    }
}

const DEFAULT: CheckerSpec = CheckerSpec {
    name: "",
    args: &[],
    extension: "",
    match_shebang: false,
    config_files: &[],
    config_required: false,
    header: 0,
    footer: 0,
    bogus_return_code: false,
    append_filepath: false,
    preferred: &[],
};

/// Built-in checker table. Order matters only for readability; preference
/// chains are explicit.
pub static BUILTIN_CHECKERS: [CheckerSpec; 17] = [
    // CSS
    CheckerSpec {
        name: "csslint",
        args: &["csslint", "--format=compact", "/dev/stdin"],
        extension: "css",
        config_files: &[".csslintrc"],
        ..DEFAULT
    },
    // Go
    CheckerSpec {
        name: "golint",
        args: &["golint", "/dev/stdin"],
        extension: "go",
        ..DEFAULT
    },
    // HTML
    CheckerSpec {
        name: "htmlhint",
        args: &["htmlhint", "--format=unix", "/dev/stdin"],
        extension: "html",
        footer: 2,
        config_files: &[".htmlhintrc"],
        ..DEFAULT
    },
    // Puppet
    CheckerSpec {
        name: "puppet",
        args: &[
            "puppet",
            "parser",
            "validate",
            "--color=false",
            "--confdir=/tmp",
            "--vardir=/tmp",
        ],
        extension: "pp",
        match_shebang: true,
        ..DEFAULT
    },
    CheckerSpec {
        name: "puppet-lint",
        args: &["puppet-lint", "--no-autoloader_layout-check", "/dev/stdin"],
        extension: "pp",
        match_shebang: true,
        config_files: &[".puppet-lint.rc"],
        ..DEFAULT
    },
    // Python
    CheckerSpec {
        name: "flake8",
        args: &["flake8", "-"],
        extension: "py",
        match_shebang: true,
        config_files: &["setup.cfg", "tox.ini", ".flake8"],
        ..DEFAULT
    },
    CheckerSpec {
        name: "pycodestyle",
        args: &["pycodestyle", "-"],
        extension: "py",
        match_shebang: true,
        config_files: &["setup.cfg", "tox.ini"],
        preferred: &["flake8"],
        ..DEFAULT
    },
    CheckerSpec {
        name: "pyflakes",
        args: &["pyflakes"],
        extension: "py",
        match_shebang: true,
        preferred: &["flake8"],
        ..DEFAULT
    },
    // Ruby
    CheckerSpec {
        name: "rubocop",
        args: &["rubocop", "--format=emacs", "--stdin"],
        extension: "rb",
        match_shebang: true,
        config_files: &[".rubocop.yml"],
        // Rubocop wants a file name after --stdin for "Exclude" directives;
        // the contents still come in on stdin.
        append_filepath: true,
        ..DEFAULT
    },
    // Shell
    CheckerSpec {
        name: "shellcheck",
        args: &["shellcheck", "--format=gcc", "/dev/stdin"],
        extension: "sh",
        match_shebang: true,
        bogus_return_code: true,
        ..DEFAULT
    },
    // JavaScript
    CheckerSpec {
        name: "eslint",
        args: &["eslint", "--format=unix", "--quiet", "--stdin"],
        extension: "js",
        match_shebang: true,
        config_files: &[
            "package.json",
            ".eslint.js",
            ".eslint.yaml",
            ".eslint.yml",
            ".eslint.json",
            ".eslintrc.js",
            ".eslintrc.yaml",
            ".eslintrc.yml",
            ".eslintrc.json",
        ],
        config_required: true,
        ..DEFAULT
    },
    CheckerSpec {
        name: "jshint",
        args: &["jshint", "--reporter=unix", "/dev/stdin"],
        extension: "js",
        match_shebang: true,
        config_files: &["package.json", ".jshintrc"],
        preferred: &["eslint"],
        ..DEFAULT
    },
    CheckerSpec {
        name: "jscs",
        args: &["jscs", "--max-errors=-1", "--reporter=unix"],
        extension: "js",
        match_shebang: true,
        config_files: &["package.json", ".jscsrc", ".jscs.json"],
        config_required: true,
        preferred: &["eslint", "jshint"],
        ..DEFAULT
    },
    CheckerSpec {
        name: "standard",
        args: &["standard", "--stdin"],
        extension: "js",
        match_shebang: true,
        header: 2,
        preferred: &["eslint", "jshint", "jscs"],
        ..DEFAULT
    },
    // CoffeeScript
    CheckerSpec {
        name: "coffeelint",
        args: &["coffeelint", "--stdin", "--reporter=csv"],
        extension: "coffee",
        match_shebang: true,
        header: 1,
        config_files: &["coffeelint.json", "package.json"],
        ..DEFAULT
    },
    // PHP
    CheckerSpec {
        name: "phpcs",
        args: &["phpcs", "-q", "--report=emacs"],
        extension: "php",
        match_shebang: true,
        config_files: &["phpcs.xml", "phpcs.xml.dist"],
        ..DEFAULT
    },
    // XML
    CheckerSpec {
        name: "xmllint",
        args: &["xmllint", "--noout", "-"],
        extension: "xml",
        ..DEFAULT
    },
];

pub fn builtin_checkers() -> &'static [CheckerSpec] {
    &BUILTIN_CHECKERS
}

pub fn checker_by_name(name: &str) -> Option<&'static CheckerSpec> {
    BUILTIN_CHECKERS.iter().find(|spec| spec.name == name)
}

lazy_static! {
    /// Interpreter name pattern per script extension, matched against the
    /// shebang executable.
    static ref INTERPRETER_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("coffee", Regex::new("^coffee").unwrap()),
        ("php", Regex::new("^php").unwrap()),
        ("pp", Regex::new("^puppet").unwrap()),
        ("py", Regex::new("^python").unwrap()),
        ("rb", Regex::new("^ruby").unwrap()),
        ("sh", Regex::new("sh$").unwrap()),
        ("js", Regex::new("js$").unwrap()),
    ];
}

pub fn interpreter_pattern(extension: &str) -> Option<&'static Regex> {
    INTERPRETER_PATTERNS
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, pattern)| pattern)
}

/// Extensions with a known interpreter pattern.
pub fn known_script_extension(extension: &str) -> bool {
    interpreter_pattern(extension).is_some()
}

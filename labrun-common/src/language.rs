//! Language tags and file-extension detection

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Languages the lab editor knows about.
///
/// Only a subset is runnable; see `labrun_sandbox::supported_languages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    TypeScript,
    Python,
    Java,
    C,
    Cpp,
    Go,
    Rust,
}

/// Fixed extension table, lowercase without the leading dot.
const EXTENSIONS: &[(&str, Language)] = &[
    ("js", Language::JavaScript),
    ("mjs", Language::JavaScript),
    ("cjs", Language::JavaScript),
    ("jsx", Language::JavaScript),
    ("ts", Language::TypeScript),
    ("mts", Language::TypeScript),
    ("cts", Language::TypeScript),
    ("tsx", Language::TypeScript),
    ("py", Language::Python),
    ("pyw", Language::Python),
    ("java", Language::Java),
    ("c", Language::C),
    ("h", Language::C),
    ("cpp", Language::Cpp),
    ("cc", Language::Cpp),
    ("cxx", Language::Cpp),
    ("hpp", Language::Cpp),
    ("go", Language::Go),
    ("rs", Language::Rust),
];

impl Language {
    /// Every language tag, in declaration order.
    pub const ALL: [Language; 8] = [
        Language::JavaScript,
        Language::TypeScript,
        Language::Python,
        Language::Java,
        Language::C,
        Language::Cpp,
        Language::Go,
        Language::Rust,
    ];

    /// Canonical lowercase tag
    pub fn as_str(self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Python => "python",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Go => "go",
            Language::Rust => "rust",
        }
    }

    /// File extensions mapped to this language
    pub fn extensions(self) -> impl Iterator<Item = &'static str> {
        EXTENSIONS
            .iter()
            .filter(move |(_, lang)| *lang == self)
            .map(|(ext, _)| *ext)
    }

    /// Whether a file written in `other` can be inlined into a run of `self`.
    ///
    /// TypeScript runs accept JavaScript siblings; the reverse is not true
    /// because JavaScript runs skip the type-stripping pass.
    pub fn shares_scope_with(self, other: Language) -> bool {
        match (self, other) {
            (a, b) if a == b => true,
            (Language::TypeScript, Language::JavaScript) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown language '{0}'")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    /// Parses a declared language tag; accepts common aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        let lang = match tag.as_str() {
            "javascript" | "js" | "node" | "ecmascript" => Language::JavaScript,
            "typescript" | "ts" => Language::TypeScript,
            "python" | "py" | "python3" => Language::Python,
            "java" => Language::Java,
            "c" => Language::C,
            "cpp" | "c++" | "cplusplus" => Language::Cpp,
            "go" | "golang" => Language::Go,
            "rust" | "rs" => Language::Rust,
            _ => return Err(UnknownLanguage(s.to_string())),
        };
        Ok(lang)
    }
}

/// Map a file name to its language using the fixed extension table.
///
/// Returns `None` for files without an extension or with an unrecognized one.
pub fn detect_language(file_name: &str) -> Option<Language> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, lang)| *lang)
}

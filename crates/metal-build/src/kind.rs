//! Source language kinds and their compile strategies

use crate::error::{BuildError, BuildResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Language kind of a source set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// C translation units
    C,
    /// Header-only C++ (never compiled)
    Cpp,
    /// C++ translation units
    Cxx,
    /// C++20 module interface units
    Ixx,
    /// Assembly
    Asm,
}

/// How units of a kind are turned into outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStrategy {
    /// No toolchain call, no output
    HeaderOnly,
    /// One object file per unit
    Object,
    /// A precompiled module interface plus an object file
    ModuleInterface,
}

impl SourceKind {
    /// All kinds, in declaration order
    pub const ALL: [SourceKind; 5] = [
        SourceKind::C,
        SourceKind::Cpp,
        SourceKind::Cxx,
        SourceKind::Ixx,
        SourceKind::Asm,
    ];

    /// Name used in configuration files and output paths
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Cxx => "cxx",
            Self::Ixx => "ixx",
            Self::Asm => "asm",
        }
    }

    pub fn strategy(&self) -> CompileStrategy {
        match self {
            Self::Cpp => CompileStrategy::HeaderOnly,
            Self::Ixx => CompileStrategy::ModuleInterface,
            Self::C | Self::Cxx | Self::Asm => CompileStrategy::Object,
        }
    }

    /// File extensions picked up when a source entry names a directory
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::C => &["c"],
            Self::Cpp => &["h", "hh", "hpp", "hxx", "inl"],
            Self::Cxx => &["cpp", "cxx", "cc", "c++"],
            Self::Ixx => &["ixx", "cppm", "mpp"],
            Self::Asm => &["s", "S", "asm"],
        }
    }

    /// Whether `path` has one of this kind's extensions
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions().contains(&e))
            .unwrap_or(false)
    }

    /// Whether a source set of this kind must list at least one file
    pub fn requires_sources(&self) -> bool {
        self.strategy() != CompileStrategy::HeaderOnly
    }
}

impl FromStr for SourceKind {
    type Err = BuildError;

    fn from_str(s: &str) -> BuildResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| BuildError::configuration(format!("unknown source kind '{}'", s)))
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SourceKind::C, CompileStrategy::Object)]
    #[case(SourceKind::Cpp, CompileStrategy::HeaderOnly)]
    #[case(SourceKind::Cxx, CompileStrategy::Object)]
    #[case(SourceKind::Ixx, CompileStrategy::ModuleInterface)]
    #[case(SourceKind::Asm, CompileStrategy::Object)]
    fn test_strategy(#[case] kind: SourceKind, #[case] strategy: CompileStrategy) {
        assert_eq!(kind.strategy(), strategy);
    }

    #[test]
    fn test_parse_roundtrips_display() {
        for kind in SourceKind::ALL {
            assert_eq!(kind.to_string().parse::<SourceKind>().unwrap(), kind);
        }
        assert!("rust".parse::<SourceKind>().is_err());
    }

    #[rstest]
    #[case("src/main.c", SourceKind::C, true)]
    #[case("include/foo.hpp", SourceKind::Cpp, true)]
    #[case("src/foo.cpp", SourceKind::Cxx, true)]
    #[case("src/foo.cpp", SourceKind::Cpp, false)]
    #[case("src/greet.ixx", SourceKind::Ixx, true)]
    #[case("boot/start.S", SourceKind::Asm, true)]
    #[case("README", SourceKind::C, false)]
    fn test_extension_matching(#[case] path: &str, #[case] kind: SourceKind, #[case] expected: bool) {
        assert_eq!(kind.matches(Path::new(path)), expected);
    }

    #[test]
    fn test_header_only_may_be_empty() {
        assert!(!SourceKind::Cpp.requires_sources());
        assert!(SourceKind::Cxx.requires_sources());
    }
}

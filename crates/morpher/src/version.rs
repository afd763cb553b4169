//! Startup check of dependency versions.
//!
//! Requirements use npm range syntax (`2.x.x`, `^1.2.3`, `~1.2`, `>=1 <2`,
//! `1.2.3 - 2`, `1.x || >=3`). The installed side comes from explicit
//! `(name, version)` pairs or a lockfile with `[[package]]` entries.

use crate::error::{ErrorCode, ResultExt, SdkError, SdkResult};
use indexmap::IndexMap;
use serde::Deserialize;
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Packages the framework needs, with their accepted version ranges.
pub const FRAMEWORK_REQUIREMENTS: &[(&str, &str)] = &[
    ("apollo-server-express", "2.x.x"),
    ("graphql", "14.x.x"),
    ("graphql-load", "0.1.x"),
    ("graphql-type-json", "0.x.x"),
    ("graphql-tools", "4.x.x"),
];

/// Malformed version or range text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("Invalid version \"{0}\"")]
    InvalidVersion(String),
    #[error("Invalid version range \"{0}\"")]
    InvalidRange(String),
}

/// A semantic version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    /// Pre-release identifiers, e.g. `beta.1`.
    pub prerelease: Option<String>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
        }
    }

    /// Parses `1.2.3`, `v1.2.3` or `1.2.3-beta.1+build`.
    pub fn parse(text: &str) -> Result<Self, RangeError> {
        let invalid = || RangeError::InvalidVersion(text.to_string());
        let partial = Partial::parse(text).ok_or_else(invalid)?;
        match (partial.major, partial.minor, partial.patch) {
            (Some(major), Some(minor), Some(patch)) => Ok(Self {
                major,
                minor,
                patch,
                prerelease: partial.prerelease,
            }),
            _ => Err(invalid()),
        }
    }

    fn triple(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.triple()
            .cmp(&other.triple())
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

/// Numeric identifiers sort numerically and below alphanumeric ones.
fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// A version with wildcard components (`1.x`, `2`, `*`).
#[derive(Debug, Clone, Default)]
struct Partial {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
    prerelease: Option<String>,
}

impl Partial {
    fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let text = text.strip_prefix('=').unwrap_or(text);
        let text = text
            .strip_prefix('v')
            .or_else(|| text.strip_prefix('V'))
            .unwrap_or(text);
        let text = text.split_once('+').map_or(text, |(v, _build)| v);
        if text.is_empty() {
            return Some(Self::default());
        }

        let (core, prerelease) = match text.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
            Some(_) => return None,
            None => (text, None),
        };

        let mut parts = core.split('.');
        let mut component = || -> Option<Option<u64>> {
            match parts.next() {
                None => Some(None),
                Some("x" | "X" | "*") => Some(None),
                Some(n) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => {
                    n.parse().ok().map(Some)
                }
                Some(_) => None,
            }
        };
        let major = component()?;
        let minor = component()?;
        let patch = component()?;
        if parts.next().is_some() {
            return None;
        }
        // A wildcard cannot be followed by a concrete component.
        if (major.is_none() && (minor.is_some() || patch.is_some()))
            || (minor.is_none() && patch.is_some())
        {
            return None;
        }

        Some(Self {
            major,
            minor,
            patch,
            prerelease,
        })
    }

    fn floor(&self) -> Version {
        Version {
            major: self.major.unwrap_or(0),
            minor: self.minor.unwrap_or(0),
            patch: self.patch.unwrap_or(0),
            prerelease: self.prerelease.clone(),
        }
    }

    fn is_exact(&self) -> bool {
        self.patch.is_some()
    }

    /// The first version above every match of this partial (`1.2` -> `1.3.0`).
    ///
    /// The inner `None` means unbounded (`*`); the outer `None` means the
    /// bumped component does not fit in a `u64`.
    fn ceiling(&self) -> Option<Option<Version>> {
        match (self.major, self.minor) {
            (Some(major), None) => Some(Some(Version::new(bump(major)?, 0, 0))),
            (Some(major), Some(minor)) => Some(Some(Version::new(major, bump(minor)?, 0))),
            (None, _) => Some(None),
        }
    }
}

fn bump(component: u64) -> Option<u64> {
    component.checked_add(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparator {
    op: Op,
    version: Version,
}

impl Comparator {
    fn new(op: Op, version: Version) -> Self {
        Self { op, version }
    }

    fn matches(&self, version: &Version) -> bool {
        let ord = version.cmp(&self.version);
        match self.op {
            Op::Eq => ord == Ordering::Equal,
            Op::Gt => ord == Ordering::Greater,
            Op::Gte => ord != Ordering::Less,
            Op::Lt => ord == Ordering::Less,
            Op::Lte => ord != Ordering::Greater,
        }
    }
}

/// A parsed version range: a union of comparator sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionReq {
    sets: Vec<Vec<Comparator>>,
}

/// Matches no version at all (`<0.0.0-0`).
fn nothing() -> Comparator {
    Comparator::new(
        Op::Lt,
        Version {
            prerelease: Some("0".to_string()),
            ..Version::new(0, 0, 0)
        },
    )
}

impl VersionReq {
    /// Parses an npm-style range expression.
    pub fn parse(text: &str) -> Result<Self, RangeError> {
        let sets = text
            .split("||")
            .map(|set| parse_set(set).ok_or_else(|| RangeError::InvalidRange(text.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { sets })
    }

    /// Returns true if `version` falls within the range.
    pub fn matches(&self, version: &Version) -> bool {
        self.sets.iter().any(|set| {
            set.iter().all(|c| c.matches(version))
                && (version.prerelease.is_none()
                    || set.iter().any(|c| {
                        c.version.prerelease.is_some() && c.version.triple() == version.triple()
                    }))
        })
    }
}

fn parse_set(text: &str) -> Option<Vec<Comparator>> {
    let tokens: Vec<&str> = text.split_whitespace().collect();

    if let [low, "-", high] = tokens.as_slice() {
        return hyphen(low, high);
    }

    let mut comparators = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let mut token = tokens[i].to_string();
        // `>= 1.2.3` is written with a space after the operator.
        if token.bytes().all(|b| matches!(b, b'<' | b'>' | b'=' | b'^' | b'~')) {
            i += 1;
            token.push_str(tokens.get(i)?);
        }
        comparators.extend(parse_comparator(&token)?);
        i += 1;
    }
    Some(comparators)
}

fn hyphen(low: &str, high: &str) -> Option<Vec<Comparator>> {
    let low = Partial::parse(low)?;
    let high = Partial::parse(high)?;
    let mut set = vec![Comparator::new(Op::Gte, low.floor())];
    if high.is_exact() {
        set.push(Comparator::new(Op::Lte, high.floor()));
    } else if let Some(ceiling) = high.ceiling()? {
        set.push(Comparator::new(Op::Lt, ceiling));
    }
    Some(set)
}

fn parse_comparator(token: &str) -> Option<Vec<Comparator>> {
    if let Some(rest) = token.strip_prefix('^') {
        return caret(&Partial::parse(rest)?);
    }
    if let Some(rest) = token.strip_prefix('~') {
        let rest = rest.strip_prefix('>').unwrap_or(rest);
        return tilde(&Partial::parse(rest)?);
    }

    let (op, rest) = [
        (">=", Op::Gte),
        ("<=", Op::Lte),
        (">", Op::Gt),
        ("<", Op::Lt),
        ("=", Op::Eq),
    ]
    .into_iter()
    .find_map(|(prefix, op)| token.strip_prefix(prefix).map(|rest| (op, rest)))
    .unwrap_or((Op::Eq, token));

    let partial = Partial::parse(rest)?;
    if partial.is_exact() {
        return Some(vec![Comparator::new(op, partial.floor())]);
    }

    let Some(ceiling) = partial.ceiling()? else {
        // `*` and friends.
        return Some(match op {
            Op::Gt | Op::Lt => vec![nothing()],
            _ => Vec::new(),
        });
    };
    Some(match op {
        Op::Eq => vec![
            Comparator::new(Op::Gte, partial.floor()),
            Comparator::new(Op::Lt, ceiling),
        ],
        Op::Gt | Op::Lte => vec![Comparator::new(
            if op == Op::Gt { Op::Gte } else { Op::Lt },
            ceiling,
        )],
        Op::Gte | Op::Lt => vec![Comparator::new(op, partial.floor())],
    })
}

fn caret(partial: &Partial) -> Option<Vec<Comparator>> {
    let Some(major) = partial.major else {
        return Some(Vec::new());
    };
    let floor = partial.floor();
    let ceiling = match (major, partial.minor, partial.patch) {
        (0, Some(0), Some(patch)) => Version::new(0, 0, bump(patch)?),
        (0, Some(minor), _) => Version::new(0, bump(minor)?, 0),
        (major, _, _) => Version::new(bump(major)?, 0, 0),
    };
    Some(vec![
        Comparator::new(Op::Gte, floor),
        Comparator::new(Op::Lt, ceiling),
    ])
}

fn tilde(partial: &Partial) -> Option<Vec<Comparator>> {
    let Some(major) = partial.major else {
        return Some(Vec::new());
    };
    let ceiling = match partial.minor {
        Some(minor) => Version::new(major, bump(minor)?, 0),
        None => Version::new(bump(major)?, 0, 0),
    };
    Some(vec![
        Comparator::new(Op::Gte, partial.floor()),
        Comparator::new(Op::Lt, ceiling),
    ])
}

/// Returns true if `version` satisfies `range`.
pub fn satisfies(version: &str, range: &str) -> Result<bool, RangeError> {
    Ok(VersionReq::parse(range)?.matches(&Version::parse(version)?))
}

/// The set of installed packages and their versions.
#[derive(Debug, Clone, Default)]
pub struct InstalledPackages {
    packages: IndexMap<String, Vec<String>>,
}

#[derive(Deserialize)]
struct Lockfile {
    #[serde(default)]
    package: Vec<LockedPackage>,
}

#[derive(Deserialize)]
struct LockedPackage {
    name: String,
    version: String,
}

impl InstalledPackages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the set from `(name, version)` pairs.
    pub fn from_pairs<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        let mut installed = Self::new();
        for (name, version) in pairs {
            installed.insert(name, version);
        }
        installed
    }

    /// Reads `[[package]]` entries with `name` and `version` keys.
    pub fn from_lockfile(raw: &str) -> SdkResult<Self> {
        let lockfile: Lockfile =
            toml::from_str(raw).map_sdk_err_with(ErrorCode::ConfigError, "invalid lockfile")?;
        Ok(Self::from_pairs(
            lockfile.package.into_iter().map(|p| (p.name, p.version)),
        ))
    }

    /// Reads a lockfile from disk.
    pub fn from_lockfile_path(path: impl AsRef<Path>) -> SdkResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_sdk_err_with(
            ErrorCode::ConfigError,
            format!("cannot read {}", path.display()),
        )?;
        Self::from_lockfile(&raw)
    }

    /// Records an installed version. A package may be present in several versions.
    pub fn insert(&mut self, name: impl Into<String>, version: impl Into<String>) {
        self.packages
            .entry(name.into())
            .or_default()
            .push(version.into());
    }

    /// Versions installed for `name`.
    pub fn versions(&self, name: &str) -> &[String] {
        self.packages.get(name).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// A requirement the installed packages do not meet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub name: String,
    /// Installed versions; empty when the package is missing.
    pub installed: Vec<String>,
    pub required: String,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.installed.is_empty() {
            write!(f, "{} not installed (requires {})", self.name, self.required)
        } else {
            write!(
                f,
                "{}@{} (requires {})",
                self.name,
                self.installed.join(", "),
                self.required
            )
        }
    }
}

/// Every unmet requirement found by [`check_versions`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsatisfied package versions: {}", .mismatches.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
pub struct VersionError {
    pub mismatches: Vec<Mismatch>,
}

impl From<VersionError> for SdkError {
    fn from(err: VersionError) -> Self {
        let packages: Vec<&str> = err.mismatches.iter().map(|m| m.name.as_str()).collect();
        SdkError::new(ErrorCode::VersionMismatch, err.to_string()).with_extension("packages", packages)
    }
}

/// Checks `installed` against `requirements`.
///
/// A requirement is met when any installed version of the package satisfies
/// its range. An unparseable range or version never satisfies.
pub fn check_versions(
    requirements: &[(&str, &str)],
    installed: &InstalledPackages,
) -> Result<(), VersionError> {
    let mut mismatches = Vec::new();

    for &(name, range) in requirements {
        let versions = installed.versions(name);
        let satisfied = match VersionReq::parse(range) {
            Ok(req) => versions
                .iter()
                .any(|v| Version::parse(v).is_ok_and(|v| req.matches(&v))),
            Err(err) => {
                warn!(package = name, "{err}");
                false
            }
        };
        debug!(package = name, range, ?versions, satisfied, "checked package version");

        if !satisfied {
            mismatches.push(Mismatch {
                name: name.to_string(),
                installed: versions.to_vec(),
                required: range.to_string(),
            });
        }
    }

    if mismatches.is_empty() {
        Ok(())
    } else {
        Err(VersionError { mismatches })
    }
}

/// Checks `installed` against [`FRAMEWORK_REQUIREMENTS`].
pub fn check_framework(installed: &InstalledPackages) -> Result<(), VersionError> {
    check_versions(FRAMEWORK_REQUIREMENTS, installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(version: &str, range: &str) -> bool {
        satisfies(version, range).unwrap()
    }

    #[test]
    fn test_x_ranges() {
        assert!(ok("2.14.2", "2.x.x"));
        assert!(!ok("3.0.0", "2.x.x"));
        assert!(ok("0.1.9", "0.1.x"));
        assert!(!ok("0.2.0", "0.1.x"));
        assert!(ok("14.0.0", "14"));
        assert!(ok("7.7.7", "*"));
        assert!(ok("7.7.7", ""));
    }

    #[test]
    fn test_caret_and_tilde() {
        assert!(ok("1.9.0", "^1.2.3"));
        assert!(!ok("1.2.2", "^1.2.3"));
        assert!(!ok("2.0.0", "^1.2.3"));
        assert!(ok("0.2.9", "^0.2.3"));
        assert!(!ok("0.3.0", "^0.2.3"));
        assert!(!ok("0.0.4", "^0.0.3"));
        assert!(ok("1.2.9", "~1.2.3"));
        assert!(!ok("1.3.0", "~1.2.3"));
        assert!(ok("1.9.0", "~1"));
    }

    #[test]
    fn test_comparators_and_unions() {
        assert!(ok("1.5.0", ">=1.2.3 <2"));
        assert!(ok("1.5.0", ">= 1.2.3 < 2.0.0"));
        assert!(!ok("2.0.0", ">=1.2.3 <2"));
        assert!(ok("2.1.0", ">1"));
        assert!(!ok("1.9.0", ">1"));
        assert!(ok("1.2.9", "<=1.2"));
        assert!(ok("3.1.0", "1.x || >=3"));
        assert!(!ok("2.5.0", "1.x || >=3"));
        assert!(ok("v1.2.3", "=1.2.3"));
    }

    #[test]
    fn test_hyphen_ranges() {
        assert!(ok("2.3.4", "1.2.3 - 2.3.4"));
        assert!(!ok("2.3.5", "1.2.3 - 2.3.4"));
        assert!(ok("2.9.0", "1.2 - 2"));
        assert!(!ok("3.0.0", "1.2 - 2"));
    }

    #[test]
    fn test_prerelease_rule() {
        assert!(!ok("2.1.0-beta.1", "2.x.x"));
        assert!(ok("1.2.3-beta.2", ">=1.2.3-beta.1 <2"));
        assert!(!ok("1.2.4-beta.2", ">=1.2.3-beta.1 <2"));
        assert!(Version::parse("1.0.0-alpha").unwrap() < Version::parse("1.0.0-alpha.1").unwrap());
        assert!(Version::parse("1.0.0-2").unwrap() < Version::parse("1.0.0-rc").unwrap());
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(
            satisfies("1.2", "1.x"),
            Err(RangeError::InvalidVersion(_))
        ));
        assert!(matches!(
            satisfies("1.2.3", "^one"),
            Err(RangeError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_unbumpable_components_are_invalid_ranges() {
        for range in [
            "18446744073709551615.x",
            "1.18446744073709551615",
            "^0.0.18446744073709551615",
            "^18446744073709551615.0.0",
            "~18446744073709551615",
            "1.0.0 - 18446744073709551615",
        ] {
            assert!(
                matches!(satisfies("1.0.0", range), Err(RangeError::InvalidRange(_))),
                "{range}"
            );
        }
        assert!(ok("18446744073709551615.0.0", ">=1"));

        let installed = InstalledPackages::from_pairs([("a", "1.0.0")]);
        let err = check_versions(&[("a", "~18446744073709551615")], &installed).unwrap_err();
        assert_eq!(err.mismatches[0].name, "a");
    }

    #[test]
    fn test_check_reports_every_mismatch() {
        let installed = InstalledPackages::from_pairs([
            ("apollo-server-express", "2.9.16"),
            ("graphql", "15.0.0"),
            ("graphql-load", "0.1.1"),
            ("graphql-type-json", "0.3.1"),
        ]);

        let err = check_framework(&installed).unwrap_err();
        assert_eq!(err.mismatches.len(), 2);
        assert_eq!(
            err.to_string(),
            "Unsatisfied package versions: graphql@15.0.0 (requires 14.x.x); graphql-tools not installed (requires 4.x.x)"
        );

        let sdk: SdkError = err.into();
        assert_eq!(sdk.code, ErrorCode::VersionMismatch);
    }

    #[test]
    fn test_lockfile() {
        let installed = InstalledPackages::from_lockfile(
            r#"
            version = 3

            [[package]]
            name = "graphql"
            version = "14.6.0"

            [[package]]
            name = "graphql"
            version = "15.0.0"
            "#,
        )
        .unwrap();

        assert_eq!(installed.versions("graphql"), ["14.6.0", "15.0.0"]);
        assert!(check_versions(&[("graphql", "14.x.x")], &installed).is_ok());
        assert!(InstalledPackages::from_lockfile("[[package]]\nname = 1").is_err());
    }
}

//! Semver ranges as understood by CDN version lookups.
//!
//! A range is classified by how a registry lookup can answer it: wildcard
//! ranges ask for the latest release, major ranges for the latest release of
//! one major, stable ranges for the latest patch of one minor. Exact versions
//! need no lookup at all. Anything else is a complex range and is answered
//! through the wildcard and major lookups.

use crate::error::{Error, Result};
use semver::{Comparator, Op, Prerelease, Version, VersionReq};
use std::fmt;

/// How a range is answered by a registry lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeKind {
    /// `*`, `x`, or empty.
    Wildcard,
    /// `^1.2.3`, `1`, `1.x`, `~1`.
    Major,
    /// `~1.2.3`, `1.2`, `1.2.x`, `^0.2.3`.
    Stable,
    /// `1.2.3`, `=1.2.3`, `^0.0.3`.
    Exact,
    /// A dist-tag such as `latest` or `next`.
    Tag(String),
    /// Comparator sets, hyphen ranges.
    Complex,
}

/// A single semver range (no `||` alternatives).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemverRange {
    raw: String,
    kind: RangeKind,
    req: Option<VersionReq>,
    floor: Option<Version>,
}

struct Partial {
    major: u64,
    minor: Option<u64>,
    patch: Option<u64>,
    pre: Prerelease,
}

impl SemverRange {
    /// Parse one range.
    ///
    /// # Errors
    /// Returns an error when the input is neither a range nor a tag.
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.trim();

        if raw.is_empty() || matches!(raw, "*" | "x" | "X") {
            return Ok(Self::wildcard());
        }

        let bare = raw.strip_prefix('=').unwrap_or(raw).trim();
        let bare = bare.strip_prefix('v').unwrap_or(bare);
        if let Ok(version) = Version::parse(bare) {
            return Ok(Self::exact(&version));
        }

        if let Some(partial) = raw.strip_prefix('^').and_then(parse_partial) {
            return Ok(caret(raw, &partial));
        }

        let tilde = raw
            .strip_prefix("~>")
            .or_else(|| raw.strip_prefix('~'))
            .and_then(parse_partial);
        if let Some(partial) = tilde {
            return Ok(tilde_range(raw, &partial));
        }

        if let Some(partial) = parse_partial(raw) {
            return Ok(x_range(raw, &partial));
        }

        if is_tag(raw) {
            return Ok(Self {
                raw: raw.to_string(),
                kind: RangeKind::Tag(raw.to_string()),
                req: None,
                floor: None,
            });
        }

        let req = to_version_req(raw)?;
        let floor = req_floor(&req);
        Ok(Self {
            raw: raw.to_string(),
            kind: RangeKind::Complex,
            req: Some(req),
            floor: Some(floor),
        })
    }

    #[must_use]
    pub fn wildcard() -> Self {
        Self {
            raw: "*".to_string(),
            kind: RangeKind::Wildcard,
            req: None,
            floor: None,
        }
    }

    /// The range containing exactly `version`.
    #[must_use]
    pub fn exact(version: &Version) -> Self {
        Self {
            raw: version.to_string(),
            kind: RangeKind::Exact,
            req: None,
            floor: Some(version.clone()),
        }
    }

    /// `^version`.
    #[must_use]
    pub fn caret(version: &Version) -> Self {
        let partial = Partial {
            major: version.major,
            minor: Some(version.minor),
            patch: Some(version.patch),
            pre: version.pre.clone(),
        };
        caret(&format!("^{version}"), &partial)
    }

    #[must_use]
    pub fn kind(&self) -> &RangeKind {
        &self.kind
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.kind == RangeKind::Wildcard
    }

    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.kind == RangeKind::Exact
    }

    /// The dist-tag name for tag ranges.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            RangeKind::Tag(tag) => Some(tag),
            _ => None,
        }
    }

    /// Lowest version the range admits, when it has one.
    #[must_use]
    pub fn floor(&self) -> Option<&Version> {
        self.floor.as_ref()
    }

    /// Lookup token for the latest release of the floor's major.
    #[must_use]
    pub fn major_token(&self) -> Option<String> {
        self.floor.as_ref().map(|v| v.major.to_string())
    }

    /// Lookup token for the latest patch of the floor's minor.
    #[must_use]
    pub fn minor_token(&self) -> Option<String> {
        self.floor.as_ref().map(|v| format!("{}.{}", v.major, v.minor))
    }

    /// Whether `version` lies in the range.
    ///
    /// With `unstable`, prereleases are judged by their release triple.
    #[must_use]
    pub fn has(&self, version: &Version, unstable: bool) -> bool {
        let stable_or_allowed = unstable || version.pre.is_empty();
        match &self.kind {
            RangeKind::Wildcard => stable_or_allowed,
            RangeKind::Tag(tag) => tag == "latest" && stable_or_allowed,
            RangeKind::Exact => self.floor.as_ref() == Some(version),
            _ => {
                let Some(req) = &self.req else {
                    return false;
                };
                if req.matches(version) {
                    return true;
                }
                unstable
                    && !version.pre.is_empty()
                    && req.matches(&Version::new(version.major, version.minor, version.patch))
            }
        }
    }

    /// [`Self::has`] for a version string. Non-semver versions never match.
    #[must_use]
    pub fn has_str(&self, version: &str, unstable: bool) -> bool {
        Version::parse(version).is_ok_and(|v| self.has(&v, unstable))
    }

    /// Highest version in `versions` that the range contains.
    #[must_use]
    pub fn best_match<'a, I>(&self, versions: I, unstable: bool) -> Option<&'a Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        versions
            .into_iter()
            .filter(|v| self.has(v, unstable))
            .max()
    }

    /// Ordering key: wildcards first, then by descending floor.
    pub(crate) fn sort_key(&self) -> (bool, Option<&Version>) {
        (!self.is_wildcard() && self.tag() != Some("latest"), self.floor.as_ref())
    }
}

impl fmt::Display for SemverRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parse `a || b || c` into its alternatives. Blank alternatives are dropped.
///
/// # Errors
/// Returns an error if any alternative fails to parse.
pub fn parse_ranges(input: &str) -> Result<Vec<SemverRange>> {
    let mut ranges = Vec::new();
    for alt in input.split("||") {
        if alt.trim().is_empty() && !ranges.is_empty() {
            continue;
        }
        ranges.push(SemverRange::parse(alt)?);
    }
    if ranges.is_empty() {
        ranges.push(SemverRange::wildcard());
    }
    Ok(ranges)
}

/// Sort ranges so the highest is tried first.
pub fn sort_descending(ranges: &mut [SemverRange]) {
    ranges.sort_by(|a, b| {
        let (a_bounded, a_floor) = a.sort_key();
        let (b_bounded, b_floor) = b.sort_key();
        a_bounded.cmp(&b_bounded).then_with(|| b_floor.cmp(&a_floor))
    });
}

fn parse_partial(input: &str) -> Option<Partial> {
    let input = input.trim();
    let input = input.strip_prefix('v').unwrap_or(input);
    if input.is_empty() {
        return None;
    }

    let (release, pre) = match input.split_once('-') {
        Some((release, pre)) => (release, Prerelease::new(pre).ok()?),
        None => (input, Prerelease::EMPTY),
    };

    let mut parts = release.split('.');
    let major = parts.next()?.parse::<u64>().ok()?;
    let minor = parse_component(parts.next())?;
    let patch = parse_component(parts.next())?;
    if parts.next().is_some() || (minor.is_none() && patch.is_some()) {
        return None;
    }
    if !pre.is_empty() && patch.is_none() {
        return None;
    }

    Some(Partial {
        major,
        minor,
        patch,
        pre,
    })
}

/// `Some(None)` for a missing or wildcard component, `None` if malformed.
#[allow(clippy::option_option)]
fn parse_component(part: Option<&str>) -> Option<Option<u64>> {
    match part {
        None | Some("x" | "X" | "*") => Some(None),
        Some(n) => n.parse::<u64>().ok().map(Some),
    }
}

fn partial_floor(p: &Partial) -> Version {
    let mut v = Version::new(p.major, p.minor.unwrap_or(0), p.patch.unwrap_or(0));
    v.pre = p.pre.clone();
    v
}

fn bounded(raw: &str, kind: RangeKind, floor: Version, upper: &Version) -> SemverRange {
    let req = VersionReq {
        comparators: vec![
            comparator(Op::GreaterEq, &floor),
            comparator(Op::Less, upper),
        ],
    };
    SemverRange {
        raw: raw.to_string(),
        kind,
        req: Some(req),
        floor: Some(floor),
    }
}

fn comparator(op: Op, v: &Version) -> Comparator {
    Comparator {
        op,
        major: v.major,
        minor: Some(v.minor),
        patch: Some(v.patch),
        pre: v.pre.clone(),
    }
}

fn caret(raw: &str, p: &Partial) -> SemverRange {
    let floor = partial_floor(p);
    match (p.major, p.minor, p.patch) {
        (0, None, _) => bounded(raw, RangeKind::Major, floor, &Version::new(1, 0, 0)),
        (0, Some(0), None) => bounded(raw, RangeKind::Stable, floor, &Version::new(0, 1, 0)),
        (0, Some(0), Some(_)) => SemverRange {
            raw: raw.to_string(),
            kind: RangeKind::Exact,
            req: None,
            floor: Some(floor),
        },
        (0, Some(minor), _) => {
            bounded(raw, RangeKind::Stable, floor, &Version::new(0, minor + 1, 0))
        }
        (major, _, _) => bounded(raw, RangeKind::Major, floor, &Version::new(major + 1, 0, 0)),
    }
}

fn tilde_range(raw: &str, p: &Partial) -> SemverRange {
    let floor = partial_floor(p);
    match p.minor {
        None => bounded(raw, RangeKind::Major, floor, &Version::new(p.major + 1, 0, 0)),
        Some(minor) => bounded(
            raw,
            RangeKind::Stable,
            floor,
            &Version::new(p.major, minor + 1, 0),
        ),
    }
}

fn x_range(raw: &str, p: &Partial) -> SemverRange {
    match (p.minor, p.patch) {
        (None, _) => bounded(
            raw,
            RangeKind::Major,
            partial_floor(p),
            &Version::new(p.major + 1, 0, 0),
        ),
        (Some(minor), None) => bounded(
            raw,
            RangeKind::Stable,
            partial_floor(p),
            &Version::new(p.major, minor + 1, 0),
        ),
        (Some(_), Some(_)) => SemverRange::exact(&partial_floor(p)),
    }
}

fn is_tag(raw: &str) -> bool {
    let mut chars = raw.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

fn req_floor(req: &VersionReq) -> Version {
    req.comparators
        .iter()
        .filter(|c| !matches!(c.op, Op::Less | Op::LessEq))
        .map(|c| {
            let mut v = Version::new(c.major, c.minor.unwrap_or(0), c.patch.unwrap_or(0));
            v.pre = c.pre.clone();
            v
        })
        .max()
        .unwrap_or_else(|| Version::new(0, 0, 0))
}

/// Convert an npm comparator set into a [`VersionReq`].
///
/// Handles hyphen ranges (`1.0.0 - 2.0.0`) and space separated comparators
/// (`>= 2.1.2 < 3.0.0`).
fn to_version_req(range: &str) -> Result<VersionReq> {
    let invalid = |e: semver::Error| Error::invalid_input(format!("Invalid range '{range}': {e}"));

    if let Some((start, end)) = range.split_once(" - ") {
        let (start, end) = (start.trim(), end.trim());
        if !start.is_empty() && !end.is_empty() {
            return VersionReq::parse(&format!(">={start}, <={end}")).map_err(invalid);
        }
    }

    VersionReq::parse(&join_comparators(range)).map_err(invalid)
}

/// `>= 2.1.2 < 3` becomes `>=2.1.2, <3`.
fn join_comparators(range: &str) -> String {
    let mut out = String::new();
    let mut pending_op = String::new();

    for token in range.split_whitespace() {
        if token.chars().any(|c| c.is_ascii_digit()) {
            if !out.is_empty() {
                out.push_str(", ");
            }
            out.push_str(&pending_op);
            out.push_str(token);
            pending_op.clear();
        } else {
            pending_op.push_str(token);
        }
    }

    if out.is_empty() {
        range.to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn r(s: &str) -> SemverRange {
        SemverRange::parse(s).unwrap()
    }

    #[test]
    fn test_classify() {
        assert_eq!(r("").kind(), &RangeKind::Wildcard);
        assert_eq!(r("*").kind(), &RangeKind::Wildcard);
        assert_eq!(r("^16.8.0").kind(), &RangeKind::Major);
        assert_eq!(r("16").kind(), &RangeKind::Major);
        assert_eq!(r("16.x").kind(), &RangeKind::Major);
        assert_eq!(r("~4").kind(), &RangeKind::Major);
        assert_eq!(r("~4.1.1").kind(), &RangeKind::Stable);
        assert_eq!(r("4.1").kind(), &RangeKind::Stable);
        assert_eq!(r("4.1.x").kind(), &RangeKind::Stable);
        assert_eq!(r("^0.2.3").kind(), &RangeKind::Stable);
        assert_eq!(r("^0.0.3").kind(), &RangeKind::Exact);
        assert_eq!(r("17.0.1").kind(), &RangeKind::Exact);
        assert_eq!(r("=v17.0.1").kind(), &RangeKind::Exact);
        assert_eq!(r("next").kind(), &RangeKind::Tag("next".to_string()));
        assert_eq!(r(">=2.1.2 <3").kind(), &RangeKind::Complex);
    }

    #[test]
    fn test_tokens() {
        let range = r("^16.8.0");
        assert_eq!(range.major_token().as_deref(), Some("16"));
        assert_eq!(range.minor_token().as_deref(), Some("16.8"));
        assert_eq!(range.floor(), Some(&v("16.8.0")));
        assert_eq!(r("*").major_token(), None);
    }

    #[test]
    fn test_has() {
        assert!(r("^16.8.0").has(&v("16.14.0"), false));
        assert!(!r("^16.8.0").has(&v("17.0.0"), false));
        assert!(!r("^16.8.0").has(&v("16.7.0"), false));
        assert!(r("~4.1.0").has(&v("4.1.9"), false));
        assert!(!r("~4.1.0").has(&v("4.2.0"), false));
        assert!(r("17.0.1").has(&v("17.0.1"), false));
        assert!(!r("17.0.1").has(&v("17.0.2"), false));
        assert!(r("*").has(&v("0.0.1"), false));
        assert!(r(">= 2.1.2 < 3.0.0").has(&v("2.5.0"), false));
        assert!(!r(">= 2.1.2 < 3.0.0").has(&v("3.0.0"), false));
        assert!(r("1.0.0 - 2.0.0").has(&v("2.0.0"), false));
        assert!(r("latest").has(&v("9.9.9"), false));
        assert!(!r("next").has(&v("9.9.9"), false));
    }

    #[test]
    fn test_has_prerelease() {
        let pre = v("16.9.0-beta.1");
        assert!(!r("^16.0.0").has(&pre, false));
        assert!(r("^16.0.0").has(&pre, true));
        assert!(!r("*").has(&pre, false));
        assert!(r("*").has(&pre, true));
        assert!(r("^2.0.0-alpha.1").has(&v("2.0.0-alpha.3"), false));
    }

    #[test]
    fn test_has_str_non_semver() {
        assert!(!r("*").has_str("main", true));
        assert!(r("*").has_str("1.0.0", false));
    }

    #[test]
    fn test_best_match() {
        let versions = [v("16.13.0"), v("16.14.0"), v("17.0.2"), v("18.0.0-rc.0")];
        assert_eq!(r("^16").best_match(&versions, false), Some(&versions[1]));
        assert_eq!(r("*").best_match(&versions, false), Some(&versions[2]));
        assert_eq!(r("^18").best_match(&versions, false), None);
        assert_eq!(r("^18").best_match(&versions, true), Some(&versions[3]));
    }

    #[test]
    fn test_parse_ranges_or() {
        let ranges = parse_ranges("^16.8.0 || ^17.0.0||^18").unwrap();
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[2].to_string(), "^18");
    }

    #[test]
    fn test_sort_descending() {
        let mut ranges = parse_ranges("^16.8.0 || * || ^18.0.0 || ^17.0.0").unwrap();
        sort_descending(&mut ranges);
        let order: Vec<String> = ranges.iter().map(ToString::to_string).collect();
        assert_eq!(order, vec!["*", "^18.0.0", "^17.0.0", "^16.8.0"]);
    }

    #[test]
    fn test_caret_constructor() {
        let range = SemverRange::caret(&v("16.14.0"));
        assert_eq!(range.to_string(), "^16.14.0");
        assert_eq!(range.kind(), &RangeKind::Major);
    }

    #[test]
    fn test_invalid_range() {
        assert!(SemverRange::parse("not a range!!!").is_err());
    }
}

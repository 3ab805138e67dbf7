//! NuGet package versions and version ranges, as far as restore detection needs them.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::Prerelease;

/// `major[.minor[.patch[.revision]]][-prerelease][+metadata]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NuGetVersion {
    parts: [u64; 4],
    prerelease: Prerelease,
}

impl FromStr for NuGetVersion {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let without_metadata = s.split_once('+').map_or(s, |(v, _)| v);
        let (release, prerelease) = match without_metadata.split_once('-') {
            Some((release, pre)) => (release, Prerelease::new(pre).map_err(|_| ())?),
            None => (without_metadata, Prerelease::EMPTY),
        };

        let mut parts = [0u64; 4];
        let mut count = 0;
        for (slot, piece) in parts.iter_mut().zip(release.split('.')) {
            *slot = piece.parse().map_err(|_| ())?;
            count += 1;
        }
        if count == 0 || release.split('.').count() > 4 {
            return Err(());
        }
        Ok(Self { parts, prerelease })
    }
}

impl Ord for NuGetVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts).then_with(|| {
            // A release sorts after every prerelease of the same numbers.
            match (self.prerelease.is_empty(), other.prerelease.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.prerelease.cmp(&other.prerelease),
            }
        })
    }
}

impl PartialOrd for NuGetVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NuGetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch, revision] = self.parts;
        write!(f, "{major}.{minor}.{patch}")?;
        if revision != 0 {
            write!(f, ".{revision}")?;
        }
        if !self.prerelease.is_empty() {
            write!(f, "-{}", self.prerelease)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    version: NuGetVersion,
    inclusive: bool,
}

/// A NuGet version range: `1.0`, `[1.0]`, `[1.0, 2.0)`, `(, 2.0]`, `1.*`, `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    min: Option<Bound>,
    max: Option<Bound>,
}

impl VersionRange {
    /// Parse a range; `None` when the text is not a range this module understands.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if text == "*" {
            return Some(Self {
                min: None,
                max: None,
            });
        }

        let first = text.chars().next()?;
        if first == '[' || first == '(' {
            return Self::parse_interval(text);
        }

        if let Some(prefix) = text.strip_suffix("-*") {
            let mut version: NuGetVersion = prefix.parse().ok()?;
            version.prerelease = Prerelease::new("0").ok()?;
            return Some(Self::at_least(version));
        }
        if let Some(prefix) = text.strip_suffix(".*") {
            return Some(Self::at_least(prefix.parse().ok()?));
        }

        Some(Self::at_least(text.parse().ok()?))
    }

    fn at_least(version: NuGetVersion) -> Self {
        Self {
            min: Some(Bound {
                version,
                inclusive: true,
            }),
            max: None,
        }
    }

    fn parse_interval(text: &str) -> Option<Self> {
        let min_inclusive = text.starts_with('[');
        let max_inclusive = match text.chars().last()? {
            ']' => true,
            ')' => false,
            _ => return None,
        };
        let inner = text.get(1..text.len() - 1)?.trim();

        let Some((lo, hi)) = inner.split_once(',') else {
            // `[1.0]` is an exact match; `(1.0)` means nothing.
            if !(min_inclusive && max_inclusive) {
                return None;
            }
            let version: NuGetVersion = inner.parse().ok()?;
            return Some(Self {
                min: Some(Bound {
                    version: version.clone(),
                    inclusive: true,
                }),
                max: Some(Bound {
                    version,
                    inclusive: true,
                }),
            });
        };

        let (lo, hi) = (lo.trim(), hi.trim());
        if lo.is_empty() && hi.is_empty() {
            return None;
        }
        let bound = |s: &str, inclusive: bool| -> Option<Option<Bound>> {
            if s.is_empty() {
                return Some(None);
            }
            Some(Some(Bound {
                version: s.parse().ok()?,
                inclusive,
            }))
        };
        Some(Self {
            min: bound(lo, min_inclusive)?,
            max: bound(hi, max_inclusive)?,
        })
    }

    #[must_use]
    pub fn satisfies(&self, version: &NuGetVersion) -> bool {
        let above_min = self.min.as_ref().is_none_or(|b| match version.cmp(&b.version) {
            Ordering::Greater => true,
            Ordering::Equal => b.inclusive,
            Ordering::Less => false,
        });
        let below_max = self.max.as_ref().is_none_or(|b| match version.cmp(&b.version) {
            Ordering::Less => true,
            Ordering::Equal => b.inclusive,
            Ordering::Greater => false,
        });
        above_min && below_max
    }
}

/// Whether any of `available` satisfies `range`. An unparsable range accepts anything.
pub(crate) fn range_accepts_any<'a>(
    range: &str,
    available: impl IntoIterator<Item = &'a NuGetVersion>,
) -> bool {
    match VersionRange::parse(range) {
        Some(range) => available.into_iter().any(|v| range.satisfies(v)),
        None => {
            tracing::trace!(%range, "unparsable version range; treating as satisfied");
            true
        }
    }
}

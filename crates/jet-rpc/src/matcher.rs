//! Path matchers for `fetch` and `get`.
//!
//! A [`Matcher`] is what applications build; [`PathFilter`] is the object it
//! serializes to under the `path` key of the request parameters. A matcher
//! with no criteria produces no filter at all, which the daemon reads as
//! "every path".

use serde::{Deserialize, Serialize};

/// Declarative path filter.
///
/// Empty strings count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matcher {
    pub contains: Option<String>,
    pub starts_with: Option<String>,
    pub ends_with: Option<String>,
    pub equals: Option<String>,
    pub equals_not: Option<String>,
    pub contains_all_of: Vec<String>,
    pub case_insensitive: bool,
}

impl Matcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(mut self, fragment: impl Into<String>) -> Self {
        self.contains = Some(fragment.into());
        self
    }

    #[must_use]
    pub fn starts_with(mut self, prefix: impl Into<String>) -> Self {
        self.starts_with = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn ends_with(mut self, suffix: impl Into<String>) -> Self {
        self.ends_with = Some(suffix.into());
        self
    }

    #[must_use]
    pub fn equals(mut self, path: impl Into<String>) -> Self {
        self.equals = Some(path.into());
        self
    }

    #[must_use]
    pub fn equals_not(mut self, path: impl Into<String>) -> Self {
        self.equals_not = Some(path.into());
        self
    }

    #[must_use]
    pub fn contains_all_of<I, S>(mut self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contains_all_of = fragments.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    /// The filter document for this matcher, or `None` when nothing is set.
    #[must_use]
    pub fn filter(&self) -> Option<PathFilter> {
        let filter = PathFilter {
            contains: non_empty(self.contains.as_ref()),
            starts_with: non_empty(self.starts_with.as_ref()),
            ends_with: non_empty(self.ends_with.as_ref()),
            equals: non_empty(self.equals.as_ref()),
            equals_not: non_empty(self.equals_not.as_ref()),
            contains_all_of: if self.contains_all_of.is_empty() {
                None
            } else {
                Some(self.contains_all_of.clone())
            },
        };

        if filter.is_empty() { None } else { Some(filter) }
    }

    /// Evaluate the matcher against a path locally.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.filter()
            .is_none_or(|filter| filter.matches(path, self.case_insensitive))
    }
}

impl From<PathFilter> for Matcher {
    fn from(filter: PathFilter) -> Self {
        Self {
            contains: filter.contains,
            starts_with: filter.starts_with,
            ends_with: filter.ends_with,
            equals: filter.equals,
            equals_not: filter.equals_not,
            contains_all_of: filter.contains_all_of.unwrap_or_default(),
            case_insensitive: false,
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|s| !s.is_empty()).cloned()
}

/// Serialized filter object: only the criteria that are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_with: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_with: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals_not: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_all_of: Option<Vec<String>>,
}

impl PathFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contains.is_none()
            && self.starts_with.is_none()
            && self.ends_with.is_none()
            && self.equals.is_none()
            && self.equals_not.is_none()
            && self.contains_all_of.is_none()
    }

    /// True when every set criterion holds for `path`.
    #[must_use]
    pub fn matches(&self, path: &str, case_insensitive: bool) -> bool {
        let fold = |s: &str| {
            if case_insensitive {
                s.to_lowercase()
            } else {
                s.to_string()
            }
        };
        let path = fold(path);

        let holds = |criterion: &Option<String>, test: fn(&str, &str) -> bool| {
            criterion
                .as_deref()
                .is_none_or(|wanted| test(&path, &fold(wanted)))
        };

        holds(&self.contains, |p, w| p.contains(w))
            && holds(&self.starts_with, |p, w| p.starts_with(w))
            && holds(&self.ends_with, |p, w| p.ends_with(w))
            && holds(&self.equals, |p, w| p == w)
            && holds(&self.equals_not, |p, w| p != w)
            && self
                .contains_all_of
                .iter()
                .flatten()
                .all(|wanted| path.contains(&fold(wanted)))
    }
}

//! Typed view over `target` elements.

use std::fmt;

use super::element::Element;

/// Survey and id: the identity of a target within one document.
///
/// Either half may be missing from the XML. A missing attribute is still part
/// of the key, so two targets both lacking `targid` in the same survey collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey {
    pub survey: Option<String>,
    pub id: Option<String>,
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.survey.as_deref().unwrap_or("?"),
            self.id.as_deref().unwrap_or("?")
        )
    }
}

/// Parses a `targprio` value. Missing or unparsable priorities sort below everything.
pub fn parse_priority(raw: Option<&str>) -> f64 {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|p| !p.is_nan())
        .unwrap_or(f64::NEG_INFINITY)
}

/// A borrowed target element.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    element: &'a Element,
}

impl<'a> Target<'a> {
    pub fn new(element: &'a Element) -> Self {
        Self { element }
    }

    pub fn element(&self) -> &'a Element {
        self.element
    }

    pub fn attr(&self, key: &str) -> Option<&'a str> {
        self.element.attr(key)
    }

    pub fn survey(&self) -> Option<&'a str> {
        self.attr("targsrvy")
    }

    pub fn id(&self) -> Option<&'a str> {
        self.attr("targid")
    }

    pub fn key(&self) -> TargetKey {
        TargetKey {
            survey: self.survey().map(String::from),
            id: self.id().map(String::from),
        }
    }

    /// `targprio`, or negative infinity when missing or unparsable.
    pub fn priority(&self) -> f64 {
        parse_priority(self.attr("targprio"))
    }

    pub fn fibre_id(&self) -> Option<&'a str> {
        self.attr("fibreid")
    }

    /// A target is assigned once `configure` has bound a fibre to it.
    pub fn is_assigned(&self) -> bool {
        self.fibre_id().is_some()
    }

    /// `targuse`: `T` for science, `S` for sky, `G` for guide, etc.
    pub fn use_class(&self) -> Option<&'a str> {
        self.attr("targuse")
    }

    /// Parses a numeric attribute, treating missing or bad values as absent.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.attr(key).and_then(|s| s.trim().parse().ok())
    }
}

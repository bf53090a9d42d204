//! Structured attribute paths.
//!
//! Paths are kept as a sequence of [`PathStep`]s internally and are only
//! rendered to the legacy dotted form (`list.0.name`, `set.1234.val`,
//! `map.key`) at the flatmap boundary.

use std::fmt;

/// One step of an [`AttributePath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathStep {
    /// An object attribute or a top-level schema field.
    Attr(String),
    /// A positional list element.
    Index(usize),
    /// A map element.
    Key(String),
    /// A set element, addressed by its hash code.
    Hash(String),
}

impl PathStep {
    /// The flatmap segment for this step.
    pub fn segment(&self) -> String {
        match self {
            PathStep::Attr(name) => name.clone(),
            PathStep::Index(i) => i.to_string(),
            PathStep::Key(key) => key.clone(),
            PathStep::Hash(code) => code.clone(),
        }
    }
}

/// A path to a (possibly nested) attribute value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributePath {
    steps: Vec<PathStep>,
}

impl AttributePath {
    /// The empty path, addressing the root object.
    pub fn new() -> Self {
        Self::default()
    }

    /// A path addressing a top-level attribute.
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            steps: vec![PathStep::Attr(name.into())],
        }
    }

    /// Build a path from its steps.
    pub fn from_steps(steps: Vec<PathStep>) -> Self {
        Self { steps }
    }

    /// The steps of this path.
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Whether this path addresses the root.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Append a step in place.
    pub fn push(&mut self, step: PathStep) {
        self.steps.push(step);
    }

    /// A child path with one more step.
    pub fn child(&self, step: PathStep) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self { steps }
    }

    /// A child path addressing an attribute.
    pub fn attr(&self, name: impl Into<String>) -> Self {
        self.child(PathStep::Attr(name.into()))
    }

    /// A child path addressing a list element.
    pub fn index(&self, index: usize) -> Self {
        self.child(PathStep::Index(index))
    }

    /// A child path addressing a map element.
    pub fn key(&self, key: impl Into<String>) -> Self {
        self.child(PathStep::Key(key.into()))
    }

    /// A child path addressing a set element by hash code.
    pub fn hash(&self, code: impl ToString) -> Self {
        self.child(PathStep::Hash(code.to_string()))
    }

    /// The path without its last step.
    pub fn parent(&self) -> Option<AttributePath> {
        if self.steps.is_empty() {
            return None;
        }
        Some(Self {
            steps: self.steps[..self.steps.len() - 1].to_vec(),
        })
    }

    /// The last step.
    pub fn last(&self) -> Option<&PathStep> {
        self.steps.last()
    }

    /// Name of the top-level attribute this path starts with.
    pub fn first_attr(&self) -> Option<&str> {
        match self.steps.first() {
            Some(PathStep::Attr(name)) => Some(name),
            _ => None,
        }
    }

    /// Whether `self` equals `other` or is an ancestor of it.
    pub fn is_prefix_of(&self, other: &AttributePath) -> bool {
        other.steps.len() >= self.steps.len() && other.steps[..self.steps.len()] == self.steps[..]
    }

    /// Render the dotted flatmap key for this path.
    pub fn to_flatmap_key(&self) -> String {
        self.steps
            .iter()
            .map(PathStep::segment)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_flatmap_key())
    }
}

impl FromIterator<PathStep> for AttributePath {
    fn from_iter<I: IntoIterator<Item = PathStep>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

impl From<&str> for AttributePath {
    /// Splits a dotted key into attribute steps, without schema knowledge.
    ///
    /// Numeric segments become [`PathStep::Index`]. Use
    /// [`crate::helper::parse_address`] when the key must be resolved
    /// against a schema.
    fn from(key: &str) -> Self {
        if key.is_empty() {
            return Self::new();
        }
        key.split('.')
            .map(|part| match part.parse::<usize>() {
                Ok(i) => PathStep::Index(i),
                Err(_) => PathStep::Attr(part.to_string()),
            })
            .collect()
    }
}

/// Whether `child` is `parent` or nested below it, in dotted-key form.
pub(crate) fn is_child_key(child: &str, parent: &str) -> bool {
    child == parent
        || (child.len() > parent.len()
            && child.starts_with(parent)
            && child.as_bytes()[parent.len()] == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatmap_key_rendering() {
        let path = AttributePath::root("rule").index(0).attr("ports").hash(1234);
        assert_eq!(path.to_flatmap_key(), "rule.0.ports.1234");
        assert_eq!(path.to_string(), "rule.0.ports.1234");

        let map_path = AttributePath::root("tags").key("Name");
        assert_eq!(map_path.to_flatmap_key(), "tags.Name");
    }

    #[test]
    fn test_parent_and_prefix() {
        let path = AttributePath::root("a").index(2).attr("b");
        let parent = path.parent().unwrap();
        assert_eq!(parent, AttributePath::root("a").index(2));
        assert!(parent.is_prefix_of(&path));
        assert!(path.is_prefix_of(&path));
        assert!(!path.is_prefix_of(&parent));
        assert_eq!(path.first_attr(), Some("a"));
        assert!(AttributePath::new().parent().is_none());
    }

    #[test]
    fn test_from_dotted_key() {
        let path = AttributePath::from("list.3.name");
        assert_eq!(
            path.steps(),
            &[
                PathStep::Attr("list".into()),
                PathStep::Index(3),
                PathStep::Attr("name".into())
            ]
        );
        assert!(AttributePath::from("").is_empty());
    }

    #[test]
    fn test_is_child_key() {
        assert!(is_child_key("foo", "foo"));
        assert!(is_child_key("foo.0.bar", "foo"));
        assert!(!is_child_key("foobar", "foo"));
        assert!(!is_child_key("fo", "foo"));
    }
}

//! Observation documents: one pointing ("field") and its candidate targets.
//!
//! ```text
//! <root>
//!   <observation name progtemp obstemp>
//!     <configure plate max_sky max_calibration max_guide>
//!       <hour_angle_limits earliest latest/>
//!     </configure>
//!     <surveys><survey name max_fibres/>…</surveys>
//!     <fields>
//!       <field RA_d Dec_d>
//!         <target targsrvy targid targprio [fibreid] …/>…
//!       </field>
//!     </fields>
//!   </observation>
//! </root>
//! ```
//!
//! Only one field per document is supported; anything that edits targets
//! checks that first.

mod element;
mod target;

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

pub use element::{Element, Node};
pub use target::{Target, TargetKey};

/// Placeholder survey name left behind by catalogue templates.
pub const TEMPLATE_SURVEY: &str = "%%%";

/// Errors that can occur reading, writing or editing a document.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("no field element in document")]
    NoField,

    #[error("only a single field is allowed per document, found {0}")]
    MultipleFields(usize),

    #[error("no observation element in document")]
    NoObservation,

    #[error("malformed XML: {0}")]
    Malformed(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, DocumentError>;

/// A parsed observation document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    root: Element,
}

impl Document {
    pub fn from_root(root: Element) -> Self {
        Self { root }
    }

    pub fn parse(xml: &str) -> Result<Self> {
        element::parse(xml).map(Self::from_root)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let xml = fs::read_to_string(path)?;
        Self::parse(&xml)
    }

    pub fn to_xml(&self) -> Result<String> {
        element::render(&self.root)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_xml()?)?;
        Ok(())
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// The `observation` element: the root itself or its first descendant of that name.
    pub fn observation(&self) -> Result<&Element> {
        if self.root.name == "observation" {
            return Ok(&self.root);
        }
        self.root
            .descendants("observation")
            .into_iter()
            .next()
            .ok_or(DocumentError::NoObservation)
    }

    /// The single `field` element.
    pub fn field(&self) -> Result<&Element> {
        match self.root.descendants("field").as_slice() {
            [] => Err(DocumentError::NoField),
            [field] => Ok(*field),
            many => Err(DocumentError::MultipleFields(many.len())),
        }
    }

    fn field_mut(&mut self) -> Result<&mut Element> {
        self.field()?;
        self.root.descendant_mut("field").ok_or(DocumentError::NoField)
    }

    /// Every target in the document, in document order.
    pub fn targets(&self) -> Vec<Target<'_>> {
        self.root
            .descendants("target")
            .into_iter()
            .map(Target::new)
            .collect()
    }

    pub fn target_count(&self) -> usize {
        self.root.descendants("target").len()
    }

    pub fn keys(&self) -> HashSet<TargetKey> {
        self.targets().iter().map(Target::key).collect()
    }

    /// Appends a target element to the field.
    pub fn push_target(&mut self, target: Element) -> Result<()> {
        self.field_mut()?.push(target);
        Ok(())
    }

    /// Removes targets from the field for which `keep` returns false.
    /// Returns how many were removed.
    pub fn retain_targets(&mut self, mut keep: impl FnMut(Target<'_>) -> bool) -> Result<usize> {
        let field = self.field_mut()?;
        Ok(field.retain_elements(|e| e.name != "target" || keep(Target::new(e))))
    }

    /// Strips every target from the field, leaving no fibres placed.
    pub fn clear_targets(&mut self) -> Result<usize> {
        self.retain_targets(|_| false)
    }

    /// Drops placeholder targets copied from catalogue templates.
    pub fn remove_template_targets(&mut self) -> Result<usize> {
        self.retain_targets(|t| t.survey() != Some(TEMPLATE_SURVEY))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn round_trip_preserves_target_triples() {
        let doc = document(
            "F1",
            &[
                ("WL", "1", Some("10"), None),
                ("WL", "2", Some("6"), Some("33")),
                ("GA", "1", None, None),
            ],
        );
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "f1.xml", &doc);

        let loaded = Document::read(&path).unwrap();
        let triples = |d: &Document| -> Vec<(TargetKey, String)> {
            d.targets()
                .iter()
                .map(|t| (t.key(), format!("{}", t.priority())))
                .collect()
        };

        assert_eq!(loaded.target_count(), 3);
        assert_eq!(triples(&loaded), triples(&doc));
        assert_eq!(loaded, doc);
    }

    #[test]
    fn multiple_fields_are_rejected() {
        let mut doc = fixtures::two_fields("F1", &[]);

        let err = doc.field().unwrap_err();
        assert!(matches!(err, DocumentError::MultipleFields(2)));
        let err = doc.clear_targets().unwrap_err();
        assert!(matches!(err, DocumentError::MultipleFields(2)));
    }

    #[test]
    fn missing_field_is_rejected() {
        let doc = Document::parse("<root><observation name=\"x\"/></root>").unwrap();
        assert!(matches!(doc.field().unwrap_err(), DocumentError::NoField));
    }

    #[test]
    fn clear_targets_keeps_everything_else() {
        let mut doc = document("F1", &[("WL", "1", Some("10"), None)]);
        doc.field_mut()
            .unwrap()
            .children
            .push(Node::Comment("kept".into()));

        assert_eq!(doc.clear_targets().unwrap(), 1);
        assert_eq!(doc.target_count(), 0);
        assert_eq!(doc.field().unwrap().attr("RA_d"), Some("150.0"));
        assert_eq!(doc.field().unwrap().children.len(), 1);
        assert_eq!(doc.observation().unwrap().attr("name"), Some("F1"));
    }

    #[test]
    fn template_targets_are_removed() {
        let mut doc = document(
            "F1",
            &[
                (TEMPLATE_SURVEY, "0", None, None),
                ("WL", "1", Some("10"), None),
            ],
        );
        assert_eq!(doc.remove_template_targets().unwrap(), 1);
        assert_eq!(doc.targets()[0].survey(), Some("WL"));
    }
}

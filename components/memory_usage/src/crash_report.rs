//! Multi-field diagnostic payload.

use serde::Serialize;

/// One named body of a crash report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashReportField {
    /// Field name
    pub name: String,
    /// Field text
    pub body: String,
}

/// A titled list of text fields, serialized by the host's report transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashReport {
    /// Report title
    pub title: String,
    /// Fields in insertion order
    pub fields: Vec<CrashReportField>,
}

impl CrashReport {
    /// Creates an empty report.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            fields: Vec::new(),
        }
    }

    /// Appends a field.
    pub fn add_field(&mut self, name: impl Into<String>, body: impl Into<String>) {
        self.fields.push(CrashReportField {
            name: name.into(),
            body: body.into(),
        });
    }

    /// Body of the first field called `name`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.body.as_str())
    }

    /// Renders every field as a `--- name ---` section.
    pub fn to_text(&self) -> String {
        let mut text = format!("{}\n", self.title);
        for field in &self.fields {
            text.push_str(&format!("--- {} ---\n{}", field.name, field.body));
            if !field.body.ends_with('\n') {
                text.push('\n');
            }
        }
        text
    }
}

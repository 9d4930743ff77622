//! Theme configuration: maps node type tags and text formats to the class
//! names the reconciler stamps onto the DOM it builds.

use crate::node::TextFormat;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct Theme {
    tag_classes: HashMap<String, String>,
    format_classes: Vec<(TextFormat, String)>,
}

impl Theme {
    pub fn new() -> Self {
        Theme::default()
    }

    pub fn with_tag_class(mut self, tag: impl Into<String>, class: impl Into<String>) -> Self {
        self.tag_classes.insert(tag.into(), class.into());
        self
    }

    pub fn with_format_class(mut self, format: TextFormat, class: impl Into<String>) -> Self {
        self.format_classes.push((format, class.into()));
        self
    }

    pub fn class_for_tag(&self, tag: &str) -> Option<&str> {
        self.tag_classes.get(tag).map(String::as_str)
    }

    /// Space-joined class list for a text node: the `text` tag class plus
    /// one class per active format bit.
    pub fn text_class(&self, format: TextFormat) -> Option<String> {
        let mut classes: Vec<&str> = Vec::new();
        if let Some(base) = self.class_for_tag("text") {
            classes.push(base);
        }
        for (bit, class) in &self.format_classes {
            if format.contains(*bit) {
                classes.push(class);
            }
        }
        if classes.is_empty() {
            None
        } else {
            Some(classes.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_class_composition() {
        let theme = Theme::new()
            .with_tag_class("text", "v-text")
            .with_format_class(TextFormat::BOLD, "v-bold")
            .with_format_class(TextFormat::ITALIC, "v-italic");

        assert_eq!(theme.text_class(TextFormat::default()).unwrap(), "v-text");
        assert_eq!(
            theme
                .text_class(TextFormat::BOLD.with(TextFormat::ITALIC))
                .unwrap(),
            "v-text v-bold v-italic"
        );
        assert_eq!(Theme::new().text_class(TextFormat::BOLD), None);
    }
}

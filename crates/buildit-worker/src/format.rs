//! Tag-keyed output transforms.

use buildit_core::bus::OutputTag;
use std::collections::HashMap;
use std::fmt;

type Transform = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Transforms applied to tagged output before it is buffered.
pub struct FormatterTable {
    transforms: HashMap<OutputTag, Transform>,
}

impl FormatterTable {
    /// A table with no transforms; all output passes through unchanged.
    pub fn empty() -> Self {
        Self {
            transforms: HashMap::new(),
        }
    }

    /// Register the transform for `tag`, replacing any existing one.
    pub fn register(
        mut self,
        tag: OutputTag,
        transform: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.transforms.insert(tag, Box::new(transform));
        self
    }

    pub fn apply(&self, tag: Option<OutputTag>, text: String) -> String {
        match tag.and_then(|t| self.transforms.get(&t)) {
            Some(transform) => transform(&text),
            None => text,
        }
    }
}

impl Default for FormatterTable {
    /// ANSI colours: messages cyan, errors red, commands bold.
    fn default() -> Self {
        Self::empty()
            .register(OutputTag::Message, |text| ansi("36", text))
            .register(OutputTag::Error, |text| ansi("31", text))
            .register(OutputTag::Command, |text| ansi("1", text))
    }
}

impl fmt::Debug for FormatterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatterTable")
            .field("tags", &self.transforms.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn ansi(code: &str, text: &str) -> String {
    format!("\x1b[{}m{}\x1b[0m", code, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_text_passes_through() {
        let table = FormatterTable::default();
        assert_eq!(table.apply(None, "plain".to_string()), "plain");
    }

    #[test]
    fn test_default_table_colours_errors() {
        let table = FormatterTable::default();
        assert_eq!(
            table.apply(Some(OutputTag::Error), "boom".to_string()),
            "\x1b[31mboom\x1b[0m"
        );
    }

    #[test]
    fn test_unregistered_tag_passes_through() {
        let table = FormatterTable::empty().register(OutputTag::Message, |t| t.to_uppercase());
        assert_eq!(table.apply(Some(OutputTag::Message), "hi".to_string()), "HI");
        assert_eq!(table.apply(Some(OutputTag::Command), "ls".to_string()), "ls");
    }
}

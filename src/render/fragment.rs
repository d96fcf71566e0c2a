use serde::{Deserialize, Serialize};

/// One piece of a rendered fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FragmentPart {
    /// Finished output text.
    Text(String),
    /// Placeholder for the output of the directive at this index; filled in
    /// during assembly from whichever node the directive points at.
    Slot(usize),
}

/// Rendered artifact of a single node.
///
/// Documents render to text interleaved with slots, so a parent's cached
/// fragment stays valid when only a transcluded child changes. Leaf resources
/// render to plain text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub parts: Vec<FragmentPart>,
}

impl Fragment {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fragment consisting of a single text run.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() {
            return Self::empty();
        }
        Self {
            parts: vec![FragmentPart::Text(text)],
        }
    }

    /// Appends text, coalescing with a preceding text run.
    pub fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(FragmentPart::Text(last)) = self.parts.last_mut() {
            last.push_str(text);
        } else {
            self.parts.push(FragmentPart::Text(text.to_string()));
        }
    }

    pub fn push_slot(&mut self, directive: usize) {
        self.parts.push(FragmentPart::Slot(directive));
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Slot indices in document order.
    pub fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.parts.iter().filter_map(|p| match p {
            FragmentPart::Slot(i) => Some(*i),
            FragmentPart::Text(_) => None,
        })
    }

    /// Text with every slot left empty.
    #[must_use]
    pub fn plain_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                FragmentPart::Text(t) => Some(t.as_str()),
                FragmentPart::Slot(_) => None,
            })
            .collect()
    }
}

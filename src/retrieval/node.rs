use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which metadata keys to render alongside a node's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataMode {
    All,
    /// Skip keys excluded from embedding.
    Embed,
    /// Skip keys excluded from the language model.
    Llm,
    None,
}

/// A unit of retrievable text plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub excluded_embed_metadata_keys: Vec<String>,
    #[serde(default)]
    pub excluded_llm_metadata_keys: Vec<String>,
}

impl TextNode {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Map::new(),
            excluded_embed_metadata_keys: Vec::new(),
            excluded_llm_metadata_keys: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Exclude `key` from both embedding and language-model rendering.
    pub fn exclude_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.excluded_embed_metadata_keys.push(key.clone());
        self.excluded_llm_metadata_keys.push(key);
        self
    }

    /// `key: value` lines for the metadata visible in `mode`.
    pub fn metadata_str(&self, mode: MetadataMode) -> String {
        let excluded: &[String] = match mode {
            MetadataMode::All => &[],
            MetadataMode::Embed => &self.excluded_embed_metadata_keys,
            MetadataMode::Llm => &self.excluded_llm_metadata_keys,
            MetadataMode::None => return String::new(),
        };

        self.metadata
            .iter()
            .filter(|(key, _)| !excluded.contains(key))
            .map(|(key, value)| match value {
                Value::String(s) => format!("{}: {}", key, s),
                other => format!("{}: {}", key, other),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Text with visible metadata prepended, separated by a blank line.
    pub fn get_content(&self, mode: MetadataMode) -> String {
        let metadata = self.metadata_str(mode);
        if metadata.is_empty() {
            self.text.clone()
        } else {
            format!("{}\n\n{}", metadata, self.text)
        }
    }
}

/// A retrieved node and its relevance score, when one was computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeWithScore {
    pub node: TextNode,
    pub score: Option<f32>,
}

impl NodeWithScore {
    pub fn new(node: TextNode, score: Option<f32>) -> Self {
        Self { node, score }
    }

    pub fn text(&self) -> &str {
        &self.node.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> TextNode {
        TextNode::new("n1", "Revenue grew 10%.")
            .with_metadata("file_name", "acme-10k.pdf")
            .with_metadata("page_label", 3)
            .with_metadata("kg_rel_text", vec!["a -[r]-> b"])
            .exclude_key("kg_rel_text")
    }

    #[test]
    fn test_llm_mode_skips_excluded_keys() {
        let content = node().get_content(MetadataMode::Llm);
        assert_eq!(content, "file_name: acme-10k.pdf\npage_label: 3\n\nRevenue grew 10%.");
    }

    #[test]
    fn test_all_and_none_modes() {
        let node = node();
        assert!(node.get_content(MetadataMode::All).contains("kg_rel_text"));
        assert_eq!(node.get_content(MetadataMode::None), "Revenue grew 10%.");
        assert_eq!(TextNode::new("x", "plain").get_content(MetadataMode::All), "plain");
    }
}

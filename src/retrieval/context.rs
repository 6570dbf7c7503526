use serde_json::{json, Value};
use uuid::Uuid;

use super::node::{NodeWithScore, TextNode};
use crate::graph::RelationMap;

pub const KG_REL_MAP_KEY: &str = "kg_rel_map";
pub const KG_REL_TEXT_KEY: &str = "kg_rel_text";
pub const KG_SCHEMA_KEY: &str = "kg_schema";

/// Graph traversal output rendered as one context unit.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphContextNode {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub rel_map: RelationMap,
    pub rel_texts: Vec<String>,
    pub schema: Option<String>,
}

impl GraphContextNode {
    /// Node carrying the relation data as metadata hidden from embedding and the model.
    pub fn into_node_with_score(self) -> NodeWithScore {
        let mut node = TextNode::new(self.id, self.text)
            .with_metadata(KG_REL_MAP_KEY, rel_map_json(&self.rel_map))
            .with_metadata(KG_REL_TEXT_KEY, self.rel_texts)
            .exclude_key(KG_REL_MAP_KEY)
            .exclude_key(KG_REL_TEXT_KEY);
        if let Some(schema) = self.schema {
            node = node
                .with_metadata(KG_SCHEMA_KEY, json!({ "schema": schema }))
                .exclude_key(KG_SCHEMA_KEY);
        }
        NodeWithScore::new(node, Some(self.score))
    }
}

/// `[[seed, [[subject, predicate, object], ...]], ...]` in seed order.
fn rel_map_json(rel_map: &RelationMap) -> Value {
    rel_map
        .iter()
        .map(|(seed, triplets)| {
            let rows: Vec<Value> = triplets
                .iter()
                .map(|t| json!([t.subject, t.predicate, t.object]))
                .collect();
            json!([seed, rows])
        })
        .collect()
}

/// Render `rel_map` as a context node, or `None` when it holds no triplets.
pub fn assemble(rel_map: RelationMap, traversal_depth: usize, graph_schema: Option<&str>) -> Option<GraphContextNode> {
    let rel_texts = rel_map.flatten_texts();
    if rel_texts.is_empty() {
        log::info!("No knowledge sequence extracted from entities");
        return None;
    }

    let text = format!(
        "The following are knowledge sequence in max depth {} in the form of directed graph like:\n\
         `subject -[predicate]->, object, <-[predicate_next_hop]-, object_next_hop ...` \
         extracted based on key entities as subject:\n{}",
        traversal_depth,
        rel_texts.join("\n")
    );
    log::debug!("Graph context:\n{}", text);

    Some(GraphContextNode {
        id: Uuid::new_v4().to_string(),
        text,
        score: 1.0,
        rel_map,
        rel_texts,
        schema: graph_schema
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    })
}

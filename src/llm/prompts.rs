//! Prompt templates and `{placeholder}` formatting.

use regex::{Captures, Regex};
use std::sync::OnceLock;

/// A prompt with `{name}` placeholders.
///
/// Only placeholders whose name is supplied are substituted; any other braces
/// (JSON examples, unknown names) are left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
    bound: Vec<(String, String)>,
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("valid placeholder regex"))
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            bound: Vec::new(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Substitute every supplied placeholder in a single pass.
    pub fn format(&self, params: &[(&str, &str)]) -> String {
        placeholder_regex()
            .replace_all(&self.template, |caps: &Captures| {
                let name = &caps[1];
                params
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| value.to_string())
                    .or_else(|| {
                        self.bound
                            .iter()
                            .find(|(key, _)| key == name)
                            .map(|(_, value)| value.clone())
                    })
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Bind some placeholders now. Bound values are substituted in the same
    /// pass as the `format` params, so their text is never re-scanned.
    pub fn partial(&self, params: &[(&str, &str)]) -> Self {
        let mut bound = self.bound.clone();
        for (key, value) in params {
            bound.retain(|(existing, _)| existing != key);
            bound.push((key.to_string(), value.to_string()));
        }
        Self {
            template: self.template.clone(),
            bound,
        }
    }
}

pub const KEYWORD_EXTRACT_TEMPLATE: &str = "\
A question is provided below. Given the question, extract up to {max_keywords} \
keywords from the text. Focus on extracting the keywords that we can use \
to best lookup answers to the question. Avoid stopwords.
---------------------
{question}
---------------------
Provide keywords in the following comma-separated format: 'KEYWORDS: <keywords>'
";

pub const SYNONYM_EXPAND_TEMPLATE: &str = "
Generate synonyms or possible form of keywords up to {max_keywords} in total,
considering possible cases of capitalization, pluralization, common expressions, etc.
Provide all synonyms of keywords in comma-separated format: 'SYNONYMS: <keywords>'
Note, result should be in one-line with only one 'SYNONYMS: ' prefix
----
KEYWORDS: {question}
----
";

pub const DEFAULT_QA_TEMPLATE: &str = "\
Context information is below.
---------------------
{context_str}
---------------------
Given the context information and not prior knowledge, answer the query.
Query: {query_str}
Answer: ";

pub const DEFAULT_REFINE_TEMPLATE: &str = "\
The original query is as follows: {query_str}
We have provided an existing answer: {existing_answer}
We have the opportunity to refine the existing answer (only if needed) with some more context below.
------------
{context_msg}
------------
Given the new context, refine the original answer to better answer the query. \
If the context isn't useful, return the original answer.
Refined Answer: ";

pub const GRAPH_QA_TEMPLATE: &str = "\
A user has a question about a company. Context information is below.
---------------------
{context_str}
---------------------
Given the context information and not prior knowledge, answer the query.
Query: {query_str}
Answer:";

pub const GRAPH_REFINE_TEMPLATE: &str = "\
A user has asked a question about a company that has information about it in a knowledge graph.
The original query is as follows: {query_str}
We have provided an existing answer: {existing_answer}
We have the opportunity to refine the existing answer (only if needed) with some more context below.
------------
{context_msg}
------------
Given the new context, refine the original answer to better answer the query. \
If the context isn't useful, return the original answer.
Refined Answer:";

pub const DOCUMENT_QA_TEMPLATE: &str = "\
A user has selected a set of company documents and has asked a question about them.
The documents have the following titles:
{doc_titles}
Context information is below.
---------------------
{context_str}
---------------------
Given the context information and not prior knowledge, answer the query.
Query: {query_str}
Answer:";

pub const DOCUMENT_REFINE_TEMPLATE: &str = "\
A user has selected a set of company documents and has asked a question about them.
The documents have the following titles:
{doc_titles}
The original query is as follows: {query_str}
We have provided an existing answer: {existing_answer}
We have the opportunity to refine the existing answer (only if needed) with some more context below.
------------
{context_msg}
------------
Given the new context, refine the original answer to better answer the query. \
If the context isn't useful, return the original answer.
Refined Answer:";

pub const SUB_QUESTION_TEMPLATE: &str = r#"Given a user question and a list of tools, output a list of relevant sub-questions, each paired with the name of the tool that should answer it.
Only use the tools listed below. Respond with a JSON array only, in the form:
[{"sub_question": "<question>", "tool_name": "<tool name>"}]

# Tools
{tools_str}

# User question
{query_str}

# Sub-questions
"#;

pub const SYSTEM_MESSAGE_TEMPLATE: &str = "\
You are an expert financial analyst that always answers questions with the most relevant \
information using the tools at your disposal.
These tools have information regarding companies that the user has expressed interest in.
Here are some guidelines that you must follow:
* For financial questions, you must use the tools to find the answer and then write a response.
* Even if it seems like your tools won't be able to answer the question, you must still use \
them to find the most relevant information and insights. Not using them will appear as if \
you are not doing your job.
* You may assume that the users financial questions are related to the documents they've selected.
* For any user message that isn't related to financial analysis, respectfully decline to \
respond and suggest that the user ask a relevant question.
* If your tools are unable to find an answer, you should say that you haven't found an answer \
but still relay any useful information the tools found.

The tools at your disposal have access to the following company documents that the user has \
selected to discuss with you:
{doc_titles}

The current date is: {curr_date}
";

pub fn keyword_extract_prompt() -> PromptTemplate {
    PromptTemplate::new(KEYWORD_EXTRACT_TEMPLATE)
}

pub fn synonym_expand_prompt() -> PromptTemplate {
    PromptTemplate::new(SYNONYM_EXPAND_TEMPLATE)
}

pub fn sub_question_prompt() -> PromptTemplate {
    PromptTemplate::new(SUB_QUESTION_TEMPLATE)
}

pub fn system_prompt() -> PromptTemplate {
    PromptTemplate::new(SYSTEM_MESSAGE_TEMPLATE)
}

use std::fmt;

/// Instruction the mxbai embedding model expects in front of search queries.
pub const QUERY_INSTRUCTION: &str =
    "Represent this for searching relevant passages: patient medical report says:";

/// Text handed to the embedder for similarity search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalQuery(String);

impl RetrievalQuery {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RetrievalQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the retrieval query for a report and question.
pub fn format_query(report_text: &str, user_question: &str) -> RetrievalQuery {
    RetrievalQuery(format!(
        "{QUERY_INSTRUCTION} \n{report_text}. \n\n{user_question}"
    ))
}

use std::fmt;

use crate::retrieval::RetrievalResult;

pub const REPORT_START: &str = "**Patient's Clinical report summary:**";
pub const REPORT_END: &str = "**end of patient's clinical report**";
pub const QUERY_START: &str = "**User Query:**";
pub const QUERY_END: &str = "**end of user query**";
pub const FINDINGS_START: &str = "**Generic Clinical findings:**";
pub const FINDINGS_END: &str = "**end of generic clinical findings**";
pub const JUSTIFICATION: &str = "Provide thorough justification for your answer.";
pub const ANSWER_CUE: &str = "**Answer:**";

const PREAMBLE: &str = "Here is a summary of a patient's clinical report, and a user query. \
Some generic clinical findings are also provided that may or may not be relevant for the report.
Go through the clinical report and answer the user query.
Ensure the response is factually accurate, and demonstrates a thorough understanding of the query topic and the clinical report.
Before answering you may enrich your knowledge by going through the provided clinical findings.
The clinical findings are generic insights and not part of the patient's medical report. \
Do not include any clinical finding if it is not relevant for the patient's case.";

/// Final instruction-formatted prompt sent to the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedPrompt(String);

impl ComposedPrompt {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComposedPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lay out report, question and findings in their fixed, marked sections.
///
/// The findings body is inserted verbatim, including the fallback sentence.
pub fn compose_prompt(
    report_text: &str,
    user_question: &str,
    retrieval: &RetrievalResult,
) -> ComposedPrompt {
    let findings = retrieval.as_str();
    ComposedPrompt(format!(
        "{PREAMBLE}

{REPORT_START}
{report_text}
{REPORT_END}

{QUERY_START}
{user_question}
{QUERY_END}

{FINDINGS_START}
{findings}
{FINDINGS_END}

{JUSTIFICATION}

{ANSWER_CUE}
"
    ))
}

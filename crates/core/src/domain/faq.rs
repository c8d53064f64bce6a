use serde::{Deserialize, Serialize};

/// A question/answer pair as authored, before embedding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqDocument {
    pub question: String,
    pub answer: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
    pub embedding: Vec<f32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub matched_entry: Option<FaqEntry>,
    pub matched_index: Option<usize>,
    pub similarity: f32,
}

impl RetrievalResult {
    pub fn no_match() -> Self {
        Self { matched_entry: None, matched_index: None, similarity: 0.0 }
    }

    /// The matched answer, only when the similarity clears `threshold`.
    pub fn answer_above(&self, threshold: f32) -> Option<&str> {
        self.matched_entry
            .as_ref()
            .filter(|_| self.similarity >= threshold)
            .map(|entry| entry.answer.as_str())
    }
}

/// Parses the plain-text knowledge base format.
///
/// `Q:` opens a question; `A:` lines and bare continuation lines are joined
/// with single spaces into its answer. Blank lines are ignored. A repeated
/// question replaces the earlier answer but keeps the earlier position.
pub fn parse_faq_document(raw: &str) -> Vec<FaqDocument> {
    let mut documents: Vec<FaqDocument> = Vec::new();
    let mut current_question: Option<String> = None;
    let mut current_answer: Vec<String> = Vec::new();

    let mut flush = |question: Option<String>, answer: &mut Vec<String>| {
        if let Some(question) = question {
            let joined = answer.join(" ").trim().to_string();
            match documents.iter_mut().find(|doc| doc.question == question) {
                Some(existing) => existing.answer = joined,
                None => documents.push(FaqDocument { question, answer: joined }),
            }
        }
        answer.clear();
    };

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(question) = line.strip_prefix("Q:") {
            flush(current_question.take(), &mut current_answer);
            current_question = Some(question.trim().to_string());
        } else if let Some(answer) = line.strip_prefix("A:") {
            current_answer.push(answer.trim().to_string());
        } else {
            current_answer.push(line.to_string());
        }
    }
    flush(current_question.take(), &mut current_answer);

    documents
}

#[cfg(test)]
mod tests {
    use super::{parse_faq_document, FaqEntry, RetrievalResult};

    #[test]
    fn parses_questions_with_multiline_answers() {
        let raw = "\
Q: What are your hours?
A: We are open 09:00 to 17:00.
Lunch break is 13:00 to 14:00.

Q: Where are you located?
A: 12 Harbour Street.
";
        let docs = parse_faq_document(raw);

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].question, "What are your hours?");
        assert_eq!(
            docs[0].answer,
            "We are open 09:00 to 17:00. Lunch break is 13:00 to 14:00."
        );
        assert_eq!(docs[1].answer, "12 Harbour Street.");
    }

    #[test]
    fn repeated_question_keeps_position_and_takes_latest_answer() {
        let raw = "Q: a\nA: first\nQ: b\nA: bee\nQ: a\nA: second\n";
        let docs = parse_faq_document(raw);

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].question, "a");
        assert_eq!(docs[0].answer, "second");
        assert_eq!(docs[1].question, "b");
    }

    #[test]
    fn lines_before_first_question_are_dropped() {
        let docs = parse_faq_document("stray preamble\nQ: only\nA: one\n");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].answer, "one");
    }

    #[test]
    fn answer_above_respects_threshold() {
        let result = RetrievalResult {
            matched_entry: Some(FaqEntry {
                question: "q".to_string(),
                answer: "a".to_string(),
                embedding: vec![1.0],
            }),
            matched_index: Some(0),
            similarity: 0.74,
        };

        assert_eq!(result.answer_above(0.75), None);
        assert_eq!(result.answer_above(0.74), Some("a"));
        assert_eq!(RetrievalResult::no_match().answer_above(0.0), None);
    }
}

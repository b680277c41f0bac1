use crate::database::VectorStore;
use crate::document::Record;
use anyhow::{Context, Result};
use log::{debug, info};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::LazyLock;

/// Number of candidates fetched from the store per question
pub const SEARCH_LIMIT: usize = 10;

/// Maximum number of characters of retrieved content placed in the prompt
pub const CONTEXT_CHAR_LIMIT: usize = 4000;

/// Separator placed between retrieved records in the prompt context
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Question used when none is given on the command line
pub const EXAMPLE_QUERY: &str = "What time of the day usually has the most solar power output?";

static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("date pattern is valid"));

/// A model that turns a prompt into a textual answer
#[allow(async_fn_in_trait)]
pub trait Generator {
    async fn invoke(&self, prompt: &str) -> Result<String>;
}

/// Answer to a question together with the records it was based on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub query_text: String,
    pub response_text: String,
    /// Ids of the records used as context, best match first
    pub sources: Vec<String>,
}

/// RAG (Retrieval-Augmented Generation) engine
pub struct RagEngine<S, G> {
    store: S,
    generator: G,
}

impl<S: VectorStore, G: Generator> RagEngine<S, G> {
    /// Create a new RAG engine
    pub fn new(store: S, generator: G) -> Self {
        RagEngine { store, generator }
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Answer a question from the records in the store
    pub async fn query(&self, query_text: &str) -> Result<QueryResponse> {
        let results = self
            .store
            .similarity_search_with_score(query_text, SEARCH_LIMIT)
            .await
            .context("Similarity search failed")?;
        info!("Retrieved {} candidate records", results.len());

        let results = narrow_by_date(results, query_text);
        let records: Vec<Record> = results.into_iter().map(|(record, _)| record).collect();

        let context = build_context(&records);
        let sources = records.into_iter().map(|record| record.id).collect();

        let prompt = build_prompt(&context, query_text);
        debug!("Prompt:\n{}", prompt);

        let response_text = self
            .generator
            .invoke(&prompt)
            .await
            .context("Failed to generate answer")?;

        Ok(QueryResponse {
            query_text: query_text.to_string(),
            response_text,
            sources,
        })
    }
}

/// Find the first `YYYY-MM-DD` looking substring in a question
pub fn extract_date(query: &str) -> Option<&str> {
    DATE_PATTERN.find(query).map(|m| m.as_str())
}

/// Keep only results mentioning the date found in the question.
///
/// This is a best-effort hint: without a date, or when no result mentions it,
/// the results are returned unchanged.
pub fn narrow_by_date(results: Vec<(Record, f32)>, query: &str) -> Vec<(Record, f32)> {
    let Some(date) = extract_date(query) else {
        return results;
    };

    let mentions_date = |record: &Record| {
        record.content.contains(date)
            || match record.metadata.get("datetime") {
                Some(Value::String(s)) => s.contains(date),
                Some(other) => other.to_string().contains(date),
                None => false,
            }
    };

    if !results.iter().any(|(record, _)| mentions_date(record)) {
        debug!("No candidate mentions {}, keeping all results", date);
        return results;
    }

    let narrowed: Vec<(Record, f32)> = results
        .into_iter()
        .filter(|(record, _)| mentions_date(record))
        .collect();
    debug!("Narrowed to {} results mentioning {}", narrowed.len(), date);
    narrowed
}

/// Join record contents and cut the result to `CONTEXT_CHAR_LIMIT` characters
pub fn build_context(records: &[Record]) -> String {
    records
        .iter()
        .map(|record| record.content.as_str())
        .collect::<Vec<&str>>()
        .join(CONTEXT_SEPARATOR)
        .chars()
        .take(CONTEXT_CHAR_LIMIT)
        .collect()
}

/// Fill the answer template with the retrieved context and the question
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "Answer the question based only on the following context:\n\n{}\n\n---\n\nAnswer the question based on the above context: {}",
        context, question
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ConfirmReset;
    use serde_json::{json, Map};
    use std::sync::Mutex;

    fn record(id: &str, content: &str) -> Record {
        Record::new(id, content, Map::new())
    }

    fn scored(records: &[Record]) -> Vec<(Record, f32)> {
        records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.clone(), 1.0 - i as f32 * 0.1))
            .collect()
    }

    fn ids(results: &[(Record, f32)]) -> Vec<&str> {
        results.iter().map(|(r, _)| r.id.as_str()).collect()
    }

    struct FixedStore(Vec<Record>);

    impl VectorStore for FixedStore {
        async fn similarity_search_with_score(
            &self,
            _query: &str,
            k: usize,
        ) -> Result<Vec<(Record, f32)>> {
            Ok(scored(&self.0).into_iter().take(k).collect())
        }

        async fn add_records(&mut self, records: &[Record]) -> Result<()> {
            self.0.extend_from_slice(records);
            Ok(())
        }

        async fn reset(&mut self, _confirm: ConfirmReset) -> Result<()> {
            self.0.clear();
            Ok(())
        }

        async fn len(&self) -> Result<usize> {
            Ok(self.0.len())
        }
    }

    #[derive(Default)]
    struct EchoGenerator {
        prompts: Mutex<Vec<String>>,
    }

    impl Generator for EchoGenerator {
        async fn invoke(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("Around noon.".to_string())
        }
    }

    #[test]
    fn test_extract_date() {
        assert_eq!(
            extract_date("Why is output low on 2019-02-07 at 12:00:00?"),
            Some("2019-02-07")
        );
        assert_eq!(extract_date("first 2017-10-01 then 2018-01-01"), Some("2017-10-01"));
        assert_eq!(extract_date("What time of day is best?"), None);
    }

    #[test]
    fn test_narrowing_keeps_matching_subset() {
        let records = [
            record("a", r#"{"datetime":"2019-02-06 12:00:00"}"#),
            record("b", r#"{"datetime":"2019-02-07 12:00:00"}"#),
            record("c", r#"{"datetime":"2019-02-07 13:00:00"}"#),
        ];

        let narrowed = narrow_by_date(scored(&records), "output on 2019-02-07?");
        assert_eq!(ids(&narrowed), vec!["b", "c"]);
        assert!(narrowed.iter().all(|(r, _)| r.content.contains("2019-02-07")));
    }

    #[test]
    fn test_narrowing_checks_datetime_metadata() {
        let mut metadata = Map::new();
        metadata.insert("datetime".to_string(), json!("2019-02-07T12:00:00"));
        let records = [record("a", "no date here"), Record::new("b", "nor here", metadata)];

        let narrowed = narrow_by_date(scored(&records), "2019-02-07");
        assert_eq!(ids(&narrowed), vec!["b"]);
    }

    #[test]
    fn test_narrowing_falls_back_when_nothing_matches() {
        let records = [record("a", "2019-02-06"), record("b", "2019-02-08")];

        let narrowed = narrow_by_date(scored(&records), "what about 2020-01-01?");
        assert_eq!(ids(&narrowed), vec!["a", "b"]);

        let untouched = narrow_by_date(scored(&records), "no date at all");
        assert_eq!(ids(&untouched), vec!["a", "b"]);
    }

    #[test]
    fn test_context_is_truncated_to_limit() {
        let records = [record("a", &"x".repeat(3000)), record("b", &"y".repeat(3000))];
        let context = build_context(&records);
        assert_eq!(context.chars().count(), CONTEXT_CHAR_LIMIT);
        assert!(context.contains(CONTEXT_SEPARATOR));

        // Multi-byte characters count once each
        let wide = [record("a", &"é".repeat(5000))];
        assert_eq!(build_context(&wide).chars().count(), CONTEXT_CHAR_LIMIT);

        let short = [record("a", "one"), record("b", "two")];
        assert_eq!(build_context(&short), "one\n\n---\n\ntwo");
    }

    #[tokio::test]
    async fn test_query_returns_answer_and_ranked_sources() {
        let store = FixedStore(vec![
            record("solar.csv:group:0", "2019-02-06 readings"),
            record("solar.csv:group:1", "2019-02-07 readings"),
            record("model.h5", "Keras model file: model.h5"),
        ]);
        let engine = RagEngine::new(store, EchoGenerator::default());

        let response = engine.query("What happened on 2019-02-07?").await.unwrap();
        assert_eq!(response.response_text, "Around noon.");
        assert_eq!(response.sources, vec!["solar.csv:group:1"]);
        assert_eq!(response.query_text, "What happened on 2019-02-07?");

        let prompts = engine.generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("2019-02-07 readings"));
        assert!(!prompts[0].contains("2019-02-06 readings"));
        assert!(prompts[0].ends_with("What happened on 2019-02-07?"));
    }

    #[tokio::test]
    async fn test_query_on_empty_store() {
        let engine = RagEngine::new(FixedStore(Vec::new()), EchoGenerator::default());

        let response = engine.query(EXAMPLE_QUERY).await.unwrap();
        assert!(response.sources.is_empty());
        assert_eq!(response.response_text, "Around noon.");
    }
}

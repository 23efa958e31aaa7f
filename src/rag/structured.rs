//! Structured query path: constrained query generation, extraction,
//! validation and execution

use std::sync::Arc;
use std::time::Duration;

use regex_lite::Regex;
use tracing::debug;
use tracing::warn;

use crate::backends::StructuredBackend;
use crate::backends::TextGenerator;
use crate::errors::VitaRagError;
use crate::models::QueryOutcome;
use crate::rag::prompts;

/// Generates and executes a read-only query against the structured store.
///
/// Every failure mode (generation error, unextractable output, rejected
/// query, execution error, timeout) is converted into
/// [`QueryOutcome::Failure`]; nothing raises past this component.
pub struct StructuredQueryExecutor {
    generator: Arc<dyn TextGenerator>,
    backend: Arc<dyn StructuredBackend>,
    allowed_tables: Vec<String>,
    max_rows: usize,
    query_timeout: Duration,
    delimited: Regex,
    fenced: Regex,
    bare: Regex,
    table_refs: Regex,
}

impl StructuredQueryExecutor {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        backend: Arc<dyn StructuredBackend>,
        allowed_tables: Vec<String>,
        max_rows: usize,
        query_timeout: Duration,
    ) -> Self {
        Self {
            generator,
            backend,
            allowed_tables,
            max_rows,
            query_timeout,
            delimited: Regex::new(r"(?is)SQLQuery:\s*(SELECT\b.+?)(?:;|$)")
                .expect("delimited pattern is valid"),
            fenced: Regex::new(r"(?is)```sql\s*(SELECT\b.+?)\s*```")
                .expect("fenced pattern is valid"),
            bare: Regex::new(r"(?is)\b(SELECT\b.+?)(?:;|$)").expect("bare pattern is valid"),
            table_refs: Regex::new(r"(?i)\b(?:from|join)\s+([A-Za-z_][A-Za-z0-9_]*)")
                .expect("table pattern is valid"),
        }
    }

    /// Generate, sanitize and execute a query for a standalone question
    pub async fn execute(&self, question: &str) -> QueryOutcome {
        let table = self
            .allowed_tables
            .first()
            .map_or("profile_facts", String::as_str);
        let prompt = prompts::build_query_generation_prompt(table, self.max_rows, question);

        let raw = match self.generator.generate(&prompt, 0.0).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Query generation failed: {e}");
                return QueryOutcome::Failure(format!("query generation failed: {e}"));
            }
        };

        let Some(sql) = self.extract_query(&raw) else {
            warn!("No executable query in model output: {}", truncated(&raw));
            return QueryOutcome::Failure("no executable query in model output".to_string());
        };

        if let Err(e) = self.validate(&sql) {
            warn!("{e}: {sql}");
            return QueryOutcome::Failure(e.to_string());
        }

        debug!("Executing structured query: {sql}");
        match tokio::time::timeout(self.query_timeout, self.backend.execute_readonly(&sql)).await {
            Ok(Ok(result)) => QueryOutcome::from_backend(result),
            Ok(Err(e)) => {
                warn!("Structured execution failed: {e}");
                QueryOutcome::Failure(format!("execution failed: {e}"))
            }
            Err(_) => {
                let e = VitaRagError::Timeout("structured query execution".to_string());
                warn!("{e}");
                QueryOutcome::Failure(e.to_string())
            }
        }
    }

    /// Isolate the executable query from the raw model output.
    ///
    /// Layered: an explicit `SQLQuery:` delimiter wins, then a fenced
    /// ```sql block, then a bare statement as last resort. Conversational
    /// wrapper text around the statement is discarded.
    fn extract_query(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        for pattern in [&self.delimited, &self.fenced, &self.bare] {
            if let Some(captures) = pattern.captures(raw) {
                if let Some(matched) = captures.get(1) {
                    return Some(matched.as_str().trim().trim_end_matches(';').to_string());
                }
            }
        }

        None
    }

    /// Hard guard against mutation: the candidate must be a single SELECT
    /// statement touching only allow-listed tables.
    fn validate(&self, sql: &str) -> crate::errors::Result<()> {
        let trimmed = sql.trim();

        if !trimmed
            .get(..6)
            .is_some_and(|head| head.eq_ignore_ascii_case("select"))
        {
            return Err(VitaRagError::QueryRejected(
                "query does not begin with SELECT".to_string(),
            ));
        }

        if trimmed.contains(';') {
            return Err(VitaRagError::QueryRejected(
                "multiple statements are not allowed".to_string(),
            ));
        }

        for captures in self.table_refs.captures_iter(trimmed) {
            if let Some(table) = captures.get(1) {
                let name = table.as_str();
                if !self
                    .allowed_tables
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(name))
                {
                    return Err(VitaRagError::QueryRejected(format!(
                        "table '{name}' is not allow-listed"
                    )));
                }
            }
        }

        Ok(())
    }
}

fn truncated(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(100)
        .map_or(text.len(), |(idx, _)| idx);
    &text[..end]
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::backends::TokenStream;
    use crate::errors::Result;

    struct FixedGenerator(String);

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String> {
            Ok(self.0.clone())
        }

        async fn stream_generate(&self, _prompt: &str) -> Result<TokenStream> {
            unimplemented!("not used by the executor")
        }
    }

    struct RecordingBackend {
        calls: AtomicUsize,
        executed: Mutex<Vec<String>>,
        result: String,
    }

    impl RecordingBackend {
        fn new(result: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                executed: Mutex::new(Vec::new()),
                result: result.to_string(),
            }
        }
    }

    #[async_trait]
    impl StructuredBackend for RecordingBackend {
        async fn execute_readonly(&self, sql: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.executed.lock().unwrap().push(sql.to_string());
            Ok(self.result.clone())
        }
    }

    fn executor(
        model_output: &str,
        backend: Arc<RecordingBackend>,
    ) -> StructuredQueryExecutor {
        StructuredQueryExecutor::new(
            Arc::new(FixedGenerator(model_output.to_string())),
            backend,
            vec!["profile_facts".to_string()],
            10,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_delimited_extraction() {
        let backend = Arc::new(RecordingBackend::new("count: 7"));
        let exec = executor(
            "Sure, here you go. SQLQuery: SELECT COUNT(*) FROM profile_facts WHERE category = 'project';",
            backend.clone(),
        );

        let outcome = exec.execute("How many projects?").await;

        assert_eq!(outcome, QueryOutcome::Success("count: 7".to_string()));
        assert_eq!(
            backend.executed.lock().unwrap()[0],
            "SELECT COUNT(*) FROM profile_facts WHERE category = 'project'"
        );
    }

    #[tokio::test]
    async fn test_fenced_extraction() {
        let backend = Arc::new(RecordingBackend::new("rows"));
        let exec = executor(
            "```sql\nSELECT text_body FROM profile_facts LIMIT 10\n```",
            backend.clone(),
        );

        assert!(exec.execute("List projects").await.is_success());
        assert_eq!(
            backend.executed.lock().unwrap()[0],
            "SELECT text_body FROM profile_facts LIMIT 10"
        );
    }

    #[tokio::test]
    async fn test_bare_statement_extraction() {
        let backend = Arc::new(RecordingBackend::new("rows"));
        let exec = executor("SELECT text_body FROM profile_facts", backend.clone());

        assert!(exec.execute("List projects").await.is_success());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mutation_prefix_is_discarded() {
        let backend = Arc::new(RecordingBackend::new("ok"));
        let exec = executor(
            "DROP TABLE profile_facts; SELECT COUNT(*) FROM profile_facts",
            backend.clone(),
        );

        assert!(exec.execute("How many?").await.is_success());
        let executed = backend.executed.lock().unwrap();
        assert!(executed[0].starts_with("SELECT"));
        assert!(!executed[0].to_uppercase().contains("DROP"));
    }

    #[tokio::test]
    async fn test_mutation_suffix_is_cut_at_statement_end() {
        let backend = Arc::new(RecordingBackend::new("ok"));
        let exec = executor(
            "SELECT COUNT(*) FROM profile_facts; DROP TABLE profile_facts",
            backend.clone(),
        );

        assert!(exec.execute("How many?").await.is_success());
        assert_eq!(
            backend.executed.lock().unwrap()[0],
            "SELECT COUNT(*) FROM profile_facts"
        );
    }

    #[tokio::test]
    async fn test_pure_mutation_never_reaches_backend() {
        let backend = Arc::new(RecordingBackend::new("ok"));
        let exec = executor(
            "UPDATE profile_facts SET text_body = 'x'",
            backend.clone(),
        );

        let outcome = exec.execute("Change something").await;

        assert!(!outcome.is_success());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_table_outside_allow_list_is_rejected() {
        let backend = Arc::new(RecordingBackend::new("ok"));
        let exec = executor("SELECT * FROM chat_sessions", backend.clone());

        let outcome = exec.execute("Show sessions").await;

        assert!(!outcome.is_success());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_backend_error_marker_becomes_failure() {
        let backend = Arc::new(RecordingBackend::new("ERROR: relation does not exist"));
        let exec = executor("SELECT x FROM profile_facts", backend);

        assert!(!exec.execute("Anything").await.is_success());
    }

    #[tokio::test]
    async fn test_adversarial_keyword_soup_is_guarded() {
        // Mutation keywords wrapped around a SELECT in varied casings; the
        // executed text must always be a single SELECT statement.
        let cases = [
            "delete from profile_facts; SeLeCt COUNT(*) FROM profile_facts",
            "INSERT INTO profile_facts VALUES (1); SELECT id FROM profile_facts; TRUNCATE profile_facts",
            "sql: ```sql\nSELECT category FROM profile_facts\n``` and then DROP TABLE profile_facts",
        ];
        for case in cases {
            let backend = Arc::new(RecordingBackend::new("ok"));
            let exec = executor(case, backend.clone());
            let outcome = exec.execute("q").await;
            assert!(outcome.is_success(), "case should extract a SELECT: {case}");
            for executed in backend.executed.lock().unwrap().iter() {
                let upper = executed.to_uppercase();
                assert!(upper.starts_with("SELECT"));
                for keyword in ["DROP", "DELETE", "INSERT", "TRUNCATE", "UPDATE", ";"] {
                    assert!(!upper.contains(keyword), "{executed} contains {keyword}");
                }
            }
        }
    }
}

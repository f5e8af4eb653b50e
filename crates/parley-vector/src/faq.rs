//! FAQ knowledge base: question/answer pairs indexed by question embedding.
//!
//! Entries are loaded from a CSV file with a `question,answer` header. A
//! lookup embeds the incoming message, finds the closest stored questions,
//! and hands their answers to the FAQ handler as grounding context.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use parley_core::error::ParleyError;

use crate::embedding::DynEmbeddingService;
use crate::index::{SearchHit, VectorIndex};

/// One question/answer pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
}

/// Semantic lookup over FAQ entries.
#[derive(Clone)]
pub struct FaqKnowledgeBase {
    embedder: Arc<dyn DynEmbeddingService>,
    index: VectorIndex<FaqEntry>,
}

impl FaqKnowledgeBase {
    pub fn new(embedder: Arc<dyn DynEmbeddingService>) -> Self {
        Self {
            embedder,
            index: VectorIndex::new(),
        }
    }

    /// Embed and index each entry's question. Returns the number ingested.
    pub async fn ingest(&self, entries: Vec<FaqEntry>) -> Result<usize, ParleyError> {
        let mut count = 0;
        for entry in entries {
            let embedding = self.embedder.embed_boxed(&entry.question).await?;
            self.index.insert(Uuid::new_v4(), embedding, entry)?;
            count += 1;
        }
        debug!(count, "FAQ entries indexed");
        Ok(count)
    }

    /// Return the `k` entries whose questions best match `query`.
    pub async fn lookup(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<SearchHit<FaqEntry>>, ParleyError> {
        let embedding = self.embedder.embed_boxed(query).await?;
        self.index.search(&embedding, k)
    }

    /// Answers of the top `k` matches joined into one context string.
    pub async fn context_for(&self, query: &str, k: usize) -> Result<String, ParleyError> {
        let hits = self.lookup(query, k).await?;
        Ok(hits
            .iter()
            .map(|h| h.payload.answer.as_str())
            .collect::<Vec<_>>()
            .join(" "))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Read and parse a `question,answer` CSV file.
///
/// Entries are returned rather than ingested so a lexical embedder can be
/// fitted on the questions before the knowledge base is built.
pub async fn read_faq_csv(path: &Path) -> Result<Vec<FaqEntry>, ParleyError> {
    let content = tokio::fs::read_to_string(path).await?;
    let entries = parse_faq_csv(&content)?;
    info!(path = %path.display(), count = entries.len(), "FAQ file read");
    Ok(entries)
}

/// Parse FAQ CSV content. The header must name `question` and `answer`
/// columns (any order, case-insensitive); other columns are ignored.
pub fn parse_faq_csv(content: &str) -> Result<Vec<FaqEntry>, ParleyError> {
    let mut records = parse_csv_records(content)?.into_iter();
    let header = records
        .next()
        .ok_or_else(|| ParleyError::Serialization("FAQ CSV is empty".to_string()))?;

    let column = |name: &str| {
        header
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .ok_or_else(|| ParleyError::Serialization(format!("FAQ CSV missing '{}' column", name)))
    };
    let q_col = column("question")?;
    let a_col = column("answer")?;

    Ok(records
        .filter_map(|row| {
            let question = row.get(q_col)?.trim();
            let answer = row.get(a_col)?.trim();
            if question.is_empty() || answer.is_empty() {
                return None;
            }
            Some(FaqEntry {
                question: question.to_string(),
                answer: answer.to_string(),
            })
        })
        .collect())
}

/// Split CSV text into records. Handles quoted fields with embedded commas,
/// newlines, and doubled quotes. Blank lines are skipped.
fn parse_csv_records(content: &str) -> Result<Vec<Vec<String>>, ParleyError> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                if !(record.len() == 1 && record[0].is_empty()) {
                    records.push(std::mem::take(&mut record));
                } else {
                    record.clear();
                }
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(ParleyError::Serialization(
            "unterminated quoted field in CSV".to_string(),
        ));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

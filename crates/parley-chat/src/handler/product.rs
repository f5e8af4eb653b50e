//! Product search: the model writes a SQL query, the catalog runs it, and a
//! second model call turns the rows into a reply.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use parley_core::types::ConversationTurn;
use parley_storage::catalog::ProductCatalog;

use crate::error::ChatError;
use crate::handler::RouteHandler;
use crate::llm::{ChatMessage, ChatModel, CompletionOptions};
use crate::types::HandlerReply;

pub const NO_QUERY_MESSAGE: &str = "Sorry, I couldn't generate a query for your question.";
pub const QUERY_FAILED_MESSAGE: &str = "Sorry, there was a problem executing SQL query";

static SQL_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<SQL>(.*?)</SQL>").unwrap());
static MESSAGE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<MESSAGE>(.*?)</MESSAGE>").unwrap());

const SQL_PROMPT: &str = "You translate shopping questions into SQLite queries for this table:

<schema>
table: product
product_link  TEXT     link to the product page
title         TEXT     product name
brand         TEXT     brand name
price         INTEGER  price in Indian Rupees
discount      REAL     fractional discount, 0.1 means 10% off
avg_rating    REAL     average rating from 0 to 5
total_ratings INTEGER  number of ratings
</schema>

Rules:
1. Write one SELECT * query and add LIMIT 5 unless the user asks for more.
2. Match brands case-insensitively with LIKE, for example brand LIKE '%nike%'.
3. If the question has nothing to do with products, prices, brands, discounts, or ratings, \
do not write SQL.
4. Reply with <SQL>query</SQL> for a query, or <MESSAGE>Please ask a question related to \
products, such as brand, price, or discount.</MESSAGE> otherwise. Output nothing outside the tags.";

const SUMMARY_PROMPT: &str = "You answer shoppers using only the rows returned from the product \
table. Keep a friendly, concise tone.

When the question asks for products, list up to 5 as a numbered list ordered by avg_rating, \
highest first. Give each one's title, price in Rs., discount as a percentage, rating, and link, \
for example:
1. Air Max: Rs. 5999 (20% off), Rating: 4.5, Link: https://shop.example/air-max

For other questions (averages, counts) answer in one sentence from the data. If the data is an \
empty list, reply \"No products found matching the criteria.\"";

/// Outcome of parsing the query-generation reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPlan {
    /// A query to run against the catalog.
    Sql(String),
    /// A message to pass straight back to the user.
    Message(String),
    /// Neither tag was present.
    Unparseable,
}

/// Extract the first `<SQL>` block, else the first `<MESSAGE>` block.
pub fn parse_query_plan(reply: &str) -> QueryPlan {
    if let Some(sql) = first_block(&SQL_TAG, reply) {
        return QueryPlan::Sql(sql);
    }
    match first_block(&MESSAGE_TAG, reply) {
        Some(message) => QueryPlan::Message(message),
        None => QueryPlan::Unparseable,
    }
}

fn first_block(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Answers product questions from the SQLite catalog.
///
/// Bad or missing queries resolve to a user-facing message; only model
/// transport failures surface as errors.
pub struct ProductSearchHandler {
    catalog: ProductCatalog,
    model: Arc<dyn ChatModel>,
    temperature: f32,
}

impl ProductSearchHandler {
    pub fn new(catalog: ProductCatalog, model: Arc<dyn ChatModel>, temperature: f32) -> Self {
        Self {
            catalog,
            model,
            temperature,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions::new(self.temperature)
    }
}

#[async_trait]
impl RouteHandler for ProductSearchHandler {
    fn name(&self) -> &str {
        "sql"
    }

    async fn answer(
        &self,
        message: &str,
        _history: &[ConversationTurn],
    ) -> Result<HandlerReply, ChatError> {
        let generation = [ChatMessage::system(SQL_PROMPT), ChatMessage::user(message)];
        let reply = self.model.complete(&generation, self.options()).await?;

        let sql = match parse_query_plan(&reply) {
            QueryPlan::Sql(sql) => sql,
            QueryPlan::Message(text) => return Ok(HandlerReply::text(text)),
            QueryPlan::Unparseable => {
                debug!("Query generation reply had no tags");
                return Ok(HandlerReply::text(NO_QUERY_MESSAGE));
            }
        };

        let rows = match self.catalog.run_select(&sql) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, sql = %sql, "Generated query rejected or failed");
                return Ok(HandlerReply::text(QUERY_FAILED_MESSAGE));
            }
        };
        debug!(rows = rows.len(), "Catalog rows fetched");

        let data = serde_json::to_string(&rows)
            .map_err(|e| ChatError::Handler(format!("failed to encode rows: {}", e)))?;
        let summary = [
            ChatMessage::system(SUMMARY_PROMPT),
            ChatMessage::user(format!("Question: {}\nData: {}", message, data)),
        ];
        let answer = self.model.complete(&summary, self.options()).await?;
        Ok(HandlerReply::text(answer.trim()))
    }
}

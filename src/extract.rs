//! Fact extraction flow.
//!
//! The full path behind `POST /parse`: validate the two inputs, hash the
//! text, check the cache, and on a miss ask the completion API for a JSON
//! fact list and persist it. Collaborators are passed in as trait objects so
//! the flow can be driven against test doubles.

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::completion::CompletionClient;
use crate::hash::sha256_hex;
use crate::store::{FactStore, InsertOutcome};

/// Maximum accepted length of the `text` parameter, in characters.
pub const MAX_TEXT_LEN: usize = 2000;
/// Maximum accepted length of the `context` parameter, in characters.
pub const MAX_CONTEXT_LEN: usize = 256;

/// Why a parse request failed.
///
/// The two `Invalid*` variants are client errors detected before any
/// external call; `Upstream` covers completion failures, malformed
/// completion output, and persistence failures.
#[derive(Debug)]
pub enum ParseError {
    InvalidText,
    InvalidContext,
    Upstream(anyhow::Error),
}

impl From<anyhow::Error> for ParseError {
    fn from(err: anyhow::Error) -> Self {
        ParseError::Upstream(err)
    }
}

/// The JSON document reconstructed from the completion output.
#[derive(Debug, Deserialize)]
struct ExtractedFacts {
    facts: Vec<String>,
}

/// Build the completion prompt for a text + context pair.
///
/// The template pre-seeds the opening `{ "facts":[` and the client stops
/// generation at the closing bracket, so the raw completion text is exactly
/// the inside of the JSON list (see [`parse_fact_list`]).
pub fn build_prompt(context: &str, text: &str) -> String {
    format!(
        "In the context of {context}, please extract in JSON format (list) \
         the facts (short and concise) from the following text:\n{text}\n{{ \"facts\":["
    )
}

/// Re-attach the JSON prefix and suffix omitted by the prompt seeding and
/// the stop sequences.
fn wrap_completion(raw: &str) -> String {
    format!("{{ \"facts\": [{raw}]}}")
}

/// Parse raw completion output into an ordered list of fact strings.
///
/// Fails if the wrapped text is not valid JSON or lacks a `facts` array.
pub fn parse_fact_list(raw: &str) -> Result<Vec<String>> {
    let doc: ExtractedFacts = serde_json::from_str(&wrap_completion(raw))
        .context("completion output is not a valid JSON fact list")?;
    Ok(doc.facts)
}

/// Run the full parse flow: validate, check the cache, and on a miss
/// generate and persist.
///
/// Returns the fact strings for the submitted text, whether cached or
/// freshly extracted. Validation short-circuits before any external call.
pub async fn extract_facts(
    completion: &dyn CompletionClient,
    store: &dyn FactStore,
    text: Option<&str>,
    context: Option<&str>,
) -> Result<Vec<String>, ParseError> {
    let text = match text {
        Some(t) if !t.is_empty() && t.chars().count() <= MAX_TEXT_LEN => t,
        _ => return Err(ParseError::InvalidText),
    };
    let context = match context {
        Some(c) if !c.is_empty() && c.chars().count() <= MAX_CONTEXT_LEN => c,
        _ => return Err(ParseError::InvalidContext),
    };

    let hash = sha256_hex(text);

    if let Some(facts) = store.facts_by_hash(&hash).await? {
        debug!(%hash, count = facts.len(), "cache hit");
        return Ok(facts);
    }

    debug!(%hash, "cache miss, requesting completion");
    let prompt = build_prompt(context, text);
    let raw = completion.complete(&prompt).await?;
    let facts = parse_fact_list(&raw)?;

    match store.insert_extraction(text, context, &hash, &facts).await? {
        InsertOutcome::Inserted { prompt_id } => {
            info!(%hash, prompt_id, count = facts.len(), "extraction stored");
            Ok(facts)
        }
        // Lost the insert race to an identical concurrent request; its
        // stored facts are the canonical result.
        InsertOutcome::Existing { facts } => Ok(facts),
    }
}

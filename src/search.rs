//! Rendering of search results for the command line.

use serde::Serialize;

use crate::{
    error::Result,
    retriever::RetrievedDocument,
    text_util::{DEFAULT_PREVIEW_MAX_CHARS, preview},
};

#[derive(Debug, Serialize)]
struct SearchResponse<'a> {
    query: &'a str,
    result_count: usize,
    results: &'a [RetrievedDocument],
}

/// Human-readable listing, one numbered entry per result.
pub fn render_human(results: &[RetrievedDocument]) -> String {
    if results.is_empty() {
        return "No results found.\n".to_string();
    }

    let mut out = String::new();
    for (rank, doc) in results.iter().enumerate() {
        out.push_str(&format!(
            "{:>3}. [{:.6}] {}\n",
            rank + 1,
            doc.rrf_score,
            doc.id
        ));
        if !doc.title.is_empty() {
            out.push_str(&format!("     {}\n", doc.title));
        }
        if !doc.source_url.is_empty() {
            out.push_str(&format!("     {}\n", doc.source_url));
        }
        out.push_str(&format!(
            "     {}\n",
            preview(&doc.text, DEFAULT_PREVIEW_MAX_CHARS)
        ));
    }
    out.push_str(&format!("\n{} result(s)\n", results.len()));
    out
}

/// JSON object with the query, result count and full results.
pub fn render_json(results: &[RetrievedDocument], query: &str) -> Result<String> {
    Ok(serde_json::to_string(&SearchResponse {
        query,
        result_count: results.len(),
        results,
    })?)
}

pub fn format_human(results: &[RetrievedDocument]) {
    print!("{}", render_human(results));
}

pub fn format_json(results: &[RetrievedDocument], query: &str) -> Result<()> {
    println!("{}", render_json(results, query)?);
    Ok(())
}

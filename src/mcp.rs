use std::sync::Arc;

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    error,
    retriever::{HybridRetriever, RetrievedDocument, SearchParams},
    text_util::preview,
};

const SUMMARY_PREVIEW_CHARS: usize = 120;

struct McpState {
    retriever: HybridRetriever,
}

#[derive(Clone)]
pub struct HybridSeekMcpServer {
    state: Arc<McpState>,
    tool_router: ToolRouter<Self>,
}

impl HybridSeekMcpServer {
    fn new(state: Arc<McpState>) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl HybridSeekMcpServer {
    /// Hybrid dense + BM25 search fused with reciprocal rank fusion.
    #[tool(
        name = "search",
        description = "Retrieve the most relevant document chunks for a query. Combines semantic and keyword search. Results carry id, rrf_score, title, text and source_url."
    )]
    pub async fn search(
        &self,
        params: Parameters<SearchToolParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let query = params.query.clone();
        let search_params = params.to_search_params();

        // The embedding client blocks, so keep it off the async workers.
        let state = Arc::clone(&self.state);
        let q = query.clone();
        let results = tokio::task::spawn_blocking(move || {
            state.retriever.search(&q, &search_params)
        })
        .await
        .map_err(|e| mcp_error("search task failed", e))?;

        let results = match results {
            Ok(results) => results,
            Err(e @ error::Error::InvalidParameter(_)) => {
                return Err(rmcp::ErrorData::invalid_params(e.to_string(), None));
            }
            Err(e) => return Err(mcp_error("search failed", e)),
        };

        let summary = format_search_summary(&results, &query);
        let structured = serde_json::to_value(SearchResponse {
            query,
            result_count: results.len(),
            results,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for HybridSeekMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("hybridseek", env!("CARGO_PKG_VERSION"))
                    .with_title("hybridseek MCP"),
            )
            .with_instructions(
                "Use search to retrieve supporting passages. Pass sourceId to restrict results to one source document.",
            )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchToolParams {
    /// Search query string.
    pub query: String,
    /// Maximum number of results (default: 5).
    pub k: Option<usize>,
    /// Only return chunks whose source_id matches.
    pub source_id: Option<String>,
    /// Semantic candidates considered before fusion (default: 10).
    pub k_semantic: Option<usize>,
    /// Keyword candidates considered before fusion (default: 10).
    pub k_keyword: Option<usize>,
    /// Drop semantic candidates below this cosine similarity.
    pub similarity_threshold: Option<f32>,
    /// Semantic weight in fusion, between 0 and 1 (default: 0.7).
    pub rrf_beta: Option<f64>,
    /// Use keyword results alone if the embedding service fails.
    pub keyword_fallback: Option<bool>,
}

impl SearchToolParams {
    fn to_search_params(&self) -> SearchParams {
        let defaults = SearchParams::default();
        SearchParams {
            k: self.k.unwrap_or(defaults.k),
            filter_source_id: self.source_id.clone(),
            k_semantic: self.k_semantic.unwrap_or(defaults.k_semantic),
            k_keyword: self.k_keyword.unwrap_or(defaults.k_keyword),
            similarity_threshold: self
                .similarity_threshold
                .unwrap_or(defaults.similarity_threshold),
            rrf_beta: self.rrf_beta.unwrap_or(defaults.rrf_beta),
            keyword_fallback: self
                .keyword_fallback
                .unwrap_or(defaults.keyword_fallback),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    result_count: usize,
    results: Vec<RetrievedDocument>,
}

fn format_search_summary(results: &[RetrievedDocument], query: &str) -> String {
    if results.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(results.len() + 1);
    let suffix = if results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        results.len(),
        suffix
    ));

    for doc in results {
        lines.push(format!(
            "{} {:.6} {}",
            doc.id,
            doc.rrf_score,
            preview(&doc.text, SUMMARY_PREVIEW_CHARS)
        ));
    }

    lines.join("\n")
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

/// Serve the search tool over stdio until the client disconnects.
pub fn run_mcp(retriever: HybridRetriever) -> error::Result<()> {
    let state = Arc::new(McpState { retriever });
    let server = HybridSeekMcpServer::new(Arc::clone(&state));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    info!("serving MCP over stdio");
    let outcome = runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    });

    // The retriever owns a blocking HTTP client, which must not be dropped
    // from inside the runtime.
    drop(runtime);
    drop(state);
    outcome
}

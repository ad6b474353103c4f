//! HTTP endpoints
//!
//! REST API over the retrieval core. CORS-permissive; upload size bounded by
//! the configured body limit; retrieval endpoints never fail on retrieval
//! subproblems.

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use parley_core::{Document, DocumentType, Error};
use parley_store::NewAgent;

use crate::error::ApiError;
use crate::metrics::metrics_endpoint;
use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let max_upload = state.config.server.max_upload_bytes;

    Router::new()
        // Document endpoints
        .route("/api/documents", post(upload_document))
        .route("/api/documents", get(list_documents))
        .route("/api/documents/:id", get(get_document))
        .route("/api/documents/:id", delete(delete_document))
        .route("/api/documents/search", post(search_documents))
        .route("/api/documents/context", post(build_context))

        // Agent endpoints
        .route("/api/agents", post(create_agent))
        .route("/api/agents", get(list_agents))
        .route("/api/agents/:id", delete(delete_agent))
        .route("/api/agents/:id/documents", post(link_agent_documents))
        .route("/api/agents/:id/documents/:doc_id", delete(unlink_agent_document))
        .route("/api/agent-templates", get(list_agent_templates))
        .route("/api/agent-templates/:key", get(get_agent_template))

        // Statistics
        .route("/api/contextual/stats", get(contextual_stats))

        // Health and metrics
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_endpoint))

        // Middleware
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Owner scoping for list/delete style endpoints
#[derive(Debug, Deserialize)]
struct OwnerQuery {
    owner_id: String,
}

/// Upload response
#[derive(Debug, Serialize)]
struct UploadResponse {
    document_id: Uuid,
    chunk_count: usize,
}

/// Upload a document: multipart `file`, `title`, `owner_id`, optional `doc_type`
async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut file: Option<Vec<u8>> = None;
    let mut title: Option<String> = None;
    let mut owner_id: Option<String> = None;
    let mut doc_type = "text".to_string();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::invalid_input(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::invalid_input(format!("unreadable file field: {e}")))?;
                file = Some(bytes.to_vec());
            }
            "title" => {
                title = Some(read_text_field(field).await?);
            }
            "owner_id" => {
                owner_id = Some(read_text_field(field).await?);
            }
            "doc_type" => {
                doc_type = read_text_field(field).await?;
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| Error::invalid_input("missing field: file"))?;
    let title = title.ok_or_else(|| Error::invalid_input("missing field: title"))?;
    let owner_id = owner_id.ok_or_else(|| Error::invalid_input("missing field: owner_id"))?;
    if owner_id.trim().is_empty() {
        return Err(Error::invalid_input("owner_id must not be empty").into());
    }
    let doc_type = DocumentType::parse(&doc_type)?;

    // Ingest runs on its own task: a dropped client connection must not
    // cancel work that is already half way through embedding.
    let pipeline = state.services.pipeline.clone();
    let receipt = tokio::spawn(async move {
        pipeline.ingest(&owner_id, &title, doc_type, &file).await
    })
    .await
    .map_err(|e| Error::backend(format!("ingest task failed: {e}")))??;

    Ok(Json(UploadResponse {
        document_id: receipt.document_id,
        chunk_count: receipt.chunk_count,
    }))
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    Ok(field
        .text()
        .await
        .map_err(|e| Error::invalid_input(format!("unreadable form field: {e}")))?)
}

/// Document list entry
#[derive(Debug, Serialize)]
struct DocumentResponse {
    id: Uuid,
    title: String,
    #[serde(rename = "type")]
    doc_type: String,
    created_at: chrono::DateTime<chrono::Utc>,
    metadata: serde_json::Value,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        let mut metadata = doc.metadata;
        if let Some(map) = metadata.as_object_mut() {
            map.insert("chunk_count".to_string(), doc.chunk_count.into());
        }
        Self {
            id: doc.id,
            title: doc.title,
            doc_type: doc.doc_type.as_str().to_string(),
            created_at: doc.created_at,
            metadata,
        }
    }
}

/// List an owner's documents
async fn list_documents(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Vec<DocumentResponse>>, ApiError> {
    let documents = state.services.store.documents.list(&query.owner_id).await?;
    Ok(Json(documents.into_iter().map(Into::into).collect()))
}

#[derive(Debug, Serialize)]
struct DocumentDetailResponse {
    document: DocumentResponse,
    sections: Vec<SectionResponse>,
}

#[derive(Debug, Serialize)]
struct SectionResponse {
    id: Uuid,
    chunk_index: i32,
    content: String,
    is_contextualized: bool,
}

/// Fetch one document with its ordered sections
async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<DocumentDetailResponse>, ApiError> {
    let document = state
        .services
        .store
        .documents
        .get(&query.owner_id, id)
        .await?
        .ok_or_else(|| Error::not_found(format!("document {id}")))?;

    let sections = state
        .services
        .store
        .documents
        .sections(&query.owner_id, id)
        .await?;

    Ok(Json(DocumentDetailResponse {
        document: document.into(),
        sections: sections
            .into_iter()
            .map(|s| SectionResponse {
                id: s.id,
                chunk_index: s.chunk_index,
                content: s.content,
                is_contextualized: s.is_contextualized,
            })
            .collect(),
    }))
}

/// Delete a document; cascades to sections and agent links
async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<OwnerQuery>,
) -> Result<StatusCode, ApiError> {
    state.services.pipeline.remove(&query.owner_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Search request
#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    owner_id: String,
    agent_id: Option<Uuid>,
    top_k: Option<usize>,
}

/// Search response entry
#[derive(Debug, Serialize)]
struct SearchHit {
    chunk_id: Uuid,
    document_id: Uuid,
    content: String,
    score: f32,
}

/// Scoped chunk search, ordered high-to-low
async fn search_documents(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Vec<SearchHit>>, ApiError> {
    let results = state
        .services
        .context
        .search(
            &request.query,
            &request.owner_id,
            request.agent_id,
            request.top_k,
        )
        .await;

    Ok(Json(
        results
            .into_iter()
            .map(|r| SearchHit {
                chunk_id: r.chunk_id,
                document_id: r.document_id,
                content: r.content,
                score: r.rerank_score.unwrap_or(r.fused_score),
            })
            .collect(),
    ))
}

/// Context request: the per-turn hot path
#[derive(Debug, Deserialize)]
struct ContextRequest {
    query: String,
    owner_id: String,
    agent_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct ContextResponse {
    context: String,
    has_context: bool,
}

/// Build the context block an agent speaks from
async fn build_context(
    State(state): State<AppState>,
    Json(request): Json<ContextRequest>,
) -> Json<ContextResponse> {
    let block = state
        .services
        .context
        .build_context(&request.query, &request.owner_id, request.agent_id)
        .await;

    Json(ContextResponse {
        context: block.context,
        has_context: block.has_context,
    })
}

/// Agent creation request
#[derive(Debug, Deserialize)]
struct CreateAgentRequest {
    owner_id: String,
    name: String,
    instructions: String,
    #[serde(default)]
    voice_id: Option<String>,
    #[serde(default)]
    greeting: Option<String>,
}

#[derive(Debug, Serialize)]
struct AgentResponse {
    id: Uuid,
    owner_id: String,
    name: String,
    instructions: String,
    voice_id: String,
    greeting: String,
    is_default: bool,
}

impl From<parley_core::Agent> for AgentResponse {
    fn from(agent: parley_core::Agent) -> Self {
        Self {
            id: agent.id,
            owner_id: agent.owner_id,
            name: agent.name,
            instructions: agent.instructions,
            voice_id: agent.voice_id,
            greeting: agent.greeting,
            is_default: agent.is_default,
        }
    }
}

/// Create a persona
async fn create_agent(
    State(state): State<AppState>,
    Json(request): Json<CreateAgentRequest>,
) -> Result<Json<AgentResponse>, ApiError> {
    let greeting = request.greeting.unwrap_or_else(|| {
        format!("Hello! I'm {}. How can I help you today?", request.name)
    });
    let agent = state
        .services
        .agents
        .create(
            &request.owner_id,
            NewAgent {
                name: request.name,
                instructions: request.instructions,
                voice_id: request.voice_id.unwrap_or_default(),
                greeting,
            },
        )
        .await?;

    Ok(Json(agent.into()))
}

/// List an owner's personas plus the built-ins
async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Vec<AgentResponse>>, ApiError> {
    let agents = state.services.agents.list(&query.owner_id).await?;
    Ok(Json(agents.into_iter().map(Into::into).collect()))
}

/// Delete a persona
async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<OwnerQuery>,
) -> Result<StatusCode, ApiError> {
    state.services.agents.delete(&query.owner_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct LinkDocumentsRequest {
    owner_id: String,
    document_ids: Vec<Uuid>,
}

/// Grant an agent read access to documents
async fn link_agent_documents(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<LinkDocumentsRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .services
        .agents
        .link_documents(&request.owner_id, id, &request.document_ids)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Revoke one agent-document link
async fn unlink_agent_document(
    State(state): State<AppState>,
    Path((id, doc_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<OwnerQuery>,
) -> Result<StatusCode, ApiError> {
    state
        .services
        .agents
        .unlink_document(&query.owner_id, id, doc_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct TemplateResponse {
    key: &'static str,
    name: &'static str,
    description: &'static str,
}

/// List the built-in persona templates
async fn list_agent_templates() -> Json<Vec<TemplateResponse>> {
    Json(
        parley_agents::builtin_templates()
            .iter()
            .map(|t| TemplateResponse {
                key: t.key,
                name: t.name,
                description: t.description,
            })
            .collect(),
    )
}

#[derive(Debug, Serialize)]
struct TemplateDetailResponse {
    key: &'static str,
    name: &'static str,
    description: &'static str,
    instructions_preview: String,
}

/// Detail view of one built-in template
async fn get_agent_template(
    Path(key): Path<String>,
) -> Result<Json<TemplateDetailResponse>, ApiError> {
    let template = parley_agents::templates::template(&key)
        .ok_or_else(|| Error::not_found(format!("agent template '{key}'")))?;

    let preview: String = template.instructions.chars().take(100).collect();
    Ok(Json(TemplateDetailResponse {
        key: template.key,
        name: template.name,
        description: template.description,
        instructions_preview: format!("{preview}..."),
    }))
}

#[derive(Debug, Serialize)]
struct ContextualStatsResponse {
    total_documents: i64,
    total_chunks: i64,
    total_tokens: i64,
    estimated_cost_usd: f64,
}

/// Aggregate contextualization cost for an owner
async fn contextual_stats(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<ContextualStatsResponse>, ApiError> {
    let summary = state
        .services
        .store
        .stats
        .owner_summary(&query.owner_id)
        .await?;

    Ok(Json(ContextualStatsResponse {
        total_documents: summary.total_documents,
        total_chunks: summary.total_chunks,
        total_tokens: summary.total_tokens,
        estimated_cost_usd: summary.estimated_cost_usd,
    }))
}

/// Health check
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ready",
        "indexed_owners": state.services.registry.owner_count(),
        "metadata_cache_entries": state.services.metadata_cache.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_request_deserializes_without_optionals() {
        let request: SearchRequest =
            serde_json::from_str(r#"{"query": "q", "owner_id": "u1"}"#).unwrap();
        assert_eq!(request.query, "q");
        assert!(request.agent_id.is_none());
        assert!(request.top_k.is_none());
    }

    #[test]
    fn test_context_response_shape() {
        let response = ContextResponse {
            context: "From 'notes.txt':\ntext".to_string(),
            has_context: true,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["has_context"], true);
        assert!(json["context"].as_str().unwrap().starts_with("From '"));
    }

    #[test]
    fn test_document_response_merges_chunk_count() {
        let doc = Document {
            id: Uuid::new_v4(),
            owner_id: "u1".to_string(),
            title: "notes.txt".to_string(),
            doc_type: DocumentType::Text,
            metadata: serde_json::json!({"byte_size": 200}),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            chunk_count: 1,
        };
        let response: DocumentResponse = doc.into();
        assert_eq!(response.metadata["chunk_count"], 1);
        assert_eq!(response.metadata["byte_size"], 200);
    }
}

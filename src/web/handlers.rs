use actix_web::{web, HttpResponse, Responder};
use futures::StreamExt;
use log::info;
use serde_json::json;

use crate::store::models::{NewMessage, Role, SessionUpdate};
use crate::web::error::ApiError;
use crate::web::models::{
    ChatRequest, CreateMessageRequest, CreateSessionRequest, PageQuery, UpdateSessionRequest,
};
use crate::AppState;

// Health check endpoint
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

// Chat endpoint: NDJSON stream by default, plain JSON pass-through when
// `stream` is false.
pub async fn chat(
    data: web::Data<AppState>,
    req: web::Json<ChatRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = req.into_inner();
    request.validate().map_err(ApiError::InvalidRequest)?;

    info!(
        "Chat request for model {} ({} messages, stream: {})",
        request.model,
        request.messages.len(),
        request.stream
    );

    if !request.stream {
        let reply = data.backend.complete(&request).await?;
        return Ok(HttpResponse::Ok().json(reply));
    }

    // Cancelled when the response body is dropped (client gone) or when
    // the server shuts down.
    let cancel = data.shutdown.child_token();
    let on_disconnect = cancel.clone().drop_guard();

    let frames = data.relay.open(&request, cancel).await?;
    let body = frames.map(move |frame| {
        let _armed = &on_disconnect;
        frame.to_line()
    });

    Ok(HttpResponse::Ok()
        .content_type("application/x-ndjson")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(body))
}

pub async fn create_session(
    data: web::Data<AppState>,
    req: web::Json<CreateSessionRequest>,
) -> Result<HttpResponse, ApiError> {
    let session = data.store.create_session(&req.title).await?;
    info!("Created session {}", session.id);
    Ok(HttpResponse::Created().json(session))
}

pub async fn list_sessions(
    data: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let sessions = data.store.list_sessions(query.offset, query.limit).await?;
    Ok(HttpResponse::Ok().json(sessions))
}

pub async fn get_session(
    data: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let session = data.store.get_session(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(session))
}

pub async fn update_session(
    data: web::Data<AppState>,
    path: web::Path<i64>,
    req: web::Json<UpdateSessionRequest>,
) -> Result<HttpResponse, ApiError> {
    let update = SessionUpdate {
        title: req.into_inner().title,
    };
    let session = data.store.update_session(path.into_inner(), update).await?;
    Ok(HttpResponse::Ok().json(session))
}

pub async fn delete_session(
    data: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    data.store.delete_session(id).await?;
    info!("Deleted session {}", id);
    Ok(HttpResponse::NoContent().finish())
}

pub async fn create_message(
    data: web::Data<AppState>,
    path: web::Path<i64>,
    req: web::Json<CreateMessageRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = req.into_inner();
    let role = req.role.parse::<Role>().map_err(ApiError::InvalidRequest)?;
    let message = data
        .store
        .create_message(
            path.into_inner(),
            NewMessage {
                role,
                content: req.content,
            },
        )
        .await?;
    Ok(HttpResponse::Created().json(message))
}

pub async fn list_messages(
    data: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let messages = data.store.list_messages(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(messages))
}

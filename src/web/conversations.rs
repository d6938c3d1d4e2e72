use salvo::prelude::*;
use serde::Deserialize;
use serde_json::json;

use crate::db::{ConversationFilter, SenderType};
use crate::service::{InboundMessage, ServiceError};
use crate::web::{json_body, page_params, path_id, render, web_state};

#[derive(Deserialize)]
struct OutboundRequest {
    text: String,
    #[serde(default = "default_sender_type")]
    sender_type: SenderType,
}

fn default_sender_type() -> SenderType {
    SenderType::Agent
}

#[handler]
pub async fn list_conversations(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let (limit, offset) = page_params(req);
        let filter = ConversationFilter {
            page_id: req.query::<String>("page_id").filter(|p| !p.is_empty()),
            unread_only: req.query::<bool>("unread_only").unwrap_or(false),
            limit,
            offset,
        };
        let conversations = state
            .services
            .messaging
            .list_conversations(company_id, &filter)
            .await?;
        Ok::<_, ServiceError>(json!({
            "count": conversations.len(),
            "conversations": conversations,
            "limit": limit,
            "offset": offset,
        }))
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn get_conversation(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let conversation_id = path_id(req, "cid")?;
        state
            .services
            .messaging
            .get_conversation(company_id, conversation_id)
            .await
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn mark_read(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let conversation_id = path_id(req, "cid")?;
        state
            .services
            .messaging
            .mark_read(company_id, conversation_id)
            .await
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn list_messages(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let conversation_id = path_id(req, "cid")?;
        let (limit, offset) = page_params(req);
        let messages = state
            .services
            .messaging
            .list_messages(company_id, conversation_id, limit, offset)
            .await?;
        Ok::<_, ServiceError>(json!({
            "count": messages.len(),
            "messages": messages,
            "limit": limit,
            "offset": offset,
        }))
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn enqueue_message(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let conversation_id = path_id(req, "cid")?;
        let body: OutboundRequest = json_body(req).await?;
        state
            .services
            .messaging
            .enqueue_outbound(company_id, conversation_id, &body.text, body.sender_type)
            .await
    }
    .await;
    render(res, StatusCode::CREATED, result);
}

#[handler]
pub async fn ingest_inbound(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let inbound: InboundMessage = json_body(req).await?;
        state
            .services
            .messaging
            .ingest_inbound(company_id, &inbound)
            .await
    }
    .await;

    // a replayed provider id is acknowledged without creating anything
    let status = match &result {
        Ok(outcome) if outcome.duplicate => StatusCode::OK,
        _ => StatusCode::CREATED,
    };
    render(res, status, result);
}

#[handler]
pub async fn list_dead_letters(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let (limit, offset) = page_params(req);
        let messages = state
            .services
            .messaging
            .list_dead_letters(company_id, limit, offset)
            .await?;
        Ok::<_, ServiceError>(json!({
            "count": messages.len(),
            "messages": messages,
            "limit": limit,
            "offset": offset,
        }))
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn requeue_message(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let message_id = path_id(req, "mid")?;
        state
            .services
            .messaging
            .requeue_dead_letter(company_id, message_id)
            .await
    }
    .await;
    render(res, StatusCode::OK, result);
}

use salvo::prelude::*;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::FacebookSettings;
use crate::service::{CompanyUpdate, PageConnection, ServiceError};
use crate::web::{json_body, page_params, path_id, render, render_empty, render_error, web_state};

#[derive(Deserialize)]
struct RegisterRequest {
    name: String,
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

/// Page row as the API shows it: the token is replaced by a flag.
#[derive(Serialize)]
struct PageView<'a> {
    #[serde(flatten)]
    page: &'a FacebookSettings,
    has_access_token: bool,
}

impl<'a> From<&'a FacebookSettings> for PageView<'a> {
    fn from(page: &'a FacebookSettings) -> Self {
        Self {
            page,
            has_access_token: page.has_access_token(),
        }
    }
}

#[handler]
pub async fn register(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let body: RegisterRequest = json_body(req).await?;
        let password = SecretString::from(body.password);
        state
            .services
            .accounts
            .register(&body.name, &body.email, &password)
            .await
    }
    .await;
    render(res, StatusCode::CREATED, result);
}

#[handler]
pub async fn login(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let body: LoginRequest = json_body(req).await?;
        let password = SecretString::from(body.password);
        state.services.accounts.login(&body.email, &password).await
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn list_companies(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let (limit, offset) = page_params(req);
    let result = async {
        let accounts = &state.services.accounts;
        let companies = accounts.list_companies(limit, offset).await?;
        let total = accounts.count_companies().await?;
        Ok::<_, ServiceError>(json!({
            "count": companies.len(),
            "total": total,
            "companies": companies,
            "limit": limit,
            "offset": offset,
        }))
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn get_company(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let id = path_id(req, "id")?;
        state.services.accounts.get_company(id).await
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn update_company(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let id = path_id(req, "id")?;
        let update: CompanyUpdate = json_body(req).await?;
        state.services.accounts.update_company(id, &update).await
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn delete_company(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let id = path_id(req, "id")?;
        state.services.accounts.delete_company(id).await
    }
    .await;
    render_empty(res, result);
}

#[handler]
pub async fn list_pages(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let id = path_id(req, "id")?;
        let pages = state.services.accounts.list_pages(id).await?;
        let views: Vec<PageView<'_>> = pages.iter().map(PageView::from).collect();
        Ok::<_, ServiceError>(json!({ "pages": views }))
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn connect_page(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let id = path_id(req, "id")?;
        let connection: PageConnection = json_body(req).await?;
        state.services.accounts.connect_page(id, &connection).await
    }
    .await;

    match result {
        Ok((page, created)) => {
            if let Some(forwarder) = &state.forwarder {
                forwarder.forget_page(&page.page_id).await;
            }
            let status = if created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            render(res, status, Ok(json!(PageView::from(&page))));
        }
        Err(err) => render_error(res, &err),
    }
}

#[handler]
pub async fn disconnect_page(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let id = path_id(req, "id")?;
        let page_id = req
            .param::<String>("page_id")
            .ok_or_else(|| ServiceError::Invalid("missing page id".to_string()))?;
        state.services.accounts.disconnect_page(id, &page_id).await?;
        if let Some(forwarder) = &state.forwarder {
            forwarder.forget_page(&page_id).await;
        }
        Ok::<_, ServiceError>(())
    }
    .await;
    render_empty(res, result);
}

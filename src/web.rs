use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use salvo::prelude::*;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::forwarder::Forwarder;
use crate::service::{ServiceError, ServiceResult, Services, clamp_page};

mod catalog;
mod companies;
mod conversations;
mod health;
pub mod metrics;

use catalog::{
    create_category, create_coupon, create_product, delete_category, delete_coupon,
    delete_product, get_category, get_coupon, get_product, list_categories, list_coupons,
    list_products, update_category, update_coupon, update_product, validate_coupon,
};
use companies::{
    connect_page, delete_company, disconnect_page, get_company, list_companies, list_pages, login,
    register, update_company,
};
use conversations::{
    enqueue_message, get_conversation, ingest_inbound, list_conversations, list_dead_letters,
    list_messages, mark_read, requeue_message,
};
use health::{get_status, health_check};
use metrics::metrics_endpoint;

#[derive(Clone)]
pub struct WebState {
    pub services: Services,
    pub forwarder: Option<Arc<Forwarder>>,
    pub started_at: Instant,
}

/// Hoop that places the shared state in every request's depot.
struct InjectState(WebState);

#[handler]
impl InjectState {
    async fn handle(&self, depot: &mut Depot) {
        depot.inject(self.0.clone());
    }
}

pub fn web_state(depot: &Depot) -> &WebState {
    depot
        .obtain::<WebState>()
        .expect("web state is injected by the root router")
}

pub(crate) fn render_error(res: &mut Response, err: &ServiceError) {
    let status = match err {
        ServiceError::Invalid(_) => StatusCode::BAD_REQUEST,
        ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Conflict(_) => StatusCode::CONFLICT,
        ServiceError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("request failed: {}", err);
    }
    metrics::Metrics::api_error();
    res.status_code(status);
    res.render(Json(json!({ "error": err.to_string() })));
}

pub(crate) fn render<T>(res: &mut Response, status: StatusCode, result: ServiceResult<T>)
where
    T: Serialize + Send,
{
    match result {
        Ok(body) => {
            res.status_code(status);
            res.render(Json(body));
        }
        Err(err) => render_error(res, &err),
    }
}

pub(crate) fn render_empty(res: &mut Response, result: ServiceResult<()>) {
    match result {
        Ok(()) => {
            res.status_code(StatusCode::NO_CONTENT);
        }
        Err(err) => render_error(res, &err),
    }
}

pub(crate) fn path_id(req: &Request, name: &str) -> ServiceResult<i64> {
    req.param::<i64>(name)
        .filter(|id| *id > 0)
        .ok_or_else(|| ServiceError::Invalid(format!("invalid {name} in path")))
}

pub(crate) fn page_params(req: &Request) -> (i64, i64) {
    clamp_page(req.query::<i64>("limit"), req.query::<i64>("offset"))
}

pub(crate) async fn json_body<T>(req: &mut Request) -> ServiceResult<T>
where
    T: DeserializeOwned,
{
    req.parse_json::<T>()
        .await
        .map_err(|e| ServiceError::Invalid(format!("invalid request body: {e}")))
}

pub struct WebServer {
    config: ServerConfig,
    state: WebState,
}

impl WebServer {
    pub fn new(config: ServerConfig, services: Services, forwarder: Option<Arc<Forwarder>>) -> Self {
        Self {
            config,
            state: WebState {
                services,
                forwarder,
                started_at: Instant::now(),
            },
        }
    }

    pub async fn start(&self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        info!("starting web server on {}", bind_addr);

        let acceptor = TcpListener::new(bind_addr.clone())
            .try_bind()
            .await
            .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", bind_addr, e))?;
        Server::new(acceptor)
            .serve(root_router(self.state.clone()))
            .await;

        Ok(())
    }
}

fn company_router() -> Router {
    Router::with_path("{id}")
        .get(get_company)
        .put(update_company)
        .delete(delete_company)
        .push(
            Router::with_path("facebook-settings")
                .get(list_pages)
                .post(connect_page)
                .push(Router::with_path("{page_id}").delete(disconnect_page)),
        )
        .push(
            Router::with_path("conversations")
                .get(list_conversations)
                .push(
                    Router::with_path("{cid}")
                        .get(get_conversation)
                        .push(Router::with_path("read").post(mark_read))
                        .push(
                            Router::with_path("messages")
                                .get(list_messages)
                                .post(enqueue_message),
                        ),
                ),
        )
        .push(
            Router::with_path("messages")
                .push(Router::with_path("inbound").post(ingest_inbound))
                .push(Router::with_path("dead-letter").get(list_dead_letters))
                .push(Router::with_path("{mid}/requeue").post(requeue_message)),
        )
        .push(
            Router::with_path("products")
                .get(list_products)
                .post(create_product)
                .push(
                    Router::with_path("{pid}")
                        .get(get_product)
                        .put(update_product)
                        .delete(delete_product),
                ),
        )
        .push(
            Router::with_path("categories")
                .get(list_categories)
                .post(create_category)
                .push(
                    Router::with_path("{cid}")
                        .get(get_category)
                        .put(update_category)
                        .delete(delete_category),
                ),
        )
        .push(
            Router::with_path("coupons")
                .get(list_coupons)
                .post(create_coupon)
                .push(Router::with_path("validate").post(validate_coupon))
                .push(
                    Router::with_path("{cid}")
                        .get(get_coupon)
                        .put(update_coupon)
                        .delete(delete_coupon),
                ),
        )
}

pub fn root_router(state: WebState) -> Router {
    Router::new()
        .hoop(InjectState(state))
        .push(Router::with_path("metrics").get(metrics_endpoint))
        .push(
            Router::with_path("api")
                .push(Router::with_path("health").get(health_check))
                .push(Router::with_path("status").get(get_status))
                .push(
                    Router::with_path("companies")
                        .get(list_companies)
                        .push(Router::with_path("register").post(register))
                        .push(Router::with_path("login").post(login))
                        .push(company_router()),
                ),
        )
}

#[cfg(test)]
mod tests {
    use salvo::test::{ResponseExt, TestClient};
    use serde_json::Value;

    use super::*;
    use crate::db::test_manager;

    const BASE: &str = "http://127.0.0.1:5800";

    async fn service() -> (Service, tempfile::TempDir) {
        let (db, dir) = test_manager().await;
        let services = Services::new(Arc::new(db));
        let state = WebState {
            services,
            forwarder: None,
            started_at: Instant::now(),
        };
        (Service::new(root_router(state)), dir)
    }

    async fn register(service: &Service, email: &str) -> i64 {
        let mut res = TestClient::post(format!("{BASE}/api/companies/register"))
            .json(&json!({"name": "Swan Shop", "email": email, "password": "correct horse"}))
            .send(service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::CREATED));
        let body: Value = res.take_json().await.expect("json");
        body["id"].as_i64().expect("id")
    }

    #[tokio::test]
    async fn register_then_fetch_company() {
        let (service, _dir) = service().await;
        let id = register(&service, "Owner@Swan.Shop").await;

        let mut res = TestClient::get(format!("{BASE}/api/companies/{id}"))
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::OK));
        let body: Value = res.take_json().await.expect("json");
        assert_eq!(body["name"], "Swan Shop");
        assert_eq!(body["email"], "owner@swan.shop");
        assert!(body.get("password_hash").is_none());
    }

    #[tokio::test]
    async fn delete_then_fetch_is_404() {
        let (service, _dir) = service().await;
        let id = register(&service, "owner@swan.shop").await;

        let res = TestClient::delete(format!("{BASE}/api/companies/{id}"))
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::NO_CONTENT));

        let mut res = TestClient::get(format!("{BASE}/api/companies/{id}"))
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::NOT_FOUND));
        let body: Value = res.take_json().await.expect("json");
        assert!(body["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let (service, _dir) = service().await;
        register(&service, "owner@swan.shop").await;

        let res = TestClient::post(format!("{BASE}/api/companies/register"))
            .json(&json!({"name": "Again", "email": "owner@swan.shop", "password": "correct horse"}))
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::CONFLICT));

        let res = TestClient::post(format!("{BASE}/api/companies/login"))
            .json(&json!({"email": "owner@swan.shop", "password": "wrong horse"}))
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::UNAUTHORIZED));

        let res = TestClient::post(format!("{BASE}/api/companies/register"))
            .raw_json("{not json")
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn products_do_not_leak_between_companies() {
        let (service, _dir) = service().await;
        let a = register(&service, "a@swan.shop").await;
        let b = register(&service, "b@crow.shop").await;

        let mut res = TestClient::post(format!("{BASE}/api/companies/{a}/products"))
            .json(&json!({"name": "Blue dress", "price_cents": 2599, "stock": 3}))
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::CREATED));
        let product: Value = res.take_json().await.expect("json");
        let pid = product["id"].as_i64().expect("id");

        let mut res = TestClient::get(format!("{BASE}/api/companies/{b}/products"))
            .send(&service)
            .await;
        let listed: Value = res.take_json().await.expect("json");
        assert_eq!(listed["products"].as_array().map(Vec::len), Some(0));

        let res = TestClient::get(format!("{BASE}/api/companies/{b}/products/{pid}"))
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn category_and_coupon_lists_are_paged() {
        let (service, _dir) = service().await;
        let id = register(&service, "owner@swan.shop").await;

        for name in ["Bags", "Dresses", "Shoes"] {
            let res = TestClient::post(format!("{BASE}/api/companies/{id}/categories"))
                .json(&json!({"name": name}))
                .send(&service)
                .await;
            assert_eq!(res.status_code, Some(StatusCode::CREATED));
        }
        for code in ["AUTUMN", "SPRING", "SUMMER"] {
            let res = TestClient::post(format!("{BASE}/api/companies/{id}/coupons"))
                .json(&json!({"code": code, "discount_type": "fixed", "discount_value": 100}))
                .send(&service)
                .await;
            assert_eq!(res.status_code, Some(StatusCode::CREATED));
        }

        let mut res = TestClient::get(format!(
            "{BASE}/api/companies/{id}/categories?limit=1&offset=1"
        ))
        .send(&service)
        .await;
        let listed: Value = res.take_json().await.expect("json");
        assert_eq!(listed["count"], 1);
        assert_eq!(listed["limit"], 1);
        assert_eq!(listed["categories"][0]["name"], "Dresses");

        let mut res = TestClient::get(format!("{BASE}/api/companies/{id}/coupons?limit=2"))
            .send(&service)
            .await;
        let listed: Value = res.take_json().await.expect("json");
        assert_eq!(listed["coupons"].as_array().map(Vec::len), Some(2));
        assert_eq!(listed["offset"], 0);

        let mut res = TestClient::get(format!("{BASE}/api/companies?limit=1"))
            .send(&service)
            .await;
        let listed: Value = res.take_json().await.expect("json");
        assert_eq!(listed["count"], 1);
        assert_eq!(listed["total"], 1);
    }

    #[tokio::test]
    async fn coupon_quote_handles_large_orders() {
        let (service, _dir) = service().await;
        let id = register(&service, "owner@swan.shop").await;

        let res = TestClient::post(format!("{BASE}/api/companies/{id}/coupons"))
            .json(&json!({"code": "HALF", "discount_type": "percentage", "discount_value": 50}))
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::CREATED));

        let mut res = TestClient::post(format!("{BASE}/api/companies/{id}/coupons/validate"))
            .json(&json!({"code": "half", "order_cents": 200_000_000_000_000_000_i64}))
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::OK));
        let quote: Value = res.take_json().await.expect("json");
        assert_eq!(quote["discount_cents"], 100_000_000_000_000_000_i64);
        assert_eq!(quote["total_cents"], 100_000_000_000_000_000_i64);
    }

    #[tokio::test]
    async fn product_search_treats_wildcards_literally() {
        let (service, _dir) = service().await;
        let id = register(&service, "owner@swan.shop").await;

        for name in ["Blue dress", "50% off scarf"] {
            let res = TestClient::post(format!("{BASE}/api/companies/{id}/products"))
                .json(&json!({"name": name, "price_cents": 1000}))
                .send(&service)
                .await;
            assert_eq!(res.status_code, Some(StatusCode::CREATED));
        }

        let mut res = TestClient::get(format!("{BASE}/api/companies/{id}/products?search=%25"))
            .send(&service)
            .await;
        let listed: Value = res.take_json().await.expect("json");
        assert_eq!(listed["count"], 1);
        assert_eq!(listed["products"][0]["name"], "50% off scarf");

        let mut res = TestClient::get(format!("{BASE}/api/companies/{id}/products?search=_"))
            .send(&service)
            .await;
        let listed: Value = res.take_json().await.expect("json");
        assert_eq!(listed["count"], 0);
    }

    #[tokio::test]
    async fn inbound_flow_updates_unread_counter() {
        let (service, _dir) = service().await;
        let id = register(&service, "owner@swan.shop").await;

        let mut res = TestClient::post(format!("{BASE}/api/companies/{id}/facebook-settings"))
            .json(&json!({"page_id": "1001", "access_token": "EAAB-token"}))
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::CREATED));
        let page: Value = res.take_json().await.expect("json");
        assert_eq!(page["has_access_token"], true);
        assert!(page.get("access_token").is_none());

        let mut res = TestClient::post(format!("{BASE}/api/companies/{id}/messages/inbound"))
            .json(&json!({"page_id": "1001", "sender_id": "2002", "text": "hi", "external_id": "m.1"}))
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::CREATED));
        let outcome: Value = res.take_json().await.expect("json");
        let cid = outcome["conversation"]["id"].as_i64().expect("conversation id");
        assert_eq!(outcome["conversation"]["unread_messages"], 1);

        let res = TestClient::post(format!(
            "{BASE}/api/companies/{id}/conversations/{cid}/messages"
        ))
        .json(&json!({"text": "hello from the shop"}))
        .send(&service)
        .await;
        assert_eq!(res.status_code, Some(StatusCode::CREATED));

        let mut res = TestClient::post(format!("{BASE}/api/companies/{id}/conversations/{cid}/read"))
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::OK));
        let conversation: Value = res.take_json().await.expect("json");
        assert_eq!(conversation["unread_messages"], 0);
        assert_eq!(conversation["message_count"], 2);

        let mut res = TestClient::get(format!(
            "{BASE}/api/companies/{id}/conversations?unread_only=true"
        ))
        .send(&service)
        .await;
        let listed: Value = res.take_json().await.expect("json");
        assert_eq!(listed["conversations"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn health_reports_database() {
        let (service, _dir) = service().await;
        let mut res = TestClient::get(format!("{BASE}/api/health"))
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::OK));
        let body: Value = res.take_json().await.expect("json");
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "ok");

        let mut res = TestClient::get(format!("{BASE}/metrics")).send(&service).await;
        let text = res.take_string().await.expect("text");
        assert!(text.contains("shopdesk_forwarder_ticks_total"));
    }
}

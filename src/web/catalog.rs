use salvo::prelude::*;
use serde::Deserialize;
use serde_json::json;

use crate::db::{CategoryInput, CouponInput, ProductFilter, ProductInput};
use crate::service::ServiceError;
use crate::web::{json_body, page_params, path_id, render, render_empty, web_state};

#[derive(Deserialize)]
struct CouponCheck {
    code: String,
    order_cents: i64,
}

#[handler]
pub async fn list_products(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let (limit, offset) = page_params(req);
        let filter = ProductFilter {
            category_id: req.query::<i64>("category_id"),
            search: req
                .query::<String>("search")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            include_inactive: req.query::<bool>("include_inactive").unwrap_or(false),
            limit,
            offset,
        };
        let products = state
            .services
            .catalog
            .list_products(company_id, &filter)
            .await?;
        Ok::<_, ServiceError>(json!({
            "count": products.len(),
            "products": products,
            "limit": limit,
            "offset": offset,
        }))
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn create_product(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let input: ProductInput = json_body(req).await?;
        state.services.catalog.create_product(company_id, &input).await
    }
    .await;
    render(res, StatusCode::CREATED, result);
}

#[handler]
pub async fn get_product(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let product_id = path_id(req, "pid")?;
        state.services.catalog.get_product(company_id, product_id).await
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn update_product(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let product_id = path_id(req, "pid")?;
        let input: ProductInput = json_body(req).await?;
        state
            .services
            .catalog
            .update_product(company_id, product_id, &input)
            .await
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn delete_product(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let product_id = path_id(req, "pid")?;
        state.services.catalog.delete_product(company_id, product_id).await
    }
    .await;
    render_empty(res, result);
}

#[handler]
pub async fn list_categories(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let (limit, offset) = page_params(req);
        let categories = state
            .services
            .catalog
            .list_categories(company_id, limit, offset)
            .await?;
        Ok::<_, ServiceError>(json!({
            "count": categories.len(),
            "categories": categories,
            "limit": limit,
            "offset": offset,
        }))
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn create_category(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let input: CategoryInput = json_body(req).await?;
        state.services.catalog.create_category(company_id, &input).await
    }
    .await;
    render(res, StatusCode::CREATED, result);
}

#[handler]
pub async fn get_category(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let category_id = path_id(req, "cid")?;
        state.services.catalog.get_category(company_id, category_id).await
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn update_category(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let category_id = path_id(req, "cid")?;
        let input: CategoryInput = json_body(req).await?;
        state
            .services
            .catalog
            .update_category(company_id, category_id, &input)
            .await
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn delete_category(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let category_id = path_id(req, "cid")?;
        state
            .services
            .catalog
            .delete_category(company_id, category_id)
            .await
    }
    .await;
    render_empty(res, result);
}

#[handler]
pub async fn list_coupons(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let (limit, offset) = page_params(req);
        let coupons = state
            .services
            .catalog
            .list_coupons(company_id, limit, offset)
            .await?;
        Ok::<_, ServiceError>(json!({
            "count": coupons.len(),
            "coupons": coupons,
            "limit": limit,
            "offset": offset,
        }))
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn create_coupon(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let input: CouponInput = json_body(req).await?;
        state.services.catalog.create_coupon(company_id, &input).await
    }
    .await;
    render(res, StatusCode::CREATED, result);
}

#[handler]
pub async fn get_coupon(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let coupon_id = path_id(req, "cid")?;
        state.services.catalog.get_coupon(company_id, coupon_id).await
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn update_coupon(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let coupon_id = path_id(req, "cid")?;
        let input: CouponInput = json_body(req).await?;
        state
            .services
            .catalog
            .update_coupon(company_id, coupon_id, &input)
            .await
    }
    .await;
    render(res, StatusCode::OK, result);
}

#[handler]
pub async fn delete_coupon(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let coupon_id = path_id(req, "cid")?;
        state.services.catalog.delete_coupon(company_id, coupon_id).await
    }
    .await;
    render_empty(res, result);
}

#[handler]
pub async fn validate_coupon(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let result = async {
        let company_id = path_id(req, "id")?;
        let check: CouponCheck = json_body(req).await?;
        state
            .services
            .catalog
            .validate_coupon(company_id, &check.code, check.order_cents)
            .await
    }
    .await;
    render(res, StatusCode::OK, result);
}

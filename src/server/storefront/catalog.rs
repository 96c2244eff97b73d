use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Serialize;

use crate::auth::OptionalUser;
use crate::server::AppState;
use crate::server::dto::{CurrencyParams, ProductDetailView, ProductListParams, ProductView};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreOptionExt, StoreResultExt,
    paginate,
};
use crate::store::ProductFilter;
use crate::types::{Brand, Category, ProductStatus, User};

use super::resolve_prices;

#[derive(Debug, Serialize)]
pub struct CategoryView {
    #[serde(flatten)]
    pub category: Category,
    pub children: Vec<Category>,
}

fn is_catalog_staff(user: Option<&User>) -> bool {
    user.is_some_and(|u| u.role.can_manage_catalog())
}

pub async fn list_products(
    OptionalUser(user): OptionalUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProductListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let prices = resolve_prices(&state, params.currency.as_deref(), user.as_ref())?;

    let category_id = match params.category.as_deref() {
        Some(slug) => Some(
            state
                .store
                .get_category_by_slug(slug)
                .api_err("Category")?
                .or_not_found("Category not found")?
                .id,
        ),
        None => None,
    };
    let brand_id = match params.brand.as_deref() {
        Some(slug) => Some(
            state
                .store
                .get_brand_by_slug(slug)
                .api_err("Brand")?
                .or_not_found("Brand not found")?
                .id,
        ),
        None => None,
    };

    // Shoppers only ever see what is on sale.
    let status = if is_catalog_staff(user.as_ref()) {
        params.status
    } else {
        Some(ProductStatus::Active)
    };

    let filter = ProductFilter {
        category_id,
        brand_id,
        search: params.search.filter(|s| !s.trim().is_empty()),
        featured: params.featured,
        status,
    };

    let cursor = params.cursor.as_deref().unwrap_or("");
    let products = state
        .store
        .list_products(&filter, cursor, DEFAULT_PAGE_SIZE + 1)
        .api_err("Product")?;

    let (products, next_cursor, has_more) =
        paginate(products, DEFAULT_PAGE_SIZE as usize, |p| p.id.clone());

    let mut views = Vec::with_capacity(products.len());
    for product in products {
        if let Some(summary) = state
            .store
            .get_product_summary(&product.id)
            .api_err("Product")?
        {
            views.push(ProductView::new(summary, prices));
        }
    }

    Ok(Json(PaginatedResponse::new(views, next_cursor, has_more)))
}

pub async fn get_product(
    OptionalUser(user): OptionalUser,
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Query(params): Query<CurrencyParams>,
) -> Result<impl IntoResponse, ApiError> {
    let prices = resolve_prices(&state, params.currency.as_deref(), user.as_ref())?;

    let product = state
        .store
        .get_product_by_slug(&slug)
        .api_err("Product")?
        .filter(|p| p.status == ProductStatus::Active || is_catalog_staff(user.as_ref()))
        .or_not_found("Product not found")?;

    let detail = state
        .store
        .get_product_detail(&product.id)
        .api_err("Product")?
        .or_not_found("Product not found")?;

    Ok(Json(ApiResponse::success(ProductDetailView::new(
        detail, prices,
    ))))
}

pub async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let categories = state.store.list_categories(false).api_err("Category")?;
    Ok(Json(ApiResponse::success(categories)))
}

pub async fn get_category(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let category = state
        .store
        .get_category_by_slug(&slug)
        .api_err("Category")?
        .filter(|c| c.is_active)
        .or_not_found("Category not found")?;

    let children: Vec<Category> = state
        .store
        .list_categories(false)
        .api_err("Category")?
        .into_iter()
        .filter(|c| c.parent_id.as_deref() == Some(category.id.as_str()))
        .collect();

    Ok(Json(ApiResponse::success(CategoryView { category, children })))
}

pub async fn list_brands(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let brands = state.store.list_brands(false).api_err("Brand")?;
    Ok(Json(ApiResponse::success(brands)))
}

pub async fn get_brand(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<ApiResponse<Brand>>, ApiError> {
    let brand = state
        .store
        .get_brand_by_slug(&slug)
        .api_err("Brand")?
        .filter(|b| b.is_active)
        .or_not_found("Brand not found")?;

    Ok(Json(ApiResponse::success(brand)))
}

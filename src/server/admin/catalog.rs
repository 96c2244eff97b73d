use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::RequireCatalogManager;
use crate::error::Error as StoreError;
use crate::server::AppState;
use crate::server::dto::{
    AddImageRequest, AdminProductParams, CreateBrandRequest, CreateCategoryRequest,
    CreateProductRequest, CreateVariantRequest, MoveCategoryRequest, SetInventoryRequest,
    SetSpecificationsRequest, UpdateBrandRequest, UpdateCategoryRequest, UpdateProductRequest,
};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreOptionExt, StoreResultExt,
    paginate,
};
use crate::server::validation::{validate_name, validate_price, validate_slug};
use crate::store::ProductFilter;
use crate::types::{
    Brand, Category, Inventory, Product, ProductImage, Specification, Variant,
};

fn duplicate(err: StoreError, message: &'static str) -> ApiError {
    match err {
        StoreError::AlreadyExists(_) => ApiError::conflict(message),
        other => ApiError::from(other),
    }
}

fn in_use(err: StoreError, message: &'static str) -> ApiError {
    match err {
        StoreError::Referenced(_) => ApiError::conflict(message),
        other => ApiError::from(other),
    }
}

fn load_product(state: &AppState, id: &str) -> Result<Product, ApiError> {
    state
        .store
        .get_product(id)
        .api_err("Product")?
        .or_not_found("Product not found")
}

fn ensure_brand_and_category(
    state: &AppState,
    brand_id: &str,
    category_id: &str,
) -> Result<(), ApiError> {
    state
        .store
        .get_brand(brand_id)
        .api_err("Brand")?
        .ok_or_else(|| ApiError::bad_request("Brand does not exist"))?;
    state
        .store
        .get_category(category_id)
        .api_err("Category")?
        .ok_or_else(|| ApiError::bad_request("Category does not exist"))?;
    Ok(())
}

// Brands

pub async fn list_brands(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let brands = state.store.list_brands(true).api_err("Brand")?;
    Ok(Json(ApiResponse::success(brands)))
}

pub async fn create_brand(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateBrandRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_slug(&req.slug, "Brand")?;
    let now = Utc::now();
    let brand = Brand {
        id: Uuid::new_v4().to_string(),
        name: validate_name(&req.name, "Brand")?,
        slug: req.slug,
        description: req.description,
        logo_url: req.logo_url,
        is_active: req.is_active,
        created_at: now,
        updated_at: now,
    };

    state
        .store
        .create_brand(&brand)
        .map_err(|e| duplicate(e, "A brand with this slug already exists"))?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(brand))))
}

pub async fn update_brand(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateBrandRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut brand = state
        .store
        .get_brand(&id)
        .api_err("Brand")?
        .or_not_found("Brand not found")?;

    if let Some(name) = req.name {
        brand.name = validate_name(&name, "Brand")?;
    }
    if let Some(slug) = req.slug {
        validate_slug(&slug, "Brand")?;
        brand.slug = slug;
    }
    if req.description.is_some() {
        brand.description = req.description;
    }
    if req.logo_url.is_some() {
        brand.logo_url = req.logo_url;
    }
    if let Some(active) = req.is_active {
        brand.is_active = active;
    }
    brand.updated_at = Utc::now();

    state
        .store
        .update_brand(&brand)
        .map_err(|e| duplicate(e, "A brand with this slug already exists"))?;
    Ok(Json(ApiResponse::success(brand)))
}

pub async fn delete_brand(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .store
        .delete_brand(&id)
        .map_err(|e| in_use(e, "Brand still has products"))?;
    if !deleted {
        return Err(ApiError::not_found("Brand not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// Categories

pub async fn list_categories(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let categories = state.store.list_categories(true).api_err("Category")?;
    Ok(Json(ApiResponse::success(categories)))
}

pub async fn create_category(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCategoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_slug(&req.slug, "Category")?;

    let (level, path) = match req.parent_id.as_deref() {
        Some(parent_id) => state
            .store
            .get_category(parent_id)
            .api_err("Category")?
            .ok_or_else(|| ApiError::bad_request("Parent category does not exist"))?
            .child_position(),
        None => (0, Vec::new()),
    };

    let now = Utc::now();
    let category = Category {
        id: Uuid::new_v4().to_string(),
        name: validate_name(&req.name, "Category")?,
        slug: req.slug,
        parent_id: req.parent_id,
        level,
        path,
        description: req.description,
        sort_order: req.sort_order,
        is_active: req.is_active,
        created_at: now,
        updated_at: now,
    };

    state
        .store
        .create_category(&category)
        .map_err(|e| duplicate(e, "A category with this slug already exists"))?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(category))))
}

pub async fn update_category(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateCategoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut category = state
        .store
        .get_category(&id)
        .api_err("Category")?
        .or_not_found("Category not found")?;

    if let Some(name) = req.name {
        category.name = validate_name(&name, "Category")?;
    }
    if let Some(slug) = req.slug {
        validate_slug(&slug, "Category")?;
        category.slug = slug;
    }
    if req.description.is_some() {
        category.description = req.description;
    }
    if let Some(sort_order) = req.sort_order {
        category.sort_order = sort_order;
    }
    if let Some(active) = req.is_active {
        category.is_active = active;
    }
    category.updated_at = Utc::now();

    state
        .store
        .update_category(&category)
        .map_err(|e| duplicate(e, "A category with this slug already exists"))?;
    Ok(Json(ApiResponse::success(category)))
}

/// Re-parents a category; the subtree follows.
pub async fn move_category(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<MoveCategoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let category = state
        .store
        .move_category(&id, req.parent_id.as_deref())
        .api_err("Category")?;

    tracing::info!(
        category_id = %category.id,
        level = category.level,
        "Category moved"
    );
    Ok(Json(ApiResponse::success(category)))
}

pub async fn delete_category(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .store
        .delete_category(&id)
        .map_err(|e| in_use(e, "Category still has products or subcategories"))?;
    if !deleted {
        return Err(ApiError::not_found("Category not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// Products

pub async fn list_products(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
    Query(params): Query<AdminProductParams>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = ProductFilter {
        status: params.status,
        search: params.search.filter(|s| !s.trim().is_empty()),
        ..ProductFilter::default()
    };
    let cursor = params.cursor.as_deref().unwrap_or("");

    let products = state
        .store
        .list_products(&filter, cursor, DEFAULT_PAGE_SIZE + 1)
        .api_err("Product")?;

    let (products, next_cursor, has_more) =
        paginate(products, DEFAULT_PAGE_SIZE as usize, |p| p.id.clone());

    Ok(Json(PaginatedResponse::new(products, next_cursor, has_more)))
}

pub async fn create_product(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProductRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_slug(&req.slug, "Product")?;
    validate_price(req.price, "Price")?;
    if let Some(compare_at) = req.compare_at_price {
        validate_price(compare_at, "Compare-at price")?;
    }
    let sku = req.sku.trim().to_string();
    if sku.is_empty() {
        return Err(ApiError::bad_request("SKU cannot be empty"));
    }
    ensure_brand_and_category(&state, &req.brand_id, &req.category_id)?;

    let now = Utc::now();
    let product = Product {
        id: Uuid::new_v4().to_string(),
        brand_id: req.brand_id,
        category_id: req.category_id,
        name: validate_name(&req.name, "Product")?,
        slug: req.slug,
        sku,
        description: req.description,
        price: req.price,
        compare_at_price: req.compare_at_price,
        status: req.status,
        is_featured: req.is_featured,
        created_at: now,
        updated_at: now,
    };

    state
        .store
        .create_product(&product)
        .map_err(|e| duplicate(e, "A product with this SKU or slug already exists"))?;

    tracing::info!(product_id = %product.id, sku = %product.sku, "Product created");
    Ok((StatusCode::CREATED, Json(ApiResponse::success(product))))
}

pub async fn get_product(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state
        .store
        .get_product_detail(&id)
        .api_err("Product")?
        .or_not_found("Product not found")?;
    Ok(Json(ApiResponse::success(detail)))
}

pub async fn update_product(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateProductRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut product = load_product(&state, &id)?;

    if let Some(brand_id) = req.brand_id {
        product.brand_id = brand_id;
    }
    if let Some(category_id) = req.category_id {
        product.category_id = category_id;
    }
    ensure_brand_and_category(&state, &product.brand_id, &product.category_id)?;

    if let Some(name) = req.name {
        product.name = validate_name(&name, "Product")?;
    }
    if let Some(slug) = req.slug {
        validate_slug(&slug, "Product")?;
        product.slug = slug;
    }
    if let Some(sku) = req.sku {
        let sku = sku.trim().to_string();
        if sku.is_empty() {
            return Err(ApiError::bad_request("SKU cannot be empty"));
        }
        product.sku = sku;
    }
    if req.description.is_some() {
        product.description = req.description;
    }
    if let Some(price) = req.price {
        validate_price(price, "Price")?;
        product.price = price;
    }
    if let Some(compare_at) = req.compare_at_price {
        validate_price(compare_at, "Compare-at price")?;
        product.compare_at_price = Some(compare_at);
    }
    if let Some(status) = req.status {
        product.status = status;
    }
    if let Some(featured) = req.is_featured {
        product.is_featured = featured;
    }
    product.updated_at = Utc::now();

    state
        .store
        .update_product(&product)
        .map_err(|e| duplicate(e, "A product with this SKU or slug already exists"))?;
    Ok(Json(ApiResponse::success(product)))
}

/// Removes a product. Past orders keep their item snapshots.
pub async fn delete_product(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.store.delete_product(&id).api_err("Product")? {
        return Err(ApiError::not_found("Product not found"));
    }
    tracing::info!(product_id = %id, "Product deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_image(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AddImageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let product = load_product(&state, &id)?;
    if req.url.trim().is_empty() {
        return Err(ApiError::bad_request("Image URL cannot be empty"));
    }

    let image = ProductImage {
        id: Uuid::new_v4().to_string(),
        product_id: product.id,
        url: req.url.trim().to_string(),
        alt_text: req.alt_text,
        position: req.position,
    };
    state.store.add_product_image(&image).api_err("Image")?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(image))))
}

pub async fn delete_image(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
    Path((id, image_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    if !state
        .store
        .delete_product_image(&id, &image_id)
        .api_err("Image")?
    {
        return Err(ApiError::not_found("Image not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Replaces the whole specification list, keeping request order.
pub async fn set_specifications(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SetSpecificationsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let product = load_product(&state, &id)?;

    let mut specs = Vec::with_capacity(req.specifications.len());
    for (position, input) in req.specifications.into_iter().enumerate() {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(ApiError::bad_request("Specification name cannot be empty"));
        }
        specs.push(Specification {
            id: Uuid::new_v4().to_string(),
            product_id: product.id.clone(),
            name,
            value: input.value,
            position: i32::try_from(position).unwrap_or(i32::MAX),
        });
    }

    state
        .store
        .set_product_specifications(&product.id, &specs)
        .api_err("Specification")?;
    Ok(Json(ApiResponse::success(specs)))
}

pub async fn create_variant(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CreateVariantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let product = load_product(&state, &id)?;
    if let Some(price) = req.price {
        validate_price(price, "Variant price")?;
    }
    let sku = req.sku.trim().to_string();
    if sku.is_empty() {
        return Err(ApiError::bad_request("SKU cannot be empty"));
    }

    let variant = Variant {
        id: Uuid::new_v4().to_string(),
        product_id: product.id,
        sku,
        name: validate_name(&req.name, "Variant")?,
        price: req.price,
        options: req.options,
        created_at: Utc::now(),
    };
    state
        .store
        .create_variant(&variant)
        .map_err(|e| duplicate(e, "A variant with this SKU already exists"))?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(variant))))
}

pub async fn delete_variant(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
    Path((id, variant_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_variant(&variant_id)
        .api_err("Variant")?
        .filter(|v| v.product_id == id)
        .or_not_found("Variant not found")?;
    state.store.delete_variant(&variant_id).api_err("Variant")?;
    Ok(StatusCode::NO_CONTENT)
}

/// Sets on-hand stock for the product or one of its variants.
pub async fn set_inventory(
    RequireCatalogManager(manager): RequireCatalogManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SetInventoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let product = load_product(&state, &id)?;
    if req.quantity < 0 {
        return Err(ApiError::bad_request("Quantity cannot be negative"));
    }
    if req.low_stock_threshold < 0 {
        return Err(ApiError::bad_request("Low stock threshold cannot be negative"));
    }
    if let Some(variant_id) = req.variant_id.as_deref() {
        state
            .store
            .get_variant(variant_id)
            .api_err("Variant")?
            .filter(|v| v.product_id == product.id)
            .or_not_found("Variant not found")?;
    }

    let inventory = state
        .store
        .upsert_inventory(&Inventory {
            id: Uuid::new_v4().to_string(),
            product_id: product.id,
            variant_id: req.variant_id,
            quantity: req.quantity,
            reserved: 0,
            policy: req.policy,
            low_stock_threshold: req.low_stock_threshold,
            updated_at: Utc::now(),
        })
        .api_err("Inventory")?;

    tracing::info!(
        user_id = %manager.id,
        product_id = %inventory.product_id,
        quantity = inventory.quantity,
        reserved = inventory.reserved,
        "Inventory updated"
    );
    Ok(Json(ApiResponse::success(inventory)))
}

pub async fn list_low_stock(
    _manager: RequireCatalogManager,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let inventory = state.store.list_low_stock().api_err("Inventory")?;
    Ok(Json(ApiResponse::success(inventory)))
}

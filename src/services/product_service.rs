use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::products::{
        AddReviewRequest, CreateProductRequest, ProductDetail, ProductList, UpdateProductRequest,
    },
    entity::{
        product_reviews::{
            ActiveModel as ReviewActive, Column as ReviewCol, Entity as ProductReviews,
            Model as ReviewModel,
        },
        products::{ActiveModel as ProductActive, Column, Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{self, Category, Product, Review},
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
    state::AppState,
};

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all().add(Column::IsActive.eq(true));

    if let Some(category) = query.category {
        condition = condition.add(Column::Category.eq(category.as_str()));
    }

    if query.featured.unwrap_or(false) {
        condition = condition.add(Column::IsFeatured.eq(true));
    }

    if let Some(search) = query.q.as_ref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        condition = condition.add(
            Condition::any()
                .add(Expr::col(Column::Name).ilike(pattern.clone()))
                .add(Expr::col(Column::Description).ilike(pattern)),
        );
    }

    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::Price.gte(min_price));
    }

    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::Price.lte(max_price));
    }

    let sort_by = query.sort_by.unwrap_or(ProductSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let sort_col = match sort_by {
        ProductSortBy::CreatedAt => Column::CreatedAt,
        ProductSortBy::Price => Column::Price,
        ProductSortBy::Name => Column::Name,
        ProductSortBy::Rating => Column::RatingAverage,
    };

    let mut finder = Products::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(product_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Products",
        ProductList { items },
        Some(meta),
    ))
}

/// Top active featured products, best rated first.
pub async fn featured_products(state: &AppState) -> AppResult<ApiResponse<ProductList>> {
    let items = Products::find()
        .filter(Column::IsActive.eq(true))
        .filter(Column::IsFeatured.eq(true))
        .order_by_desc(Column::RatingAverage)
        .limit(8)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(product_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "Featured products",
        ProductList { items },
        Some(Meta::empty()),
    ))
}

pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<ProductDetail>> {
    let product = Products::find_by_id(id)
        .filter(Column::IsActive.eq(true))
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;

    let reviews = ProductReviews::find()
        .filter(ReviewCol::ProductId.eq(product.id))
        .order_by_desc(ReviewCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(review_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "Product",
        ProductDetail {
            product: product_from_entity(product),
            reviews,
        },
        None,
    ))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    validate_price_and_stock(payload.price, payload.stock)?;
    if payload.images.is_empty() {
        return Err(AppError::BadRequest(
            "At least one product image is required".into(),
        ));
    }
    let discount_percentage = payload.discount_percentage.unwrap_or(0);
    if !(0..=100).contains(&discount_percentage) {
        return Err(AppError::BadRequest(
            "Discount percentage must be between 0 and 100".into(),
        ));
    }

    if let Some(sku) = payload.sku.as_ref() {
        let taken = Products::find()
            .filter(Column::Sku.eq(sku.as_str()))
            .one(&state.orm)
            .await?
            .is_some();
        if taken {
            return Err(AppError::BadRequest(
                "Product with this SKU already exists".into(),
            ));
        }
    }

    let active = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set(payload.name),
        description: Set(Some(payload.description)),
        price: Set(payload.price),
        category: Set(payload.category.as_str().to_string()),
        stock: Set(payload.stock),
        images: Set(serde_json::json!(payload.images)),
        sku: Set(payload.sku),
        discount_percentage: Set(discount_percentage),
        discount_valid_until: Set(payload.discount_valid_until.map(Into::into)),
        rating_average: Set(0.0),
        rating_count: Set(0),
        is_active: Set(true),
        is_featured: Set(payload.is_featured),
        created_at: NotSet,
        updated_at: NotSet,
    };
    let product = active.insert(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "product_create",
        Some("products"),
        Some(serde_json::json!({ "product_id": product.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Product created",
        product_from_entity(product),
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;

    let existing = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;

    let mut active: ProductActive = existing.into();
    if let Some(name) = payload.name {
        active.name = Set(name);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(price) = payload.price {
        if price < 0 {
            return Err(AppError::BadRequest("Price cannot be negative".into()));
        }
        active.price = Set(price);
    }
    if let Some(category) = payload.category {
        active.category = Set(category.as_str().to_string());
    }
    if let Some(stock) = payload.stock {
        if stock < 0 {
            return Err(AppError::BadRequest("Stock cannot be negative".into()));
        }
        active.stock = Set(stock);
    }
    if let Some(images) = payload.images {
        if images.is_empty() {
            return Err(AppError::BadRequest(
                "At least one product image is required".into(),
            ));
        }
        active.images = Set(serde_json::json!(images));
    }
    if let Some(pct) = payload.discount_percentage {
        if !(0..=100).contains(&pct) {
            return Err(AppError::BadRequest(
                "Discount percentage must be between 0 and 100".into(),
            ));
        }
        active.discount_percentage = Set(pct);
    }
    if let Some(valid_until) = payload.discount_valid_until {
        active.discount_valid_until = Set(Some(valid_until.into()));
    }
    if let Some(is_featured) = payload.is_featured {
        active.is_featured = Set(is_featured);
    }
    active.updated_at = Set(Utc::now().into());

    let product = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "product_update",
        Some("products"),
        Some(serde_json::json!({ "product_id": product.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Product updated",
        product_from_entity(product),
        Some(Meta::empty()),
    ))
}

/// Products are never hard-deleted; deactivation hides them from the
/// catalog while order history keeps pointing at the row.
pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;

    let existing = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;

    let mut active: ProductActive = existing.into();
    active.is_active = Set(false);
    active.updated_at = Set(Utc::now().into());
    active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "product_delete",
        Some("products"),
        Some(serde_json::json!({ "product_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Product deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn add_review(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    payload: AddReviewRequest,
) -> AppResult<ApiResponse<Review>> {
    if !(1..=5).contains(&payload.rating) {
        return Err(AppError::BadRequest("Rating must be between 1 and 5".into()));
    }

    let txn = state.orm.begin().await?;

    let product = Products::find_by_id(product_id)
        .filter(Column::IsActive.eq(true))
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;

    let already_reviewed = ProductReviews::find()
        .filter(ReviewCol::ProductId.eq(product_id))
        .filter(ReviewCol::UserId.eq(user.user_id))
        .one(&txn)
        .await?
        .is_some();
    if already_reviewed {
        return Err(AppError::BadRequest(
            "You have already reviewed this product".into(),
        ));
    }

    let review = ReviewActive {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        user_id: Set(user.user_id),
        rating: Set(payload.rating),
        comment: Set(payload.comment),
        created_at: NotSet,
    }
    .insert(&txn)
    .await?;

    // Rolling average: fold the new rating into the stored aggregate.
    let new_count = product.rating_count + 1;
    let new_average = (product.rating_average * f64::from(product.rating_count)
        + f64::from(payload.rating))
        / f64::from(new_count);

    let mut active: ProductActive = product.into();
    active.rating_average = Set(new_average);
    active.rating_count = Set(new_count);
    active.updated_at = Set(Utc::now().into());
    active.update(&txn).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "review_add",
        Some("product_reviews"),
        Some(serde_json::json!({ "product_id": product_id, "rating": payload.rating })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Review added",
        review_from_entity(review),
        Some(Meta::empty()),
    ))
}

fn validate_price_and_stock(price: i64, stock: i32) -> Result<(), AppError> {
    if price < 0 {
        return Err(AppError::BadRequest("Price cannot be negative".into()));
    }
    if stock < 0 {
        return Err(AppError::BadRequest("Stock cannot be negative".into()));
    }
    Ok(())
}

pub(crate) fn product_from_entity(model: ProductModel) -> Product {
    let images = model
        .images
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Product {
        id: model.id,
        discounted_price: models::discounted_price(model.price, model.discount_percentage),
        name: model.name,
        description: model.description,
        price: model.price,
        category: Category::parse(&model.category),
        stock: model.stock,
        images,
        sku: model.sku,
        discount_percentage: model.discount_percentage,
        discount_valid_until: model.discount_valid_until.map(|dt| dt.with_timezone(&Utc)),
        rating_average: model.rating_average,
        rating_count: model.rating_count,
        is_active: model.is_active,
        is_featured: model.is_featured,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn review_from_entity(model: ReviewModel) -> Review {
    Review {
        id: model.id,
        user_id: model.user_id,
        rating: model.rating,
        comment: model.comment,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

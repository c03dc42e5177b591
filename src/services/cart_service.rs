use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, FromQueryResult, JoinType,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set,
};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::cart::{AddCartItemRequest, ApplyCouponRequest, CartDto, CartItemDto, UpdateCartItemRequest},
    entity::{
        cart_items::{self, ActiveModel as CartItemActive, Column as CartItemCol, Entity as CartItems},
        carts::{self, ActiveModel as CartActive, Column as CartCol, Entity as Carts},
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Coupon, CouponKind},
    pricing::{self, PricedLine},
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Cart line joined with the catalog fields the storefront renders.
#[derive(Debug, FromQueryResult)]
struct CartLineRow {
    product_id: Uuid,
    quantity: i32,
    price: i64,
    added_at: sea_orm::prelude::DateTimeWithTimeZone,
    name: String,
    images: Value,
    stock: i32,
    is_active: bool,
}

pub async fn get_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartDto>> {
    let cart = get_or_create_cart(&state.orm, user.user_id).await?;
    let dto = load_cart_dto(&state.orm, &cart).await?;
    Ok(ApiResponse::success("OK", dto, Some(Meta::empty())))
}

pub async fn cart_summary(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartDto>> {
    let cart = get_or_create_cart(&state.orm, user.user_id).await?;
    let dto = load_cart_dto(&state.orm, &cart).await?;
    if dto.items.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }
    Ok(ApiResponse::success("OK", dto, Some(Meta::empty())))
}

pub async fn add_item(
    state: &AppState,
    user: &AuthUser,
    payload: AddCartItemRequest,
) -> AppResult<ApiResponse<CartDto>> {
    if payload.quantity < 1 {
        return Err(AppError::BadRequest("Quantity must be at least 1".into()));
    }

    let product = Products::find_by_id(payload.product_id)
        .filter(ProdCol::IsActive.eq(true))
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;

    if product.stock < payload.quantity {
        return Err(AppError::BadRequest("Insufficient stock".into()));
    }

    let cart = get_or_create_cart(&state.orm, user.user_id).await?;

    let existing = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .filter(CartItemCol::ProductId.eq(payload.product_id))
        .one(&state.orm)
        .await?;

    match existing {
        Some(item) => {
            // Merge into the existing line and refresh the price snapshot
            // so a stale add-time price does not persist.
            let mut active: CartItemActive = item.into();
            let quantity = active.quantity.take().unwrap_or(0) + payload.quantity;
            active.quantity = Set(quantity);
            active.price = Set(product.price);
            active.update(&state.orm).await?;
        }
        None => {
            CartItemActive {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(payload.product_id),
                quantity: Set(payload.quantity),
                price: Set(product.price),
                added_at: NotSet,
            }
            .insert(&state.orm)
            .await?;
        }
    }

    let cart = touch_cart(&state.orm, cart).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_add",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": payload.product_id, "quantity": payload.quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let dto = load_cart_dto(&state.orm, &cart).await?;
    Ok(ApiResponse::success("Item added to cart", dto, Some(Meta::empty())))
}

pub async fn update_item(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<CartDto>> {
    if payload.quantity < 0 {
        return Err(AppError::BadRequest("Quantity must be 0 or greater".into()));
    }

    let cart = find_cart(&state.orm, user.user_id).await?;

    let item = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .filter(CartItemCol::ProductId.eq(product_id))
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::NotFound("Item not found in cart".into()))?;

    // Re-check the catalog only when the quantity grows.
    if payload.quantity > item.quantity {
        let product = Products::find_by_id(product_id).one(&state.orm).await?;
        let in_stock = product.map(|p| p.stock >= payload.quantity).unwrap_or(false);
        if !in_stock {
            return Err(AppError::BadRequest("Insufficient stock".into()));
        }
    }

    if payload.quantity == 0 {
        // Quantity zero removes the line item; zero-quantity rows are never stored.
        CartItems::delete_by_id(item.id).exec(&state.orm).await?;
    } else {
        let mut active: CartItemActive = item.into();
        active.quantity = Set(payload.quantity);
        active.update(&state.orm).await?;
    }

    let cart = touch_cart(&state.orm, cart).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_update",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": product_id, "quantity": payload.quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let dto = load_cart_dto(&state.orm, &cart).await?;
    Ok(ApiResponse::success("Cart updated", dto, Some(Meta::empty())))
}

pub async fn remove_item(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<CartDto>> {
    let cart = find_cart(&state.orm, user.user_id).await?;

    // Removing an absent item is a no-op, not an error.
    CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart.id))
        .filter(CartItemCol::ProductId.eq(product_id))
        .exec(&state.orm)
        .await?;

    let cart = touch_cart(&state.orm, cart).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_remove",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": product_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let dto = load_cart_dto(&state.orm, &cart).await?;
    Ok(ApiResponse::success("Item removed from cart", dto, Some(Meta::empty())))
}

pub async fn clear_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartDto>> {
    let cart = find_cart(&state.orm, user.user_id).await?;

    CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart.id))
        .exec(&state.orm)
        .await?;

    let cart = clear_coupon_and_touch(&state.orm, cart).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_clear",
        Some("carts"),
        Some(serde_json::json!({ "cart_id": cart.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let dto = load_cart_dto(&state.orm, &cart).await?;
    Ok(ApiResponse::success("Cart cleared", dto, Some(Meta::empty())))
}

pub async fn apply_coupon(
    state: &AppState,
    user: &AuthUser,
    payload: ApplyCouponRequest,
) -> AppResult<ApiResponse<CartDto>> {
    if payload.code.trim().is_empty() {
        return Err(AppError::BadRequest("Coupon code is required".into()));
    }
    if payload.discount < 0 {
        return Err(AppError::BadRequest("Discount cannot be negative".into()));
    }
    if payload.kind == CouponKind::Percentage && payload.discount > 100 {
        return Err(AppError::BadRequest(
            "Percentage discount cannot exceed 100".into(),
        ));
    }

    let cart = find_cart(&state.orm, user.user_id).await?;

    let has_items = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .one(&state.orm)
        .await?
        .is_some();
    if !has_items {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    // A new coupon always replaces the previous one; coupons never stack.
    let mut active: CartActive = cart.into();
    active.coupon_code = Set(Some(payload.code.clone()));
    active.coupon_discount = Set(Some(payload.discount));
    active.coupon_type = Set(Some(payload.kind.as_str().to_string()));
    active.updated_at = Set(Utc::now().into());
    let cart = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "coupon_apply",
        Some("carts"),
        Some(serde_json::json!({ "code": payload.code })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let dto = load_cart_dto(&state.orm, &cart).await?;
    Ok(ApiResponse::success("Coupon applied", dto, Some(Meta::empty())))
}

pub async fn remove_coupon(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartDto>> {
    let cart = find_cart(&state.orm, user.user_id).await?;
    let cart = clear_coupon_and_touch(&state.orm, cart).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "coupon_remove",
        Some("carts"),
        Some(serde_json::json!({ "cart_id": cart.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let dto = load_cart_dto(&state.orm, &cart).await?;
    Ok(ApiResponse::success("Coupon removed", dto, Some(Meta::empty())))
}

async fn find_cart<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<carts::Model, AppError> {
    Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Cart not found".into()))
}

/// One cart per user, created lazily. The unique index on `carts.user_id`
/// decides concurrent first-creation races; the loser re-reads the winner's row.
pub async fn get_or_create_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<carts::Model, AppError> {
    if let Some(cart) = Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .one(conn)
        .await?
    {
        return Ok(cart);
    }

    let insert = Carts::insert(CartActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        coupon_code: Set(None),
        coupon_discount: Set(None),
        coupon_type: Set(None),
        updated_at: NotSet,
    })
    .on_conflict(OnConflict::column(CartCol::UserId).do_nothing().to_owned())
    .exec_without_returning(conn)
    .await;

    match insert {
        Ok(_) | Err(DbErr::RecordNotInserted) => {}
        Err(err) => return Err(err.into()),
    }

    Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("cart vanished after insert")))
}

async fn touch_cart<C: ConnectionTrait>(
    conn: &C,
    cart: carts::Model,
) -> Result<carts::Model, AppError> {
    let mut active: CartActive = cart.into();
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(conn).await?)
}

async fn clear_coupon_and_touch<C: ConnectionTrait>(
    conn: &C,
    cart: carts::Model,
) -> Result<carts::Model, AppError> {
    let mut active: CartActive = cart.into();
    active.coupon_code = Set(None);
    active.coupon_discount = Set(None);
    active.coupon_type = Set(None);
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(conn).await?)
}

pub fn coupon_of(cart: &carts::Model) -> Option<Coupon> {
    let code = cart.coupon_code.clone()?;
    let discount = cart.coupon_discount?;
    let kind = cart
        .coupon_type
        .as_deref()
        .and_then(CouponKind::parse)
        .unwrap_or(CouponKind::Percentage);
    Some(Coupon {
        code,
        discount,
        kind,
    })
}

async fn load_cart_dto<C: ConnectionTrait>(
    conn: &C,
    cart: &carts::Model,
) -> Result<CartDto, AppError> {
    let rows = CartItems::find()
        .select_only()
        .column(CartItemCol::ProductId)
        .column(CartItemCol::Quantity)
        .column(CartItemCol::Price)
        .column(CartItemCol::AddedAt)
        .column_as(ProdCol::Name, "name")
        .column_as(ProdCol::Images, "images")
        .column_as(ProdCol::Stock, "stock")
        .column_as(ProdCol::IsActive, "is_active")
        .join(JoinType::InnerJoin, cart_items::Relation::Products.def())
        .filter(CartItemCol::CartId.eq(cart.id))
        .order_by_asc(CartItemCol::AddedAt)
        .into_model::<CartLineRow>()
        .all(conn)
        .await?;

    let coupon = coupon_of(cart);
    let lines: Vec<PricedLine> = rows
        .iter()
        .map(|r| PricedLine {
            unit_price: r.price,
            quantity: r.quantity,
        })
        .collect();
    let totals = pricing::cart_totals(&lines, coupon.as_ref());

    let items = rows
        .into_iter()
        .map(|row| CartItemDto {
            product_id: row.product_id,
            name: row.name,
            image: first_image(&row.images),
            price: row.price,
            quantity: row.quantity,
            stock: row.stock,
            is_active: row.is_active,
            added_at: row.added_at.with_timezone(&chrono::Utc),
        })
        .collect();

    Ok(CartDto {
        id: cart.id,
        items,
        coupon,
        total_items: totals.total_items,
        subtotal: totals.subtotal,
        discount_amount: totals.discount,
        total: totals.total,
        updated_at: cart.updated_at.with_timezone(&chrono::Utc),
    })
}

pub fn first_image(images: &Value) -> Option<String> {
    images
        .as_array()
        .and_then(|arr| arr.first())
        .and_then(|v| v.as_str())
        .map(String::from)
}

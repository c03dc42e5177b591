use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, FromQueryResult, JoinType,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, TransactionTrait,
};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{CreateOrderRequest, OrderList, OrderStatsSummary, OrderWithItems},
    entity::{
        cart_items::{self, Column as CartItemCol, Entity as CartItems},
        carts::{ActiveModel as CartActive, Column as CartCol, Entity as Carts},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem, OrderStatus, PaymentMethod, ShippingAddress},
    pricing::{self, PricedLine},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::cart_service,
    state::AppState,
};

/// Converts the user's priced cart into a persisted order and adjusts
/// inventory. The whole sequence runs in one transaction with the cart's
/// product rows locked, so checkout either fully succeeds or leaves no
/// partial effect, and concurrent checkouts cannot oversell.
pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    let cart = Carts::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::BadRequest("Cart is empty".into()))?;

    #[derive(Debug, FromQueryResult)]
    struct CheckoutRow {
        product_id: Uuid,
        quantity: i32,
        price: i64,
        name: String,
        images: Value,
        stock: i32,
        is_active: bool,
    }

    let rows = CartItems::find()
        .select_only()
        .column(CartItemCol::ProductId)
        .column(CartItemCol::Quantity)
        .column(CartItemCol::Price)
        .column_as(ProdCol::Name, "name")
        .column_as(ProdCol::Images, "images")
        .column_as(ProdCol::Stock, "stock")
        .column_as(ProdCol::IsActive, "is_active")
        .join(JoinType::InnerJoin, cart_items::Relation::Products.def())
        .filter(CartItemCol::CartId.eq(cart.id))
        .order_by_asc(CartItemCol::AddedAt)
        .lock(LockType::Update)
        .into_model::<CheckoutRow>()
        .all(&txn)
        .await?;

    if rows.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    // Cart-stored stock may be stale; re-validate against the locked rows.
    for row in &rows {
        if !row.is_active {
            return Err(AppError::BadRequest(format!(
                "Product no longer available: {}",
                row.name
            )));
        }
        if row.stock < row.quantity {
            return Err(AppError::BadRequest(format!(
                "Insufficient stock for {}",
                row.name
            )));
        }
    }

    let lines: Vec<PricedLine> = rows
        .iter()
        .map(|r| PricedLine {
            unit_price: r.price,
            quantity: r.quantity,
        })
        .collect();
    let cart_totals = pricing::cart_totals(&lines, cart_service::coupon_of(&cart).as_ref());
    let totals = pricing::checkout_totals(cart_totals.subtotal, cart_totals.discount);

    let address = payload.shipping_address;
    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        shipping_first_name: Set(address.first_name),
        shipping_last_name: Set(address.last_name),
        shipping_street: Set(address.street),
        shipping_city: Set(address.city),
        shipping_state: Set(address.state),
        shipping_zip_code: Set(address.zip_code),
        shipping_country: Set(address.country),
        shipping_phone: Set(address.phone),
        payment_method: Set(payload.payment_method.as_str().to_string()),
        subtotal: Set(totals.subtotal),
        tax: Set(totals.tax),
        shipping_cost: Set(totals.shipping_cost),
        discount: Set(totals.discount),
        total: Set(totals.total),
        status: Set(OrderStatus::Pending.as_str().to_string()),
        is_paid: Set(false),
        transaction_id: Set(None),
        paid_at: Set(None),
        tracking_number: Set(None),
        estimated_delivery: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut items: Vec<OrderItem> = Vec::with_capacity(rows.len());
    for row in &rows {
        // Freeze name, snapshot price and representative image at this instant.
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(row.product_id),
            name: Set(row.name.clone()),
            price: Set(row.price),
            quantity: Set(row.quantity),
            image: Set(cart_service::first_image(&row.images)),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        items.push(order_item_from_entity(item));

        Products::update_many()
            .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).sub(row.quantity))
            .filter(ProdCol::Id.eq(row.product_id))
            .exec(&txn)
            .await?;
    }

    CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart.id))
        .exec(&txn)
        .await?;

    let mut cart_active: CartActive = cart.into();
    cart_active.coupon_code = Set(None);
    cart_active.coupon_discount = Set(None);
    cart_active.coupon_type = Set(None);
    cart_active.updated_at = Set(Utc::now().into());
    cart_active.update(&txn).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_create",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "total": order.total })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order created successfully",
        OrderWithItems {
            order: order_from_entity(order)?,
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();

    let mut finder = Orders::find().filter(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        let status = OrderStatus::parse(status)
            .ok_or_else(|| AppError::BadRequest("Invalid order status".into()))?;
        finder = finder.filter(OrderCol::Status.eq(status.as_str()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect::<Result<Vec<_>, _>>()?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "OK",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::NotFound("Order not found".into()))?;

    if order.user_id != user.user_id && !user.is_admin() {
        return Err(AppError::Forbidden);
    }

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order)?,
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Owner-initiated cancellation, permitted from pending/processing only.
/// Runs in one transaction with stock restoration for every line item.
pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    let order = Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("Order not found".into()))?;

    if order.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    let status = parse_stored_status(&order.status)?;
    if !status.can_cancel() {
        return Err(AppError::BadRequest("Order cannot be cancelled".into()));
    }

    let items = restore_stock(&txn, order.id).await?;

    let mut active: OrderActive = order.into();
    active.status = Set(OrderStatus::Cancelled.as_str().to_string());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_cancel",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order cancelled successfully",
        OrderWithItems {
            order: order_from_entity(order)?,
            items: items.into_iter().map(order_item_from_entity).collect(),
        },
        Some(Meta::empty()),
    ))
}

pub async fn order_stats(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<OrderStatsSummary>> {
    let totals: Vec<i64> = Orders::find()
        .select_only()
        .column(OrderCol::Total)
        .filter(OrderCol::UserId.eq(user.user_id))
        .into_tuple()
        .all(&state.orm)
        .await?;

    let total_orders = totals.len() as i64;
    let total_spent: i64 = totals.iter().sum();
    let average_order_value = if total_orders > 0 {
        total_spent / total_orders
    } else {
        0
    };

    Ok(ApiResponse::success(
        "OK",
        OrderStatsSummary {
            total_orders,
            total_spent,
            average_order_value,
        },
        Some(Meta::empty()),
    ))
}

/// Puts every line item's quantity back onto its product. The inverse of the
/// checkout decrement; shared by user and admin cancellation paths.
pub(crate) async fn restore_stock<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<OrderItemModel>, AppError> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .all(conn)
        .await?;

    for item in &items {
        Products::update_many()
            .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).add(item.quantity))
            .filter(ProdCol::Id.eq(item.product_id))
            .exec(conn)
            .await?;
    }

    Ok(items)
}

/// Stored status and payment method are written exclusively through the
/// domain enums; anything else in those columns is corruption and is
/// reported rather than coerced to a permissive default.
pub(crate) fn order_from_entity(model: OrderModel) -> Result<Order, AppError> {
    let status = parse_stored_status(&model.status)?;
    let payment_method = PaymentMethod::parse(&model.payment_method).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "unknown payment method stored on order: {}",
            model.payment_method
        ))
    })?;

    Ok(Order {
        id: model.id,
        user_id: model.user_id,
        shipping_address: ShippingAddress {
            first_name: model.shipping_first_name,
            last_name: model.shipping_last_name,
            street: model.shipping_street,
            city: model.shipping_city,
            state: model.shipping_state,
            zip_code: model.shipping_zip_code,
            country: model.shipping_country,
            phone: model.shipping_phone,
        },
        payment_method,
        subtotal: model.subtotal,
        tax: model.tax,
        shipping_cost: model.shipping_cost,
        discount: model.discount,
        total: model.total,
        status,
        is_paid: model.is_paid,
        transaction_id: model.transaction_id,
        paid_at: model.paid_at.map(|dt| dt.with_timezone(&Utc)),
        tracking_number: model.tracking_number,
        estimated_delivery: model.estimated_delivery.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

pub(crate) fn parse_stored_status(value: &str) -> Result<OrderStatus, AppError> {
    OrderStatus::parse(value).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("unknown order status stored: {value}"))
    })
}

pub(crate) fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        name: model.name,
        price: model.price,
        quantity: model.quantity,
        image: model.image,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

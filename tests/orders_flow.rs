use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set, Statement};
use storefront_api::{
    db::{create_orm_conn, create_pool, run_migrations},
    dto::cart::AddCartItemRequest,
    dto::orders::CreateOrderRequest,
    entity::{
        orders::{ActiveModel as OrderActive, Entity as Orders},
        products::{ActiveModel as ProductActive, Entity as Products},
        users::ActiveModel as UserActive,
    },
    error::AppError,
    middleware::auth::AuthUser,
    models::{OrderStatus, PaymentMethod, ShippingAddress},
    routes::admin::{InventoryAdjustRequest, LowStockQuery, MarkPaidRequest, UpdateOrderStatusRequest},
    services::{admin_service, cart_service, order_service},
    state::AppState,
};
use uuid::Uuid;

// Checkout end to end: cart to order with totals, stock decrement and cart
// reset, then the admin lifecycle (status transitions, payment, inventory).
#[tokio::test]
async fn checkout_cancel_and_admin_lifecycle_flow() -> anyhow::Result<()> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    let state = setup_state(&database_url).await?;

    let user_id = create_user(&state, "user", "order-user@example.com").await?;
    let admin_id = create_user(&state, "admin", "order-admin@example.com").await?;
    let user = AuthUser {
        user_id,
        role: "user".into(),
    };
    let admin = AuthUser {
        user_id: admin_id,
        role: "admin".into(),
    };

    let widget = create_product(&state, "Test Widget", 50_00, 10).await?;

    // Order over the free-shipping threshold: 3 x 50.00 = 150.00 subtotal,
    // 10% tax, no shipping fee.
    cart_service::add_item(
        &state,
        &user,
        AddCartItemRequest {
            product_id: widget.id,
            quantity: 3,
        },
    )
    .await?;

    let resp = order_service::create_order(&state, &user, checkout_payload()).await?;
    let placed = resp.data.unwrap();
    assert_eq!(placed.order.subtotal, 150_00);
    assert_eq!(placed.order.tax, 15_00);
    assert_eq!(placed.order.shipping_cost, 0);
    assert_eq!(placed.order.total, 165_00);
    assert_eq!(placed.order.status, OrderStatus::Pending);
    assert!(!placed.order.is_paid);
    assert_eq!(placed.items.len(), 1);
    assert_eq!(placed.items[0].name, "Test Widget");
    assert_eq!(placed.items[0].price, 50_00);

    let stock_after = product_stock(&state, widget.id).await?;
    assert_eq!(stock_after, 7);

    // Checkout empties the cart.
    let cart = cart_service::get_cart(&state, &user).await?.data.unwrap();
    assert!(cart.items.is_empty());
    assert!(cart.coupon.is_none());

    let err = order_service::create_order(&state, &user, checkout_payload())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref msg) if msg == "Cart is empty"));

    // Pending orders cannot jump straight to shipped.
    let err = admin_service::update_order_status(
        &state,
        &admin,
        placed.order.id,
        status_request(OrderStatus::Shipped),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref msg) if msg.contains("Cannot transition")));

    let resp = admin_service::update_order_status(
        &state,
        &admin,
        placed.order.id,
        status_request(OrderStatus::Processing),
    )
    .await?;
    assert_eq!(resp.data.unwrap().status, OrderStatus::Processing);

    // Payment is recorded independently of the fulfilment status.
    let resp = admin_service::mark_paid(
        &state,
        &admin,
        placed.order.id,
        MarkPaidRequest {
            transaction_id: "txn-123".into(),
        },
    )
    .await?;
    let paid = resp.data.unwrap();
    assert!(paid.is_paid);
    assert_eq!(paid.transaction_id.as_deref(), Some("txn-123"));
    assert_eq!(paid.status, OrderStatus::Processing);

    let err = admin_service::mark_paid(
        &state,
        &admin,
        placed.order.id,
        MarkPaidRequest {
            transaction_id: "txn-456".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref msg) if msg == "Order is already paid"));

    let resp = admin_service::update_order_status(
        &state,
        &admin,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Shipped,
            tracking_number: Some("TRACK-001".into()),
            estimated_delivery: Some(Utc::now() + chrono::Duration::days(3)),
        },
    )
    .await?;
    let shipped = resp.data.unwrap();
    assert_eq!(shipped.status, OrderStatus::Shipped);
    assert_eq!(shipped.tracking_number.as_deref(), Some("TRACK-001"));

    // A shipped order is past the point where the owner can cancel.
    let err = order_service::cancel_order(&state, &user, placed.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref msg) if msg == "Order cannot be cancelled"));

    // Second order at the threshold: 2 x 50.00 = 100.00 subtotal still pays
    // the flat shipping fee.
    cart_service::add_item(
        &state,
        &user,
        AddCartItemRequest {
            product_id: widget.id,
            quantity: 2,
        },
    )
    .await?;
    let resp = order_service::create_order(&state, &user, checkout_payload()).await?;
    let second = resp.data.unwrap();
    assert_eq!(second.order.subtotal, 100_00);
    assert_eq!(second.order.tax, 10_00);
    assert_eq!(second.order.shipping_cost, 10_00);
    assert_eq!(second.order.total, 120_00);
    assert_eq!(product_stock(&state, widget.id).await?, 5);

    // Owner cancellation restores the stock it took.
    let resp = order_service::cancel_order(&state, &user, second.order.id).await?;
    assert_eq!(resp.data.unwrap().order.status, OrderStatus::Cancelled);
    assert_eq!(product_stock(&state, widget.id).await?, 7);

    // Stock is re-validated at checkout, not just when the cart is filled.
    cart_service::add_item(
        &state,
        &user,
        AddCartItemRequest {
            product_id: widget.id,
            quantity: 5,
        },
    )
    .await?;
    admin_service::adjust_inventory(
        &state,
        &admin,
        widget.id,
        InventoryAdjustRequest { delta: -5 },
    )
    .await?;
    let err = order_service::create_order(&state, &user, checkout_payload())
        .await
        .unwrap_err();
    assert!(
        matches!(err, AppError::BadRequest(ref msg) if msg == "Insufficient stock for Test Widget")
    );
    // The failed checkout leaves stock untouched.
    assert_eq!(product_stock(&state, widget.id).await?, 2);

    // The widget is now in the low-stock report.
    let low = admin_service::list_low_stock(
        &state,
        &admin,
        LowStockQuery {
            page: Some(1),
            per_page: Some(20),
            threshold: Some(5),
        },
    )
    .await?;
    assert!(
        low.data.unwrap().items.iter().any(|p| p.id == widget.id),
        "expected product to appear in low-stock list"
    );

    // Stats cover every order the user placed, cancelled or not.
    let stats = order_service::order_stats(&state, &user).await?.data.unwrap();
    assert_eq!(stats.total_orders, 2);
    assert_eq!(stats.total_spent, 285_00);
    assert_eq!(stats.average_order_value, 142_50);

    // A product deactivated after it entered the cart blocks checkout with
    // its own message rather than a stock error.
    let product = Products::find_by_id(widget.id)
        .one(&state.orm)
        .await?
        .expect("product exists");
    let mut deactivate: ProductActive = product.into();
    deactivate.is_active = Set(false);
    deactivate.update(&state.orm).await?;

    let err = order_service::create_order(&state, &user, checkout_payload())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::BadRequest(ref msg) if msg == "Product no longer available: Test Widget"
    ));

    // A mangled stored status is reported as an internal error, not coerced
    // into a permissive default.
    let order_row = Orders::find_by_id(placed.order.id)
        .one(&state.orm)
        .await?
        .expect("order exists");
    let mut corrupt: OrderActive = order_row.into();
    corrupt.status = Set("archived".into());
    corrupt.update(&state.orm).await?;

    let err = order_service::get_order(&state, &user, placed.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Internal(_)));

    Ok(())
}

fn checkout_payload() -> CreateOrderRequest {
    CreateOrderRequest {
        shipping_address: ShippingAddress {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            street: "12 Analytical Way".into(),
            city: "London".into(),
            state: "LDN".into(),
            zip_code: "EC1A".into(),
            country: "UK".into(),
            phone: "+44 20 0000 0000".into(),
        },
        payment_method: PaymentMethod::CreditCard,
    }
}

fn status_request(status: OrderStatus) -> UpdateOrderStatusRequest {
    UpdateOrderStatusRequest {
        status,
        tracking_number: None,
        estimated_delivery: None,
    }
}

async fn product_stock(state: &AppState, id: Uuid) -> anyhow::Result<i32> {
    let product = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .expect("product exists");
    Ok(product.stock)
}

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url).await?;
    let orm = create_orm_conn(database_url).await?;
    run_migrations(&orm).await?;

    // Clean tables between runs
    let backend = orm.get_database_backend();
    orm.execute(Statement::from_string(
        backend,
        "TRUNCATE TABLE order_items, orders, cart_items, carts, product_reviews, audit_logs, products, users RESTART IDENTITY CASCADE",
    ))
    .await?;

    Ok(AppState { pool, orm })
}

async fn create_user(state: &AppState, role: &str, email: &str) -> anyhow::Result<Uuid> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        password_hash: Set("dummy".into()),
        role: Set(role.into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(user.id)
}

async fn create_product(
    state: &AppState,
    name: &str,
    price: i64,
    stock: i32,
) -> anyhow::Result<storefront_api::entity::products::Model> {
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set(name.into()),
        description: Set(Some("A product for testing".into())),
        price: Set(price),
        category: Set("electronics".into()),
        stock: Set(stock),
        images: Set(serde_json::json!(["https://cdn.example.com/widget.jpg"])),
        sku: Set(None),
        discount_percentage: Set(0),
        discount_valid_until: Set(None),
        rating_average: Set(0.0),
        rating_count: Set(0),
        is_active: Set(true),
        is_featured: Set(false),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(product)
}

use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set, Statement};
use storefront_api::{
    db::{create_orm_conn, create_pool, run_migrations},
    dto::cart::{AddCartItemRequest, ApplyCouponRequest, UpdateCartItemRequest},
    entity::{products::ActiveModel as ProductActive, users::ActiveModel as UserActive},
    error::AppError,
    middleware::auth::AuthUser,
    models::CouponKind,
    services::cart_service,
    state::AppState,
};
use uuid::Uuid;

// Cart behaviour end to end: line merging, the price snapshot refresh,
// quantity-zero removal, coupon replacement and the empty-cart guards.
#[tokio::test]
async fn cart_merge_coupon_and_clear_flow() -> anyhow::Result<()> {
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

    let user_id = create_user(&state, "user", "cart-user@example.com").await?;
    let user = AuthUser {
        user_id,
        role: "user".into(),
    };

    let mug = create_product(&state, "Ceramic Mug", 30_00, 5).await?;
    let lamp = create_product(&state, "Desk Lamp", 45_00, 1).await?;

    // First add creates the line.
    let resp = cart_service::add_item(
        &state,
        &user,
        AddCartItemRequest {
            product_id: mug.id,
            quantity: 2,
        },
    )
    .await?;
    let cart = resp.data.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.total_items, 2);
    assert_eq!(cart.subtotal, 60_00);

    // Second add merges into the same line instead of creating another.
    let resp = cart_service::add_item(
        &state,
        &user,
        AddCartItemRequest {
            product_id: mug.id,
            quantity: 1,
        },
    )
    .await?;
    let cart = resp.data.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 3);
    assert_eq!(cart.subtotal, 90_00);

    // Adding beyond available stock is rejected.
    let err = cart_service::add_item(
        &state,
        &user,
        AddCartItemRequest {
            product_id: lamp.id,
            quantity: 2,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref msg) if msg.contains("Insufficient stock")));

    cart_service::add_item(
        &state,
        &user,
        AddCartItemRequest {
            product_id: lamp.id,
            quantity: 1,
        },
    )
    .await?;

    // A merge refreshes the stored price snapshot to the current catalog price.
    let mut reprice: ProductActive = mug.clone().into();
    reprice.price = Set(25_00);
    reprice.update(&state.orm).await?;

    let resp = cart_service::add_item(
        &state,
        &user,
        AddCartItemRequest {
            product_id: mug.id,
            quantity: 1,
        },
    )
    .await?;
    let cart = resp.data.unwrap();
    let mug_line = cart
        .items
        .iter()
        .find(|i| i.product_id == mug.id)
        .expect("mug line");
    assert_eq!(mug_line.quantity, 4);
    assert_eq!(mug_line.price, 25_00);
    assert_eq!(cart.subtotal, 4 * 25_00 + 45_00);

    // Updating a line to quantity zero removes it.
    let resp = cart_service::update_item(
        &state,
        &user,
        lamp.id,
        UpdateCartItemRequest { quantity: 0 },
    )
    .await?;
    let cart = resp.data.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.subtotal, 100_00);

    // A fixed coupon never discounts below zero.
    let resp = cart_service::apply_coupon(
        &state,
        &user,
        ApplyCouponRequest {
            code: "GIFT150".into(),
            discount: 150_00,
            kind: CouponKind::Fixed,
        },
    )
    .await?;
    let cart = resp.data.unwrap();
    assert_eq!(cart.discount_amount, 100_00);
    assert_eq!(cart.total, 0);

    // A new coupon replaces the previous one.
    let resp = cart_service::apply_coupon(
        &state,
        &user,
        ApplyCouponRequest {
            code: "SAVE10".into(),
            discount: 10,
            kind: CouponKind::Percentage,
        },
    )
    .await?;
    let cart = resp.data.unwrap();
    assert_eq!(cart.coupon.as_ref().unwrap().code, "SAVE10");
    assert_eq!(cart.discount_amount, 10_00);
    assert_eq!(cart.total, 90_00);

    // Clearing the cart also drops the coupon.
    let resp = cart_service::clear_cart(&state, &user).await?;
    let cart = resp.data.unwrap();
    assert!(cart.items.is_empty());
    assert!(cart.coupon.is_none());
    assert_eq!(cart.total, 0);

    // Coupons cannot be applied to an empty cart.
    let err = cart_service::apply_coupon(
        &state,
        &user,
        ApplyCouponRequest {
            code: "SAVE10".into(),
            discount: 10,
            kind: CouponKind::Percentage,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref msg) if msg == "Cart is empty"));

    // Removing an item that is not in the cart is a no-op.
    let resp = cart_service::remove_item(&state, &user, mug.id).await?;
    assert!(resp.data.unwrap().items.is_empty());

    Ok(())
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
        category: Set("home".into()),
        stock: Set(stock),
        images: Set(serde_json::json!(["https://cdn.example.com/test.jpg"])),
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

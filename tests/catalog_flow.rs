use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set, Statement};
use storefront_api::{
    db::{create_orm_conn, create_pool, run_migrations},
    dto::products::{AddReviewRequest, CreateProductRequest, UpdateProductRequest},
    entity::users::ActiveModel as UserActive,
    error::AppError,
    middleware::auth::AuthUser,
    models::Category,
    routes::params::ProductQuery,
    services::product_service,
    state::AppState,
};
use uuid::Uuid;

// Catalog management: admin CRUD with SKU uniqueness and soft delete,
// plus reviews feeding the rolling rating average.
#[tokio::test]
async fn catalog_crud_reviews_and_soft_delete_flow() -> anyhow::Result<()> {
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

    let admin_id = create_user(&state, "admin", "catalog-admin@example.com").await?;
    let reviewer_id = create_user(&state, "user", "catalog-user@example.com").await?;
    let admin = AuthUser {
        user_id: admin_id,
        role: "admin".into(),
    };
    let reviewer = AuthUser {
        user_id: reviewer_id,
        role: "user".into(),
    };

    // Non-admins cannot create products.
    let err = product_service::create_product(&state, &reviewer, keyboard_payload())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let resp = product_service::create_product(&state, &admin, keyboard_payload()).await?;
    let keyboard = resp.data.unwrap();
    assert_eq!(keyboard.price, 79_90);
    // 20% off 79.90
    assert_eq!(keyboard.discounted_price, 63_92);
    assert!(keyboard.is_active);

    // SKU collisions are rejected up front.
    let err = product_service::create_product(&state, &admin, keyboard_payload())
        .await
        .unwrap_err();
    assert!(
        matches!(err, AppError::BadRequest(ref msg) if msg == "Product with this SKU already exists")
    );

    // Partial update only touches the supplied fields.
    let resp = product_service::update_product(
        &state,
        &admin,
        keyboard.id,
        UpdateProductRequest {
            price: Some(89_90),
            is_featured: Some(true),
            name: None,
            description: None,
            category: None,
            stock: None,
            images: None,
            discount_percentage: None,
            discount_valid_until: None,
        },
    )
    .await?;
    let updated = resp.data.unwrap();
    assert_eq!(updated.price, 89_90);
    assert_eq!(updated.name, "Mechanical Keyboard");
    assert!(updated.is_featured);

    // Reviews fold into the stored aggregate one at a time.
    let resp = product_service::add_review(
        &state,
        &reviewer,
        keyboard.id,
        AddReviewRequest {
            rating: 4,
            comment: Some("Clicky and solid".into()),
        },
    )
    .await?;
    assert_eq!(resp.data.unwrap().rating, 4);

    let detail = product_service::get_product(&state, keyboard.id)
        .await?
        .data
        .unwrap();
    assert_eq!(detail.reviews.len(), 1);
    assert_eq!(detail.product.rating_count, 1);
    assert!((detail.product.rating_average - 4.0).abs() < f64::EPSILON);

    // One review per user per product.
    let err = product_service::add_review(
        &state,
        &reviewer,
        keyboard.id,
        AddReviewRequest {
            rating: 5,
            comment: None,
        },
    )
    .await
    .unwrap_err();
    assert!(
        matches!(err, AppError::BadRequest(ref msg) if msg == "You have already reviewed this product")
    );

    let featured = product_service::featured_products(&state)
        .await?
        .data
        .unwrap();
    assert!(featured.items.iter().any(|p| p.id == keyboard.id));

    // Soft delete hides the product from the catalog without dropping the row.
    product_service::delete_product(&state, &admin, keyboard.id).await?;

    let err = product_service::get_product(&state, keyboard.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let listing = product_service::list_products(
        &state,
        ProductQuery {
            page: Some(1),
            per_page: Some(20),
            q: None,
            category: Some(Category::Electronics),
            featured: None,
            min_price: None,
            max_price: None,
            sort_by: None,
            sort_order: None,
        },
    )
    .await?
    .data
    .unwrap();
    assert!(listing.items.iter().all(|p| p.id != keyboard.id));

    Ok(())
}

fn keyboard_payload() -> CreateProductRequest {
    CreateProductRequest {
        name: "Mechanical Keyboard".into(),
        description: "Tenkeyless, hot-swappable switches".into(),
        price: 79_90,
        category: Category::Electronics,
        stock: 25,
        images: vec!["https://cdn.example.com/keyboard.jpg".into()],
        sku: Some("SKU-KB-100".into()),
        discount_percentage: Some(20),
        discount_valid_until: None,
        is_featured: false,
    }
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

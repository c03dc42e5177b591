use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use storefront_api::{config::AppConfig, db::create_pool};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    sqlx::migrate!("./migrations").run(&pool).await?;

    let admin_id = ensure_user_with_role(&pool, "admin@example.com", "admin123", "admin").await?;
    let user_id = ensure_user_with_role(&pool, "user@example.com", "user123", "user").await?;
    seed_products(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user_with_role(
    pool: &sqlx::PgPool,
    email: &str,
    password: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .to_string();

    let (user_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, password_hash, role)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .fetch_one(pool)
    .await?;

    println!("Ensured user {email} (role={role})");
    Ok(user_id)
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    // (name, description, price in cents, category, stock, sku, featured)
    let products = vec![
        (
            "Wireless Headphones",
            "Over-ear headphones with noise cancelling",
            89_99_i64,
            "electronics",
            40,
            "SKU-WH-001",
            true,
        ),
        (
            "Cotton T-Shirt",
            "Plain cotton tee, unisex fit",
            19_99,
            "clothing",
            120,
            "SKU-TS-002",
            false,
        ),
        (
            "Chess for Beginners",
            "An illustrated introduction to chess",
            24_50,
            "books",
            60,
            "SKU-BK-003",
            false,
        ),
        (
            "Yoga Mat",
            "Non-slip mat, 6mm thick",
            35_00,
            "sports",
            80,
            "SKU-YM-004",
            true,
        ),
    ];

    for (name, desc, price, category, stock, sku, featured) in products {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price, category, stock, images, sku, is_featured)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (sku) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(desc)
        .bind(price)
        .bind(category)
        .bind(stock)
        .bind(serde_json::json!([format!(
            "https://cdn.example.com/{}.jpg",
            sku.to_lowercase()
        )]))
        .bind(sku)
        .bind(featured)
        .execute(pool)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Category, Product, Review};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProductRequest {
    pub name: String,
    pub description: String,
    pub price: i64,
    pub category: Category,
    pub stock: i32,
    pub images: Vec<String>,
    pub sku: Option<String>,
    pub discount_percentage: Option<i32>,
    pub discount_valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_featured: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub category: Option<Category>,
    pub stock: Option<i32>,
    pub images: Option<Vec<String>>,
    pub discount_percentage: Option<i32>,
    pub discount_valid_until: Option<DateTime<Utc>>,
    pub is_featured: Option<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddReviewRequest {
    pub rating: i32,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductList {
    pub items: Vec<Product>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: Product,
    pub reviews: Vec<Review>,
}

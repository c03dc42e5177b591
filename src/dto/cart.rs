use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Coupon, CouponKind};

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCartItemRequest {
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ApplyCouponRequest {
    pub code: String,
    /// Percentage (0-100) for percentage coupons, minor units for fixed ones.
    pub discount: i64,
    #[serde(default = "default_coupon_kind")]
    pub kind: CouponKind,
}

fn default_coupon_kind() -> CouponKind {
    CouponKind::Percentage
}

/// A cart line joined with the catalog fields the storefront renders.
/// `price` is the add-time snapshot, `stock`/`is_active` are current.
#[derive(Debug, Serialize, ToSchema)]
pub struct CartItemDto {
    pub product_id: Uuid,
    pub name: String,
    pub image: Option<String>,
    pub price: i64,
    pub quantity: i32,
    pub stock: i32,
    pub is_active: bool,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartDto {
    pub id: Uuid,
    pub items: Vec<CartItemDto>,
    pub coupon: Option<Coupon>,
    pub total_items: i64,
    pub subtotal: i64,
    pub discount_amount: i64,
    pub total: i64,
    pub updated_at: DateTime<Utc>,
}

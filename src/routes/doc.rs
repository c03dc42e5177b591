use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        cart::{AddCartItemRequest, ApplyCouponRequest, CartDto, CartItemDto, UpdateCartItemRequest},
        orders::{CreateOrderRequest, OrderList, OrderStatsSummary, OrderWithItems},
        products::{AddReviewRequest, CreateProductRequest, ProductDetail, ProductList, UpdateProductRequest},
    },
    models::{
        Category, Coupon, CouponKind, Order, OrderItem, OrderStatus, PaymentMethod, Product,
        Review, ShippingAddress, User,
    },
    response::{ApiResponse, Meta},
    routes::{admin, auth, cart, health, orders, params, products as product_routes},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::login,
        auth::register,
        product_routes::list_products,
        product_routes::featured_products,
        product_routes::get_product,
        product_routes::create_product,
        product_routes::update_product,
        product_routes::delete_product,
        product_routes::add_review,
        cart::get_cart,
        cart::cart_summary,
        cart::add_item,
        cart::update_item,
        cart::remove_item,
        cart::clear_cart,
        cart::apply_coupon,
        cart::remove_coupon,
        orders::create_order,
        orders::list_orders,
        orders::order_stats,
        orders::get_order,
        orders::cancel_order,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::mark_paid,
        admin::list_low_stock,
        admin::adjust_inventory
    ),
    components(
        schemas(
            User,
            Product,
            Review,
            Category,
            Coupon,
            CouponKind,
            Order,
            OrderItem,
            OrderStatus,
            PaymentMethod,
            ShippingAddress,
            CartDto,
            CartItemDto,
            AddCartItemRequest,
            UpdateCartItemRequest,
            ApplyCouponRequest,
            CreateOrderRequest,
            OrderList,
            OrderWithItems,
            OrderStatsSummary,
            CreateProductRequest,
            UpdateProductRequest,
            AddReviewRequest,
            ProductList,
            ProductDetail,
            admin::AdminOrderListQuery,
            admin::UpdateOrderStatusRequest,
            admin::MarkPaidRequest,
            admin::LowStockQuery,
            admin::InventoryAdjustRequest,
            params::ProductQuery,
            params::OrderListQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<ProductDetail>,
            ApiResponse<CartDto>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<OrderStatsSummary>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Products", description = "Catalog endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Admin", description = "Admin endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}

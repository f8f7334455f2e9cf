#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use storefront_admin::{
    build_app,
    config::{AppConfig, CouponSettings},
    db,
    entities::coupon::{DiscountType, Model as CouponModel, ReferenceSet},
    events::{self, EventSender},
    handlers::AppServices,
    services::coupons::NewCoupon,
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;

/// Helper harness for spinning up an application backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_settings(CouponSettings::default()).await
    }

    /// Construct a new test application with fresh database state.
    pub async fn with_settings(settings: CouponSettings) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.cors_allow_any_origin = true;
        // A single connection keeps every query on the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.coupons = settings.clone();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
        let event_task = tokio::spawn(events::process_events(event_rx));
        let event_sender = Arc::new(EventSender::new(event_tx));

        let services = AppServices::new(db_arc.clone(), event_sender, settings);
        let state = AppState {
            db: db_arc,
            config: cfg,
            services,
        };
        let router = build_app(state.clone()).expect("router should build");

        Self {
            router,
            state,
            _event_task: event_task,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        user: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response")
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.request(Method::GET, uri, None, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> Response {
        self.request(Method::POST, uri, Some(body), None).await
    }

    /// Creates a coupon directly through the service layer
    pub async fn seed_coupon(
        &self,
        code: &str,
        discount: Decimal,
        discount_type: DiscountType,
        max_uses: Option<i32>,
    ) -> CouponModel {
        self.state
            .services
            .coupons
            .create_coupon(new_coupon(code, discount, discount_type, max_uses), None)
            .await
            .expect("seed coupon")
    }
}

pub fn new_coupon(
    code: &str,
    discount: Decimal,
    discount_type: DiscountType,
    max_uses: Option<i32>,
) -> NewCoupon {
    NewCoupon {
        code: code.to_string(),
        discount,
        discount_type,
        expiration_date: Utc::now() + Duration::days(30),
        max_uses,
        is_active: true,
        applicable_products: ReferenceSet::default(),
        applicable_categories: ReferenceSet::default(),
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

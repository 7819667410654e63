#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use order_intake::{
    config::AppConfig,
    db,
    events::{self, EventSender},
    handlers::AppServices,
    services::{order_number::OrderNumberGenerator, orders::OrderService},
    AppState,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

/// Knobs for a test application.
#[derive(Default)]
pub struct TestOptions {
    pub staff_token: Option<String>,
    pub timezone: Option<String>,
    pub numbers: Option<Arc<dyn OrderNumberGenerator>>,
    pub max_number_attempts: Option<u32>,
    /// Pool size; a single connection makes every transaction run in turn.
    pub db_max_connections: Option<u32>,
}

/// Hands out a fixed list of order numbers, repeating the last one when exhausted.
pub struct ScriptedNumbers {
    numbers: Vec<String>,
    next: AtomicUsize,
}

impl ScriptedNumbers {
    pub fn new(numbers: &[&str]) -> Self {
        Self {
            numbers: numbers.iter().map(|n| n.to_string()).collect(),
            next: AtomicUsize::new(0),
        }
    }

    pub fn drawn(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }
}

impl OrderNumberGenerator for ScriptedNumbers {
    fn next_candidate(&self) -> String {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        self.numbers[index.min(self.numbers.len() - 1)].clone()
    }
}

/// Helper harness for spinning up the full router over a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
    _dir: TempDir,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_options(TestOptions::default()).await
    }

    pub async fn with_options(options: TestOptions) -> Self {
        let dir = tempfile::tempdir().expect("temp dir for test database");
        let db_file = dir.path().join("order_intake_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = options.db_max_connections.unwrap_or(1);
        cfg.db_min_connections = 1;
        cfg.staff_token = options.staff_token;
        if let Some(timezone) = options.timezone {
            cfg.timezone = timezone;
        }
        if let Some(attempts) = options.max_number_attempts {
            cfg.order_number_max_attempts = attempts;
        }

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let shared_sender = Arc::new(event_sender.clone());
        let mut services = AppServices::new(db_arc.clone(), shared_sender.clone(), &cfg)
            .expect("services for tests");
        if let Some(numbers) = options.numbers {
            services = services.with_order_service(
                OrderService::new(
                    db_arc.clone(),
                    Some(shared_sender),
                    cfg.order_number_max_attempts,
                )
                .with_number_generator(numbers),
            );
        }

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        Self {
            router: order_intake::app_router(state.clone()),
            state,
            _event_task: event_task,
            _dir: dir,
        }
    }

    /// Send a request against the router with extra headers.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.request(Method::GET, uri, None, &[]).await
    }

    pub async fn create_order(&self, body: Value) -> Response {
        self.request(Method::POST, "/orders", Some(body), &[]).await
    }

    /// Creates an order and returns its number, panicking on failure.
    pub async fn place_order(&self, body: Value) -> String {
        let response = self.create_order(body).await;
        assert_eq!(response.status(), 201, "order creation should succeed");
        let json = response_json(response).await;
        json["order_number"]
            .as_str()
            .expect("order number in receipt")
            .to_string()
    }

    pub async fn set_status(
        &self,
        order_number: &str,
        status: &str,
        headers: &[(&str, &str)],
    ) -> Response {
        self.request(
            Method::PATCH,
            &format!("/orders/{order_number}/status"),
            Some(json!({ "status": status })),
            headers,
        )
        .await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Two Pad Thai at 119 and one Tom Yum at 160: 398 in total.
pub fn sample_order() -> Value {
    json!({
        "customer_name": "Somchai Jaidee",
        "customer_phone": "081-234-5678",
        "order_type": "pickup",
        "payment_method": "cash",
        "total_amount": 398,
        "items": [
            { "id": 1, "name": "Pad Thai", "price": 119, "quantity": 2 },
            { "id": "tom-yum", "name": "Tom Yum", "price": 160, "quantity": 1, "total": 160, "notes": "extra spicy" }
        ]
    })
}

/// `sample_order` with a different customer and platform.
pub fn order_from(platform: &str, user_id: Option<&str>, name: &str, phone: &str) -> Value {
    let mut body = sample_order();
    body["platform"] = json!(platform);
    body["customer_name"] = json!(name);
    body["customer_phone"] = json!(phone);
    if let Some(user_id) = user_id {
        body["platform_user_id"] = json!(user_id);
    }
    body
}

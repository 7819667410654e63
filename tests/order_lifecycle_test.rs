//! Status lifecycle through `PATCH /orders/{n}/status`.

mod common;

use axum::http::Method;
use common::{response_json, sample_order, TestApp, TestOptions};
use order_intake::{
    entities::{order, order_status_history},
    errors::ServiceError,
    models::{Actor, OrderStatus},
    services::order_status::StatusChangeRequest,
};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde_json::json;

#[tokio::test]
async fn staff_moves_an_order_along_the_main_line() {
    let app = TestApp::new().await;
    let number = app.place_order(sample_order()).await;

    for status in ["confirmed", "preparing", "ready", "completed"] {
        let response = app
            .set_status(&number, status, &[("x-staff-id", "somchai")])
            .await;
        assert_eq!(response.status(), 200, "moving to {status}");
        let body = response_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["status"], status);
    }

    let body = response_json(app.get(&format!("/orders/{number}")).await).await;
    assert!(body["completed_at"].is_string());
    assert!(body["status_history"]
        .as_array()
        .unwrap()
        .iter()
        .all(|step| step["completed"] == true));

    let stored = order::Entity::find()
        .filter(order::Column::OrderNumber.eq(number.as_str()))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.version, 5);

    let history = order_status_history::Entity::find()
        .filter(order_status_history::Column::OrderId.eq(stored.id))
        .order_by_asc(order_status_history::Column::CreatedAt)
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(history.len(), 5);
    assert!(history[1..]
        .iter()
        .all(|row| row.changed_by == "staff:somchai"));
    assert_eq!(history[4].old_status, Some(OrderStatus::Ready));
    assert_eq!(history[4].new_status, OrderStatus::Completed);
}

#[tokio::test]
async fn steps_may_be_skipped_but_never_reversed() {
    let app = TestApp::new().await;
    let number = app.place_order(sample_order()).await;

    assert_eq!(app.set_status(&number, "ready", &[]).await.status(), 200);

    let response = app.set_status(&number, "confirmed", &[]).await;
    assert_eq!(response.status(), 409);
    let error = response_json(response).await;
    assert_eq!(error["code"], "illegal_transition");

    let response = app.set_status(&number, "ready", &[]).await;
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn terminal_orders_never_change() {
    let app = TestApp::new().await;
    let number = app.place_order(sample_order()).await;

    let response = app
        .request(
            Method::PATCH,
            &format!("/orders/{number}/status"),
            Some(json!({ "status": "cancelled", "reason": "  customer called  " })),
            &[],
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["cancelled_reason"], "customer called");
    let timeline = body["status_history"].as_array().unwrap();
    assert_eq!(timeline.len(), 6);
    assert_eq!(timeline[5]["status"], "cancelled");
    assert_eq!(timeline[1]["completed"], false);

    for status in ["pending", "confirmed", "completed", "cancelled"] {
        let response = app.set_status(&number, status, &[]).await;
        assert_eq!(response.status(), 409, "cancelled -> {status}");
    }
}

#[tokio::test]
async fn transitions_leave_items_and_total_alone() {
    let app = TestApp::new().await;
    let number = app.place_order(sample_order()).await;
    let before = response_json(app.get(&format!("/orders/{number}")).await).await;

    app.set_status(&number, "confirmed", &[]).await;
    let after = response_json(app.get(&format!("/orders/{number}")).await).await;

    assert_eq!(before["items"], after["items"]);
    assert_eq!(before["total_amount"], after["total_amount"]);
    assert_eq!(after["status"], "confirmed");
}

#[tokio::test]
async fn customers_cannot_change_status() {
    let app = TestApp::new().await;
    let number = app.place_order(sample_order()).await;

    let response = app
        .set_status(&number, "confirmed", &[("x-actor", "customer")])
        .await;
    assert_eq!(response.status(), 409);
    assert_eq!(response_json(response).await["code"], "illegal_transition");

    let body = response_json(app.get(&format!("/orders/{number}")).await).await;
    assert_eq!(body["status"], "pending");
}

#[tokio::test]
async fn configured_staff_token_is_required() {
    let app = TestApp::with_options(TestOptions {
        staff_token: Some("counter-secret".into()),
        ..Default::default()
    })
    .await;
    let number = app.place_order(sample_order()).await;

    assert_eq!(app.set_status(&number, "confirmed", &[]).await.status(), 409);
    assert_eq!(
        app.set_status(&number, "confirmed", &[("x-staff-token", "guess")])
            .await
            .status(),
        409
    );
    assert_eq!(
        app.set_status(&number, "confirmed", &[("x-staff-token", "counter-secret")])
            .await
            .status(),
        200
    );
}

#[tokio::test]
async fn unknown_status_and_unknown_order_are_distinguished() {
    let app = TestApp::new().await;
    let number = app.place_order(sample_order()).await;

    let response = app.set_status(&number, "shipped", &[]).await;
    assert_eq!(response.status(), 400);
    assert_eq!(response_json(response).await["code"], "validation_error");

    let response = app.set_status("T0BADBAD0", "confirmed", &[]).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn racing_updates_apply_exactly_once() {
    let app = TestApp::with_options(TestOptions {
        db_max_connections: Some(8),
        ..Default::default()
    })
    .await;
    let service = app.state.services.order_status.clone();
    let actor = Actor::Staff { staff_id: None };
    let change = || StatusChangeRequest {
        status: OrderStatus::Confirmed,
        reason: None,
    };

    let mut applied = 0;
    for _ in 0..10 {
        let number = app.place_order(sample_order()).await;

        let (a, b) = tokio::join!(
            service.transition(&number, change(), &actor),
            service.transition(&number, change(), &actor)
        );

        let mut wins = 0;
        for outcome in [a, b] {
            match outcome {
                Ok(snapshot) => {
                    assert_eq!(snapshot.status, OrderStatus::Confirmed);
                    wins += 1;
                }
                Err(err) => assert!(
                    matches!(
                        err,
                        ServiceError::IllegalTransition(_) | ServiceError::WriteContention(_)
                    ),
                    "lost race surfaced as {err:?}"
                ),
            }
        }
        assert!(wins <= 1);
        applied += wins;

        let stored = order::Entity::find()
            .filter(order::Column::OrderNumber.eq(number.as_str()))
            .one(&*app.state.db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, 1 + wins);
        let history = order_status_history::Entity::find()
            .filter(order_status_history::Column::OrderId.eq(stored.id))
            .count(&*app.state.db)
            .await
            .unwrap();
        assert_eq!(history, 1 + wins as u64);
    }
    assert!(applied > 0);
}

#[tokio::test]
async fn racing_http_updates_never_fail_with_internal_errors() {
    let app = TestApp::with_options(TestOptions {
        db_max_connections: Some(8),
        ..Default::default()
    })
    .await;

    for _ in 0..10 {
        let number = app.place_order(sample_order()).await;
        let (a, b) = tokio::join!(
            app.set_status(&number, "confirmed", &[]),
            app.set_status(&number, "confirmed", &[])
        );

        let statuses = [a.status().as_u16(), b.status().as_u16()];
        assert!(statuses.iter().filter(|s| **s == 200).count() <= 1);
        assert!(
            statuses.iter().all(|s| matches!(s, 200 | 409 | 503)),
            "{statuses:?}"
        );
    }
}

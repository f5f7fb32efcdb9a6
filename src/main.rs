use std::net::SocketAddr;

use axum::{routing, Router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wastepickup::app::AppState;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "wastepickup=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app_state = AppState::new_from_env().await.unwrap();
    app_state.run_migration().await.unwrap();

    let api = Router::new().nest(
        "/v1",
        Router::new()
            .nest(
                "/auth",
                Router::new()
                    .route("/login", routing::post(wastepickup::api::v1::auth::login))
                    .route("/logout", routing::post(wastepickup::api::v1::auth::logout))
                    .route(
                        "/register",
                        routing::post(wastepickup::api::v1::auth::register),
                    )
                    .route(
                        "/refresh",
                        routing::post(wastepickup::api::v1::auth::refresh_access_token),
                    )
                    .route(
                        "/profile",
                        routing::get(wastepickup::api::v1::auth::profile)
                            .patch(wastepickup::api::v1::auth::update_profile)
                            .delete(wastepickup::api::v1::auth::delete_account),
                    ),
            )
            .nest(
                "/requests",
                Router::new()
                    .route(
                        "/",
                        routing::get(wastepickup::api::v1::request::index)
                            .post(wastepickup::api::v1::request::create),
                    )
                    .route(
                        "/:id",
                        routing::get(wastepickup::api::v1::request::show)
                            .patch(wastepickup::api::v1::request::update),
                    ),
            )
            .route(
                "/collector",
                routing::get(wastepickup::api::v1::request::index_collector),
            )
            .nest(
                "/feedback",
                Router::new().route(
                    "/",
                    routing::get(wastepickup::api::v1::feedback::index)
                        .post(wastepickup::api::v1::feedback::create),
                ),
            )
            .nest(
                "/admin",
                Router::new()
                    .route(
                        "/assign",
                        routing::post(wastepickup::api::v1::request::assign),
                    )
                    .route(
                        "/requests",
                        routing::get(wastepickup::api::v1::request::index_all),
                    )
                    .route("/stats", routing::get(wastepickup::api::v1::request::stats))
                    .route(
                        "/users",
                        routing::get(wastepickup::api::v1::account::index)
                            .patch(wastepickup::api::v1::account::update_role),
                    )
                    .route(
                        "/collectors",
                        routing::get(wastepickup::api::v1::account::collectors),
                    ),
            ),
    );

    let app = Router::new()
        .nest("/api", api)
        .with_state(app_state)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::debug!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .unwrap();
}

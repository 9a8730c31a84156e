use axum::{routing::get, Router as AxumRouter};
use context::ServerContext;
use std::{
    env,
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
};
use syncplay_groups::SyncPlayManager;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

mod auth;
mod context;
mod docs;
mod errors;
mod logging;
mod schemas;
mod serialized;
mod syncplay;

pub use logging::init_logger;

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 9096;

type Router = AxumRouter<ServerContext>;

/// Starts the sync play server
pub async fn run_server(manager: Arc<SyncPlayManager>) {
    let context = ServerContext {
        syncplay: manager.clone(),
    };

    manager.start_sweeper();

    let port = env::var("SYNCPLAY_SERVER_PORT")
        .map(|x| x.parse::<u16>().expect("Port must be a number"))
        .unwrap_or(DEFAULT_PORT);

    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let root_router = Router::new()
        .nest("/SyncPlay", syncplay::router())
        .route("/api.json", get(docs::docs))
        .with_state(context)
        .layer(cors);

    let listener = TcpListener::bind(&addr).await.expect("listens on address");

    axum::serve(listener, root_router.into_make_service())
        .await
        .unwrap();
}

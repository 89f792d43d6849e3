#[cfg(feature = "ssr")]
#[tokio::main]
async fn main() {
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::Arc;

    use axum::{routing::get, Router};
    use campus_portal::app::backend::{AppState, Backend};
    use campus_portal::app::*;
    use campus_portal::config::PortalConfig;
    use campus_portal::fileserv::{file_and_error_handler, serve_blob};
    use leptos::leptos_config::Env;
    use leptos::*;
    use leptos_axum::{generate_route_list, LeptosRoutes};
    use tracing::info;
    use tracing_subscriber::{fmt, EnvFilter};

    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = PortalConfig::load().expect("Environment misconfigured!");

    // Setting get_configuration(None) means we'll be using cargo-leptos's env values
    // For deployment these variables are:
    // <https://github.com/leptos-rs/start-axum#executing-a-server-on-a-remote-machine-without-the-toolchain>
    let conf = get_configuration(None)
        .await
        .expect("cargo-leptos configuration");
    let mut leptos_options = conf.leptos_options;
    leptos_options.hash_files = true;
    if leptos_options.env == Env::PROD {
        // in the dockerfile, hash.txt will actually be here and not "./hash.txt'
        leptos_options.hash_file = "/app/target/release/hash.txt".to_string();
    }

    let addr = match config.port {
        Some(port) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
        None => leptos_options.site_addr,
    };
    let routes = generate_route_list(App);

    info!("Initializing backend...");
    let backend = Arc::new(
        Backend::start(&config)
            .await
            .expect("backend services to start"),
    );

    let state = AppState {
        leptos_options: leptos_options.clone(),
        backend: backend.clone(),
    };

    let app = Router::new()
        .route("/blobs/*path", get(serve_blob))
        .leptos_routes_with_context(
            &state,
            routes,
            move || {
                provide_context(backend.clone());
            },
            App,
        )
        .fallback(file_and_error_handler)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("listener to bind");
    info!("listening on http://{}", &addr);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server to run");

    info!("Server shut down");
}

#[cfg(feature = "ssr")]
async fn shutdown_signal() {
    use tokio::signal;
    use tracing::info;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(not(feature = "ssr"))]
pub fn main() {
    // no client-side main function
    // unless we want this to work with e.g., Trunk for a purely client-side app
    // see lib.rs for hydration function instead
}

use axum::Router;
use axum_embed::{FallbackBehavior, ServeEmbed};
use rust_embed::RustEmbed;

/// The viewer page. Plain HTML, nothing to build.
#[derive(RustEmbed, Clone)]
#[folder = "app/"]
struct AppAssets;

/// Serves the embedded viewer page, at `prefix` or at the root when `None`.
/// Unknown paths fall back to `index.html`.
pub fn app_router(prefix: Option<&str>) -> Router {
    let serve_assets = ServeEmbed::<AppAssets>::with_parameters(
        Some("index.html".to_string()),
        FallbackBehavior::Ok,
        Some("index.html".to_string()),
    );

    match prefix {
        Some(prefix) => Router::new().nest_service(prefix, serve_assets),
        None => Router::new().fallback_service(serve_assets),
    }
}

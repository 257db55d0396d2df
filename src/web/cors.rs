use actix_cors::Cors;
use log::{info, warn};

/// Browser access policy for the API. Listed origins may call any route
/// with credentials; a single `*` entry opens it to every origin.
pub fn build_cors(origins: &[String]) -> Cors {
    let cors = Cors::default()
        .allow_any_method()
        .allow_any_header()
        .supports_credentials()
        .max_age(3600);

    if origins.iter().any(|origin| origin == "*") {
        warn!("CORS allows any origin");
        return cors.allow_any_origin();
    }

    info!("CORS allowed origins: {}", origins.join(", "));
    origins
        .iter()
        .fold(cors, |cors, origin| cors.allowed_origin(origin))
}

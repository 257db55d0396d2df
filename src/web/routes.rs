use actix_web::web;
use crate::web::handlers;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/chat", web::post().to(handlers::chat))
        .service(
            web::scope("/sessions")
                .route("", web::post().to(handlers::create_session))
                .route("", web::get().to(handlers::list_sessions))
                .route("/list", web::get().to(handlers::list_sessions))
                .service(
                    web::resource("/{id}")
                        .route(web::get().to(handlers::get_session))
                        .route(web::patch().to(handlers::update_session))
                        .route(web::delete().to(handlers::delete_session)),
                )
                .service(
                    web::resource("/{id}/messages")
                        .route(web::post().to(handlers::create_message))
                        .route(web::get().to(handlers::list_messages)),
                ),
        )
        .route("/health", web::get().to(handlers::health_check));
}

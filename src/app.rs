//! app.rs
use crate::handlers::tracking_handler;
use actix_web::web;

pub fn init_app(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(tracking_handler::index_endpoint))
        .route(
            "/newsletter-image/{send_record_id}",
            web::get().to(tracking_handler::newsletter_image_endpoint),
        )
        .route(
            "/link/{link_click_id}",
            web::get().to(tracking_handler::link_redirect_endpoint),
        );
}

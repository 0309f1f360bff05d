//! handlers/tracking_handler.rs
//! Pixel de apertura y redirect de links.

use actix_web::{http::header, web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::services::tracking_service::{TrackingError, TrackingService};

/// GIF transparente de 1x1
pub const TRACKING_PIXEL_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// GET /
pub async fn index_endpoint() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "message": "Newsletter service"
    }))
}

/// GET /newsletter-image/{send_record_id}
/// Siempre devuelve el pixel, resuelva o no el id.
pub async fn newsletter_image_endpoint(
    tracking_service: web::Data<TrackingService>,
    path: web::Path<String>,
) -> HttpResponse {
    let send_record_id = path.into_inner();
    log::debug!("Apertura registrada para sent_email {}", send_record_id);

    match tracking_service.record_open(&send_record_id).await {
        Ok(0) => log::debug!("sent_email {} no existe", send_record_id),
        Ok(_) => {}
        Err(e) => log::error!("Error updating email status: {:?}", e),
    }

    HttpResponse::Ok()
        .content_type("image/gif")
        .append_header((header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"))
        .append_header((header::PRAGMA, "no-cache"))
        .body(TRACKING_PIXEL_GIF)
}

/// GET /link/{link_click_id}
pub async fn link_redirect_endpoint(
    tracking_service: web::Data<TrackingService>,
    path: web::Path<String>,
    req: HttpRequest,
) -> HttpResponse {
    let link_click_id = path.into_inner();
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());

    match tracking_service
        .resolve_link(&link_click_id, user_agent)
        .await
    {
        Ok(destination) => HttpResponse::Found()
            .append_header((header::LOCATION, destination))
            .finish(),
        Err(e) => {
            match &e {
                TrackingError::NotFound => log::warn!("Link {} no encontrado", link_click_id),
                other => log::error!("Error redirecting link {}: {:?}", link_click_id, other),
            }
            HttpResponse::NotFound().body("Not Found")
        }
    }
}

//! Runtime settings: window quota, verification API key, card fields.

use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub verification_api_key: String,
    pub card_number: String,
    pub card_exp_month: String,
    pub card_exp_year: String,
    pub card_cvv: String,
    pub card_zip: String,
    pub window_limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct SettingsUpdate {
    pub verification_api_key: Option<String>,
    pub card_number: Option<String>,
    pub card_exp_month: Option<String>,
    pub card_exp_year: Option<String>,
    pub card_cvv: Option<String>,
    pub card_zip: Option<String>,
    pub window_limit: Option<usize>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/settings")
            .route(web::get().to(get_settings))
            .route(web::put().to(update_settings)),
    );
}

async fn get_settings(data: web::Data<AppState>) -> impl Responder {
    let card = data.db.card_info();
    HttpResponse::Ok().json(SettingsResponse {
        verification_api_key: data.db.verification_api_key(),
        card_number: card.number,
        card_exp_month: card.exp_month,
        card_exp_year: card.exp_year,
        card_cvv: card.cvv,
        card_zip: card.zip,
        window_limit: data.db.window_limit(),
    })
}

async fn update_settings(
    data: web::Data<AppState>,
    body: web::Json<SettingsUpdate>,
) -> impl Responder {
    let body = body.into_inner();
    let mut updated = Vec::new();

    let pairs = [
        ("verification_api_key", body.verification_api_key),
        ("card_number", body.card_number),
        ("card_exp_month", body.card_exp_month),
        ("card_exp_year", body.card_exp_year),
        ("card_cvv", body.card_cvv),
        ("card_zip", body.card_zip),
        ("window_limit", body.window_limit.map(|v| v.to_string())),
    ];

    for (key, value) in pairs {
        if let Some(value) = value {
            if let Err(e) = data.db.set_setting(key, &value) {
                log::error!("Failed to update setting {}: {}", key, e);
                return HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": format!("Database error: {}", e)
                }));
            }
            updated.push(key);
        }
    }

    HttpResponse::Ok().json(serde_json::json!({
        "message": "Settings updated",
        "updated": updated,
    }))
}

//! Account store CRUD.

use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;

use crate::db::AccountUpdate;
use crate::models::AccountStatus;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AccountUpsertRequest {
    pub email: String,
    pub password: Option<String>,
    pub recovery_email: Option<String>,
    pub secret_key: Option<String>,
    pub status: Option<AccountStatus>,
    pub message: Option<String>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/accounts")
            .route(web::get().to(list_accounts))
            .route(web::post().to(upsert_account)),
    );
    cfg.service(
        web::resource("/api/accounts/{email}")
            .route(web::get().to(get_account))
            .route(web::delete().to(delete_account)),
    );
}

async fn list_accounts(data: web::Data<AppState>) -> impl Responder {
    match data.db.list_accounts() {
        Ok(items) => HttpResponse::Ok().json(serde_json::json!({
            "total": items.len(),
            "items": items,
        })),
        Err(e) => {
            log::error!("Failed to list accounts: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("Database error: {}", e)
            }))
        }
    }
}

async fn get_account(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match data.db.get_account(&path.into_inner()) {
        Ok(Some(account)) => HttpResponse::Ok().json(account),
        Ok(None) => HttpResponse::NotFound().json(serde_json::json!({
            "error": "Account not found"
        })),
        Err(e) => {
            log::error!("Failed to load account: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("Database error: {}", e)
            }))
        }
    }
}

async fn upsert_account(
    data: web::Data<AppState>,
    body: web::Json<AccountUpsertRequest>,
) -> impl Responder {
    let body = body.into_inner();
    if body.email.trim().is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "Email is required"
        }));
    }

    let update = AccountUpdate {
        password: body.password,
        recovery_email: body.recovery_email,
        secret_key: body.secret_key,
        verification_link: None,
        status: body.status,
        message: body.message,
    };

    match data.db.upsert_account(&body.email, update) {
        Ok(()) => match data.db.get_account(&body.email) {
            Ok(Some(account)) => HttpResponse::Ok().json(account),
            _ => HttpResponse::Ok().json(serde_json::json!({ "message": "Account saved" })),
        },
        Err(e) => {
            log::error!("Failed to upsert account: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("Database error: {}", e)
            }))
        }
    }
}

async fn delete_account(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match data.db.delete_account(&path.into_inner()) {
        Ok(true) => HttpResponse::Ok().json(serde_json::json!({ "message": "Account deleted" })),
        Ok(false) => HttpResponse::NotFound().json(serde_json::json!({
            "error": "Account not found"
        })),
        Err(e) => {
            log::error!("Failed to delete account: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("Database error: {}", e)
            }))
        }
    }
}

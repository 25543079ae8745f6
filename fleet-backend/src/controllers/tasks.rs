//! Task submission boundary: create, list, inspect, cancel.

use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use uuid::Uuid;

use crate::models::WorkflowKind;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TaskCreateRequest {
    pub task_types: Vec<WorkflowKind>,
    pub emails: Vec<String>,
    #[serde(default)]
    pub close_after: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    1
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/tasks")
            .route(web::post().to(create_task))
            .route(web::get().to(list_tasks)),
    );
    cfg.service(
        web::resource("/api/tasks/{task_id}")
            .route(web::get().to(get_task))
            .route(web::delete().to(cancel_task)),
    );
}

/// Create a task and start executing it in the background.
async fn create_task(
    data: web::Data<AppState>,
    body: web::Json<TaskCreateRequest>,
) -> impl Responder {
    let body = body.into_inner();

    if body.emails.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "Select at least one account"
        }));
    }
    if body.task_types.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "Select at least one workflow type"
        }));
    }

    // Short ids are plenty at this scale and keep log lines readable.
    let task_id = Uuid::new_v4().simple().to_string()[..8].to_string();
    let display = body.task_types[0];

    data.tracker.register(&task_id, display, body.emails.len());

    let engine = data.engine.clone();
    tokio::spawn(engine.run(
        task_id.clone(),
        body.task_types,
        body.emails,
        body.close_after,
        body.concurrency,
    ));

    log::info!("[TASKS] Task {} created", task_id);
    HttpResponse::Ok().json(serde_json::json!({
        "task_id": task_id,
        "message": "Task created"
    }))
}

/// List all known tasks. Each listing sweeps expired entries first.
async fn list_tasks(data: web::Data<AppState>) -> impl Responder {
    data.tracker.cleanup();
    HttpResponse::Ok().json(data.tracker.list())
}

async fn get_task(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let task_id = path.into_inner();
    match data.tracker.get(&task_id) {
        Some(progress) => HttpResponse::Ok().json(progress),
        None => HttpResponse::NotFound().json(serde_json::json!({
            "error": "Task not found"
        })),
    }
}

/// Best-effort cancel: flips the stored status; in-flight workers run to
/// completion.
async fn cancel_task(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let task_id = path.into_inner();
    if data.tracker.cancel(&task_id) {
        log::info!("[TASKS] Task {} marked as cancelled", task_id);
        HttpResponse::Ok().json(serde_json::json!({
            "message": "Task marked as cancelled"
        }))
    } else {
        HttpResponse::NotFound().json(serde_json::json!({
            "error": "Task not found"
        }))
    }
}

use std::time::Duration;

use actix_web::{
    error, get,
    http::header::{ContentDisposition, DispositionParam, DispositionType},
    middleware::Logger,
    post, web, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::AppError;
use crate::models::{GenerationRequest, Job, StatusView};
use crate::processor::Simulator;
use crate::service;
use crate::store::JobStore;

pub struct AppState {
    store: JobStore,
    simulator: Simulator,
    expire_completed_jobs_after: Duration,
}

impl AppState {
    pub fn new(simulator: Simulator, expire_completed_jobs_after: Duration) -> Self {
        AppState {
            store: simulator.store().clone(),
            simulator,
            expire_completed_jobs_after,
        }
    }

    fn evict_expired(&self) {
        for id in self
            .store
            .evict_expired(Utc::now(), self.expire_completed_jobs_after)
        {
            log::info!("[{}] expired, removed from store", id);
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct JobsResponse {
    pub jobs: Vec<StatusView>,
}

#[post("/generate")]
async fn generate(
    data: web::Data<AppState>,
    request: web::Json<GenerationRequest>,
) -> Result<impl Responder, AppError> {
    data.evict_expired();

    let handle = data.simulator.create(&request)?;

    Ok(HttpResponse::Ok().json(handle))
}

#[get("/status/{job_id}")]
async fn status(
    data: web::Data<AppState>,
    job_id: web::Path<String>,
) -> Result<web::Json<StatusView>, AppError> {
    Ok(web::Json(service::get_status(&data.store, &job_id)?))
}

#[get("/download/{job_id}")]
async fn download(
    data: web::Data<AppState>,
    job_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let artifact = service::download(&data.store, &job_id)?;

    log::info!("[{}] serving {}", job_id, artifact.filename);

    Ok(HttpResponse::Ok()
        .content_type(artifact.content_type)
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(artifact.filename)],
        })
        .body(artifact.bytes))
}

#[get("/jobs")]
async fn list_jobs(data: web::Data<AppState>) -> impl Responder {
    data.evict_expired();

    web::Json(JobsResponse {
        jobs: data.store.list().iter().map(Job::status_view).collect(),
    })
}

fn json_error_handler(err: error::JsonPayloadError, _req: &HttpRequest) -> error::Error {
    AppError::Validation(format!("Invalid request body: {err}")).into()
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .service(generate)
        .service(status)
        .service(download)
        .service(list_jobs);
}

pub async fn start_web_server(config: &Config, simulator: Simulator) -> std::io::Result<()> {
    let app_state = web::Data::new(AppState::new(
        simulator,
        config.expire_completed_jobs_after,
    ));
    let port = config.port;

    log::info!("Starting web server at 0.0.0.0:{port}...");

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(app_state.clone())
            .configure(configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

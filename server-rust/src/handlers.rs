//! HTTP API handlers.
//!
//! Every operation is plain request/response JSON; errors leave through
//! [`ApiError`]'s status mapping. Handlers stay thin — the stores and the
//! dispatcher own the behavior.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use aoi_types::{
    group_rois, CloseSessionResponse, CreateProductRequest, CreateProductResponse,
    CreateSessionRequest, CreateSessionResponse, GetRoisResponse, GoldenSamplesResponse,
    InspectRequest, InspectResponse, ListProductsResponse, RestoreGoldenRequest, Roi, RoiGroup,
    RoiGroupsResponse, SaveGoldenRequest, SaveRoisRequest, SaveRoisResponse,
};

use crate::error::ApiError;
use crate::state::SharedAppState;
use crate::{aggregate, dispatch};

pub fn router(state: SharedAppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/products", get(list_products).post(create_product))
        .route("/api/products/:name/rois", get(get_rois).put(save_rois))
        .route("/api/products/:name/roi-groups", get(get_roi_groups))
        .route(
            "/api/golden-samples/:name/:roi_id",
            get(list_golden_samples).post(save_golden_sample),
        )
        .route("/api/golden-samples/:name/:roi_id/restore", post(restore_golden_sample))
        .route(
            "/api/golden-samples/:name/:roi_id/download/:filename",
            get(download_golden_sample),
        )
        .route("/api/session", post(create_session))
        .route("/api/session/:id/close", post(close_session))
        .route("/api/inspect", post(inspect))
        .with_state(state)
}

// ── Health ────────────────────────────────────────────────────────────────────

async fn health(State(state): State<SharedAppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.uptime_secs(),
    }))
}

// ── Products & ROI configuration ──────────────────────────────────────────────

async fn list_products(
    State(state): State<SharedAppState>,
) -> Result<Json<ListProductsResponse>, ApiError> {
    let products = state.products.list().await?;
    Ok(Json(ListProductsResponse { products }))
}

async fn create_product(
    State(state): State<SharedAppState>,
    Json(req): Json<CreateProductRequest>,
) -> Result<Json<CreateProductResponse>, ApiError> {
    state
        .products
        .create(&req.product_name, &req.description, req.device_count)
        .await?;
    Ok(Json(CreateProductResponse { product_name: req.product_name }))
}

async fn get_rois(
    State(state): State<SharedAppState>,
    Path(name): Path<String>,
) -> Result<Json<GetRoisResponse>, ApiError> {
    let rois = state.products.get_rois(&name).await?;
    Ok(Json(GetRoisResponse {
        rois: rois.iter().map(Roi::to_server).collect(),
    }))
}

async fn save_rois(
    State(state): State<SharedAppState>,
    Path(name): Path<String>,
    Json(req): Json<SaveRoisRequest>,
) -> Result<Json<SaveRoisResponse>, ApiError> {
    let count = state.products.save_rois(&name, &req.rois).await?;
    Ok(Json(SaveRoisResponse {
        message: format!("saved {count} ROI(s) for {name}"),
        count,
    }))
}

async fn get_roi_groups(
    State(state): State<SharedAppState>,
    Path(name): Path<String>,
) -> Result<Json<RoiGroupsResponse>, ApiError> {
    let rois = state.products.get_rois(&name).await?;
    let roi_groups = group_rois(&rois)
        .into_iter()
        .map(|(key, (focus, exposure), members)| RoiGroup {
            key,
            focus,
            exposure,
            rois: members.iter().map(Roi::to_server).collect(),
        })
        .collect();
    Ok(Json(RoiGroupsResponse { roi_groups }))
}

// ── Golden samples ────────────────────────────────────────────────────────────

async fn list_golden_samples(
    State(state): State<SharedAppState>,
    Path((name, roi_id)): Path<(String, i64)>,
) -> Result<Json<GoldenSamplesResponse>, ApiError> {
    if !state.products.exists(&name).await {
        return Err(ApiError::not_found(format!("product {name}")));
    }
    let golden = state.golden.clone();
    let golden_samples =
        tokio::task::spawn_blocking(move || golden.sample_infos(&name, roi_id))
            .await
            .map_err(|e| ApiError::internal(format!("golden listing failed: {e}")))?;
    Ok(Json(GoldenSamplesResponse { golden_samples }))
}

async fn save_golden_sample(
    State(state): State<SharedAppState>,
    Path((name, roi_id)): Path<(String, i64)>,
    Json(req): Json<SaveGoldenRequest>,
) -> Result<Json<Value>, ApiError> {
    if !state.products.exists(&name).await {
        return Err(ApiError::not_found(format!("product {name}")));
    }
    let source = state.shared.safe_join(&req.image_path)?;
    let golden = state.golden.clone();
    let saved = tokio::task::spawn_blocking(move || -> Result<std::path::PathBuf, ApiError> {
        let img = crate::vision::load_rgb(&source)
            .map_err(|e| ApiError::invalid(format!("cannot read {}: {e}", source.display())))?;
        let img = match req.coords {
            Some(coords) => crate::vision::crop(&img, aoi_types::RoiRect::from_array(coords))
                .ok_or_else(|| ApiError::invalid("coords crop an empty region"))?,
            None => img,
        };
        golden.save_initial(&name, roi_id, &img)
    })
    .await
    .map_err(|e| ApiError::internal(format!("golden save failed: {e}")))??;
    Ok(Json(json!({
        "message": "golden sample saved",
        "file_path": saved.to_string_lossy(),
    })))
}

async fn download_golden_sample(
    State(state): State<SharedAppState>,
    Path((name, roi_id, filename)): Path<(String, i64, String)>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return Err(ApiError::invalid(format!("unsafe golden filename {filename:?}")));
    }
    if !state.products.exists(&name).await {
        return Err(ApiError::not_found(format!("product {name}")));
    }
    let path = state.golden.roi_dir(&name, roi_id).join(&filename);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::not_found(format!("golden sample {filename}")))?;
    Ok((
        [(axum::http::header::CONTENT_TYPE, "image/jpeg")],
        bytes,
    ))
}

async fn restore_golden_sample(
    State(state): State<SharedAppState>,
    Path((name, roi_id)): Path<(String, i64)>,
    Json(req): Json<RestoreGoldenRequest>,
) -> Result<Json<Value>, ApiError> {
    if !state.products.exists(&name).await {
        return Err(ApiError::not_found(format!("product {name}")));
    }
    let golden = state.golden.clone();
    let filename = req.filename.clone();
    tokio::task::spawn_blocking(move || golden.restore(&name, roi_id, &req.filename))
        .await
        .map_err(|e| ApiError::internal(format!("golden restore failed: {e}")))??;
    Ok(Json(json!({ "message": format!("restored {}", filename) })))
}

// ── Sessions ──────────────────────────────────────────────────────────────────

async fn create_session(
    State(state): State<SharedAppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let rois = state.products.get_rois(&req.product_name).await?;
    let session = state.sessions.create(&req.product_name, &req.client_info).await?;
    Ok(Json(CreateSessionResponse {
        session_id: session.session_id,
        roi_groups_count: group_rois(&rois).len(),
        devices_need_barcode: aoi_types::devices_needing_barcode(&rois),
    }))
}

async fn close_session(
    State(state): State<SharedAppState>,
    Path(id): Path<String>,
) -> Result<Json<CloseSessionResponse>, ApiError> {
    state.sessions.close(&id).await?;
    Ok(Json(CloseSessionResponse { status: "closed".to_string() }))
}

// ── Inspection ────────────────────────────────────────────────────────────────

async fn inspect(
    State(state): State<SharedAppState>,
    Json(req): Json<InspectRequest>,
) -> Result<Json<InspectResponse>, ApiError> {
    let session = state.sessions.active(&req.session_id).await?;
    if !state.products.exists(&req.product).await {
        return Err(ApiError::not_found(format!("product {}", req.product)));
    }
    if session.product != req.product {
        warn!(
            "session {} was created for {:?} but inspects {:?}",
            session.session_id, session.product, req.product
        );
    }

    let started = Instant::now();
    info!(
        "inspect: session {} product {:?}, {} group(s)",
        session.session_id,
        req.product,
        req.captured_images.len()
    );

    let results =
        dispatch::process_groups(&state, &session.session_id, &req.product, &req.captured_images)
            .await;

    let entries =
        aggregate::effective_barcodes(req.device_barcodes.as_deref(), &session.device_barcodes);
    let (device_summaries, summary) = aggregate::aggregate(results, &entries, &state.linker).await;

    // Explicit non-empty overrides persist for the next cycle; an empty
    // override suppresses the cache for this inspection only.
    if let Some(provided) = &req.device_barcodes {
        if !provided.is_empty() {
            state
                .sessions
                .cache_device_barcodes(&session.session_id, provided)
                .await;
        }
    }

    let processing_time = started.elapsed().as_secs_f64();
    let response = InspectResponse {
        device_summaries,
        summary,
        capture_time: req.capture_time,
        processing_time,
        total_time: req.capture_time + processing_time,
        timestamp: Utc::now().to_rfc3339(),
    };

    let results_path = state.shared.output_dir(&session.session_id).join("results.json");
    match serde_json::to_string_pretty(&response) {
        Ok(payload) => {
            if let Err(e) = tokio::fs::write(&results_path, payload).await {
                warn!("failed to write {}: {e}", results_path.display());
            }
        }
        Err(e) => warn!("failed to serialize results.json: {e}"),
    }

    info!(
        "inspect: session {} -> {:?} ({}/{} devices passed, {:.2}s)",
        session.session_id,
        response.summary.overall_result,
        response.summary.pass_count,
        response.summary.total_devices,
        processing_time,
    );
    Ok(Json(response))
}

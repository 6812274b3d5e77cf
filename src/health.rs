//! Health and metrics endpoints.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = &state.config;
    let settings = state.transcriber.settings();

    let engine = match state.transcriber.loaded() {
        Some(handle) => json!({
            "model": handle.model.to_string(),
            "status": "loaded",
            "device": handle.device,
            "device_name": handle.device_name,
        }),
        None => json!({
            "model": settings.model.to_string(),
            "status": "not_loaded",
            "device": null,
            "device_name": null,
        }),
    };

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate()
        },
        "memory": get_memory_info(),
        "models": {
            "whisper": engine,
            "language": settings.language,
            "translate": config.models.translate
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "transcriptions": metrics.transcriptions,
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "performance": {
            "max_concurrent_transcriptions": state.config.performance.max_concurrent_transcriptions,
            "max_file_size_bytes": state.config.upload.max_file_size_bytes
        }
    }))
}

#[cfg(target_os = "linux")]
fn get_memory_info() -> serde_json::Value {
    let status = match std::fs::read_to_string(format!("/proc/{}/status", std::process::id())) {
        Ok(status) => status,
        Err(_) => return memory_unavailable("Could not read /proc status"),
    };

    let read_kb = |prefix: &str| {
        status
            .lines()
            .find(|line| line.starts_with(prefix))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .unwrap_or(0)
            * 1024
    };

    json!({
        "resident_memory_bytes": read_kb("VmRSS:"),
        "virtual_memory_bytes": read_kb("VmSize:"),
        "available": true
    })
}

#[cfg(not(target_os = "linux"))]
fn get_memory_info() -> serde_json::Value {
    memory_unavailable("Memory info not available on this platform")
}

fn memory_unavailable(note: &str) -> serde_json::Value {
    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": note
    })
}

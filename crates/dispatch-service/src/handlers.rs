//! Demo handlers: simulated email, AI inference, and data-cleaning jobs.
//! Each accepts `simulate_failure: true` in its payload to exercise the
//! retry path without touching real infrastructure.

use anyhow::{bail, Result};
use serde_json::{json, Value};

pub async fn handle_email(payload: Value) -> Result<Value> {
    let to = payload["to"].as_str().unwrap_or("unknown@example.com").to_string();
    let subject = payload["subject"].as_str().unwrap_or("No Subject").to_string();
    let body = payload["body"].as_str().unwrap_or("");

    tracing::info!(%to, %subject, "sending email");
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    if payload["simulate_failure"].as_bool().unwrap_or(false) {
        bail!("SMTP connection refused (simulated)");
    }

    Ok(json!({
        "status": "sent",
        "to": to,
        "subject": subject,
        "message_id": format!("msg-{}", uuid::Uuid::new_v4().simple()),
        "characters": body.len(),
    }))
}

pub async fn handle_ai_task(payload: Value) -> Result<Value> {
    let task_type = payload["task"].as_str().unwrap_or("classification").to_string();
    let input_text = payload["input"].as_str().unwrap_or("");

    tracing::info!(task = %task_type, input_len = input_text.len(), "running ai task");
    let processing_secs = (0.3 + input_text.len() as f64 * 0.001).min(5.0);
    tokio::time::sleep(std::time::Duration::from_secs_f64(processing_secs)).await;

    if payload["simulate_failure"].as_bool().unwrap_or(false) {
        bail!("model inference timeout (simulated)");
    }

    let result = match task_type.as_str() {
        "summarization" => {
            let summary = if input_text.chars().count() > 100 {
                format!("{}...", input_text.chars().take(100).collect::<String>())
            } else {
                input_text.to_string()
            };
            json!({ "summary": summary, "compression_ratio": 0.3 })
        }
        _ => json!({
            "label": ["positive", "negative", "neutral"][fastrand::usize(..3)],
            "confidence": ((0.7 + fastrand::f64() * 0.29) * 1000.0).round() / 1000.0,
        }),
    };

    Ok(json!({
        "task_type": task_type,
        "processing_time_sec": (processing_secs * 100.0).round() / 100.0,
        "result": result,
    }))
}

pub async fn handle_data_cleaning(payload: Value) -> Result<Value> {
    let source = payload["source"].as_str().unwrap_or("unknown").to_string();
    let row_count = payload["row_count"].as_i64().unwrap_or(1000);
    let operations: Vec<String> = payload["operations"]
        .as_array()
        .map(|ops| ops.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_else(|| vec!["dedup".into(), "normalize".into(), "validate".into()]);

    tracing::info!(%source, row_count, ?operations, "cleaning data");
    tokio::time::sleep(std::time::Duration::from_secs_f64(0.2 + row_count as f64 * 0.0001)).await;

    if payload["simulate_failure"].as_bool().unwrap_or(false) {
        bail!("data source connection lost (simulated)");
    }

    let survival = 0.85 + fastrand::f64() * 0.14;
    let cleaned = (row_count as f64 * survival) as i64;
    let removed = row_count - cleaned;

    Ok(json!({
        "source": source,
        "original_rows": row_count,
        "cleaned_rows": cleaned,
        "removed_rows": removed,
        "operations_applied": operations,
        "quality_score": ((0.90 + fastrand::f64() * 0.10) * 1000.0).round() / 1000.0,
    }))
}

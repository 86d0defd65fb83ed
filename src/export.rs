use crate::config::Config;
use crate::cursor::CursorStore;
use crate::notehub::{fetch_device_events, EventSource};
use crate::schema;
use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::Path;

#[derive(Debug, Default)]
pub struct ExportSummary {
    pub devices_ok: usize,
    pub devices_failed: usize,
    pub rows_written: usize,
    pub pages_read: u32,
}

/// Fetches every configured device concurrently, checkpoints each device's
/// cursor as soon as its fetch completes, then writes the combined dataset in
/// one pass.
///
/// All fetch futures are polled on the current task, so the cursor store and
/// the row accumulator are only ever touched from the completion loop below.
/// One device failing leaves the others' rows and checkpoints intact.
pub async fn run_export<S: EventSource>(
    config: &Config,
    source: &S,
    store: &mut CursorStore,
) -> Result<ExportSummary> {
    let mut tasks = FuturesUnordered::new();
    for device_uid in &config.device_uids {
        let start_cursor = store.get(device_uid).map(str::to_string);
        tasks.push(async move {
            let result = fetch_device_events(
                source,
                device_uid,
                start_cursor.as_deref(),
                config.page_limit,
                config.max_pages_per_device,
            )
            .await;
            (device_uid.as_str(), result)
        });
    }

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut summary = ExportSummary::default();
    while let Some((device_uid, result)) = tasks.next().await {
        match result {
            Ok(fetch) => {
                if let Some(cursor) = fetch.final_cursor.as_deref() {
                    store
                        .set_and_persist(device_uid, cursor)
                        .with_context(|| format!("persist cursor for {device_uid}"))?;
                }
                tracing::info!(
                    device = device_uid,
                    events = fetch.events_read,
                    pages = fetch.pages_read,
                    cursor = fetch.final_cursor.as_deref().unwrap_or(""),
                    "device fetch complete"
                );
                summary.devices_ok += 1;
                summary.pages_read += fetch.pages_read;
                rows.extend(fetch.rows);
            }
            Err(err) => {
                tracing::warn!(device = device_uid, error = %err, "device fetch failed; cursor unchanged");
                summary.devices_failed += 1;
            }
        }
    }

    summary.rows_written = rows.len();
    write_csv(&config.output_path, &rows)
        .with_context(|| format!("write {}", config.output_path.display()))?;

    if summary.devices_ok == 0 && summary.devices_failed > 0 {
        anyhow::bail!(
            "all {} devices failed; nothing exported",
            summary.devices_failed
        );
    }

    Ok(summary)
}

fn write_csv(path: &Path, rows: &[Vec<String>]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(schema::header())?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

use crate::config::Config;
use crate::schema;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// One page of the project event stream plus continuation metadata. Terminal
/// responses may omit `has_more`/`next_cursor` entirely, which deserializes to
/// the terminal defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPage {
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Seam over the remote event source so the pagination loop and orchestrator
/// can run against a scripted source in tests.
#[allow(async_fn_in_trait)]
pub trait EventSource {
    async fn events_page(
        &self,
        device_uid: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<EventPage>;
}

pub struct NotehubClient {
    http: reqwest::Client,
    base_url: String,
    project_uid: String,
    token: String,
    event_files: String,
}

impl NotehubClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            base_url: config.api_base_url.clone(),
            project_uid: config.project_uid.clone(),
            token: config.api_token.clone(),
            event_files: config.event_files.clone(),
        })
    }
}

impl EventSource for NotehubClient {
    async fn events_page(
        &self,
        device_uid: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<EventPage> {
        let url = format!(
            "{}/projects/{}/events-cursor",
            self.base_url, self.project_uid
        );
        let limit = limit.to_string();
        let response = self
            .http
            .get(url)
            .header("X-Session-Token", &self.token)
            .query(&[
                ("deviceUID", device_uid),
                ("cursor", cursor.unwrap_or("")),
                ("limit", limit.as_str()),
                ("sortOrder", "asc"),
                ("files", self.event_files.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("events request failed for {device_uid}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("notehub error ({status}): {body}");
        }

        response
            .json::<EventPage>()
            .await
            .with_context(|| format!("decode events page for {device_uid}"))
    }
}

#[derive(Debug)]
pub struct DeviceFetch {
    pub rows: Vec<Vec<String>>,
    pub final_cursor: Option<String>,
    pub pages_read: u32,
    pub events_read: usize,
}

/// Pages through one device's event stream from `start_cursor`, encoding each
/// page as it arrives, until the source reports no more data or `max_pages`
/// requests have been made.
///
/// The returned cursor is the id of the last event seen this cycle; a cycle
/// that yields zero events leaves the device's prior cursor in place rather
/// than resetting it to the beginning of the stream.
pub async fn fetch_device_events<S: EventSource>(
    source: &S,
    device_uid: &str,
    start_cursor: Option<&str>,
    page_limit: u32,
    max_pages: u32,
) -> Result<DeviceFetch> {
    let mut cursor = start_cursor.map(str::to_string);
    let mut final_cursor = cursor.clone();
    let mut rows = Vec::new();
    let mut pages_read = 0u32;
    let mut events_read = 0usize;

    while pages_read < max_pages {
        let page = source
            .events_page(device_uid, cursor.as_deref(), page_limit)
            .await?;
        pages_read += 1;

        if let Some(id) = page
            .events
            .last()
            .and_then(|event| event.get("event"))
            .and_then(Value::as_str)
        {
            final_cursor = Some(id.to_string());
        }
        events_read += page.events.len();
        rows.extend(schema::encode(&page.events));

        let next = page
            .next_cursor
            .as_deref()
            .map(str::trim)
            .filter(|next| !next.is_empty());
        match next {
            Some(next) if page.has_more => cursor = Some(next.to_string()),
            _ => break,
        }
    }

    Ok(DeviceFetch {
        rows,
        final_cursor,
        pages_read,
        events_read,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn event(id: &str) -> Value {
        json!({"event": id, "device": "dev:1", "when": 1700000000, "body": {"aqi": 10}})
    }

    fn page(ids: &[&str], has_more: bool, next_cursor: Option<&str>) -> EventPage {
        EventPage {
            events: ids.iter().map(|id| event(id)).collect(),
            has_more,
            next_cursor: next_cursor.map(str::to_string),
        }
    }

    /// Replays a fixed page sequence, recording the cursor of each request.
    struct ScriptedSource {
        pages: Mutex<VecDeque<EventPage>>,
        cursors_seen: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<EventPage>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                cursors_seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl EventSource for ScriptedSource {
        async fn events_page(
            &self,
            _device_uid: &str,
            cursor: Option<&str>,
            _limit: u32,
        ) -> Result<EventPage> {
            self.cursors_seen
                .lock()
                .unwrap()
                .push(cursor.map(str::to_string));
            Ok(self
                .pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }
    }

    /// Never runs dry; every page advances the cursor and reports more data.
    struct EndlessSource {
        calls: AtomicU32,
    }

    impl EventSource for EndlessSource {
        async fn events_page(
            &self,
            _device_uid: &str,
            _cursor: Option<&str>,
            _limit: u32,
        ) -> Result<EventPage> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let first = format!("evt-{n}a");
            let second = format!("evt-{n}b");
            let next = format!("cur-{}", n + 1);
            Ok(page(
                &[first.as_str(), second.as_str()],
                true,
                Some(next.as_str()),
            ))
        }
    }

    #[tokio::test]
    async fn follows_next_cursor_until_terminal_page() -> Result<()> {
        let source = ScriptedSource::new(vec![
            page(&["evt-1", "evt-2"], true, Some("cur-2")),
            page(&["evt-3"], false, None),
        ]);

        let fetch = fetch_device_events(&source, "dev:1", None, 100, 20).await?;

        assert_eq!(fetch.pages_read, 2);
        assert_eq!(fetch.events_read, 3);
        assert_eq!(fetch.rows.len(), 3);
        assert_eq!(fetch.final_cursor.as_deref(), Some("evt-3"));

        let cursors = source.cursors_seen.lock().unwrap();
        assert_eq!(*cursors, vec![None, Some("cur-2".to_string())]);
        Ok(())
    }

    #[tokio::test]
    async fn page_cap_bounds_requests() -> Result<()> {
        let source = EndlessSource {
            calls: AtomicU32::new(0),
        };

        let fetch = fetch_device_events(&source, "dev:1", None, 2, 3).await?;

        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fetch.pages_read, 3);
        assert_eq!(fetch.rows.len(), 6);
        assert_eq!(fetch.final_cursor.as_deref(), Some("evt-2b"));
        Ok(())
    }

    #[tokio::test]
    async fn has_more_without_next_cursor_is_terminal() -> Result<()> {
        let source = ScriptedSource::new(vec![page(&["evt-1"], true, Some("  "))]);

        let fetch = fetch_device_events(&source, "dev:1", None, 100, 20).await?;

        assert_eq!(fetch.pages_read, 1);
        assert_eq!(fetch.final_cursor.as_deref(), Some("evt-1"));
        Ok(())
    }

    #[tokio::test]
    async fn empty_cycle_preserves_prior_cursor() -> Result<()> {
        let source = ScriptedSource::new(vec![page(&[], false, None)]);
        let fetch = fetch_device_events(&source, "dev:1", Some("evt-9"), 100, 20).await?;

        assert_eq!(fetch.rows.len(), 0);
        assert_eq!(fetch.final_cursor.as_deref(), Some("evt-9"));

        let source = ScriptedSource::new(vec![page(&[], false, None)]);
        let fetch = fetch_device_events(&source, "dev:1", None, 100, 20).await?;
        assert_eq!(fetch.final_cursor, None);
        Ok(())
    }

    #[tokio::test]
    async fn resume_from_final_cursor_is_idempotent() -> Result<()> {
        let source = ScriptedSource::new(vec![page(&["evt-1", "evt-2"], false, None)]);
        let first = fetch_device_events(&source, "dev:1", None, 100, 20).await?;
        assert_eq!(first.final_cursor.as_deref(), Some("evt-2"));

        // No new events upstream: the resume call gets an empty terminal page.
        let source = ScriptedSource::new(vec![page(&[], false, None)]);
        let resumed =
            fetch_device_events(&source, "dev:1", first.final_cursor.as_deref(), 100, 20).await?;

        assert_eq!(resumed.rows.len(), 0);
        assert_eq!(resumed.final_cursor, first.final_cursor);
        assert_eq!(
            *source.cursors_seen.lock().unwrap(),
            vec![Some("evt-2".to_string())]
        );
        Ok(())
    }

    #[tokio::test]
    async fn source_failure_propagates() {
        struct FailingSource;
        impl EventSource for FailingSource {
            async fn events_page(
                &self,
                _device_uid: &str,
                _cursor: Option<&str>,
                _limit: u32,
            ) -> Result<EventPage> {
                anyhow::bail!("rate limited")
            }
        }

        let err = fetch_device_events(&FailingSource, "dev:1", None, 100, 20)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn terminal_response_without_metadata_decodes_as_terminal() {
        let page: EventPage = serde_json::from_str(r#"{"events": []}"#).unwrap();
        assert!(!page.has_more);
        assert_eq!(page.next_cursor, None);
        assert!(page.events.is_empty());
    }
}

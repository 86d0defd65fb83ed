use serde_json::Value;

/// Column schema for exported events, in output order. Nested readings live
/// under the event's `body` object and flatten into the CSV header with the
/// `body.` prefix stripped (`body.aqi` -> `aqi`).
pub const FIELDS: &[&str] = &[
    "event",
    "device",
    "sn",
    "when",
    "best_lat",
    "best_lon",
    "body.aqi",
    "body.aqi_algorithm",
    "body.aqi_level",
    "body.c00_30",
    "body.c00_50",
    "body.c01_00",
    "body.c02_50",
    "body.c05_00",
    "body.csamples",
    "body.csecs",
    "body.humidity",
    "body.pm01_0",
    "body.pm01_0_rstd",
    "body.pm01_0cf1",
    "body.pm02_5",
    "body.pm02_5_rstd",
    "body.pm02_5cf1",
    "body.pm10_0",
    "body.pm10_0_rstd",
    "body.pm10_0cf1",
    "body.pressure",
    "body.sensor",
    "body.temperature",
    "body.voltage",
];

pub fn header() -> Vec<String> {
    FIELDS
        .iter()
        .map(|field| field.strip_prefix("body.").unwrap_or(field).to_string())
        .collect()
}

/// Projects one raw event onto the schema. Missing or null fields render as
/// empty cells so every row has the same width.
pub fn project(event: &Value) -> Vec<String> {
    FIELDS
        .iter()
        .map(|field| render(lookup(event, field)))
        .collect()
}

pub fn encode(events: &[Value]) -> Vec<Vec<String>> {
    events.iter().map(project).collect()
}

fn lookup<'a>(event: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = event;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSummary {
    pub serial: String,
    pub state: String,
    pub model: Option<String>,
    pub product: Option<String>,
    pub device: Option<String>,
    pub transport_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractedLabel {
    pub text: String,
    pub bounds: Bounds,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SwipeGesture {
    pub start_x: i32,
    pub start_y: i32,
    pub end_x: i32,
    pub end_y: i32,
    pub duration_ms: u32,
}

impl Default for SwipeGesture {
    fn default() -> Self {
        Self {
            start_x: 500,
            start_y: 1500,
            end_x: 500,
            end_y: 500,
            duration_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    Exhausted,
    Cancelled,
    Unstable { attempts: u32 },
    BridgeFailure { message: String },
}

impl StopReason {
    pub fn describe(&self) -> String {
        match self {
            StopReason::Exhausted => "no new content".to_string(),
            StopReason::Cancelled => "cancelled by user".to_string(),
            StopReason::Unstable { attempts } => {
                format!("content never stabilized after {attempts} attempts")
            }
            StopReason::BridgeFailure { message } => format!("device bridge failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScrapeSummary {
    pub trace_id: String,
    pub output_path: PathBuf,
    pub screen: Option<ScreenSize>,
    pub iterations: u32,
    pub unique_count: usize,
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScrapeEvent {
    Progress { percent: u8 },
    Log { level: LogLevel, line: String },
    Finished { summary: ScrapeSummary },
    Failed { error: String, code: String },
}

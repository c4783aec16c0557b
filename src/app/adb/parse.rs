use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::{Bounds, DeviceSummary, ScreenSize};

fn size_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:(physical|override)\s+)?size:\s*(\d+)\s*x\s*(\d+)").expect("size regex")
    })
}

fn bounds_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\[\s*(-?\d+)\s*,\s*(-?\d+)\s*\]\s*\[\s*(-?\d+)\s*,\s*(-?\d+)\s*\]\s*$")
            .expect("bounds regex")
    })
}

// `Override size` wins over `Physical size`.
pub fn parse_wm_size(output: &str) -> Option<ScreenSize> {
    let mut physical = None;
    let mut overridden = None;
    for caps in size_regex().captures_iter(output) {
        let width = caps[2].parse::<u32>().ok().filter(|value| *value > 0);
        let height = caps[3].parse::<u32>().ok().filter(|value| *value > 0);
        let (Some(width), Some(height)) = (width, height) else {
            continue;
        };
        let size = ScreenSize { width, height };
        let is_override = caps
            .get(1)
            .map(|kind| kind.as_str().eq_ignore_ascii_case("override"))
            .unwrap_or(false);
        if is_override {
            overridden = Some(size);
        } else if physical.is_none() {
            physical = Some(size);
        }
    }
    overridden.or(physical)
}

pub fn parse_bounds(value: &str) -> Option<Bounds> {
    let caps = bounds_regex().captures(value)?;
    Some(Bounds {
        left: caps[1].parse().ok()?,
        top: caps[2].parse().ok()?,
        right: caps[3].parse().ok()?,
        bottom: caps[4].parse().ok()?,
    })
}

pub fn parse_adb_devices(output: &str) -> Vec<DeviceSummary> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter(|line| !line.to_lowercase().contains("list of devices"))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 {
                return None;
            }
            let mut summary = DeviceSummary {
                serial: tokens[0].to_string(),
                state: tokens[1].to_string(),
                model: None,
                product: None,
                device: None,
                transport_id: None,
            };
            for token in tokens.iter().skip(2) {
                if let Some(value) = token.strip_prefix("model:") {
                    summary.model = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("product:") {
                    summary.product = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("device:") {
                    summary.device = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("transport_id:") {
                    summary.transport_id = Some(value.to_string());
                }
            }
            Some(summary)
        })
        .collect()
}

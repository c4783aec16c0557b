//! Minimal scanner for `uiautomator dump` output.

use crate::app::adb::parse::parse_bounds;
use crate::app::models::{Bounds, ExtractedLabel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiElement {
    pub tag: String,
    pub depth: usize,
    pub attrs: Vec<(String, String)>,
}

impl UiElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        find_attr(&self.attrs, name)
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.attr("bounds").and_then(parse_bounds)
    }

    pub fn label(&self) -> Option<&str> {
        let text = self.attr("text").filter(|value| !value.is_empty());
        text.or_else(|| self.attr("content-desc").filter(|value| !value.is_empty()))
    }
}

fn find_attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(attr_name, _)| attr_name == name)
        .map(|(_, value)| value.as_str())
}

fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }
    let mut decoded = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        decoded.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';') else {
            decoded.push_str(tail);
            return decoded;
        };
        let entity = &tail[1..semi];
        let replacement = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse::<u32>().ok()))
                .and_then(char::from_u32),
        };
        match replacement {
            Some(ch) => {
                decoded.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                decoded.push('&');
                rest = &tail[1..];
            }
        }
    }
    decoded.push_str(rest);
    decoded
}

pub fn parse_elements(xml: &str) -> Result<Vec<UiElement>, String> {
    let bytes = xml.as_bytes();
    let mut index: usize = 0;
    let mut depth: usize = 0;
    let mut elements = Vec::new();

    while index < bytes.len() {
        if bytes[index] != b'<' {
            index += 1;
            continue;
        }
        if index + 1 >= bytes.len() {
            return Err("Unexpected end of XML after '<'".into());
        }
        match bytes[index + 1] {
            b'/' => {
                index += 2;
                while index < bytes.len() && bytes[index] != b'>' {
                    index += 1;
                }
                index = (index + 1).min(bytes.len());
                depth = depth.saturating_sub(1);
            }
            b'!' => {
                index += 2;
                while index + 2 < bytes.len()
                    && !(bytes[index] == b'-' && bytes[index + 1] == b'-' && bytes[index + 2] == b'>')
                {
                    index += 1;
                }
                index = (index + 3).min(bytes.len());
            }
            b'?' => {
                index += 2;
                while index + 1 < bytes.len() && !(bytes[index] == b'?' && bytes[index + 1] == b'>') {
                    index += 1;
                }
                index = (index + 2).min(bytes.len());
            }
            _ => {
                let start = index + 1;
                let mut cursor = start;
                while cursor < bytes.len() {
                    let ch = bytes[cursor];
                    if ch == b'/' || ch == b'>' || ch.is_ascii_whitespace() {
                        break;
                    }
                    cursor += 1;
                }
                if cursor == start {
                    return Err("Malformed XML tag".into());
                }
                let tag = xml[start..cursor].to_string();
                let (attrs, self_closing, next) = scan_attributes(xml, cursor)?;
                index = next;

                elements.push(UiElement { tag, depth, attrs });
                if !self_closing {
                    depth += 1;
                }
            }
        }
    }

    Ok(elements)
}

fn scan_attributes(
    xml: &str,
    mut cursor: usize,
) -> Result<(Vec<(String, String)>, bool, usize), String> {
    let bytes = xml.as_bytes();
    let mut attrs: Vec<(String, String)> = Vec::new();
    let mut self_closing = false;

    loop {
        while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
            cursor += 1;
        }
        if cursor >= bytes.len() {
            return Err("Unterminated XML tag".into());
        }
        match bytes[cursor] {
            b'>' => {
                cursor += 1;
                break;
            }
            b'/' => {
                self_closing = true;
                cursor += 1;
                if cursor < bytes.len() && bytes[cursor] == b'>' {
                    cursor += 1;
                }
                break;
            }
            _ => {}
        }

        let name_start = cursor;
        while cursor < bytes.len() && bytes[cursor] != b'=' && !bytes[cursor].is_ascii_whitespace() {
            cursor += 1;
        }
        if cursor >= bytes.len() {
            return Err("Malformed attribute".into());
        }
        let name_end = cursor;
        while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
            cursor += 1;
        }
        if cursor >= bytes.len() || bytes[cursor] != b'=' {
            return Err("Malformed attribute assignment".into());
        }
        cursor += 1;
        while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
            cursor += 1;
        }
        if cursor >= bytes.len() {
            return Err("Missing attribute value".into());
        }
        let quote = bytes[cursor];
        if quote != b'"' && quote != b'\'' {
            return Err("Attribute value must be quoted".into());
        }
        cursor += 1;
        let value_start = cursor;
        while cursor < bytes.len() && bytes[cursor] != quote {
            cursor += 1;
        }
        if cursor >= bytes.len() {
            return Err("Unterminated attribute value".into());
        }
        let value_end = cursor;
        cursor += 1;
        attrs.push((
            xml[name_start..name_end].to_string(),
            decode_entities(&xml[value_start..value_end]),
        ));
    }

    Ok((attrs, self_closing, cursor))
}

pub fn extract_labels(xml: &str, excluded_top_y: i32) -> Result<Vec<ExtractedLabel>, String> {
    let labels = parse_elements(xml)?
        .iter()
        .filter_map(|element| {
            let bounds = element.bounds()?;
            if bounds.top < excluded_top_y {
                return None;
            }
            let text = element.label()?;
            Some(ExtractedLabel {
                text: text.to_string(),
                bounds,
            })
        })
        .collect();
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="0">
  <node index="0" text="" class="android.widget.FrameLayout" content-desc="" bounds="[0,0][1080,2400]">
    <node index="0" text="Inbox" class="android.widget.TextView" content-desc="" bounds="[0,80][1080,200]" />
    <node index="1" text="" class="android.widget.ImageView" content-desc="Profile photo" bounds="[40,520][160,640]" />
    <node index="2" text="Tom &amp; Jerry &quot;live&quot;" class="android.widget.TextView" content-desc="ignored" bounds="[180,520][1040,600]" />
    <!-- a comment with <node text="Hidden" bounds="[0,900][1,901]"/> -->
    <node index="3" text="" class="android.view.View" content-desc="" bounds="[0,700][1080,800]" />
    <node index="4" text="No bounds" class="android.widget.TextView" />
  </node>
</hierarchy>"#;

    #[test]
    fn walks_elements_in_document_order() {
        let elements = parse_elements(DUMP).expect("parse");
        let tags: Vec<&str> = elements.iter().map(|el| el.tag.as_str()).collect();
        assert_eq!(tags, vec!["hierarchy", "node", "node", "node", "node", "node", "node"]);
        assert_eq!(elements[0].depth, 0);
        assert_eq!(elements[1].depth, 1);
        assert_eq!(elements[2].depth, 2);
        assert_eq!(elements[6].depth, 2);
    }

    #[test]
    fn extracts_labels_below_threshold_with_desc_fallback() {
        let labels = extract_labels(DUMP, 500).expect("extract");
        let texts: Vec<&str> = labels.iter().map(|label| label.text.as_str()).collect();
        assert_eq!(texts, vec!["Profile photo", "Tom & Jerry \"live\""]);
        assert_eq!(labels[0].bounds.top, 520);
    }

    #[test]
    fn threshold_is_inclusive() {
        let xml = r#"<hierarchy>
            <node text="above" bounds="[0,499][10,520]"/>
            <node text="at" bounds="[0,500][10,520]"/>
        </hierarchy>"#;
        let labels = extract_labels(xml, 500).expect("extract");
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].text, "at");
    }

    #[test]
    fn zero_threshold_keeps_header() {
        let labels = extract_labels(DUMP, 0).expect("extract");
        assert_eq!(labels.first().map(|label| label.text.as_str()), Some("Inbox"));
    }

    #[test]
    fn decodes_numeric_entities() {
        assert_eq!(decode_entities("caf&#233; &#x2713; &bogus; a&b"), "café ✓ &bogus; a&b");
    }

    #[test]
    fn rejects_unterminated_attribute() {
        let err = parse_elements("<node text=\"oops />").expect_err("should fail");
        assert!(err.contains("Unterminated"));
    }
}

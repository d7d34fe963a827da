use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

/// Read-side shape of a cached item, shared by every source kind.
///
/// Serialized with the short keys the front door responds with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemView {
    #[serde(rename = "number")]
    pub index: i64,
    #[serde(rename = "date")]
    pub occurred_on: NaiveDate,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "link")]
    pub primary_link: String,
    pub details: String,
}

/// Parse a remote index: a non-negative integer, an integral float, or a
/// numeric string.
pub(crate) fn parse_index(value: &Value) -> Option<i64> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    };
    parsed.filter(|n| *n >= 0)
}

/// Parse an integer that may be encoded as a JSON number or a string.
pub(crate) fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// String field or empty string.
pub(crate) fn text(item: &Value, pointer: &str) -> String {
    item.pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_index_variants() {
        assert_eq!(parse_index(&json!(42)), Some(42));
        assert_eq!(parse_index(&json!("42")), Some(42));
        assert_eq!(parse_index(&json!(" 7 ")), Some(7));
        assert_eq!(parse_index(&json!(12.0)), Some(12));
        assert_eq!(parse_index(&json!("12.0")), Some(12));
        assert_eq!(parse_index(&json!(12.5)), None);
        assert_eq!(parse_index(&json!(-3)), None);
        assert_eq!(parse_index(&json!("abc")), None);
        assert_eq!(parse_index(&json!(null)), None);
        assert_eq!(parse_index(&json!({ "num": 1 })), None);
    }

    #[test]
    fn test_item_view_serializes_short_keys() {
        let view = ItemView {
            index: 1,
            occurred_on: NaiveDate::from_ymd_opt(2006, 1, 1).unwrap(),
            display_name: "Barrel - Part 1".into(),
            primary_link: "https://imgs.xkcd.com/comics/barrel_cropped_(1).jpg".into(),
            details: "Don't we all.".into(),
        };
        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(
            value,
            json!({
                "number": 1,
                "date": "2006-01-01",
                "name": "Barrel - Part 1",
                "link": "https://imgs.xkcd.com/comics/barrel_cropped_(1).jpg",
                "details": "Don't we all."
            })
        );
    }
}

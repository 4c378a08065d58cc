//! Applying partial updates to cached resources.
//!
//! Fields present in the partial overwrite the cached ones, absent fields are
//! kept, nested objects are merged recursively and arrays (group children,
//! scene actions, device services) are replaced as a whole.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::HueError;

/// Merges `partial` into `cached` in place.
pub fn merge_value(cached: &mut Value, partial: &Value) {
    match (cached, partial) {
        (Value::Object(cached), Value::Object(partial)) => {
            for (key, value) in partial {
                match cached.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_value(existing, value);
                    }
                    _ => {
                        cached.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (cached, partial) => *cached = partial.clone(),
    }
}

/// Returns `cached` with `partial` applied. The partial must be a JSON object
/// and the merged document must still describe a valid `T`.
pub fn merge<T>(cached: &T, partial: &Value) -> crate::Result<T>
where
    T: Serialize + DeserializeOwned,
{
    if !partial.is_object() {
        return Err(HueError::protocol_err(format!(
            "expected a partial object, got {partial}"
        )));
    }
    let mut value = serde_json::to_value(cached)?;
    merge_value(&mut value, partial);
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Group, Light};
    use serde_json::json;

    fn light() -> Light {
        serde_json::from_value(json!({
            "id": "a1",
            "id_v1": "/lights/1",
            "metadata": {"name": "Desk"},
            "on": {"on": false},
            "dimming": {"brightness": 40.0, "min_dim_level": 0.5},
            "color_temperature": {
                "mirek": 300,
                "mirek_valid": true,
                "mirek_schema": {"mirek_minimum": 153, "mirek_maximum": 500}
            }
        }))
        .unwrap()
    }

    #[test]
    fn scalars_overwrite_and_absent_fields_survive() {
        let merged = merge(&light(), &json!({"dimming": {"brightness": 80.0}})).unwrap();
        let dimming = merged.dimming.unwrap();
        assert_eq!(dimming.brightness, 80.0);
        assert_eq!(dimming.min_dim_level, Some(0.5));
        assert_eq!(merged.metadata.unwrap().name.as_deref(), Some("Desk"));
        assert!(!merged.on.unwrap().on);
    }

    #[test]
    fn nested_object_fields_are_merged() {
        let merged = merge(
            &light(),
            &json!({"color_temperature": {"mirek": null, "mirek_valid": false}}),
        )
        .unwrap();
        let ct = merged.color_temperature.unwrap();
        assert_eq!(ct.mirek, None);
        assert_eq!(ct.mirek_valid, Some(false));
        assert_eq!(ct.mirek_schema.unwrap().mirek_maximum, 500);
    }

    #[test]
    fn arrays_are_replaced() {
        let room: Group = serde_json::from_value(json!({
            "id": "r1",
            "children": [
                {"rid": "d1", "rtype": "device"},
                {"rid": "d2", "rtype": "device"}
            ]
        }))
        .unwrap();
        let partial = json!({"children": [{"rid": "d3", "rtype": "device"}]});
        let merged = merge(&room, &partial).unwrap();
        let children: Vec<_> = merged.children.unwrap().into_iter().map(|c| c.rid).collect();
        assert_eq!(children, vec!["d3"]);
    }

    #[test]
    fn empty_partial_is_identity() {
        let cached = light();
        let merged = merge(&cached, &json!({})).unwrap();
        assert_eq!(
            serde_json::to_value(&merged).unwrap(),
            serde_json::to_value(&cached).unwrap()
        );
    }

    #[test]
    fn reapplying_is_idempotent() {
        let partial = json!({"on": {"on": true}, "dimming": {"brightness": 12.5}});
        let once = merge(&light(), &partial).unwrap();
        let twice = merge(&once, &partial).unwrap();
        assert_eq!(
            serde_json::to_value(&once).unwrap(),
            serde_json::to_value(&twice).unwrap()
        );
    }

    #[test]
    fn invalid_partials_are_rejected() {
        assert!(merge(&light(), &json!(null)).is_err());
        assert!(merge(&light(), &json!([1, 2])).is_err());
        // a partial that breaks the resource's shape
        assert!(merge(&light(), &json!({"on": {"on": "maybe"}})).is_err());
    }

    #[test]
    fn raw_merge_replaces_non_objects() {
        let mut value = json!({"a": {"b": 1}, "list": [1, 2, 3]});
        merge_value(&mut value, &json!({"a": {"c": 2}, "list": [4]}));
        assert_eq!(value, json!({"a": {"b": 1, "c": 2}, "list": [4]}));
    }
}

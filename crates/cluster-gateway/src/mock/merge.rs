//! Patch application for the in-memory store

use crate::error::GatewayError;
use crate::gateway_trait::{PatchBody, PatchKind};
use serde_json::{Map, Value};

/// Apply `patch` to `target` in place
pub(crate) fn apply(target: &mut Value, patch: &PatchBody) -> Result<(), GatewayError> {
    match patch.kind {
        PatchKind::Merge => {
            json_patch::merge(target, &patch.body);
            Ok(())
        }
        PatchKind::StrategicMerge => {
            strategic_merge(target, &patch.body);
            Ok(())
        }
        PatchKind::Json => {
            let operations: json_patch::Patch = serde_json::from_value(patch.body.clone())?;
            json_patch::patch(target, &operations).map_err(|e| GatewayError::Invalid(e.to_string()))
        }
    }
}

/// Strategic merge limited to what workload patches use: objects merge
/// recursively, lists of named objects merge by `name`, other lists replace.
pub fn strategic_merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(target_map) = target else {
        return;
    };
    for (key, value) in patch_map {
        if value.is_null() {
            target_map.remove(key);
            continue;
        }
        match (target_map.get_mut(key), value) {
            (Some(Value::Array(existing)), Value::Array(incoming)) if is_named_list(incoming) => {
                merge_named_list(existing, incoming);
            }
            (Some(existing @ Value::Object(_)), Value::Object(_)) => strategic_merge(existing, value),
            _ => {
                target_map.insert(key.clone(), value.clone());
            }
        }
    }
}

fn is_named_list(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(|item| item.get("name").is_some_and(Value::is_string))
}

fn merge_named_list(existing: &mut Vec<Value>, incoming: &[Value]) {
    for item in incoming {
        let name = item.get("name");
        match existing.iter_mut().find(|current| current.get("name") == name) {
            Some(current) => strategic_merge(current, item),
            None => existing.push(item.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_containers_merge_by_name() {
        let mut deployment = json!({
            "spec": { "template": { "spec": { "containers": [
                { "name": "a", "image": "a:1.3.0", "args": ["x"] },
                { "name": "b", "image": "b:1.3.0" }
            ]}}}
        });
        let patch = json!({
            "spec": { "template": { "spec": { "containers": [
                { "name": "b", "image": "b:1.6.0" },
                { "name": "c", "image": "c:1.6.0" }
            ]}}}
        });
        strategic_merge(&mut deployment, &patch);
        let containers = &deployment["spec"]["template"]["spec"]["containers"];
        assert_eq!(containers.as_array().unwrap().len(), 3);
        assert_eq!(containers[0]["image"], "a:1.3.0");
        assert_eq!(containers[0]["args"], json!(["x"]));
        assert_eq!(containers[1]["image"], "b:1.6.0");
        assert_eq!(containers[2]["name"], "c");
    }

    #[test]
    fn test_null_removes_key() {
        let mut object = json!({ "metadata": { "labels": { "a": "1", "b": "2" } } });
        strategic_merge(&mut object, &json!({ "metadata": { "labels": { "a": null } } }));
        assert_eq!(object["metadata"]["labels"], json!({ "b": "2" }));
    }

    #[test]
    fn test_plain_lists_replace() {
        let mut object = json!({ "spec": { "args": ["a", "b"] } });
        strategic_merge(&mut object, &json!({ "spec": { "args": ["c"] } }));
        assert_eq!(object["spec"]["args"], json!(["c"]));
    }

    #[test]
    fn test_json_patch_applies_operations() {
        let mut object = json!({ "spec": { "replicas": 1 } });
        let patch = PatchBody::json(json!([{ "op": "replace", "path": "/spec/replicas", "value": 0 }]));
        apply(&mut object, &patch).unwrap();
        assert_eq!(object["spec"]["replicas"], 0);
    }
}

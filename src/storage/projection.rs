//! Field projections over stored JSON documents.
//!
//! Paths are dotted (`task.logs.system_logs`) and descend through arrays, so
//! `task.inputs.content` affects the `content` of every input.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Keep only these paths
    Include(Vec<String>),
    /// Drop these paths
    Exclude(Vec<String>),
}

impl Projection {
    pub fn include<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Include(paths.into_iter().map(Into::into).collect())
    }

    pub fn exclude<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Exclude(paths.into_iter().map(Into::into).collect())
    }

    pub fn apply(&self, document: &Value) -> Value {
        match self {
            Projection::Include(paths) => {
                let mut projected = Value::Object(Map::new());
                for path in paths {
                    let segments: Vec<&str> = path.split('.').collect();
                    copy_path(document, &mut projected, &segments);
                }
                projected
            }
            Projection::Exclude(paths) => {
                let mut projected = document.clone();
                for path in paths {
                    let segments: Vec<&str> = path.split('.').collect();
                    remove_path(&mut projected, &segments);
                }
                projected
            }
        }
    }
}

fn remove_path(value: &mut Value, segments: &[&str]) {
    match value {
        Value::Array(items) => {
            for item in items {
                remove_path(item, segments);
            }
        }
        Value::Object(object) => match segments {
            [] => {}
            [last] => {
                object.remove(*last);
            }
            [head, rest @ ..] => {
                if let Some(child) = object.get_mut(*head) {
                    remove_path(child, rest);
                }
            }
        },
        _ => {}
    }
}

fn copy_path(source: &Value, target: &mut Value, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    let (Value::Object(source), Value::Object(target)) = (source, &mut *target) else {
        return;
    };
    let Some(child) = source.get(*head) else {
        return;
    };

    if rest.is_empty() {
        target.insert(head.to_string(), child.clone());
        return;
    }

    match child {
        Value::Object(_) => {
            let slot = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            copy_path(child, slot, rest);
        }
        Value::Array(items) => {
            let slot = target.entry(head.to_string()).or_insert_with(|| {
                Value::Array(items.iter().map(|_| Value::Object(Map::new())).collect())
            });
            if let Value::Array(slots) = slot {
                for (item, item_slot) in items.iter().zip(slots.iter_mut()) {
                    copy_path(item, item_slot, rest);
                }
            }
        }
        _ => {}
    }
}

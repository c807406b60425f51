use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

/// One partial-update operation. Paths are top-level field names or dotted
/// paths into nested maps (`typing.alice`).
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    Set { path: String, value: Value },
    Delete { path: String },
}

/// Ordered list of field operations applied to a record in one write.
///
/// Setting a top-level field replaces that field only (shallow merge).
/// Arrays are always replaced wholesale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    ops: Vec<PatchOp>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.ops.push(PatchOp::Set {
            path: path.into(),
            value,
        });
        self
    }

    pub fn delete(mut self, path: impl Into<String>) -> Self {
        self.ops.push(PatchOp::Delete { path: path.into() });
        self
    }

    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn apply(&self, record: &mut Value) -> Result<()> {
        let root = as_object(record, "record")?;
        for op in &self.ops {
            match op {
                PatchOp::Set { path, value } => {
                    let (parents, leaf) = split_path(path)?;
                    let target = walk_create(root, &parents)?;
                    target.insert(leaf.to_string(), value.clone());
                }
                PatchOp::Delete { path } => {
                    let (parents, leaf) = split_path(path)?;
                    if let Some(target) = walk_existing(root, &parents) {
                        target.remove(leaf);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Append `element` to the array at `field` (dotted paths allowed).
/// Returns the new array length.
pub fn append_to_array(record: &mut Value, field: &str, element: Value) -> Result<usize> {
    let root = as_object(record, "record")?;
    let (parents, leaf) = split_path(field)?;
    let target = walk_create(root, &parents)?;
    let slot = target
        .entry(leaf.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    match slot.as_array_mut() {
        Some(items) => {
            items.push(element);
            Ok(items.len())
        }
        None => Err(StoreError::InvalidPatch(format!(
            "field '{}' is not an array",
            field
        ))),
    }
}

pub(crate) fn ensure_object(record: &Value) -> Result<()> {
    if record.is_object() {
        Ok(())
    } else {
        Err(StoreError::InvalidPatch(
            "record must be a JSON object".to_string(),
        ))
    }
}

fn as_object<'a>(value: &'a mut Value, what: &str) -> Result<&'a mut Map<String, Value>> {
    value
        .as_object_mut()
        .ok_or_else(|| StoreError::InvalidPatch(format!("{} is not an object", what)))
}

fn split_path(path: &str) -> Result<(Vec<&str>, &str)> {
    let mut segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidPatch(format!("bad field path '{}'", path)));
    }
    // split never yields an empty vec
    let leaf = segments.pop().unwrap_or_default();
    Ok((segments, leaf))
}

fn walk_create<'a>(
    mut map: &'a mut Map<String, Value>,
    parents: &[&str],
) -> Result<&'a mut Map<String, Value>> {
    for segment in parents {
        let next = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if next.is_null() {
            *next = Value::Object(Map::new());
        }
        map = as_object(next, segment)?;
    }
    Ok(map)
}

fn walk_existing<'a>(
    mut map: &'a mut Map<String, Value>,
    parents: &[&str],
) -> Option<&'a mut Map<String, Value>> {
    for segment in parents {
        map = map.get_mut(*segment)?.as_object_mut()?;
    }
    Some(map)
}

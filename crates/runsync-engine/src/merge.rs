//! Applies result deltas to a node's result document.
//!
//! Paths are JSON Pointers (RFC 6901). Missing intermediate objects are
//! created on write; a path that runs through a scalar, or indexes past the
//! end of an array, cannot be resolved and the operation is skipped.

use runsync_events::{DeltaOperation, PatchKind, PatchOp, ResultDelta};
use serde_json::{Map, Value};
use tracing::debug;

/// Outcome of [`apply_delta`].
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
  pub document: Value,
  /// Whether `document` differs structurally from the input.
  pub changed: bool,
}

/// Apply `delta` to a copy of `current` (an empty object when absent).
pub fn apply_delta(current: Option<&Value>, delta: &ResultDelta) -> Merged {
  let before = current.cloned().unwrap_or_else(empty_document);
  let mut document = before.clone();

  match delta {
    ResultDelta::Pointer {
      operation,
      path,
      value,
    } => {
      let value = value.clone().unwrap_or(Value::Null);
      let applied = match operation {
        DeltaOperation::Replace => replace(&mut document, path, value, false),
        DeltaOperation::Append => append(&mut document, path, value),
        DeltaOperation::Remove => remove(&mut document, path),
      };
      if !applied {
        debug!(path = %path, operation = ?operation, "delta_path_unresolvable");
      }
    }
    ResultDelta::Patch { patches } => {
      for patch in patches {
        if !apply_patch(&mut document, patch) {
          debug!(path = %patch.path, op = ?patch.op, "patch_path_unresolvable");
        }
      }
    }
  }

  let changed = document != before;
  Merged { document, changed }
}

fn apply_patch(document: &mut Value, patch: &PatchOp) -> bool {
  let value = || patch.value.clone().unwrap_or(Value::Null);
  match patch.op {
    PatchKind::Add => replace(document, &patch.path, value(), true),
    PatchKind::Replace => replace(document, &patch.path, value(), false),
    PatchKind::Remove => remove(document, &patch.path),
  }
}

fn empty_document() -> Value {
  Value::Object(Map::new())
}

/// Split a pointer into unescaped reference tokens. `None` if malformed.
fn parse_pointer(path: &str) -> Option<Vec<String>> {
  if path.is_empty() {
    return Some(Vec::new());
  }
  let rest = path.strip_prefix('/')?;
  Some(
    rest
      .split('/')
      .map(|token| token.replace("~1", "/").replace("~0", "~"))
      .collect(),
  )
}

/// Array position for `token`, where `len` (or `-`) means one past the end.
fn array_index(token: &str, len: usize) -> Option<usize> {
  if token == "-" {
    return Some(len);
  }
  if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  if token.len() > 1 && token.starts_with('0') {
    return None;
  }
  token.parse::<usize>().ok().filter(|i| *i <= len)
}

/// Walk `tokens` from `node`. With `create`, missing (or null) object slots
/// become empty objects and `-` on an array pushes one.
fn walk<'a>(node: &'a mut Value, tokens: &[String], create: bool) -> Option<&'a mut Value> {
  tokens
    .iter()
    .try_fold(node, |node, token| step(node, token, create))
}

fn step<'a>(node: &'a mut Value, token: &str, create: bool) -> Option<&'a mut Value> {
  if create && node.is_null() {
    *node = empty_document();
  }
  match node {
    Value::Object(map) => {
      if create {
        Some(map.entry(token).or_insert_with(empty_document))
      } else {
        map.get_mut(token)
      }
    }
    Value::Array(items) => {
      let index = array_index(token, items.len())?;
      if index == items.len() {
        if !create {
          return None;
        }
        items.push(empty_document());
      }
      items.get_mut(index)
    }
    _ => None,
  }
}

/// Write `value` at `path`. On arrays, `insert` shifts later elements (patch
/// `add`); otherwise the element is overwritten.
fn replace(document: &mut Value, path: &str, value: Value, insert: bool) -> bool {
  let Some(tokens) = parse_pointer(path) else {
    return false;
  };
  let Some((last, parents)) = tokens.split_last() else {
    *document = value;
    return true;
  };
  let Some(parent) = walk(document, parents, true) else {
    return false;
  };
  if parent.is_null() {
    *parent = empty_document();
  }

  match parent {
    Value::Object(map) => {
      map.insert(last.clone(), value);
      true
    }
    Value::Array(items) => match array_index(last, items.len()) {
      Some(index) if index == items.len() => {
        items.push(value);
        true
      }
      Some(index) if insert => {
        items.insert(index, value);
        true
      }
      Some(index) => {
        items[index] = value;
        true
      }
      None => false,
    },
    _ => false,
  }
}

/// Push `value` onto the array at `path`, creating it when absent. A scalar
/// already at `path` becomes the first element.
fn append(document: &mut Value, path: &str, value: Value) -> bool {
  let Some(tokens) = parse_pointer(path) else {
    return false;
  };
  let Some(slot) = walk_for_append(document, &tokens) else {
    return false;
  };

  match slot {
    Value::Array(items) => items.push(value),
    Value::Null => *slot = Value::Array(vec![value]),
    existing => {
      let previous = std::mem::take(existing);
      *existing = Value::Array(vec![previous, value]);
    }
  }
  true
}

/// Like [`walk`] with `create`, except the final slot defaults to null so
/// [`append`] can tell a fresh slot from an existing empty object.
fn walk_for_append<'a>(document: &'a mut Value, tokens: &[String]) -> Option<&'a mut Value> {
  let Some((last, parents)) = tokens.split_last() else {
    return Some(document);
  };
  let parent = walk(document, parents, true)?;
  if parent.is_null() {
    *parent = empty_document();
  }
  match parent {
    Value::Object(map) => Some(map.entry(last.clone()).or_insert(Value::Null)),
    Value::Array(items) => {
      let index = array_index(last, items.len())?;
      if index == items.len() {
        items.push(Value::Null);
      }
      items.get_mut(index)
    }
    _ => None,
  }
}

/// Remove the value at `path`. Removing the root resets to an empty object.
fn remove(document: &mut Value, path: &str) -> bool {
  let Some(tokens) = parse_pointer(path) else {
    return false;
  };
  let Some((last, parents)) = tokens.split_last() else {
    *document = empty_document();
    return true;
  };
  let Some(parent) = walk(document, parents, false) else {
    return false;
  };

  match parent {
    Value::Object(map) => map.remove(last).is_some(),
    Value::Array(items) => match array_index(last, items.len()) {
      Some(index) if index < items.len() => {
        items.remove(index);
        true
      }
      _ => false,
    },
    _ => false,
  }
}

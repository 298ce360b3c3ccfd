//! A single-operation plain-text type.
//!
//! The payload is a string; an op is one insert or one delete (no retain
//! vector). Positions are measured in characters. The transform rules keep
//! positions non-negative and counts ≥ 0; a delete fully contained in an
//! already-applied delete collapses to `count = 0`, a benign no-op that still
//! advances the version.

use serde_json::{json, Value};

use crate::error::OtError;
use crate::types::{OtType, Side};

pub struct SimpleText;

/// Build an insert op payload: place `text` before the character at `pos`.
pub fn insert_op(pos: usize, text: impl Into<String>) -> Value {
    json!({"insert": true, "pos": pos, "text": text.into()})
}

/// Build a delete op payload: remove `count` characters starting at `pos`.
pub fn delete_op(pos: usize, count: usize) -> Value {
    json!({"delete": true, "pos": pos, "count": count})
}

#[derive(Debug, Clone, PartialEq)]
enum TextOp {
    Insert { pos: usize, text: String },
    Delete { pos: usize, count: usize },
}

impl TextOp {
    fn parse(op: &Value) -> Result<Self, OtError> {
        let obj = op
            .as_object()
            .ok_or_else(|| OtError::BadlyFormed(format!("text op must be an object, got {op}")))?;
        let pos = obj
            .get("pos")
            .and_then(Value::as_u64)
            .ok_or_else(|| OtError::BadlyFormed("text op missing numeric pos".into()))?
            as usize;

        match (obj.get("text"), obj.get("count")) {
            (Some(text), None) => {
                let text = text
                    .as_str()
                    .ok_or_else(|| OtError::BadlyFormed("insert text must be a string".into()))?;
                Ok(TextOp::Insert {
                    pos,
                    text: text.to_string(),
                })
            }
            (None, Some(count)) => {
                let count = count
                    .as_u64()
                    .ok_or_else(|| OtError::BadlyFormed("delete count must be numeric".into()))?
                    as usize;
                Ok(TextOp::Delete { pos, count })
            }
            _ => Err(OtError::BadlyFormed(
                "text op must carry exactly one of text/count".into(),
            )),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            TextOp::Insert { pos, text } => insert_op(*pos, text.clone()),
            TextOp::Delete { pos, count } => delete_op(*pos, *count),
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of character index `pos`, or an error past the end.
fn byte_offset(s: &str, pos: usize) -> Result<usize, OtError> {
    if pos == char_len(s) {
        return Ok(s.len());
    }
    s.char_indices()
        .nth(pos)
        .map(|(i, _)| i)
        .ok_or_else(|| OtError::BadlyFormed(format!("position {pos} past end of document")))
}

fn splice_insert(s: &str, pos: usize, text: &str) -> Result<String, OtError> {
    let at = byte_offset(s, pos)?;
    let mut out = String::with_capacity(s.len() + text.len());
    out.push_str(&s[..at]);
    out.push_str(text);
    out.push_str(&s[at..]);
    Ok(out)
}

fn splice_delete(s: &str, pos: usize, count: usize) -> Result<String, OtError> {
    if pos + count > char_len(s) {
        return Err(OtError::BadlyFormed(format!(
            "delete [{pos}, {}) past end of document",
            pos + count
        )));
    }
    let start = byte_offset(s, pos)?;
    let end = byte_offset(s, pos + count)?;
    let mut out = String::with_capacity(s.len() - (end - start));
    out.push_str(&s[..start]);
    out.push_str(&s[end..]);
    Ok(out)
}

impl OtType for SimpleText {
    fn name(&self) -> &'static str {
        "simple-text"
    }

    fn uri(&self) -> &'static str {
        "https://tandem.rs/types/simple-text"
    }

    fn create(&self, data: Option<&Value>) -> Result<Value, OtError> {
        let initial = match data {
            Some(v) => v
                .as_str()
                .ok_or_else(|| {
                    OtError::BadlyFormed(format!("simple-text data must be a string, got {v}"))
                })?
                .to_string(),
            None => String::new(),
        };
        Ok(json!(initial))
    }

    fn apply(&self, payload: &Value, op: &Value) -> Result<Value, OtError> {
        let doc = payload.as_str().ok_or_else(|| {
            OtError::BadlyFormed(format!("simple-text payload must be a string, got {payload}"))
        })?;
        let result = match TextOp::parse(op)? {
            TextOp::Insert { pos, text } => splice_insert(doc, pos, &text)?,
            TextOp::Delete { pos, count } => splice_delete(doc, pos, count)?,
        };
        Ok(json!(result))
    }

    fn transform(&self, op: &Value, applied: &Value, side: Side) -> Result<Value, OtError> {
        let mut ours = TextOp::parse(op)?;
        let theirs = TextOp::parse(applied)?;

        match (&mut ours, &theirs) {
            (TextOp::Insert { pos, .. }, TextOp::Insert { pos: apos, text: atext }) => {
                if *apos < *pos || (*apos == *pos && side == Side::Right) {
                    *pos += char_len(atext);
                }
            }
            (TextOp::Insert { pos, .. }, TextOp::Delete { pos: apos, count }) => {
                let (a, b) = (*apos, *apos + *count);
                if b <= *pos {
                    *pos -= count;
                } else if a < *pos {
                    // Insert point fell inside the deleted range.
                    *pos = a;
                }
            }
            (TextOp::Delete { pos, .. }, TextOp::Insert { pos: apos, text: atext }) => {
                if *apos <= *pos {
                    *pos += char_len(atext);
                }
            }
            (TextOp::Delete { pos, count }, TextOp::Delete { pos: apos, count: acount }) => {
                let (us, ue) = (*pos, *pos + *count);
                let (as_, ae) = (*apos, *apos + *acount);
                if ae <= us {
                    *pos -= acount;
                } else if as_ >= ue {
                    // Applied range entirely after ours.
                } else {
                    let overlap = ue.min(ae) - us.max(as_);
                    *count -= overlap;
                    if as_ < us {
                        *pos = as_;
                    }
                }
            }
        }

        Ok(ours.to_value())
    }

    fn invert(&self, op: &Value) -> Option<Result<Value, OtError>> {
        // A true delete inverse needs the removed text; placeholders stand in.
        Some(TextOp::parse(op).map(|parsed| match parsed {
            TextOp::Insert { pos, text } => delete_op(pos, char_len(&text)),
            TextOp::Delete { pos, count } => insert_op(pos, "*".repeat(count)),
        }))
    }

    fn normalize(&self, op: Value) -> Value {
        match TextOp::parse(&op) {
            Ok(parsed) => parsed.to_value(),
            Err(_) => op,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(doc: &str, op: &Value) -> String {
        SimpleText
            .apply(&json!(doc), op)
            .unwrap()
            .as_str()
            .unwrap()
            .to_string()
    }

    fn xf(op: &Value, applied: &Value, side: Side) -> Value {
        SimpleText.transform(op, applied, side).unwrap()
    }

    #[test]
    fn test_apply_insert() {
        assert_eq!(apply("hello", &insert_op(1, "X")), "hXello");
        assert_eq!(apply("hello", &insert_op(0, "ab")), "abhello");
        // Append at position == length.
        assert_eq!(apply("hello", &insert_op(5, "!")), "hello!");
    }

    #[test]
    fn test_apply_delete() {
        assert_eq!(apply("hello", &delete_op(1, 3)), "ho");
        assert_eq!(apply("hello", &delete_op(0, 5)), "");
        assert_eq!(apply("hello", &delete_op(2, 0)), "hello");
    }

    #[test]
    fn test_apply_out_of_range_rejected() {
        assert!(SimpleText.apply(&json!("hi"), &insert_op(3, "x")).is_err());
        assert!(SimpleText.apply(&json!("hi"), &delete_op(1, 2)).is_err());
    }

    #[test]
    fn test_apply_multibyte() {
        assert_eq!(apply("héllo", &insert_op(2, "X")), "héXllo");
        assert_eq!(apply("héllo", &delete_op(1, 1)), "hllo");
    }

    #[test]
    fn test_transform_insert_insert_distinct_positions() {
        // Applied insert before ours shifts us right.
        assert_eq!(
            xf(&insert_op(3, "x"), &insert_op(1, "ab"), Side::Left),
            insert_op(5, "x")
        );
        // Applied insert after ours leaves us alone.
        assert_eq!(
            xf(&insert_op(1, "x"), &insert_op(3, "ab"), Side::Left),
            insert_op(1, "x")
        );
    }

    #[test]
    fn test_transform_insert_insert_tie_break() {
        // Left holds position; right shifts.
        assert_eq!(
            xf(&insert_op(2, "x"), &insert_op(2, "ab"), Side::Left),
            insert_op(2, "x")
        );
        assert_eq!(
            xf(&insert_op(2, "x"), &insert_op(2, "ab"), Side::Right),
            insert_op(4, "x")
        );
    }

    #[test]
    fn test_transform_insert_over_delete() {
        // Delete entirely before: shift left.
        assert_eq!(
            xf(&insert_op(5, "x"), &delete_op(1, 2), Side::Left),
            insert_op(3, "x")
        );
        // Insert point inside deleted range: clamp to range start.
        assert_eq!(
            xf(&insert_op(3, "x"), &delete_op(2, 4), Side::Left),
            insert_op(2, "x")
        );
        // Insert at the deleted range start survives in place.
        assert_eq!(
            xf(&insert_op(2, "x"), &delete_op(2, 4), Side::Left),
            insert_op(2, "x")
        );
        // Delete after insert: no change.
        assert_eq!(
            xf(&insert_op(1, "x"), &delete_op(2, 2), Side::Left),
            insert_op(1, "x")
        );
    }

    #[test]
    fn test_transform_delete_over_insert() {
        assert_eq!(
            xf(&delete_op(3, 2), &insert_op(1, "ab"), Side::Left),
            delete_op(5, 2)
        );
        assert_eq!(
            xf(&delete_op(3, 2), &insert_op(3, "ab"), Side::Left),
            delete_op(5, 2)
        );
        assert_eq!(
            xf(&delete_op(1, 2), &insert_op(4, "ab"), Side::Left),
            delete_op(1, 2)
        );
    }

    #[test]
    fn test_transform_delete_delete_disjoint() {
        assert_eq!(
            xf(&delete_op(5, 2), &delete_op(1, 3), Side::Left),
            delete_op(2, 2)
        );
        assert_eq!(
            xf(&delete_op(1, 2), &delete_op(5, 3), Side::Left),
            delete_op(1, 2)
        );
    }

    #[test]
    fn test_transform_delete_delete_overlap() {
        // Applied [0,3) overlaps our [2,6): lose one char, clamp to 0.
        assert_eq!(
            xf(&delete_op(2, 4), &delete_op(0, 3), Side::Left),
            delete_op(0, 3)
        );
        // Applied [4,5) inside our [2,6): lose one char, keep position.
        assert_eq!(
            xf(&delete_op(2, 4), &delete_op(4, 1), Side::Left),
            delete_op(2, 3)
        );
    }

    #[test]
    fn test_transform_delete_fully_contained_collapses() {
        // Our [2,4) is inside applied [1,6): nothing left to delete.
        assert_eq!(
            xf(&delete_op(2, 2), &delete_op(1, 5), Side::Left),
            delete_op(1, 0)
        );
    }

    #[test]
    fn test_convergence_insert_insert() {
        let s = json!("hello");
        let a = insert_op(1, "X");
        let b = insert_op(4, "Y");

        let t = SimpleText;
        let left = t
            .apply(&t.apply(&s, &a).unwrap(), &t.transform(&b, &a, Side::Right).unwrap())
            .unwrap();
        let right = t
            .apply(&t.apply(&s, &b).unwrap(), &t.transform(&a, &b, Side::Left).unwrap())
            .unwrap();
        assert_eq!(left, right);
        assert_eq!(left, json!("hXellYo"));
    }

    #[test]
    fn test_convergence_same_position() {
        let s = json!("hello");
        let a = insert_op(0, "A");
        let b = insert_op(0, "B");

        let t = SimpleText;
        let left = t
            .apply(&t.apply(&s, &a).unwrap(), &t.transform(&b, &a, Side::Right).unwrap())
            .unwrap();
        let right = t
            .apply(&t.apply(&s, &b).unwrap(), &t.transform(&a, &b, Side::Left).unwrap())
            .unwrap();
        assert_eq!(left, right);
        assert_eq!(left, json!("BAhello"));
    }

    #[test]
    fn test_convergence_insert_delete() {
        let s = json!("abcdef");
        let a = insert_op(5, "XY");
        let b = delete_op(1, 3);

        let t = SimpleText;
        let left = t
            .apply(&t.apply(&s, &a).unwrap(), &t.transform(&b, &a, Side::Right).unwrap())
            .unwrap();
        let right = t
            .apply(&t.apply(&s, &b).unwrap(), &t.transform(&a, &b, Side::Left).unwrap())
            .unwrap();
        assert_eq!(left, right);
        assert_eq!(left, json!("aeXYf"));
    }

    #[test]
    fn test_convergence_delete_delete() {
        let s = json!("abcdefgh");
        let a = delete_op(1, 4);
        let b = delete_op(3, 4);

        let t = SimpleText;
        let left = t
            .apply(&t.apply(&s, &a).unwrap(), &t.transform(&b, &a, Side::Right).unwrap())
            .unwrap();
        let right = t
            .apply(&t.apply(&s, &b).unwrap(), &t.transform(&a, &b, Side::Left).unwrap())
            .unwrap();
        assert_eq!(left, right);
        assert_eq!(left, json!("ah"));
    }

    #[test]
    fn test_invert() {
        let t = SimpleText;
        assert_eq!(
            t.invert(&insert_op(2, "xy")).unwrap().unwrap(),
            delete_op(2, 2)
        );
        assert_eq!(
            t.invert(&delete_op(2, 3)).unwrap().unwrap(),
            insert_op(2, "***")
        );
    }

    #[test]
    fn test_create() {
        let t = SimpleText;
        assert_eq!(t.create(None).unwrap(), json!(""));
        assert_eq!(t.create(Some(&json!("seed"))).unwrap(), json!("seed"));
        assert!(t.create(Some(&json!(5))).is_err());
    }

    #[test]
    fn test_malformed_ops_rejected() {
        let t = SimpleText;
        assert!(t.apply(&json!("x"), &json!({"pos": 0})).is_err());
        assert!(t.apply(&json!("x"), &json!({"text": "y"})).is_err());
        assert!(t
            .apply(&json!("x"), &json!({"pos": 0, "text": "y", "count": 1}))
            .is_err());
        assert!(t.apply(&json!("x"), &json!(7)).is_err());
    }
}

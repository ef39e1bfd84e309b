//! Plan fingerprints.
//!
//! A fingerprint is a blake3 digest over a tagged, length-prefixed encoding
//! of the plan: its bounds, every procedure in topological order and the
//! result set. Spec JSON is encoded with object keys in sorted order, so two
//! plans that differ only in the order a spec was written hash the same.

use std::fmt;

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::bounds::BoundsSpec;
use crate::id::ProcedureId;
use crate::time::QueryTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// First 8 bytes as hex; enough for log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..16].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Incremental plan hasher. Feed `bounds`, then each `procedure` in plan
/// order, then `results`.
pub struct Fingerprinter {
    h: Hasher,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

impl Fingerprinter {
    pub fn new() -> Self {
        let mut h = Hasher::new();
        h.update(b"chronoflow-plan\0");
        Self { h }
    }

    pub fn bounds(&mut self, b: &BoundsSpec) -> &mut Self {
        self.h.update(b"B");
        self.query_time(b.start);
        self.query_time(b.stop);
        self
    }

    pub fn procedure(&mut self, id: ProcedureId, kind: &str, spec: &Json, parents: &[ProcedureId]) -> &mut Self {
        self.h.update(b"P");
        self.h.update(id.uuid().as_bytes());
        self.str(kind);
        self.json(spec);
        self.ids(parents);
        self
    }

    pub fn results(&mut self, ids: &[ProcedureId]) -> &mut Self {
        self.h.update(b"R");
        self.ids(ids);
        self
    }

    pub fn finish(&self) -> Fingerprint {
        Fingerprint(self.h.finalize().into())
    }

    fn len(&mut self, n: usize) {
        self.h.update(&(n as u64).to_le_bytes());
    }

    fn str(&mut self, s: &str) {
        self.len(s.len());
        self.h.update(s.as_bytes());
    }

    fn ids(&mut self, ids: &[ProcedureId]) {
        self.len(ids.len());
        for id in ids {
            self.h.update(id.uuid().as_bytes());
        }
    }

    fn query_time(&mut self, t: QueryTime) {
        match t {
            QueryTime::Relative(d) => {
                self.h.update(b"r");
                self.h.update(&d.0.to_le_bytes());
            }
            QueryTime::Absolute(t) => {
                self.h.update(b"a");
                self.h.update(&t.0.to_le_bytes());
            }
        }
    }

    fn json(&mut self, v: &Json) {
        match v {
            Json::Null => {
                self.h.update(b"n");
            }
            Json::Bool(b) => {
                self.h.update(if *b { b"t" } else { b"f" });
            }
            Json::Number(n) => {
                self.h.update(b"d");
                self.str(&n.to_string());
            }
            Json::String(s) => {
                self.h.update(b"s");
                self.str(s);
            }
            Json::Array(items) => {
                self.h.update(b"[");
                self.len(items.len());
                for item in items {
                    self.json(item);
                }
            }
            Json::Object(map) => {
                self.h.update(b"{");
                self.len(map.len());
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for k in keys {
                    self.str(k);
                    self.json(&map[k]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::OperationId;
    use crate::time::{Duration, HOUR};
    use serde_json::json;

    fn id(s: &str) -> ProcedureId {
        ProcedureId::from_operation(&OperationId::new(s))
    }

    fn one(spec: &Json, parents: &[ProcedureId]) -> Fingerprint {
        Fingerprinter::new()
            .bounds(&BoundsSpec::until_now())
            .procedure(id("sum"), "sum", spec, parents)
            .results(&[id("sum")])
            .finish()
    }

    #[test]
    fn key_order_does_not_matter() {
        let a: Json = serde_json::from_str(r#"{"every": "1m", "period": "2m"}"#).expect("json");
        let b: Json = serde_json::from_str(r#"{"period": "2m", "every": "1m"}"#).expect("json");
        assert_eq!(one(&a, &[]), one(&b, &[]));
    }

    #[test]
    fn every_part_contributes() {
        let base = one(&json!({"n": 1}), &[]);
        assert_ne!(base, one(&json!({"n": 2}), &[]));
        assert_ne!(base, one(&json!({"n": "1"}), &[]));
        assert_ne!(base, one(&json!({"n": 1}), &[id("from")]));
        let shifted = Fingerprinter::new()
            .bounds(&BoundsSpec::new(QueryTime::Relative(Duration(-HOUR.0)), QueryTime::NOW))
            .procedure(id("sum"), "sum", &json!({"n": 1}), &[])
            .results(&[id("sum")])
            .finish();
        assert_ne!(base, shifted);
    }

    #[test]
    fn adjacent_strings_do_not_run_together() {
        let a = one(&json!(["ab", "c"]), &[]);
        let b = one(&json!(["a", "bc"]), &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn short_is_a_hex_prefix() {
        let f = one(&Json::Null, &[]);
        assert_eq!(f.to_hex().len(), 64);
        assert!(f.to_hex().starts_with(&f.short()));
        assert_eq!(f.to_string(), f.to_hex());
    }
}

//! Record filter: drop every record the rule set matches, keep the rest
//! untouched and in their original order.

use crate::codec::{decode_record, DecodeError, Document, Record};
use crate::error::ProcessError;
use crate::rules::{RuleSet, RECOGNIZED_FIELDS};

/// Record counts before and after filtering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub input: usize,
    pub output: usize,
}

impl FilterStats {
    pub fn dropped(&self) -> usize {
        self.input - self.output
    }
}

/// Consume `input` and return the retained subsequence.
///
/// A record that fails to decode aborts the whole pass; no partial document is
/// returned. Retained records are moved, not re-encoded.
pub fn filter_records(input: Document, rules: &RuleSet) -> Result<(Document, FilterStats), ProcessError> {
    let total = input.records.len();
    let mut kept = Vec::with_capacity(total);

    for (index, raw) in input.records.into_iter().enumerate() {
        let drop = {
            let rec = decode_record(&raw).map_err(|source| DecodeError::Record { index, source })?;
            log_record(index, &rec);
            rules.eval_rules(&rec).map_err(|source| ProcessError::Eval { index, source })?
        };
        // a match means drop
        if drop {
            continue;
        }
        kept.push(raw);
    }

    let stats = FilterStats { input: total, output: kept.len() };
    Ok((Document::new(kept), stats))
}

fn log_record(index: usize, rec: &Record<'_>) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let field = |name: &str| {
        rec.get(name).and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default()
    };
    tracing::debug!(
        index,
        eventName = %field(RECOGNIZED_FIELDS[0]),
        eventSource = %field(RECOGNIZED_FIELDS[1]),
        awsRegion = %field(RECOGNIZED_FIELDS[2]),
        recipientAccountId = %field(RECOGNIZED_FIELDS[3]),
        "eval record"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Match, Rule};
    use serde_json::value::RawValue;

    fn doc(records: &[&str]) -> Document {
        Document::new(records.iter().map(|r| RawValue::from_string(r.to_string()).unwrap()).collect())
    }

    fn texts(d: &Document) -> Vec<&str> {
        d.records.iter().map(|r| r.get()).collect()
    }

    fn drop_decrypt() -> RuleSet {
        RuleSet { rules: vec![Rule::new("decrypt", vec![Match::new("eventName", "^Decrypt$")])] }
    }

    #[test]
    fn keeps_order_of_survivors() {
        let input = doc(&[
            r#"{"eventName":"A","eventSource":"s3"}"#,
            r#"{"eventName":"Decrypt"}"#,
            r#"{"eventName":"B","n":1.000}"#,
            r#"{"eventName":"Decrypt","x":[1]}"#,
            r#"{"eventName":"C"}"#,
        ]);
        let (out, stats) = filter_records(input, &drop_decrypt()).unwrap();
        assert_eq!(
            texts(&out),
            vec![r#"{"eventName":"A","eventSource":"s3"}"#, r#"{"eventName":"B","n":1.000}"#, r#"{"eventName":"C"}"#]
        );
        assert_eq!(stats, FilterStats { input: 5, output: 3 });
        assert_eq!(stats.dropped(), 2);
    }

    #[test]
    fn empty_rule_set_keeps_everything() {
        let recs = [r#"{"eventName":"A"}"#, r#"{"awsRegion":"eu-west-1","big":18446744073709551616}"#];
        let (out, stats) = filter_records(doc(&recs), &RuleSet::default()).unwrap();
        assert_eq!(texts(&out), recs.to_vec());
        assert_eq!(stats.input, stats.output);
    }

    #[test]
    fn bad_record_aborts() {
        let input = doc(&[r#"{"eventName":"A"}"#, r#""just a string""#]);
        match filter_records(input, &drop_decrypt()) {
            Err(ProcessError::Decode(DecodeError::Record { index, .. })) => assert_eq!(index, 1),
            other => panic!("unexpected: {:?}", other.map(|(_, s)| s)),
        }
    }

    #[test]
    fn unvalidated_regex_is_eval_error() {
        let rules = RuleSet { rules: vec![Rule::new("x", vec![Match::new("eventName", "(")])] };
        let err = filter_records(doc(&[r#"{"eventName":"A"}"#]), &rules).unwrap_err();
        assert!(matches!(err, ProcessError::Eval { index: 0, .. }));
    }

    #[test]
    fn record_without_rule_fields_is_dropped() {
        let rules = RuleSet { rules: vec![Rule::new("kms", vec![Match::new("eventSource", "kms")])] };
        let (out, _) = filter_records(doc(&[r#"{"awsRegion":"us-east-1"}"#]), &rules).unwrap();
        assert!(out.is_empty());
    }
}

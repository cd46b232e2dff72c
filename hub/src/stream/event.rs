use btdash_core::report::{BacktestItem, BackendSummary};
use serde_json::Value;

use crate::error::HubError;
use crate::normalize;

/// One decoded message from a multi-symbol run.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Item(BacktestItem),
    Summary(BackendSummary),
    /// Well-formed, but of a type this client does not act on.
    Other(String),
}

impl StreamEvent {
    /// `{"type":"item","item":{..}}` or `{"type":"summary", avg_return, ..}`.
    /// Anything unreadable, or an item without a code, is a decode error.
    pub fn parse(text: &str) -> Result<Self, HubError> {
        let msg: Value = serde_json::from_str(text)?;
        let kind = msg
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| HubError::Decode("event has no type".into()))?;
        match kind {
            "item" => msg
                .get("item")
                .and_then(normalize::backtest_item)
                .map(Self::Item)
                .ok_or_else(|| HubError::Decode("item event without a usable item".into())),
            "summary" => Ok(Self::Summary(normalize::backend_summary(&msg))),
            other => Ok(Self::Other(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_item_and_summary() {
        let ev = StreamEvent::parse(
            r#"{"type":"item","item":{"code":"600000","name":"浦发银行","return":0.12,"max_drawdown":0.05,"sharpe":1.1}}"#,
        )
        .unwrap();
        match ev {
            StreamEvent::Item(it) => {
                assert_eq!(it.code, "600000");
                assert_eq!(it.ret, 0.12);
            }
            other => panic!("expected item, got {other:?}"),
        }

        let ev = StreamEvent::parse(
            r#"{"type":"summary","avg_return":0.1,"avg_max_drawdown":0.2,"avg_sharpe":"0.9"}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            StreamEvent::Summary(BackendSummary {
                avg_return: 0.1,
                avg_max_drawdown: 0.2,
                avg_sharpe: 0.9,
                count: None,
            })
        );
    }

    #[test]
    fn malformed_events_are_decode_errors() {
        for raw in ["{oops", r#"{"item":{}}"#, r#"{"type":"item"}"#, r#"{"type":"item","item":{"name":"x"}}"#] {
            assert!(
                matches!(StreamEvent::parse(raw), Err(HubError::Decode(_))),
                "{raw} should not parse"
            );
        }
    }

    #[test]
    fn unknown_types_pass_through() {
        assert_eq!(
            StreamEvent::parse(r#"{"type":"progress","done":3}"#).unwrap(),
            StreamEvent::Other("progress".into())
        );
    }
}

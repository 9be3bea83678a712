//! Label resolution — reduce a label's vote list to one consensus value.
//!
//! The remote names the account whose vote is authoritative through summary
//! pointers. They are consulted in fixed precedence:
//!
//! ```text
//! rejected > approved > disliked > recommended
//! ```
//!
//! The first pointer present selects an account; the resolved value is that
//! account's vote in `all`. With no pointer present the label resolves to 0.

use serde::Deserialize;

use crate::error::LabelError;

/// Account reference as embedded in label summaries and votes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AccountRef {
    #[serde(rename = "_account_id", default)]
    pub account_id: Option<u64>,
}

/// One reviewer's vote on a label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Vote {
    #[serde(default)]
    pub value: Option<i8>,
    #[serde(rename = "_account_id", default)]
    pub account_id: Option<u64>,
}

/// The per-label structure returned by the change detail endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LabelVotes {
    #[serde(default)]
    pub rejected: Option<AccountRef>,
    #[serde(default)]
    pub approved: Option<AccountRef>,
    #[serde(default)]
    pub disliked: Option<AccountRef>,
    #[serde(default)]
    pub recommended: Option<AccountRef>,
    #[serde(default)]
    pub all: Vec<Vote>,
}

impl LabelVotes {
    /// Highest-precedence summary pointer, with its name for diagnostics.
    fn authoritative(&self) -> Option<(&'static str, &AccountRef)> {
        [
            ("rejected", self.rejected.as_ref()),
            ("approved", self.approved.as_ref()),
            ("disliked", self.disliked.as_ref()),
            ("recommended", self.recommended.as_ref()),
        ]
        .into_iter()
        .find_map(|(name, pointer)| pointer.map(|account| (name, account)))
    }
}

/// Resolve a label to a single value in `-2..=2`.
///
/// A missing label resolves to 0. A summary pointer that names no account, or
/// an account without a matching vote, is a [`LabelError::DataShape`].
pub fn resolve(label: Option<&LabelVotes>) -> Result<i8, LabelError> {
    let Some(label) = label else {
        return Ok(0);
    };
    let Some((pointer, account)) = label.authoritative() else {
        return Ok(0);
    };

    let account_id = account.account_id.ok_or_else(|| LabelError::DataShape {
        reason: format!("'{pointer}' summary carries no account id"),
    })?;

    label
        .all
        .iter()
        .find(|vote| vote.account_id == Some(account_id))
        .map(|vote| vote.value.unwrap_or(0))
        .ok_or_else(|| LabelError::DataShape {
            reason: format!("'{pointer}' account {account_id} has no vote in 'all'"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn votes(json: serde_json::Value) -> LabelVotes {
        serde_json::from_value(json).expect("label json")
    }

    #[test]
    fn missing_label_resolves_to_zero() {
        assert_eq!(resolve(None).expect("resolve"), 0);
    }

    #[test]
    fn approved_account_vote_is_used() {
        let label = votes(serde_json::json!({
            "approved": { "_account_id": 7, "name": "John Connor" },
            "all": [
                { "value": 0, "_account_id": 4 },
                { "value": 1, "_account_id": 7 }
            ]
        }));
        assert_eq!(resolve(Some(&label)).expect("resolve"), 1);
    }

    #[test]
    fn rejected_wins_over_every_other_pointer() {
        let label = votes(serde_json::json!({
            "approved": { "_account_id": 70 },
            "recommended": { "_account_id": 70 },
            "rejected": { "_account_id": 9 },
            "all": [
                { "value": 1, "_account_id": 70 },
                { "value": -2, "_account_id": 9 }
            ]
        }));
        assert_eq!(resolve(Some(&label)).expect("resolve"), -2);
    }

    #[test]
    fn disliked_wins_over_recommended() {
        let label = votes(serde_json::json!({
            "recommended": { "_account_id": 1 },
            "disliked": { "_account_id": 2 },
            "all": [
                { "value": 1, "_account_id": 1 },
                { "value": -1, "_account_id": 2 }
            ]
        }));
        assert_eq!(resolve(Some(&label)).expect("resolve"), -1);
    }

    #[test]
    fn no_summary_pointer_resolves_to_zero() {
        let label = votes(serde_json::json!({
            "all": [ { "value": 2, "_account_id": 1 } ]
        }));
        assert_eq!(resolve(Some(&label)).expect("resolve"), 0);
    }

    #[test]
    fn pointer_without_matching_vote_is_data_shape_error() {
        let label = votes(serde_json::json!({
            "approved": { "_account_id": 42 },
            "all": [ { "value": 1, "_account_id": 7 } ]
        }));
        let err = resolve(Some(&label)).unwrap_err();
        assert!(matches!(err, LabelError::DataShape { .. }), "got: {err}");
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn pointer_without_account_id_is_data_shape_error() {
        let label = votes(serde_json::json!({ "rejected": {}, "all": [] }));
        assert!(resolve(Some(&label)).is_err());
    }
}

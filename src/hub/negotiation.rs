//! Bounded multi-round negotiation over the hub.
//!
//! Each round sends `{topic, proposal, round}` to every participant as a
//! [`MessageKind::Negotiation`] message. A round ends the negotiation when
//! any participant stays silent or replies with an empty value (no consensus) or when every reply agrees
//! (consensus). Otherwise the proposal is adjusted from the replies'
//! `feedback.suggestions` and the next round starts, up to
//! [`HubConfig::max_rounds`](super::HubConfig::max_rounds).
//!
//! Adjustment rules, applied reply by reply in participant order:
//!
//! - only keys already present in the proposal are touched;
//! - numeric current and suggested values are replaced by their mean;
//! - anything else is overwritten by the suggestion, so on conflicting
//!   suggestions the last participant in the list wins.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};

use super::bus::{is_meaningful, Hub};
use super::message::{Message, MessageKind};

/// One participant's reply in a round; `None` means no reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantResponse {
    pub participant: String,
    pub response: Option<Value>,
}

impl ParticipantResponse {
    /// No reply, or an empty one (`null`, `""`, `[]`, `{}`).
    pub fn is_silent(&self) -> bool {
        self.response.as_ref().map_or(true, |v| !is_meaningful(v))
    }
}

/// Record of one negotiation round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationRound {
    /// 1-based round number.
    pub round: u32,
    /// Proposal sent in this round.
    pub proposal: Map<String, Value>,
    pub responses: Vec<ParticipantResponse>,
}

/// Final result of [`Hub::negotiate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationOutcome {
    pub consensus: bool,
    pub final_proposal: Map<String, Value>,
    /// Number of rounds actually run.
    pub rounds: u32,
    /// Replies of the last round run.
    pub last_responses: Vec<ParticipantResponse>,
    pub history: Vec<NegotiationRound>,
}

impl Hub {
    /// Negotiate `proposal` on `topic` between `initiator` and `participants`.
    pub async fn negotiate(
        &self,
        initiator: &str,
        participants: &[&str],
        topic: &str,
        proposal: Map<String, Value>,
    ) -> NegotiationOutcome {
        log::info!(
            "Negotiation started - initiator: {}, topic: {}, participants: {:?}",
            initiator,
            topic,
            participants
        );

        let max_rounds = self.config().max_rounds.max(1);
        let mut current = proposal;
        let mut history: Vec<NegotiationRound> = Vec::new();
        let mut consensus = false;

        for round in 1..=max_rounds {
            let responses = self.collect_round(initiator, participants, topic, &current, round).await;
            history.push(NegotiationRound {
                round,
                proposal: current.clone(),
                responses: responses.clone(),
            });

            if responses.iter().any(ParticipantResponse::is_silent) {
                let silent: Vec<&str> = responses
                    .iter()
                    .filter(|r| r.is_silent())
                    .map(|r| r.participant.as_str())
                    .collect();
                log::warn!("Negotiation round {} missing replies from {:?}", round, silent);
                break;
            }

            let replies: Vec<&Value> = responses.iter().filter_map(|r| r.response.as_ref()).collect();
            if replies.iter().all(|r| indicates_agreement(r)) {
                log::info!("Negotiation reached consensus in round {}", round);
                consensus = true;
                break;
            }

            current = integrate_feedback(&current, &replies);
        }

        let rounds = history.len() as u32;
        let last_responses = history.last().map(|r| r.responses.clone()).unwrap_or_default();
        if !consensus {
            log::info!("Negotiation ended without consensus after {} round(s)", rounds);
        }

        NegotiationOutcome {
            consensus,
            final_proposal: current,
            rounds,
            last_responses,
            history,
        }
    }

    async fn collect_round(
        &self,
        initiator: &str,
        participants: &[&str],
        topic: &str,
        proposal: &Map<String, Value>,
        round: u32,
    ) -> Vec<ParticipantResponse> {
        let payload = json!({
            "topic": topic,
            "proposal": proposal,
            "round": round,
        });
        let deadline = self
            .config()
            .round_timeout
            .map(|limit| tokio::time::Instant::now() + limit);

        let sends = participants.iter().map(|participant| {
            let message = Message::new(initiator, *participant, MessageKind::Negotiation, payload.clone());
            async move {
                let response = match deadline {
                    Some(at) => tokio::time::timeout_at(at, self.send(message)).await.ok().flatten(),
                    None => self.send(message).await,
                };
                ParticipantResponse {
                    participant: participant.to_string(),
                    response,
                }
            }
        });
        join_all(sends).await
    }
}

/// `status == "agree"` or `agreement == true`.
pub fn indicates_agreement(response: &Value) -> bool {
    response.get("status").and_then(Value::as_str) == Some("agree")
        || response
            .get("agreement")
            .and_then(Value::as_bool)
            .unwrap_or(false)
}

/// Apply every reply's `feedback.suggestions` to a copy of `proposal`.
pub fn integrate_feedback(proposal: &Map<String, Value>, replies: &[&Value]) -> Map<String, Value> {
    let mut adjusted = proposal.clone();
    for reply in replies {
        let Some(suggestions) = reply
            .get("feedback")
            .and_then(|f| f.get("suggestions"))
            .and_then(Value::as_object)
        else {
            continue;
        };

        for (key, suggested) in suggestions {
            let Some(slot) = adjusted.get_mut(key) else {
                continue;
            };
            *slot = match (slot.as_f64(), suggested.as_f64()) {
                (Some(a), Some(b)) => Number::from_f64((a + b) / 2.0)
                    .map(Value::Number)
                    .unwrap_or_else(|| suggested.clone()),
                _ => suggested.clone(),
            };
        }
    }
    adjusted
}

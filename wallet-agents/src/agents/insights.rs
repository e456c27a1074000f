use std::sync::Arc;

use chrono::Utc;
use common::{parse_structured, LanguageModel, ModelError};
use serde::Deserialize;

use crate::models::{AgentFinding, AgentKind, FindingStatus, OverallAction, Recommendation, WalletRequest};

const INSIGHTS_SYSTEM_PROMPT: &str = r#"
You are the Insights Agent.
Your role is to combine the findings of the sentiment, technical and wallet analysts
into one recommendation for the wallet owner.

Guidelines:
- Weigh each finding by the weight given; ignore findings listed as missing
- Respect the investor preferences
- Prefer HOLD when the signals disagree
- Use REDUCE when the wallet is over-exposed even if the market looks fine
- Keep the rationale to a few sentences and name the signals you relied on

Reply with one JSON object only:
{"action": "BUY" | "SELL" | "HOLD" | "REDUCE", "rationale": "<short explanation>"}
"#;

const STRICT_REMINDER: &str = r#"
Your previous reply could not be parsed.
Reply with ONLY one JSON object and nothing else, exactly in this shape:
{"action": "BUY" | "SELL" | "HOLD" | "REDUCE", "rationale": "<short explanation>"}
"#;

/// Fraction of confidence a `PartialData` finding keeps.
pub const PARTIAL_DATA_DISCOUNT: f64 = 0.5;
/// A finding at or beyond this score counts toward the bullish or bearish side.
pub const SIDE_THRESHOLD: f64 = 0.25;

/// Weight a finding carries in the synthesis.
pub fn finding_weight(finding: &AgentFinding) -> f64 {
    match finding.status {
        FindingStatus::Ok => finding.confidence,
        FindingStatus::PartialData => finding.confidence * PARTIAL_DATA_DISCOUNT,
        FindingStatus::Failed => 0.0,
    }
}

/// One finding per kind (first wins), in Sentiment, Technical, Wallet order.
pub fn normalize_findings(findings: Vec<AgentFinding>) -> Vec<AgentFinding> {
    let mut normalized: Vec<AgentFinding> = Vec::with_capacity(AgentKind::ALL.len());
    for finding in findings {
        if normalized.iter().any(|f| f.agent_kind == finding.agent_kind) {
            tracing::warn!(agent = %finding.agent_kind, "Duplicate finding dropped");
            continue;
        }
        normalized.push(finding);
    }
    normalized.sort_by_key(|f| f.agent_kind);
    normalized
}

/// True when at least one weighted finding is bullish and another is
/// bearish, whatever their relative weight.
pub fn is_split(findings: &[AgentFinding]) -> bool {
    let weighted = || findings.iter().filter(|f| finding_weight(f) > 0.0);
    let bullish = weighted().any(|f| f.score >= SIDE_THRESHOLD);
    let bearish = weighted().any(|f| f.score <= -SIDE_THRESHOLD);
    bullish && bearish
}

/// Names every signal that is missing or discounted.
pub fn disclosure(findings: &[AgentFinding]) -> String {
    let mut missing: Vec<String> = findings
        .iter()
        .filter(|f| f.status == FindingStatus::Failed)
        .map(|f| format!("{} ({})", f.agent_kind, f.summary))
        .collect();
    for kind in AgentKind::ALL {
        if !findings.iter().any(|f| f.agent_kind == kind) {
            missing.push(format!("{} (not reported)", kind));
        }
    }
    let discounted: Vec<String> = findings
        .iter()
        .filter(|f| f.status == FindingStatus::PartialData)
        .map(|f| format!("{} (partial data, half weight)", f.agent_kind))
        .collect();

    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("Missing signals ({}): {}.", missing.len(), missing.join("; ")));
    }
    if !discounted.is_empty() {
        parts.push(format!("Discounted signals: {}.", discounted.join("; ")));
    }
    if parts.is_empty() {
        return "All signals available.".to_string();
    }
    parts.join(" ")
}

#[derive(Debug, Deserialize)]
struct ActionReply {
    action: String,
    rationale: String,
}

fn parse_action(text: &str) -> Result<ActionReply, ModelError> {
    let reply: ActionReply = parse_structured(text)?;
    if reply.rationale.trim().is_empty() {
        return Err(ModelError::Unparseable("empty rationale".to_string()));
    }
    Ok(reply)
}

/// Combines analyzer findings into the final recommendation.
pub struct InsightsAgent {
    model: Arc<dyn LanguageModel>,
}

impl InsightsAgent {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    fn render_prompt(request: &WalletRequest, findings: &[AgentFinding]) -> String {
        let mut prompt = format!(
            "Wallet: {}\nInvestor preferences: {}\n\nFindings:\n",
            request.wallet_address, request.preferences
        );
        for finding in findings.iter().filter(|f| f.is_usable()) {
            let partial = if finding.status == FindingStatus::PartialData {
                " (partial data)"
            } else {
                ""
            };
            prompt.push_str(&format!(
                "- {} | score {:+.2} | weight {:.2}{} | {}\n",
                finding.agent_kind,
                finding.score,
                finding_weight(finding),
                partial,
                finding.summary
            ));
        }

        let missing: Vec<String> = findings
            .iter()
            .filter(|f| !f.is_usable())
            .map(|f| f.agent_kind.to_string())
            .collect();
        if !missing.is_empty() {
            prompt.push_str(&format!("\nMissing: {}\n", missing.join(", ")));
        }

        prompt.push_str("\nSynthesize these findings into one recommendation and reply with the JSON object.");
        prompt
    }

    async fn ask(&self, prompt: &str) -> Result<ActionReply, ModelError> {
        let text = self.model.complete(INSIGHTS_SYSTEM_PROMPT, prompt).await?;
        parse_action(&text)
    }

    /// One model call, retried once on failure. `NoAction` is returned
    /// without calling the model when no finding is `Ok`.
    pub async fn synthesize(
        &self,
        request: &WalletRequest,
        findings: Vec<AgentFinding>,
    ) -> Result<Recommendation, ModelError> {
        let findings = normalize_findings(findings);
        let disclosure = disclosure(&findings);

        if !findings.iter().any(|f| f.status == FindingStatus::Ok) {
            tracing::info!(wallet = %request.wallet_address, "No usable signals, skipping synthesis");
            return Ok(Recommendation {
                wallet_address: request.wallet_address.clone(),
                overall_action: OverallAction::NoAction,
                rationale: format!("Insufficient data: no signal completed successfully. {}", disclosure),
                contributing_findings: findings,
                generated_at: Utc::now(),
            });
        }

        let prompt = Self::render_prompt(request, &findings);
        let reply = match self.ask(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(
                    model = %self.model.name(),
                    error = %err,
                    transient = err.is_transient(),
                    "Synthesis failed, retrying once"
                );
                let retry_prompt = match err {
                    ModelError::Unparseable(_) => format!("{}\n{}", prompt, STRICT_REMINDER),
                    _ => prompt.clone(),
                };
                self.ask(&retry_prompt).await?
            }
        };

        let mut action = OverallAction::from_model_label(&reply.action).unwrap_or_else(|| {
            tracing::warn!(action = %reply.action, "Unrecognized action, defaulting to HOLD");
            OverallAction::Hold
        });

        let mut rationale = reply.rationale.trim().to_string();
        if action.is_directional() && is_split(&findings) {
            tracing::info!(proposed = %action, "Signals are split, downgrading to HOLD");
            rationale.push_str(&format!(
                " Bullish and bearish signals conflict, so the proposed {} is downgraded to HOLD.",
                action
            ));
            action = OverallAction::Hold;
        }
        rationale.push_str("\n\n");
        rationale.push_str(&disclosure);

        tracing::info!(wallet = %request.wallet_address, action = %action, "Recommendation ready");
        Ok(Recommendation {
            wallet_address: request.wallet_address.clone(),
            overall_action: action,
            rationale,
            contributing_findings: findings,
            generated_at: Utc::now(),
        })
    }
}

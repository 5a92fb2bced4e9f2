//! Token budget gate.
//!
//! Estimates how large the first stage's input is and decides, once per run,
//! whether generation may start.

use tracing::{debug, warn};

use crate::gateway::TextGenerator;
use crate::pipeline::stages::explanation_request;
use crate::source::RepositorySnapshot;

/// Above this, anonymous callers must bring their own credential.
pub const CREDENTIAL_THRESHOLD_TOKENS: u64 = 50_000;

/// Above this, nobody gets a run.
pub const MAX_INPUT_TOKENS: u64 = 195_000;

/// Gate thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    pub credential_threshold: u64,
    pub max_input_tokens: u64,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            credential_threshold: CREDENTIAL_THRESHOLD_TOKENS,
            max_input_tokens: MAX_INPUT_TOKENS,
        }
    }
}

/// Why the gate turned a run away, with the limit that was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    CredentialRequired { estimate: u64, threshold: u64 },
    SizeExceeded { estimate: u64, limit: u64 },
}

impl GateRejection {
    pub fn message(&self) -> String {
        match self {
            GateRejection::CredentialRequired { threshold, .. } => format!(
                "File tree and README combined exceeds token limit ({}). This repository is too large for free generation. Provide your own OpenAI API key to continue.",
                group_thousands(*threshold)
            ),
            GateRejection::SizeExceeded { limit, .. } => format!(
                "Repository is too large (>{} tokens) for analysis. Try a smaller repo.",
                abbreviate_thousands(*limit)
            ),
        }
    }
}

/// `50000` -> `50,000`.
fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `195000` -> `195k`; anything not a whole thousand is grouped instead.
fn abbreviate_thousands(n: u64) -> String {
    if n >= 1_000 && n % 1_000 == 0 {
        format!("{}k", n / 1_000)
    } else {
        group_thousands(n)
    }
}

/// Gate outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Reject(GateRejection),
}

/// Deterministic fallback: one token per four characters, rounded up.
pub fn heuristic_token_estimate(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenGate {
    policy: GatePolicy,
}

impl TokenGate {
    pub fn new(policy: GatePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> GatePolicy {
        self.policy
    }

    /// Best-effort estimate of the stage-1 input. Never fails.
    pub async fn estimate_input_tokens(
        &self,
        counter: &dyn TextGenerator,
        model: &str,
        snapshot: &RepositorySnapshot,
        api_key: Option<&str>,
    ) -> u64 {
        let req = explanation_request(model, snapshot, api_key.map(str::to_string));
        match counter.count_input_tokens(&req).await {
            Ok(tokens) => {
                debug!(tokens, "provider token count");
                tokens
            }
            Err(err) => {
                let fallback = heuristic_token_estimate(&format!(
                    "{}\n{}",
                    snapshot.file_tree, snapshot.readme
                ));
                warn!(
                    error = %err,
                    code = err.code(),
                    fallback,
                    "token count failed, using character heuristic"
                );
                fallback
            }
        }
    }

    /// Apply the policy to an estimate.
    pub fn decide(&self, estimate: u64, has_credential: bool) -> GateDecision {
        if estimate > self.policy.max_input_tokens {
            return GateDecision::Reject(GateRejection::SizeExceeded {
                estimate,
                limit: self.policy.max_input_tokens,
            });
        }
        if estimate > self.policy.credential_threshold
            && estimate < self.policy.max_input_tokens
            && !has_credential
        {
            return GateDecision::Reject(GateRejection::CredentialRequired {
                estimate,
                threshold: self.policy.credential_threshold,
            });
        }
        GateDecision::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> TokenGate {
        TokenGate::default()
    }

    #[test]
    fn anonymous_boundary_at_credential_threshold() {
        assert_eq!(gate().decide(50_000, false), GateDecision::Proceed);
        assert_eq!(
            gate().decide(50_001, false),
            GateDecision::Reject(GateRejection::CredentialRequired {
                estimate: 50_001,
                threshold: 50_000
            })
        );
    }

    #[test]
    fn credential_lifts_the_lower_threshold() {
        assert_eq!(gate().decide(120_000, true), GateDecision::Proceed);
        assert_eq!(gate().decide(195_000, true), GateDecision::Proceed);
    }

    #[test]
    fn exact_upper_bound_proceeds_even_without_credential() {
        assert_eq!(gate().decide(195_000, false), GateDecision::Proceed);
    }

    #[test]
    fn size_limit_applies_regardless_of_credential() {
        for has_credential in [true, false] {
            assert_eq!(
                gate().decide(195_001, has_credential),
                GateDecision::Reject(GateRejection::SizeExceeded {
                    estimate: 195_001,
                    limit: 195_000
                })
            );
        }
    }

    #[test]
    fn custom_policy_is_honored() {
        let gate = TokenGate::new(GatePolicy {
            credential_threshold: 10,
            max_input_tokens: 100,
        });
        assert_eq!(gate.decide(10, false), GateDecision::Proceed);
        assert!(matches!(
            gate.decide(11, false),
            GateDecision::Reject(GateRejection::CredentialRequired { .. })
        ));
        assert!(matches!(
            gate.decide(101, true),
            GateDecision::Reject(GateRejection::SizeExceeded { .. })
        ));
    }

    #[test]
    fn default_messages_name_the_default_limits() {
        let GateDecision::Reject(credential) = gate().decide(60_000, false) else {
            panic!("expected a rejection");
        };
        assert_eq!(
            credential.message(),
            "File tree and README combined exceeds token limit (50,000). This repository is too large for free generation. Provide your own OpenAI API key to continue."
        );

        let GateDecision::Reject(size) = gate().decide(300_000, true) else {
            panic!("expected a rejection");
        };
        assert_eq!(
            size.message(),
            "Repository is too large (>195k tokens) for analysis. Try a smaller repo."
        );
    }

    #[test]
    fn messages_follow_a_custom_policy() {
        let gate = TokenGate::new(GatePolicy {
            credential_threshold: 1_234_567,
            max_input_tokens: 2_000_000,
        });

        let GateDecision::Reject(credential) = gate.decide(1_500_000, false) else {
            panic!("expected a rejection");
        };
        assert!(credential.message().contains("token limit (1,234,567)"));

        let GateDecision::Reject(size) = gate.decide(2_000_001, true) else {
            panic!("expected a rejection");
        };
        assert!(size.message().contains("(>2000k tokens)"));
        assert_eq!(abbreviate_thousands(100), "100");
        assert_eq!(abbreviate_thousands(12_500), "12,500");
    }

    #[test]
    fn heuristic_rounds_up() {
        assert_eq!(heuristic_token_estimate(""), 0);
        assert_eq!(heuristic_token_estimate("abc"), 1);
        assert_eq!(heuristic_token_estimate("abcd"), 1);
        assert_eq!(heuristic_token_estimate("abcde"), 2);
        // characters, not bytes
        assert_eq!(heuristic_token_estimate("éééé"), 1);
    }
}

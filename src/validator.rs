//! Transaction completeness checks
//!
//! Rules-based: each rule inspects the running transaction and either passes
//! or reports a message. Blocking rules become errors, advisory rules become
//! suggestions. Pure and total.

use crate::models::{TransactionData, TransactionType, ValidationResult};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSeverity {
    /// Failing makes the transaction invalid.
    Blocking,
    /// Failing only adds a suggestion.
    Advisory,
}

/// Trait for validation rules
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn severity(&self) -> RuleSeverity;

    /// `Some(message)` when the rule fails.
    fn check(&self, data: &TransactionData) -> Option<String>;
}

/// Validation engine that applies rules in registration order
pub struct TransactionValidator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl TransactionValidator {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn ValidationRule>) {
        self.rules.push(rule);
    }

    pub fn validate(&self, data: &TransactionData) -> ValidationResult {
        let mut errors = Vec::new();
        let mut suggestions = Vec::new();

        match data.kind {
            TransactionType::FiatConversion => {
                for rule in &self.rules {
                    if let Some(message) = rule.check(data) {
                        debug!(rule = rule.name(), "Validation rule failed");
                        match rule.severity() {
                            RuleSeverity::Blocking => errors.push(message),
                            RuleSeverity::Advisory => suggestions.push(message),
                        }
                    }
                }
            }
        }

        ValidationResult {
            is_valid: errors.is_empty(),
            errors,
            suggestions,
        }
    }
}

impl Default for TransactionValidator {
    fn default() -> Self {
        create_default_validator()
    }
}

fn is_blank(slot: &Option<String>) -> bool {
    slot.as_deref().map_or(true, |s| s.trim().is_empty())
}

/// Rule: the token being sold must be known
pub struct TokenRequiredRule;

impl ValidationRule for TokenRequiredRule {
    fn name(&self) -> &'static str {
        "token_required"
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::Blocking
    }

    fn check(&self, data: &TransactionData) -> Option<String> {
        is_blank(&data.token_in).then(|| "Token to convert is required".to_string())
    }
}

/// Rule: a crypto amount or a fiat amount, either one is enough
pub struct AmountRequiredRule;

impl ValidationRule for AmountRequiredRule {
    fn name(&self) -> &'static str {
        "amount_required"
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::Blocking
    }

    fn check(&self, data: &TransactionData) -> Option<String> {
        (is_blank(&data.amount_in) && is_blank(&data.fiat_amount))
            .then(|| "Amount is required".to_string())
    }
}

/// Rule: the payout currency should be stated
pub struct FiatCurrencyRule;

impl ValidationRule for FiatCurrencyRule {
    fn name(&self) -> &'static str {
        "fiat_currency_suggested"
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::Advisory
    }

    fn check(&self, data: &TransactionData) -> Option<String> {
        is_blank(&data.fiat_currency)
            .then(|| "Specify the fiat currency you want to receive (e.g. NGN)".to_string())
    }
}

/// Create a validator with the fiat-conversion rules
pub fn create_default_validator() -> TransactionValidator {
    let mut validator = TransactionValidator::new();
    validator.add_rule(Box::new(TokenRequiredRule));
    validator.add_rule(Box::new(AmountRequiredRule));
    validator.add_rule(Box::new(FiatCurrencyRule));
    validator
}

/// Validate with the default rule set.
pub fn validate(data: &TransactionData) -> ValidationResult {
    create_default_validator().validate(data)
}

use std::fmt;
use std::str::FromStr;

use crate::studio::error::StudioError;
use crate::studio::types::BatchSize;

/// Free generations granted to a new account, consumed by the first batch.
pub const FREE_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreditPack {
    pub amount: u32,
    pub price: f64,
    pub label: &'static str,
}

pub const CREDIT_PACKS: [CreditPack; 4] = [
    CreditPack { amount: 10, price: 15.00, label: "Starter Pack" },
    CreditPack { amount: 25, price: 35.00, label: "Creator Pack" },
    CreditPack { amount: 50, price: 65.00, label: "Professional Pack" },
    CreditPack { amount: 100, price: 120.00, label: "Studio Pack" },
];

pub const BASIC_SUB_FEE: f64 = 4.99;
pub const PRO_SUB_FEE: f64 = 9.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionLevel {
    #[default]
    None,
    Basic,
    Pro,
}

impl SubscriptionLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionLevel::None => "none",
            SubscriptionLevel::Basic => "basic",
            SubscriptionLevel::Pro => "pro",
        }
    }

    pub fn monthly_fee(self) -> f64 {
        match self {
            SubscriptionLevel::None => 0.0,
            SubscriptionLevel::Basic => BASIC_SUB_FEE,
            SubscriptionLevel::Pro => PRO_SUB_FEE,
        }
    }
}

impl FromStr for SubscriptionLevel {
    type Err = StudioError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(SubscriptionLevel::None),
            "basic" => Ok(SubscriptionLevel::Basic),
            "pro" => Ok(SubscriptionLevel::Pro),
            _ => Err(StudioError::InvalidSubscription(value.to_string())),
        }
    }
}

impl fmt::Display for SubscriptionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreditState {
    pub free_generations_remaining: u32,
    pub subscription_level: SubscriptionLevel,
    pub credits_remaining: u32,
    pub api_key_set: bool,
}

impl CreditState {
    pub fn new(initial_credits: u32, api_key_set: bool) -> Self {
        Self {
            free_generations_remaining: FREE_LIMIT,
            subscription_level: SubscriptionLevel::None,
            credits_remaining: initial_credits,
            api_key_set,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription_level != SubscriptionLevel::None
    }

    /// The trial is only active while none of it has been used.
    pub fn free_trial_active(&self) -> bool {
        self.free_generations_remaining == FREE_LIMIT
    }

    pub fn authorize_batch(&self, batch_size: BatchSize) -> Result<(), StudioError> {
        if !self.api_key_set {
            return Err(StudioError::MissingApiKey);
        }
        let needed = batch_size.count() as u32;
        let subscribed = self.is_subscribed();
        let trial = self.free_trial_active();

        if trial && needed > FREE_LIMIT && !subscribed {
            return Err(StudioError::TrialBatchTooLarge);
        }
        if !trial && !subscribed && self.credits_remaining < needed {
            return Err(StudioError::InsufficientCredits {
                needed,
                available: self.credits_remaining,
            });
        }
        Ok(())
    }

    /// Charges a finished batch by the number of images it produced.
    pub fn charge_batch(&mut self, produced: usize) {
        if self.free_generations_remaining > 0 {
            self.free_generations_remaining = 0;
            return;
        }
        let produced = u32::try_from(produced).unwrap_or(u32::MAX);
        self.credits_remaining = self.credits_remaining.saturating_sub(produced);
    }

    pub fn authorize_regeneration(&self) -> Result<(), StudioError> {
        if !self.api_key_set {
            return Err(StudioError::MissingApiKey);
        }
        if !self.is_subscribed() && self.credits_remaining < 1 {
            return Err(StudioError::InsufficientCredits {
                needed: 1,
                available: self.credits_remaining,
            });
        }
        Ok(())
    }

    pub fn charge_regeneration(&mut self) {
        self.credits_remaining = self.credits_remaining.saturating_sub(1);
    }

    pub fn top_up(&mut self, pack_amount: u32) -> Result<CreditPack, StudioError> {
        let pack = CREDIT_PACKS
            .iter()
            .find(|pack| pack.amount == pack_amount)
            .copied()
            .ok_or(StudioError::UnknownCreditPack(pack_amount))?;
        self.credits_remaining = self.credits_remaining.saturating_add(pack.amount);
        Ok(pack)
    }

    pub fn subscribe(&mut self, level: SubscriptionLevel) {
        self.subscription_level = level;
    }
}

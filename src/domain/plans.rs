//! Static pricing catalogue: subscription plans, one-time credit packs and
//! per-operation credit costs. Read-only.

use crate::error::{BustError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Starter,
    Pro,
    Premium,
    Enterprise,
    /// One-time credit pack, not a subscription.
    Credits,
}

impl PlanType {
    pub fn is_subscription(&self) -> bool {
        !matches!(self, Self::Credits)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Premium => "premium",
            Self::Enterprise => "enterprise",
            Self::Credits => "credits",
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = BustError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "starter" => Ok(Self::Starter),
            "pro" => Ok(Self::Pro),
            "premium" => Ok(Self::Premium),
            "enterprise" => Ok(Self::Enterprise),
            "credits" => Ok(Self::Credits),
            other => Err(BustError::ValidationError(format!(
                "Invalid plan type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    #[default]
    Monthly,
    Yearly,
}

impl FromStr for BillingInterval {
    type Err = BustError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            other => Err(BustError::ValidationError(format!(
                "Invalid billing interval: {other}"
            ))),
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct IntervalPair<T> {
    pub monthly: T,
    pub yearly: T,
}

impl<T: Copy> IntervalPair<T> {
    pub fn get(&self, interval: BillingInterval) -> T {
        match interval {
            BillingInterval::Monthly => self.monthly,
            BillingInterval::Yearly => self.yearly,
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanFeatures {
    /// `None` means unlimited.
    pub max_projects: Option<u32>,
    pub high_quality_generation: bool,
    pub custom_materials: bool,
    pub priority_support: bool,
    pub export_formats: Vec<&'static str>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Plan {
    pub id: PlanType,
    pub name: &'static str,
    pub description: &'static str,
    pub price: IntervalPair<Decimal>,
    pub credits: IntervalPair<u64>,
    pub features: PlanFeatures,
    pub popular: bool,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct CreditPack {
    pub credits: u64,
    pub price: Decimal,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct GenerationCosts {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
    pub ultra: u64,
}

/// The full read-only catalogue served by the plans listing.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Catalogue {
    pub plans: Vec<Plan>,
    pub credit_packs: Vec<CreditPack>,
    pub generation_costs: GenerationCosts,
}

/// A resolved price for a purchase intent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub plan_type: PlanType,
    pub interval: Option<BillingInterval>,
    pub amount: Decimal,
    pub credits: u64,
}

impl Catalogue {
    pub fn standard() -> Self {
        Self {
            plans: vec![
                Plan {
                    id: PlanType::Starter,
                    name: "Starter",
                    description: "Perfect for trying out 3D bust generation",
                    price: IntervalPair {
                        monthly: dec!(9.99),
                        yearly: dec!(99.99),
                    },
                    credits: IntervalPair {
                        monthly: 50,
                        yearly: 600,
                    },
                    features: PlanFeatures {
                        max_projects: Some(25),
                        high_quality_generation: false,
                        custom_materials: false,
                        priority_support: false,
                        export_formats: vec!["obj"],
                    },
                    popular: false,
                },
                Plan {
                    id: PlanType::Pro,
                    name: "Pro",
                    description: "For creators and small businesses",
                    price: IntervalPair {
                        monthly: dec!(24.99),
                        yearly: dec!(249.99),
                    },
                    credits: IntervalPair {
                        monthly: 150,
                        yearly: 1800,
                    },
                    features: PlanFeatures {
                        max_projects: Some(100),
                        high_quality_generation: true,
                        custom_materials: true,
                        priority_support: false,
                        export_formats: vec!["obj", "stl", "ply"],
                    },
                    popular: true,
                },
                Plan {
                    id: PlanType::Premium,
                    name: "Premium",
                    description: "For professionals and agencies",
                    price: IntervalPair {
                        monthly: dec!(49.99),
                        yearly: dec!(499.99),
                    },
                    credits: IntervalPair {
                        monthly: 400,
                        yearly: 4800,
                    },
                    features: PlanFeatures {
                        max_projects: Some(500),
                        high_quality_generation: true,
                        custom_materials: true,
                        priority_support: true,
                        export_formats: vec!["obj", "stl", "ply", "gltf"],
                    },
                    popular: false,
                },
                Plan {
                    id: PlanType::Enterprise,
                    name: "Enterprise",
                    description: "For large teams and organizations",
                    price: IntervalPair {
                        monthly: dec!(99.99),
                        yearly: dec!(999.99),
                    },
                    credits: IntervalPair {
                        monthly: 1000,
                        yearly: 12000,
                    },
                    features: PlanFeatures {
                        max_projects: None,
                        high_quality_generation: true,
                        custom_materials: true,
                        priority_support: true,
                        export_formats: vec!["obj", "stl", "ply", "gltf", "fbx"],
                    },
                    popular: false,
                },
            ],
            credit_packs: vec![
                CreditPack {
                    credits: 25,
                    price: dec!(9.99),
                },
                CreditPack {
                    credits: 50,
                    price: dec!(19.99),
                },
                CreditPack {
                    credits: 100,
                    price: dec!(34.99),
                },
                CreditPack {
                    credits: 250,
                    price: dec!(79.99),
                },
            ],
            generation_costs: GenerationCosts {
                low: 1,
                medium: 2,
                high: 3,
                ultra: 5,
            },
        }
    }

    pub fn plan(&self, plan_type: PlanType) -> Option<&Plan> {
        self.plans.iter().find(|plan| plan.id == plan_type)
    }

    pub fn quote_subscription(&self, plan_type: PlanType, interval: BillingInterval) -> Result<Quote> {
        let plan = self.plan(plan_type).ok_or_else(|| {
            BustError::ValidationError(format!("Invalid plan type: {plan_type}"))
        })?;
        Ok(Quote {
            plan_type,
            interval: Some(interval),
            amount: plan.price.get(interval),
            credits: plan.credits.get(interval),
        })
    }

    pub fn quote_credit_pack(&self, credits: u64) -> Result<Quote> {
        let pack = self
            .credit_packs
            .iter()
            .find(|pack| pack.credits == credits)
            .ok_or_else(|| BustError::ValidationError("Invalid credit package".to_string()))?;
        Ok(Quote {
            plan_type: PlanType::Credits,
            interval: None,
            amount: pack.price,
            credits: pack.credits,
        })
    }
}

// Discounts Module
//
// Eligibility and calculation engine for discount codes: rule validation,
// the ordered eligibility chain, per-line-item adjustments, dynamic child
// codes and region assignment, composed by `DiscountService`.

pub mod calculator;
pub mod collaborators;
pub mod conditions;
pub mod duration;
pub mod dynamic_codes;
pub mod eligibility;
pub mod models;
pub mod regions;
pub mod repository;
pub mod rule_validator;
pub mod service;


pub use calculator::DiscountCalculator;
pub use collaborators::{
    ConditionStore, Customer, CustomerLookup, LineItemTotals, Product, ProductLookup, Region,
    RegionLookup, SubtotalOptions, TotalsCalculator,
};
pub use conditions::ConditionEvaluator;
pub use duration::IsoDuration;
pub use eligibility::{EligibilityChain, EligibilityCheck, Ineligible, ELIGIBILITY_CHECKS};
pub use models::*;
pub use repository::{DiscountRepository, MemoryDiscountRepository, PgDiscountRepository};
pub use service::DiscountService;

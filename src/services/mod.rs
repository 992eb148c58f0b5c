//! Business logic services.

pub mod auth;
pub mod cleanup;
pub mod fanout;
pub mod image_rules;
pub mod product;
pub mod reparse;
pub mod rule_validation;

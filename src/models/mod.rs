//! Domain models and DTOs for projects, services and their satellites.

pub mod environment;
pub mod job;
pub mod product;
pub mod role;
pub mod service;

//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository attempts into retried, logged board operations.
//! - Keep callers decoupled from storage details.

pub mod board_service;

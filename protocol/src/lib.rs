// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # AP2 Mandates — Core Library
//!
//! The verifiable mandate chain behind agent-initiated payments: a user
//! signs an **Intent**, a merchant signs a **Cart** that narrows it, a
//! payment processor signs a **Payment** that matches the cart exactly, and
//! every hop is checked before money moves.
//!
//! ## Architecture
//!
//! - **config** — Protocol constants and the YAML-loaded `ProtocolConfig`.
//! - **crypto** — Ed25519 keys, RFC 8785 canonical JSON, DSSE signing, hashes.
//! - **mandate** — Mandate types, scopes, the builder and signed envelopes.
//! - **registry** — Role capability table and the trusted key directory.
//! - **validation** — The chain validator, clock and replay guard.
//! - **transaction** — State machine, audit log and the per-transaction engine.
//! - **storage** — sled persistence for records and consumed nonces.
//!
//! ## Design Philosophy
//!
//! 1. A mandate is data. Its signature covers the canonical bytes and
//!    nothing else, so any holder can re-verify it offline.
//! 2. Validation returns a verdict value. Errors are reserved for misuse
//!    of the API and for storage failures.
//! 3. No floating point anywhere near an amount.
//! 4. Every transition attempt leaves an audit entry.

pub mod config;
pub mod crypto;
pub mod mandate;
pub mod registry;
pub mod storage;
pub mod transaction;
pub mod validation;

#[cfg(test)]
mod testkit;

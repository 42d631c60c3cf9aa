//! # Transaction State Machine
//!
//! Transitions on a [`TransactionRecord`]. Every attempt that reaches a
//! non-terminal, non-halted record appends exactly one audit entry for the
//! attempt itself (a rejection that exhausts the rejection budget, or an
//! attempt that finds the chain expired, appends the follow-up `Abort` or
//! `Timeout` entry after it).
//!
//! ## Guard order
//!
//! 1. halted record: refused, nothing recorded;
//! 2. audit log fails to replay: record halts, nothing recorded;
//! 3. terminal record: refused, nothing recorded;
//! 4. transition not permitted from the current state: a `Refused` entry.
//!
//! Submissions then check the active chain's deadline, and only then run
//! the validator over `[accepted prefix.., candidate]`. The validator sees
//! the full chain every time, so a superseding cart is checked against the
//! intent exactly like the first cart was.

use chrono::{DateTime, Utc};

use super::audit::{AuditDraft, AuditOutcome};
use super::record::{Settlement, SettlementReport, TransactionError, TransactionRecord};
use super::state::{TransactionState, Transition};
use crate::mandate::{MandateId, MandateKind, SignedMandate};
use crate::validation::{MandateChainValidator, RejectReason, ValidationResult};

impl TransactionRecord {
    // -----------------------------------------------------------------------
    // Submissions
    // -----------------------------------------------------------------------

    /// `Created -> IntentAuthorized` iff `[intent]` is accepted.
    pub fn submit_intent(
        &mut self,
        validator: &MandateChainValidator,
        intent: SignedMandate,
    ) -> Result<ValidationResult, TransactionError> {
        self.submit(validator, MandateKind::Intent, intent)
    }

    /// `IntentAuthorized -> CartAuthorized` iff `[intent, cart]` is accepted.
    /// From `CartAuthorized` an accepted cart supersedes the current one.
    pub fn submit_cart(
        &mut self,
        validator: &MandateChainValidator,
        cart: SignedMandate,
    ) -> Result<ValidationResult, TransactionError> {
        self.submit(validator, MandateKind::Cart, cart)
    }

    /// `CartAuthorized -> PaymentAuthorized` iff `[intent, cart, payment]` is
    /// accepted. The chain is frozen afterwards.
    pub fn submit_payment(
        &mut self,
        validator: &MandateChainValidator,
        payment: SignedMandate,
    ) -> Result<ValidationResult, TransactionError> {
        self.submit(validator, MandateKind::Payment, payment)
    }

    fn submit(
        &mut self,
        validator: &MandateChainValidator,
        kind: MandateKind,
        candidate: SignedMandate,
    ) -> Result<ValidationResult, TransactionError> {
        let (transition, target) = match kind {
            MandateKind::Intent => (Transition::SubmitIntent, TransactionState::IntentAuthorized),
            MandateKind::Cart => (Transition::SubmitCart, TransactionState::CartAuthorized),
            MandateKind::Payment => (Transition::SubmitPayment, TransactionState::PaymentAuthorized),
        };
        let now = validator.now();
        self.guard(transition, Some(&candidate.mandate.id), now)?;

        if let Some(expired) = self.expire_on_attempt(validator, transition, &candidate.mandate.id, now) {
            return Ok(expired);
        }

        let prefix = kind.index();
        let chain = self.arena.chain_with(prefix, &candidate);
        let result = validator.validate_append(&chain, prefix);

        match &result {
            ValidationResult::Accepted => {
                let superseded = self.arena.active(kind).map(|m| m.mandate.id.clone());
                let id = candidate.mandate.id.clone();
                self.arena.accept(candidate);
                self.record(
                    now,
                    transition,
                    target,
                    Some(id.clone()),
                    AuditOutcome::Accepted,
                    superseded.as_ref().map(|old| format!("supersedes {old}")),
                );
                tracing::info!(
                    tx = %self.id,
                    mandate_id = %id,
                    state = %self.state,
                    superseded = superseded.is_some(),
                    "transition applied"
                );
            }
            ValidationResult::Rejected {
                reason,
                mandate_id,
                detail,
            } => {
                let state = self.state;
                self.record(
                    now,
                    transition,
                    state,
                    mandate_id.clone().or_else(|| Some(candidate.mandate.id.clone())),
                    AuditOutcome::Rejected(*reason),
                    Some(detail.clone()),
                );
                self.rejection_count += 1;
                if self.rejection_count >= self.max_rejections {
                    tracing::warn!(
                        tx = %self.id,
                        rejections = self.rejection_count,
                        "rejection budget exhausted"
                    );
                    self.record(
                        now,
                        Transition::Abort,
                        TransactionState::Failed,
                        None,
                        AuditOutcome::Accepted,
                        Some(format!("rejection budget exhausted after {} rejections", self.rejection_count)),
                    );
                }
            }
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Processor outcome for a frozen chain. Not validator-gated.
    pub fn confirm_settlement(
        &mut self,
        report: SettlementReport,
        now: DateTime<Utc>,
    ) -> Result<TransactionState, TransactionError> {
        let payment_id = self.arena.active(MandateKind::Payment).map(|m| m.mandate.id.clone());
        self.guard(Transition::ConfirmSettlement, payment_id.as_ref(), now)?;

        let (to, note) = match &report {
            SettlementReport::Settled { processor_reference } => {
                (TransactionState::Settled, format!("processor reference {processor_reference}"))
            }
            SettlementReport::Failed { reason_code } => {
                (TransactionState::Failed, format!("processor failure {reason_code}"))
            }
        };
        self.settlement = Some(Settlement {
            report,
            recorded_at: now,
        });
        self.record(
            now,
            Transition::ConfirmSettlement,
            to,
            payment_id,
            AuditOutcome::Accepted,
            Some(note),
        );
        tracing::info!(tx = %self.id, state = %to, "settlement recorded");
        Ok(to)
    }

    /// Move to `Expired` if the active chain's deadline has passed. Returns
    /// whether the timeout fired. Nothing is recorded when it does not.
    pub fn check_timeout(&mut self, validator: &MandateChainValidator) -> Result<bool, TransactionError> {
        if self.halted {
            return Err(TransactionError::Halted);
        }
        if self.state.is_terminal() {
            return Ok(false);
        }
        let Some((head, deadline)) = self.head() else {
            return Ok(false);
        };
        if !validator.is_expired(deadline) {
            return Ok(false);
        }
        self.verify_integrity()?;
        self.expire(validator.now(), head, deadline);
        Ok(true)
    }

    /// Explicit cancellation, e.g. the user declined the cart.
    pub fn abort(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), TransactionError> {
        self.guard(Transition::Abort, None, now)?;
        self.record(
            now,
            Transition::Abort,
            TransactionState::Failed,
            None,
            AuditOutcome::Accepted,
            Some(reason.to_string()),
        );
        tracing::info!(tx = %self.id, reason, "transaction aborted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn guard(
        &mut self,
        transition: Transition,
        mandate_id: Option<&MandateId>,
        now: DateTime<Utc>,
    ) -> Result<(), TransactionError> {
        self.verify_integrity()?;
        if self.state.is_terminal() {
            return Err(TransactionError::Terminal(self.state));
        }
        if !transition.permitted_from(self.state) {
            let state = self.state;
            self.record(
                now,
                transition,
                state,
                mandate_id.cloned(),
                AuditOutcome::Refused,
                Some(format!("{transition} is not permitted from {state}")),
            );
            tracing::warn!(tx = %self.id, %transition, %state, "transition refused");
            return Err(TransactionError::InvalidTransition { state, transition });
        }
        Ok(())
    }

    /// The active mandate with the earliest expiry, and that expiry.
    fn head(&self) -> Option<(MandateId, DateTime<Utc>)> {
        self.arena
            .active_chain()
            .min_by_key(|m| m.mandate.expires_at)
            .map(|m| (m.mandate.id.clone(), m.mandate.expires_at))
    }

    fn expire_on_attempt(
        &mut self,
        validator: &MandateChainValidator,
        transition: Transition,
        candidate: &MandateId,
        now: DateTime<Utc>,
    ) -> Option<ValidationResult> {
        let (head, deadline) = self.head()?;
        if !validator.is_expired(deadline) {
            return None;
        }
        let detail = format!("mandate {head} expired at {deadline}");
        let state = self.state;
        self.record(
            now,
            transition,
            state,
            Some(candidate.clone()),
            AuditOutcome::Rejected(RejectReason::Expired),
            Some(detail.clone()),
        );
        self.expire(now, head.clone(), deadline);
        Some(ValidationResult::Rejected {
            reason: RejectReason::Expired,
            mandate_id: Some(head),
            detail,
        })
    }

    fn expire(&mut self, now: DateTime<Utc>, head: MandateId, deadline: DateTime<Utc>) {
        self.record(
            now,
            Transition::Timeout,
            TransactionState::Expired,
            Some(head.clone()),
            AuditOutcome::Accepted,
            Some(format!("deadline {deadline} passed")),
        );
        tracing::info!(tx = %self.id, mandate_id = %head, "transaction expired");
    }

    fn record(
        &mut self,
        timestamp: DateTime<Utc>,
        transition: Transition,
        to: TransactionState,
        mandate_id: Option<MandateId>,
        outcome: AuditOutcome,
        reason: Option<String>,
    ) {
        let from = self.state;
        self.audit.append(AuditDraft {
            timestamp,
            transition,
            from,
            to,
            mandate_id,
            outcome,
            reason,
        });
        if outcome == AuditOutcome::Accepted {
            self.state = to;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Role, RoleRegistry};
    use crate::testkit::Parties;
    use crate::transaction::audit::IntegrityError;
    use chrono::Duration;
    use TransactionState::*;

    fn settled() -> SettlementReport {
        SettlementReport::Settled {
            processor_reference: "psp-0001".into(),
        }
    }

    #[test]
    fn happy_path_reaches_settled() {
        let p = Parties::new();
        let v = p.validator();
        let chain = p.happy_chain();
        let mut rec = TransactionRecord::new(p.start);

        assert!(rec.submit_intent(&v, chain[0].clone()).unwrap().is_accepted());
        assert_eq!(rec.state(), IntentAuthorized);
        assert!(rec.submit_cart(&v, chain[1].clone()).unwrap().is_accepted());
        assert_eq!(rec.state(), CartAuthorized);
        assert!(rec.submit_payment(&v, chain[2].clone()).unwrap().is_accepted());
        assert_eq!(rec.state(), PaymentAuthorized);

        assert_eq!(rec.confirm_settlement(settled(), p.start), Ok(Settled));
        assert_eq!(rec.audit_log().len(), 4);
        assert_eq!(rec.audit_log().verify(), Ok(Settled));
        assert!(rec.settlement().is_some());
    }

    #[test]
    fn processor_failure_moves_to_failed() {
        let p = Parties::new();
        let v = p.validator();
        let chain = p.happy_chain();
        let mut rec = TransactionRecord::new(p.start);
        for (i, m) in chain.into_iter().enumerate() {
            let r = match i {
                0 => rec.submit_intent(&v, m),
                1 => rec.submit_cart(&v, m),
                _ => rec.submit_payment(&v, m),
            };
            assert!(r.unwrap().is_accepted());
        }
        let report = SettlementReport::Failed {
            reason_code: "insufficient_funds".into(),
        };
        assert_eq!(rec.confirm_settlement(report, p.start), Ok(Failed));
    }

    #[test]
    fn payment_from_created_is_refused_and_audited() {
        let p = Parties::new();
        let v = p.validator();
        let chain = p.happy_chain();
        let mut rec = TransactionRecord::new(p.start);

        let err = rec.submit_payment(&v, chain[2].clone()).unwrap_err();
        assert_eq!(
            err,
            TransactionError::InvalidTransition {
                state: Created,
                transition: Transition::SubmitPayment,
            }
        );
        assert_eq!(rec.state(), Created);
        assert_eq!(rec.audit_log().len(), 1);
        assert_eq!(rec.audit_log().entries()[0].outcome, AuditOutcome::Refused);
        // Refusals never reach the validator.
        assert!(v.replay_guard().is_empty());
        assert_eq!(rec.rejection_count(), 0);
    }

    #[test]
    fn expired_intent_at_cart_submission_expires_transaction() {
        let p = Parties::new();
        let v = p.validator();
        let intent = p.intent(10_000);
        let cart = p.cart(&intent.mandate.id, 8_000);
        let mut rec = TransactionRecord::new(p.start);
        rec.submit_intent(&v, intent.clone()).unwrap();

        p.clock.advance(Duration::hours(2));
        let r = rec.submit_cart(&v, cart).unwrap();
        assert_eq!(r.reason(), Some(RejectReason::Expired));
        assert_eq!(r.mandate_id(), Some(&intent.mandate.id));
        assert_eq!(rec.state(), Expired);

        let entries = rec.audit_log().entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].outcome, AuditOutcome::Rejected(RejectReason::Expired));
        assert_eq!(entries[2].transition, Transition::Timeout);
        assert_eq!(rec.audit_log().verify(), Ok(Expired));
    }

    #[test]
    fn cart_supersession_replaces_active_cart() {
        let p = Parties::new();
        let v = p.validator();
        let intent = p.intent(10_000);
        let first = p.cart(&intent.mandate.id, 8_000);
        let second = p.cart(&intent.mandate.id, 6_000);
        let mut rec = TransactionRecord::new(p.start);

        rec.submit_intent(&v, intent.clone()).unwrap();
        rec.submit_cart(&v, first.clone()).unwrap();
        assert!(rec.submit_cart(&v, second.clone()).unwrap().is_accepted());

        assert_eq!(rec.state(), CartAuthorized);
        assert_eq!(rec.arena().active(MandateKind::Cart), Some(&second));
        assert_eq!(rec.arena().superseded().count(), 1);
        let last = rec.audit_log().last().unwrap();
        assert_eq!(last.reason.as_deref(), Some(format!("supersedes {}", first.mandate.id).as_str()));

        // Payment must now match the superseding cart.
        let stale = p.payment(&first.mandate.id, 8_000);
        assert_eq!(
            rec.submit_payment(&v, stale).unwrap().reason(),
            Some(RejectReason::BrokenLink)
        );
        let payment = p.payment(&second.mandate.id, 6_000);
        assert!(rec.submit_payment(&v, payment).unwrap().is_accepted());
    }

    #[test]
    fn superseding_cart_must_still_narrow_intent() {
        let p = Parties::new();
        let v = p.validator();
        let intent = p.intent(10_000);
        let mut rec = TransactionRecord::new(p.start);
        rec.submit_intent(&v, intent.clone()).unwrap();
        rec.submit_cart(&v, p.cart(&intent.mandate.id, 8_000)).unwrap();

        let r = rec.submit_cart(&v, p.cart(&intent.mandate.id, 15_000)).unwrap();
        assert_eq!(r.reason(), Some(RejectReason::ScopeViolation));
        assert_eq!(rec.state(), CartAuthorized);
        assert_eq!(rec.arena().superseded().count(), 0);
    }

    #[test]
    fn rejection_budget_exhaustion_fails_transaction() {
        let p = Parties::new();
        let v = p.validator();
        let intent = p.intent(10_000);
        let mut rec = TransactionRecord::with_max_rejections(p.start, 3);
        rec.submit_intent(&v, intent.clone()).unwrap();

        for n in 1..=3 {
            let r = rec.submit_cart(&v, p.cart(&intent.mandate.id, 20_000)).unwrap();
            assert_eq!(r.reason(), Some(RejectReason::ScopeViolation));
            assert_eq!(rec.rejection_count(), n);
        }
        assert_eq!(rec.state(), Failed);
        assert_eq!(rec.audit_log().len(), 5);
        assert_eq!(rec.audit_log().last().unwrap().transition, Transition::Abort);
        assert_eq!(rec.audit_log().verify(), Ok(Failed));
    }

    #[test]
    fn terminal_record_refuses_without_audit() {
        let p = Parties::new();
        let v = p.validator();
        let mut rec = TransactionRecord::new(p.start);
        rec.abort("user declined", p.start).unwrap();
        assert_eq!(rec.state(), Failed);

        let len = rec.audit_log().len();
        assert_eq!(
            rec.submit_intent(&v, p.intent(10_000)).unwrap_err(),
            TransactionError::Terminal(Failed)
        );
        assert_eq!(rec.abort("again", p.start), Err(TransactionError::Terminal(Failed)));
        assert_eq!(rec.audit_log().len(), len);
    }

    #[test]
    fn corrupted_log_halts_record() {
        let p = Parties::new();
        let v = p.validator();
        let intent = p.intent(10_000);
        let mut rec = TransactionRecord::new(p.start);
        rec.submit_intent(&v, intent.clone()).unwrap();

        rec.audit.entries_mut()[0].reason = Some("forged".into());
        let err = rec.submit_cart(&v, p.cart(&intent.mandate.id, 8_000)).unwrap_err();
        assert_eq!(
            err,
            TransactionError::StateCorruption(IntegrityError::HashMismatch { seq: 0 })
        );
        assert!(rec.is_halted());
        assert_eq!(
            rec.submit_cart(&v, p.cart(&intent.mandate.id, 8_000)).unwrap_err(),
            TransactionError::Halted
        );
        assert_eq!(rec.check_timeout(&v), Err(TransactionError::Halted));
        assert_eq!(rec.state(), IntentAuthorized);
    }

    #[test]
    fn timeout_fires_only_after_deadline() {
        let p = Parties::new();
        let v = p.validator();
        let intent = p.intent(10_000);
        let mut rec = TransactionRecord::new(p.start);

        // Nothing to expire before the first mandate arrives.
        assert_eq!(rec.check_timeout(&v), Ok(false));
        rec.submit_intent(&v, intent.clone()).unwrap();
        assert_eq!(rec.check_timeout(&v), Ok(false));
        assert_eq!(rec.audit_log().len(), 1);

        p.clock.advance(Duration::minutes(61));
        assert_eq!(rec.check_timeout(&v), Ok(true));
        assert_eq!(rec.state(), Expired);
        assert_eq!(rec.audit_log().last().unwrap().mandate_id.as_ref(), Some(&intent.mandate.id));
        assert_eq!(rec.check_timeout(&v), Ok(false));
    }

    #[test]
    fn deadline_follows_earliest_active_expiry() {
        let p = Parties::new();
        let v = p.validator();
        let chain = p.happy_chain();
        let mut rec = TransactionRecord::new(p.start);
        rec.submit_intent(&v, chain[0].clone()).unwrap();
        rec.submit_cart(&v, chain[1].clone()).unwrap();
        // Cart expires at start + 31m, before the intent.
        p.clock.advance(Duration::minutes(40));
        assert_eq!(rec.check_timeout(&v), Ok(true));
        assert_eq!(
            rec.audit_log().last().unwrap().mandate_id.as_ref(),
            Some(&chain[1].mandate.id)
        );
    }

    #[test]
    fn frozen_chain_is_released_to_processor_roles() {
        let p = Parties::new();
        let v = p.validator();
        let chain = p.happy_chain();
        let mut rec = TransactionRecord::new(p.start);
        let reg = RoleRegistry::standard();
        rec.submit_intent(&v, chain[0].clone()).unwrap();
        rec.submit_cart(&v, chain[1].clone()).unwrap();
        assert_eq!(
            rec.frozen_chain_for(Role::PaymentProcessor, &reg),
            Err(TransactionError::NotFrozen)
        );
        rec.submit_payment(&v, chain[2].clone()).unwrap();
        assert_eq!(rec.frozen_chain_for(Role::PaymentProcessor, &reg), Ok(chain.clone()));
        assert_eq!(rec.frozen_chain_for(Role::CredentialsProvider, &reg), Ok(chain));
        assert!(rec.frozen_chain_for(Role::MerchantAgent, &reg).is_err());
    }
}

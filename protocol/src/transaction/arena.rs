//! Mandate arena: every mandate a transaction ever accepted, in acceptance
//! order, plus an id index and the positions of the active chain.
//!
//! A superseded cart stays in the arena (its nonce stays consumed and the
//! audit log still references it); it just drops out of the active chain.
//! Links between mandates are ids and indices, never references.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::mandate::{MandateId, MandateKind, SignedMandate};

/// Serialized form. The index is derived state and is rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArenaParts {
    mandates: Vec<SignedMandate>,
    active: Vec<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "ArenaParts", into = "ArenaParts")]
pub struct MandateArena {
    mandates: Vec<SignedMandate>,
    index: HashMap<MandateId, usize>,
    active: Vec<usize>,
}

impl From<ArenaParts> for MandateArena {
    fn from(parts: ArenaParts) -> Self {
        let index = parts
            .mandates
            .iter()
            .enumerate()
            .map(|(i, m)| (m.mandate.id.clone(), i))
            .collect();
        // Drop active positions that point outside the arena; the audit
        // integrity check reports the inconsistency.
        let active = parts
            .active
            .into_iter()
            .filter(|i| *i < parts.mandates.len())
            .collect();
        Self {
            mandates: parts.mandates,
            index,
            active,
        }
    }
}

impl From<MandateArena> for ArenaParts {
    fn from(arena: MandateArena) -> Self {
        Self {
            mandates: arena.mandates,
            active: arena.active,
        }
    }
}

impl MandateArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a newly accepted mandate at the end of the active chain,
    /// replacing whatever previously sat at that chain position.
    pub fn accept(&mut self, signed: SignedMandate) -> usize {
        let position = signed.mandate.kind.index();
        let slot = self.mandates.len();
        self.index.insert(signed.mandate.id.clone(), slot);
        self.mandates.push(signed);
        self.active.truncate(position);
        self.active.push(slot);
        slot
    }

    pub fn get(&self, id: &MandateId) -> Option<&SignedMandate> {
        self.index.get(id).map(|&i| &self.mandates[i])
    }

    /// The active chain, root first.
    pub fn active_chain(&self) -> impl Iterator<Item = &SignedMandate> {
        self.active.iter().map(|&i| &self.mandates[i])
    }

    /// The active chain's mandate of `kind`, if present.
    pub fn active(&self, kind: MandateKind) -> Option<&SignedMandate> {
        self.active.get(kind.index()).map(|&i| &self.mandates[i])
    }

    /// Owned copy of the first `len` active mandates followed by
    /// `candidate`, ready to hand to the validator.
    pub fn chain_with(&self, len: usize, candidate: &SignedMandate) -> Vec<SignedMandate> {
        let mut chain: Vec<SignedMandate> = self.active_chain().take(len).cloned().collect();
        chain.push(candidate.clone());
        chain
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Every accepted mandate, including superseded ones.
    pub fn all(&self) -> &[SignedMandate] {
        &self.mandates
    }

    /// Mandates accepted earlier but no longer part of the active chain.
    pub fn superseded(&self) -> impl Iterator<Item = &SignedMandate> {
        self.mandates
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.active.contains(i))
            .map(|(_, m)| m)
    }

    pub fn len(&self) -> usize {
        self.mandates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mandates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::Parties;

    #[test]
    fn superseded_cart_stays_in_arena() {
        let p = Parties::new();
        let intent = p.intent(10_000);
        let cart1 = p.cart(&intent.mandate.id, 8_000);
        let cart2 = p.cart(&intent.mandate.id, 7_000);

        let mut arena = MandateArena::new();
        arena.accept(intent.clone());
        arena.accept(cart1.clone());
        arena.accept(cart2.clone());

        assert_eq!(arena.len(), 3);
        assert_eq!(arena.active_len(), 2);
        assert_eq!(arena.active(MandateKind::Cart), Some(&cart2));
        assert_eq!(arena.superseded().collect::<Vec<_>>(), vec![&cart1]);
        assert_eq!(arena.get(&cart1.mandate.id), Some(&cart1));
    }

    #[test]
    fn chain_with_appends_candidate() {
        let p = Parties::new();
        let chain = p.happy_chain();
        let mut arena = MandateArena::new();
        arena.accept(chain[0].clone());
        arena.accept(chain[1].clone());
        let full = arena.chain_with(2, &chain[2]);
        assert_eq!(full, chain);
    }

    #[test]
    fn bincode_roundtrip_rebuilds_index() {
        let p = Parties::new();
        let mut arena = MandateArena::new();
        for m in p.happy_chain() {
            arena.accept(m);
        }
        let bytes = bincode::serialize(&arena).unwrap();
        let back: MandateArena = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.active_len(), 3);
        let payment = back.active(MandateKind::Payment).unwrap();
        assert_eq!(back.get(&payment.mandate.id), Some(payment));
    }
}

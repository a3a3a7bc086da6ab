//! Append-only payment ledger and settlement snapshot.
//!
//! The ledger is the session's source of truth for amounts: every accepted
//! payment appends exactly one record, and cumulative totals are derived by
//! checked summation. An append that would overflow the total is rejected
//! whole; there is no partial state.

use tally_proto::{Address, Amount};

/// One accepted payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRecord {
    /// Receiving participant.
    pub recipient: Address,
    /// Amount in smallest units.
    pub amount: Amount,
    /// State version this payment produced (1-based, strictly increasing).
    pub sequence: u64,
    /// Wall-clock time the payment was recorded, Unix seconds.
    pub recorded_at_unix: u64,
}

/// Ordered, append-only record of payments within one session.
#[derive(Debug, Clone, Default)]
pub struct SessionLedger {
    records: Vec<PaymentRecord>,
    total: Amount,
}

impl SessionLedger {
    /// Empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded payments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no payments have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, in append order.
    #[must_use]
    pub fn records(&self) -> &[PaymentRecord] {
        &self.records
    }

    /// Sum of all recorded amounts.
    #[must_use]
    pub fn total_sent(&self) -> Amount {
        self.total
    }

    /// Cumulative total sent to one recipient.
    ///
    /// `None` if summation would overflow; unreachable for records admitted
    /// through [`SessionLedger::append`], which bounds the grand total.
    #[must_use]
    pub fn cumulative_for(&self, recipient: &Address) -> Option<Amount> {
        self.records
            .iter()
            .filter(|r| &r.recipient == recipient)
            .try_fold(Amount::ZERO, |acc, r| acc.checked_add(r.amount))
    }

    /// Append a record, rejecting the whole append on total overflow.
    pub(crate) fn append(&mut self, record: PaymentRecord) -> Result<(), AmountOverflow> {
        let total = self.total.checked_add(record.amount).ok_or(AmountOverflow)?;
        self.records.push(record);
        self.total = total;
        Ok(())
    }

    /// Remove the most recent record (rollback of an unsent update).
    pub(crate) fn pop_last(&mut self) -> Option<PaymentRecord> {
        let record = self.records.pop()?;
        self.total = self.total.checked_sub(record.amount).unwrap_or(Amount::ZERO);
        Some(record)
    }

    /// Consume the ledger into a settlement snapshot.
    pub(crate) fn into_settlement(self) -> SettlementLedger {
        SettlementLedger { total_sent: self.total, payments: self.records }
    }
}

/// Final aggregated view of a closed session.
///
/// Produced exactly once, at close; the session's live state is cleared in
/// the same step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementLedger {
    /// Every payment, in order.
    pub payments: Vec<PaymentRecord>,
    /// Checked sum of all payments.
    pub total_sent: Amount,
}

impl SettlementLedger {
    /// Aggregate per-recipient transfer pairs for the settlement call.
    ///
    /// Recipients appear in first-payment order, each with their cumulative
    /// total. Sums cannot overflow: the ledger bounded the grand total.
    #[must_use]
    pub fn transfer_pairs(&self) -> Vec<(Address, Amount)> {
        let mut pairs: Vec<(Address, Amount)> = Vec::new();
        for record in &self.payments {
            match pairs.iter_mut().find(|(addr, _)| addr == &record.recipient) {
                Some((_, amount)) => {
                    *amount = amount.checked_add(record.amount).unwrap_or(*amount);
                },
                None => pairs.push((record.recipient.clone(), record.amount)),
            }
        }
        pairs
    }
}

/// Marker error: an append would overflow the ledger total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AmountOverflow;

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(tail: &str) -> Address {
        Address::parse(format!("0x{tail:0>40}")).expect("valid address")
    }

    fn record(recipient: &Address, amount: u128, sequence: u64) -> PaymentRecord {
        PaymentRecord {
            recipient: recipient.clone(),
            amount: Amount::new(amount),
            sequence,
            recorded_at_unix: 1_700_000_000,
        }
    }

    #[test]
    fn totals_accumulate_in_order() {
        let to = addr("beef");
        let mut ledger = SessionLedger::new();
        ledger.append(record(&to, 100, 1)).expect("append");
        ledger.append(record(&to, 250, 2)).expect("append");

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.total_sent(), Amount::new(350));
        assert_eq!(ledger.cumulative_for(&to), Some(Amount::new(350)));
        assert_eq!(ledger.cumulative_for(&addr("dead")), Some(Amount::ZERO));
    }

    #[test]
    fn overflowing_append_is_rejected_whole() {
        let to = addr("beef");
        let mut ledger = SessionLedger::new();
        ledger.append(record(&to, u128::MAX - 10, 1)).expect("append");

        let err = ledger.append(record(&to, 11, 2));
        assert_eq!(err, Err(AmountOverflow));

        // Nothing changed.
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.total_sent(), Amount::new(u128::MAX - 10));
    }

    #[test]
    fn pop_last_restores_total() {
        let to = addr("beef");
        let mut ledger = SessionLedger::new();
        ledger.append(record(&to, 100, 1)).expect("append");
        ledger.append(record(&to, 250, 2)).expect("append");

        let popped = ledger.pop_last().expect("record");
        assert_eq!(popped.amount, Amount::new(250));
        assert_eq!(ledger.total_sent(), Amount::new(100));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn transfer_pairs_aggregate_per_recipient() {
        let a = addr("aaaa");
        let b = addr("bbbb");
        let mut ledger = SessionLedger::new();
        ledger.append(record(&a, 100, 1)).expect("append");
        ledger.append(record(&b, 40, 2)).expect("append");
        ledger.append(record(&a, 250, 3)).expect("append");

        let settlement = ledger.into_settlement();
        assert_eq!(settlement.total_sent, Amount::new(390));
        assert_eq!(
            settlement.transfer_pairs(),
            vec![(a, Amount::new(350)), (b, Amount::new(40))]
        );
    }
}

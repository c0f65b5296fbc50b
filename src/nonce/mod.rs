//! Nonce consistency engine
//!
//! Guarantees that each partition key (account + chain, or account + privacy
//! group) is assigned strictly increasing nonces across concurrent
//! submissions, and heals the bookkeeping when the chain disagrees.

pub mod checker;
pub mod recovery;
pub mod store;

pub use checker::NonceChecker;
pub use recovery::RecoveryTracker;
pub use store::{MemoryNonceStore, NonceStore, PgNonceStore};

use crate::types::{Job, JobType};

use sha3::{Digest, Keccak256};

/// Derive the unit of nonce sequencing for a job.
///
/// Returns `None` when the sender or chain id are unknown; such jobs cannot
/// participate in nonce tracking.
pub fn partition_key(job: &Job) -> Option<String> {
    let from = job.transaction.from?;
    let chain_id = job.internal_data.chain_id.as_deref()?;
    let from = format!("{from:#x}");

    if job.job_type == JobType::EeaPrivateTransaction {
        if let Some(group) = job.transaction.privacy_group_id.as_deref() {
            if !group.is_empty() {
                return Some(format!("{from}@eea-{group}@{chain_id}"));
            }
        }

        if !job.transaction.private_for.is_empty() {
            // Ad-hoc privacy groups are identified by their sorted member list
            let mut members = job.transaction.private_for.clone();
            if let Some(private_from) = job.transaction.private_from.clone() {
                members.push(private_from);
            }
            members.sort();

            let digest = Keccak256::digest(members.join("-").as_bytes());
            return Some(format!("{from}@eea-{}@{chain_id}", hex::encode(digest)));
        }
    }

    Some(format!("{from}@{chain_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::fake_job;

    #[test]
    fn public_tx_key_is_account_and_chain() {
        let job = fake_job();
        assert_eq!(
            partition_key(&job).unwrap(),
            "0x7e654d251da770a068413677967f6d3ea2fea9e4@2017"
        );
    }

    #[test]
    fn missing_sender_or_chain_yields_no_key() {
        let mut job = fake_job();
        job.transaction.from = None;
        assert!(partition_key(&job).is_none());

        let mut job = fake_job();
        job.internal_data.chain_id = None;
        assert!(partition_key(&job).is_none());
    }

    #[test]
    fn privacy_group_scopes_the_key() {
        let mut job = fake_job();
        job.job_type = JobType::EeaPrivateTransaction;
        job.transaction.privacy_group_id = Some("kAbelwaVW7okoEn1+okO+AbA4Hhz/7DaCOWVQz9nx5M=".into());

        let key = partition_key(&job).unwrap();
        assert!(key.contains("@eea-kAbelwaVW7okoEn1+okO+AbA4Hhz/7DaCOWVQz9nx5M=@"));
    }

    #[test]
    fn participant_list_key_ignores_ordering() {
        let mut a = fake_job();
        a.job_type = JobType::EeaPrivateTransaction;
        a.transaction.private_from = Some("alpha".into());
        a.transaction.private_for = vec!["bravo".into(), "charlie".into()];

        let mut b = a.clone();
        b.transaction.private_for = vec!["charlie".into(), "bravo".into()];

        assert_eq!(partition_key(&a), partition_key(&b));
    }
}

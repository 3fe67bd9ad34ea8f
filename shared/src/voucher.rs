// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_ipld_encoding::tuple::*;
use fvm_shared::address::Address;
use fvm_shared::crypto::signature::Signature;
use fvm_shared::econ::TokenAmount;

/// A signed claim against a payment channel lane, redeemable on chain.
///
/// Within a `(channel, lane)` pair successive vouchers are strictly
/// monotone in both `amount` and `nonce`; redeeming a voucher supersedes
/// every earlier voucher on the same lane.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct SignedVoucher {
    /// Address of the payment channel this voucher is valid for.
    pub channel_addr: Address,
    /// Lane the voucher claims against.
    pub lane: u64,
    /// Set by the voucher creator, monotone within the lane.
    pub nonce: u64,
    /// Cumulative amount redeemable on the lane when this voucher is used.
    pub amount: TokenAmount,
    /// Signature by the channel's funding wallet over the voucher bytes.
    pub signature: Option<Signature>,
}

impl SignedVoucher {
    /// True when this voucher may follow `prev` on the same lane.
    pub fn supersedes(&self, prev: &SignedVoucher) -> bool {
        self.lane == prev.lane && self.nonce > prev.nonce && self.amount > prev.amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fvm_ipld_encoding::{from_slice, to_vec};

    fn voucher(nonce: u64, amount: u64) -> SignedVoucher {
        SignedVoucher {
            channel_addr: Address::new_id(101),
            lane: 7,
            nonce,
            amount: TokenAmount::from_atto(amount),
            signature: Some(Signature::new_bls(vec![0xab; 4])),
        }
    }

    #[test]
    fn round_trip() {
        let v = voucher(3, 500_000);
        let decoded: SignedVoucher = from_slice(&to_vec(&v).unwrap()).unwrap();
        assert_eq!(v, decoded);
    }

    #[test]
    fn supersedes_requires_both_monotone() {
        let base = voucher(1, 1000);
        assert!(voucher(2, 2000).supersedes(&base));
        assert!(!voucher(1, 2000).supersedes(&base));
        assert!(!voucher(2, 1000).supersedes(&base));
        let mut other_lane = voucher(2, 2000);
        other_lane.lane = 8;
        assert!(!other_lane.supersedes(&base));
    }
}

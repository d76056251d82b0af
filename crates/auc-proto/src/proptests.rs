#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use prost::Message;

    use crate::v1::{DealProposal, SigningRequest, SigningResponse};

    prop_compose! {
        fn any_proposal()(
            piece_cid in "[a-z0-9]{8,64}",
            piece_size in any::<u64>(),
            verified_deal in any::<bool>(),
            client in "[a-z0-9]{1,86}",
            provider in "f0[0-9]{1,8}",
            label in ".{0,64}",
            start_epoch in any::<i64>(),
            end_epoch in any::<i64>(),
            price in "[0-9]{1,30}",
        ) -> DealProposal {
            DealProposal {
                piece_cid,
                piece_size,
                verified_deal,
                client,
                provider,
                label,
                start_epoch,
                end_epoch,
                storage_price_per_epoch: price,
                provider_collateral: "0".into(),
                client_collateral: "0".into(),
            }
        }
    }

    proptest! {
        #[test]
        fn prop_canonical_bytes_are_stable(proposal in any_proposal()) {
            let bytes = proposal.canonical_bytes();
            let decoded = DealProposal::from_payload(&bytes)?;
            prop_assert_eq!(decoded.canonical_bytes(), bytes);
        }

        #[test]
        fn prop_request_decode_never_panics(data in any::<Vec<u8>>()) {
            let _ = SigningRequest::decode(data.as_slice());
        }

        #[test]
        fn prop_well_formed_response_has_one_outcome(sig in prop::collection::vec(any::<u8>(), 1..128)) {
            let res = SigningResponse::decode(SigningResponse::signed(sig.clone()).encode_to_vec().as_slice())?;
            prop_assert!(res.into_outcome().is_ok());
        }
    }
}

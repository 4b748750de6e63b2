//! Property tests for tree soundness and supply accounting.

use k256::ecdsa::SigningKey;
use merkdrop_core::{
    mint_message, public_key_of, send_message, sign_message, Amount, PublicKeyBytes,
    PUBLIC_KEY_LEN,
};
use merkdrop_state::{
    check_inclusion, CommitmentState, HashedRecord, MerkleStore, MintRequest, SendRequest,
    TransitionRequest, World,
};
use proptest::prelude::*;
use rand_core::OsRng;

fn owner(n: u8) -> PublicKeyBytes {
    PublicKeyBytes([n; PUBLIC_KEY_LEN])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A witness verifies a record iff that record is what the slot holds.
    #[test]
    fn membership_soundness(
        slots in prop::collection::btree_map(0u32..256, (any::<u8>(), any::<u32>()), 1..12),
        probe in 0u32..256,
        probe_owner in any::<u8>(),
        probe_counter in any::<u32>(),
    ) {
        let store = MerkleStore::from_leaves(
            slots.iter().map(|(i, (o, c))| (*i, HashedRecord::new(owner(*o), *c).digest())),
        ).expect("build");
        let state = CommitmentState::genesis(store.root());
        let witness = store.witness(probe).expect("witness");
        let record = HashedRecord::new(owner(probe_owner), probe_counter);

        let stored = slots.get(&probe).map(|(o, c)| HashedRecord::new(owner(*o), *c));
        let included = check_inclusion(&state, &record, &witness).is_ok();
        prop_assert_eq!(included, stored == Some(record));

        if let Some(stored) = stored {
            prop_assert!(check_inclusion(&state, &stored, &witness).is_ok());
        }
    }

    /// Witnesses from an older tree state fail once any leaf changes.
    #[test]
    fn witness_bound_to_tree_state(
        index in 0u32..256,
        other in 0u32..256,
        counter in any::<u32>(),
    ) {
        prop_assume!(index != other);
        let record = HashedRecord::new(owner(1), counter);
        let mut store = MerkleStore::from_leaves([(index, record.digest())]).expect("build");
        let old = store.witness(index).expect("witness");
        store.update(other, HashedRecord::new(owner(2), 0).digest()).expect("update");
        let state = CommitmentState::genesis(store.root());
        prop_assert!(check_inclusion(&state, &record, &old).is_err());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// total_supply equals the sum of accepted mints; sends never change it.
    #[test]
    fn supply_conservation(
        ops in prop::collection::vec((any::<bool>(), 0u8..4, 0u8..4, 0u64..1_000), 1..20),
    ) {
        let admin = SigningKey::random(&mut OsRng);
        let holders: Vec<SigningKey> = (0..4).map(|_| SigningKey::random(&mut OsRng)).collect();
        let accounts: Vec<PublicKeyBytes> = holders.iter().map(public_key_of).collect();
        let mut world = World::new(public_key_of(&admin), accounts[0]);
        world.deploy().expect("deploy");

        let mut minted = 0u64;
        for (is_mint, a, b, units) in ops {
            let amount = Amount::from_units(units);
            let before = world.state().expect("state").total_supply;
            let (from, to) = (accounts[a as usize], accounts[b as usize]);
            if is_mint {
                let signature = sign_message(&admin, &mint_message(amount, &from));
                world
                    .submit(&TransitionRequest::Mint(MintRequest { recipient: from, amount, signature }))
                    .expect("mint");
                minted += units;
            } else {
                // Overdrafts are rejected; either way supply is unchanged.
                let nonce = world.ledger().nonce_of(&from);
                let signature = sign_message(&holders[a as usize], &send_message(amount, &to, nonce));
                let _ = world.submit(&TransitionRequest::Send(SendRequest {
                    sender: from,
                    recipient: to,
                    amount,
                    nonce,
                    signature,
                }));
                prop_assert_eq!(world.state().expect("state").total_supply, before);
            }
        }

        let state = world.state().expect("state");
        prop_assert_eq!(state.total_supply, Amount::from_units(minted));
        prop_assert_eq!(world.ledger().circulating().expect("sum"), state.total_supply);
    }
}

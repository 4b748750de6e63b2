use k256::ecdsa::SigningKey;
use merkdrop_core::{
    claim_message, commitment_message, mint_message, public_key_of, send_message, sign_message,
    AdminSignature, Amount, Digest, Hash32, PublicKeyBytes, SIGNATURE_LEN,
};
use merkdrop_state::{
    apply_transition, check_inclusion, claim, mint, ClaimFlag, CommitmentState, HashedRecord,
    MintRequest, NullifierKey, SendRequest, StateError, TransitionRequest, World,
};
use rand_core::OsRng;

struct Fixture {
    admin: SigningKey,
    reserve_key: SigningKey,
    reserve: PublicKeyBytes,
    owner_keys: Vec<SigningKey>,
    owners: Vec<PublicKeyBytes>,
    world: World,
}

/// Depth-8 tree with three zero-point records at slots 0..=2, deployed, and a
/// reserve funded with `reserve_units`.
fn deployed(reserve_units: u64) -> Fixture {
    let admin = SigningKey::random(&mut OsRng);
    let reserve_key = SigningKey::random(&mut OsRng);
    let reserve = public_key_of(&reserve_key);
    let owner_keys: Vec<SigningKey> = (0..3).map(|_| SigningKey::random(&mut OsRng)).collect();
    let owners: Vec<PublicKeyBytes> = owner_keys.iter().map(public_key_of).collect();

    let mut world = World::new(public_key_of(&admin), reserve);
    for (i, owner) in owners.iter().enumerate() {
        world
            .insert_record(i as u32, HashedRecord::new(*owner, 0))
            .expect("insert");
    }
    world.deploy().expect("deploy");

    if reserve_units > 0 {
        let amount = Amount::from_units(reserve_units);
        let signature = sign_message(&admin, &mint_message(amount, &reserve));
        world
            .submit(&TransitionRequest::Mint(MintRequest {
                recipient: reserve,
                amount,
                signature,
            }))
            .expect("fund reserve");
    }

    Fixture {
        admin,
        reserve_key,
        reserve,
        owner_keys,
        owners,
        world,
    }
}

fn claim_sig(fx: &Fixture, owner: &PublicKeyBytes) -> AdminSignature {
    sign_message(&fx.admin, &claim_message(owner))
}

fn re_anchor(fx: &Fixture, root: Digest) -> TransitionRequest {
    TransitionRequest::SetCommitment {
        root,
        signature: sign_message(&fx.admin, &commitment_message(&root)),
    }
}

/// Send signed by `holder` at its current nonce.
fn signed_send(
    fx: &Fixture,
    holder: &SigningKey,
    recipient: PublicKeyBytes,
    units: u64,
) -> TransitionRequest {
    let sender = public_key_of(holder);
    let amount = Amount::from_units(units);
    let nonce = fx.world.ledger().nonce_of(&sender);
    TransitionRequest::Send(SendRequest {
        sender,
        recipient,
        amount,
        nonce,
        signature: sign_message(holder, &send_message(amount, &recipient, nonce)),
    })
}

#[test]
fn scenario_claim_then_replay() {
    let mut fx = deployed(10);
    let r0 = fx.world.store().root();
    let before = fx.world.state().expect("state");
    assert_eq!(before.commitment_root, r0);

    // Re-publishing the same root is a no-op on the roots.
    let state = fx
        .world
        .submit(&re_anchor(&fx, r0))
        .expect("set commitment");
    assert_eq!(state.commitment_root, r0);

    let sig = claim_sig(&fx, &fx.owners[0]);
    let request = fx.world.claim_request(0, sig).expect("request");
    let after = fx
        .world
        .submit(&TransitionRequest::Claim(request.clone()))
        .expect("first claim");
    assert_eq!(after.commitment_root, r0);
    assert_ne!(after.nullifier_root, before.nullifier_root);
    assert_eq!(after.total_supply, before.total_supply);
    assert_eq!(fx.world.ledger().balance_of(&fx.owners[0]), Amount::from_units(1));
    assert!(fx.world.is_claimed(0));

    // Replay with witnesses from before the claim.
    let err = fx
        .world
        .submit(&TransitionRequest::Claim(request))
        .unwrap_err();
    assert!(matches!(err, StateError::AlreadyClaimed));

    // Replay with witnesses regenerated after the claim.
    let fresh = fx.world.claim_request(0, sig).expect("request");
    let err = fx
        .world
        .submit(&TransitionRequest::Claim(fresh))
        .unwrap_err();
    assert!(matches!(err, StateError::AlreadyClaimed));
    assert_eq!(fx.world.state().expect("state"), after);
}

#[test]
fn inclusion_fails_for_unset_or_out_of_range_slot() {
    let fx = deployed(0);
    let record = HashedRecord::new(fx.owners[0], 0);

    let unset = fx.world.membership_witness(99).expect("witness");
    assert!(matches!(
        fx.world.check_inclusion(&record, &unset),
        Err(StateError::Inclusion)
    ));
    assert!(matches!(
        fx.world.membership_witness(256),
        Err(StateError::IndexOutOfRange(256))
    ));

    let ok = fx.world.membership_witness(0).expect("witness");
    fx.world.check_inclusion(&record, &ok).expect("included");

    // Right slot, wrong counter.
    let bumped = HashedRecord::new(fx.owners[0], 1);
    assert!(matches!(
        fx.world.check_inclusion(&bumped, &ok),
        Err(StateError::Inclusion)
    ));
}

#[test]
fn claim_with_foreign_nullifier_key_is_rejected() {
    let fx = deployed(10);
    let mut request = fx
        .world
        .claim_request(1, claim_sig(&fx, &fx.owners[1]))
        .expect("request");
    request.nullifier = fx.world.nullifier_witness(0);
    let state = fx.world.state().expect("state");
    let err = claim(state, fx.world.admin(), &request).unwrap_err();
    assert!(matches!(err, StateError::KeyMismatch));
}

#[test]
fn claim_requires_admin_signature_for_owner() {
    let fx = deployed(10);
    let state = fx.world.state().expect("state");

    // Signed for someone else.
    let wrong_owner = fx
        .world
        .claim_request(0, claim_sig(&fx, &fx.owners[1]))
        .expect("request");
    assert!(matches!(
        claim(state, fx.world.admin(), &wrong_owner),
        Err(StateError::Signature)
    ));

    // Signed by a non-admin key.
    let rogue = SigningKey::random(&mut OsRng);
    let rogue_sig = sign_message(&rogue, &claim_message(&fx.owners[0]));
    let forged = fx.world.claim_request(0, rogue_sig).expect("request");
    assert!(matches!(
        claim(state, fx.world.admin(), &forged),
        Err(StateError::Signature)
    ));

    // Garbage bytes.
    let garbage = fx
        .world
        .claim_request(0, AdminSignature([7u8; SIGNATURE_LEN]))
        .expect("request");
    assert!(matches!(
        claim(state, fx.world.admin(), &garbage),
        Err(StateError::Signature)
    ));
}

#[test]
fn claim_against_empty_reserve_changes_nothing() {
    let mut fx = deployed(0);
    let before = fx.world.state().expect("state");
    let request = fx
        .world
        .claim_request(2, claim_sig(&fx, &fx.owners[2]))
        .expect("request");
    let err = fx
        .world
        .submit(&TransitionRequest::Claim(request))
        .unwrap_err();
    assert!(matches!(err, StateError::InsufficientBalance));
    assert_eq!(fx.world.state().expect("state"), before);
    assert!(!fx.world.is_claimed(2));
}

#[test]
fn claims_on_different_keys_from_one_snapshot_both_validate() {
    let mut fx = deployed(10);
    let snapshot = fx.world.state().expect("state");
    let a = fx
        .world
        .claim_request(0, claim_sig(&fx, &fx.owners[0]))
        .expect("a");
    let b = fx
        .world
        .claim_request(1, claim_sig(&fx, &fx.owners[1]))
        .expect("b");

    // Both are valid transitions of the same snapshot.
    let ta = claim(snapshot, fx.world.admin(), &a).expect("a valid");
    let tb = claim(snapshot, fx.world.admin(), &b).expect("b valid");
    assert_ne!(ta.state.nullifier_root, tb.state.nullifier_root);

    // The ledger serializes them: the second is stale and must be rebuilt.
    let pre = snapshot.state_hash();
    fx.world.finalize(pre, ta).expect("a finalized");
    assert!(matches!(fx.world.finalize(pre, tb), Err(StateError::StaleState)));

    let rebuilt = fx
        .world
        .claim_request(1, claim_sig(&fx, &fx.owners[1]))
        .expect("b again");
    fx.world
        .submit(&TransitionRequest::Claim(rebuilt))
        .expect("b after rebuild");
    assert!(fx.world.is_claimed(0) && fx.world.is_claimed(1));
    assert_eq!(
        fx.world.nullifiers().get(&NullifierKey::for_index(2)),
        ClaimFlag::Unclaimed
    );
}

#[test]
fn mint_is_signature_gated_and_checked() {
    let mut fx = deployed(0);
    let recipient = fx.owners[0];
    let amount = Amount::from_units(25);

    let wrong_amount = sign_message(&fx.admin, &mint_message(Amount::from_units(26), &recipient));
    let err = fx
        .world
        .submit(&TransitionRequest::Mint(MintRequest {
            recipient,
            amount,
            signature: wrong_amount,
        }))
        .unwrap_err();
    assert!(matches!(err, StateError::Signature));

    let signature = sign_message(&fx.admin, &mint_message(amount, &recipient));
    let state = fx
        .world
        .submit(&TransitionRequest::Mint(MintRequest {
            recipient,
            amount,
            signature,
        }))
        .expect("mint");
    assert_eq!(state.total_supply, amount);
    assert_eq!(fx.world.ledger().balance_of(&recipient), amount);

    let huge = Amount::from_units(u64::MAX);
    let signature = sign_message(&fx.admin, &mint_message(huge, &recipient));
    let err = mint(
        state,
        fx.world.admin(),
        &MintRequest {
            recipient,
            amount: huge,
            signature,
        },
    )
    .unwrap_err();
    assert!(matches!(err, StateError::Overflow));
}

#[test]
fn send_moves_balance_without_touching_supply() {
    let mut fx = deployed(5);
    let supply = fx.world.state().expect("state").total_supply;

    let request = signed_send(&fx, &fx.reserve_key, fx.owners[1], 3);
    let state = fx.world.submit(&request).expect("send");
    assert_eq!(state.total_supply, supply);
    assert_eq!(fx.world.ledger().balance_of(&fx.owners[1]), Amount::from_units(3));
    assert_eq!(fx.world.ledger().nonce_of(&fx.reserve), 1);

    let request = signed_send(&fx, &fx.owner_keys[1], fx.owners[2], 4);
    let err = fx.world.submit(&request).unwrap_err();
    assert!(matches!(err, StateError::InsufficientBalance));
}

#[test]
fn send_requires_sender_signature() {
    let mut fx = deployed(10);
    let thief = SigningKey::random(&mut OsRng);
    let thief_key = public_key_of(&thief);
    let amount = Amount::from_units(10);

    // Signed by someone other than the debited account.
    let forged = TransitionRequest::Send(SendRequest {
        sender: fx.reserve,
        recipient: thief_key,
        amount,
        nonce: 0,
        signature: sign_message(&thief, &send_message(amount, &thief_key, 0)),
    });
    assert!(matches!(fx.world.submit(&forged), Err(StateError::Signature)));

    // Admin authority does not extend to other accounts' balances.
    let by_admin = TransitionRequest::Send(SendRequest {
        sender: fx.reserve,
        recipient: thief_key,
        amount,
        nonce: 0,
        signature: sign_message(&fx.admin, &send_message(amount, &thief_key, 0)),
    });
    assert!(matches!(fx.world.submit(&by_admin), Err(StateError::Signature)));

    assert_eq!(fx.world.ledger().balance_of(&fx.reserve), amount);
    assert_eq!(fx.world.ledger().balance_of(&thief_key), Amount::zero());
}

#[test]
fn signed_send_cannot_be_replayed() {
    let mut fx = deployed(10);
    let request = signed_send(&fx, &fx.reserve_key, fx.owners[0], 2);
    fx.world.submit(&request).expect("send");
    assert!(matches!(
        fx.world.submit(&request),
        Err(StateError::StaleNonce { expected: 1, got: 0 })
    ));
    assert_eq!(fx.world.ledger().balance_of(&fx.owners[0]), Amount::from_units(2));
}

#[test]
fn award_point_reanchors_commitment() {
    let mut fx = deployed(0);
    let request = fx.world.award_request(1).expect("request");
    let state = fx
        .world
        .submit(&TransitionRequest::AwardPoint(request.clone()))
        .expect("award");
    assert_eq!(state.commitment_root, fx.world.store().root());
    assert_eq!(fx.world.record(1).expect("record").counter, 1);

    // The old record no longer verifies; the new one does.
    assert!(matches!(
        fx.world.submit(&TransitionRequest::AwardPoint(request)),
        Err(StateError::Inclusion)
    ));
    let witness = fx.world.membership_witness(1).expect("witness");
    check_inclusion(&state, &HashedRecord::new(fx.owners[1], 1), &witness).expect("included");
}

#[test]
fn set_commitment_invalidates_outstanding_witnesses() {
    let mut fx = deployed(10);
    let request = fx
        .world
        .claim_request(0, claim_sig(&fx, &fx.owners[0]))
        .expect("request");
    fx.world
        .submit(&re_anchor(&fx, Hash32([0xAB; 32])))
        .expect("re-anchor");
    assert!(matches!(
        fx.world.submit(&TransitionRequest::Claim(request)),
        Err(StateError::Inclusion)
    ));
}

#[test]
fn set_commitment_requires_admin_signature() {
    let mut fx = deployed(0);
    let before = fx.world.state().expect("state");
    let root = Hash32([0xEE; 32]);

    let unsigned = TransitionRequest::SetCommitment {
        root,
        signature: AdminSignature([0u8; SIGNATURE_LEN]),
    };
    assert!(matches!(fx.world.submit(&unsigned), Err(StateError::Signature)));

    let outsider = SigningKey::random(&mut OsRng);
    let forged = TransitionRequest::SetCommitment {
        root,
        signature: sign_message(&outsider, &commitment_message(&root)),
    };
    assert!(matches!(fx.world.submit(&forged), Err(StateError::Signature)));

    // A signature for one root does not authorize another.
    let other_root = TransitionRequest::SetCommitment {
        root,
        signature: sign_message(&fx.admin, &commitment_message(&Hash32([0xEF; 32]))),
    };
    assert!(matches!(fx.world.submit(&other_root), Err(StateError::Signature)));

    assert_eq!(fx.world.state().expect("state"), before);
}

#[test]
fn operations_before_deploy_fail() {
    let admin = public_key_of(&SigningKey::random(&mut OsRng));
    let mut world = World::new(admin, admin);
    assert!(matches!(
        world.submit(&TransitionRequest::SetCommitment {
            root: Hash32::zero(),
            signature: AdminSignature([0u8; SIGNATURE_LEN]),
        }),
        Err(StateError::NotDeployed)
    ));
    world.deploy().expect("deploy");
    assert!(matches!(world.deploy(), Err(StateError::AlreadyDeployed)));
}

#[test]
fn transition_is_deterministic() {
    let fx = deployed(10);
    let state: CommitmentState = fx.world.state().expect("state");
    let request = TransitionRequest::Claim(
        fx.world
            .claim_request(0, claim_sig(&fx, &fx.owners[0]))
            .expect("request"),
    );
    let a = apply_transition(state, fx.world.admin(), &request).expect("a");
    let b = apply_transition(state, fx.world.admin(), &request).expect("b");
    assert_eq!(borsh::to_vec(&a).expect("a"), borsh::to_vec(&b).expect("b"));
}

//! Integration tests for the transaction building flow
//!
//! Tests the complete flow from coin selection through fee bumping,
//! blinding and signing against the in-memory test wallet.

use green_params::{AssetId, Network};
use green_tx::testing::MockWallet;
use green_tx::script::csv_blocks;
use green_tx::tx::{ConfidentialAsset, ConfidentialValue};
use green_tx::{
    blind_transaction, create_transaction, get_blinding_factors, get_signing_inputs,
    sign_transaction, unblind_output, verify_input_signatures, AddressType, Addressee, BuildError,
    BuildRecord, ConfidentialPrimitives, Error, PreviousTransaction, RawTransaction,
    Secp256k1Confidential, Utxo, UtxoStrategy, WalletResolver,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn funded(wallet: &MockWallet, amounts: &[u64]) -> BuildRecord {
    let utxos: Vec<Utxo> = amounts.iter().map(|a| wallet.utxo(0, *a).unwrap()).collect();
    let mut record = BuildRecord::default();
    record.utxos.insert(wallet.network().policy_asset, utxos);
    record.fee_rate = Some(1_000);
    record
}

fn input_total(record: &BuildRecord) -> u64 {
    get_signing_inputs(record).unwrap().iter().map(|u| u.amount).sum()
}

fn output_total(record: &BuildRecord) -> u64 {
    record
        .transaction
        .as_ref()
        .unwrap()
        .outputs
        .iter()
        .map(|o| o.explicit_value().unwrap())
        .sum()
}

/// Build, fully sign and record a payment, returning its history entry
fn broadcast(wallet: &MockWallet, record: &BuildRecord) -> PreviousTransaction {
    let signed = wallet.fully_sign(record).unwrap();
    let prev = wallet.previous_transaction(record, &signed).unwrap();
    wallet.add_transaction(signed).unwrap();
    prev
}

/// A request to replace `prev` at `fee_rate`
fn replacement(prev: PreviousTransaction, fee_rate: u64) -> BuildRecord {
    let mut record = BuildRecord::default();
    record.previous_transaction = Some(prev);
    record.subaccount = Some(0);
    record.fee_rate = Some(fee_rate);
    record
}

/// Pays 30_000 to the wallet's own receive address and 20_000 elsewhere
fn self_payment(wallet: &MockWallet) -> (BuildRecord, String) {
    let deposit = wallet.receive_address(0, false).unwrap();
    let mut record = funded(wallet, &[100_000]);
    record.addressees = vec![
        Addressee::new(deposit.address.clone(), 30_000),
        Addressee::new(wallet.external_address(1), 20_000),
    ];
    create_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(record.error(), None);
    (record, deposit.address)
}

// ============================================================================
// Coin selection and fees
// ============================================================================

#[test]
fn test_payment_with_change() {
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let mut record = funded(&wallet, &[100_000]);
    record.addressees = vec![Addressee::new(wallet.external_address(1), 50_000)];

    create_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(record.error(), None);

    let tx = record.transaction.as_ref().unwrap();
    assert_eq!(tx.inputs.len(), 1);
    assert_eq!(tx.outputs.len(), 2);
    let change_index = record.change_index_for(&AssetId::NATIVE).unwrap();
    let change = tx.outputs[change_index].explicit_value().unwrap();
    assert_eq!(change, 100_000 - 50_000 - record.fee);
    assert!(change >= network.dust_threshold);
    assert_eq!(record.change_amount[&AssetId::NATIVE], change);
    assert_eq!(record.satoshi[&AssetId::NATIVE], 50_000);
    assert!(record.size.calculated_fee_rate.unwrap() >= 1_000);
    assert_eq!(input_total(&record), output_total(&record) + record.fee);
}

#[test]
fn test_send_all_from_single_utxo() {
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let mut record = funded(&wallet, &[10_000]);
    record.send_all = true;
    record.addressees = vec![Addressee::new(wallet.external_address(1), 0)];

    create_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(record.error(), None);
    assert!(record.amount_read_only);

    let tx = record.transaction.as_ref().unwrap();
    assert_eq!(tx.outputs.len(), 1);
    assert_eq!(tx.outputs[0].explicit_value(), Some(10_000 - record.fee));
    assert_eq!(record.addressees[0].amount, 10_000 - record.fee);
    assert!(record.change_index.is_empty());
}

#[test]
fn test_second_utxo_is_added_when_first_is_short() {
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let mut record = funded(&wallet, &[1_000, 60_000]);
    record.addressees = vec![Addressee::new(wallet.external_address(1), 50_000)];

    create_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(record.error(), None);
    assert_eq!(record.used_utxos.len(), 2);
    assert_eq!(record.available_total, 61_000);
    assert_eq!(input_total(&record), 61_000);
    assert_eq!(input_total(&record), output_total(&record) + record.fee);
}

#[test]
fn test_insufficient_funds() {
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let mut record = funded(&wallet, &[10_000]);
    record.addressees = vec![Addressee::new(wallet.external_address(1), 50_000)];

    create_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(record.error(), Some(&BuildError::InsufficientFunds));
    assert!(get_signing_inputs(&record).is_err());
}

#[test]
fn test_send_all_of_dust_is_insufficient() {
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let mut record = funded(&wallet, &[600]);
    record.send_all = true;
    record.addressees = vec![Addressee::new(wallet.external_address(1), 0)];

    create_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(record.error(), Some(&BuildError::InsufficientFunds));
}

#[test]
fn test_fee_rate_below_minimum() {
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let mut record = funded(&wallet, &[100_000]);
    record.fee_rate = Some(500);
    record.addressees = vec![Addressee::new(wallet.external_address(1), 50_000)];

    create_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(record.error(), Some(&BuildError::FeeRateBelowMinimum));
    // The fee itself is still charged at the floor
    assert!(record.size.calculated_fee_rate.unwrap() >= network.min_fee_rate);
}

#[test]
fn test_overflowing_fee_rate_is_insufficient_funds() {
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let mut record = funded(&wallet, &[100_000]);
    record.fee_rate = Some(u64::MAX / 100);
    record.addressees = vec![Addressee::new(wallet.external_address(1), 50_000)];

    create_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(record.error(), Some(&BuildError::InsufficientFunds));
    assert!(record.transaction.is_some());
}

#[test]
fn test_manual_selection_spends_exactly_what_was_chosen() {
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let mut record = funded(&wallet, &[100_000, 200_000]);
    let chosen = wallet.utxo(0, 80_000).unwrap();
    record.strategy = UtxoStrategy::Manual;
    record.used_utxos = vec![chosen.clone()];
    record.addressees = vec![Addressee::new(wallet.external_address(1), 30_000)];

    create_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(record.error(), None);
    let tx = record.transaction.as_ref().unwrap();
    assert_eq!(tx.inputs.len(), 1);
    assert_eq!(tx.inputs[0].previous_output, chosen.outpoint());
}

#[test]
fn test_multiple_addressees_keep_their_order() {
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let mut record = funded(&wallet, &[500_000]);
    record.addressees = vec![
        Addressee::new(wallet.external_address(1), 10_000),
        Addressee::new(wallet.external_address(2), 20_000),
        Addressee::new(wallet.external_address(3), 30_000),
    ];

    create_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(record.error(), None);
    let paid: Vec<u64> = record
        .transaction_outputs
        .iter()
        .filter(|o| !o.is_change)
        .map(|o| o.amount)
        .collect();
    assert_eq!(paid, vec![10_000, 20_000, 30_000]);
}

#[test]
fn test_partial_requires_manual_selection() {
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let mut record = funded(&wallet, &[100_000]);
    record.is_partial = true;
    record.addressees = vec![Addressee::new(wallet.external_address(1), 50_000)];

    let result = create_transaction(&wallet.context(), &mut record);
    assert!(matches!(result, Err(Error::InvalidState(_))));
}

// ============================================================================
// Fee bumping
// ============================================================================

#[test]
fn test_replacement_at_same_rate_is_rejected() {
    init_tracing();
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let mut original = funded(&wallet, &[100_000]);
    original.addressees = vec![Addressee::new(wallet.external_address(1), 50_000)];
    create_transaction(&wallet.context(), &mut original).unwrap();
    assert_eq!(original.error(), None);
    let prev = broadcast(&wallet, &original);

    let mut record = BuildRecord::default();
    record.previous_transaction = Some(prev);
    record.subaccount = Some(0);
    record.fee_rate = Some(1_000);
    create_transaction(&wallet.context(), &mut record).unwrap();

    assert!(record.is_rbf);
    assert_eq!(record.error(), Some(&BuildError::InvalidReplacementFeeRate));
}

#[test]
fn test_replacement_at_higher_rate() {
    init_tracing();
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let mut original = funded(&wallet, &[100_000]);
    original.addressees = vec![Addressee::new(wallet.external_address(1), 50_000)];
    original.memo = "rent".to_string();
    create_transaction(&wallet.context(), &mut original).unwrap();
    let spent = original.used_utxos[0].outpoint();
    let prev = broadcast(&wallet, &original);

    let mut record = BuildRecord::default();
    record.previous_transaction = Some(prev);
    record.subaccount = Some(0);
    record.fee_rate = Some(5_000);
    create_transaction(&wallet.context(), &mut record).unwrap();

    assert_eq!(record.error(), None);
    assert!(record.is_rbf && record.addressees_read_only && !record.is_redeposit);
    assert_eq!(record.memo, "rent");
    assert!(record.fee > original.fee);
    assert_eq!(record.addressees.len(), 1);
    assert_eq!(record.addressees[0].amount, 50_000);

    let tx = record.transaction.as_ref().unwrap();
    assert_eq!(tx.inputs[0].previous_output, spent);
    assert_eq!(tx.outputs.len(), 2);
    assert!(record.old_used_utxos[0].user_sighash.is_some());
    assert_eq!(input_total(&record), output_total(&record) + record.fee);
}

#[test]
fn test_child_pays_for_parent() {
    init_tracing();
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let mut parent = funded(&wallet, &[100_000]);
    parent.addressees = vec![Addressee::new(wallet.external_address(1), 50_000)];
    create_transaction(&wallet.context(), &mut parent).unwrap();
    let mut prev = broadcast(&wallet, &parent);
    prev.can_rbf = false;
    prev.can_cpfp = true;
    let parent_txid = prev.txid;
    let old_fee = prev.fee;

    let deposit = wallet.receive_address(0, false).unwrap();
    let mut record = BuildRecord::default();
    record.previous_transaction = Some(prev);
    record.subaccount = Some(0);
    record.fee_rate = Some(10_000);
    record.addressees = vec![Addressee::new(deposit.address, 0)];
    create_transaction(&wallet.context(), &mut record).unwrap();

    assert_eq!(record.error(), None);
    assert!(record.is_cpfp && record.is_redeposit && record.send_all);
    assert!(record.network_fee > 0);
    assert!(record.fee > record.network_fee);
    assert_eq!(record.old_fee, Some(old_fee));

    let tx = record.transaction.as_ref().unwrap();
    assert_eq!(tx.inputs.len(), 1);
    assert_eq!(tx.inputs[0].previous_output.txid, parent_txid);
    assert_eq!(tx.outputs.len(), 1);
    assert_eq!(input_total(&record), output_total(&record) + record.fee);
}

#[test]
fn test_cpfp_at_parent_rate_adds_no_network_fee() {
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let mut parent = funded(&wallet, &[100_000]);
    parent.fee_rate = Some(20_000);
    parent.addressees = vec![Addressee::new(wallet.external_address(1), 50_000)];
    create_transaction(&wallet.context(), &mut parent).unwrap();
    let mut prev = broadcast(&wallet, &parent);
    prev.can_rbf = false;
    prev.can_cpfp = true;

    let deposit = wallet.receive_address(0, false).unwrap();
    let mut record = BuildRecord::default();
    record.previous_transaction = Some(prev);
    record.subaccount = Some(0);
    record.fee_rate = Some(1_000);
    record.addressees = vec![Addressee::new(deposit.address, 0)];
    create_transaction(&wallet.context(), &mut record).unwrap();

    assert_eq!(record.error(), None);
    assert_eq!(record.network_fee, 0);
}

#[test]
fn test_single_sig_replacement_keeps_internal_output_as_change() {
    init_tracing();
    let network = Network::bitcoin();
    let wallet = MockWallet::single_sig(&network);
    let (original, deposit) = self_payment(&wallet);
    let prev = broadcast(&wallet, &original);
    let internal = prev
        .outputs
        .iter()
        .find(|o| o.is_relevant && o.is_internal)
        .unwrap()
        .address
        .clone();
    assert_eq!(prev.outputs.iter().filter(|o| o.is_relevant).count(), 2);

    let mut record = replacement(prev, 5_000);
    create_transaction(&wallet.context(), &mut record).unwrap();

    assert_eq!(record.error(), None);
    assert!(record.is_rbf && !record.is_redeposit);
    let change = &record.change_address[&network.policy_asset];
    assert!(change.is_internal);
    assert_eq!(change.address, internal);
    // The receive-chain output is paid again whatever its position
    assert_eq!(record.addressees.len(), 2);
    assert!(record
        .addressees
        .iter()
        .any(|a| a.address == deposit && a.amount == 30_000));
}

#[test]
fn test_multisig_replacement_takes_first_wallet_output_as_change() {
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let (original, _) = self_payment(&wallet);
    let prev = broadcast(&wallet, &original);
    let first_owned = prev.outputs.iter().find(|o| o.is_relevant).unwrap().clone();

    let mut record = replacement(prev, 5_000);
    create_transaction(&wallet.context(), &mut record).unwrap();

    assert_eq!(record.error(), None);
    assert_eq!(record.change_address[&network.policy_asset].address, first_owned.address);
    assert_eq!(record.addressees.len(), 2);
    assert!(record.addressees.iter().all(|a| a.address != first_owned.address));
}

#[test]
fn test_csv_replacement_uses_timelock_from_witness() {
    init_tracing();
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network).with_address_type(AddressType::Csv);
    let (old_blocks, new_blocks) = (network.csv_buckets[0], network.csv_buckets[1]);
    let mut original = funded(&wallet, &[100_000]);
    original.addressees = vec![Addressee::new(wallet.external_address(1), 50_000)];
    create_transaction(&wallet.context(), &mut original).unwrap();
    assert_eq!(original.error(), None);
    assert_eq!(original.used_utxos[0].subtype, old_blocks);
    let mut prev = broadcast(&wallet, &original);

    // History now reports the wallet's new timelock for the spent input
    wallet.set_csv_blocks(new_blocks);
    for input in &mut prev.inputs {
        input.subtype = new_blocks;
    }

    let mut record = replacement(prev, 5_000);
    create_transaction(&wallet.context(), &mut record).unwrap();

    assert_eq!(record.error(), None);
    assert_eq!(record.old_used_utxos.len(), 1);
    let replayed = &record.old_used_utxos[0];
    assert_eq!(replayed.subtype, old_blocks);
    assert_eq!(csv_blocks(&replayed.prevout_script).unwrap(), old_blocks);
    assert_eq!(replayed.user_sighash, Some(0x01));
}

fn swap_signatures(tx: &mut RawTransaction) {
    // [NULL, service, user, script]
    tx.inputs[0].witness.swap(1, 2);
}

fn raise_first_output(tx: &mut RawTransaction) {
    let value = tx.outputs[0].explicit_value().unwrap();
    tx.outputs[0].set_explicit_value(value + 1);
}

#[test]
fn test_replacing_tampered_transaction_is_a_signature_mismatch() {
    let network = Network::bitcoin();
    for tamper in [swap_signatures as fn(&mut RawTransaction), raise_first_output] {
        let wallet = MockWallet::multisig(&network);
        let mut original = funded(&wallet, &[100_000]);
        original.addressees = vec![Addressee::new(wallet.external_address(1), 50_000)];
        create_transaction(&wallet.context(), &mut original).unwrap();

        let mut signed = wallet.fully_sign(&original).unwrap();
        tamper(&mut signed);
        let prev = wallet.previous_transaction(&original, &signed).unwrap();
        wallet.add_transaction(signed).unwrap();

        let mut record = replacement(prev, 5_000);
        let result = create_transaction(&wallet.context(), &mut record);
        assert!(
            matches!(result, Err(Error::SignatureMismatch { input: 0 })),
            "{:?}",
            result
        );
    }
}

#[test]
fn test_replacement_paying_only_the_wallet_is_a_redeposit() {
    init_tracing();
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let deposit = wallet.receive_address(0, false).unwrap();
    let mut original = funded(&wallet, &[100_000]);
    original.send_all = true;
    original.addressees = vec![Addressee::new(deposit.address.clone(), 0)];
    create_transaction(&wallet.context(), &mut original).unwrap();
    assert_eq!(original.error(), None);
    let prev = broadcast(&wallet, &original);
    assert!(prev.outputs.iter().all(|o| o.is_relevant));

    let mut record = replacement(prev, 5_000);
    create_transaction(&wallet.context(), &mut record).unwrap();

    assert_eq!(record.error(), None);
    assert!(record.is_rbf && record.is_redeposit);
    assert!(record.send_all && record.addressees_read_only);
    assert_eq!(record.change_subaccount, Some(0));
    assert_eq!(record.addressees.len(), 1);
    assert_eq!(record.addressees[0].address, deposit.address);
    assert!(record.fee > original.fee);

    let tx = record.transaction.as_ref().unwrap();
    assert_eq!(tx.outputs.len(), 1);
    assert_eq!(tx.outputs[0].explicit_value(), Some(100_000 - record.fee));
}

// ============================================================================
// Sweeping
// ============================================================================

#[test]
fn test_sweep_private_key() {
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let key = wallet.sweep_key(1);
    wallet.fund_sweep_key(&key, &[30_000, 20_000]);

    let mut record = BuildRecord::default();
    record.private_key = Some(key);
    record.subaccount = Some(0);
    record.fee_rate = Some(1_000);
    record.addressees = vec![Addressee::new(wallet.external_address(1), 12_345)];
    create_transaction(&wallet.context(), &mut record).unwrap();

    assert_eq!(record.error(), None);
    assert!(record.is_sweep && record.send_all && record.addressees_read_only);
    let tx = record.transaction.as_ref().unwrap();
    assert_eq!(tx.inputs.len(), 2);
    assert_eq!(tx.outputs.len(), 1);
    assert_eq!(tx.outputs[0].explicit_value(), Some(50_000 - record.fee));

    let signatures = sign_transaction(&wallet.context(), &mut record).unwrap();
    assert!(signatures.iter().all(Option::is_some));
    let tx = record.transaction.as_ref().unwrap();
    for (index, utxo) in get_signing_inputs(&record).unwrap().iter().enumerate() {
        verify_input_signatures(tx, index, utxo).unwrap();
    }
}

#[test]
fn test_sweep_with_bad_key() {
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let mut record = BuildRecord::default();
    record.private_key = Some("not a key".to_string());
    record.subaccount = Some(0);
    record.addressees = vec![Addressee::new(wallet.external_address(1), 0)];
    create_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(record.error(), Some(&BuildError::InvalidPrivateKey));
}

#[test]
fn test_sweep_of_empty_key() {
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let mut record = BuildRecord::default();
    record.private_key = Some(wallet.sweep_key(2));
    record.subaccount = Some(0);
    record.addressees = vec![Addressee::new(wallet.external_address(1), 0)];
    create_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(record.error(), Some(&BuildError::NoUtxosFound));
}

// ============================================================================
// Signing
// ============================================================================

#[test]
fn test_single_sig_signatures_verify() {
    let network = Network::bitcoin();
    let wallet = MockWallet::single_sig(&network);
    let mut record = funded(&wallet, &[40_000, 40_000]);
    record.addressees = vec![Addressee::new(wallet.external_address(1), 60_000)];
    create_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(record.error(), None);

    let signatures = sign_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(signatures.len(), 2);
    let tx = record.transaction.as_ref().unwrap();
    for (index, utxo) in get_signing_inputs(&record).unwrap().iter().enumerate() {
        assert_eq!(verify_input_signatures(tx, index, utxo).unwrap(), 0x01);
    }
}

#[test]
fn test_multisig_cosigned_signatures_verify() {
    let network = Network::bitcoin();
    let wallet = MockWallet::multisig(&network);
    let mut record = funded(&wallet, &[100_000]);
    record.addressees = vec![Addressee::new(wallet.external_address(1), 50_000)];
    create_transaction(&wallet.context(), &mut record).unwrap();

    let user_signed = {
        let mut signing = record.clone();
        sign_transaction(&wallet.context(), &mut signing).unwrap();
        signing.transaction.unwrap()
    };
    // The service slot is left for the co-signer
    assert_eq!(user_signed.inputs[0].witness.len(), 1);

    let signed = wallet.fully_sign(&record).unwrap();
    let utxo = &get_signing_inputs(&record).unwrap()[0];
    verify_input_signatures(&signed, 0, utxo).unwrap();
    assert_eq!(signed.inputs[0].witness[2], user_signed.inputs[0].witness[0]);
}

// ============================================================================
// Confidential transactions
// ============================================================================

#[test]
fn test_blind_and_sign_confidential_payment() {
    init_tracing();
    let network = Network::liquid();
    let wallet = MockWallet::multisig(&network);
    let policy = network.policy_asset;
    let mut record = funded(&wallet, &[100_000]);
    record.fee_rate = None;
    record.addressees = vec![Addressee::new(wallet.external_address(1), 50_000)];
    create_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(record.error(), None);

    let tx = record.transaction.as_ref().unwrap();
    assert_eq!(tx.outputs.len(), 3);
    assert!(tx.outputs[2].is_fee());
    assert_eq!(tx.outputs[2].explicit_value(), Some(record.fee));

    let factors = get_blinding_factors(&wallet.master_blinding_key(), &record).unwrap();
    assert_eq!(factors, get_blinding_factors(&wallet.master_blinding_key(), &record).unwrap());
    blind_transaction(&wallet.context(), &mut record, &factors).unwrap();
    assert!(record.is_blinded);

    let ctx = wallet.context();
    let tx = record.transaction.clone().unwrap();
    assert!(tx.outputs[..2].iter().all(|o| o.is_blinded()));
    assert!(tx.outputs[2].is_explicit());

    let change_index = record.change_index_for(&policy).unwrap();
    let change = unblind_output(&ctx, &tx, change_index).unwrap().unwrap();
    assert_eq!(change.value, record.change_amount[&policy]);
    assert_eq!(change.asset, policy);
    assert!(unblind_output(&ctx, &tx, 1 - change_index).unwrap().is_none());

    let signatures = sign_transaction(&ctx, &mut record).unwrap();
    assert!(signatures.iter().all(Option::is_some));
}

#[test]
fn test_blinded_commitments_balance() {
    let network = Network::liquid();
    let wallet = MockWallet::multisig(&network);
    let policy = network.policy_asset;
    let token = AssetId::from_bytes([7; 32]);

    let mut record = BuildRecord::default();
    record.utxos.insert(policy, vec![wallet.utxo(0, 100_000).unwrap()]);
    record.utxos.insert(token, vec![wallet.utxo_with_asset(0, 1_000, token).unwrap()]);
    record.addressees = vec![Addressee::new(wallet.external_address(1), 400).with_asset(token)];
    create_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(record.error(), None);
    assert_eq!(record.change_amount[&token], 600);

    let factors = get_blinding_factors(&wallet.master_blinding_key(), &record).unwrap();
    blind_transaction(&wallet.context(), &mut record, &factors).unwrap();

    let primitives = Secp256k1Confidential;
    let inputs = get_signing_inputs(&record).unwrap();
    let input_commitments: Vec<[u8; 33]> = inputs.iter().map(|u| u.commitment.unwrap()).collect();
    let input_generators: Vec<[u8; 33]> = inputs
        .iter()
        .map(|u| primitives.asset_generator(&u.asset, &u.asset_blinder.unwrap()).unwrap())
        .collect();

    let tx = record.transaction.as_ref().unwrap();
    let mut output_commitments = Vec::new();
    for output in &tx.outputs {
        match (output.value, output.asset) {
            (
                ConfidentialValue::Confidential(value),
                ConfidentialAsset::Confidential(generator),
            ) => {
                assert!(primitives.verify_surjection_proof(
                    &output.surjection_proof,
                    &generator,
                    &input_generators
                ));
                output_commitments.push(value);
            }
            _ => {
                let fee_generator = primitives.asset_generator(&policy, &[0; 32]).unwrap();
                let fee = primitives.value_commitment(record.fee, &[0; 32], &fee_generator);
                output_commitments.push(fee.unwrap());
            }
        }
    }
    assert!(primitives.commitments_balance(&input_commitments, &output_commitments).unwrap());
}

#[test]
fn test_unconfidential_address_is_rejected() {
    let network = Network::liquid();
    let wallet = MockWallet::multisig(&network);
    let mut record = funded(&wallet, &[100_000]);
    record.addressees = vec![Addressee::new(wallet.unconfidential_address(1), 50_000)];
    create_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(record.error(), Some(&BuildError::NonConfidentialAddress));
}

#[test]
fn test_manual_utxo_of_unpaid_asset() {
    let network = Network::liquid();
    let wallet = MockWallet::multisig(&network);
    let token = AssetId::from_bytes([7; 32]);
    let mut record = BuildRecord::default();
    record.strategy = UtxoStrategy::Manual;
    record.used_utxos = vec![
        wallet.utxo(0, 100_000).unwrap(),
        wallet.utxo_with_asset(0, 1_000, token).unwrap(),
    ];
    record.addressees = vec![Addressee::new(wallet.external_address(1), 50_000)];
    create_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(record.error(), Some(&BuildError::MissingAssetRecipient(token)));
}

#[test]
fn test_sweep_is_unsupported_on_confidential_ledger() {
    let network = Network::liquid();
    let wallet = MockWallet::multisig(&network);
    let mut record = BuildRecord::default();
    record.private_key = Some(wallet.sweep_key(1));
    record.subaccount = Some(0);
    record.addressees = vec![Addressee::new(wallet.external_address(1), 0)];
    create_transaction(&wallet.context(), &mut record).unwrap();
    assert_eq!(record.error(), Some(&BuildError::SweepNotSupported));
}

//! Green script templates
//!
//! Only the handful of templates Green wallets produce: single-sig
//! P2PKH/P2WPKH, 2of2 multisig, 2of2 CSV recovery scripts and their P2SH /
//! P2WSH wrappings. Scripts are assembled with `bitcoin::script::Builder`;
//! the encoding is shared by both ledgers.

use crate::{Error, Result};
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::{
    OP_1SUB, OP_CHECKMULTISIG, OP_CHECKSIG, OP_CHECKSIGVERIFY, OP_CSV, OP_DEPTH, OP_DROP, OP_ELSE,
    OP_ENDIF, OP_IF, OP_IFDUP, OP_NOTIF, OP_PUSHNUM_1, OP_PUSHNUM_16, OP_PUSHNUM_2,
};
use bitcoin::opcodes::OP_0;
use bitcoin::script::{read_scriptint, Builder, Instruction, PushBytes, Script, ScriptBuf};
use bitcoin::{PubkeyHash, ScriptHash, WPubkeyHash, WScriptHash};

/// Placeholder signature byte patterns: `R`/`S` built from OP_SUBSTR (0x7f)
/// with a leading OP_INVALIDOPCODE (0xff) forcing the 33-byte DER length.
const SIG_LOW: [u8; 32] = [0x7f; 32];
const SIG_HIGH: [u8; 32] = {
    let mut bytes = [0x7f; 32];
    bytes[0] = 0xff;
    bytes
};

/// Length of the largest low-R DER signature plus sighash byte
pub const DUMMY_SIG_LEN_LOW_R: usize = 72;
/// Length of the largest DER signature plus sighash byte
pub const DUMMY_SIG_LEN: usize = 73;

/// Fixed-size DER placeholder sized like the largest real signature
pub fn dummy_signature(low_r: bool) -> Vec<u8> {
    let mut der = Vec::with_capacity(DUMMY_SIG_LEN);
    if low_r {
        der.extend_from_slice(&[0x30, 0x45, 0x02, 0x20]);
        der.extend_from_slice(&SIG_LOW);
    } else {
        der.extend_from_slice(&[0x30, 0x46, 0x02, 0x21, 0x00]);
        der.extend_from_slice(&SIG_HIGH);
    }
    der.extend_from_slice(&[0x02, 0x21, 0x00]);
    der.extend_from_slice(&SIG_HIGH);
    der.push(0x01);
    der
}

fn push(builder: Builder, data: &[u8]) -> Result<Builder> {
    let bytes = <&PushBytes>::try_from(data)
        .map_err(|_| Error::Encoding(format!("{} bytes do not fit a script push", data.len())))?;
    Ok(builder.push_slice(bytes))
}

fn pushes(builder: Builder, items: &[&[u8]]) -> Result<Builder> {
    items.iter().try_fold(builder, |b, item| push(b, item))
}

/// Data pushes of a push-only script such as a scriptSig
pub fn parse_pushes(script: &[u8]) -> Result<Vec<Vec<u8>>> {
    Script::from_bytes(script)
        .instructions()
        .map(|ins| match ins {
            Ok(Instruction::PushBytes(data)) => Ok(data.as_bytes().to_vec()),
            Ok(Instruction::Op(op)) => Err(Error::Encoding(format!(
                "unexpected {} in push-only script",
                op
            ))),
            Err(e) => Err(Error::Encoding(format!("script: {}", e))),
        })
        .collect()
}

/// `OP_2 <service> <user> OP_2 OP_CHECKMULTISIG`
pub fn multisig_2of2(service: &[u8], user: &[u8]) -> Result<Vec<u8>> {
    let builder = pushes(Builder::new().push_opcode(OP_PUSHNUM_2), &[service, user])?;
    Ok(builder
        .push_opcode(OP_PUSHNUM_2)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
        .into_bytes())
}

/// 2of2 that degrades to user-only after `blocks` confirmations.
///
/// Optimized form:
/// `<user> CHECKSIGVERIFY <service> CHECKSIG IFDUP NOTIF <blocks> CSV ENDIF`
///
/// Legacy form (still used on confidential ledgers):
/// `DEPTH 1SUB IF <service> CHECKSIGVERIFY ELSE <blocks> CSV DROP ENDIF <user> CHECKSIG`
pub fn csv_2of2(service: &[u8], user: &[u8], blocks: u32, optimized: bool) -> Result<Vec<u8>> {
    let blocks = i64::from(blocks);
    let builder = if optimized {
        let b = push(Builder::new(), user)?.push_opcode(OP_CHECKSIGVERIFY);
        push(b, service)?
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_IFDUP)
            .push_opcode(OP_NOTIF)
            .push_int(blocks)
            .push_opcode(OP_CSV)
            .push_opcode(OP_ENDIF)
    } else {
        let b = Builder::new()
            .push_opcode(OP_DEPTH)
            .push_opcode(OP_1SUB)
            .push_opcode(OP_IF);
        let b = push(b, service)?
            .push_opcode(OP_CHECKSIGVERIFY)
            .push_opcode(OP_ELSE)
            .push_int(blocks)
            .push_opcode(OP_CSV)
            .push_opcode(OP_DROP)
            .push_opcode(OP_ENDIF);
        push(b, user)?.push_opcode(OP_CHECKSIG)
    };
    Ok(builder.into_script().into_bytes())
}

/// Whether a CSV script uses the optimized layout (user key first)
pub fn is_optimized_csv(script: &[u8]) -> bool {
    script.first() != Some(&OP_DEPTH.to_u8())
}

/// Recover the CSV block count from a CSV redeem script
pub fn csv_blocks(script: &[u8]) -> Result<u32> {
    let ins = Script::from_bytes(script)
        .instructions()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Encoding(format!("script: {}", e)))?;
    let pos = ins
        .iter()
        .position(|i| *i == Instruction::Op(OP_CSV))
        .ok_or_else(|| Error::Encoding("no CHECKSEQUENCEVERIFY in script".to_string()))?;
    let blocks = match pos.checked_sub(1).and_then(|p| ins.get(p)) {
        Some(Instruction::PushBytes(data)) => read_scriptint(data.as_bytes()).ok(),
        Some(Instruction::Op(op))
            if (OP_PUSHNUM_1.to_u8()..=OP_PUSHNUM_16.to_u8()).contains(&op.to_u8()) =>
        {
            Some(i64::from(op.to_u8() - OP_PUSHNUM_1.to_u8() + 1))
        }
        _ => None,
    };
    blocks
        .and_then(|b| u32::try_from(b).ok())
        .ok_or_else(|| Error::Encoding("CSV script has no block count".to_string()))
}

/// `DUP HASH160 <hash160(pubkey)> EQUALVERIFY CHECKSIG`
pub fn p2pkh(public_key: &[u8]) -> Vec<u8> {
    ScriptBuf::new_p2pkh(&PubkeyHash::hash(public_key)).into_bytes()
}

/// `HASH160 <hash160(redeem)> EQUAL`
pub fn p2sh(redeem_script: &[u8]) -> Vec<u8> {
    ScriptBuf::new_p2sh(&ScriptHash::hash(redeem_script)).into_bytes()
}

/// `0 <hash160(pubkey)>`
pub fn p2wpkh(public_key: &[u8]) -> Vec<u8> {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::hash(public_key)).into_bytes()
}

/// `0 <sha256(witness_script)>`
pub fn p2wsh(witness_script: &[u8]) -> Vec<u8> {
    ScriptBuf::new_p2wsh(&WScriptHash::hash(witness_script)).into_bytes()
}

fn pushed(data: &[u8]) -> Result<Vec<u8>> {
    Ok(push(Builder::new(), data)?.into_script().into_bytes())
}

/// scriptSig spending P2SH-wrapped P2WPKH: a push of the witness program
pub fn p2sh_p2wpkh_script_sig(public_key: &[u8]) -> Result<Vec<u8>> {
    pushed(&p2wpkh(public_key))
}

/// scriptSig spending P2SH-wrapped P2WSH: a push of the witness program
pub fn p2sh_p2wsh_script_sig(witness_script: &[u8]) -> Result<Vec<u8>> {
    pushed(&p2wsh(witness_script))
}

/// `<sig> <pubkey>`
pub fn p2pkh_script_sig(der: &[u8], public_key: &[u8]) -> Result<Vec<u8>> {
    Ok(pushes(Builder::new(), &[der, public_key])?.into_script().into_bytes())
}

/// `OP_0 <service sig> <user sig> <redeem>`
pub fn multisig_script_sig(
    service_der: &[u8],
    user_der: &[u8],
    redeem_script: &[u8],
) -> Result<Vec<u8>> {
    let builder = Builder::new().push_opcode(OP_0);
    Ok(pushes(builder, &[service_der, user_der, redeem_script])?
        .into_script()
        .into_bytes())
}

/// `OP_0 OP_1 OP_0 <user sig> <redeem>`: a legacy multisig input awaiting
/// the service signature
pub fn multisig_user_script_sig(user_der: &[u8], redeem_script: &[u8]) -> Result<Vec<u8>> {
    let builder = Builder::new()
        .push_opcode(OP_0)
        .push_opcode(OP_PUSHNUM_1)
        .push_opcode(OP_0);
    Ok(pushes(builder, &[user_der, redeem_script])?.into_script().into_bytes())
}

/// Public keys in a 2of2 multisig or CSV redeem script, in script order
pub fn script_public_keys(script: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut keys = Vec::with_capacity(2);
    for ins in Script::from_bytes(script).instructions() {
        match ins.map_err(|e| Error::Encoding(format!("script: {}", e)))? {
            Instruction::PushBytes(data) if data.len() == 33 => keys.push(data.as_bytes().to_vec()),
            _ => {}
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: [u8; 33] = [0x02; 33];
    const KEY_B: [u8; 33] = [0x03; 33];

    #[test]
    fn test_dummy_signature_lengths() {
        let low = dummy_signature(true);
        let high = dummy_signature(false);
        assert_eq!(low.len(), DUMMY_SIG_LEN_LOW_R);
        assert_eq!(high.len(), DUMMY_SIG_LEN);
        assert_eq!(&low[..4], &[0x30, 0x45, 0x02, 0x20]);
        assert_eq!(*high.last().unwrap(), 0x01);
    }

    #[test]
    fn test_multisig_layout() {
        let script = multisig_2of2(&KEY_A, &KEY_B).unwrap();
        assert_eq!(script.len(), 71);
        assert_eq!(script[0], OP_PUSHNUM_2.to_u8());
        assert_eq!(*script.last().unwrap(), OP_CHECKMULTISIG.to_u8());
    }

    #[test]
    fn test_csv_blocks_both_layouts() {
        for blocks in [1u32, 16, 144, 4_320, 51_840, 65_535] {
            let optimized = csv_2of2(&KEY_A, &KEY_B, blocks, true).unwrap();
            let legacy = csv_2of2(&KEY_A, &KEY_B, blocks, false).unwrap();
            assert!(is_optimized_csv(&optimized));
            assert!(!is_optimized_csv(&legacy));
            assert_eq!(csv_blocks(&optimized).unwrap(), blocks);
            assert_eq!(csv_blocks(&legacy).unwrap(), blocks);
        }
        assert!(csv_blocks(&multisig_2of2(&KEY_A, &KEY_B).unwrap()).is_err());
    }

    #[test]
    fn test_csv_block_count_encoding() {
        // 144 needs a sign byte: 0x90 0x00
        let script = csv_2of2(&KEY_A, &KEY_B, 144, true).unwrap();
        let csv = script.iter().position(|b| *b == OP_CSV.to_u8()).unwrap();
        assert_eq!(&script[csv - 3..csv], &[0x02, 0x90, 0x00]);
    }

    #[test]
    fn test_script_public_keys_order() {
        let keys = script_public_keys(&multisig_2of2(&KEY_A, &KEY_B).unwrap()).unwrap();
        assert_eq!(keys, vec![KEY_A.to_vec(), KEY_B.to_vec()]);
        // Optimized CSV lists the user key first
        let keys = script_public_keys(&csv_2of2(&KEY_A, &KEY_B, 144, true).unwrap()).unwrap();
        assert_eq!(keys, vec![KEY_B.to_vec(), KEY_A.to_vec()]);
    }

    #[test]
    fn test_parse_pushes() {
        let redeem = multisig_2of2(&KEY_A, &KEY_B).unwrap();
        let sig = dummy_signature(true);
        let script_sig = multisig_script_sig(&sig, &sig, &redeem).unwrap();
        let pushes = parse_pushes(&script_sig).unwrap();
        assert_eq!(pushes.len(), 4);
        assert!(pushes[0].is_empty());
        assert_eq!(pushes[3], redeem);
        assert!(parse_pushes(&redeem).is_err());
        // Truncated push
        assert!(parse_pushes(&[0x05, 0x01]).is_err());
    }

    #[test]
    fn test_output_script_shapes() {
        assert!(Script::from_bytes(&p2pkh(&KEY_A)).is_p2pkh());
        assert!(Script::from_bytes(&p2sh(&KEY_A)).is_p2sh());
        assert!(Script::from_bytes(&p2wpkh(&KEY_A)).is_p2wpkh());
        assert!(Script::from_bytes(&p2wsh(&KEY_A)).is_p2wsh());
        assert_eq!(p2sh_p2wsh_script_sig(&KEY_A).unwrap().len(), 35);
        assert_eq!(p2sh_p2wpkh_script_sig(&KEY_A).unwrap().len(), 23);
    }
}

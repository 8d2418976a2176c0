//! Commitment and proof primitives for the confidential ledger
//!
//! [`ConfidentialPrimitives`] is the seam between the blinding engine and
//! the cryptography it relies on. [`Secp256k1Confidential`] implements it on
//! `secp256k1-zkp` as re-exported by `elements`: blinded asset generators,
//! Pedersen value commitments, Borromean range proofs rewindable with the
//! ECDH nonce, and asset surjection proofs.

use crate::crypto::{is_zero_scalar, SECP};
use crate::{Error, Result};
use elements::confidential::{AssetBlindingFactor, Nonce, ValueBlindingFactor};
use elements::secp256k1_zkp::{
    self, Generator, PedersenCommitment, RangeProof, SurjectionProof, Tag, Tweak,
};
use green_params::AssetId;
use rand::rngs::StdRng;
use rand::SeedableRng;
use secp256k1::{PublicKey, SecretKey};

/// Smallest value a range proof covers
const RANGEPROOF_MIN_VALUE: u64 = 1;

/// Inputs to a range proof
#[derive(Debug, Clone, Copy)]
pub struct RangeproofRequest<'a> {
    /// Committed value
    pub value: u64,
    /// Recipient's blinding public key
    pub blinding_pubkey: &'a PublicKey,
    /// Ephemeral secret whose public key becomes the output nonce
    pub eph_secret: &'a SecretKey,
    /// Unblinded asset
    pub asset: &'a AssetId,
    /// Asset blinding factor
    pub abf: &'a [u8; 32],
    /// Value blinding factor
    pub vbf: &'a [u8; 32],
    /// Value commitment being proven
    pub commitment: &'a [u8; 33],
    /// Output script, bound into the proof
    pub script_pubkey: &'a [u8],
    /// Asset generator of the output
    pub generator: &'a [u8; 33],
    /// Base-10 exponent of the proven range
    pub exp: i32,
    /// Minimum number of bits hidden by the proof
    pub min_bits: u8,
}

/// Opened commitments of a blinded output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unblinded {
    /// Value
    pub value: u64,
    /// Asset
    pub asset: AssetId,
    /// Asset blinding factor
    pub asset_blinder: [u8; 32],
    /// Value blinding factor
    pub amount_blinder: [u8; 32],
}

/// Pedersen commitment, range proof and surjection proof operations
pub trait ConfidentialPrimitives {
    /// Asset generator `H(asset) + abf*G`
    fn asset_generator(&self, asset: &AssetId, abf: &[u8; 32]) -> Result<[u8; 33]>;

    /// Value commitment `value*generator + vbf*G`
    fn value_commitment(
        &self,
        value: u64,
        vbf: &[u8; 32],
        generator: &[u8; 33],
    ) -> Result<[u8; 33]>;

    /// The value blinder for the last entry of `values` that balances all
    /// commitments.
    ///
    /// `values` and `abfs` list the first `num_inputs` inputs then the
    /// outputs; `vbfs` lists all but the last entry.
    fn final_vbf(
        &self,
        values: &[u64],
        num_inputs: usize,
        abfs: &[[u8; 32]],
        vbfs: &[[u8; 32]],
    ) -> Result<[u8; 32]>;

    /// Range proof rewindable by the holder of the blinding private key
    fn rangeproof(&self, request: &RangeproofRequest<'_>) -> Result<Vec<u8>>;

    /// Open a blinded output with the recipient's blinding key
    fn unblind(
        &self,
        blinding_key: &SecretKey,
        nonce_commitment: &[u8; 33],
        range_proof: &[u8],
        value_commitment: &[u8; 33],
        script_pubkey: &[u8],
        asset_commitment: &[u8; 33],
    ) -> Result<Unblinded>;

    /// Proof that `generator` commits to one of the input assets
    #[allow(clippy::too_many_arguments)]
    fn surjection_proof(
        &self,
        asset: &AssetId,
        abf: &[u8; 32],
        generator: &[u8; 33],
        entropy: &[u8; 32],
        input_assets: &[AssetId],
        input_abfs: &[[u8; 32]],
        input_generators: &[[u8; 33]],
    ) -> Result<Vec<u8>>;

    /// Check a surjection proof against the input generators
    fn verify_surjection_proof(
        &self,
        proof: &[u8],
        generator: &[u8; 33],
        input_generators: &[[u8; 33]],
    ) -> bool;

    /// Whether the input commitments sum to the output commitments
    fn commitments_balance(&self, inputs: &[[u8; 33]], outputs: &[[u8; 33]]) -> Result<bool>;
}

/// [`ConfidentialPrimitives`] on `secp256k1-zkp`
#[derive(Debug, Clone, Copy, Default)]
pub struct Secp256k1Confidential;

fn asset_tag(asset: &AssetId) -> Result<Tag> {
    elements::AssetId::from_slice(asset.as_bytes())
        .map(|id| id.into_tag())
        .map_err(|e| Error::Encoding(format!("asset {}: {}", asset, e)))
}

fn tweak_bytes(tweak: Tweak) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(tweak.as_ref());
    out
}

type ValueBlinders = (u64, AssetBlindingFactor, ValueBlindingFactor);

fn blinders(values: &[u64], abfs: &[[u8; 32]], vbfs: &[[u8; 32]]) -> Result<Vec<ValueBlinders>> {
    values
        .iter()
        .zip(abfs)
        .zip(vbfs)
        .map(|((value, abf), vbf)| -> Result<ValueBlinders> {
            Ok((
                *value,
                AssetBlindingFactor::from_slice(abf)?,
                ValueBlindingFactor::from_slice(vbf)?,
            ))
        })
        .collect()
}

impl ConfidentialPrimitives for Secp256k1Confidential {
    fn asset_generator(&self, asset: &AssetId, abf: &[u8; 32]) -> Result<[u8; 33]> {
        let generator = Generator::new_blinded(&SECP, asset_tag(asset)?, Tweak::from_slice(abf)?);
        Ok(generator.serialize())
    }

    fn value_commitment(
        &self,
        value: u64,
        vbf: &[u8; 32],
        generator: &[u8; 33],
    ) -> Result<[u8; 33]> {
        if value == 0 && is_zero_scalar(vbf) {
            return Err(Error::Crypto("commitment to zero with zero blinder".to_string()));
        }
        let generator = Generator::from_slice(generator)?;
        let commitment = PedersenCommitment::new(&SECP, value, Tweak::from_slice(vbf)?, generator);
        Ok(commitment.serialize())
    }

    fn final_vbf(
        &self,
        values: &[u64],
        num_inputs: usize,
        abfs: &[[u8; 32]],
        vbfs: &[[u8; 32]],
    ) -> Result<[u8; 32]> {
        if values.is_empty()
            || num_inputs == 0
            || num_inputs >= values.len()
            || abfs.len() != values.len()
            || vbfs.len() + 1 != values.len()
        {
            return Err(Error::InvalidState(format!(
                "final vbf: {} values, {} inputs, {} abfs, {} vbfs",
                values.len(),
                num_inputs,
                abfs.len(),
                vbfs.len()
            )));
        }
        let last = values.len() - 1;
        let inputs = blinders(&values[..num_inputs], &abfs[..num_inputs], &vbfs[..num_inputs])?;
        let outputs = blinders(
            &values[num_inputs..last],
            &abfs[num_inputs..last],
            &vbfs[num_inputs..],
        )?;
        let vbf = ValueBlindingFactor::last(
            &SECP,
            values[last],
            AssetBlindingFactor::from_slice(&abfs[last])?,
            &inputs,
            &outputs,
        );
        Ok(tweak_bytes(vbf.into_inner()))
    }

    fn rangeproof(&self, request: &RangeproofRequest<'_>) -> Result<Vec<u8>> {
        let (_, shared_secret) =
            Nonce::with_ephemeral_sk(&SECP, *request.eph_secret, request.blinding_pubkey);
        // The recipient recovers asset and asset blinder from the message
        let mut message = [0u8; 64];
        message[..32].copy_from_slice(asset_tag(request.asset)?.as_ref());
        message[32..].copy_from_slice(request.abf);

        let proof = RangeProof::new(
            &SECP,
            RANGEPROOF_MIN_VALUE,
            PedersenCommitment::from_slice(request.commitment)?,
            request.value,
            Tweak::from_slice(request.vbf)?,
            &message,
            request.script_pubkey,
            shared_secret,
            request.exp,
            request.min_bits,
            Generator::from_slice(request.generator)?,
        )?;
        Ok(proof.serialize())
    }

    fn unblind(
        &self,
        blinding_key: &SecretKey,
        nonce_commitment: &[u8; 33],
        range_proof: &[u8],
        value_commitment: &[u8; 33],
        script_pubkey: &[u8],
        asset_commitment: &[u8; 33],
    ) -> Result<Unblinded> {
        let shared_secret = Nonce::from_commitment(nonce_commitment)?
            .shared_secret(blinding_key)
            .ok_or_else(|| Error::Crypto("output has no nonce commitment".to_string()))?;
        let generator = Generator::from_slice(asset_commitment)?;
        let (opening, _) = RangeProof::from_slice(range_proof)?.rewind(
            &SECP,
            PedersenCommitment::from_slice(value_commitment)?,
            shared_secret,
            script_pubkey,
            generator,
        )?;

        if opening.message.len() < 64 {
            return Err(Error::Crypto("range proof message too short".to_string()));
        }
        let (asset, asset_blinder) = opening.message.split_at(32);
        let mut asset_bytes = [0u8; 32];
        asset_bytes.copy_from_slice(asset);
        let mut abf = [0u8; 32];
        abf.copy_from_slice(&asset_blinder[..32]);

        let unblinded = Unblinded {
            value: opening.value,
            asset: AssetId::from_bytes(asset_bytes),
            asset_blinder: abf,
            amount_blinder: tweak_bytes(opening.blinding_factor),
        };
        if self.asset_generator(&unblinded.asset, &unblinded.asset_blinder)? != *asset_commitment {
            return Err(Error::Crypto(
                "range proof does not match the asset commitment".to_string(),
            ));
        }
        Ok(unblinded)
    }

    fn surjection_proof(
        &self,
        asset: &AssetId,
        abf: &[u8; 32],
        generator: &[u8; 33],
        entropy: &[u8; 32],
        input_assets: &[AssetId],
        input_abfs: &[[u8; 32]],
        input_generators: &[[u8; 33]],
    ) -> Result<Vec<u8>> {
        if input_assets.len() != input_abfs.len() || input_assets.len() != input_generators.len() {
            return Err(Error::InvalidState("surjection domain length mismatch".to_string()));
        }
        if self.asset_generator(asset, abf)? != *generator {
            return Err(Error::Crypto("output generator does not match its blinder".to_string()));
        }
        let domain = input_assets
            .iter()
            .zip(input_abfs)
            .zip(input_generators)
            .map(|((asset, abf), generator)| -> Result<(Generator, Tag, Tweak)> {
                Ok((Generator::from_slice(generator)?, asset_tag(asset)?, Tweak::from_slice(abf)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut rng = StdRng::from_seed(*entropy);
        let tag = asset_tag(asset)?;
        let proof = SurjectionProof::new(&SECP, &mut rng, tag, Tweak::from_slice(abf)?, &domain)
            .map_err(|e| {
                Error::Crypto(format!("asset {} is not provable from the inputs: {}", asset, e))
            })?;
        Ok(proof.serialize())
    }

    fn verify_surjection_proof(
        &self,
        proof: &[u8],
        generator: &[u8; 33],
        input_generators: &[[u8; 33]],
    ) -> bool {
        let parsed = (|| -> std::result::Result<_, secp256k1_zkp::Error> {
            let proof = SurjectionProof::from_slice(proof)?;
            let generator = Generator::from_slice(generator)?;
            let domain = input_generators
                .iter()
                .map(|g| Generator::from_slice(g))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok((proof, generator, domain))
        })();
        match parsed {
            Ok((proof, generator, domain)) => proof.verify(&SECP, generator, &domain),
            Err(e) => {
                tracing::debug!("unparseable surjection proof: {}", e);
                false
            }
        }
    }

    fn commitments_balance(&self, inputs: &[[u8; 33]], outputs: &[[u8; 33]]) -> Result<bool> {
        let parse = |commitments: &[[u8; 33]]| -> Result<Vec<PedersenCommitment>> {
            commitments
                .iter()
                .map(|c| -> Result<PedersenCommitment> { Ok(PedersenCommitment::from_slice(c)?) })
                .collect()
        };
        Ok(secp256k1_zkp::verify_commitments_sum_to_equal(
            &SECP,
            &parse(inputs)?,
            &parse(outputs)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{random_secret_key, ZERO_SCALAR};

    fn asset(b: u8) -> AssetId {
        AssetId::from_bytes([b; 32])
    }

    fn blinder() -> [u8; 32] {
        random_secret_key().secret_bytes()
    }

    #[test]
    fn test_generator_encoding() {
        let p = Secp256k1Confidential;
        let unblinded = p.asset_generator(&asset(1), &ZERO_SCALAR).unwrap();
        let blinded = p.asset_generator(&asset(1), &blinder()).unwrap();
        assert!(matches!(unblinded[0], 0x0a | 0x0b));
        assert_ne!(unblinded, blinded);
        assert_ne!(unblinded, p.asset_generator(&asset(2), &ZERO_SCALAR).unwrap());

        let commitment = p.value_commitment(5, &blinder(), &blinded).unwrap();
        assert!(matches!(commitment[0], 0x08 | 0x09));
        assert!(p.value_commitment(0, &ZERO_SCALAR, &blinded).is_err());
    }

    #[test]
    fn test_final_vbf_balances() {
        let p = Secp256k1Confidential;
        let a = asset(3);
        let in_abf = blinder();
        let in_vbf = blinder();
        let out_abfs = [blinder(), blinder()];
        let out0_vbf = blinder();

        // 1000 in, 600 + 300 out, 100 fee
        let values = [1_000, 600, 300];
        let abfs = [in_abf, out_abfs[0], out_abfs[1]];
        let vbfs = [in_vbf, out0_vbf];
        let last_vbf = p.final_vbf(&values, 1, &abfs, &vbfs).unwrap();

        let gen = |abf: &[u8; 32]| p.asset_generator(&a, abf).unwrap();
        let input = p.value_commitment(1_000, &in_vbf, &gen(&in_abf)).unwrap();
        let out0 = p.value_commitment(600, &out0_vbf, &gen(&out_abfs[0])).unwrap();
        let out1 = p.value_commitment(300, &last_vbf, &gen(&out_abfs[1])).unwrap();
        let fee = p.value_commitment(100, &ZERO_SCALAR, &gen(&ZERO_SCALAR)).unwrap();

        assert!(p.commitments_balance(&[input], &[out0, out1, fee]).unwrap());
        let wrong_fee = p.value_commitment(99, &ZERO_SCALAR, &gen(&ZERO_SCALAR)).unwrap();
        assert!(!p.commitments_balance(&[input], &[out0, out1, wrong_fee]).unwrap());
    }

    #[test]
    fn test_final_vbf_rejects_bad_shapes() {
        let p = Secp256k1Confidential;
        assert!(p.final_vbf(&[1, 2], 2, &[ZERO_SCALAR; 2], &[ZERO_SCALAR]).is_err());
        assert!(p.final_vbf(&[1, 2], 1, &[ZERO_SCALAR; 2], &[]).is_err());
    }

    #[test]
    fn test_rangeproof_rewinds_with_blinding_key() {
        let p = Secp256k1Confidential;
        let blinding_key = random_secret_key();
        let blinding_pubkey = PublicKey::from_secret_key(&SECP, &blinding_key);
        let eph = random_secret_key();
        let eph_pub = PublicKey::from_secret_key(&SECP, &eph).serialize();
        let a = asset(9);
        let abf = blinder();
        let vbf = blinder();
        let generator = p.asset_generator(&a, &abf).unwrap();
        let commitment = p.value_commitment(42_000, &vbf, &generator).unwrap();
        let script = vec![0x00, 0x14, 0xaa];

        let proof = p
            .rangeproof(&RangeproofRequest {
                value: 42_000,
                blinding_pubkey: &blinding_pubkey,
                eph_secret: &eph,
                asset: &a,
                abf: &abf,
                vbf: &vbf,
                commitment: &commitment,
                script_pubkey: &script,
                generator: &generator,
                exp: 0,
                min_bits: 52,
            })
            .unwrap();
        // Never larger than the fee estimate assumes for 52 hidden bits
        assert!(proof.len() <= crate::fees::rangeproof_max_size(42_000, 52));

        let opened = p
            .unblind(&blinding_key, &eph_pub, &proof, &commitment, &script, &generator)
            .unwrap();
        assert_eq!(opened.value, 42_000);
        assert_eq!(opened.asset, a);
        assert_eq!(opened.asset_blinder, abf);
        assert_eq!(opened.amount_blinder, vbf);

        let stranger = random_secret_key();
        assert!(p
            .unblind(&stranger, &eph_pub, &proof, &commitment, &script, &generator)
            .is_err());
        // The script is bound into the proof
        assert!(p
            .unblind(&blinding_key, &eph_pub, &proof, &commitment, &[0x51], &generator)
            .is_err());
    }

    #[test]
    fn test_surjection_proof_domain() {
        let p = Secp256k1Confidential;
        let inputs = [asset(1), asset(2)];
        let in_abfs = [blinder(), blinder()];
        let in_gens = [
            p.asset_generator(&inputs[0], &in_abfs[0]).unwrap(),
            p.asset_generator(&inputs[1], &in_abfs[1]).unwrap(),
        ];
        let abf = blinder();
        let generator = p.asset_generator(&inputs[1], &abf).unwrap();
        let entropy = [7u8; 32];

        let proof = p
            .surjection_proof(&inputs[1], &abf, &generator, &entropy, &inputs, &in_abfs, &in_gens)
            .unwrap();
        assert!(proof.len() <= crate::fees::surjection_proof_size(2));
        assert!(p.verify_surjection_proof(&proof, &generator, &in_gens));

        // Wrong domain: the proven input is missing
        assert!(!p.verify_surjection_proof(&proof, &generator, &in_gens[..1]));
        // Wrong domain: the proven input is swapped for a foreign asset
        let foreign = asset(5);
        let foreign_in = p.asset_generator(&foreign, &in_abfs[1]).unwrap();
        assert!(!p.verify_surjection_proof(&proof, &generator, &[in_gens[0], foreign_in]));

        // Foreign asset: the proof does not carry over to another output generator
        let foreign_gen = p.asset_generator(&foreign, &abf).unwrap();
        assert!(!p.verify_surjection_proof(&proof, &foreign_gen, &in_gens));
        // and cannot be produced from inputs that never held it
        assert!(p
            .surjection_proof(&foreign, &abf, &foreign_gen, &entropy, &inputs, &in_abfs, &in_gens)
            .is_err());
    }

    #[test]
    fn test_forged_surjection_proof_is_rejected() {
        let p = Secp256k1Confidential;
        let a = asset(4);
        let in_abf = blinder();
        let in_gen = p.asset_generator(&a, &in_abf).unwrap();
        let abf = blinder();
        let generator = p.asset_generator(&a, &abf).unwrap();
        let mut proof = p
            .surjection_proof(&a, &abf, &generator, &[1u8; 32], &[a], &[in_abf], &[in_gen])
            .unwrap();

        let last = proof.len() - 1;
        proof[last] ^= 0x01;
        assert!(!p.verify_surjection_proof(&proof, &generator, &[in_gen]));
        assert!(!p.verify_surjection_proof(&[0xab; 67], &generator, &[in_gen]));
        assert!(!p.verify_surjection_proof(&[], &generator, &[in_gen]));
    }
}

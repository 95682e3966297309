use openssl::{
    bn::BigNum,
    ecdsa::EcdsaSig,
    error::ErrorStack,
    hash::MessageDigest,
    pkey::{PKey, Public},
    sha::sha256,
    sign::{Signer, Verifier},
};
use thiserror::Error;

use crate::{
    base64::Base64,
    key_pair::{KeyAlgorithm, KeyPair},
};

/// 簽名操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Signing error: {0}")]
    Signing(#[from] ErrorStack),
    #[error("Malformed signature of {0} bytes")]
    Malformed(usize),
}

/// 簽名演算法的介面。
trait SignatureAlgorithmT {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError>;

    fn verify(
        &self,
        data: &[u8],
        signature: &[u8],
        pub_key: &PKey<Public>,
    ) -> Result<bool, SignatureError>;
}

/// RS256：RSASSA-PKCS1-v1_5 搭配 SHA-256。
struct RsaSignature;

impl SignatureAlgorithmT for RsaSignature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
        let mut signer = Signer::new(MessageDigest::sha256(), &key_pair.pri_key)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }

    fn verify(
        &self,
        data: &[u8],
        signature: &[u8],
        pub_key: &PKey<Public>,
    ) -> Result<bool, SignatureError> {
        let mut verifier = Verifier::new(MessageDigest::sha256(), pub_key)?;
        verifier.update(data)?;
        Ok(verifier.verify(signature)?)
    }
}

/// ES256：P-256 上的 ECDSA，簽名為 JWS 要求的固定長度 `r || s`，而非 DER。
struct EcSignature;

impl EcSignature {
    const COMPONENT_LEN: usize = 32;
}

impl SignatureAlgorithmT for EcSignature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
        let ec_key = key_pair.pri_key.ec_key()?;
        let sig = EcdsaSig::sign(&sha256(data), &ec_key)?;

        let mut raw = sig.r().to_vec_padded(Self::COMPONENT_LEN as i32)?;
        raw.extend(sig.s().to_vec_padded(Self::COMPONENT_LEN as i32)?);
        Ok(raw)
    }

    fn verify(
        &self,
        data: &[u8],
        signature: &[u8],
        pub_key: &PKey<Public>,
    ) -> Result<bool, SignatureError> {
        if signature.len() != Self::COMPONENT_LEN * 2 {
            return Err(SignatureError::Malformed(signature.len()));
        }
        let (r, s) = signature.split_at(Self::COMPONENT_LEN);
        let sig = EcdsaSig::from_private_components(BigNum::from_slice(r)?, BigNum::from_slice(s)?)?;
        let ec_key = pub_key.ec_key()?;
        Ok(sig.verify(&sha256(data), &ec_key)?)
    }
}

/// 根據金鑰演算法取得對應的簽名實作。
fn algorithm_for(algorithm: KeyAlgorithm) -> Box<dyn SignatureAlgorithmT> {
    match algorithm {
        KeyAlgorithm::Rsa => Box::new(RsaSignature),
        KeyAlgorithm::Ec => Box::new(EcSignature),
    }
}

/// 對 `base64url(header) + "." + base64url(payload)` 產生簽名。
pub fn create_signature(
    header_b64: &Base64,
    payload_b64: &Base64,
    key_pair: &KeyPair,
) -> Result<Base64, SignatureError> {
    let signing_input = signing_input(&header_b64.base64_url(), &payload_b64.base64_url());
    let signature = algorithm_for(key_pair.algorithm).sign(signing_input.as_bytes(), key_pair)?;
    Ok(Base64::new(signature))
}

/// 以公鑰驗證已編碼的 header、payload 與簽名。
pub fn verify_signature(
    algorithm: KeyAlgorithm,
    protected: &str,
    payload: &str,
    signature: &[u8],
    pub_key: &PKey<Public>,
) -> Result<bool, SignatureError> {
    let signing_input = signing_input(protected, payload);
    algorithm_for(algorithm).verify(signing_input.as_bytes(), signature, pub_key)
}

fn signing_input(protected: &str, payload: &str) -> String {
    format!("{}.{}", protected, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(key: &KeyPair) {
        let header = Base64::new(r#"{"alg":"x"}"#);
        let payload = Base64::new(r#"{"a":1}"#);
        let sig = create_signature(&header, &payload, key).unwrap();

        assert!(verify_signature(
            key.algorithm,
            &header.base64_url(),
            &payload.base64_url(),
            sig.as_bytes(),
            &key.pub_key,
        )
        .unwrap());
        assert!(!verify_signature(
            key.algorithm,
            &header.base64_url(),
            &Base64::new(r#"{"a":2}"#).base64_url(),
            sig.as_bytes(),
            &key.pub_key,
        )
        .unwrap());
    }

    #[test]
    fn test_rs256_sign_and_verify() {
        round_trip(&KeyPair::generate_rsa(2048).unwrap());
    }

    #[test]
    fn test_es256_signature_is_raw_r_s() {
        let key = KeyPair::generate(KeyAlgorithm::Ec).unwrap();
        let sig = create_signature(&Base64::new("h"), &Base64::new("p"), &key).unwrap();
        assert_eq!(sig.as_bytes().len(), 64);
        round_trip(&key);
    }
}

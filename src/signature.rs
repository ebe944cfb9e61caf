use openssl::hash::MessageDigest;
use openssl::sign::Signer;
use thiserror::Error;

use crate::{base64, key_pair::AccountKey};

/// 定義簽名操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum SignatureError {
    /// 簽名過程中發生錯誤，附帶錯誤訊息。
    #[error("Signing error: {0}")]
    SigningError(String),
    /// 不支援的簽名演算法，附帶未支援的演算法名稱。
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// 定義簽名演算法的介面。
trait SignatureAlgorithmT {
    /// 使用帳戶金鑰對資料進行簽名，回傳簽名後的位元組。
    fn sign(&self, data: &[u8], key: &AccountKey) -> Result<Vec<u8>, SignatureError>;
}

/// RS256 簽名演算法的實作。
struct RsaSignature;

impl SignatureAlgorithmT for RsaSignature {
    fn sign(&self, data: &[u8], key: &AccountKey) -> Result<Vec<u8>, SignatureError> {
        let mut signer = Signer::new(MessageDigest::sha256(), &key.pri_key)
            .map_err(|e| SignatureError::SigningError(e.to_string()))?;

        signer
            .update(data)
            .map_err(|e| SignatureError::SigningError(e.to_string()))?;

        signer
            .sign_to_vec()
            .map_err(|e| SignatureError::SigningError(e.to_string()))
    }
}

/// 簽名演算法工廠，根據演算法名稱取得對應的實作。
struct SignatureAlgorithmFactory;

impl SignatureAlgorithmFactory {
    fn get_algorithm(alg_name: &str) -> Result<Box<dyn SignatureAlgorithmT>, SignatureError> {
        match alg_name.to_uppercase().as_str() {
            "RSA" => Ok(Box::new(RsaSignature)),
            _ => Err(SignatureError::UnsupportedAlgorithm(alg_name.to_string())),
        }
    }
}

/// 根據已編碼的保護頭與 payload 生成 JWS 簽名。
///
/// 簽名輸入為 `protected "." payload`（兩者皆已是 URL-safe Base64
/// 字串），簽名結果同樣以 URL-safe Base64 回傳。
///
/// # 錯誤
///
/// 金鑰演算法不受支援或 OpenSSL 簽名失敗時回傳 [`SignatureError`]。
pub fn create_signature(
    protected_b64: &str,
    payload_b64: &str,
    key: &AccountKey,
) -> Result<String, SignatureError> {
    let signing_input = format!("{}.{}", protected_b64, payload_b64);
    let algorithm = SignatureAlgorithmFactory::get_algorithm(&key.alg_name)?;

    let signature = algorithm.sign(signing_input.as_bytes(), key)?;

    Ok(base64::encode_url(signature))
}

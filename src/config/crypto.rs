/// Access Token 落盘加密
///
/// 设置环境变量 `GRAPHMAIL_TOKEN_KEY` 后，缓存文件中的 Access Token
/// 使用 AES-256-GCM 加密存储，密钥由口令经 Argon2 派生
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use anyhow::{Context, Result};
use argon2::Argon2;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

/// 口令环境变量
pub const TOKEN_KEY_ENV: &str = "GRAPHMAIL_TOKEN_KEY";

/// 密文前缀，缓存文件中据此区分明文与密文
const ENCRYPTED_PREFIX: &str = "encrypted:";

/// 96-bit nonce
const NONCE_SIZE: usize = 12;

/// 固定盐值（用于密钥派生的一致性）
///
/// 所有用户相同，密钥的唯一性来自口令
const FIXED_SALT: &[u8] = b"GraphMail.v1.2026";

/// Token 加解密器
#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; 32],
}

// 不输出密钥
impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher(..)")
    }
}

impl TokenCipher {
    /// 从口令派生 256-bit 密钥
    ///
    /// # Errors
    /// - 口令为空
    /// - Argon2 派生失败
    pub fn from_passphrase(passphrase: &str) -> Result<Self> {
        if passphrase.is_empty() {
            anyhow::bail!("{} 不能为空", TOKEN_KEY_ENV);
        }

        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), FIXED_SALT, &mut key)
            .map_err(|e| anyhow::anyhow!("Argon2 密钥派生失败: {}", e))?;

        tracing::debug!("加密密钥派生成功（256-bit）");

        Ok(Self { key })
    }

    /// 从环境变量读取口令，未设置时返回 None（明文存储）
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var(TOKEN_KEY_ENV) {
            Ok(passphrase) => Self::from_passphrase(&passphrase)
                .with_context(|| format!("无法从 {} 派生加密密钥", TOKEN_KEY_ENV))
                .map(Some),
            Err(_) => Ok(None),
        }
    }

    fn aead(&self) -> Aes256Gcm {
        Aes256Gcm::new(&self.key.into())
    }

    /// 加密 Access Token，每次使用新的随机 nonce
    ///
    /// 输出：`encrypted:<Base64(nonce ‖ 密文)>`
    pub fn encrypt(&self, plain: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .aead()
            .encrypt(&nonce, plain.as_bytes())
            .map_err(|e| anyhow::anyhow!("Token 加密失败: {}", e))?;

        let payload = [nonce.as_slice(), sealed.as_slice()].concat();
        Ok(format!("{}{}", ENCRYPTED_PREFIX, BASE64.encode(payload)))
    }

    /// 解密 `encrypt` 的输出
    ///
    /// # Errors
    /// 前缀缺失、Base64 无效、长度不足，或口令与加密时不一致
    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let encoded = encrypted
            .strip_prefix(ENCRYPTED_PREFIX)
            .ok_or_else(|| anyhow::anyhow!("不是加密的 Token（缺少 {} 前缀）", ENCRYPTED_PREFIX))?;

        let payload = BASE64.decode(encoded).context("密文 Base64 无效")?;
        if payload.len() <= NONCE_SIZE {
            anyhow::bail!("密文过短（{} 字节）", payload.len());
        }

        let (nonce, sealed) = payload.split_at(NONCE_SIZE);
        let plain = self
            .aead()
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| anyhow::anyhow!("Token 解密失败，{} 可能与加密时不一致", TOKEN_KEY_ENV))?;

        String::from_utf8(plain).context("解密结果不是 UTF-8 文本")
    }
}

/// 缓存中的 Token 是否为密文
pub fn is_encrypted(token: &str) -> bool {
    token.starts_with(ENCRYPTED_PREFIX)
}

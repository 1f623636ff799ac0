//! # 信頼ポリシー
//!
//! 署名サーバーとのTLSで「どのサーバーを信頼するか」と「どの身元を提示するか」を決める。
//!
//! ## 信頼モデル
//! - サーバー証明書は **ピン留め** で検証する。提示されたチェーンのいずれかが
//!   設定済みの証明書とバイト単位で一致すれば受理し、それ以外は拒否する。
//! - CA署名・有効期限・ホスト名は検証しない。ピン留めがこれらを置き換える。
//!   ホスト名検証の無効化は見落としではなく、署名サーバー側が前提とする信頼モデル。
//! - クライアント証明書は常に1組だけを提示する（サーバー側の要求内容によらない）。
//!
//! 読み込み失敗は起動時には致命的にせず「未設定」として保持し、
//! チャネルを開く時点で [`WardenError::ConfigInvalid`] にする。

use std::path::Path;

use rustls_pki_types::CertificateDer;

use crate::error::{Result, WardenError};
use crate::identity::{Identity, PrivateKeyMaterial};

/// ピン留めするサーバー証明書と、提示するクライアント証明書・秘密鍵の組。
///
/// 読み込み後は不変。チャネルには `Arc` で共有して渡す。
#[derive(Debug, Default)]
pub struct TrustPolicy {
    /// ピン留めするサーバー証明書。Noneは未設定。
    server: Option<Identity>,
    /// 提示するクライアント証明書と秘密鍵。Noneは未設定。
    client: Option<(Identity, PrivateKeyMaterial)>,
}

impl TrustPolicy {
    /// 読み込み済みの証明書・鍵から構築する。
    pub fn new(server: Option<Identity>, client: Option<(Identity, PrivateKeyMaterial)>) -> Self {
        Self { server, client }
    }

    /// 各ファイルから信頼ポリシーを構築する。
    ///
    /// 読み込みに失敗した項目は警告を出して未設定のままにする。
    pub fn load(server_cert: &Path, client_cert: &Path, client_key: &Path) -> Self {
        let server = match Self::load_server_identity(server_cert) {
            Ok(identity) => {
                tracing::info!(
                    subject = %identity.subject(),
                    sha256 = %identity.fingerprint(),
                    "ピン留めするサーバー証明書を読み込みました"
                );
                Some(identity)
            }
            Err(e) => {
                tracing::warn!("サーバー証明書を読み込めません（ピン留め未設定）: {e}");
                None
            }
        };

        let client = match Self::load_client_identity(client_cert, client_key) {
            Ok((identity, key)) => {
                tracing::info!(
                    subject = %identity.subject(),
                    serial = %identity.serial(),
                    "クライアント証明書を読み込みました"
                );
                Some((identity, key))
            }
            Err(e) => {
                tracing::warn!("クライアント証明書/秘密鍵を読み込めません: {e}");
                None
            }
        };

        Self { server, client }
    }

    /// ピン留めするサーバー証明書を読み込む。
    pub fn load_server_identity(path: &Path) -> Result<Identity> {
        Identity::load(path)
    }

    /// クライアント証明書とPKCS#8秘密鍵を読み込む。
    pub fn load_client_identity(
        cert_path: &Path,
        key_path: &Path,
    ) -> Result<(Identity, PrivateKeyMaterial)> {
        let identity = Identity::load(cert_path)?;
        let key = PrivateKeyMaterial::load(key_path)?;
        Ok((identity, key))
    }

    /// ピン留めするサーバー証明書が設定されているか。
    pub fn has_server_identity(&self) -> bool {
        self.server.is_some()
    }

    /// クライアント証明書・秘密鍵が設定されているか。
    pub fn has_client_identity(&self) -> bool {
        self.client.is_some()
    }

    /// チャネルを開ける状態か確認する。どちらかが未設定なら接続しない。
    pub fn ensure_configured(&self) -> Result<()> {
        if self.server.is_none() {
            return Err(WardenError::ConfigInvalid(
                "ピン留めするサーバー証明書が未設定です".into(),
            ));
        }
        if self.client.is_none() {
            return Err(WardenError::ConfigInvalid(
                "クライアント証明書/秘密鍵が未設定です".into(),
            ));
        }
        Ok(())
    }

    /// サーバーが提示した証明書チェーンを検証する。
    ///
    /// チェーンのいずれかがピン留めされた証明書とバイト単位で一致する場合のみ受理する。
    /// 空・未提示のチェーン、およびピン留め未設定の場合は常に拒否する。
    pub fn verify_server(&self, presented: Option<&[CertificateDer<'_>]>) -> Result<()> {
        let Some(pinned) = &self.server else {
            return Err(WardenError::CertificateRejected);
        };
        let chain = match presented {
            Some(chain) if !chain.is_empty() => chain,
            _ => return Err(WardenError::CertificateRejected),
        };

        if chain.iter().any(|cert| pinned.matches(cert.as_ref())) {
            Ok(())
        } else {
            Err(WardenError::CertificateRejected)
        }
    }

    /// 提示するクライアント証明書と秘密鍵。
    pub fn present_client_identity(&self) -> Result<(&Identity, &PrivateKeyMaterial)> {
        self.client
            .as_ref()
            .map(|(identity, key)| (identity, key))
            .ok_or_else(|| {
                WardenError::ConfigInvalid("クライアント証明書/秘密鍵が未設定です".into())
            })
    }
}

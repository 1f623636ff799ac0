//! # 設定
//!
//! 環境変数から署名サーバーの接続先と証明書のパスを読み込む。
//!
//! | 環境変数 | 既定値 |
//! |----------|--------|
//! | `WARDEN_PRODUCT` | 必須 |
//! | `WARDEN_SERVER_CERT` | 必須 |
//! | `WARDEN_HOST` | `localhost` |
//! | `WARDEN_PORT` | `9000` |
//! | `WARDEN_KEYSET` | `dev` |
//! | `WARDEN_CLIENT_CERT` | `./client.crt` |
//! | `WARDEN_CLIENT_KEY` | `./client.key` |
//!
//! 空文字列は未設定として扱う。

use std::path::PathBuf;

use warden_core::{Endpoint, Result, TrustPolicy, WardenError};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 9000;
const DEFAULT_KEYSET: &str = "dev";
const DEFAULT_CLIENT_CERT: &str = "./client.crt";
const DEFAULT_CLIENT_KEY: &str = "./client.key";

/// 環境変数から読み込んだ設定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WardenConfig {
    pub host: String,
    pub port: u16,
    pub product: String,
    pub keyset: String,
    /// ピン留めするサーバー証明書
    pub server_cert: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

impl WardenConfig {
    /// プロセスの環境変数から読み込む。
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 任意の参照関数から読み込む。
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());
        let required = |name: &str| {
            get(name).ok_or_else(|| {
                WardenError::ConfigInvalid(format!("環境変数 {name} が設定されていません"))
            })
        };

        let product = required("WARDEN_PRODUCT")?;
        let server_cert = PathBuf::from(required("WARDEN_SERVER_CERT")?);

        let port = match get("WARDEN_PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                WardenError::ConfigInvalid(format!("WARDEN_PORT がポート番号ではありません: {raw}"))
            })?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: get("WARDEN_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            product,
            keyset: get("WARDEN_KEYSET").unwrap_or_else(|| DEFAULT_KEYSET.to_string()),
            server_cert,
            client_cert: get("WARDEN_CLIENT_CERT")
                .map_or_else(|| PathBuf::from(DEFAULT_CLIENT_CERT), PathBuf::from),
            client_key: get("WARDEN_CLIENT_KEY")
                .map_or_else(|| PathBuf::from(DEFAULT_CLIENT_KEY), PathBuf::from),
        })
    }

    /// 証明書ファイルから信頼ポリシーを構築する。読めない項目は未設定になる。
    pub fn load_trust_policy(&self) -> TrustPolicy {
        TrustPolicy::load(&self.server_cert, &self.client_cert, &self.client_key)
    }

    /// 署名鍵 `target_name` への送信先。
    pub fn endpoint(&self, target_name: impl Into<String>) -> Endpoint {
        Endpoint::new(
            self.host.clone(),
            self.port,
            self.product.clone(),
            self.keyset.clone(),
            target_name,
        )
    }
}

//! # 署名エンドポイント
//!
//! 1回の署名リクエストの送信先を表す。
//!
//! URL形式: `https://{host}:{port}/sign/{product}-{keyset}-{target_name}`
//!
//! `target_name` は署名に使う鍵の識別子で、証明書ファイル名から拡張子を
//! 除いたもの（例: `platform.x509.pem` → `platform`）。

use std::path::Path;

use crate::error::{Result, WardenError};

/// 署名リクエストの送信先。呼び出しごとに作り、1回の送信で消費する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    product: String,
    keyset: String,
    target_name: String,
}

impl Endpoint {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        product: impl Into<String>,
        keyset: impl Into<String>,
        target_name: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            product: product.into(),
            keyset: keyset.into(),
            target_name: target_name.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// パス部分（`/sign/{product}-{keyset}-{target_name}`）。
    pub fn path(&self) -> String {
        format!("/sign/{}-{}-{}", self.product, self.keyset, self.target_name)
    }

    /// 送信先URL。IPv6アドレスは角括弧で囲む。
    pub fn url(&self) -> String {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("https://{host}:{}{}", self.port, self.path())
    }
}

/// 証明書ファイルのパスから署名鍵の識別子を取り出す。
///
/// パスの最後の要素から、最初の `.` 以降を取り除く。
/// 空のファイル名や `.` で始まるファイル名（最後の要素が `.` のものを含む）は
/// [`WardenError::ArgumentInvalid`]。
pub fn extract_name(path: &str) -> Result<String> {
    let invalid = || WardenError::ArgumentInvalid(format!("ファイル名を解釈できません: {path:?}"));

    // `Path` は末尾の `.` を読み飛ばすため、生の最終要素で判定する
    if path.trim_end_matches('/').rsplit('/').next() == Some(".") {
        return Err(invalid());
    }

    let base = Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(invalid)?;

    match base.find('.') {
        Some(0) => Err(invalid()),
        Some(i) => Ok(base[..i].to_string()),
        None if base.is_empty() => Err(invalid()),
        None => Ok(base.to_string()),
    }
}

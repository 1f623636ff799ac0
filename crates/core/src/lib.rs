//! # Warden Core
//!
//! リモート署名サーバー（Warden）へ成果物を送り、署名済みバイト列を受け取るためのコア。
//!
//! ## 構成
//! - [`trust`]: サーバー証明書のピン留めと、提示するクライアント証明書の管理
//! - [`tls`]: 信頼ポリシーをrustlsの検証・証明書選択コールバックに接続する
//! - [`channel`]: 相互TLSで1回のPOSTを行う送信チャネル
//! - [`endpoint`]: 送信先URLと署名鍵識別子の組み立て
//! - [`identity`]: 証明書・秘密鍵の読み込み
//!
//! ## 処理フロー
//! 1. 信頼ポリシーを読み込む（失敗しても未設定として続行する）
//! 2. 証明書ファイル名から署名鍵の識別子を求め、送信先を決める
//! 3. チャネルで送信する。ポリシーが未設定なら通信せずに失敗する

pub mod channel;
pub mod endpoint;
pub mod error;
pub mod identity;
pub mod tls;
pub mod trust;

pub use channel::{ChannelState, HttpsTransport, SubmissionChannel, Timeouts, Transport};
pub use endpoint::{extract_name, Endpoint};
pub use error::{Result, WardenError};
pub use identity::{Identity, PrivateKeyMaterial};
pub use trust::TrustPolicy;

//! # Warden エラー型
//!
//! 信頼設定の読み込みから署名サーバーとの通信までで共通のエラー型。
//! CLIはこの分類をそのまま終了コードに変換する。

/// Wardenクライアントのエラー型。
///
/// コアは内部でリトライしない。どの分類も、その呼び出しにとっては致命的。
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    /// 必須設定の欠落・パース失敗（ピン留め証明書、プロダクトID、ポート番号、クライアント証明書/鍵）
    #[error("設定が不正です: {0}")]
    ConfigInvalid(String),
    /// 引数から対象名を導出できない、または証明書/鍵ペアの個数が不正
    #[error("引数が不正です: {0}")]
    ArgumentInvalid(String),
    /// サーバーが提示した証明書がピン留めされた証明書と一致しない
    #[error("サーバー証明書がピン留めされた証明書と一致しません")]
    CertificateRejected,
    /// 署名サーバーが成功以外のステータスを返した（ボディは破棄済み）
    #[error("署名サーバーがリクエストを拒否しました: ステータス {0}")]
    RemoteRejected(u16),
    /// ローカルファイルまたはネットワークのI/O失敗（タイムアウトを含む）
    #[error("I/Oエラー: {0}")]
    Io(String),
}

/// [`WardenError`] を使うResult型。
pub type Result<T> = std::result::Result<T, WardenError>;

/// エラーの`source()`連鎖を `: ` 区切りの1行にまとめる。
///
/// reqwestのエラーは表示文字列に原因を含まないため、診断メッセージ用に使う。
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

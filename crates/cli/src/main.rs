//! # warden-signapk
//!
//! AOSPの `signapk` とコマンドライン互換のコマンド。ローカルでは署名せず、
//! 成果物をWarden署名サーバーに送って署名済みのものを受け取る。
//!
//! ## 処理フロー
//! 1. 引数を解釈し、先頭の証明書ファイル名から署名鍵の識別子を求める
//! 2. 環境変数から設定と信頼ポリシーを読み込む
//! 3. 入力ファイルを署名サーバーに送る
//! 4. 署名済みバイト列を出力ファイルに書き込む
//!
//! ## ログ
//! 標準エラーに出力する。既定は `warn` で、`RUST_LOG` で変更できる。
//!
//! ## 終了コード
//! - 0: 成功
//! - 255: 引数が不正（使い方を表示）
//! - 254: それ以外の失敗。出力ファイルは書き込まない

mod args;
mod artifact;
mod config;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use warden_core::{extract_name, SubmissionChannel, WardenError};

use crate::args::{parse_invocation, Cli, USAGE};
use crate::artifact::{read_input, write_output};
use crate::config::WardenConfig;

/// 引数不正時の終了コード
const EXIT_USAGE: u8 = 255;

/// 致命的エラー時の終了コード
const EXIT_FATAL: u8 = 254;

/// `RUST_LOG` 未設定時のログフィルタ。成功時は何も出力しない
const DEFAULT_LOG_FILTER: &str = "warn";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok()))
        .init();

    let result = match Cli::try_parse() {
        Ok(cli) => run(cli.args).await,
        Err(e) => Err(WardenError::ArgumentInvalid(e.to_string()).into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}

/// `RUST_LOG` の値からログフィルタを作る。未設定・空・不正なら既定値。
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

async fn run(raw_args: Vec<String>) -> anyhow::Result<()> {
    run_with(raw_args, WardenConfig::from_env).await
}

/// 引数を検証してから `load_config` で設定を読み込み、署名を依頼する。
async fn run_with(
    raw_args: Vec<String>,
    load_config: impl FnOnce() -> warden_core::Result<WardenConfig>,
) -> anyhow::Result<()> {
    let invocation = parse_invocation(&raw_args)?;
    let cert = invocation.signing_cert();
    let target_name = extract_name(cert)?;
    if invocation.ignored_pairs() > 0 {
        tracing::warn!(
            ignored = invocation.ignored_pairs(),
            "2組目以降の証明書・鍵は無視します"
        );
    }

    let config = load_config()?;
    let trust = Arc::new(config.load_trust_policy());
    let endpoint = config.endpoint(target_name);

    let input = read_input(Path::new(&invocation.input)).await?;
    let channel = SubmissionChannel::new(trust);
    let signed = channel
        .submit(endpoint, input)
        .await
        .with_context(|| format!("証明書 '{cert}' での署名に失敗しました"))?;

    write_output(Path::new(&invocation.output), &signed).await?;
    tracing::info!(
        output = %invocation.output,
        bytes = signed.len(),
        "署名済みファイルを書き込みました"
    );
    Ok(())
}

/// エラーを表示し、終了コードを決める。
fn report(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<WardenError>() {
        Some(WardenError::ArgumentInvalid(msg)) => {
            println!("{USAGE}");
            eprintln!("{msg}");
            ExitCode::from(EXIT_USAGE)
        }
        _ => {
            eprintln!("FATAL ERROR -- aborting");
            eprintln!("{err:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};

    use axum::http::StatusCode;
    use tracing_subscriber::filter::LevelFilter;
    use warden_core::channel::test_helpers::*;

    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("warden-main-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn testdata(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../core/testdata")
            .join(name)
    }

    /// モックサーバー宛ての設定（テスト用の証明書を使う）
    fn config_for(addr: SocketAddr) -> WardenConfig {
        WardenConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            product: "aosp".into(),
            keyset: "dev".into(),
            server_cert: testdata("server.crt"),
            client_cert: testdata("client.crt"),
            client_key: testdata("client.key"),
        }
    }

    /// 入力ファイルと既存の出力ファイルを用意し、引数列を返す
    fn prepare_artifacts(dir: &Path) -> (Vec<String>, PathBuf) {
        let input = dir.join("in.apk");
        let output = dir.join("out.apk");
        std::fs::write(&input, [1u8, 2, 3]).unwrap();
        std::fs::write(&output, b"previous output").unwrap();

        let args = vec![
            "-w".to_string(),
            "keys/platform.x509.pem".to_string(),
            "keys/platform.pk8".to_string(),
            input.to_string_lossy().into_owned(),
            output.to_string_lossy().into_owned(),
        ];
        (args, output)
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// 引数不正は255、それ以外は254
    #[test]
    fn test_report_exit_codes() {
        let usage = anyhow::Error::from(WardenError::ArgumentInvalid("x".into()));
        assert_eq!(report(&usage), ExitCode::from(EXIT_USAGE));

        let fatal = anyhow::Error::from(WardenError::CertificateRejected).context("署名に失敗");
        assert_eq!(report(&fatal), ExitCode::from(EXIT_FATAL));

        let config = anyhow::Error::from(WardenError::ConfigInvalid("x".into()));
        assert_eq!(report(&config), ExitCode::from(EXIT_FATAL));
    }

    /// ログは既定でwarn以上のみ、RUST_LOGがあればそれに従う
    #[test]
    fn test_log_filter_defaults_to_warn() {
        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(
            log_filter(Some("  ".into())).max_level_hint(),
            Some(LevelFilter::WARN)
        );
        assert_eq!(
            log_filter(Some("debug".into())).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
    }

    /// 引数の個数が合わなければ設定を読む前に失敗する
    #[tokio::test]
    async fn test_run_rejects_bad_arguments() {
        let loaded = AtomicBool::new(false);
        let err = run_with(strings(&["-w", "in.apk", "out.apk"]), || {
            loaded.store(true, Ordering::SeqCst);
            Err(WardenError::ConfigInvalid("未使用".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<WardenError>(),
            Some(WardenError::ArgumentInvalid(_))
        ));
        assert!(!loaded.load(Ordering::SeqCst));
    }

    /// 署名鍵名を取り出せない証明書ファイル名は引数不正で、出力を作らない
    #[tokio::test]
    async fn test_run_rejects_hidden_cert_name() {
        let dir = scratch_dir("hidden-cert");
        let output = dir.join("out.apk");
        let args = vec![
            "keys/.pem".to_string(),
            "keys/.pk8".to_string(),
            dir.join("in.apk").to_string_lossy().into_owned(),
            output.to_string_lossy().into_owned(),
        ];

        let err = run_with(args, || Err(WardenError::ConfigInvalid("未使用".into())))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<WardenError>(),
            Some(WardenError::ArgumentInvalid(_))
        ));
        assert!(!output.exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    /// 成功時は出力ファイルがレスポンスボディそのものになる
    #[tokio::test]
    async fn test_run_writes_signed_output() {
        let server = start_signing_server(SERVER_CERT, SERVER_KEY, StatusCode::OK, vec![4, 5]).await;
        let dir = scratch_dir("signed");
        let (args, output) = prepare_artifacts(&dir);

        run_with(args, || Ok(config_for(server.addr)))
            .await
            .expect("署名に成功する");

        assert_eq!(std::fs::read(&output).unwrap(), vec![4, 5]);
        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].target, "aosp-dev-platform");
        assert_eq!(requests[0].body, vec![1, 2, 3]);
        assert_eq!(dir_entries(&dir), vec!["in.apk", "out.apk"]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    /// 署名サーバーが拒否したら既存の出力ファイルはそのまま残る
    #[tokio::test]
    async fn test_run_keeps_output_on_remote_rejection() {
        let server = start_signing_server(
            SERVER_CERT,
            SERVER_KEY,
            StatusCode::INTERNAL_SERVER_ERROR,
            b"partial".to_vec(),
        )
        .await;
        let dir = scratch_dir("rejected");
        let (args, output) = prepare_artifacts(&dir);

        let err = run_with(args, || Ok(config_for(server.addr)))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<WardenError>(),
            Some(WardenError::RemoteRejected(500))
        ));
        assert_eq!(report(&err), ExitCode::from(EXIT_FATAL));
        assert_eq!(std::fs::read(&output).unwrap(), b"previous output".to_vec());
        assert_eq!(dir_entries(&dir), vec!["in.apk", "out.apk"]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    /// ピン留めと異なるサーバーには送らず、既存の出力ファイルもそのまま残る
    #[tokio::test]
    async fn test_run_keeps_output_on_unpinned_server() {
        let server = start_signing_server(OTHER_CERT, OTHER_KEY, StatusCode::OK, vec![4, 5]).await;
        let dir = scratch_dir("unpinned");
        let (args, output) = prepare_artifacts(&dir);

        let err = run_with(args, || Ok(config_for(server.addr)))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<WardenError>(),
            Some(WardenError::CertificateRejected)
        ));
        assert!(server.requests().is_empty());
        assert_eq!(std::fs::read(&output).unwrap(), b"previous output".to_vec());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}

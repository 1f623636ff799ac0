//! # コマンドライン引数
//!
//! signapk互換の引数を解釈する。
//!
//! ```text
//! warden-signapk [flags] <cert> <key> [<cert> <key> ...] <input> <output>
//! ```
//!
//! 先頭のフラグはビルドシステムがsignapkに渡すもので、署名の設定は
//! サーバー側にあるため読み飛ばす。秘密鍵もサーバー側にあるので、
//! 鍵のパスは受け取るだけで使わない。

use clap::Parser;
use warden_core::{Result, WardenError};

/// 使い方の表示。
pub const USAGE: &str = "\
usage: warden-signapk [flags] <cert> <key> [<cert> <key> ...] <input> <output>

This program is command-line compatible with the AOSP signapk.jar, but
rather than sign files locally, it defers to a Warden signing server instance.

Configuration is via environment variables.
Multiple cert/key pairs after the first pair are ignored.
Command-line flags (starting with '-') prior to input files are ignored.";

/// 生の引数列。フラグの解釈は [`parse_invocation`] で行う。
#[derive(Parser, Debug)]
#[command(
    name = "warden-signapk",
    about = "Warden署名サーバーに署名を委ねるsignapk互換コマンド",
    override_usage = "warden-signapk [flags] <cert> <key> [<cert> <key> ...] <input> <output>",
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct Cli {
    /// signapkと同じ引数列
    #[arg(allow_hyphen_values = true, trailing_var_arg = true, num_args = 0..)]
    pub args: Vec<String>,
}

/// 証明書と秘密鍵のパスの組。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertKeyPair {
    pub cert: String,
    /// 鍵はサーバー側にあるため使わない
    pub key: String,
}

/// 解釈済みの呼び出し内容。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// 1組以上。署名に使うのは先頭の組のみ
    pub pairs: Vec<CertKeyPair>,
    pub input: String,
    pub output: String,
}

impl Invocation {
    /// 署名に使う証明書パス。
    pub fn signing_cert(&self) -> &str {
        &self.pairs[0].cert
    }

    /// 無視される組の数。
    pub fn ignored_pairs(&self) -> usize {
        self.pairs.len() - 1
    }
}

/// signapk向けのフラグを読み飛ばし、残りの引数を返す。
///
/// - `-w` は読み飛ばす
/// - `--min-sdk-version` は値ごと読み飛ばす
/// - その他 `-` で始まる引数は読み飛ばす
/// - `-` で始まらない最初の引数でフラグの処理を終える
pub fn skip_legacy_flags(args: &[String]) -> &[String] {
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-w" => i += 1,
            "--min-sdk-version" => i += 2,
            arg if arg.starts_with('-') => i += 1,
            _ => break,
        }
    }
    &args[i.min(args.len())..]
}

/// 引数列を解釈する。
///
/// フラグを除いた残りが4個以上の偶数個（証明書・鍵の組 + 入力 + 出力）でなければ
/// [`WardenError::ArgumentInvalid`]。
pub fn parse_invocation(args: &[String]) -> Result<Invocation> {
    let rest = skip_legacy_flags(args);
    if rest.len() < 4 || rest.len() % 2 != 0 {
        return Err(WardenError::ArgumentInvalid(format!(
            "証明書・鍵の組と入出力ファイルが必要です (残りの引数: {}個)",
            rest.len()
        )));
    }

    let (pairs, files) = rest.split_at(rest.len() - 2);
    let pairs = pairs
        .chunks_exact(2)
        .map(|pair| CertKeyPair {
            cert: pair[0].clone(),
            key: pair[1].clone(),
        })
        .collect();

    Ok(Invocation {
        pairs,
        input: files[0].clone(),
        output: files[1].clone(),
    })
}

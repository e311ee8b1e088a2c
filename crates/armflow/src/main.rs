mod commands;
mod output;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "armflow")]
#[command(about = "宣言したリソースを、一回の呼び出しずつ収束させる。", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct InvocationArgs {
    /// リソース宣言 (YAML)
    #[arg(short, long)]
    declaration: PathBuf,
    /// インスタンスID (状態ファイルの単位)
    #[arg(short, long, env = "ARMFLOW_INSTANCE")]
    instance: String,
}

#[derive(Subcommand)]
enum Commands {
    /// リソースを作成 (既存リソースはポリシーに従って採用)
    Create(InvocationArgs),
    /// 宣言されたペイロードを再適用
    Update(InvocationArgs),
    /// 記録されたリソースを削除
    Delete {
        /// インスタンスID (状態ファイルの単位)
        #[arg(short, long, env = "ARMFLOW_INSTANCE")]
        instance: String,
    },
    /// ドリフトを検出
    Pull(InvocationArgs),
    /// バージョン情報を表示
    Version,
}

fn init_tracing() {
    // stdout は結果の JSON 専用なので、ログは stderr に出す
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let result = match cli.command {
        // Versionコマンドは設定ファイル不要
        Commands::Version => {
            println!("armflow {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        Commands::Create(args) => commands::create(&args).await,
        Commands::Update(args) => commands::update(&args).await,
        Commands::Delete { instance } => commands::delete(&instance).await,
        Commands::Pull(args) => commands::pull(&args).await,
    };

    match result {
        Ok(outcome) => output::report(&outcome),
        Err(err) => output::report_error(&err),
    }
}
